// --- File: crates/iospush_common/src/error.rs ---
use std::fmt;
use thiserror::Error;

/// The base error type for iospush binaries and integrations.
///
/// Library crates keep their own precise error enums and implement
/// `From<SpecificError> for PushError` so callers can use `?` across them.
#[derive(Error, Debug)]
pub enum PushError {
    /// Error occurred due to missing or invalid configuration
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Input rejected before any I/O happened
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// Error occurred while parsing data
    #[error("Failed to parse data: {0}")]
    ParseError(String),

    /// Client certificate could not be loaded
    #[error("Certificate error: {0}")]
    CertificateError(String),

    /// Socket or TLS failure talking to the push service
    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// The push service rejected a notification
    #[error("Delivery rejected: {0}")]
    DeliveryError(String),

    /// Error reported by the device registry
    #[error("Registry error: {0}")]
    RegistryError(String),

    /// Error occurred due to an internal error
    #[error("Internal error: {0}")]
    InternalError(String),
}

/// A trait for adding context to errors.
pub trait Context<T, E> {
    /// Adds context to an error.
    fn context<C>(self, context: C) -> Result<T, PushError>
    where
        C: fmt::Display + Send + Sync + 'static;

    /// Adds context to an error with a lazy context provider.
    fn with_context<C, F>(self, f: F) -> Result<T, PushError>
    where
        C: fmt::Display + Send + Sync + 'static,
        F: FnOnce() -> C;
}

impl<T, E: std::error::Error + Send + Sync + 'static> Context<T, E> for Result<T, E> {
    fn context<C>(self, context: C) -> Result<T, PushError>
    where
        C: fmt::Display + Send + Sync + 'static,
    {
        self.map_err(|error| PushError::InternalError(format!("{}: {}", context, error)))
    }

    fn with_context<C, F>(self, f: F) -> Result<T, PushError>
    where
        C: fmt::Display + Send + Sync + 'static,
        F: FnOnce() -> C,
    {
        self.map_err(|error| PushError::InternalError(format!("{}: {}", f(), error)))
    }
}

impl From<serde_json::Error> for PushError {
    fn from(err: serde_json::Error) -> Self {
        PushError::ParseError(err.to_string())
    }
}

impl From<std::io::Error> for PushError {
    fn from(err: std::io::Error) -> Self {
        PushError::InternalError(err.to_string())
    }
}

pub fn config_error<T: fmt::Display>(message: T) -> PushError {
    PushError::ConfigError(message.to_string())
}

pub fn validation_error<T: fmt::Display>(message: T) -> PushError {
    PushError::ValidationError(message.to_string())
}

pub fn internal_error<T: fmt::Display>(message: T) -> PushError {
    PushError::InternalError(message.to_string())
}
