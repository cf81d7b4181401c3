// --- File: crates/iospush_apns/src/error.rs ---
use iospush_common::{Environment, PushError};
use std::fmt;
use thiserror::Error;

/// Errors produced by the APNs delivery core.
///
/// Every variant owns plain data so a single failure can be cloned onto each
/// device it affected (e.g. the rest of a chunk after its connection broke).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApnsError {
    /// Serialized payload exceeds the protocol limit
    #[error("payload is {size} bytes, maximum is {max}")]
    PayloadTooLarge { size: usize, max: usize },

    /// Device token is not 64 hex characters
    #[error("invalid device token: {0}")]
    InvalidToken(String),

    /// Client certificate missing, unreadable or unparseable
    #[error("certificate error: {0}")]
    Certificate(String),

    /// Socket, TLS handshake or stream failure
    #[error("connection error: {0}")]
    Connection(String),

    /// The gateway answered a notification with an error response
    #[error("delivery rejected: {kind} (identifier {identifier})")]
    Delivery {
        kind: DeliveryErrorKind,
        identifier: u32,
    },

    /// Feedback stream ended in the middle of a record
    #[error("feedback stream truncated: {remaining} trailing bytes")]
    TruncatedStream { remaining: usize },

    /// Bytes that should hold a frame do not
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    /// Payload could not be serialized
    #[error("failed to serialize payload: {0}")]
    Serialization(String),
}

impl ApnsError {
    pub fn is_connection(&self) -> bool {
        matches!(self, ApnsError::Connection(_))
    }
}

/// Status codes of the gateway's error response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeliveryErrorKind {
    ProcessingError,
    MissingToken,
    MissingTopic,
    MissingPayload,
    InvalidTokenSize,
    InvalidTopicSize,
    InvalidPayloadSize,
    InvalidToken,
    /// Any status outside 1..=8, carried verbatim
    Unknown(u8),
}

impl DeliveryErrorKind {
    pub fn from_status(status: u8) -> Self {
        match status {
            1 => DeliveryErrorKind::ProcessingError,
            2 => DeliveryErrorKind::MissingToken,
            3 => DeliveryErrorKind::MissingTopic,
            4 => DeliveryErrorKind::MissingPayload,
            5 => DeliveryErrorKind::InvalidTokenSize,
            6 => DeliveryErrorKind::InvalidTopicSize,
            7 => DeliveryErrorKind::InvalidPayloadSize,
            8 => DeliveryErrorKind::InvalidToken,
            other => DeliveryErrorKind::Unknown(other),
        }
    }

    pub fn status(self) -> u8 {
        match self {
            DeliveryErrorKind::ProcessingError => 1,
            DeliveryErrorKind::MissingToken => 2,
            DeliveryErrorKind::MissingTopic => 3,
            DeliveryErrorKind::MissingPayload => 4,
            DeliveryErrorKind::InvalidTokenSize => 5,
            DeliveryErrorKind::InvalidTopicSize => 6,
            DeliveryErrorKind::InvalidPayloadSize => 7,
            DeliveryErrorKind::InvalidToken => 8,
            DeliveryErrorKind::Unknown(status) => status,
        }
    }
}

impl fmt::Display for DeliveryErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeliveryErrorKind::ProcessingError => f.write_str("Processing error"),
            DeliveryErrorKind::MissingToken => f.write_str("Missing device token"),
            DeliveryErrorKind::MissingTopic => f.write_str("Missing topic"),
            DeliveryErrorKind::MissingPayload => f.write_str("Missing payload"),
            DeliveryErrorKind::InvalidTokenSize => f.write_str("Invalid token size"),
            DeliveryErrorKind::InvalidTopicSize => f.write_str("Invalid topic size"),
            DeliveryErrorKind::InvalidPayloadSize => f.write_str("Invalid payload size"),
            DeliveryErrorKind::InvalidToken => f.write_str("Invalid token"),
            DeliveryErrorKind::Unknown(status) => write!(f, "Unknown (status {})", status),
        }
    }
}

/// Errors reported by a device registry.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("device {token} not registered for {environment}")]
    NotFound {
        token: String,
        environment: Environment,
    },

    #[error("registry storage error: {0}")]
    Storage(String),
}

/// Convert ApnsError to PushError
impl From<ApnsError> for PushError {
    fn from(err: ApnsError) -> Self {
        match err {
            ApnsError::PayloadTooLarge { .. } | ApnsError::InvalidToken(_) => {
                PushError::ValidationError(err.to_string())
            }
            ApnsError::Certificate(msg) => PushError::CertificateError(msg),
            ApnsError::Connection(msg) => PushError::ConnectionError(msg),
            ApnsError::Delivery { .. } => PushError::DeliveryError(err.to_string()),
            ApnsError::TruncatedStream { .. } | ApnsError::MalformedFrame(_) => {
                PushError::ParseError(err.to_string())
            }
            ApnsError::Serialization(msg) => PushError::InternalError(msg),
        }
    }
}

impl From<RegistryError> for PushError {
    fn from(err: RegistryError) -> Self {
        PushError::RegistryError(err.to_string())
    }
}
