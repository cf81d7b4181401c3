// --- File: crates/iospush_common/src/lib.rs ---

pub mod error;   // Error handling
pub mod logging; // Logging utilities
pub mod models;  // Device records shared with the registry

// Re-export error types and utilities for easier access
pub use error::{config_error, internal_error, validation_error, Context, PushError};

// Re-export logging utilities for easier access
pub use logging::{init, init_with_config, init_with_level, log_error, log_result};

pub use models::{DeviceEndpoint, Environment};
