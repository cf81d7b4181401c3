// --- File: crates/iospush_config/src/models.rs ---

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Port of the binary notification gateway.
pub const DEFAULT_GATEWAY_PORT: u16 = 2195;
/// Port of the feedback service.
pub const DEFAULT_FEEDBACK_PORT: u16 = 2196;

// --- Per-environment APNs endpoints ---
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct ApnsEnvironmentConfig {
    pub host: String,
    #[serde(default = "default_gateway_port")]
    pub port: u16,
    pub feedback_host: String,
    #[serde(default = "default_feedback_port")]
    pub feedback_port: u16,
    // PEM file holding the client certificate chain and its private key.
    // May be set to "secret_from_env" and injected at load time.
    #[serde(default)]
    pub certificate_path: Option<PathBuf>,
}

impl ApnsEnvironmentConfig {
    pub fn sandbox() -> Self {
        Self {
            host: "gateway.sandbox.push.apple.com".to_string(),
            port: DEFAULT_GATEWAY_PORT,
            feedback_host: "feedback.sandbox.push.apple.com".to_string(),
            feedback_port: DEFAULT_FEEDBACK_PORT,
            certificate_path: None,
        }
    }

    pub fn production() -> Self {
        Self {
            host: "gateway.push.apple.com".to_string(),
            port: DEFAULT_GATEWAY_PORT,
            feedback_host: "feedback.push.apple.com".to_string(),
            feedback_port: DEFAULT_FEEDBACK_PORT,
            certificate_path: None,
        }
    }
}

fn default_gateway_port() -> u16 {
    DEFAULT_GATEWAY_PORT
}

fn default_feedback_port() -> u16 {
    DEFAULT_FEEDBACK_PORT
}

/// TLS protocol versions the client is allowed to negotiate.
///
/// `Default` lets the TLS library offer every version it considers secure.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum TlsVersion {
    #[default]
    Default,
    Tls12,
    Tls13,
}

// --- APNs Config ---
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct ApnsConfig {
    #[serde(default = "ApnsEnvironmentConfig::sandbox")]
    pub sandbox: ApnsEnvironmentConfig,
    #[serde(default = "ApnsEnvironmentConfig::production")]
    pub production: ApnsEnvironmentConfig,
    #[serde(default)]
    pub tls_version: TlsVersion,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    // How long to wait for an error response after each frame. Silence means accepted.
    #[serde(default = "default_response_timeout_ms")]
    pub response_timeout_ms: u64,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

fn default_response_timeout_ms() -> u64 {
    1_000
}

fn default_chunk_size() -> usize {
    75
}

impl Default for ApnsConfig {
    fn default() -> Self {
        Self {
            sandbox: ApnsEnvironmentConfig::sandbox(),
            production: ApnsEnvironmentConfig::production(),
            tls_version: TlsVersion::default(),
            connect_timeout_ms: default_connect_timeout_ms(),
            response_timeout_ms: default_response_timeout_ms(),
            chunk_size: default_chunk_size(),
        }
    }
}

// --- Logging Config ---
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    // When set, logs are also written to a daily rolling file in this directory.
    #[serde(default)]
    pub directory: Option<PathBuf>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            directory: None,
        }
    }
}

// --- Unified App Configuration ---
#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq, Eq)]
pub struct AppConfig {
    #[serde(default)]
    pub apns: ApnsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}
