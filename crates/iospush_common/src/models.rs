// --- File: crates/iospush_common/src/models.rs ---

// Device records exchanged with the registry collaborator. The delivery core
// only reads `token` and `environment`; the remaining fields are maintained
// by whoever owns the registry.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Which deployment of the push service a device belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Sandbox,
    Production,
}

impl Environment {
    pub fn is_sandbox(self) -> bool {
        matches!(self, Environment::Sandbox)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Environment::Sandbox => "sandbox",
            Environment::Production => "production",
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sandbox" => Ok(Environment::Sandbox),
            "production" | "live" => Ok(Environment::Production),
            other => Err(format!("unknown environment: {other}")),
        }
    }
}

/// A single push target.
///
/// `(token, environment)` identifies the endpoint; both are fixed at
/// construction. The token is kept as the 64-character hex string the device
/// reported and is validated when a frame is built for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceEndpoint {
    token: String,
    environment: Environment,

    /// When a notification was last accepted for this device
    pub last_notified_at: Option<DateTime<Utc>>,

    /// Set once the feedback service reported the token as invalid
    pub failed: bool,

    /// Free-form label, e.g. "Lee's iPhone"
    pub notes: String,

    pub platform: Option<String>,
}

impl DeviceEndpoint {
    /// Create a new endpoint that has never been notified.
    pub fn new(token: impl Into<String>, environment: Environment) -> Self {
        Self {
            token: token.into(),
            environment,
            last_notified_at: None,
            failed: false,
            notes: String::new(),
            platform: None,
        }
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn environment(&self) -> Environment {
        self.environment
    }

    /// Key under which a registry stores this endpoint.
    pub fn key(&self) -> (String, Environment) {
        (self.token.to_ascii_lowercase(), self.environment)
    }
}

impl fmt::Display for DeviceEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Device {} ({})", self.token, self.environment)
    }
}
