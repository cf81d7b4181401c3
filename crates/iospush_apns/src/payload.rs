//! Notification payload construction.
//!
//! A payload is the JSON document delivered to the device: an `aps`
//! dictionary understood by the operating system plus any number of custom
//! top-level keys for the app. The binary interface caps the serialized
//! document at [`MAX_PAYLOAD_SIZE`] bytes, so the builder serializes eagerly
//! and refuses anything larger.

use bytes::Bytes;
use serde::Serialize;
use serde_json::{Map, Value};
use std::fmt;
use tracing::warn;

use crate::error::ApnsError;

/// Largest serialized payload the gateway accepts.
pub const MAX_PAYLOAD_SIZE: usize = 256;

/// Key reserved for the system dictionary.
const APS_KEY: &str = "aps";

/// The `alert` value: either a plain message or a localizable dictionary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Alert {
    Text(String),
    Localized(LocalizedAlert),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LocalizedAlert {
    pub body: String,

    #[serde(rename = "action-loc-key", skip_serializing_if = "Option::is_none")]
    pub action_loc_key: Option<String>,

    #[serde(rename = "loc-key", skip_serializing_if = "Option::is_none")]
    pub loc_key: Option<String>,

    #[serde(rename = "loc-args", skip_serializing_if = "Vec::is_empty")]
    pub loc_args: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
struct Aps {
    alert: Alert,

    #[serde(skip_serializing_if = "Option::is_none")]
    badge: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    sound: Option<String>,

    #[serde(rename = "content-available", skip_serializing_if = "Option::is_none")]
    content_available: Option<u8>,
}

/// Builder for [`NotificationPayload`].
///
/// Every builder owns its own custom-data map and localization arguments;
/// nothing is shared between payloads.
#[derive(Debug, Clone)]
pub struct PayloadBuilder {
    alert: String,
    badge: Option<u32>,
    sound: Option<String>,
    content_available: bool,
    custom: Map<String, Value>,
    action_loc_key: Option<String>,
    loc_key: Option<String>,
    loc_args: Vec<String>,
}

impl PayloadBuilder {
    pub fn new(alert: impl Into<String>) -> Self {
        Self {
            alert: alert.into(),
            badge: None,
            sound: None,
            content_available: false,
            custom: Map::new(),
            action_loc_key: None,
            loc_key: None,
            loc_args: Vec::new(),
        }
    }

    /// Set the badge number. `0` is sent and clears the badge on the device.
    pub fn badge(mut self, badge: u32) -> Self {
        self.badge = Some(badge);
        self
    }

    /// Set the sound to play. An empty name means no sound.
    pub fn sound(mut self, sound: impl Into<String>) -> Self {
        let sound = sound.into();
        self.sound = (!sound.is_empty()).then_some(sound);
        self
    }

    pub fn content_available(mut self, content_available: bool) -> Self {
        self.content_available = content_available;
        self
    }

    /// Add a custom top-level key.
    ///
    /// `aps` is reserved: a custom value under that key is replaced by the
    /// system dictionary when the payload is built.
    pub fn custom(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.custom.insert(key.into(), value.into());
        self
    }

    /// Add every entry of `params` as a custom top-level key.
    pub fn custom_params(mut self, params: Map<String, Value>) -> Self {
        self.custom.extend(params);
        self
    }

    pub fn action_loc_key(mut self, key: impl Into<String>) -> Self {
        self.action_loc_key = Some(key.into());
        self
    }

    pub fn loc_key(mut self, key: impl Into<String>) -> Self {
        self.loc_key = Some(key.into());
        self
    }

    pub fn loc_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.loc_args = args.into_iter().map(Into::into).collect();
        self
    }

    fn alert(&self) -> Alert {
        let localized =
            self.action_loc_key.is_some() || self.loc_key.is_some() || !self.loc_args.is_empty();
        if localized {
            Alert::Localized(LocalizedAlert {
                body: self.alert.clone(),
                action_loc_key: self.action_loc_key.clone(),
                loc_key: self.loc_key.clone(),
                loc_args: self.loc_args.clone(),
            })
        } else {
            Alert::Text(self.alert.clone())
        }
    }

    /// Serialize the payload.
    ///
    /// # Errors
    ///
    /// [`ApnsError::PayloadTooLarge`] when the compact JSON exceeds
    /// [`MAX_PAYLOAD_SIZE`] bytes.
    pub fn build(self) -> Result<NotificationPayload, ApnsError> {
        let aps = Aps {
            alert: self.alert(),
            badge: self.badge,
            sound: self.sound.clone(),
            content_available: self.content_available.then_some(1),
        };

        let mut document = self.custom;
        if document.contains_key(APS_KEY) {
            warn!("custom payload key \"aps\" is reserved and will be overwritten");
        }
        let aps = serde_json::to_value(&aps).map_err(|e| ApnsError::Serialization(e.to_string()))?;
        document.insert(APS_KEY.to_string(), aps);

        // serde_json writes compact output and leaves non-ASCII characters unescaped
        let serialized = serde_json::to_vec(&Value::Object(document))
            .map_err(|e| ApnsError::Serialization(e.to_string()))?;

        if serialized.len() > MAX_PAYLOAD_SIZE {
            return Err(ApnsError::PayloadTooLarge {
                size: serialized.len(),
                max: MAX_PAYLOAD_SIZE,
            });
        }

        Ok(NotificationPayload {
            bytes: Bytes::from(serialized),
        })
    }
}

/// A serialized payload that fits the gateway's size limit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationPayload {
    bytes: Bytes,
}

impl NotificationPayload {
    pub fn builder(alert: impl Into<String>) -> PayloadBuilder {
        PayloadBuilder::new(alert)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Cheap clone of the serialized bytes, for framing.
    pub fn bytes(&self) -> Bytes {
        self.bytes.clone()
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl fmt::Display for NotificationPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&String::from_utf8_lossy(&self.bytes))
    }
}
