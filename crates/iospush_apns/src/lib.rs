//! Apple Push Notification service client for iospush
//!
//! This crate speaks the legacy binary provider interface: notifications are
//! written as enhanced-format frames over a TLS socket authenticated with a
//! client certificate, and the gateway answers only when it rejects one.
//!
//! # Features
//!
//! - Building JSON payloads with the 256-byte size limit enforced
//! - Encoding and decoding notification frames and error responses
//! - Opening certificate-authenticated TLS connections per environment
//! - Sending to one device or to many in connection-sized chunks
//! - Reading the feedback service's list of unreachable devices
//!
//! # Example
//!
//! ```rust,no_run
//! use iospush_apns::{DeliveryEngine, NotificationPayload, SendOptions};
//! use iospush_common::{DeviceEndpoint, Environment};
//! use iospush_config::ApnsConfig;
//!
//! async fn notify() -> Result<(), iospush_apns::ApnsError> {
//!     let engine = DeliveryEngine::from_config(ApnsConfig::default());
//!     let payload = NotificationPayload::builder("Hello").badge(1).build()?;
//!     let device = DeviceEndpoint::new(
//!         "0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef",
//!         Environment::Sandbox,
//!     );
//!     engine
//!         .send_one(&device, &payload, None, &SendOptions::default())
//!         .await
//!         .into_result()
//! }
//! ```

pub mod connection;
pub mod delivery;
pub mod error;
pub mod feedback;
pub mod frame;
pub mod payload;
pub mod registry;

#[cfg(test)]
mod frame_proptest;

pub use connection::{Connect, ConnectionManager, DeliveryConnection, TlsConnection};
pub use delivery::{DeliveryEngine, DeliveryReport, DeliveryResult, SendOptions};
pub use error::{ApnsError, DeliveryErrorKind, RegistryError};
pub use feedback::{decode_feedback, fetch_feedback, FeedbackReader, FeedbackRecord};
pub use frame::{encode, DeviceToken, ErrorResponse, NotificationFrame};
pub use payload::{Alert, LocalizedAlert, NotificationPayload, PayloadBuilder, MAX_PAYLOAD_SIZE};
pub use registry::{
    apply_feedback, notify_all, record_outcomes, DeviceRegistry, InMemoryDeviceRegistry,
};
