//! Device registry seam
//!
//! The delivery core never stores devices itself. A registry supplies the
//! endpoints to notify and records what happened to them: accepted sends stamp
//! `last_notified_at`, feedback reports set `failed`.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::{debug, info};

use iospush_common::{DeviceEndpoint, Environment};

use crate::connection::Connect;
use crate::delivery::{DeliveryEngine, DeliveryReport, SendOptions};
use crate::error::RegistryError;
use crate::feedback::FeedbackRecord;
use crate::payload::NotificationPayload;

/// Storage for device endpoints
///
/// Implementations must keep `(token, environment)` unique. Tokens are
/// compared case-insensitively.
pub trait DeviceRegistry: Send + Sync {
    /// Register a device
    ///
    /// If the device is already registered for the environment, its record
    /// is replaced.
    ///
    /// # Arguments
    ///
    /// * `endpoint` - The device to store
    ///
    /// # Returns
    ///
    /// The stored endpoint
    fn register(
        &self,
        endpoint: DeviceEndpoint,
    ) -> impl std::future::Future<Output = Result<DeviceEndpoint, RegistryError>> + Send;

    /// Find all devices in an environment that have not been reported failed
    ///
    /// # Arguments
    ///
    /// * `environment` - The environment to list
    ///
    /// # Returns
    ///
    /// The active endpoints, ordered by token
    fn find_active(
        &self,
        environment: Environment,
    ) -> impl std::future::Future<Output = Result<Vec<DeviceEndpoint>, RegistryError>> + Send;

    /// Record that a notification was accepted for a device
    ///
    /// # Arguments
    ///
    /// * `token` - The device token
    /// * `environment` - The device's environment
    /// * `at` - When the notification was accepted
    fn mark_notified(
        &self,
        token: &str,
        environment: Environment,
        at: DateTime<Utc>,
    ) -> impl std::future::Future<Output = Result<(), RegistryError>> + Send;

    /// Record that the feedback service reported a device as gone
    ///
    /// # Arguments
    ///
    /// * `token` - The device token
    /// * `environment` - The device's environment
    fn mark_failed(
        &self,
        token: &str,
        environment: Environment,
    ) -> impl std::future::Future<Output = Result<(), RegistryError>> + Send;
}

/// A registry held in process memory.
#[derive(Debug, Default)]
pub struct InMemoryDeviceRegistry {
    devices: RwLock<HashMap<(String, Environment), DeviceEndpoint>>,
}

impl InMemoryDeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, token: &str, environment: Environment) -> Option<DeviceEndpoint> {
        let key = (token.to_ascii_lowercase(), environment);
        self.devices.read().await.get(&key).cloned()
    }

    pub async fn len(&self) -> usize {
        self.devices.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.devices.read().await.is_empty()
    }

    async fn update<F>(
        &self,
        token: &str,
        environment: Environment,
        apply: F,
    ) -> Result<(), RegistryError>
    where
        F: FnOnce(&mut DeviceEndpoint) + Send,
    {
        let key = (token.to_ascii_lowercase(), environment);
        let mut devices = self.devices.write().await;
        let endpoint = devices.get_mut(&key).ok_or_else(|| RegistryError::NotFound {
            token: token.to_owned(),
            environment,
        })?;
        apply(endpoint);
        Ok(())
    }
}

impl DeviceRegistry for InMemoryDeviceRegistry {
    async fn register(&self, endpoint: DeviceEndpoint) -> Result<DeviceEndpoint, RegistryError> {
        self.devices
            .write()
            .await
            .insert(endpoint.key(), endpoint.clone());
        debug!(device = %endpoint, "registered device");
        Ok(endpoint)
    }

    async fn find_active(
        &self,
        environment: Environment,
    ) -> Result<Vec<DeviceEndpoint>, RegistryError> {
        let devices = self.devices.read().await;
        let mut active: Vec<_> = devices
            .iter()
            .filter(|((_, env), endpoint)| *env == environment && !endpoint.failed)
            .map(|(_, endpoint)| endpoint.clone())
            .collect();
        active.sort_by(|a, b| a.key().cmp(&b.key()));
        Ok(active)
    }

    async fn mark_notified(
        &self,
        token: &str,
        environment: Environment,
        at: DateTime<Utc>,
    ) -> Result<(), RegistryError> {
        self.update(token, environment, |endpoint| {
            endpoint.last_notified_at = Some(at);
        })
        .await
    }

    async fn mark_failed(&self, token: &str, environment: Environment) -> Result<(), RegistryError> {
        self.update(token, environment, |endpoint| endpoint.failed = true)
            .await
    }
}

/// Stamp `last_notified_at` on every device whose send was accepted.
///
/// Reports for devices the registry does not know are skipped. Returns the
/// number of devices updated.
pub async fn record_outcomes<R: DeviceRegistry>(
    registry: &R,
    reports: &[DeliveryReport],
    at: DateTime<Utc>,
) -> Result<usize, RegistryError> {
    let mut updated = 0;
    for report in reports.iter().filter(|report| report.result.is_accepted()) {
        match registry
            .mark_notified(&report.token, report.environment, at)
            .await
        {
            Ok(()) => updated += 1,
            Err(RegistryError::NotFound { token, .. }) => {
                debug!(%token, "accepted device not in registry");
            }
            Err(err) => return Err(err),
        }
    }
    Ok(updated)
}

/// Mark every device named in a feedback batch as failed.
///
/// Returns the number of registered devices that were marked.
pub async fn apply_feedback<R: DeviceRegistry>(
    registry: &R,
    records: &[FeedbackRecord],
    environment: Environment,
) -> Result<usize, RegistryError> {
    let mut marked = 0;
    for record in records {
        let token = record.token.to_string();
        match registry.mark_failed(&token, environment).await {
            Ok(()) => marked += 1,
            Err(RegistryError::NotFound { .. }) => {
                debug!(%token, "feedback for unknown device");
            }
            Err(err) => return Err(err),
        }
    }
    info!(%environment, reported = records.len(), marked, "applied feedback");
    Ok(marked)
}

/// Send `payload` to every active device of `environment` and record the
/// accepted ones.
pub async fn notify_all<C, R>(
    engine: &DeliveryEngine<C>,
    registry: &R,
    environment: Environment,
    payload: &NotificationPayload,
    options: &SendOptions,
) -> Result<Vec<DeliveryReport>, RegistryError>
where
    C: Connect,
    R: DeviceRegistry,
{
    let endpoints = registry.find_active(environment).await?;
    if endpoints.is_empty() {
        info!(%environment, "no active devices");
        return Ok(Vec::new());
    }

    let reports = engine.send_many(&endpoints, payload, options).await;
    record_outcomes(registry, &reports, Utc::now()).await?;
    Ok(reports)
}
