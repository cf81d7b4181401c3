//! Sending notifications to devices over gateway connections.

use bytes::Bytes;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};

use iospush_common::{DeviceEndpoint, Environment};
use iospush_config::ApnsConfig;

use crate::connection::{Connect, ConnectionManager, DeliveryConnection};
use crate::error::ApnsError;
use crate::frame;
use crate::payload::NotificationPayload;

/// How long to wait for an error response after each write.
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Devices sent per connection in [`DeliveryEngine::send_many`].
pub const DEFAULT_CHUNK_SIZE: usize = 75;

/// Per-send parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SendOptions {
    /// Echoed back by the gateway in an error response
    pub identifier: u32,
    /// UNIX time after which the notification may be dropped; 0 for none
    pub expiry: u32,
    /// Client certificate to use instead of the environment's default
    pub certificate_path: Option<PathBuf>,
}

impl SendOptions {
    pub fn with_identifier(mut self, identifier: u32) -> Self {
        self.identifier = identifier;
        self
    }

    pub fn with_expiry(mut self, expiry: u32) -> Self {
        self.expiry = expiry;
        self
    }

    pub fn with_certificate(mut self, path: impl Into<PathBuf>) -> Self {
        self.certificate_path = Some(path.into());
        self
    }
}

/// Outcome of sending to one device.
///
/// `Accepted` means the gateway did not object within the response window,
/// not that the device received anything.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryResult {
    Accepted,
    Failed(ApnsError),
}

impl DeliveryResult {
    pub fn is_accepted(&self) -> bool {
        matches!(self, DeliveryResult::Accepted)
    }

    pub fn error(&self) -> Option<&ApnsError> {
        match self {
            DeliveryResult::Accepted => None,
            DeliveryResult::Failed(err) => Some(err),
        }
    }

    pub fn into_result(self) -> Result<(), ApnsError> {
        match self {
            DeliveryResult::Accepted => Ok(()),
            DeliveryResult::Failed(err) => Err(err),
        }
    }
}

impl From<Result<(), ApnsError>> for DeliveryResult {
    fn from(result: Result<(), ApnsError>) -> Self {
        match result {
            Ok(()) => DeliveryResult::Accepted,
            Err(err) => DeliveryResult::Failed(err),
        }
    }
}

/// The result for one device in a batch send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReport {
    pub token: String,
    pub environment: Environment,
    pub result: DeliveryResult,
}

impl DeliveryReport {
    fn new(endpoint: &DeviceEndpoint, result: DeliveryResult) -> Self {
        Self {
            token: endpoint.token().to_owned(),
            environment: endpoint.environment(),
            result,
        }
    }
}

/// Sends notifications through connections opened by `C`.
pub struct DeliveryEngine<C> {
    connector: C,
    response_timeout: Duration,
    chunk_size: usize,
}

impl DeliveryEngine<ConnectionManager> {
    /// Engine over TLS connections, with timeouts and chunk size from `config`.
    pub fn from_config(config: ApnsConfig) -> Self {
        let response_timeout = Duration::from_millis(config.response_timeout_ms);
        let chunk_size = config.chunk_size;
        Self::new(ConnectionManager::new(config))
            .with_response_timeout(response_timeout)
            .with_chunk_size(chunk_size)
    }
}

impl<C: Connect> DeliveryEngine<C> {
    pub fn new(connector: C) -> Self {
        Self {
            connector,
            response_timeout: DEFAULT_RESPONSE_TIMEOUT,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    pub fn with_response_timeout(mut self, response_timeout: Duration) -> Self {
        self.response_timeout = response_timeout;
        self
    }

    /// A chunk size of 0 is treated as 1.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn connector(&self) -> &C {
        &self.connector
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Send `payload` to one device.
    ///
    /// With `connection`, the frame goes out on it and it stays open unless
    /// the gateway rejected the frame or hung up, after which it reports
    /// closed. Without, a connection is opened for the device's environment
    /// and closed again afterwards.
    pub async fn send_one(
        &self,
        endpoint: &DeviceEndpoint,
        payload: &NotificationPayload,
        connection: Option<&mut DeliveryConnection<C::Stream>>,
        options: &SendOptions,
    ) -> DeliveryResult {
        let frame = match self.build_frame(endpoint, payload, options) {
            Ok(frame) => frame,
            Err(err) => return DeliveryResult::Failed(err),
        };

        match connection {
            Some(connection) => self.deliver(connection, &frame).await.into(),
            None => {
                let mut connection = match self
                    .connector
                    .connect(endpoint.environment(), options.certificate_path.as_deref())
                    .await
                {
                    Ok(connection) => connection,
                    Err(err) => {
                        warn!(token = %endpoint.token(), error = %err, "could not open connection");
                        return DeliveryResult::Failed(err);
                    }
                };
                let result = self.deliver(&mut connection, &frame).await;
                connection.close().await;
                result.into()
            }
        }
    }

    /// Send `payload` to every endpoint, one connection per chunk.
    ///
    /// Endpoints are expected to share an environment; connections are opened
    /// for the first endpoint's. Returns one report per endpoint, in order.
    pub async fn send_many(
        &self,
        endpoints: &[DeviceEndpoint],
        payload: &NotificationPayload,
        options: &SendOptions,
    ) -> Vec<DeliveryReport> {
        let Some(first) = endpoints.first() else {
            return Vec::new();
        };
        let environment = first.environment();
        let mut reports = Vec::with_capacity(endpoints.len());

        for (index, chunk) in endpoints.chunks(self.chunk_size).enumerate() {
            let mut connection = match self
                .connector
                .connect(environment, options.certificate_path.as_deref())
                .await
            {
                Ok(connection) => connection,
                Err(err) => {
                    warn!(chunk = index, size = chunk.len(), error = %err, "could not open connection for chunk");
                    reports.extend(
                        chunk
                            .iter()
                            .map(|endpoint| DeliveryReport::new(endpoint, DeliveryResult::Failed(err.clone()))),
                    );
                    continue;
                }
            };

            let mut accepted = 0;
            let mut devices = chunk.iter();
            while let Some(endpoint) = devices.next() {
                let result = match self.build_frame(endpoint, payload, options) {
                    Ok(frame) => self.deliver(&mut connection, &frame).await,
                    Err(err) => Err(err),
                };

                match result {
                    Ok(()) => {
                        accepted += 1;
                        reports.push(DeliveryReport::new(endpoint, DeliveryResult::Accepted));
                    }
                    Err(err) if err.is_connection() => {
                        warn!(chunk = index, error = %err, "connection lost, failing rest of chunk");
                        reports.push(DeliveryReport::new(endpoint, DeliveryResult::Failed(err.clone())));
                        reports.extend(
                            devices
                                .by_ref()
                                .map(|endpoint| DeliveryReport::new(endpoint, DeliveryResult::Failed(err.clone()))),
                        );
                    }
                    Err(err) => {
                        reports.push(DeliveryReport::new(endpoint, DeliveryResult::Failed(err)));
                    }
                }
            }

            connection.close().await;
            info!(
                chunk = index,
                size = chunk.len(),
                accepted,
                %environment,
                "chunk delivered"
            );
        }

        reports
    }

    fn build_frame(
        &self,
        endpoint: &DeviceEndpoint,
        payload: &NotificationPayload,
        options: &SendOptions,
    ) -> Result<Bytes, ApnsError> {
        frame::encode(
            endpoint.token(),
            payload.as_bytes(),
            options.identifier,
            options.expiry,
        )
    }

    async fn deliver(
        &self,
        connection: &mut DeliveryConnection<C::Stream>,
        frame: &[u8],
    ) -> Result<(), ApnsError> {
        connection.write_frame(frame).await?;
        match connection.read_response(self.response_timeout).await? {
            None => {
                debug!(peer = %connection.peer(), "notification accepted");
                Ok(())
            }
            Some(response) => {
                let err = response.into_error();
                warn!(peer = %connection.peer(), error = %err, "gateway rejected notification");
                Err(err)
            }
        }
    }
}
