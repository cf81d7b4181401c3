//! TLS connections to the APNs gateway and feedback service.
//!
//! [`ConnectionManager`] resolves hosts and client certificates from an
//! [`ApnsConfig`] and opens authenticated streams. The delivery engine opens
//! connections only through the [`Connect`] trait, so anything that yields an
//! async byte stream (an in-memory duplex in tests) can stand in for TLS.

use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName};
use rustls::{ClientConfig, RootCertStore, SupportedProtocolVersion};
use std::collections::HashMap;
use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::{timeout, timeout_at, Instant};
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;
use tracing::{debug, warn};

use iospush_common::Environment;
use iospush_config::{ApnsConfig, ApnsEnvironmentConfig, TlsVersion};

use crate::error::ApnsError;
use crate::frame::{ErrorResponse, ERROR_RESPONSE_LENGTH};

/// Stream type of a real gateway connection.
pub type TlsConnection = DeliveryConnection<TlsStream<TcpStream>>;

/// An open, authenticated stream to the gateway.
///
/// Whoever opened the connection owns it and is responsible for calling
/// [`DeliveryConnection::close`]. Once closed (or once the peer has hung up)
/// every write fails with [`ApnsError::Connection`].
#[derive(Debug)]
pub struct DeliveryConnection<S> {
    stream: Option<S>,
    environment: Environment,
    certificate_path: Option<PathBuf>,
    peer: String,
}

impl<S> DeliveryConnection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(
        stream: S,
        environment: Environment,
        certificate_path: Option<PathBuf>,
        peer: impl Into<String>,
    ) -> Self {
        Self {
            stream: Some(stream),
            environment,
            certificate_path,
            peer: peer.into(),
        }
    }

    pub fn environment(&self) -> Environment {
        self.environment
    }

    pub fn certificate_path(&self) -> Option<&Path> {
        self.certificate_path.as_deref()
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    pub fn is_closed(&self) -> bool {
        self.stream.is_none()
    }

    fn stream_mut(&mut self) -> Result<&mut S, ApnsError> {
        let peer = &self.peer;
        self.stream
            .as_mut()
            .ok_or_else(|| ApnsError::Connection(format!("connection to {peer} is closed")))
    }

    /// Write one encoded frame and flush it.
    pub async fn write_frame(&mut self, frame: &[u8]) -> Result<(), ApnsError> {
        let stream = self.stream_mut()?;
        let written = async {
            stream.write_all(frame).await?;
            stream.flush().await
        }
        .await;

        if let Err(err) = written {
            warn!(peer = %self.peer, error = %err, "write to gateway failed");
            self.stream = None;
            return Err(ApnsError::Connection(err.to_string()));
        }
        Ok(())
    }

    /// Wait up to `wait` for an error response.
    ///
    /// `Ok(None)` means the window passed in silence, which is how the gateway
    /// signals acceptance. End of stream, a reset, or a response cut short is
    /// [`ApnsError::Connection`] and retires the connection.
    ///
    /// The gateway hangs up after every error response, so receiving one also
    /// closes the connection: later writes fail instead of going nowhere.
    pub async fn read_response(
        &mut self,
        wait: Duration,
    ) -> Result<Option<ErrorResponse>, ApnsError> {
        let deadline = Instant::now() + wait;
        let stream = self.stream_mut()?;
        let mut buf = [0u8; ERROR_RESPONSE_LENGTH];
        let mut filled = 0;

        while filled < ERROR_RESPONSE_LENGTH {
            match timeout_at(deadline, stream.read(&mut buf[filled..])).await {
                Err(_elapsed) if filled == 0 => return Ok(None),
                Err(_elapsed) => {
                    // The rest of the response may still arrive and would be
                    // read as the answer to the next frame
                    self.stream = None;
                    return Err(ApnsError::Connection(format!(
                        "error response cut short after {filled} bytes"
                    )));
                }
                Ok(Ok(0)) => break,
                Ok(Ok(n)) => filled += n,
                Ok(Err(err)) if err.kind() == io::ErrorKind::UnexpectedEof => break,
                Ok(Err(err)) => {
                    self.stream = None;
                    return Err(ApnsError::Connection(err.to_string()));
                }
            }
        }

        if filled == 0 {
            warn!(peer = %self.peer, "gateway closed the connection");
            self.stream = None;
            return Err(ApnsError::Connection(format!(
                "{} closed the connection",
                self.peer
            )));
        }
        if filled < ERROR_RESPONSE_LENGTH {
            self.stream = None;
            return Err(ApnsError::Connection(format!(
                "error response cut short after {filled} bytes"
            )));
        }

        let response = ErrorResponse::decode(&buf);
        if response.command != crate::frame::ERROR_RESPONSE_COMMAND {
            warn!(command = response.command, "unexpected response command from gateway");
        }
        self.close().await;
        Ok(Some(response))
    }

    /// Shut the stream down. Calling this again does nothing.
    pub async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            if let Err(err) = stream.shutdown().await {
                debug!(peer = %self.peer, error = %err, "shutdown after close failed");
            }
            debug!(peer = %self.peer, "connection closed");
        }
    }
}

/// Opens gateway connections for an environment.
pub trait Connect: Send + Sync {
    type Stream: AsyncRead + AsyncWrite + Unpin + Send;

    /// Open a connection for `environment`, using `certificate_path` instead
    /// of the environment's default certificate when given.
    fn connect(
        &self,
        environment: Environment,
        certificate_path: Option<&Path>,
    ) -> impl Future<Output = Result<DeliveryConnection<Self::Stream>, ApnsError>> + Send;
}

/// TLS connection factory configured by [`ApnsConfig`].
///
/// Client TLS configurations are cached per certificate file, so repeated
/// opens only pay for the TCP connect and handshake.
pub struct ConnectionManager {
    config: ApnsConfig,
    tls_configs: Mutex<HashMap<PathBuf, Arc<ClientConfig>>>,
}

impl ConnectionManager {
    pub fn new(config: ApnsConfig) -> Self {
        Self {
            config,
            tls_configs: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &ApnsConfig {
        &self.config
    }

    fn environment_config(&self, environment: Environment) -> &ApnsEnvironmentConfig {
        match environment {
            Environment::Sandbox => &self.config.sandbox,
            Environment::Production => &self.config.production,
        }
    }

    /// The certificate used for `environment`: the override when given,
    /// otherwise the configured default.
    pub fn resolve_certificate(
        &self,
        environment: Environment,
        certificate_path: Option<&Path>,
    ) -> Result<PathBuf, ApnsError> {
        certificate_path
            .map(Path::to_path_buf)
            .or_else(|| self.environment_config(environment).certificate_path.clone())
            .ok_or_else(|| {
                ApnsError::Certificate(format!(
                    "no client certificate configured for {environment}"
                ))
            })
    }

    /// Open a delivery connection to the environment's gateway.
    pub async fn open(
        &self,
        environment: Environment,
        certificate_path: Option<&Path>,
    ) -> Result<TlsConnection, ApnsError> {
        let certificate = self.resolve_certificate(environment, certificate_path)?;
        let env_config = self.environment_config(environment);
        let stream = self
            .connect_tls(&env_config.host, env_config.port, &certificate)
            .await?;
        let peer = format!("{}:{}", env_config.host, env_config.port);
        debug!(%environment, %peer, "opened gateway connection");
        Ok(DeliveryConnection::new(
            stream,
            environment,
            Some(certificate),
            peer,
        ))
    }

    /// Open a stream to the environment's feedback service.
    pub async fn open_feedback(
        &self,
        environment: Environment,
        certificate_path: Option<&Path>,
    ) -> Result<TlsStream<TcpStream>, ApnsError> {
        let certificate = self.resolve_certificate(environment, certificate_path)?;
        let env_config = self.environment_config(environment);
        let stream = self
            .connect_tls(&env_config.feedback_host, env_config.feedback_port, &certificate)
            .await?;
        debug!(
            %environment,
            host = %env_config.feedback_host,
            "opened feedback connection"
        );
        Ok(stream)
    }

    async fn connect_tls(
        &self,
        host: &str,
        port: u16,
        certificate: &Path,
    ) -> Result<TlsStream<TcpStream>, ApnsError> {
        // Load the certificate first so a bad file fails before any network I/O
        let tls_config = self.client_config(certificate).await?;
        let server_name = ServerName::try_from(host.to_owned())
            .map_err(|e| ApnsError::Connection(format!("invalid host name {host}: {e}")))?;
        let connect_timeout = Duration::from_millis(self.config.connect_timeout_ms);

        let tcp = timeout(connect_timeout, TcpStream::connect((host, port)))
            .await
            .map_err(|_| ApnsError::Connection(format!("connect to {host}:{port} timed out")))?
            .map_err(|e| ApnsError::Connection(format!("connect to {host}:{port}: {e}")))?;

        timeout(
            connect_timeout,
            TlsConnector::from(tls_config).connect(server_name, tcp),
        )
        .await
        .map_err(|_| ApnsError::Connection(format!("TLS handshake with {host} timed out")))?
        .map_err(|e| ApnsError::Connection(format!("TLS handshake with {host}: {e}")))
    }

    async fn client_config(&self, certificate: &Path) -> Result<Arc<ClientConfig>, ApnsError> {
        let mut cache = self.tls_configs.lock().await;
        if let Some(config) = cache.get(certificate) {
            return Ok(config.clone());
        }

        let pem = tokio::fs::read(certificate).await.map_err(|e| {
            ApnsError::Certificate(format!("failed to read {}: {e}", certificate.display()))
        })?;
        let config = Arc::new(build_client_config(&pem, self.config.tls_version)?);
        cache.insert(certificate.to_path_buf(), config.clone());
        Ok(config)
    }
}

impl Connect for ConnectionManager {
    type Stream = TlsStream<TcpStream>;

    async fn connect(
        &self,
        environment: Environment,
        certificate_path: Option<&Path>,
    ) -> Result<TlsConnection, ApnsError> {
        self.open(environment, certificate_path).await
    }
}

static TLS12_ONLY: &[&SupportedProtocolVersion] = &[&rustls::version::TLS12];
static TLS13_ONLY: &[&SupportedProtocolVersion] = &[&rustls::version::TLS13];

fn protocol_versions(version: TlsVersion) -> &'static [&'static SupportedProtocolVersion] {
    match version {
        TlsVersion::Default => rustls::DEFAULT_VERSIONS,
        TlsVersion::Tls12 => TLS12_ONLY,
        TlsVersion::Tls13 => TLS13_ONLY,
    }
}

/// Build a client configuration from a PEM bundle holding the certificate
/// chain and its private key.
pub fn build_client_config(pem: &[u8], version: TlsVersion) -> Result<ClientConfig, ApnsError> {
    let certs = parse_certificates(pem)?;
    if certs.is_empty() {
        return Err(ApnsError::Certificate("no certificates found".into()));
    }
    let key = parse_private_key(pem)?;

    let mut roots = RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    ClientConfig::builder_with_provider(Arc::new(rustls::crypto::ring::default_provider()))
        .with_protocol_versions(protocol_versions(version))
        .map_err(|e| ApnsError::Connection(format!("TLS configuration error: {e}")))?
        .with_root_certificates(roots)
        .with_client_auth_cert(certs, key)
        .map_err(|e| ApnsError::Certificate(format!("client certificate rejected: {e}")))
}

/// Parse PEM-encoded certificates.
fn parse_certificates(pem: &[u8]) -> Result<Vec<CertificateDer<'static>>, ApnsError> {
    CertificateDer::pem_slice_iter(pem)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| ApnsError::Certificate(format!("failed to parse certificates: {e}")))
}

/// Parse PEM-encoded private key.
fn parse_private_key(pem: &[u8]) -> Result<PrivateKeyDer<'static>, ApnsError> {
    PrivateKeyDer::from_pem_slice(pem)
        .map_err(|e| ApnsError::Certificate(format!("failed to parse private key: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::ERROR_RESPONSE_COMMAND;
    use tokio::io::duplex;

    fn manager_with_certificate(path: Option<PathBuf>) -> ConnectionManager {
        let mut config = ApnsConfig::default();
        config.sandbox.certificate_path = path;
        ConnectionManager::new(config)
    }

    #[test]
    fn test_resolve_certificate_prefers_override() {
        let manager = manager_with_certificate(Some(PathBuf::from("/etc/sandbox.pem")));

        let default = manager
            .resolve_certificate(Environment::Sandbox, None)
            .expect("configured");
        assert_eq!(default, PathBuf::from("/etc/sandbox.pem"));

        let custom = manager
            .resolve_certificate(Environment::Sandbox, Some(Path::new("/tmp/custom.pem")))
            .expect("override");
        assert_eq!(custom, PathBuf::from("/tmp/custom.pem"));
    }

    #[test]
    fn test_resolve_certificate_without_any_path() {
        let manager = manager_with_certificate(None);
        let err = manager
            .resolve_certificate(Environment::Production, None)
            .unwrap_err();
        assert!(matches!(err, ApnsError::Certificate(_)));
    }

    #[tokio::test]
    async fn test_open_with_missing_certificate_file() {
        let manager = manager_with_certificate(Some(PathBuf::from(
            "/nonexistent/iospush/sandbox.pem",
        )));
        let err = manager.open(Environment::Sandbox, None).await.unwrap_err();
        assert!(matches!(err, ApnsError::Certificate(msg) if msg.contains("failed to read")));
    }

    #[tokio::test]
    async fn test_open_with_garbage_certificate_file() {
        let file = tempfile::NamedTempFile::new().expect("tempfile");
        std::fs::write(file.path(), b"not a certificate").expect("write");
        let manager = manager_with_certificate(None);

        let err = manager
            .open(Environment::Sandbox, Some(file.path()))
            .await
            .unwrap_err();
        assert!(matches!(err, ApnsError::Certificate(_)));
    }

    #[test]
    fn test_protocol_versions_follow_config() {
        assert_eq!(protocol_versions(TlsVersion::Tls12).len(), 1);
        assert_eq!(protocol_versions(TlsVersion::Tls13).len(), 1);
        assert!(!protocol_versions(TlsVersion::Default).is_empty());
    }

    #[tokio::test]
    async fn test_silence_is_no_response() {
        let (client, _server) = duplex(64);
        let mut connection = DeliveryConnection::new(client, Environment::Sandbox, None, "test");

        let response = connection
            .read_response(Duration::from_millis(20))
            .await
            .expect("silence is fine");
        assert!(response.is_none());
        assert!(!connection.is_closed());
    }

    #[tokio::test]
    async fn test_error_response_is_read() {
        let (client, mut server) = duplex(64);
        let mut connection = DeliveryConnection::new(client, Environment::Sandbox, None, "test");
        server
            .write_all(&ErrorResponse::new(8, 77).to_bytes())
            .await
            .expect("write");

        let response = connection
            .read_response(Duration::from_millis(200))
            .await
            .expect("read")
            .expect("response present");
        assert_eq!(response.command, ERROR_RESPONSE_COMMAND);
        assert_eq!(response.status, 8);
        assert_eq!(response.identifier, 77);
    }

    #[tokio::test]
    async fn test_peer_hangup_is_connection_error() {
        let (client, server) = duplex(64);
        let mut connection = DeliveryConnection::new(client, Environment::Sandbox, None, "test");
        drop(server);

        let err = connection
            .read_response(Duration::from_millis(200))
            .await
            .unwrap_err();
        assert!(err.is_connection());
        assert!(connection.is_closed());

        let err = connection.write_frame(b"frame").await.unwrap_err();
        assert!(err.is_connection());
    }

    #[tokio::test]
    async fn test_error_response_closes_connection() {
        let (client, mut server) = duplex(64);
        let mut connection = DeliveryConnection::new(client, Environment::Sandbox, None, "test");
        server
            .write_all(&ErrorResponse::new(8, 1).to_bytes())
            .await
            .expect("write");

        let response = connection
            .read_response(Duration::from_millis(200))
            .await
            .expect("read");
        assert!(response.is_some());
        assert!(connection.is_closed());

        let err = connection.write_frame(b"next").await.unwrap_err();
        assert!(err.is_connection());
    }

    #[tokio::test(start_paused = true)]
    async fn test_partial_response_then_silence_retires_connection() {
        let (client, mut server) = duplex(64);
        let mut connection = DeliveryConnection::new(client, Environment::Sandbox, None, "test");
        server.write_all(&[8, 8, 0]).await.expect("write");

        let err = connection
            .read_response(Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(err.is_connection());
        assert!(connection.is_closed());
        drop(server);
    }

    #[tokio::test]
    async fn test_partial_response_is_connection_error() {
        let (client, mut server) = duplex(64);
        let mut connection = DeliveryConnection::new(client, Environment::Sandbox, None, "test");
        server.write_all(&[8, 1, 0]).await.expect("write");
        drop(server);

        let err = connection
            .read_response(Duration::from_millis(200))
            .await
            .unwrap_err();
        assert!(err.is_connection());
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (client, _server) = duplex(64);
        let mut connection = DeliveryConnection::new(client, Environment::Production, None, "test");

        connection.close().await;
        connection.close().await;
        assert!(connection.is_closed());
    }
}
