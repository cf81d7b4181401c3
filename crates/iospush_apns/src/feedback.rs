//! Decoder for the feedback service stream.
//!
//! The feedback service reports devices that no longer accept notifications
//! as a sequence of fixed-width records, then closes the connection:
//!
//! ```text
//! timestamp(4) | token_len(2)=32 | token(32)
//! ```

use bytes::Buf;
use chrono::{DateTime, Utc};
use std::io;
use std::path::Path;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tracing::{debug, info};

use iospush_common::Environment;

use crate::connection::ConnectionManager;
use crate::error::ApnsError;
use crate::frame::{DeviceToken, TOKEN_LENGTH};

/// Size of one feedback record.
pub const FEEDBACK_RECORD_LENGTH: usize = 4 + 2 + TOKEN_LENGTH;

/// A device the service reported as unreachable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeedbackRecord {
    /// UNIX time at which the service determined the app was gone
    pub timestamp: u32,
    pub token: DeviceToken,
}

impl FeedbackRecord {
    pub fn decode(bytes: &[u8; FEEDBACK_RECORD_LENGTH]) -> Result<Self, ApnsError> {
        let mut buf = &bytes[..];
        let timestamp = buf.get_u32();
        let token_len = usize::from(buf.get_u16());
        if token_len != TOKEN_LENGTH {
            return Err(ApnsError::InvalidToken(format!(
                "feedback record declares token length {token_len}"
            )));
        }
        let mut token = [0u8; TOKEN_LENGTH];
        buf.copy_to_slice(&mut token);
        Ok(Self {
            timestamp,
            token: DeviceToken::from_bytes(token),
        })
    }

    pub fn reported_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(i64::from(self.timestamp), 0)
    }
}

/// Reads feedback records lazily from an async stream.
///
/// The sequence is finite and not restartable: once it ends (or fails) every
/// later call returns `Ok(None)`.
pub struct FeedbackReader<R> {
    reader: R,
    finished: bool,
}

impl<R> FeedbackReader<R>
where
    R: AsyncRead + Unpin,
{
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            finished: false,
        }
    }

    pub async fn next_record(&mut self) -> Result<Option<FeedbackRecord>, ApnsError> {
        if self.finished {
            return Ok(None);
        }

        let mut buf = [0u8; FEEDBACK_RECORD_LENGTH];
        let mut filled = 0;
        while filled < FEEDBACK_RECORD_LENGTH {
            match self.reader.read(&mut buf[filled..]).await {
                Ok(0) => break,
                Ok(n) => filled += n,
                // TLS peers that skip close_notify surface here
                Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => break,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    self.finished = true;
                    return Err(ApnsError::Connection(err.to_string()));
                }
            }
        }

        if filled == 0 {
            self.finished = true;
            return Ok(None);
        }
        if filled < FEEDBACK_RECORD_LENGTH {
            self.finished = true;
            return Err(ApnsError::TruncatedStream { remaining: filled });
        }

        FeedbackRecord::decode(&buf).map(Some).inspect_err(|_| {
            self.finished = true;
        })
    }

    /// Drain the stream.
    pub async fn collect_all(&mut self) -> Result<Vec<FeedbackRecord>, ApnsError> {
        let mut records = Vec::new();
        while let Some(record) = self.next_record().await? {
            records.push(record);
        }
        Ok(records)
    }

    pub fn into_inner(self) -> R {
        self.reader
    }
}

/// Parse feedback records from an in-memory buffer.
pub fn decode_feedback(bytes: &[u8]) -> FeedbackRecords<'_> {
    FeedbackRecords {
        remaining: bytes,
        failed: false,
    }
}

/// Iterator returned by [`decode_feedback`].
#[derive(Debug, Clone)]
pub struct FeedbackRecords<'a> {
    remaining: &'a [u8],
    failed: bool,
}

impl Iterator for FeedbackRecords<'_> {
    type Item = Result<FeedbackRecord, ApnsError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.remaining.is_empty() {
            return None;
        }

        let Some((record, rest)) = self.remaining.split_first_chunk::<FEEDBACK_RECORD_LENGTH>()
        else {
            self.failed = true;
            return Some(Err(ApnsError::TruncatedStream {
                remaining: self.remaining.len(),
            }));
        };
        self.remaining = rest;

        let decoded = FeedbackRecord::decode(record);
        if decoded.is_err() {
            self.failed = true;
        }
        Some(decoded)
    }
}

/// Connect to the feedback service and read every pending record.
pub async fn fetch_feedback(
    manager: &ConnectionManager,
    environment: Environment,
    certificate_path: Option<&Path>,
) -> Result<Vec<FeedbackRecord>, ApnsError> {
    let stream = manager.open_feedback(environment, certificate_path).await?;
    let mut reader = FeedbackReader::new(stream);
    let records = reader.collect_all().await;

    let mut stream = reader.into_inner();
    if let Err(err) = stream.shutdown().await {
        debug!(error = %err, "feedback shutdown failed");
    }

    let records = records?;
    info!(%environment, count = records.len(), "received feedback");
    Ok(records)
}
