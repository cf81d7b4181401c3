//! Binary framing for the enhanced notification format.
//!
//! Layout on the wire, all integers big-endian:
//!
//! ```text
//! command(1)=1 | identifier(4) | expiry(4) | token_len(2)=32 | token(32) | payload_len(2) | payload(N)
//! ```
//!
//! The gateway answers only on failure, with a 6-byte error response:
//!
//! ```text
//! command(1)=8 | status(1) | identifier(4)
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::fmt;
use std::str::FromStr;

use crate::error::{ApnsError, DeliveryErrorKind};

/// Command byte of the enhanced notification format.
pub const NOTIFICATION_COMMAND: u8 = 1;

/// Command byte of an error response.
pub const ERROR_RESPONSE_COMMAND: u8 = 8;

/// Raw device token length.
pub const TOKEN_LENGTH: usize = 32;

/// Everything before the payload.
pub const FRAME_HEADER_LENGTH: usize = 1 + 4 + 4 + 2 + TOKEN_LENGTH + 2;

pub const ERROR_RESPONSE_LENGTH: usize = 6;

/// A 32-byte device token.
///
/// Parsed from and displayed as 64 hex characters.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceToken([u8; TOKEN_LENGTH]);

impl DeviceToken {
    pub fn from_bytes(bytes: [u8; TOKEN_LENGTH]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; TOKEN_LENGTH] {
        &self.0
    }

    fn from_slice(slice: &[u8]) -> Result<Self, ApnsError> {
        let bytes: [u8; TOKEN_LENGTH] = slice.try_into().map_err(|_| {
            ApnsError::InvalidToken(format!(
                "expected {} raw bytes, got {}",
                TOKEN_LENGTH,
                slice.len()
            ))
        })?;
        Ok(Self(bytes))
    }
}

impl FromStr for DeviceToken {
    type Err = ApnsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != TOKEN_LENGTH * 2 {
            return Err(ApnsError::InvalidToken(format!(
                "expected {} hex characters, got {}",
                TOKEN_LENGTH * 2,
                s.len()
            )));
        }
        let mut bytes = [0u8; TOKEN_LENGTH];
        hex::decode_to_slice(s, &mut bytes)
            .map_err(|e| ApnsError::InvalidToken(format!("{s}: {e}")))?;
        Ok(Self(bytes))
    }
}

impl fmt::Display for DeviceToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for DeviceToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DeviceToken({})", self)
    }
}

/// One enhanced-format notification as it travels on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationFrame {
    /// Opaque value echoed back in an error response
    pub identifier: u32,
    /// UNIX time after which the gateway may drop the notification; 0 for none
    pub expiry: u32,
    pub token: DeviceToken,
    pub payload: Bytes,
}

impl NotificationFrame {
    /// Build a frame for a hex token.
    ///
    /// # Errors
    ///
    /// - [`ApnsError::InvalidToken`] if `token` is not 64 hex characters
    /// - [`ApnsError::PayloadTooLarge`] if the payload length does not fit in 16 bits
    pub fn new(
        token: &str,
        payload: impl Into<Bytes>,
        identifier: u32,
        expiry: u32,
    ) -> Result<Self, ApnsError> {
        let token = token.parse::<DeviceToken>()?;
        let payload = payload.into();
        if payload.len() > usize::from(u16::MAX) {
            return Err(ApnsError::PayloadTooLarge {
                size: payload.len(),
                max: usize::from(u16::MAX),
            });
        }
        Ok(Self {
            identifier,
            expiry,
            token,
            payload,
        })
    }

    pub fn encoded_len(&self) -> usize {
        FRAME_HEADER_LENGTH + self.payload.len()
    }

    /// Append the wire form to `dst`.
    pub fn encode(&self, dst: &mut impl BufMut) {
        // NotificationFrame::new bounds the payload to u16::MAX
        let payload_len = self.payload.len() as u16;

        dst.put_u8(NOTIFICATION_COMMAND);
        dst.put_u32(self.identifier);
        dst.put_u32(self.expiry);
        dst.put_u16(TOKEN_LENGTH as u16);
        dst.put_slice(&self.token.0);
        dst.put_u16(payload_len);
        dst.put_slice(&self.payload);
    }

    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        self.encode(&mut buf);
        buf.freeze()
    }

    /// Parse one frame from the start of `bytes`. Trailing bytes are ignored.
    pub fn decode(bytes: &[u8]) -> Result<Self, ApnsError> {
        if bytes.len() < FRAME_HEADER_LENGTH {
            return Err(ApnsError::MalformedFrame(format!(
                "need {} header bytes, got {}",
                FRAME_HEADER_LENGTH,
                bytes.len()
            )));
        }

        let mut buf = bytes;
        let command = buf.get_u8();
        if command != NOTIFICATION_COMMAND {
            return Err(ApnsError::MalformedFrame(format!(
                "unexpected command {command}"
            )));
        }
        let identifier = buf.get_u32();
        let expiry = buf.get_u32();
        let token_len = usize::from(buf.get_u16());
        if token_len != TOKEN_LENGTH {
            return Err(ApnsError::InvalidToken(format!(
                "frame declares token length {token_len}"
            )));
        }
        let token = DeviceToken::from_slice(&buf[..TOKEN_LENGTH])?;
        buf.advance(TOKEN_LENGTH);
        let payload_len = usize::from(buf.get_u16());
        if buf.len() < payload_len {
            return Err(ApnsError::MalformedFrame(format!(
                "payload declares {} bytes, {} present",
                payload_len,
                buf.len()
            )));
        }

        Ok(Self {
            identifier,
            expiry,
            token,
            payload: Bytes::copy_from_slice(&buf[..payload_len]),
        })
    }

    /// Length of the frame at the start of `bytes`, once its header is present.
    pub fn frame_len(bytes: &[u8]) -> Option<usize> {
        let header = bytes.get(..FRAME_HEADER_LENGTH)?;
        let payload_len = u16::from_be_bytes([header[FRAME_HEADER_LENGTH - 2], header[FRAME_HEADER_LENGTH - 1]]);
        Some(FRAME_HEADER_LENGTH + usize::from(payload_len))
    }
}

/// Encode a notification for a hex token.
///
/// Pure: the same inputs always produce the same bytes.
pub fn encode(
    token: &str,
    payload: &[u8],
    identifier: u32,
    expiry: u32,
) -> Result<Bytes, ApnsError> {
    NotificationFrame::new(token, Bytes::copy_from_slice(payload), identifier, expiry)
        .map(|frame| frame.to_bytes())
}

/// The gateway's answer to a rejected notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorResponse {
    pub command: u8,
    pub status: u8,
    pub identifier: u32,
}

impl ErrorResponse {
    pub fn new(status: u8, identifier: u32) -> Self {
        Self {
            command: ERROR_RESPONSE_COMMAND,
            status,
            identifier,
        }
    }

    pub fn decode(bytes: &[u8; ERROR_RESPONSE_LENGTH]) -> Self {
        let mut buf = &bytes[..];
        Self {
            command: buf.get_u8(),
            status: buf.get_u8(),
            identifier: buf.get_u32(),
        }
    }

    pub fn to_bytes(&self) -> [u8; ERROR_RESPONSE_LENGTH] {
        let mut out = [0u8; ERROR_RESPONSE_LENGTH];
        let mut buf = &mut out[..];
        buf.put_u8(self.command);
        buf.put_u8(self.status);
        buf.put_u32(self.identifier);
        out
    }

    pub fn kind(&self) -> DeliveryErrorKind {
        DeliveryErrorKind::from_status(self.status)
    }

    pub fn into_error(self) -> ApnsError {
        ApnsError::Delivery {
            kind: self.kind(),
            identifier: self.identifier,
        }
    }
}
