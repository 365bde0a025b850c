//! Length-prefixed JSON codec for the native messaging channel.
//!
//! Every frame is a 4-byte little-endian payload length followed by exactly
//! that many bytes of UTF-8 JSON. The length counts bytes, not characters.
//!
//! # Usage
//!
//! Use [`PeerCodec`] with [`tokio_util::codec::FramedRead`] for the inbound
//! direction. Outbound frames are produced with [`encode_frame`] so the caller
//! learns about oversize messages before anything reaches the stream.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::Serialize;
use tokio_util::codec::{Decoder, Encoder};
use tracing::warn;

use crate::{AppError, Result};

/// Size of the length prefix in bytes.
pub const HEADER_LEN: usize = 4;

/// Largest frame the gateway sends to the browser: 1 MiB.
///
/// Browsers drop the connection when a host sends more than this.
pub const MAX_OUTBOUND_BYTES: usize = 1_048_576;

/// Default largest frame accepted from the browser: 64 MiB.
pub const MAX_INBOUND_BYTES: usize = 64 * 1_048_576;

/// Native messaging frame codec.
///
/// # Decoder
///
/// Keeps the announced length of a partially received frame between calls,
/// so input may be split at any byte boundary. A single call drains every
/// complete frame it can, skipping frames whose payload is not valid JSON
/// (they are logged at `WARN` and discarded). A header announcing more than
/// the configured maximum returns [`AppError::Framing`].
///
/// At end of stream any leftover bytes, either a partial header or a
/// partial payload, return [`AppError::Framing`] instead of a truncated
/// message.
///
/// # Encoder
///
/// Serializes the item to JSON and writes header and payload into the same
/// buffer. Payloads above [`MAX_OUTBOUND_BYTES`] return
/// [`AppError::Framing`] and leave the buffer untouched.
#[derive(Debug)]
pub struct PeerCodec {
    /// Payload length announced by a header whose payload is still arriving.
    pending_len: Option<usize>,
    max_frame_len: usize,
}

impl PeerCodec {
    /// Create a codec accepting inbound frames up to [`MAX_INBOUND_BYTES`].
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_frame_len(MAX_INBOUND_BYTES)
    }

    /// Create a codec with a custom inbound frame limit.
    #[must_use]
    pub fn with_max_frame_len(max_frame_len: usize) -> Self {
        Self {
            pending_len: None,
            max_frame_len,
        }
    }

    /// Whether a header has been read but its payload is incomplete.
    #[must_use]
    pub fn is_mid_frame(&self) -> bool {
        self.pending_len.is_some()
    }
}

impl Default for PeerCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for PeerCodec {
    type Item = serde_json::Value;
    type Error = AppError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        loop {
            let len = match self.pending_len {
                Some(len) => len,
                None => {
                    if src.len() < HEADER_LEN {
                        return Ok(None);
                    }
                    let len = src.get_u32_le() as usize;
                    if len > self.max_frame_len {
                        return Err(AppError::Framing(format!(
                            "frame of {len} bytes exceeds limit of {} bytes",
                            self.max_frame_len
                        )));
                    }
                    src.reserve(len.saturating_sub(src.len()));
                    self.pending_len = Some(len);
                    len
                }
            };

            if src.len() < len {
                return Ok(None);
            }

            self.pending_len = None;
            let payload = src.split_to(len);
            match serde_json::from_slice(&payload) {
                Ok(value) => return Ok(Some(value)),
                Err(err) => {
                    warn!(len, %err, "peer codec: discarding frame with invalid json");
                }
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        if let Some(frame) = self.decode(src)? {
            return Ok(Some(frame));
        }

        match self.pending_len {
            Some(len) => Err(AppError::Framing(format!(
                "stream ended after {} of {len} payload bytes",
                src.len()
            ))),
            None if !src.is_empty() => Err(AppError::Framing(format!(
                "stream ended inside a frame header ({} of {HEADER_LEN} bytes)",
                src.len()
            ))),
            None => Ok(None),
        }
    }
}

impl<T: Serialize + ?Sized> Encoder<&T> for PeerCodec {
    type Error = AppError;

    fn encode(&mut self, item: &T, dst: &mut BytesMut) -> Result<()> {
        let json = serde_json::to_vec(item)
            .map_err(|err| AppError::Framing(format!("failed to serialise frame: {err}")))?;

        if json.len() > MAX_OUTBOUND_BYTES {
            return Err(AppError::Framing(format!(
                "outgoing frame of {} bytes exceeds {MAX_OUTBOUND_BYTES} bytes",
                json.len()
            )));
        }

        // Bounded by MAX_OUTBOUND_BYTES above.
        #[allow(clippy::cast_possible_truncation)]
        let len = json.len() as u32;

        dst.reserve(HEADER_LEN + json.len());
        dst.put_u32_le(len);
        dst.extend_from_slice(&json);
        Ok(())
    }
}

/// Encode one value as a complete frame, header included.
///
/// # Errors
///
/// Returns [`AppError::Framing`] if the value cannot be serialised or its
/// JSON exceeds [`MAX_OUTBOUND_BYTES`].
pub fn encode_frame<T: Serialize + ?Sized>(item: &T) -> Result<Bytes> {
    let mut buf = BytesMut::new();
    PeerCodec::new().encode(item, &mut buf)?;
    Ok(buf.freeze())
}
