//! Length-prefixed framing for envelopes over TCP
//!
//! Every frame is:
//! ```text
//! [ 4 bytes: length (u32, big-endian) ][ N bytes: protobuf Envelope ]
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};
use prost::Message;
use thiserror::Error;

use crate::Envelope;

/// Largest accepted frame body (10 MB)
pub const MAX_MESSAGE_SIZE: u32 = 10 * 1024 * 1024;

const PREFIX_LEN: usize = 4;

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("frame body of {0} bytes exceeds the {MAX_MESSAGE_SIZE} byte limit")]
    MessageTooLarge(usize),

    #[error("length prefix {0} exceeds the frame limit")]
    InvalidLength(u32),

    #[error("malformed envelope: {0}")]
    DecodeError(#[from] prost::DecodeError),

    #[error("envelope encoding failed: {0}")]
    EncodeError(#[from] prost::EncodeError),
}

/// Encode an envelope as one frame
pub fn encode(envelope: &Envelope) -> Result<Bytes, CodecError> {
    let body_len = envelope.encoded_len();
    if body_len > MAX_MESSAGE_SIZE as usize {
        return Err(CodecError::MessageTooLarge(body_len));
    }

    let mut buf = BytesMut::with_capacity(PREFIX_LEN + body_len);
    buf.put_u32(body_len as u32);
    envelope.encode(&mut buf)?;
    Ok(buf.freeze())
}

/// Try to take one frame off the front of `buf`
///
/// Returns `Ok(None)` and leaves `buf` untouched while the frame is incomplete.
pub fn decode(buf: &mut BytesMut) -> Result<Option<Envelope>, CodecError> {
    if buf.len() < PREFIX_LEN {
        return Ok(None);
    }

    let body_len = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);
    if body_len > MAX_MESSAGE_SIZE {
        return Err(CodecError::InvalidLength(body_len));
    }

    if buf.len() < PREFIX_LEN + body_len as usize {
        return Ok(None);
    }

    buf.advance(PREFIX_LEN);
    let body = buf.split_to(body_len as usize);
    Ok(Some(Envelope::decode(body)?))
}

/// Accumulates stream bytes and yields complete envelopes
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: BytesMut,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(4096),
        }
    }

    /// Append bytes read from the stream
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Decode the next complete frame, if any
    ///
    /// Call repeatedly until it returns `Ok(None)` to drain the buffer.
    pub fn decode_next(&mut self) -> Result<Option<Envelope>, CodecError> {
        decode(&mut self.buffer)
    }

    /// Bytes buffered but not yet decoded
    pub fn buffer_len(&self) -> usize {
        self.buffer.len()
    }
}
