//! Frame codec for the multiplexed attach/exec stream.
//!
//! # Frame Format
//!
//! Each frame consists of:
//! - 1 byte: stream kind (1 = stdout, 2 = stderr)
//! - 3 bytes: reserved, zero on the wire
//! - 4 bytes: payload length (big-endian)
//! - N bytes: payload
//!
//! Streams of containers or exec instances running with a TTY are not framed
//! at all. The two formats cannot be told apart by content, so callers pick a
//! [`StreamMode`](crate::demux::StreamMode) from inspect metadata instead.

use crate::error::{ProtocolError, Result};

/// Frame header size: 1 (kind) + 3 (reserved) + 4 (length) = 8 bytes.
pub const FRAME_HEADER_SIZE: usize = 8;

/// Largest payload a header can declare. The default codec accepts every
/// valid header; use [`FrameCodec::with_max_payload`] to cap it lower.
pub const MAX_FRAME_PAYLOAD: usize = u32::MAX as usize;

/// Which logical output channel a frame belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKind {
    /// Standard output.
    Stdout,
    /// Standard error.
    Stderr,
}

impl StreamKind {
    /// Decode a stream kind from header byte 0.
    pub fn from_byte(byte: u8) -> Result<Self> {
        match byte {
            1 => Ok(StreamKind::Stdout),
            2 => Ok(StreamKind::Stderr),
            other => Err(ProtocolError::InvalidStreamKind(other)),
        }
    }

    /// Get the header byte for this stream kind.
    #[inline]
    pub fn as_byte(self) -> u8 {
        match self {
            StreamKind::Stdout => 1,
            StreamKind::Stderr => 2,
        }
    }
}

impl std::fmt::Display for StreamKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StreamKind::Stdout => f.write_str("stdout"),
            StreamKind::Stderr => f.write_str("stderr"),
        }
    }
}

/// A single demultiplexed unit of output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Stream the payload was written to.
    pub kind: StreamKind,
    /// The payload data.
    pub payload: Vec<u8>,
}

impl Frame {
    /// Create a new frame.
    pub fn new(kind: StreamKind, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            kind,
            payload: payload.into(),
        }
    }

    /// Create a stdout frame.
    pub fn stdout(payload: impl Into<Vec<u8>>) -> Self {
        Self::new(StreamKind::Stdout, payload)
    }

    /// Create a stderr frame.
    pub fn stderr(payload: impl Into<Vec<u8>>) -> Self {
        Self::new(StreamKind::Stderr, payload)
    }
}

/// Encoder and decoder for multiplexed frames.
#[derive(Debug, Clone)]
pub struct FrameCodec {
    /// Largest payload length accepted from a header.
    max_payload: usize,
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameCodec {
    /// Create a codec accepting payloads up to [`MAX_FRAME_PAYLOAD`].
    pub fn new() -> Self {
        Self {
            max_payload: MAX_FRAME_PAYLOAD,
        }
    }

    /// Create a codec with a custom payload limit.
    ///
    /// Headers declaring more than `max_payload` bytes fail with
    /// [`ProtocolError::FrameTooLarge`] before any of the payload is read.
    pub fn with_max_payload(max_payload: usize) -> Self {
        Self { max_payload }
    }

    /// Maximum payload length this codec accepts.
    pub fn max_payload(&self) -> usize {
        self.max_payload
    }

    /// Encode a frame into bytes.
    pub fn encode(&self, frame: &Frame) -> Result<Vec<u8>> {
        let payload = &frame.payload;

        if payload.len() > self.max_payload || payload.len() > u32::MAX as usize {
            return Err(ProtocolError::FrameTooLarge {
                size: payload.len(),
                max: self.max_payload,
            });
        }

        let mut output = Vec::with_capacity(FRAME_HEADER_SIZE + payload.len());
        output.push(frame.kind.as_byte());
        output.extend_from_slice(&[0, 0, 0]);
        output.extend_from_slice(&(payload.len() as u32).to_be_bytes());
        output.extend_from_slice(payload);

        Ok(output)
    }

    /// Decode a frame from bytes.
    ///
    /// Returns the decoded frame and the number of bytes consumed. Short input
    /// is reported as [`ProtocolError::TruncatedHeader`] or
    /// [`ProtocolError::TruncatedPayload`], which is what a stream that ends
    /// at this point means.
    pub fn decode(&self, data: &[u8]) -> Result<(Frame, usize)> {
        match self.try_decode(data)? {
            Some(decoded) => Ok(decoded),
            None => Err(self.truncation_error(data)),
        }
    }

    /// Try to decode a frame from bytes, returning None if there isn't enough data.
    ///
    /// The stream kind and length are validated as soon as the header is
    /// complete, so a bad header fails without waiting for its payload.
    pub fn try_decode(&self, data: &[u8]) -> Result<Option<(Frame, usize)>> {
        if data.len() < FRAME_HEADER_SIZE {
            return Ok(None);
        }

        let kind = StreamKind::from_byte(data[0])?;
        let length = Self::payload_len(data);

        if length > self.max_payload {
            return Err(ProtocolError::FrameTooLarge {
                size: length,
                max: self.max_payload,
            });
        }

        let total = FRAME_HEADER_SIZE + length;
        if data.len() < total {
            return Ok(None);
        }

        let frame = Frame::new(kind, &data[FRAME_HEADER_SIZE..total]);
        Ok(Some((frame, total)))
    }

    /// Error describing why `data` does not hold a complete frame.
    pub(crate) fn truncation_error(&self, data: &[u8]) -> ProtocolError {
        if data.len() < FRAME_HEADER_SIZE {
            return ProtocolError::TruncatedHeader { got: data.len() };
        }
        ProtocolError::TruncatedPayload {
            expected: Self::payload_len(data),
            got: data.len() - FRAME_HEADER_SIZE,
        }
    }

    fn payload_len(header: &[u8]) -> usize {
        u32::from_be_bytes([header[4], header[5], header[6], header[7]]) as usize
    }
}
