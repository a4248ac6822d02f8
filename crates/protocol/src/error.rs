//! Error types for the protocol crate.

use thiserror::Error;

/// Protocol error type covering malformed streams and invalid message values.
#[derive(Debug, Error)]
pub enum ProtocolError {
    // Frame errors
    /// Header byte 0 named neither stdout nor stderr.
    #[error("invalid stream kind {0}: expected 1 (stdout) or 2 (stderr)")]
    InvalidStreamKind(u8),

    /// The stream ended part-way through a frame header.
    #[error("stream ended mid-header: got {got} of 8 header bytes")]
    TruncatedHeader {
        /// Header bytes received before end of stream.
        got: usize,
    },

    /// The stream ended before the declared payload was read.
    #[error("stream ended mid-payload: expected {expected} bytes, got {got}")]
    TruncatedPayload {
        /// Payload length declared by the header.
        expected: usize,
        /// Payload bytes received before end of stream.
        got: usize,
    },

    /// Frame exceeds maximum allowed size.
    #[error("frame too large: {size} bytes exceeds maximum of {max} bytes")]
    FrameTooLarge {
        /// Actual frame size.
        size: usize,
        /// Maximum allowed size.
        max: usize,
    },

    // Message errors
    /// A wait condition string other than `not-running`, `next-exit` or `removed`.
    #[error("unknown wait condition {0:?}: expected not-running, next-exit or removed")]
    UnknownWaitCondition(String),

    // Transport errors
    /// Reading from or writing to the underlying stream failed.
    #[error("stream I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

impl ProtocolError {
    /// Returns true when the error means the multiplexed stream itself is
    /// malformed, as opposed to the transport failing underneath it.
    pub fn is_framing(&self) -> bool {
        matches!(
            self,
            ProtocolError::InvalidStreamKind(_)
                | ProtocolError::TruncatedHeader { .. }
                | ProtocolError::TruncatedPayload { .. }
                | ProtocolError::FrameTooLarge { .. }
        )
    }
}

/// Result type alias for protocol operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_stream_kind_display() {
        let err = ProtocolError::InvalidStreamKind(7);
        assert_eq!(
            err.to_string(),
            "invalid stream kind 7: expected 1 (stdout) or 2 (stderr)"
        );
    }

    #[test]
    fn test_truncated_header_display() {
        let err = ProtocolError::TruncatedHeader { got: 3 };
        assert_eq!(
            err.to_string(),
            "stream ended mid-header: got 3 of 8 header bytes"
        );
    }

    #[test]
    fn test_truncated_payload_display() {
        let err = ProtocolError::TruncatedPayload {
            expected: 10,
            got: 4,
        };
        assert_eq!(
            err.to_string(),
            "stream ended mid-payload: expected 10 bytes, got 4"
        );
    }

    #[test]
    fn test_frame_too_large_display() {
        let err = ProtocolError::FrameTooLarge {
            size: 100_000,
            max: 65536,
        };
        assert_eq!(
            err.to_string(),
            "frame too large: 100000 bytes exceeds maximum of 65536 bytes"
        );
    }

    #[test]
    fn test_is_framing() {
        assert!(ProtocolError::InvalidStreamKind(0).is_framing());
        assert!(ProtocolError::TruncatedHeader { got: 1 }.is_framing());
        assert!(ProtocolError::TruncatedPayload { expected: 2, got: 1 }.is_framing());
        assert!(!ProtocolError::UnknownWaitCondition("bad".to_string()).is_framing());

        let io_err = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        assert!(!ProtocolError::from(io_err).is_framing());
    }

    #[test]
    fn test_unknown_wait_condition_display() {
        let err = ProtocolError::UnknownWaitCondition("stopped".to_string());
        assert_eq!(
            err.to_string(),
            r#"unknown wait condition "stopped": expected not-running, next-exit or removed"#
        );
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<ProtocolError>();
    }
}
