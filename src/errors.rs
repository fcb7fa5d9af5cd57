/// Error types for RtmLink operations
///
/// Nothing in this layer is fatal: every variant describes a condition the
/// caller either retries later or drops.
use std::io;

use thiserror::Error;

/// Result type alias for RtmLink operations
pub type Result<T> = std::result::Result<T, LinkError>;

/// RtmLink error enumeration
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LinkError {
    /// The slot for the next identifier is still occupied; retry after a release
    #[error("send window full: slot for msg_id {id} still occupied")]
    WindowFull { id: u32 },

    /// The transport refused the message; the slot stays as it was
    #[error("transport rejected msg_id {id}: {reason}")]
    TransportRejected { id: u32, reason: String },

    /// Payload does not fit in a single message
    #[error("payload too large: {size} bytes, max {max}")]
    PayloadTooLarge { size: usize, max: usize },

    /// Inbound bytes do not decode as a message
    #[error("malformed message: {0}")]
    MalformedMessage(String),

    /// CRC32 trailer does not match the chunk body
    #[error("integrity check failed: expected CRC32 {expected:#x}, got {actual:#x}")]
    IntegrityCheckFailed { expected: u32, actual: u32 },

    /// Payload adapter I/O failure
    #[error("I/O error: {0}")]
    Io(String),

    /// Configuration could not be loaded or failed validation
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl From<io::Error> for LinkError {
    fn from(err: io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl LinkError {
    /// True for conditions that clear up on their own on a later tick
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::WindowFull { .. } | Self::TransportRejected { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_messages() {
        let err = LinkError::IntegrityCheckFailed { expected: 0xdead, actual: 0xbeef };
        assert_eq!(
            err.to_string(),
            "integrity check failed: expected CRC32 0xdead, got 0xbeef"
        );
        assert_eq!(
            LinkError::WindowFull { id: 4 }.to_string(),
            "send window full: slot for msg_id 4 still occupied"
        );
    }

    #[test]
    fn test_transient_classification() {
        assert!(LinkError::WindowFull { id: 1 }.is_transient());
        assert!(LinkError::TransportRejected { id: 1, reason: "busy".into() }.is_transient());
        assert!(!LinkError::MalformedMessage("short".into()).is_transient());
    }

    #[test]
    fn test_from_io_error() {
        let err: LinkError = io::Error::new(io::ErrorKind::NotFound, "gone").into();
        assert!(matches!(err, LinkError::Io(ref msg) if msg == "gone"));
    }
}
