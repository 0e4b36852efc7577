//! Error types for devlink.

use std::io;
use std::time::Duration;
use thiserror::Error;

/// Result type for devlink operations.
pub type Result<T> = std::result::Result<T, Error>;

/// A fault detected while reassembling a frame from the byte stream.
///
/// Framing faults never end the session: the receiver resynchronises on the
/// next start sentinel and only the operation waiting for the affected
/// command code is rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FramingError {
    /// A sentinel byte arrived in the middle of a frame.
    #[error("unexpected sentinel inside frame (command {command:02x?})")]
    UnexpectedSentinel {
        /// Command code of the frame that was being read, if known yet.
        command: Option<u8>,
    },

    /// The checksum trailer did not match the received bytes.
    #[error("CRC mismatch for command {command:#04x}: expected {expected:#010x}, got {actual:#010x}")]
    CrcMismatch {
        /// Command code of the corrupted frame.
        command: u8,
        /// CRC carried by the frame.
        expected: u32,
        /// CRC computed over the received bytes.
        actual: u32,
    },

    /// The byte after the checksum was not the end sentinel.
    #[error("missing end sentinel for command {command:#04x} (got {found:#04x})")]
    MissingEnd {
        /// Command code of the frame.
        command: u8,
        /// Byte found where the sentinel was expected.
        found: u8,
    },
}

impl FramingError {
    /// Command code of the frame the fault belongs to, if one was read.
    pub fn command(&self) -> Option<u8> {
        match self {
            Self::UnexpectedSentinel { command } => *command,
            Self::CrcMismatch { command, .. } | Self::MissingEnd { command, .. } => Some(*command),
        }
    }
}

/// Error type for devlink operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error on the transport or a local file.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serial port error.
    #[cfg(feature = "native")]
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// A frame could not be reassembled or failed its integrity check.
    #[error("Framing error: {0}")]
    Framing(#[from] FramingError),

    /// No matching response arrived before the deadline.
    ///
    /// For non-idempotent operations the outcome is unknown, not failed.
    #[error("Timeout waiting for response {code:#04x} after {after:?}")]
    Timeout {
        /// Response code that was awaited.
        code: u8,
        /// Configured timeout.
        after: Duration,
    },

    /// A newer request waiting on the same response code replaced this one.
    #[error("Request waiting for response {code:#04x} was superseded")]
    Superseded {
        /// Response code that was awaited.
        code: u8,
    },

    /// The device answered with `success: false`.
    #[error("Device error: {0}")]
    Device(String),

    /// The operation completed without a response payload.
    #[error("No response received")]
    NoResponse,

    /// An operation was issued while the session is disconnected.
    #[error("Not connected")]
    NotConnected,

    /// The session ended while the operation was in flight.
    #[error("Device disconnected")]
    Disconnected,

    /// Malformed structured payload.
    #[error("Invalid JSON payload: {0}")]
    Json(#[from] serde_json::Error),

    /// A well-formed frame carried contents that cannot be used.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The embedding application requested cancellation.
    #[error("Interrupted")]
    Interrupted,

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Whether this error ends the session (transport failure or disconnect).
    ///
    /// Framing, timeout, supersession and device-reported failures are local
    /// to a single operation and leave the session connected.
    pub fn is_session_fatal(&self) -> bool {
        match self {
            Self::Io(_) | Self::Disconnected => true,
            #[cfg(feature = "native")]
            Self::Serial(_) => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_framing_error_command() {
        let e = FramingError::CrcMismatch {
            command: 0x81,
            expected: 1,
            actual: 2,
        };
        assert_eq!(e.command(), Some(0x81));
        assert_eq!(FramingError::UnexpectedSentinel { command: None }.command(), None);
    }

    #[test]
    fn test_session_fatal_classification() {
        assert!(Error::Disconnected.is_session_fatal());
        assert!(Error::Io(io::Error::new(io::ErrorKind::BrokenPipe, "gone")).is_session_fatal());
        assert!(!Error::Superseded { code: 0x81 }.is_session_fatal());
        assert!(!Error::Device("no such file".into()).is_session_fatal());
        assert!(
            !Error::Framing(FramingError::MissingEnd {
                command: 0x81,
                found: 0
            })
            .is_session_fatal()
        );
    }

    #[test]
    fn test_timeout_display_mentions_code() {
        let e = Error::Timeout {
            code: 0x81,
            after: Duration::from_millis(50),
        };
        assert!(e.to_string().contains("0x81"));
    }
}
