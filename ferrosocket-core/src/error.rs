//! Error types for ferrosocket
//!
//! Every failure in the codec, the handshake engine and the transports is
//! expressed through [`Error`]. Parsing failures are confined to the
//! connection that produced them; only the accept loop reports
//! [`Error::ListenerFailure`].

#![allow(missing_docs)]

use thiserror::Error;

/// Result type alias for ferrosocket operations
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type
#[derive(Error, Debug)]
pub enum Error {
    /// Frame errors
    #[error("Frame error: {0}")]
    Frame(#[from] FrameError),

    /// Opening handshake rejected
    #[error("Invalid handshake: {0}")]
    Handshake(#[from] HandshakeError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Timeout errors
    #[error("Timeout error: {0}")]
    Timeout(#[from] TimeoutError),

    /// The peer closed the stream or the stream was shut down locally
    #[error("Transport closed")]
    TransportClosed,

    /// The accept loop cannot continue
    #[error("Listener failure: {0}")]
    ListenerFailure(String),

    /// Invalid UTF-8 in a text message
    #[error("Invalid UTF-8 in text message")]
    InvalidUtf8,
}

impl Error {
    /// True when more bytes are needed before a frame can be parsed
    pub fn is_truncated(&self) -> bool {
        matches!(self, Error::Frame(FrameError::Truncated { .. }))
    }

    /// True when the error means the peer went away
    pub fn is_transport_closed(&self) -> bool {
        match self {
            Error::TransportClosed => true,
            Error::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::NotConnected
                    | std::io::ErrorKind::UnexpectedEof
            ),
            _ => false,
        }
    }
}

/// Frame parsing and encoding errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// Not enough bytes yet; read more and retry
    #[error("Truncated frame: need {needed} bytes, have {have}")]
    Truncated { needed: usize, have: usize },

    /// Declared payload length does not fit a positive 32-bit integer
    #[error("Payload length {length} exceeds the maximum of {}", i32::MAX)]
    Overflow { length: u64 },
}

/// Opening handshake errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HandshakeError {
    /// The request does not match the handshake grammar
    #[error("Malformed request: {0}")]
    Malformed(String),

    /// A required field is absent
    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    /// A field is present with an unacceptable value
    #[error("Invalid value for {field}: {value}")]
    InvalidField { field: &'static str, value: String },

    /// Sec-WebSocket-Version other than 13
    #[error("Unsupported WebSocket version: {0}")]
    UnsupportedVersion(String),

    /// Host does not match the configured location
    #[error("Location mismatch - expected: {expected}, received: {received}")]
    LocationMismatch { expected: String, received: String },

    /// Origin does not match the configured allowed origin
    #[error("Origin mismatch - expected: {expected}, received: {received}")]
    OriginMismatch { expected: String, received: String },

    /// The request grew past the configured limit without ending
    #[error("Handshake request exceeds {limit} bytes")]
    TooLarge { limit: usize },
}

/// Configuration errors
#[derive(Error, Debug, Clone)]
pub enum ConfigError {
    /// Invalid configuration value
    #[error("Invalid configuration value for {field}: {value}")]
    InvalidValue { field: String, value: String },

    /// Configuration validation failed
    #[error("Configuration validation failed: {0}")]
    Validation(String),
}

/// Timeout errors
#[derive(Error, Debug, Clone)]
pub enum TimeoutError {
    /// Handshake timeout
    #[error("Handshake timeout: {timeout:?}")]
    Handshake { timeout: std::time::Duration },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncated_is_retryable() {
        let err: Error = FrameError::Truncated { needed: 10, have: 2 }.into();
        assert!(err.is_truncated());
        assert!(!err.is_transport_closed());
    }

    #[test]
    fn test_error_display() {
        let err = Error::Frame(FrameError::Overflow { length: 1 << 31 });
        let msg = err.to_string();
        assert!(msg.contains("2147483648"));
        assert!(msg.contains("2147483647"));

        let err = Error::Handshake(HandshakeError::UnsupportedVersion("8".to_string()));
        assert_eq!(err.to_string(), "Invalid handshake: Unsupported WebSocket version: 8");
    }

    #[test]
    fn test_broken_pipe_counts_as_closed() {
        let err = Error::Io(std::io::Error::from(std::io::ErrorKind::BrokenPipe));
        assert!(err.is_transport_closed());
        assert!(Error::TransportClosed.is_transport_closed());
        assert!(!Error::InvalidUtf8.is_transport_closed());
    }
}
