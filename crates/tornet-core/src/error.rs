//! Error types for the Tor network client.
//!
//! Every failure the client can report is a variant of [`Error`]. Callers
//! that only care about the broad category (connection, authentication,
//! circuit, stream) should match on [`Error::kind`].

use thiserror::Error;

/// Core error type for Tor client operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Transport or control-port failure.
    #[error("connection error: {0}")]
    Connection(String),

    /// The peer or the caller broke the wire protocol: a SOCKS5 method or
    /// version we do not speak, a malformed control reply, a target that
    /// cannot be encoded.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The SOCKS proxy answered a request with a non-success status.
    #[error("SOCKS5 request failed with status {status:#04x}: {reason}")]
    Socks {
        /// Raw status byte from the reply.
        status: u8,
        /// Human-readable meaning of the status.
        reason: String,
    },

    /// Missing or rejected control-port credentials.
    #[error("authentication error: {0}")]
    Authentication(String),

    /// Circuit creation failed.
    #[error("circuit error: {0}")]
    Circuit(String),

    /// Stream-level failure.
    #[error("stream error: {0}")]
    Stream(String),

    /// A socket operation did not finish within the configured timeout.
    #[error("operation timed out")]
    Timeout,

    /// Invalid configuration value.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// HTTP request routed through Tor failed.
    #[error("http request failed: {0}")]
    Http(String),
}

/// Result type alias using the client's Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Broad error category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Transport, protocol, timeout or HTTP failures.
    Connection,
    /// Control-port credential failures.
    Authentication,
    /// Circuit creation failures.
    Circuit,
    /// Stream failures.
    Stream,
    /// Configuration problems.
    Config,
}

impl Error {
    /// Category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Connection(_)
            | Error::Protocol(_)
            | Error::Socks { .. }
            | Error::Timeout
            | Error::Http(_) => ErrorKind::Connection,
            Error::Authentication(_) => ErrorKind::Authentication,
            Error::Circuit(_) => ErrorKind::Circuit,
            Error::Stream(_) => ErrorKind::Stream,
            Error::Config(_) => ErrorKind::Config,
        }
    }

    /// Raw SOCKS status byte, if this error came from a SOCKS reply.
    pub fn socks_status(&self) -> Option<u8> {
        match self {
            Error::Socks { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Whether retrying the same operation may succeed.
    ///
    /// Protocol rejections are deterministic and are never retried.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Connection(_) | Error::Timeout)
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Connection(e.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Error::Timeout
        } else {
            Error::Http(e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_socks_error_is_connection_kind() {
        let err = Error::Socks {
            status: 0x05,
            reason: "connection refused".into(),
        };
        assert_eq!(err.kind(), ErrorKind::Connection);
        assert_eq!(err.socks_status(), Some(0x05));
        assert!(!err.is_transient());
        assert!(err.to_string().contains("0x05"));
    }

    #[test]
    fn test_kinds() {
        assert_eq!(Error::Timeout.kind(), ErrorKind::Connection);
        assert_eq!(Error::Authentication("x".into()).kind(), ErrorKind::Authentication);
        assert_eq!(Error::Circuit("x".into()).kind(), ErrorKind::Circuit);
        assert_eq!(Error::Stream("x".into()).kind(), ErrorKind::Stream);
        assert_eq!(Error::Connection("x".into()).socks_status(), None);
    }

    #[test]
    fn test_io_error_converts_to_connection() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let err: Error = io.into();
        assert_eq!(err.kind(), ErrorKind::Connection);
        assert!(err.is_transient());
    }

    #[test]
    fn test_protocol_error_is_not_retried() {
        let err = Error::Protocol("SOCKS5 authentication method not supported: 0xff".into());
        assert_eq!(err.kind(), ErrorKind::Connection);
        assert!(!err.is_transient());
        assert!(Error::Connection("reset".into()).is_transient());
        assert!(Error::Timeout.is_transient());
    }
}
