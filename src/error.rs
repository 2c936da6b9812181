//! Error types for the WebSocket bootstrap engine

use std::fmt;
use std::io;

/// Result type alias for bootstrap and stream operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors reported by the bootstrap engine and its collaborators
#[derive(Debug)]
pub enum Error {
    /// I/O error from the underlying transport
    Io(io::Error),
    /// Invalid or inconsistent connect options
    InvalidArgument(&'static str),
    /// Handshake could not be carried out
    HandshakeFailed(&'static str),
    /// Server refused the upgrade; carries the response status (0 if unknown)
    UpgradeFailure(u16),
    /// Connection closed before the exchange finished
    ConnectionClosed,
    /// Connection reset by peer
    ConnectionReset,
    /// Operation attempted in a state that cannot accept it
    InvalidState(&'static str),
    /// Capacity exceeded
    Capacity(&'static str),
    /// Failure with no recorded cause
    Unknown,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "I/O error: {}", e),
            Error::InvalidArgument(msg) => write!(f, "Invalid argument: {}", msg),
            Error::HandshakeFailed(msg) => write!(f, "Handshake failed: {}", msg),
            Error::UpgradeFailure(status) => {
                write!(f, "Server refused websocket upgrade with status {}", status)
            }
            Error::ConnectionClosed => write!(f, "Connection closed"),
            Error::ConnectionReset => write!(f, "Connection reset by peer"),
            Error::InvalidState(msg) => write!(f, "Invalid state: {}", msg),
            Error::Capacity(msg) => write!(f, "Capacity exceeded: {}", msg),
            Error::Unknown => write!(f, "Unknown error"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::ConnectionReset => Error::ConnectionReset,
            io::ErrorKind::BrokenPipe => Error::ConnectionClosed,
            io::ErrorKind::UnexpectedEof => Error::ConnectionClosed,
            _ => Error::Io(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(
            format!("{}", Error::UpgradeFailure(404)),
            "Server refused websocket upgrade with status 404"
        );
        assert_eq!(
            format!("{}", Error::InvalidArgument("missing host")),
            "Invalid argument: missing host"
        );
        assert_eq!(format!("{}", Error::Unknown), "Unknown error");
    }

    #[test]
    fn test_from_io_error() {
        let e: Error = io::Error::new(io::ErrorKind::BrokenPipe, "pipe").into();
        assert!(matches!(e, Error::ConnectionClosed));

        let e: Error = io::Error::new(io::ErrorKind::ConnectionReset, "reset").into();
        assert!(matches!(e, Error::ConnectionReset));

        let e: Error = io::Error::new(io::ErrorKind::PermissionDenied, "denied").into();
        assert!(matches!(e, Error::Io(_)));
    }
}
