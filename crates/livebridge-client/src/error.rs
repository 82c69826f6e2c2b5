//! Client error types.

use std::fmt;

/// Result type for client operations.
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors that can occur in the client.
#[derive(Debug)]
pub enum ClientError {
    /// Configuration error.
    Config(String),
    /// Bad command-line input.
    Usage(String),
    /// IO error.
    Io(std::io::Error),
    /// The bridge could not be reached.
    Connection(String),
    /// Encoding or decoding failed.
    Protocol(String),
    /// Request timed out.
    Timeout(String),
    /// The bridge answered with an `error` event.
    Remote(String),
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "configuration error: {}", msg),
            Self::Usage(msg) => write!(f, "invalid input: {}", msg),
            Self::Io(err) => write!(f, "IO error: {}", err),
            Self::Connection(msg) => write!(f, "connection error: {}", msg),
            Self::Protocol(msg) => write!(f, "protocol error: {}", msg),
            Self::Timeout(msg) => write!(f, "timeout: {}", msg),
            Self::Remote(msg) => write!(f, "bridge error: {}", msg),
        }
    }
}

impl std::error::Error for ClientError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for ClientError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

impl From<livebridge_protocol::ProtocolError> for ClientError {
    fn from(err: livebridge_protocol::ProtocolError) -> Self {
        Self::Protocol(err.to_string())
    }
}

impl From<livebridge_server::ServerError> for ClientError {
    fn from(err: livebridge_server::ServerError) -> Self {
        Self::Connection(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_errors_show_the_bridge_message() {
        let err = ClientError::Remote("Unknown object handle: live_9".into());
        assert_eq!(err.to_string(), "bridge error: Unknown object handle: live_9");
    }

    #[test]
    fn io_errors_keep_their_source() {
        use std::error::Error;

        let err = ClientError::from(std::io::Error::other("boom"));
        assert!(err.source().is_some());
        assert!(ClientError::Timeout("x".into()).source().is_none());
    }
}
