//! Server error types.

use std::io;

use livebridge_core::HostError;
use thiserror::Error;

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors raised while setting up or running a transport.
#[derive(Debug, Error)]
pub enum ServerError {
    /// IO error (socket, file, etc.).
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Protocol error (framing, encoding, etc.).
    #[error("Protocol error: {0}")]
    Protocol(#[from] livebridge_protocol::ProtocolError),

    /// Address could not be bound.
    #[error("Failed to bind {addr}: {source}")]
    Bind { addr: String, source: io::Error },

    /// Every port of the configured range is taken.
    #[error("No free port in {host}:{first}-{last}")]
    NoFreePort { host: String, first: u16, last: u16 },

    /// Configuration error.
    #[error("Configuration error: {message}")]
    Config { message: String },
}

impl ServerError {
    /// Creates a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates a bind error.
    pub fn bind(addr: impl Into<String>, source: io::Error) -> Self {
        Self::Bind {
            addr: addr.into(),
            source,
        }
    }
}

/// Errors raised while executing one request.
///
/// The `Display` text becomes the `data` of the error response.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// No namespace registered under that name.
    #[error("No handler for namespace {ns}, Payload UUID: {uuid}")]
    UnknownNamespace { ns: String, uuid: String },

    /// Name is neither in the table, a built-in, nor allow-listed.
    #[error("Function call failed: {name} doesn't exist or isn't callable")]
    UnknownMethod { name: String },

    /// Handle was never issued by the registry.
    #[error("Unknown object handle: {handle}")]
    UnknownHandle { handle: String },

    /// Handle refers to an object the host has destroyed.
    #[error("Object handle {handle} refers to an object that no longer exists")]
    DanglingHandle { handle: String },

    /// Method needs a target but the request carried no usable handle.
    #[error("{ns}.{name} requires an object handle")]
    MissingTarget { ns: String, name: String },

    /// Required argument absent.
    #[error("Missing argument '{name}'")]
    MissingArgument { name: String },

    /// Argument present but unusable.
    #[error("Invalid argument '{name}': {reason}")]
    InvalidArgument { name: String, reason: String },

    /// `remove_listener` on a property that has no listener.
    #[error("Listener {prop} does not exist.")]
    ListenerNotFound { prop: String },

    /// Error raised by the host object graph.
    #[error(transparent)]
    Host(#[from] HostError),

    /// Result could not be serialized.
    #[error("Failed to serialize result: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl DispatchError {
    /// Creates an unknown-method error.
    pub fn unknown_method(name: impl Into<String>) -> Self {
        Self::UnknownMethod { name: name.into() }
    }

    /// Creates a missing-argument error.
    pub fn missing_argument(name: impl Into<String>) -> Self {
        Self::MissingArgument { name: name.into() }
    }

    /// Creates an invalid-argument error.
    pub fn invalid_argument(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            name: name.into(),
            reason: reason.into(),
        }
    }
}
