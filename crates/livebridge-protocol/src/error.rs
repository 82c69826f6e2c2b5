//! Protocol error types.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors that can occur during protocol operations.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Message exceeds maximum allowed size.
    #[error("message too large: {size} bytes (max: {max})")]
    MessageTooLarge { size: u64, max: u64 },

    /// Failed to serialize or parse JSON.
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Failed to compress or decompress a payload.
    #[error("compression failed: {0}")]
    Compression(std::io::Error),

    /// IO error during read/write.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Datagram shorter than the chunk header.
    #[error("truncated datagram: {len} bytes")]
    TruncatedDatagram { len: usize },

    /// Chunk header with an impossible index/count pair.
    #[error("invalid chunk {index} of {count}")]
    InvalidChunk { index: u8, count: u8 },

    /// Datagram ceiling too small to carry any payload.
    #[error("datagram size {size} leaves no room for payload")]
    DatagramTooSmall { size: usize },

    /// Stream ended in the middle of a frame.
    #[error("incomplete frame")]
    IncompleteFrame,

    /// Client frame without a masking key.
    #[error("client frame is not masked")]
    UnmaskedFrame,

    /// Frame opcode not supported by the bridge.
    #[error("unsupported frame opcode: {0:#x}")]
    UnsupportedOpcode(u8),

    /// Continuation frame without a message to continue, or vice versa.
    #[error("unexpected frame sequence: {0}")]
    FrameSequence(&'static str),

    /// Text payload is not valid UTF-8.
    #[error("invalid UTF-8 in text frame: {0}")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),

    /// Upgrade handshake failed.
    #[error("handshake failed: {0}")]
    Handshake(String),
}

impl ProtocolError {
    /// Creates a handshake error.
    pub fn handshake(message: impl Into<String>) -> Self {
        Self::Handshake(message.into())
    }
}
