//! Wire types and codecs for the livebridge protocol.
//!
//! The bridge and its single external client exchange JSON messages:
//!
//! - inbound [`Request`]: `{ns, name, args?, nsid?, uuid?, etag?, cache?}`
//! - outbound [`Response`]: `{event, data, uuid}`
//!
//! Two transports carry them, each with its own framing.
//!
//! # Datagram framing
//!
//! The JSON text is zlib-compressed and split into chunks that fit one
//! datagram, each prefixed with a three byte header:
//!
//! ```text
//! +------------+-------------+-------------+---------------------+
//! | message id | chunk index | chunk count | compressed bytes... |
//! +------------+-------------+-------------+---------------------+
//! ```
//!
//! See [`chunking`].
//!
//! # Stream framing
//!
//! After an HTTP upgrade handshake (see [`handshake`]), messages travel in
//! WebSocket-style binary frames with 7, 16 or 64 bit payload lengths. See
//! [`framing`].
//!
//! # Example
//!
//! ```rust
//! use livebridge_protocol::{DatagramEncoder, Reassembler, Request};
//!
//! let request = Request::new("song", "get_tracks").with_uuid("a1");
//! let datagrams = DatagramEncoder::new(7500).encode(&request).unwrap();
//!
//! let mut reassembler = Reassembler::default();
//! let mut decoded = None;
//! for datagram in &datagrams {
//!     decoded = reassembler.decode::<Request>(datagram).unwrap();
//! }
//! assert_eq!(decoded, Some(request));
//! ```

pub mod chunking;
pub mod compression;
mod error;
pub mod framing;
pub mod handshake;
mod types;

pub use chunking::{ChunkHeader, DatagramEncoder, Reassembler};
pub use error::{ProtocolError, ProtocolResult};
pub use framing::{Frame, FrameReader, FrameWriter, Message, decode_message, encode_message};
pub use types::{CacheReply, Request, Response, cached_marker, events, fresh_payload};

/// Maximum size of one decompressed message or stream frame (16 MB).
pub const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;
