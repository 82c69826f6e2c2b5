//! Datagram chunking and reassembly.
//!
//! A compressed message larger than one datagram is split into up to 255
//! chunks sharing a message id:
//!
//! ```text
//! +------------+-------------+-------------+---------------------+
//! | message id | chunk index | chunk count | compressed bytes... |
//! |   (1 B)    |    (1 B)    |    (1 B)    |                     |
//! +------------+-------------+-------------+---------------------+
//! ```
//!
//! A message that fits one datagram is sent as chunk 0 of 1. The receiver
//! buffers chunks per message id until all `chunk count` distinct indices
//! are present, then concatenates them in index order. Incomplete sets
//! expire after a TTL so a peer that never finishes a message cannot grow
//! the buffer without bound.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde::{Serialize, de::DeserializeOwned};
use tracing::{debug, trace};

use crate::compression::{decode_json, encode_json};
use crate::error::{ProtocolError, ProtocolResult};

/// Size of the chunk header in bytes.
pub const CHUNK_HEADER_SIZE: usize = 3;

/// Default datagram ceiling; larger UDP packets get dropped on some
/// loopback stacks.
pub const DEFAULT_MAX_DATAGRAM_SIZE: usize = 7500;

/// Default lifetime of an incomplete chunk set.
pub const DEFAULT_REASSEMBLY_TTL: Duration = Duration::from_secs(5);

/// Header of one datagram chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkHeader {
    /// Id shared by all chunks of one message.
    pub message_id: u8,
    /// Position of this chunk.
    pub index: u8,
    /// Total number of chunks.
    pub count: u8,
}

impl ChunkHeader {
    /// Splits a datagram into its header and payload.
    pub fn parse(datagram: &[u8]) -> ProtocolResult<(Self, &[u8])> {
        let [message_id, index, count, payload @ ..] = datagram else {
            return Err(ProtocolError::TruncatedDatagram {
                len: datagram.len(),
            });
        };

        if *count == 0 || index >= count {
            return Err(ProtocolError::InvalidChunk {
                index: *index,
                count: *count,
            });
        }

        let header = Self {
            message_id: *message_id,
            index: *index,
            count: *count,
        };
        Ok((header, payload))
    }

    /// Returns the header bytes.
    pub fn to_bytes(self) -> [u8; CHUNK_HEADER_SIZE] {
        [self.message_id, self.index, self.count]
    }
}

/// Splits `payload` into datagrams of at most `max_datagram_size` bytes.
pub fn split_datagrams(
    message_id: u8,
    payload: &[u8],
    max_datagram_size: usize,
) -> ProtocolResult<Vec<Vec<u8>>> {
    if max_datagram_size <= CHUNK_HEADER_SIZE {
        return Err(ProtocolError::DatagramTooSmall {
            size: max_datagram_size,
        });
    }

    let chunk_size = max_datagram_size - CHUNK_HEADER_SIZE;
    let count = payload.len().div_ceil(chunk_size).max(1);
    let max_payload = chunk_size * usize::from(u8::MAX);
    if count > usize::from(u8::MAX) {
        return Err(ProtocolError::MessageTooLarge {
            size: payload.len() as u64,
            max: max_payload as u64,
        });
    }

    let count = count as u8;
    if payload.is_empty() {
        let header = ChunkHeader {
            message_id,
            index: 0,
            count,
        };
        return Ok(vec![header.to_bytes().to_vec()]);
    }

    let datagrams = payload
        .chunks(chunk_size)
        .enumerate()
        .map(|(index, chunk)| {
            let header = ChunkHeader {
                message_id,
                index: index as u8,
                count,
            };
            let mut datagram = Vec::with_capacity(CHUNK_HEADER_SIZE + chunk.len());
            datagram.extend_from_slice(&header.to_bytes());
            datagram.extend_from_slice(chunk);
            datagram
        })
        .collect();
    Ok(datagrams)
}

/// Encodes messages into datagrams, numbering them with a wrapping id.
#[derive(Debug, Clone)]
pub struct DatagramEncoder {
    next_id: u8,
    max_datagram_size: usize,
}

impl Default for DatagramEncoder {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_DATAGRAM_SIZE)
    }
}

impl DatagramEncoder {
    /// Creates an encoder with the given datagram ceiling.
    pub fn new(max_datagram_size: usize) -> Self {
        Self {
            next_id: 0,
            max_datagram_size,
        }
    }

    /// Returns the datagram ceiling.
    pub fn max_datagram_size(&self) -> usize {
        self.max_datagram_size
    }

    /// Changes the datagram ceiling.
    pub fn set_max_datagram_size(&mut self, size: usize) {
        self.max_datagram_size = size;
    }

    /// Serializes, compresses and chunks a message.
    pub fn encode<T: Serialize>(&mut self, message: &T) -> ProtocolResult<Vec<Vec<u8>>> {
        let compressed = encode_json(message)?;
        let message_id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1);

        let datagrams = split_datagrams(message_id, &compressed, self.max_datagram_size)?;
        if datagrams.len() > 1 {
            debug!(
                message_id,
                compressed_len = compressed.len(),
                chunks = datagrams.len(),
                "Chunked outbound message"
            );
        }
        Ok(datagrams)
    }
}

#[derive(Debug)]
struct PendingMessage {
    chunks: Vec<Option<Vec<u8>>>,
    received: usize,
    started_at: Instant,
}

impl PendingMessage {
    fn new(count: u8, now: Instant) -> Self {
        Self {
            chunks: vec![None; usize::from(count)],
            received: 0,
            started_at: now,
        }
    }

    fn count(&self) -> usize {
        self.chunks.len()
    }

    fn is_complete(&self) -> bool {
        self.received == self.count()
    }

    fn is_expired(&self, now: Instant, ttl: Duration) -> bool {
        now.saturating_duration_since(self.started_at) >= ttl
    }

    fn insert(&mut self, index: u8, payload: &[u8]) {
        if let Some(slot) = self.chunks.get_mut(usize::from(index))
            && slot.is_none()
        {
            *slot = Some(payload.to_vec());
            self.received += 1;
        }
    }

    fn assemble(self) -> Vec<u8> {
        self.chunks.into_iter().flatten().flatten().collect()
    }
}

/// Buffers datagram chunks until whole messages are available.
#[derive(Debug)]
pub struct Reassembler {
    pending: HashMap<u8, PendingMessage>,
    ttl: Duration,
}

impl Default for Reassembler {
    fn default() -> Self {
        Self::new(DEFAULT_REASSEMBLY_TTL)
    }
}

impl Reassembler {
    /// Creates a reassembler whose incomplete sets expire after `ttl`.
    pub fn new(ttl: Duration) -> Self {
        Self {
            pending: HashMap::new(),
            ttl,
        }
    }

    /// Returns the number of incomplete messages held.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Feeds one datagram, returning the compressed message once complete.
    pub fn push(&mut self, datagram: &[u8]) -> ProtocolResult<Option<Vec<u8>>> {
        self.push_at(datagram, Instant::now())
    }

    /// Same as [`push`](Self::push) with an explicit clock.
    pub fn push_at(&mut self, datagram: &[u8], now: Instant) -> ProtocolResult<Option<Vec<u8>>> {
        let (header, payload) = ChunkHeader::parse(datagram)?;

        if header.count == 1 {
            // A lone chunk supersedes anything pending under the same id.
            self.pending.remove(&header.message_id);
            return Ok(Some(payload.to_vec()));
        }

        let ttl = self.ttl;
        let pending = self
            .pending
            .entry(header.message_id)
            .or_insert_with(|| PendingMessage::new(header.count, now));

        if pending.count() != usize::from(header.count) || pending.is_expired(now, ttl) {
            trace!(
                message_id = header.message_id,
                "Restarting chunk set for reused message id"
            );
            *pending = PendingMessage::new(header.count, now);
        }

        pending.insert(header.index, payload);

        if !pending.is_complete() {
            return Ok(None);
        }

        Ok(self
            .pending
            .remove(&header.message_id)
            .map(PendingMessage::assemble))
    }

    /// Feeds one datagram and decodes the message once complete.
    pub fn decode<T: DeserializeOwned>(&mut self, datagram: &[u8]) -> ProtocolResult<Option<T>> {
        match self.push(datagram)? {
            Some(compressed) => decode_json(&compressed).map(Some),
            None => Ok(None),
        }
    }

    /// Drops incomplete sets older than the TTL, returning how many.
    pub fn purge_expired(&mut self, now: Instant) -> usize {
        let ttl = self.ttl;
        let before = self.pending.len();
        self.pending
            .retain(|_, pending| !pending.is_expired(now, ttl));
        let purged = before - self.pending.len();
        if purged > 0 {
            debug!(purged, "Dropped incomplete chunk sets");
        }
        purged
    }
}
