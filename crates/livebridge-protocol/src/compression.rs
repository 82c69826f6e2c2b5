//! zlib compression of JSON payloads.
//!
//! Both transports compress the serialized JSON before framing it. The
//! format is plain zlib (RFC 1950) so that peers using a stock zlib
//! `compress`/`decompress` interoperate.

use std::io::{Read, Write};

use flate2::Compression;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use serde::{Serialize, de::DeserializeOwned};

use crate::MAX_MESSAGE_SIZE;
use crate::error::{ProtocolError, ProtocolResult};

/// Compresses raw bytes.
pub fn compress(data: &[u8]) -> ProtocolResult<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::with_capacity(data.len() / 2), Compression::default());
    encoder.write_all(data).map_err(ProtocolError::Compression)?;
    encoder.finish().map_err(ProtocolError::Compression)
}

/// Decompresses raw bytes.
///
/// Output is capped at [`MAX_MESSAGE_SIZE`]. Bytes after the end of the
/// zlib stream are ignored.
pub fn decompress(data: &[u8]) -> ProtocolResult<Vec<u8>> {
    let limit = MAX_MESSAGE_SIZE as u64 + 1;
    let mut decoder = ZlibDecoder::new(data).take(limit);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(ProtocolError::Compression)?;

    if out.len() > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::MessageTooLarge {
            size: out.len() as u64,
            max: MAX_MESSAGE_SIZE as u64,
        });
    }
    Ok(out)
}

/// Serializes a message to JSON and compresses it.
pub fn encode_json<T: Serialize>(message: &T) -> ProtocolResult<Vec<u8>> {
    let json = serde_json::to_vec(message)?;
    compress(&json)
}

/// Decompresses a payload and parses it as JSON.
pub fn decode_json<T: DeserializeOwned>(data: &[u8]) -> ProtocolResult<T> {
    let json = decompress(data)?;
    Ok(serde_json::from_slice(&json)?)
}
