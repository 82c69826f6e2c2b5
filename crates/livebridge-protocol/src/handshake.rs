//! HTTP upgrade handshake for the stream transport.

use std::collections::HashMap;
use std::io::{BufRead, Read, Write};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use sha1::{Digest, Sha1};

use crate::error::{ProtocolError, ProtocolResult};

/// Fixed GUID appended to the client key before hashing.
pub const WEBSOCKET_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Upper bound on the size of the request head.
pub const MAX_HANDSHAKE_SIZE: usize = 8192;

const KEY_HEADER: &str = "sec-websocket-key";

/// Computes the `Sec-WebSocket-Accept` value for a client key.
pub fn accept_key(client_key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(client_key.trim().as_bytes());
    hasher.update(WEBSOCKET_GUID.as_bytes());
    STANDARD.encode(hasher.finalize())
}

/// Parses header lines into a map keyed by lower-cased name.
///
/// The request line and malformed lines are skipped.
pub fn parse_headers(head: &str) -> HashMap<String, String> {
    head.lines()
        .filter_map(|line| line.split_once(':'))
        .map(|(name, value)| (name.trim().to_ascii_lowercase(), value.trim().to_string()))
        .collect()
}

/// Extracts the client key from a request head.
pub fn client_key(head: &str) -> ProtocolResult<String> {
    parse_headers(head)
        .remove(KEY_HEADER)
        .filter(|key| !key.is_empty())
        .ok_or_else(|| ProtocolError::handshake("missing Sec-WebSocket-Key header"))
}

/// Builds the `101 Switching Protocols` response.
pub fn handshake_response(accept: &str) -> String {
    format!(
        "HTTP/1.1 101 Switching Protocols\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Accept: {accept}\r\n\r\n"
    )
}

/// Reads the request head up to the empty line.
///
/// At most [`MAX_HANDSHAKE_SIZE`] bytes are read, including from a single
/// line that never ends.
pub fn read_handshake<R: BufRead>(reader: &mut R) -> ProtocolResult<String> {
    let mut limited = reader.by_ref().take(MAX_HANDSHAKE_SIZE as u64 + 1);
    let mut head = String::new();
    loop {
        let mut line = String::new();
        let read = limited.read_line(&mut line)?;
        if head.len() + read > MAX_HANDSHAKE_SIZE {
            return Err(ProtocolError::handshake("request head too large"));
        }
        if read == 0 {
            return Err(ProtocolError::handshake("connection closed during handshake"));
        }
        if line.trim_end_matches(['\r', '\n']).is_empty() {
            return Ok(head);
        }
        head.push_str(&line);
    }
}

/// Runs the server side of the handshake.
///
/// Reads the request from `reader`, answers on `writer` and returns the
/// client key.
pub fn perform_handshake<R: BufRead, W: Write>(
    reader: &mut R,
    writer: &mut W,
) -> ProtocolResult<String> {
    let head = read_handshake(reader)?;
    let key = client_key(&head)?;
    writer.write_all(handshake_response(&accept_key(&key)).as_bytes())?;
    writer.flush()?;
    Ok(key)
}

/// Builds a client upgrade request.
pub fn client_request(host: &str, key: &str) -> String {
    format!(
        "GET / HTTP/1.1\r\n\
         Host: {host}\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Key: {key}\r\n\
         Sec-WebSocket-Version: 13\r\n\r\n"
    )
}
