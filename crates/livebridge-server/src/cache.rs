//! Etag-based response deduplication.
//!
//! A caller that asks for caching sends the etag of the result it already
//! holds. If the fresh result hashes to the same etag only a small marker
//! goes back over the wire; otherwise the result travels together with its
//! new etag.

use livebridge_protocol::{cached_marker, fresh_payload};
use serde_json::Value;
use tracing::trace;

use crate::error::DispatchError;

/// Computes the etag of a result: the MD5 of its JSON text, in hex.
pub fn etag_for(result: &Value) -> Result<String, DispatchError> {
    let text = serde_json::to_string(result)?;
    Ok(format!("{:x}", md5::compute(text.as_bytes())))
}

/// Replaces `result` with the unchanged marker or wraps it with its etag.
pub fn apply_cache(result: Value, etag: Option<&str>) -> Result<Value, DispatchError> {
    let fresh = etag_for(&result)?;
    if etag == Some(fresh.as_str()) {
        trace!(etag = %fresh, "Result unchanged");
        return Ok(cached_marker());
    }
    Ok(fresh_payload(result, fresh))
}
