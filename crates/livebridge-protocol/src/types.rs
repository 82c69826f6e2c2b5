//! Request and response types for the livebridge protocol.

use livebridge_core::Args;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// Names of the events the bridge emits besides listener events.
pub mod events {
    /// Successful call result.
    pub const RESULT: &str = "result";
    /// Failed call.
    pub const ERROR: &str = "error";
    /// Transport is ready; datagram mode carries the bound port.
    pub const CONNECT: &str = "connect";
    /// Bridge is shutting down.
    pub const DISCONNECT: &str = "disconnect";
}

/// A call from the client into the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    /// Namespace of the handler (e.g. `"track"`).
    pub ns: String,
    /// Method name within the namespace.
    pub name: String,
    /// Call arguments, by name or by position.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<Args>,
    /// Handle of the target object.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nsid: Option<String>,
    /// Correlation id echoed back in the response.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,
    /// Hash of the result the client already holds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
    /// Whether the client wants etag-based deduplication.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub cache: bool,
}

impl Request {
    /// Creates a request without arguments or target.
    pub fn new(ns: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            ns: ns.into(),
            name: name.into(),
            args: None,
            nsid: None,
            uuid: None,
            etag: None,
            cache: false,
        }
    }

    /// Builder: set arguments.
    pub fn with_args(mut self, args: Args) -> Self {
        self.args = Some(args);
        self
    }

    /// Builder: set target handle.
    pub fn with_nsid(mut self, nsid: impl Into<String>) -> Self {
        self.nsid = Some(nsid.into());
        self
    }

    /// Builder: set correlation id.
    pub fn with_uuid(mut self, uuid: impl Into<String>) -> Self {
        self.uuid = Some(uuid.into());
        self
    }

    /// Builder: request caching, optionally passing the etag already held.
    pub fn with_cache(mut self, etag: Option<String>) -> Self {
        self.cache = true;
        self.etag = etag;
        self
    }

    /// Returns the arguments, or empty keyword arguments.
    pub fn args(&self) -> Args {
        self.args.clone().unwrap_or_default()
    }

    /// Returns true for the liveness probe the client sends continuously.
    pub fn is_ping(&self) -> bool {
        self.ns == "internal"
            && self.name == "get_prop"
            && self
                .args
                .as_ref()
                .and_then(|args| args.get_str("prop"))
                .is_some_and(|prop| prop == "ping")
    }
}

/// A message from the bridge to the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    /// `result`, `error`, a lifecycle event or a listener event id.
    pub event: String,
    /// Payload.
    #[serde(default)]
    pub data: Value,
    /// Correlation id of the request this answers, if any.
    #[serde(default)]
    pub uuid: Option<String>,
}

impl Response {
    /// Creates an arbitrary event.
    pub fn event(event: impl Into<String>, data: Value) -> Self {
        Self {
            event: event.into(),
            data,
            uuid: None,
        }
    }

    /// Creates a successful result.
    pub fn result(data: Value, uuid: Option<String>) -> Self {
        Self {
            event: events::RESULT.to_string(),
            data,
            uuid,
        }
    }

    /// Creates an error carrying a message.
    pub fn error(message: impl Into<String>, uuid: Option<String>) -> Self {
        Self {
            event: events::ERROR.to_string(),
            data: Value::String(message.into()),
            uuid,
        }
    }

    /// Creates the `connect` announcement.
    pub fn connect(port: Option<u16>) -> Self {
        Self::event(events::CONNECT, port.map_or(Value::Null, Value::from))
    }

    /// Creates the `disconnect` announcement.
    pub fn disconnect() -> Self {
        Self::event(events::DISCONNECT, Value::Null)
    }

    /// Returns true for error responses.
    pub fn is_error(&self) -> bool {
        self.event == events::ERROR
    }

    /// Returns true for the given event name.
    pub fn is_event(&self, event: &str) -> bool {
        self.event == event
    }
}

/// Payload sent instead of a result the client already holds.
pub fn cached_marker() -> Value {
    json!({ "__cached": true })
}

/// Payload carrying a fresh result together with its etag.
pub fn fresh_payload(data: Value, etag: impl Into<String>) -> Value {
    json!({ "data": data, "etag": etag.into() })
}

/// Client-side view of the `data` of a cached call.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum CacheReply {
    /// Result unchanged since the etag the client sent.
    Unchanged {
        #[serde(rename = "__cached")]
        cached: bool,
    },
    /// Fresh result with its new etag.
    Fresh { data: Value, etag: String },
}
