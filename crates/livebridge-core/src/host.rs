//! Host object graph abstractions.
//!
//! The bridge never knows the concrete types living inside the host
//! application. Everything it touches (tracks, devices, clips, the song
//! itself) is reached through the [`HostObject`] trait, which exposes:
//!
//! - named properties (read, write)
//! - named child collections (e.g. a track's `devices`)
//! - generic method invocation by name
//! - the host's property-change notification primitives
//!
//! All methods are expected to be called from the host's own execution
//! context. Implementations only need `Send + Sync` so that handles can be
//! shared with the transport layer; the bridge never calls into them from a
//! background thread.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Shared reference to a host object.
pub type HostRef = Arc<dyn HostObject>;

/// Result type for host operations.
pub type HostResult<T> = Result<T, HostError>;

/// Callback invoked by the host whenever a watched property changes.
pub type PropertyCallback = Box<dyn Fn() + Send + Sync>;

/// Errors raised by the host object graph.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HostError {
    /// The object has no property with that name.
    #[error("{kind} has no property '{name}'")]
    NoSuchProperty { kind: String, name: String },

    /// The object has no child collection with that name.
    #[error("{kind} has no children '{name}'")]
    NoSuchChildren { kind: String, name: String },

    /// The object has no method with that name.
    #[error("{kind} has no method '{name}'")]
    NoSuchMethod { kind: String, name: String },

    /// The property exists but cannot be written.
    #[error("property '{name}' of {kind} is read-only")]
    ReadOnly { kind: String, name: String },

    /// The value or argument was rejected by the host.
    #[error("invalid value: {0}")]
    InvalidValue(String),

    /// The host refused or failed the operation.
    #[error("{0}")]
    Failed(String),
}

impl HostError {
    /// Creates a missing-property error.
    pub fn no_such_property(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self::NoSuchProperty {
            kind: kind.into(),
            name: name.into(),
        }
    }

    /// Creates a missing-children error.
    pub fn no_such_children(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self::NoSuchChildren {
            kind: kind.into(),
            name: name.into(),
        }
    }

    /// Creates a missing-method error.
    pub fn no_such_method(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self::NoSuchMethod {
            kind: kind.into(),
            name: name.into(),
        }
    }

    /// Creates a read-only error.
    pub fn read_only(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self::ReadOnly {
            kind: kind.into(),
            name: name.into(),
        }
    }
}

/// Opaque token identifying one property-listener subscription on the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerToken(pub u64);

/// Interface to one object of the host's object graph.
///
/// Only [`kind`](HostObject::kind) is mandatory. Every other operation
/// defaults to reporting that the object does not support it, so fakes and
/// thin adapters only implement what they need.
pub trait HostObject: Send + Sync + 'static {
    /// Short type name used in logs and error messages (e.g. `"track"`).
    fn kind(&self) -> &str;

    /// Reads a named property.
    fn get_property(&self, name: &str) -> HostResult<Value> {
        Err(HostError::no_such_property(self.kind(), name))
    }

    /// Writes a named property.
    fn set_property(&self, name: &str, _value: Value) -> HostResult<()> {
        Err(HostError::no_such_property(self.kind(), name))
    }

    /// Returns a named child collection.
    fn children(&self, name: &str) -> HostResult<Vec<HostRef>> {
        Err(HostError::no_such_children(self.kind(), name))
    }

    /// Invokes a method by name.
    fn invoke(&self, method: &str, _args: &Args) -> HostResult<Value> {
        Err(HostError::no_such_method(self.kind(), method))
    }

    /// Subscribes `callback` to changes of `property`.
    fn add_property_listener(
        &self,
        property: &str,
        _callback: PropertyCallback,
    ) -> HostResult<ListenerToken> {
        Err(HostError::no_such_property(self.kind(), property))
    }

    /// Removes a subscription created by
    /// [`add_property_listener`](HostObject::add_property_listener).
    fn remove_property_listener(&self, property: &str, _token: ListenerToken) -> HostResult<()> {
        Err(HostError::no_such_property(self.kind(), property))
    }
}

impl fmt::Debug for dyn HostObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HostObject({})", self.kind())
    }
}

/// Arguments of a call, shaped the way the caller sent them.
///
/// A JSON object becomes [`Args::Keyword`], a JSON array [`Args::Positional`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Args {
    /// Arguments passed by position.
    Positional(Vec<Value>),
    /// Arguments passed by name.
    Keyword(Map<String, Value>),
}

impl Default for Args {
    fn default() -> Self {
        Self::Keyword(Map::new())
    }
}

impl Args {
    /// Creates keyword arguments from `(name, value)` pairs.
    pub fn keyword<I, K>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        Self::Keyword(pairs.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// Looks up a keyword argument.
    pub fn get(&self, name: &str) -> Option<&Value> {
        match self {
            Self::Keyword(map) => map.get(name),
            Self::Positional(_) => None,
        }
    }

    /// Looks up a positional argument.
    pub fn get_index(&self, index: usize) -> Option<&Value> {
        match self {
            Self::Positional(values) => values.get(index),
            Self::Keyword(_) => None,
        }
    }

    /// Returns a keyword argument as a string slice.
    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(Value::as_str)
    }

    /// Returns the number of arguments.
    pub fn len(&self) -> usize {
        match self {
            Self::Positional(values) => values.len(),
            Self::Keyword(map) => map.len(),
        }
    }

    /// Returns true if no arguments were passed.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns true if the arguments are positional.
    pub fn is_positional(&self) -> bool {
        matches!(self, Self::Positional(_))
    }
}
