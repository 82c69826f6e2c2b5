//! Stable string handles for host objects.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use livebridge_core::{HostObject, HostRef};
use serde_json::{Map, Value};
use tracing::trace;

use crate::error::DispatchError;

/// Prefix of every handle issued by the registry.
pub const HANDLE_PREFIX: &str = "live_";

#[derive(Default)]
struct Inner {
    by_handle: HashMap<String, Weak<dyn HostObject>>,
    by_identity: HashMap<usize, String>,
    next_id: u64,
}

/// Maps host objects to opaque handles and back.
///
/// The registry only holds weak references, so it never keeps a host object
/// alive. Entries are never evicted; a handle whose object is gone resolves
/// to [`DispatchError::DanglingHandle`].
#[derive(Default)]
pub struct ObjectRegistry {
    inner: Mutex<Inner>,
}

fn identity(object: &HostRef) -> usize {
    Arc::as_ptr(object) as *const () as usize
}

impl ObjectRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the handle of `object`, issuing one on first sight.
    pub fn save(&self, object: &HostRef) -> String {
        let mut inner = self.lock();
        let key = identity(object);

        if let Some(handle) = inner.by_identity.get(&key)
            && let Some(existing) = inner.by_handle.get(handle).and_then(Weak::upgrade)
            && Arc::ptr_eq(&existing, object)
        {
            return handle.clone();
        }

        inner.next_id += 1;
        let handle = format!("{HANDLE_PREFIX}{}", inner.next_id);
        inner
            .by_handle
            .insert(handle.clone(), Arc::downgrade(object));
        inner.by_identity.insert(key, handle.clone());
        trace!(handle = %handle, kind = object.kind(), "Registered host object");
        handle
    }

    /// Resolves a handle to its live object.
    pub fn get(&self, handle: &str) -> Result<HostRef, DispatchError> {
        let inner = self.lock();
        let weak = inner
            .by_handle
            .get(handle)
            .ok_or_else(|| DispatchError::UnknownHandle {
                handle: handle.to_string(),
            })?;
        weak.upgrade().ok_or_else(|| DispatchError::DanglingHandle {
            handle: handle.to_string(),
        })
    }

    /// Serializes an object as `{"id": handle, prop: value...}`.
    ///
    /// Properties the object cannot read are reported as `null`.
    pub fn describe(&self, object: &HostRef, props: &[&str]) -> Value {
        let mut map = Map::new();
        map.insert("id".to_string(), Value::String(self.save(object)));
        for prop in props {
            let value = object.get_property(prop).unwrap_or(Value::Null);
            map.insert((*prop).to_string(), value);
        }
        Value::Object(map)
    }

    /// Describes every object of a collection.
    pub fn describe_all(&self, objects: &[HostRef], props: &[&str]) -> Value {
        Value::Array(
            objects
                .iter()
                .map(|object| self.describe(object, props))
                .collect(),
        )
    }

    /// Returns the number of handles issued so far.
    pub fn len(&self) -> usize {
        self.lock().by_handle.len()
    }

    /// Returns true if no handle was issued yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for ObjectRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectRegistry")
            .field("handles", &self.len())
            .finish()
    }
}
