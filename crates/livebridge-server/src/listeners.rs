//! Property listener bookkeeping.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use livebridge_core::{HostObject, HostRef, ListenerToken, PropertyCallback};
use tracing::{debug, warn};

use crate::error::DispatchError;

/// `(target handle, property)`.
pub type ListenerKey = (String, String);

struct Registration {
    event_id: String,
    token: ListenerToken,
    target: Weak<dyn HostObject>,
}

/// Active property subscriptions, at most one per key.
#[derive(Default)]
pub struct ListenerTable {
    entries: Mutex<HashMap<ListenerKey, Registration>>,
}

impl ListenerTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ListenerKey, Registration>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Subscribes `callback` to `prop` on `target`.
    ///
    /// If the key is already registered, nothing is subscribed and the
    /// existing event id is returned.
    pub fn add(
        &self,
        key: ListenerKey,
        target: &HostRef,
        event_id: &str,
        callback: PropertyCallback,
    ) -> Result<String, DispatchError> {
        if let Some(existing) = self.lock().get(&key) {
            debug!(handle = %key.0, prop = %key.1, event_id = %existing.event_id, "Listener already registered");
            return Ok(existing.event_id.clone());
        }

        let token = target.add_property_listener(&key.1, callback)?;
        debug!(handle = %key.0, prop = %key.1, event_id, "Added listener");
        self.lock().insert(
            key,
            Registration {
                event_id: event_id.to_string(),
                token,
                target: Arc::downgrade(target),
            },
        );
        Ok(event_id.to_string())
    }

    /// Unsubscribes the listener registered under `key`.
    pub fn remove(&self, key: &ListenerKey) -> Result<(), DispatchError> {
        let registration =
            self.lock()
                .remove(key)
                .ok_or_else(|| DispatchError::ListenerNotFound {
                    prop: key.1.clone(),
                })?;

        if let Some(target) = registration.target.upgrade() {
            target.remove_property_listener(&key.1, registration.token)?;
        }
        debug!(handle = %key.0, prop = %key.1, "Removed listener");
        Ok(())
    }

    /// Returns the event id registered under `key`.
    pub fn event_id(&self, key: &ListenerKey) -> Option<String> {
        self.lock().get(key).map(|r| r.event_id.clone())
    }

    /// Unsubscribes everything. Safe to call repeatedly.
    pub fn clear(&self) -> usize {
        let drained: Vec<_> = self.lock().drain().collect();
        let count = drained.len();

        for ((handle, prop), registration) in drained {
            let Some(target) = registration.target.upgrade() else {
                continue;
            };
            if let Err(e) = target.remove_property_listener(&prop, registration.token) {
                warn!(handle = %handle, prop = %prop, error = %e, "Failed to remove listener");
            }
        }

        if count > 0 {
            debug!(count, "Cleared listeners");
        }
        count
    }

    /// Returns the number of active listeners.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Returns true if no listener is active.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
