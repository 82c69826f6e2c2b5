//! Fake host objects and sinks for unit tests.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use livebridge_core::{
    Args, HostError, HostObject, HostRef, HostResult, ListenerToken, PropertyCallback,
};
use livebridge_protocol::Response;
use serde_json::{Value, json};

use crate::transport::ResponseSink;

type SharedCallback = Arc<dyn Fn() + Send + Sync>;

/// In-memory host object with properties, children, methods and listeners.
pub struct FakeObject {
    kind: String,
    props: Mutex<HashMap<String, Value>>,
    read_only: HashSet<String>,
    children: HashMap<String, Vec<HostRef>>,
    methods: HashSet<String>,
    listeners: Mutex<HashMap<u64, (String, SharedCallback)>>,
    next_token: AtomicU64,
    calls: Mutex<Vec<(String, Args)>>,
}

impl FakeObject {
    pub fn new(kind: &str) -> Self {
        Self {
            kind: kind.to_string(),
            props: Mutex::new(HashMap::new()),
            read_only: HashSet::new(),
            children: HashMap::new(),
            methods: HashSet::new(),
            listeners: Mutex::new(HashMap::new()),
            next_token: AtomicU64::new(1),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_prop(self, name: &str, value: Value) -> Self {
        self.props.lock().unwrap().insert(name.to_string(), value);
        self
    }

    pub fn with_read_only(mut self, name: &str, value: Value) -> Self {
        self.read_only.insert(name.to_string());
        self.with_prop(name, value)
    }

    pub fn with_children(mut self, name: &str, children: Vec<HostRef>) -> Self {
        self.children.insert(name.to_string(), children);
        self
    }

    /// Registers a method that echoes its arguments.
    pub fn with_method(mut self, name: &str) -> Self {
        self.methods.insert(name.to_string());
        self
    }

    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn into_ref(self) -> HostRef {
        Arc::new(self)
    }

    pub fn prop(&self, name: &str) -> Option<Value> {
        self.props.lock().unwrap().get(name).cloned()
    }

    /// Changes a property and fires its listeners like the host would.
    pub fn set_and_notify(&self, name: &str, value: Value) {
        self.props.lock().unwrap().insert(name.to_string(), value);
        let callbacks: Vec<SharedCallback> = self
            .listeners
            .lock()
            .unwrap()
            .values()
            .filter(|(prop, _)| prop == name)
            .map(|(_, callback)| callback.clone())
            .collect();
        for callback in callbacks {
            callback();
        }
    }

    pub fn listener_count(&self, name: &str) -> usize {
        self.listeners
            .lock()
            .unwrap()
            .values()
            .filter(|(prop, _)| prop == name)
            .count()
    }

    pub fn calls(&self) -> Vec<(String, Args)> {
        self.calls.lock().unwrap().clone()
    }
}

impl HostObject for FakeObject {
    fn kind(&self) -> &str {
        &self.kind
    }

    fn get_property(&self, name: &str) -> HostResult<Value> {
        self.prop(name)
            .ok_or_else(|| HostError::no_such_property(&self.kind, name))
    }

    fn set_property(&self, name: &str, value: Value) -> HostResult<()> {
        if self.read_only.contains(name) {
            return Err(HostError::read_only(&self.kind, name));
        }
        let mut props = self.props.lock().unwrap();
        match props.get_mut(name) {
            Some(slot) => {
                *slot = value;
                Ok(())
            }
            None => Err(HostError::no_such_property(&self.kind, name)),
        }
    }

    fn children(&self, name: &str) -> HostResult<Vec<HostRef>> {
        self.children
            .get(name)
            .cloned()
            .ok_or_else(|| HostError::no_such_children(&self.kind, name))
    }

    fn invoke(&self, method: &str, args: &Args) -> HostResult<Value> {
        if !self.methods.contains(method) {
            return Err(HostError::no_such_method(&self.kind, method));
        }
        self.calls
            .lock()
            .unwrap()
            .push((method.to_string(), args.clone()));
        Ok(json!({ "method": method, "args": args }))
    }

    fn add_property_listener(
        &self,
        property: &str,
        callback: PropertyCallback,
    ) -> HostResult<ListenerToken> {
        if self.prop(property).is_none() {
            return Err(HostError::no_such_property(&self.kind, property));
        }
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        self.listeners
            .lock()
            .unwrap()
            .insert(token, (property.to_string(), Arc::from(callback)));
        Ok(ListenerToken(token))
    }

    fn remove_property_listener(&self, property: &str, token: ListenerToken) -> HostResult<()> {
        match self.listeners.lock().unwrap().remove(&token.0) {
            Some(_) => Ok(()),
            None => Err(HostError::Failed(format!(
                "no listener {} on {property}",
                token.0
            ))),
        }
    }
}

/// Sink that keeps every response it is handed.
#[derive(Default)]
pub struct RecordingSink {
    responses: Mutex<Vec<Response>>,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn responses(&self) -> Vec<Response> {
        self.responses.lock().unwrap().clone()
    }

    pub fn take(&self) -> Vec<Response> {
        std::mem::take(&mut *self.responses.lock().unwrap())
    }

    pub fn last(&self) -> Option<Response> {
        self.responses.lock().unwrap().last().cloned()
    }
}

impl ResponseSink for RecordingSink {
    fn send(&self, response: &Response) {
        self.responses.lock().unwrap().push(response.clone());
    }
}
