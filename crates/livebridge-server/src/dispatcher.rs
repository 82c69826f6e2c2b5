//! Request dispatch.
//!
//! A [`Dispatcher`] owns one [`Namespace`] per domain (`track`, `device`,
//! `song`, ...). Executing a request goes through these steps:
//!
//! 1. look up the namespace by `ns`
//! 2. resolve the target: the namespace's root object, or the registry
//!    entry named by `nsid`
//! 3. resolve `name`, in order: the namespace's own method table, the
//!    built-ins (`get_prop`, `set_prop`, `add_listener`, `remove_listener`),
//!    then the allow-listed methods invoked on the target itself
//! 4. apply the etag cache if requested
//!
//! Exactly one `result` or `error` response is emitted per request, carrying
//! the request's `uuid`.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};

use livebridge_core::{Args, HostRef, PropertyCallback, VERSION};
use livebridge_protocol::{Request, Response};
use serde_json::Value;
use tracing::{debug, trace, warn};

use crate::cache::apply_cache;
use crate::error::DispatchError;
use crate::listeners::ListenerTable;
use crate::registry::ObjectRegistry;
use crate::transport::ResponseSink;

/// Name of the namespace the bridge provides itself.
pub const INTERNAL_NAMESPACE: &str = "internal";

/// A method of a namespace's dispatch table.
pub type MethodFn = Arc<dyn Fn(&Call<'_>) -> Result<Value, DispatchError> + Send + Sync>;

/// Everything a method needs to run one request.
pub struct Call<'a> {
    /// Namespace name.
    pub ns: &'a str,
    /// Method name as requested.
    pub name: &'a str,
    /// Resolved target, if the namespace has one.
    pub target: Option<HostRef>,
    /// Call arguments.
    pub args: &'a Args,
    /// Registry for turning objects into handles.
    pub registry: &'a ObjectRegistry,
}

impl Call<'_> {
    /// Returns the target or a "requires an object handle" error.
    pub fn target(&self) -> Result<&HostRef, DispatchError> {
        self.target
            .as_ref()
            .ok_or_else(|| DispatchError::MissingTarget {
                ns: self.ns.to_string(),
                name: self.name.to_string(),
            })
    }

    /// Returns a required keyword argument.
    pub fn arg(&self, name: &str) -> Result<&Value, DispatchError> {
        self.args
            .get(name)
            .ok_or_else(|| DispatchError::missing_argument(name))
    }

    /// Returns a required string argument.
    pub fn str_arg(&self, name: &str) -> Result<&str, DispatchError> {
        self.arg(name)?
            .as_str()
            .ok_or_else(|| DispatchError::invalid_argument(name, "expected a string"))
    }

    /// Describes the target's children as `[{"id": handle, prop: value...}]`.
    pub fn describe_children(&self, children: &str, props: &[&str]) -> Result<Value, DispatchError> {
        let objects = self.target()?.children(children)?;
        Ok(self.registry.describe_all(&objects, props))
    }
}

/// One namespace: its target and its callable names.
pub struct Namespace {
    name: String,
    root: Option<HostRef>,
    methods: HashMap<String, MethodFn>,
    passthrough: HashSet<String>,
}

impl Namespace {
    /// Starts building a namespace.
    pub fn builder(name: impl Into<String>) -> NamespaceBuilder {
        NamespaceBuilder {
            namespace: Namespace {
                name: name.into(),
                root: None,
                methods: HashMap::new(),
                passthrough: HashSet::new(),
            },
        }
    }

    /// Namespace name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns true if `name` is in the method table.
    pub fn has_method(&self, name: &str) -> bool {
        self.methods.contains_key(name)
    }

    fn method(&self, name: &str) -> Option<&MethodFn> {
        self.methods.get(name)
    }

    /// Reads a property: the `get_<prop>` override if any, else the target.
    fn read_prop(&self, call: &Call<'_>, prop: &str) -> Result<Value, DispatchError> {
        match self.method(&format!("get_{prop}")) {
            Some(getter) => getter(call),
            None => Ok(call.target()?.get_property(prop)?),
        }
    }

    fn write_prop(&self, call: &Call<'_>, prop: &str, value: Value) -> Result<(), DispatchError> {
        match self.method(&format!("set_{prop}")) {
            Some(setter) => setter(call).map(|_| ()),
            None => Ok(call.target()?.set_property(prop, value)?),
        }
    }
}

impl std::fmt::Debug for Namespace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut methods: Vec<_> = self.methods.keys().collect();
        methods.sort();
        f.debug_struct("Namespace")
            .field("name", &self.name)
            .field("root", &self.root)
            .field("methods", &methods)
            .field("passthrough", &self.passthrough)
            .finish()
    }
}

/// Builder for [`Namespace`].
pub struct NamespaceBuilder {
    namespace: Namespace,
}

impl NamespaceBuilder {
    /// Uses a fixed object as target; `nsid` is then ignored.
    pub fn root(mut self, object: HostRef) -> Self {
        self.namespace.root = Some(object);
        self
    }

    /// Adds a method to the dispatch table.
    pub fn method<F>(mut self, name: impl Into<String>, method: F) -> Self
    where
        F: Fn(&Call<'_>) -> Result<Value, DispatchError> + Send + Sync + 'static,
    {
        self.namespace.methods.insert(name.into(), Arc::new(method));
        self
    }

    /// Allows these names to be invoked on the target directly.
    pub fn passthrough<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.namespace
            .passthrough
            .extend(names.into_iter().map(Into::into));
        self
    }

    /// Finishes the namespace.
    pub fn build(self) -> Namespace {
        self.namespace
    }
}

/// The namespace the bridge always provides.
pub fn internal_namespace() -> Namespace {
    Namespace::builder(INTERNAL_NAMESPACE)
        .method("get_version", |_| Ok(Value::from(VERSION)))
        .method("get_ping", |_| Ok(Value::Bool(true)))
        .build()
}

/// Executes requests and emits their responses.
pub struct Dispatcher {
    namespaces: HashMap<String, Arc<Namespace>>,
    registry: Arc<ObjectRegistry>,
    listeners: ListenerTable,
    sink: Arc<dyn ResponseSink>,
}

impl Dispatcher {
    /// Creates a dispatcher that answers through `sink`.
    ///
    /// The `internal` namespace is registered already.
    pub fn new(sink: Arc<dyn ResponseSink>) -> Self {
        let mut dispatcher = Self {
            namespaces: HashMap::new(),
            registry: Arc::new(ObjectRegistry::new()),
            listeners: ListenerTable::new(),
            sink,
        };
        dispatcher.register(internal_namespace());
        dispatcher
    }

    /// Adds a namespace, replacing any namespace of the same name.
    pub fn register(&mut self, namespace: Namespace) {
        let name = namespace.name.clone();
        if self
            .namespaces
            .insert(name.clone(), Arc::new(namespace))
            .is_some()
        {
            warn!(ns = %name, "Replaced namespace");
        }
    }

    /// Returns the object registry.
    pub fn registry(&self) -> &Arc<ObjectRegistry> {
        &self.registry
    }

    /// Returns the number of active listeners.
    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    /// Executes one request and sends its response.
    pub fn dispatch(&self, request: &Request) {
        if request.is_ping() {
            trace!(uuid = ?request.uuid, "Received ping");
        } else {
            debug!(
                ns = %request.ns,
                name = %request.name,
                nsid = ?request.nsid,
                uuid = ?request.uuid,
                "Received command"
            );
        }

        let uuid = request.uuid.clone();
        let response = match self.execute(request) {
            Ok(data) => Response::result(data, uuid),
            Err(e) => {
                warn!(ns = %request.ns, name = %request.name, error = %e, "Command failed");
                Response::error(e.to_string(), uuid)
            }
        };
        self.sink.send(&response);
    }

    /// Executes one request, returning the response data.
    pub fn execute(&self, request: &Request) -> Result<Value, DispatchError> {
        let namespace =
            self.namespaces
                .get(&request.ns)
                .ok_or_else(|| DispatchError::UnknownNamespace {
                    ns: request.ns.clone(),
                    uuid: request.uuid.clone().unwrap_or_else(|| "None".to_string()),
                })?;

        let target = match (&namespace.root, &request.nsid) {
            (Some(root), _) => Some(root.clone()),
            (None, Some(nsid)) => Some(self.registry.get(nsid)?),
            (None, None) => None,
        };

        let args = request.args();
        let call = Call {
            ns: &request.ns,
            name: &request.name,
            target,
            args: &args,
            registry: &self.registry,
        };

        let result = self.invoke(namespace, &call)?;
        if request.cache {
            apply_cache(result, request.etag.as_deref())
        } else {
            Ok(result)
        }
    }

    fn invoke(&self, namespace: &Arc<Namespace>, call: &Call<'_>) -> Result<Value, DispatchError> {
        if let Some(method) = namespace.method(call.name) {
            return method(call);
        }

        match call.name {
            "get_prop" => namespace.read_prop(call, call.str_arg("prop")?),
            "set_prop" => {
                let prop = call.str_arg("prop")?;
                let value = call.arg("value")?.clone();
                namespace.write_prop(call, prop, value)?;
                Ok(Value::Null)
            }
            "add_listener" => self.add_listener(namespace, call),
            "remove_listener" => {
                let key = self.listener_key(call, call.str_arg("prop")?)?;
                self.listeners.remove(&key)?;
                Ok(Value::Null)
            }
            name if namespace.passthrough.contains(name) => {
                Ok(call.target()?.invoke(name, call.args)?)
            }
            name => Err(DispatchError::unknown_method(name)),
        }
    }

    fn listener_key(&self, call: &Call<'_>, prop: &str) -> Result<(String, String), DispatchError> {
        let handle = self.registry.save(call.target()?);
        Ok((handle, prop.to_string()))
    }

    fn add_listener(
        &self,
        namespace: &Arc<Namespace>,
        call: &Call<'_>,
    ) -> Result<Value, DispatchError> {
        let prop = call.str_arg("prop")?;
        let event_id = call.str_arg("eventId")?;
        let target = call.target()?;
        let key = self.listener_key(call, prop)?;

        let callback = self.listener_callback(namespace, call.ns, target, prop, event_id);
        let event_id = self.listeners.add(key, target, event_id, callback)?;
        Ok(Value::String(event_id))
    }

    /// Builds the callback that re-reads `prop` and emits it as `event_id`.
    ///
    /// Only weak references are captured so a subscription never keeps the
    /// host object or the namespace alive.
    fn listener_callback(
        &self,
        namespace: &Arc<Namespace>,
        ns: &str,
        target: &HostRef,
        prop: &str,
        event_id: &str,
    ) -> PropertyCallback {
        let namespace: Weak<Namespace> = Arc::downgrade(namespace);
        let target = Arc::downgrade(target);
        let registry = Arc::downgrade(&self.registry);
        let sink = self.sink.clone();
        let ns = ns.to_string();
        let prop = prop.to_string();
        let event_id = event_id.to_string();

        Box::new(move || {
            let (Some(namespace), Some(target), Some(registry)) =
                (namespace.upgrade(), target.upgrade(), registry.upgrade())
            else {
                return;
            };

            let args = Args::keyword([("prop", Value::String(prop.clone()))]);
            let call = Call {
                ns: &ns,
                name: "get_prop",
                target: Some(target),
                args: &args,
                registry: &registry,
            };
            match namespace.read_prop(&call, &prop) {
                Ok(value) => sink.send(&Response::event(event_id.as_str(), value)),
                Err(e) => warn!(ns = %ns, prop = %prop, error = %e, "Failed to read changed property"),
            }
        })
    }

    /// Unsubscribes every listener. Safe to call repeatedly.
    pub fn clear_listeners(&self) -> usize {
        self.listeners.clear()
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut namespaces: Vec<_> = self.namespaces.keys().collect();
        namespaces.sort();
        f.debug_struct("Dispatcher")
            .field("namespaces", &namespaces)
            .field("registry", &self.registry)
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::etag_for;
    use crate::test_support::{FakeObject, RecordingSink};
    use livebridge_protocol::events;
    use serde_json::json;

    fn track_namespace() -> Namespace {
        Namespace::builder("track")
            .method("get_devices", |call| {
                call.describe_children("devices", &["name"])
            })
            .method("get_name", |call| {
                let name = call.target()?.get_property("name")?;
                Ok(json!(format!("Track: {}", name.as_str().unwrap_or_default())))
            })
            .passthrough(["stop_all_clips"])
            .build()
    }

    fn track_with_devices() -> Arc<FakeObject> {
        let devices: Vec<HostRef> = vec![
            FakeObject::new("device")
                .with_prop("name", json!("EQ Eight"))
                .into_ref(),
            FakeObject::new("device")
                .with_prop("name", json!("Compressor"))
                .into_ref(),
        ];
        FakeObject::new("track")
            .with_prop("name", json!("Bass"))
            .with_prop("mute", json!(false))
            .with_read_only("has_midi_input", json!(true))
            .with_children("devices", devices)
            .with_method("stop_all_clips")
            .with_method("delete_device")
            .shared()
    }

    fn setup() -> (Dispatcher, Arc<RecordingSink>, Arc<FakeObject>, String) {
        let sink = RecordingSink::new();
        let mut dispatcher = Dispatcher::new(sink.clone());
        dispatcher.register(track_namespace());

        let track = track_with_devices();
        let target: HostRef = track.clone();
        let handle = dispatcher.registry().save(&target);
        (dispatcher, sink, track, handle)
    }

    #[test]
    fn get_devices_returns_described_children() {
        let (dispatcher, sink, _track, handle) = setup();

        dispatcher.dispatch(
            &Request::new("track", "get_devices")
                .with_nsid(&handle)
                .with_uuid("a1"),
        );

        let response = sink.last().unwrap();
        assert_eq!(response.event, events::RESULT);
        assert_eq!(response.uuid.as_deref(), Some("a1"));

        let devices = response.data.as_array().unwrap();
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0]["name"], "EQ Eight");
        assert_eq!(devices[1]["name"], "Compressor");

        let first = dispatcher
            .registry()
            .get(devices[0]["id"].as_str().unwrap())
            .unwrap();
        assert_eq!(first.kind(), "device");
    }

    #[test]
    fn unknown_handle_yields_error_with_uuid() {
        let (dispatcher, sink, _track, _handle) = setup();

        dispatcher.dispatch(
            &Request::new("track", "get_devices")
                .with_nsid("live_123")
                .with_uuid("a1"),
        );

        let response = sink.last().unwrap();
        assert!(response.is_error());
        assert_eq!(response.uuid.as_deref(), Some("a1"));
        assert!(response.data.as_str().unwrap().contains("live_123"));
    }

    #[test]
    fn dangling_handle_yields_error() {
        let sink = RecordingSink::new();
        let mut dispatcher = Dispatcher::new(sink.clone());
        dispatcher.register(track_namespace());

        let target: HostRef = track_with_devices();
        let handle = dispatcher.registry().save(&target);
        drop(target);

        dispatcher.dispatch(
            &Request::new("track", "get_devices")
                .with_nsid(&handle)
                .with_uuid("d1"),
        );

        let response = sink.last().unwrap();
        assert!(response.is_error());
        assert_eq!(response.uuid.as_deref(), Some("d1"));
        assert!(response.data.as_str().unwrap().contains("no longer exists"));
    }

    #[test]
    fn unknown_namespace_names_namespace_and_uuid() {
        let (dispatcher, sink, _track, _handle) = setup();

        dispatcher.dispatch(&Request::new("mixer", "get_volume").with_uuid("x9"));

        let response = sink.last().unwrap();
        insta::assert_json_snapshot!(response, @r#"
        {
          "event": "error",
          "data": "No handler for namespace mixer, Payload UUID: x9",
          "uuid": "x9"
        }
        "#);
    }

    #[test]
    fn unknown_method_is_reported() {
        let (dispatcher, sink, _track, handle) = setup();

        dispatcher.dispatch(
            &Request::new("track", "delete_device")
                .with_nsid(&handle)
                .with_uuid("m1"),
        );

        let response = sink.last().unwrap();
        assert_eq!(
            response.data,
            json!("Function call failed: delete_device doesn't exist or isn't callable")
        );
    }

    #[test]
    fn every_request_gets_exactly_one_response() {
        let (dispatcher, sink, _track, handle) = setup();
        let requests = [
            Request::new("track", "get_devices").with_nsid(&handle),
            Request::new("track", "nope").with_nsid(&handle),
            Request::new("nowhere", "get_devices"),
            Request::new("track", "get_devices").with_nsid("live_0"),
            Request::new("track", "get_prop").with_nsid(&handle),
        ];

        for (i, request) in requests.into_iter().enumerate() {
            dispatcher.dispatch(&request.with_uuid(format!("u{i}")));
        }

        let uuids: Vec<_> = sink
            .take()
            .into_iter()
            .map(|r| r.uuid.unwrap_or_default())
            .collect();
        assert_eq!(uuids, ["u0", "u1", "u2", "u3", "u4"]);
    }

    #[test]
    fn get_prop_uses_override_then_target() {
        let (dispatcher, _sink, _track, handle) = setup();

        let overridden = Request::new("track", "get_prop")
            .with_nsid(&handle)
            .with_args(Args::keyword([("prop", json!("name"))]));
        assert_eq!(dispatcher.execute(&overridden).unwrap(), json!("Track: Bass"));

        let direct = Request::new("track", "get_prop")
            .with_nsid(&handle)
            .with_args(Args::keyword([("prop", json!("mute"))]));
        assert_eq!(dispatcher.execute(&direct).unwrap(), json!(false));
    }

    #[test]
    fn set_prop_writes_target() {
        let (dispatcher, _sink, track, handle) = setup();

        let request = Request::new("track", "set_prop")
            .with_nsid(&handle)
            .with_args(Args::keyword([("prop", json!("mute")), ("value", json!(true))]));
        assert_eq!(dispatcher.execute(&request).unwrap(), Value::Null);
        assert_eq!(track.prop("mute"), Some(json!(true)));

        let read_only = Request::new("track", "set_prop")
            .with_nsid(&handle)
            .with_args(Args::keyword([
                ("prop", json!("has_midi_input")),
                ("value", json!(false)),
            ]));
        let err = dispatcher.execute(&read_only).unwrap_err();
        assert!(err.to_string().contains("read-only"));
    }

    #[test]
    fn passthrough_invokes_target_with_args_as_sent() {
        let (dispatcher, _sink, track, handle) = setup();

        let request = Request::new("track", "stop_all_clips")
            .with_nsid(&handle)
            .with_args(Args::Positional(vec![json!(true)]));
        dispatcher.execute(&request).unwrap();

        let calls = track.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "stop_all_clips");
        assert!(calls[0].1.is_positional());
    }

    #[test]
    fn method_without_target_requires_handle() {
        let (dispatcher, _sink, _track, _handle) = setup();

        let err = dispatcher
            .execute(&Request::new("track", "get_devices"))
            .unwrap_err();
        assert_eq!(err.to_string(), "track.get_devices requires an object handle");
    }

    #[test]
    fn root_namespace_ignores_nsid() {
        let sink = RecordingSink::new();
        let mut dispatcher = Dispatcher::new(sink);
        let song: HostRef = FakeObject::new("song")
            .with_prop("tempo", json!(120.0))
            .into_ref();
        dispatcher.register(Namespace::builder("song").root(song).build());

        let request = Request::new("song", "get_prop")
            .with_nsid("live_404")
            .with_args(Args::keyword([("prop", json!("tempo"))]));
        assert_eq!(dispatcher.execute(&request).unwrap(), json!(120.0));
    }

    #[test]
    fn internal_namespace_answers_ping_and_version() {
        let dispatcher = Dispatcher::new(RecordingSink::new());

        let ping = Request::new(INTERNAL_NAMESPACE, "get_prop")
            .with_args(Args::keyword([("prop", json!("ping"))]));
        assert_eq!(dispatcher.execute(&ping).unwrap(), json!(true));

        let version = Request::new(INTERNAL_NAMESPACE, "get_version");
        assert_eq!(dispatcher.execute(&version).unwrap(), json!(VERSION));
    }

    #[test]
    fn cached_result_round_trip() {
        let (dispatcher, _sink, _track, handle) = setup();
        let request = Request::new("track", "get_devices").with_nsid(&handle);

        let first = dispatcher
            .execute(&request.clone().with_cache(None))
            .unwrap();
        let etag = first["etag"].as_str().unwrap().to_string();
        assert_eq!(first["data"].as_array().unwrap().len(), 2);
        assert_eq!(etag, etag_for(&first["data"]).unwrap());

        let second = dispatcher
            .execute(&request.clone().with_cache(Some(etag)))
            .unwrap();
        assert_eq!(second, json!({"__cached": true}));

        let stale = dispatcher
            .execute(&request.with_cache(Some("0000".into())))
            .unwrap();
        assert_eq!(stale, first);
    }

    #[test]
    fn listener_emits_event_on_change() {
        let (dispatcher, sink, track, handle) = setup();
        let add = Request::new("track", "add_listener")
            .with_nsid(&handle)
            .with_args(Args::keyword([("prop", json!("mute")), ("eventId", json!("ev-mute"))]));

        assert_eq!(dispatcher.execute(&add).unwrap(), json!("ev-mute"));
        track.set_and_notify("mute", json!(true));

        let event = sink.last().unwrap();
        assert_eq!(event, Response::event("ev-mute", json!(true)));
    }

    #[test]
    fn listener_rereads_through_override() {
        let (dispatcher, sink, track, handle) = setup();
        let add = Request::new("track", "add_listener")
            .with_nsid(&handle)
            .with_args(Args::keyword([("prop", json!("name")), ("eventId", json!("ev-name"))]));

        dispatcher.execute(&add).unwrap();
        track.set_and_notify("name", json!("Drums"));

        assert_eq!(
            sink.last().unwrap(),
            Response::event("ev-name", json!("Track: Drums"))
        );
    }

    #[test]
    fn add_listener_twice_subscribes_once() {
        let (dispatcher, _sink, track, handle) = setup();
        let add = |event_id: &str| {
            Request::new("track", "add_listener")
                .with_nsid(&handle)
                .with_args(Args::keyword([("prop", json!("mute")), ("eventId", json!(event_id))]))
        };

        assert_eq!(dispatcher.execute(&add("ev-1")).unwrap(), json!("ev-1"));
        assert_eq!(dispatcher.execute(&add("ev-2")).unwrap(), json!("ev-1"));
        assert_eq!(track.listener_count("mute"), 1);
        assert_eq!(dispatcher.listener_count(), 1);
    }

    #[test]
    fn remove_listener_lifecycle() {
        let (dispatcher, _sink, track, handle) = setup();
        let prop_args = Args::keyword([("prop", json!("mute"))]);
        let add = Request::new("track", "add_listener")
            .with_nsid(&handle)
            .with_args(Args::keyword([("prop", json!("mute")), ("eventId", json!("ev-1"))]));
        let remove = Request::new("track", "remove_listener")
            .with_nsid(&handle)
            .with_args(prop_args);

        dispatcher.execute(&add).unwrap();
        dispatcher.execute(&remove).unwrap();
        assert_eq!(track.listener_count("mute"), 0);

        let err = dispatcher.execute(&remove).unwrap_err();
        assert_eq!(err.to_string(), "Listener mute does not exist.");
    }

    #[test]
    fn clear_listeners_stops_events() {
        let (dispatcher, sink, track, handle) = setup();
        let add = Request::new("track", "add_listener")
            .with_nsid(&handle)
            .with_args(Args::keyword([("prop", json!("mute")), ("eventId", json!("ev-1"))]));
        dispatcher.execute(&add).unwrap();

        assert_eq!(dispatcher.clear_listeners(), 1);
        assert_eq!(dispatcher.clear_listeners(), 0);

        sink.take();
        track.set_and_notify("mute", json!(true));
        assert!(sink.responses().is_empty());
    }
}
