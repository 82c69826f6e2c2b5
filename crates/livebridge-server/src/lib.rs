//! Host-side bridge: transports, registry, dispatcher and tick loop.
//!
//! This crate is embedded in the host application and provides:
//! - a datagram transport polled from the host tick, with port-file peer
//!   discovery
//! - a stream transport with its own accept and connection threads
//! - an object registry handing out stable handles for host objects
//! - a dispatcher routing requests to per-namespace method tables
//! - property listeners and etag-based result caching
//!
//! # Example
//!
//! ```rust,no_run
//! use livebridge_server::{Bridge, BridgeConfig, Namespace};
//!
//! let mut bridge = Bridge::datagram(&BridgeConfig::default());
//! bridge.register(
//!     Namespace::builder("track")
//!         .method("get_devices", |call| call.describe_children("devices", &["name"]))
//!         .passthrough(["stop_all_clips"])
//!         .build(),
//! );
//! bridge.start()?;
//!
//! // From the host's scheduler, every few milliseconds:
//! bridge.tick();
//!
//! // When the host unloads the bridge:
//! bridge.shutdown();
//! # Ok::<(), livebridge_server::ServerError>(())
//! ```

mod bridge;
mod cache;
mod config;
mod dispatcher;
mod error;
mod listeners;
mod portfile;
mod queue;
mod registry;
#[cfg(test)]
mod test_support;
mod tick;
mod transport;

pub use bridge::Bridge;
pub use cache::{apply_cache, etag_for};
pub use config::{
    BridgeConfig, CLIENT_PORT_FILE, DatagramConfig, SERVER_PORT_FILE, StreamConfig, TickConfig,
    default_port_file,
};
pub use dispatcher::{
    Call, Dispatcher, INTERNAL_NAMESPACE, MethodFn, Namespace, NamespaceBuilder,
    internal_namespace,
};
pub use error::{DispatchError, ServerError, ServerResult};
pub use listeners::{ListenerKey, ListenerTable};
pub use portfile::{PortFile, PortFileWatcher, read_port};
pub use queue::{CommandQueue, CommandSender, command_queue};
pub use registry::{HANDLE_PREFIX, ObjectRegistry};
pub use tick::TickMonitor;
pub use transport::{
    DatagramTransport, ResponseSink, StreamTransport, Transport, effective_ceiling,
};
