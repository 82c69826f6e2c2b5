//! Host object abstractions, call arguments and tracing setup

pub mod host;
pub mod tracing;

pub use host::{
    Args, HostError, HostObject, HostRef, HostResult, ListenerToken, PropertyCallback,
};
pub use tracing::{init_tracing, TracingConfig, TracingError, TracingOutputFormat};

/// Version of the bridge, reported by `internal.get_version`.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
