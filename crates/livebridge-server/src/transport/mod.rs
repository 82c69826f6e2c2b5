//! Transports moving requests in and responses out.
//!
//! Two implementations exist:
//!
//! - [`DatagramTransport`]: connectionless, chunked datagrams, polled from
//!   the host tick with no thread of its own
//! - [`StreamTransport`]: one client at a time over an upgraded stream
//!   connection, served by background threads
//!
//! Either way, decoded requests only reach the host through the
//! [`CommandSender`](crate::queue::CommandSender) handed to
//! [`Transport::start`].

mod datagram;
mod stream;

use std::sync::Arc;

use livebridge_protocol::Response;

use crate::error::ServerResult;
use crate::queue::CommandSender;

pub use datagram::{DatagramTransport, effective_ceiling};
pub use stream::StreamTransport;

/// Outbound half of a transport.
///
/// Sending never blocks and never fails loudly: a response that cannot be
/// delivered is logged and dropped.
pub trait ResponseSink: Send + Sync {
    /// Sends one response to the client.
    fn send(&self, response: &Response);
}

/// A transport the bridge can drive.
pub trait Transport: Send {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Starts receiving; decoded requests go to `commands`.
    fn start(&mut self, commands: CommandSender) -> ServerResult<()>;

    /// Does pending I/O. Called once per host tick.
    fn poll(&mut self) {}

    /// Returns the outbound half.
    fn sink(&self) -> Arc<dyn ResponseSink>;

    /// Stops the transport. Safe to call repeatedly.
    fn shutdown(&mut self);
}
