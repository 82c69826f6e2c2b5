//! The bridge: transport, queue and dispatcher driven by the host tick.
//!
//! Transport threads only decode bytes and enqueue requests. Everything
//! that touches host objects happens inside [`Bridge::tick`], which the
//! host calls from its own scheduler:
//!
//! ```text
//! transport threads ──► command queue ──► tick ──► dispatcher ──► sink
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use livebridge_protocol::Response;
use tracing::{debug, info};

use crate::config::{BridgeConfig, TickConfig};
use crate::dispatcher::{Dispatcher, Namespace};
use crate::error::ServerResult;
use crate::queue::{CommandQueue, CommandSender, command_queue};
use crate::tick::TickMonitor;
use crate::transport::{DatagramTransport, ResponseSink, StreamTransport, Transport};

/// Host-side bridge.
pub struct Bridge {
    dispatcher: Dispatcher,
    transport: Box<dyn Transport>,
    sink: Arc<dyn ResponseSink>,
    queue: CommandQueue,
    sender: Option<CommandSender>,
    monitor: TickMonitor,
    shut_down: bool,
}

impl Bridge {
    /// Creates a bridge over any transport.
    pub fn new(transport: Box<dyn Transport>, tick: TickConfig) -> Self {
        let sink = transport.sink();
        let (sender, queue) = command_queue();
        Self {
            dispatcher: Dispatcher::new(sink.clone()),
            transport,
            sink,
            queue,
            sender: Some(sender),
            monitor: TickMonitor::new(tick),
            shut_down: false,
        }
    }

    /// Creates a bridge over the datagram transport.
    pub fn datagram(config: &BridgeConfig) -> Self {
        Self::new(
            Box::new(DatagramTransport::new(config.datagram.clone())),
            config.tick.clone(),
        )
    }

    /// Creates a bridge over the stream transport.
    pub fn stream(config: &BridgeConfig) -> Self {
        Self::new(
            Box::new(StreamTransport::new(config.stream.clone())),
            config.tick.clone(),
        )
    }

    /// Adds a namespace.
    pub fn register(&mut self, namespace: Namespace) {
        self.dispatcher.register(namespace);
    }

    /// Returns the dispatcher.
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Starts the transport. Calling it again does nothing.
    pub fn start(&mut self) -> ServerResult<()> {
        let Some(sender) = self.sender.take() else {
            return Ok(());
        };
        info!(transport = self.transport.name(), "Starting bridge");
        if let Err(e) = self.transport.start(sender.clone()) {
            self.sender = Some(sender);
            return Err(e);
        }
        Ok(())
    }

    /// Runs one host tick: transport I/O, then every queued request in
    /// arrival order. Returns how many requests were dispatched.
    pub fn tick(&mut self) -> usize {
        if self.shut_down {
            return 0;
        }
        let started = Instant::now();
        self.monitor.begin(started);

        self.transport.poll();

        let mut processed = 0;
        while let Some(request) = self.queue.try_next() {
            self.dispatcher.dispatch(&request);
            processed += 1;
        }

        self.monitor.finish(started, Instant::now(), processed);
        processed
    }

    /// Drives the bridge from the current thread until `stop` is set, then
    /// shuts it down.
    pub fn run_until(&mut self, stop: &AtomicBool, interval: Duration) {
        while !stop.load(Ordering::SeqCst) {
            self.tick();
            std::thread::sleep(interval);
        }
        self.shutdown();
    }

    /// Announces `disconnect`, drops every listener and stops the transport.
    ///
    /// Safe to call repeatedly.
    pub fn shutdown(&mut self) {
        if self.shut_down {
            debug!("Bridge already shut down");
            return;
        }
        self.shut_down = true;
        info!("Shutting down bridge");

        self.sink.send(&Response::disconnect());
        self.dispatcher.clear_listeners();
        self.transport.shutdown();
        self.queue.close();
    }

    /// Returns true once [`shutdown`](Self::shutdown) ran.
    pub fn is_shut_down(&self) -> bool {
        self.shut_down
    }
}

impl Drop for Bridge {
    fn drop(&mut self) {
        self.shutdown();
    }
}
