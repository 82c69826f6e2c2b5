//! Handoff queue between transport threads and the host tick.

use livebridge_protocol::Request;
use tokio::sync::mpsc::{self, error::TryRecvError};
use tracing::debug;

/// Producer side, cloned into every transport thread.
pub type CommandSender = mpsc::UnboundedSender<Request>;

/// Creates a connected sender/queue pair.
pub fn command_queue() -> (CommandSender, CommandQueue) {
    let (tx, rx) = mpsc::unbounded_channel();
    (tx, CommandQueue { rx, closed: false })
}

/// Consumer side, drained on the host tick.
#[derive(Debug)]
pub struct CommandQueue {
    rx: mpsc::UnboundedReceiver<Request>,
    closed: bool,
}

impl CommandQueue {
    /// Takes the next decoded request without blocking.
    pub fn try_next(&mut self) -> Option<Request> {
        match self.rx.try_recv() {
            Ok(request) => Some(request),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => {
                if !self.closed {
                    debug!("All command senders dropped");
                    self.closed = true;
                }
                None
            }
        }
    }

    /// Takes every request queued so far, in arrival order.
    pub fn drain(&mut self) -> Vec<Request> {
        std::iter::from_fn(|| self.try_next()).collect()
    }

    /// Returns true once every sender has been dropped and the queue is empty.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Stops accepting new requests; already queued ones can still be drained.
    pub fn close(&mut self) {
        self.rx.close();
    }
}
