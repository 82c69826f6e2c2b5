//! Connectionless transport over UDP.

use std::io::{self, ErrorKind};
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use livebridge_protocol::chunking::CHUNK_HEADER_SIZE;
use livebridge_protocol::compression::decode_json;
use livebridge_protocol::{DatagramEncoder, Reassembler, Request, Response};
use socket2::{Domain, Protocol, Socket, Type};
use tracing::{debug, info, trace, warn};

use super::{ResponseSink, Transport};
use crate::config::DatagramConfig;
use crate::error::{ServerError, ServerResult};
use crate::portfile::{PortFile, PortFileWatcher};
use crate::queue::CommandSender;

/// Largest datagram the receive buffer accepts.
const RECV_BUFFER_SIZE: usize = 65_536;

/// Returns the outbound datagram ceiling for a socket send buffer.
///
/// The configured ceiling wins unless the send buffer minus `margin` is
/// smaller; the result always leaves room for at least one payload byte.
pub fn effective_ceiling(configured: usize, send_buffer: usize, margin: usize) -> usize {
    configured
        .min(send_buffer.saturating_sub(margin))
        .max(CHUNK_HEADER_SIZE + 1)
}

fn resolve(host: &str, port: u16) -> io::Result<SocketAddr> {
    (host, port).to_socket_addrs()?.next().ok_or_else(|| {
        io::Error::new(
            ErrorKind::AddrNotAvailable,
            format!("{host}:{port} did not resolve"),
        )
    })
}

struct Outbound {
    socket: Option<Arc<UdpSocket>>,
    remote: Option<SocketAddr>,
    encoder: DatagramEncoder,
}

impl Outbound {
    fn send(&mut self, response: &Response) {
        let (Some(socket), Some(remote)) = (self.socket.as_ref(), self.remote) else {
            trace!(event = %response.event, "No peer yet, dropping response");
            return;
        };

        let datagrams = match self.encoder.encode(response) {
            Ok(datagrams) => datagrams,
            Err(e) => {
                warn!(event = %response.event, error = %e, "Failed to encode response");
                // The caller still gets an answer carrying its uuid.
                let fallback = Response::error(e.to_string(), response.uuid.clone());
                match self.encoder.encode(&fallback) {
                    Ok(datagrams) => datagrams,
                    Err(e) => {
                        warn!(error = %e, "Failed to encode error response");
                        return;
                    }
                }
            }
        };

        for datagram in &datagrams {
            if let Err(e) = socket.send_to(datagram, remote) {
                warn!(%remote, error = %e, "Failed to send datagram");
                return;
            }
        }
    }
}

struct DatagramSink {
    outbound: Arc<Mutex<Outbound>>,
}

impl ResponseSink for DatagramSink {
    fn send(&self, response: &Response) {
        self.outbound
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .send(response);
    }
}

/// UDP transport driven entirely from [`Transport::poll`].
///
/// Binding is retried on every poll once the retry delay has passed, for as
/// long as the transport lives.
pub struct DatagramTransport {
    config: DatagramConfig,
    outbound: Arc<Mutex<Outbound>>,
    commands: Option<CommandSender>,
    reassembler: Reassembler,
    watcher: PortFileWatcher,
    port_file: Option<PortFile>,
    next_bind_attempt: Option<Instant>,
    local_port: Option<u16>,
    buffer: Vec<u8>,
}

impl DatagramTransport {
    /// Creates an unbound transport.
    pub fn new(config: DatagramConfig) -> Self {
        let watcher = PortFileWatcher::new(
            config.peer_port_file.clone(),
            config.port_file_poll_interval,
        );
        Self {
            outbound: Arc::new(Mutex::new(Outbound {
                socket: None,
                remote: None,
                encoder: DatagramEncoder::new(config.max_datagram_size),
            })),
            commands: None,
            reassembler: Reassembler::new(config.reassembly_ttl),
            watcher,
            port_file: None,
            next_bind_attempt: None,
            local_port: None,
            buffer: vec![0; RECV_BUFFER_SIZE],
            config,
        }
    }

    /// Returns the bound local port.
    pub fn local_port(&self) -> Option<u16> {
        self.local_port
    }

    /// Returns where responses currently go.
    pub fn remote(&self) -> Option<SocketAddr> {
        self.outbound().remote
    }

    /// Returns the current outbound datagram ceiling.
    pub fn max_datagram_size(&self) -> usize {
        self.outbound().encoder.max_datagram_size()
    }

    fn outbound(&self) -> MutexGuard<'_, Outbound> {
        self.outbound.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn bind_socket(&self) -> ServerResult<(UdpSocket, usize)> {
        let addr = resolve(&self.config.local_host, self.config.local_port)?;
        let socket = Socket::new(Domain::for_address(addr), Type::DGRAM, Some(Protocol::UDP))?;
        socket
            .bind(&addr.into())
            .map_err(|e| ServerError::bind(addr.to_string(), e))?;
        socket.set_nonblocking(true)?;
        let send_buffer = socket.send_buffer_size()?;
        Ok((socket.into(), send_buffer))
    }

    fn try_bind(&mut self, now: Instant) {
        let (socket, send_buffer) = match self.bind_socket() {
            Ok(bound) => bound,
            Err(e) => {
                info!(
                    error = %e,
                    retry_in = ?self.config.bind_retry_delay,
                    "Could not bind datagram socket, retrying"
                );
                self.next_bind_attempt = Some(now + self.config.bind_retry_delay);
                return;
            }
        };

        let port = match socket.local_addr() {
            Ok(addr) => addr.port(),
            Err(e) => {
                warn!(error = %e, "Bound socket has no local address");
                self.next_bind_attempt = Some(now + self.config.bind_retry_delay);
                return;
            }
        };

        let ceiling = effective_ceiling(
            self.config.max_datagram_size,
            send_buffer,
            self.config.send_buffer_margin,
        );
        info!(port, send_buffer, ceiling, "Datagram socket bound");

        match PortFile::create(&self.config.own_port_file, port) {
            Ok(file) => self.port_file = Some(file),
            Err(e) => warn!(error = %e, "Failed to write port file"),
        }

        let remote = self
            .watcher
            .poll(now)
            .or((self.config.remote_port != 0).then_some(self.config.remote_port))
            .and_then(|port| self.peer_addr(port));

        {
            let mut outbound = self.outbound();
            outbound.socket = Some(Arc::new(socket));
            outbound.encoder.set_max_datagram_size(ceiling);
            if remote.is_some() {
                outbound.remote = remote;
            }
        }
        self.local_port = Some(port);
        self.next_bind_attempt = None;
        self.announce();
    }

    fn peer_addr(&self, port: u16) -> Option<SocketAddr> {
        match resolve(&self.config.remote_host, port) {
            Ok(addr) => Some(addr),
            Err(e) => {
                warn!(host = %self.config.remote_host, port, error = %e, "Cannot resolve peer");
                None
            }
        }
    }

    /// Sends `connect` with our port to the current peer.
    fn announce(&self) {
        self.outbound().send(&Response::connect(self.local_port));
    }

    fn check_peer_port(&mut self, now: Instant) {
        let Some(port) = self.watcher.poll(now) else {
            return;
        };
        let Some(addr) = self.peer_addr(port) else {
            return;
        };
        info!(%addr, "Peer moved, announcing");
        self.outbound().remote = Some(addr);
        self.announce();
    }

    fn receive(&mut self) {
        let Some(socket) = self.outbound().socket.clone() else {
            return;
        };

        loop {
            let (len, from) = match socket.recv_from(&mut self.buffer) {
                Ok(received) => received,
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == ErrorKind::ConnectionReset => continue,
                Err(e) => {
                    warn!(error = %e, "Datagram receive failed");
                    break;
                }
            };

            let compressed = match self.reassembler.push(&self.buffer[..len]) {
                Ok(pushed) => {
                    self.remember_sender(from);
                    match pushed {
                        Some(compressed) => compressed,
                        None => continue,
                    }
                }
                Err(e) => {
                    debug!(%from, error = %e, "Dropping malformed datagram");
                    continue;
                }
            };

            match decode_json::<Request>(&compressed) {
                Ok(request) => self.enqueue(request),
                Err(e) => warn!(%from, error = %e, "Dropping undecodable message"),
            }
        }
    }

    fn remember_sender(&self, from: SocketAddr) {
        let mut outbound = self.outbound();
        if outbound.remote != Some(from) {
            debug!(%from, previous = ?outbound.remote, "Replying to new sender");
            outbound.remote = Some(from);
        }
    }

    fn enqueue(&self, request: Request) {
        let Some(commands) = self.commands.as_ref() else {
            return;
        };
        if commands.send(request).is_err() {
            debug!("Command queue closed, dropping request");
        }
    }
}

impl Transport for DatagramTransport {
    fn name(&self) -> &'static str {
        "datagram"
    }

    fn start(&mut self, commands: CommandSender) -> ServerResult<()> {
        resolve(&self.config.local_host, self.config.local_port)
            .map_err(|e| ServerError::config(format!("invalid local address: {e}")))?;
        self.commands = Some(commands);
        self.try_bind(Instant::now());
        Ok(())
    }

    fn poll(&mut self) {
        if self.commands.is_none() {
            return;
        }
        let now = Instant::now();

        if self.local_port.is_none() {
            if self.next_bind_attempt.is_some_and(|at| now < at) {
                return;
            }
            self.try_bind(now);
            if self.local_port.is_none() {
                return;
            }
        }

        self.check_peer_port(now);
        self.reassembler.purge_expired(now);
        self.receive();
    }

    fn sink(&self) -> Arc<dyn ResponseSink> {
        Arc::new(DatagramSink {
            outbound: self.outbound.clone(),
        })
    }

    fn shutdown(&mut self) {
        if self.commands.take().is_none() && self.local_port.is_none() {
            return;
        }
        self.outbound().socket = None;
        self.port_file = None;
        self.local_port = None;
        info!("Datagram transport stopped");
    }
}
