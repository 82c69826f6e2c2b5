//! Datagram client for talking to the bridge.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::time::Instant;
use tracing::{debug, info, trace};
use uuid::Uuid;

use livebridge_protocol::{DatagramEncoder, Reassembler, Request, Response, events};
use livebridge_server::{PortFile, read_port};

use crate::config::BridgeSettings;
use crate::error::{ClientError, ClientResult};

const RECV_BUFFER_SIZE: usize = 65_536;

/// Client side of a datagram pairing with the bridge.
///
/// Holds its own port file for as long as it lives, so the bridge can find
/// it and announce itself.
pub struct DatagramClient {
    socket: UdpSocket,
    host: String,
    remote: Option<SocketAddr>,
    encoder: DatagramEncoder,
    reassembler: Reassembler,
    timeout: Duration,
    buffer: Vec<u8>,
    _port_file: PortFile,
}

impl DatagramClient {
    /// Binds an ephemeral port, publishes it and waits for the bridge to
    /// announce itself.
    ///
    /// If no `connect` arrives before the timeout, the port the bridge wrote
    /// to its own port file is used instead. Fails when neither is known.
    pub async fn connect(settings: &BridgeSettings) -> ClientResult<Self> {
        let socket = UdpSocket::bind((settings.host.as_str(), 0))
            .await
            .map_err(|e| {
                ClientError::Connection(format!("failed to bind {}: {}", settings.host, e))
            })?;
        let port = socket.local_addr()?.port();
        let port_file = PortFile::create(settings.client_port_file(), port)?;
        debug!(port, "client socket bound");

        let server_port_file = settings.server_port_file();
        let mut client = Self {
            socket,
            host: settings.host.clone(),
            remote: None,
            encoder: DatagramEncoder::new(settings.max_datagram_size),
            reassembler: Reassembler::default(),
            timeout: settings.timeout(),
            buffer: vec![0; RECV_BUFFER_SIZE],
            _port_file: port_file,
        };

        if let Some(port) = read_port(&server_port_file) {
            client.remote = Some(client.resolve(port).await?);
        }

        match client.wait_for_connect().await {
            Ok(addr) => info!(%addr, "bridge announced itself"),
            Err(ClientError::Timeout(_)) if client.remote.is_some() => {
                debug!(remote = ?client.remote, "no announcement, using port file");
            }
            Err(ClientError::Timeout(_)) => {
                return Err(ClientError::Connection(format!(
                    "bridge not found: no announcement within {}s and no port in {}",
                    client.timeout.as_secs(),
                    server_port_file.display()
                )));
            }
            Err(e) => return Err(e),
        }

        Ok(client)
    }

    /// Returns the local port.
    pub fn local_port(&self) -> ClientResult<u16> {
        Ok(self.socket.local_addr()?.port())
    }

    /// Returns the bridge address requests go to.
    pub fn remote(&self) -> Option<SocketAddr> {
        self.remote
    }

    /// Sends a request and waits for the response carrying its uuid.
    ///
    /// A fresh uuid is assigned. Responses to other requests and listener
    /// events arriving in between are skipped.
    pub async fn send(&mut self, request: Request) -> ClientResult<Response> {
        let Some(remote) = self.remote else {
            return Err(ClientError::Connection("bridge address unknown".into()));
        };

        let request_id = Uuid::new_v4().to_string();
        let request = request.with_uuid(&request_id);
        debug!(
            ns = %request.ns,
            name = %request.name,
            request_id = %request_id,
            %remote,
            "sending request"
        );

        for datagram in self.encoder.encode(&request)? {
            self.socket.send_to(&datagram, remote).await?;
        }

        let deadline = Instant::now() + self.timeout;
        loop {
            let (response, _) = self.recv_until(deadline, "waiting for response").await?;
            if response.uuid.as_deref() == Some(request_id.as_str()) {
                return Ok(response);
            }
            trace!(event = %response.event, uuid = ?response.uuid, "skipping unrelated message");
        }
    }

    /// Sends a request and returns its `data`, turning `error` responses
    /// into [`ClientError::Remote`].
    pub async fn call(&mut self, request: Request) -> ClientResult<serde_json::Value> {
        let response = self.send(request).await?;
        if response.is_error() {
            let message = match response.data {
                serde_json::Value::String(message) => message,
                other => other.to_string(),
            };
            return Err(ClientError::Remote(message));
        }
        Ok(response.data)
    }

    /// Sends the liveness probe.
    pub async fn ping(&mut self) -> ClientResult<bool> {
        let probe = Request::new("internal", "get_prop")
            .with_args(livebridge_core::Args::keyword([(
                "prop",
                serde_json::Value::from("ping"),
            )]));
        let data = self.call(probe).await?;
        Ok(data == serde_json::Value::Bool(true))
    }

    async fn wait_for_connect(&mut self) -> ClientResult<SocketAddr> {
        let deadline = Instant::now() + self.timeout;
        loop {
            let (response, from) = self.recv_until(deadline, "waiting for the bridge").await?;
            if !response.is_event(events::CONNECT) {
                continue;
            }
            let addr = match response.data.as_u64().and_then(|p| u16::try_from(p).ok()) {
                Some(port) => self.resolve(port).await?,
                None => from,
            };
            self.remote = Some(addr);
            return Ok(addr);
        }
    }

    async fn recv_until(
        &mut self,
        deadline: Instant,
        what: &str,
    ) -> ClientResult<(Response, SocketAddr)> {
        loop {
            let (len, from) = tokio::time::timeout_at(deadline, self.socket.recv_from(&mut self.buffer))
                .await
                .map_err(|_| ClientError::Timeout(what.to_string()))??;

            match self.reassembler.decode::<Response>(&self.buffer[..len]) {
                Ok(Some(response)) => return Ok((response, from)),
                Ok(None) => {}
                Err(e) => debug!(%from, error = %e, "dropping malformed datagram"),
            }
        }
    }

    async fn resolve(&self, port: u16) -> ClientResult<SocketAddr> {
        tokio::net::lookup_host((self.host.as_str(), port))
            .await?
            .next()
            .ok_or_else(|| {
                ClientError::Connection(format!("{}:{} did not resolve", self.host, port))
            })
    }
}
