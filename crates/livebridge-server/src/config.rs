//! Bridge configuration.

use std::ops::RangeInclusive;
use std::path::PathBuf;
use std::time::Duration;

use livebridge_protocol::chunking::{DEFAULT_MAX_DATAGRAM_SIZE, DEFAULT_REASSEMBLY_TTL};

/// Port file the bridge writes its bound datagram port to.
pub const SERVER_PORT_FILE: &str = "livebridge-server.port";

/// Port file the client writes its bound datagram port to.
pub const CLIENT_PORT_FILE: &str = "livebridge-client.port";

/// Top-level bridge configuration.
#[derive(Debug, Clone, Default)]
pub struct BridgeConfig {
    /// Datagram transport settings.
    pub datagram: DatagramConfig,
    /// Stream transport settings.
    pub stream: StreamConfig,
    /// Tick loop settings.
    pub tick: TickConfig,
}

impl BridgeConfig {
    /// Builder: set datagram settings.
    pub fn with_datagram(mut self, datagram: DatagramConfig) -> Self {
        self.datagram = datagram;
        self
    }

    /// Builder: set stream settings.
    pub fn with_stream(mut self, stream: StreamConfig) -> Self {
        self.stream = stream;
        self
    }

    /// Builder: set tick settings.
    pub fn with_tick(mut self, tick: TickConfig) -> Self {
        self.tick = tick;
        self
    }
}

/// Datagram transport configuration.
#[derive(Debug, Clone)]
pub struct DatagramConfig {
    /// Local address to bind.
    pub local_host: String,
    /// Local port; 0 picks an ephemeral port.
    pub local_port: u16,
    /// Address of the client.
    pub remote_host: String,
    /// Port of the client until its port file says otherwise.
    pub remote_port: u16,
    /// Where the bridge publishes its bound port.
    pub own_port_file: PathBuf,
    /// Where the client publishes its bound port.
    pub peer_port_file: PathBuf,
    /// Delay between bind attempts while the port is taken.
    pub bind_retry_delay: Duration,
    /// How often the peer port file is checked.
    pub port_file_poll_interval: Duration,
    /// Upper bound for one outbound datagram.
    pub max_datagram_size: usize,
    /// Bytes kept free below the socket send buffer size.
    pub send_buffer_margin: usize,
    /// How long an incomplete chunk set is kept.
    pub reassembly_ttl: Duration,
}

impl Default for DatagramConfig {
    fn default() -> Self {
        Self {
            local_host: "127.0.0.1".to_string(),
            local_port: 0,
            remote_host: "127.0.0.1".to_string(),
            remote_port: 0,
            own_port_file: default_port_file(SERVER_PORT_FILE),
            peer_port_file: default_port_file(CLIENT_PORT_FILE),
            bind_retry_delay: Duration::from_secs(5),
            port_file_poll_interval: Duration::from_millis(500),
            max_datagram_size: DEFAULT_MAX_DATAGRAM_SIZE,
            send_buffer_margin: 512,
            reassembly_ttl: DEFAULT_REASSEMBLY_TTL,
        }
    }
}

impl DatagramConfig {
    /// Builder: set the local bind address.
    pub fn with_local(mut self, host: impl Into<String>, port: u16) -> Self {
        self.local_host = host.into();
        self.local_port = port;
        self
    }

    /// Builder: set the initial remote address.
    pub fn with_remote(mut self, host: impl Into<String>, port: u16) -> Self {
        self.remote_host = host.into();
        self.remote_port = port;
        self
    }

    /// Builder: set both port-file paths.
    pub fn with_port_files(mut self, own: impl Into<PathBuf>, peer: impl Into<PathBuf>) -> Self {
        self.own_port_file = own.into();
        self.peer_port_file = peer.into();
        self
    }

    /// Builder: set the bind retry delay.
    pub fn with_bind_retry_delay(mut self, delay: Duration) -> Self {
        self.bind_retry_delay = delay;
        self
    }

    /// Builder: set the port-file poll interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.port_file_poll_interval = interval;
        self
    }

    /// Builder: set the datagram ceiling.
    pub fn with_max_datagram_size(mut self, size: usize) -> Self {
        self.max_datagram_size = size;
        self
    }

    /// Builder: set the reassembly TTL.
    pub fn with_reassembly_ttl(mut self, ttl: Duration) -> Self {
        self.reassembly_ttl = ttl;
        self
    }
}

/// Stream transport configuration.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Address to listen on.
    pub host: String,
    /// Ports tried in order; the first free one is used.
    pub ports: RangeInclusive<u16>,
    /// How often the accept thread checks for shutdown.
    pub accept_poll_interval: Duration,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            ports: 39031..=39038,
            accept_poll_interval: Duration::from_millis(100),
        }
    }
}

impl StreamConfig {
    /// Builder: set the listen address and port range.
    pub fn with_listen(mut self, host: impl Into<String>, ports: RangeInclusive<u16>) -> Self {
        self.host = host.into();
        self.ports = ports;
        self
    }
}

/// Tick loop configuration.
#[derive(Debug, Clone)]
pub struct TickConfig {
    /// Warn when two ticks are further apart than this.
    pub lag_threshold: Duration,
    /// Warn when one tick takes longer than this.
    pub processing_budget: Duration,
}

impl Default for TickConfig {
    fn default() -> Self {
        Self {
            lag_threshold: Duration::from_millis(200),
            processing_budget: Duration::from_millis(100),
        }
    }
}

/// Returns the path of a port file in the OS temp directory.
pub fn default_port_file(name: &str) -> PathBuf {
    std::env::temp_dir().join(name)
}
