//! Port files used for datagram peer discovery.
//!
//! Each side of a datagram pairing writes its bound port to a well-known
//! file in the temp directory and polls the other side's file.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::error::ServerResult;

/// A port file owned by this process.
///
/// Written on creation and removed on drop.
#[derive(Debug)]
pub struct PortFile {
    path: PathBuf,
    port: u16,
}

impl PortFile {
    /// Writes `port` to `path`, replacing any previous content.
    pub fn create(path: impl Into<PathBuf>, port: u16) -> ServerResult<Self> {
        let path = path.into();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            fs::create_dir_all(parent)?;
        }

        let mut file = File::create(&path)?;
        writeln!(file, "{port}")?;
        file.sync_all()?;

        info!(path = %path.display(), port, "Wrote port file");

        Ok(Self { path, port })
    }

    /// Returns the path to the port file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the port written to the file.
    pub fn port(&self) -> u16 {
        self.port
    }
}

impl Drop for PortFile {
    fn drop(&mut self) {
        // Leave the file alone if another process has taken it over.
        if read_port(&self.path) != Some(self.port) {
            return;
        }
        if let Err(e) = fs::remove_file(&self.path) {
            warn!(
                path = %self.path.display(),
                error = %e,
                "Failed to remove port file"
            );
        } else {
            debug!(path = %self.path.display(), "Removed port file");
        }
    }
}

/// Reads a port number from a port file.
///
/// Returns `None` if the file is missing or does not hold a port.
pub fn read_port(path: &Path) -> Option<u16> {
    let contents = fs::read_to_string(path).ok()?;
    contents.trim().parse().ok().filter(|port| *port != 0)
}

/// Polls a peer's port file at a fixed interval and reports changes.
#[derive(Debug)]
pub struct PortFileWatcher {
    path: PathBuf,
    interval: Duration,
    last_port: Option<u16>,
    next_check: Option<Instant>,
}

impl PortFileWatcher {
    /// Creates a watcher; the first poll always reads the file.
    pub fn new(path: impl Into<PathBuf>, interval: Duration) -> Self {
        Self {
            path: path.into(),
            interval,
            last_port: None,
            next_check: None,
        }
    }

    /// Returns the last port seen.
    pub fn last_port(&self) -> Option<u16> {
        self.last_port
    }

    /// Returns the path being watched.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the file if the interval has elapsed.
    ///
    /// Returns the new port when it differs from the last one seen.
    pub fn poll(&mut self, now: Instant) -> Option<u16> {
        if self.next_check.is_some_and(|next| now < next) {
            return None;
        }
        self.next_check = Some(now + self.interval);

        let port = read_port(&self.path)?;
        if self.last_port == Some(port) {
            return None;
        }
        debug!(path = %self.path.display(), port, previous = ?self.last_port, "Peer port changed");
        self.last_port = Some(port);
        Some(port)
    }
}
