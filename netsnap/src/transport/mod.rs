//! Transport layer: byte-stream sessions to devices.
//!
//! The engine only depends on the [`Transport`] contract: write bytes, read
//! whatever is available before a deadline, close. SSH (russh) and Telnet
//! implementations are provided, plus a [`ScriptedTransport`] that replays
//! canned device output for offline driver testing.

pub mod config;
mod scripted;
mod ssh;
mod telnet;

use std::fmt;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::error::{Result, TransportError};
use crate::session::Credentials;

pub use config::{HostKeyVerification, SshSettings};
pub use scripted::{ScriptedConnector, ScriptedHandle, ScriptedTransport, SessionGauge};
pub use ssh::SshTransport;
pub use telnet::TelnetTransport;

/// Kind of interactive transport used to reach a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    Ssh,
    Telnet,
}

impl TransportKind {
    /// The descriptor mode a fresh session of this kind starts in.
    pub fn initial_mode(&self) -> &'static str {
        match self {
            TransportKind::Ssh => "ssh",
            TransportKind::Telnet => "telnet",
        }
    }

    /// Standard port for this transport.
    pub fn default_port(&self) -> u16 {
        match self {
            TransportKind::Ssh => 22,
            TransportKind::Telnet => 23,
        }
    }

    /// All supported transport kinds.
    pub fn all() -> [TransportKind; 2] {
        [TransportKind::Ssh, TransportKind::Telnet]
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.initial_mode())
    }
}

/// Network identity of a device.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceTarget {
    /// Stable device identifier, used for per-device exclusivity.
    pub id: String,

    /// Hostname or IP address.
    pub address: String,

    /// Port override; the transport's default port when `None`.
    #[serde(default)]
    pub port: Option<u16>,

    /// Transport kind.
    pub transport: TransportKind,
}

impl DeviceTarget {
    /// Create a target using the transport's default port.
    pub fn new(id: impl Into<String>, address: impl Into<String>, transport: TransportKind) -> Self {
        Self {
            id: id.into(),
            address: address.into(),
            port: None,
            transport,
        }
    }

    /// Override the port.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// The port to connect to.
    pub fn port(&self) -> u16 {
        self.port.unwrap_or_else(|| self.transport.default_port())
    }
}

/// Result of one non-blocking read attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
    /// Bytes received from the device.
    Data(Vec<u8>),

    /// Nothing arrived before the deadline.
    Timeout,

    /// The remote side closed the session.
    Closed,
}

/// Secondary channel used to fetch files from a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DownloadMethod {
    #[default]
    Sftp,
    Scp,
}

impl fmt::Display for DownloadMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DownloadMethod::Sftp => f.write_str("sftp"),
            DownloadMethod::Scp => f.write_str("scp"),
        }
    }
}

/// An open interactive session with a device.
#[async_trait]
pub trait Transport: Send {
    /// Send raw bytes to the device.
    async fn write(&mut self, data: &[u8]) -> Result<()>;

    /// Wait for output until `deadline`.
    async fn read_available(&mut self, deadline: Instant) -> Result<ReadOutcome>;

    /// Fetch a remote file into `local` over a secondary channel.
    ///
    /// Returns the number of bytes written.
    async fn download(&mut self, method: DownloadMethod, remote: &str, local: &Path) -> Result<u64> {
        let _ = (remote, local);
        Err(TransportError::Unsupported(format!("{method} download")).into())
    }

    /// Close the session. Must be safe to call more than once.
    async fn close(&mut self) -> Result<()>;
}

/// Opens transports to devices.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Connect and authenticate at the transport level.
    async fn connect(
        &self,
        target: &DeviceTarget,
        credentials: &Credentials,
        timeout: Duration,
    ) -> Result<Box<dyn Transport>>;
}

/// Connector for real devices, choosing SSH or Telnet from the target.
#[derive(Debug, Clone, Default)]
pub struct NetworkConnector {
    ssh: SshSettings,
}

impl NetworkConnector {
    /// Create a connector using the given SSH settings.
    pub fn new(ssh: SshSettings) -> Self {
        Self { ssh }
    }
}

#[async_trait]
impl Connector for NetworkConnector {
    async fn connect(
        &self,
        target: &DeviceTarget,
        credentials: &Credentials,
        timeout: Duration,
    ) -> Result<Box<dyn Transport>> {
        match target.transport {
            TransportKind::Ssh => {
                let transport = SshTransport::connect(
                    &target.address,
                    target.port(),
                    credentials,
                    &self.ssh,
                    timeout,
                )
                .await?;
                Ok(Box::new(transport))
            }
            TransportKind::Telnet => {
                let transport =
                    TelnetTransport::connect(&target.address, target.port(), timeout).await?;
                Ok(Box::new(transport))
            }
        }
    }
}
