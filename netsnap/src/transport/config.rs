//! SSH connection settings.

use std::path::PathBuf;

use serde::Deserialize;

/// Host key verification mode, analogous to OpenSSH's `StrictHostKeyChecking`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HostKeyVerification {
    /// Reject unknown and changed keys. Connection fails if the host
    /// is not already in known_hosts.
    Strict,

    /// Accept and auto-learn unknown keys, but reject changed keys.
    #[default]
    AcceptNew,

    /// Accept all keys without checking. For testing and lab use only.
    Disabled,
}

/// SSH settings shared by every session the engine opens.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SshSettings {
    /// Terminal width for the PTY.
    pub terminal_width: u32,

    /// Terminal height for the PTY.
    pub terminal_height: u32,

    /// Terminal type announced to the device.
    pub terminal_type: String,

    /// Host key verification mode.
    pub host_key_verification: HostKeyVerification,

    /// Path to the known_hosts file; the user's default when `None`.
    pub known_hosts_path: Option<PathBuf>,
}

impl Default for SshSettings {
    fn default() -> Self {
        Self {
            terminal_width: 511,
            terminal_height: 24,
            terminal_type: "vt100".to_string(),
            host_key_verification: HostKeyVerification::AcceptNew,
            known_hosts_path: None,
        }
    }
}

impl SshSettings {
    /// Set the host key verification mode.
    pub fn host_key_verification(mut self, mode: HostKeyVerification) -> Self {
        self.host_key_verification = mode;
        self
    }

    /// Use a specific known_hosts file.
    pub fn known_hosts_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.known_hosts_path = Some(path.into());
        self
    }

    /// Set the PTY dimensions.
    pub fn terminal_size(mut self, width: u32, height: u32) -> Self {
        self.terminal_width = width;
        self.terminal_height = height;
        self
    }
}
