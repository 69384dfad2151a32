//! SSH transport implementation using russh.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, warn};
use russh::client::{self, Handle, Msg};
use russh::keys::{PrivateKeyWithHashAlg, PublicKey, load_secret_key};
use russh::{Channel, ChannelMsg};
use russh_sftp::client::SftpSession;
use secrecy::ExposeSecret;
use tokio::io::AsyncWriteExt;
use tokio::time::Instant;

use super::config::{HostKeyVerification, SshSettings};
use super::{DownloadMethod, ReadOutcome, Transport};
use crate::error::{Result, TransportError};
use crate::session::Credentials;

/// SSH transport: one russh connection with an interactive PTY shell.
pub struct SshTransport {
    /// The russh session handle.
    session: Handle<SshHandler>,

    /// The interactive shell channel.
    channel: Channel<Msg>,

    /// Whether close() already ran.
    closed: bool,
}

impl SshTransport {
    /// Connect, authenticate and open the interactive shell.
    pub async fn connect(
        host: &str,
        port: u16,
        credentials: &Credentials,
        settings: &SshSettings,
        timeout: Duration,
    ) -> Result<Self> {
        let ssh_config = Arc::new(client::Config {
            inactivity_timeout: None,
            ..Default::default()
        });

        let host_key_error: Arc<Mutex<Option<TransportError>>> = Arc::new(Mutex::new(None));

        let handler = SshHandler {
            host: host.to_string(),
            port,
            host_key_verification: settings.host_key_verification.clone(),
            known_hosts_path: settings.known_hosts_path.clone(),
            host_key_error: host_key_error.clone(),
        };

        debug!("Connecting to {}:{} over SSH", host, port);
        let mut session = tokio::time::timeout(timeout, client::connect(ssh_config, (host, port), handler))
            .await
            .map_err(|_| TransportError::Timeout(timeout))?
            .map_err(|e| {
                // Prefer the detailed host-key error over russh's generic one
                let stored = host_key_error.lock().ok().and_then(|mut slot| slot.take());
                stored.unwrap_or(TransportError::Ssh(e))
            })?;

        tokio::time::timeout(timeout, Self::authenticate(&mut session, credentials))
            .await
            .map_err(|_| TransportError::Timeout(timeout))??;

        let channel = Self::open_shell(&session, settings).await?;

        Ok(Self {
            session,
            channel,
            closed: false,
        })
    }

    /// Open a PTY channel and request a shell on it.
    async fn open_shell(session: &Handle<SshHandler>, settings: &SshSettings) -> Result<Channel<Msg>> {
        let channel = session
            .channel_open_session()
            .await
            .map_err(TransportError::Ssh)?;

        channel
            .request_pty(
                true,
                &settings.terminal_type,
                settings.terminal_width,
                settings.terminal_height,
                0,
                0,
                &[],
            )
            .await
            .map_err(TransportError::Ssh)?;

        channel
            .request_shell(true)
            .await
            .map_err(TransportError::Ssh)?;

        Ok(channel)
    }

    /// Authenticate with the server.
    async fn authenticate(session: &mut Handle<SshHandler>, credentials: &Credentials) -> Result<()> {
        let username = credentials.username();
        let success = match credentials.private_key() {
            Some(path) => {
                let passphrase = credentials.key_passphrase().map(|p| p.expose_secret().to_string());
                let key = load_secret_key(path, passphrase.as_deref())
                    .map_err(|e| TransportError::Key(e.to_string()))?;

                let hash_alg = session
                    .best_supported_rsa_hash()
                    .await
                    .map_err(TransportError::Ssh)?
                    .flatten();

                session
                    .authenticate_publickey(username, PrivateKeyWithHashAlg::new(Arc::new(key), hash_alg))
                    .await
                    .map_err(TransportError::Ssh)?
                    .success()
            }
            None => session
                .authenticate_password(username, credentials.password().expose_secret())
                .await
                .map_err(TransportError::Ssh)?
                .success(),
        };

        if !success {
            return Err(TransportError::AuthenticationFailed {
                user: username.to_string(),
            }
            .into());
        }

        Ok(())
    }

    async fn download_sftp(&self, remote: &str, local: &Path) -> Result<u64> {
        let channel = self
            .session
            .channel_open_session()
            .await
            .map_err(TransportError::Ssh)?;
        channel
            .request_subsystem(true, "sftp")
            .await
            .map_err(TransportError::Ssh)?;

        let sftp = SftpSession::new(channel.into_stream())
            .await
            .map_err(|e| TransportError::Sftp(e.to_string()))?;
        let mut remote_file = sftp
            .open(remote)
            .await
            .map_err(|e| TransportError::Sftp(e.to_string()))?;
        let mut local_file = tokio::fs::File::create(local).await?;
        let copied = tokio::io::copy(&mut remote_file, &mut local_file).await?;
        local_file.flush().await?;

        if let Err(e) = sftp.close().await {
            debug!("Error while closing SFTP session: {}", e);
        }
        Ok(copied)
    }

    /// Fetch a file with the SCP sink protocol (`scp -f`).
    async fn download_scp(&self, remote: &str, local: &Path) -> Result<u64> {
        let mut channel = self
            .session
            .channel_open_session()
            .await
            .map_err(TransportError::Ssh)?;
        let quoted = remote.replace('\'', "'\\''");
        channel
            .exec(true, format!("scp -f '{quoted}'"))
            .await
            .map_err(TransportError::Ssh)?;

        channel.data(&b"\0"[..]).await.map_err(TransportError::Ssh)?;

        let mut pending: Vec<u8> = Vec::new();
        let mut local_file: Option<tokio::fs::File> = None;
        let mut expected: u64 = 0;
        let mut written: u64 = 0;

        loop {
            let Some(msg) = channel.wait().await else {
                return Err(TransportError::Scp("channel closed before transfer completed".into()).into());
            };
            let data = match msg {
                ChannelMsg::Data { data } => data.to_vec(),
                ChannelMsg::ExtendedData { data, .. } => {
                    return Err(TransportError::Scp(String::from_utf8_lossy(&data).trim().to_string()).into());
                }
                ChannelMsg::Eof | ChannelMsg::Close => {
                    return Err(TransportError::Scp("unexpected end of stream".into()).into());
                }
                _ => continue,
            };
            pending.extend_from_slice(&data);

            if local_file.is_none() {
                let Some(eol) = memchr::memchr(b'\n', &pending) else {
                    continue;
                };
                let header: Vec<u8> = pending.drain(..=eol).collect();
                expected = parse_scp_header(&header)?;
                local_file = Some(tokio::fs::File::create(local).await?);
                channel.data(&b"\0"[..]).await.map_err(TransportError::Ssh)?;
            }

            if let Some(file) = local_file.as_mut() {
                let want = (expected - written) as usize;
                let take = want.min(pending.len());
                file.write_all(&pending[..take]).await?;
                written += take as u64;
                pending.drain(..take);

                if written == expected && !pending.is_empty() {
                    // Status byte following the payload
                    if pending[0] != 0 {
                        return Err(TransportError::Scp("remote reported a transfer error".into()).into());
                    }
                    file.flush().await?;
                    channel.data(&b"\0"[..]).await.map_err(TransportError::Ssh)?;
                    let _ = channel.eof().await;
                    return Ok(written);
                }
            }
        }
    }
}

/// Parse an SCP `C<mode> <size> <name>` header, returning the size.
fn parse_scp_header(header: &[u8]) -> Result<u64> {
    let text = String::from_utf8_lossy(header);
    let text = text.trim_end();
    match text.as_bytes().first() {
        Some(b'C') => {}
        Some(1) | Some(2) => {
            return Err(TransportError::Scp(text[1..].trim().to_string()).into());
        }
        _ => return Err(TransportError::Scp(format!("unexpected header '{text}'")).into()),
    }
    text.split_whitespace()
        .nth(1)
        .and_then(|size| size.parse::<u64>().ok())
        .ok_or_else(|| TransportError::Scp(format!("invalid header '{text}'")).into())
}

#[async_trait]
impl Transport for SshTransport {
    async fn write(&mut self, data: &[u8]) -> Result<()> {
        self.channel.data(data).await.map_err(TransportError::Ssh)?;
        Ok(())
    }

    async fn read_available(&mut self, deadline: Instant) -> Result<ReadOutcome> {
        loop {
            let msg = match tokio::time::timeout_at(deadline, self.channel.wait()).await {
                Err(_) => return Ok(ReadOutcome::Timeout),
                Ok(msg) => msg,
            };
            match msg {
                Some(ChannelMsg::Data { data }) => return Ok(ReadOutcome::Data(data.to_vec())),
                Some(ChannelMsg::ExtendedData { data, .. }) => {
                    return Ok(ReadOutcome::Data(data.to_vec()));
                }
                Some(ChannelMsg::Eof) | Some(ChannelMsg::Close) | None => {
                    return Ok(ReadOutcome::Closed);
                }
                Some(_) => continue,
            }
        }
    }

    async fn download(&mut self, method: DownloadMethod, remote: &str, local: &Path) -> Result<u64> {
        debug!("Downloading '{}' over {}", remote, method);
        match method {
            DownloadMethod::Sftp => self.download_sftp(remote, local).await,
            DownloadMethod::Scp => self.download_scp(remote, local).await,
        }
    }

    async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        let _ = self.channel.close().await;
        self.session
            .disconnect(russh::Disconnect::ByApplication, "", "en")
            .await
            .map_err(TransportError::Ssh)?;
        Ok(())
    }
}

/// SSH client handler for russh.
struct SshHandler {
    host: String,
    port: u16,
    host_key_verification: HostKeyVerification,
    known_hosts_path: Option<PathBuf>,
    /// Detailed host-key error surfaced by connect().
    host_key_error: Arc<Mutex<Option<TransportError>>>,
}

impl SshHandler {
    /// Check the host key against known_hosts.
    ///
    /// Returns `Ok(true)` if matched, `Ok(false)` if the host is unknown.
    fn check_known_hosts(&self, pubkey: &PublicKey) -> std::result::Result<bool, TransportError> {
        let result = if let Some(ref path) = self.known_hosts_path {
            russh::keys::check_known_hosts_path(&self.host, self.port, pubkey, path)
        } else {
            russh::keys::check_known_hosts(&self.host, self.port, pubkey)
        };

        match result {
            Ok(matched) => Ok(matched),
            Err(russh::keys::Error::KeyChanged { line }) => Err(TransportError::HostKeyChanged {
                host: self.host.clone(),
                port: self.port,
                line,
            }),
            Err(e) => Err(TransportError::KnownHosts(e.to_string())),
        }
    }

    /// Save a new host key to known_hosts.
    fn learn_host_key(&self, pubkey: &PublicKey) -> std::result::Result<(), TransportError> {
        let result = if let Some(ref path) = self.known_hosts_path {
            russh::keys::known_hosts::learn_known_hosts_path(&self.host, self.port, pubkey, path)
        } else {
            russh::keys::known_hosts::learn_known_hosts(&self.host, self.port, pubkey)
        };

        result.map_err(|e| TransportError::KnownHosts(e.to_string()))
    }

    fn reject(&self, error: TransportError) -> bool {
        if let Ok(mut slot) = self.host_key_error.lock() {
            *slot = Some(error);
        }
        false
    }
}

impl client::Handler for SshHandler {
    type Error = russh::Error;

    async fn check_server_key(&mut self, server_public_key: &PublicKey) -> std::result::Result<bool, Self::Error> {
        match self.host_key_verification {
            HostKeyVerification::Disabled => Ok(true),

            HostKeyVerification::AcceptNew => match self.check_known_hosts(server_public_key) {
                Ok(true) => Ok(true),
                Ok(false) => {
                    if let Err(e) = self.learn_host_key(server_public_key) {
                        warn!("Failed to save host key: {}", e);
                    }
                    Ok(true)
                }
                Err(e) => Ok(self.reject(e)),
            },

            HostKeyVerification::Strict => match self.check_known_hosts(server_public_key) {
                Ok(true) => Ok(true),
                Ok(false) => Ok(self.reject(TransportError::HostKeyUnknown {
                    host: self.host.clone(),
                    port: self.port,
                })),
                Err(e) => Ok(self.reject(e)),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_scp_header() {
        assert_eq!(parse_scp_header(b"C0644 1234 startup-config\n").unwrap(), 1234);
        assert!(parse_scp_header(b"\x01scp: /nope: No such file\n").is_err());
        assert!(parse_scp_header(b"D0755 0 dir\n").is_err());
    }
}
