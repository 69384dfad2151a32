//! Telnet transport over a plain TCP stream.
//!
//! Option negotiation is minimal: the device may echo and suppress
//! go-ahead, every other option is refused.

use async_trait::async_trait;
use log::{debug, trace};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::Instant;

use super::{ReadOutcome, Transport};
use crate::error::{Result, TransportError};

const IAC: u8 = 255;
const DONT: u8 = 254;
const DO: u8 = 253;
const WONT: u8 = 252;
const WILL: u8 = 251;
const SB: u8 = 250;
const SE: u8 = 240;

const OPT_ECHO: u8 = 1;
const OPT_SGA: u8 = 3;

/// Telnet transport.
pub struct TelnetTransport {
    stream: Option<TcpStream>,
    codec: TelnetCodec,
}

impl TelnetTransport {
    /// Connect to the device.
    pub async fn connect(host: &str, port: u16, timeout: std::time::Duration) -> Result<Self> {
        debug!("Connecting to {}:{} over Telnet", host, port);
        let stream = tokio::time::timeout(timeout, TcpStream::connect((host, port)))
            .await
            .map_err(|_| TransportError::Timeout(timeout))?
            .map_err(|source| TransportError::ConnectionFailed {
                host: host.to_string(),
                port,
                source,
            })?;
        stream.set_nodelay(true)?;

        Ok(Self {
            stream: Some(stream),
            codec: TelnetCodec::default(),
        })
    }
}

#[async_trait]
impl Transport for TelnetTransport {
    async fn write(&mut self, data: &[u8]) -> Result<()> {
        let stream = self.stream.as_mut().ok_or(TransportError::Disconnected)?;
        stream.write_all(&TelnetCodec::escape(data)).await?;
        Ok(())
    }

    async fn read_available(&mut self, deadline: Instant) -> Result<ReadOutcome> {
        let mut buf = [0u8; 4096];
        loop {
            let stream = self.stream.as_mut().ok_or(TransportError::Disconnected)?;
            let n = match tokio::time::timeout_at(deadline, stream.read(&mut buf)).await {
                Err(_) => return Ok(ReadOutcome::Timeout),
                Ok(Ok(0)) => return Ok(ReadOutcome::Closed),
                Ok(Ok(n)) => n,
                Ok(Err(e)) if e.kind() == std::io::ErrorKind::ConnectionReset => {
                    return Ok(ReadOutcome::Closed);
                }
                Ok(Err(e)) => return Err(TransportError::Io(e).into()),
            };

            let (data, replies) = self.codec.decode(&buf[..n]);
            if !replies.is_empty() {
                trace!("Telnet negotiation reply: {:?}", replies);
                stream.write_all(&replies).await?;
            }
            if !data.is_empty() {
                return Ok(ReadOutcome::Data(data));
            }
        }
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(mut stream) = self.stream.take() {
            let _ = stream.shutdown().await;
        }
        Ok(())
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
enum State {
    #[default]
    Data,
    Iac,
    Option(u8),
    Sub,
    SubIac,
}

/// Incremental Telnet stream decoder.
#[derive(Debug, Default)]
struct TelnetCodec {
    state: State,
}

impl TelnetCodec {
    /// Split incoming bytes into user data and negotiation replies.
    fn decode(&mut self, input: &[u8]) -> (Vec<u8>, Vec<u8>) {
        let mut data = Vec::with_capacity(input.len());
        let mut replies = Vec::new();

        for &byte in input {
            self.state = match (self.state, byte) {
                (State::Data, IAC) => State::Iac,
                (State::Data, b) => {
                    data.push(b);
                    State::Data
                }
                (State::Iac, IAC) => {
                    data.push(IAC);
                    State::Data
                }
                (State::Iac, cmd @ (DO | DONT | WILL | WONT)) => State::Option(cmd),
                (State::Iac, SB) => State::Sub,
                (State::Iac, _) => State::Data,
                (State::Option(cmd), option) => {
                    match cmd {
                        WILL if option == OPT_ECHO || option == OPT_SGA => {
                            replies.extend_from_slice(&[IAC, DO, option])
                        }
                        WILL => replies.extend_from_slice(&[IAC, DONT, option]),
                        DO => replies.extend_from_slice(&[IAC, WONT, option]),
                        _ => {}
                    }
                    State::Data
                }
                (State::Sub, IAC) => State::SubIac,
                (State::Sub, _) => State::Sub,
                (State::SubIac, SE) => State::Data,
                (State::SubIac, _) => State::Sub,
            };
        }

        (data, replies)
    }

    /// Escape IAC bytes in outgoing data.
    fn escape(data: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(data.len());
        for &b in data {
            out.push(b);
            if b == IAC {
                out.push(IAC);
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_negotiation_replies() {
        let mut codec = TelnetCodec::default();
        let (data, replies) = codec.decode(&[IAC, WILL, OPT_ECHO, IAC, DO, 24, b'h', b'i']);
        assert_eq!(data, b"hi");
        assert_eq!(replies, vec![IAC, DO, OPT_ECHO, IAC, WONT, 24]);
    }

    #[test]
    fn test_split_sequences() {
        let mut codec = TelnetCodec::default();
        let (data, replies) = codec.decode(&[b'a', IAC]);
        assert_eq!(data, b"a");
        assert!(replies.is_empty());

        let (data, replies) = codec.decode(&[WILL, 5, b'b']);
        assert_eq!(data, b"b");
        assert_eq!(replies, vec![IAC, DONT, 5]);
    }

    #[test]
    fn test_subnegotiation_skipped() {
        let mut codec = TelnetCodec::default();
        let (data, _) = codec.decode(&[IAC, SB, 24, 1, IAC, SE, b'x', IAC, IAC]);
        assert_eq!(data, vec![b'x', IAC]);
    }

    #[test]
    fn test_escape() {
        assert_eq!(TelnetCodec::escape(&[1, IAC, 2]), vec![1, IAC, IAC, 2]);
    }
}
