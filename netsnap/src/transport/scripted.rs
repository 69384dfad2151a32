//! In-memory replay transport.
//!
//! A [`ScriptedTransport`] plays the device side of a conversation from a
//! list of rules: when the engine writes a line matching a rule's trigger,
//! the rule's response chunks are queued and handed out one per read. It is
//! used to exercise drivers without a device and by this crate's own tests.

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::time::Instant;

use super::{Connector, DeviceTarget, DownloadMethod, ReadOutcome, Transport};
use crate::error::{Result, TransportError};
use crate::session::Credentials;

#[derive(Debug, Clone)]
struct Rule {
    trigger: Vec<u8>,
    response: Vec<Bytes>,
    repeat: bool,
    disconnect: bool,
    used: bool,
}

/// Counts open sessions, tracking the peak and per-device overlap.
#[derive(Debug, Default)]
pub struct SessionGauge {
    open: AtomicUsize,
    peak: AtomicUsize,
    per_device: Mutex<HashMap<String, usize>>,
    device_overlap: AtomicUsize,
}

impl SessionGauge {
    /// Create a shared gauge.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn opened(&self, device: &str) {
        let now = self.open.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        if let Ok(mut map) = self.per_device.lock() {
            let count = map.entry(device.to_string()).or_insert(0);
            *count += 1;
            if *count > 1 {
                self.device_overlap.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    fn closed(&self, device: &str) {
        self.open.fetch_sub(1, Ordering::SeqCst);
        if let Ok(mut map) = self.per_device.lock() {
            if let Some(count) = map.get_mut(device) {
                *count = count.saturating_sub(1);
            }
        }
    }

    /// Sessions currently open.
    pub fn open(&self) -> usize {
        self.open.load(Ordering::SeqCst)
    }

    /// Highest number of sessions open at the same time.
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    /// Number of times a session opened while another one to the same
    /// device was still open.
    pub fn device_overlaps(&self) -> usize {
        self.device_overlap.load(Ordering::SeqCst)
    }
}

/// Observer for a [`ScriptedTransport`] after it has been moved into a session.
#[derive(Debug, Clone, Default)]
pub struct ScriptedHandle {
    writes: Arc<Mutex<Vec<Vec<u8>>>>,
    closed: Arc<AtomicUsize>,
}

impl ScriptedHandle {
    /// Every write the engine made, in order.
    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.writes.lock().map(|w| w.clone()).unwrap_or_default()
    }

    /// Writes as lossy strings.
    pub fn written_lines(&self) -> Vec<String> {
        self.writes()
            .iter()
            .map(|w| String::from_utf8_lossy(w).into_owned())
            .collect()
    }

    /// Whether the transport was closed.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst) > 0
    }
}

/// Replay transport driven by write-triggered rules.
#[derive(Debug)]
pub struct ScriptedTransport {
    pending: VecDeque<Bytes>,
    rules: Vec<Rule>,
    files: HashMap<String, Bytes>,
    handle: ScriptedHandle,
    gauge: Option<(Arc<SessionGauge>, String)>,
    disconnected: bool,
    chunk_delay: Option<Duration>,
}

impl ScriptedTransport {
    /// Create a transport whose device has sent nothing yet.
    pub fn new() -> Self {
        Self {
            pending: VecDeque::new(),
            rules: Vec::new(),
            files: HashMap::new(),
            handle: ScriptedHandle::default(),
            gauge: None,
            disconnected: false,
            chunk_delay: None,
        }
    }

    /// Output the device sends right after connecting.
    pub fn greeting(mut self, output: impl AsRef<[u8]>) -> Self {
        self.pending.push_back(Bytes::copy_from_slice(output.as_ref()));
        self
    }

    /// Reply once to an exact write.
    pub fn reply(self, trigger: impl AsRef<[u8]>, response: impl AsRef<[u8]>) -> Self {
        self.reply_chunks(trigger, [response])
    }

    /// Reply once to an exact write, delivering each chunk as a separate read.
    pub fn reply_chunks<I, C>(mut self, trigger: impl AsRef<[u8]>, chunks: I) -> Self
    where
        I: IntoIterator<Item = C>,
        C: AsRef<[u8]>,
    {
        self.rules.push(Rule {
            trigger: trigger.as_ref().to_vec(),
            response: chunks
                .into_iter()
                .map(|c| Bytes::copy_from_slice(c.as_ref()))
                .collect(),
            repeat: false,
            disconnect: false,
            used: false,
        });
        self
    }

    /// Reply to every occurrence of an exact write.
    pub fn reply_always(mut self, trigger: impl AsRef<[u8]>, response: impl AsRef<[u8]>) -> Self {
        self.rules.push(Rule {
            trigger: trigger.as_ref().to_vec(),
            response: vec![Bytes::copy_from_slice(response.as_ref())],
            repeat: true,
            disconnect: false,
            used: false,
        });
        self
    }

    /// Drop the connection when this write is seen.
    pub fn disconnect_on(mut self, trigger: impl AsRef<[u8]>) -> Self {
        self.rules.push(Rule {
            trigger: trigger.as_ref().to_vec(),
            response: Vec::new(),
            repeat: false,
            disconnect: true,
            used: false,
        });
        self
    }

    /// Make a file available to `download`.
    pub fn file(mut self, remote: impl Into<String>, content: impl AsRef<[u8]>) -> Self {
        self.files
            .insert(remote.into(), Bytes::copy_from_slice(content.as_ref()));
        self
    }

    /// Wait this long before delivering each chunk.
    pub fn chunk_delay(mut self, delay: Duration) -> Self {
        self.chunk_delay = Some(delay);
        self
    }

    /// Observer that stays valid after the transport is moved.
    pub fn handle(&self) -> ScriptedHandle {
        self.handle.clone()
    }

    /// Register this session with a gauge under a device id.
    pub fn with_gauge(mut self, gauge: Arc<SessionGauge>, device: impl Into<String>) -> Self {
        let device = device.into();
        gauge.opened(&device);
        self.gauge = Some((gauge, device));
        self
    }

    fn release_gauge(&mut self) {
        if let Some((gauge, device)) = self.gauge.take() {
            gauge.closed(&device);
        }
    }
}

impl Default for ScriptedTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ScriptedTransport {
    fn drop(&mut self) {
        self.release_gauge();
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn write(&mut self, data: &[u8]) -> Result<()> {
        if self.disconnected {
            return Err(TransportError::Disconnected.into());
        }
        if let Ok(mut writes) = self.handle.writes.lock() {
            writes.push(data.to_vec());
        }

        let rule = self
            .rules
            .iter_mut()
            .find(|r| r.trigger == data && (r.repeat || !r.used));
        if let Some(rule) = rule {
            rule.used = true;
            if rule.disconnect {
                self.disconnected = true;
            } else {
                self.pending.extend(rule.response.iter().cloned());
            }
        }
        Ok(())
    }

    async fn read_available(&mut self, deadline: Instant) -> Result<ReadOutcome> {
        if let Some(chunk) = self.pending.pop_front() {
            if let Some(delay) = self.chunk_delay {
                let ready = Instant::now() + delay;
                if ready > deadline {
                    self.pending.push_front(chunk);
                    tokio::time::sleep_until(deadline).await;
                    return Ok(ReadOutcome::Timeout);
                }
                tokio::time::sleep_until(ready).await;
            }
            return Ok(ReadOutcome::Data(chunk.to_vec()));
        }
        if self.disconnected {
            return Ok(ReadOutcome::Closed);
        }
        tokio::time::sleep_until(deadline).await;
        Ok(ReadOutcome::Timeout)
    }

    async fn download(&mut self, _method: DownloadMethod, remote: &str, local: &Path) -> Result<u64> {
        let content = self
            .files
            .get(remote)
            .cloned()
            .ok_or_else(|| TransportError::Sftp(format!("no such file '{remote}'")))?;
        tokio::fs::write(local, &content).await?;
        Ok(content.len() as u64)
    }

    async fn close(&mut self) -> Result<()> {
        self.closed_once();
        self.release_gauge();
        Ok(())
    }
}

impl ScriptedTransport {
    fn closed_once(&self) {
        self.handle.closed.fetch_add(1, Ordering::SeqCst);
    }
}

type TransportFactory = dyn Fn(&DeviceTarget) -> ScriptedTransport + Send + Sync;

/// Connector handing out scripted transports built per target.
pub struct ScriptedConnector {
    factory: Box<TransportFactory>,
    gauge: Arc<SessionGauge>,
    failures: AtomicUsize,
    attempts: AtomicUsize,
    connect_delay: Option<Duration>,
}

impl ScriptedConnector {
    /// Create a connector from a transport factory.
    pub fn new<F>(factory: F) -> Self
    where
        F: Fn(&DeviceTarget) -> ScriptedTransport + Send + Sync + 'static,
    {
        Self {
            factory: Box::new(factory),
            gauge: SessionGauge::new(),
            failures: AtomicUsize::new(0),
            attempts: AtomicUsize::new(0),
            connect_delay: None,
        }
    }

    /// Refuse the next `count` connection attempts.
    pub fn fail_first(self, count: usize) -> Self {
        self.failures.store(count, Ordering::SeqCst);
        self
    }

    /// Delay each connection attempt.
    pub fn connect_delay(mut self, delay: Duration) -> Self {
        self.connect_delay = Some(delay);
        self
    }

    /// Gauge shared by every transport this connector opened.
    pub fn gauge(&self) -> Arc<SessionGauge> {
        self.gauge.clone()
    }

    /// Number of connection attempts so far.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    async fn connect(
        &self,
        target: &DeviceTarget,
        _credentials: &Credentials,
        _timeout: Duration,
    ) -> Result<Box<dyn Transport>> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.connect_delay {
            tokio::time::sleep(delay).await;
        }
        let refuse = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refuse {
            return Err(TransportError::ConnectionFailed {
                host: target.address.clone(),
                port: target.port(),
                source: std::io::Error::from(std::io::ErrorKind::ConnectionRefused),
            }
            .into());
        }
        let transport = (self.factory)(target).with_gauge(self.gauge.clone(), target.id.clone());
        Ok(Box::new(transport))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn soon() -> Instant {
        Instant::now() + Duration::from_millis(20)
    }

    #[tokio::test]
    async fn test_greeting_then_rules() {
        let mut transport = ScriptedTransport::new()
            .greeting("router>")
            .reply("enable\n", "router#");
        let handle = transport.handle();

        assert_eq!(
            transport.read_available(soon()).await.unwrap(),
            ReadOutcome::Data(b"router>".to_vec())
        );
        assert_eq!(transport.read_available(soon()).await.unwrap(), ReadOutcome::Timeout);

        transport.write(b"enable\n").await.unwrap();
        assert_eq!(
            transport.read_available(soon()).await.unwrap(),
            ReadOutcome::Data(b"router#".to_vec())
        );

        // One-shot rules do not fire twice
        transport.write(b"enable\n").await.unwrap();
        assert_eq!(transport.read_available(soon()).await.unwrap(), ReadOutcome::Timeout);
        assert_eq!(handle.written_lines(), vec!["enable\n", "enable\n"]);
    }

    #[tokio::test]
    async fn test_disconnect_rule() {
        let mut transport = ScriptedTransport::new().disconnect_on("reload\n");
        transport.write(b"reload\n").await.unwrap();
        assert_eq!(transport.read_available(soon()).await.unwrap(), ReadOutcome::Closed);
        assert!(transport.write(b"x").await.is_err());
    }

    #[tokio::test]
    async fn test_gauge_counts_open_sessions() {
        let gauge = SessionGauge::new();
        let mut a = ScriptedTransport::new().with_gauge(gauge.clone(), "r1");
        let b = ScriptedTransport::new().with_gauge(gauge.clone(), "r2");
        assert_eq!(gauge.open(), 2);
        a.close().await.unwrap();
        drop(b);
        assert_eq!(gauge.open(), 0);
        assert_eq!(gauge.peak(), 2);
        assert_eq!(gauge.device_overlaps(), 0);
    }
}
