//! Per-task debug trace.
//!
//! The trace is what a driver author sees when a snapshot misbehaves: the
//! commands sent, the modes reached and whatever the script itself logged.
//! Every entry is redacted before it is stored.

use std::sync::{Arc, Mutex};
use std::time::Instant;

use log::trace;

use super::credentials::Credentials;

#[derive(Debug)]
struct TraceInner {
    started: Instant,
    lines: Vec<String>,
}

/// Shared, append-only debug trace of one task.
#[derive(Debug, Clone)]
pub struct DebugTrace {
    inner: Arc<Mutex<TraceInner>>,
    credentials: Option<Credentials>,
}

impl DebugTrace {
    /// Create an empty trace.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(TraceInner {
                started: Instant::now(),
                lines: Vec::new(),
            })),
            credentials: None,
        }
    }

    /// Redact these credentials from every entry.
    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Append an entry.
    pub fn push(&self, message: impl AsRef<str>) {
        let message = match &self.credentials {
            Some(creds) => creds.redact(message.as_ref()),
            None => message.as_ref().to_string(),
        };
        trace!("{}", message);
        if let Ok(mut inner) = self.inner.lock() {
            let elapsed = inner.started.elapsed();
            inner
                .lines
                .push(format!("[{:>9.3}s] {}", elapsed.as_secs_f64(), message));
        }
    }

    /// All entries so far.
    pub fn lines(&self) -> Vec<String> {
        self.inner
            .lock()
            .map(|inner| inner.lines.clone())
            .unwrap_or_default()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.inner.lock().map(|inner| inner.lines.len()).unwrap_or(0)
    }

    /// Whether the trace is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether any entry contains `needle`.
    pub fn contains(&self, needle: &str) -> bool {
        self.inner
            .lock()
            .map(|inner| inner.lines.iter().any(|l| l.contains(needle)))
            .unwrap_or(false)
    }
}

impl Default for DebugTrace {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_and_read() {
        let trace = DebugTrace::new();
        trace.push("Macro 'enable' was called");
        let lines = trace.lines();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].ends_with("Macro 'enable' was called"));
        assert!(lines[0].starts_with('['));
    }

    #[test]
    fn test_entries_are_redacted() {
        let trace = DebugTrace::new().with_credentials(Credentials::new("admin", "hunter22"));
        let clone = trace.clone();
        clone.push("sent hunter22 to the device");
        assert!(!trace.contains("hunter22"));
        assert!(trace.contains("sent ******** to the device"));
    }
}
