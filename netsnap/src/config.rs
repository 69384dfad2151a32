//! Engine configuration.
//!
//! All settings have working defaults and builder-style setters. The
//! structs also deserialize with serde (durations in milliseconds, missing
//! fields defaulted) so a host application can load them from its own
//! configuration files.

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::transport::SshSettings;

/// Serde helpers for durations written as milliseconds.
pub(crate) mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

/// Per-session CLI behavior.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionOptions {
    /// Overall deadline of one command or macro step.
    #[serde(with = "duration_ms")]
    pub command_timeout: Duration,

    /// Longest single wait for device output.
    #[serde(with = "duration_ms")]
    pub poll_interval: Duration,

    /// Pager responses allowed for a single command.
    pub max_pager_iterations: usize,

    /// Macro steps allowed for a single `cli.macro` call.
    pub max_macro_steps: usize,

    /// Bytes at the end of the buffer searched for prompts.
    pub search_depth: usize,

    /// Line terminator appended to commands.
    pub line_terminator: String,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            command_timeout: Duration::from_secs(120),
            poll_interval: Duration::from_millis(250),
            max_pager_iterations: 1000,
            max_macro_steps: 10,
            search_depth: 1000,
            line_terminator: "\n".to_string(),
        }
    }
}

impl SessionOptions {
    /// Set the command timeout.
    pub fn command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    /// Set the polling interval.
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set the pager iteration limit.
    pub fn max_pager_iterations(mut self, max: usize) -> Self {
        self.max_pager_iterations = max;
        self
    }

    /// Set the macro step limit.
    pub fn max_macro_steps(mut self, max: usize) -> Self {
        self.max_macro_steps = max;
        self
    }

    /// Set the line terminator.
    pub fn line_terminator(mut self, terminator: impl Into<String>) -> Self {
        self.line_terminator = terminator.into();
        self
    }
}

/// Sandbox limits for driver scripts.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScriptLimits {
    /// Wall-clock budget of one driver function call.
    #[serde(with = "duration_ms")]
    pub time_budget: Duration,

    /// Interpreter operations allowed per call (0 for unlimited).
    pub max_operations: u64,

    /// Maximum function call depth.
    pub max_call_levels: usize,

    /// Maximum expression nesting depth.
    pub max_expr_depth: usize,

    /// Maximum length of a string value.
    pub max_string_size: usize,

    /// Maximum length of an array.
    pub max_array_size: usize,

    /// Maximum number of entries in an object map.
    pub max_map_size: usize,

    /// Compiled regexes cached per script host.
    pub regex_cache_size: usize,
}

impl Default for ScriptLimits {
    fn default() -> Self {
        Self {
            time_budget: Duration::from_secs(30 * 60),
            max_operations: 500_000_000,
            max_call_levels: 64,
            max_expr_depth: 128,
            max_string_size: 64 * 1024 * 1024,
            max_array_size: 1_000_000,
            max_map_size: 100_000,
            regex_cache_size: 256,
        }
    }
}

impl ScriptLimits {
    /// Set the wall-clock budget.
    pub fn time_budget(mut self, budget: Duration) -> Self {
        self.time_budget = budget;
        self
    }

    /// Set the operation budget.
    pub fn max_operations(mut self, max: u64) -> Self {
        self.max_operations = max;
        self
    }
}

/// Top-level engine configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Maximum number of concurrent device sessions.
    pub max_sessions: usize,

    /// Connection establishment timeout.
    #[serde(with = "duration_ms")]
    pub connect_timeout: Duration,

    /// Extra connection attempts after a transport failure.
    pub connect_retries: u32,

    /// Delay before the first retry; doubled on each further retry.
    #[serde(with = "duration_ms")]
    pub retry_backoff: Duration,

    /// Directory receiving downloaded files.
    pub download_dir: PathBuf,

    /// CLI session behavior.
    pub session: SessionOptions,

    /// Script sandbox limits.
    pub script: ScriptLimits,

    /// SSH settings.
    pub ssh: SshSettings,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_sessions: 50,
            connect_timeout: Duration::from_secs(10),
            connect_retries: 2,
            retry_backoff: Duration::from_millis(500),
            download_dir: std::env::temp_dir().join("netsnap"),
            session: SessionOptions::default(),
            script: ScriptLimits::default(),
            ssh: SshSettings::default(),
        }
    }
}

impl EngineConfig {
    /// Set the concurrency bound.
    pub fn max_sessions(mut self, max: usize) -> Self {
        self.max_sessions = max.max(1);
        self
    }

    /// Set the connection timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the retry policy.
    pub fn connect_retries(mut self, retries: u32, backoff: Duration) -> Self {
        self.connect_retries = retries;
        self.retry_backoff = backoff;
        self
    }

    /// Set the download directory.
    pub fn download_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.download_dir = dir.into();
        self
    }

    /// Set the session options.
    pub fn session(mut self, session: SessionOptions) -> Self {
        self.session = session;
        self
    }

    /// Set the script limits.
    pub fn script(mut self, script: ScriptLimits) -> Self {
        self.script = script;
        self
    }

    /// Set the SSH settings.
    pub fn ssh(mut self, ssh: SshSettings) -> Self {
        self.ssh = ssh;
        self
    }

    /// Backoff before retry number `attempt` (1-based).
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.saturating_sub(1).min(16);
        self.retry_backoff.saturating_mul(factor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.session.max_pager_iterations, 1000);
        assert_eq!(config.session.max_macro_steps, 10);
        assert_eq!(config.session.line_terminator, "\n");
    }

    #[test]
    fn test_partial_json() {
        let config: EngineConfig = serde_json::from_str(
            r#"{"max_sessions": 8, "connect_timeout": 2500, "session": {"command_timeout": 1000}}"#,
        )
        .unwrap();
        assert_eq!(config.max_sessions, 8);
        assert_eq!(config.connect_timeout, Duration::from_millis(2500));
        assert_eq!(config.session.command_timeout, Duration::from_secs(1));
        assert_eq!(config.session.search_depth, 1000);
    }

    #[test]
    fn test_backoff_doubles() {
        let config = EngineConfig::default().connect_retries(3, Duration::from_millis(100));
        assert_eq!(config.backoff_for(1), Duration::from_millis(100));
        assert_eq!(config.backoff_for(3), Duration::from_millis(400));
    }
}
