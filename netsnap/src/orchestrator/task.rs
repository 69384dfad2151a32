//! Device tasks and their results.

use std::path::PathBuf;
use std::time::Duration;

use indexmap::IndexMap;
use serde::Serialize;
use serde_json::Value;

use crate::error::{Error, ErrorKind};
use crate::script::{DownloadedFile, SnapshotContext};
use crate::session::Credentials;
use crate::transport::DeviceTarget;

/// What to run once the session is entered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskAction {
    /// The driver's `snapshot` function.
    Snapshot,

    /// The `run` function of a user script, which may call driver functions.
    Script { source: String },
}

/// One unit of work against one device.
#[derive(Debug, Clone)]
pub struct DeviceTask {
    /// Caller-chosen task id, echoed in the result.
    pub id: String,

    /// Device to connect to.
    pub target: DeviceTarget,

    /// Name of the registered driver.
    pub driver: String,

    /// Login credentials.
    pub credentials: Credentials,

    /// Function to run.
    pub action: TaskAction,

    /// Facts already known about the device, visible to `device.get`.
    pub known_facts: IndexMap<String, Value>,

    /// Custom hash of the previous snapshot.
    pub last_custom_hash: Option<String>,
}

impl DeviceTask {
    /// A snapshot task.
    pub fn snapshot(
        id: impl Into<String>,
        target: DeviceTarget,
        driver: impl Into<String>,
        credentials: Credentials,
    ) -> Self {
        Self {
            id: id.into(),
            target,
            driver: driver.into(),
            credentials,
            action: TaskAction::Snapshot,
            known_facts: IndexMap::new(),
            last_custom_hash: None,
        }
    }

    /// A user script task.
    pub fn script(
        id: impl Into<String>,
        target: DeviceTarget,
        driver: impl Into<String>,
        credentials: Credentials,
        source: impl Into<String>,
    ) -> Self {
        Self {
            action: TaskAction::Script {
                source: source.into(),
            },
            ..Self::snapshot(id, target, driver, credentials)
        }
    }

    /// Provide the facts already known about the device.
    pub fn with_known_facts(mut self, facts: IndexMap<String, Value>) -> Self {
        self.known_facts = facts;
        self
    }

    /// Provide the previous custom hash.
    pub fn with_last_custom_hash(mut self, hash: impl Into<String>) -> Self {
        self.last_custom_hash = Some(hash.into());
        self
    }
}

/// Outcome of a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "lowercase")]
pub enum TaskStatus {
    Success,
    Failure { kind: ErrorKind, message: String },
}

/// Everything a task produced.
///
/// A failed task carries no facts, configuration or files: the trace and
/// mode history are the only state that survives a failure.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskResult {
    pub task_id: String,
    pub device_id: String,
    pub driver: String,
    pub status: TaskStatus,
    pub facts: IndexMap<String, Value>,
    pub config: IndexMap<String, Value>,
    pub author: Option<String>,
    pub files: Vec<DownloadedFile>,
    pub custom_hash: Option<String>,
    pub trace: Vec<String>,
    pub mode_history: Vec<String>,

    /// Connection attempts made.
    pub attempts: u32,

    #[serde(serialize_with = "crate::config::duration_ms::serialize")]
    pub elapsed: Duration,
}

impl TaskResult {
    pub(crate) fn new(task: &DeviceTask) -> Self {
        Self {
            task_id: task.id.clone(),
            device_id: task.target.id.clone(),
            driver: task.driver.clone(),
            status: TaskStatus::Success,
            facts: IndexMap::new(),
            config: IndexMap::new(),
            author: None,
            files: Vec::new(),
            custom_hash: None,
            trace: Vec::new(),
            mode_history: Vec::new(),
            attempts: 0,
            elapsed: Duration::ZERO,
        }
    }

    pub(crate) fn succeeded(mut self, ctx: SnapshotContext) -> Self {
        self.status = TaskStatus::Success;
        self.facts = ctx.facts;
        self.config = ctx.config;
        self.author = ctx.author;
        self.files = ctx.files;
        self.custom_hash = ctx.custom_hash;
        self
    }

    pub(crate) fn failed(mut self, error: &Error, credentials: &Credentials) -> Self {
        self.status = TaskStatus::Failure {
            kind: error.kind(),
            message: credentials.redact(&error.to_string()),
        };
        self
    }

    /// Whether the task succeeded.
    pub fn is_success(&self) -> bool {
        self.status == TaskStatus::Success
    }

    /// The error kind of a failed task.
    pub fn error_kind(&self) -> Option<ErrorKind> {
        match &self.status {
            TaskStatus::Success => None,
            TaskStatus::Failure { kind, .. } => Some(*kind),
        }
    }

    /// Local paths of the downloaded files.
    pub fn file_paths(&self) -> impl Iterator<Item = &PathBuf> {
        self.files.iter().map(|f| &f.local_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CliError;
    use crate::transport::TransportKind;

    fn task() -> DeviceTask {
        DeviceTask::snapshot(
            "t1",
            DeviceTarget::new("r1", "192.0.2.1", TransportKind::Ssh),
            "CiscoIOS12",
            Credentials::new("admin", "s3cret"),
        )
    }

    #[test]
    fn test_script_task() {
        let task = DeviceTask::script(
            "t2",
            DeviceTarget::new("r1", "192.0.2.1", TransportKind::Ssh),
            "CiscoIOS12",
            Credentials::new("admin", "s3cret"),
            "fn run(cli, device, config) {}",
        )
        .with_last_custom_hash("abc");
        assert!(matches!(task.action, TaskAction::Script { .. }));
        assert_eq!(task.last_custom_hash.as_deref(), Some("abc"));
    }

    #[test]
    fn test_failure_serialization() {
        let error: Error = CliError::Command {
            message: "Invalid input".into(),
            command: "show bogus".into(),
        }
        .into();
        let task = task();
        let mut result = TaskResult::new(&task).failed(&error, &task.credentials);
        result.elapsed = Duration::from_millis(1500);

        assert_eq!(result.error_kind(), Some(ErrorKind::CommandError));
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["taskId"], "t1");
        assert_eq!(json["status"]["outcome"], "failure");
        assert_eq!(json["status"]["kind"], "CommandError");
        assert_eq!(json["elapsed"], 1500);
        assert!(json["facts"].as_object().unwrap().is_empty());
    }

    #[test]
    fn test_success_takes_context() {
        let mut ctx = SnapshotContext::default();
        ctx.facts.insert("name".into(), Value::from("router"));
        ctx.custom_hash = Some("00ff".into());
        let result = TaskResult::new(&task()).succeeded(ctx);
        assert!(result.is_success());
        assert_eq!(result.facts["name"], "router");
        assert_eq!(result.custom_hash.as_deref(), Some("00ff"));
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["status"]["outcome"], "success");
    }
}
