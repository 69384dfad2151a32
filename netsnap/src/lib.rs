//! # Netsnap
//!
//! Driver execution engine for network device configuration snapshots.
//!
//! Netsnap drives the interactive CLI of network devices over SSH or Telnet
//! using vendor drivers written in Rhai. A driver declares the device's CLI
//! modes (prompt patterns, error patterns, pagers) and the macros moving
//! between them, plus a `snapshot` function that collects facts and
//! configuration through a sandboxed API.
//!
//! ## Features
//!
//! - Async SSH (russh) and Telnet transports, SFTP/SCP downloads
//! - Prompt-driven mode resolution with tail-only buffer search
//! - Macro pathfinding across the mode graph, with `auto` credential macros
//! - Pager handling and command error detection
//! - Sandboxed Rhai driver scripts with operation and time budgets
//! - Bounded concurrent snapshots with per-device exclusivity and cancellation
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! use netsnap::{
//!     Credentials, DeviceTarget, DeviceTask, DriverRegistry, EngineConfig, Orchestrator,
//!     TransportKind,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), netsnap::Error> {
//!     let config = EngineConfig::default().max_sessions(20);
//!     let registry = DriverRegistry::load_dir(Path::new("drivers"), &config.script)?;
//!     let orchestrator = Orchestrator::with_network(config, Arc::new(registry));
//!
//!     let task = DeviceTask::snapshot(
//!         "nightly-1",
//!         DeviceTarget::new("edge1", "192.0.2.1", TransportKind::Ssh),
//!         "CiscoIOS12",
//!         Credentials::new("admin", "secret"),
//!     );
//!     let result = orchestrator.run(task).await;
//!     println!("{}", serde_json::to_string_pretty(&result).unwrap_or_default());
//!     Ok(())
//! }
//! ```

pub mod channel;
pub mod config;
pub mod descriptor;
pub mod error;
pub mod orchestrator;
pub mod script;
pub mod session;
pub mod transport;

// Re-export main types for convenience
pub use config::{EngineConfig, ScriptLimits, SessionOptions};
pub use descriptor::{DriverDescriptor, DriverLoader, DriverRegistry};
pub use error::{Error, ErrorKind, Result};
pub use orchestrator::{DeviceTask, Orchestrator, TaskAction, TaskHandle, TaskResult, TaskStatus};
pub use script::{ScriptHost, SnapshotContext};
pub use session::{CommandOptions, CommandResponse, Credentials, DebugTrace, Session};
pub use transport::{Connector, DeviceTarget, NetworkConnector, SshSettings, Transport, TransportKind};
