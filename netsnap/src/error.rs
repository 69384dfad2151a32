//! Error types for netsnap.
//!
//! Errors are layered the same way the engine is: transport failures, CLI
//! state-machine failures, driver descriptor problems and script failures
//! each have their own enum, folded into [`Error`]. Every error maps to a
//! stable [`ErrorKind`] tag that is reported in task results.

use std::fmt;
use std::io;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

/// Main error type for netsnap operations.
#[derive(Error, Debug)]
pub enum Error {
    /// SSH/Telnet transport-level errors
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// CLI state machine errors (mode resolution, pager, device errors)
    #[error("CLI error: {0}")]
    Cli(#[from] CliError),

    /// Driver descriptor errors
    #[error("Descriptor error: {0}")]
    Descriptor(#[from] DescriptorError),

    /// Script execution errors
    #[error("Script error: {0}")]
    Script(#[from] ScriptError),

    /// The task was cancelled
    #[error("Task cancelled")]
    Cancelled,
}

/// Transport layer errors (connection, authentication, I/O).
#[derive(Error, Debug)]
pub enum TransportError {
    /// Failed to connect to host
    #[error("Connection failed to {host}:{port}: {source}")]
    ConnectionFailed {
        host: String,
        port: u16,
        #[source]
        source: io::Error,
    },

    /// SSH handshake or protocol error
    #[error("SSH error: {0}")]
    Ssh(#[from] russh::Error),

    /// SFTP subsystem error
    #[error("SFTP error: {0}")]
    Sftp(String),

    /// SCP protocol error
    #[error("SCP error: {0}")]
    Scp(String),

    /// Transport-level authentication was rejected
    #[error("Authentication failed for user '{user}'")]
    AuthenticationFailed { user: String },

    /// SSH key error
    #[error("SSH key error: {0}")]
    Key(String),

    /// The server's host key does not match the one in known_hosts
    #[error("Host key for {host}:{port} changed (known_hosts line {line})")]
    HostKeyChanged { host: String, port: u16, line: usize },

    /// The server is unknown and strict checking is enabled
    #[error("Host key for {host}:{port} is not in known_hosts")]
    HostKeyUnknown { host: String, port: u16 },

    /// known_hosts could not be read or written
    #[error("known_hosts error: {0}")]
    KnownHosts(String),

    /// The transport does not support the requested operation
    #[error("Operation not supported by this transport: {0}")]
    Unsupported(String),

    /// Connection was closed unexpectedly
    #[error("Connection disconnected")]
    Disconnected,

    /// Operation timed out
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// CLI state machine errors.
#[derive(Error, Debug)]
pub enum CliError {
    /// No expected pattern matched before the command deadline
    #[error("No expected prompt matched in mode '{mode}' within {timeout:?}; last output: {buffer:?}")]
    ModeResolution {
        mode: String,
        timeout: Duration,
        buffer: String,
    },

    /// The device kept paginating past the configured limit
    #[error("Pager loop exceeded {max} iterations in mode '{mode}'")]
    PagerLoopExceeded { mode: String, max: usize },

    /// The device answered with output matching the mode's error pattern
    #[error("CLI error returned by the device: '{message}' after command '{command}'")]
    Command { message: String, command: String },

    /// A mode with a fail message was reached
    #[error("Authentication failure in mode '{mode}': {message}")]
    AuthenticationFailure { mode: String, message: String },

    /// No mode reachable from the current one offers the requested macro
    #[error("No path from mode '{from}' to a mode offering macro '{name}'")]
    NoPath { from: String, name: String },

    /// A macro did not converge within the step budget
    #[error("Too many steps while running macro '{name}' (limit {limit})")]
    TooManySteps { name: String, limit: usize },

    /// A macro ended outside its target mode
    #[error("Couldn't switch to mode '{target}' using macro '{name}' (reached mode '{reached}')")]
    UnexpectedMode {
        name: String,
        target: String,
        reached: String,
    },

    /// The session references a mode the descriptor does not define
    #[error("No mode '{0}' in CLI")]
    UnknownMode(String),
}

/// Driver descriptor errors, raised at load time.
#[derive(Error, Debug)]
pub enum DescriptorError {
    /// The descriptor source failed to parse or evaluate
    #[error("Failed to load driver '{name}': {message}")]
    Load { name: String, message: String },

    /// The descriptor data is structurally invalid
    #[error("Invalid driver '{name}': {message}")]
    Invalid { name: String, message: String },

    /// A pattern failed to compile
    #[error("Invalid pattern in {location}: {source}")]
    InvalidPattern {
        location: String,
        #[source]
        source: regex::Error,
    },

    /// A driver function or capability is missing
    #[error("Driver '{name}' requires unavailable capability '{capability}'")]
    MissingCapability { name: String, capability: String },

    /// No driver with this name is registered
    #[error("Driver '{0}' not found")]
    NotFound(String),

    /// A driver with this name is already registered
    #[error("Driver '{0}' is already registered")]
    AlreadyRegistered(String),

    /// The transport kind has no entry macro in this driver
    #[error("Driver '{name}' has no entry macro for transport '{transport}'")]
    NoEntryMacro { name: String, transport: String },
}

/// Script execution errors.
#[derive(Error, Debug)]
pub enum ScriptError {
    /// The driver or task script failed to compile
    #[error("Compile error: {0}")]
    Compile(String),

    /// The script raised an error or failed at runtime
    #[error("{0}")]
    Runtime(String),

    /// The script exceeded its operation or wall-clock budget
    #[error("Script budget exceeded: {0}")]
    BudgetExceeded(String),

    /// The requested entry point is not defined by the driver
    #[error("Function '{0}' is not defined by the driver")]
    MissingFunction(String),

    /// A host API call received bad arguments
    #[error("Invalid call to {call}: {message}")]
    InvalidCall { call: String, message: String },

    /// A downloaded file failed checksum verification
    #[error("Checksum mismatch for '{path}': expected {expected}, got {actual}")]
    ChecksumMismatch {
        path: String,
        expected: String,
        actual: String,
    },
}

/// Stable error kind tag reported in task results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ErrorKind {
    TransportError,
    AuthenticationFailure,
    ModeResolutionError,
    PagerLoopExceeded,
    CommandError,
    ScriptError,
    NoPathError,
    DescriptorError,
    DriverNotFound,
    Cancelled,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl Error {
    /// The kind tag of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Transport(TransportError::AuthenticationFailed { .. }) => {
                ErrorKind::AuthenticationFailure
            }
            Error::Transport(_) => ErrorKind::TransportError,
            Error::Cli(e) => match e {
                CliError::ModeResolution { .. }
                | CliError::UnexpectedMode { .. }
                | CliError::UnknownMode(_) => ErrorKind::ModeResolutionError,
                CliError::PagerLoopExceeded { .. } => ErrorKind::PagerLoopExceeded,
                CliError::Command { .. } => ErrorKind::CommandError,
                CliError::AuthenticationFailure { .. } => ErrorKind::AuthenticationFailure,
                CliError::NoPath { .. } | CliError::TooManySteps { .. } => ErrorKind::NoPathError,
            },
            Error::Descriptor(DescriptorError::NotFound(_)) => ErrorKind::DriverNotFound,
            Error::Descriptor(_) => ErrorKind::DescriptorError,
            Error::Script(_) => ErrorKind::ScriptError,
            Error::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// Whether a fresh connection attempt may succeed where this one failed.
    ///
    /// Only transport failures are retryable; authentication failures and
    /// host key problems are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Transport(e) => !matches!(
                e,
                TransportError::AuthenticationFailed { .. }
                    | TransportError::Key(_)
                    | TransportError::HostKeyChanged { .. }
                    | TransportError::HostKeyUnknown { .. }
                    | TransportError::KnownHosts(_)
                    | TransportError::Unsupported(_)
            ),
            _ => false,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Transport(TransportError::Io(err))
    }
}

/// Result type alias using netsnap's Error.
pub type Result<T> = std::result::Result<T, Error>;
