//! Response type for command execution results.

use std::time::Duration;

/// Response from a command execution.
#[derive(Debug, Clone)]
pub struct CommandResponse {
    /// The command as written by the driver, placeholders not substituted.
    pub command: String,

    /// The command output, echo and trailing prompt removed.
    pub output: String,

    /// The prompt that ended the command.
    pub prompt: String,

    /// Mode the session is in after the command.
    pub mode: String,

    /// Number of pager responses sent.
    pub pages: usize,

    /// Time taken to execute the command.
    pub elapsed: Duration,
}

impl CommandResponse {
    /// Get the output lines as an iterator.
    pub fn lines(&self) -> impl Iterator<Item = &str> {
        self.output.lines()
    }

    /// Check if the output contains a substring.
    pub fn contains(&self, pattern: &str) -> bool {
        self.output.contains(pattern)
    }
}

impl std::fmt::Display for CommandResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.output)
    }
}
