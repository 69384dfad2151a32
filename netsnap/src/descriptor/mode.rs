//! CLI mode, macro and pager definitions.

use std::time::Duration;

use indexmap::IndexMap;
use regex::Regex;

use crate::channel::compile_pattern;

/// Name of the macro run automatically when a mode is reached mid-macro.
pub const AUTO_MACRO: &str = "auto";

/// Paging behavior of a mode.
#[derive(Debug, Clone)]
pub struct PagerSpec {
    /// Commands sent once to disable paging, errors ignored.
    pub avoid_commands: Vec<String>,

    /// Pattern of the paging prompt.
    pub pattern: Option<Regex>,

    /// Text sent to get the next page.
    pub response: String,
}

impl PagerSpec {
    /// Create a pager that answers `pattern` with `response`.
    pub fn new(pattern: &str, response: impl Into<String>) -> Result<Self, regex::Error> {
        Ok(Self {
            avoid_commands: Vec::new(),
            pattern: Some(compile_pattern(pattern)?),
            response: response.into(),
        })
    }

    /// Create a pager that is only avoided, never answered.
    pub fn avoid_only() -> Self {
        Self {
            avoid_commands: Vec::new(),
            pattern: None,
            response: String::new(),
        }
    }

    /// Add a command that disables paging.
    pub fn with_avoid(mut self, command: impl Into<String>) -> Self {
        self.avoid_commands.push(command.into());
        self
    }
}

/// A named transition: a command to send and the modes it may land in.
#[derive(Debug, Clone)]
pub struct MacroSpec {
    /// Macro name.
    pub name: String,

    /// Command to send; may contain credential placeholders.
    pub command: Option<String>,

    /// Do not append the line terminator to the command.
    pub no_cr: bool,

    /// Modes recognized while this macro runs, in precedence order.
    pub options: Vec<String>,

    /// Mode this macro is meant to reach. `None` for `auto` macros.
    pub target: Option<String>,

    /// Resolution timeout for this macro.
    pub timeout: Option<Duration>,

    /// Delay before sending the command.
    pub wait_before: Option<Duration>,

    /// Delay after the mode is resolved.
    pub wait_after: Option<Duration>,
}

impl MacroSpec {
    /// Create a macro that sends `command` and targets `target`.
    pub fn new(name: impl Into<String>, command: Option<&str>, target: Option<&str>) -> Self {
        Self {
            name: name.into(),
            command: command.map(str::to_string),
            no_cr: false,
            options: Vec::new(),
            target: target.map(str::to_string),
            timeout: None,
            wait_before: None,
            wait_after: None,
        }
    }

    /// Add a mode option.
    pub fn with_option(mut self, mode: impl Into<String>) -> Self {
        self.options.push(mode.into());
        self
    }

    /// Set all mode options.
    pub fn with_options<I, S>(mut self, modes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.options = modes.into_iter().map(Into::into).collect();
        self
    }

    /// Do not send a line terminator after the command.
    pub fn without_cr(mut self) -> Self {
        self.no_cr = true;
        self
    }

    /// Set the resolution timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Whether this is an `auto` macro.
    pub fn is_auto(&self) -> bool {
        self.name == AUTO_MACRO
    }
}

/// A recognizable CLI state.
#[derive(Debug, Clone)]
pub struct ModeSpec {
    /// Mode name.
    pub name: String,

    /// Prompt pattern. Only a transport's initial mode may lack one.
    pub prompt: Option<Regex>,

    /// Device error pattern; group 1 is the reported message.
    pub error: Option<Regex>,

    /// Paging behavior.
    pub pager: Option<PagerSpec>,

    /// Disable prompt pinning and strip prompt-prefixed echoes.
    pub clear_prompt: bool,

    /// Macros available from this mode, in declaration order.
    pub macros: IndexMap<String, MacroSpec>,

    /// Reaching this mode is a terminal failure with this message.
    pub fail_message: Option<String>,
}

impl ModeSpec {
    /// Create a mode recognized by `prompt`.
    pub fn new(name: impl Into<String>, prompt: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            prompt: Some(compile_pattern(prompt)?),
            ..Self::initial(name)
        })
    }

    /// Create a mode without a prompt (a transport's initial mode).
    pub fn initial(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            prompt: None,
            error: None,
            pager: None,
            clear_prompt: false,
            macros: IndexMap::new(),
            fail_message: None,
        }
    }

    /// Set the error pattern.
    pub fn with_error(mut self, pattern: &str) -> Result<Self, regex::Error> {
        self.error = Some(compile_pattern(pattern)?);
        Ok(self)
    }

    /// Set the pager.
    pub fn with_pager(mut self, pager: PagerSpec) -> Self {
        self.pager = Some(pager);
        self
    }

    /// Add a macro.
    pub fn with_macro(mut self, spec: MacroSpec) -> Self {
        self.macros.insert(spec.name.clone(), spec);
        self
    }

    /// Make this a dead-end failure mode.
    pub fn with_fail(mut self, message: impl Into<String>) -> Self {
        self.fail_message = Some(message.into());
        self
    }

    /// Disable prompt pinning in this mode.
    pub fn with_clear_prompt(mut self) -> Self {
        self.clear_prompt = true;
        self
    }

    /// The `auto` macro of this mode, if any.
    pub fn auto_macro(&self) -> Option<&MacroSpec> {
        self.macros.get(AUTO_MACRO)
    }

    /// The pager pattern, if this mode pages.
    pub fn pager_pattern(&self) -> Option<&Regex> {
        self.pager.as_ref().and_then(|p| p.pattern.as_ref())
    }
}
