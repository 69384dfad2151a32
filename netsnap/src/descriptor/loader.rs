//! Load driver descriptors from Rhai source files.
//!
//! A driver file defines its entry-point functions and ends with an object
//! map describing the driver:
//!
//! ```text
//! fn snapshot(cli, device, config) { ... }
//!
//! #{
//!     info: #{ name: "CiscoIOS12", version: "1.2" },
//!     config: #{ runningConfig: #{ "type": "LongText" } },
//!     device: #{},
//!     cli: #{
//!         ssh: #{ macros: [ #{ name: "enable", options: ["enable", "disable"], target: "enable" } ] },
//!         disable: #{ prompt: `^([\w.\-]+>)$`, macros: #{ ... } },
//!         enable: #{ prompt: `^([\w.\-]+#)$`, error: `^% (.*)`,
//!                    pager: #{ avoid: "terminal length 0", "match": `^ ?--More--$`, response: " " } },
//!     },
//!     entry: #{ ssh: "enable" },
//! }
//! ```
//!
//! Macros given as a map are ordered by name; give them as an array of maps
//! with a `name` key to control the order options and paths are tried in.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use indexmap::IndexMap;
use log::{debug, info, warn};
use serde::Deserialize;

use super::attribute::AttributeSpec;
use super::definition::{DriverDescriptor, DriverInfo};
use super::mode::{MacroSpec, ModeSpec, PagerSpec};
use crate::config::ScriptLimits;
use crate::error::DescriptorError;
use crate::script::{check_requirements, DriverProgram, Sandbox};
use crate::session::DebugTrace;
use crate::transport::TransportKind;

/// Driver file extension.
pub const DRIVER_EXTENSION: &str = "rhai";

#[derive(Debug, Deserialize)]
struct RawDriver {
    info: DriverInfo,
    #[serde(default)]
    config: IndexMap<String, AttributeSpec>,
    #[serde(default)]
    device: IndexMap<String, AttributeSpec>,
    cli: IndexMap<String, RawMode>,
    #[serde(default)]
    entry: IndexMap<String, String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct RawMode {
    #[serde(default)]
    prompt: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    pager: Option<RawPager>,
    #[serde(default)]
    clear_prompt: bool,
    #[serde(default)]
    macros: Option<RawMacros>,
    #[serde(default)]
    fail: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawMacros {
    List(Vec<RawMacro>),
    Map(IndexMap<String, RawMacro>),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct RawMacro {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    cmd: Option<String>,
    #[serde(default)]
    no_cr: bool,
    #[serde(default)]
    options: Vec<String>,
    #[serde(default)]
    target: Option<String>,
    #[serde(default)]
    timeout: Option<u64>,
    #[serde(default)]
    wait_before: Option<u64>,
    #[serde(default)]
    wait_after: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawPager {
    #[serde(default)]
    avoid: Option<OneOrMany>,
    #[serde(default, alias = "match")]
    pattern: Option<String>,
    #[serde(default)]
    response: Option<String>,
}

/// Compiles and validates driver files.
#[derive(Debug, Clone, Default)]
pub struct DriverLoader {
    limits: ScriptLimits,
}

impl DriverLoader {
    /// Create a loader evaluating driver files within `limits`.
    pub fn new(limits: ScriptLimits) -> Self {
        Self { limits }
    }

    /// Load a driver from source. `origin` names the source in errors.
    pub fn load_str(&self, origin: &str, source: &str) -> Result<DriverDescriptor, DescriptorError> {
        let load_error = |message: String| DescriptorError::Load {
            name: origin.to_string(),
            message,
        };

        let sandbox = Sandbox::new(self.limits.clone(), DebugTrace::new()).with_time_budget();
        let engine = sandbox.engine();
        let ast = engine.compile(source).map_err(|e| load_error(e.to_string()))?;
        let value = engine
            .eval_ast::<rhai::Dynamic>(&ast)
            .map_err(|e| load_error(e.to_string()))?;
        if !value.is_map() {
            return Err(load_error(format!(
                "the driver file must end with an object map, found {}",
                value.type_name()
            )));
        }
        let raw: RawDriver = rhai::serde::from_dynamic(&value)
            .map_err(|e| load_error(format!("invalid driver definition: {e}")))?;

        let program = DriverProgram::new(&ast);
        let descriptor = build(raw)?;
        check_requirements(&descriptor.info)?;
        if !program.has_function("snapshot") {
            return Err(DescriptorError::Invalid {
                name: descriptor.info.name.clone(),
                message: "no 'snapshot' function".to_string(),
            });
        }

        let descriptor = descriptor.with_program(Arc::new(program)).validated()?;
        debug!(
            "Loaded driver '{}' version '{}' from {} ({} modes)",
            descriptor.info.name,
            descriptor.info.version,
            origin,
            descriptor.modes.len()
        );
        Ok(descriptor)
    }

    /// Load a driver file.
    pub fn load_file(&self, path: &Path) -> Result<DriverDescriptor, DescriptorError> {
        let source = std::fs::read_to_string(path).map_err(|e| DescriptorError::Load {
            name: path.display().to_string(),
            message: e.to_string(),
        })?;
        self.load_str(&path.display().to_string(), &source)
    }

    /// Load every driver file of a directory, in file name order.
    ///
    /// Files that fail to load are skipped with a warning.
    pub fn load_dir(&self, dir: &Path) -> Result<Vec<DriverDescriptor>, DescriptorError> {
        let entries = std::fs::read_dir(dir).map_err(|e| DescriptorError::Load {
            name: dir.display().to_string(),
            message: e.to_string(),
        })?;
        let mut paths: Vec<_> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.extension().is_some_and(|ext| ext == DRIVER_EXTENSION))
            .collect();
        paths.sort();

        let mut drivers = Vec::with_capacity(paths.len());
        for path in paths {
            match self.load_file(&path) {
                Ok(driver) => drivers.push(driver),
                Err(e) => warn!("Skipping driver file {}: {}", path.display(), e),
            }
        }
        info!("Loaded {} drivers from {}", drivers.len(), dir.display());
        Ok(drivers)
    }
}

fn pattern_error(location: String) -> impl FnOnce(regex::Error) -> DescriptorError {
    move |source| DescriptorError::InvalidPattern { location, source }
}

fn build(raw: RawDriver) -> Result<DriverDescriptor, DescriptorError> {
    let name = raw.info.name.clone();
    let mut descriptor = DriverDescriptor::new(raw.info);
    descriptor.config_attributes = raw.config;
    descriptor.device_attributes = raw.device;

    for (mode_name, raw_mode) in raw.cli {
        descriptor = descriptor.with_mode(build_mode(&name, mode_name, raw_mode)?);
    }

    for (kind, macro_name) in raw.entry {
        let kind = match kind.as_str() {
            "ssh" => TransportKind::Ssh,
            "telnet" => TransportKind::Telnet,
            other => {
                return Err(DescriptorError::Invalid {
                    name,
                    message: format!("unknown transport '{other}' in entry"),
                });
            }
        };
        descriptor = descriptor.with_entry(kind, macro_name);
    }
    Ok(descriptor)
}

fn build_mode(driver: &str, name: String, raw: RawMode) -> Result<ModeSpec, DescriptorError> {
    let mut mode = match &raw.prompt {
        Some(prompt) => ModeSpec::new(name.clone(), prompt)
            .map_err(pattern_error(format!("{driver} mode '{name}' prompt")))?,
        None => ModeSpec::initial(name.clone()),
    };
    if let Some(error) = &raw.error {
        mode = mode
            .with_error(error)
            .map_err(pattern_error(format!("{driver} mode '{name}' error")))?;
    }
    if let Some(pager) = raw.pager {
        let mut spec = match &pager.pattern {
            Some(pattern) => PagerSpec::new(pattern, pager.response.unwrap_or_default())
                .map_err(pattern_error(format!("{driver} mode '{name}' pager")))?,
            None => PagerSpec::avoid_only(),
        };
        spec.avoid_commands = match pager.avoid {
            Some(OneOrMany::One(command)) => vec![command],
            Some(OneOrMany::Many(commands)) => commands,
            None => Vec::new(),
        };
        mode = mode.with_pager(spec);
    }
    if raw.clear_prompt {
        mode = mode.with_clear_prompt();
    }
    if let Some(message) = raw.fail {
        mode = mode.with_fail(message);
    }

    let macros: Vec<(String, RawMacro)> = match raw.macros {
        None => Vec::new(),
        Some(RawMacros::Map(map)) => map.into_iter().collect(),
        Some(RawMacros::List(list)) => {
            let mut named = Vec::with_capacity(list.len());
            for m in list {
                let Some(macro_name) = m.name.clone() else {
                    return Err(DescriptorError::Invalid {
                        name: driver.to_string(),
                        message: format!("a macro of mode '{name}' has no name"),
                    });
                };
                named.push((macro_name, m));
            }
            named
        }
    };
    for (macro_name, m) in macros {
        if mode.macros.contains_key(&macro_name) {
            return Err(DescriptorError::Invalid {
                name: driver.to_string(),
                message: format!("macro '{macro_name}' is declared twice in mode '{name}'"),
            });
        }
        let mut spec = MacroSpec::new(macro_name, m.cmd.as_deref(), m.target.as_deref())
            .with_options(m.options);
        if m.no_cr {
            spec = spec.without_cr();
        }
        spec.timeout = m.timeout.map(Duration::from_millis);
        spec.wait_before = m.wait_before.map(Duration::from_millis);
        spec.wait_after = m.wait_after.map(Duration::from_millis);
        mode = mode.with_macro(spec);
    }
    Ok(mode)
}
