//! Driver descriptor: the validated, immutable model of one vendor driver.

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use super::attribute::AttributeSpec;
use super::mode::ModeSpec;
use crate::error::DescriptorError;
use crate::script::DriverProgram;
use crate::session::Pathfinder;
use crate::transport::TransportKind;

/// Descriptive information about a driver.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriverInfo {
    /// Unique driver name.
    pub name: String,

    /// Human readable description.
    #[serde(default)]
    pub description: String,

    /// Driver author.
    #[serde(default)]
    pub author: String,

    /// Driver version.
    #[serde(default)]
    pub version: String,

    /// Host API capabilities the driver needs.
    #[serde(default)]
    pub requires: Vec<String>,
}

impl DriverInfo {
    /// Create info with just a name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }
}

/// A validated vendor driver.
///
/// Immutable once built; shared across concurrent sessions behind an `Arc`.
#[derive(Clone)]
pub struct DriverDescriptor {
    /// Driver information.
    pub info: DriverInfo,

    /// CLI modes by name.
    pub modes: IndexMap<String, ModeSpec>,

    /// Versioned configuration attributes.
    pub config_attributes: IndexMap<String, AttributeSpec>,

    /// Persistent device attributes.
    pub device_attributes: IndexMap<String, AttributeSpec>,

    /// Entry macro per transport kind.
    pub entry_macros: IndexMap<TransportKind, String>,

    /// Compiled behavior functions, if the driver was loaded from a script.
    pub(crate) program: Option<Arc<DriverProgram>>,
}

impl DriverDescriptor {
    /// Create an empty descriptor.
    pub fn new(info: DriverInfo) -> Self {
        Self {
            info,
            modes: IndexMap::new(),
            config_attributes: IndexMap::new(),
            device_attributes: IndexMap::new(),
            entry_macros: IndexMap::new(),
            program: None,
        }
    }

    /// The driver name.
    pub fn name(&self) -> &str {
        &self.info.name
    }

    /// Add a mode.
    pub fn with_mode(mut self, mode: ModeSpec) -> Self {
        self.modes.insert(mode.name.clone(), mode);
        self
    }

    /// Declare the entry macro of a transport.
    pub fn with_entry(mut self, transport: TransportKind, macro_name: impl Into<String>) -> Self {
        self.entry_macros.insert(transport, macro_name.into());
        self
    }

    /// Declare a configuration attribute.
    pub fn with_config_attribute(mut self, name: impl Into<String>, spec: AttributeSpec) -> Self {
        self.config_attributes.insert(name.into(), spec);
        self
    }

    /// Declare a device attribute.
    pub fn with_device_attribute(mut self, name: impl Into<String>, spec: AttributeSpec) -> Self {
        self.device_attributes.insert(name.into(), spec);
        self
    }

    pub(crate) fn with_program(mut self, program: Arc<DriverProgram>) -> Self {
        self.program = Some(program);
        self
    }

    /// Get a mode by name.
    pub fn mode(&self, name: &str) -> Option<&ModeSpec> {
        self.modes.get(name)
    }

    /// The entry macro for a transport kind.
    pub fn entry_macro(&self, transport: TransportKind) -> Option<&str> {
        self.entry_macros.get(&transport).map(String::as_str)
    }

    /// Whether the driver defines a behavior function.
    pub fn has_function(&self, name: &str) -> bool {
        self.program.as_ref().is_some_and(|p| p.has_function(name))
    }

    /// Check every structural invariant and resolve default entry macros.
    ///
    /// A transport without a declared entry macro uses the only macro of
    /// its initial mode, when there is exactly one.
    pub fn validated(mut self) -> Result<Self, DescriptorError> {
        let invalid = |message: String| DescriptorError::Invalid {
            name: self.info.name.clone(),
            message,
        };

        if self.info.name.trim().is_empty() {
            return Err(invalid("driver name is empty".to_string()));
        }

        for (mode_name, mode) in &self.modes {
            let is_initial = TransportKind::all()
                .iter()
                .any(|kind| kind.initial_mode() == mode_name);
            if mode.prompt.is_none() && !is_initial {
                return Err(invalid(format!("mode '{mode_name}' has no prompt pattern")));
            }

            for (macro_name, spec) in &mode.macros {
                if spec.options.is_empty() {
                    return Err(invalid(format!(
                        "macro '{macro_name}' of mode '{mode_name}' has no options"
                    )));
                }
                if let Some(target) = &spec.target {
                    if !self.modes.contains_key(target) {
                        return Err(invalid(format!(
                            "macro '{macro_name}' of mode '{mode_name}' targets unknown mode '{target}'"
                        )));
                    }
                } else if !spec.is_auto() {
                    return Err(invalid(format!(
                        "macro '{macro_name}' of mode '{mode_name}' has no target"
                    )));
                }
                for option in &spec.options {
                    let Some(option_mode) = self.modes.get(option) else {
                        return Err(invalid(format!(
                            "macro '{macro_name}' of mode '{mode_name}' lists unknown mode '{option}'"
                        )));
                    };
                    if option_mode.prompt.is_none() {
                        return Err(invalid(format!(
                            "mode '{option}' is used as an option of macro '{macro_name}' but has no prompt"
                        )));
                    }
                }
            }
        }

        for kind in TransportKind::all() {
            if self.entry_macros.contains_key(&kind) {
                continue;
            }
            if let Some(mode) = self.modes.get(kind.initial_mode()) {
                let mut candidates = mode.macros.values().filter(|m| !m.is_auto());
                match (candidates.next(), candidates.next()) {
                    (Some(only), None) => {
                        let name = only.name.clone();
                        self.entry_macros.insert(kind, name);
                    }
                    (None, _) => {}
                    (Some(_), Some(_)) => {
                        return Err(DescriptorError::NoEntryMacro {
                            name: self.info.name.clone(),
                            transport: kind.to_string(),
                        });
                    }
                }
            }
        }

        let pathfinder = Pathfinder::new(&self.modes);
        for (kind, macro_name) in &self.entry_macros {
            let initial = kind.initial_mode();
            if !self.modes.contains_key(initial) {
                return Err(DescriptorError::Invalid {
                    name: self.info.name.clone(),
                    message: format!("entry macro for {kind} declared but mode '{initial}' is missing"),
                });
            }
            if pathfinder.plan_macro(initial, macro_name).is_err() {
                return Err(DescriptorError::Invalid {
                    name: self.info.name.clone(),
                    message: format!("entry macro '{macro_name}' is not reachable from mode '{initial}'"),
                });
            }
        }

        if self.entry_macros.is_empty() {
            return Err(DescriptorError::Invalid {
                name: self.info.name.clone(),
                message: "no transport has an entry macro".to_string(),
            });
        }

        Ok(self)
    }
}

impl fmt::Debug for DriverDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DriverDescriptor")
            .field("info", &self.info)
            .field("modes", &self.modes.keys().collect::<Vec<_>>())
            .field("config_attributes", &self.config_attributes.keys().collect::<Vec<_>>())
            .field("device_attributes", &self.device_attributes.keys().collect::<Vec<_>>())
            .field("entry_macros", &self.entry_macros)
            .field("program", &self.program.as_ref().map(|_| "<DriverProgram>"))
            .finish()
    }
}
