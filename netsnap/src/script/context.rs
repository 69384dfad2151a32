//! Per-run state collected by a driver script.

use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use log::warn;
use serde::Serialize;
use serde_json::Value;

use crate::descriptor::AttributeSpec;

/// A file fetched from the device during a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadedFile {
    /// Configuration attribute the file belongs to.
    pub attribute: String,

    /// Path on the device.
    pub remote_path: String,

    /// Local path of the stored copy.
    pub local_path: PathBuf,

    /// Size in bytes.
    pub size: u64,

    /// Verified checksum, when the driver supplied one.
    pub checksum: Option<String>,
}

/// Facts, configuration fields and files gathered by one run.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotContext {
    /// Device facts.
    pub facts: IndexMap<String, Value>,

    /// Configuration fields.
    pub config: IndexMap<String, Value>,

    /// Author of the configuration, as reported by the device.
    pub author: Option<String>,

    /// Downloaded files.
    pub files: Vec<DownloadedFile>,

    /// Hash computed by the driver over the relevant configuration parts.
    pub custom_hash: Option<String>,

    /// Custom hash of the previous run.
    #[serde(skip)]
    pub last_custom_hash: Option<String>,
}

impl SnapshotContext {
    /// Create a context knowing the device's current facts and the
    /// previous custom hash.
    pub fn new(known_facts: IndexMap<String, Value>, last_custom_hash: Option<String>) -> Self {
        Self {
            facts: known_facts,
            last_custom_hash,
            ..Default::default()
        }
    }

    /// Set a device fact, coerced when the attribute is declared.
    pub fn set_fact(
        &mut self,
        schema: &IndexMap<String, AttributeSpec>,
        key: &str,
        value: Value,
    ) -> Result<(), String> {
        let value = match schema.get(key) {
            Some(spec) => spec.coerce(value)?,
            None => value,
        };
        self.facts.insert(key.to_string(), value);
        Ok(())
    }

    /// Append to a device fact collection.
    pub fn add_fact(&mut self, key: &str, value: Value) {
        match self.facts.get_mut(key) {
            Some(Value::Array(items)) => items.push(value),
            Some(existing) => {
                let previous = existing.take();
                *existing = Value::Array(vec![previous, value]);
            }
            None => {
                self.facts.insert(key.to_string(), Value::Array(vec![value]));
            }
        }
    }

    /// Set a configuration field.
    ///
    /// `author` is kept apart. Undeclared keys are ignored and reported
    /// as `Ok(false)`.
    pub fn set_config(
        &mut self,
        schema: &IndexMap<String, AttributeSpec>,
        key: &str,
        value: Value,
    ) -> Result<bool, String> {
        if key == "author" {
            self.author = Some(match value {
                Value::String(s) => s,
                other => other.to_string(),
            });
            return Ok(true);
        }
        match schema.get(key) {
            Some(spec) => {
                let value = spec.coerce(value)?;
                self.config.insert(key.to_string(), value);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Record a downloaded file and reference it from its attribute.
    pub fn add_file(&mut self, file: DownloadedFile) {
        let name = file
            .local_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.config.insert(file.attribute.clone(), Value::String(name));
        self.files.push(file);
    }

    /// Delete the local copies of downloaded files.
    pub fn discard_files(&mut self) {
        for file in self.files.drain(..) {
            remove_quietly(&file.local_path);
        }
    }
}

fn remove_quietly(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!("Failed to delete '{}': {}", path.display(), e);
        }
    }
}
