//! The `cli`, `device` and `config` objects handed to driver functions.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use log::{debug, warn};
use md5::Md5;
use rhai::{Array, Dynamic, Engine, EvalAltResult, Map, INT};
use serde_json::Value;
use sha2::{Digest, Sha256};

use super::context::{DownloadedFile, SnapshotContext};
use super::request::{CommandFailure, FatalSlot, HostLink, HostRequest};
use super::text::{captures_to_array, find_sections, RegexCache};
use crate::descriptor::{AttributeType, DriverDescriptor};
use crate::error::{Error, ScriptError, TransportError};
use crate::session::{CommandOptions, DebugTrace};
use crate::transport::DownloadMethod;

type RhaiResult<T> = Result<T, Box<EvalAltResult>>;

/// Lowercase hex encoding of a digest.
pub(crate) fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Keep only characters safe for a local file name.
pub(crate) fn sanitize_store_name(name: &str) -> Option<String> {
    let base = name.trim().rsplit(['/', '\\', ':']).next().unwrap_or_default();
    let clean: String = base
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '(' | ')' | '%' | '-' | '.'))
        .collect();
    let clean = clean.trim_start_matches('.');
    if clean.is_empty() {
        None
    } else {
        Some(clean.to_string())
    }
}

fn to_value(fatal: &FatalSlot, call: &str, value: &Dynamic) -> RhaiResult<Value> {
    rhai::serde::from_dynamic::<Value>(value)
        .map_err(|e| fatal.invalid(call, format!("unsupported value: {e}")))
}

fn lock<'a>(
    ctx: &'a Mutex<SnapshotContext>,
    fatal: &FatalSlot,
) -> RhaiResult<MutexGuard<'a, SnapshotContext>> {
    ctx.lock()
        .map_err(|_| fatal.raise(ScriptError::Runtime("snapshot context poisoned".to_string()).into()))
}

/// Handle to the device CLI.
#[derive(Debug, Clone)]
pub(crate) struct Cli {
    link: HostLink,
    cache: RegexCache,
}

impl Cli {
    pub(crate) fn new(link: HostLink, cache: RegexCache) -> Self {
        Self { link, cache }
    }

    fn fatal(&self) -> &FatalSlot {
        self.link.fatal()
    }

    fn run_macro(&mut self, name: &str) -> RhaiResult<()> {
        if name.trim().is_empty() {
            return Err(self.fatal().invalid("cli.macro", "macro name is empty"));
        }
        self.link.call(|reply| HostRequest::Macro {
            name: name.to_string(),
            reply,
        })
    }

    fn command(&mut self, text: &str, options: CommandOptions) -> RhaiResult<String> {
        self.link
            .call(|reply| HostRequest::Command {
                text: text.to_string(),
                options,
                reply,
            })
            .map(|response| response.output)
    }

    fn command_options(&self, opts: &Map) -> RhaiResult<CommandOptions> {
        let invalid = |message: String| self.fatal().invalid("cli.command", message);
        let mut options = CommandOptions::default();

        for (key, value) in opts {
            match key.as_str() {
                "timeout" => {
                    let ms = value
                        .as_int()
                        .map_err(|t| invalid(format!("timeout must be an integer, got {t}")))?;
                    options.timeout = Some(Duration::from_millis(ms.max(0) as u64));
                }
                "mode" => {
                    let mode = value
                        .clone()
                        .into_string()
                        .map_err(|t| invalid(format!("mode must be a string, got {t}")))?;
                    options.mode = Some(mode);
                }
                "modes" => {
                    let modes = value
                        .clone()
                        .into_typed_array::<rhai::ImmutableString>()
                        .map_err(|t| invalid(format!("modes must be an array of strings, got {t}")))?;
                    options.modes = modes.into_iter().map(|m| m.to_string()).collect();
                }
                "clearPrompt" => {
                    options.clear_prompt = value
                        .as_bool()
                        .map_err(|t| invalid(format!("clearPrompt must be a boolean, got {t}")))?;
                }
                "noCr" => {
                    options.no_cr = value
                        .as_bool()
                        .map_err(|t| invalid(format!("noCr must be a boolean, got {t}")))?;
                }
                other => debug!("Ignoring unknown command option '{}'", other),
            }
        }
        Ok(options)
    }

    fn find_sections(&mut self, text: &str, pattern: &str) -> RhaiResult<Array> {
        let re = self
            .cache
            .get(pattern)
            .map_err(|e| self.fatal().invalid("cli.findSections", format!("invalid pattern: {e}")))?;
        Ok(find_sections(text, &re)
            .into_iter()
            .map(|section| {
                let captures = Dynamic::from_array(captures_to_array(&section.captures));
                let mut map = Map::new();
                map.insert("match".into(), captures.clone());
                map.insert("captures".into(), captures);
                map.insert("config".into(), Dynamic::from(section.config));
                Dynamic::from_map(map)
            })
            .collect())
    }

    fn sleep(&mut self, ms: INT) -> RhaiResult<()> {
        let duration = Duration::from_millis(ms.max(0) as u64);
        self.link.call(|reply| HostRequest::Sleep { duration, reply })
    }
}

/// Device facts of the current run.
#[derive(Debug, Clone)]
pub(crate) struct Device {
    ctx: Arc<Mutex<SnapshotContext>>,
    descriptor: Arc<DriverDescriptor>,
    fatal: FatalSlot,
    trace: DebugTrace,
}

impl Device {
    pub(crate) fn new(
        ctx: Arc<Mutex<SnapshotContext>>,
        descriptor: Arc<DriverDescriptor>,
        fatal: FatalSlot,
        trace: DebugTrace,
    ) -> Self {
        Self {
            ctx,
            descriptor,
            fatal,
            trace,
        }
    }

    fn set(&mut self, key: &str, value: Dynamic) -> RhaiResult<()> {
        let value = to_value(&self.fatal, "device.set", &value)?;
        let mut ctx = lock(&self.ctx, &self.fatal)?;
        if let Err(e) = ctx.set_fact(&self.descriptor.device_attributes, key, value) {
            warn!("Ignoring device attribute '{}': {}", key, e);
            self.trace.push(format!("Ignoring device attribute '{key}': {e}"));
        }
        Ok(())
    }

    fn add(&mut self, key: &str, value: Dynamic) -> RhaiResult<()> {
        let value = to_value(&self.fatal, "device.add", &value)?;
        lock(&self.ctx, &self.fatal)?.add_fact(key, value);
        Ok(())
    }

    fn get(&mut self, key: &str) -> RhaiResult<Dynamic> {
        let ctx = lock(&self.ctx, &self.fatal)?;
        match ctx.facts.get(key) {
            Some(value) => rhai::serde::to_dynamic(value),
            None => Ok(Dynamic::UNIT),
        }
    }
}

/// Configuration fields of the current run.
#[derive(Debug, Clone)]
pub(crate) struct Config {
    ctx: Arc<Mutex<SnapshotContext>>,
    descriptor: Arc<DriverDescriptor>,
    link: HostLink,
    download_dir: PathBuf,
    trace: DebugTrace,
}

/// Parsed options of `config.download`.
struct DownloadOptions {
    method: DownloadMethod,
    store_name: Option<String>,
    checksum: Option<String>,
}

impl Config {
    pub(crate) fn new(
        ctx: Arc<Mutex<SnapshotContext>>,
        descriptor: Arc<DriverDescriptor>,
        link: HostLink,
        download_dir: PathBuf,
        trace: DebugTrace,
    ) -> Self {
        Self {
            ctx,
            descriptor,
            link,
            download_dir,
            trace,
        }
    }

    fn fatal(&self) -> &FatalSlot {
        self.link.fatal()
    }

    fn set(&mut self, key: &str, value: Dynamic) -> RhaiResult<()> {
        if value.is_unit() {
            return Ok(());
        }
        let value = to_value(self.fatal(), "config.set", &value)?;
        let mut ctx = lock(&self.ctx, self.fatal())?;
        match ctx.set_config(&self.descriptor.config_attributes, key, value) {
            Ok(true) => {}
            Ok(false) => {
                warn!("Ignoring undeclared config attribute '{}'", key);
                self.trace.push(format!("Ignoring undeclared config attribute '{key}'"));
            }
            Err(e) => {
                warn!("Ignoring config attribute '{}': {}", key, e);
                self.trace.push(format!("Ignoring config attribute '{key}': {e}"));
            }
        }
        Ok(())
    }

    fn compute_hash(&mut self, parts: Array) -> RhaiResult<String> {
        let mut hasher = Sha256::new();
        for part in parts {
            let text = part
                .into_string()
                .map_err(|t| self.fatal().invalid("config.computeHash", format!("expected strings, got {t}")))?;
            hasher.update(text.as_bytes());
        }
        let hash = hex(&hasher.finalize());
        debug!("Computed custom hash is {}", hash);
        lock(&self.ctx, self.fatal())?.custom_hash = Some(hash.clone());
        Ok(hash)
    }

    fn custom_hash(&mut self) -> RhaiResult<Dynamic> {
        let ctx = lock(&self.ctx, self.fatal())?;
        Ok(ctx.custom_hash.clone().map(Dynamic::from).unwrap_or(Dynamic::UNIT))
    }

    fn last_custom_hash(&mut self) -> RhaiResult<Dynamic> {
        let ctx = lock(&self.ctx, self.fatal())?;
        Ok(ctx.last_custom_hash.clone().map(Dynamic::from).unwrap_or(Dynamic::UNIT))
    }

    fn download_options(&self, opts: &Map) -> RhaiResult<DownloadOptions> {
        let invalid = |message: String| self.fatal().invalid("config.download", message);
        let text = |key: &str| -> RhaiResult<Option<String>> {
            match opts.get(key) {
                None => Ok(None),
                Some(v) if v.is_unit() => Ok(None),
                Some(v) => v
                    .clone()
                    .into_string()
                    .map(Some)
                    .map_err(|t| invalid(format!("{key} must be a string, got {t}"))),
            }
        };

        let method = match text("method")?.as_deref() {
            None | Some("sftp") => DownloadMethod::Sftp,
            Some("scp") => DownloadMethod::Scp,
            Some(other) => return Err(invalid(format!("invalid download method '{other}'"))),
        };
        let checksum = text("checksum")?.map(|c| c.trim().to_ascii_lowercase());
        if let Some(sum) = &checksum {
            if !matches!(sum.len(), 32 | 64) || !sum.chars().all(|c| c.is_ascii_hexdigit()) {
                return Err(invalid(format!(
                    "unsupported checksum '{sum}', expected 32 (MD5) or 64 (SHA-256) hex digits"
                )));
            }
        }
        Ok(DownloadOptions {
            method,
            store_name: text("storeName")?,
            checksum,
        })
    }

    fn download(&mut self, key: &str, remote: &str, opts: &Map) -> RhaiResult<()> {
        let options = self.download_options(opts)?;
        match self.descriptor.config_attributes.get(key) {
            Some(spec) if spec.kind == AttributeType::BinaryFile => {}
            Some(_) => {
                return Err(self
                    .fatal()
                    .invalid("config.download", format!("attribute '{key}' is not a binary file")));
            }
            None => {
                return Err(self
                    .fatal()
                    .invalid("config.download", format!("unknown config attribute '{key}'")));
            }
        }

        let name = options
            .store_name
            .as_deref()
            .and_then(sanitize_store_name)
            .or_else(|| sanitize_store_name(remote))
            .ok_or_else(|| {
                self.fatal()
                    .invalid("config.download", format!("no usable file name for '{remote}'"))
            })?;

        std::fs::create_dir_all(&self.download_dir)
            .map_err(|e| self.fatal().raise(TransportError::Io(e).into()))?;
        let local = self.download_dir.join(&name);

        let size = self.link.call(|reply| HostRequest::Download {
            method: options.method,
            remote: remote.to_string(),
            local: local.clone(),
            reply,
        })?;

        if let Some(expected) = &options.checksum {
            let actual = file_digest(&local, expected.len())
                .map_err(|e| self.fatal().raise(TransportError::Io(e).into()))?;
            if actual != *expected {
                let _ = std::fs::remove_file(&local);
                return Err(self.fatal().raise(
                    ScriptError::ChecksumMismatch {
                        path: remote.to_string(),
                        expected: expected.clone(),
                        actual,
                    }
                    .into(),
                ));
            }
            self.trace
                .push(format!("Checksum of downloaded file was verified ({actual})"));
        }

        lock(&self.ctx, self.fatal())?.add_file(DownloadedFile {
            attribute: key.to_string(),
            remote_path: remote.to_string(),
            local_path: local,
            size,
            checksum: options.checksum,
        });
        Ok(())
    }
}

/// MD5 for 32 hex digits, SHA-256 otherwise.
fn file_digest(path: &Path, hex_len: usize) -> std::io::Result<String> {
    let data = std::fs::read(path)?;
    Ok(if hex_len == 32 {
        hex(&Md5::digest(&data))
    } else {
        hex(&Sha256::digest(&data))
    })
}

/// Register the host objects and their methods.
pub(crate) fn register(engine: &mut Engine, trace: DebugTrace) {
    engine
        .register_type_with_name::<CommandFailure>("CommandError")
        .register_get("message", |e: &mut CommandFailure| e.message.clone())
        .register_get("command", |e: &mut CommandFailure| e.command.clone())
        .register_fn("to_string", |e: &mut CommandFailure| e.to_string())
        .register_fn("to_debug", |e: &mut CommandFailure| e.to_string());

    engine
        .register_type_with_name::<Cli>("Cli")
        .register_fn("macro", Cli::run_macro)
        .register_fn("command", |cli: &mut Cli, text: &str| {
            cli.command(text, CommandOptions::default())
        })
        .register_fn("command", |cli: &mut Cli, text: &str, opts: Map| {
            let options = cli.command_options(&opts)?;
            cli.command(text, options)
        })
        .register_fn("findSections", Cli::find_sections)
        .register_fn("sleep", Cli::sleep)
        .register_fn(super::DEBUG_FN, move |_: &mut Cli, message: &str| trace.push(message));

    engine
        .register_type_with_name::<Device>("Device")
        .register_fn("set", Device::set)
        .register_fn("add", Device::add)
        .register_fn("get", Device::get);

    engine
        .register_type_with_name::<Config>("Config")
        .register_fn("set", Config::set)
        .register_fn("computeHash", Config::compute_hash)
        .register_fn("computeHash", |c: &mut Config, a: &str| {
            c.compute_hash(vec![a.into()])
        })
        .register_fn("computeHash", |c: &mut Config, a: &str, b: &str| {
            c.compute_hash(vec![a.into(), b.into()])
        })
        .register_fn("computeHash", |c: &mut Config, a: &str, b: &str, d: &str| {
            c.compute_hash(vec![a.into(), b.into(), d.into()])
        })
        .register_fn(
            "computeHash",
            |c: &mut Config, a: &str, b: &str, d: &str, e: &str| {
                c.compute_hash(vec![a.into(), b.into(), d.into(), e.into()])
            },
        )
        .register_fn("getCustomHash", Config::custom_hash)
        .register_fn("getLastCustomHash", Config::last_custom_hash)
        .register_fn("download", |c: &mut Config, key: &str, remote: &str| {
            c.download(key, remote, &Map::new())
        })
        .register_fn("download", |c: &mut Config, key: &str, remote: &str, opts: Map| {
            c.download(key, remote, &opts)
        });
}

/// Map an error ending a script run to the engine's error type.
pub(crate) fn script_failure(fatal: &FatalSlot, err: Box<EvalAltResult>) -> Error {
    if let Some(error) = fatal.take() {
        return error;
    }
    let mut err = *err;
    while let EvalAltResult::ErrorInFunctionCall(_, _, inner, _) = err {
        err = *inner;
    }
    match err {
        EvalAltResult::ErrorRuntime(value, _) if value.is::<CommandFailure>() => {
            match value.try_cast::<CommandFailure>() {
                Some(failure) => crate::error::CliError::Command {
                    message: failure.message,
                    command: failure.command,
                }
                .into(),
                None => ScriptError::Runtime("command failed".to_string()).into(),
            }
        }
        EvalAltResult::ErrorTooManyOperations(_) => {
            ScriptError::BudgetExceeded("operation limit reached".to_string()).into()
        }
        EvalAltResult::ErrorFunctionNotFound(signature, _) => ScriptError::Runtime(format!(
            "function not found: {signature}"
        ))
        .into(),
        other => ScriptError::Runtime(other.to_string()).into(),
    }
}
