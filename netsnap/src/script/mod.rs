//! Script host: runs driver functions in a sandboxed Rhai interpreter.
//!
//! Every run gets a fresh [`Engine`] with no module loading, no `eval`
//! and bounded operations, call depth, data sizes and wall-clock time.
//! Driver functions only see their arguments: the `cli`, `device` and
//! `config` objects for a snapshot, plain data for the analysis entry
//! points.

mod analysis;
mod api;
mod capabilities;
mod context;
mod host;
mod request;
mod text;

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use indexmap::IndexMap;
use rhai::{Dynamic, Engine, Scope, Token, AST};
use tokio_util::sync::CancellationToken;

use crate::config::ScriptLimits;
use crate::error::{Error, Result, ScriptError};
use crate::session::DebugTrace;

pub use analysis::{analyze_syslog, analyze_trap, snmp_auto_discover};
pub use capabilities::{check_requirements, has_capability, CAPABILITIES, HOST_API_VERSION};
pub use context::{DownloadedFile, SnapshotContext};
pub use host::ScriptHost;
pub use request::CommandFailure;
pub use text::{find_sections, Section};

use request::FatalSlot;
use text::RegexCache;

/// Native function behind `cli.debug(..)` and the analysis `debug` callback.
pub(crate) const DEBUG_FN: &str = "debug_message";

/// The compiled functions of a driver.
#[derive(Debug, Clone)]
pub struct DriverProgram {
    ast: AST,
    functions: IndexMap<String, usize>,
}

impl DriverProgram {
    /// Keep the function definitions of a compiled driver file.
    pub(crate) fn new(ast: &AST) -> Self {
        let ast = ast.clone_functions_only();
        let mut functions = IndexMap::new();
        for f in ast.iter_functions() {
            functions.entry(f.name.to_string()).or_insert(f.params.len());
        }
        Self { ast, functions }
    }

    /// Whether the driver defines a function.
    pub fn has_function(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    /// Number of parameters of a function.
    pub fn arity(&self, name: &str) -> Option<usize> {
        self.functions.get(name).copied()
    }

    /// Names of the defined functions.
    pub fn functions(&self) -> impl Iterator<Item = &str> {
        self.functions.keys().map(String::as_str)
    }

    /// This program extended with the functions of a user script.
    pub(crate) fn with_script(&self, script: &AST) -> Self {
        let merged = self.ast.merge(&script.clone_functions_only());
        Self::new(&merged)
    }
}

/// Limits and hooks of one interpreter instance.
#[derive(Debug, Clone)]
pub(crate) struct Sandbox {
    pub limits: ScriptLimits,
    pub trace: DebugTrace,
    pub fatal: FatalSlot,
    pub cache: RegexCache,
    pub cancel: Option<CancellationToken>,
    pub deadline: Option<Instant>,
}

impl Sandbox {
    pub(crate) fn new(limits: ScriptLimits, trace: DebugTrace) -> Self {
        let cache = RegexCache::new(limits.regex_cache_size);
        Self {
            limits,
            trace,
            fatal: FatalSlot::default(),
            cache,
            cancel: None,
            deadline: None,
        }
    }

    /// Stop the interpreter when `cancel` fires.
    pub(crate) fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Stop the interpreter once the time budget is spent.
    pub(crate) fn with_time_budget(mut self) -> Self {
        self.deadline = Some(Instant::now() + self.limits.time_budget);
        self
    }

    /// Build a configured engine.
    pub(crate) fn engine(&self) -> Engine {
        let mut engine = Engine::new();
        let limits = &self.limits;
        engine.set_max_operations(limits.max_operations);
        engine.set_max_call_levels(limits.max_call_levels);
        engine.set_max_expr_depths(limits.max_expr_depth, limits.max_expr_depth);
        engine.set_max_string_size(limits.max_string_size);
        engine.set_max_array_size(limits.max_array_size);
        engine.set_max_map_size(limits.max_map_size);
        engine.disable_symbol("eval");

        // `debug` is a reserved keyword: `cli.debug(..)` is renamed while tokenizing
        let after_period = AtomicBool::new(false);
        #[allow(deprecated)]
        engine.on_parse_token(move |token, _, _| {
            let follows_period =
                after_period.swap(matches!(token, Token::Period | Token::Elvis), Ordering::Relaxed);
            match token {
                Token::Reserved(name) if follows_period && name.as_str() == "debug" => {
                    Token::Identifier(Box::new(DEBUG_FN.into()))
                }
                other => other,
            }
        });

        let trace = self.trace.clone();
        engine.on_print(move |text| trace.push(text));
        let trace = self.trace.clone();
        engine.on_debug(move |text, _, _| trace.push(text));
        let trace = self.trace.clone();
        engine.register_fn(DEBUG_FN, move |message: &str| trace.push(message));

        let fatal = self.fatal.clone();
        let cancel = self.cancel.clone();
        let deadline = self.deadline;
        let budget = limits.time_budget;
        engine.on_progress(move |ops| {
            if ops % 128 != 0 {
                return None;
            }
            if cancel.as_ref().is_some_and(|c| c.is_cancelled()) {
                fatal.record(Error::Cancelled);
                return Some(Dynamic::from("cancelled"));
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                fatal.record(ScriptError::BudgetExceeded(format!("time budget of {budget:?} exceeded")).into());
                return Some(Dynamic::from("time budget exceeded"));
            }
            None
        });

        engine.register_fn("host_api_version", || HOST_API_VERSION);
        engine.register_fn("has_capability", |name: &str| has_capability(name));

        text::register(&mut engine, self.cache.clone(), self.fatal.clone());
        api::register(&mut engine, self.trace.clone());
        engine
    }

    /// Call a driver function with as many of `args` as it declares.
    pub(crate) fn call(
        &self,
        engine: &Engine,
        program: &DriverProgram,
        name: &str,
        mut args: Vec<Dynamic>,
    ) -> Result<Dynamic> {
        let arity = program
            .arity(name)
            .ok_or_else(|| ScriptError::MissingFunction(name.to_string()))?;
        if arity > args.len() {
            return Err(ScriptError::InvalidCall {
                call: name.to_string(),
                message: format!("declares {arity} parameters, {} are provided", args.len()),
            }
            .into());
        }
        args.truncate(arity);

        let mut scope = Scope::new();
        engine
            .call_fn::<Dynamic>(&mut scope, &program.ast, name, args)
            .map_err(|e| api::script_failure(&self.fatal, e))
    }
}

/// Truthiness of a driver function result.
pub(crate) fn truthy(value: &Dynamic) -> bool {
    if let Ok(b) = value.as_bool() {
        return b;
    }
    if let Ok(i) = value.as_int() {
        return i != 0;
    }
    if value.is_string() {
        return value.clone().into_string().is_ok_and(|s| !s.is_empty());
    }
    !value.is_unit()
}
