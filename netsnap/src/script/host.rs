//! Runs a driver function against a live session.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use log::debug;
use rhai::{Dynamic, FnPtr};
use tokio::sync::mpsc;

use super::api::{self, Config, Cli, Device};
use super::context::SnapshotContext;
use super::request::{HostLink, HostRequest};
use super::{DriverProgram, Sandbox};
use crate::config::ScriptLimits;
use crate::error::{Error, Result, ScriptError};
use crate::session::Session;

const SNAPSHOT_FUNCTION: &str = "snapshot";
const RUN_FUNCTION: &str = "run";

/// Executes driver functions for one task, bound to its session.
///
/// The interpreter runs on a blocking thread. Device operations it
/// requests are served here, one at a time, on the task that owns the
/// session.
pub struct ScriptHost<'a> {
    session: &'a mut Session,
    limits: ScriptLimits,
    download_dir: PathBuf,
}

impl<'a> ScriptHost<'a> {
    /// Bind a host to an entered session.
    pub fn new(session: &'a mut Session, limits: ScriptLimits, download_dir: impl Into<PathBuf>) -> Self {
        Self {
            session,
            limits,
            download_dir: download_dir.into(),
        }
    }

    /// Run the driver's `snapshot(cli, device, config)` function.
    pub async fn snapshot(&mut self, ctx: SnapshotContext) -> Result<SnapshotContext> {
        let program = self
            .session
            .descriptor()
            .program
            .clone()
            .filter(|p| p.has_function(SNAPSHOT_FUNCTION))
            .ok_or_else(|| ScriptError::MissingFunction(SNAPSHOT_FUNCTION.to_string()))?;
        self.run(program, SNAPSHOT_FUNCTION, ctx).await
    }

    /// Run the `run(cli, device, config)` function of a user script.
    ///
    /// The script may call the driver's own functions.
    pub async fn run_script(&mut self, source: &str, ctx: SnapshotContext) -> Result<SnapshotContext> {
        let engine = Sandbox::new(self.limits.clone(), self.session.trace().clone()).engine();
        let ast = engine
            .compile(source)
            .map_err(|e| ScriptError::Compile(e.to_string()))?;
        let program = match &self.session.descriptor().program {
            Some(driver) => driver.with_script(&ast),
            None => DriverProgram::new(&ast),
        };
        if !program.has_function(RUN_FUNCTION) {
            return Err(ScriptError::MissingFunction(RUN_FUNCTION.to_string()).into());
        }
        self.run(Arc::new(program), RUN_FUNCTION, ctx).await
    }

    async fn run(
        &mut self,
        program: Arc<DriverProgram>,
        function: &str,
        ctx: SnapshotContext,
    ) -> Result<SnapshotContext> {
        let started = Instant::now();
        let descriptor = self.session.descriptor().clone();
        let trace = self.session.trace().clone();
        let cancel = self.session.cancellation().clone();
        let credentials = self.session.credentials().clone();

        let sandbox = Sandbox::new(self.limits.clone(), trace.clone())
            .with_cancellation(cancel.clone())
            .with_time_budget();
        let fatal = sandbox.fatal.clone();
        let shared = Arc::new(Mutex::new(ctx));
        let (tx, mut rx) = mpsc::channel::<HostRequest>(1);

        trace.push(format!("Running driver function '{function}'"));
        let job = {
            let link = HostLink::new(tx, fatal.clone());
            let shared = shared.clone();
            let download_dir = self.download_dir.clone();
            let function = function.to_string();
            tokio::task::spawn_blocking(move || -> Result<()> {
                let engine = sandbox.engine();
                let cli = Cli::new(link.clone(), sandbox.cache.clone());
                let device = Device::new(
                    shared.clone(),
                    descriptor.clone(),
                    sandbox.fatal.clone(),
                    sandbox.trace.clone(),
                );
                let config = Config::new(shared, descriptor, link, download_dir, sandbox.trace.clone());
                let debug = FnPtr::new(super::DEBUG_FN).map_err(|e| api::script_failure(&sandbox.fatal, e))?;
                let args = vec![
                    Dynamic::from(cli),
                    Dynamic::from(device),
                    Dynamic::from(config),
                    Dynamic::from(debug),
                ];
                sandbox.call(&engine, &program, &function, args).map(|_| ())
            })
        };

        let deadline = tokio::time::Instant::now() + self.limits.time_budget;
        let budget = self.limits.time_budget;
        let budget_error =
            || -> Error { ScriptError::BudgetExceeded(format!("time budget of {budget:?} exceeded")).into() };
        let stopped: Option<Error> = loop {
            let request = tokio::select! {
                biased;
                _ = cancel.cancelled() => break Some(Error::Cancelled),
                _ = tokio::time::sleep_until(deadline) => break Some(budget_error()),
                request = rx.recv() => request,
            };
            let Some(request) = request else {
                break None;
            };
            let served = tokio::select! {
                biased;
                _ = tokio::time::sleep_until(deadline) => false,
                _ = serve(&mut *self.session, request) => true,
            };
            if !served {
                break Some(budget_error());
            }
        };
        if let Some(error) = stopped {
            fatal.record(error);
        }
        drop(rx);

        let result = match job.await {
            Ok(result) => result,
            Err(e) => Err(ScriptError::Runtime(format!("script thread failed: {e}")).into()),
        };
        let result = match fatal.take() {
            Some(error) => Err(error),
            None => result,
        };

        let mut ctx = match shared.lock() {
            Ok(mut guard) => std::mem::take(&mut *guard),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        };
        match result {
            Ok(()) => {
                debug!("Driver function '{}' completed in {:?}", function, started.elapsed());
                trace.push(format!("Driver function '{function}' completed"));
                Ok(ctx)
            }
            Err(e) => {
                debug!(
                    "Driver function '{}' failed: {}",
                    function,
                    credentials.redact(&e.to_string())
                );
                trace.push(format!("Driver function '{function}' failed: {e}"));
                ctx.discard_files();
                Err(e)
            }
        }
    }
}

/// Perform one device operation and send back its outcome.
async fn serve(session: &mut Session, request: HostRequest) {
    match request {
        HostRequest::Macro { name, reply } => {
            let _ = reply.send(session.run_macro(&name).await);
        }
        HostRequest::Command { text, options, reply } => {
            let _ = reply.send(session.command(&text, &options).await);
        }
        HostRequest::Sleep { duration, reply } => {
            let _ = reply.send(session.sleep(duration).await);
        }
        HostRequest::Download {
            method,
            remote,
            local,
            reply,
        } => {
            let _ = reply.send(session.download(method, &remote, &local).await);
        }
    }
}
