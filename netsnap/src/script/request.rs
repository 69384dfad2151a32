//! Bridge between the blocking interpreter thread and the async session.
//!
//! The interpreter never touches the session directly. Each host call that
//! needs the device is turned into a [`HostRequest`] carrying a oneshot
//! reply channel, and the interpreter thread blocks until the async side
//! has served it.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rhai::{Dynamic, EvalAltResult, Position};
use tokio::sync::{mpsc, oneshot};

use crate::error::{CliError, Error, Result, ScriptError};
use crate::session::{CommandOptions, CommandResponse};
use crate::transport::DownloadMethod;

/// A device operation requested by a script.
#[derive(Debug)]
pub(crate) enum HostRequest {
    Macro {
        name: String,
        reply: oneshot::Sender<Result<()>>,
    },
    Command {
        text: String,
        options: CommandOptions,
        reply: oneshot::Sender<Result<CommandResponse>>,
    },
    Sleep {
        duration: Duration,
        reply: oneshot::Sender<Result<()>>,
    },
    Download {
        method: DownloadMethod,
        remote: String,
        local: PathBuf,
        reply: oneshot::Sender<Result<u64>>,
    },
}

/// A device error, as seen by scripts.
///
/// This is the only error a script can intercept with `try`/`catch`.
#[derive(Debug, Clone)]
pub struct CommandFailure {
    /// Error text reported by the device.
    pub message: String,

    /// Command that failed, placeholders not substituted.
    pub command: String,
}

impl std::fmt::Display for CommandFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "CLI error returned by the device: '{}' after command '{}'", self.message, self.command)
    }
}

/// Holds the error that terminated a script, first one wins.
#[derive(Debug, Clone, Default)]
pub(crate) struct FatalSlot(Arc<Mutex<Option<Error>>>);

impl FatalSlot {
    /// Record `error` and build the uncatchable interpreter error.
    pub(crate) fn raise(&self, error: Error) -> Box<EvalAltResult> {
        let message = error.to_string();
        self.record(error);
        EvalAltResult::ErrorTerminated(Dynamic::from(message), Position::NONE).into()
    }

    /// Record `error` unless an earlier one is already held.
    pub(crate) fn record(&self, error: Error) {
        if let Ok(mut slot) = self.0.lock() {
            if slot.is_none() {
                *slot = Some(error);
            }
        }
    }

    /// Reject a host call made with bad arguments.
    pub(crate) fn invalid(&self, call: &str, message: impl Into<String>) -> Box<EvalAltResult> {
        self.raise(
            ScriptError::InvalidCall {
                call: call.to_string(),
                message: message.into(),
            }
            .into(),
        )
    }

    pub(crate) fn take(&self) -> Option<Error> {
        self.0.lock().ok().and_then(|mut slot| slot.take())
    }

    pub(crate) fn is_set(&self) -> bool {
        self.0.lock().map(|slot| slot.is_some()).unwrap_or(false)
    }
}

/// Interpreter-side handle used to submit requests.
#[derive(Debug, Clone)]
pub(crate) struct HostLink {
    requests: mpsc::Sender<HostRequest>,
    fatal: FatalSlot,
}

impl HostLink {
    pub(crate) fn new(requests: mpsc::Sender<HostRequest>, fatal: FatalSlot) -> Self {
        Self { requests, fatal }
    }

    pub(crate) fn fatal(&self) -> &FatalSlot {
        &self.fatal
    }

    /// Submit a request and block the interpreter thread until it is served.
    ///
    /// Device errors become catchable script errors, anything else ends
    /// the script.
    pub(crate) fn call<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<Result<T>>) -> HostRequest,
    ) -> std::result::Result<T, Box<EvalAltResult>> {
        let (tx, rx) = oneshot::channel();
        if self.requests.blocking_send(build(tx)).is_err() {
            return Err(self.fatal.raise(Error::Cancelled));
        }
        match rx.blocking_recv() {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(Error::Cli(CliError::Command { message, command }))) => {
                let failure = CommandFailure { message, command };
                Err(EvalAltResult::ErrorRuntime(Dynamic::from(failure), Position::NONE).into())
            }
            Ok(Err(error)) => Err(self.fatal.raise(error)),
            Err(_) => Err(self.fatal.raise(Error::Cancelled)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_fatal_error_wins() {
        let slot = FatalSlot::default();
        let err = slot.raise(Error::Cancelled);
        assert!(matches!(*err, EvalAltResult::ErrorTerminated(..)));
        slot.invalid("cli.macro", "macro name is empty");
        assert!(matches!(slot.take(), Some(Error::Cancelled)));
        assert!(!slot.is_set());
    }

    #[tokio::test]
    async fn test_command_error_is_catchable() {
        let (tx, mut rx) = mpsc::channel(1);
        let link = HostLink::new(tx, FatalSlot::default());

        let server = tokio::spawn(async move {
            if let Some(HostRequest::Command { reply, .. }) = rx.recv().await {
                let _ = reply.send(Err(CliError::Command {
                    message: "Invalid input".to_string(),
                    command: "show bogus".to_string(),
                }
                .into()));
            }
        });

        let err = tokio::task::spawn_blocking(move || {
            link.call(|reply| HostRequest::Command {
                text: "show bogus".to_string(),
                options: CommandOptions::default(),
                reply,
            })
            .unwrap_err()
        })
        .await
        .unwrap();
        server.await.unwrap();

        assert!(err.is_catchable());
        match *err {
            EvalAltResult::ErrorRuntime(value, _) => {
                let failure = value.try_cast::<CommandFailure>().unwrap();
                assert_eq!(failure.message, "Invalid input");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_closed_host_terminates() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let fatal = FatalSlot::default();
        let link = HostLink::new(tx, fatal.clone());

        let err = tokio::task::spawn_blocking(move || {
            link.call(|reply| HostRequest::Sleep {
                duration: Duration::from_millis(1),
                reply,
            })
            .unwrap_err()
        })
        .await
        .unwrap();
        assert!(!err.is_catchable());
        assert!(matches!(fatal.take(), Some(Error::Cancelled)));
    }
}
