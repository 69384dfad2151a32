//! Device sessions: the CLI state machine driven over a transport.
//!
//! A [`Session`] owns one transport, tracks the current mode, runs macros
//! planned by the [`Pathfinder`] and executes commands with pager handling.
//! It is created per device task and owned by exactly one worker.

mod command;
mod credentials;
pub mod pathfinder;
mod response;
mod trace;

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, warn};
use tokio_util::sync::CancellationToken;

use crate::channel::{Candidate, Expectation, ModeResolver, PatternBuffer};
use crate::config::SessionOptions;
use crate::descriptor::{DriverDescriptor, MacroSpec, ModeSpec};
use crate::error::{CliError, DescriptorError, Error, Result};
use crate::transport::{DownloadMethod, Transport, TransportKind};

pub use command::CommandOptions;
pub use credentials::{
    Credentials, PASSWORD_PLACEHOLDER, SUPER_PASSWORD_PLACEHOLDER, USERNAME_PLACEHOLDER,
};
pub use pathfinder::{Pathfinder, Step};
pub use response::CommandResponse;
pub use trace::DebugTrace;

/// An interactive CLI session with one device.
pub struct Session {
    descriptor: Arc<DriverDescriptor>,
    transport: Box<dyn Transport>,
    transport_kind: TransportKind,
    buffer: PatternBuffer,
    options: SessionOptions,
    credentials: Credentials,
    trace: DebugTrace,
    cancel: CancellationToken,

    current_mode: String,
    history: Vec<String>,

    /// Literal of the last macro prompt's first group, used to pin prompts.
    pinned_prompt: Option<String>,

    /// Modes whose pager-avoid commands were already sent.
    pager_applied: HashSet<String>,

    closed: bool,
}

impl Session {
    /// Create a session over an open transport, in the transport's initial mode.
    pub fn new(
        descriptor: Arc<DriverDescriptor>,
        transport: Box<dyn Transport>,
        transport_kind: TransportKind,
        credentials: Credentials,
        options: SessionOptions,
    ) -> Self {
        let initial = transport_kind.initial_mode().to_string();
        Self {
            descriptor,
            transport,
            transport_kind,
            buffer: PatternBuffer::new(options.search_depth),
            trace: DebugTrace::new().with_credentials(credentials.clone()),
            options,
            credentials,
            cancel: CancellationToken::new(),
            current_mode: initial.clone(),
            history: vec![initial],
            pinned_prompt: None,
            pager_applied: HashSet::new(),
            closed: false,
        }
    }

    /// Use a shared debug trace.
    pub fn with_trace(mut self, trace: DebugTrace) -> Self {
        self.trace = trace.with_credentials(self.credentials.clone());
        self
    }

    /// Use a cancellation token checked at every blocking point.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// The current mode name.
    pub fn current_mode(&self) -> &str {
        &self.current_mode
    }

    /// Every mode the session went through, starting with the initial one.
    pub fn mode_history(&self) -> &[String] {
        &self.history
    }

    /// The credentials used for placeholders and redaction.
    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    /// The session's debug trace.
    pub fn trace(&self) -> &DebugTrace {
        &self.trace
    }

    /// The driver descriptor.
    pub fn descriptor(&self) -> &Arc<DriverDescriptor> {
        &self.descriptor
    }

    /// The session options.
    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    /// The cancellation token.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    fn mode_spec(&self, name: &str) -> Result<&ModeSpec> {
        self.descriptor
            .mode(name)
            .ok_or_else(|| CliError::UnknownMode(name.to_string()).into())
    }

    fn set_mode(&mut self, mode: &str) {
        if self.current_mode != mode {
            debug!("Mode change: '{}' -> '{}'", self.current_mode, mode);
        }
        self.current_mode = mode.to_string();
        self.history.push(mode.to_string());
    }

    /// Run the transport's entry macro to reach an authenticated mode.
    pub async fn enter(&mut self) -> Result<()> {
        let name = self
            .descriptor
            .entry_macro(self.transport_kind)
            .ok_or_else(|| DescriptorError::NoEntryMacro {
                name: self.descriptor.name().to_string(),
                transport: self.transport_kind.to_string(),
            })?
            .to_string();
        self.trace
            .push(format!("Entering the CLI over {} using macro '{}'", self.transport_kind, name));
        self.run_macro(&name).await
    }

    /// Run the macro `name`, driving toward the nearest mode offering it.
    ///
    /// Landing in an unplanned mode is handled in this order: a failure
    /// mode aborts, an `auto` macro runs, otherwise the path is planned
    /// again from where the session landed.
    pub async fn run_macro(&mut self, name: &str) -> Result<()> {
        if self.current_mode == name {
            return Ok(());
        }
        self.trace.push(format!(
            "Macro '{}' was called (current mode is '{}')",
            name, self.current_mode
        ));

        let descriptor = self.descriptor.clone();
        let pathfinder = Pathfinder::new(&descriptor.modes);
        let mut plan = pathfinder.plan_macro(&self.current_mode, name)?;
        let final_target = plan
            .last()
            .and_then(|step| pathfinder.target_of(step))
            .map(str::to_string);
        plan.reverse();

        let mut steps = 0usize;
        loop {
            let on_plan = plan.last().is_some_and(|s| s.mode == self.current_mode);
            let next = if on_plan { plan.pop() } else { None };
            let step = match next {
                Some(step) => step,
                None => {
                    let landed = self.mode_spec(&self.current_mode)?;
                    if landed.auto_macro().is_some() {
                        Step {
                            mode: self.current_mode.clone(),
                            macro_name: crate::descriptor::AUTO_MACRO.to_string(),
                        }
                    } else {
                        match pathfinder.plan_macro(&self.current_mode, name) {
                            Ok(mut replanned) => {
                                replanned.reverse();
                                plan = replanned;
                                match plan.pop() {
                                    Some(step) => step,
                                    None => continue,
                                }
                            }
                            Err(_) => {
                                return Err(CliError::UnexpectedMode {
                                    name: name.to_string(),
                                    target: final_target.clone().unwrap_or_default(),
                                    reached: self.current_mode.clone(),
                                }
                                .into());
                            }
                        }
                    }
                }
            };

            steps += 1;
            if steps > self.options.max_macro_steps {
                return Err(CliError::TooManySteps {
                    name: name.to_string(),
                    limit: self.options.max_macro_steps,
                }
                .into());
            }

            let spec = descriptor
                .mode(&step.mode)
                .and_then(|m| m.macros.get(&step.macro_name))
                .ok_or_else(|| CliError::UnknownMode(step.mode.clone()))?;
            let landed = self.execute_macro_step(spec).await?;

            let landed_spec = self.mode_spec(&landed)?;
            if let Some(message) = &landed_spec.fail_message {
                self.trace.push(format!("Reached failure mode '{}': {}", landed, message));
                return Err(CliError::AuthenticationFailure {
                    mode: landed,
                    message: message.clone(),
                }
                .into());
            }

            let at_target = match &final_target {
                Some(target) => *target == landed,
                None => true,
            };
            if plan.is_empty() && at_target {
                self.trace.push(format!("Reached target mode '{}'", landed));
                break;
            }
        }

        let mode = self.current_mode.clone();
        self.apply_pager_avoid(&mode).await
    }

    /// Send one macro's command and resolve the mode it lands in.
    async fn execute_macro_step(&mut self, spec: &MacroSpec) -> Result<String> {
        let from = self.current_mode.clone();
        self.trace.push(format!(
            "Running macro '{}' from mode '{}'",
            spec.name, from
        ));

        if let Some(wait) = spec.wait_before {
            self.sleep(wait).await?;
        }

        self.buffer.clear();
        if let Some(command) = &spec.command {
            let (text, _) = self.credentials.substitute(command);
            let mut data = text;
            if !spec.no_cr {
                data.push_str(&self.options.line_terminator);
            }
            self.transport.write(data.as_bytes()).await?;
        }

        let mut candidates = Vec::with_capacity(spec.options.len());
        for option in &spec.options {
            let mode = self.mode_spec(option)?;
            if let Some(prompt) = &mode.prompt {
                candidates.push(Candidate {
                    mode: option.clone(),
                    prompt: prompt.clone(),
                });
            }
        }

        let descriptor = self.descriptor.clone();
        let from_spec = descriptor.mode(&from);
        let pager = from_spec.and_then(|m| match (&m.pager, m.pager_pattern()) {
            (Some(pager), Some(pattern)) => Some((pattern, pager.response.as_str())),
            _ => None,
        });
        let expectation = Expectation {
            mode: &from,
            pager,
            error: from_spec.and_then(|m| m.error.as_ref()),
            candidates,
            timeout: spec.timeout.unwrap_or(self.options.command_timeout),
        };

        let resolved = ModeResolver::new(self.transport.as_mut(), &mut self.buffer, &self.cancel)
            .poll_interval(self.options.poll_interval)
            .max_pages(self.options.max_pager_iterations)
            .resolve(&expectation)
            .await
            .map_err(|e| self.credentials.redact_error(e))?;

        let command_label = spec.command.clone().unwrap_or_default();
        if let Some(message) = resolved.error {
            return Err(CliError::Command {
                message: self.credentials.redact(&message),
                command: command_label,
            }
            .into());
        }
        let Some(landing) = resolved.landing else {
            return Err(CliError::Command {
                message: "no prompt after device error".to_string(),
                command: command_label,
            }
            .into());
        };

        self.set_mode(&landing.mode);
        self.pinned_prompt = landing.capture;
        self.trace.push(format!(
            "Macro '{}' landed in mode '{}'",
            spec.name, landing.mode
        ));

        if let Some(wait) = spec.wait_after {
            self.sleep(wait).await?;
        }
        Ok(landing.mode)
    }

    /// Send the pager-avoid commands of a mode, once per session.
    async fn apply_pager_avoid(&mut self, mode: &str) -> Result<()> {
        if !self.pager_applied.insert(mode.to_string()) {
            return Ok(());
        }
        let commands = match self.descriptor.mode(mode).and_then(|m| m.pager.as_ref()) {
            Some(pager) => pager.avoid_commands.clone(),
            None => return Ok(()),
        };
        let options = CommandOptions::default().mode(mode);
        for command in commands {
            match self.send_command(&command, &options).await {
                Ok(_) => {}
                Err(e @ (Error::Cancelled | Error::Transport(_))) => return Err(e),
                Err(e) => warn!("Pager avoid command '{}' failed: {}", command, e),
            }
        }
        Ok(())
    }

    /// Sleep without blocking other sessions; aborts on cancellation.
    pub async fn sleep(&mut self, duration: Duration) -> Result<()> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Error::Cancelled),
            _ = tokio::time::sleep(duration) => Ok(()),
        }
    }

    /// Download a remote file over the transport's secondary channel.
    pub async fn download(&mut self, method: DownloadMethod, remote: &str, local: &Path) -> Result<u64> {
        let started = Instant::now();
        let size = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(Error::Cancelled),
            result = self.transport.download(method, remote, local) => result?,
        };
        self.trace.push(format!(
            "Downloaded '{}' over {} ({} bytes in {:?})",
            remote,
            method,
            size,
            started.elapsed()
        ));
        Ok(size)
    }

    /// Close the transport. Safe to call more than once.
    pub async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.transport.close().await
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::descriptor::{DriverInfo, PagerSpec};
    use crate::transport::{ScriptedHandle, ScriptedTransport};

    /// The mode graph of a classic enable/configure CLI.
    pub(crate) fn ios_like() -> Arc<DriverDescriptor> {
        let descriptor = DriverDescriptor::new(DriverInfo::new("IosLike"))
            .with_mode(
                ModeSpec::initial("ssh").with_macro(
                    MacroSpec::new("enable", None, Some("enable")).with_options(["enable", "disable"]),
                ),
            )
            .with_mode(
                ModeSpec::initial("telnet").with_macro(
                    MacroSpec::new("enable", None, Some("enable"))
                        .with_options(["username", "password", "enable", "disable"]),
                ),
            )
            .with_mode(
                ModeSpec::new("username", r"^[Uu]sername: $").unwrap().with_macro(
                    MacroSpec::new("auto", Some("$$NetshotUsername$$"), None)
                        .with_options(["password", "usernameAgain"]),
                ),
            )
            .with_mode(
                ModeSpec::new("password", r"^[Pp]assword: $").unwrap().with_macro(
                    MacroSpec::new("auto", Some("$$NetshotPassword$$"), None)
                        .with_options(["usernameAgain", "disable", "enable"]),
                ),
            )
            .with_mode(
                ModeSpec::new("usernameAgain", r"^[Uu]sername: $")
                    .unwrap()
                    .with_fail("Authentication failed - Telnet authentication failure."),
            )
            .with_mode(
                ModeSpec::new("disable", r"^([A-Za-z\-_0-9\.\/]+>)$")
                    .unwrap()
                    .with_macro(
                        MacroSpec::new("enable", Some("enable"), Some("enable"))
                            .with_options(["enable", "disable", "enableSecret"]),
                    ),
            )
            .with_mode(
                ModeSpec::new("enableSecret", r"^[Pp]assword: ").unwrap().with_macro(
                    MacroSpec::new("auto", Some("$$NetshotSuperPassword$$"), None)
                        .with_options(["disable", "enable", "enableSecretAgain"]),
                ),
            )
            .with_mode(
                ModeSpec::new("enableSecretAgain", r"^[Pp]assword: ")
                    .unwrap()
                    .with_fail("Authentication failed - Wrong enable password."),
            )
            .with_mode(
                ModeSpec::new("enable", r"^([A-Za-z\-_0-9\.\/]+#)$")
                    .unwrap()
                    .with_error(r"^% (.*)")
                    .unwrap()
                    .with_pager(PagerSpec::new(r"^ ?--More--$", " ").unwrap().with_avoid("terminal length 0"))
                    .with_macro(
                        MacroSpec::new("configure", Some("configure terminal"), Some("configure"))
                            .with_options(["enable", "configure"]),
                    ),
            )
            .with_mode(
                ModeSpec::new("configure", r"^([A-Za-z\-_0-9\.\/]+\(conf[0-9\-a-zA-Z]+\)#)$")
                    .unwrap()
                    .with_error(r"^% (.*)")
                    .unwrap()
                    .with_clear_prompt()
                    .with_macro(
                        MacroSpec::new("end", Some("end"), Some("enable")).with_options(["enable", "configure"]),
                    ),
            )
            .validated()
            .unwrap();
        Arc::new(descriptor)
    }

    pub(crate) fn session(transport: ScriptedTransport, kind: TransportKind) -> (Session, ScriptedHandle) {
        let handle = transport.handle();
        let options = SessionOptions::default()
            .command_timeout(Duration::from_secs(2))
            .poll_interval(Duration::from_millis(20));
        let session = Session::new(
            ios_like(),
            Box::new(transport),
            kind,
            Credentials::new("admin", "s3cret").with_super_password("en4ble"),
            options,
        );
        (session, handle)
    }

    /// Scenario A: a single macro from disable to enable.
    fn scenario_a() -> Arc<DriverDescriptor> {
        let descriptor = DriverDescriptor::new(DriverInfo::new("ScenarioA"))
            .with_mode(
                ModeSpec::initial("ssh").with_macro(
                    MacroSpec::new("disable", None, Some("disable")).with_option("disable"),
                ),
            )
            .with_mode(
                ModeSpec::new("disable", r">$").unwrap().with_macro(
                    MacroSpec::new("enable", Some("enable"), Some("enable"))
                        .with_options(["enable", "disable"]),
                ),
            )
            .with_mode(ModeSpec::new("enable", r"#$").unwrap())
            .validated()
            .unwrap();
        Arc::new(descriptor)
    }

    #[tokio::test]
    async fn test_scenario_a_enable_macro() {
        let transport = ScriptedTransport::new()
            .greeting("router>")
            .reply("enable\n", "enable\nrouter#");
        let handle = transport.handle();
        let mut session = Session::new(
            scenario_a(),
            Box::new(transport),
            TransportKind::Ssh,
            Credentials::new("admin", "pw"),
            SessionOptions::default().poll_interval(Duration::from_millis(20)),
        );

        session.enter().await.unwrap();
        assert_eq!(session.current_mode(), "disable");

        session.run_macro("enable").await.unwrap();
        assert_eq!(session.current_mode(), "enable");
        assert_eq!(session.mode_history(), ["ssh", "disable", "enable"]);
        assert_eq!(handle.written_lines(), vec!["enable\n"]);
    }

    #[tokio::test]
    async fn test_macro_named_like_current_mode_is_noop() {
        let transport = ScriptedTransport::new().greeting("router#");
        let (mut session, handle) = session(transport, TransportKind::Ssh);
        session.enter().await.unwrap();
        let writes = handle.writes().len();

        session.run_macro("enable").await.unwrap();
        assert_eq!(handle.writes().len(), writes);
    }

    #[tokio::test]
    async fn test_telnet_login_with_auto_macros() {
        let transport = ScriptedTransport::new()
            .greeting("\r\nUser Access Verification\r\n\r\nUsername: ")
            .reply("admin\n", "admin\r\nPassword: ")
            .reply("s3cret\n", "\r\nrouter>")
            .reply("enable\n", "enable\r\nPassword: ")
            .reply("en4ble\n", "\r\nrouter#")
            .reply("terminal length 0\n", "terminal length 0\r\nrouter#");
        let (mut session, handle) = session(transport, TransportKind::Telnet);

        session.enter().await.unwrap();
        assert_eq!(session.current_mode(), "enable");
        assert_eq!(
            session.mode_history(),
            ["telnet", "username", "password", "disable", "enableSecret", "enable"]
        );
        assert_eq!(
            handle.written_lines(),
            vec!["admin\n", "s3cret\n", "enable\n", "en4ble\n", "terminal length 0\n"]
        );
        assert!(!session.trace().contains("s3cret"));
        assert!(!session.trace().contains("en4ble"));
    }

    #[tokio::test]
    async fn test_fail_mode_is_authentication_failure() {
        let transport = ScriptedTransport::new()
            .greeting("Username: ")
            .reply("admin\n", "admin\r\nPassword: ")
            .reply("s3cret\n", "\r\n% Login invalid\r\n\r\nUsername: ");
        let (mut session, _) = session(transport, TransportKind::Telnet);

        let err = session.enter().await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::AuthenticationFailure);
        assert_eq!(session.current_mode(), "usernameAgain");
    }

    #[tokio::test]
    async fn test_macro_step_budget() {
        // The device keeps answering with the unprivileged prompt
        let transport = ScriptedTransport::new()
            .greeting("router>")
            .reply_always("enable\n", "enable\r\nrouter>");
        let (mut session, _) = session(transport, TransportKind::Ssh);

        let err = session.enter().await.unwrap_err();
        assert!(matches!(err, Error::Cli(CliError::TooManySteps { limit: 10, .. })));
    }

    #[tokio::test]
    async fn test_unknown_macro_is_no_path() {
        let transport = ScriptedTransport::new()
            .greeting("router#")
            .reply("terminal length 0\n", "router#");
        let (mut session, _) = session(transport, TransportKind::Ssh);
        session.enter().await.unwrap();

        let err = session.run_macro("reload").await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::NoPathError);
    }

    #[tokio::test]
    async fn test_multi_step_plan() {
        let transport = ScriptedTransport::new()
            .greeting("router#")
            .reply("terminal length 0\n", "router#")
            .reply("configure terminal\n", "configure terminal\r\nrouter(config)#")
            .reply("end\n", "end\r\nrouter#");
        let (mut session, _) = session(transport, TransportKind::Ssh);
        session.enter().await.unwrap();

        session.run_macro("configure").await.unwrap();
        assert_eq!(session.current_mode(), "configure");
        session.run_macro("end").await.unwrap();
        assert_eq!(session.current_mode(), "enable");
    }

    #[tokio::test]
    async fn test_macro_answers_pager_of_current_mode() {
        let transport = ScriptedTransport::new()
            .greeting("router#")
            .reply("terminal length 0\n", "router#")
            .reply(
                "configure terminal\n",
                "configure terminal\r\nEnter configuration commands, one per line.\r\n --More--",
            )
            .reply(" ", "\rrouter(config)#");
        let (mut session, handle) = session(transport, TransportKind::Ssh);
        session.enter().await.unwrap();

        session.run_macro("configure").await.unwrap();
        assert_eq!(session.current_mode(), "configure");
        assert_eq!(
            handle.written_lines(),
            vec!["terminal length 0\n", "configure terminal\n", " "]
        );
    }

    #[tokio::test]
    async fn test_sleep_is_cancellable() {
        let (mut session, _) = session(ScriptedTransport::new(), TransportKind::Ssh);
        let token = session.cancellation().clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            token.cancel();
        });
        let started = Instant::now();
        let err = session.sleep(Duration::from_secs(5)).await.unwrap_err();
        assert!(matches!(err, Error::Cancelled));
        assert!(started.elapsed() < Duration::from_secs(1));
    }
}
