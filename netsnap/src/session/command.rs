//! Command execution with pager handling.

use std::time::{Duration, Instant};

use log::debug;
use regex::Regex;

use super::{CommandResponse, Session};
use crate::channel::{
    compile_pattern, error_message, pin_prompt, strip_echo, strip_prompted_echo, Candidate,
    Expectation, ModeResolver,
};
use crate::error::{CliError, DescriptorError, Result};

/// Options of a single `cli.command` call.
#[derive(Debug, Clone, Default)]
pub struct CommandOptions {
    /// Overall deadline, instead of the session default.
    pub timeout: Option<Duration>,

    /// Mode the command is expected to run in; the session's current mode by default.
    pub mode: Option<String>,

    /// Other modes the command may land in, checked before the expected mode.
    pub modes: Vec<String>,

    /// Do not pin the prompt and strip a prompt-prefixed echo.
    pub clear_prompt: bool,

    /// Do not append the line terminator.
    pub no_cr: bool,
}

impl CommandOptions {
    /// Set the timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set the expected mode.
    pub fn mode(mut self, mode: impl Into<String>) -> Self {
        self.mode = Some(mode.into());
        self
    }

    /// Add an alternate landing mode.
    pub fn also_mode(mut self, mode: impl Into<String>) -> Self {
        self.modes.push(mode.into());
        self
    }

    /// Disable prompt pinning for this command.
    pub fn clear_prompt(mut self) -> Self {
        self.clear_prompt = true;
        self
    }

    /// Send the command without a line terminator.
    pub fn no_cr(mut self) -> Self {
        self.no_cr = true;
        self
    }
}

impl Session {
    /// The prompt of `mode`, pinned to the last captured prompt literal when
    /// the mode allows it and the session is in that mode.
    fn command_prompt(&self, mode: &str, clear: bool) -> Result<Regex> {
        let spec = self.mode_spec(mode)?;
        let prompt = spec
            .prompt
            .as_ref()
            .ok_or_else(|| CliError::UnknownMode(mode.to_string()))?;

        if clear || spec.clear_prompt || mode != self.current_mode {
            return Ok(prompt.clone());
        }
        match &self.pinned_prompt {
            Some(literal) => {
                let pinned = pin_prompt(prompt.as_str(), literal);
                match compile_pattern(&pinned) {
                    Ok(re) => Ok(re),
                    Err(e) => {
                        debug!("Pinned prompt '{}' does not compile ({}), using '{}'", pinned, e, prompt);
                        Ok(prompt.clone())
                    }
                }
            }
            None => Ok(prompt.clone()),
        }
    }

    /// Send a command and collect its output up to the next prompt.
    ///
    /// Pager prompts are answered and removed, the echoed command is
    /// stripped, and a device error becomes [`CliError::Command`]. Landing
    /// in one of `opts.modes` moves the session to that mode and pins its
    /// prompt; `opts.mode` only selects the prompt, error and pager used.
    pub async fn command(&mut self, text: &str, opts: &CommandOptions) -> Result<CommandResponse> {
        if let Some(mode) = &opts.mode {
            self.mode_spec(mode)?;
            self.apply_pager_avoid(mode).await?;
        }
        self.send_command(text, opts).await
    }

    pub(super) async fn send_command(&mut self, text: &str, opts: &CommandOptions) -> Result<CommandResponse> {
        let started = Instant::now();
        let mode = opts.mode.clone().unwrap_or_else(|| self.current_mode.clone());
        let clear = opts.clear_prompt || self.mode_spec(&mode)?.clear_prompt;
        if clear {
            self.pinned_prompt = None;
        }

        let mut candidates = Vec::with_capacity(opts.modes.len() + 1);
        for alternate in &opts.modes {
            let spec = self.mode_spec(alternate)?;
            let prompt = spec.prompt.clone().ok_or_else(|| DescriptorError::Invalid {
                name: self.descriptor.name().to_string(),
                message: format!("mode '{alternate}' has no prompt"),
            })?;
            candidates.push(Candidate {
                mode: alternate.clone(),
                prompt,
            });
        }
        candidates.push(Candidate {
            mode: mode.clone(),
            prompt: self.command_prompt(&mode, clear)?,
        });

        self.trace.push(format!("Sending command '{}' in mode '{}'", text, mode));

        let (substituted, secret) = self.credentials.substitute(text);
        let mut data = substituted.clone();
        if !opts.no_cr {
            data.push_str(&self.options.line_terminator);
        }

        self.buffer.clear();
        self.transport.write(data.as_bytes()).await?;

        let descriptor = self.descriptor.clone();
        let spec = descriptor
            .mode(&mode)
            .ok_or_else(|| CliError::UnknownMode(mode.clone()))?;
        let pager = match (&spec.pager, spec.pager_pattern()) {
            (Some(pager), Some(pattern)) => Some((pattern, pager.response.as_str())),
            _ => None,
        };
        let expectation = Expectation {
            mode: &mode,
            pager,
            error: spec.error.as_ref(),
            candidates,
            timeout: opts.timeout.unwrap_or(self.options.command_timeout),
        };

        let resolved = ModeResolver::new(self.transport.as_mut(), &mut self.buffer, &self.cancel)
            .poll_interval(self.options.poll_interval)
            .max_pages(self.options.max_pager_iterations)
            .resolve(&expectation)
            .await
            .map_err(|e| self.credentials.redact_error(e))?;

        let mut output = strip_echo(&resolved.output, &substituted);
        if clear {
            output = strip_prompted_echo(&output, &substituted);
        }
        if secret {
            output = self.credentials.redact(&output);
        }

        let device_error = resolved
            .error
            .map(|message| self.credentials.redact(&message))
            .or_else(|| spec.error.as_ref().and_then(|p| error_message(p, &output)));
        if let Some(message) = device_error {
            self.trace.push(format!("Command '{}' failed: {}", text, message));
            return Err(CliError::Command {
                message,
                command: text.to_string(),
            }
            .into());
        }

        let Some(landing) = resolved.landing else {
            return Err(CliError::Command {
                message: "no prompt after device error".to_string(),
                command: text.to_string(),
            }
            .into());
        };

        // Only the alternate modes move the session; the new mode's prompt gets pinned
        if landing.mode != mode && landing.mode != self.current_mode {
            self.set_mode(&landing.mode);
            self.pinned_prompt = landing.capture.clone();
        }

        let elapsed = started.elapsed();
        self.trace.push(format!(
            "Command '{}' returned {} bytes in {:?} ({} pages)",
            text,
            output.len(),
            elapsed,
            resolved.pages
        ));

        Ok(CommandResponse {
            command: text.to_string(),
            output,
            prompt: landing.prompt,
            mode: landing.mode,
            pages: resolved.pages,
            elapsed,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::config::SessionOptions;
    use crate::descriptor::{DriverDescriptor, DriverInfo, MacroSpec, ModeSpec, PagerSpec};
    use crate::error::{Error, ErrorKind};
    use crate::session::tests::session;
    use crate::session::Credentials;
    use crate::transport::{ScriptedTransport, TransportKind};

    async fn enabled(transport: ScriptedTransport) -> (Session, crate::transport::ScriptedHandle) {
        let transport = transport
            .greeting("router#")
            .reply("terminal length 0\n", "terminal length 0\r\nrouter#");
        let (mut session, handle) = session(transport, TransportKind::Ssh);
        session.enter().await.unwrap();
        (session, handle)
    }

    #[tokio::test]
    async fn test_echo_and_prompt_removed() {
        let transport = ScriptedTransport::new().reply(
            "show version\n",
            "show version\r\nCisco IOS Software, Version 15.2(4)M\r\nrouter uptime is 2 weeks\r\nrouter#",
        );
        let (mut session, _) = enabled(transport).await;

        let response = session
            .command("show version", &CommandOptions::default())
            .await
            .unwrap();
        assert_eq!(
            response.output,
            "Cisco IOS Software, Version 15.2(4)M\nrouter uptime is 2 weeks\n"
        );
        assert_eq!(response.prompt, "router#");
        assert_eq!(response.mode, "enable");
        assert_eq!(response.pages, 0);
    }

    /// Scenario B: three pages are stitched and the pager prompt is hidden.
    #[tokio::test]
    async fn test_scenario_b_pager() {
        let descriptor = DriverDescriptor::new(DriverInfo::new("ScenarioB"))
            .with_mode(
                ModeSpec::initial("ssh")
                    .with_macro(MacroSpec::new("enable", None, Some("enable")).with_option("enable")),
            )
            .with_mode(
                ModeSpec::new("enable", r"#$")
                    .unwrap()
                    .with_pager(PagerSpec::new(r"--More--$", " ").unwrap()),
            )
            .validated()
            .unwrap();
        let transport = ScriptedTransport::new()
            .greeting("router#")
            .reply("show run\n", "show run\nline 1\n--More--")
            .reply(" ", "\rline 2\n--More--")
            .reply(" ", "\rline 3\nrouter#");
        let handle = transport.handle();
        let mut session = Session::new(
            Arc::new(descriptor),
            Box::new(transport),
            TransportKind::Ssh,
            Credentials::new("admin", "pw"),
            SessionOptions::default().poll_interval(Duration::from_millis(20)),
        );
        session.enter().await.unwrap();

        let response = session.command("show run", &CommandOptions::default()).await.unwrap();
        assert_eq!(response.output, "line 1\nline 2\nline 3\n");
        assert!(!response.output.contains("--More--"));
        assert_eq!(response.pages, 2);
        assert_eq!(handle.written_lines(), vec!["show run\n", " ", " "]);
    }

    /// Scenario C: a device error becomes a command error.
    #[tokio::test]
    async fn test_scenario_c_device_error() {
        let transport = ScriptedTransport::new().reply(
            "show bogus\n",
            "show bogus\r\n               ^\r\n% Invalid input\r\nrouter#",
        );
        let (mut session, _) = enabled(transport).await;

        let err = session
            .command("show bogus", &CommandOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CommandError);
        match err {
            Error::Cli(CliError::Command { message, command }) => {
                assert_eq!(message, "Invalid input");
                assert_eq!(command, "show bogus");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(session.current_mode(), "enable");
    }

    #[tokio::test]
    async fn test_pinned_prompt_ignores_other_hostnames() {
        // A banner line that looks like a prompt of another device
        let transport = ScriptedTransport::new().reply_chunks(
            "show users\n",
            ["show users\r\nswitch#\r\n", "    Line  User\r\n", "router#"],
        );
        let (mut session, _) = enabled(transport).await;

        let response = session.command("show users", &CommandOptions::default()).await.unwrap();
        assert_eq!(response.output, "switch#\n    Line  User\n");
    }

    #[tokio::test]
    async fn test_clear_prompt_strips_prompted_echo() {
        let transport = ScriptedTransport::new()
            .reply("configure terminal\n", "configure terminal\r\nrouter(config)#")
            .reply("hostname core-1\n", "router(config)#hostname core-1\r\ncore-1(config)#");
        let (mut session, _) = enabled(transport).await;
        session.run_macro("configure").await.unwrap();

        let response = session
            .command("hostname core-1", &CommandOptions::default())
            .await
            .unwrap();
        assert_eq!(response.output, "");
        assert_eq!(response.prompt, "core-1(config)#");
    }

    #[tokio::test]
    async fn test_alternate_mode_transitions() {
        let transport = ScriptedTransport::new().reply("configure terminal\n", "router(config)#");
        let (mut session, _) = enabled(transport).await;

        let opts = CommandOptions::default().also_mode("configure");
        let response = session.command("configure terminal", &opts).await.unwrap();
        assert_eq!(response.mode, "configure");
        assert_eq!(session.current_mode(), "configure");
    }

    fn hostname_pinned() -> Arc<DriverDescriptor> {
        let descriptor = DriverDescriptor::new(DriverInfo::new("HostnamePinned"))
            .with_mode(
                ModeSpec::initial("ssh")
                    .with_macro(MacroSpec::new("enable", None, Some("enable")).with_option("enable")),
            )
            .with_mode(ModeSpec::new("enable", r"^([A-Za-z0-9]+#)$").unwrap())
            .with_mode(
                ModeSpec::new("configure", r"^([A-Za-z0-9]+)\(config[a-z\-]*\)#$")
                    .unwrap()
                    .with_error(r"^% (.*)")
                    .unwrap(),
            )
            .with_mode(
                ModeSpec::new("diag", r"^([A-Za-z0-9]+)\(diag\)#$")
                    .unwrap()
                    .with_pager(PagerSpec::new(r"^--More--$", " ").unwrap().with_avoid("terminal length 0")),
            )
            .validated()
            .unwrap();
        Arc::new(descriptor)
    }

    fn pinned_session(transport: ScriptedTransport) -> Session {
        Session::new(
            hostname_pinned(),
            Box::new(transport.greeting("router#")),
            TransportKind::Ssh,
            Credentials::new("admin", "pw"),
            SessionOptions::default()
                .command_timeout(Duration::from_secs(1))
                .poll_interval(Duration::from_millis(20)),
        )
    }

    #[tokio::test]
    async fn test_alternate_mode_landing_pins_new_prompt() {
        let transport = ScriptedTransport::new()
            .reply("configure terminal\n", "configure terminal\r\nrouter(config)#")
            .reply("interface Gi0/1\n", "interface Gi0/1\r\nrouter(config-if)#")
            .reply("description uplink\n", "description uplink\r\nrouter(config-if)#");
        let mut session = pinned_session(transport);
        session.enter().await.unwrap();

        let opts = CommandOptions::default().also_mode("configure");
        session.command("configure terminal", &opts).await.unwrap();
        assert_eq!(session.current_mode(), "configure");

        let response = session
            .command("interface Gi0/1", &CommandOptions::default())
            .await
            .unwrap();
        assert_eq!(response.prompt, "router(config-if)#");
        assert_eq!(response.mode, "configure");

        let response = session
            .command("description uplink", &CommandOptions::default())
            .await
            .unwrap();
        assert_eq!(response.output, "");
    }

    #[tokio::test]
    async fn test_mode_option_scopes_pager_avoid() {
        let transport = ScriptedTransport::new()
            .reply("terminal length 0\n", "terminal length 0\r\nrouter(diag)#")
            .reply("show diag\n", "show diag\r\nall good\r\nrouter(diag)#");
        let handle = transport.handle();
        let mut session = pinned_session(transport);
        session.enter().await.unwrap();

        let response = session
            .command("show diag", &CommandOptions::default().mode("diag"))
            .await
            .unwrap();
        assert_eq!(response.output, "all good\n");
        assert_eq!(handle.written_lines(), vec!["terminal length 0\n", "show diag\n"]);
        assert!(session.trace().contains("Sending command 'terminal length 0' in mode 'diag'"));
        assert!(session.trace().contains("Command 'terminal length 0' returned"));
        assert_eq!(session.current_mode(), "enable");
    }

    #[tokio::test]
    async fn test_secret_output_is_redacted() {
        let transport = ScriptedTransport::new().reply(
            "show secret s3cret\n",
            "show secret s3cret\r\nkey s3cret accepted\r\nrouter#",
        );
        let (mut session, _) = enabled(transport).await;

        let response = session
            .command("show secret $$NetshotPassword$$", &CommandOptions::default())
            .await
            .unwrap();
        assert_eq!(response.output, "key ******** accepted\n");
        assert_eq!(response.command, "show secret $$NetshotPassword$$");
        assert!(!session.trace().contains("s3cret"));
    }

    #[tokio::test]
    async fn test_command_timeout() {
        let transport = ScriptedTransport::new().reply("reload\n", "reload\r\nProceed with reload? [confirm]");
        let (mut session, _) = enabled(transport).await;

        let opts = CommandOptions::default().timeout(Duration::from_millis(100));
        let err = session.command("reload", &opts).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ModeResolutionError);
    }

    #[tokio::test]
    async fn test_unknown_mode_option() {
        let (mut session, _) = enabled(ScriptedTransport::new()).await;
        let opts = CommandOptions::default().mode("rommon");
        let err = session.command("show version", &opts).await.unwrap_err();
        assert!(matches!(err, Error::Cli(CliError::UnknownMode(_))));
    }
}
