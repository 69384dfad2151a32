//! Device credentials and placeholder substitution.

use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};

use crate::error::{CliError, Error};

/// Placeholder replaced by the username.
pub const USERNAME_PLACEHOLDER: &str = "$$NetshotUsername$$";

/// Placeholder replaced by the password.
pub const PASSWORD_PLACEHOLDER: &str = "$$NetshotPassword$$";

/// Placeholder replaced by the privileged-mode password.
pub const SUPER_PASSWORD_PLACEHOLDER: &str = "$$NetshotSuperPassword$$";

const REDACTED: &str = "********";

/// Credentials used to log into a device.
#[derive(Debug, Clone)]
pub struct Credentials {
    username: String,
    password: SecretString,
    super_password: Option<SecretString>,
    private_key: Option<PathBuf>,
    key_passphrase: Option<SecretString>,
}

impl Credentials {
    /// Create username/password credentials.
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: SecretString::from(password.into()),
            super_password: None,
            private_key: None,
            key_passphrase: None,
        }
    }

    /// Set the privileged-mode (enable) password.
    pub fn with_super_password(mut self, password: impl Into<String>) -> Self {
        self.super_password = Some(SecretString::from(password.into()));
        self
    }

    /// Authenticate SSH with a private key instead of the password.
    pub fn with_private_key(mut self, path: impl Into<PathBuf>, passphrase: Option<String>) -> Self {
        self.private_key = Some(path.into());
        self.key_passphrase = passphrase.map(SecretString::from);
        self
    }

    /// The username.
    pub fn username(&self) -> &str {
        &self.username
    }

    /// The password.
    pub fn password(&self) -> &SecretString {
        &self.password
    }

    /// The privileged-mode password, falling back to the password.
    pub fn super_password(&self) -> &SecretString {
        self.super_password.as_ref().unwrap_or(&self.password)
    }

    /// Private key path, if key authentication is configured.
    pub fn private_key(&self) -> Option<&Path> {
        self.private_key.as_deref()
    }

    /// Private key passphrase.
    pub fn key_passphrase(&self) -> Option<&SecretString> {
        self.key_passphrase.as_ref()
    }

    /// Replace credential placeholders in `text`.
    ///
    /// Returns the substituted text and whether a secret was inserted.
    pub fn substitute(&self, text: &str) -> (String, bool) {
        let mut secret = false;
        let mut out = text.replace(USERNAME_PLACEHOLDER, &self.username);
        if out.contains(SUPER_PASSWORD_PLACEHOLDER) {
            out = out.replace(SUPER_PASSWORD_PLACEHOLDER, self.super_password().expose_secret());
            secret = true;
        }
        if out.contains(PASSWORD_PLACEHOLDER) {
            out = out.replace(PASSWORD_PLACEHOLDER, self.password.expose_secret());
            secret = true;
        }
        (out, secret)
    }

    /// Mask every secret value occurring in `text`.
    pub fn redact(&self, text: &str) -> String {
        let mut out = text.to_string();
        let secrets = [
            Some(&self.password),
            self.super_password.as_ref(),
            self.key_passphrase.as_ref(),
        ];
        for secret in secrets.into_iter().flatten() {
            let value = secret.expose_secret();
            if !value.is_empty() && out.contains(value) {
                out = out.replace(value, REDACTED);
            }
        }
        out
    }

    /// Mask secrets in the device text an error carries.
    pub fn redact_error(&self, error: Error) -> Error {
        match error {
            Error::Cli(CliError::ModeResolution {
                mode,
                timeout,
                buffer,
            }) => CliError::ModeResolution {
                mode,
                timeout,
                buffer: self.redact(&buffer),
            }
            .into(),
            Error::Cli(CliError::Command { message, command }) => CliError::Command {
                message: self.redact(&message),
                command: self.redact(&command),
            }
            .into(),
            other => other,
        }
    }
}
