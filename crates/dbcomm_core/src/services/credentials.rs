//! Secret sources for connection establishment.
//!
//! The establisher never reads a terminal itself. It asks a
//! `CredentialProvider` for each secret it lacks and reports back whether the
//! secret was accepted, so providers can cache or forget it.
//!
//! ## Providers
//!
//! - `InteractiveCredentialProvider`: masked prompt on a terminal, otherwise a
//!   visible prompt followed by one line of input
//! - `StaticCredentialProvider`: fixed secrets, for scripts and tests
//! - `KeyringCredentialProvider`: remembers accepted secrets in the OS keychain
//!   and falls through to another provider

use crate::error::{DbCommError, DbCommResult};
use crate::models::SecretString;

use keyring::Entry;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::io::{BufRead, BufReader, Write};

/// Service name used for keychain entries.
pub const KEYRING_SERVICE: &str = "dbcomm";

/// Prompt shown when the store password is needed.
pub const STORE_PASSWORD_PROMPT: &str = "Enter AD: ";

/// Which secret is being asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SecretKind {
    /// Directory password for the document store.
    StorePassword,
    /// SSH login password.
    SshPassword,
}

impl SecretKind {
    fn key_prefix(&self) -> &'static str {
        match self {
            Self::StorePassword => "store",
            Self::SshPassword => "ssh",
        }
    }
}

impl fmt::Display for SecretKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::StorePassword => "store password",
            Self::SshPassword => "SSH password",
        })
    }
}

/// A request for one secret.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretRequest {
    /// What is being asked for.
    pub kind: SecretKind,
    /// Account the secret belongs to.
    pub username: String,
    /// Host the secret unlocks.
    pub target: String,
}

impl SecretRequest {
    /// Request the document store password.
    pub fn store_password(username: impl Into<String>, target: impl Into<String>) -> Self {
        Self { kind: SecretKind::StorePassword, username: username.into(), target: target.into() }
    }

    /// Request an SSH login password.
    pub fn ssh_password(username: impl Into<String>, target: impl Into<String>) -> Self {
        Self { kind: SecretKind::SshPassword, username: username.into(), target: target.into() }
    }

    /// Stable storage key, e.g. `store:jdoe@db1:27017`.
    pub fn key(&self) -> String {
        format!("{}:{}@{}", self.kind.key_prefix(), self.username, self.target)
    }

    /// Text shown to the user.
    pub fn prompt(&self) -> String {
        match self.kind {
            SecretKind::StorePassword => STORE_PASSWORD_PROMPT.to_string(),
            SecretKind::SshPassword => format!("SSH password for {}@{}: ", self.username, self.target),
        }
    }
}

/// Source of secrets for the establisher.
pub trait CredentialProvider: Send + Sync {
    /// Produce the secret for `request`. `attempt` starts at 1 and grows after
    /// each rejection.
    fn secret(&self, request: &SecretRequest, attempt: u32) -> DbCommResult<SecretString>;

    /// The secret was accepted by the server.
    fn accepted(&self, _request: &SecretRequest, _secret: &SecretString) {}

    /// The secret was rejected by the server.
    fn rejected(&self, _request: &SecretRequest) {}

    /// Provider name for logging.
    fn name(&self) -> &'static str;
}

// ============================================================================
// InteractiveCredentialProvider
// ============================================================================

/// Asks the user.
///
/// On a terminal the input is masked via `rpassword`. Otherwise the prompt is
/// written visibly and one line is read, so piped input works.
pub struct InteractiveCredentialProvider {
    terminal: bool,
    input: Mutex<Box<dyn BufRead + Send>>,
    output: Mutex<Box<dyn Write + Send>>,
}

impl InteractiveCredentialProvider {
    /// Prompt on the process's stdin/stdout.
    pub fn new() -> Self {
        Self {
            terminal: atty::is(atty::Stream::Stdin),
            input: Mutex::new(Box::new(BufReader::new(std::io::stdin()))),
            output: Mutex::new(Box::new(std::io::stdout())),
        }
    }

    /// Read from `input` and prompt on `output`, never masking.
    pub fn with_io(input: Box<dyn BufRead + Send>, output: Box<dyn Write + Send>) -> Self {
        Self { terminal: false, input: Mutex::new(input), output: Mutex::new(output) }
    }

    fn read_visible(&self, prompt: &str) -> DbCommResult<SecretString> {
        {
            let mut output = self.output.lock();
            output.write_all(prompt.as_bytes())?;
            output.flush()?;
        }

        let mut line = String::new();
        let read = self.input.lock().read_line(&mut line)?;
        if read == 0 {
            return Err(DbCommError::credential(
                "Input closed before a secret was entered",
                Some("Supply the password on stdin or in the configuration"),
            ));
        }
        Ok(SecretString::new(line.trim_end_matches(['\r', '\n'])))
    }
}

impl Default for InteractiveCredentialProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl CredentialProvider for InteractiveCredentialProvider {
    fn secret(&self, request: &SecretRequest, attempt: u32) -> DbCommResult<SecretString> {
        tracing::debug!(kind = %request.kind, attempt, terminal = self.terminal, "Prompting for secret");
        let prompt = request.prompt();
        if self.terminal {
            Ok(SecretString::new(rpassword::prompt_password(prompt)?))
        } else {
            self.read_visible(&prompt)
        }
    }

    fn name(&self) -> &'static str {
        "InteractiveCredentialProvider"
    }
}

impl fmt::Debug for InteractiveCredentialProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InteractiveCredentialProvider").field("terminal", &self.terminal).finish()
    }
}

// ============================================================================
// StaticCredentialProvider
// ============================================================================

/// Fixed secrets per kind. Asking for an absent kind is an error.
#[derive(Debug, Default, Clone)]
pub struct StaticCredentialProvider {
    secrets: HashMap<SecretKind, SecretString>,
}

impl StaticCredentialProvider {
    /// A provider with no secrets; every request fails.
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer `kind` requests with `secret`.
    pub fn with_secret(mut self, kind: SecretKind, secret: impl Into<SecretString>) -> Self {
        self.secrets.insert(kind, secret.into());
        self
    }
}

impl CredentialProvider for StaticCredentialProvider {
    fn secret(&self, request: &SecretRequest, _attempt: u32) -> DbCommResult<SecretString> {
        self.secrets.get(&request.kind).cloned().ok_or_else(|| {
            DbCommError::credential(
                format!("No {} available for {}", request.kind, request.target),
                Some("Provide it in the configuration or allow prompting"),
            )
        })
    }

    fn name(&self) -> &'static str {
        "StaticCredentialProvider"
    }
}

// ============================================================================
// KeyringCredentialProvider
// ============================================================================

/// Remembers accepted secrets in the OS keychain.
///
/// The first attempt for a request is answered from the keychain when an entry
/// exists. Later attempts, and misses, go to the inner provider. A rejected
/// secret is removed so the next run asks again.
pub struct KeyringCredentialProvider {
    service: String,
    inner: Box<dyn CredentialProvider>,
}

impl KeyringCredentialProvider {
    /// Wrap `inner` using the default service name.
    pub fn new(inner: Box<dyn CredentialProvider>) -> Self {
        Self::with_service(KEYRING_SERVICE, inner)
    }

    /// Wrap `inner` with a custom keychain service name.
    pub fn with_service(service: impl Into<String>, inner: Box<dyn CredentialProvider>) -> Self {
        Self { service: service.into(), inner }
    }

    fn entry(&self, request: &SecretRequest) -> DbCommResult<Entry> {
        Ok(Entry::new(&self.service, &request.key())?)
    }

    fn lookup(&self, request: &SecretRequest) -> DbCommResult<Option<SecretString>> {
        match self.entry(request)?.get_password() {
            Ok(secret) => Ok(Some(SecretString::new(secret))),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

impl CredentialProvider for KeyringCredentialProvider {
    fn secret(&self, request: &SecretRequest, attempt: u32) -> DbCommResult<SecretString> {
        if attempt == 1 {
            match self.lookup(request) {
                Ok(Some(secret)) => {
                    tracing::debug!(key = %request.key(), "Secret loaded from keychain");
                    return Ok(secret);
                }
                Ok(None) => {}
                Err(e) => tracing::warn!(error = %e, "Keychain unavailable, asking instead"),
            }
        }
        self.inner.secret(request, attempt)
    }

    fn accepted(&self, request: &SecretRequest, secret: &SecretString) {
        match self.entry(request).and_then(|entry| Ok(entry.set_password(secret.expose())?)) {
            Ok(()) => tracing::debug!(key = %request.key(), "Secret stored in keychain"),
            Err(e) => tracing::warn!(error = %e, "Failed to store secret in keychain"),
        }
        self.inner.accepted(request, secret);
    }

    fn rejected(&self, request: &SecretRequest) {
        let result = self.entry(request).and_then(|entry| match entry.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(e.into()),
        });
        if let Err(e) = result {
            tracing::warn!(error = %e, "Failed to forget rejected secret");
        }
        self.inner.rejected(request);
    }

    fn name(&self) -> &'static str {
        "KeyringCredentialProvider"
    }
}

impl fmt::Debug for KeyringCredentialProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyringCredentialProvider")
            .field("service", &self.service)
            .field("inner", &self.inner.name())
            .finish()
    }
}
