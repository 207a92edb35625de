//! Session configuration.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};

use crate::channel::PromptBoundary;
use crate::error::{ConfigError, Result};
use crate::routing::RoutingResolver;

/// Default SSH port.
pub const DEFAULT_PORT: u16 = 22;

/// Default connection timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(360);

/// Default settle time for the fixed-delay fallback.
pub const DEFAULT_SHELL_TIMEOUT: Duration = Duration::from_secs(5);

/// Default pause between two sent commands.
pub const DEFAULT_INTER_COMMAND_DELAY: Duration = Duration::from_secs(1);

/// Default upper bound for prompt counting.
pub const DEFAULT_EXPECT_PROMPT_TIMEOUT: Duration = Duration::from_millis(30_000);

/// Host key verification mode, analogous to OpenSSH's `StrictHostKeyChecking`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum HostKeyVerification {
    /// Reject unknown and changed keys. Connection fails if the host
    /// is not already in known_hosts.
    Strict,

    /// Accept and auto-learn unknown keys, but reject changed keys.
    AcceptNew,

    /// Accept all keys without checking. Network device fleets are
    /// re-imaged and re-keyed often enough that this is the default.
    #[default]
    Disabled,
}

/// Authentication method for a jump host.
#[derive(Debug, Clone)]
pub enum AuthMethod {
    /// Password authentication, with keyboard-interactive fallback.
    Password(SecretString),

    /// Private key authentication.
    PrivateKey {
        /// Path to the private key file.
        path: PathBuf,
        /// Optional passphrase for encrypted keys.
        passphrase: Option<SecretString>,
    },
}

/// Jump host coordinates for proxied routes.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// Jump host name or address.
    pub host: String,

    /// Jump host SSH port.
    pub port: u16,

    /// User on the jump host.
    pub username: String,

    /// Credentials for the jump host.
    pub auth: AuthMethod,
}

impl ProxyConfig {
    /// `host:port` of the jump host.
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// How the initial prompt is discovered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptDetection {
    /// Wait after sending the probe newline before reading.
    pub settle: Duration,

    /// Upper bound for the first read window.
    pub collect: Duration,

    /// Follow-up attempts when the first window finds nothing.
    pub attempts: u32,

    /// Upper bound for each follow-up attempt.
    pub attempt_timeout: Duration,

    /// Prompt assumed when detection is inconclusive.
    pub default_prompt: String,
}

impl Default for PromptDetection {
    fn default() -> Self {
        Self {
            settle: Duration::from_secs(3),
            collect: Duration::from_secs(3),
            attempts: 5,
            attempt_timeout: Duration::from_secs(5),
            default_prompt: "#".to_string(),
        }
    }
}

/// Validated connection and session parameters.
///
/// Built with [`SessionBuilder`](crate::SessionBuilder); every instance that
/// leaves the builder has a non-empty host, username and password.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Target host (hostname or IP address).
    pub host: String,

    /// SSH port.
    pub port: u16,

    /// Username for authentication.
    pub username: String,

    /// Password for authentication.
    pub password: SecretString,

    /// Run commands in an interactive PTY shell instead of exec requests.
    pub invoke_shell: bool,

    /// Prompt signature to count. `None` selects the fixed-delay fallback
    /// unless [`Session::find_prompt`](crate::Session::find_prompt) learns one.
    pub expect_prompt: Option<String>,

    /// Prompt occurrences that complete a batch. `None` derives the count
    /// from the batch itself.
    pub prompt_count: Option<usize>,

    /// Where a counted prompt occurrence may appear.
    pub prompt_boundary: PromptBoundary,

    /// Connection timeout.
    pub timeout: Duration,

    /// Settle time for the fixed-delay fallback.
    pub shell_timeout: Duration,

    /// Pause between two sent commands.
    pub inter_command_delay: Duration,

    /// Upper bound for prompt counting.
    pub expect_prompt_timeout: Duration,

    /// Negotiate legacy algorithms, retry harder and floor the timings.
    pub legacy_mode: bool,

    /// Routing rules. `None` routes everything directly.
    pub routing: Option<Arc<RoutingResolver>>,

    /// Jump host used by [`Route::Proxy`](crate::Route::Proxy).
    pub proxy: Option<ProxyConfig>,

    /// Host key verification mode.
    pub host_key_verification: HostKeyVerification,

    /// Path to known_hosts file.
    pub known_hosts_path: Option<PathBuf>,

    /// Terminal width for PTY.
    pub terminal_width: u32,

    /// Terminal height for PTY.
    pub terminal_height: u32,

    /// Prompt discovery policy.
    pub prompt_detection: PromptDetection,

    /// Pause between two connection attempts.
    pub retry_backoff: Duration,
}

impl SessionConfig {
    /// Check the fields a connection cannot do without.
    ///
    /// Run by [`SessionBuilder`](crate::SessionBuilder) and again whenever a
    /// [`Session`](crate::Session) is created, so a configuration edited
    /// after the builder never reaches the transport with empty credentials.
    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(ConfigError::Missing { field: "host" }.into());
        }
        if self.username.trim().is_empty() {
            return Err(ConfigError::Missing { field: "username" }.into());
        }
        if self.password.expose_secret().is_empty() {
            return Err(ConfigError::Missing { field: "password" }.into());
        }
        if self.port == 0 {
            return Err(ConfigError::Invalid {
                field: "port",
                message: "must be between 1 and 65535".to_string(),
            }
            .into());
        }
        if let Some(proxy) = &self.proxy {
            if proxy.host.trim().is_empty() {
                return Err(ConfigError::Missing { field: "proxy host" }.into());
            }
        }
        Ok(())
    }

    /// `host:port` of the target.
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Connection attempts for retryable failures.
    pub fn connect_attempts(&self) -> u32 {
        if self.legacy_mode { 3 } else { 1 }
    }
}
