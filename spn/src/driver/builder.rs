//! Builder for creating sessions.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use log::debug;
use secrecy::SecretString;

use super::session::Session;
use crate::channel::PromptBoundary;
use crate::error::{ConfigError, Result};
use crate::routing::RoutingResolver;
use crate::transport::config::{
    DEFAULT_EXPECT_PROMPT_TIMEOUT, DEFAULT_INTER_COMMAND_DELAY, DEFAULT_PORT,
    DEFAULT_SHELL_TIMEOUT, DEFAULT_TIMEOUT,
};
use crate::transport::{
    AuthMethod, Connector, HostKeyVerification, PromptDetection, ProxyConfig, SessionConfig,
    SshConnector,
};

/// Legacy devices get at least this long before the fixed-delay read.
const LEGACY_MIN_SHELL_TIMEOUT: Duration = Duration::from_secs(3);
/// Legacy devices get at least this long between two commands.
const LEGACY_MIN_INTER_COMMAND_DELAY: Duration = Duration::from_millis(500);
/// Legacy devices get at least this long to print all prompts.
const LEGACY_MIN_EXPECT_PROMPT_TIMEOUT: Duration = Duration::from_secs(10);

/// Builder for constructing sessions.
///
/// All validation happens in [`build`](Self::build); nothing here touches
/// the network.
///
/// # Example
///
/// ```rust,no_run
/// use spn::{CommandBatch, SessionBuilder};
///
/// # async fn example() -> Result<(), spn::Error> {
/// let mut session = SessionBuilder::new("192.168.1.1")
///     .username("admin")
///     .password("secret")
///     .invoke_shell(true)
///     .expect_prompt("R1#")
///     .build()?;
///
/// session.connect().await?;
/// session.create_shell().await?;
/// let transcript = session.execute(&CommandBatch::parse_list("show version,")).await?;
/// println!("{}", transcript.output);
/// session.disconnect().await;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct SessionBuilder {
    host: String,
    port: u16,
    username: Option<String>,
    password: Option<SecretString>,
    invoke_shell: bool,
    expect_prompt: Option<String>,
    prompt_count: Option<usize>,
    prompt_boundary: PromptBoundary,
    timeout: Duration,
    shell_timeout: Duration,
    inter_command_delay: Duration,
    expect_prompt_timeout: Duration,
    legacy_mode: bool,
    routing: Option<Arc<RoutingResolver>>,
    proxy: Option<ProxyConfig>,
    host_key_verification: HostKeyVerification,
    known_hosts_path: Option<PathBuf>,
    terminal_width: u32,
    terminal_height: u32,
    prompt_detection: PromptDetection,
    retry_backoff: Duration,
}

impl SessionBuilder {
    /// Create a new session builder for the specified host.
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: DEFAULT_PORT,
            username: None,
            password: None,
            invoke_shell: false,
            expect_prompt: None,
            prompt_count: None,
            prompt_boundary: PromptBoundary::default(),
            timeout: DEFAULT_TIMEOUT,
            shell_timeout: DEFAULT_SHELL_TIMEOUT,
            inter_command_delay: DEFAULT_INTER_COMMAND_DELAY,
            expect_prompt_timeout: DEFAULT_EXPECT_PROMPT_TIMEOUT,
            legacy_mode: false,
            routing: None,
            proxy: None,
            host_key_verification: HostKeyVerification::default(),
            known_hosts_path: None,
            terminal_width: 511,
            terminal_height: 24,
            prompt_detection: PromptDetection::default(),
            retry_backoff: Duration::from_secs(2),
        }
    }

    /// Replace the target host.
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Set the SSH port (default: 22).
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the username for authentication.
    pub fn username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    /// Set the password for authentication.
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(SecretString::from(password.into()));
        self
    }

    /// Use an interactive PTY shell (default: exec requests).
    pub fn invoke_shell(mut self, invoke_shell: bool) -> Self {
        self.invoke_shell = invoke_shell;
        self
    }

    /// Count occurrences of this prompt to detect completion.
    pub fn expect_prompt(mut self, prompt: impl Into<String>) -> Self {
        let prompt = prompt.into();
        self.expect_prompt = (!prompt.is_empty()).then_some(prompt);
        self
    }

    /// Override the number of prompts that completes a batch.
    pub fn prompt_count(mut self, count: usize) -> Self {
        self.prompt_count = Some(count);
        self
    }

    /// Where counted prompt occurrences may appear.
    pub fn prompt_boundary(mut self, boundary: PromptBoundary) -> Self {
        self.prompt_boundary = boundary;
        self
    }

    /// Set the connection timeout (default: 360s).
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the fixed-delay settle time (default: 5s).
    pub fn shell_timeout(mut self, timeout: Duration) -> Self {
        self.shell_timeout = timeout;
        self
    }

    /// Set the pause between two commands (default: 1s).
    pub fn inter_command_delay(mut self, delay: Duration) -> Self {
        self.inter_command_delay = delay;
        self
    }

    /// Set the prompt counting bound (default: 30s).
    pub fn expect_prompt_timeout(mut self, timeout: Duration) -> Self {
        self.expect_prompt_timeout = timeout;
        self
    }

    /// Enable legacy algorithm negotiation and conservative timings.
    pub fn legacy_mode(mut self, legacy: bool) -> Self {
        self.legacy_mode = legacy;
        self
    }

    /// Route connections through these rules.
    pub fn routing(mut self, resolver: impl Into<Arc<RoutingResolver>>) -> Self {
        self.routing = Some(resolver.into());
        self
    }

    /// Jump host for proxied routes, authenticated with a password.
    pub fn proxy_password(
        mut self,
        host: impl Into<String>,
        port: u16,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.proxy = Some(ProxyConfig {
            host: host.into(),
            port,
            username: username.into(),
            auth: AuthMethod::Password(SecretString::from(password.into())),
        });
        self
    }

    /// Jump host for proxied routes, authenticated with a private key.
    pub fn proxy_key(
        mut self,
        host: impl Into<String>,
        port: u16,
        username: impl Into<String>,
        key_path: impl Into<PathBuf>,
    ) -> Self {
        self.proxy = Some(ProxyConfig {
            host: host.into(),
            port,
            username: username.into(),
            auth: AuthMethod::PrivateKey {
                path: key_path.into(),
                passphrase: None,
            },
        });
        self
    }

    /// Jump host for proxied routes.
    pub fn proxy(mut self, proxy: ProxyConfig) -> Self {
        self.proxy = Some(proxy);
        self
    }

    /// Set the host key verification mode (default: disabled).
    pub fn host_key_verification(mut self, mode: HostKeyVerification) -> Self {
        self.host_key_verification = mode;
        self
    }

    /// Use a specific known_hosts file.
    pub fn known_hosts_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.known_hosts_path = Some(path.into());
        self
    }

    /// Set terminal dimensions.
    pub fn terminal_size(mut self, width: u32, height: u32) -> Self {
        self.terminal_width = width;
        self.terminal_height = height;
        self
    }

    /// Set the prompt detection policy.
    pub fn prompt_detection(mut self, policy: PromptDetection) -> Self {
        self.prompt_detection = policy;
        self
    }

    /// Set the pause between connection attempts (default: 2s).
    pub fn retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    /// Validate and produce the configuration.
    pub fn build_config(self) -> Result<SessionConfig> {
        if self.host.trim().is_empty() {
            return Err(ConfigError::Missing { field: "host" }.into());
        }
        let username = self
            .username
            .ok_or(ConfigError::Missing { field: "username" })?;
        let password = self
            .password
            .ok_or(ConfigError::Missing { field: "password" })?;

        let mut config = SessionConfig {
            host: self.host,
            port: self.port,
            username,
            password,
            invoke_shell: self.invoke_shell,
            expect_prompt: self.expect_prompt,
            prompt_count: self.prompt_count,
            prompt_boundary: self.prompt_boundary,
            timeout: self.timeout,
            shell_timeout: self.shell_timeout,
            inter_command_delay: self.inter_command_delay,
            expect_prompt_timeout: self.expect_prompt_timeout,
            legacy_mode: self.legacy_mode,
            routing: self.routing,
            proxy: self.proxy,
            host_key_verification: self.host_key_verification,
            known_hosts_path: self.known_hosts_path,
            terminal_width: self.terminal_width,
            terminal_height: self.terminal_height,
            prompt_detection: self.prompt_detection,
            retry_backoff: self.retry_backoff,
        };

        config.validate()?;
        if config.legacy_mode {
            apply_legacy_floors(&mut config);
        }

        Ok(config)
    }

    /// Build a session that connects over SSH.
    ///
    /// This validates the configuration but does not connect. Call
    /// [`connect`](Session::connect) on the returned session.
    pub fn build(self) -> Result<Session<SshConnector>> {
        Session::new(self.build_config()?)
    }

    /// Build a session that connects through a custom connector.
    pub fn build_with<C: Connector>(self, connector: C) -> Result<Session<C>> {
        Session::with_connector(self.build_config()?, connector)
    }
}

fn apply_legacy_floors(config: &mut SessionConfig) {
    config.shell_timeout = config.shell_timeout.max(LEGACY_MIN_SHELL_TIMEOUT);
    config.inter_command_delay = config
        .inter_command_delay
        .max(LEGACY_MIN_INTER_COMMAND_DELAY);
    config.expect_prompt_timeout = config
        .expect_prompt_timeout
        .max(LEGACY_MIN_EXPECT_PROMPT_TIMEOUT);
    debug!(
        "Legacy timings: shell {:?}, inter-command {:?}, expect-prompt {:?}",
        config.shell_timeout, config.inter_command_delay, config.expect_prompt_timeout
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    fn base() -> SessionBuilder {
        SessionBuilder::new("r1").username("admin").password("pw")
    }

    #[test]
    fn test_defaults() {
        let config = base().build_config().unwrap();
        assert_eq!(config.port, 22);
        assert_eq!(config.timeout, Duration::from_secs(360));
        assert_eq!(config.shell_timeout, Duration::from_secs(5));
        assert_eq!(config.inter_command_delay, Duration::from_secs(1));
        assert_eq!(config.expect_prompt_timeout, Duration::from_secs(30));
        assert_eq!(config.host_key_verification, HostKeyVerification::Disabled);
        assert_eq!(config.connect_attempts(), 1);
        assert!(!config.invoke_shell);
    }

    #[test]
    fn test_empty_password_rejected() {
        let err = SessionBuilder::new("r1")
            .username("admin")
            .password("")
            .build_config()
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Config(ConfigError::Missing { field: "password" })
        ));
    }

    #[test]
    fn test_missing_username_and_host() {
        let err = SessionBuilder::new("r1").password("pw").build_config().unwrap_err();
        assert!(matches!(
            err,
            Error::Config(ConfigError::Missing { field: "username" })
        ));

        let err = SessionBuilder::new(" ")
            .username("admin")
            .password("pw")
            .build_config()
            .unwrap_err();
        assert!(matches!(err, Error::Config(ConfigError::Missing { field: "host" })));
    }

    #[test]
    fn test_legacy_floors() {
        let config = base()
            .legacy_mode(true)
            .shell_timeout(Duration::from_secs(1))
            .inter_command_delay(Duration::from_millis(100))
            .expect_prompt_timeout(Duration::from_secs(2))
            .build_config()
            .unwrap();
        assert_eq!(config.shell_timeout, Duration::from_secs(3));
        assert_eq!(config.inter_command_delay, Duration::from_millis(500));
        assert_eq!(config.expect_prompt_timeout, Duration::from_secs(10));
        assert_eq!(config.connect_attempts(), 3);
    }

    #[test]
    fn test_legacy_keeps_larger_values() {
        let config = base()
            .legacy_mode(true)
            .shell_timeout(Duration::from_secs(8))
            .build_config()
            .unwrap();
        assert_eq!(config.shell_timeout, Duration::from_secs(8));
    }

    #[test]
    fn test_empty_expect_prompt_is_none() {
        let config = base().expect_prompt("").build_config().unwrap();
        assert!(config.expect_prompt.is_none());
    }
}
