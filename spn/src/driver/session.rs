//! Single-device session.

use std::fmt;
use std::net::IpAddr;
use std::time::Instant;

use log::{debug, info, warn};

use super::command::CommandBatch;
use super::detect::{DetectedPrompt, detect_prompt};
use super::executor::{
    IDLE_POLL, Reader, collect_after_delay, count_prompts, drain, run_exec, send_batch,
};
use super::response::{Completion, Transcript};
use crate::channel::StreamFilter;
use crate::error::{ConfigError, DriverError, Result, RoutingError};
use crate::output::OutputSink;
use crate::routing::Route;
use crate::transport::{Connector, SessionConfig, Shell, SshConnector, Transport};

/// Settle time after the shell opens, before the banner is drained.
const SHELL_SETTLE: std::time::Duration = std::time::Duration::from_secs(2);

type ShellOf<C> = <<C as Connector>::Transport as Transport>::Shell;

/// Lifecycle of a [`Session`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Nothing opened yet.
    Unconnected,
    /// A connection attempt is in progress.
    Connecting,
    /// Authenticated transport, no shell.
    Connected,
    /// Interactive shell open.
    ShellReady,
    /// Disconnected. The session cannot be reused.
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Unconnected => "unconnected",
            SessionState::Connecting => "connecting",
            SessionState::Connected => "connected",
            SessionState::ShellReady => "shell-ready",
            SessionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// One interactive session with one device.
///
/// A session owns its transport, shell, stream filter and output sink. It is
/// used from a single task and shares nothing mutable with other sessions.
pub struct Session<C: Connector = SshConnector> {
    config: SessionConfig,
    connector: C,
    state: SessionState,
    route: Option<Route>,
    transport: Option<C::Transport>,
    shell: Option<ShellOf<C>>,
    filter: StreamFilter,
    sink: OutputSink,
    detected: Option<DetectedPrompt>,
}

impl Session<SshConnector> {
    /// Create a session that connects over SSH.
    pub fn new(config: SessionConfig) -> Result<Self> {
        Self::with_connector(config, SshConnector)
    }
}

/// Route resolution over the config alone, so awaiting it does not borrow
/// the whole session.
async fn resolve_route_for(config: &SessionConfig) -> Route {
    let Some(resolver) = config.routing.as_deref() else {
        return Route::Direct;
    };

    let mut address = None;
    if resolver.needs_address() && config.host.parse::<IpAddr>().is_err() {
        match tokio::net::lookup_host((config.host.as_str(), config.port)).await {
            Ok(mut addrs) => address = addrs.next().map(|a| a.ip()),
            Err(e) => debug!("Could not resolve {} for routing: {}", config.host, e),
        }
    }

    resolver.resolve(&config.host, config.port, address)
}

impl<C: Connector> Session<C> {
    /// Create a session that connects through `connector`.
    ///
    /// Fails with a configuration error when host, username or password is
    /// empty; nothing is opened until [`connect`](Self::connect).
    pub fn with_connector(config: SessionConfig, connector: C) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            connector,
            state: SessionState::Unconnected,
            route: None,
            transport: None,
            shell: None,
            filter: StreamFilter::new(),
            sink: OutputSink::none(),
            detected: None,
        })
    }

    /// Send shell output to `sink`.
    pub fn set_output(&mut self, sink: OutputSink) {
        self.sink = sink;
    }

    /// Mutable access to the output sink.
    pub fn output_mut(&mut self) -> &mut OutputSink {
        &mut self.sink
    }

    /// The session configuration.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Route chosen by the last [`connect`](Self::connect).
    pub fn route(&self) -> Option<Route> {
        self.route
    }

    /// Prompt signature used for counting, if any.
    pub fn expect_prompt(&self) -> Option<&str> {
        self.config.expect_prompt.as_deref()
    }

    /// Replace the prompt signature used for counting.
    pub fn set_expect_prompt(&mut self, prompt: impl Into<String>) {
        let prompt = prompt.into();
        self.config.expect_prompt = (!prompt.is_empty()).then_some(prompt);
    }

    /// Last prompt found by [`find_prompt`](Self::find_prompt).
    pub fn detected_prompt(&self) -> Option<&DetectedPrompt> {
        self.detected.as_ref()
    }

    /// Whether a transport is open.
    pub fn is_connected(&self) -> bool {
        matches!(
            self.state,
            SessionState::Connected | SessionState::ShellReady
        )
    }

    /// Decide how to reach the target.
    ///
    /// Hostnames are resolved first when a rule needs an address; a lookup
    /// failure only means network rules cannot match.
    pub async fn resolve_route(&self) -> Route {
        resolve_route_for(&self.config).await
    }

    /// Connect and authenticate.
    ///
    /// Denied routes and missing proxy settings fail before any connection
    /// attempt. Authentication and protocol failures are retried (three
    /// attempts in legacy mode, one otherwise) with a fixed backoff.
    pub async fn connect(&mut self) -> Result<()> {
        match self.state {
            SessionState::Unconnected => {}
            SessionState::Closed => return Err(DriverError::NotConnected.into()),
            _ => return Err(DriverError::AlreadyConnected.into()),
        }

        let route = resolve_route_for(&self.config).await;
        self.route = Some(route);
        info!("Route for {}: {}", self.config.socket_addr(), route);

        match route {
            Route::Deny => {
                return Err(RoutingError::Denied {
                    host: self.config.host.clone(),
                    port: self.config.port,
                }
                .into());
            }
            Route::Proxy if self.config.proxy.is_none() => {
                return Err(ConfigError::MissingProxyHost {
                    host: self.config.host.clone(),
                }
                .into());
            }
            _ => {}
        }

        self.state = SessionState::Connecting;
        let attempts = self.config.connect_attempts();
        let mut attempt = 1;
        loop {
            match self.connector.connect(&self.config, route).await {
                Ok(transport) => {
                    self.transport = Some(transport);
                    self.state = SessionState::Connected;
                    return Ok(());
                }
                Err(e) if e.is_retryable() && attempt < attempts => {
                    warn!(
                        "Connection attempt {}/{} to {} failed: {}",
                        attempt,
                        attempts,
                        self.config.host,
                        e
                    );
                    attempt += 1;
                    tokio::time::sleep(self.config.retry_backoff).await;
                }
                Err(e) => {
                    self.state = SessionState::Unconnected;
                    return Err(e);
                }
            }
        }
    }

    /// Open the interactive shell and drain the login banner into the sink.
    ///
    /// Does nothing in exec mode or when a shell is already open.
    pub async fn create_shell(&mut self) -> Result<()> {
        if !self.config.invoke_shell {
            debug!("Exec mode, no shell needed");
            return Ok(());
        }
        if self.shell.is_some() {
            return Ok(());
        }
        let transport = self.transport.as_mut().ok_or(DriverError::NotConnected)?;

        let shell = transport
            .open_shell(self.config.terminal_width, self.config.terminal_height)
            .await?;
        let shell = self.shell.insert(shell);
        self.state = SessionState::ShellReady;

        tokio::time::sleep(SHELL_SETTLE).await;
        let mut reader = Reader {
            filter: &mut self.filter,
            sink: &mut self.sink,
        };
        let banner = drain(shell, &mut reader, IDLE_POLL, self.config.shell_timeout).await?;
        debug!("Drained {} byte(s) of banner", banner.len());
        Ok(())
    }

    /// Learn the device prompt and use it for counting.
    ///
    /// Opens the shell if needed. Inconclusive detection is not an error:
    /// the returned prompt then carries a low-confidence or default origin.
    pub async fn find_prompt(&mut self) -> Result<DetectedPrompt> {
        if !self.config.invoke_shell {
            return Err(DriverError::ShellNotReady.into());
        }
        self.create_shell().await?;
        let shell = self.shell.as_mut().ok_or(DriverError::ShellNotReady)?;

        let mut reader = Reader {
            filter: &mut self.filter,
            sink: &mut self.sink,
        };
        let detected = detect_prompt(shell, &mut reader, &self.config.prompt_detection).await?;

        self.config.expect_prompt = Some(detected.prompt.clone());
        self.detected = Some(detected.clone());
        Ok(detected)
    }

    /// Prompts that complete `batch`: the override plus the batch's prelude,
    /// or one per entry.
    pub fn expected_prompts(&self, batch: &CommandBatch) -> usize {
        match self.config.prompt_count {
            Some(count) => count + batch.prelude_len(),
            None => batch.expected_prompts(),
        }
    }

    /// Run a command batch.
    ///
    /// In shell mode the whole batch is sent and then output is collected by
    /// prompt counting (or after a fixed delay without a prompt signature).
    /// In exec mode every command line is its own exec request.
    pub async fn execute(&mut self, batch: &CommandBatch) -> Result<Transcript> {
        if !self.is_connected() {
            return Err(DriverError::NotConnected.into());
        }
        let start = Instant::now();

        if !self.config.invoke_shell {
            let transport = self.transport.as_mut().ok_or(DriverError::NotConnected)?;
            let output = run_exec(transport, batch, &mut self.sink).await?;
            self.sink.flush();
            return Ok(Transcript::new(output, start.elapsed(), Completion::Exec));
        }

        self.create_shell().await?;
        if batch.is_empty() {
            return Ok(Transcript::new(
                String::new(),
                start.elapsed(),
                Completion::Prompts {
                    found: 0,
                    expected: 0,
                },
            ));
        }

        let expected = self.expected_prompts(batch);
        let shell = self.shell.as_mut().ok_or(DriverError::ShellNotReady)?;
        let mut reader = Reader {
            filter: &mut self.filter,
            sink: &mut self.sink,
        };

        info!(
            "Executing {} command(s) on {}",
            batch.len(),
            self.config.host
        );
        send_batch(shell, batch, self.config.inter_command_delay).await?;

        let (output, completion) = match self.config.expect_prompt.as_deref() {
            Some(prompt) => {
                count_prompts(
                    shell,
                    &mut reader,
                    prompt,
                    self.config.prompt_boundary,
                    expected,
                    self.config.expect_prompt_timeout,
                )
                .await?
            }
            None => {
                warn!("No prompt signature, falling back to fixed delay");
                let output =
                    collect_after_delay(shell, &mut reader, self.config.shell_timeout).await?;
                (output, Completion::Delay)
            }
        };

        self.sink.flush();
        let transcript = Transcript::new(output, start.elapsed(), completion);
        debug!(
            "Batch on {} finished in {:?}: {}",
            self.config.host, transcript.elapsed, transcript.completion
        );
        Ok(transcript)
    }

    /// Close the shell and the connection, jump host included.
    ///
    /// Never fails; problems closing individual resources are logged.
    pub async fn disconnect(&mut self) {
        if let Some(mut shell) = self.shell.take() {
            if let Err(e) = shell.close().await {
                debug!("Closing shell on {}: {}", self.config.host, e);
            }
        }
        if let Some(mut transport) = self.transport.take() {
            if let Err(e) = transport.close().await {
                warn!("Closing connection to {}: {}", self.config.host, e);
            }
            info!("Disconnected from {}", self.config.host);
        }
        self.sink.flush();
        self.state = SessionState::Closed;
    }
}

impl<C: Connector> fmt::Debug for Session<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("host", &self.config.host)
            .field("port", &self.config.port)
            .field("state", &self.state)
            .field("route", &self.route)
            .finish()
    }
}
