//! SSH transport implementation using russh.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::{debug, info, trace, warn};
use russh::client::{self, Handle, KeyboardInteractiveAuthResponse, Msg};
use russh::keys::{PrivateKeyWithHashAlg, PublicKey, load_secret_key};
use russh::{Channel, ChannelMsg, Disconnect};
use secrecy::{ExposeSecret, SecretString};
use tokio::net::TcpStream;

use super::algorithms::client_config;
use super::config::{AuthMethod, HostKeyVerification, ProxyConfig, SessionConfig};
use super::{Connector, ExecOutput, Shell, Transport};
use crate::error::{ChannelError, ConfigError, Result, RoutingError, TransportError};
use crate::routing::Route;

/// Keyboard-interactive rounds answered before giving up.
const MAX_KEYBOARD_INTERACTIVE_ROUNDS: usize = 5;

/// Connector that opens real SSH connections.
#[derive(Debug, Clone, Copy, Default)]
pub struct SshConnector;

impl Connector for SshConnector {
    type Transport = SshTransport;

    async fn connect(&self, config: &SessionConfig, route: Route) -> Result<SshTransport> {
        match route {
            Route::Direct => SshTransport::connect_direct(config).await,
            Route::Proxy => SshTransport::connect_proxied(config).await,
            Route::Deny => Err(RoutingError::Denied {
                host: config.host.clone(),
                port: config.port,
            }
            .into()),
        }
    }
}

/// SSH connection to the target, optionally tunnelled through a jump host.
pub struct SshTransport {
    /// Session with the target device.
    session: Handle<SshHandler>,

    /// Session with the jump host, when the target is reached through one.
    jump: Option<Handle<SshHandler>>,

    /// Target host, for error messages.
    host: String,

    /// Bound for exec requests.
    timeout: Duration,
}

impl SshTransport {
    /// Connect straight to the target and authenticate.
    async fn connect_direct(config: &SessionConfig) -> Result<Self> {
        info!("Connecting to {}", config.socket_addr());

        let ssh_config = client_config(config);
        let handler = SshHandler::new(&config.host, config.port, config);
        let host_key_error = handler.host_key_error.clone();

        let socket = open_socket(&config.host, config.port, config.timeout).await?;
        let mut session = handshake(
            client::connect_stream(ssh_config, socket, handler),
            config.timeout,
            &host_key_error,
        )
        .await?;

        authenticate_password(&mut session, &config.username, &config.password, &config.host)
            .await?;
        info!("Authenticated as {} on {}", config.username, config.host);

        Ok(Self {
            session,
            jump: None,
            host: config.host.clone(),
            timeout: config.timeout,
        })
    }

    /// Connect to the jump host, open a `direct-tcpip` channel to the target
    /// and run a second SSH session over it.
    async fn connect_proxied(config: &SessionConfig) -> Result<Self> {
        let proxy = config
            .proxy
            .as_ref()
            .ok_or_else(|| ConfigError::MissingProxyHost {
                host: config.host.clone(),
            })?;

        info!(
            "Connecting to {} via {}@{}",
            config.socket_addr(),
            proxy.username,
            proxy.socket_addr()
        );

        let mut jump = connect_jump_host(proxy, config).await?;

        debug!(
            "Opening tunnel {} -> {}",
            proxy.socket_addr(),
            config.socket_addr()
        );
        let channel = jump
            .channel_open_direct_tcpip(config.host.as_str(), u32::from(config.port), "127.0.0.1", 0)
            .await
            .map_err(|source| TransportError::Tunnel {
                proxy: proxy.host.clone(),
                host: config.host.clone(),
                port: config.port,
                source,
            });
        let channel = match channel {
            Ok(channel) => channel,
            Err(e) => {
                close_handle(&mut jump, &proxy.host).await;
                return Err(e.into());
            }
        };

        let ssh_config = client_config(config);
        let handler = SshHandler::new(&config.host, config.port, config);
        let host_key_error = handler.host_key_error.clone();

        let target = async {
            let mut session = handshake(
                client::connect_stream(ssh_config, channel.into_stream(), handler),
                config.timeout,
                &host_key_error,
            )
            .await?;
            authenticate_password(&mut session, &config.username, &config.password, &config.host)
                .await?;
            Ok::<_, crate::Error>(session)
        }
        .await;

        match target {
            Ok(session) => {
                info!(
                    "Authenticated as {} on {} through {}",
                    config.username, config.host, proxy.host
                );
                Ok(Self {
                    session,
                    jump: Some(jump),
                    host: config.host.clone(),
                    timeout: config.timeout,
                })
            }
            Err(e) => {
                close_handle(&mut jump, &proxy.host).await;
                Err(e)
            }
        }
    }

    /// Whether the connection goes through a jump host.
    pub fn is_tunneled(&self) -> bool {
        self.jump.is_some()
    }
}

impl Transport for SshTransport {
    type Shell = SshShell;

    async fn open_shell(&mut self, width: u32, height: u32) -> Result<SshShell> {
        let channel = self
            .session
            .channel_open_session()
            .await
            .map_err(ChannelError::Ssh)?;

        channel
            .request_pty(true, "xterm", width, height, 0, 0, &[])
            .await
            .map_err(|e| {
                debug!("PTY request failed on {}: {}", self.host, e);
                ChannelError::PtyOpenFailed
            })?;

        channel.request_shell(true).await.map_err(|e| {
            debug!("Shell request failed on {}: {}", self.host, e);
            ChannelError::ShellRequestFailed
        })?;

        debug!("Shell opened on {} ({}x{})", self.host, width, height);
        Ok(SshShell {
            channel,
            closed: false,
        })
    }

    async fn exec(&mut self, command: &str) -> Result<ExecOutput> {
        let mut channel = self
            .session
            .channel_open_session()
            .await
            .map_err(ChannelError::Ssh)?;
        channel
            .exec(true, command)
            .await
            .map_err(ChannelError::Ssh)?;
        trace!("exec on {}: {:?}", self.host, command);

        let collect = async {
            let mut output = ExecOutput::default();
            while let Some(msg) = channel.wait().await {
                match msg {
                    ChannelMsg::Data { data } => output.stdout.extend_from_slice(&data),
                    ChannelMsg::ExtendedData { data, ext: 1 } => {
                        output.stderr.extend_from_slice(&data)
                    }
                    ChannelMsg::ExitStatus { exit_status } => {
                        output.exit_status = Some(exit_status)
                    }
                    ChannelMsg::Close => break,
                    _ => {}
                }
            }
            output
        };

        let output = tokio::time::timeout(self.timeout, collect)
            .await
            .map_err(|_| TransportError::Timeout(self.timeout))?;
        if let Err(e) = channel.close().await {
            trace!("exec channel close on {}: {}", self.host, e);
        }
        Ok(output)
    }

    async fn close(&mut self) -> Result<()> {
        let target = self
            .session
            .disconnect(Disconnect::ByApplication, "", "en")
            .await
            .map_err(TransportError::Ssh);

        if let Some(mut jump) = self.jump.take() {
            close_handle(&mut jump, "jump host").await;
        }

        target?;
        Ok(())
    }
}

/// Interactive PTY shell on an SSH channel.
pub struct SshShell {
    channel: Channel<Msg>,
    closed: bool,
}

impl Shell for SshShell {
    async fn send(&mut self, data: &[u8]) -> Result<()> {
        if self.closed {
            return Err(ChannelError::Closed.into());
        }
        self.channel.data(data).await.map_err(ChannelError::Ssh)?;
        Ok(())
    }

    async fn recv(&mut self, wait: Duration) -> Result<Option<Vec<u8>>> {
        if self.closed {
            return Err(ChannelError::Closed.into());
        }
        let deadline = tokio::time::Instant::now() + wait;
        loop {
            match tokio::time::timeout_at(deadline, self.channel.wait()).await {
                Err(_) => return Ok(None),
                Ok(Some(ChannelMsg::Data { data })) => return Ok(Some(data.to_vec())),
                Ok(Some(ChannelMsg::ExtendedData { data, .. })) => {
                    return Ok(Some(data.to_vec()));
                }
                Ok(Some(ChannelMsg::Eof | ChannelMsg::Close)) | Ok(None) => {
                    self.closed = true;
                    return Err(ChannelError::Closed.into());
                }
                Ok(Some(other)) => trace!("Ignoring channel message: {:?}", other),
            }
        }
    }

    async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        if let Err(e) = self.channel.eof().await {
            trace!("Channel EOF failed: {}", e);
        }
        self.channel.close().await.map_err(ChannelError::Ssh)?;
        Ok(())
    }
}

/// Open the TCP connection. Socket failures are reported separately from
/// SSH handshake failures so the session can tell them apart.
async fn open_socket(host: &str, port: u16, timeout: Duration) -> Result<TcpStream> {
    let socket = tokio::time::timeout(timeout, TcpStream::connect((host, port)))
        .await
        .map_err(|_| TransportError::Timeout(timeout))?
        .map_err(|source| TransportError::ConnectionFailed {
            host: host.to_string(),
            port,
            source,
        })?;
    if let Err(e) = socket.set_nodelay(true) {
        trace!("TCP_NODELAY not set for {}: {}", host, e);
    }
    Ok(socket)
}

/// Run an SSH handshake under `timeout`, surfacing a detailed host key error
/// when the handler rejected the server key.
async fn handshake<F>(
    connect: F,
    timeout: Duration,
    host_key_error: &Arc<Mutex<Option<TransportError>>>,
) -> Result<Handle<SshHandler>>
where
    F: Future<Output = std::result::Result<Handle<SshHandler>, russh::Error>>,
{
    let session = tokio::time::timeout(timeout, connect)
        .await
        .map_err(|_| TransportError::Timeout(timeout))?
        .map_err(|e| {
            let stored = host_key_error.lock().ok().and_then(|mut slot| slot.take());
            stored.unwrap_or(TransportError::Ssh(e))
        })?;
    Ok(session)
}

async fn connect_jump_host(proxy: &ProxyConfig, config: &SessionConfig) -> Result<Handle<SshHandler>> {
    let ssh_config = client_config(config);
    let handler = SshHandler::new(&proxy.host, proxy.port, config);
    let host_key_error = handler.host_key_error.clone();

    let socket = open_socket(&proxy.host, proxy.port, config.timeout).await?;
    let mut session = handshake(
        client::connect_stream(ssh_config, socket, handler),
        config.timeout,
        &host_key_error,
    )
    .await?;

    match &proxy.auth {
        AuthMethod::Password(password) => {
            authenticate_password(&mut session, &proxy.username, password, &proxy.host).await?
        }
        AuthMethod::PrivateKey { path, passphrase } => {
            authenticate_key(&mut session, &proxy.username, path, passphrase.as_ref(), &proxy.host)
                .await?
        }
    }

    debug!("Connected to jump host {}", proxy.socket_addr());
    Ok(session)
}

async fn close_handle(handle: &mut Handle<SshHandler>, name: &str) {
    if let Err(e) = handle.disconnect(Disconnect::ByApplication, "", "en").await {
        warn!("Failed to disconnect from {}: {}", name, e);
    }
}

/// Password authentication with keyboard-interactive fallback.
async fn authenticate_password(
    session: &mut Handle<SshHandler>,
    user: &str,
    password: &SecretString,
    host: &str,
) -> Result<()> {
    let accepted = session
        .authenticate_password(user, password.expose_secret())
        .await
        .map_err(TransportError::Ssh)?
        .success();
    if accepted {
        return Ok(());
    }

    debug!("Password rejected by {}, trying keyboard-interactive", host);
    if keyboard_interactive(session, user, password).await? {
        return Ok(());
    }

    Err(TransportError::AuthenticationFailed {
        user: user.to_string(),
        host: host.to_string(),
    }
    .into())
}

/// Answer every keyboard-interactive prompt with the password.
async fn keyboard_interactive(
    session: &mut Handle<SshHandler>,
    user: &str,
    password: &SecretString,
) -> Result<bool> {
    let mut response = session
        .authenticate_keyboard_interactive_start(user, None::<String>)
        .await
        .map_err(TransportError::Ssh)?;

    for _ in 0..MAX_KEYBOARD_INTERACTIVE_ROUNDS {
        match response {
            KeyboardInteractiveAuthResponse::Success => return Ok(true),
            KeyboardInteractiveAuthResponse::Failure { .. } => return Ok(false),
            KeyboardInteractiveAuthResponse::InfoRequest { prompts, .. } => {
                trace!("keyboard-interactive round with {} prompt(s)", prompts.len());
                let answers = prompts
                    .iter()
                    .map(|_| password.expose_secret().to_string())
                    .collect();
                response = session
                    .authenticate_keyboard_interactive_respond(answers)
                    .await
                    .map_err(TransportError::Ssh)?;
            }
        }
    }

    Ok(false)
}

async fn authenticate_key(
    session: &mut Handle<SshHandler>,
    user: &str,
    path: &Path,
    passphrase: Option<&SecretString>,
    host: &str,
) -> Result<()> {
    let key = load_secret_key(path, passphrase.map(|p| p.expose_secret()))
        .map_err(|e| TransportError::Key(e.to_string()))?;

    let hash_alg = session
        .best_supported_rsa_hash()
        .await
        .map_err(TransportError::Ssh)?
        .flatten();

    let accepted = session
        .authenticate_publickey(user, PrivateKeyWithHashAlg::new(Arc::new(key), hash_alg))
        .await
        .map_err(TransportError::Ssh)?
        .success();

    if !accepted {
        return Err(TransportError::AuthenticationFailed {
            user: user.to_string(),
            host: host.to_string(),
        }
        .into());
    }
    Ok(())
}

/// SSH client handler for russh.
struct SshHandler {
    host: String,
    port: u16,
    host_key_verification: HostKeyVerification,
    known_hosts_path: Option<PathBuf>,
    /// Detailed host-key error, surfaced instead of the generic
    /// russh::Error::UnknownKey.
    host_key_error: Arc<Mutex<Option<TransportError>>>,
}

impl SshHandler {
    fn new(host: &str, port: u16, config: &SessionConfig) -> Self {
        Self {
            host: host.to_string(),
            port,
            host_key_verification: config.host_key_verification.clone(),
            known_hosts_path: config.known_hosts_path.clone(),
            host_key_error: Arc::new(Mutex::new(None)),
        }
    }

    /// Returns `Ok(true)` if matched, `Ok(false)` if host not found.
    fn check_known_hosts(&self, pubkey: &PublicKey) -> std::result::Result<bool, TransportError> {
        let result = match &self.known_hosts_path {
            Some(path) => russh::keys::check_known_hosts_path(&self.host, self.port, pubkey, path),
            None => russh::keys::check_known_hosts(&self.host, self.port, pubkey),
        };

        match result {
            Ok(matched) => Ok(matched),
            Err(russh::keys::Error::KeyChanged { line }) => Err(TransportError::HostKeyChanged {
                host: self.host.clone(),
                port: self.port,
                line,
            }),
            Err(e) => Err(TransportError::KnownHosts(e.to_string())),
        }
    }

    fn learn_host_key(&self, pubkey: &PublicKey) -> std::result::Result<(), TransportError> {
        let result = match &self.known_hosts_path {
            Some(path) => {
                russh::keys::known_hosts::learn_known_hosts_path(&self.host, self.port, pubkey, path)
            }
            None => russh::keys::known_hosts::learn_known_hosts(&self.host, self.port, pubkey),
        };
        result.map_err(|e| TransportError::KnownHosts(e.to_string()))
    }

    fn reject(&self, error: TransportError) -> bool {
        warn!("Rejecting host key for {}:{}: {}", self.host, self.port, error);
        if let Ok(mut slot) = self.host_key_error.lock() {
            *slot = Some(error);
        }
        false
    }
}

impl client::Handler for SshHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> std::result::Result<bool, Self::Error> {
        let accepted = match self.host_key_verification {
            HostKeyVerification::Disabled => true,

            HostKeyVerification::AcceptNew => match self.check_known_hosts(server_public_key) {
                Ok(true) => true,
                Ok(false) => {
                    if let Err(e) = self.learn_host_key(server_public_key) {
                        warn!("Failed to save host key: {}", e);
                    }
                    true
                }
                Err(e) => self.reject(e),
            },

            HostKeyVerification::Strict => match self.check_known_hosts(server_public_key) {
                Ok(true) => true,
                Ok(false) => self.reject(TransportError::HostKeyUnknown {
                    host: self.host.clone(),
                    port: self.port,
                }),
                Err(e) => self.reject(e),
            },
        };
        Ok(accepted)
    }
}
