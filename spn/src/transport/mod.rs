//! SSH transport layer.
//!
//! The session logic never talks to russh directly. It goes through three
//! small capabilities:
//!
//! - [`Connector`] turns a [`SessionConfig`] and a [`Route`] into an
//!   authenticated [`Transport`] (direct or tunnelled through a jump host),
//! - [`Transport`] opens interactive shells and runs exec requests,
//! - [`Shell`] moves raw bytes in and out of one PTY shell.
//!
//! [`SshConnector`] is the production implementation; [`testing`] provides a
//! scripted in-memory one.

mod algorithms;
pub mod config;
mod ssh;
pub mod testing;

use std::future::Future;
use std::time::Duration;

pub use algorithms::{LEGACY_KEEPALIVE, client_config, preferred};
pub use config::{AuthMethod, HostKeyVerification, PromptDetection, ProxyConfig, SessionConfig};
pub use ssh::{SshConnector, SshShell, SshTransport};

use crate::error::Result;
use crate::routing::Route;

/// Output of one exec request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    /// Bytes written to stdout.
    pub stdout: Vec<u8>,

    /// Bytes written to stderr.
    pub stderr: Vec<u8>,

    /// Exit status, when the server reported one.
    pub exit_status: Option<u32>,
}

/// One interactive PTY shell.
pub trait Shell: Send {
    /// Write raw bytes to the shell.
    fn send(&mut self, data: &[u8]) -> impl Future<Output = Result<()>> + Send;

    /// Wait up to `wait` for the next chunk of output.
    ///
    /// Returns `Ok(None)` when nothing arrived in time and
    /// [`ChannelError::Closed`](crate::error::ChannelError::Closed) once the
    /// remote side has closed the shell.
    fn recv(&mut self, wait: Duration) -> impl Future<Output = Result<Option<Vec<u8>>>> + Send;

    /// Close the shell. Closing twice is not an error.
    fn close(&mut self) -> impl Future<Output = Result<()>> + Send;
}

/// An authenticated connection to the target device.
pub trait Transport: Send {
    /// Shell type opened by this transport.
    type Shell: Shell;

    /// Open a PTY and start an interactive shell.
    fn open_shell(
        &mut self,
        width: u32,
        height: u32,
    ) -> impl Future<Output = Result<Self::Shell>> + Send;

    /// Run one command as an exec request and collect its output.
    fn exec(&mut self, command: &str) -> impl Future<Output = Result<ExecOutput>> + Send;

    /// Close the connection, including any jump host behind it.
    fn close(&mut self) -> impl Future<Output = Result<()>> + Send;
}

/// Establishes transports.
pub trait Connector: Send + Sync {
    /// Transport type produced by this connector.
    type Transport: Transport;

    /// Connect and authenticate along `route`.
    ///
    /// Never called with [`Route::Deny`].
    fn connect(
        &self,
        config: &SessionConfig,
        route: Route,
    ) -> impl Future<Output = Result<Self::Transport>> + Send;
}
