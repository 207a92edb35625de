//! Scripted in-memory transport.
//!
//! [`MockDevice`] plays a network device: it answers specific byte sequences
//! sent to its shell with canned output, optionally after a delay. Every
//! transport the connector hands out shares the same device state, so a test
//! can inspect what was sent, how many connection attempts were made and
//! which resources were closed after the session is gone.
//!
//! ```
//! use spn::transport::testing::MockDevice;
//!
//! let device = MockDevice::new()
//!     .banner("Welcome\r\n")
//!     .on_send("\n", "\r\nR1#")
//!     .on_send("show clock\n", "show clock\r\n12:00:00 UTC\r\nR1#");
//! let connector = device.connector();
//! # let _ = connector;
//! ```

use std::collections::{HashMap, VecDeque};
use std::io;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::time::Instant;

use super::config::SessionConfig;
use super::{Connector, ExecOutput, Shell, Transport};
use crate::error::{ChannelError, Result, TransportError};
use crate::routing::Route;

#[derive(Debug, Clone)]
struct Reply {
    delay: Duration,
    data: Vec<u8>,
    hang_up: bool,
}

#[derive(Debug)]
struct Pending {
    ready_at: Instant,
    data: Vec<u8>,
    hang_up: bool,
}

impl Pending {
    /// Schedule `replies` one after another, starting now.
    fn schedule(replies: &[Reply]) -> Vec<Pending> {
        let mut at = Instant::now();
        replies
            .iter()
            .map(|reply| {
                at += reply.delay;
                Pending {
                    ready_at: at,
                    data: reply.data.clone(),
                    hang_up: reply.hang_up,
                }
            })
            .collect()
    }
}

#[derive(Debug, Default)]
struct DeviceState {
    banner: Vec<u8>,
    rules: Vec<(Vec<u8>, Vec<Reply>)>,
    exec: HashMap<String, ExecOutput>,
    refuse: bool,
    auth_failures: u32,
    connect_delay: Duration,

    attempts: u32,
    routes: Vec<Route>,
    sent: Vec<u8>,
    exec_log: Vec<String>,
    shells_opened: u32,
    shells_closed: u32,
    transports_closed: u32,
}

/// A scripted device shared by every transport its connector produces.
#[derive(Debug, Clone, Default)]
pub struct MockDevice {
    state: Arc<Mutex<DeviceState>>,
}

impl MockDevice {
    /// Create a device that accepts connections and answers nothing.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, DeviceState> {
        lock(&self.state)
    }

    /// Output emitted as soon as a shell opens.
    pub fn banner(self, banner: &str) -> Self {
        self.lock().banner = banner.as_bytes().to_vec();
        self
    }

    /// Answer `input` with `output` immediately.
    pub fn on_send(self, input: &str, output: &str) -> Self {
        self.on_send_chunks(input, &[(Duration::ZERO, output)])
    }

    /// Answer `input` with `output` after `delay`.
    pub fn on_send_delayed(self, input: &str, delay: Duration, output: &str) -> Self {
        self.on_send_chunks(input, &[(delay, output)])
    }

    /// Answer `input` with several chunks, each after its own delay.
    pub fn on_send_chunks(self, input: &str, chunks: &[(Duration, &str)]) -> Self {
        let replies = chunks
            .iter()
            .map(|(delay, data)| Reply {
                delay: *delay,
                data: data.as_bytes().to_vec(),
                hang_up: false,
            })
            .collect();
        self.on_send_raw(input.as_bytes(), replies)
    }

    /// Answer `input` with `output`, then close the shell.
    pub fn on_send_then_close(self, input: &str, output: &str) -> Self {
        let reply = Reply {
            delay: Duration::ZERO,
            data: output.as_bytes().to_vec(),
            hang_up: true,
        };
        self.on_send_raw(input.as_bytes(), vec![reply])
    }

    /// Answer `input` with raw bytes, for control sequences and split UTF-8.
    pub fn on_send_bytes(self, input: &str, output: &[u8]) -> Self {
        let reply = Reply {
            delay: Duration::ZERO,
            data: output.to_vec(),
            hang_up: false,
        };
        self.on_send_raw(input.as_bytes(), vec![reply])
    }

    fn on_send_raw(self, input: &[u8], replies: Vec<Reply>) -> Self {
        self.lock().rules.push((input.to_vec(), replies));
        self
    }

    /// Output of an exec request for `command`.
    pub fn on_exec(self, command: &str, stdout: &str, exit_status: u32) -> Self {
        self.lock().exec.insert(
            command.to_string(),
            ExecOutput {
                stdout: stdout.as_bytes().to_vec(),
                stderr: Vec::new(),
                exit_status: Some(exit_status),
            },
        );
        self
    }

    /// Refuse every TCP connection.
    pub fn refuse_connections(self) -> Self {
        self.lock().refuse = true;
        self
    }

    /// Reject authentication on the next `count` attempts.
    pub fn fail_auth(self, count: u32) -> Self {
        self.lock().auth_failures = count;
        self
    }

    /// Delay every successful connection.
    pub fn connect_delay(self, delay: Duration) -> Self {
        self.lock().connect_delay = delay;
        self
    }

    /// A connector producing transports backed by this device.
    pub fn connector(&self) -> MockConnector {
        MockConnector {
            device: self.clone(),
        }
    }

    /// Connection attempts made so far.
    pub fn connect_attempts(&self) -> u32 {
        self.lock().attempts
    }

    /// Routes passed to the connector, in order.
    pub fn routes(&self) -> Vec<Route> {
        self.lock().routes.clone()
    }

    /// Everything written to any shell, in order.
    pub fn sent(&self) -> String {
        String::from_utf8_lossy(&self.lock().sent).into_owned()
    }

    /// Commands run as exec requests, in order.
    pub fn exec_log(&self) -> Vec<String> {
        self.lock().exec_log.clone()
    }

    /// Shells opened so far.
    pub fn shells_opened(&self) -> u32 {
        self.lock().shells_opened
    }

    /// Shells closed by the client.
    pub fn shells_closed(&self) -> u32 {
        self.lock().shells_closed
    }

    /// Transports closed by the client.
    pub fn transports_closed(&self) -> u32 {
        self.lock().transports_closed
    }
}

fn lock(state: &Mutex<DeviceState>) -> MutexGuard<'_, DeviceState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Connector backed by a [`MockDevice`].
#[derive(Debug, Clone)]
pub struct MockConnector {
    device: MockDevice,
}

impl Connector for MockConnector {
    type Transport = MockTransport;

    async fn connect(&self, config: &SessionConfig, route: Route) -> Result<MockTransport> {
        let (refuse, reject, delay) = {
            let mut state = self.device.lock();
            state.attempts += 1;
            state.routes.push(route);
            let reject = state.auth_failures > 0;
            if reject {
                state.auth_failures -= 1;
            }
            (state.refuse, reject, state.connect_delay)
        };

        if refuse {
            return Err(TransportError::ConnectionFailed {
                host: config.host.clone(),
                port: config.port,
                source: io::Error::new(io::ErrorKind::ConnectionRefused, "connection refused"),
            }
            .into());
        }
        if reject {
            return Err(TransportError::AuthenticationFailed {
                user: config.username.clone(),
                host: config.host.clone(),
            }
            .into());
        }
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        Ok(MockTransport {
            device: self.device.clone(),
            closed: false,
        })
    }
}

/// Transport backed by a [`MockDevice`].
#[derive(Debug)]
pub struct MockTransport {
    device: MockDevice,
    closed: bool,
}

impl Transport for MockTransport {
    type Shell = MockShell;

    async fn open_shell(&mut self, _width: u32, _height: u32) -> Result<MockShell> {
        if self.closed {
            return Err(TransportError::Disconnected.into());
        }
        let mut state = self.device.lock();
        state.shells_opened += 1;
        let mut pending = VecDeque::new();
        if !state.banner.is_empty() {
            pending.push_back(Pending {
                ready_at: Instant::now(),
                data: state.banner.clone(),
                hang_up: false,
            });
        }
        Ok(MockShell {
            device: self.device.clone(),
            pending,
            closed: false,
            hung_up: false,
        })
    }

    async fn exec(&mut self, command: &str) -> Result<ExecOutput> {
        if self.closed {
            return Err(TransportError::Disconnected.into());
        }
        let mut state = self.device.lock();
        state.exec_log.push(command.to_string());
        Ok(state.exec.get(command).cloned().unwrap_or_default())
    }

    async fn close(&mut self) -> Result<()> {
        if !self.closed {
            self.closed = true;
            self.device.lock().transports_closed += 1;
        }
        Ok(())
    }
}

/// Shell backed by a [`MockDevice`].
#[derive(Debug)]
pub struct MockShell {
    device: MockDevice,
    pending: VecDeque<Pending>,
    closed: bool,
    hung_up: bool,
}

impl Shell for MockShell {
    async fn send(&mut self, data: &[u8]) -> Result<()> {
        if self.closed || self.hung_up {
            return Err(ChannelError::Closed.into());
        }
        let mut state = self.device.lock();
        state.sent.extend_from_slice(data);
        if let Some((_, replies)) = state.rules.iter().find(|(input, _)| input == data) {
            self.pending.extend(Pending::schedule(replies));
        }
        Ok(())
    }

    async fn recv(&mut self, wait: Duration) -> Result<Option<Vec<u8>>> {
        if self.closed {
            return Err(ChannelError::Closed.into());
        }

        let now = Instant::now();
        let Some(next) = self.pending.front() else {
            if self.hung_up {
                return Err(ChannelError::Closed.into());
            }
            tokio::time::sleep(wait).await;
            return Ok(None);
        };

        if next.ready_at > now + wait {
            tokio::time::sleep(wait).await;
            return Ok(None);
        }
        tokio::time::sleep_until(next.ready_at).await;

        let chunk = self.pending.pop_front();
        Ok(chunk.map(|chunk| {
            self.hung_up |= chunk.hang_up;
            chunk.data
        }))
    }

    async fn close(&mut self) -> Result<()> {
        if !self.closed {
            self.closed = true;
            self.device.lock().shells_closed += 1;
        }
        Ok(())
    }
}
