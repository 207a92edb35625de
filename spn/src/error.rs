//! Error types for spn.
//!
//! Only protocol-level failures are errors. Heuristic outcomes such as an
//! inconclusive prompt detection or a prompt count that was not reached in
//! time are reported through the returned values instead, see
//! [`DetectedPrompt`](crate::driver::DetectedPrompt) and
//! [`Completion`](crate::driver::Completion).

use std::io;
use std::time::Duration;

use thiserror::Error;

/// Main error type for spn operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid or incomplete session configuration
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Routing policy refused the target
    #[error("Routing error: {0}")]
    Routing(#[from] RoutingError),

    /// SSH transport-level errors
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Shell channel errors
    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    /// Session/driver-level errors
    #[error("Driver error: {0}")]
    Driver(#[from] DriverError),
}

impl Error {
    /// Whether a connection attempt that failed with this error may be retried.
    ///
    /// Authentication and SSH protocol failures are retryable; routing
    /// denials, configuration problems and socket-level failures are not.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Transport(TransportError::AuthenticationFailed { .. })
                | Error::Transport(TransportError::Ssh(_))
        )
    }
}

/// Configuration errors, always raised before any network I/O.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// A required field is empty or missing
    #[error("{field} is required")]
    Missing { field: &'static str },

    /// Proxy routing was selected but no jump host is configured
    #[error("Proxy connection requested for {host} but no proxy host is configured")]
    MissingProxyHost { host: String },

    /// A value is present but unusable
    #[error("Invalid {field}: {message}")]
    Invalid {
        field: &'static str,
        message: String,
    },

    /// Routing rules could not be parsed
    #[error("Invalid routing rules: {0}")]
    RoutingRules(#[from] serde_json::Error),
}

/// Routing policy errors.
#[derive(Error, Debug)]
pub enum RoutingError {
    /// A rule with a `deny` action matched the target
    #[error("Connection to {host}:{port} denied by routing policy")]
    Denied { host: String, port: u16 },
}

/// Transport layer errors (SSH connection, authentication).
#[derive(Error, Debug)]
pub enum TransportError {
    /// Failed to connect to host
    #[error("Connection failed to {host}:{port}: {source}")]
    ConnectionFailed {
        host: String,
        port: u16,
        #[source]
        source: io::Error,
    },

    /// SSH handshake or protocol error
    #[error("SSH error: {0}")]
    Ssh(#[from] russh::Error),

    /// Authentication failed
    #[error("Authentication failed for user '{user}' on {host}")]
    AuthenticationFailed { user: String, host: String },

    /// SSH key error
    #[error("SSH key error: {0}")]
    Key(String),

    /// Host key does not match the known_hosts entry
    #[error("Host key for {host}:{port} changed (known_hosts line {line})")]
    HostKeyChanged { host: String, port: u16, line: usize },

    /// Host is not present in known_hosts (strict mode)
    #[error("Host key for {host}:{port} is unknown")]
    HostKeyUnknown { host: String, port: u16 },

    /// known_hosts could not be read or written
    #[error("known_hosts error: {0}")]
    KnownHosts(String),

    /// Jump host could not open a forwarded channel to the target
    #[error("Tunnel through {proxy} to {host}:{port} failed: {source}")]
    Tunnel {
        proxy: String,
        host: String,
        port: u16,
        #[source]
        source: russh::Error,
    },

    /// Connection was closed unexpectedly
    #[error("Connection disconnected")]
    Disconnected,

    /// Operation timed out
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Shell channel errors.
#[derive(Error, Debug)]
pub enum ChannelError {
    /// Failed to open PTY channel
    #[error("Failed to open PTY channel")]
    PtyOpenFailed,

    /// Failed to request shell
    #[error("Failed to request shell")]
    ShellRequestFailed,

    /// Channel closed unexpectedly
    #[error("Channel closed")]
    Closed,

    /// SSH protocol error on the channel
    #[error("Channel SSH error: {0}")]
    Ssh(russh::Error),
}

/// Session lifecycle misuse.
#[derive(Error, Debug)]
pub enum DriverError {
    /// Session not connected
    #[error("Session not connected - call connect() first")]
    NotConnected,

    /// Session already connected
    #[error("Session already connected")]
    AlreadyConnected,

    /// Interactive shell required but unavailable (exec mode)
    #[error("No interactive shell - session runs in exec mode")]
    ShellNotReady,
}

/// Result type alias using spn's Error.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_failure_is_retryable() {
        let err: Error = TransportError::AuthenticationFailed {
            user: "admin".into(),
            host: "r1".into(),
        }
        .into();
        assert!(err.is_retryable());
    }

    #[test]
    fn test_deny_is_not_retryable() {
        let err: Error = RoutingError::Denied {
            host: "10.1.2.3".into(),
            port: 22,
        }
        .into();
        assert!(!err.is_retryable());
        assert_eq!(
            err.to_string(),
            "Routing error: Connection to 10.1.2.3:22 denied by routing policy"
        );
    }

    #[test]
    fn test_config_error_message() {
        let err: Error = ConfigError::Missing { field: "password" }.into();
        assert!(!err.is_retryable());
        assert_eq!(err.to_string(), "Configuration error: password is required");
    }
}
