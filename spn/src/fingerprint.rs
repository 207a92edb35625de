//! Device fingerprinting.
//!
//! A [`Fingerprinter`] looks at a device before the real batch runs and
//! reports its vendor, its prompt, and the commands that turn off paging.
//! The session only consumes the prompt and the paging prelude.

use std::future::Future;
use std::sync::Arc;

use log::{debug, info, warn};
use serde::Serialize;

use crate::driver::{CommandBatch, PromptOrigin, Session};
use crate::error::Result;
use crate::platform::VendorRegistry;
use crate::transport::{Connector, SessionConfig, SshConnector};

/// Paging commands tried before `show version`, one per vendor dialect.
/// Devices reject the ones they don't know with an error and a prompt.
pub const PROBE_PAGING_COMMANDS: &[&str] = &[
    "terminal length 0",
    "set cli screen-length 0",
    "no page",
    "set cli pager off",
];

/// Command whose output identifies the vendor.
pub const PROBE_COMMAND: &str = "show version";

/// What fingerprinting learned about a device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceDescriptor {
    /// Vendor profile name.
    pub vendor: String,

    /// Prompt seen during the probe, if detection was conclusive.
    pub prompt: Option<String>,

    /// Commands to prepend to a batch to turn off paging.
    pub disable_paging: Vec<String>,
}

impl DeviceDescriptor {
    /// Descriptor for a device nothing is known about.
    pub fn generic() -> Self {
        Self {
            vendor: crate::platform::GENERIC.to_string(),
            prompt: None,
            disable_paging: vec![],
        }
    }

    /// Fold what was learned into a session about to run `batch`.
    ///
    /// The paging prelude is skipped in legacy mode. The probed prompt only
    /// replaces the configured one when `use_prompt` is set.
    pub fn apply(
        &self,
        config: &mut SessionConfig,
        batch: CommandBatch,
        use_prompt: bool,
    ) -> CommandBatch {
        if use_prompt {
            if let Some(prompt) = &self.prompt {
                debug!("Using fingerprinted prompt {:?}", prompt);
                config.expect_prompt = Some(prompt.clone());
            }
        }
        if config.legacy_mode || self.disable_paging.is_empty() {
            return batch;
        }
        batch.with_paging_prelude(&self.disable_paging)
    }
}

/// Identifies a device ahead of a session.
pub trait Fingerprinter: Send + Sync {
    /// Probe the device described by `config`.
    fn fingerprint(
        &self,
        config: &SessionConfig,
    ) -> impl Future<Output = Result<DeviceDescriptor>> + Send;
}

/// Fingerprinter that opens its own short-lived session, detects the prompt,
/// runs `show version` and classifies the output by vendor markers.
#[derive(Debug, Clone)]
pub struct ProbeFingerprinter<C: Connector + Clone = SshConnector> {
    connector: C,
    registry: Arc<VendorRegistry>,
    commands: CommandBatch,
}

impl ProbeFingerprinter<SshConnector> {
    /// Probe over SSH with the built-in vendor profiles.
    pub fn new() -> Self {
        Self::with_connector(SshConnector)
    }
}

impl Default for ProbeFingerprinter<SshConnector> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Connector + Clone> ProbeFingerprinter<C> {
    /// Probe through `connector` with the built-in vendor profiles.
    pub fn with_connector(connector: C) -> Self {
        let mut commands = CommandBatch::from_commands(PROBE_PAGING_COMMANDS.iter().copied());
        commands.push(crate::driver::Command::parse(PROBE_COMMAND));
        Self {
            connector,
            registry: Arc::new(VendorRegistry::with_builtin()),
            commands,
        }
    }

    /// Classify against `registry` instead of the built-in profiles.
    pub fn with_registry(mut self, registry: impl Into<Arc<VendorRegistry>>) -> Self {
        self.registry = registry.into();
        self
    }

    /// Replace the probe batch.
    pub fn with_commands(mut self, commands: CommandBatch) -> Self {
        self.commands = commands;
        self
    }

    async fn probe(&self, session: &mut Session<C>) -> Result<DeviceDescriptor> {
        session.connect().await?;
        let detected = session.find_prompt().await?;
        let transcript = session.execute(&self.commands).await?;
        if !transcript.is_complete() {
            debug!("Probe batch ended early: {}", transcript.completion);
        }

        let profile = self.registry.classify(&transcript.output);
        let prompt = match detected.origin {
            PromptOrigin::Default => None,
            _ => Some(detected.prompt),
        };
        Ok(DeviceDescriptor {
            vendor: profile.name.clone(),
            prompt,
            disable_paging: profile.disable_paging.clone(),
        })
    }
}

impl<C: Connector + Clone> Fingerprinter for ProbeFingerprinter<C> {
    async fn fingerprint(&self, config: &SessionConfig) -> Result<DeviceDescriptor> {
        let mut config = config.clone();
        config.invoke_shell = true;
        config.expect_prompt = None;
        config.prompt_count = None;

        let host = config.host.clone();
        let mut session = Session::with_connector(config, self.connector.clone())?;
        let result = self.probe(&mut session).await;
        session.disconnect().await;

        match &result {
            Ok(descriptor) => info!(
                "Fingerprinted {} as {} (prompt {:?})",
                host, descriptor.vendor, descriptor.prompt
            ),
            Err(e) => warn!("Fingerprinting {} failed: {}", host, e),
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SessionBuilder;
    use crate::transport::testing::MockDevice;

    fn config() -> SessionConfig {
        SessionBuilder::new("r1")
            .username("admin")
            .password("pw")
            .build_config()
            .unwrap()
    }

    fn answering(device: MockDevice, prompt: &str) -> MockDevice {
        PROBE_PAGING_COMMANDS.iter().fold(device, |device, cmd| {
            device.on_send(&format!("{}\n", cmd), &format!("{}\r\n{}", cmd, prompt))
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_classifies_cisco() {
        let device = answering(MockDevice::new().on_send("\n", "\r\nR1#"), "R1#").on_send(
            "show version\n",
            "show version\r\nCisco IOS Software, C2960 Software\r\nR1#",
        );
        let fingerprinter = ProbeFingerprinter::with_connector(device.connector());

        let descriptor = fingerprinter.fingerprint(&config()).await.unwrap();

        assert_eq!(descriptor.vendor, "cisco_ios");
        assert_eq!(descriptor.prompt.as_deref(), Some("R1#"));
        assert_eq!(descriptor.disable_paging, ["terminal length 0"]);
        assert_eq!(device.shells_closed(), 1);
        assert_eq!(device.transports_closed(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_forces_shell_mode() {
        let device = MockDevice::new()
            .on_send("\n", "\r\nfw>")
            .on_send("show version\n", "show version\r\nsw-version: 10.2.4\r\nfw>");
        let fingerprinter = ProbeFingerprinter::with_connector(device.connector())
            .with_commands(CommandBatch::from(PROBE_COMMAND));
        let mut config = config();
        config.invoke_shell = false;

        let descriptor = fingerprinter.fingerprint(&config).await.unwrap();

        assert_eq!(descriptor.vendor, "paloalto");
        assert_eq!(descriptor.disable_paging, ["set cli pager off"]);
        assert_eq!(device.shells_opened(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_device_is_generic() {
        let device = MockDevice::new();
        let fingerprinter = ProbeFingerprinter::with_connector(device.connector())
            .with_commands(CommandBatch::from(PROBE_COMMAND));
        let mut config = config();
        config.expect_prompt_timeout = std::time::Duration::from_secs(1);

        let descriptor = fingerprinter.fingerprint(&config).await.unwrap();

        assert_eq!(descriptor, DeviceDescriptor::generic());
    }

    #[test]
    fn test_apply_prepends_paging_and_prompt() {
        let descriptor = DeviceDescriptor {
            vendor: "cisco_ios".to_string(),
            prompt: Some("R1#".to_string()),
            disable_paging: vec!["terminal length 0".to_string()],
        };
        let mut config = config();

        let batch = descriptor.apply(&mut config, CommandBatch::from("show ver"), true);

        assert_eq!(batch.prelude_len(), 1);
        assert_eq!(batch.len(), 2);
        assert_eq!(config.expect_prompt.as_deref(), Some("R1#"));
    }

    #[test]
    fn test_apply_skips_paging_in_legacy_mode() {
        let descriptor = DeviceDescriptor {
            vendor: "cisco_ios".to_string(),
            prompt: Some("R1#".to_string()),
            disable_paging: vec!["terminal length 0".to_string()],
        };
        let mut config = config();
        config.legacy_mode = true;

        let batch = descriptor.apply(&mut config, CommandBatch::from("show ver"), false);

        assert_eq!(batch.len(), 1);
        assert_eq!(config.expect_prompt, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connection_failure_is_returned() {
        let device = MockDevice::new().refuse_connections();
        let fingerprinter = ProbeFingerprinter::with_connector(device.connector());

        assert!(fingerprinter.fingerprint(&config()).await.is_err());
        assert_eq!(device.connect_attempts(), 1);
    }
}
