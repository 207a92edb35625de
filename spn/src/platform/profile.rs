//! Vendor profile: paging prelude, completion timeout and version markers.

use std::time::Duration;

use log::debug;

use crate::driver::CommandBatch;
use crate::transport::SessionConfig;

/// Everything the engine knows about one vendor family.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VendorProfile {
    /// Canonical name (e.g., "cisco_ios", "paloalto").
    pub name: String,

    /// Alternative names accepted by lookup.
    pub aliases: Vec<String>,

    /// Commands sent ahead of a batch to turn off paging.
    pub disable_paging: Vec<String>,

    /// Minimum completion timeout for devices that answer slowly.
    pub prompt_timeout: Option<Duration>,

    /// Lowercase substrings of `show version` output that identify the vendor.
    pub markers: Vec<String>,
}

impl VendorProfile {
    /// Create a profile with no paging prelude and no markers.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            aliases: vec![],
            disable_paging: vec![],
            prompt_timeout: None,
            markers: vec![],
        }
    }

    /// Accept another name for this profile.
    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.aliases.push(alias.into());
        self
    }

    /// Add a paging-disable command. Embedded newlines split it into several.
    pub fn with_paging_command(mut self, command: &str) -> Self {
        self.disable_paging.extend(
            command
                .split('\n')
                .map(str::trim)
                .filter(|c| !c.is_empty())
                .map(String::from),
        );
        self
    }

    /// Set the minimum completion timeout.
    pub fn with_prompt_timeout(mut self, timeout: Duration) -> Self {
        self.prompt_timeout = Some(timeout);
        self
    }

    /// Add version-output markers.
    pub fn with_markers<I, S>(mut self, markers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.markers
            .extend(markers.into_iter().map(|m| m.as_ref().to_lowercase()));
        self
    }

    /// Raise the completion timeout of `config` to this profile's minimum.
    pub fn apply_timeout(&self, config: &mut SessionConfig) {
        if let Some(minimum) = self.prompt_timeout {
            if config.expect_prompt_timeout < minimum {
                debug!(
                    "{} needs at least {:?} to print its prompts",
                    self.name, minimum
                );
                config.expect_prompt_timeout = minimum;
            }
        }
    }

    /// Put this profile's paging prelude in front of `batch`.
    pub fn prelude(&self, batch: CommandBatch) -> CommandBatch {
        batch.with_paging_prelude(&self.disable_paging)
    }

    /// Whether `name` refers to this profile. `name` must already be normalized.
    pub(crate) fn answers_to(&self, name: &str) -> bool {
        self.name == name || self.aliases.iter().any(|a| a == name)
    }

    /// Whether lowercase `output` carries one of this profile's markers.
    pub(crate) fn matches_output(&self, output: &str) -> bool {
        self.markers.iter().any(|m| output.contains(m.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_multiline_paging_command_is_split() {
        let profile = VendorProfile::new("fortinet")
            .with_paging_command("config system console\nset output standard\nend");
        assert_eq!(
            profile.disable_paging,
            ["config system console", "set output standard", "end"]
        );
    }

    #[test]
    fn test_prelude_counts_toward_prompts() {
        let profile = VendorProfile::new("cisco_ios").with_paging_command("terminal length 0");
        let batch = profile.prelude(CommandBatch::from_commands(["show ver", "show int"]));
        assert_eq!(batch.prelude_len(), 1);
        assert_eq!(batch.expected_prompts(), 3);
        assert_eq!(batch.commands()[0].text(), Some("terminal length 0"));
    }

    #[test]
    fn test_prompt_timeout_only_raises() {
        let profile =
            VendorProfile::new("paloalto").with_prompt_timeout(Duration::from_secs(15));
        let mut config = crate::SessionBuilder::new("fw1")
            .username("admin")
            .password("pw")
            .expect_prompt_timeout(Duration::from_secs(5))
            .build_config()
            .unwrap();
        profile.apply_timeout(&mut config);
        assert_eq!(config.expect_prompt_timeout, Duration::from_secs(15));

        config.expect_prompt_timeout = Duration::from_secs(60);
        profile.apply_timeout(&mut config);
        assert_eq!(config.expect_prompt_timeout, Duration::from_secs(60));
    }

    #[test]
    fn test_markers_are_lowercased() {
        let profile = VendorProfile::new("arista").with_markers(["Arista Networks"]);
        assert!(profile.matches_output("arista networks eos"));
        assert!(!profile.matches_output("cisco ios"));
    }
}
