//! Registry of vendor profiles.

use std::sync::LazyLock;
use std::time::Duration;

use indexmap::IndexMap;

use super::profile::VendorProfile;
use crate::error::{ConfigError, Result};

/// Name of the catch-all profile.
pub const GENERIC: &str = "generic";

/// Prompt timeout for vendors whose CLI is slow to redraw.
const SLOW_PROMPT_TIMEOUT: Duration = Duration::from_secs(15);

static BUILTIN: LazyLock<VendorRegistry> = LazyLock::new(VendorRegistry::with_builtin);

/// Ordered set of vendor profiles.
///
/// Classification walks profiles in registration order, so more specific
/// families (ASA, NX-OS, IOS XR) are registered ahead of the broader ones
/// whose markers they would otherwise share.
#[derive(Debug, Clone)]
pub struct VendorRegistry {
    profiles: IndexMap<String, VendorProfile>,
}

impl Default for VendorRegistry {
    fn default() -> Self {
        Self::with_builtin()
    }
}

impl VendorRegistry {
    /// Create a registry holding only the generic profile.
    pub fn new() -> Self {
        let mut profiles = IndexMap::new();
        profiles.insert(GENERIC.to_string(), VendorProfile::new(GENERIC));
        Self { profiles }
    }

    /// The shared read-only registry of built-in profiles.
    pub fn builtin() -> &'static VendorRegistry {
        &BUILTIN
    }

    /// Create a registry with the built-in profiles.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        for profile in builtin_profiles() {
            registry.profiles.insert(profile.name.clone(), profile);
        }
        // Keep the catch-all last so it never shadows a real vendor.
        if let Some(generic) = registry.profiles.shift_remove(GENERIC) {
            registry.profiles.insert(GENERIC.to_string(), generic);
        }
        registry
    }

    /// Register a profile. Names and aliases must be unique.
    pub fn register(&mut self, mut profile: VendorProfile) -> Result<()> {
        let name = normalize(&profile.name);
        profile.name = name.clone();
        profile.aliases = profile.aliases.iter().map(|a| normalize(a)).collect();
        let taken = std::iter::once(&name)
            .chain(profile.aliases.iter())
            .find(|n| self.find(&normalize(n)).is_some());
        if let Some(taken) = taken {
            return Err(ConfigError::Invalid {
                field: "vendor",
                message: format!("{} is already registered", taken),
            }
            .into());
        }
        self.profiles.insert(name, profile);
        Ok(())
    }

    /// Look up a profile by name or alias, ignoring case.
    pub fn get(&self, name: &str) -> Option<&VendorProfile> {
        self.find(&normalize(name))
    }

    /// Look up a profile, falling back to the generic one.
    pub fn resolve(&self, name: &str) -> &VendorProfile {
        self.get(name).unwrap_or_else(|| self.generic())
    }

    /// The catch-all profile.
    pub fn generic(&self) -> &VendorProfile {
        static FALLBACK: LazyLock<VendorProfile> = LazyLock::new(|| VendorProfile::new(GENERIC));
        self.profiles.get(GENERIC).unwrap_or(&FALLBACK)
    }

    /// Classify `show version` style output. Unrecognised output is generic.
    pub fn classify(&self, output: &str) -> &VendorProfile {
        let output = output.to_lowercase();
        self.profiles
            .values()
            .find(|p| p.matches_output(&output))
            .unwrap_or_else(|| self.generic())
    }

    /// Registered profile names, in classification order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.profiles.keys().map(String::as_str)
    }

    /// Number of registered profiles.
    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }

    fn find(&self, name: &str) -> Option<&VendorProfile> {
        self.profiles
            .get(name)
            .or_else(|| self.profiles.values().find(|p| p.answers_to(name)))
    }
}

fn normalize(name: &str) -> String {
    name.trim().to_lowercase().replace('-', "_")
}

fn builtin_profiles() -> Vec<VendorProfile> {
    vec![
        VendorProfile::new("cisco_asa")
            .with_alias("asa")
            .with_paging_command("terminal pager 0")
            .with_markers(["adaptive security appliance", "cisco asa"]),
        VendorProfile::new("cisco_nxos")
            .with_alias("nxos")
            .with_paging_command("terminal length 0")
            .with_markers(["nx-os", "nexus operating system", "cisco nexus"]),
        VendorProfile::new("cisco_xr")
            .with_alias("iosxr")
            .with_paging_command("terminal length 0")
            .with_markers(["ios xr", "asr9k"]),
        VendorProfile::new("cisco_ios")
            .with_alias("cisco")
            .with_alias("ios")
            .with_paging_command("terminal length 0")
            .with_markers([
                "cisco ios",
                "cisco internetwork operating system",
                "ios software",
                "ios-xe",
                "catalyst l3 switch",
            ]),
        VendorProfile::new("arista")
            .with_alias("arista_eos")
            .with_paging_command("terminal length 0")
            .with_markers(["arista", "eos version", "dcs-"]),
        VendorProfile::new("juniper")
            .with_alias("juniper_junos")
            .with_paging_command("set cli screen-length 0")
            .with_markers(["junos", "juniper networks"]),
        VendorProfile::new("paloalto")
            .with_alias("paloalto_panos")
            .with_paging_command("set cli pager off")
            .with_prompt_timeout(SLOW_PROMPT_TIMEOUT)
            .with_markers(["palo alto networks", "pan-os", "sw-version"]),
        VendorProfile::new("cloudgenix")
            .with_alias("ion")
            .with_paging_command("set paging off")
            .with_prompt_timeout(SLOW_PROMPT_TIMEOUT)
            .with_markers(["cloudgenix"]),
        VendorProfile::new("fortinet")
            .with_alias("fortios")
            .with_paging_command("config system console\nset output standard\nend")
            .with_markers(["fortigate", "fortios", "fortinet"]),
        VendorProfile::new("hp_procurve")
            .with_alias("procurve")
            .with_alias("aruba")
            .with_paging_command("no page")
            .with_markers(["hewlett-packard", "procurve", "aruba"]),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_paging_commands() {
        let registry = VendorRegistry::builtin();
        assert_eq!(registry.resolve("cisco").disable_paging, ["terminal length 0"]);
        assert_eq!(registry.resolve("arista").disable_paging, ["terminal length 0"]);
        assert_eq!(registry.resolve("juniper").disable_paging, ["set cli screen-length 0"]);
        assert_eq!(registry.resolve("hp_procurve").disable_paging, ["no page"]);
        assert_eq!(registry.resolve("fortinet").disable_paging.len(), 3);
        assert!(registry.resolve("generic").disable_paging.is_empty());
    }

    #[test]
    fn test_slow_vendors_carry_prompt_timeout() {
        let registry = VendorRegistry::builtin();
        let palo = registry.resolve("paloalto");
        assert_eq!(palo.disable_paging, ["set cli pager off"]);
        assert_eq!(palo.prompt_timeout, Some(Duration::from_secs(15)));
        let ion = registry.resolve("cloudgenix");
        assert_eq!(ion.disable_paging, ["set paging off"]);
        assert_eq!(ion.prompt_timeout, Some(Duration::from_secs(15)));
        assert_eq!(registry.resolve("cisco").prompt_timeout, None);
    }

    #[test]
    fn test_lookup_ignores_case_and_dashes() {
        let registry = VendorRegistry::builtin();
        assert_eq!(registry.resolve("Cisco").name, "cisco_ios");
        assert_eq!(registry.resolve("CISCO-NXOS").name, "cisco_nxos");
        assert_eq!(registry.resolve(" PaloAlto ").name, "paloalto");
    }

    #[test]
    fn test_unknown_vendor_is_generic() {
        let registry = VendorRegistry::builtin();
        assert!(registry.get("mikrotik").is_none());
        assert_eq!(registry.resolve("mikrotik").name, GENERIC);
    }

    #[test]
    fn test_classify_prefers_specific_cisco_families() {
        let registry = VendorRegistry::builtin();
        assert_eq!(
            registry
                .classify("Cisco IOS XR Software, Version 7.3.2\nASR9K Series")
                .name,
            "cisco_xr"
        );
        assert_eq!(
            registry
                .classify("Cisco Adaptive Security Appliance Software Version 9.12")
                .name,
            "cisco_asa"
        );
        assert_eq!(
            registry
                .classify("Cisco Nexus Operating System (NX-OS) Software")
                .name,
            "cisco_nxos"
        );
        assert_eq!(
            registry
                .classify("Cisco IOS Software, C3750E Software (C3750E-UNIVERSALK9-M)")
                .name,
            "cisco_ios"
        );
    }

    #[test]
    fn test_classify_other_vendors() {
        let registry = VendorRegistry::builtin();
        assert_eq!(registry.classify("Arista DCS-7050TX-64").name, "arista");
        assert_eq!(registry.classify("JUNOS Software Release [18.4R3]").name, "juniper");
        assert_eq!(registry.classify("sw-version: 10.1.6").name, "paloalto");
        assert_eq!(registry.classify("% Unknown command").name, GENERIC);
    }

    #[test]
    fn test_generic_is_last() {
        let registry = VendorRegistry::builtin();
        assert_eq!(registry.names().last(), Some(GENERIC));
        assert_eq!(registry.names().next(), Some("cisco_asa"));
    }

    #[test]
    fn test_register_rejects_duplicates() {
        let mut registry = VendorRegistry::new();
        registry
            .register(VendorProfile::new("mikrotik").with_paging_command("/system console"))
            .unwrap();
        assert!(registry.register(VendorProfile::new("MikroTik")).is_err());
        assert!(
            registry
                .register(VendorProfile::new("routeros").with_alias("mikrotik"))
                .is_err()
        );
        assert_eq!(registry.len(), 2);
    }
}
