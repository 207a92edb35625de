//! Route selection for target devices.
//!
//! A route is decided once per session, before any socket is opened. Rules
//! are evaluated in order and the first match wins; when nothing matches the
//! target is reached directly.

use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use glob::Pattern;
use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result};

/// How a target is reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Route {
    /// Connect straight to the target.
    #[default]
    Direct,
    /// Tunnel through the configured jump host.
    Proxy,
    /// Refuse to connect.
    Deny,
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Route::Direct => f.write_str("direct"),
            Route::Proxy => f.write_str("proxy"),
            Route::Deny => f.write_str("deny"),
        }
    }
}

/// One routing rule as it appears in configuration.
///
/// ```json
/// [{"match": "10.0.0.0/8", "action": "deny"},
///  {"match": "*.dmz.example.net", "action": "proxy", "port": 22}]
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingRule {
    /// CIDR network (`10.0.0.0/8`) or case-insensitive hostname glob.
    #[serde(rename = "match")]
    pub pattern: String,

    /// What to do when the rule matches.
    #[serde(default)]
    pub action: Route,

    /// Restrict the rule to one destination port.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
}

impl RoutingRule {
    /// Create a rule matching `pattern` on any port.
    pub fn new(pattern: impl Into<String>, action: Route) -> Self {
        Self {
            pattern: pattern.into(),
            action,
            port: None,
        }
    }

    /// Restrict the rule to a single port.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }
}

#[derive(Debug, Clone)]
enum Matcher {
    Network(Cidr),
    Host(Pattern),
}

#[derive(Debug, Clone)]
struct CompiledRule {
    matcher: Option<Matcher>,
    rule: RoutingRule,
}

/// Ordered rule set that maps a target to a [`Route`].
#[derive(Debug, Clone, Default)]
pub struct RoutingResolver {
    rules: Vec<CompiledRule>,
}

impl RoutingResolver {
    /// Compile a rule set.
    ///
    /// Rules with an empty pattern are skipped. A pattern that is neither a
    /// valid CIDR nor a valid glob is rejected.
    pub fn new(rules: Vec<RoutingRule>) -> Result<Self> {
        let mut compiled = Vec::with_capacity(rules.len());
        for rule in rules {
            let matcher = if rule.pattern.trim().is_empty() {
                None
            } else if rule.pattern.contains('/') {
                match rule.pattern.parse::<Cidr>() {
                    Ok(cidr) => Some(Matcher::Network(cidr)),
                    Err(_) => Some(Matcher::Host(compile_glob(&rule.pattern)?)),
                }
            } else {
                Some(Matcher::Host(compile_glob(&rule.pattern)?))
            };
            compiled.push(CompiledRule { matcher, rule });
        }
        Ok(Self { rules: compiled })
    }

    /// Parse a JSON rule list.
    pub fn from_json(json: &str) -> Result<Self> {
        let rules: Vec<RoutingRule> = serde_json::from_str(json).map_err(ConfigError::from)?;
        Self::new(rules)
    }

    /// Number of rules.
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Whether the rule set is empty.
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Whether any rule needs an IP address to be evaluated.
    pub fn needs_address(&self) -> bool {
        self.rules
            .iter()
            .any(|r| matches!(r.matcher, Some(Matcher::Network(_))))
    }

    /// Decide the route for `host:port`.
    ///
    /// If `host` is an IP literal it is used for network rules directly;
    /// otherwise network rules only match when `resolved` is given.
    pub fn resolve(&self, host: &str, port: u16, resolved: Option<IpAddr>) -> Route {
        let addr = IpAddr::from_str(host).ok().or(resolved);
        let host_lower = host.to_ascii_lowercase();

        for compiled in &self.rules {
            let Some(matcher) = &compiled.matcher else {
                continue;
            };
            if compiled.rule.port.is_some_and(|p| p != port) {
                continue;
            }
            let matched = match matcher {
                Matcher::Network(cidr) => addr.is_some_and(|ip| cidr.contains(ip)),
                Matcher::Host(pattern) => pattern.matches(&host_lower),
            };
            if matched {
                debug!(
                    "Route matched: {} -> {}",
                    compiled.rule.pattern, compiled.rule.action
                );
                return compiled.rule.action;
            }
        }

        Route::Direct
    }
}

fn compile_glob(pattern: &str) -> Result<Pattern> {
    Pattern::new(&pattern.to_ascii_lowercase()).map_err(|e| {
        warn!("Rejecting routing pattern {:?}: {}", pattern, e);
        ConfigError::Invalid {
            field: "routing rule",
            message: format!("{}: {}", pattern, e.msg),
        }
        .into()
    })
}

/// An IPv4 or IPv6 network in prefix notation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cidr {
    network: IpAddr,
    prefix: u8,
}

impl Cidr {
    /// Whether `ip` lies inside this network. Address families never mix.
    pub fn contains(&self, ip: IpAddr) -> bool {
        match (self.network, ip) {
            (IpAddr::V4(net), IpAddr::V4(ip)) => {
                let mask = prefix_mask_u32(self.prefix);
                u32::from(net) & mask == u32::from(ip) & mask
            }
            (IpAddr::V6(net), IpAddr::V6(ip)) => {
                let mask = prefix_mask_u128(self.prefix);
                u128::from(net) & mask == u128::from(ip) & mask
            }
            _ => false,
        }
    }
}

fn prefix_mask_u32(prefix: u8) -> u32 {
    if prefix == 0 { 0 } else { u32::MAX << (32 - u32::from(prefix)) }
}

fn prefix_mask_u128(prefix: u8) -> u128 {
    if prefix == 0 { 0 } else { u128::MAX << (128 - u32::from(prefix)) }
}

impl FromStr for Cidr {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let (addr, prefix) = s
            .split_once('/')
            .ok_or_else(|| format!("missing prefix length in {:?}", s))?;
        let network: IpAddr = addr
            .trim()
            .parse()
            .map_err(|e| format!("bad network address {:?}: {}", addr, e))?;
        let prefix: u8 = prefix
            .trim()
            .parse()
            .map_err(|e| format!("bad prefix length {:?}: {}", prefix, e))?;
        let max = if network.is_ipv4() { 32 } else { 128 };
        if prefix > max {
            return Err(format!("prefix length {} exceeds {}", prefix, max));
        }
        Ok(Self { network, prefix })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver(json: &str) -> RoutingResolver {
        RoutingResolver::from_json(json).unwrap()
    }

    #[test]
    fn test_cidr_deny() {
        let r = resolver(r#"[{"match": "10.0.0.0/8", "action": "deny"}]"#);
        assert_eq!(r.resolve("10.1.2.3", 22, None), Route::Deny);
        assert_eq!(r.resolve("192.168.1.1", 22, None), Route::Direct);
    }

    #[test]
    fn test_first_match_wins() {
        let r = RoutingResolver::new(vec![
            RoutingRule::new("10.20.0.0/16", Route::Proxy),
            RoutingRule::new("10.0.0.0/8", Route::Deny),
        ])
        .unwrap();
        assert_eq!(r.resolve("10.20.5.5", 22, None), Route::Proxy);
        assert_eq!(r.resolve("10.30.5.5", 22, None), Route::Deny);
    }

    #[test]
    fn test_hostname_glob_is_case_insensitive() {
        let r = resolver(r#"[{"match": "*.DMZ.example.net", "action": "proxy"}]"#);
        assert_eq!(r.resolve("fw1.dmz.EXAMPLE.net", 22, None), Route::Proxy);
        assert_eq!(r.resolve("core1.example.net", 22, None), Route::Direct);
    }

    #[test]
    fn test_network_rule_uses_resolved_address() {
        let r = resolver(r#"[{"match": "172.16.0.0/12", "action": "proxy"}]"#);
        assert!(r.needs_address());
        assert_eq!(r.resolve("sw1.lab", 22, None), Route::Direct);
        let ip: IpAddr = "172.20.1.1".parse().unwrap();
        assert_eq!(r.resolve("sw1.lab", 22, Some(ip)), Route::Proxy);
    }

    #[test]
    fn test_port_restricted_rule() {
        let r = RoutingResolver::new(vec![RoutingRule::new("*", Route::Deny).with_port(23)]).unwrap();
        assert_eq!(r.resolve("r1", 23, None), Route::Deny);
        assert_eq!(r.resolve("r1", 22, None), Route::Direct);
    }

    #[test]
    fn test_missing_action_defaults_to_direct() {
        let r = resolver(r#"[{"match": "r1"}]"#);
        assert_eq!(r.resolve("r1", 22, None), Route::Direct);
    }

    #[test]
    fn test_empty_rules_default_direct() {
        let r = RoutingResolver::default();
        assert!(r.is_empty());
        assert_eq!(r.resolve("anything", 22, None), Route::Direct);
    }

    #[test]
    fn test_ipv6_network() {
        let cidr: Cidr = "2001:db8::/32".parse().unwrap();
        assert!(cidr.contains("2001:db8::1".parse().unwrap()));
        assert!(!cidr.contains("2001:db9::1".parse().unwrap()));
        assert!(!cidr.contains("10.0.0.1".parse().unwrap()));
    }

    #[test]
    fn test_zero_prefix_matches_everything() {
        let cidr: Cidr = "0.0.0.0/0".parse().unwrap();
        assert!(cidr.contains("203.0.113.9".parse().unwrap()));
    }

    #[test]
    fn test_bad_json_is_config_error() {
        let err = RoutingResolver::from_json("not json").unwrap_err();
        assert!(matches!(err, crate::Error::Config(ConfigError::RoutingRules(_))));
    }

    #[test]
    fn test_invalid_prefix_rejected() {
        assert!("10.0.0.0/33".parse::<Cidr>().is_err());
    }
}
