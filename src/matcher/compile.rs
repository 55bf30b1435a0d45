//! Compilation of rule descriptors into policies.
//!
//! Quota strings follow `<integer><unit>`:
//! - data units `kb`, `mb`, `gb` (powers of 1024)
//! - time units `s`, `m`, `h` (×1, ×60, ×3600)
//!
//! Units are case-insensitive; an empty string means unbounded.

use ipnet::IpNet;
use log::warn;
use regex::Regex;
use std::net::{IpAddr, ToSocketAddrs};

use crate::error::{ConfigError, ConfigResult};
use crate::rules::RuleDescriptor;
use crate::types::ProtocolClass;

/// Marker for a quota with no limit.
pub const UNBOUNDED: i64 = -1;

const QUOTA_PATTERN: &str = r"^(\d+)([A-Za-z]{1,2})$";

/// A compiled policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Policy {
    pub name: String,
    /// Destination network, host bits cleared
    pub network: IpNet,
    pub protocol: ProtocolClass,
    /// Bytes, or [`UNBOUNDED`]
    pub data_limit: i64,
    /// Seconds, or [`UNBOUNDED`]
    pub time_limit: i64,
}

impl Policy {
    /// Whether this policy targets the wildcard network.
    pub fn is_default(&self) -> bool {
        self.network.prefix_len() == 0
    }
}

/// Turns [`RuleDescriptor`]s into [`Policy`]s.
#[derive(Debug, Clone)]
pub struct RuleCompiler {
    quota: Regex,
}

impl RuleCompiler {
    pub fn new() -> ConfigResult<Self> {
        Ok(Self {
            quota: Regex::new(QUOTA_PATTERN)?,
        })
    }

    pub fn compile(&self, rule: &RuleDescriptor) -> ConfigResult<Policy> {
        let protocol = ProtocolClass::from_name(&rule.protocol);
        if protocol == ProtocolClass::Any {
            let name = rule.protocol.trim();
            if !name.is_empty() && !name.eq_ignore_ascii_case("any") {
                warn!(
                    "Rule '{}': unknown protocol '{}', applying to any protocol",
                    rule.name, name
                );
            }
        }

        Ok(Policy {
            name: rule.name.clone(),
            network: resolve_destination(&rule.destination)?,
            protocol,
            data_limit: self.data_limit(&rule.usage_size)?,
            time_limit: self.time_limit(&rule.usage_time)?,
        })
    }

    /// Compiles every rule, failing on the first bad one.
    pub fn compile_all(&self, rules: &[RuleDescriptor]) -> ConfigResult<Vec<Policy>> {
        rules.iter().map(|rule| self.compile(rule)).collect()
    }

    /// Splits `"<integer><unit>"` into its value and lowercased unit.
    fn split_quota(&self, raw: &str) -> ConfigResult<(i64, String)> {
        let caps = self
            .quota
            .captures(raw.trim())
            .ok_or_else(|| ConfigError::MalformedQuota(raw.to_string()))?;

        let value = caps[1]
            .parse::<i64>()
            .map_err(|_| ConfigError::QuotaOverflow(raw.to_string()))?;
        Ok((value, caps[2].to_ascii_lowercase()))
    }

    /// Data quota in bytes.
    pub fn data_limit(&self, raw: &str) -> ConfigResult<i64> {
        if raw.trim().is_empty() {
            return Ok(UNBOUNDED);
        }
        let (value, unit) = self.split_quota(raw)?;
        let multiplier: i64 = match unit.as_str() {
            "kb" => 1 << 10,
            "mb" => 1 << 20,
            "gb" => 1 << 30,
            _ => return Err(ConfigError::UnknownUnit { kind: "data", unit }),
        };
        value
            .checked_mul(multiplier)
            .ok_or_else(|| ConfigError::QuotaOverflow(raw.to_string()))
    }

    /// Duration quota in seconds.
    pub fn time_limit(&self, raw: &str) -> ConfigResult<i64> {
        if raw.trim().is_empty() {
            return Ok(UNBOUNDED);
        }
        let (value, unit) = self.split_quota(raw)?;
        let multiplier: i64 = match unit.as_str() {
            "s" => 1,
            "m" => 60,
            "h" => 3600,
            _ => return Err(ConfigError::UnknownUnit { kind: "time", unit }),
        };
        value
            .checked_mul(multiplier)
            .ok_or_else(|| ConfigError::QuotaOverflow(raw.to_string()))
    }
}

/// Resolves a destination to a network: a CIDR as written (host bits
/// cleared), or a single host for a bare address or resolvable host name.
pub fn resolve_destination(destination: &str) -> ConfigResult<IpNet> {
    let destination = destination.trim();
    let invalid = || ConfigError::InvalidDestination(destination.to_string());

    if let Ok(net) = destination.parse::<IpNet>() {
        return Ok(net.trunc());
    }
    if let Ok(ip) = destination.parse::<IpAddr>() {
        return host_network(ip).ok_or_else(invalid);
    }
    if destination.is_empty() {
        return Err(invalid());
    }

    let addrs: Vec<IpAddr> = (destination, 0)
        .to_socket_addrs()
        .map_err(|_| invalid())?
        .map(|addr| addr.ip())
        .collect();
    let ip = addrs
        .iter()
        .find(|ip| ip.is_ipv4())
        .or_else(|| addrs.first())
        .copied()
        .ok_or_else(invalid)?;
    host_network(ip).ok_or_else(invalid)
}

fn host_network(ip: IpAddr) -> Option<IpNet> {
    let len = if ip.is_ipv4() { 32 } else { 128 };
    IpNet::new(ip, len).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compiler() -> RuleCompiler {
        RuleCompiler::new().unwrap()
    }

    #[test]
    fn test_data_units() {
        let c = compiler();
        assert_eq!(c.data_limit("2kb").unwrap(), 2048);
        assert_eq!(c.data_limit("3MB").unwrap(), 3 * 1024 * 1024);
        assert_eq!(c.data_limit("1Gb").unwrap(), 1024 * 1024 * 1024);
        assert_eq!(c.data_limit("256mb").unwrap(), 256 * 1024 * 1024);
        assert_eq!(c.data_limit("").unwrap(), UNBOUNDED);
    }

    #[test]
    fn test_time_units() {
        let c = compiler();
        assert_eq!(c.time_limit("30s").unwrap(), 30);
        assert_eq!(c.time_limit("5m").unwrap(), 300);
        assert_eq!(c.time_limit("1H").unwrap(), 3600);
        assert_eq!(c.time_limit("  ").unwrap(), UNBOUNDED);
    }

    #[test]
    fn test_bad_quotas() {
        let c = compiler();
        assert!(matches!(c.data_limit("2tb"), Err(ConfigError::UnknownUnit { kind: "data", .. })));
        assert!(matches!(c.time_limit("2d"), Err(ConfigError::UnknownUnit { kind: "time", .. })));
        assert!(matches!(c.time_limit("2kb"), Err(ConfigError::UnknownUnit { .. })));
        assert!(matches!(c.data_limit("kb"), Err(ConfigError::MalformedQuota(_))));
        assert!(matches!(c.data_limit("10 mbps"), Err(ConfigError::MalformedQuota(_))));
        assert!(matches!(c.data_limit("-1kb"), Err(ConfigError::MalformedQuota(_))));
        assert!(matches!(
            c.data_limit("99999999999999gb"),
            Err(ConfigError::QuotaOverflow(_))
        ));
    }

    #[test]
    fn test_destinations() {
        assert_eq!(resolve_destination("192.168.1.0/24").unwrap().to_string(), "192.168.1.0/24");
        assert_eq!(resolve_destination("192.168.1.9/24").unwrap().to_string(), "192.168.1.0/24");
        assert_eq!(resolve_destination("10.1.2.3").unwrap().to_string(), "10.1.2.3/32");
        assert_eq!(resolve_destination("2001:db8::1").unwrap().to_string(), "2001:db8::1/128");
        assert_eq!(resolve_destination("0.0.0.0/0").unwrap().prefix_len(), 0);
        assert!(resolve_destination("").is_err());
    }

    #[test]
    fn test_compile_rule() {
        let rule = RuleDescriptor::new("test1", "192.168.1.0/24")
            .usage_size("2kb")
            .usage_time("1h")
            .protocol("any");
        let policy = compiler().compile(&rule).unwrap();
        assert_eq!(policy.name, "test1");
        assert_eq!(policy.protocol, ProtocolClass::Any);
        assert_eq!(policy.data_limit, 2048);
        assert_eq!(policy.time_limit, 3600);
        assert!(!policy.is_default());
    }

    #[test]
    fn test_compile_all_stops_at_first_error() {
        let rules = vec![
            RuleDescriptor::new("ok", "10.0.0.0/8"),
            RuleDescriptor::new("bad", "10.0.0.0/8").usage_size("1xb"),
        ];
        assert!(compiler().compile_all(&rules).is_err());
    }
}
