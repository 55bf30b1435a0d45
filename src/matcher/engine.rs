use log::{error, info};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Instant;

use super::compile::{Policy, RuleCompiler, UNBOUNDED};
use super::index::PolicyIndex;
use crate::conversation::{ConversationTracker, Direction, FlowRecord};
use crate::error::ConfigResult;
use crate::packet::Packet;
use crate::rules::{RuleDescriptor, RuleSource, StaticRules};
use crate::types::{now_secs, ProtocolClass, Verdict};

// ================================================================================================
// RESULTS
// ================================================================================================

/// Verdict for one packet and the name of the policy that produced it.
///
/// `policy` is empty when no policy applied, including when the flow could
/// not be tracked.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchResult {
    pub verdict: Verdict,
    pub policy: String,
}

impl MatchResult {
    fn unmatched() -> Self {
        Self::default()
    }
}

/// Statistics from a successful reload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReloadStats {
    /// Policies in the new index, defaults included
    pub policies: usize,
    /// Distinct non-default networks
    pub networks: usize,
    /// Policies on the wildcard network
    pub default_policies: usize,
    /// Time to fetch, compile and index the rules
    pub duration_ms: u64,
    /// Index version now active
    pub version: u64,
}

// ================================================================================================
// RULE MATCHER
// ================================================================================================

/// Evaluates packets against the active policy index and their flow state.
///
/// # Thread Safety
/// The active index sits behind one lock. `match_packet` holds it shared for
/// the whole evaluation, tracker call included; `reload` compiles and indexes
/// without it and takes it exclusively only to swap the new index in. The
/// tracker never calls back into the matcher.
pub struct RuleMatcher {
    /// Active index and its version, swapped together
    active: RwLock<(Arc<PolicyIndex>, u64)>,
    compiler: RuleCompiler,
    source: Box<dyn RuleSource>,
    tracker: Arc<ConversationTracker>,
}

impl std::fmt::Debug for RuleMatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let active = self.active.read();
        f.debug_struct("RuleMatcher")
            .field("policies", &active.0.len())
            .field("version", &active.1)
            .field("tracker", &self.tracker)
            .finish()
    }
}

impl RuleMatcher {
    /// Creates a matcher and performs the initial load from `source`.
    ///
    /// Unlike a later reload, a failing initial load is returned to the caller.
    pub fn new(source: Box<dyn RuleSource>, tracker: Arc<ConversationTracker>) -> ConfigResult<Self> {
        let matcher = Self {
            active: RwLock::new((Arc::new(PolicyIndex::empty()), 0)),
            compiler: RuleCompiler::new()?,
            source,
            tracker,
        };
        matcher.reload()?;
        Ok(matcher)
    }

    /// Creates a matcher over a fixed rule set.
    pub fn from_rules(rules: Vec<RuleDescriptor>, tracker: Arc<ConversationTracker>) -> ConfigResult<Self> {
        Self::new(Box::new(StaticRules(rules)), tracker)
    }

    // ============================================================================================
    // RELOAD
    // ============================================================================================

    /// Re-reads the rule source and swaps in a freshly built index.
    ///
    /// On any failure the error is logged and returned, and the previous
    /// index stays active.
    pub fn reload(&self) -> ConfigResult<ReloadStats> {
        let rules = self.source.rules().map_err(|e| {
            error!("Rule reload failed reading source: {}", e);
            e
        })?;
        self.load_rules(&rules)
    }

    /// Compiles and activates `rules`, bypassing the configured source.
    pub fn load_rules(&self, rules: &[RuleDescriptor]) -> ConfigResult<ReloadStats> {
        let start = Instant::now();

        let index = self
            .compiler
            .compile_all(rules)
            .and_then(PolicyIndex::build)
            .map_err(|e| {
                error!("Rule reload rejected, keeping active policies: {}", e);
                e
            })?;

        let policies = index.len();
        let networks = index.network_count();
        let default_policies = index.default_policies().len();
        let index = Arc::new(index);

        let version = {
            let mut active = self.active.write();
            let version = active.1 + 1;
            *active = (index, version);
            version
        };

        let stats = ReloadStats {
            policies,
            networks,
            default_policies,
            duration_ms: start.elapsed().as_millis() as u64,
            version,
        };
        info!(
            "Policy index v{} active: {} policies, {} networks, {} defaults ({}ms)",
            stats.version, stats.policies, stats.networks, stats.default_policies, stats.duration_ms
        );
        Ok(stats)
    }

    // ============================================================================================
    // MATCHING
    // ============================================================================================

    /// Accounts `packet` to its conversation and evaluates the governing policy.
    ///
    /// `timestamp` is Unix seconds, 0 meaning now. Untracked flows and packets
    /// without a policy pass with an empty policy name.
    pub fn match_packet(&self, packet: &Packet, timestamp: i64) -> MatchResult {
        let active = self.active.read();

        let Some(record) = self.tracker.get_status(packet, timestamp) else {
            return MatchResult::unmatched();
        };

        let remote = remote_address(&record, packet);
        match active.0.find(remote, packet.protocol) {
            Some(policy) => MatchResult {
                verdict: check_quota(policy, &record, now_secs()),
                policy: policy.name.clone(),
            },
            None => MatchResult::unmatched(),
        }
    }

    // ============================================================================================
    // ACCESSORS
    // ============================================================================================

    /// The active index.
    pub fn index(&self) -> Arc<PolicyIndex> {
        Arc::clone(&self.active.read().0)
    }

    /// Version of the active index, bumped by every successful reload.
    pub fn version(&self) -> u64 {
        self.active.read().1
    }

    pub fn tracker(&self) -> &Arc<ConversationTracker> {
        &self.tracker
    }
}

/// The address of the far end: the destination for packets going the
/// conversation's original way, the source for replies.
fn remote_address(record: &FlowRecord, packet: &Packet) -> IpAddr {
    match record.direction(packet) {
        Direction::Send => packet.dst,
        Direction::Receive => packet.src,
    }
}

/// Drops once either bounded quota of `policy` is reached by the counters
/// in its protocol scope.
pub fn check_quota(policy: &Policy, record: &FlowRecord, now: i64) -> Verdict {
    let (usage, duration) = match policy.protocol {
        ProtocolClass::Tcp => (record.tcp.total_data(), record.tcp.duration_at(now)),
        ProtocolClass::Udp => (record.udp.total_data(), record.udp.duration_at(now)),
        ProtocolClass::Any => (record.total_data(), record.duration_at(now)),
    };
    let usage = i64::try_from(usage).unwrap_or(i64::MAX);

    let over_time = policy.time_limit != UNBOUNDED && duration >= policy.time_limit;
    let over_data = policy.data_limit != UNBOUNDED && usage >= policy.data_limit;
    if over_time || over_data {
        Verdict::Drop
    } else {
        Verdict::Ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ConfigError;
    use crate::types::{PROTOCOL_TCP, PROTOCOL_UDP};

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    fn tracker() -> Arc<ConversationTracker> {
        Arc::new(ConversationTracker::with_segments(64, 3600, 1000))
    }

    fn matcher(rules: Vec<RuleDescriptor>) -> RuleMatcher {
        RuleMatcher::from_rules(rules, tracker()).unwrap()
    }

    fn reference_rules() -> Vec<RuleDescriptor> {
        vec![
            RuleDescriptor::new("test1", "192.168.1.0/24").usage_size("2kb").protocol("any"),
            RuleDescriptor::new("test2", "192.168.2.0/24").usage_time("1h").protocol("udp"),
            RuleDescriptor::new("default", "0.0.0.0/0").usage_size("256mb").protocol("udp"),
        ]
    }

    #[test]
    fn test_data_quota_reached() {
        let m = matcher(reference_rules());
        let out = Packet::new(ip("192.168.0.1"), ip("192.168.1.2"), PROTOCOL_TCP, 1000);

        let first = m.match_packet(&out, 0);
        assert_eq!(first, MatchResult { verdict: Verdict::Ok, policy: "test1".into() });

        // the reply is matched on its source, the same remote network
        let second = m.match_packet(&out.reversed(), 0);
        assert_eq!(second.verdict, Verdict::Ok);
        assert_eq!(second.policy, "test1");

        let third = m.match_packet(&out, 0);
        assert_eq!(third, MatchResult { verdict: Verdict::Drop, policy: "test1".into() });
    }

    #[test]
    fn test_network_without_protocol_passes() {
        let m = matcher(reference_rules());
        let packet = Packet::new(ip("192.168.0.1"), ip("192.168.2.1"), PROTOCOL_TCP, 1000);
        assert_eq!(m.match_packet(&packet, 0), MatchResult::unmatched());
    }

    #[test]
    fn test_time_quota_reached() {
        let m = matcher(reference_rules());
        let packet = Packet::new(ip("192.168.0.1"), ip("192.168.2.1"), PROTOCOL_UDP, 100);
        let result = m.match_packet(&packet, now_secs() - 3700);
        assert_eq!(result, MatchResult { verdict: Verdict::Drop, policy: "test2".into() });
    }

    #[test]
    fn test_default_policy() {
        let m = matcher(reference_rules());
        let udp = Packet::new(ip("192.168.0.1"), ip("192.168.3.1"), PROTOCOL_UDP, 1000);
        assert_eq!(m.match_packet(&udp, 0).policy, "default");

        let tcp = Packet::new(ip("192.168.0.1"), ip("192.168.3.1"), PROTOCOL_TCP, 1000);
        assert_eq!(m.match_packet(&tcp, 0), MatchResult::unmatched());
    }

    #[test]
    fn test_specific_protocol_wins_over_any() {
        for rules in [
            vec![
                RuleDescriptor::new("any", "10.0.0.0/8").protocol("any"),
                RuleDescriptor::new("tcp", "10.0.0.0/8").protocol("tcp"),
            ],
            vec![
                RuleDescriptor::new("tcp", "10.0.0.0/8").protocol("tcp"),
                RuleDescriptor::new("any", "10.0.0.0/8").protocol("any"),
            ],
        ] {
            let m = matcher(rules);
            let tcp = Packet::new(ip("172.16.0.1"), ip("10.0.0.1"), PROTOCOL_TCP, 10);
            let icmp = Packet::new(ip("172.16.0.1"), ip("10.0.0.1"), 1, 10);
            assert_eq!(m.match_packet(&tcp, 0).policy, "tcp");
            assert_eq!(m.match_packet(&icmp, 0).policy, "any");
        }
    }

    #[test]
    fn test_full_tracker_fails_open() {
        let tracker = Arc::new(ConversationTracker::with_segments(8, 3600, 1));
        let m = RuleMatcher::from_rules(
            vec![RuleDescriptor::new("all", "0.0.0.0/0").usage_size("1kb")],
            tracker,
        )
        .unwrap();

        let first = Packet::new(ip("10.0.0.1"), ip("10.0.0.2"), PROTOCOL_TCP, 2000);
        assert_eq!(m.match_packet(&first, 0).verdict, Verdict::Drop);

        let other = Packet::new(ip("10.0.0.1"), ip("10.0.0.3"), PROTOCOL_TCP, 2000);
        assert_eq!(m.match_packet(&other, 0), MatchResult::unmatched());
    }

    #[test]
    fn test_reload_swaps_index() {
        let m = matcher(reference_rules());
        assert_eq!(m.version(), 1);

        let stats = m
            .load_rules(&[RuleDescriptor::new("only", "10.0.0.0/8").protocol("tcp")])
            .unwrap();
        assert_eq!(stats.version, 2);
        assert_eq!(stats.policies, 1);
        assert_eq!(stats.networks, 1);
        assert_eq!(stats.default_policies, 0);
        assert_eq!(m.index().len(), 1);
    }

    #[test]
    fn test_failed_reload_keeps_active_index() {
        let m = matcher(reference_rules());
        let before = m.index();

        let err = m
            .load_rules(&[
                RuleDescriptor::new("a", "10.0.0.0/8").protocol("tcp"),
                RuleDescriptor::new("b", "10.0.0.0/8").protocol("TCP"),
            ])
            .unwrap_err();
        assert!(matches!(err, ConfigError::DuplicatePolicy { .. }));

        assert!(m.load_rules(&[RuleDescriptor::new("c", "10.0.0.0/8").usage_size("5pb")]).is_err());
        assert_eq!(m.version(), 1);
        assert!(Arc::ptr_eq(&before, &m.index()));
    }

    #[test]
    fn test_initial_load_error() {
        let rules = vec![RuleDescriptor::new("bad", "10.0.0.0/8").usage_time("ten minutes")];
        assert!(RuleMatcher::from_rules(rules, tracker()).is_err());
    }

    #[test]
    fn test_check_quota_scopes() {
        let mut record = FlowRecord::new(ip("1.1.1.1"), ip("2.2.2.2"));
        record.tcp.send = 600;
        record.udp.receive = 600;
        record.udp.start_time = 1000;

        let policy = |protocol, data_limit, time_limit| Policy {
            name: "p".into(),
            network: "2.2.2.0/24".parse().unwrap(),
            protocol,
            data_limit,
            time_limit,
        };

        assert_eq!(check_quota(&policy(ProtocolClass::Tcp, 1000, UNBOUNDED), &record, 1000), Verdict::Ok);
        assert_eq!(check_quota(&policy(ProtocolClass::Any, 1000, UNBOUNDED), &record, 1000), Verdict::Drop);
        assert_eq!(check_quota(&policy(ProtocolClass::Udp, UNBOUNDED, 60), &record, 1059), Verdict::Ok);
        assert_eq!(check_quota(&policy(ProtocolClass::Udp, UNBOUNDED, 60), &record, 1060), Verdict::Drop);
        assert_eq!(check_quota(&policy(ProtocolClass::Tcp, UNBOUNDED, 60), &record, 5000), Verdict::Ok);
        assert_eq!(check_quota(&policy(ProtocolClass::Any, 600, UNBOUNDED), &record, 1000), Verdict::Drop);
    }
}
