//! End-to-end matching scenarios through the enforcer.

use flowquota::types::{PROTOCOL_TCP, PROTOCOL_UDP};
use flowquota::{
    ConversationTracker, Enforcer, MatchResult, Packet, RuleDescriptor, RuleMatcher, Verdict,
};
use std::sync::Arc;
use std::thread;

fn packet(src: &str, dst: &str, protocol: u8, size: u16) -> Packet {
    Packet::new(src.parse().unwrap(), dst.parse().unwrap(), protocol, size)
}

fn enforcer(rules: Vec<RuleDescriptor>) -> Enforcer {
    let tracker = Arc::new(ConversationTracker::with_segments(256, 3600, 10_000));
    Enforcer::new(Arc::new(RuleMatcher::from_rules(rules, tracker).unwrap()))
}

fn matched(verdict: Verdict, policy: &str) -> MatchResult {
    MatchResult {
        verdict,
        policy: policy.to_string(),
    }
}

// ============================================================================
// QUOTAS
// ============================================================================

#[test]
fn test_data_quota_counts_both_directions() {
    let enforcer = enforcer(vec![
        RuleDescriptor::new("test1", "192.168.1.0/24").usage_size("2kb").protocol("any"),
    ]);
    let out = packet("192.168.0.1", "192.168.1.2", PROTOCOL_TCP, 1000);

    assert_eq!(enforcer.process(&out), matched(Verdict::Ok, "test1"));
    assert_eq!(enforcer.process(&out.reversed()), matched(Verdict::Ok, "test1"));
    assert_eq!(enforcer.process(&out), matched(Verdict::Drop, "test1"));
    assert_eq!(enforcer.stats().blocked, 1);
}

#[test]
fn test_any_policy_sums_all_transports() {
    let enforcer = enforcer(vec![
        RuleDescriptor::new("mixed", "10.0.0.0/8").usage_size("1kb"),
    ]);

    assert_eq!(enforcer.process(&packet("1.1.1.1", "10.0.0.1", PROTOCOL_TCP, 600)).verdict, Verdict::Ok);
    assert_eq!(enforcer.process(&packet("1.1.1.1", "10.0.0.1", PROTOCOL_UDP, 600)).verdict, Verdict::Drop);
}

#[test]
fn test_protocol_policy_counts_only_its_transport() {
    let enforcer = enforcer(vec![
        RuleDescriptor::new("tcp-cap", "10.0.0.0/8").usage_size("1kb").protocol("tcp"),
        RuleDescriptor::new("rest", "10.0.0.0/8").protocol("any"),
    ]);

    for _ in 0..5 {
        let udp = enforcer.process(&packet("1.1.1.1", "10.0.0.1", PROTOCOL_UDP, 1000));
        assert_eq!(udp, matched(Verdict::Ok, "rest"));
    }
    // UDP bytes do not count against the TCP policy
    let tcp = enforcer.process(&packet("1.1.1.1", "10.0.0.1", PROTOCOL_TCP, 500));
    assert_eq!(tcp, matched(Verdict::Ok, "tcp-cap"));
    let tcp = enforcer.process(&packet("1.1.1.1", "10.0.0.1", PROTOCOL_TCP, 600));
    assert_eq!(tcp, matched(Verdict::Drop, "tcp-cap"));
}

#[test]
fn test_duration_quota() {
    let enforcer = enforcer(vec![
        RuleDescriptor::new("test2", "192.168.2.0/24").usage_time("1h").protocol("udp"),
    ]);
    let stale = flowquota::now_secs() - 3700;

    let result = enforcer.process_at(&packet("192.168.0.1", "192.168.2.1", PROTOCOL_UDP, 10), stale);
    assert_eq!(result, matched(Verdict::Drop, "test2"));

    let fresh = enforcer.process(&packet("192.168.0.2", "192.168.2.1", PROTOCOL_UDP, 10));
    assert_eq!(fresh, matched(Verdict::Ok, "test2"));
}

// ============================================================================
// LOOKUP
// ============================================================================

#[test]
fn test_longest_prefix_wins() {
    let enforcer = enforcer(vec![
        RuleDescriptor::new("wide", "192.168.0.0/16"),
        RuleDescriptor::new("narrow", "192.168.1.0/24"),
        RuleDescriptor::new("host", "192.168.1.7"),
    ]);

    assert_eq!(enforcer.process(&packet("1.1.1.1", "192.168.1.7", PROTOCOL_TCP, 1)).policy, "host");
    assert_eq!(enforcer.process(&packet("1.1.1.1", "192.168.1.8", PROTOCOL_TCP, 1)).policy, "narrow");
    assert_eq!(enforcer.process(&packet("1.1.1.1", "192.168.9.9", PROTOCOL_TCP, 1)).policy, "wide");
    assert_eq!(enforcer.process(&packet("1.1.1.1", "172.16.0.1", PROTOCOL_TCP, 1)).policy, "");
}

#[test]
fn test_default_list_only_without_network_match() {
    let enforcer = enforcer(vec![
        RuleDescriptor::new("test2", "192.168.2.0/24").usage_time("1h").protocol("udp"),
        RuleDescriptor::new("default", "0.0.0.0/0").usage_size("256mb").protocol("udp"),
    ]);

    let elsewhere = enforcer.process(&packet("192.168.0.1", "192.168.3.1", PROTOCOL_UDP, 100));
    assert_eq!(elsewhere, matched(Verdict::Ok, "default"));

    // the /24 matches, carries nothing for TCP, and the default is not consulted
    let tcp = enforcer.process(&packet("192.168.0.1", "192.168.2.1", PROTOCOL_TCP, 100));
    assert_eq!(tcp, MatchResult::default());
}

#[test]
fn test_ipv6_policies() {
    let enforcer = enforcer(vec![
        RuleDescriptor::new("v6-net", "2001:db8::/32").usage_size("1kb"),
        RuleDescriptor::new("v6-default", "::/0").protocol("udp"),
    ]);

    let out = packet("fd00::1", "2001:db8::10", PROTOCOL_TCP, 800);
    assert_eq!(enforcer.process(&out), matched(Verdict::Ok, "v6-net"));
    assert_eq!(enforcer.process(&out.reversed()), matched(Verdict::Drop, "v6-net"));

    let other = enforcer.process(&packet("fd00::1", "2001:db9::1", PROTOCOL_UDP, 10));
    assert_eq!(other.policy, "v6-default");
}

// ============================================================================
// CONCURRENCY
// ============================================================================

#[test]
fn test_reload_during_traffic() {
    let tracker = Arc::new(ConversationTracker::with_segments(64, 3600, 10_000));
    let rules_a = vec![RuleDescriptor::new("a", "10.0.0.0/8")];
    let rules_b = vec![RuleDescriptor::new("b", "10.0.0.0/8")];
    let matcher = Arc::new(RuleMatcher::from_rules(rules_a.clone(), tracker).unwrap());

    let mut handles = vec![];
    for t in 0..4u8 {
        let matcher = Arc::clone(&matcher);
        handles.push(thread::spawn(move || {
            for i in 0..500u16 {
                let src = format!("172.16.{}.{}", t, i % 250);
                let result = matcher.match_packet(&packet(&src, "10.0.0.1", PROTOCOL_TCP, 10), 0);
                assert!(
                    result.policy == "a" || result.policy == "b",
                    "saw a partial index: {:?}",
                    result
                );
            }
        }));
    }

    for i in 0..50 {
        let rules = if i % 2 == 0 { &rules_b } else { &rules_a };
        matcher.load_rules(rules).unwrap();
    }
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(matcher.version(), 51);
    assert_eq!(matcher.tracker().len(), 4 * 250);
}
