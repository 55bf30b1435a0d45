//! # Enforcer
//!
//! Front door of the packet path: hands each packet to the matcher and keeps
//! the provider counters exposed to introspection.

use log::trace;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::matcher::{MatchResult, RuleMatcher};
use crate::packet::{self, Packet};
use crate::types::Verdict;

/// Packet counters of the enforcement provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderStats {
    pub total_packets: u64,
    pub blocked: u64,
}

impl ProviderStats {
    pub fn block_rate(&self) -> f64 {
        if self.total_packets == 0 {
            0.0
        } else {
            self.blocked as f64 / self.total_packets as f64
        }
    }
}

/// Thread-safe packet enforcer.
#[derive(Debug)]
pub struct Enforcer {
    matcher: Arc<RuleMatcher>,

    /// Packets evaluated
    total_packets: AtomicU64,

    /// Packets that got a drop verdict
    blocked: AtomicU64,
}

impl Enforcer {
    pub fn new(matcher: Arc<RuleMatcher>) -> Self {
        Self {
            matcher,
            total_packets: AtomicU64::new(0),
            blocked: AtomicU64::new(0),
        }
    }

    /// Evaluates `packet` at the current time.
    pub fn process(&self, packet: &Packet) -> MatchResult {
        self.process_at(packet, 0)
    }

    /// Evaluates `packet` with an explicit Unix-seconds timestamp (0 = now).
    pub fn process_at(&self, packet: &Packet, timestamp: i64) -> MatchResult {
        self.total_packets.fetch_add(1, Ordering::Relaxed);

        let result = self.matcher.match_packet(packet, timestamp);
        if result.verdict == Verdict::Drop {
            self.blocked.fetch_add(1, Ordering::Relaxed);
            trace!(
                "Dropped {} -> {} (proto {}, policy '{}')",
                packet.src,
                packet.dst,
                packet.protocol,
                result.policy
            );
        }
        result
    }

    /// Decodes and evaluates a raw IP datagram. Undecodable input passes
    /// uncounted.
    pub fn process_raw(&self, datagram: &[u8]) -> MatchResult {
        match packet::decode(datagram) {
            Some(packet) => self.process(&packet),
            None => MatchResult::default(),
        }
    }

    pub fn stats(&self) -> ProviderStats {
        ProviderStats {
            total_packets: self.total_packets.load(Ordering::Relaxed),
            blocked: self.blocked.load(Ordering::Relaxed),
        }
    }

    pub fn matcher(&self) -> &Arc<RuleMatcher> {
        &self.matcher
    }

    /// Provider counters as JSON.
    pub fn stats_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(&self.stats())
    }
}
