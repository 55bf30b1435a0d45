//! Shared primitive types: protocol classes, verdicts and the wall clock.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// IANA protocol number for TCP
pub const PROTOCOL_TCP: u8 = 6;
/// IANA protocol number for UDP
pub const PROTOCOL_UDP: u8 = 17;

/// Current Unix time in seconds.
pub fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Resolves the "0 means now" timestamp convention used on the packet path.
#[inline]
pub(crate) fn or_now(timestamp: i64) -> i64 {
    if timestamp == 0 {
        now_secs()
    } else {
        timestamp
    }
}

// ================================================================================================
// PROTOCOL CLASSES
// ================================================================================================

/// Protocol scope a policy applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolClass {
    Tcp,
    Udp,
    Any,
}

impl ProtocolClass {
    /// Maps a rule's protocol name. Only `tcp` and `udp` are specific;
    /// every other name (including the empty string) scopes the rule to any protocol.
    pub fn from_name(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "tcp" => ProtocolClass::Tcp,
            "udp" => ProtocolClass::Udp,
            _ => ProtocolClass::Any,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ProtocolClass::Tcp => "tcp",
            ProtocolClass::Udp => "udp",
            ProtocolClass::Any => "any",
        }
    }

    /// Exact class equality against a packet's protocol number. `Any` never
    /// matches exactly; it is only ever a fallback.
    #[inline]
    pub fn is_exactly(&self, protocol: u8) -> bool {
        match self {
            ProtocolClass::Tcp => protocol == PROTOCOL_TCP,
            ProtocolClass::Udp => protocol == PROTOCOL_UDP,
            ProtocolClass::Any => false,
        }
    }
}

impl fmt::Display for ProtocolClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Counter bucket a packet is accounted into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrafficClass {
    Tcp,
    Udp,
    Other,
}

impl TrafficClass {
    #[inline]
    pub fn from_protocol(protocol: u8) -> Self {
        match protocol {
            PROTOCOL_TCP => TrafficClass::Tcp,
            PROTOCOL_UDP => TrafficClass::Udp,
            _ => TrafficClass::Other,
        }
    }
}

// ================================================================================================
// VERDICT
// ================================================================================================

/// Outcome of evaluating a packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    #[default]
    Ok,
    Drop,
}

impl Verdict {
    pub fn is_drop(&self) -> bool {
        matches!(self, Verdict::Drop)
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::Ok => f.write_str("ok"),
            Verdict::Drop => f.write_str("drop"),
        }
    }
}
