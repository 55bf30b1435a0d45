//! # Flow Quota
//!
//! Per-conversation traffic quota enforcement for a software firewall.
//!
//! Packets are folded into conversations (all traffic between two endpoints),
//! whose TCP/UDP/other usage is tracked in a segmented, time-evicted flow
//! table. The conversation's remote address is looked up in a longest-prefix
//! policy index and the winning policy's data and duration quotas decide
//! between passing and dropping the packet.
//!
//! ```text
//! Packet ─► ConversationTracker ─► FlowRecord ─► RuleMatcher ─► Verdict
//!             (FlowTable)                        (PolicyIndex / PrefixTrie)
//! ```

pub mod config;
pub mod conversation;
pub mod enforcer;
pub mod error;
pub mod flow_table;
pub mod matcher;
pub mod packet;
pub mod rules;
pub mod trie;
pub mod types;

pub use config::Settings;
pub use conversation::{ConversationTracker, EvictionConfig, EvictionDriver, FlowRecord};
pub use enforcer::{Enforcer, ProviderStats};
pub use error::{CapacityError, ConfigError, ConfigResult};
pub use flow_table::FlowTable;
pub use matcher::{MatchResult, Policy, PolicyIndex, ReloadStats, RuleMatcher};
pub use packet::{IpVersion, Packet};
pub use rules::{JsonRuleFile, RuleDescriptor, RuleSource, StaticRules};
pub use trie::PrefixTrie;
pub use types::{now_secs, ProtocolClass, Verdict};
