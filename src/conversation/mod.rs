//! Conversation tracking.
//!
//! A conversation is all traffic between two endpoints, whatever the transport
//! and whichever side sends. Each packet is folded into a direction-agnostic
//! key, accounted into its conversation's TCP/UDP/other counters, and a copy
//! of the record is handed back to the caller.

pub mod eviction;
pub mod key;
pub mod tracker;
pub mod types;

pub use eviction::{EvictionConfig, EvictionDriver};
pub use key::{flow_key, FlowKey};
pub use tracker::{ConversationTable, ConversationTracker, DEFAULT_SEGMENT_COUNT};
pub use types::{Conversation, Direction, FlowRecord, ProtocolCounters};
