//! Conversation tracker: flow-level semantics over a [`FlowTable`].

use std::sync::Arc;

use log::{info, warn};
use tokio::task::JoinHandle;

use super::eviction::{EvictionConfig, EvictionDriver};
use super::key::{flow_key, same_endpoints};
use super::types::{Conversation, FlowRecord};
use crate::config::Settings;
use crate::flow_table::FlowTable;
use crate::packet::Packet;

/// Segment count used when none is configured.
pub const DEFAULT_SEGMENT_COUNT: usize = 65_536;

pub type ConversationTable = FlowTable<Arc<Conversation>>;

/// Tracks live conversations and their per-class usage.
///
/// # Thread Safety
/// All methods take `&self`. Lookups share the segment lock of their key;
/// creation and eviction take it exclusively. Counter updates lock only the
/// conversation being updated.
#[derive(Debug)]
pub struct ConversationTracker {
    table: Arc<ConversationTable>,
    max_items: usize,
}

impl ConversationTracker {
    /// Creates a tracker with the default segment count.
    pub fn new(inactivity_secs: i64, max_items: usize) -> Self {
        Self::with_segments(DEFAULT_SEGMENT_COUNT, inactivity_secs, max_items)
    }

    pub fn with_segments(segment_count: usize, inactivity_secs: i64, max_items: usize) -> Self {
        let table = Arc::new(FlowTable::new(segment_count, inactivity_secs));
        info!(
            "Conversation tracker ready: {} segments, {} max conversations, {}s inactivity timeout",
            table.segment_count(),
            max_items,
            inactivity_secs
        );
        Self { table, max_items }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::with_segments(
            settings.segment_count,
            i64::from(settings.max_inactive_conversation_life_time),
            settings.max_conversation as usize,
        )
    }

    // ============================================================================================
    // ACCESSORS
    // ============================================================================================

    pub fn table(&self) -> &Arc<ConversationTable> {
        &self.table
    }

    pub fn max_items(&self) -> usize {
        self.max_items
    }

    /// Number of tracked conversations.
    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    // ============================================================================================
    // PACKET PATH
    // ============================================================================================

    /// Accounts `packet` to its conversation and returns a copy of the
    /// updated record, creating the conversation on its first packet.
    ///
    /// `timestamp` (Unix seconds, 0 = now) stamps the start of a traffic class
    /// the first time it is seen. Returns `None` when the conversation is new
    /// and the table is full; nothing is evicted to make room.
    pub fn get_status(&self, packet: &Packet, timestamp: i64) -> Option<FlowRecord> {
        let key = flow_key(&packet.src, &packet.dst);
        let is_same_flow = |conv: &Arc<Conversation>| {
            same_endpoints(&conv.src_ip(), &conv.dst_ip(), &packet.src, &packet.dst)
        };

        let conversation = match self.table.find_or_try_add(
            key,
            is_same_flow,
            || Arc::new(Conversation::new(packet.src, packet.dst)),
            self.max_items,
        ) {
            Ok((conversation, _)) => conversation,
            Err(e) => {
                warn!("Conversation {} -> {} not tracked: {}", packet.src, packet.dst, e);
                return None;
            }
        };

        Some(conversation.update(packet, timestamp))
    }

    // ============================================================================================
    // MAINTENANCE
    // ============================================================================================

    /// Sweeps one segment for conversations idle at `now`.
    pub fn check_for_remove(&self, now: i64) -> usize {
        self.table.check_for_timeout(now)
    }

    /// Builds the eviction driver for this tracker's table.
    pub fn eviction_driver(&self, config: EvictionConfig) -> Arc<EvictionDriver<Arc<Conversation>>> {
        Arc::new(EvictionDriver::new(&self.table, config))
    }

    /// Spawns the eviction driver on the current tokio runtime. The task ends
    /// once the tracker (and with it the table) is dropped.
    pub fn spawn_eviction(&self, config: EvictionConfig) -> JoinHandle<()> {
        tokio::spawn(self.eviction_driver(config).start())
    }

    // ============================================================================================
    // INTROSPECTION
    // ============================================================================================

    /// Copies of all current conversations. Weakly consistent: segments are
    /// visited one at a time while traffic continues.
    pub fn dump(&self) -> Vec<FlowRecord> {
        let mut out = Vec::with_capacity(self.table.len());
        self.table.iterate(|conversation| {
            out.push(conversation.snapshot());
            true
        });
        out
    }

    /// [`dump`](Self::dump) as a JSON array.
    pub fn dump_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(&self.dump())
    }
}
