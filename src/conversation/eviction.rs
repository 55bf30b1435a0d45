//! Background eviction of idle conversations.
//!
//! The flow table only ever sweeps one segment per call. This driver is the
//! one long-lived task that keeps the sweep cursor moving: it wakes on a fixed
//! interval and sweeps enough segments per tick that a full pass over the
//! table completes within one inactivity period.
//!
//! The driver holds only a weak reference to the table and stops on the first
//! tick after the table is dropped.

use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::time::interval;

use crate::flow_table::FlowTable;
use crate::types::now_secs;
use log::{debug, info};

/// Configuration for the eviction driver.
#[derive(Debug, Clone)]
pub struct EvictionConfig {
    /// Time between wake-ups
    pub interval: Duration,
    /// Whether the driver runs at all
    pub enabled: bool,
}

impl Default for EvictionConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(100),
            enabled: true,
        }
    }
}

/// Segments to sweep per tick so that `segments` are all visited within
/// `inactivity_secs`. Never less than one.
pub fn sweeps_per_tick(segments: usize, tick: Duration, inactivity_secs: i64) -> usize {
    if inactivity_secs <= 0 {
        return segments.max(1);
    }
    let window_ms = inactivity_secs as u128 * 1000;
    let per_tick = (segments as u128 * tick.as_millis()).div_ceil(window_ms);
    (per_tick as usize).clamp(1, segments.max(1))
}

/// Periodic sweeper for one flow table.
pub struct EvictionDriver<V> {
    table: Weak<FlowTable<V>>,
    config: EvictionConfig,
    sweeps_per_tick: usize,
    /// Unix seconds of the last completed tick
    last_sweep_at: RwLock<i64>,
    total_evicted: AtomicU64,
}

impl<V> EvictionDriver<V>
where
    V: Send + Sync + 'static,
{
    pub fn new(table: &Arc<FlowTable<V>>, config: EvictionConfig) -> Self {
        let sweeps_per_tick = sweeps_per_tick(
            table.segment_count(),
            config.interval,
            table.inactivity_timeout(),
        );

        Self {
            table: Arc::downgrade(table),
            config,
            sweeps_per_tick,
            last_sweep_at: RwLock::new(0),
            total_evicted: AtomicU64::new(0),
        }
    }

    pub fn sweeps_per_tick(&self) -> usize {
        self.sweeps_per_tick
    }

    pub fn last_sweep(&self) -> i64 {
        *self.last_sweep_at.read()
    }

    pub fn total_evicted(&self) -> u64 {
        self.total_evicted.load(Ordering::Relaxed)
    }

    /// Runs until the table is dropped. Spawn it as a tokio task.
    ///
    /// Returns immediately when the driver is disabled.
    pub async fn start(self: Arc<Self>) {
        if !self.config.enabled {
            info!("Conversation eviction is disabled, skipping");
            return;
        }

        info!(
            "Starting conversation eviction every {}ms, {} segment(s) per tick",
            self.config.interval.as_millis(),
            self.sweeps_per_tick
        );

        let mut ticker = interval(self.config.interval);
        loop {
            ticker.tick().await;
            if !self.tick(now_secs()) {
                info!("Flow table dropped, eviction driver exiting");
                return;
            }
        }
    }

    /// One tick: sweeps `sweeps_per_tick` segments at `now`.
    ///
    /// Returns `false` once the table is gone.
    pub fn tick(&self, now: i64) -> bool {
        let Some(table) = self.table.upgrade() else {
            return false;
        };

        let evicted: usize = (0..self.sweeps_per_tick)
            .map(|_| table.check_for_timeout(now))
            .sum();

        if evicted > 0 {
            debug!("Evicted {} idle conversation(s), {} remain", evicted, table.len());
            self.total_evicted.fetch_add(evicted as u64, Ordering::Relaxed);
        }
        *self.last_sweep_at.write() = now;
        true
    }
}
