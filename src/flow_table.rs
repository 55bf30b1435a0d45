//! Segmented hash table with idle-time eviction.
//!
//! The table is a fixed array of segments selected by `key % segments`. Each
//! segment owns an unordered chain of nodes behind its own reader/writer lock,
//! so operations on different segments never contend.
//!
//! # Storage
//! A segment's chain lives in a small arena: nodes sit in a `Vec`, link to each
//! other by index, and freed slots are recycled through a free list. A segment
//! whose chain empties releases its arena.
//!
//! # Eviction
//! `check_for_timeout` sweeps exactly one segment per call, chosen by a shared
//! round-robin cursor. A full pass over the table takes `segment_count()` calls;
//! the driver in [`crate::conversation::eviction`] paces those calls.
//!
//! # Size accounting
//! The item counter is a lone atomic read without any segment lock. Capacity
//! reservations count an entry shortly before it is linked, so `len()` may run
//! ahead of the chains while creators race; it converges once the table is quiet.

use crate::error::CapacityError;
use crate::types::now_secs;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};

// ================================================================================================
// SEGMENT ARENA
// ================================================================================================

struct Node<V> {
    key: u64,
    data: V,
    /// Unix seconds of the last successful find; refreshed under the shared lock
    last_access: AtomicI64,
    next: Option<u32>,
}

struct Segment<V> {
    slots: Vec<Option<Node<V>>>,
    free: Vec<u32>,
    head: Option<u32>,
}

impl<V> Segment<V> {
    const fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            head: None,
        }
    }

    #[inline]
    fn node(&self, idx: u32) -> Option<&Node<V>> {
        self.slots.get(idx as usize).and_then(Option::as_ref)
    }

    #[inline]
    fn node_mut(&mut self, idx: u32) -> Option<&mut Node<V>> {
        self.slots.get_mut(idx as usize).and_then(Option::as_mut)
    }

    fn push_front(&mut self, key: u64, data: V, now: i64) {
        let node = Node {
            key,
            data,
            last_access: AtomicI64::new(now),
            next: self.head,
        };

        let idx = match self.free.pop() {
            Some(idx) => {
                self.slots[idx as usize] = Some(node);
                idx
            }
            None => {
                self.slots.push(Some(node));
                (self.slots.len() - 1) as u32
            }
        };
        self.head = Some(idx);
    }

    /// First node carrying `key` that passes `pred`, with its predecessor.
    fn locate<F>(&self, key: u64, pred: F) -> Option<(Option<u32>, u32)>
    where
        F: Fn(&V) -> bool,
    {
        let mut prev = None;
        let mut cursor = self.head;
        while let Some(idx) = cursor {
            let node = self.node(idx)?;
            if node.key == key && pred(&node.data) {
                return Some((prev, idx));
            }
            prev = Some(idx);
            cursor = node.next;
        }
        None
    }

    fn unlink(&mut self, prev: Option<u32>, idx: u32) -> Option<V> {
        let node = self.slots.get_mut(idx as usize)?.take()?;
        match prev.and_then(|p| self.node_mut(p)) {
            Some(prev_node) => prev_node.next = node.next,
            None => self.head = node.next,
        }
        self.free.push(idx);

        if self.head.is_none() {
            self.slots = Vec::new();
            self.free = Vec::new();
        }
        Some(node.data)
    }

    fn len(&self) -> usize {
        self.slots.len() - self.free.len()
    }
}

// ================================================================================================
// FLOW TABLE
// ================================================================================================

/// Sharded table of `V` keyed by a 64-bit flow key.
///
/// Keys are not unique: [`add`](Self::add) never checks for an existing entry,
/// and lookups take a predicate to tell colliding entries apart.
pub struct FlowTable<V> {
    segments: Box<[RwLock<Segment<V>>]>,
    item_count: AtomicUsize,
    /// Next segment to sweep
    cursor: AtomicUsize,
    /// Idle seconds after which an entry is evicted
    inactivity_secs: i64,
    clock: fn() -> i64,
}

impl<V> FlowTable<V> {
    /// Creates a table with `segment_count` segments (at least one) evicting
    /// entries idle for more than `inactivity_secs`.
    pub fn new(segment_count: usize, inactivity_secs: i64) -> Self {
        Self::with_clock(segment_count, inactivity_secs, now_secs)
    }

    /// Same as [`new`](Self::new) with an explicit clock for access stamps.
    pub fn with_clock(segment_count: usize, inactivity_secs: i64, clock: fn() -> i64) -> Self {
        let segments = (0..segment_count.max(1))
            .map(|_| RwLock::new(Segment::new()))
            .collect::<Vec<_>>()
            .into_boxed_slice();

        Self {
            segments,
            item_count: AtomicUsize::new(0),
            cursor: AtomicUsize::new(0),
            inactivity_secs,
            clock,
        }
    }

    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    pub fn inactivity_timeout(&self) -> i64 {
        self.inactivity_secs
    }

    /// Number of live entries, as tracked by the lock-free counter.
    pub fn len(&self) -> usize {
        self.item_count.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    fn segment(&self, key: u64) -> &RwLock<Segment<V>> {
        &self.segments[(key % self.segments.len() as u64) as usize]
    }

    // ============================================================================================
    // MUTATION
    // ============================================================================================

    /// Prepends an entry to its segment. O(1); duplicates are the caller's concern.
    pub fn add(&self, key: u64, data: V) {
        let now = (self.clock)();
        let mut segment = self.segment(key).write();
        segment.push_front(key, data, now);
        // counted before the lock drops so a concurrent sweep never underflows
        self.item_count.fetch_add(1, Ordering::AcqRel);
    }

    /// Removes the first entry for `key`.
    pub fn remove(&self, key: u64) -> Option<V> {
        self.remove_by(key, |_| true)
    }

    /// Removes the first entry for `key` accepted by `pred`.
    pub fn remove_by<F>(&self, key: u64, pred: F) -> Option<V>
    where
        F: Fn(&V) -> bool,
    {
        let mut segment = self.segment(key).write();
        let (prev, idx) = segment.locate(key, pred)?;
        let data = segment.unlink(prev, idx);
        if data.is_some() {
            self.item_count.fetch_sub(1, Ordering::AcqRel);
        }
        data
    }

    /// Drops every entry and rewinds the sweep cursor.
    pub fn clear(&self) {
        for segment in self.segments.iter() {
            let mut guard = segment.write();
            let removed = guard.len();
            *guard = Segment::new();
            self.item_count.fetch_sub(removed, Ordering::AcqRel);
        }
        self.cursor.store(0, Ordering::Release);
    }

    // ============================================================================================
    // LOOKUP
    // ============================================================================================

    /// Runs `f` on the first entry for `key` accepted by `pred`, under the
    /// segment's shared lock. A hit refreshes the entry's access time.
    pub fn find_with<P, F, R>(&self, key: u64, pred: P, f: F) -> Option<R>
    where
        P: Fn(&V) -> bool,
        F: FnOnce(&V) -> R,
    {
        let segment = self.segment(key).read();
        let (_, idx) = segment.locate(key, pred)?;
        let node = segment.node(idx)?;
        node.last_access.store((self.clock)(), Ordering::Relaxed);
        Some(f(&node.data))
    }

    /// Clone of the first entry for `key` accepted by `pred`.
    pub fn find_by<P>(&self, key: u64, pred: P) -> Option<V>
    where
        P: Fn(&V) -> bool,
        V: Clone,
    {
        self.find_with(key, pred, V::clone)
    }

    /// Clone of the first entry for `key`.
    pub fn find(&self, key: u64) -> Option<V>
    where
        V: Clone,
    {
        self.find_by(key, |_| true)
    }

    /// Get-or-create for a single key.
    ///
    /// Returns the existing entry accepted by `pred`, or inserts `make()` when
    /// the table holds fewer than `limit` entries. Capacity is reserved on the
    /// counter before the segment is locked, so concurrent creators can never
    /// push occupancy past `limit`, and the chain is rescanned under the
    /// exclusive lock so racing creators of one flow produce a single entry.
    ///
    /// The boolean is `true` when the entry was created by this call.
    pub fn find_or_try_add<P, M>(
        &self,
        key: u64,
        pred: P,
        make: M,
        limit: usize,
    ) -> Result<(V, bool), CapacityError>
    where
        P: Fn(&V) -> bool,
        M: FnOnce() -> V,
        V: Clone,
    {
        if let Some(found) = self.find_by(key, &pred) {
            return Ok((found, false));
        }

        self.item_count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| {
                (count < limit).then_some(count + 1)
            })
            .map_err(|_| CapacityError { limit })?;

        let now = (self.clock)();
        let mut segment = self.segment(key).write();
        let existing = segment
            .locate(key, &pred)
            .and_then(|(_, idx)| segment.node(idx))
            .map(|node| {
                node.last_access.store(now, Ordering::Relaxed);
                node.data.clone()
            });
        if let Some(data) = existing {
            drop(segment);
            self.item_count.fetch_sub(1, Ordering::AcqRel);
            return Ok((data, false));
        }

        let data = make();
        segment.push_front(key, data.clone(), now);
        Ok((data, true))
    }

    // ============================================================================================
    // EVICTION
    // ============================================================================================

    /// Sweeps the next segment, evicting entries idle for longer than the
    /// inactivity threshold. Returns the number evicted.
    pub fn check_for_timeout(&self, now: i64) -> usize {
        self.check_for_timeout_with(now, |_, _| true)
    }

    /// Sweeps the next segment. For every idle entry `should_evict(data, idle_secs)`
    /// decides its fate: `true` evicts it, `false` keeps it and restarts its idle clock.
    pub fn check_for_timeout_with<F>(&self, now: i64, mut should_evict: F) -> usize
    where
        F: FnMut(&V, i64) -> bool,
    {
        let index = self.cursor.fetch_add(1, Ordering::AcqRel) % self.segments.len();
        let mut segment = self.segments[index].write();

        let mut evicted = 0;
        let mut prev = None;
        let mut cursor = segment.head;
        while let Some(idx) = cursor {
            let (next, idle, expired) = match segment.node(idx) {
                Some(node) => {
                    let idle = now - node.last_access.load(Ordering::Relaxed);
                    (node.next, idle, idle > self.inactivity_secs)
                }
                None => break,
            };

            let evict = expired
                && match segment.node(idx) {
                    Some(node) => should_evict(&node.data, idle),
                    None => false,
                };

            if evict {
                if segment.unlink(prev, idx).is_some() {
                    self.item_count.fetch_sub(1, Ordering::AcqRel);
                    evicted += 1;
                }
            } else {
                if expired {
                    if let Some(node) = segment.node(idx) {
                        node.last_access.store(now, Ordering::Relaxed);
                    }
                }
                prev = Some(idx);
            }
            cursor = next;
        }

        evicted
    }

    // ============================================================================================
    // ITERATION
    // ============================================================================================

    /// Visits entries segment by segment, each under its own shared lock.
    ///
    /// No global snapshot is taken: changes to segments not yet visited are
    /// observable. `f` returns `false` to stop early. Returns the number of
    /// entries visited.
    pub fn iterate<F>(&self, mut f: F) -> usize
    where
        F: FnMut(&V) -> bool,
    {
        let mut visited = 0;
        for segment in self.segments.iter() {
            let guard = segment.read();
            let mut cursor = guard.head;
            while let Some(idx) = cursor {
                let Some(node) = guard.node(idx) else { break };
                visited += 1;
                if !f(&node.data) {
                    return visited;
                }
                cursor = node.next;
            }
        }
        visited
    }
}

impl<V> std::fmt::Debug for FlowTable<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlowTable")
            .field("segments", &self.segments.len())
            .field("items", &self.len())
            .field("inactivity_secs", &self.inactivity_secs)
            .finish()
    }
}
