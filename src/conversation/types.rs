//! Conversation records and their per-class counters.

use crate::packet::Packet;
use crate::types::{or_now, now_secs, TrafficClass};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;

/// Direction of a packet relative to the first packet of its conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Send,
    Receive,
}

/// Byte counters and first-seen time for one traffic class.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolCounters {
    pub send: u64,
    pub receive: u64,
    /// Unix seconds of the first packet in this class, 0 if none yet
    pub start_time: i64,
}

impl ProtocolCounters {
    pub fn total_data(&self) -> u64 {
        self.send + self.receive
    }

    /// Seconds since the first packet of this class at `now`; 0 if unseen.
    pub fn duration_at(&self, now: i64) -> i64 {
        if self.start_time == 0 {
            return 0;
        }
        now - self.start_time
    }

    pub fn duration(&self) -> i64 {
        self.duration_at(now_secs())
    }
}

/// Point-in-time copy of a conversation.
///
/// `src_ip`/`dst_ip` are the addresses of the first packet seen and fix what
/// "send" means for the rest of the conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowRecord {
    pub src_ip: IpAddr,
    pub dst_ip: IpAddr,
    pub tcp: ProtocolCounters,
    pub udp: ProtocolCounters,
    pub other: ProtocolCounters,
}

impl FlowRecord {
    pub fn new(src_ip: IpAddr, dst_ip: IpAddr) -> Self {
        Self {
            src_ip,
            dst_ip,
            tcp: ProtocolCounters::default(),
            udp: ProtocolCounters::default(),
            other: ProtocolCounters::default(),
        }
    }

    /// `Send` when the packet heads to the originally recorded destination.
    pub fn direction(&self, packet: &Packet) -> Direction {
        if packet.dst == self.dst_ip {
            Direction::Send
        } else {
            Direction::Receive
        }
    }

    pub fn counters(&self, class: TrafficClass) -> &ProtocolCounters {
        match class {
            TrafficClass::Tcp => &self.tcp,
            TrafficClass::Udp => &self.udp,
            TrafficClass::Other => &self.other,
        }
    }

    fn counters_mut(&mut self, class: TrafficClass) -> &mut ProtocolCounters {
        match class {
            TrafficClass::Tcp => &mut self.tcp,
            TrafficClass::Udp => &mut self.udp,
            TrafficClass::Other => &mut self.other,
        }
    }

    /// Bytes across all three classes.
    pub fn total_data(&self) -> u64 {
        self.tcp.total_data() + self.udp.total_data() + self.other.total_data()
    }

    /// Longest class duration at `now`.
    pub fn duration_at(&self, now: i64) -> i64 {
        self.tcp
            .duration_at(now)
            .max(self.udp.duration_at(now))
            .max(self.other.duration_at(now))
    }

    pub fn duration(&self) -> i64 {
        self.duration_at(now_secs())
    }

    /// Accounts one packet. The class's start time is stamped on its first
    /// packet, with `timestamp` (0 = now).
    pub fn record(&mut self, packet: &Packet, timestamp: i64) {
        let direction = self.direction(packet);
        let counters = self.counters_mut(TrafficClass::from_protocol(packet.protocol));

        if counters.start_time == 0 {
            counters.start_time = or_now(timestamp);
        }

        let size = u64::from(packet.data_size);
        match direction {
            Direction::Send => counters.send += size,
            Direction::Receive => counters.receive += size,
        }
    }
}

/// A live conversation as stored in the flow table.
///
/// Endpoints never change after creation and are read without locking; the
/// counters sit behind a per-conversation mutex.
#[derive(Debug)]
pub struct Conversation {
    src_ip: IpAddr,
    dst_ip: IpAddr,
    record: Mutex<FlowRecord>,
}

impl Conversation {
    pub fn new(src_ip: IpAddr, dst_ip: IpAddr) -> Self {
        Self {
            src_ip,
            dst_ip,
            record: Mutex::new(FlowRecord::new(src_ip, dst_ip)),
        }
    }

    pub fn src_ip(&self) -> IpAddr {
        self.src_ip
    }

    pub fn dst_ip(&self) -> IpAddr {
        self.dst_ip
    }

    /// Records `packet` and returns the updated copy.
    pub fn update(&self, packet: &Packet, timestamp: i64) -> FlowRecord {
        let mut record = self.record.lock();
        record.record(packet, timestamp);
        record.clone()
    }

    pub fn snapshot(&self) -> FlowRecord {
        self.record.lock().clone()
    }
}
