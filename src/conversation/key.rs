//! Direction-agnostic flow keys.
//!
//! Each endpoint address is folded to 64 bits (IPv4: the octets read as a
//! little-endian `u32`; IPv6: the XOR of the two little-endian `u64` halves)
//! and the two are XOR-ed together. The key ignores protocol and ports, so a
//! flow and its replies, on any transport, share one key.

use std::net::IpAddr;

pub type FlowKey = u64;

#[inline]
fn fold(ip: &IpAddr) -> u64 {
    match ip {
        IpAddr::V4(v4) => u32::from_le_bytes(v4.octets()) as u64,
        IpAddr::V6(v6) => {
            let octets = v6.octets();
            let mut high = [0u8; 8];
            let mut low = [0u8; 8];
            high.copy_from_slice(&octets[..8]);
            low.copy_from_slice(&octets[8..]);
            u64::from_le_bytes(high) ^ u64::from_le_bytes(low)
        }
    }
}

/// Key shared by `src → dst` and `dst → src`.
#[inline]
pub fn flow_key(src: &IpAddr, dst: &IpAddr) -> FlowKey {
    fold(src) ^ fold(dst)
}

/// Whether `(a_src, a_dst)` and `(b_src, b_dst)` name the same pair of
/// endpoints in either direction.
#[inline]
pub fn same_endpoints(a_src: &IpAddr, a_dst: &IpAddr, b_src: &IpAddr, b_dst: &IpAddr) -> bool {
    (a_src == b_src && a_dst == b_dst) || (a_src == b_dst && a_dst == b_src)
}
