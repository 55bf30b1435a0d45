//! Binary prefix trie for longest-prefix-match lookups.
//!
//! One trie covers one address family: 32 bits for IPv4, 128 for IPv6. Bits
//! are consumed from the most significant end. Nodes live in a single arena
//! and refer to their children by index, so [`PrefixTrie::flush`] is a
//! truncate rather than a tree walk.
//!
//! The trie has no locking of its own; its owner serializes access.

use crate::error::{ConfigError, ConfigResult};
use crate::packet::IpVersion;
use ipnet::IpNet;
use std::net::IpAddr;

const ROOT: u32 = 0;

#[derive(Debug, Clone)]
struct TrieNode<V> {
    children: [Option<u32>; 2],
    value: Option<V>,
}

impl<V> TrieNode<V> {
    const fn empty() -> Self {
        Self {
            children: [None, None],
            value: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PrefixTrie<V> {
    nodes: Vec<TrieNode<V>>,
    version: IpVersion,
    values: usize,
}

impl<V> PrefixTrie<V> {
    pub fn new(version: IpVersion) -> Self {
        Self {
            nodes: vec![TrieNode::empty()],
            version,
            values: 0,
        }
    }

    pub fn v4() -> Self {
        Self::new(IpVersion::V4)
    }

    pub fn v6() -> Self {
        Self::new(IpVersion::V6)
    }

    /// Address width in bits.
    pub fn width(&self) -> u8 {
        match self.version {
            IpVersion::V4 => 32,
            IpVersion::V6 => 128,
        }
    }

    pub fn ip_version(&self) -> IpVersion {
        self.version
    }

    /// Number of stored values.
    pub fn len(&self) -> usize {
        self.values
    }

    pub fn is_empty(&self) -> bool {
        self.values == 0
    }

    /// Address as an integer of `width()` bits. IPv4-mapped IPv6 addresses
    /// are accepted by a v4 trie, and IPv4 addresses by a v6 trie as mapped.
    fn address_bits(&self, ip: IpAddr) -> Option<u128> {
        match (self.version, ip) {
            (IpVersion::V4, IpAddr::V4(v4)) => Some(u32::from(v4) as u128),
            (IpVersion::V4, IpAddr::V6(v6)) => v6.to_ipv4_mapped().map(|v4| u32::from(v4) as u128),
            (IpVersion::V6, IpAddr::V6(v6)) => Some(u128::from(v6)),
            (IpVersion::V6, IpAddr::V4(v4)) => Some(u128::from(v4.to_ipv6_mapped())),
        }
    }

    #[inline]
    fn bit(&self, bits: u128, index: u8) -> usize {
        ((bits >> (self.width() - 1 - index)) & 1) as usize
    }

    /// Node reached by walking exactly `prefix_len` bits, if the path exists.
    fn walk_exact(&self, ip: IpAddr, prefix_len: u8) -> Option<u32> {
        if prefix_len > self.width() {
            return None;
        }
        let bits = self.address_bits(ip)?;
        let mut current = ROOT;
        for i in 0..prefix_len {
            current = self.nodes[current as usize].children[self.bit(bits, i)]?;
        }
        Some(current)
    }

    // ============================================================================================
    // OPERATIONS
    // ============================================================================================

    /// Stores `value` at the node for `ip/prefix_len`, creating the path on demand.
    ///
    /// Returns `false` (and drops `value`) when the address does not belong to
    /// this trie's family or the prefix is longer than the address width.
    pub fn insert(&mut self, ip: IpAddr, prefix_len: u8, value: V) -> bool {
        if prefix_len > self.width() {
            return false;
        }
        let Some(bits) = self.address_bits(ip) else {
            return false;
        };

        let mut current = ROOT;
        for i in 0..prefix_len {
            let bit = self.bit(bits, i);
            current = match self.nodes[current as usize].children[bit] {
                Some(child) => child,
                None => {
                    let child = self.nodes.len() as u32;
                    self.nodes.push(TrieNode::empty());
                    self.nodes[current as usize].children[bit] = Some(child);
                    child
                }
            };
        }

        if self.nodes[current as usize].value.replace(value).is_none() {
            self.values += 1;
        }
        true
    }

    /// Longest-prefix match: the value at the deepest valued node on `ip`'s path.
    pub fn search(&self, ip: IpAddr) -> Option<&V> {
        let bits = self.address_bits(ip)?;
        let mut current = ROOT;
        let mut best = self.nodes[ROOT as usize].value.as_ref();

        for i in 0..self.width() {
            match self.nodes[current as usize].children[self.bit(bits, i)] {
                Some(child) => {
                    current = child;
                    if let Some(value) = self.nodes[current as usize].value.as_ref() {
                        best = Some(value);
                    }
                }
                None => break,
            }
        }
        best
    }

    /// Value stored at exactly `ip/prefix_len`. Shorter covering prefixes do not count.
    pub fn search_exact(&self, ip: IpAddr, prefix_len: u8) -> Option<&V> {
        let node = self.walk_exact(ip, prefix_len)?;
        self.nodes[node as usize].value.as_ref()
    }

    pub fn search_exact_mut(&mut self, ip: IpAddr, prefix_len: u8) -> Option<&mut V> {
        let node = self.walk_exact(ip, prefix_len)?;
        self.nodes[node as usize].value.as_mut()
    }

    /// Clears the value at exactly `ip/prefix_len`. The path stays in place.
    pub fn remove(&mut self, ip: IpAddr, prefix_len: u8) -> Option<V> {
        let node = self.walk_exact(ip, prefix_len)?;
        let value = self.nodes[node as usize].value.take();
        if value.is_some() {
            self.values -= 1;
        }
        value
    }

    /// Discards the whole tree.
    pub fn flush(&mut self) {
        self.nodes.truncate(1);
        self.nodes[ROOT as usize] = TrieNode::empty();
        self.values = 0;
    }

    /// Depth-first visit of every stored value, `0` branches before `1`
    /// branches. Returns the number of values visited.
    pub fn iterate<F>(&self, mut f: F) -> usize
    where
        F: FnMut(&V),
    {
        let mut count = 0;
        let mut stack = vec![ROOT];
        while let Some(idx) = stack.pop() {
            let node = &self.nodes[idx as usize];
            if let Some(value) = node.value.as_ref() {
                f(value);
                count += 1;
            }
            stack.extend(node.children.iter().rev().flatten());
        }
        count
    }

    // ============================================================================================
    // NETWORK WRAPPERS
    // ============================================================================================

    pub fn insert_net(&mut self, net: &IpNet, value: V) -> bool {
        let net = net.trunc();
        self.insert(net.network(), net.prefix_len(), value)
    }

    pub fn search_exact_net(&self, net: &IpNet) -> Option<&V> {
        let net = net.trunc();
        self.search_exact(net.network(), net.prefix_len())
    }

    /// Inserts under a textual CIDR such as `"10.0.0.0/8"`.
    pub fn insert_str(&mut self, cidr: &str, value: V) -> ConfigResult<bool> {
        let net: IpNet = cidr
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidDestination(cidr.to_string()))?;
        Ok(self.insert_net(&net, value))
    }

    pub fn search_str(&self, ip: &str) -> Option<&V> {
        self.search(ip.trim().parse().ok()?)
    }
}
