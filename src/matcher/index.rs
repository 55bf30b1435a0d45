//! Immutable policy index: a prefix trie per address family plus the
//! default list for the wildcard network.
//!
//! An index is built in one go from compiled policies and never mutated
//! afterwards; a reload builds a fresh one.

use ipnet::IpNet;
use std::net::IpAddr;

use super::compile::Policy;
use crate::error::{ConfigError, ConfigResult};
use crate::packet::IpVersion;
use crate::trie::PrefixTrie;
use crate::types::ProtocolClass;

/// Policies bound to one network, at most one per protocol class.
pub type PolicyList = Vec<Policy>;

#[derive(Debug, Clone)]
pub struct PolicyIndex {
    v4: PrefixTrie<PolicyList>,
    v6: PrefixTrie<PolicyList>,
    defaults: PolicyList,
    policies: usize,
}

impl Default for PolicyIndex {
    fn default() -> Self {
        Self::empty()
    }
}

impl PolicyIndex {
    pub fn empty() -> Self {
        Self {
            v4: PrefixTrie::new(IpVersion::V4),
            v6: PrefixTrie::new(IpVersion::V6),
            defaults: PolicyList::new(),
            policies: 0,
        }
    }

    /// Groups `policies` per destination network, in order.
    ///
    /// Fails with [`ConfigError::DuplicatePolicy`] when a network already
    /// carries a policy for the same protocol class.
    pub fn build(policies: Vec<Policy>) -> ConfigResult<Self> {
        let mut index = Self::empty();
        for policy in policies {
            index.insert(policy)?;
        }
        Ok(index)
    }

    fn insert(&mut self, policy: Policy) -> ConfigResult<()> {
        let network = policy.network;

        let list = if policy.is_default() {
            &mut self.defaults
        } else {
            let trie = match network {
                IpNet::V4(_) => &mut self.v4,
                IpNet::V6(_) => &mut self.v6,
            };
            if trie.search_exact_net(&network).is_none() {
                trie.insert_net(&network, PolicyList::new());
            }
            trie.search_exact_mut(network.network(), network.prefix_len())
                .ok_or_else(|| ConfigError::InvalidDestination(network.to_string()))?
        };

        if list.iter().any(|p| p.protocol == policy.protocol) {
            return Err(ConfigError::DuplicatePolicy {
                network: network.to_string(),
                protocol: policy.protocol,
            });
        }
        list.push(policy);
        self.policies += 1;
        Ok(())
    }

    // ============================================================================================
    // LOOKUP
    // ============================================================================================

    /// Candidate policies for `ip`: the list of the longest matching network,
    /// or the default list when no network matches.
    pub fn candidates(&self, ip: IpAddr) -> &[Policy] {
        let trie = match ip {
            IpAddr::V4(_) => &self.v4,
            IpAddr::V6(_) => &self.v6,
        };
        trie.search(ip).map(Vec::as_slice).unwrap_or(&self.defaults)
    }

    /// The policy governing traffic of `protocol` with remote address `ip`.
    pub fn find(&self, ip: IpAddr, protocol: u8) -> Option<&Policy> {
        select_policy(self.candidates(ip), protocol)
    }

    // ============================================================================================
    // STATISTICS
    // ============================================================================================

    /// Total indexed policies, defaults included.
    pub fn len(&self) -> usize {
        self.policies
    }

    pub fn is_empty(&self) -> bool {
        self.policies == 0
    }

    /// Distinct non-default networks.
    pub fn network_count(&self) -> usize {
        self.v4.len() + self.v6.len()
    }

    pub fn default_policies(&self) -> &[Policy] {
        &self.defaults
    }
}

/// Picks the policy for `protocol` from one network's list.
///
/// A policy declared for exactly that protocol wins wherever it sits in the
/// list; a policy for any protocol is only the fallback.
pub fn select_policy(list: &[Policy], protocol: u8) -> Option<&Policy> {
    let mut fallback = None;
    for policy in list {
        if policy.protocol.is_exactly(protocol) {
            return Some(policy);
        }
        if policy.protocol == ProtocolClass::Any && fallback.is_none() {
            fallback = Some(policy);
        }
    }
    fallback
}
