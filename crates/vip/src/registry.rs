//! VIP registry and solicited-node group reference counting.

use crate::types::{solicited_node_multicast, VirtualIpAddress};
use std::collections::{HashMap, HashSet};
use std::net::Ipv6Addr;
use std::sync::Mutex;

/// The set of currently-enabled VIPs, keyed by canonical address string.
#[derive(Debug, Default)]
pub struct VipRegistry {
    addresses: Mutex<HashMap<String, VirtualIpAddress>>,
}

impl VipRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, vip: VirtualIpAddress) {
        let mut addresses = self.addresses.lock().unwrap();
        addresses.insert(vip.canonical().to_string(), vip);
    }

    pub fn remove(&self, canonical: &str) {
        let mut addresses = self.addresses.lock().unwrap();
        addresses.remove(canonical);
    }

    pub fn contains(&self, canonical: &str) -> bool {
        self.addresses.lock().unwrap().contains_key(canonical)
    }

    pub fn is_empty(&self) -> bool {
        self.addresses.lock().unwrap().is_empty()
    }
}

/// Outcome of a ref-counter transition. `Joined` and `Left` each correspond
/// to exactly one kernel multicast membership change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupTransition {
    NoOp,
    Joined,
    Left,
}

/// Reference-counted membership of solicited-node multicast groups.
///
/// Multiple VIPs whose low 24 bits collide share one group; the kernel join
/// happens on the first reference and the leave on the last.
#[derive(Debug, Default)]
pub struct GroupRefCounter {
    groups: Mutex<HashMap<Ipv6Addr, HashSet<Ipv6Addr>>>,
}

impl GroupRefCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `vip` as referencing its solicited-node group.
    pub fn join(&self, vip: Ipv6Addr) -> GroupTransition {
        let group = solicited_node_multicast(&vip);
        let mut groups = self.groups.lock().unwrap();

        let members = groups.entry(group).or_default();
        if members.insert(vip) && members.len() == 1 {
            GroupTransition::Joined
        } else {
            GroupTransition::NoOp
        }
    }

    /// Drop `vip`'s reference to its solicited-node group.
    pub fn leave(&self, vip: Ipv6Addr) -> GroupTransition {
        let group = solicited_node_multicast(&vip);
        let mut groups = self.groups.lock().unwrap();

        let Some(members) = groups.get_mut(&group) else {
            return GroupTransition::NoOp;
        };
        if !members.remove(&vip) {
            return GroupTransition::NoOp;
        }
        if members.is_empty() {
            groups.remove(&group);
            GroupTransition::Left
        } else {
            GroupTransition::NoOp
        }
    }

    #[cfg(test)]
    fn group_count(&self) -> usize {
        self.groups.lock().unwrap().len()
    }
}
