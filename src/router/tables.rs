//! Routing and service-discovery tables.
//!
//! All of these structures are owned by the router and mutated only under
//! its single lock; nothing here synchronizes on its own.

use std::collections::HashMap;
use std::time::Instant;

use crate::core::packet::Address;
use crate::transport::ChannelId;

/// One learned route to a remote node.
#[derive(Debug, Clone)]
pub struct RemoteNode {
    /// The remote node this entry routes to.
    pub address: Address,
    /// Neighbor to forward through.
    pub next_hop: Address,
    /// Hop count. Withdrawals travel as cost 0.
    pub cost: u16,
    /// Channel the route was learned through. Non-owning: the channel may
    /// leave the pool, which is one of the conditions for accepting a
    /// replacement route.
    pub channel: ChannelId,
    /// Routes should decay after a few missed updates.
    pub last_seen: Instant,
}

/// One advertised provider of a service.
#[derive(Debug, Clone)]
pub struct ServiceEntry {
    pub address: Address,
    pub capacity: u16,
    pub last_seen: Instant,
}

/// Outcome of recording a service advertisement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapacityUpdate {
    /// The advertised capacity matched the stored value. The packet must
    /// not be relayed again or flooded updates would loop forever.
    Unchanged,
    /// New provider or new capacity; relay and notify.
    Changed,
}

/// Per-service provider lists.
///
/// Providers are kept in a `Vec` per service so candidate order for
/// anycast resolution is discovery order, matching the insertion-ordered
/// maps of peer implementations.
#[derive(Debug, Default)]
pub struct ServiceTable {
    map: HashMap<String, Vec<ServiceEntry>>,
}

impl ServiceTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an advertisement, returning whether anything changed.
    pub fn set(&mut self, service: &str, address: &Address, capacity: u16) -> CapacityUpdate {
        let entries = self.map.entry(service.to_string()).or_default();
        match entries.iter_mut().find(|e| &e.address == address) {
            Some(entry) => {
                entry.last_seen = Instant::now();
                if entry.capacity == capacity {
                    CapacityUpdate::Unchanged
                } else {
                    entry.capacity = capacity;
                    CapacityUpdate::Changed
                }
            }
            None => {
                entries.push(ServiceEntry {
                    address: address.clone(),
                    capacity,
                    last_seen: Instant::now(),
                });
                CapacityUpdate::Changed
            }
        }
    }

    /// Remove one provider entry. Returns true if it existed.
    pub fn remove(&mut self, service: &str, address: &Address) -> bool {
        let Some(entries) = self.map.get_mut(service) else {
            return false;
        };
        let before = entries.len();
        entries.retain(|e| &e.address != address);
        let removed = entries.len() != before;
        if entries.is_empty() {
            self.map.remove(service);
        }
        removed
    }

    /// Drop `address` from every service, returning the services that
    /// lost a provider.
    pub fn purge_address(&mut self, address: &Address) -> Vec<String> {
        let mut affected = Vec::new();
        for (service, entries) in self.map.iter_mut() {
            let before = entries.len();
            entries.retain(|e| &e.address != address);
            if entries.len() != before {
                affected.push(service.clone());
            }
        }
        self.map.retain(|_, entries| !entries.is_empty());
        affected
    }

    /// Provider addresses for a service, in discovery order.
    pub fn addresses(&self, service: &str) -> Vec<Address> {
        self.map
            .get(service)
            .map(|entries| entries.iter().map(|e| e.address.clone()).collect())
            .unwrap_or_default()
    }

    pub fn has_provider(&self, service: &str) -> bool {
        self.map.get(service).is_some_and(|e| !e.is_empty())
    }

    /// Every (service, entry) pair, for table export.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &ServiceEntry)> {
        self.map
            .iter()
            .flat_map(|(service, entries)| entries.iter().map(move |e| (service.as_str(), e)))
    }
}
