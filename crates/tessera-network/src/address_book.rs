//! Bounded pool of known peer addresses.
//!
//! Entries are deduplicated by socket address and carry a last-seen stamp.
//! When full, the stalest entry makes room. Outbound dialing samples
//! uniformly at random.

use std::collections::HashMap;
use std::net::SocketAddr;

use rand::seq::IteratorRandom;

use crate::message::NetAddress;

/// Default capacity of the address book.
pub const DEFAULT_CAPACITY: usize = 2_048;

/// Bounded, deduplicated pool of peer addresses.
pub struct AddressBook {
    entries: HashMap<SocketAddr, NetAddress>,
    capacity: usize,
}

impl AddressBook {
    pub fn new(capacity: usize) -> Self {
        Self { entries: HashMap::new(), capacity }
    }

    pub fn with_defaults() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }

    /// Insert or refresh an address. Unroutable addresses are ignored.
    /// Returns whether the address is now present.
    pub fn insert(&mut self, address: NetAddress) -> bool {
        if !address.is_routable() {
            return false;
        }
        let key = address.socket_addr();

        if let Some(existing) = self.entries.get_mut(&key) {
            existing.last_seen = existing.last_seen.max(address.last_seen);
            return true;
        }

        if self.entries.len() >= self.capacity {
            // Make room by dropping the stalest entry.
            if let Some(stalest) = self
                .entries
                .iter()
                .min_by_key(|(_, a)| a.last_seen)
                .map(|(k, _)| *k)
            {
                self.entries.remove(&stalest);
            }
        }
        self.entries.insert(key, address);
        true
    }

    /// Refresh the last-seen stamp of a known address.
    pub fn mark_seen(&mut self, addr: &SocketAddr, now: u32) {
        if let Some(entry) = self.entries.get_mut(addr) {
            entry.last_seen = entry.last_seen.max(now);
        }
    }

    pub fn remove(&mut self, addr: &SocketAddr) {
        self.entries.remove(addr);
    }

    pub fn contains(&self, addr: &SocketAddr) -> bool {
        self.entries.contains_key(addr)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sample up to `n` distinct addresses uniformly for dialing, skipping
    /// any in `exclude`.
    pub fn sample(&self, n: usize, exclude: &[SocketAddr]) -> Vec<SocketAddr> {
        let mut rng = rand::thread_rng();
        self.entries
            .keys()
            .filter(|addr| !exclude.contains(addr))
            .copied()
            .choose_multiple(&mut rng, n)
    }

    /// Addresses to gossip in an `addr` message, freshest first.
    pub fn gossip(&self, max: usize) -> Vec<NetAddress> {
        let mut addrs: Vec<NetAddress> = self.entries.values().copied().collect();
        addrs.sort_by(|a, b| b.last_seen.cmp(&a.last_seen));
        addrs.truncate(max);
        addrs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(d: u8, port: u16, last_seen: u32) -> NetAddress {
        NetAddress::from_socket_addr(
            SocketAddr::from(([10, 0, 0, d], port)),
            last_seen,
        )
    }

    #[test]
    fn insert_and_contains() {
        let mut book = AddressBook::new(10);
        assert!(book.insert(addr(1, 19333, 100)));
        assert!(book.contains(&"10.0.0.1:19333".parse().unwrap()));
        assert_eq!(book.len(), 1);
    }

    #[test]
    fn duplicate_updates_last_seen() {
        let mut book = AddressBook::new(10);
        book.insert(addr(1, 19333, 100));
        book.insert(addr(1, 19333, 200));
        assert_eq!(book.len(), 1);
        assert_eq!(book.gossip(10)[0].last_seen, 200);

        // Stale re-announcement does not rewind the stamp.
        book.insert(addr(1, 19333, 50));
        assert_eq!(book.gossip(10)[0].last_seen, 200);
    }

    #[test]
    fn same_ip_different_port_is_distinct() {
        let mut book = AddressBook::new(10);
        book.insert(addr(1, 19333, 100));
        book.insert(addr(1, 19334, 100));
        assert_eq!(book.len(), 2);
    }

    #[test]
    fn unroutable_ignored() {
        let mut book = AddressBook::new(10);
        assert!(!book.insert(NetAddress::from_socket_addr(
            "0.0.0.0:19333".parse().unwrap(),
            100
        )));
        assert!(book.is_empty());
    }

    #[test]
    fn capacity_evicts_stalest() {
        let mut book = AddressBook::new(3);
        book.insert(addr(1, 19333, 100));
        book.insert(addr(2, 19333, 300));
        book.insert(addr(3, 19333, 200));
        book.insert(addr(4, 19333, 400));

        assert_eq!(book.len(), 3);
        assert!(!book.contains(&"10.0.0.1:19333".parse().unwrap()));
        assert!(book.contains(&"10.0.0.4:19333".parse().unwrap()));
    }

    #[test]
    fn sample_excludes_and_bounds() {
        let mut book = AddressBook::new(10);
        for d in 1..=5 {
            book.insert(addr(d, 19333, 100));
        }
        let exclude = vec!["10.0.0.1:19333".parse().unwrap()];
        let sampled = book.sample(10, &exclude);
        assert_eq!(sampled.len(), 4);
        assert!(!sampled.contains(&exclude[0]));

        assert_eq!(book.sample(2, &[]).len(), 2);
    }

    #[test]
    fn gossip_orders_by_freshness() {
        let mut book = AddressBook::new(10);
        book.insert(addr(1, 19333, 100));
        book.insert(addr(2, 19333, 300));
        book.insert(addr(3, 19333, 200));

        let gossip = book.gossip(2);
        assert_eq!(gossip.len(), 2);
        assert_eq!(gossip[0].last_seen, 300);
        assert_eq!(gossip[1].last_seen, 200);
    }

    #[test]
    fn mark_seen_refreshes() {
        let mut book = AddressBook::new(10);
        book.insert(addr(1, 19333, 100));
        let key = "10.0.0.1:19333".parse().unwrap();
        book.mark_seen(&key, 500);
        assert_eq!(book.gossip(1)[0].last_seen, 500);
    }
}
