//! Anti-clustering: subnet density tracking and entry caps.
//!
//! Peer addresses are grouped into subnets. A subnet starts at `/24`
//! granularity; once more than 3 tracked peers share a `/24` the lens widens
//! to `/20`, and past 10 peers in the `/20` to `/16`. New-entrant
//! participants connecting from a clustered subnet are refused once the
//! subnet already hosts [`MAX_NODES_PER_SUBNET`] peers; veteran participants
//! (checked by the caller via stake age) bypass the cap.
//!
//! Only IPv4 addresses are classed; IPv6 peers are sparse enough in practice
//! that they are always permitted.

use std::collections::HashMap;
use std::net::IpAddr;

use tessera_core::constants::MAX_NODES_PER_SUBNET;

/// Density thresholds at which the subnet lens widens.
const ESCALATE_TO_20: usize = 3;
const ESCALATE_TO_16: usize = 10;

/// The granularity a peer address is judged at.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubnetClass {
    /// Default: 256-address neighbourhood.
    Slash24,
    /// Escalated: dense `/24` widens the lens.
    Slash20,
    /// Heavily clustered.
    Slash16,
}

fn prefix24(ip: u32) -> u32 {
    ip >> 8
}

fn prefix20(ip: u32) -> u32 {
    ip >> 12
}

fn prefix16(ip: u32) -> u32 {
    ip >> 16
}

/// Tracks connected peer addresses and answers clustering questions.
#[derive(Debug, Default)]
pub struct SubnetTracker {
    /// Refcount per exact IPv4 address (multiple peers can share a NAT).
    peers: HashMap<u32, usize>,
}

impl SubnetTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn as_v4(addr: &IpAddr) -> Option<u32> {
        match addr {
            IpAddr::V4(v4) => Some(u32::from(*v4)),
            IpAddr::V6(v6) => v6.to_ipv4_mapped().map(u32::from),
        }
    }

    /// Record a connected peer address.
    pub fn record(&mut self, addr: &IpAddr) {
        if let Some(ip) = Self::as_v4(addr) {
            *self.peers.entry(ip).or_insert(0) += 1;
        }
    }

    /// Forget a disconnected peer address.
    pub fn remove(&mut self, addr: &IpAddr) {
        if let Some(ip) = Self::as_v4(addr) {
            if let Some(count) = self.peers.get_mut(&ip) {
                *count -= 1;
                if *count == 0 {
                    self.peers.remove(&ip);
                }
            }
        }
    }

    fn count_in(&self, matches: impl Fn(u32) -> bool) -> usize {
        self.peers
            .iter()
            .filter(|(ip, _)| matches(**ip))
            .map(|(_, count)| count)
            .sum()
    }

    /// The subnet class assigned to `addr` given current peer density.
    pub fn class(&self, addr: &IpAddr) -> SubnetClass {
        let Some(ip) = Self::as_v4(addr) else {
            return SubnetClass::Slash24;
        };
        let in_24 = self.count_in(|p| prefix24(p) == prefix24(ip));
        if in_24 <= ESCALATE_TO_20 {
            return SubnetClass::Slash24;
        }
        let in_20 = self.count_in(|p| prefix20(p) == prefix20(ip));
        if in_20 <= ESCALATE_TO_16 {
            SubnetClass::Slash20
        } else {
            SubnetClass::Slash16
        }
    }

    /// Number of tracked peers in `addr`'s subnet at its current class.
    pub fn occupancy(&self, addr: &IpAddr) -> usize {
        let Some(ip) = Self::as_v4(addr) else { return 0 };
        match self.class(addr) {
            SubnetClass::Slash24 => self.count_in(|p| prefix24(p) == prefix24(ip)),
            SubnetClass::Slash20 => self.count_in(|p| prefix20(p) == prefix20(ip)),
            SubnetClass::Slash16 => self.count_in(|p| prefix16(p) == prefix16(ip)),
        }
    }

    /// Whether a **new-entrant** participant at `addr` is allowed.
    ///
    /// Veterans bypass this; the caller checks stake age first.
    pub fn permits_new_entrant(&self, addr: &IpAddr) -> bool {
        if Self::as_v4(addr).is_none() {
            return true;
        }
        self.occupancy(addr) < MAX_NODES_PER_SUBNET
    }

    pub fn peer_count(&self) -> usize {
        self.peers.values().sum()
    }
}
