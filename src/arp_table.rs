//! ARP resolver.
//!
//! A fixed table of (IP, MAC, age) entries. Aging is driven by an explicit
//! `tick()` call from the driver, not by wall-clock reads inside this
//! module.

use crate::wire::{EthernetAddress, Ipv4Address};

/// Entries older than this many `tick()` calls are evicted (uIP's
/// `UIP_ARP_MAXAGE` — 20 ticks of 10s each).
pub const MAXAGE: u8 = 20;

#[derive(Debug, Clone, Copy)]
struct Entry {
    ip: Ipv4Address,
    mac: EthernetAddress,
    age: u8,
}

const UNSPECIFIED: Ipv4Address = Ipv4Address::new(0, 0, 0, 0);

impl Entry {
    const fn free() -> Entry {
        Entry {
            ip: UNSPECIFIED,
            mac: EthernetAddress([0; 6]),
            age: 0,
        }
    }

    fn is_free(&self) -> bool {
        self.ip == UNSPECIFIED
    }
}

/// Fixed-capacity IP->MAC table, generic over its capacity `N`.
#[derive(Debug, Clone)]
pub struct ArpCache<const N: usize> {
    entries: [Entry; N],
}

impl<const N: usize> Default for ArpCache<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> ArpCache<N> {
    pub const fn new() -> ArpCache<N> {
        ArpCache {
            entries: [Entry::free(); N],
        }
    }

    pub fn lookup(&self, ip: Ipv4Address) -> Option<EthernetAddress> {
        self.entries
            .iter()
            .find(|e| !e.is_free() && e.ip == ip)
            .map(|e| e.mac)
    }

    /// Insert or refresh the mapping for `ip`. If the table is full and `ip`
    /// is not already present, the oldest entry is evicted to make room —
    /// matches the aging design's intent and keeps this operation
    /// infallible.
    pub fn update(&mut self, ip: Ipv4Address, mac: EthernetAddress) {
        if ip == UNSPECIFIED {
            return;
        }
        if let Some(e) = self.entries.iter_mut().find(|e| !e.is_free() && e.ip == ip) {
            e.mac = mac;
            e.age = 0;
            return;
        }
        if let Some(slot) = self.entries.iter_mut().find(|e| e.is_free()) {
            *slot = Entry { ip, mac, age: 0 };
            return;
        }
        // table full: evict the oldest entry.
        if let Some(oldest) = self.entries.iter_mut().max_by_key(|e| e.age) {
            *oldest = Entry { ip, mac, age: 0 };
        }
    }

    /// Advance every entry's age by one tick and evict anything past MAXAGE.
    pub fn tick(&mut self) {
        for e in self.entries.iter_mut() {
            if e.is_free() {
                continue;
            }
            e.age = e.age.saturating_add(1);
            if e.age > MAXAGE {
                *e = Entry::free();
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.iter().filter(|e| !e.is_free()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
