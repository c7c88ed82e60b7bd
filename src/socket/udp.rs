//! UDP slot table.
//!
//! Much simpler than TCP: no handshake, no retransmission, no sequence
//! numbers. A slot is either unused (`local_port == 0`) or bound to a local
//! port with an independently filterable remote address and port — mirroring
//! `struct uip_udp_conn`'s separate `ripaddr`/`rport` fields, each of which
//! may be left wildcard (any source) or pinned to a single peer.

use managed::ManagedSlice;

use crate::wire::Ipv4Address;

/// One UDP endpoint.
#[derive(Debug, Clone, Copy)]
pub struct UdpSlot<U> {
    local_port: u16,
    /// `None` accepts a datagram from any source address.
    remote_addr: Option<Ipv4Address>,
    /// `None` accepts a datagram from any source port.
    remote_port: Option<u16>,
    checksum_enabled: bool,
    pub app: U,
}

impl<U: Default> Default for UdpSlot<U> {
    fn default() -> Self {
        UdpSlot {
            local_port: 0,
            remote_addr: None,
            remote_port: None,
            checksum_enabled: true,
            app: U::default(),
        }
    }
}

impl<U> UdpSlot<U> {
    pub fn is_free(&self) -> bool {
        self.local_port == 0
    }

    pub fn local_port(&self) -> u16 {
        self.local_port
    }

    pub fn remote_addr(&self) -> Option<Ipv4Address> {
        self.remote_addr
    }

    pub fn remote_port(&self) -> Option<u16> {
        self.remote_port
    }

    /// The single peer to send app-initiated traffic to — only available
    /// once both the address and the port have been pinned down; a slot
    /// wildcarding either one has no unambiguous destination to send to.
    pub fn connected_remote(&self) -> Option<(Ipv4Address, u16)> {
        Some((self.remote_addr?, self.remote_port?))
    }

    pub fn checksum_enabled(&self) -> bool {
        self.checksum_enabled
    }

    pub fn set_checksum_enabled(&mut self, enabled: bool) {
        self.checksum_enabled = enabled;
    }

    /// Demux rule: `(remote_port == None OR == src_port) AND (remote_addr ==
    /// None OR == src_addr)`, each condition wildcardable independently.
    fn accepts(&self, local_port: u16, remote_addr: Ipv4Address, remote_port: u16) -> bool {
        if self.is_free() || self.local_port != local_port {
            return false;
        }
        self.remote_addr.map_or(true, |addr| addr == remote_addr) && self.remote_port.map_or(true, |port| port == remote_port)
    }
}

/// The fixed UDP slot table.
pub struct UdpSockets<'a, U> {
    slots: ManagedSlice<'a, UdpSlot<U>>,
}

impl<'a, U: Default> UdpSockets<'a, U> {
    pub fn new(slots: impl Into<ManagedSlice<'a, UdpSlot<U>>>) -> UdpSockets<'a, U> {
        UdpSockets { slots: slots.into() }
    }

    pub fn slot(&self, idx: usize) -> &UdpSlot<U> {
        &self.slots[idx]
    }

    pub fn slot_mut(&mut self, idx: usize) -> &mut UdpSlot<U> {
        &mut self.slots[idx]
    }

    pub fn iter(&self) -> impl Iterator<Item = &UdpSlot<U>> {
        self.slots.iter()
    }

    /// Bind a local port, unconnected (accepts traffic from anyone).
    pub fn bind(&mut self, local_port: u16) -> Option<usize> {
        self.bind_filtered(local_port, None, None)
    }

    /// Bind a local port connected to a single remote peer.
    pub fn connect(&mut self, local_port: u16, remote_addr: Ipv4Address, remote_port: u16) -> Option<usize> {
        self.bind_filtered(local_port, Some(remote_addr), Some(remote_port))
    }

    /// Bind a local port with the remote address and/or port independently
    /// wildcarded (`None` accepts any value for that field), e.g. "any
    /// source, port 53" or "this one peer, any of their ports".
    pub fn bind_filtered(&mut self, local_port: u16, remote_addr: Option<Ipv4Address>, remote_port: Option<u16>) -> Option<usize> {
        if local_port == 0 || self.find_bound(local_port).is_some() {
            return None;
        }
        let idx = self.slots.iter().position(|s| s.is_free())?;
        self.slots[idx] = UdpSlot {
            local_port,
            remote_addr,
            remote_port,
            checksum_enabled: true,
            app: U::default(),
        };
        Some(idx)
    }

    pub fn close(&mut self, idx: usize) {
        self.slots[idx] = UdpSlot::default();
    }

    fn find_bound(&self, local_port: u16) -> Option<usize> {
        self.slots.iter().position(|s| !s.is_free() && s.local_port == local_port)
    }

    /// Find the slot an inbound datagram demuxes to. At most one slot is
    /// ever bound to a given local port (`bind_filtered` enforces that), so
    /// there's never more than one candidate to choose between.
    pub fn find(&self, local_port: u16, remote_addr: Ipv4Address, remote_port: u16) -> Option<usize> {
        self.slots.iter().position(|s| s.accepts(local_port, remote_addr, remote_port))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unconnected_slot_accepts_any_source() {
        let mut storage = [UdpSlot::<()>::default(); 2];
        let mut udp = UdpSockets::new(&mut storage[..]);
        udp.bind(9000).unwrap();
        let a = Ipv4Address::new(10, 0, 0, 1);
        let b = Ipv4Address::new(10, 0, 0, 2);
        assert!(udp.find(9000, a, 1111).is_some());
        assert!(udp.find(9000, b, 2222).is_some());
    }

    #[test]
    fn connected_slot_rejects_other_peers() {
        let mut storage = [UdpSlot::<()>::default(); 2];
        let mut udp = UdpSockets::new(&mut storage[..]);
        let peer = Ipv4Address::new(10, 0, 0, 1);
        udp.connect(9000, peer, 1111).unwrap();
        assert!(udp.find(9000, peer, 1111).is_some());
        assert!(udp.find(9000, Ipv4Address::new(10, 0, 0, 9), 1111).is_none());
    }

    #[test]
    fn bind_fails_when_table_full() {
        let mut storage = [UdpSlot::<()>::default(); 1];
        let mut udp = UdpSockets::new(&mut storage[..]);
        assert!(udp.bind(1).is_some());
        assert!(udp.bind(2).is_none());
    }

    #[test]
    fn port_pinned_address_wildcard_accepts_any_peer() {
        let mut storage = [UdpSlot::<()>::default(); 2];
        let mut udp = UdpSockets::new(&mut storage[..]);
        udp.bind_filtered(53, None, Some(5353)).unwrap();
        assert!(udp.find(53, Ipv4Address::new(10, 0, 0, 1), 5353).is_some());
        assert!(udp.find(53, Ipv4Address::new(10, 0, 0, 2), 5353).is_some());
        assert!(udp.find(53, Ipv4Address::new(10, 0, 0, 1), 9999).is_none());
    }

    #[test]
    fn address_pinned_port_wildcard_accepts_any_source_port() {
        let mut storage = [UdpSlot::<()>::default(); 2];
        let mut udp = UdpSockets::new(&mut storage[..]);
        let peer = Ipv4Address::new(10, 0, 0, 1);
        udp.bind_filtered(9000, Some(peer), None).unwrap();
        assert!(udp.find(9000, peer, 1111).is_some());
        assert!(udp.find(9000, peer, 2222).is_some());
        assert!(udp.find(9000, Ipv4Address::new(10, 0, 0, 9), 1111).is_none());
    }
}
