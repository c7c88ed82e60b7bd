//! Host identity — everything the stack needs to know about itself, minus
//! the shared frame buffer, which is threaded through the driver's tokens by
//! reference rather than owned (see the crate root docs).

use crate::wire::{EthernetAddress, Ipv4Address, Ipv4Cidr};

const BROADCAST: Ipv4Address = Ipv4Address::new(255, 255, 255, 255);

/// Local IPv4 address, netmask (expressed as a CIDR prefix), default
/// gateway, and link-layer address. Immutable after construction except
/// through the explicit setters; callers set host IP, netmask, gateway, and
/// MAC before the first `poll_*` call.
#[derive(Debug, Clone, Copy)]
pub struct HostConfig {
    ip_cidr: Ipv4Cidr,
    gateway: Option<Ipv4Address>,
    hardware_addr: EthernetAddress,
    /// Local advertised MSS; clamped to fit the shared buffer on construction.
    mss: u16,
}

impl HostConfig {
    pub fn new(ip_cidr: Ipv4Cidr, hardware_addr: EthernetAddress, buffer_len: usize) -> HostConfig {
        let max_mss = buffer_len.saturating_sub(
            crate::wire::ETHERNET_HEADER_LEN + crate::wire::IPV4_HEADER_LEN + crate::wire::TCP_HEADER_LEN,
        );
        HostConfig {
            ip_cidr,
            gateway: None,
            hardware_addr,
            mss: (max_mss.min(1460)) as u16,
        }
    }

    pub fn ip_addr(&self) -> Ipv4Address {
        self.ip_cidr.address()
    }

    pub fn ip_cidr(&self) -> Ipv4Cidr {
        self.ip_cidr
    }

    pub fn set_ip_cidr(&mut self, cidr: Ipv4Cidr) {
        self.ip_cidr = cidr;
    }

    pub fn gateway(&self) -> Option<Ipv4Address> {
        self.gateway
    }

    pub fn set_gateway(&mut self, gateway: Ipv4Address) {
        self.gateway = Some(gateway);
    }

    pub fn hardware_addr(&self) -> EthernetAddress {
        self.hardware_addr
    }

    pub fn set_hardware_addr(&mut self, addr: EthernetAddress) {
        self.hardware_addr = addr;
    }

    pub fn mss(&self) -> u16 {
        self.mss
    }

    pub fn set_mss(&mut self, mss: u16) {
        self.mss = mss;
    }

    /// Is `addr` on our local subnet?
    pub fn is_local(&self, addr: Ipv4Address) -> bool {
        self.ip_cidr.contains_addr(&addr)
    }

    /// Is `addr` this host's own address?
    pub fn is_ours(&self, addr: Ipv4Address) -> bool {
        addr == self.ip_addr() || addr == BROADCAST
    }

    /// Next-hop IP to resolve via ARP for a packet destined to `dst`:
    /// the destination itself if on-subnet, else the default gateway.
    pub fn next_hop(&self, dst: Ipv4Address) -> Option<Ipv4Address> {
        if dst == BROADCAST {
            None // caller sends to the broadcast hardware address directly
        } else if self.is_local(dst) {
            Some(dst)
        } else {
            self.gateway
        }
    }
}
