use byteorder::{ByteOrder, NetworkEndian};
use core::fmt;

pub use core::net::Ipv4Addr as Address;

use super::{Error, IpProtocol, Result};
use crate::checksum;

pub const ADDR_SIZE: usize = 4;

pub(crate) trait AddressExt {
    fn from_bytes(data: &[u8]) -> Self;
    fn x_is_unicast(&self) -> bool;
}

impl AddressExt for Address {
    fn from_bytes(data: &[u8]) -> Address {
        Address::new(data[0], data[1], data[2], data[3])
    }

    fn x_is_unicast(&self) -> bool {
        !(self.is_broadcast() || self.is_multicast() || self.is_unspecified())
    }
}

mod field {
    use crate::wire::field::*;
    pub const VER_IHL: usize = 0;
    pub const DSCP_ECN: usize = 1;
    pub const LENGTH: Field = 2..4;
    pub const IDENT: Field = 4..6;
    pub const FLG_OFF: Field = 6..8;
    pub const TTL: usize = 8;
    pub const PROTOCOL: usize = 9;
    pub const CHECKSUM: Field = 10..12;
    pub const SRC_ADDR: Field = 12..16;
    pub const DST_ADDR: Field = 16..20;
}

/// Standard 20-byte header length; this stack never emits IP options.
/// `new_checked` rejects a declared header length shorter than this (a
/// malformed packet), but does not reject one that is longer — inbound
/// packets with options are accepted and handled correctly, since
/// `payload()`/`verify_checksum()` always skip past the real `header_len()`.
pub const HEADER_LEN: usize = field::SRC_ADDR.start + 8;
pub const MIN_MTU: usize = 576;
pub const VERSION: u8 = 4;

pub const FLAG_DONT_FRAGMENT: u16 = 0x4000;
pub const FLAG_MORE_FRAGMENTS: u16 = 0x2000;
pub const FRAG_OFFSET_MASK: u16 = 0x1fff;

/// A read/write wrapper around an IPv4 header buffer.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct Packet<T: AsRef<[u8]>> {
    buffer: T,
}

impl<T: AsRef<[u8]>> Packet<T> {
    pub const fn new_unchecked(buffer: T) -> Packet<T> {
        Packet { buffer }
    }

    pub fn new_checked(buffer: T) -> Result<Packet<T>> {
        let packet = Self::new_unchecked(buffer);
        packet.check_len()?;
        if packet.version() != VERSION {
            return Err(Error);
        }
        if packet.header_len() < HEADER_LEN || packet.total_len() < packet.header_len() {
            return Err(Error);
        }
        Ok(packet)
    }

    pub fn check_len(&self) -> Result<()> {
        let len = self.buffer.as_ref().len();
        if len < HEADER_LEN {
            Err(Error)
        } else {
            Ok(())
        }
    }

    pub fn into_inner(self) -> T {
        self.buffer
    }

    pub fn version(&self) -> u8 {
        self.buffer.as_ref()[field::VER_IHL] >> 4
    }

    /// Internet header length, in octets (the field is stored in 32-bit words).
    pub fn header_len(&self) -> usize {
        ((self.buffer.as_ref()[field::VER_IHL] & 0x0f) as usize) * 4
    }

    pub fn dscp(&self) -> u8 {
        self.buffer.as_ref()[field::DSCP_ECN] >> 2
    }

    pub fn total_len(&self) -> usize {
        NetworkEndian::read_u16(&self.buffer.as_ref()[field::LENGTH]) as usize
    }

    pub fn ident(&self) -> u16 {
        NetworkEndian::read_u16(&self.buffer.as_ref()[field::IDENT])
    }

    pub fn dont_frag(&self) -> bool {
        NetworkEndian::read_u16(&self.buffer.as_ref()[field::FLG_OFF]) & FLAG_DONT_FRAGMENT != 0
    }

    pub fn more_frags(&self) -> bool {
        NetworkEndian::read_u16(&self.buffer.as_ref()[field::FLG_OFF]) & FLAG_MORE_FRAGMENTS != 0
    }

    pub fn frag_offset(&self) -> u16 {
        NetworkEndian::read_u16(&self.buffer.as_ref()[field::FLG_OFF]) & FRAG_OFFSET_MASK
    }

    pub fn ttl(&self) -> u8 {
        self.buffer.as_ref()[field::TTL]
    }

    pub fn protocol(&self) -> IpProtocol {
        IpProtocol::from(self.buffer.as_ref()[field::PROTOCOL])
    }

    pub fn checksum(&self) -> u16 {
        NetworkEndian::read_u16(&self.buffer.as_ref()[field::CHECKSUM])
    }

    pub fn src_addr(&self) -> Address {
        Address::from_bytes(&self.buffer.as_ref()[field::SRC_ADDR])
    }

    pub fn dst_addr(&self) -> Address {
        Address::from_bytes(&self.buffer.as_ref()[field::DST_ADDR])
    }

    /// Verify the header checksum (RFC 1071: the ones-complement sum of the
    /// header, including the checksum field itself, must be all-ones).
    pub fn verify_checksum(&self) -> bool {
        let data = &self.buffer.as_ref()[..self.header_len().min(self.buffer.as_ref().len())];
        checksum::finish(checksum::accumulate(data)) == 0
    }

    pub fn payload(&self) -> &[u8] {
        let header_len = self.header_len();
        let total_len = self.total_len();
        &self.buffer.as_ref()[header_len..total_len]
    }
}

impl<T: AsRef<[u8]> + AsMut<[u8]>> Packet<T> {
    pub fn set_version(&mut self, value: u8) {
        let ihl = self.buffer.as_mut()[field::VER_IHL] & 0x0f;
        self.buffer.as_mut()[field::VER_IHL] = (value << 4) | ihl;
    }

    pub fn set_header_len(&mut self, length: usize) {
        let version = self.buffer.as_mut()[field::VER_IHL] & 0xf0;
        self.buffer.as_mut()[field::VER_IHL] = version | ((length / 4) as u8 & 0x0f);
    }

    pub fn set_dscp(&mut self, value: u8) {
        self.buffer.as_mut()[field::DSCP_ECN] = value << 2;
    }

    pub fn set_total_len(&mut self, value: usize) {
        NetworkEndian::write_u16(&mut self.buffer.as_mut()[field::LENGTH], value as u16);
    }

    pub fn set_ident(&mut self, value: u16) {
        NetworkEndian::write_u16(&mut self.buffer.as_mut()[field::IDENT], value);
    }

    pub fn set_flags_frag_offset(&mut self, dont_frag: bool, more_frags: bool, offset: u16) {
        let mut raw = offset & FRAG_OFFSET_MASK;
        if dont_frag {
            raw |= FLAG_DONT_FRAGMENT;
        }
        if more_frags {
            raw |= FLAG_MORE_FRAGMENTS;
        }
        NetworkEndian::write_u16(&mut self.buffer.as_mut()[field::FLG_OFF], raw);
    }

    pub fn set_ttl(&mut self, value: u8) {
        self.buffer.as_mut()[field::TTL] = value;
    }

    pub fn set_protocol(&mut self, value: IpProtocol) {
        self.buffer.as_mut()[field::PROTOCOL] = value.into();
    }

    pub fn set_checksum(&mut self, value: u16) {
        NetworkEndian::write_u16(&mut self.buffer.as_mut()[field::CHECKSUM], value);
    }

    pub fn set_src_addr(&mut self, value: Address) {
        self.buffer.as_mut()[field::SRC_ADDR].copy_from_slice(&value.octets());
    }

    pub fn set_dst_addr(&mut self, value: Address) {
        self.buffer.as_mut()[field::DST_ADDR].copy_from_slice(&value.octets());
    }

    pub fn fill_checksum(&mut self) {
        self.set_checksum(0);
        let header_len = self.header_len();
        let checksum = checksum::data(&self.buffer.as_mut()[..header_len]);
        self.set_checksum(checksum);
    }

    pub fn payload_mut(&mut self) -> &mut [u8] {
        let header_len = self.header_len();
        let total_len = self.total_len();
        &mut self.buffer.as_mut()[header_len..total_len]
    }
}

/// A specification of an IPv4 CIDR block: an address and a prefix length.
#[derive(Debug, Hash, PartialEq, Eq, Clone, Copy)]
pub struct Cidr {
    address: Address,
    prefix_len: u8,
}

impl Cidr {
    pub const fn new(address: Address, prefix_len: u8) -> Cidr {
        assert!(prefix_len <= 32);
        Cidr {
            address,
            prefix_len,
        }
    }

    pub const fn address(&self) -> Address {
        self.address
    }

    pub fn netmask(&self) -> Address {
        if self.prefix_len == 0 {
            return Address::UNSPECIFIED;
        }
        let bits = u32::MAX << (32 - self.prefix_len);
        Address::from_bits(bits)
    }

    /// Whether `addr` is within this CIDR's network.
    pub fn contains_addr(&self, addr: &Address) -> bool {
        let mask = self.netmask();
        (u32::from(*addr) & u32::from(mask)) == (u32::from(self.address) & u32::from(mask))
    }
}

impl fmt::Display for Cidr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}/{}", self.address, self.prefix_len)
    }
}
