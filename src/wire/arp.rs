use byteorder::{ByteOrder, NetworkEndian};

use super::ethernet::Address as EthernetAddress;
use super::ipv4::{Address as Ipv4Address, AddressExt};
use super::{Error, Result};
use crate::macros::enum_with_unknown;

pub use super::EthernetProtocol as Protocol;

enum_with_unknown! {
    pub enum Operation(u16) {
        Request = 1,
        Reply = 2,
    }
}

enum_with_unknown! {
    pub enum Hardware(u16) {
        Ethernet = 1,
    }
}

mod field {
    use crate::wire::field::*;
    pub const HTYPE: Field = 0..2;
    pub const PTYPE: Field = 2..4;
    pub const HLEN: usize = 4;
    pub const PLEN: usize = 5;
    pub const OPER: Field = 6..8;
    pub const SHA: Field = 8..14;
    pub const SPA: Field = 14..18;
    pub const THA: Field = 18..24;
    pub const TPA: Field = 24..28;
}

/// Length of an Ethernet/IPv4 ARP packet; this stack only ever speaks this one
/// hardware/protocol combination (RFC 826, hwtype 1 / ethertype 0x0800).
pub const HEADER_LEN: usize = field::TPA.end;

/// A high-level representation of an Ethernet/IPv4 Address Resolution Protocol packet.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct Repr {
    pub operation: Operation,
    pub source_hardware_addr: EthernetAddress,
    pub source_protocol_addr: Ipv4Address,
    pub target_hardware_addr: EthernetAddress,
    pub target_protocol_addr: Ipv4Address,
}

impl Repr {
    pub fn parse<T: AsRef<[u8]>>(packet: &Packet<T>) -> Result<Repr> {
        if packet.hardware_type() != Hardware::Ethernet
            || packet.hardware_len() != 6
            || packet.protocol_type() != Protocol::Ipv4
            || packet.protocol_len() != 4
        {
            return Err(Error);
        }
        Ok(Repr {
            operation: packet.operation(),
            source_hardware_addr: EthernetAddress::from_bytes(packet.source_hardware_addr()),
            source_protocol_addr: Ipv4Address::from_bytes(packet.source_protocol_addr()),
            target_hardware_addr: EthernetAddress::from_bytes(packet.target_hardware_addr()),
            target_protocol_addr: Ipv4Address::from_bytes(packet.target_protocol_addr()),
        })
    }

    pub fn emit<T: AsRef<[u8]> + AsMut<[u8]>>(&self, packet: &mut Packet<T>) {
        packet.set_hardware_type(Hardware::Ethernet);
        packet.set_protocol_type(Protocol::Ipv4);
        packet.set_hardware_len(6);
        packet.set_protocol_len(4);
        packet.set_operation(self.operation);
        packet.set_source_hardware_addr(self.source_hardware_addr.as_bytes());
        packet.set_source_protocol_addr(&self.source_protocol_addr.octets());
        packet.set_target_hardware_addr(self.target_hardware_addr.as_bytes());
        packet.set_target_protocol_addr(&self.target_protocol_addr.octets());
    }

    /// Whether this packet's addresses are usable for a table update:
    /// all-zero or broadcast sender/target addresses are ignored.
    pub fn is_updatable(&self) -> bool {
        self.source_protocol_addr.x_is_unicast()
    }
}

/// A read/write wrapper around an Ethernet/IPv4 ARP packet buffer.
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
        Ok(packet)
    }

    pub fn check_len(&self) -> Result<()> {
        if self.buffer.as_ref().len() < HEADER_LEN {
            Err(Error)
        } else {
            Ok(())
        }
    }

    pub fn hardware_type(&self) -> Hardware {
        Hardware::from(NetworkEndian::read_u16(&self.buffer.as_ref()[field::HTYPE]))
    }

    pub fn protocol_type(&self) -> Protocol {
        Protocol::from(NetworkEndian::read_u16(&self.buffer.as_ref()[field::PTYPE]))
    }

    pub fn hardware_len(&self) -> u8 {
        self.buffer.as_ref()[field::HLEN]
    }

    pub fn protocol_len(&self) -> u8 {
        self.buffer.as_ref()[field::PLEN]
    }

    pub fn operation(&self) -> Operation {
        Operation::from(NetworkEndian::read_u16(&self.buffer.as_ref()[field::OPER]))
    }

    pub fn source_hardware_addr(&self) -> &[u8] {
        &self.buffer.as_ref()[field::SHA]
    }

    pub fn source_protocol_addr(&self) -> &[u8] {
        &self.buffer.as_ref()[field::SPA]
    }

    pub fn target_hardware_addr(&self) -> &[u8] {
        &self.buffer.as_ref()[field::THA]
    }

    pub fn target_protocol_addr(&self) -> &[u8] {
        &self.buffer.as_ref()[field::TPA]
    }
}

impl<T: AsRef<[u8]> + AsMut<[u8]>> Packet<T> {
    pub fn set_hardware_type(&mut self, value: Hardware) {
        NetworkEndian::write_u16(&mut self.buffer.as_mut()[field::HTYPE], value.into());
    }

    pub fn set_protocol_type(&mut self, value: Protocol) {
        NetworkEndian::write_u16(&mut self.buffer.as_mut()[field::PTYPE], value.into());
    }

    pub fn set_hardware_len(&mut self, value: u8) {
        self.buffer.as_mut()[field::HLEN] = value;
    }

    pub fn set_protocol_len(&mut self, value: u8) {
        self.buffer.as_mut()[field::PLEN] = value;
    }

    pub fn set_operation(&mut self, value: Operation) {
        NetworkEndian::write_u16(&mut self.buffer.as_mut()[field::OPER], value.into());
    }

    pub fn set_source_hardware_addr(&mut self, value: &[u8]) {
        self.buffer.as_mut()[field::SHA].copy_from_slice(value);
    }

    pub fn set_source_protocol_addr(&mut self, value: &[u8]) {
        self.buffer.as_mut()[field::SPA].copy_from_slice(value);
    }

    pub fn set_target_hardware_addr(&mut self, value: &[u8]) {
        self.buffer.as_mut()[field::THA].copy_from_slice(value);
    }

    pub fn set_target_protocol_addr(&mut self, value: &[u8]) {
        self.buffer.as_mut()[field::TPA].copy_from_slice(value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let repr = Repr {
            operation: Operation::Request,
            source_hardware_addr: EthernetAddress([1, 2, 3, 4, 5, 6]),
            source_protocol_addr: Ipv4Address::new(192, 168, 1, 2),
            target_hardware_addr: EthernetAddress::default(),
            target_protocol_addr: Ipv4Address::new(192, 168, 1, 50),
        };
        let mut buf = [0u8; HEADER_LEN];
        let mut packet = Packet::new_unchecked(&mut buf[..]);
        repr.emit(&mut packet);
        let packet = Packet::new_checked(&buf[..]).unwrap();
        assert_eq!(Repr::parse(&packet).unwrap(), repr);
    }
}
