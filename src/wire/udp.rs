use byteorder::{ByteOrder, NetworkEndian};

use super::ipv4::Address as Ipv4Address;
use super::{Error, IpProtocol, Result};
use crate::checksum;

mod field {
    use crate::wire::field::*;
    pub const SRC_PORT: Field = 0..2;
    pub const DST_PORT: Field = 2..4;
    pub const LENGTH: Field = 4..6;
    pub const CHECKSUM: Field = 6..8;
    pub const PAYLOAD: Rest = 8..;
}

pub const HEADER_LEN: usize = field::PAYLOAD.start;

/// A read/write wrapper around a UDP datagram buffer (RFC 768).
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
        let len = self.buffer.as_ref().len();
        if len < HEADER_LEN || len < self.len() as usize {
            Err(Error)
        } else {
            Ok(())
        }
    }

    pub fn src_port(&self) -> u16 {
        NetworkEndian::read_u16(&self.buffer.as_ref()[field::SRC_PORT])
    }

    pub fn dst_port(&self) -> u16 {
        NetworkEndian::read_u16(&self.buffer.as_ref()[field::DST_PORT])
    }

    pub fn len(&self) -> u16 {
        NetworkEndian::read_u16(&self.buffer.as_ref()[field::LENGTH])
    }

    pub fn checksum(&self) -> u16 {
        NetworkEndian::read_u16(&self.buffer.as_ref()[field::CHECKSUM])
    }

    pub fn payload(&self) -> &[u8] {
        let len = self.len() as usize;
        &self.buffer.as_ref()[field::PAYLOAD.start..len]
    }

    /// Verify the optional checksum against an IPv4 pseudo-header. A
    /// transmitted checksum of zero means "checksum not computed" (RFC 768)
    /// and is always accepted.
    pub fn verify_checksum_v4(&self, src: Ipv4Address, dst: Ipv4Address) -> bool {
        if self.checksum() == 0 {
            return true;
        }
        let data = &self.buffer.as_ref()[..self.len() as usize];
        let pseudo = checksum::pseudo_header_v4(
            &src.octets(),
            &dst.octets(),
            IpProtocol::Udp.into(),
            self.len(),
        );
        checksum::combine(&[pseudo, checksum::accumulate(data)]) == 0
    }
}

impl<T: AsRef<[u8]> + AsMut<[u8]>> Packet<T> {
    pub fn set_src_port(&mut self, value: u16) {
        NetworkEndian::write_u16(&mut self.buffer.as_mut()[field::SRC_PORT], value);
    }

    pub fn set_dst_port(&mut self, value: u16) {
        NetworkEndian::write_u16(&mut self.buffer.as_mut()[field::DST_PORT], value);
    }

    pub fn set_len(&mut self, value: u16) {
        NetworkEndian::write_u16(&mut self.buffer.as_mut()[field::LENGTH], value);
    }

    pub fn set_checksum(&mut self, value: u16) {
        NetworkEndian::write_u16(&mut self.buffer.as_mut()[field::CHECKSUM], value);
    }

    pub fn payload_mut(&mut self) -> &mut [u8] {
        let len = self.len() as usize;
        &mut self.buffer.as_mut()[field::PAYLOAD.start..len]
    }

    /// Compute and fill in the checksum. If the resulting ones'-complement sum
    /// would be the reserved "no checksum" value 0x0000, it is transmitted as
    /// 0xffff instead (RFC 768).
    pub fn fill_checksum_v4(&mut self, src: Ipv4Address, dst: Ipv4Address) {
        self.set_checksum(0);
        let len = self.len();
        let pseudo = checksum::pseudo_header_v4(&src.octets(), &dst.octets(), IpProtocol::Udp.into(), len);
        let data = checksum::accumulate(&self.buffer.as_mut()[..len as usize]);
        let sum = checksum::combine(&[pseudo, data]);
        self.set_checksum(if sum == 0 { 0xffff } else { sum });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checksum_round_trip() {
        let payload = b"PING";
        let mut buf = [0u8; HEADER_LEN + 4];
        let mut p = Packet::new_unchecked(&mut buf[..]);
        p.set_src_port(1234);
        p.set_dst_port(7);
        p.set_len((HEADER_LEN + 4) as u16);
        p.payload_mut().copy_from_slice(payload);
        let src = Ipv4Address::new(192, 168, 1, 2);
        let dst = Ipv4Address::new(192, 168, 1, 50);
        p.fill_checksum_v4(src, dst);
        let p = Packet::new_checked(&buf[..]).unwrap();
        assert!(p.verify_checksum_v4(src, dst));
    }
}
