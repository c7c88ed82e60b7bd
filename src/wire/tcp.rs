use byteorder::{ByteOrder, NetworkEndian};
use core::cmp::Ordering;
use core::fmt;
use core::ops;

use super::ipv4::Address as Ipv4Address;
use super::{Error, IpProtocol, Result};
use crate::checksum;

/// A TCP sequence number.
///
/// Arithmetic and comparisons on sequence numbers wrap modulo 2^32, per RFC
/// 793 §3.3: the difference of two sequence numbers is computed as a signed
/// 32-bit quantity, so numbers within 2^31 "ahead" of each other compare
/// correctly across the wraparound boundary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SeqNumber(pub u32);

impl fmt::Display for SeqNumber {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl ops::Add<usize> for SeqNumber {
    type Output = SeqNumber;
    fn add(self, rhs: usize) -> SeqNumber {
        SeqNumber(self.0.wrapping_add(rhs as u32))
    }
}

impl ops::Sub<usize> for SeqNumber {
    type Output = SeqNumber;
    fn sub(self, rhs: usize) -> SeqNumber {
        SeqNumber(self.0.wrapping_sub(rhs as u32))
    }
}

/// `self - rhs`, as a signed distance. Negative means `self` is "behind" `rhs`.
impl ops::Sub<SeqNumber> for SeqNumber {
    type Output = i32;
    fn sub(self, rhs: SeqNumber) -> i32 {
        self.0.wrapping_sub(rhs.0) as i32
    }
}

impl PartialOrd for SeqNumber {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SeqNumber {
    fn cmp(&self, other: &Self) -> Ordering {
        (*self - *other).cmp(&0)
    }
}

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Flags: u8 {
        const FIN = 0x01;
        const SYN = 0x02;
        const RST = 0x04;
        const PSH = 0x08;
        const ACK = 0x10;
        const URG = 0x20;
    }
}

mod field {
    use crate::wire::field::*;
    pub const SRC_PORT: Field = 0..2;
    pub const DST_PORT: Field = 2..4;
    pub const SEQ_NUM: Field = 4..8;
    pub const ACK_NUM: Field = 8..12;
    pub const FLAGS: usize = 13;
    pub const DATA_OFF: usize = 12;
    pub const WINDOW: Field = 14..16;
    pub const CHECKSUM: Field = 16..18;
    pub const URGENT: Field = 18..20;
}

pub const HEADER_LEN: usize = 20;

/// The TCP MSS option: kind 2, length 4, followed by a 16-bit value. This
/// stack emits and understands no other TCP option.
pub const MSS_OPTION_LEN: usize = 4;

/// A read/write wrapper around a TCP segment buffer (RFC 793).
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
        if len < HEADER_LEN || len < self.header_len() {
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

    pub fn seq_number(&self) -> SeqNumber {
        SeqNumber(NetworkEndian::read_u32(&self.buffer.as_ref()[field::SEQ_NUM]))
    }

    pub fn ack_number(&self) -> SeqNumber {
        SeqNumber(NetworkEndian::read_u32(&self.buffer.as_ref()[field::ACK_NUM]))
    }

    pub fn header_len(&self) -> usize {
        ((self.buffer.as_ref()[field::DATA_OFF] >> 4) as usize) * 4
    }

    pub fn flags(&self) -> Flags {
        Flags::from_bits_truncate(self.buffer.as_ref()[field::FLAGS] & 0x3f)
    }

    pub fn window_len(&self) -> u16 {
        NetworkEndian::read_u16(&self.buffer.as_ref()[field::WINDOW])
    }

    pub fn checksum(&self) -> u16 {
        NetworkEndian::read_u16(&self.buffer.as_ref()[field::CHECKSUM])
    }

    pub fn urgent_at(&self) -> u16 {
        NetworkEndian::read_u16(&self.buffer.as_ref()[field::URGENT])
    }

    /// Scan the options area for an MSS option. MSS is the only option this
    /// stack parses, and only meaningfully on SYN segments.
    pub fn mss_option(&self) -> Option<u16> {
        let data = self.buffer.as_ref();
        let mut options = &data[HEADER_LEN..self.header_len()];
        while !options.is_empty() {
            match options[0] {
                0 => break,                    // end of option list
                1 => options = &options[1..],  // no-op
                2 if options.len() >= 4 => {
                    return Some(NetworkEndian::read_u16(&options[2..4]));
                }
                2 => break,
                kind => {
                    if options.len() < 2 {
                        break;
                    }
                    let len = options[1] as usize;
                    if len < 2 || len > options.len() {
                        break;
                    }
                    let _ = kind;
                    options = &options[len..];
                }
            }
        }
        None
    }

    pub fn payload(&self) -> &[u8] {
        &self.buffer.as_ref()[self.header_len()..]
    }

    pub fn verify_checksum_v4(&self, src: Ipv4Address, dst: Ipv4Address) -> bool {
        let data = self.buffer.as_ref();
        let pseudo =
            checksum::pseudo_header_v4(&src.octets(), &dst.octets(), IpProtocol::Tcp.into(), data.len() as u16);
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

    pub fn set_seq_number(&mut self, value: SeqNumber) {
        NetworkEndian::write_u32(&mut self.buffer.as_mut()[field::SEQ_NUM], value.0);
    }

    pub fn set_ack_number(&mut self, value: SeqNumber) {
        NetworkEndian::write_u32(&mut self.buffer.as_mut()[field::ACK_NUM], value.0);
    }

    pub fn set_header_len(&mut self, value: usize) {
        self.buffer.as_mut()[field::DATA_OFF] = ((value / 4) as u8) << 4;
    }

    pub fn set_flags(&mut self, value: Flags) {
        self.buffer.as_mut()[field::FLAGS] = value.bits();
    }

    pub fn set_window_len(&mut self, value: u16) {
        NetworkEndian::write_u16(&mut self.buffer.as_mut()[field::WINDOW], value);
    }

    pub fn set_checksum(&mut self, value: u16) {
        NetworkEndian::write_u16(&mut self.buffer.as_mut()[field::CHECKSUM], value);
    }

    pub fn set_urgent_at(&mut self, value: u16) {
        NetworkEndian::write_u16(&mut self.buffer.as_mut()[field::URGENT], value);
    }

    /// Emit a single MSS option filling the options area; `header_len` must
    /// already be set to `HEADER_LEN + MSS_OPTION_LEN`.
    pub fn set_mss_option(&mut self, mss: u16) {
        let data = self.buffer.as_mut();
        data[HEADER_LEN] = 2;
        data[HEADER_LEN + 1] = 4;
        NetworkEndian::write_u16(&mut data[HEADER_LEN + 2..HEADER_LEN + 4], mss);
    }

    pub fn clear_options(&mut self) {
        let header_len = self.header_len();
        for b in &mut self.buffer.as_mut()[HEADER_LEN..header_len] {
            *b = 0;
        }
    }

    pub fn payload_mut(&mut self) -> &mut [u8] {
        let header_len = self.header_len();
        &mut self.buffer.as_mut()[header_len..]
    }

    pub fn fill_checksum_v4(&mut self, src: Ipv4Address, dst: Ipv4Address) {
        self.set_checksum(0);
        let len = self.buffer.as_mut().len() as u16;
        let pseudo = checksum::pseudo_header_v4(&src.octets(), &dst.octets(), IpProtocol::Tcp.into(), len);
        let data = checksum::accumulate(self.buffer.as_mut());
        self.set_checksum(checksum::combine(&[pseudo, data]));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seq_wraparound_ordering() {
        let a = SeqNumber(0xffff_fff0);
        let b = SeqNumber(0x0000_0010);
        assert!(a < b); // b is 32 ahead of a, across the wrap
        assert_eq!(b - a, 32);
        assert!(b > a);
    }

    #[test]
    fn seq_arithmetic_does_not_panic_near_boundary() {
        let s = SeqNumber(u32::MAX);
        assert_eq!((s + 1).0, 0);
        assert_eq!((s - 1).0, u32::MAX - 1);
    }

    #[test]
    fn mss_option_parses() {
        let mut buf = [0u8; HEADER_LEN + MSS_OPTION_LEN];
        let mut p = Packet::new_unchecked(&mut buf[..]);
        p.set_header_len(HEADER_LEN + MSS_OPTION_LEN);
        p.set_mss_option(1460);
        let p = Packet::new_checked(&buf[..]).unwrap();
        assert_eq!(p.mss_option(), Some(1460));
    }

    #[test]
    fn flags_round_trip() {
        let mut buf = [0u8; HEADER_LEN];
        let mut p = Packet::new_unchecked(&mut buf[..]);
        p.set_header_len(HEADER_LEN);
        p.set_flags(Flags::SYN | Flags::ACK);
        let p = Packet::new_checked(&buf[..]).unwrap();
        assert!(p.flags().contains(Flags::SYN));
        assert!(p.flags().contains(Flags::ACK));
        assert!(!p.flags().contains(Flags::FIN));
    }
}
