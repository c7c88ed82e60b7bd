/*! Low-level packet access.

A `Packet<T>` family of zero-copy accessor structs over `T: AsRef<[u8]>` (or
`AsMut<[u8]>` for setters), plus a handful of `Repr` structs for the
protocols (ARP, ICMP) where a compact high-level value is more convenient
than poking at a byte buffer directly.

Every accessor here is built so that once `Packet::new_checked` has returned
`Ok`, no accessor on that packet may panic — the dispatcher's in-place
rewrite discipline depends on header parsing never unwinding mid-dispatch.
*/

mod field {
    pub type Field = ::core::ops::Range<usize>;
    pub type Rest = ::core::ops::RangeFrom<usize>;
}

use core::fmt;

pub mod arp;
pub mod ethernet;
pub mod icmpv4;
pub mod ip;
pub mod ipv4;
pub mod tcp;
pub mod udp;

pub use self::arp::{
    Operation as ArpOperation, Packet as ArpPacket, Repr as ArpRepr, HEADER_LEN as ARP_HEADER_LEN,
};
pub use self::ethernet::{
    Address as EthernetAddress, EtherType as EthernetProtocol, Frame as EthernetFrame,
    HEADER_LEN as ETHERNET_HEADER_LEN,
};
pub use self::icmpv4::{Message as Icmpv4Message, Packet as Icmpv4Packet};
pub use self::ip::Protocol as IpProtocol;
pub use self::ipv4::{
    Address as Ipv4Address, Cidr as Ipv4Cidr, Packet as Ipv4Packet, HEADER_LEN as IPV4_HEADER_LEN,
};
pub use self::tcp::{
    Packet as TcpPacket, SeqNumber as TcpSeqNumber, HEADER_LEN as TCP_HEADER_LEN,
    MSS_OPTION_LEN as TCP_MSS_OPTION_LEN,
};
pub use self::udp::{Packet as UdpPacket, HEADER_LEN as UDP_HEADER_LEN};

/// Parsing a packet failed: either it is truncated/malformed, or a field holds
/// a value this stack does not support. Never carries a payload — every parse
/// failure is handled the same way, by the dispatcher dropping the frame and
/// incrementing a counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Error;

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "truncated or malformed packet")
    }
}

impl core::error::Error for Error {}

pub type Result<T> = core::result::Result<T, Error>;
