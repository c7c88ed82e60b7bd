//! Frame-building helpers shared by the integration tests. Every test drives
//! a `Stack<Loopback, _>` end to end: inject raw bytes, call a `poll_*`
//! method, and inspect whatever `Loopback` captured.

use tapip::wire::tcp::Flags as TcpFlags;
use tapip::wire::{
    ArpOperation, ArpPacket, ArpRepr, EthernetAddress, EthernetFrame, EthernetProtocol,
    Icmpv4Message, Icmpv4Packet, IpProtocol, Ipv4Address, Ipv4Cidr, Ipv4Packet, TcpPacket,
    TcpSeqNumber, UdpPacket, ARP_HEADER_LEN, ETHERNET_HEADER_LEN, IPV4_HEADER_LEN, TCP_HEADER_LEN,
    TCP_MSS_OPTION_LEN, UDP_HEADER_LEN,
};
use tapip::{HostConfig, Stack, TcpSlot, TcpSockets, UdpSlot, UdpSockets};

pub const HOST_MAC: EthernetAddress = EthernetAddress([0x02, 0x00, 0x00, 0x00, 0x00, 0x01]);
pub const HOST_IP: Ipv4Address = Ipv4Address::new(10, 0, 0, 1);
pub const PEER_MAC: EthernetAddress = EthernetAddress([0x02, 0x00, 0x00, 0x00, 0x00, 0x02]);
pub const PEER_IP: Ipv4Address = Ipv4Address::new(10, 0, 0, 2);

pub const MAX_FRAME_LEN: usize = tapip::iface::MAX_FRAME_LEN;

pub fn host_config() -> HostConfig {
    HostConfig::new(Ipv4Cidr::new(HOST_IP, 24), HOST_MAC, MAX_FRAME_LEN)
}

pub type TestStack<'a> = Stack<'a, tapip::Loopback, ()>;

pub fn new_stack<'a>(
    tcp_listen: &'a mut [u16],
    tcp_slots: &'a mut [TcpSlot<()>],
    udp_slots: &'a mut [UdpSlot<()>],
) -> TestStack<'a> {
    let tcp = TcpSockets::new(&mut tcp_listen[..], &mut tcp_slots[..]);
    let udp = UdpSockets::new(&mut udp_slots[..]);
    Stack::new(tapip::Loopback::new(), host_config(), tcp, udp)
}

fn eth_ip_frame(
    src_mac: EthernetAddress,
    dst_mac: EthernetAddress,
    src_ip: Ipv4Address,
    dst_ip: Ipv4Address,
    protocol: IpProtocol,
    payload_len: usize,
    fill: impl FnOnce(&mut [u8]),
) -> Vec<u8> {
    let total = ETHERNET_HEADER_LEN + IPV4_HEADER_LEN + payload_len;
    let mut buf = vec![0u8; total];
    {
        let mut eth = EthernetFrame::new_unchecked(&mut buf[..]);
        eth.set_dst_addr(dst_mac);
        eth.set_src_addr(src_mac);
        eth.set_ethertype(EthernetProtocol::Ipv4);

        let mut ip = Ipv4Packet::new_unchecked(eth.payload_mut());
        ip.set_version(4);
        ip.set_header_len(IPV4_HEADER_LEN);
        ip.set_dscp(0);
        ip.set_total_len(IPV4_HEADER_LEN + payload_len);
        ip.set_ident(0);
        ip.set_flags_frag_offset(false, false, 0);
        ip.set_ttl(64);
        ip.set_protocol(protocol);
        ip.set_src_addr(src_ip);
        ip.set_dst_addr(dst_ip);
        fill(ip.payload_mut());
        ip.fill_checksum();
    }
    buf
}

pub fn arp_request(sender_mac: EthernetAddress, sender_ip: Ipv4Address, target_ip: Ipv4Address) -> Vec<u8> {
    let total = ETHERNET_HEADER_LEN + ARP_HEADER_LEN;
    let mut buf = vec![0u8; total];
    let mut eth = EthernetFrame::new_unchecked(&mut buf[..]);
    eth.set_dst_addr(EthernetAddress::BROADCAST);
    eth.set_src_addr(sender_mac);
    eth.set_ethertype(EthernetProtocol::Arp);
    let mut packet = ArpPacket::new_unchecked(eth.payload_mut());
    ArpRepr {
        operation: ArpOperation::Request,
        source_hardware_addr: sender_mac,
        source_protocol_addr: sender_ip,
        target_hardware_addr: EthernetAddress::default(),
        target_protocol_addr: target_ip,
    }
    .emit(&mut packet);
    buf
}

pub fn arp_reply(
    sender_mac: EthernetAddress,
    sender_ip: Ipv4Address,
    target_mac: EthernetAddress,
    target_ip: Ipv4Address,
) -> Vec<u8> {
    let total = ETHERNET_HEADER_LEN + ARP_HEADER_LEN;
    let mut buf = vec![0u8; total];
    let mut eth = EthernetFrame::new_unchecked(&mut buf[..]);
    eth.set_dst_addr(target_mac);
    eth.set_src_addr(sender_mac);
    eth.set_ethertype(EthernetProtocol::Arp);
    let mut packet = ArpPacket::new_unchecked(eth.payload_mut());
    ArpRepr {
        operation: ArpOperation::Reply,
        source_hardware_addr: sender_mac,
        source_protocol_addr: sender_ip,
        target_hardware_addr: target_mac,
        target_protocol_addr: target_ip,
    }
    .emit(&mut packet);
    buf
}

pub fn icmp_echo_request(
    src_mac: EthernetAddress,
    dst_mac: EthernetAddress,
    src_ip: Ipv4Address,
    dst_ip: Ipv4Address,
    ident: u16,
    seq_no: u16,
    data: &[u8],
) -> Vec<u8> {
    let icmp_len = 8 + data.len();
    eth_ip_frame(src_mac, dst_mac, src_ip, dst_ip, IpProtocol::Icmp, icmp_len, |payload| {
        let mut icmp = Icmpv4Packet::new_unchecked(payload);
        icmp.set_msg_type(Icmpv4Message::EchoRequest);
        icmp.set_msg_code(0);
        icmp.set_echo_ident(ident);
        icmp.set_echo_seq_no(seq_no);
        icmp.payload_mut().copy_from_slice(data);
        icmp.fill_checksum();
    })
}

#[allow(clippy::too_many_arguments)]
pub fn tcp_segment(
    src_mac: EthernetAddress,
    dst_mac: EthernetAddress,
    src_ip: Ipv4Address,
    dst_ip: Ipv4Address,
    src_port: u16,
    dst_port: u16,
    seq: u32,
    ack: u32,
    flags: TcpFlags,
    window: u16,
    mss_option: Option<u16>,
    payload: &[u8],
) -> Vec<u8> {
    let header_len = TCP_HEADER_LEN + if mss_option.is_some() { TCP_MSS_OPTION_LEN } else { 0 };
    let tcp_len = header_len + payload.len();
    eth_ip_frame(src_mac, dst_mac, src_ip, dst_ip, IpProtocol::Tcp, tcp_len, |ip_payload| {
        let mut tcp = TcpPacket::new_unchecked(ip_payload);
        tcp.set_src_port(src_port);
        tcp.set_dst_port(dst_port);
        tcp.set_seq_number(TcpSeqNumber(seq));
        tcp.set_ack_number(TcpSeqNumber(ack));
        tcp.set_header_len(header_len);
        tcp.set_flags(flags);
        tcp.set_window_len(window);
        tcp.set_urgent_at(0);
        if let Some(mss) = mss_option {
            tcp.set_mss_option(mss);
        }
        tcp.payload_mut()[..payload.len()].copy_from_slice(payload);
        tcp.fill_checksum_v4(src_ip, dst_ip);
    })
}

pub fn udp_datagram(
    src_mac: EthernetAddress,
    dst_mac: EthernetAddress,
    src_ip: Ipv4Address,
    dst_ip: Ipv4Address,
    src_port: u16,
    dst_port: u16,
    payload: &[u8],
) -> Vec<u8> {
    let udp_len = UDP_HEADER_LEN + payload.len();
    eth_ip_frame(src_mac, dst_mac, src_ip, dst_ip, IpProtocol::Udp, udp_len, |ip_payload| {
        let mut udp = UdpPacket::new_unchecked(ip_payload);
        udp.set_src_port(src_port);
        udp.set_dst_port(dst_port);
        udp.set_len(udp_len as u16);
        udp.payload_mut().copy_from_slice(payload);
        udp.fill_checksum_v4(src_ip, dst_ip);
    })
}
