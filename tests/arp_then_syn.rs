//! An active open to a peer with no cached ARP entry first provokes an ARP
//! request; only once the reply is delivered does the SYN actually go out.

#[path = "support/mod.rs"]
mod support;

use tapip::wire::tcp::Flags as TcpFlags;
use tapip::wire::{ArpOperation, ArpPacket, ArpRepr, EthernetFrame, EthernetProtocol, Ipv4Packet, TcpPacket};
use tapip::{Instant, NullApp, TcpSlot, UdpSlot};

#[test]
fn connect_resolves_arp_before_sending_syn() {
    let mut tcp_listen = [0u16; 1];
    let mut tcp_slots = [TcpSlot::<()>::default(); 1];
    let mut udp_slots = [UdpSlot::<()>::default(); 1];
    let mut stack = support::new_stack(&mut tcp_listen, &mut tcp_slots, &mut udp_slots);

    let idx = stack.connect(support::PEER_IP, 80, 49152).expect("connect table full");

    // First tick: peer MAC unknown, so the timer poll only emits an ARP
    // request and leaves the connection's retransmission state untouched.
    stack.poll_timer(idx, Instant::from_millis(0), &mut NullApp);
    let arp_out = stack.device_mut().take_transmitted().expect("no ARP request sent");
    let eth = EthernetFrame::new_checked(arp_out.as_slice()).unwrap();
    assert_eq!(eth.ethertype(), EthernetProtocol::Arp);
    let arp = ArpRepr::parse(&ArpPacket::new_checked(eth.payload()).unwrap()).unwrap();
    assert_eq!(arp.operation, ArpOperation::Request);
    assert_eq!(arp.source_protocol_addr, support::HOST_IP);
    assert_eq!(arp.target_protocol_addr, support::PEER_IP);
    assert_eq!(stack.stats().tcp_rexmit, 0);

    // Deliver the ARP reply.
    let reply = support::arp_reply(support::PEER_MAC, support::PEER_IP, support::HOST_MAC, support::HOST_IP);
    stack.device_mut().inject(&reply);
    stack.poll_rx(Instant::from_millis(10), &mut NullApp);
    assert!(stack.device_mut().take_transmitted().is_none());

    // Second tick: peer MAC now cached, so this attempt sends the SYN.
    stack.poll_timer(idx, Instant::from_millis(20), &mut NullApp);
    let syn_out = stack.device_mut().take_transmitted().expect("no SYN sent after ARP resolved");
    let eth = EthernetFrame::new_checked(syn_out.as_slice()).unwrap();
    assert_eq!(eth.dst_addr(), support::PEER_MAC);
    let ip = Ipv4Packet::new_checked(eth.payload()).unwrap();
    assert_eq!(ip.dst_addr(), support::PEER_IP);
    let tcp = TcpPacket::new_checked(ip.payload()).unwrap();
    assert_eq!(tcp.flags(), TcpFlags::SYN);
    assert_eq!(tcp.dst_port(), 80);
    assert_eq!(tcp.src_port(), 49152);
    assert!(tcp.mss_option().is_some());
}
