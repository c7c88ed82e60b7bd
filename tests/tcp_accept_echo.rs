//! A passive-open connection completes the three-way handshake and echoes
//! back whatever payload the peer sends.

#[path = "support/mod.rs"]
mod support;

use tapip::wire::tcp::Flags as TcpFlags;
use tapip::wire::{EthernetFrame, Ipv4Packet, TcpPacket, TcpSeqNumber};
use tapip::{AppCallback, AppFlags, AppHandle, ConnKind, Instant, TcpSlot, UdpSlot};

struct EchoApp;

impl AppCallback for EchoApp {
    fn on_event(&mut self, _conn: ConnKind, flags: AppFlags, handle: &mut AppHandle) {
        if flags.contains(AppFlags::NEWDATA) {
            let mut copy = [0u8; 64];
            let n = handle.payload().len();
            copy[..n].copy_from_slice(handle.payload());
            handle.send_slice(&copy[..n]);
        }
    }
}

#[test]
fn passive_open_handshake_then_echo() {
    let mut tcp_listen = [0u16; 1];
    let mut tcp_slots = [TcpSlot::<()>::default(); 1];
    let mut udp_slots = [UdpSlot::<()>::default(); 1];
    let mut stack = support::new_stack(&mut tcp_listen, &mut tcp_slots, &mut udp_slots);
    stack.tcp_mut().listen(80);

    let client_isn = 1000u32;
    let syn = support::tcp_segment(
        support::PEER_MAC,
        support::HOST_MAC,
        support::PEER_IP,
        support::HOST_IP,
        5555,
        80,
        client_isn,
        0,
        TcpFlags::SYN,
        4096,
        Some(1460),
        &[],
    );
    stack.device_mut().inject(&syn);
    stack.poll_rx(Instant::ZERO, &mut EchoApp);

    let syn_ack = stack.device_mut().take_transmitted().expect("no SYN+ACK sent");
    let eth = EthernetFrame::new_checked(syn_ack.as_slice()).unwrap();
    let ip = Ipv4Packet::new_checked(eth.payload()).unwrap();
    let tcp = TcpPacket::new_checked(ip.payload()).unwrap();
    assert_eq!(tcp.flags(), TcpFlags::SYN | TcpFlags::ACK);
    assert_eq!(tcp.ack_number(), TcpSeqNumber(client_isn + 1));
    let server_isn = tcp.seq_number().0;

    let ack = support::tcp_segment(
        support::PEER_MAC,
        support::HOST_MAC,
        support::PEER_IP,
        support::HOST_IP,
        5555,
        80,
        client_isn + 1,
        server_isn.wrapping_add(1),
        TcpFlags::ACK,
        4096,
        None,
        &[],
    );
    stack.device_mut().inject(&ack);
    stack.poll_rx(Instant::from_millis(10), &mut EchoApp);
    assert!(stack.device_mut().take_transmitted().is_none(), "a bare handshake ACK needs no reply");

    let data = support::tcp_segment(
        support::PEER_MAC,
        support::HOST_MAC,
        support::PEER_IP,
        support::HOST_IP,
        5555,
        80,
        client_isn + 1,
        server_isn.wrapping_add(1),
        TcpFlags::PSH | TcpFlags::ACK,
        4096,
        None,
        b"ping",
    );
    stack.device_mut().inject(&data);
    stack.poll_rx(Instant::from_millis(20), &mut EchoApp);

    let echoed = stack.device_mut().take_transmitted().expect("no echo sent back");
    let eth = EthernetFrame::new_checked(echoed.as_slice()).unwrap();
    let ip = Ipv4Packet::new_checked(eth.payload()).unwrap();
    let tcp = TcpPacket::new_checked(ip.payload()).unwrap();
    assert!(tcp.flags().contains(TcpFlags::PSH));
    assert_eq!(tcp.payload(), b"ping");
    assert_eq!(tcp.seq_number(), TcpSeqNumber(server_isn.wrapping_add(1)));
    assert_eq!(tcp.ack_number(), TcpSeqNumber(client_isn + 1 + 4));
}
