//! A data segment that never gets acknowledged is retransmitted with
//! exponential backoff until `MAXRTX` attempts are exhausted, at which point
//! the connection is dropped and the application is told why.

#[path = "support/mod.rs"]
mod support;

use tapip::wire::tcp::Flags as TcpFlags;
use tapip::wire::{EthernetFrame, Ipv4Packet, TcpPacket, TcpSeqNumber};
use tapip::{
    AppCallback, AppFlags, AppHandle, ConnKind, Instant, TcpCloseReason, TcpSlot, TcpState, UdpSlot,
};

#[derive(Default)]
struct SendOnceApp {
    timed_out: bool,
}

impl AppCallback for SendOnceApp {
    fn on_event(&mut self, _conn: ConnKind, flags: AppFlags, handle: &mut AppHandle) {
        if flags.contains(AppFlags::CONNECTED) {
            handle.send_slice(b"payload");
        }
        if flags.contains(AppFlags::TIMEDOUT) {
            self.timed_out = true;
        }
    }
}

#[test]
fn unacked_data_is_retransmitted_then_the_connection_times_out() {
    let mut tcp_listen = [0u16; 1];
    let mut tcp_slots = [TcpSlot::<()>::default(); 1];
    let mut udp_slots = [UdpSlot::<()>::default(); 1];
    let mut stack = support::new_stack(&mut tcp_listen, &mut tcp_slots, &mut udp_slots);
    let mut app = SendOnceApp::default();

    let idx = stack.connect(support::PEER_IP, 80, 49152).unwrap();

    // ARP round trip, then the SYN goes out.
    stack.poll_timer(idx, Instant::from_millis(0), &mut app);
    stack.device_mut().take_transmitted();
    let arp_reply = support::arp_reply(support::PEER_MAC, support::PEER_IP, support::HOST_MAC, support::HOST_IP);
    stack.device_mut().inject(&arp_reply);
    stack.poll_rx(Instant::from_millis(1), &mut app);
    stack.poll_timer(idx, Instant::from_millis(2), &mut app);
    let syn_out = stack.device_mut().take_transmitted().expect("no SYN sent");
    let client_isn = {
        let eth = EthernetFrame::new_checked(syn_out.as_slice()).unwrap();
        let ip = Ipv4Packet::new_checked(eth.payload()).unwrap();
        TcpPacket::new_checked(ip.payload()).unwrap().seq_number()
    };

    // Server replies SYN+ACK; the client completes the handshake and the app
    // immediately queues its one send.
    let server_isn = 9000u32;
    let syn_ack = support::tcp_segment(
        support::PEER_MAC,
        support::HOST_MAC,
        support::PEER_IP,
        support::HOST_IP,
        80,
        49152,
        server_isn,
        (client_isn + 1).0,
        TcpFlags::SYN | TcpFlags::ACK,
        4096,
        Some(1460),
        &[],
    );
    stack.device_mut().inject(&syn_ack);
    stack.poll_rx(Instant::from_millis(3), &mut app);

    let data_out = stack.device_mut().take_transmitted().expect("no data segment sent");
    let eth = EthernetFrame::new_checked(data_out.as_slice()).unwrap();
    let ip = Ipv4Packet::new_checked(eth.payload()).unwrap();
    let tcp = TcpPacket::new_checked(ip.payload()).unwrap();
    assert!(tcp.flags().contains(TcpFlags::ACK));
    assert_eq!(tcp.payload(), b"payload");
    assert_eq!(tcp.seq_number(), TcpSeqNumber(server_isn.wrapping_add(1)));

    // Nothing ever acknowledges it: keep polling the timer and count how many
    // times the same bytes get retransmitted before the connection gives up.
    let mut retransmits = 0u32;
    let mut now = 10i64;
    for _ in 0..2000 {
        stack.poll_timer(idx, Instant::from_millis(now), &mut app);
        now += 1;
        if app.timed_out {
            break;
        }
        if let Some(frame) = stack.device_mut().take_transmitted() {
            let eth = EthernetFrame::new_checked(frame.as_slice()).unwrap();
            let ip = Ipv4Packet::new_checked(eth.payload()).unwrap();
            let tcp = TcpPacket::new_checked(ip.payload()).unwrap();
            assert_eq!(tcp.payload(), b"payload");
            retransmits += 1;
        }
    }

    assert!(app.timed_out, "connection never timed out");
    assert_eq!(retransmits, u32::from(tapip::socket::tcp::MAXRTX));
    assert_eq!(stack.stats().tcp_rexmit, u32::from(tapip::socket::tcp::MAXRTX));
    assert_eq!(stack.stats().tcp_timeout, 1);
    assert_eq!(stack.tcp().slot(idx).state(), TcpState::Closed);
    assert_eq!(stack.tcp().slot(idx).close_reason(), TcpCloseReason::TimedOut);
}
