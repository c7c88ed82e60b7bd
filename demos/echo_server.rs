//! Wires a `Device` impl to a `Stack` and walks a TCP conversation through
//! it end to end, printing every frame the stack hands to the driver.
//!
//! No real network device ships with this crate (the link-layer driver is
//! out of scope), so this demo plays both ends: it drives the `Stack` as
//! the listening endpoint and, each time the stack emits a frame, hands a
//! scripted peer response back in. That's enough to see the ARP, TCP
//! handshake, and echo traffic the core actually produces.
//!
//! ```text
//! cargo run --bin echo-server -- --port 7777
//! ```

mod options;

use std::process;

use tapip::wire::tcp::Flags as TcpFlags;
use tapip::wire::{EthernetAddress, EthernetFrame, Ipv4Address, Ipv4Cidr, Ipv4Packet, TcpPacket, TcpSeqNumber};
use tapip::{AppCallback, AppFlags, AppHandle, ConnKind, HostConfig, Instant, Loopback, Stack, TcpSlot, TcpSockets, UdpSlot, UdpSockets};

const HOST_MAC: EthernetAddress = EthernetAddress([0x02, 0x00, 0x00, 0x00, 0x00, 0x01]);
const PEER_MAC: EthernetAddress = EthernetAddress([0x02, 0x00, 0x00, 0x00, 0x00, 0x02]);
const PEER_IP: Ipv4Address = Ipv4Address::new(10, 0, 0, 2);

struct EchoApp;

impl AppCallback for EchoApp {
    fn on_event(&mut self, conn: ConnKind, flags: AppFlags, handle: &mut AppHandle) {
        if flags.contains(AppFlags::NEWDATA) {
            let mut copy = [0u8; 128];
            let n = handle.payload().len();
            copy[..n].copy_from_slice(handle.payload());
            println!("  [app] {:?} got {} bytes, echoing", conn, n);
            handle.send_slice(&copy[..n]);
        }
        if flags.contains(AppFlags::CONNECTED) {
            println!("  [app] {:?} connected", conn);
        }
    }
}

fn main() {
    let opts = options::parse(std::env::args().skip(1)).unwrap_or_else(|err| {
        eprintln!("echo-server: {err}");
        process::exit(2);
    });
    if opts.help {
        print!("{}", options::usage());
        return;
    }
    options::setup_logging(&opts.log_level);

    let host_ip = Ipv4Address::new(10, 0, 0, 1);
    let config = HostConfig::new(Ipv4Cidr::new(host_ip, 24), HOST_MAC, tapip::iface::MAX_FRAME_LEN);

    let mut tcp_listen = [0u16; 4];
    let mut tcp_slots = [TcpSlot::<()>::default(); 4];
    let mut udp_slots = [UdpSlot::<()>::default(); 4];
    let tcp = TcpSockets::new(&mut tcp_listen[..], &mut tcp_slots[..]);
    let udp = UdpSockets::new(&mut udp_slots[..]);
    let mut stack = Stack::new(Loopback::new(), config, tcp, udp);
    stack.tcp_mut().listen(opts.port);

    println!("listening on port {} ({})", opts.port, host_ip);

    let mut app = EchoApp;
    let mut now = 0i64;
    let client_isn = u32::from(rand::random::<u16>()) | 0x1000_0000;

    let syn = scripted_syn(client_isn, opts.port);
    println!("-> peer SYN (seq={client_isn})");
    stack.device_mut().inject(&syn);
    step(&mut stack, &mut app, &mut now);

    let Some(syn_ack) = stack.device_mut().take_transmitted() else {
        eprintln!("echo-server: stack produced no SYN+ACK, aborting demo");
        process::exit(1);
    };
    let server_isn = extract_seq(&syn_ack);
    println!("<- host SYN+ACK (seq={server_isn})");

    let ack = scripted_ack(client_isn + 1, TcpSeqNumber(server_isn.wrapping_add(1)), opts.port, TcpFlags::ACK, &[]);
    println!("-> peer ACK");
    stack.device_mut().inject(&ack);
    step(&mut stack, &mut app, &mut now);
    stack.device_mut().take_transmitted();

    for line in &opts.lines {
        let data = scripted_ack(
            client_isn + 1,
            TcpSeqNumber(server_isn.wrapping_add(1)),
            opts.port,
            TcpFlags::PSH | TcpFlags::ACK,
            line.as_bytes(),
        );
        println!("-> peer data {line:?}");
        stack.device_mut().inject(&data);
        step(&mut stack, &mut app, &mut now);
        if let Some(echoed) = stack.device_mut().take_transmitted() {
            let ip = Ipv4Packet::new_checked(&echoed.as_slice()[14..]).unwrap();
            let tcp = TcpPacket::new_checked(ip.payload()).unwrap();
            println!("<- host echo {:?}", String::from_utf8_lossy(tcp.payload()));
        }
    }

    let stats = stack.stats();
    println!("done: {} stray resets, {} protocol errors", stats.reset_sent, stats.proto_err);
}

fn step(stack: &mut Stack<'_, Loopback, ()>, app: &mut EchoApp, now: &mut i64) {
    *now += 1;
    stack.poll_rx(Instant::from_millis(*now), app);
}

fn extract_seq(frame: &tapip::FrameBuf) -> u32 {
    let ip = Ipv4Packet::new_checked(&frame.as_slice()[14..]).unwrap();
    let tcp = TcpPacket::new_checked(ip.payload()).unwrap();
    tcp.seq_number().0
}

fn scripted_syn(seq: u32, dst_port: u16) -> Vec<u8> {
    build_tcp_frame(seq, TcpSeqNumber(0), dst_port, TcpFlags::SYN, &[])
}

fn scripted_ack(seq: u32, ack: TcpSeqNumber, dst_port: u16, flags: TcpFlags, payload: &[u8]) -> Vec<u8> {
    build_tcp_frame(seq, ack, dst_port, flags, payload)
}

fn build_tcp_frame(seq: u32, ack: TcpSeqNumber, dst_port: u16, flags: TcpFlags, payload: &[u8]) -> Vec<u8> {
    use tapip::wire::{EthernetProtocol, IpProtocol, ETHERNET_HEADER_LEN, IPV4_HEADER_LEN, TCP_HEADER_LEN};

    let has_mss = flags.contains(TcpFlags::SYN);
    let header_len = TCP_HEADER_LEN + if has_mss { 4 } else { 0 };
    let total = ETHERNET_HEADER_LEN + IPV4_HEADER_LEN + header_len + payload.len();
    let mut buf = vec![0u8; total];

    let mut eth = EthernetFrame::new_unchecked(&mut buf[..]);
    eth.set_dst_addr(HOST_MAC);
    eth.set_src_addr(PEER_MAC);
    eth.set_ethertype(EthernetProtocol::Ipv4);

    let mut ip = Ipv4Packet::new_unchecked(eth.payload_mut());
    ip.set_version(4);
    ip.set_header_len(IPV4_HEADER_LEN);
    ip.set_dscp(0);
    ip.set_total_len(IPV4_HEADER_LEN + header_len + payload.len());
    ip.set_ident(0);
    ip.set_flags_frag_offset(false, false, 0);
    ip.set_ttl(64);
    ip.set_protocol(IpProtocol::Tcp);
    ip.set_src_addr(PEER_IP);
    ip.set_dst_addr(Ipv4Address::new(10, 0, 0, 1));

    let mut tcp = TcpPacket::new_unchecked(ip.payload_mut());
    tcp.set_src_port(5000);
    tcp.set_dst_port(dst_port);
    tcp.set_seq_number(TcpSeqNumber(seq));
    tcp.set_ack_number(ack);
    tcp.set_header_len(header_len);
    tcp.clear_options();
    if has_mss {
        tcp.set_mss_option(1460);
    }
    tcp.set_flags(flags);
    tcp.set_window_len(4096);
    tcp.set_urgent_at(0);
    tcp.payload_mut().copy_from_slice(payload);
    let src_ip = PEER_IP;
    let dst_ip = Ipv4Address::new(10, 0, 0, 1);
    tcp.fill_checksum_v4(src_ip, dst_ip);
    ip.fill_checksum();

    buf
}
