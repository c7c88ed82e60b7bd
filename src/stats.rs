//! Diagnostics counters.
//!
//! Nothing in the core reads these back to make a decision; they exist
//! purely so embedding code can export them (a shell command, a metrics
//! endpoint) without the stack itself depending on any particular sink.

/// Plain counters for every drop-and-count condition the dispatcher sees.
#[derive(Debug, Clone, Copy, Default)]
pub struct Stats {
    /// Malformed IP header (bad version, length, or checksum).
    pub ip_drop: u32,
    /// Destination neither local nor broadcast.
    pub ip_forward_drop: u32,
    /// Unrecognized IP protocol number.
    pub proto_err: u32,
    /// SYN to a listened port but no free TCP slot.
    pub syn_drop: u32,
    /// Segment for no known connection, answered with RST.
    pub reset_sent: u32,
    /// TCP retransmissions sent.
    pub tcp_rexmit: u32,
    /// Connections that hit MAXRTX/MAXSYNRTX and were closed.
    pub tcp_timeout: u32,
    /// ACK numbers that did not fall within the in-flight window (ignored).
    pub ack_err: u32,
    /// ARP table had no free or evictable slot for a new entry.
    pub arp_table_full: u32,
    /// UDP datagrams with no matching slot.
    pub udp_drop: u32,
}

impl Stats {
    pub const fn new() -> Stats {
        Stats {
            ip_drop: 0,
            ip_forward_drop: 0,
            proto_err: 0,
            syn_drop: 0,
            reset_sent: 0,
            tcp_rexmit: 0,
            tcp_timeout: 0,
            ack_err: 0,
            arp_table_full: 0,
            udp_drop: 0,
        }
    }
}
