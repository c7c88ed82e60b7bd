//! TCP connection state machine.
//!
//! The table (`TcpSockets`) owns a fixed slot array and the listening-port
//! list; each [`TcpSlot`] advances through the RFC 793 states. All of this
//! module's logic is pure — it never touches the shared frame
//! buffer. The dispatcher (`crate::iface`) is responsible for turning a
//! [`TcpReply`] into bytes and for constructing the [`crate::app::AppHandle`]
//! that exposes the buffer to the application callback.

use managed::ManagedSlice;

use crate::app::AppFlags;
use crate::wire::tcp::Flags as TcpFlags;
use crate::wire::{Ipv4Address, TcpSeqNumber as SeqNumber};

/// Default MSS assumed for a peer that sends no MSS option (RFC 793 §3.1).
pub const DEFAULT_MSS: u16 = 536;
/// Retransmission attempts for an established connection before giving up.
pub const MAXRTX: u8 = 8;
/// Retransmission attempts for a segment carrying SYN before giving up.
pub const MAXSYNRTX: u8 = 5;
/// Ticks a closed connection lingers in TIME_WAIT (2×MSL, uIP-style: 120
/// ticks of 500ms = 60s).
pub const TIME_WAIT_TIMEOUT: u16 = 120;

const INITIAL_RTO: u16 = 3;
const MIN_RTO: u16 = 1;
const MAX_RTO: u16 = 64;

/// TCP connection state (RFC 793). There is deliberately no `Listen` value:
/// listening ports live in a separate table and a slot is only allocated
/// once a SYN actually arrives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum State {
    #[default]
    Closed,
    SynRcvd,
    SynSent,
    Established,
    FinWait1,
    FinWait2,
    Closing,
    TimeWait,
    LastAck,
}

/// Why a slot most recently returned to `Closed`, for diagnostics only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CloseReason {
    #[default]
    None,
    Fin,
    Rst,
    TimedOut,
}

#[derive(Debug, Clone, Copy, Default)]
struct RttEstimator {
    srtt: u8,
    rttvar: u8,
}

impl RttEstimator {
    fn has_measurement(&self) -> bool {
        self.srtt != 0
    }

    fn record(&mut self, measured: u16) {
        let m = measured.min(255) as i32;
        if !self.has_measurement() {
            self.srtt = m.max(1) as u8;
            self.rttvar = (m / 2).max(1) as u8;
        } else {
            let srtt = self.srtt as i32;
            let err = m - srtt;
            self.srtt = (srtt + err / 8).clamp(1, 255) as u8;
            let dev = (self.rttvar as i32) + (err.abs() - self.rttvar as i32) / 4;
            self.rttvar = dev.clamp(1, 255) as u8;
        }
    }

    fn rto(&self) -> u16 {
        if !self.has_measurement() {
            return INITIAL_RTO;
        }
        ((self.srtt as u16) / 8 + 4 * (self.rttvar as u16) / 4).clamp(MIN_RTO, MAX_RTO)
    }
}

/// A decoded inbound TCP segment, with only the fields the state machine
/// needs — the dispatcher extracts these from the wire `TcpPacket` before
/// the buffer is reused for the reply.
#[derive(Debug, Clone, Copy)]
pub struct InSegment {
    pub flags: TcpFlags,
    pub seq: SeqNumber,
    pub ack: SeqNumber,
    pub window: u16,
    pub mss_option: Option<u16>,
    pub payload_len: usize,
}

/// What the dispatcher should do after feeding one segment to a slot.
#[derive(Debug, Clone, Copy)]
pub(crate) enum SegmentEvent {
    /// Nothing to send, no application call.
    None,
    /// Send a bare control acknowledgment (current `snd_next`/`rcv_next`),
    /// without invoking the application — e.g. an out-of-order duplicate.
    Ack,
    /// Send the slot's natural reply to a state-establishing segment (e.g.
    /// SYN+ACK on passive open) without invoking the application.
    ReplyOnly,
    /// Invoke the application with these flags, then call `apply_intent`.
    Invoke(AppFlags),
}

/// What `on_timer` wants the dispatcher to do for one periodic tick.
#[derive(Debug, Clone, Copy)]
pub(crate) enum TimerEvent {
    Idle,
    Invoke(AppFlags),
    TimedOut,
    TimeWaitExpired,
}

enum AckOutcome {
    Ignored,
    Duplicate,
    NewAck,
}

/// The segment the dispatcher should build and transmit.
#[derive(Debug, Clone, Copy)]
pub(crate) struct TcpReply {
    pub seq: SeqNumber,
    pub ack: SeqNumber,
    pub flags: TcpFlags,
    pub window: u16,
    pub send_len: usize,
    pub mss_option: Option<u16>,
}

impl TcpReply {
    fn reset(seq: SeqNumber, ack: SeqNumber) -> TcpReply {
        TcpReply {
            seq,
            ack,
            flags: TcpFlags::RST,
            window: 0,
            send_len: 0,
            mss_option: None,
        }
    }

    fn ack(seq: SeqNumber, ack: SeqNumber, window: u16) -> TcpReply {
        TcpReply {
            seq,
            ack,
            flags: TcpFlags::ACK,
            window,
            send_len: 0,
            mss_option: None,
        }
    }
}

/// One TCP connection.
#[derive(Debug, Clone, Copy)]
pub struct TcpSlot<U> {
    state: State,
    remote_addr: Ipv4Address,
    remote_port: u16,
    local_port: u16,

    rcv_next: SeqNumber,
    snd_una: SeqNumber,
    snd_next: SeqNumber,
    inflight: usize,
    send_fin: bool,

    mss: u16,
    initial_mss: u16,
    local_mss_adv: u16,

    rtte: RttEstimator,
    rexmit_timer: u16,
    rexmit_armed: u16,
    rexmit_count: u8,
    time_wait_timer: u16,

    stopped: bool,
    close_reason: CloseReason,
    /// An active open just reached `Established` and still owes the peer the
    /// ACK completing the handshake; cleared the moment any reply (a data
    /// send or this bare ack) actually goes out.
    ack_pending: bool,

    rx_window: u16,

    /// Opaque application-state payload, carried verbatim by the dispatcher;
    /// the state machine never reads it.
    pub app: U,
}

impl<U: Default> Default for TcpSlot<U> {
    fn default() -> Self {
        TcpSlot {
            state: State::Closed,
            remote_addr: Ipv4Address::UNSPECIFIED,
            remote_port: 0,
            local_port: 0,
            rcv_next: SeqNumber(0),
            snd_una: SeqNumber(0),
            snd_next: SeqNumber(0),
            inflight: 0,
            send_fin: false,
            mss: DEFAULT_MSS,
            initial_mss: DEFAULT_MSS,
            local_mss_adv: DEFAULT_MSS,
            rtte: RttEstimator::default(),
            rexmit_timer: 0,
            rexmit_armed: 0,
            rexmit_count: 0,
            time_wait_timer: 0,
            stopped: false,
            close_reason: CloseReason::None,
            ack_pending: false,
            rx_window: DEFAULT_MSS,
            app: U::default(),
        }
    }
}

impl<U: Default> TcpSlot<U> {
    pub fn is_free(&self) -> bool {
        self.state == State::Closed
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn remote_addr(&self) -> Ipv4Address {
        self.remote_addr
    }

    pub fn remote_port(&self) -> u16 {
        self.remote_port
    }

    pub fn local_port(&self) -> u16 {
        self.local_port
    }

    pub fn close_reason(&self) -> CloseReason {
        self.close_reason
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    pub fn mss(&self) -> u16 {
        self.mss
    }

    /// Receiver-side advertised window: free buffer space, clamped to MSS,
    /// zero while stopped.
    pub fn advertised_window(&self) -> u16 {
        if self.stopped {
            0
        } else {
            self.rx_window.min(self.mss)
        }
    }

    pub fn set_rx_window(&mut self, window: u16) {
        self.rx_window = window;
    }

    fn matches(&self, local_port: u16, remote_addr: Ipv4Address, remote_port: u16) -> bool {
        !self.is_free()
            && self.local_port == local_port
            && self.remote_addr == remote_addr
            && self.remote_port == remote_port
    }

    fn arm_retransmit(&mut self, rto: u16) {
        self.rexmit_timer = rto;
        self.rexmit_armed = rto;
    }

    fn cancel_retransmit_and_measure(&mut self) {
        if self.rexmit_armed > 0 {
            let elapsed = self.rexmit_armed.saturating_sub(self.rexmit_timer).max(1);
            self.rtte.record(elapsed);
        }
        self.rexmit_timer = 0;
        self.rexmit_armed = 0;
        self.rexmit_count = 0;
    }

    fn handle_ack(&mut self, seg: &InSegment) -> AckOutcome {
        if self.inflight == 0 {
            return AckOutcome::Duplicate;
        }
        let acked = seg.ack - self.snd_una;
        if acked < 0 || acked as usize > self.inflight {
            return AckOutcome::Ignored;
        }
        if acked == 0 {
            return AckOutcome::Duplicate;
        }
        // Any valid forward ACK clears the whole in-flight segment — this
        // stack never has more than one segment outstanding at a time.
        self.snd_una = seg.ack;
        self.inflight = 0;
        self.cancel_retransmit_and_measure();
        AckOutcome::NewAck
    }

    /// Begin sending `data_len` bytes (already written by the application
    /// into the buffer by the time the dispatcher calls this), optionally
    /// with FIN appended. Requires `self.inflight == 0`.
    fn begin_send(&mut self, data_len: usize, with_fin: bool) -> TcpReply {
        self.inflight = data_len + usize::from(with_fin);
        self.send_fin = with_fin;
        let seq = self.snd_una;
        self.snd_next = self.snd_una + self.inflight;
        self.arm_retransmit(self.rtte.rto());
        let mut flags = TcpFlags::ACK;
        if data_len > 0 {
            flags |= TcpFlags::PSH;
        }
        if with_fin {
            flags |= TcpFlags::FIN;
        }
        TcpReply {
            seq,
            ack: self.rcv_next,
            flags,
            window: self.advertised_window(),
            send_len: data_len,
            mss_option: None,
        }
    }

    /// Pure per-segment state transition. Never touches the shared buffer.
    pub(crate) fn on_segment(
        &mut self,
        local_port: u16,
        remote_addr: Ipv4Address,
        remote_port: u16,
        seg: &InSegment,
        isn: SeqNumber,
    ) -> SegmentEvent {
        if seg.flags.contains(TcpFlags::RST) {
            if self.state != State::Closed && seg.seq == self.rcv_next {
                self.state = State::Closed;
                self.close_reason = CloseReason::Rst;
                return SegmentEvent::Invoke(AppFlags::ABORT);
            }
            return SegmentEvent::None;
        }

        match self.state {
            State::Closed => {
                if seg.flags.contains(TcpFlags::SYN) && !seg.flags.contains(TcpFlags::ACK) {
                    self.remote_addr = remote_addr;
                    self.remote_port = remote_port;
                    self.local_port = local_port;
                    self.rcv_next = seg.seq + 1;
                    self.snd_una = isn;
                    self.snd_next = isn;
                    self.initial_mss = seg.mss_option.unwrap_or(DEFAULT_MSS).min(self.local_mss_adv);
                    self.mss = self.initial_mss;
                    self.inflight = 1;
                    self.send_fin = false;
                    self.state = State::SynRcvd;
                    self.arm_retransmit(INITIAL_RTO);
                    self.rexmit_count = 0;
                    SegmentEvent::ReplyOnly
                } else {
                    SegmentEvent::None
                }
            }
            State::SynSent => {
                let syn_ack = seg.flags.contains(TcpFlags::SYN | TcpFlags::ACK);
                if syn_ack && seg.ack == self.snd_una + 1 {
                    self.snd_una = self.snd_una + 1;
                    self.snd_next = self.snd_una;
                    self.inflight = 0;
                    self.rcv_next = seg.seq + 1;
                    self.mss = seg.mss_option.unwrap_or(DEFAULT_MSS).min(self.initial_mss);
                    self.cancel_retransmit_and_measure();
                    self.state = State::Established;
                    self.ack_pending = true;
                    SegmentEvent::Invoke(AppFlags::CONNECTED)
                } else {
                    SegmentEvent::None
                }
            }
            State::SynRcvd => {
                if seg.flags.contains(TcpFlags::ACK) && seg.ack == self.snd_una + 1 {
                    self.snd_una = self.snd_una + 1;
                    self.snd_next = self.snd_una;
                    self.inflight = 0;
                    self.cancel_retransmit_and_measure();
                    self.state = State::Established;
                    SegmentEvent::Invoke(AppFlags::CONNECTED)
                } else {
                    SegmentEvent::None
                }
            }
            State::Established => self.on_established(seg),
            State::FinWait1 => self.on_fin_wait1(seg),
            State::FinWait2 => self.on_fin_wait2(seg),
            State::Closing => self.on_closing(seg),
            State::LastAck => self.on_last_ack(seg),
            State::TimeWait => SegmentEvent::None,
        }
    }

    fn on_established(&mut self, seg: &InSegment) -> SegmentEvent {
        let mut flags = AppFlags::empty();

        if seg.flags.contains(TcpFlags::ACK) {
            if let AckOutcome::NewAck = self.handle_ack(seg) {
                flags |= AppFlags::ACKDATA;
            }
        }

        let carries_data_or_fin = seg.payload_len > 0 || seg.flags.contains(TcpFlags::FIN);
        if carries_data_or_fin {
            if seg.seq != self.rcv_next {
                // Out-of-order: drop payload, ack with our current rcv_next.
                return if flags.is_empty() {
                    SegmentEvent::Ack
                } else {
                    SegmentEvent::Invoke(flags)
                };
            }
            if self.stopped {
                // Window closed: control flags still processed, payload dropped.
                return if flags.is_empty() {
                    SegmentEvent::Ack
                } else {
                    SegmentEvent::Invoke(flags)
                };
            }
            if seg.payload_len > 0 {
                self.rcv_next = self.rcv_next + seg.payload_len;
                flags |= AppFlags::NEWDATA;
            }
            if seg.flags.contains(TcpFlags::FIN) {
                self.rcv_next = self.rcv_next + 1;
                flags |= AppFlags::CLOSE;
                // uIP-style shortcut: this stack has no half-close, so accepting
                // the peer's FIN immediately commits us to answering with our
                // own FIN (built in `apply_intent`) and waiting in LAST_ACK.
                self.state = State::LastAck;
            }
        }

        if flags.is_empty() {
            SegmentEvent::None
        } else {
            SegmentEvent::Invoke(flags)
        }
    }

    fn on_fin_wait1(&mut self, seg: &InSegment) -> SegmentEvent {
        let our_fin_acked = seg.flags.contains(TcpFlags::ACK) && matches!(self.handle_ack(seg), AckOutcome::NewAck);
        let peer_fin = seg.flags.contains(TcpFlags::FIN) && seg.seq == self.rcv_next;
        if peer_fin {
            self.rcv_next = self.rcv_next + 1;
        }
        match (our_fin_acked, peer_fin) {
            (true, true) => {
                self.state = State::TimeWait;
                self.time_wait_timer = TIME_WAIT_TIMEOUT;
                SegmentEvent::Ack
            }
            (true, false) => {
                self.state = State::FinWait2;
                SegmentEvent::None
            }
            (false, true) => {
                self.state = State::Closing;
                SegmentEvent::Ack
            }
            (false, false) => SegmentEvent::None,
        }
    }

    fn on_fin_wait2(&mut self, seg: &InSegment) -> SegmentEvent {
        if seg.flags.contains(TcpFlags::ACK) {
            let _ = self.handle_ack(seg);
        }
        if seg.flags.contains(TcpFlags::FIN) && seg.seq == self.rcv_next {
            self.rcv_next = self.rcv_next + 1;
            self.state = State::TimeWait;
            self.time_wait_timer = TIME_WAIT_TIMEOUT;
            SegmentEvent::Ack
        } else {
            SegmentEvent::None
        }
    }

    fn on_closing(&mut self, seg: &InSegment) -> SegmentEvent {
        if seg.flags.contains(TcpFlags::ACK) {
            if let AckOutcome::NewAck = self.handle_ack(seg) {
                self.state = State::TimeWait;
                self.time_wait_timer = TIME_WAIT_TIMEOUT;
            }
        }
        SegmentEvent::None
    }

    fn on_last_ack(&mut self, seg: &InSegment) -> SegmentEvent {
        if seg.flags.contains(TcpFlags::ACK) {
            if let AckOutcome::NewAck = self.handle_ack(seg) {
                self.state = State::Closed;
                self.close_reason = CloseReason::Fin;
            }
        }
        SegmentEvent::None
    }

    /// Decide the outgoing reply after the application callback has run: its
    /// requests (`send`/`close`/`abort`/`stop`/`restart`) are absorbed into
    /// flags read after it returns. `clamp` bounds a requested send length to
    /// `min(MSS, advertised peer window)`.
    pub(crate) fn apply_intent(
        &mut self,
        flags_delivered: AppFlags,
        intent: &crate::app::AppIntent,
        clamp: impl Fn(usize) -> usize,
    ) -> Option<TcpReply> {
        if intent.stop {
            self.stopped = true;
        }
        if intent.restart {
            self.stopped = false;
        }

        if matches!(self.state, State::Closed | State::TimeWait) {
            return None;
        }

        // A repeat delivery always re-sends the identical in-flight segment,
        // regardless of anything the application asked for this time: the
        // application's job on REXMIT is only to re-populate the payload
        // bytes, never to decide length or flags again.
        if flags_delivered.contains(AppFlags::REXMIT) {
            return Some(self.retransmit_reply());
        }

        if intent.abort {
            let reply = TcpReply::reset(self.snd_next, self.rcv_next);
            self.state = State::Closed;
            self.close_reason = CloseReason::Rst;
            return Some(reply);
        }

        if flags_delivered.contains(AppFlags::CLOSE) && self.state == State::LastAck {
            return Some(self.begin_send(0, true));
        }

        if self.state != State::Established {
            return None;
        }

        if intent.close {
            let send_len = intent.send_len.map(&clamp).unwrap_or(0);
            self.state = State::FinWait1;
            return Some(self.begin_send(send_len, true));
        }

        if self.inflight == 0 {
            if let Some(n) = intent.send_len {
                let send_len = clamp(n);
                if send_len > 0 {
                    self.ack_pending = false;
                    return Some(self.begin_send(send_len, false));
                }
            }
        }

        if self.ack_pending {
            self.ack_pending = false;
            return Some(self.control_reply());
        }

        if flags_delivered.contains(AppFlags::NEWDATA) {
            return Some(TcpReply::ack(self.snd_next, self.rcv_next, self.advertised_window()));
        }

        None
    }

    /// Periodic retransmission/TIME_WAIT tick, driven by the driver's timer.
    pub(crate) fn on_timer(&mut self) -> TimerEvent {
        match self.state {
            State::Closed => TimerEvent::Idle,
            State::TimeWait => {
                if self.time_wait_timer == 0 {
                    return TimerEvent::Idle;
                }
                self.time_wait_timer -= 1;
                if self.time_wait_timer == 0 {
                    self.state = State::Closed;
                    TimerEvent::TimeWaitExpired
                } else {
                    TimerEvent::Idle
                }
            }
            _ => {
                if self.inflight == 0 {
                    if self.state == State::Established {
                        TimerEvent::Invoke(AppFlags::POLL)
                    } else {
                        TimerEvent::Idle
                    }
                } else if self.rexmit_timer > 0 {
                    self.rexmit_timer -= 1;
                    TimerEvent::Idle
                } else {
                    self.rexmit_count += 1;
                    let max = if matches!(self.state, State::SynRcvd | State::SynSent) {
                        MAXSYNRTX
                    } else {
                        MAXRTX
                    };
                    if self.rexmit_count > max {
                        self.state = State::Closed;
                        self.close_reason = CloseReason::TimedOut;
                        TimerEvent::TimedOut
                    } else {
                        TimerEvent::Invoke(AppFlags::REXMIT)
                    }
                }
            }
        }
    }

    /// Bare control acknowledgment carrying no data.
    pub(crate) fn control_reply(&self) -> TcpReply {
        TcpReply::ack(self.snd_next, self.rcv_next, self.advertised_window())
    }

    /// SYN+ACK answering a passive open.
    pub(crate) fn syn_ack_reply(&self) -> TcpReply {
        TcpReply {
            seq: self.snd_una,
            ack: self.rcv_next,
            flags: TcpFlags::SYN | TcpFlags::ACK,
            window: self.advertised_window(),
            send_len: 0,
            mss_option: Some(self.local_mss_adv),
        }
    }

    /// Build the retransmission of the currently in-flight segment with
    /// exponential backoff (`RTO << min(attempts, 4)`, capped).
    pub(crate) fn retransmit_reply(&mut self) -> TcpReply {
        let backoff_shift = self.rexmit_count.min(4);
        let rto = self.rtte.rto().saturating_mul(1u16 << backoff_shift).min(MAX_RTO * 16);
        self.arm_retransmit(rto);

        match self.state {
            State::SynRcvd => TcpReply {
                seq: self.snd_una,
                ack: self.rcv_next,
                flags: TcpFlags::SYN | TcpFlags::ACK,
                window: self.advertised_window(),
                send_len: 0,
                mss_option: Some(self.local_mss_adv),
            },
            State::SynSent => TcpReply {
                seq: self.snd_una,
                ack: SeqNumber(0),
                flags: TcpFlags::SYN,
                window: self.advertised_window(),
                send_len: 0,
                mss_option: Some(self.local_mss_adv),
            },
            _ => {
                let data_len = self.inflight.saturating_sub(usize::from(self.send_fin));
                let mut flags = TcpFlags::ACK;
                if data_len > 0 {
                    flags |= TcpFlags::PSH;
                }
                if self.send_fin {
                    flags |= TcpFlags::FIN;
                }
                TcpReply {
                    seq: self.snd_una,
                    ack: self.rcv_next,
                    flags,
                    window: self.advertised_window(),
                    send_len: data_len,
                    mss_option: None,
                }
            }
        }
    }

    fn reset_for_active_open(&mut self, remote_addr: Ipv4Address, remote_port: u16, local_port: u16, isn: SeqNumber, local_mss: u16) {
        *self = TcpSlot::default();
        self.remote_addr = remote_addr;
        self.remote_port = remote_port;
        self.local_port = local_port;
        self.snd_una = isn;
        self.snd_next = isn;
        self.inflight = 1;
        self.local_mss_adv = local_mss;
        self.initial_mss = local_mss;
        self.mss = local_mss;
        self.state = State::SynSent;
        // Arm for immediate transmission on the very next timer tick: the
        // core only ever transmits from inside a `poll_*` call, so `connect`
        // itself cannot emit the SYN — it appears only once the driver's
        // next periodic tick calls `poll_timer`.
        self.rexmit_timer = 0;
        self.rexmit_armed = 0;
        self.rexmit_count = 0;
    }

    fn reset_for_passive_open(&mut self) {
        *self = TcpSlot::default();
    }
}

/// The fixed TCP slot table plus the listening-port list.
pub struct TcpSockets<'a, U> {
    listen: ManagedSlice<'a, u16>,
    slots: ManagedSlice<'a, TcpSlot<U>>,
}

pub(crate) enum Locate {
    Existing(usize),
    Fresh(usize),
    SynDrop,
    NeedsReset,
    Silent,
}

impl<'a, U: Default> TcpSockets<'a, U> {
    pub fn new(
        listen: impl Into<ManagedSlice<'a, u16>>,
        slots: impl Into<ManagedSlice<'a, TcpSlot<U>>>,
    ) -> TcpSockets<'a, U> {
        TcpSockets {
            listen: listen.into(),
            slots: slots.into(),
        }
    }

    pub fn slot(&self, idx: usize) -> &TcpSlot<U> {
        &self.slots[idx]
    }

    pub fn slot_mut(&mut self, idx: usize) -> &mut TcpSlot<U> {
        &mut self.slots[idx]
    }

    pub fn iter(&self) -> impl Iterator<Item = &TcpSlot<U>> {
        self.slots.iter()
    }

    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// Begin listening on `port`. Returns false if the listen table is full.
    pub fn listen(&mut self, port: u16) -> bool {
        if self.listen.iter().any(|&p| p == port) {
            return true;
        }
        if let Some(slot) = self.listen.iter_mut().find(|p| **p == 0) {
            *slot = port;
            true
        } else {
            false
        }
    }

    pub fn unlisten(&mut self, port: u16) {
        if let Some(slot) = self.listen.iter_mut().find(|p| **p == port) {
            *slot = 0;
        }
    }

    pub fn is_listening(&self, port: u16) -> bool {
        self.listen.iter().any(|&p| p == port)
    }

    pub fn find(&self, local_port: u16, remote_addr: Ipv4Address, remote_port: u16) -> Option<usize> {
        self.slots.iter().position(|s| s.matches(local_port, remote_addr, remote_port))
    }

    fn alloc(&mut self) -> Option<usize> {
        self.slots.iter().position(|s| s.is_free())
    }

    /// Active open: CLOSED -> SYN_SENT. `isn` is supplied by the caller (see
    /// [`crate::iface::IsnGenerator`]) so the core never needs a hidden
    /// source of randomness.
    pub fn connect(
        &mut self,
        local_port: u16,
        remote_addr: Ipv4Address,
        remote_port: u16,
        isn: SeqNumber,
        local_mss: u16,
    ) -> Option<usize> {
        if self.find(local_port, remote_addr, remote_port).is_some() {
            return None;
        }
        let idx = self.alloc()?;
        self.slots[idx].reset_for_active_open(remote_addr, remote_port, local_port, isn, local_mss);
        Some(idx)
    }

    pub(crate) fn locate(
        &mut self,
        local_port: u16,
        remote_addr: Ipv4Address,
        remote_port: u16,
        seg: &InSegment,
    ) -> Locate {
        if let Some(idx) = self.find(local_port, remote_addr, remote_port) {
            return Locate::Existing(idx);
        }
        if seg.flags.contains(TcpFlags::RST) {
            return Locate::Silent;
        }
        if seg.flags.contains(TcpFlags::SYN) && !seg.flags.contains(TcpFlags::ACK) {
            if !self.is_listening(local_port) {
                return Locate::NeedsReset;
            }
            return match self.alloc() {
                Some(idx) => {
                    self.slots[idx].reset_for_passive_open();
                    Locate::Fresh(idx)
                }
                None => Locate::SynDrop,
            };
        }
        Locate::NeedsReset
    }

    pub(crate) fn on_segment(
        &mut self,
        idx: usize,
        local_port: u16,
        remote_addr: Ipv4Address,
        remote_port: u16,
        seg: &InSegment,
        isn: SeqNumber,
        local_mss: u16,
    ) -> SegmentEvent {
        self.slots[idx].local_mss_adv = local_mss;
        self.slots[idx].on_segment(local_port, remote_addr, remote_port, seg, isn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type Slot = TcpSlot<()>;

    fn seg(flags: TcpFlags, seq: u32, ack: u32) -> InSegment {
        InSegment {
            flags,
            seq: SeqNumber(seq),
            ack: SeqNumber(ack),
            window: 4096,
            mss_option: None,
            payload_len: 0,
        }
    }

    #[test]
    fn active_open_acks_the_synack_with_no_data_to_piggyback() {
        let mut slot = Slot::default();
        slot.reset_for_active_open(Ipv4Address::new(10, 0, 0, 2), 80, 49152, SeqNumber(5000), 1460);

        let syn_ack = seg(TcpFlags::SYN | TcpFlags::ACK, 9000, 5001);
        let ev = slot.on_segment(49152, Ipv4Address::new(10, 0, 0, 2), 80, &syn_ack, SeqNumber(5000));
        assert!(matches!(ev, SegmentEvent::Invoke(f) if f == AppFlags::CONNECTED));
        assert_eq!(slot.state(), State::Established);

        let intent = crate::app::AppIntent::default();
        let reply = slot.apply_intent(AppFlags::CONNECTED, &intent, |n| n).expect("handshake ack missing");
        assert_eq!(reply.flags, TcpFlags::ACK);
        assert_eq!(reply.seq, SeqNumber(5001));
        assert_eq!(reply.ack, SeqNumber(9001));

        // A second CONNECTED-flagged call (there won't be one in practice, but
        // nothing should re-fire once the ack has gone out).
        assert!(slot.apply_intent(AppFlags::CONNECTED, &intent, |n| n).is_none());
    }

    #[test]
    fn rst_with_stale_sequence_is_ignored() {
        let mut slot = Slot::default();
        slot.state = State::Established;
        slot.rcv_next = SeqNumber(200);

        let stale_rst = seg(TcpFlags::RST, 1, 0);
        let ev = slot.on_segment(7, Ipv4Address::new(10, 0, 0, 2), 5555, &stale_rst, SeqNumber(5000));
        assert!(matches!(ev, SegmentEvent::None));
        assert_eq!(slot.state(), State::Established);

        let valid_rst = seg(TcpFlags::RST, 200, 0);
        let ev = slot.on_segment(7, Ipv4Address::new(10, 0, 0, 2), 5555, &valid_rst, SeqNumber(5000));
        assert!(matches!(ev, SegmentEvent::Invoke(f) if f == AppFlags::ABORT));
        assert_eq!(slot.state(), State::Closed);
        assert_eq!(slot.close_reason(), CloseReason::Rst);
    }

    #[test]
    fn three_way_handshake() {
        let mut slot = Slot::default();
        slot.local_mss_adv = 1460;
        let inbound = seg(TcpFlags::SYN, 1000, 0);
        let ev = slot.on_segment(7, Ipv4Address::new(10, 0, 0, 2), 5555, &inbound, SeqNumber(5000));
        assert!(matches!(ev, SegmentEvent::ReplyOnly));
        assert_eq!(slot.state(), State::SynRcvd);
        assert_eq!(slot.rcv_next, SeqNumber(1001));

        let ack = seg(TcpFlags::ACK, 1001, 5001);
        let ev = slot.on_segment(7, Ipv4Address::new(10, 0, 0, 2), 5555, &ack, SeqNumber(5000));
        assert!(matches!(ev, SegmentEvent::Invoke(f) if f == AppFlags::CONNECTED));
        assert_eq!(slot.state(), State::Established);
    }

    #[test]
    fn retransmission_backoff_then_timeout() {
        let mut slot = Slot::default();
        slot.state = State::Established;
        slot.snd_una = SeqNumber(100);
        slot.snd_next = SeqNumber(100);
        slot.rcv_next = SeqNumber(200);
        let reply = slot.begin_send(4, false);
        assert_eq!(reply.send_len, 4);
        let mut last_rto = 0u16;
        for attempt in 1..=MAXRTX {
            match slot.on_timer() {
                TimerEvent::Invoke(f) => assert_eq!(f, AppFlags::REXMIT),
                other => panic!("unexpected {other:?}"),
            }
            let reply = slot.retransmit_reply();
            assert!(reply.flags.contains(TcpFlags::ACK));
            assert!(slot.rexmit_armed >= last_rto);
            last_rto = slot.rexmit_armed;
            assert_eq!(slot.rexmit_count, attempt);
        }
        match slot.on_timer() {
            TimerEvent::TimedOut => {}
            other => panic!("expected timeout, got {other:?}"),
        }
        assert_eq!(slot.state(), State::Closed);
        assert_eq!(slot.close_reason(), CloseReason::TimedOut);
    }

    #[test]
    fn fin_teardown_sequence() {
        let mut slot = Slot::default();
        slot.state = State::Established;
        slot.snd_una = SeqNumber(100);
        slot.snd_next = SeqNumber(100);
        slot.rcv_next = SeqNumber(200);

        // peer sends FIN
        let fin = seg(TcpFlags::FIN, 200, 100);
        let ev = slot.on_segment(80, Ipv4Address::new(1, 2, 3, 4), 4321, &fin, SeqNumber(0));
        assert!(matches!(ev, SegmentEvent::Invoke(f) if f.contains(AppFlags::CLOSE)));
        assert_eq!(slot.state(), State::LastAck);

        let intent = crate::app::AppIntent::default();
        let reply = slot.apply_intent(AppFlags::CLOSE, &intent, |n| n).unwrap();
        assert!(reply.flags.contains(TcpFlags::FIN));
        assert_eq!(slot.state(), State::LastAck);

        // peer acks our FIN
        let ack = seg(TcpFlags::ACK, 201, (reply.seq + 1).0);
        let ev = slot.on_segment(80, Ipv4Address::new(1, 2, 3, 4), 4321, &ack, SeqNumber(0));
        assert!(matches!(ev, SegmentEvent::None));
        assert_eq!(slot.state(), State::Closed);
        assert_eq!(slot.close_reason(), CloseReason::Fin);
    }

    #[test]
    fn out_of_order_data_is_dropped_with_duplicate_ack() {
        let mut slot = Slot::default();
        slot.state = State::Established;
        slot.snd_una = SeqNumber(100);
        slot.snd_next = SeqNumber(100);
        slot.rcv_next = SeqNumber(200);

        let mut s = seg(TcpFlags::ACK, 250, 100); // seq != rcv_next
        s.payload_len = 4;
        let ev = slot.on_segment(80, Ipv4Address::new(1, 2, 3, 4), 4321, &s, SeqNumber(0));
        assert!(matches!(ev, SegmentEvent::Ack));
        assert_eq!(slot.rcv_next, SeqNumber(200)); // unchanged
    }
}
