//! Cooperative proto-socket layer.
//!
//! Modeled on uIP's protosocket (`psock.h`): a thin helper that turns the
//! per-event [`crate::app::AppCallback::on_event`] invocations into
//! blocking-looking `send`/`read_until` calls, without a real call stack or
//! any dynamic allocation. Each primitive here is resumable — calling it
//! again on a later event, with the same arguments, continues exactly where
//! the previous call left off, using only the small progress counters
//! stored in [`PSock`] (its entire "continuation"). Rust has no stackful
//! coroutines to fake here; the application's own step counter (an enum it
//! advances once a primitive returns [`PsockStatus::Done`]) stands in for
//! the checkpoint a protothread would otherwise restore with a computed
//! jump.

use crate::app::{AppFlags, AppHandle};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PsockStatus {
    /// Not finished; call again on the next event with the same arguments.
    Waiting,
    /// The operation completed during this call.
    Done,
    /// `read_until`/`read_full` ran out of destination buffer before
    /// matching the terminator or reaching the requested length.
    BufFull,
    /// The connection closed, was reset, or timed out while pending.
    Closed,
}

#[derive(Debug, Clone, Copy, Default)]
struct SendCursor {
    active: bool,
}

#[derive(Debug, Clone, Copy, Default)]
struct ReadCursor {
    filled: usize,
}

/// Per-connection cooperative I/O state. Embed one in the connection's
/// opaque application payload (`TcpSlot::app` / `UdpSlot::app`) — it is
/// `Copy` and has no allocation, so it fits the same no-heap discipline as
/// the rest of the stack.
#[derive(Debug, Clone, Copy, Default)]
pub struct PSock {
    send: SendCursor,
    read: ReadCursor,
}

impl PSock {
    pub const fn new() -> PSock {
        PSock {
            send: SendCursor { active: false },
            read: ReadCursor { filled: 0 },
        }
    }

    fn is_closed(flags: AppFlags) -> bool {
        flags.intersects(AppFlags::CLOSE | AppFlags::ABORT | AppFlags::TIMEDOUT)
    }

    /// Send `data` and wait for it to be acknowledged before reporting
    /// `Done`. Safe to call on every event for the duration of the
    /// operation: it writes to `handle` only on the first call and on any
    /// `REXMIT`, and is a no-op otherwise. `data` must remain the same
    /// slice for as long as the send is pending, since the retransmission
    /// path re-reads it rather than caching a copy.
    pub fn send(&mut self, flags: AppFlags, handle: &mut AppHandle, data: &[u8]) -> PsockStatus {
        if Self::is_closed(flags) {
            self.send = SendCursor::default();
            return PsockStatus::Closed;
        }
        if !self.send.active {
            handle.send_slice(data);
            self.send.active = true;
            return PsockStatus::Waiting;
        }
        if flags.contains(AppFlags::REXMIT) {
            handle.send_slice(data);
            return PsockStatus::Waiting;
        }
        if flags.contains(AppFlags::ACKDATA) {
            self.send = SendCursor::default();
            return PsockStatus::Done;
        }
        PsockStatus::Waiting
    }

    /// Like [`send`](Self::send), but the bytes are produced on demand by
    /// `generate` rather than held in a caller-owned buffer — for replies
    /// assembled fresh into `handle.payload_mut()` each time, including on
    /// retransmission.
    pub fn generator_send(
        &mut self,
        flags: AppFlags,
        handle: &mut AppHandle,
        mut generate: impl FnMut(&mut [u8]) -> usize,
    ) -> PsockStatus {
        if Self::is_closed(flags) {
            self.send = SendCursor::default();
            return PsockStatus::Closed;
        }
        if !self.send.active {
            let n = generate(handle.payload_mut());
            handle.send(n);
            self.send.active = true;
            return PsockStatus::Waiting;
        }
        if flags.contains(AppFlags::REXMIT) {
            let n = generate(handle.payload_mut());
            handle.send(n);
            return PsockStatus::Waiting;
        }
        if flags.contains(AppFlags::ACKDATA) {
            self.send = SendCursor::default();
            return PsockStatus::Done;
        }
        PsockStatus::Waiting
    }

    /// Append newly arrived bytes to `buf` until `terminator` is seen
    /// (inclusive) or `buf` fills up.
    pub fn read_until(&mut self, flags: AppFlags, handle: &AppHandle, buf: &mut [u8], terminator: u8) -> PsockStatus {
        if Self::is_closed(flags) {
            self.read = ReadCursor::default();
            return PsockStatus::Closed;
        }
        if !flags.contains(AppFlags::NEWDATA) {
            return PsockStatus::Waiting;
        }
        for &byte in handle.payload() {
            if self.read.filled >= buf.len() {
                self.read = ReadCursor::default();
                return PsockStatus::BufFull;
            }
            buf[self.read.filled] = byte;
            self.read.filled += 1;
            if byte == terminator {
                self.read = ReadCursor::default();
                return PsockStatus::Done;
            }
        }
        PsockStatus::Waiting
    }

    /// Append bytes until exactly `buf.len()` have arrived.
    pub fn read_full(&mut self, flags: AppFlags, handle: &AppHandle, buf: &mut [u8]) -> PsockStatus {
        if Self::is_closed(flags) {
            self.read = ReadCursor::default();
            return PsockStatus::Closed;
        }
        if !flags.contains(AppFlags::NEWDATA) {
            return PsockStatus::Waiting;
        }
        for &byte in handle.payload() {
            if self.read.filled >= buf.len() {
                break;
            }
            buf[self.read.filled] = byte;
            self.read.filled += 1;
        }
        if self.read.filled >= buf.len() {
            self.read = ReadCursor::default();
            PsockStatus::Done
        } else {
            PsockStatus::Waiting
        }
    }

    /// Bytes accumulated so far by an in-progress `read_until`/`read_full`.
    pub fn bytes_read(&self) -> usize {
        self.read.filled
    }

    /// Abandon any in-progress read, e.g. after consuming a completed line.
    pub fn reset_read(&mut self) {
        self.read = ReadCursor::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle_with<'a>(buf: &'a mut [u8], rx_len: usize) -> AppHandle<'a> {
        AppHandle::new(buf, rx_len)
    }

    #[test]
    fn send_waits_for_ack_then_completes() {
        let mut psock = PSock::new();
        let mut buf = [0u8; 16];
        let mut handle = handle_with(&mut buf, 0);
        assert_eq!(psock.send(AppFlags::POLL, &mut handle, b"hi"), PsockStatus::Waiting);
        let mut buf2 = [0u8; 16];
        let mut handle2 = handle_with(&mut buf2, 0);
        assert_eq!(psock.send(AppFlags::ACKDATA, &mut handle2, b"hi"), PsockStatus::Done);
    }

    #[test]
    fn read_until_newline_across_two_events() {
        let mut psock = PSock::new();
        let mut out = [0u8; 8];

        let mut rx1 = *b"ab\0\0\0\0\0\0";
        let h1 = handle_with(&mut rx1, 2);
        assert_eq!(psock.read_until(AppFlags::NEWDATA, &h1, &mut out, b'\n'), PsockStatus::Waiting);
        assert_eq!(psock.bytes_read(), 2);

        let mut rx2 = *b"c\n\0\0\0\0\0\0";
        let h2 = handle_with(&mut rx2, 2);
        assert_eq!(psock.read_until(AppFlags::NEWDATA, &h2, &mut out, b'\n'), PsockStatus::Done);
        assert_eq!(&out[..4], b"abc\n");
    }

    #[test]
    fn read_until_reports_buf_full() {
        let mut psock = PSock::new();
        let mut out = [0u8; 2];
        let mut rx = *b"abcd";
        let h = handle_with(&mut rx, 4);
        assert_eq!(psock.read_until(AppFlags::NEWDATA, &h, &mut out, b'\n'), PsockStatus::BufFull);
    }

    #[test]
    fn closed_flag_short_circuits_pending_send() {
        let mut psock = PSock::new();
        let mut buf = [0u8; 8];
        let mut handle = handle_with(&mut buf, 0);
        assert_eq!(psock.send(AppFlags::POLL, &mut handle, b"x"), PsockStatus::Waiting);
        let mut buf2 = [0u8; 8];
        let mut handle2 = handle_with(&mut buf2, 0);
        assert_eq!(psock.send(AppFlags::ABORT, &mut handle2, b"x"), PsockStatus::Closed);
    }
}
