//! Application callback surface.
//!
//! Each `Stack::poll_*` method invokes the application once per event,
//! passing [`AppFlags`] describing what happened and an [`AppHandle`] the
//! callback uses to react (`send`, `close`, `abort`, `stop`, `restart`). The
//! handle only records intent; effects are applied by the dispatcher after
//! the callback returns.

bitflags::bitflags! {
    /// Flags delivered to `app_callback` on every invocation. Non-exclusive:
    /// a single call may carry more than one bit (e.g. ACKDATA | POLL never
    /// happens, but the app should not assume any subset is exhaustive).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct AppFlags: u8 {
        /// Previously sent data is now acknowledged; safe to send new data.
        const ACKDATA = 0x01;
        /// Inbound payload present at the application-data pointer.
        const NEWDATA = 0x02;
        /// The previous send must be repeated byte-for-byte.
        const REXMIT = 0x04;
        /// No data; opportunity to send.
        const POLL = 0x08;
        /// Peer closed cleanly.
        const CLOSE = 0x10;
        /// Peer aborted with RST.
        const ABORT = 0x20;
        /// Three-way handshake completed.
        const CONNECTED = 0x40;
        /// Retransmission exhausted.
        const TIMEDOUT = 0x80;
    }
}

/// What the application asked the dispatcher to do after the callback
/// returns. At most one `send` request is honored per event: a later call
/// to `send`/`send_slice` within the same callback invocation overwrites an
/// earlier one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct AppIntent {
    pub send_len: Option<usize>,
    pub close: bool,
    pub abort: bool,
    pub stop: bool,
    pub restart: bool,
}

/// Handle passed to the application callback for the duration of one
/// invocation. Borrows the outgoing payload area inside the shared frame
/// buffer so `send` can write directly into place without copying.
pub struct AppHandle<'a> {
    payload: &'a mut [u8],
    rx_len: usize,
    intent: AppIntent,
}

impl<'a> AppHandle<'a> {
    pub(crate) fn new(payload: &'a mut [u8], rx_len: usize) -> AppHandle<'a> {
        let rx_len = rx_len.min(payload.len());
        AppHandle {
            payload,
            rx_len,
            intent: AppIntent::default(),
        }
    }

    /// Inbound payload bytes delivered with this event (valid when `NEWDATA`
    /// is set; empty otherwise). Aliases the same buffer region `send` writes
    /// into — the application must finish reading before it starts writing.
    pub fn payload(&self) -> &[u8] {
        &self.payload[..self.rx_len]
    }

    /// The area of the shared buffer available for the application to write
    /// its reply into, already positioned past the protocol headers.
    pub fn payload_mut(&mut self) -> &mut [u8] {
        self.payload
    }

    /// Record a send of `n` bytes already written into `payload_mut()`.
    /// `n` is clamped by the dispatcher to the current MSS and window; the
    /// application does not need to pre-clamp.
    pub fn send(&mut self, n: usize) {
        self.intent.send_len = Some(n.min(self.payload.len()));
    }

    /// Copy `data` into the payload area and send it (convenience wrapper
    /// around `payload_mut()` + `send()` for small fixed replies).
    pub fn send_slice(&mut self, data: &[u8]) {
        let n = data.len().min(self.payload.len());
        self.payload[..n].copy_from_slice(&data[..n]);
        self.send(n);
    }

    pub fn close(&mut self) {
        self.intent.close = true;
    }

    pub fn abort(&mut self) {
        self.intent.abort = true;
    }

    /// Close the receive window (advertise zero).
    pub fn stop(&mut self) {
        self.intent.stop = true;
    }

    /// Reopen a previously stopped receive window.
    pub fn restart(&mut self) {
        self.intent.restart = true;
    }

    pub(crate) fn into_intent(self) -> AppIntent {
        self.intent
    }
}

/// Identifies which slot table an event concerns the application with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnKind {
    Tcp(usize),
    Udp(usize),
}

/// Implemented by application code. Each `Stack::poll_*` call invokes
/// `on_event` at most once, synchronously, on the calling stack frame.
pub trait AppCallback {
    fn on_event(&mut self, conn: ConnKind, flags: AppFlags, handle: &mut AppHandle);
}

/// An [`AppCallback`] that never sends anything; useful for connections the
/// application does not care about servicing (e.g. a test harness that only
/// wants to exercise the state machine).
#[derive(Debug, Default)]
pub struct NullApp;

impl AppCallback for NullApp {
    fn on_event(&mut self, _conn: ConnKind, _flags: AppFlags, _handle: &mut AppHandle) {}
}
