//! Stateful connection tables: TCP and UDP slots.

pub mod tcp;
pub mod udp;

pub use tcp::{CloseReason as TcpCloseReason, State as TcpState, TcpSlot, TcpSockets};
pub use udp::{UdpSlot, UdpSockets};
