//! A single-threaded, interrupt-free TCP/IP stack for resource-constrained
//! endpoints, in the uIP tradition: one shared packet buffer, fixed-size
//! connection tables, and no dynamic allocation anywhere on the hot path.
//!
//! The crate is organized as a `wire` module of zero-copy packet accessors,
//! protocol state machines under `socket`, and a driver-facing
//! [`iface::Device`] trait tying it all to whatever sends and receives
//! actual Ethernet frames. [`iface::Stack`] is the single owning context
//! object a driver polls.
//!
//! `std` is only pulled in for `#[cfg(test)]` — the library itself never
//! allocates and never assumes an OS is present.
#![cfg_attr(not(test), no_std)]

mod macros;

pub mod app;
pub mod arp_table;
pub mod checksum;
pub mod config;
pub mod iface;
pub mod protosock;
pub mod socket;
pub mod stats;
pub mod time;
pub mod wire;

pub use app::{AppCallback, AppFlags, AppHandle, ConnKind, NullApp};
pub use config::HostConfig;
pub use iface::{Device, FrameBuf, Loopback, RxToken, Stack, TxToken};
pub use protosock::{PSock, PsockStatus};
pub use socket::{TcpCloseReason, TcpSlot, TcpSockets, TcpState, UdpSlot, UdpSockets};
pub use stats::Stats;
pub use time::{Duration, Instant};
