// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

//! The two wire-level channels the RPC layer is built on: a length-prefixed TCP stream
//! ([`tcp`]) and a handshake-then-fragments UDP exchange ([`udp`]).
//!
//! Both expose a `send`/`receive` pair with the invariant that exactly one `receive` at the
//! peer answers each `send`; [`crate::client::Invoker`] is what enforces that on the caller side.

pub mod tcp;
pub mod udp;

pub use tcp::TcpChannel;
pub use udp::{UdpChannel, UdpTimeouts};
