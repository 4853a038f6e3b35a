// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

//! A minimal remote-procedure-call runtime: a type-directed binary codec, a TCP length-prefix
//! channel, a UDP handshake-and-fragments channel, and the request dispatcher and client invoker
//! built on top of them.
//!
//! What this crate does *not* do: generate typed client stubs from an interface description, or
//! provide a production CLI or logging policy. It exposes the library those would be built on,
//! plus two small `clap`-based demo binaries (`echo_server`, `echo_client`) exercising it end to
//! end.

pub mod channel;
pub mod client;
pub mod codec;
pub mod descriptor;
pub mod dispatch;
pub mod server;
pub mod value;

use std::fmt;

pub use descriptor::{FieldDescriptor, Primitive, RecordDescriptor, ValueDescriptor};
pub use dispatch::{dispatch, ReturnDescriptor, Target};
pub use value::Value;

/// How a loop that encounters this error should react: keep running, abort just the task that
/// hit it, or abort the whole component.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Leaves the socket or loop that hit it unusable; that component (one TCP connection, the
    /// UDP server, the accept loop, the client's channel) must shut down.
    Fatal,
    /// The channel is unusable but nothing beyond it is affected: the one connection or call
    /// that hit it ends, everything else keeps running.
    ConnectionFatal,
    /// Log it and keep going; the next message on this same channel is unaffected.
    Recoverable,
}

/// Every error this crate's codec, channels, dispatcher, and servers can raise.
#[derive(Debug)]
pub enum Error {
    // -- codec (recoverable) --
    MalformedTag,
    MalformedLength,
    UnexpectedEnd,
    InvalidText(std::str::Utf8Error),
    NullPrimitive,
    DepthExceeded,
    UnconstructibleRecord,

    // -- dispatch (recoverable) --
    UnknownOperation(String),
    InvocationFailure(Box<dyn std::error::Error + Send + Sync>),

    // -- UDP channel (mostly recoverable) --
    Timeout,
    UnexpectedPacket(i8),
    OutOfBounds,

    // -- TCP channel --
    NotConnected,
    ShortHeader,
    FrameTooLarge(usize),
    ChannelClosed,

    // -- socket/IO, fatal to whatever loop hit them --
    Io(std::io::Error),
    SocketBindFailed(std::io::Error),
    AcceptFailed(std::io::Error),
}

impl Error {
    /// Classifies this error so a server or client loop can decide whether to keep running,
    /// drop one connection, or tear the whole component down. See the crate-level design notes
    /// for why `Io`/`SocketBindFailed`/`AcceptFailed` are scoped to "whatever loop observed
    /// them" rather than always meaning "stop the entire server": a TCP connection's own `Io`
    /// error ends that connection's task, while an accept-level `AcceptFailed` ends the accept
    /// loop itself.
    pub fn severity(&self) -> Severity {
        use Severity::*;
        match self {
            Error::Io(_) | Error::SocketBindFailed(_) | Error::AcceptFailed(_) => Fatal,

            Error::NotConnected | Error::ShortHeader | Error::FrameTooLarge(_) | Error::ChannelClosed => {
                ConnectionFatal
            }

            Error::MalformedTag
            | Error::MalformedLength
            | Error::UnexpectedEnd
            | Error::InvalidText(_)
            | Error::NullPrimitive
            | Error::DepthExceeded
            | Error::UnconstructibleRecord
            | Error::UnknownOperation(_)
            | Error::InvocationFailure(_)
            | Error::Timeout
            | Error::UnexpectedPacket(_)
            | Error::OutOfBounds => Recoverable,
        }
    }
}

impl std::error::Error for Error {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::MalformedTag => write!(f, "nullability tag was not 0 or 1"),
            Error::MalformedLength => write!(f, "negative length where a count was expected"),
            Error::UnexpectedEnd => write!(f, "not enough bytes remaining to decode this value"),
            Error::InvalidText(e) => write!(f, "invalid UTF-8 in string body: {e}"),
            Error::NullPrimitive => write!(f, "null tag encountered for a standalone primitive"),
            Error::DepthExceeded => write!(f, "descriptor recursion depth exceeded {}", codec::MAX_DEPTH),
            Error::UnconstructibleRecord => write!(f, "record descriptor has no zero-argument factory"),
            Error::UnknownOperation(name) => write!(f, "no operation named {name:?}"),
            Error::InvocationFailure(cause) => write!(f, "operation invocation failed: {cause}"),
            Error::Timeout => write!(f, "timed out waiting for the peer"),
            Error::UnexpectedPacket(tag) => write!(f, "unexpected packet tag {tag}"),
            Error::OutOfBounds => write!(f, "data packet chunk does not fit the announced message size"),
            Error::NotConnected => write!(f, "channel is closed"),
            Error::ShortHeader => write!(f, "did not receive a complete 4-byte frame header"),
            Error::FrameTooLarge(n) => write!(f, "frame of {n} bytes exceeds the configured maximum"),
            Error::ChannelClosed => write!(f, "peer closed the channel"),
            Error::Io(e) => write!(f, "I/O error: {e}"),
            Error::SocketBindFailed(e) => write!(f, "failed to bind socket: {e}"),
            Error::AcceptFailed(e) => write!(f, "failed to accept connection: {e}"),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}
