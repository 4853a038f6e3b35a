// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

//! A length-prefixed framing channel over any bidirectional byte stream.
//!
//! Frame format: `[i32 big-endian length][length bytes of payload]`. One frame is exactly one
//! RPC message; there is no multiplexing or pipelining.

use std::io::{Read, Write};

use log::*;

use crate::Error;

/// A single frame may not exceed this many bytes. This bounds the allocation a bogus or
/// malicious length prefix could otherwise force; it does not change any documented wire byte.
pub const DEFAULT_MAX_FRAME: usize = 64 * 1024 * 1024;

/// A length-prefixed channel wrapping some underlying stream `S`.
///
/// `S` is generic (rather than hard-coded to `TcpStream`) so the channel can be driven over a
/// `socketpair`-backed pipe in tests without a real network.
pub struct TcpChannel<S> {
    stream: Option<S>,
    max_frame: usize,
}

impl<S: Read + Write> TcpChannel<S> {
    pub fn new(stream: S) -> Self {
        Self::with_max_frame(stream, DEFAULT_MAX_FRAME)
    }

    pub fn with_max_frame(stream: S, max_frame: usize) -> Self {
        Self {
            stream: Some(stream),
            max_frame,
        }
    }

    /// Writes one frame: a 4-byte big-endian length followed by `bytes`, then flushes.
    pub fn send(&mut self, bytes: &[u8]) -> Result<(), Error> {
        if bytes.len() > self.max_frame {
            return Err(Error::FrameTooLarge(bytes.len()));
        }
        let len = i32::try_from(bytes.len()).map_err(|_| Error::FrameTooLarge(bytes.len()))?;

        let stream = self.stream.as_mut().ok_or(Error::NotConnected)?;
        stream.write_all(&len.to_be_bytes())?;
        stream.write_all(bytes)?;
        stream.flush()?;

        trace!("sent frame of {} bytes", bytes.len());
        Ok(())
    }

    /// Reads exactly one frame: a 4-byte header, then exactly that many payload bytes.
    pub fn receive(&mut self) -> Result<Vec<u8>, Error> {
        let stream = self.stream.as_mut().ok_or(Error::NotConnected)?;

        let mut header = [0u8; 4];
        read_fully(stream, &mut header).map_err(|e| short_read_error(e, Error::ShortHeader))?;

        let len = i32::from_be_bytes(header);
        if len < 0 {
            return Err(Error::MalformedLength);
        }
        let len = len as usize;
        if len > self.max_frame {
            return Err(Error::FrameTooLarge(len));
        }

        let mut buf = vec![0u8; len];
        read_fully(stream, &mut buf).map_err(|e| short_read_error(e, Error::ChannelClosed))?;

        trace!("received frame of {len} bytes");
        Ok(buf)
    }

    /// Closes the channel. Idempotent: closing an already-closed channel is a no-op.
    pub fn close(&mut self) {
        self.stream = None;
    }

    pub fn is_open(&self) -> bool {
        self.stream.is_some()
    }
}

/// Reads until `buf` is completely filled, treating a clean EOF before any bytes arrived the
/// same as an EOF partway through: both mean the peer didn't supply the full amount asked for.
fn read_fully<S: Read>(stream: &mut S, buf: &mut [u8]) -> std::io::Result<()> {
    let mut filled = 0;
    while filled < buf.len() {
        match stream.read(&mut buf[filled..]) {
            Ok(0) => {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "peer closed before sending the full frame",
                ))
            }
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

/// Maps a `read_fully` failure to `short` only when the peer actually closed the connection
/// before delivering the full read; any other stream error (a reset connection, a broken pipe,
/// ...) is a genuine I/O failure and must surface as `Error::Io`, not a short-read variant.
fn short_read_error(e: std::io::Error, short: Error) -> Error {
    if e.kind() == std::io::ErrorKind::UnexpectedEof {
        short
    } else {
        Error::Io(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::pipe;

    #[test]
    fn send_then_receive_round_trips_exact_bytes() {
        let (a, b) = pipe().unwrap();
        let mut client = TcpChannel::new(a);
        let mut server = TcpChannel::new(b);

        client.send(b"hello rpc").unwrap();
        assert_eq!(server.receive().unwrap(), b"hello rpc");
    }

    #[test]
    fn empty_payload_round_trips() {
        let (a, b) = pipe().unwrap();
        let mut client = TcpChannel::new(a);
        let mut server = TcpChannel::new(b);

        client.send(b"").unwrap();
        assert_eq!(server.receive().unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn closed_channel_rejects_send_and_receive() {
        let (a, _b) = pipe().unwrap();
        let mut channel = TcpChannel::new(a);
        channel.close();
        channel.close(); // idempotent

        assert!(matches!(channel.send(b"x"), Err(Error::NotConnected)));
        assert!(matches!(channel.receive(), Err(Error::NotConnected)));
    }

    #[test]
    fn peer_close_surfaces_as_short_header() {
        let (a, b) = pipe().unwrap();
        drop(b);
        let mut channel = TcpChannel::new(a);
        let err = channel.receive().unwrap_err();
        assert!(matches!(err, Error::ShortHeader));
    }

    /// A stream whose every read fails with a genuine I/O error, never a clean EOF.
    struct BrokenStream;

    impl Read for BrokenStream {
        fn read(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
            Err(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset by peer"))
        }
    }

    impl Write for BrokenStream {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn genuine_stream_error_surfaces_as_io_not_short_header() {
        let mut channel = TcpChannel::new(BrokenStream);
        let err = channel.receive().unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn oversized_frame_is_rejected_before_allocating() {
        let (a, b) = pipe().unwrap();
        let mut client = TcpChannel::with_max_frame(a, 4);
        let mut server = TcpChannel::with_max_frame(b, 4);

        assert!(matches!(client.send(b"too long"), Err(Error::FrameTooLarge(_))));

        // A peer that doesn't respect the limit still can't make the receiver allocate past it.
        let (c, d) = pipe().unwrap();
        let mut raw_sender = TcpChannel::with_max_frame(c, usize::MAX);
        let mut bounded_receiver = TcpChannel::with_max_frame(d, 4);
        raw_sender.send(b"too long").unwrap();
        assert!(matches!(
            bounded_receiver.receive(),
            Err(Error::FrameTooLarge(_))
        ));
    }
}
