// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

//! The client side of an RPC call: encode the operation name and arguments, send them through a
//! channel, and -- unless the operation's return type is `Void` -- read and decode the reply.
//!
//! A single [`Invoker`] serializes concurrent callers onto one transport: `send` and the
//! optional following `receive` happen under the same mutex acquisition, so two threads calling
//! through the same invoker can never interleave their request and reply bytes.

use std::io::Cursor;
use std::net::{SocketAddr, TcpStream};
use std::sync::Mutex;

use crate::channel::{TcpChannel, UdpChannel};
use crate::codec;
use crate::descriptor::ValueDescriptor;
use crate::dispatch::ReturnDescriptor;
use crate::value::Value;
use crate::Error;

/// Anything an [`Invoker`] can drive a call through: write a request, and (for non-`Void`
/// operations) read back the reply.
pub trait Transport {
    fn send(&mut self, bytes: &[u8]) -> Result<(), Error>;
    fn receive(&mut self) -> Result<Vec<u8>, Error>;
}

impl<S: std::io::Read + std::io::Write> Transport for TcpChannel<S> {
    fn send(&mut self, bytes: &[u8]) -> Result<(), Error> {
        TcpChannel::send(self, bytes)
    }

    fn receive(&mut self) -> Result<Vec<u8>, Error> {
        TcpChannel::receive(self)
    }
}

/// Adapts [`UdpChannel`], whose `send` takes an explicit peer address, to the fixed-peer shape
/// [`Transport`] expects: one invoker always talks to the same server.
pub struct UdpTransport {
    channel: UdpChannel,
    peer: SocketAddr,
}

impl UdpTransport {
    pub fn new(channel: UdpChannel, peer: SocketAddr) -> Self {
        Self { channel, peer }
    }
}

impl Transport for UdpTransport {
    fn send(&mut self, bytes: &[u8]) -> Result<(), Error> {
        self.channel.send(bytes, self.peer)
    }

    fn receive(&mut self) -> Result<Vec<u8>, Error> {
        self.channel.receive()
    }
}

/// A client-side call handle: one transport, guarded by a mutex so that concurrent callers
/// serialize onto it one request/reply pair at a time.
pub struct Invoker<C> {
    channel: Mutex<C>,
}

impl<C: Transport> Invoker<C> {
    pub fn new(channel: C) -> Self {
        Self {
            channel: Mutex::new(channel),
        }
    }

    /// Encodes `operation_name` followed by `args` (each paired with its descriptor), sends the
    /// request, and -- if `returns` is not `Void` -- decodes and returns the reply.
    pub fn invoke(
        &self,
        operation_name: &str,
        args: &[(ValueDescriptor, Value)],
        returns: &ReturnDescriptor,
    ) -> Result<Option<Value>, Error> {
        let mut buf = Vec::new();
        codec::encode(&mut buf, &ValueDescriptor::Utf8String, &Value::Str(operation_name.to_string()))?;
        for (descriptor, value) in args {
            codec::encode(&mut buf, descriptor, value)?;
        }

        // Holding the lock across both the send and the conditional receive is what keeps a
        // paired request/response from interleaving with another caller's on this invoker.
        let mut channel = self.channel.lock().map_err(|_| Error::ChannelClosed)?;

        channel.send(&buf)?;

        match returns {
            ReturnDescriptor::Void => Ok(None),
            ReturnDescriptor::Value(descriptor) => {
                let reply = channel.receive()?;
                let mut cursor = Cursor::new(reply.as_slice());
                let value = codec::decode(&mut cursor, descriptor)?;
                Ok(Some(value))
            }
        }
    }
}

/// Convenience constructor for the common case of one TCP connection per invoker.
pub fn connect_tcp(addr: impl std::net::ToSocketAddrs) -> Result<Invoker<TcpChannel<TcpStream>>, Error> {
    let stream = TcpStream::connect(addr).map_err(Error::Io)?;
    Ok(Invoker::new(TcpChannel::new(stream)))
}
