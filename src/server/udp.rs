// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

//! The UDP server loop: a single thread that repeatedly receives one reliable message, dispatches
//! it, and replies (if the operation isn't `Void`) to whichever peer address the receive
//! recorded.

use std::net::UdpSocket;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use log::*;

use crate::channel::UdpChannel;
use crate::codec;
use crate::dispatch::{dispatch, ReturnDescriptor, Target};
use crate::Severity;

/// A running UDP RPC server. Single-threaded: messages are processed strictly in the order
/// `receive` hands them back, though the wire protocol makes no ordering promise to clients.
pub struct Server<T> {
    channel: Mutex<UdpChannel>,
    target: Mutex<T>,
    stopping: AtomicBool,
}

impl<T: Target> Server<T> {
    pub fn bind(addr: impl std::net::ToSocketAddrs, target: T) -> Result<Self, crate::Error> {
        let socket = UdpSocket::bind(addr).map_err(crate::Error::SocketBindFailed)?;
        Ok(Self {
            channel: Mutex::new(UdpChannel::new(socket)),
            target: Mutex::new(target),
            stopping: AtomicBool::new(false),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.channel.lock().unwrap().local_addr()
    }

    /// Runs the blocking receive loop on the calling thread until `shutdown` is called or a
    /// fatal error tears the socket down. Each iteration's receive is bounded by the channel's
    /// first-handshake timeout, which is what makes `shutdown` take effect promptly.
    pub fn run(&self) {
        while !self.stopping.load(Ordering::SeqCst) {
            if let Err(e) = self.step() {
                match e.severity() {
                    Severity::Fatal => {
                        error!("udp server terminated by fatal error: {e}");
                        break;
                    }
                    _ => trace!("udp server recoverable error: {e}"),
                }
            }
        }
        debug!("udp server loop exiting");
    }

    fn step(&self) -> Result<(), crate::Error> {
        let mut channel = self.channel.lock().unwrap();
        let request = channel.receive()?;
        let peer = channel
            .last_peer()
            .expect("a successful receive always records the sender as last_peer");

        let response = {
            let mut target = self.target.lock().unwrap();
            dispatch(&mut *target, &request)
        };

        match response {
            Ok(response) => {
                if let ReturnDescriptor::Value(descriptor) = &response.returns {
                    let mut buf = Vec::new();
                    codec::encode(&mut buf, descriptor, &response.value)?;
                    channel.send(&buf, peer)?;
                }
            }
            Err(e) => warn!("dispatch error: {e}"),
        }

        Ok(())
    }

    pub fn shutdown(&self) {
        self.stopping.store(true, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::UdpChannel;
    use crate::descriptor::ValueDescriptor;
    use crate::dispatch::Registry;
    use crate::value::Value;
    use std::net::UdpSocket;
    use std::sync::Arc;
    use std::thread;

    fn echo(_state: &mut (), mut args: Vec<Value>) -> Result<Value, Box<dyn std::error::Error + Send + Sync>> {
        Ok(args.remove(0))
    }

    #[test]
    fn echo_end_to_end_over_udp() {
        let mut registry = Registry::new(());
        registry.register(
            "echo",
            vec![ValueDescriptor::Utf8String],
            ReturnDescriptor::Value(ValueDescriptor::Utf8String),
            echo,
        );

        let server = Arc::new(Server::bind("127.0.0.1:0", registry).unwrap());
        let addr = server.local_addr().unwrap();

        let server_for_thread = Arc::clone(&server);
        let run_thread = thread::spawn(move || server_for_thread.run());

        let client_socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        let mut client_channel = UdpChannel::new(client_socket);

        let mut request = Vec::new();
        codec::encode(&mut request, &ValueDescriptor::Utf8String, &Value::Str("echo".into())).unwrap();
        codec::encode(&mut request, &ValueDescriptor::Utf8String, &Value::Str("hi".into())).unwrap();

        client_channel.send(&request, addr).unwrap();
        let reply = client_channel.receive().unwrap();

        let mut cursor = std::io::Cursor::new(reply.as_slice());
        let value = codec::decode(&mut cursor, &ValueDescriptor::Utf8String).unwrap();
        assert_eq!(value, Value::Str("hi".into()));

        server.shutdown();
        run_thread.join().unwrap();
    }
}
