// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

//! The TCP server loop: accept a connection per thread, repeatedly dispatch frames against a
//! shared target, and write back non-`Void` replies.

pub mod udp;

use std::collections::HashMap;
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use log::*;

use crate::channel::TcpChannel;
use crate::codec;
use crate::dispatch::{dispatch, ReturnDescriptor, Target};
use crate::{Error, Severity};

/// A running TCP RPC server: one accept loop, and one thread per live connection, all dispatching
/// against the same shared `target`.
///
/// The live-connection set is the only state shared across connection threads besides the
/// target itself; it exists so `shutdown` can force every blocked `receive` to return by closing
/// its socket out from under it. `handles` separately accumulates every connection thread's
/// `JoinHandle` so `shutdown` can join them all, even ones that have already removed themselves
/// from `connections` by finishing on their own.
pub struct Server<T> {
    target: Arc<Mutex<T>>,
    listener: TcpListener,
    connections: Arc<Mutex<HashMap<u64, TcpStream>>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    next_id: AtomicU64,
    stopping: Arc<AtomicBool>,
}

impl<T> Server<T>
where
    T: Target + Send + 'static,
{
    pub fn bind(addr: impl std::net::ToSocketAddrs, target: T) -> Result<Self, Error> {
        let listener = TcpListener::bind(addr).map_err(Error::SocketBindFailed)?;
        Ok(Self {
            target: Arc::new(Mutex::new(target)),
            listener,
            connections: Arc::new(Mutex::new(HashMap::new())),
            handles: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(0),
            stopping: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Runs the blocking accept loop on the calling thread. Returns once `shutdown` has been
    /// called (or the listener fails outright).
    pub fn run(&self) {
        for stream in self.listener.incoming() {
            if self.stopping.load(Ordering::SeqCst) {
                break;
            }
            match stream {
                Ok(stream) => self.spawn_connection(stream),
                Err(e) => {
                    error!("accept failed, stopping server: {e}");
                    break;
                }
            }
        }
        debug!("accept loop exiting");
    }

    fn spawn_connection(&self, stream: TcpStream) {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);

        let watchdog = match stream.try_clone() {
            Ok(clone) => clone,
            Err(e) => {
                warn!("failed to clone accepted connection, dropping it: {e}");
                return;
            }
        };
        self.connections.lock().unwrap().insert(id, watchdog);

        let target = Arc::clone(&self.target);
        let connections = Arc::clone(&self.connections);

        let handle = thread::spawn(move || {
            handle_connection(stream, &target);
            connections.lock().unwrap().remove(&id);
        });
        self.handles.lock().unwrap().push(handle);
    }

    /// Stops the accept loop, forcibly closes every live connection so its blocked `receive`
    /// returns, and joins every connection thread this server ever spawned. Cooperative: the
    /// accept loop notices `stopping` only after its next `accept` returns, so a throwaway
    /// connection is made to unblock it immediately.
    pub fn shutdown(&self) {
        self.stopping.store(true, Ordering::SeqCst);
        if let Ok(addr) = self.listener.local_addr() {
            // std::net::TcpListener has no non-blocking way to cancel an in-progress accept;
            // connecting to ourselves is the standard way to unblock it.
            let _ = TcpStream::connect(addr);
        }

        let mut connections = self.connections.lock().unwrap();
        for (_, stream) in connections.drain() {
            let _ = stream.shutdown(Shutdown::Both);
        }
        drop(connections);

        // A thread that already finished and removed itself from `connections` is still in
        // `handles`; joining it is instant. This is what actually waits for every connection's
        // teardown to complete, not just its socket to close.
        let mut handles = self.handles.lock().unwrap();
        for handle in handles.drain(..) {
            let _ = handle.join();
        }
    }
}

/// Repeatedly receives a frame, dispatches it, and sends back a non-`Void` reply, until the
/// channel reports a connection-fatal or fatal error.
fn handle_connection<T: Target>(stream: TcpStream, target: &Mutex<T>) {
    let mut channel = TcpChannel::new(stream);

    loop {
        let request = match channel.receive() {
            Ok(bytes) => bytes,
            Err(e) => {
                match e.severity() {
                    Severity::Fatal => error!("connection terminated by socket error: {e}"),
                    _ => debug!("connection closed: {e}"),
                }
                break;
            }
        };

        let response = {
            let mut target = target.lock().unwrap();
            dispatch(&mut *target, &request)
        };

        match response {
            Ok(response) => {
                if let ReturnDescriptor::Value(descriptor) = &response.returns {
                    let mut buf = Vec::new();
                    if let Err(e) = codec::encode(&mut buf, descriptor, &response.value) {
                        warn!("failed to encode response, dropping connection: {e}");
                        break;
                    }
                    if let Err(e) = channel.send(&buf) {
                        warn!("failed to send response, dropping connection: {e}");
                        break;
                    }
                }
            }
            Err(e) => {
                // Recoverable per the error table: log it and keep serving this connection.
                warn!("dispatch error: {e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client;
    use crate::descriptor::ValueDescriptor;
    use crate::dispatch::Registry;
    use crate::value::Value;

    fn echo(_state: &mut (), mut args: Vec<Value>) -> Result<Value, Box<dyn std::error::Error + Send + Sync>> {
        Ok(args.remove(0))
    }

    #[test]
    fn echo_end_to_end_over_tcp() {
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
        let accept_thread = thread::spawn(move || server_for_thread.run());

        let invoker = client::connect_tcp(addr).unwrap();
        let result = invoker
            .invoke(
                "echo",
                &[(ValueDescriptor::Utf8String, Value::Str("hi".into()))],
                &ReturnDescriptor::Value(ValueDescriptor::Utf8String),
            )
            .unwrap();
        assert_eq!(result, Some(Value::Str("hi".into())));

        server.shutdown();
        accept_thread.join().unwrap();
    }

    #[test]
    fn unknown_operation_then_shutdown_surfaces_channel_closed_to_client() {
        let registry: Registry<()> = Registry::new(());
        let server = Arc::new(Server::bind("127.0.0.1:0", registry).unwrap());
        let addr = server.local_addr().unwrap();

        let server_for_thread = Arc::clone(&server);
        let accept_thread = thread::spawn(move || server_for_thread.run());

        let invoker = client::connect_tcp(addr).unwrap();
        // The server drops an unknown operation without replying, so a Void call "succeeds"
        // (nothing is read back) but a non-Void call blocks until the connection goes away.
        let void_result = invoker.invoke("nope", &[], &ReturnDescriptor::Void);
        assert!(void_result.is_ok());

        server.shutdown();
        accept_thread.join().unwrap();

        let err = invoker
            .invoke("nope", &[], &ReturnDescriptor::Value(ValueDescriptor::Utf8String))
            .unwrap_err();
        assert!(matches!(err, Error::ShortHeader | Error::ChannelClosed | Error::Io(_)));
    }
}
