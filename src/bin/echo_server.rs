// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

//! Demo server: registers a single `echo` operation and serves it over both TCP and UDP until
//! killed.

use std::sync::Arc;
use std::thread;

use clap::Parser;

use rpc_protocol::descriptor::ValueDescriptor;
use rpc_protocol::dispatch::{Registry, ReturnDescriptor};
use rpc_protocol::server;
use rpc_protocol::value::Value;

#[derive(Parser)]
struct Cli {
    #[arg(long, default_value = "127.0.0.1")]
    hostname: String,

    #[arg(long, default_value_t = 9090)]
    port: u16,
}

fn echo(_state: &mut (), mut args: Vec<Value>) -> Result<Value, Box<dyn std::error::Error + Send + Sync>> {
    Ok(args.remove(0))
}

fn build_registry() -> Registry<()> {
    let mut registry = Registry::new(());
    registry.register(
        "echo",
        vec![ValueDescriptor::Utf8String],
        ReturnDescriptor::Value(ValueDescriptor::Utf8String),
        echo,
    );
    registry
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let args = Cli::parse();
    let address = format!("{}:{}", args.hostname, args.port);

    let tcp_server = Arc::new(server::Server::bind(&address, build_registry())?);
    let udp_server = Arc::new(server::udp::Server::bind(&address, build_registry())?);

    log::info!("echo server listening on {address} (tcp+udp)");

    let udp_for_thread = Arc::clone(&udp_server);
    let udp_thread = thread::spawn(move || udp_for_thread.run());

    tcp_server.run();
    udp_thread.join().expect("udp server thread panicked");

    Ok(())
}
