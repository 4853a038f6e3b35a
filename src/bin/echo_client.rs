// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

//! Demo client: calls the `echo` operation against an `echo_server` instance, over TCP by
//! default or UDP with `--udp`.

use std::net::UdpSocket;

use clap::Parser;

use rpc_protocol::channel::UdpChannel;
use rpc_protocol::client::{self, Invoker, UdpTransport};
use rpc_protocol::descriptor::ValueDescriptor;
use rpc_protocol::dispatch::ReturnDescriptor;
use rpc_protocol::value::Value;

#[derive(Parser)]
struct Cli {
    #[arg(long, default_value = "127.0.0.1")]
    hostname: String,

    #[arg(long, default_value_t = 9090)]
    port: u16,

    /// Use the UDP reliable-message channel instead of TCP.
    #[arg(long)]
    udp: bool,

    /// Message to echo.
    #[arg(default_value = "hello")]
    message: String,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let args = Cli::parse();
    let server_address = format!("{}:{}", args.hostname, args.port);

    let result = if args.udp {
        let peer = server_address.parse()?;
        let socket = UdpSocket::bind("0.0.0.0:0")?;
        let invoker = Invoker::new(UdpTransport::new(UdpChannel::new(socket), peer));
        invoker.invoke(
            "echo",
            &[(ValueDescriptor::Utf8String, Value::Str(args.message.clone()))],
            &ReturnDescriptor::Value(ValueDescriptor::Utf8String),
        )?
    } else {
        let invoker = client::connect_tcp(&server_address)?;
        invoker.invoke(
            "echo",
            &[(ValueDescriptor::Utf8String, Value::Str(args.message.clone()))],
            &ReturnDescriptor::Value(ValueDescriptor::Utf8String),
        )?
    };

    match result {
        Some(Value::Str(s)) => println!("{s}"),
        other => println!("{other:?}"),
    }

    Ok(())
}
