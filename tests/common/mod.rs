#![allow(dead_code)]

#[path = "../../src/bin/interface-proxy-demo/library.rs"]
pub mod library;

use std::{net::SocketAddr, thread};

/// Serve the sample library on an ephemeral TCP port from a background thread.
pub fn spawn_tcp_server() -> SocketAddr {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    listener.set_nonblocking(true).unwrap();

    thread::spawn(move || {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        runtime
            .block_on(async move {
                let listener = tokio::net::TcpListener::from_std(listener)?;
                library::server().serve_tcp_listener(listener).await
            })
            .unwrap();
    });
    addr
}

/// Serve the sample library on the local endpoint `name` from a background thread.
pub fn spawn_pipe_server(name: &str) {
    let name = name.to_owned();
    thread::spawn(move || {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        runtime.block_on(library::server().serve_local(&name)).unwrap();
    });
}

pub fn unique_pipe_name(prefix: &str) -> String {
    format!("{prefix}-{}-{:08x}", std::process::id(), rand::random::<u32>())
}
