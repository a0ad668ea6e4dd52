//! Demo server: serves the sample library as `TargetClass` and its
//! parameters as `Param`, over TCP or a local pipe.

mod library;

use anyhow::{bail, Result};
use clap::Parser;
use interface_proxy::{run_server, Endpoint};
use std::net::SocketAddr;
use tracing::{info, Level};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "interface-proxy-demo")]
#[command(about = "Serve the sample library over TCP or a local pipe")]
struct Args {
    /// Address to listen on, e.g. 127.0.0.1:8888
    #[arg(long, conflicts_with = "pipe")]
    tcp: Option<SocketAddr>,

    /// Name of the local pipe endpoint
    #[arg(long)]
    pipe: Option<String>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let level = if args.debug { Level::DEBUG } else { Level::INFO };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(level.into()))
        .with_target(false)
        .compact()
        .init();

    let endpoint = match (args.tcp, args.pipe) {
        (Some(addr), _) => Endpoint::Tcp(addr),
        (None, Some(name)) => Endpoint::Pipe(name),
        (None, None) => bail!("one of --tcp or --pipe is required"),
    };

    info!("Starting demo server on {}", endpoint);
    run_server(library::server(), endpoint)?;
    Ok(())
}
