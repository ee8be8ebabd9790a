//! Peerlink demo - example JSON-RPC peer server and client.
//!
//! `peerlink-demo serve` exposes a small API (`add`, `multiply`,
//! `gimme_the_time`, `plop`) and greets every client with a `hello`
//! notification. `peerlink-demo client` connects and exercises it.

mod api;
mod client;

use anyhow::Result;
use clap::{Parser, Subcommand};
use peerlink_core::{PeerOptions, PeerServer};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "peerlink-demo")]
#[command(about = "Example peer server and client for peerlink")]
struct Args {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Accept connections and serve the example API
    Serve {
        /// Host to bind to
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        /// Port to listen on (0 = auto-assign)
        #[arg(short, long, default_value = "5512")]
        port: u16,

        /// Seconds between `hello` broadcasts
        #[arg(long, default_value = "3")]
        hello_interval: u64,
    },
    /// Connect to a server and call the example API
    Client {
        /// Server address
        #[arg(long, default_value = "127.0.0.1:5512")]
        addr: SocketAddr,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Set up logging
    let log_level = if args.debug { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .init();

    match args.command {
        Command::Serve {
            host,
            port,
            hello_interval,
        } => serve(&host, port, Duration::from_secs(hello_interval.max(1))).await,
        Command::Client { addr } => client::run(addr).await,
    }
}

async fn serve(host: &str, port: u16, hello_interval: Duration) -> Result<()> {
    info!("Starting peerlink demo server");
    let mut handle = PeerServer::start(
        (host, port),
        Arc::new(api::server_api()),
        PeerOptions::default(),
    )
    .await?;
    info!("Demo server running on {}", handle.addr());

    let mut ticker = tokio::time::interval(hello_interval);
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if !handle.peers().is_empty() {
                    let reached = handle.broadcast_notification("hello", vec![]).await;
                    info!("Said hello to {} client(s)", reached);
                }
            }
            result = tokio::signal::ctrl_c() => {
                result?;
                info!("Shutdown signal received, exiting");
                break;
            }
        }
    }

    handle.shutdown();
    Ok(())
}
