//! syft-proxy - download proxy for SyftBox browser clients.
//!
//! Object-store URLs handed out by the server are not CORS-enabled, so a
//! browser asks this proxy to fetch them instead.

mod handler;
mod server;

use anyhow::Result;
use clap::Parser;
use std::time::Duration;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "syft-proxy")]
#[command(about = "CORS-open download proxy for SyftBox")]
struct Args {
    /// Host to bind to
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    /// Port to listen on
    #[arg(short, long, default_value = "8000")]
    port: u16,

    /// Upstream fetch timeout in seconds
    #[arg(long, default_value = "60")]
    timeout_secs: u64,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
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

    info!("Starting SyftBox proxy server");

    let config = server::ProxyConfig {
        upstream_timeout: Duration::from_secs(args.timeout_secs),
    };
    let addr = server::start_server(config, &args.host, args.port).await?;

    // Print the port for anything scripting around us
    println!("SYFT_PROXY_PORT={}", addr.port());

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    Ok(())
}
