//! syft - command-line client for a SyftBox server.
//!
//! Sends RPC messages and waits for their answers, polls for earlier
//! requests, or listens on the real-time event stream.

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::{debug, Level};
use tracing_subscriber::FmtSubscriber;
use url::Url;

#[derive(Parser, Debug)]
#[command(name = "syft")]
#[command(about = "Talk to a SyftBox server over RPC and websocket")]
struct Args {
    /// SyftBox server base URL
    #[arg(long, global = true, default_value = "https://syftbox.net")]
    server: Url,

    /// Bearer token for the server
    #[arg(long, global = true)]
    token: Option<String>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Send a message and wait for its response
    Send(commands::SendArgs),
    /// Poll once for the response to an earlier request
    Poll(commands::PollArgs),
    /// Print real-time events until Ctrl-C
    Listen,
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

    debug!("Using server {}", args.server);
    let client = commands::build_client(args.server, args.token)?;

    match args.command {
        Command::Send(send) => commands::send(&client, send).await,
        Command::Poll(poll) => commands::poll(&client, poll).await,
        Command::Listen => commands::listen(&client).await,
    }
}
