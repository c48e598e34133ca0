//! Subcommand implementations.

use anyhow::{Context, Result};
use clap::Args as ClapArgs;
use serde_json::Value;
use std::time::Duration;
use syft_client::{
    PollRequest, RequestBody, SendAndWaitOptions, SendRequest, SyftClient, SyftUrl,
    TransportEvent,
};
use tracing::{info, warn};
use url::Url;

#[derive(ClapArgs, Debug)]
pub struct SendArgs {
    /// Destination address, e.g. syft://alice@openmined.org/app/rpc
    pub url: String,

    /// Sender identity
    #[arg(long)]
    pub from: String,

    /// Request body; parsed as JSON unless --raw is given
    #[arg(long)]
    pub body: Option<String>,

    /// Forward the body untouched
    #[arg(long)]
    pub raw: bool,

    /// Server-side wait for a synchronous answer
    #[arg(long)]
    pub timeout_ms: Option<u64>,

    #[arg(long, default_value = "20")]
    pub max_poll_attempts: u32,

    #[arg(long, default_value = "1000")]
    pub poll_interval_ms: u64,

    /// Give up after this many seconds
    #[arg(long, default_value = "120")]
    pub wait_secs: u64,
}

#[derive(ClapArgs, Debug)]
pub struct PollArgs {
    /// Address the request was sent to
    pub url: String,

    #[arg(long)]
    pub from: String,

    #[arg(long)]
    pub request_id: String,

    /// Server-side long-poll timeout
    #[arg(long)]
    pub timeout_ms: Option<u64>,
}

pub fn build_client(server: Url, token: Option<String>) -> Result<SyftClient> {
    let mut builder = SyftClient::builder(server);
    match token {
        Some(token) => builder = builder.with_token(token),
        None => warn!("No --token given; requests are sent without authentication"),
    }
    builder.build().context("Failed to create SyftBox client")
}

fn request_body(body: Option<String>, raw: bool) -> Result<Option<RequestBody>> {
    let Some(body) = body else {
        return Ok(None);
    };
    if raw {
        return Ok(Some(RequestBody::Raw(body.into_bytes().into())));
    }
    let value: Value = serde_json::from_str(&body).context("--body is not valid JSON")?;
    Ok(Some(RequestBody::Json(value)))
}

fn print_json(value: &Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub async fn send(client: &SyftClient, args: SendArgs) -> Result<()> {
    let url = SyftUrl::parse(&args.url)?;
    let mut request = SendRequest::new(url, args.from).with_raw(args.raw);
    if let Some(ms) = args.timeout_ms {
        request = request.with_timeout_ms(ms);
    }
    let body = request_body(args.body, args.raw)?;
    let options = SendAndWaitOptions::default()
        .with_max_poll_attempts(args.max_poll_attempts)
        .with_poll_interval(Duration::from_millis(args.poll_interval_ms))
        .with_timeout(Duration::from_secs(args.wait_secs));

    let answer = client.rpc().send_and_wait(&request, body, &options).await?;
    print_json(&answer)
}

pub async fn poll(client: &SyftClient, args: PollArgs) -> Result<()> {
    let url = SyftUrl::parse(&args.url)?;
    let request = PollRequest::new(args.request_id, args.from, url).with_timeout_ms(args.timeout_ms);

    let result = client.rpc().poll_for_response(&request).await?;
    print_json(&result.response.unwrap_or(Value::Null))
}

pub async fn listen(client: &SyftClient) -> Result<()> {
    let transport = client.transport();
    let (_, mut events) = transport.subscribe();
    transport.connect().await?;
    info!("Listening on {}; press Ctrl-C to stop", client.server_url());

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received, disconnecting");
                break;
            }
            event = events.recv() => {
                let Some(event) = event else { break };
                let terminal = matches!(event, TransportEvent::ReconnectFailed { .. });
                println!("{}", describe(&event));
                if terminal {
                    break;
                }
            }
        }
    }

    client.shutdown();
    Ok(())
}

fn describe(event: &TransportEvent) -> String {
    match event {
        TransportEvent::Connected => "connected".to_string(),
        TransportEvent::Reconnected { attempts } => format!("reconnected after {} attempt(s)", attempts),
        TransportEvent::Disconnected { code, reason } => format!("disconnected ({}) {}", code, reason),
        TransportEvent::Reconnecting { attempt, delay } => {
            format!("reconnecting (attempt {}) in {:?}", attempt, delay)
        }
        TransportEvent::ReconnectFailed { attempts } => {
            format!("gave up after {} reconnect attempt(s)", attempts)
        }
        TransportEvent::Message(message) => message
            .encode()
            .unwrap_or_else(|e| format!("<unprintable message {}: {}>", message.id(), e)),
        TransportEvent::Error(err) => format!("error [{}]: {}", err.code(), err),
    }
}
