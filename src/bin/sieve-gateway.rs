#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::missing_errors_doc, clippy::missing_panics_doc)]

//! WebSocket-to-ManageSieve gateway daemon
//!
//! Accepts WebSocket connections on `/websocket/<account-id>`, opens a
//! companion connection to the configured ManageSieve backend, and
//! runs one gateway session per connection.

use clap::Parser;
use sieve_gateway::{Account, GatewayConfig, GatewaySession, WsEndpoint, account_id_from_path};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "sieve-gateway")]
#[command(about = "WebSocket gateway for the ManageSieve protocol")]
struct Args {
    /// Path to a JSON config file (defaults to environment variables)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Listen address override (host:port)
    #[arg(long)]
    listen: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let mut config = match &args.config {
        Some(path) => GatewayConfig::from_file(path)?,
        None => GatewayConfig::from_env()?,
    };
    if let Some(listen) = args.listen {
        config.listen = listen;
    }

    let listener = TcpListener::bind(&config.listen).await?;
    info!("listening on {}", config.listen);

    let config = Arc::new(config);
    loop {
        let (stream, peer) = listener.accept().await?;
        let config = Arc::clone(&config);

        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, &config).await {
                warn!("session from {peer} failed: {e}");
            }
        });
    }
}

/// Upgrade one incoming connection and run its gateway session.
///
/// The account is resolved inside the WebSocket handshake callback so
/// an unknown path is rejected with a plain HTTP 404 before the
/// upgrade completes.
async fn handle_connection(stream: TcpStream, config: &GatewayConfig) -> anyhow::Result<()> {
    let mut resolved: Option<(String, Account)> = None;

    let ws = tokio_tungstenite::accept_hdr_async(stream, |request: &Request, response: Response| {
        let path = request.uri().path();
        let account = account_id_from_path(path)
            .and_then(|id| config.account(id).map(|a| (id.to_string(), a.clone())));

        match account {
            Some(found) => {
                resolved = Some(found);
                Ok(response)
            }
            None => {
                warn!("rejecting websocket request for {path}");
                let mut reject = ErrorResponse::new(Some("unknown account".to_string()));
                *reject.status_mut() = StatusCode::NOT_FOUND;
                Err(reject)
            }
        }
    })
    .await?;

    let Some((id, account)) = resolved else {
        anyhow::bail!("websocket handshake completed without an account");
    };

    info!(account = %id, backend = %account.host, "starting gateway session");
    let outcome = GatewaySession::new(account, WsEndpoint::new(ws)).run().await?;
    info!(account = %id, ?outcome, "gateway session ended");

    Ok(())
}
