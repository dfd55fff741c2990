use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tokio::net::{TcpListener, TcpStream};
use tracing::{error, info};

use cctunnel::{Credentials, Endpoint, TunnelClient};

#[derive(Parser, Debug)]
#[command(author, version, about = "Forward a local port through a token-authenticated connector proxy", long_about = None)]
struct Args {
    /// Listener address
    #[arg(short, long, default_value = "127.0.0.1:8080")]
    listen: String,

    /// Proxy address (host:port)
    #[arg(short, long)]
    proxy: String,

    /// Destination behind the proxy (host:port)
    #[arg(short, long)]
    destination: Endpoint,

    /// Bearer token for the proxy
    #[arg(short, long)]
    token: String,

    /// Connector location id
    #[arg(long)]
    location_id: Option<String>,

    /// Dial-plus-handshake deadline in seconds
    #[arg(long, default_value_t = 30)]
    timeout: u64,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse args
    let args = Args::parse();

    // Initialize tracing subscriber
    let level = if args.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt().with_max_level(level).init();

    let mut credentials = Credentials::new(args.token);
    if let Some(location_id) = args.location_id {
        credentials = credentials.with_location_id(location_id);
    }

    let client = TunnelClient::new(args.proxy, credentials)
        .with_timeout(Duration::from_secs(args.timeout));

    forward(args.listen, client, args.destination).await
}

/// forward accepts local connections and pipes each one through a fresh
/// tunnel to the destination
async fn forward(listen_addr: String, client: TunnelClient, destination: Endpoint) -> Result<()> {
    info!("forwarding {} -> {}", listen_addr, destination);

    // Instantiate tokio listener
    let listener = TcpListener::bind(listen_addr).await?;

    // Listen for connections to forward
    loop {
        // Accept incoming connection
        let (inbound, peer_addr) = listener.accept().await?;

        // Clone for this connection
        let client = client.clone();
        let destination = destination.clone();

        // Spawn async task
        tokio::spawn(async move {
            info!("new client: {}", peer_addr);

            if let Err(e) = handle_connection(inbound, client, destination).await {
                error!("connection error: {}", e);
            }
        });
    }
}

/// handle_connection opens a tunnel for one local connection and copies
/// data bidirectionally until either side closes
async fn handle_connection(
    mut inbound: TcpStream,
    client: TunnelClient,
    destination: Endpoint,
) -> Result<()> {
    let mut tunnel = client.open(&destination).await?;

    // Use tokio to handle bidirectional streaming
    let (bytes_out, bytes_in) = tokio::io::copy_bidirectional(&mut inbound, &mut tunnel).await?;

    info!(
        "connection closed. Sent: {}, Received: {}",
        bytes_out, bytes_in
    );

    Ok(())
}
