//! A tunnel client for token-authenticated SOCKS5 connector proxies
//!
//! ## Protocol
//!
//! - Features:
//!     - SOCKS5 framing with a private bearer-token auth method (0x80)
//!     - Optional base64-encoded location id for connector routing
//!     - CONNECT only; one handshake governs exactly one tunnel
//!     - IPv4, IPv6, and IDNA domain destination addresses
//!     - Typed, per-stage handshake failures for retry decisions upstream
//! - [SOCKS5 (RFC 1928)](https://datatracker.ietf.org/doc/html/rfc1928)
//!   for the framing; the auth method is from the private-use range
//!
//! # Example
//! ```no_run
//! use cctunnel::{Credentials, Endpoint, TunnelClient};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let credentials = Credentials::new("<token>").with_location_id("<location>");
//!     let client = TunnelClient::new("connector.internal:20003", credentials);
//!
//!     let tunnel = client.open(&Endpoint::new("backend.corp", 443)).await?;
//!     println!("tunnel bound at {}", tunnel.bound_addr());
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod error;
pub mod socks5;

// Re-export main types at crate root for convenience
pub use client::{Tunnel, TunnelClient};
pub use error::{Result, Stage, TunnelError};
pub use socks5::address::Endpoint;
pub use socks5::auth::Credentials;
pub use socks5::handshake::negotiate;
pub use socks5::protocol::Status;
