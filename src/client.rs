use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, info};

use crate::error::{Result, TunnelError};
use crate::socks5::address::Endpoint;
use crate::socks5::auth::Credentials;
use crate::socks5::handshake;

/// Deadline applied to the dial plus the whole handshake unless the
/// caller overrides it
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// TunnelClient dials a connector proxy and opens authenticated tunnels
/// through it. Each open is an independent connection and handshake;
/// the client holds no connection state between opens.
#[derive(Clone)]
pub struct TunnelClient {
    proxy_addr: String,
    credentials: Credentials,
    timeout: Duration,
}

/// TunnelClient implementation block
impl TunnelClient {
    /// new is a constructor for the TunnelClient type
    pub fn new(proxy_addr: impl Into<String>, credentials: Credentials) -> Self {
        Self {
            proxy_addr: proxy_addr.into(),
            credentials,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// with_timeout applies the desired connect-phase deadline
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// open dials the proxy and negotiates a tunnel to the destination.
    /// The deadline covers the dial and every handshake step together;
    /// once it elapses or any step fails, the connection is dropped and
    /// nothing half-connected escapes.
    pub async fn open(&self, destination: &Endpoint) -> Result<Tunnel> {
        match timeout(self.timeout, self.dial_and_negotiate(destination)).await {
            Ok(result) => result,
            Err(_) => Err(TunnelError::ConnectionTimeout),
        }
    }

    async fn dial_and_negotiate(&self, destination: &Endpoint) -> Result<Tunnel> {
        let mut stream =
            TcpStream::connect(&self.proxy_addr)
                .await
                .map_err(|source| TunnelError::ProxyConnect {
                    addr: self.proxy_addr.clone(),
                    source,
                })?;
        debug!(proxy = %self.proxy_addr, "connected to proxy");

        let bound_addr = handshake::negotiate(&mut stream, destination, &self.credentials).await?;
        info!(%destination, %bound_addr, "tunnel open");

        Ok(Tunnel { stream, bound_addr })
    }
}

/// Tunnel is an established, authenticated channel to the destination.
/// One only exists once the handshake has completed, so the connection
/// it wraps carries nothing but raw application data.
#[derive(Debug)]
pub struct Tunnel {
    stream: TcpStream,
    bound_addr: Endpoint,
}

/// Tunnel implementation block
impl Tunnel {
    /// bound_addr is the outward-facing endpoint the proxy reported for
    /// this tunnel
    pub fn bound_addr(&self) -> &Endpoint {
        &self.bound_addr
    }

    /// into_inner releases the underlying stream
    pub fn into_inner(self) -> TcpStream {
        self.stream
    }
}

impl AsyncRead for Tunnel {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.stream).poll_read(cx, buf)
    }
}

impl AsyncWrite for Tunnel {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        Pin::new(&mut self.stream).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.stream).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.stream).poll_shutdown(cx)
    }
}
