use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, warn};

use crate::error::{Result, Stage, TunnelError};
use crate::socks5::address::{self, Endpoint};
use crate::socks5::auth::{self, Credentials};
use crate::socks5::protocol::{AUTH_VERSION, AuthMethod, Command, RSV, Status, Version};

/// negotiate runs the full connector handshake over an established proxy
/// connection: method proposal, token authentication, CONNECT request,
/// and decoding of the bound address the proxy reports.
///
/// Every step writes a complete frame, flushes, and blocks on an
/// exact-length read of the reply. A failure at any step is terminal for
/// the attempt; the caller must close the stream. On success the stream
/// carries raw application data from here on and the engine touches it
/// no further.
pub async fn negotiate<S>(
    stream: &mut S,
    destination: &Endpoint,
    credentials: &Credentials,
) -> Result<Endpoint>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    // Method proposal
    // +----+----------+----------+
    // |VER | NMETHODS | METHODS  |
    // +----+----------+----------+
    // | 1  |    1     | 1 to 255 |
    // +----+----------+----------+
    // The token method is the only one offered.
    send(
        stream,
        &[
            Version::SOCKS5 as u8,
            0x01,
            AuthMethod::ConnectorToken as u8,
        ],
        Stage::MethodNegotiation,
    )
    .await?;

    // Method selection reply
    // +----+--------+
    // |VER | METHOD |
    // +----+--------+
    let mut chosen = [0u8; 2];
    read_exact(stream, &mut chosen, Stage::MethodNegotiation).await?;

    if chosen[0] != Version::SOCKS5 as u8 {
        return Err(violation(
            Stage::MethodNegotiation,
            format!("unexpected version byte {:#04x}", chosen[0]),
        ));
    }

    // The proxy must pick the one method we offered. Anything else,
    // including the standard 0xFF no-acceptable-methods answer, ends
    // the attempt here.
    if chosen[1] != AuthMethod::ConnectorToken as u8 {
        return Err(violation(
            Stage::MethodNegotiation,
            format!("proxy selected method {:#04x} instead of the token method", chosen[1]),
        ));
    }
    debug!("token auth method accepted");

    // Token sub-negotiation
    let request = auth::build_auth_request(credentials)?;
    send(stream, &request, Stage::Authentication).await?;

    // Auth reply: sub-negotiation version + status
    let mut reply = [0u8; 2];
    read_exact(stream, &mut reply, Stage::Authentication).await?;

    if reply[0] != AUTH_VERSION {
        return Err(violation(
            Stage::Authentication,
            format!("unexpected auth version byte {:#04x}", reply[0]),
        ));
    }

    let status = Status::from_byte(reply[1]);
    if status != Status::Succeeded {
        warn!(status = reply[1], "proxy rejected authentication: {}", status.describe());
        return Err(TunnelError::AuthenticationFailed { status });
    }
    debug!("authenticated to proxy");

    // Connect request
    // +----+-----+-------+------+----------+----------+
    // |VER | CMD |  RSV  | ATYP | DST.ADDR | DST.PORT |
    // +----+-----+-------+------+----------+----------+
    // | 1  |  1  | X'00' |  1   | Variable |    2     |
    // +----+-----+-------+------+----------+----------+
    let mut request = vec![Version::SOCKS5 as u8, Command::Connect as u8, RSV];
    address::encode_address(destination, &mut request)?;
    send(stream, &request, Stage::ConnectRequest).await?;

    // Connect reply header; the bound address follows it
    let mut reply = [0u8; 3];
    read_exact(stream, &mut reply, Stage::ConnectRequest).await?;

    if reply[0] != Version::SOCKS5 as u8 {
        return Err(violation(
            Stage::ConnectRequest,
            format!("unexpected version byte {:#04x}", reply[0]),
        ));
    }

    let status = Status::from_byte(reply[1]);
    if status != Status::Succeeded {
        warn!(status = reply[1], "proxy refused the tunnel: {}", status.describe());
        return Err(TunnelError::ConnectFailed { status });
    }

    // Drain the bound address to leave the stream positioned at the
    // first byte of application data
    let bound = address::read_address(stream).await?;
    debug!(%bound, "tunnel established");

    Ok(bound)
}

fn violation(stage: Stage, detail: String) -> TunnelError {
    TunnelError::ProtocolViolation { stage, detail }
}

/// read_exact fills buf completely before returning, accumulating
/// partial reads as they arrive. EOF before the buffer is full means the
/// proxy went away mid-frame and surfaces as ConnectionClosed, never as
/// a short read.
pub(crate) async fn read_exact<S>(stream: &mut S, buf: &mut [u8], stage: Stage) -> Result<()>
where
    S: AsyncRead + Unpin,
{
    stream
        .read_exact(buf)
        .await
        .map_err(|e| TunnelError::from_io(e, stage))?;
    Ok(())
}

/// send writes a complete frame and flushes it, so the proxy has seen
/// every byte before the next read blocks
async fn send<S>(stream: &mut S, frame: &[u8], stage: Stage) -> Result<()>
where
    S: AsyncWrite + Unpin,
{
    stream
        .write_all(frame)
        .await
        .map_err(|e| TunnelError::from_io(e, stage))?;
    stream
        .flush()
        .await
        .map_err(|e| TunnelError::from_io(e, stage))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::io::Builder;

    const PROPOSAL: [u8; 3] = [0x05, 0x01, 0x80];
    const AUTH_FRAME: [u8; 9] = [0x01, 0x00, 0x00, 0x00, 0x03, b'a', b'b', b'c', 0x00];
    const CONNECT_REQUEST: [u8; 10] = [0x05, 0x01, 0x00, 0x01, 10, 0, 0, 5, 0x01, 0xbb];

    fn credentials() -> Credentials {
        Credentials::new("abc")
    }

    fn destination() -> Endpoint {
        Endpoint::new("10.0.0.5", 443)
    }

    #[tokio::test]
    async fn full_handshake_succeeds() {
        let mut stream = Builder::new()
            .write(&PROPOSAL)
            .read(&[0x05, 0x80])
            .write(&AUTH_FRAME)
            .read(&[0x01, 0x00])
            .write(&CONNECT_REQUEST)
            .read(&[0x05, 0x00, 0x00, 0x01, 192, 0, 2, 1, 0x04, 0x38])
            .build();

        let bound = negotiate(&mut stream, &destination(), &credentials())
            .await
            .unwrap();
        assert_eq!(bound, Endpoint::new("192.0.2.1", 1080));
    }

    #[tokio::test]
    async fn fragmented_replies_accumulate() {
        // Same exchange with every proxy reply split across reads
        let mut stream = Builder::new()
            .write(&PROPOSAL)
            .read(&[0x05])
            .read(&[0x80])
            .write(&AUTH_FRAME)
            .read(&[0x01])
            .read(&[0x00])
            .write(&CONNECT_REQUEST)
            .read(&[0x05, 0x00])
            .read(&[0x00, 0x01, 192, 0])
            .read(&[2, 1, 0x04, 0x38])
            .build();

        let bound = negotiate(&mut stream, &destination(), &credentials())
            .await
            .unwrap();
        assert_eq!(bound, Endpoint::new("192.0.2.1", 1080));
    }

    #[tokio::test]
    async fn refused_method_selection_sends_no_auth_bytes() {
        // The mock panics on any write past the proposal, so reaching
        // the assertion proves the engine stopped before the auth frame
        for selection in [[0x05, 0x00], [0x05, 0xFF]] {
            let mut stream = Builder::new().write(&PROPOSAL).read(&selection).build();

            match negotiate(&mut stream, &destination(), &credentials()).await {
                Err(TunnelError::ProtocolViolation {
                    stage: Stage::MethodNegotiation,
                    ..
                }) => {}
                other => panic!("expected protocol violation, got {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn wrong_version_in_method_selection() {
        let mut stream = Builder::new().write(&PROPOSAL).read(&[0x04, 0x80]).build();

        match negotiate(&mut stream, &destination(), &credentials()).await {
            Err(TunnelError::ProtocolViolation {
                stage: Stage::MethodNegotiation,
                ..
            }) => {}
            other => panic!("expected protocol violation, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn auth_rejection_carries_status_and_description() {
        let mut stream = Builder::new()
            .write(&PROPOSAL)
            .read(&[0x05, 0x80])
            .write(&AUTH_FRAME)
            .read(&[0x01, 0x05])
            .build();

        let err = negotiate(&mut stream, &destination(), &credentials())
            .await
            .unwrap_err();
        match err {
            TunnelError::AuthenticationFailed {
                status: Status::ConnectionRefused,
            } => {}
            other => panic!("expected authentication failure, got {other:?}"),
        }
        assert!(err.to_string().contains("authentication failure"));
        assert_eq!(err.stage(), Some(Stage::Authentication));
    }

    #[tokio::test]
    async fn wrong_version_in_auth_reply() {
        let mut stream = Builder::new()
            .write(&PROPOSAL)
            .read(&[0x05, 0x80])
            .write(&AUTH_FRAME)
            .read(&[0x02, 0x00])
            .build();

        match negotiate(&mut stream, &destination(), &credentials()).await {
            Err(TunnelError::ProtocolViolation {
                stage: Stage::Authentication,
                ..
            }) => {}
            other => panic!("expected protocol violation, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn connect_rejection_carries_status() {
        let mut stream = Builder::new()
            .write(&PROPOSAL)
            .read(&[0x05, 0x80])
            .write(&AUTH_FRAME)
            .read(&[0x01, 0x00])
            .write(&CONNECT_REQUEST)
            .read(&[0x05, 0x04, 0x00])
            .build();

        let err = negotiate(&mut stream, &destination(), &credentials())
            .await
            .unwrap_err();
        match err {
            TunnelError::ConnectFailed {
                status: Status::HostUnreachable,
            } => {}
            other => panic!("expected connect failure, got {other:?}"),
        }
        assert_eq!(err.stage(), Some(Stage::ConnectRequest));
    }

    #[tokio::test]
    async fn domain_bound_address_is_decoded() {
        let mut stream = Builder::new()
            .write(&PROPOSAL)
            .read(&[0x05, 0x80])
            .write(&AUTH_FRAME)
            .read(&[0x01, 0x00])
            .write(&CONNECT_REQUEST)
            .read(&[0x05, 0x00, 0x00, 0x03, 4, b'e', b'd', b'g', b'e', 0x00, 0x50])
            .build();

        let bound = negotiate(&mut stream, &destination(), &credentials())
            .await
            .unwrap();
        assert_eq!(bound, Endpoint::new("edge", 80));
    }

    #[tokio::test]
    async fn malformed_bound_address_type() {
        let mut stream = Builder::new()
            .write(&PROPOSAL)
            .read(&[0x05, 0x80])
            .write(&AUTH_FRAME)
            .read(&[0x01, 0x00])
            .write(&CONNECT_REQUEST)
            .read(&[0x05, 0x00, 0x00, 0x02])
            .build();

        match negotiate(&mut stream, &destination(), &credentials()).await {
            Err(TunnelError::ProtocolViolation {
                stage: Stage::AddressDecode,
                ..
            }) => {}
            other => panic!("expected protocol violation, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn eof_mid_frame_is_connection_closed() {
        let (mut client, mut server) = tokio::io::duplex(64);

        // A proxy that answers the proposal with half a frame and hangs up
        let proxy = tokio::spawn(async move {
            let mut proposal = [0u8; 3];
            server.read_exact(&mut proposal).await.unwrap();
            server.write_all(&[0x05]).await.unwrap();
        });

        match negotiate(&mut client, &destination(), &credentials()).await {
            Err(TunnelError::ConnectionClosed(Stage::MethodNegotiation)) => {}
            other => panic!("expected connection closed, got {other:?}"),
        }
        proxy.await.unwrap();
    }
}
