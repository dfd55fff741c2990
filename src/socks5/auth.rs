use base64::Engine;
use base64::engine::general_purpose::STANDARD;

use crate::error::{Result, TunnelError};
use crate::socks5::protocol::AUTH_VERSION;

/// Credentials hold the bearer token issued for the connector and an
/// optional location id naming which connector instance should service
/// the tunnel
#[derive(Clone)]
pub struct Credentials {
    token: String,
    location_id: Option<String>,
}

/// Credentials implementation block
impl Credentials {
    /// new is a constructor for the Credentials type
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            location_id: None,
        }
    }

    /// with_location_id applies the desired routing location
    pub fn with_location_id(mut self, location_id: impl Into<String>) -> Self {
        self.location_id = Some(location_id.into());
        self
    }
}

/// build_auth_request assembles the token sub-negotiation frame
///
/// +-----+-----------+----------+---------+--------------+
/// | VER | TOKEN_LEN |  TOKEN   | LOC_LEN | LOC (base64) |
/// +-----+-----------+----------+---------+--------------+
/// |  1  |     4     | variable |    1    |   0 to 255   |
/// +-----+-----------+----------+---------+--------------+
///
/// The token goes on the wire raw with a four-byte length; the location
/// id is base64-encoded and carries a single length byte, with a lone
/// zero byte standing in when no location id is set.
pub fn build_auth_request(credentials: &Credentials) -> Result<Vec<u8>> {
    let token = credentials.token.as_bytes();
    let token_len = u32::try_from(token.len()).map_err(|_| TunnelError::EncodingConstraint {
        field: "token",
        len: token.len(),
        max: u32::MAX as usize,
    })?;

    let mut frame = Vec::with_capacity(6 + token.len());
    frame.push(AUTH_VERSION);
    frame.extend_from_slice(&token_len.to_be_bytes());
    frame.extend_from_slice(token);

    match &credentials.location_id {
        Some(location_id) => {
            let encoded = STANDARD.encode(location_id);
            if encoded.len() > u8::MAX as usize {
                return Err(TunnelError::EncodingConstraint {
                    field: "location id",
                    len: encoded.len(),
                    max: u8::MAX as usize,
                });
            }
            frame.push(encoded.len() as u8);
            frame.extend_from_slice(encoded.as_bytes());
        }
        None => frame.push(0x00),
    }

    Ok(frame)
}
