use std::fmt;
use std::io;

use thiserror::Error;

use crate::socks5::protocol::Status;

pub type Result<T> = std::result::Result<T, TunnelError>;

/// Stage identifies the handshake step a failure surfaced in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    MethodNegotiation,
    Authentication,
    ConnectRequest,
    AddressDecode,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::MethodNegotiation => "method negotiation",
            Stage::Authentication => "authentication",
            Stage::ConnectRequest => "connect request",
            Stage::AddressDecode => "address decode",
        };
        f.write_str(name)
    }
}

/// TunnelError covers every way a tunnel attempt can fail. All variants
/// are terminal for the attempt: nothing is retried internally, and the
/// caller must close the transport on any failure.
#[derive(Debug, Error)]
pub enum TunnelError {
    /// The proxy closed the connection before a full frame arrived
    #[error("connection closed by proxy during {0}")]
    ConnectionClosed(Stage),

    #[error("tunnel attempt timed out")]
    ConnectionTimeout,

    /// A frame field failed an exact value check: wrong version byte,
    /// wrong method, malformed address type
    #[error("protocol violation during {stage}: {detail}")]
    ProtocolViolation { stage: Stage, detail: String },

    #[error("authentication rejected by proxy: {}", .status.describe())]
    AuthenticationFailed { status: Status },

    #[error("proxy refused the tunnel: {}", .status.describe())]
    ConnectFailed { status: Status },

    /// An encoded component does not fit its wire-format length field
    #[error("{field} too long once encoded: {len} bytes (limit {max})")]
    EncodingConstraint {
        field: &'static str,
        len: usize,
        max: usize,
    },

    #[error("destination host is not a valid domain name: {0}")]
    InvalidDomain(String),

    #[error("failed to reach proxy at {addr}")]
    ProxyConnect {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("transport error during {stage}")]
    Io {
        stage: Stage,
        #[source]
        source: io::Error,
    },
}

impl TunnelError {
    /// from_io classifies a transport error by how it ended the attempt:
    /// EOF means the proxy went away mid-frame, timeout kinds mean the
    /// deadline fired, anything else passes through with its stage
    pub(crate) fn from_io(err: io::Error, stage: Stage) -> Self {
        match err.kind() {
            io::ErrorKind::UnexpectedEof => TunnelError::ConnectionClosed(stage),
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TunnelError::ConnectionTimeout,
            _ => TunnelError::Io { stage, source: err },
        }
    }

    /// stage returns the handshake step this failure belongs to, when one
    /// applies. Dial failures, encoding rejections, and the whole-attempt
    /// deadline happen outside the step sequence and have none.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            TunnelError::ConnectionClosed(stage) => Some(*stage),
            TunnelError::ProtocolViolation { stage, .. } => Some(*stage),
            TunnelError::AuthenticationFailed { .. } => Some(Stage::Authentication),
            TunnelError::ConnectFailed { .. } => Some(Stage::ConnectRequest),
            TunnelError::Io { stage, .. } => Some(*stage),
            TunnelError::ConnectionTimeout
            | TunnelError::EncodingConstraint { .. }
            | TunnelError::InvalidDomain(_)
            | TunnelError::ProxyConnect { .. } => None,
        }
    }
}
