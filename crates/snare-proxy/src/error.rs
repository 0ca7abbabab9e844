use std::io;
use std::time::Duration;

use snare_http::DecodeError;
use snare_tls::CaError;
use thiserror::Error;

/// Everything that can end a session early. Each kind carries a stable
/// code used for close-reason events and logs.
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("malformed wire bytes: {0}")]
    Decode(#[from] DecodeError),
    #[error("socket I/O failed: {0}")]
    Io(#[from] io::Error),
    #[error("TLS {side} handshake failed: {source}")]
    Tls {
        side: &'static str,
        #[source]
        source: io::Error,
    },
    #[error("failed to resolve {authority}: {source}")]
    Resolve {
        authority: String,
        #[source]
        source: io::Error,
    },
    #[error("{} connection idle for {:?}", .side, .timeout)]
    Timeout {
        side: &'static str,
        timeout: Duration,
    },
    #[error("protocol violation: {0}")]
    Protocol(&'static str),
    #[error("certificate authority failure: {0}")]
    Ca(#[from] CaError),
    #[error("session cancelled")]
    Cancelled,
}

impl ProxyError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Decode(_) => "decode_error",
            Self::Io(_) => "io_error",
            Self::Tls { .. } => "tls_error",
            Self::Resolve { .. } => "resolve_error",
            Self::Timeout { .. } => "timeout",
            Self::Protocol(_) => "protocol_violation",
            Self::Ca(_) => "ca_error",
            Self::Cancelled => "cancelled",
        }
    }

    /// Malformed bytes from the client or origin, as opposed to transport
    /// trouble.
    pub fn is_decode(&self) -> bool {
        matches!(self, Self::Decode(_))
    }
}

#[cfg(test)]
mod tests {
    use super::ProxyError;
    use snare_http::DecodeError;

    #[test]
    fn error_codes_are_stable() {
        assert_eq!(
            ProxyError::Decode(DecodeError::InvalidMethod).code(),
            "decode_error"
        );
        assert_eq!(ProxyError::Protocol("x").code(), "protocol_violation");
        assert_eq!(ProxyError::Cancelled.code(), "cancelled");
        assert_eq!(
            ProxyError::Timeout {
                side: "server",
                timeout: std::time::Duration::from_secs(15),
            }
            .code(),
            "timeout"
        );
    }
}
