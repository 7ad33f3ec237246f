//! Shared error type across ecrlink crates.

use thiserror::Error;

/// Stable error classes exposed to SDK callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Port or socket could not be opened, or is closed.
    Connection,
    /// Serial peer never confirmed the handshake.
    HandshakeTimeout,
    /// No correlated reply arrived in time.
    ReadTimeout,
    /// Checksum mismatch or malformed protobuf.
    Decode,
    /// Peer or caller broke the transport contract.
    ProtocolViolation,
    /// Invalid configuration.
    Config,
    /// Unsupported configuration or protocol version.
    UnsupportedVersion,
    /// Internal failure.
    Internal,
}

impl ErrorKind {
    /// String representation used in logs and test vectors.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Connection => "CONNECTION",
            ErrorKind::HandshakeTimeout => "HANDSHAKE_TIMEOUT",
            ErrorKind::ReadTimeout => "READ_TIMEOUT",
            ErrorKind::Decode => "DECODE",
            ErrorKind::ProtocolViolation => "PROTOCOL_VIOLATION",
            ErrorKind::Config => "CONFIG",
            ErrorKind::UnsupportedVersion => "UNSUPPORTED_VERSION",
            ErrorKind::Internal => "INTERNAL",
        }
    }
}

/// Shared result type.
pub type Result<T> = std::result::Result<T, EcrError>;

/// Unified error type used by core and sdk.
#[derive(Debug, Error)]
pub enum EcrError {
    #[error("connection error: {0}")]
    Connection(String),
    #[error("handshake not confirmed within {waited_ms}ms")]
    HandshakeTimeout { waited_ms: u64 },
    #[error("no reply for msg_id={msg_id} within {waited_ms}ms")]
    ReadTimeout { msg_id: String, waited_ms: u64 },
    #[error("decode error: {0}")]
    Decode(String),
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),
    #[error("invalid config: {0}")]
    Config(String),
    #[error("unsupported version")]
    UnsupportedVersion,
    #[error("internal: {0}")]
    Internal(String),
}

impl EcrError {
    /// Map to the stable error class.
    pub fn kind(&self) -> ErrorKind {
        match self {
            EcrError::Connection(_) => ErrorKind::Connection,
            EcrError::HandshakeTimeout { .. } => ErrorKind::HandshakeTimeout,
            EcrError::ReadTimeout { .. } => ErrorKind::ReadTimeout,
            EcrError::Decode(_) => ErrorKind::Decode,
            EcrError::ProtocolViolation(_) => ErrorKind::ProtocolViolation,
            EcrError::Config(_) => ErrorKind::Config,
            EcrError::UnsupportedVersion => ErrorKind::UnsupportedVersion,
            EcrError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Only read timeouts leave the link usable for a retry.
    pub fn is_retriable(&self) -> bool {
        matches!(self, EcrError::ReadTimeout { .. })
    }

    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            EcrError::ReadTimeout { .. } | EcrError::HandshakeTimeout { .. }
        )
    }
}

impl From<std::io::Error> for EcrError {
    fn from(e: std::io::Error) -> Self {
        EcrError::Connection(e.to_string())
    }
}

impl From<prost::DecodeError> for EcrError {
    fn from(e: prost::DecodeError) -> Self {
        EcrError::Decode(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_read_timeout_is_retriable() {
        let t = EcrError::ReadTimeout {
            msg_id: "m1".into(),
            waited_ms: 10,
        };
        assert!(t.is_retriable());
        assert_eq!(t.kind().as_str(), "READ_TIMEOUT");

        let h = EcrError::HandshakeTimeout { waited_ms: 10 };
        assert!(!h.is_retriable());
        assert!(h.is_timeout());
        assert!(!EcrError::Decode("x".into()).is_timeout());
    }
}
