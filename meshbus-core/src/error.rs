//! Core error types.
//!
//! One enum covers the whole taxonomy: peering failures, stream protocol
//! violations, and local misuse. Helpers classify errors the way the
//! governor reacts to them.

use crate::ids::{NodeId, StreamId};
use crate::network::NetworkAddress;
use crate::status::ErrorCode;
use thiserror::Error;

/// Main error type for core operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CoreError {
    /// Operation referenced an unknown or wrong peer.
    #[error("unknown or invalid peer: {0}")]
    PeerInvalid(String),

    /// Could not establish transport to the address.
    #[error("no route to peer at {0}")]
    PeerUnavailable(NetworkAddress),

    /// Handshake rejected.
    #[error("peer {0} rejected the handshake")]
    PeerIncompatible(NodeId),

    /// Transport closed mid-stream.
    #[error("lost connection to peer {0}")]
    PeerDisconnected(NodeId),

    /// Incoming batch or ack referenced a stream id we never opened.
    #[error("unknown upstream {0}")]
    InvalidUpstream(StreamId),

    /// Ack or open referenced a downstream we do not serve.
    #[error("unknown downstream {0}")]
    InvalidDownstream(StreamId),

    /// Credit overrun or out-of-order batch on a known stream.
    #[error("stream {0} violated its credit window")]
    InvalidStreamState(StreamId),

    /// Wire frame did not match the expected form.
    #[error("unexpected {0} frame")]
    UnexpectedMessage(&'static str),

    /// Operation arrived after `shutdown`.
    #[error("endpoint is shutting down")]
    ShuttingDown,

    /// The core actor is gone; its mailbox is closed.
    #[error("core mailbox closed")]
    MailboxClosed,
}

impl CoreError {
    pub fn peer_invalid(what: impl Into<String>) -> Self {
        Self::PeerInvalid(what.into())
    }

    /// Violations that make the governor drop the offending peer.
    #[must_use]
    pub const fn is_protocol_violation(&self) -> bool {
        matches!(
            self,
            Self::InvalidUpstream(_)
                | Self::InvalidDownstream(_)
                | Self::InvalidStreamState(_)
                | Self::UnexpectedMessage(_)
        )
    }

    /// The notifier code this error ships under.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::PeerInvalid(_) => ErrorCode::PeerInvalid,
            Self::PeerUnavailable(_) => ErrorCode::PeerUnavailable,
            Self::PeerIncompatible(_) => ErrorCode::PeerIncompatible,
            Self::PeerDisconnected(_) => ErrorCode::PeerDisconnected,
            Self::InvalidUpstream(_) => ErrorCode::InvalidUpstream,
            Self::InvalidDownstream(_) => ErrorCode::InvalidDownstream,
            Self::InvalidStreamState(_) => ErrorCode::InvalidStreamState,
            Self::UnexpectedMessage(_) => ErrorCode::UnexpectedMessage,
            Self::ShuttingDown | Self::MailboxClosed => ErrorCode::Shutdown,
        }
    }
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protocol_violations_are_classified() {
        let sid = StreamId::from_raw(1);
        assert!(CoreError::InvalidStreamState(sid).is_protocol_violation());
        assert!(CoreError::UnexpectedMessage("HELLO").is_protocol_violation());
        assert!(!CoreError::ShuttingDown.is_protocol_violation());
    }

    #[test]
    fn codes_round_trip_through_errors() {
        assert_eq!(
            CoreError::peer_invalid("nope").code(),
            ErrorCode::PeerInvalid
        );
        assert_eq!(CoreError::ShuttingDown.code(), ErrorCode::Shutdown);
    }
}
