//! Logical peering frames.
//!
//! These are the frames two endpoints exchange; the byte-level encoding
//! lives in `meshbus-wire`. The transport contract is ordered, reliable
//! delivery of whole frames.

use crate::filter::Filter;
use crate::ids::{NodeId, StreamId};
use crate::message::DataMessage;
use std::fmt;

/// Reason attached to a stream close.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CloseReason {
    /// Deliberate local teardown (unpeer or endpoint shutdown).
    UserShutdown,
    /// The remote violated the stream protocol.
    ProtocolError,
    /// The transport failed underneath the stream.
    Disconnected,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UserShutdown => f.write_str("user_shutdown"),
            Self::ProtocolError => f.write_str("protocol_error"),
            Self::Disconnected => f.write_str("disconnected"),
        }
    }
}

/// One frame of the peering protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Handshake step 0: request peering, advertising our filter.
    Hello { node: NodeId, filter: Filter },
    /// Handshake step 1: accept, announcing the responder's downstream sid.
    HelloAck {
        node: NodeId,
        filter: Filter,
        sid: StreamId,
    },
    /// Open a downstream towards the receiver.
    Open { sid: StreamId },
    /// Confirm a downstream previously announced or opened.
    AckOpen { sid: StreamId },
    /// A credit-sized group of messages.
    Batch {
        sid: StreamId,
        batch_id: u64,
        messages: Vec<DataMessage>,
    },
    /// Acknowledge a batch and grant new credit. `batch_id` 0 grants
    /// credit before anything was sent.
    BatchAck {
        sid: StreamId,
        batch_id: u64,
        new_credit: u64,
    },
    /// Full replacement of the sender's subscription filter.
    FilterUpdate { filter: Filter },
    /// Tear down one stream.
    Close { sid: StreamId, reason: CloseReason },
    /// The sender is leaving the mesh.
    Bye,
}

impl Frame {
    /// Short frame name for logs and error messages.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Hello { .. } => "HELLO",
            Self::HelloAck { .. } => "HELLO_ACK",
            Self::Open { .. } => "OPEN",
            Self::AckOpen { .. } => "ACK_OPEN",
            Self::Batch { .. } => "BATCH",
            Self::BatchAck { .. } => "BATCH_ACK",
            Self::FilterUpdate { .. } => "FILTER_UPDATE",
            Self::Close { .. } => "CLOSE",
            Self::Bye => "BYE",
        }
    }
}
