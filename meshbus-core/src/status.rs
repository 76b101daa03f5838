//! Peer lifecycle statuses, error codes, and the observer interface.
//!
//! The core translates peer lifecycle transitions into status and error
//! events. Unless event shipping was disabled, each event is also
//! published locally as a data message on one of the reserved topics, so
//! ordinary subscribers can watch the mesh change shape.

use crate::data::Data;
use crate::ids::NodeId;
use crate::message::DataMessage;
use crate::network::NetworkAddress;
use crate::topic::reserved;
use std::fmt;

/// Status codes shipped on `broker/statuses`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusCode {
    EndpointDiscovered,
    PeerAdded,
    PeerRemoved,
    PeerLost,
    EndpointUnreachable,
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::EndpointDiscovered => "endpoint_discovered",
            Self::PeerAdded => "peer_added",
            Self::PeerRemoved => "peer_removed",
            Self::PeerLost => "peer_lost",
            Self::EndpointUnreachable => "endpoint_unreachable",
        };
        f.write_str(name)
    }
}

/// Error codes shipped on `broker/errors`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    PeerInvalid,
    PeerUnavailable,
    PeerIncompatible,
    PeerDisconnected,
    InvalidUpstream,
    InvalidDownstream,
    InvalidStreamState,
    UnexpectedMessage,
    Shutdown,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::PeerInvalid => "peer_invalid",
            Self::PeerUnavailable => "peer_unavailable",
            Self::PeerIncompatible => "peer_incompatible",
            Self::PeerDisconnected => "peer_disconnected",
            Self::InvalidUpstream => "invalid_upstream",
            Self::InvalidDownstream => "invalid_downstream",
            Self::InvalidStreamState => "invalid_stream_state",
            Self::UnexpectedMessage => "unexpected_message",
            Self::Shutdown => "shutdown",
        };
        f.write_str(name)
    }
}

/// Identifies the endpoint an event talks about.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EndpointInfo {
    pub node: Option<NodeId>,
    pub address: Option<NetworkAddress>,
}

impl EndpointInfo {
    #[must_use]
    pub fn from_node(node: NodeId) -> Self {
        Self {
            node: Some(node),
            address: None,
        }
    }

    #[must_use]
    pub fn with_address(mut self, address: Option<NetworkAddress>) -> Self {
        self.address = address;
        self
    }
}

/// A status or error event about one endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Status {
        code: StatusCode,
        endpoint: EndpointInfo,
        message: &'static str,
    },
    Error {
        code: ErrorCode,
        endpoint: EndpointInfo,
        message: &'static str,
    },
}

impl Event {
    #[must_use]
    pub fn status(code: StatusCode, endpoint: EndpointInfo, message: &'static str) -> Self {
        Self::Status {
            code,
            endpoint,
            message,
        }
    }

    #[must_use]
    pub fn error(code: ErrorCode, endpoint: EndpointInfo, message: &'static str) -> Self {
        Self::Error {
            code,
            endpoint,
            message,
        }
    }

    #[must_use]
    pub const fn endpoint(&self) -> &EndpointInfo {
        match self {
            Self::Status { endpoint, .. } | Self::Error { endpoint, .. } => endpoint,
        }
    }

    /// Renders the event as a data message on its reserved topic.
    ///
    /// Payload layout: `[code, node?, address?, message]`.
    #[must_use]
    pub fn to_message(&self) -> DataMessage {
        let (topic, code, endpoint, message) = match self {
            Self::Status {
                code,
                endpoint,
                message,
            } => (reserved::STATUSES.clone(), code.to_string(), endpoint, *message),
            Self::Error {
                code,
                endpoint,
                message,
            } => (reserved::ERRORS.clone(), code.to_string(), endpoint, *message),
        };
        let node = endpoint
            .node
            .map_or(Data::None, |n| Data::Count(n.raw()));
        let address = endpoint
            .address
            .as_ref()
            .map_or(Data::None, |a| Data::String(a.to_string()));
        let body = vec![
            Data::String(code),
            node,
            address,
            Data::String(message.to_string()),
        ];
        DataMessage::data(topic, Data::Vector(body))
    }
}

/// Hooks invoked by the core task, in registration order.
///
/// Replaces the layered mixin stack of classic broker designs with a flat
/// list of collaborators. All hooks default to no-ops so an observer only
/// implements what it cares about.
pub trait CoreObserver: Send {
    /// A lifecycle event was emitted (before any local shipping).
    fn on_event(&mut self, _event: &Event) {}

    /// A message was accepted for local routing.
    fn on_message(&mut self, _msg: &DataMessage) {}

    /// The core task terminated.
    fn on_terminated(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Payload;

    #[test]
    fn status_ships_on_statuses_topic() {
        let ev = Event::status(
            StatusCode::PeerAdded,
            EndpointInfo::from_node(NodeId::from_raw(7)),
            "handshake successful",
        );
        let msg = ev.to_message();
        assert_eq!(msg.topic, *reserved::STATUSES);
        match msg.payload {
            Payload::Data(Data::Vector(fields)) => {
                assert_eq!(fields[0], Data::from("peer_added"));
                assert_eq!(fields[1], Data::Count(7));
                assert_eq!(fields[2], Data::None);
            }
            other => panic!("unexpected payload: {other:?}"),
        }
    }

    #[test]
    fn error_ships_on_errors_topic() {
        let ev = Event::error(
            ErrorCode::PeerUnavailable,
            EndpointInfo::default().with_address(Some(NetworkAddress::new("h", 1))),
            "unable to connect to remote peer",
        );
        let msg = ev.to_message();
        assert_eq!(msg.topic, *reserved::ERRORS);
    }
}
