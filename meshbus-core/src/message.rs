//! Messages flowing through the mesh.
//!
//! A [`DataMessage`] pairs a topic with either a user data value or an
//! internal data-store command. The origin records the peer a message was
//! received from, so the governor never echoes it back.

use crate::data::Data;
use crate::ids::{NodeId, StreamId};
use crate::topic::Topic;
use std::fmt;

/// An internal data-store command.
///
/// The core only routes these; interpretation belongs to the store layer.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Command {
    Put { key: Data, value: Data },
    Erase { key: Data },
    Clear,
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Put { key, value } => write!(f, "put({key}, {value})"),
            Self::Erase { key } => write!(f, "erase({key})"),
            Self::Clear => f.write_str("clear"),
        }
    }
}

/// The tagged body of a [`DataMessage`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Data(Data),
    Command(Command),
}

impl Payload {
    #[must_use]
    pub const fn is_data(&self) -> bool {
        matches!(self, Self::Data(_))
    }

    #[must_use]
    pub const fn is_command(&self) -> bool {
        matches!(self, Self::Command(_))
    }
}

/// One routed message: topic plus payload, with an optional origin peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataMessage {
    pub topic: Topic,
    pub payload: Payload,
    /// Peer the message was received from; empty for local publishes.
    pub origin: Option<NodeId>,
}

impl DataMessage {
    /// A locally published user data message.
    #[must_use]
    pub fn data(topic: impl Into<Topic>, value: impl Into<Data>) -> Self {
        Self {
            topic: topic.into(),
            payload: Payload::Data(value.into()),
            origin: None,
        }
    }

    /// A locally published data-store command.
    #[must_use]
    pub fn command(topic: impl Into<Topic>, command: Command) -> Self {
        Self {
            topic: topic.into(),
            payload: Payload::Command(command),
            origin: None,
        }
    }

    /// Tags the message with the peer it arrived from.
    #[must_use]
    pub fn with_origin(mut self, origin: NodeId) -> Self {
        self.origin = Some(origin);
        self
    }
}

/// A credit-sized group of messages sent atomically on one path.
#[derive(Debug, Clone)]
pub struct Batch {
    pub sid: StreamId,
    pub id: u64,
    pub messages: Vec<DataMessage>,
}

impl Batch {
    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_tags_are_disjoint() {
        let d = DataMessage::data("a/b", 42u64);
        let c = DataMessage::command("a/b", Command::Clear);
        assert!(d.payload.is_data() && !d.payload.is_command());
        assert!(c.payload.is_command() && !c.payload.is_data());
    }

    #[test]
    fn origin_defaults_to_local() {
        let m = DataMessage::data("t", 1u64);
        assert!(m.origin.is_none());
        let m = m.with_origin(NodeId::from_raw(9));
        assert_eq!(m.origin, Some(NodeId::from_raw(9)));
    }
}
