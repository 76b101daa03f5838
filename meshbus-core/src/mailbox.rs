//! The core mailbox and peer handles.
//!
//! Every endpoint runs one core task that drains a single mailbox; all
//! governor state is mutated serially by that task. Other threads, local
//! consumers, and remote peers all talk to an endpoint by enqueueing
//! [`CoreMsg`] values. A [`PeerHandle`] is the sending side of a remote
//! endpoint's mailbox plus its identity; frames travel between endpoints
//! as ordinary mailbox messages, which models an ordered, reliable
//! transport.

use crate::data::Data;
use crate::error::CoreError;
use crate::filter::Filter;
use crate::ids::{NodeId, SinkId, StreamId};
use crate::message::{Batch, Command};
use crate::network::NetworkAddress;
use crate::peer::PeerInfo;
use crate::protocol::Frame;
use crate::topic::Topic;
use std::fmt;
use std::hash::{Hash, Hasher};

/// One-shot reply channel for a mailbox operation.
pub type Reply<T> = flume::Sender<T>;

/// Creates a reply channel pair.
#[must_use]
pub fn reply_channel<T>() -> (Reply<T>, flume::Receiver<T>) {
    flume::bounded(1)
}

/// Cheap clonable reference to a (possibly remote) endpoint.
///
/// Equality and hashing go by node identity only.
#[derive(Clone)]
pub struct PeerHandle {
    node: NodeId,
    tx: flume::Sender<CoreMsg>,
}

impl PeerHandle {
    #[must_use]
    pub fn new(node: NodeId, tx: flume::Sender<CoreMsg>) -> Self {
        Self { node, tx }
    }

    #[must_use]
    pub const fn node(&self) -> NodeId {
        self.node
    }

    /// Delivers a protocol frame to this endpoint, identifying the sender.
    ///
    /// Fails when the remote endpoint is gone, which the caller treats as
    /// a transport failure.
    pub fn send_frame(&self, from: &PeerHandle, frame: Frame) -> Result<(), CoreError> {
        self.tx
            .send(CoreMsg::FromPeer {
                from: from.clone(),
                frame,
            })
            .map_err(|_| CoreError::PeerDisconnected(self.node))
    }

    /// Enqueues an arbitrary message; used by local API handles.
    pub fn deliver(&self, msg: CoreMsg) -> Result<(), CoreError> {
        self.tx.send(msg).map_err(|_| CoreError::MailboxClosed)
    }
}

impl fmt::Debug for PeerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PeerHandle({})", self.node)
    }
}

impl PartialEq for PeerHandle {
    fn eq(&self, other: &Self) -> bool {
        self.node == other.node
    }
}

impl Eq for PeerHandle {}

impl Hash for PeerHandle {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.node.hash(state);
    }
}

/// Target of an `unpeer` request.
#[derive(Debug, Clone)]
pub enum UnpeerTarget {
    Node(NodeId),
    Address(NetworkAddress),
}

/// Everything the core task knows how to handle.
pub enum CoreMsg {
    // --- operations -------------------------------------------------------
    Subscribe {
        filter: Filter,
        reply: Reply<Result<(), CoreError>>,
    },
    PublishData {
        topic: Topic,
        value: Data,
    },
    PublishCommand {
        topic: Topic,
        command: Command,
    },
    PeerToHandle {
        peer: PeerHandle,
        reply: Reply<Result<PeerInfo, CoreError>>,
    },
    PeerToAddress {
        addr: NetworkAddress,
        reply: Reply<Result<PeerInfo, CoreError>>,
    },
    Unpeer {
        target: UnpeerTarget,
        reply: Reply<Result<(), CoreError>>,
    },
    AwaitPeer {
        node: NodeId,
        reply: Reply<PeerInfo>,
    },
    Shutdown {
        /// Completed once the core task terminated; `None` detaches.
        done: Option<Reply<()>>,
    },
    NoEvents,
    GetPeerInfo {
        reply: Reply<Vec<PeerInfo>>,
    },
    GetFilter {
        reply: Reply<Filter>,
    },

    // --- local consumers and sources -------------------------------------
    AttachWorker {
        sink: flume::Sender<Batch>,
        initial_credit: u64,
        reply: Reply<SinkId>,
    },
    AttachStore {
        sink: flume::Sender<Batch>,
        initial_credit: u64,
        reply: Reply<SinkId>,
    },
    DetachSink {
        sink: SinkId,
    },
    SinkAck {
        sink: SinkId,
        batch_id: u64,
        demand: u64,
    },
    AttachSource {
        grants: flume::Sender<u64>,
        reply: Reply<StreamId>,
    },
    SourceBatch {
        sid: StreamId,
        batch_id: u64,
        messages: Vec<crate::message::DataMessage>,
    },
    CloseSource {
        sid: StreamId,
    },

    // --- wire -------------------------------------------------------------
    FromPeer {
        from: PeerHandle,
        frame: Frame,
    },

    // --- continuations ----------------------------------------------------
    /// Completion of an asynchronous address lookup.
    Resolved {
        addr: NetworkAddress,
        handle: Option<PeerHandle>,
    },
}

impl fmt::Debug for CoreMsg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Subscribe { .. } => "Subscribe",
            Self::PublishData { .. } => "PublishData",
            Self::PublishCommand { .. } => "PublishCommand",
            Self::PeerToHandle { .. } => "PeerToHandle",
            Self::PeerToAddress { .. } => "PeerToAddress",
            Self::Unpeer { .. } => "Unpeer",
            Self::AwaitPeer { .. } => "AwaitPeer",
            Self::Shutdown { .. } => "Shutdown",
            Self::NoEvents => "NoEvents",
            Self::GetPeerInfo { .. } => "GetPeerInfo",
            Self::GetFilter { .. } => "GetFilter",
            Self::AttachWorker { .. } => "AttachWorker",
            Self::AttachStore { .. } => "AttachStore",
            Self::DetachSink { .. } => "DetachSink",
            Self::SinkAck { .. } => "SinkAck",
            Self::AttachSource { .. } => "AttachSource",
            Self::SourceBatch { .. } => "SourceBatch",
            Self::CloseSource { .. } => "CloseSource",
            Self::FromPeer { frame, .. } => return write!(f, "FromPeer({})", frame.name()),
            Self::Resolved { .. } => "Resolved",
        };
        f.write_str(name)
    }
}
