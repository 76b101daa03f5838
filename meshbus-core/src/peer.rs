//! Peer entries and the peering state machine.
//!
//! One [`PeerEntry`] per remote endpoint, holding both halves of the
//! bidirectional channel: the downstream lane towards the peer and the
//! stream id the peer pushes to us on. State advances through the
//! handshake; a peered entry has exactly one confirmed downstream path and
//! one registered upstream path.

use crate::filter::Filter;
use crate::ids::{NodeId, StreamId};
use crate::lane::{Lane, PathKey, SinkHandle};
use crate::mailbox::PeerHandle;
use crate::network::NetworkAddress;
use std::fmt;

/// Where a peer stands in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PeerStatus {
    /// Handshake started; at most one direction is known.
    Connecting,
    /// Both directions negotiated, final confirmation outstanding.
    Connected,
    /// Bidirectional streaming established.
    Peered,
    /// Teardown in progress.
    Severing,
}

impl fmt::Display for PeerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Peered => "peered",
            Self::Severing => "severing",
        };
        f.write_str(name)
    }
}

/// Everything the governor tracks about one remote endpoint.
pub struct PeerEntry {
    pub handle: PeerHandle,
    /// The peer's advertised filter; replaced wholesale on updates.
    pub filter: Filter,
    /// What we last advertised to this peer; avoids redundant updates.
    pub advertised: Filter,
    /// Stream the peer pushes to us on; known after the handshake's
    /// opposite direction completed.
    pub incoming_sid: Option<StreamId>,
    /// Downstream lane towards the peer; always exactly one path.
    pub out: Lane,
    pub status: PeerStatus,
    /// Whether we started the handshake; used to collapse crossed attempts.
    pub initiated: bool,
}

impl PeerEntry {
    /// Creates an entry with its outgoing path pending confirmation.
    #[must_use]
    pub fn new(
        handle: PeerHandle,
        filter: Filter,
        out_sid: StreamId,
        max_batch: u64,
        initiated: bool,
    ) -> Self {
        let mut out = Lane::new(out_sid, max_batch);
        out.add_path(SinkHandle::Peer(handle.clone()));
        Self {
            handle,
            filter,
            advertised: Filter::new(),
            incoming_sid: None,
            out,
            status: PeerStatus::Connecting,
            initiated,
        }
    }

    #[must_use]
    pub fn node(&self) -> NodeId {
        self.handle.node()
    }

    #[must_use]
    pub fn outgoing_sid(&self) -> StreamId {
        self.out.sid()
    }

    /// Key of the single downstream path inside `out`.
    #[must_use]
    pub fn out_key(&self) -> PathKey {
        PathKey::Peer(self.node().raw())
    }

    /// Both directions exist; the entry may transition to peered.
    #[must_use]
    pub fn has_both_paths(&mut self) -> bool {
        let confirmed = self
            .out
            .find(PathKey::Peer(self.handle.node().raw()))
            .is_some_and(|p| p.is_confirmed());
        self.incoming_sid.is_some() && confirmed
    }
}

/// Snapshot of one peer, as returned by `get_peer_info`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerInfo {
    pub node: NodeId,
    pub address: Option<NetworkAddress>,
    pub status: PeerStatus,
    pub filter: Filter,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mailbox::CoreMsg;

    fn handle(node: u64) -> (PeerHandle, flume::Receiver<CoreMsg>) {
        let (tx, rx) = flume::unbounded();
        (PeerHandle::new(NodeId::from_raw(node), tx), rx)
    }

    #[test]
    fn fresh_entries_are_connecting_with_one_pending_path() {
        let (h, _mb) = handle(1);
        let sid = StreamId::new(NodeId::from_raw(2), 1);
        let mut entry = PeerEntry::new(h, Filter::new(), sid, 32, true);
        assert_eq!(entry.status, PeerStatus::Connecting);
        assert_eq!(entry.out.num_paths(), 1);
        assert!(!entry.has_both_paths());
    }

    #[test]
    fn both_paths_requires_incoming_and_confirmed_outgoing() {
        let (h, _mb) = handle(3);
        let sid = StreamId::new(NodeId::from_raw(4), 1);
        let mut entry = PeerEntry::new(h.clone(), Filter::new(), sid, 32, false);
        entry.incoming_sid = Some(StreamId::new(NodeId::from_raw(3), 9));
        assert!(!entry.has_both_paths());
        entry.out.confirm_path(None, SinkHandle::Peer(h), 0);
        assert!(entry.has_both_paths());
    }

    #[test]
    fn statuses_order_by_progress() {
        assert!(PeerStatus::Connecting < PeerStatus::Connected);
        assert!(PeerStatus::Connected < PeerStatus::Peered);
    }
}
