//! Upstream paths and credit distribution.
//!
//! Every producer feeding this endpoint — a remote peer or a local
//! credit-governed publisher — owns one upstream path. Credit is the only
//! backpressure signal: a producer may send at most as many messages as
//! the path's assigned credit, and the governor tops the outstanding total
//! up whenever its downstreams can absorb more.

use crate::error::CoreError;
use crate::ids::StreamId;
use crate::mailbox::PeerHandle;
use crate::protocol::Frame;
use hashbrown::HashMap;
use smallvec::SmallVec;
use tracing::{debug, trace};

/// Where an upstream path's messages come from.
pub enum UpstreamSource {
    /// A remote peer; credit grants travel as `BATCH_ACK` frames.
    Peer(PeerHandle),
    /// A local publisher; credit grants travel on its grant channel.
    Local(flume::Sender<u64>),
}

impl UpstreamSource {
    #[must_use]
    pub const fn is_local(&self) -> bool {
        matches!(self, Self::Local(_))
    }
}

/// Per-producer credit accounting.
pub struct UpstreamPath {
    pub sid: StreamId,
    pub source: UpstreamSource,
    /// Credit the producer may still spend.
    pub assigned_credit: u64,
    /// Highest batch id received so far; 0 before the first batch.
    pub last_batch_id: u64,
}

impl UpstreamPath {
    #[must_use]
    pub fn new(sid: StreamId, source: UpstreamSource) -> Self {
        Self {
            sid,
            source,
            assigned_credit: 0,
            last_batch_id: 0,
        }
    }

    /// Validates and books an incoming batch against the credit window.
    pub fn accept_batch(&mut self, batch_id: u64, size: u64) -> Result<(), CoreError> {
        if size > self.assigned_credit || batch_id <= self.last_batch_id {
            return Err(CoreError::InvalidStreamState(self.sid));
        }
        self.last_batch_id = batch_id;
        self.assigned_credit -= size;
        Ok(())
    }
}

/// Aggregates all upstream paths of one endpoint.
#[derive(Default)]
pub struct Upstream {
    paths: HashMap<StreamId, UpstreamPath>,
}

impl Upstream {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_path(&mut self, sid: StreamId, source: UpstreamSource) {
        self.paths.insert(sid, UpstreamPath::new(sid, source));
    }

    pub fn find(&mut self, sid: StreamId) -> Option<&mut UpstreamPath> {
        self.paths.get_mut(&sid)
    }

    pub fn remove_path(&mut self, sid: StreamId) -> Option<UpstreamPath> {
        self.paths.remove(&sid)
    }

    /// Drops every local source path; their grant channels close with it.
    pub fn remove_local_sources(&mut self) {
        self.paths.retain(|_, p| !p.source.is_local());
    }

    #[must_use]
    pub fn has_local_sources(&self) -> bool {
        self.paths.values().any(|p| p.source.is_local())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    /// Credit currently outstanding across all producers.
    #[must_use]
    pub fn total_assigned(&self) -> u64 {
        self.paths.values().map(|p| p.assigned_credit).sum()
    }

    /// Tops every path's window up to `target`, delivering the per-path
    /// grants. Credit is a per-producer window, so each path is raised
    /// individually rather than splitting one pool.
    ///
    /// When `force_ack` names a path, that path receives a `BATCH_ACK`
    /// even with a zero grant, acknowledging its latest batch. Returns the
    /// sids whose producers are gone.
    pub fn assign_credit(
        &mut self,
        target: u64,
        from: &PeerHandle,
        force_ack: Option<StreamId>,
    ) -> SmallVec<[StreamId; 2]> {
        let mut dead: SmallVec<[StreamId; 2]> = SmallVec::new();
        if self.paths.is_empty() {
            return dead;
        }
        trace!(target, "assigning upstream credit");

        // Deterministic grant order.
        let mut sids: Vec<StreamId> = self.paths.keys().copied().collect();
        sids.sort_by_key(|s| s.raw());

        for sid in sids {
            let path = self.paths.get_mut(&sid).expect("path just listed");
            let grant = target.saturating_sub(path.assigned_credit);
            if grant == 0 && force_ack != Some(sid) {
                continue;
            }
            path.assigned_credit += grant;
            let delivered = match &path.source {
                UpstreamSource::Peer(peer) => peer
                    .send_frame(
                        from,
                        Frame::BatchAck {
                            sid,
                            batch_id: path.last_batch_id,
                            new_credit: grant,
                        },
                    )
                    .is_ok(),
                UpstreamSource::Local(grants) => grant == 0 || grants.send(grant).is_ok(),
            };
            if delivered {
                debug!(%sid, grant, "granted upstream credit");
            } else {
                dead.push(sid);
            }
        }
        dead
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::NodeId;
    use crate::mailbox::PeerHandle;

    fn local_path() -> (flume::Sender<u64>, flume::Receiver<u64>) {
        flume::unbounded()
    }

    fn dummy_handle() -> (PeerHandle, flume::Receiver<crate::mailbox::CoreMsg>) {
        let (tx, rx) = flume::unbounded();
        (PeerHandle::new(NodeId::from_raw(0xF0), tx), rx)
    }

    #[test]
    fn batches_consume_credit_and_must_stay_in_window() {
        let sid = StreamId::new(NodeId::from_raw(1), 1);
        let (tx, _rx) = local_path();
        let mut path = UpstreamPath::new(sid, UpstreamSource::Local(tx));
        path.assigned_credit = 5;

        assert!(path.accept_batch(1, 3).is_ok());
        assert_eq!(path.assigned_credit, 2);
        // Credit overrun.
        assert_eq!(
            path.accept_batch(2, 3),
            Err(CoreError::InvalidStreamState(sid))
        );
        // Stale batch id.
        assert_eq!(
            path.accept_batch(1, 1),
            Err(CoreError::InvalidStreamState(sid))
        );
    }

    #[test]
    fn every_window_tops_up_to_target() {
        let node = NodeId::from_raw(2);
        let mut up = Upstream::new();
        let (tx_a, rx_a) = local_path();
        let (tx_b, rx_b) = local_path();
        let sid_a = StreamId::new(node, 1);
        let sid_b = StreamId::new(node, 2);
        up.add_path(sid_a, UpstreamSource::Local(tx_a));
        up.add_path(sid_b, UpstreamSource::Local(tx_b));

        let (from, _mb) = dummy_handle();
        let dead = up.assign_credit(7, &from, None);
        assert!(dead.is_empty());
        assert_eq!(up.total_assigned(), 14);
        assert_eq!(rx_a.try_recv().unwrap(), 7);
        assert_eq!(rx_b.try_recv().unwrap(), 7);

        // Already at target: nothing new flows.
        up.assign_credit(7, &from, None);
        assert!(rx_a.try_recv().is_err());
        assert!(rx_b.try_recv().is_err());

        // A spent window is topped back up.
        up.find(sid_a).unwrap().assigned_credit = 2;
        up.assign_credit(7, &from, None);
        assert_eq!(rx_a.try_recv().unwrap(), 5);
        assert!(rx_b.try_recv().is_err());
    }

    #[test]
    fn dead_sources_are_reported() {
        let node = NodeId::from_raw(3);
        let mut up = Upstream::new();
        let (tx, rx) = local_path();
        drop(rx);
        let sid = StreamId::new(node, 1);
        up.add_path(sid, UpstreamSource::Local(tx));
        let (from, _mb) = dummy_handle();
        let dead = up.assign_credit(4, &from, None);
        assert_eq!(dead.as_slice(), &[sid]);
    }
}
