//! Downstream lanes.
//!
//! A lane owns the downstream paths of one consumer class — local workers,
//! local stores, or the single path towards one peer. Each path buffers
//! the messages it accepted and drains them in batches, never exceeding
//! the credit its consumer granted.

use crate::ids::{SinkId, StreamId};
use crate::mailbox::PeerHandle;
use crate::message::{Batch, DataMessage};
use crate::protocol::{CloseReason, Frame};
use smallvec::SmallVec;
use std::collections::VecDeque;
use tracing::trace;

/// Where a downstream path delivers its batches.
pub enum SinkHandle {
    /// A locally attached consumer (worker or store).
    Local { id: SinkId, tx: flume::Sender<Batch> },
    /// A remote peer; batches travel as `BATCH` frames.
    Peer(PeerHandle),
}

impl SinkHandle {
    #[must_use]
    pub fn key(&self) -> PathKey {
        match self {
            Self::Local { id, .. } => PathKey::Sink(*id),
            Self::Peer(handle) => PathKey::Peer(handle.node().raw()),
        }
    }
}

/// Identity of a downstream path within its lane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PathKey {
    Sink(SinkId),
    Peer(u64),
}

/// Per-consumer downstream state.
pub struct DownstreamPath {
    handle: SinkHandle,
    /// Unconfirmed paths exist during handshakes and never emit.
    confirmed: bool,
    credit: u64,
    next_batch_id: u64,
    next_ack_id: u64,
    buf: VecDeque<DataMessage>,
}

impl DownstreamPath {
    fn new(handle: SinkHandle, confirmed: bool) -> Self {
        Self {
            handle,
            confirmed,
            credit: 0,
            next_batch_id: 1,
            next_ack_id: 1,
            buf: VecDeque::new(),
        }
    }

    #[must_use]
    pub const fn credit(&self) -> u64 {
        self.credit
    }

    #[must_use]
    pub const fn next_batch_id(&self) -> u64 {
        self.next_batch_id
    }

    #[must_use]
    pub const fn next_ack_id(&self) -> u64 {
        self.next_ack_id
    }

    #[must_use]
    pub fn buffered(&self) -> u64 {
        self.buf.len() as u64
    }

    #[must_use]
    pub const fn is_confirmed(&self) -> bool {
        self.confirmed
    }

    /// A path is clean when every batch it sent has been acknowledged.
    #[must_use]
    pub const fn is_clean(&self) -> bool {
        self.next_ack_id == self.next_batch_id
    }

    /// Clean and nothing left to send.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.is_clean() && self.buf.is_empty()
    }
}

/// A set of downstream paths plus their stream id.
pub struct Lane {
    sid: StreamId,
    max_batch: u64,
    paths: Vec<DownstreamPath>,
}

impl Lane {
    #[must_use]
    pub fn new(sid: StreamId, max_batch: u64) -> Self {
        Self {
            sid,
            max_batch: max_batch.max(1),
            paths: Vec::new(),
        }
    }

    #[must_use]
    pub const fn sid(&self) -> StreamId {
        self.sid
    }

    #[must_use]
    pub fn num_paths(&self) -> usize {
        self.paths.len()
    }

    /// No consumers remain on this lane.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.paths.is_empty()
    }

    /// Every path fully acknowledged with nothing buffered.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.paths.iter().all(DownstreamPath::is_idle)
    }

    /// Messages pending on the slowest path.
    #[must_use]
    pub fn buffered(&self) -> u64 {
        self.paths.iter().map(DownstreamPath::buffered).max().unwrap_or(0)
    }

    /// Minimum open credit across paths; `None` when the lane is empty.
    #[must_use]
    pub fn min_credit(&self) -> Option<u64> {
        self.paths.iter().map(DownstreamPath::credit).min()
    }

    /// Creates a path that cannot emit until confirmed.
    pub fn add_path(&mut self, handle: SinkHandle) {
        self.paths.push(DownstreamPath::new(handle, false));
    }

    /// Installs a downstream path, rebinding an existing one when
    /// `rebind_from` is given, confirming a pending one when the handle is
    /// already known, and creating a confirmed path otherwise.
    pub fn confirm_path(
        &mut self,
        rebind_from: Option<PathKey>,
        handle: SinkHandle,
        initial_credit: u64,
    ) -> bool {
        if let Some(old) = rebind_from {
            if let Some(path) = self.find(old) {
                path.handle = handle;
                path.confirmed = true;
                path.credit += initial_credit;
                return true;
            }
            return false;
        }
        let key = handle.key();
        if let Some(path) = self.find(key) {
            path.confirmed = true;
            path.credit += initial_credit;
            return true;
        }
        let mut path = DownstreamPath::new(handle, true);
        path.credit = initial_credit;
        self.paths.push(path);
        true
    }

    pub fn find(&mut self, key: PathKey) -> Option<&mut DownstreamPath> {
        self.paths.iter_mut().find(|p| p.handle.key() == key)
    }

    #[must_use]
    pub fn contains(&self, key: PathKey) -> bool {
        self.paths.iter().any(|p| p.handle.key() == key)
    }

    pub fn remove_path(&mut self, key: PathKey) -> bool {
        let before = self.paths.len();
        self.paths.retain(|p| p.handle.key() != key);
        self.paths.len() != before
    }

    /// Appends a message to the buffer of every path.
    pub fn push(&mut self, msg: DataMessage) {
        match self.paths.split_last_mut() {
            None => {}
            Some((last, rest)) => {
                for path in rest {
                    path.buf.push_back(msg.clone());
                }
                last.buf.push_back(msg);
            }
        }
    }

    /// Books an acknowledgement on one path.
    ///
    /// Returns the path's new state, or `None` when the path is unknown.
    pub fn ack(&mut self, key: PathKey, batch_id: u64, demand: u64) -> Option<()> {
        let path = self.find(key)?;
        let next = batch_id + 1;
        if next > path.next_ack_id {
            path.next_ack_id = next;
        }
        path.credit += demand;
        Some(())
    }

    /// Drains buffers into batches wherever credit allows.
    ///
    /// Batches are ordered per path and no message is ever sent twice on
    /// the same path. Returns the keys of sinks that went away.
    pub fn emit_batches(&mut self, from: &PeerHandle) -> SmallVec<[PathKey; 1]> {
        let mut dead: SmallVec<[PathKey; 1]> = SmallVec::new();
        let sid = self.sid;
        for path in &mut self.paths {
            if !path.confirmed {
                continue;
            }
            while path.credit > 0 && !path.buf.is_empty() {
                let take = path
                    .credit
                    .min(self.max_batch)
                    .min(path.buf.len() as u64) as usize;
                let messages: Vec<DataMessage> = path.buf.drain(..take).collect();
                let id = path.next_batch_id;
                path.next_batch_id += 1;
                path.credit -= take as u64;
                trace!(%sid, id, size = take, "emitting batch");
                let delivered = match &path.handle {
                    SinkHandle::Local { tx, .. } => {
                        tx.send(Batch { sid, id, messages }).is_ok()
                    }
                    SinkHandle::Peer(peer) => peer
                        .send_frame(
                            from,
                            Frame::Batch {
                                sid,
                                batch_id: id,
                                messages,
                            },
                        )
                        .is_ok(),
                };
                if !delivered {
                    dead.push(path.handle.key());
                    break;
                }
            }
        }
        dead
    }

    /// Cancels all paths, discarding buffered messages.
    ///
    /// Peer sinks are told why; local sinks observe their channel closing.
    pub fn abort(&mut self, from: &PeerHandle, reason: CloseReason) {
        for path in self.paths.drain(..) {
            if let SinkHandle::Peer(peer) = &path.handle {
                let _ = peer.send_frame(
                    from,
                    Frame::Close {
                        sid: self.sid,
                        reason,
                    },
                );
            }
        }
    }

    /// During shutdown, releases consumers that have nothing pending.
    pub fn close_idle_paths(&mut self) {
        self.paths.retain(|p| !p.is_idle());
    }
}
