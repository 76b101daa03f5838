//! The stream governor.
//!
//! Central per-endpoint multiplexer: one upstream aggregator over every
//! producer (remote peers and local publishers), a workers lane, a stores
//! lane, and one downstream lane per peer. All filter matching, fan-out,
//! credit assignment, and the peering handshake happen here, serially,
//! inside the core task.

use crate::config::CoreConfig;
use crate::error::CoreError;
use crate::filter::Filter;
use crate::ids::{NodeId, SinkId, StreamId};
use crate::lane::{Lane, PathKey, SinkHandle};
use crate::mailbox::PeerHandle;
use crate::message::{Batch, Command, DataMessage, Payload};
use crate::path::{Upstream, UpstreamSource};
use crate::peer::{PeerEntry, PeerInfo, PeerStatus};
use crate::protocol::{CloseReason, Frame};
use crate::topic::Topic;
use hashbrown::HashMap;
use smallvec::SmallVec;
use tracing::{debug, info, trace, warn};

/// Lifecycle events the governor queues for the core task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GovernorEvent {
    /// A previously unknown endpoint showed up.
    Discovered(NodeId),
    /// Handshake completed; the peer is streaming in both directions.
    PeerAdded(NodeId),
    /// We tore the peering down deliberately.
    PeerRemoved(NodeId),
    /// The remote side went away.
    PeerLost(NodeId),
    /// No path to the endpoint remains.
    Unreachable(NodeId),
    /// A peer misbehaved or a local operation failed.
    PeerError { node: NodeId, error: CoreError },
    /// The governor reached the end of its shutdown protocol.
    Terminated,
}

/// Outcome of a local peering request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeeringStart {
    /// Handshake initiated; completion arrives as `PeerAdded`.
    Started,
    /// A handshake with this endpoint is already underway.
    Pending,
    /// Already peered.
    AlreadyPeered,
}

pub struct StreamGovernor {
    self_handle: PeerHandle,
    filter: Filter,
    min_buffer_size: u64,
    max_batch_size: u64,
    max_credit_window: u64,
    in_: Upstream,
    workers: Lane,
    stores: Lane,
    peers: HashMap<NodeId, PeerEntry>,
    /// Incoming stream id → owning peer.
    incoming: HashMap<StreamId, NodeId>,
    next_sink: u64,
    next_stream: u32,
    shutting_down: bool,
    terminated: bool,
    events: Vec<GovernorEvent>,
}

impl StreamGovernor {
    #[must_use]
    pub fn new(self_handle: PeerHandle, cfg: &CoreConfig) -> Self {
        let node = self_handle.node();
        let workers = Lane::new(StreamId::new(node, 1), cfg.max_batch_size);
        let stores = Lane::new(StreamId::new(node, 2), cfg.max_batch_size);
        debug!(workers_sid = %workers.sid(), stores_sid = %stores.sid(),
               "started governor");
        Self {
            self_handle,
            filter: cfg.initial_filter.clone(),
            min_buffer_size: cfg.min_buffer_size,
            max_batch_size: cfg.max_batch_size,
            max_credit_window: cfg.max_credit_window,
            in_: Upstream::new(),
            workers,
            stores,
            peers: HashMap::new(),
            incoming: HashMap::new(),
            next_sink: 0,
            next_stream: 2,
            shutting_down: false,
            terminated: false,
            events: Vec::new(),
        }
    }

    // --- properties -------------------------------------------------------

    #[must_use]
    pub fn node(&self) -> NodeId {
        self.self_handle.node()
    }

    #[must_use]
    pub const fn filter(&self) -> &Filter {
        &self.filter
    }

    #[must_use]
    pub const fn is_shutting_down(&self) -> bool {
        self.shutting_down
    }

    #[must_use]
    pub const fn is_terminated(&self) -> bool {
        self.terminated
    }

    #[must_use]
    pub fn has_peer(&self, node: NodeId) -> bool {
        self.peers.contains_key(&node)
    }

    #[must_use]
    pub fn status_of(&self, node: NodeId) -> Option<PeerStatus> {
        self.peers.get(&node).map(|p| p.status)
    }

    pub fn take_events(&mut self) -> Vec<GovernorEvent> {
        std::mem::take(&mut self.events)
    }

    #[must_use]
    pub fn peer_infos(&self) -> Vec<PeerInfo> {
        self.peers
            .values()
            .map(|p| PeerInfo {
                node: p.node(),
                address: None,
                status: p.status,
                filter: p.filter.clone(),
            })
            .collect()
    }

    fn next_stream_id(&mut self) -> StreamId {
        self.next_stream += 1;
        StreamId::new(self.node(), self.next_stream)
    }

    // --- filter management ------------------------------------------------

    /// Adds topics to the local filter, re-advertising to peers on change.
    pub fn subscribe(&mut self, additions: Filter) -> Result<(), CoreError> {
        if self.shutting_down {
            return Err(CoreError::ShuttingDown);
        }
        if !self.filter.extend(additions) {
            return Ok(());
        }
        debug!(filter = %self.filter, "filter changed, updating peers");
        self.update_filters_on_peers();
        Ok(())
    }

    /// The filter we advertise to `target`: our own subscriptions plus the
    /// interests of every *other* peer, so messages route transitively.
    /// Excluding the target keeps its own interests from reflecting back.
    fn advertised_for(&self, target: NodeId) -> Filter {
        let mut filter = self.filter.clone();
        for entry in self.peers.values() {
            if entry.node() != target {
                filter.extend(entry.filter.clone());
            }
        }
        filter
    }

    /// Ships the full advertised filter to every peer whose view changed.
    fn update_filters_on_peers(&mut self) {
        let nodes: Vec<NodeId> = self.peers.keys().copied().collect();
        let mut dead: SmallVec<[NodeId; 2]> = SmallVec::new();
        for node in nodes {
            let advertised = self.advertised_for(node);
            let Some(entry) = self.peers.get_mut(&node) else {
                continue;
            };
            if entry.status < PeerStatus::Connected || entry.advertised == advertised {
                continue;
            }
            entry.advertised = advertised.clone();
            let update = Frame::FilterUpdate { filter: advertised };
            if entry.handle.send_frame(&self.self_handle, update).is_err() {
                dead.push(node);
            }
        }
        for node in dead {
            self.sever(node, CoreError::PeerDisconnected(node));
        }
    }

    // --- local publishing -------------------------------------------------

    pub fn publish_data(&mut self, topic: Topic, value: impl Into<crate::data::Data>) -> Result<(), CoreError> {
        self.publish_local(DataMessage::data(topic, value))
    }

    pub fn publish_command(&mut self, topic: Topic, command: Command) -> Result<(), CoreError> {
        self.publish_local(DataMessage::command(topic, command))
    }

    /// Routes a locally published message: peers by their advertised
    /// filters, the local lanes by our own.
    pub fn publish_local(&mut self, msg: DataMessage) -> Result<(), CoreError> {
        if self.shutting_down {
            return Err(CoreError::ShuttingDown);
        }
        trace!(topic = %msg.topic, "local publish");
        for entry in self.peers.values_mut() {
            if entry.status == PeerStatus::Severing {
                continue;
            }
            if entry.filter.matches(&msg.topic) {
                entry.out.push(msg.clone());
            }
        }
        if self.filter.matches(&msg.topic) {
            match msg.payload {
                Payload::Data(_) => self.workers.push(msg),
                Payload::Command(_) => self.stores.push(msg),
            }
        }
        self.emit_all();
        self.assign_credit(None);
        Ok(())
    }

    // --- local sinks ------------------------------------------------------

    pub fn attach_worker(&mut self, sink: flume::Sender<Batch>, initial_credit: u64) -> SinkId {
        self.next_sink += 1;
        let id = SinkId(self.next_sink);
        self.workers
            .confirm_path(None, SinkHandle::Local { id, tx: sink }, initial_credit);
        debug!(%id, initial_credit, "worker attached");
        self.assign_credit(None);
        id
    }

    pub fn attach_store(&mut self, sink: flume::Sender<Batch>, initial_credit: u64) -> SinkId {
        self.next_sink += 1;
        let id = SinkId(self.next_sink);
        self.stores
            .confirm_path(None, SinkHandle::Local { id, tx: sink }, initial_credit);
        debug!(%id, initial_credit, "store attached");
        self.assign_credit(None);
        id
    }

    pub fn detach_sink(&mut self, id: SinkId) {
        let key = PathKey::Sink(id);
        let _ = self.workers.remove_path(key) || self.stores.remove_path(key);
        self.emit_all();
        self.assign_credit(None);
        self.shutdown_if_at_end("detached last local sink");
    }

    /// Acknowledgement from a locally attached consumer.
    pub fn local_ack(&mut self, id: SinkId, batch_id: u64, demand: u64) {
        let key = PathKey::Sink(id);
        if self.workers.ack(key, batch_id, demand).is_none()
            && self.stores.ack(key, batch_id, demand).is_none()
        {
            // The consumer raced its own detach; nothing to book.
            return;
        }
        self.emit_all();
        self.assign_credit(None);
        self.shutdown_if_at_end("received sink ack");
    }

    // --- local sources ----------------------------------------------------

    /// Registers a credit-governed local publisher.
    pub fn attach_source(&mut self, grants: flume::Sender<u64>) -> Result<StreamId, CoreError> {
        if self.shutting_down {
            return Err(CoreError::ShuttingDown);
        }
        let sid = self.next_stream_id();
        self.in_.add_path(sid, UpstreamSource::Local(grants));
        debug!(%sid, "local source attached");
        self.assign_credit(None);
        Ok(sid)
    }

    pub fn close_source(&mut self, sid: StreamId) {
        if self.in_.remove_path(sid).is_some() {
            debug!(%sid, "local source closed");
            self.assign_credit(None);
            self.shutdown_if_at_end("closed last local source");
        }
    }

    /// A batch from a local source; same credit contract as peer batches.
    pub fn source_batch(
        &mut self,
        sid: StreamId,
        batch_id: u64,
        messages: Vec<DataMessage>,
    ) -> Result<(), CoreError> {
        let path = self
            .in_
            .find(sid)
            .ok_or(CoreError::InvalidUpstream(sid))?;
        path.accept_batch(batch_id, messages.len() as u64)?;
        for msg in messages {
            for entry in self.peers.values_mut() {
                if entry.status == PeerStatus::Severing {
                    continue;
                }
                if entry.filter.matches(&msg.topic) {
                    entry.out.push(msg.clone());
                }
            }
            if self.filter.matches(&msg.topic) {
                match msg.payload {
                    Payload::Data(_) => self.workers.push(msg),
                    Payload::Command(_) => self.stores.push(msg),
                }
            }
        }
        self.emit_all();
        self.assign_credit(None);
        Ok(())
    }

    // --- peering ----------------------------------------------------------

    /// Starts a handshake towards `peer`; idempotent for known nodes.
    pub fn start_peering(&mut self, peer: PeerHandle) -> Result<PeeringStart, CoreError> {
        if self.shutting_down {
            return Err(CoreError::ShuttingDown);
        }
        let node = peer.node();
        if node == self.node() {
            return Err(CoreError::peer_invalid("cannot peer with self"));
        }
        if let Some(entry) = self.peers.get(&node) {
            return Ok(if entry.status == PeerStatus::Peered {
                PeeringStart::AlreadyPeered
            } else {
                PeeringStart::Pending
            });
        }
        self.events.push(GovernorEvent::Discovered(node));
        let advertised = self.advertised_for(node);
        let out_sid = self.next_stream_id();
        let mut entry =
            PeerEntry::new(peer.clone(), Filter::new(), out_sid, self.max_batch_size, true);
        entry.advertised = advertised.clone();
        self.peers.insert(node, entry);
        debug!(%node, %out_sid, "peering requested");
        let hello = Frame::Hello {
            node: self.node(),
            filter: advertised,
        };
        if peer.send_frame(&self.self_handle, hello).is_err() {
            self.peers.remove(&node);
            self.events.push(GovernorEvent::Unreachable(node));
            return Err(CoreError::PeerDisconnected(node));
        }
        Ok(PeeringStart::Started)
    }

    /// Removes a peering; `peer_removed` is emitted for the local request.
    pub fn unpeer(&mut self, node: NodeId) -> Result<(), CoreError> {
        if !self.peers.contains_key(&node) {
            return Err(CoreError::peer_invalid(node.to_string()));
        }
        self.drop_peer(node, false);
        Ok(())
    }

    /// Dispatches one frame from a peer, containing protocol violations:
    /// the offending peer is dropped, the governor keeps running.
    pub fn handle_frame(&mut self, from: &PeerHandle, frame: Frame) {
        let node = from.node();
        let frame_name = frame.name();
        let result = match frame {
            Frame::Hello { node: _, filter } => self.on_hello(from, filter),
            Frame::HelloAck { node: _, filter, sid } => self.on_hello_ack(from, filter, sid),
            Frame::Open { sid } => self.on_open(from, sid),
            Frame::AckOpen { sid } => self.on_ack_open(from, sid),
            Frame::Batch {
                sid,
                batch_id,
                messages,
            } => self.on_batch(from, sid, batch_id, messages),
            Frame::BatchAck {
                sid,
                batch_id,
                new_credit,
            } => self.on_batch_ack(from, sid, batch_id, new_credit),
            Frame::FilterUpdate { filter } => self.on_filter_update(from, filter),
            Frame::Close { sid: _, reason } => {
                self.on_disconnect(node, reason);
                Ok(())
            }
            Frame::Bye => {
                self.on_disconnect(node, CloseReason::UserShutdown);
                Ok(())
            }
        };
        if let Err(error) = result {
            if error.is_protocol_violation() {
                warn!(%node, frame = frame_name, %error, "dropping misbehaving peer");
                self.events.push(GovernorEvent::PeerError {
                    node,
                    error: CoreError::PeerIncompatible(node),
                });
                if self.peers.contains_key(&node) {
                    self.drop_peer(node, true);
                }
            } else if matches!(error, CoreError::PeerDisconnected(_)) {
                warn!(%node, frame = frame_name, "transport to peer failed");
                self.sever(node, error);
            } else {
                debug!(%node, frame = frame_name, %error, "ignoring frame");
            }
        }
    }

    fn on_hello(&mut self, from: &PeerHandle, peer_filter: Filter) -> Result<(), CoreError> {
        let node = from.node();
        let my_node = self.node();
        let my_filter = self.advertised_for(node);
        if let Some(entry) = self.peers.get_mut(&node) {
            // Crossed handshakes collapse deterministically: only the
            // request from the larger node id gets answered.
            let crossing =
                entry.initiated && entry.status == PeerStatus::Connecting && node > my_node;
            if !crossing {
                let conflicting = entry.filter != peer_filter && !entry.filter.is_empty();
                if conflicting {
                    self.events.push(GovernorEvent::PeerError {
                        node,
                        error: CoreError::peer_invalid("duplicate request with conflicting filter"),
                    });
                }
                trace!(%node, "dropping duplicate peering request");
                return Ok(());
            }
            entry.initiated = false;
            entry.filter = peer_filter;
            entry.advertised = my_filter.clone();
            let sid = entry.outgoing_sid();
            let ack = Frame::HelloAck {
                node: my_node,
                filter: my_filter,
                sid,
            };
            if entry.handle.send_frame(&self.self_handle, ack).is_err() {
                return Err(CoreError::PeerDisconnected(node));
            }
            self.update_filters_on_peers();
            return Ok(());
        }
        self.events.push(GovernorEvent::Discovered(node));
        let advertised = self.advertised_for(node);
        let out_sid = self.next_stream_id();
        let mut entry = PeerEntry::new(
            from.clone(),
            peer_filter,
            out_sid,
            self.max_batch_size,
            false,
        );
        entry.advertised = advertised.clone();
        debug!(%node, %out_sid, "accepting peering request");
        let ack = Frame::HelloAck {
            node: my_node,
            filter: advertised,
            sid: out_sid,
        };
        let delivered = entry.handle.send_frame(&self.self_handle, ack).is_ok();
        self.peers.insert(node, entry);
        if !delivered {
            self.peers.remove(&node);
            self.events.push(GovernorEvent::Unreachable(node));
            return Ok(());
        }
        self.update_filters_on_peers();
        Ok(())
    }

    fn on_hello_ack(
        &mut self,
        from: &PeerHandle,
        peer_filter: Filter,
        sid: StreamId,
    ) -> Result<(), CoreError> {
        let node = from.node();
        let Some(entry) = self.peers.get_mut(&node) else {
            trace!(%node, "HELLO_ACK for vanished peering");
            return Ok(());
        };
        if entry.incoming_sid.is_some() {
            return Err(CoreError::UnexpectedMessage("HELLO_ACK"));
        }
        entry.filter = peer_filter;
        entry.incoming_sid = Some(sid);
        entry.status = PeerStatus::Connected;
        let out_sid = entry.outgoing_sid();
        let handle = entry.handle.clone();
        self.incoming.insert(sid, node);
        self.in_.add_path(sid, UpstreamSource::Peer(handle.clone()));
        // Confirm their downstream, grant it credit, open ours.
        handle
            .send_frame(&self.self_handle, Frame::AckOpen { sid })
            .map_err(|_| CoreError::PeerDisconnected(node))?;
        self.assign_credit(Some(sid));
        handle
            .send_frame(&self.self_handle, Frame::Open { sid: out_sid })
            .map_err(|_| CoreError::PeerDisconnected(node))?;
        self.maybe_peered(node);
        self.update_filters_on_peers();
        Ok(())
    }

    fn on_open(&mut self, from: &PeerHandle, sid: StreamId) -> Result<(), CoreError> {
        let node = from.node();
        let Some(entry) = self.peers.get_mut(&node) else {
            trace!(%node, "OPEN for vanished peering");
            return Ok(());
        };
        if entry.incoming_sid.is_some() {
            return Err(CoreError::UnexpectedMessage("OPEN"));
        }
        entry.incoming_sid = Some(sid);
        if entry.status < PeerStatus::Connected {
            entry.status = PeerStatus::Connected;
        }
        let handle = entry.handle.clone();
        self.incoming.insert(sid, node);
        self.in_.add_path(sid, UpstreamSource::Peer(handle.clone()));
        handle
            .send_frame(&self.self_handle, Frame::AckOpen { sid })
            .map_err(|_| CoreError::PeerDisconnected(node))?;
        self.assign_credit(Some(sid));
        self.maybe_peered(node);
        self.update_filters_on_peers();
        Ok(())
    }

    fn on_ack_open(&mut self, from: &PeerHandle, sid: StreamId) -> Result<(), CoreError> {
        let node = from.node();
        let Some(entry) = self.peers.get_mut(&node) else {
            trace!(%node, "ACK_OPEN for vanished peering");
            return Ok(());
        };
        if sid != entry.outgoing_sid() {
            return Err(CoreError::InvalidDownstream(sid));
        }
        let handle = entry.handle.clone();
        entry
            .out
            .confirm_path(None, SinkHandle::Peer(handle), 0);
        if entry.status < PeerStatus::Connected {
            entry.status = PeerStatus::Connected;
        }
        self.maybe_peered(node);
        self.emit_all();
        Ok(())
    }

    fn maybe_peered(&mut self, node: NodeId) {
        let Some(entry) = self.peers.get_mut(&node) else {
            return;
        };
        if entry.status != PeerStatus::Peered && entry.has_both_paths() {
            entry.status = PeerStatus::Peered;
            info!(%node, "peering established");
            self.events.push(GovernorEvent::PeerAdded(node));
        }
    }

    /// The only place where peer-to-peer forwarding happens.
    fn on_batch(
        &mut self,
        from: &PeerHandle,
        sid: StreamId,
        batch_id: u64,
        messages: Vec<DataMessage>,
    ) -> Result<(), CoreError> {
        let source = from.node();
        if self.incoming.get(&sid) != Some(&source) {
            return Err(CoreError::InvalidUpstream(sid));
        }
        let path = self
            .in_
            .find(sid)
            .ok_or(CoreError::InvalidUpstream(sid))?;
        path.accept_batch(batch_id, messages.len() as u64)?;
        trace!(%source, batch_id, size = messages.len(), "upstream batch");
        for msg in messages {
            let msg = msg.with_origin(source);
            // Forward to every other interested peer; never echo.
            for entry in self.peers.values_mut() {
                if entry.node() == source || entry.status == PeerStatus::Severing {
                    continue;
                }
                if entry.filter.matches(&msg.topic) {
                    entry.out.push(msg.clone());
                }
            }
            // The sender matched our advertised filter, which may carry
            // other peers' interests; local lanes only take what our own
            // filter admits.
            if self.filter.matches(&msg.topic) {
                match msg.payload {
                    Payload::Data(_) => self.workers.push(msg),
                    Payload::Command(_) => self.stores.push(msg),
                }
            }
        }
        self.emit_all();
        self.assign_credit(Some(sid));
        Ok(())
    }

    fn on_batch_ack(
        &mut self,
        from: &PeerHandle,
        sid: StreamId,
        batch_id: u64,
        new_credit: u64,
    ) -> Result<(), CoreError> {
        let node = from.node();
        let Some(entry) = self.peers.get_mut(&node) else {
            trace!(%node, "BATCH_ACK for vanished peering");
            return Ok(());
        };
        if sid != entry.outgoing_sid() {
            return Err(CoreError::InvalidDownstream(sid));
        }
        let key = entry.out_key();
        entry.out.ack(key, batch_id, new_credit);
        trace!(%node, batch_id, new_credit, "downstream ack");
        self.emit_all();
        self.assign_credit(None);
        self.shutdown_if_at_end("received peer ack");
        Ok(())
    }

    fn on_filter_update(&mut self, from: &PeerHandle, filter: Filter) -> Result<(), CoreError> {
        let node = from.node();
        let Some(entry) = self.peers.get_mut(&node) else {
            return Ok(());
        };
        debug!(%node, %filter, "peer filter updated");
        // Messages already buffered under the old filter stay buffered.
        entry.filter = filter;
        self.update_filters_on_peers();
        Ok(())
    }

    /// Remote teardown or transport loss.
    fn on_disconnect(&mut self, node: NodeId, reason: CloseReason) {
        if !self.peers.contains_key(&node) {
            return;
        }
        debug!(%node, %reason, "peer disconnected");
        self.drop_peer(node, true);
    }

    fn sever(&mut self, node: NodeId, error: CoreError) {
        self.events.push(GovernorEvent::PeerError { node, error });
        if self.peers.contains_key(&node) {
            self.drop_peer(node, true);
        }
    }

    /// Tears one peering down. `lost` distinguishes remote-initiated
    /// teardown (`peer_lost`) from a local unpeer (`peer_removed`).
    fn drop_peer(&mut self, node: NodeId, lost: bool) {
        let Some(mut entry) = self.peers.remove(&node) else {
            return;
        };
        entry.status = PeerStatus::Severing;
        // Buffered messages on the outgoing path are discarded; the remote
        // never sees a partial batch.
        entry.out.abort(&self.self_handle, CloseReason::UserShutdown);
        if let Some(sid) = entry.incoming_sid {
            self.incoming.remove(&sid);
            self.in_.remove_path(sid);
        }
        self.events.push(if lost {
            GovernorEvent::PeerLost(node)
        } else {
            GovernorEvent::PeerRemoved(node)
        });
        self.update_filters_on_peers();
        self.emit_all();
        self.assign_credit(None);
        self.shutdown_if_at_end("removed peer");
    }

    // --- credit -----------------------------------------------------------

    /// Minimum open credit across all downstream paths plus the slack the
    /// governor is willing to buffer beyond it.
    #[must_use]
    pub fn downstream_credit(&self) -> u64 {
        let mut result = u64::MAX;
        for entry in self.peers.values() {
            if let Some(credit) = entry.out.min_credit() {
                result = result.min(credit);
            }
        }
        if self.workers.num_paths() > 0 {
            result = result.min(self.workers.min_credit().unwrap_or(0));
        }
        if self.stores.num_paths() > 0 {
            result = result.min(self.stores.min_credit().unwrap_or(0));
        }
        if result == u64::MAX {
            result = 0;
        }
        result.saturating_add(self.min_buffer_size)
    }

    /// Messages currently buffered across all downstream lanes.
    #[must_use]
    pub fn downstream_buffer_size(&self) -> u64 {
        let peers: u64 = self.peers.values().map(|p| p.out.buffered()).sum();
        self.workers.buffered() + self.stores.buffered() + peers
    }

    /// Per-producer credit window the upstream may hold right now.
    #[must_use]
    pub fn assignable_credit(&self) -> u64 {
        self.downstream_credit()
            .saturating_sub(self.downstream_buffer_size())
            .min(self.max_credit_window)
    }

    /// Tops upstream credit up to what the downstreams can absorb.
    fn assign_credit(&mut self, force_ack: Option<StreamId>) {
        let target = self.assignable_credit();
        let dead = self
            .in_
            .assign_credit(target, &self.self_handle, force_ack);
        for sid in dead {
            self.in_.remove_path(sid);
            if let Some(node) = self.incoming.get(&sid).copied() {
                self.sever(node, CoreError::PeerDisconnected(node));
            }
        }
    }

    // --- emission ---------------------------------------------------------

    /// Drains every lane that can make progress, removing dead sinks.
    fn emit_all(&mut self) {
        let mut lost_sinks = false;
        for key in self.workers.emit_batches(&self.self_handle) {
            self.workers.remove_path(key);
            lost_sinks = true;
        }
        for key in self.stores.emit_batches(&self.self_handle) {
            self.stores.remove_path(key);
            lost_sinks = true;
        }
        let mut dead_peers: SmallVec<[NodeId; 2]> = SmallVec::new();
        for entry in self.peers.values_mut() {
            if !entry.out.emit_batches(&self.self_handle).is_empty() {
                dead_peers.push(entry.node());
            }
        }
        for node in dead_peers {
            self.sever(node, CoreError::PeerDisconnected(node));
        }
        if lost_sinks {
            self.shutdown_if_at_end("dropped dead local sink");
        }
    }

    // --- termination ------------------------------------------------------

    /// Begins the shutdown protocol: no new local input, buffers drain.
    pub fn shutdown(&mut self) {
        if self.shutting_down {
            return;
        }
        info!("shutdown requested");
        self.shutting_down = true;
        // Local publishers lose their grant channels and stop.
        self.in_.remove_local_sources();
        self.shutdown_if_at_end("shutdown requested");
    }

    #[must_use]
    pub fn no_data_pending(&self) -> bool {
        self.workers.is_clean()
            && self.stores.is_clean()
            && self.peers.values().all(|p| p.out.is_clean())
    }

    #[must_use]
    pub fn at_end(&self) -> bool {
        self.shutting_down
            && !self.in_.has_local_sources()
            && self.workers.is_closed()
            && self.stores.is_closed()
            && self.no_data_pending()
    }

    fn shutdown_if_at_end(&mut self, why: &'static str) {
        if !self.shutting_down || self.terminated {
            return;
        }
        // Local consumers with nothing pending are released during
        // shutdown; their batch channels close with the path.
        self.workers.close_idle_paths();
        self.stores.close_idle_paths();
        if !self.at_end() {
            return;
        }
        info!(why, "governor terminating");
        for entry in self.peers.values() {
            let _ = entry.handle.send_frame(&self.self_handle, Frame::Bye);
        }
        self.peers.clear();
        self.incoming.clear();
        self.terminated = true;
        self.events.push(GovernorEvent::Terminated);
    }
}
