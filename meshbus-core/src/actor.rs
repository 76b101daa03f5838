//! The core task.
//!
//! One [`Core`] per endpoint owns the governor, the network cache, the
//! pending-peering table and the observer chain, and drains the endpoint's
//! mailbox. Handlers run to completion; the async `run` loop merely feeds
//! them, so tests can drive a core deterministically by pumping its
//! mailbox without any runtime.

use crate::config::CoreConfig;
use crate::error::CoreError;
use crate::governor::{GovernorEvent, PeeringStart, StreamGovernor};
use crate::ids::NodeId;
use crate::mailbox::{CoreMsg, PeerHandle, Reply, UnpeerTarget};
use crate::network::{AddressBook, NetworkAddress, NetworkCache};
use crate::peer::PeerInfo;
use crate::status::{CoreObserver, EndpointInfo, ErrorCode, Event, StatusCode};
use hashbrown::HashMap;
use tracing::{debug, trace};

struct PendingPeering {
    replies: Vec<Reply<Result<PeerInfo, CoreError>>>,
}

/// State of one endpoint's core task.
pub struct Core {
    mailbox: flume::Receiver<CoreMsg>,
    self_handle: PeerHandle,
    governor: StreamGovernor,
    cache: NetworkCache,
    book: Option<AddressBook>,
    listen: Option<NetworkAddress>,
    pending: HashMap<NodeId, PendingPeering>,
    addr_pending: HashMap<NetworkAddress, Vec<Reply<Result<PeerInfo, CoreError>>>>,
    awaiters: HashMap<NodeId, Vec<Reply<PeerInfo>>>,
    shutdown_waiters: Vec<Reply<()>>,
    observers: Vec<Box<dyn CoreObserver>>,
    events_enabled: bool,
}

impl Core {
    /// Builds a core and registers it in the address book when configured
    /// with a listen address.
    #[must_use]
    pub fn new(cfg: CoreConfig) -> Self {
        let node = cfg.node.unwrap_or_else(NodeId::random);
        let (tx, rx) = flume::unbounded();
        let self_handle = PeerHandle::new(node, tx);
        if let (Some(book), Some(listen)) = (&cfg.book, &cfg.listen) {
            book.register(listen.clone(), self_handle.clone());
        }
        let governor = StreamGovernor::new(self_handle.clone(), &cfg);
        Self {
            mailbox: rx,
            self_handle,
            governor,
            cache: NetworkCache::new(),
            book: cfg.book.clone(),
            listen: cfg.listen.clone(),
            pending: HashMap::new(),
            addr_pending: HashMap::new(),
            awaiters: HashMap::new(),
            shutdown_waiters: Vec::new(),
            observers: Vec::new(),
            events_enabled: cfg.events_enabled,
        }
    }

    pub fn add_observer(&mut self, observer: Box<dyn CoreObserver>) {
        self.observers.push(observer);
    }

    #[must_use]
    pub fn node(&self) -> NodeId {
        self.self_handle.node()
    }

    /// Handle other endpoints (and local API objects) use to reach us.
    #[must_use]
    pub fn handle(&self) -> PeerHandle {
        self.self_handle.clone()
    }

    #[must_use]
    pub const fn governor(&self) -> &StreamGovernor {
        &self.governor
    }

    #[must_use]
    pub fn is_terminated(&self) -> bool {
        self.governor.is_terminated()
    }

    /// Processes one queued message, if any. Returns `false` when the
    /// mailbox was empty.
    pub fn step(&mut self) -> bool {
        match self.mailbox.try_recv() {
            Ok(msg) => {
                self.handle_msg(msg);
                true
            }
            Err(_) => false,
        }
    }

    /// Drives the core until its mailbox is empty or it terminated.
    pub fn run_to_idle(&mut self) {
        while !self.is_terminated() && self.step() {}
    }

    /// The endpoint's event loop.
    pub async fn run(mut self) {
        let mailbox = self.mailbox.clone();
        while !self.is_terminated() {
            match mailbox.recv_async().await {
                Ok(msg) => self.handle_msg(msg),
                Err(_) => break,
            }
        }
        if let (Some(book), Some(listen)) = (&self.book, &self.listen) {
            book.deregister(listen);
        }
        for obs in &mut self.observers {
            obs.on_terminated();
        }
        debug!(node = %self.node(), "core task finished");
    }

    pub fn handle_msg(&mut self, msg: CoreMsg) {
        trace!(node = %self.node(), ?msg, "handling");
        match msg {
            CoreMsg::Subscribe { filter, reply } => {
                let _ = reply.send(self.governor.subscribe(filter));
            }
            CoreMsg::PublishData { topic, value } => {
                let msg = crate::message::DataMessage::data(topic, value);
                self.notify_published(&msg);
                if let Err(error) = self.governor.publish_local(msg) {
                    debug!(%error, "publish refused");
                }
            }
            CoreMsg::PublishCommand { topic, command } => {
                let msg = crate::message::DataMessage::command(topic, command);
                self.notify_published(&msg);
                if let Err(error) = self.governor.publish_local(msg) {
                    debug!(%error, "publish refused");
                }
            }
            CoreMsg::PeerToHandle { peer, reply } => self.peer_to_handle(peer, reply),
            CoreMsg::PeerToAddress { addr, reply } => self.peer_to_address(addr, reply),
            CoreMsg::Unpeer { target, reply } => {
                let _ = reply.send(self.unpeer(target));
            }
            CoreMsg::AwaitPeer { node, reply } => {
                if let Some(info) = self.info_of_peered(node) {
                    let _ = reply.send(info);
                } else {
                    self.awaiters.entry(node).or_default().push(reply);
                }
            }
            CoreMsg::Shutdown { done } => {
                if let Some(done) = done {
                    self.shutdown_waiters.push(done);
                }
                self.governor.shutdown();
            }
            CoreMsg::NoEvents => self.events_enabled = false,
            CoreMsg::GetPeerInfo { reply } => {
                let infos = self
                    .governor
                    .peer_infos()
                    .into_iter()
                    .map(|mut info| {
                        info.address = self.cache.find_address(info.node).cloned();
                        info
                    })
                    .collect();
                let _ = reply.send(infos);
            }
            CoreMsg::GetFilter { reply } => {
                let _ = reply.send(self.governor.filter().clone());
            }
            CoreMsg::AttachWorker {
                sink,
                initial_credit,
                reply,
            } => {
                let _ = reply.send(self.governor.attach_worker(sink, initial_credit));
            }
            CoreMsg::AttachStore {
                sink,
                initial_credit,
                reply,
            } => {
                let _ = reply.send(self.governor.attach_store(sink, initial_credit));
            }
            CoreMsg::DetachSink { sink } => self.governor.detach_sink(sink),
            CoreMsg::SinkAck {
                sink,
                batch_id,
                demand,
            } => self.governor.local_ack(sink, batch_id, demand),
            CoreMsg::AttachSource { grants, reply } => {
                if let Ok(sid) = self.governor.attach_source(grants) {
                    let _ = reply.send(sid);
                }
            }
            CoreMsg::SourceBatch {
                sid,
                batch_id,
                messages,
            } => {
                for m in &messages {
                    self.notify_published(m);
                }
                if let Err(error) = self.governor.source_batch(sid, batch_id, messages) {
                    debug!(%error, %sid, "source batch refused");
                }
            }
            CoreMsg::CloseSource { sid } => self.governor.close_source(sid),
            CoreMsg::FromPeer { from, frame } => self.governor.handle_frame(&from, frame),
            CoreMsg::Resolved { addr, handle } => self.on_resolved(addr, handle),
        }
        self.drain_events();
    }

    // --- peering ----------------------------------------------------------

    fn peer_to_handle(&mut self, peer: PeerHandle, reply: Reply<Result<PeerInfo, CoreError>>) {
        let node = peer.node();
        match self.governor.start_peering(peer) {
            Ok(PeeringStart::AlreadyPeered) => {
                if let Some(info) = self.info_of_peered(node) {
                    let _ = reply.send(Ok(info));
                }
            }
            Ok(PeeringStart::Started | PeeringStart::Pending) => {
                self.pending
                    .entry(node)
                    .or_insert_with(|| PendingPeering {
                        replies: Vec::new(),
                    })
                    .replies
                    .push(reply);
            }
            Err(error) => {
                self.emit_error(error.code(), EndpointInfo::from_node(node), "peering failed");
                let _ = reply.send(Err(error));
            }
        }
    }

    fn peer_to_address(&mut self, addr: NetworkAddress, reply: Reply<Result<PeerInfo, CoreError>>) {
        // Resolution is asynchronous from the core's point of view: the
        // answer arrives as a continuation message, with other messages
        // free to interleave before it.
        let handle = self.book.as_ref().and_then(|b| b.lookup(&addr));
        let continuation = CoreMsg::Resolved {
            addr: addr.clone(),
            handle,
        };
        if self.self_handle.deliver(continuation).is_err() {
            let _ = reply.send(Err(CoreError::MailboxClosed));
            return;
        }
        // Park the reply under the address until resolution lands.
        self.addr_pending.entry(addr).or_default().push(reply);
    }

    fn on_resolved(&mut self, addr: NetworkAddress, handle: Option<PeerHandle>) {
        let replies = self.addr_pending.remove(&addr).unwrap_or_default();
        let Some(handle) = handle else {
            let error = CoreError::PeerUnavailable(addr.clone());
            self.emit_error(
                ErrorCode::PeerUnavailable,
                EndpointInfo::default().with_address(Some(addr)),
                "unable to connect to remote peer",
            );
            for reply in replies {
                let _ = reply.send(Err(error.clone()));
            }
            return;
        };
        let node = handle.node();
        self.cache.insert(node, addr);
        for reply in replies {
            self.peer_to_handle(handle.clone(), reply);
        }
    }

    fn unpeer(&mut self, target: UnpeerTarget) -> Result<(), CoreError> {
        let node = match target {
            UnpeerTarget::Node(node) => node,
            UnpeerTarget::Address(addr) => match self.cache.find_node(&addr) {
                Some(node) => node,
                None => {
                    self.emit_error(
                        ErrorCode::PeerInvalid,
                        EndpointInfo::default().with_address(Some(addr.clone())),
                        "cannot unpeer from unknown peer",
                    );
                    return Err(CoreError::peer_invalid(addr.to_string()));
                }
            },
        };
        let result = self.governor.unpeer(node);
        if result.is_err() {
            self.emit_error(
                ErrorCode::PeerInvalid,
                self.endpoint_info(node),
                "cannot unpeer from unknown peer",
            );
        }
        result
    }

    fn info_of_peered(&self, node: NodeId) -> Option<PeerInfo> {
        self.governor
            .peer_infos()
            .into_iter()
            .find(|i| i.node == node && i.status == crate::peer::PeerStatus::Peered)
            .map(|mut info| {
                info.address = self.cache.find_address(node).cloned();
                info
            })
    }

    // --- events -----------------------------------------------------------

    fn endpoint_info(&self, node: NodeId) -> EndpointInfo {
        EndpointInfo::from_node(node)
            .with_address(self.cache.find_address(node).cloned())
    }

    fn drain_events(&mut self) {
        loop {
            let events = self.governor.take_events();
            if events.is_empty() {
                return;
            }
            for event in events {
                self.dispatch_event(event);
            }
        }
    }

    fn dispatch_event(&mut self, event: GovernorEvent) {
        match event {
            GovernorEvent::Discovered(node) => self.emit_status(
                StatusCode::EndpointDiscovered,
                self.endpoint_info(node),
                "found a new peer in the network",
            ),
            GovernorEvent::PeerAdded(node) => {
                self.emit_status(
                    StatusCode::PeerAdded,
                    self.endpoint_info(node),
                    "handshake successful",
                );
                self.complete_peering(node);
            }
            GovernorEvent::PeerRemoved(node) => self.emit_status(
                StatusCode::PeerRemoved,
                self.endpoint_info(node),
                "removed connection to remote peer",
            ),
            GovernorEvent::PeerLost(node) => {
                self.emit_status(
                    StatusCode::PeerLost,
                    self.endpoint_info(node),
                    "lost connection to remote peer",
                );
                self.fail_peering(node, CoreError::PeerDisconnected(node));
            }
            GovernorEvent::Unreachable(node) => self.emit_status(
                StatusCode::EndpointUnreachable,
                self.endpoint_info(node),
                "lost the last path",
            ),
            GovernorEvent::PeerError { node, error } => {
                self.emit_error(error.code(), self.endpoint_info(node), "peering error");
                if error.is_protocol_violation()
                    || matches!(error, CoreError::PeerIncompatible(_))
                {
                    self.fail_peering(node, error);
                }
            }
            GovernorEvent::Terminated => {
                debug!(node = %self.node(), "governor terminated");
                for done in self.shutdown_waiters.drain(..) {
                    let _ = done.send(());
                }
            }
        }
    }

    fn complete_peering(&mut self, node: NodeId) {
        if let Some(info) = self.info_of_peered(node) {
            if let Some(pending) = self.pending.remove(&node) {
                for reply in pending.replies {
                    let _ = reply.send(Ok(info.clone()));
                }
            }
            if let Some(waiters) = self.awaiters.remove(&node) {
                for reply in waiters {
                    let _ = reply.send(info.clone());
                }
            }
        }
    }

    fn fail_peering(&mut self, node: NodeId, error: CoreError) {
        if let Some(pending) = self.pending.remove(&node) {
            for reply in pending.replies {
                let _ = reply.send(Err(error.clone()));
            }
        }
    }

    fn emit_status(&mut self, code: StatusCode, endpoint: EndpointInfo, message: &'static str) {
        let event = Event::status(code, endpoint, message);
        self.emit(event);
    }

    fn emit_error(&mut self, code: ErrorCode, endpoint: EndpointInfo, message: &'static str) {
        let event = Event::error(code, endpoint, message);
        self.emit(event);
    }

    fn emit(&mut self, event: Event) {
        debug!(node = %self.node(), ?event, "emit");
        for obs in &mut self.observers {
            obs.on_event(&event);
        }
        if !self.events_enabled {
            return;
        }
        // Shipping must not recurse through the publish checks; events are
        // ordinary local data messages on a reserved topic.
        let msg = event.to_message();
        self.notify_published(&msg);
        let _ = self.governor.publish_local(msg);
    }

    fn notify_published(&mut self, msg: &crate::message::DataMessage) {
        for obs in &mut self.observers {
            obs.on_message(msg);
        }
    }
}
