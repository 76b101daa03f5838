//! Shared helpers for the endpoint integration suites.
//!
//! Cores are driven deterministically: tests enqueue mailbox messages and
//! pump every core until the mesh goes quiet, so no runtime or sleeping is
//! involved anywhere.

#![allow(dead_code)]

use meshbus_core::actor::Core;
use meshbus_core::config::CoreConfig;
use meshbus_core::error::CoreError;
use meshbus_core::filter::{filter_of, Filter};
use meshbus_core::ids::{NodeId, SinkId, StreamId};
use meshbus_core::mailbox::{reply_channel, CoreMsg};
use meshbus_core::message::{Batch, DataMessage};
use meshbus_core::peer::PeerInfo;
use meshbus_core::status::{CoreObserver, Event};
use parking_lot::Mutex;
use std::sync::Arc;

pub fn core(node: u64) -> Core {
    core_with(CoreConfig::new().with_node(NodeId::from_raw(node)))
}

pub fn core_with(cfg: CoreConfig) -> Core {
    Core::new(cfg)
}

/// Runs every core until no mailbox makes progress anymore.
pub fn pump(cores: &mut [&mut Core]) {
    loop {
        let mut progressed = false;
        for core in cores.iter_mut() {
            while core.step() {
                progressed = true;
            }
        }
        if !progressed {
            return;
        }
    }
}

/// Subscribes and waits for the ack.
pub fn subscribe<const N: usize>(core: &mut Core, topics: [&str; N]) {
    let (reply, rx) = reply_channel();
    core.handle()
        .deliver(CoreMsg::Subscribe {
            filter: filter_of(topics),
            reply,
        })
        .unwrap();
    core.run_to_idle();
    rx.try_recv()
        .expect("subscribe not acknowledged")
        .expect("subscribe failed");
}

/// Attaches a worker sink with the given credit window.
pub fn attach_worker(core: &mut Core, credit: u64) -> (SinkId, flume::Receiver<Batch>) {
    let (sink, rx) = flume::unbounded();
    let (reply, reply_rx) = reply_channel();
    core.handle()
        .deliver(CoreMsg::AttachWorker {
            sink,
            initial_credit: credit,
            reply,
        })
        .unwrap();
    core.run_to_idle();
    (reply_rx.try_recv().expect("no sink id"), rx)
}

/// Attaches a store sink with the given credit window.
pub fn attach_store(core: &mut Core, credit: u64) -> (SinkId, flume::Receiver<Batch>) {
    let (sink, rx) = flume::unbounded();
    let (reply, reply_rx) = reply_channel();
    core.handle()
        .deliver(CoreMsg::AttachStore {
            sink,
            initial_credit: credit,
            reply,
        })
        .unwrap();
    core.run_to_idle();
    (reply_rx.try_recv().expect("no sink id"), rx)
}

/// Registers a credit-governed local source.
pub fn attach_source(core: &mut Core) -> (StreamId, flume::Receiver<u64>) {
    let (grants, grants_rx) = flume::unbounded();
    let (reply, reply_rx) = reply_channel();
    core.handle()
        .deliver(CoreMsg::AttachSource { grants, reply })
        .unwrap();
    core.run_to_idle();
    (reply_rx.try_recv().expect("no source sid"), grants_rx)
}

/// Fire-and-forget publish through the mailbox.
pub fn publish(core: &Core, topic: &str, value: u64) {
    core.handle()
        .deliver(CoreMsg::PublishData {
            topic: topic.into(),
            value: value.into(),
        })
        .unwrap();
}

/// Flattens everything a sink received, acking each batch.
pub fn drain_acked(core: &Core, sink: SinkId, rx: &flume::Receiver<Batch>) -> Vec<DataMessage> {
    let mut out = Vec::new();
    while let Ok(batch) = rx.try_recv() {
        let _ = core.handle().deliver(CoreMsg::SinkAck {
            sink,
            batch_id: batch.id,
            demand: batch.len() as u64,
        });
        out.extend(batch.messages);
    }
    out
}

/// Flattens everything a sink received without acknowledging.
pub fn drain(rx: &flume::Receiver<Batch>) -> Vec<DataMessage> {
    let mut out = Vec::new();
    while let Ok(batch) = rx.try_recv() {
        out.extend(batch.messages);
    }
    out
}

/// Starts `a.peer(b)` and pumps both sides to completion.
pub fn connect(a: &mut Core, b: &mut Core) -> Result<PeerInfo, CoreError> {
    let (reply, rx) = reply_channel();
    a.handle()
        .deliver(CoreMsg::PeerToHandle {
            peer: b.handle(),
            reply,
        })
        .unwrap();
    pump(&mut [a, b]);
    rx.try_recv().expect("peering never completed")
}

/// Observer recording every status/error event for assertions.
#[derive(Clone, Default)]
pub struct EventLog {
    events: Arc<Mutex<Vec<Event>>>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn recorder(&self) -> Box<dyn CoreObserver> {
        Box::new(self.clone())
    }

    pub fn take(&self) -> Vec<Event> {
        std::mem::take(&mut self.events.lock())
    }

    pub fn snapshot(&self) -> Vec<Event> {
        self.events.lock().clone()
    }
}

impl CoreObserver for EventLog {
    fn on_event(&mut self, event: &Event) {
        self.events.lock().push(event.clone());
    }
}

/// Convenience: the status codes seen so far, in order.
pub fn status_codes(log: &EventLog) -> Vec<String> {
    log.snapshot()
        .iter()
        .map(|e| match e {
            Event::Status { code, .. } => code.to_string(),
            Event::Error { code, .. } => code.to_string(),
        })
        .collect()
}

pub fn empty_filter() -> Filter {
    Filter::new()
}

/// A raw mailbox standing in for a remote endpoint, scripted by hand so a
/// test controls every frame and every ack.
pub struct ScriptedPeer {
    pub handle: meshbus_core::mailbox::PeerHandle,
    pub rx: flume::Receiver<CoreMsg>,
}

impl ScriptedPeer {
    pub fn new(node: u64) -> Self {
        let (tx, rx) = flume::unbounded();
        Self {
            handle: meshbus_core::mailbox::PeerHandle::new(NodeId::from_raw(node), tx),
            rx,
        }
    }

    /// All frames received since the last call.
    pub fn frames(&self) -> Vec<meshbus_core::protocol::Frame> {
        self.rx
            .drain()
            .filter_map(|msg| match msg {
                CoreMsg::FromPeer { frame, .. } => Some(frame),
                _ => None,
            })
            .collect()
    }

    pub fn send(&self, core: &Core, frame: meshbus_core::protocol::Frame) {
        core.handle()
            .deliver(CoreMsg::FromPeer {
                from: self.handle.clone(),
                frame,
            })
            .unwrap();
    }
}
