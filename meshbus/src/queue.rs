//! Local subscriber queues.
//!
//! A [`MessageQueue`] is a worker-lane consumer: it receives every data
//! message the endpoint's filter admits, in batches, and acknowledges
//! consumed batches so the governor keeps its credit window open. A
//! [`StoreFeed`] is the same thing for the stores lane.

use meshbus_core::error::CoreError;
use meshbus_core::ids::SinkId;
use meshbus_core::mailbox::{reply_channel, CoreMsg, PeerHandle};
use meshbus_core::message::{Batch, DataMessage};
use std::collections::VecDeque;

use crate::endpoint::Endpoint;

/// How many messages a queue lets the governor keep in flight.
pub const DEFAULT_QUEUE_CREDIT: u64 = 64;

enum LaneKind {
    Workers,
    Stores,
}

/// A consumer of one endpoint's local stream.
pub struct MessageQueue {
    core: PeerHandle,
    sink: SinkId,
    rx: flume::Receiver<Batch>,
    pending: VecDeque<DataMessage>,
}

/// A consumer of one endpoint's data-store command stream.
pub struct StoreFeed {
    inner: MessageQueue,
}

impl MessageQueue {
    /// Attaches a worker consumer with the default credit window.
    pub async fn attach(endpoint: &Endpoint) -> Result<Self, CoreError> {
        Self::attach_with_credit(endpoint, DEFAULT_QUEUE_CREDIT).await
    }

    /// Attaches a worker consumer granting `credit` messages up front.
    pub async fn attach_with_credit(endpoint: &Endpoint, credit: u64) -> Result<Self, CoreError> {
        Self::attach_lane(endpoint, credit, LaneKind::Workers).await
    }

    async fn attach_lane(
        endpoint: &Endpoint,
        credit: u64,
        lane: LaneKind,
    ) -> Result<Self, CoreError> {
        let core = endpoint.handle();
        let (sink_tx, rx) = flume::unbounded();
        let (reply, reply_rx) = reply_channel();
        let msg = match lane {
            LaneKind::Workers => CoreMsg::AttachWorker {
                sink: sink_tx,
                initial_credit: credit,
                reply,
            },
            LaneKind::Stores => CoreMsg::AttachStore {
                sink: sink_tx,
                initial_credit: credit,
                reply,
            },
        };
        core.deliver(msg)?;
        let sink = reply_rx
            .recv_async()
            .await
            .map_err(|_| CoreError::MailboxClosed)?;
        Ok(Self {
            core,
            sink,
            rx,
            pending: VecDeque::new(),
        })
    }

    /// Receives the next message, acknowledging batches as they complete.
    ///
    /// Returns `None` once the endpoint released this consumer.
    pub async fn recv(&mut self) -> Option<DataMessage> {
        loop {
            if let Some(msg) = self.pending.pop_front() {
                return Some(msg);
            }
            match self.rx.recv_async().await {
                Ok(batch) => self.book(batch),
                Err(_) => return None,
            }
        }
    }

    /// Non-blocking variant of [`recv`](Self::recv).
    pub fn try_recv(&mut self) -> Option<DataMessage> {
        loop {
            if let Some(msg) = self.pending.pop_front() {
                return Some(msg);
            }
            match self.rx.try_recv() {
                Ok(batch) => self.book(batch),
                Err(_) => return None,
            }
        }
    }

    fn book(&mut self, batch: Batch) {
        // Replenish the window right away; the queue itself buffers.
        let _ = self.core.deliver(CoreMsg::SinkAck {
            sink: self.sink,
            batch_id: batch.id,
            demand: batch.len() as u64,
        });
        self.pending.extend(batch.messages);
    }
}

impl Drop for MessageQueue {
    fn drop(&mut self) {
        let _ = self.core.deliver(CoreMsg::DetachSink { sink: self.sink });
    }
}

impl StoreFeed {
    /// Attaches a store consumer with the default credit window.
    pub async fn attach(endpoint: &Endpoint) -> Result<Self, CoreError> {
        Self::attach_with_credit(endpoint, DEFAULT_QUEUE_CREDIT).await
    }

    /// Attaches a store consumer granting `credit` messages up front.
    pub async fn attach_with_credit(endpoint: &Endpoint, credit: u64) -> Result<Self, CoreError> {
        let inner = MessageQueue::attach_lane(endpoint, credit, LaneKind::Stores).await?;
        Ok(Self { inner })
    }

    /// Receives the next command message.
    pub async fn recv(&mut self) -> Option<DataMessage> {
        self.inner.recv().await
    }

    /// Non-blocking variant of [`recv`](Self::recv).
    pub fn try_recv(&mut self) -> Option<DataMessage> {
        self.inner.try_recv()
    }
}
