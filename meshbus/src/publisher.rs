//! Credit-governed local publishers.
//!
//! Where [`Endpoint::publish`](crate::Endpoint::publish) is fire-and-
//! forget, a [`Publisher`] owns an upstream path into the governor and
//! spends credit for every message. When the endpoint's downstreams stop
//! acknowledging, the publisher runs out of credit and stalls, which is
//! the backpressure reaching all the way back to the producer.

use meshbus_core::data::Data;
use meshbus_core::error::CoreError;
use meshbus_core::ids::StreamId;
use meshbus_core::mailbox::{reply_channel, CoreMsg, PeerHandle};
use meshbus_core::message::{Command, DataMessage};
use meshbus_core::topic::Topic;

use crate::endpoint::Endpoint;

/// A flow-controlled producer attached to one endpoint.
pub struct Publisher {
    core: PeerHandle,
    sid: StreamId,
    grants: flume::Receiver<u64>,
    credit: u64,
    next_batch: u64,
}

impl Publisher {
    /// Registers an upstream path on the endpoint.
    pub async fn attach(endpoint: &Endpoint) -> Result<Self, CoreError> {
        let core = endpoint.handle();
        let (grants_tx, grants) = flume::unbounded();
        let (reply, reply_rx) = reply_channel();
        core.deliver(CoreMsg::AttachSource {
            grants: grants_tx,
            reply,
        })?;
        let sid = reply_rx
            .recv_async()
            .await
            .map_err(|_| CoreError::ShuttingDown)?;
        Ok(Self {
            core,
            sid,
            grants,
            credit: 0,
            next_batch: 0,
        })
    }

    /// The upstream stream id this publisher feeds.
    #[must_use]
    pub const fn sid(&self) -> StreamId {
        self.sid
    }

    /// Credit currently available without waiting.
    #[must_use]
    pub fn available_credit(&mut self) -> u64 {
        self.drain_grants();
        self.credit
    }

    /// Publishes a data value, suspending while no credit is available.
    pub async fn publish(
        &mut self,
        topic: impl Into<Topic>,
        value: impl Into<Data>,
    ) -> Result<(), CoreError> {
        let msg = DataMessage::data(topic.into(), value);
        self.send(msg).await
    }

    /// Publishes a data-store command, suspending while out of credit.
    pub async fn publish_command(
        &mut self,
        topic: impl Into<Topic>,
        command: Command,
    ) -> Result<(), CoreError> {
        let msg = DataMessage::command(topic.into(), command);
        self.send(msg).await
    }

    /// Attempts to publish without waiting. Returns `Ok(false)` when the
    /// credit window is exhausted.
    pub fn try_publish(
        &mut self,
        topic: impl Into<Topic>,
        value: impl Into<Data>,
    ) -> Result<bool, CoreError> {
        self.drain_grants();
        if self.credit == 0 {
            return Ok(false);
        }
        self.dispatch(DataMessage::data(topic.into(), value))?;
        Ok(true)
    }

    async fn send(&mut self, msg: DataMessage) -> Result<(), CoreError> {
        self.drain_grants();
        while self.credit == 0 {
            match self.grants.recv_async().await {
                Ok(n) => self.credit += n,
                // Grant channel gone: the endpoint shut down.
                Err(_) => return Err(CoreError::ShuttingDown),
            }
        }
        self.dispatch(msg)
    }

    fn dispatch(&mut self, msg: DataMessage) -> Result<(), CoreError> {
        self.next_batch += 1;
        self.credit -= 1;
        self.core.deliver(CoreMsg::SourceBatch {
            sid: self.sid,
            batch_id: self.next_batch,
            messages: vec![msg],
        })
    }

    fn drain_grants(&mut self) {
        while let Ok(n) = self.grants.try_recv() {
            self.credit += n;
        }
    }
}

impl Drop for Publisher {
    fn drop(&mut self) {
        let _ = self.core.deliver(CoreMsg::CloseSource { sid: self.sid });
    }
}
