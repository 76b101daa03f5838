//! The public endpoint handle.

use meshbus_core::actor::Core;
use meshbus_core::config::CoreConfig;
use meshbus_core::data::Data;
use meshbus_core::error::CoreError;
use meshbus_core::filter::Filter;
use meshbus_core::ids::NodeId;
use meshbus_core::mailbox::{reply_channel, CoreMsg, PeerHandle, Reply, UnpeerTarget};
use meshbus_core::message::Command;
use meshbus_core::network::NetworkAddress;
use meshbus_core::peer::PeerInfo;
use meshbus_core::status::CoreObserver;
use meshbus_core::topic::Topic;

/// One endpoint of the mesh.
///
/// Spawns its core task on the ambient compio runtime and talks to it
/// exclusively through the mailbox, so an `Endpoint` is cheap to clone and
/// safe to use from any task.
///
/// ## Example
///
/// ```rust,no_run
/// use meshbus::{CoreConfig, Endpoint};
/// use meshbus_core::filter::filter_of;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let ep = Endpoint::spawn(CoreConfig::new());
/// ep.subscribe(filter_of(["sensors/temp"])).await?;
/// ep.publish("sensors/temp", 21u64)?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Endpoint {
    handle: PeerHandle,
}

impl Endpoint {
    /// Spawns a core task with the given configuration.
    #[must_use]
    pub fn spawn(cfg: CoreConfig) -> Self {
        Self::spawn_with_observers(cfg, Vec::new())
    }

    /// Spawns a core task with an observer chain attached.
    #[must_use]
    pub fn spawn_with_observers(cfg: CoreConfig, observers: Vec<Box<dyn CoreObserver>>) -> Self {
        let mut core = Core::new(cfg);
        for obs in observers {
            core.add_observer(obs);
        }
        let handle = core.handle();
        tracing::debug!(node = %core.node(), "spawning endpoint core");
        compio::runtime::spawn(core.run()).detach();
        Self { handle }
    }

    /// This endpoint's identity in the mesh.
    #[must_use]
    pub fn node(&self) -> NodeId {
        self.handle.node()
    }

    /// Handle under which other endpoints can reach this one.
    #[must_use]
    pub fn handle(&self) -> PeerHandle {
        self.handle.clone()
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(Reply<T>) -> CoreMsg,
    ) -> Result<T, CoreError> {
        let (reply, rx) = reply_channel();
        self.handle.deliver(build(reply))?;
        rx.recv_async().await.map_err(|_| CoreError::MailboxClosed)
    }

    /// Adds topics to this endpoint's filter.
    pub async fn subscribe(&self, filter: Filter) -> Result<(), CoreError> {
        self.request(|reply| CoreMsg::Subscribe { filter, reply })
            .await?
    }

    /// Publishes a data value; fire-and-forget.
    pub fn publish(&self, topic: impl Into<Topic>, value: impl Into<Data>) -> Result<(), CoreError> {
        self.handle.deliver(CoreMsg::PublishData {
            topic: topic.into(),
            value: value.into(),
        })
    }

    /// Publishes a data-store command; fire-and-forget.
    pub fn publish_command(
        &self,
        topic: impl Into<Topic>,
        command: Command,
    ) -> Result<(), CoreError> {
        self.handle.deliver(CoreMsg::PublishCommand {
            topic: topic.into(),
            command,
        })
    }

    /// Peers with an endpoint we already hold a handle to. Completes when
    /// the peering is established or failed.
    pub async fn peer_with(&self, peer: PeerHandle) -> Result<PeerInfo, CoreError> {
        self.request(|reply| CoreMsg::PeerToHandle { peer, reply })
            .await?
    }

    /// Peers with the endpoint listening at `host:port`.
    pub async fn peer(&self, host: impl Into<String>, port: u16) -> Result<PeerInfo, CoreError> {
        let addr = NetworkAddress::new(host, port);
        self.request(|reply| CoreMsg::PeerToAddress { addr, reply })
            .await?
    }

    /// Tears down the peering with `node`.
    pub async fn unpeer(&self, node: NodeId) -> Result<(), CoreError> {
        self.request(|reply| CoreMsg::Unpeer {
            target: UnpeerTarget::Node(node),
            reply,
        })
        .await?
    }

    /// Tears down the peering with the endpoint at `host:port`.
    pub async fn unpeer_address(
        &self,
        host: impl Into<String>,
        port: u16,
    ) -> Result<(), CoreError> {
        let addr = NetworkAddress::new(host, port);
        self.request(|reply| CoreMsg::Unpeer {
            target: UnpeerTarget::Address(addr),
            reply,
        })
        .await?
    }

    /// Completes once `node` is fully peered with this endpoint.
    pub async fn await_peer(&self, node: NodeId) -> Result<PeerInfo, CoreError> {
        self.request(|reply| CoreMsg::AwaitPeer { node, reply })
            .await
    }

    /// Stops shipping status/error events on the reserved topics.
    pub fn no_events(&self) -> Result<(), CoreError> {
        self.handle.deliver(CoreMsg::NoEvents)
    }

    /// Snapshot of all known peers.
    pub async fn peers(&self) -> Result<Vec<PeerInfo>, CoreError> {
        self.request(|reply| CoreMsg::GetPeerInfo { reply }).await
    }

    /// The endpoint's current filter.
    pub async fn filter(&self) -> Result<Filter, CoreError> {
        self.request(|reply| CoreMsg::GetFilter { reply }).await
    }

    /// Begins shutdown and waits until every in-flight message has been
    /// acknowledged and the core task terminated.
    pub async fn shutdown(&self) -> Result<(), CoreError> {
        self.request(|reply| CoreMsg::Shutdown { done: Some(reply) })
            .await
    }

    /// Begins shutdown without waiting for completion.
    pub fn shutdown_detached(&self) -> Result<(), CoreError> {
        self.handle.deliver(CoreMsg::Shutdown { done: None })
    }
}
