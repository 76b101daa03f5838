//! Network addressing and the endpoint-local network cache.
//!
//! The cache keeps a bidirectional mapping between peer identities and the
//! network addresses they were reached under. Address resolution is
//! asynchronous from the core task's point of view: a lookup is started,
//! and the answer comes back later as a continuation message, so the
//! continuation must tolerate state that changed in between.
//!
//! Real transports are out of scope; the [`AddressBook`] is the process-
//! wide directory a transport would normally provide.

use crate::ids::NodeId;
use crate::mailbox::PeerHandle;
use hashbrown::HashMap;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;

/// Location of an endpoint on the network.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NetworkAddress {
    pub host: String,
    pub port: u16,
}

impl NetworkAddress {
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for NetworkAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Process-wide directory mapping addresses to endpoint handles.
///
/// Shared by every endpoint of one mesh; the stand-in for the transport's
/// connection establishment.
#[derive(Debug, Clone, Default)]
pub struct AddressBook {
    inner: Arc<Mutex<HashMap<NetworkAddress, PeerHandle>>>,
}

impl AddressBook {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, addr: NetworkAddress, handle: PeerHandle) {
        self.inner.lock().insert(addr, handle);
    }

    pub fn deregister(&self, addr: &NetworkAddress) {
        self.inner.lock().remove(addr);
    }

    #[must_use]
    pub fn lookup(&self, addr: &NetworkAddress) -> Option<PeerHandle> {
        self.inner.lock().get(addr).cloned()
    }
}

/// Bidirectional node ↔ address cache, owned by one core task.
#[derive(Debug, Default)]
pub struct NetworkCache {
    by_node: HashMap<NodeId, NetworkAddress>,
    by_addr: HashMap<NetworkAddress, NodeId>,
}

impl NetworkCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that `node` was reached under `addr`.
    pub fn insert(&mut self, node: NodeId, addr: NetworkAddress) {
        self.by_addr.insert(addr.clone(), node);
        self.by_node.insert(node, addr);
    }

    /// Forgets a node and its address.
    pub fn remove(&mut self, node: NodeId) {
        if let Some(addr) = self.by_node.remove(&node) {
            self.by_addr.remove(&addr);
        }
    }

    #[must_use]
    pub fn find_address(&self, node: NodeId) -> Option<&NetworkAddress> {
        self.by_node.get(&node)
    }

    #[must_use]
    pub fn find_node(&self, addr: &NetworkAddress) -> Option<NodeId> {
        self.by_addr.get(addr).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_maps_both_directions() {
        let mut cache = NetworkCache::new();
        let node = NodeId::from_raw(1);
        let addr = NetworkAddress::new("host-a", 9999);
        cache.insert(node, addr.clone());
        assert_eq!(cache.find_address(node), Some(&addr));
        assert_eq!(cache.find_node(&addr), Some(node));

        cache.remove(node);
        assert_eq!(cache.find_address(node), None);
        assert_eq!(cache.find_node(&addr), None);
    }

    #[test]
    fn address_displays_as_host_port() {
        assert_eq!(NetworkAddress::new("example", 4040).to_string(), "example:4040");
    }
}
