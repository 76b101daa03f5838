//! Endpoint configuration.

use crate::filter::Filter;
use crate::ids::NodeId;
use crate::network::{AddressBook, NetworkAddress};

/// Configuration for one endpoint core.
///
/// # Examples
///
/// ```
/// use meshbus_core::config::CoreConfig;
///
/// let cfg = CoreConfig::new()
///     .with_min_buffer_size(8)
///     .with_max_batch_size(64);
/// assert_eq!(cfg.min_buffer_size, 8);
/// ```
#[derive(Debug, Clone)]
pub struct CoreConfig {
    /// Endpoint identity; random when not set.
    pub node: Option<NodeId>,

    /// Slack the governor buffers beyond the slowest downstream's credit.
    ///
    /// Default: 5 messages.
    pub min_buffer_size: u64,

    /// Upper bound on the size of a single emitted batch.
    ///
    /// Default: 32 messages.
    pub max_batch_size: u64,

    /// Cap on the credit window granted to any single producer. Without a
    /// cap, two idle peers would ratchet each other's windows up forever.
    ///
    /// Default: 64 messages.
    pub max_credit_window: u64,

    /// Topics subscribed before the endpoint starts.
    pub initial_filter: Filter,

    /// Whether status/error events are shipped on the reserved topics.
    ///
    /// Default: enabled; `no_events` turns it off at runtime.
    pub events_enabled: bool,

    /// Address this endpoint registers itself under, if any.
    pub listen: Option<NetworkAddress>,

    /// Directory used to resolve `peer(host, port)` requests.
    pub book: Option<AddressBook>,
}

impl CoreConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_node(mut self, node: NodeId) -> Self {
        self.node = Some(node);
        self
    }

    #[must_use]
    pub fn with_min_buffer_size(mut self, n: u64) -> Self {
        self.min_buffer_size = n;
        self
    }

    #[must_use]
    pub fn with_max_batch_size(mut self, n: u64) -> Self {
        self.max_batch_size = n.max(1);
        self
    }

    #[must_use]
    pub fn with_max_credit_window(mut self, n: u64) -> Self {
        self.max_credit_window = n.max(1);
        self
    }

    #[must_use]
    pub fn with_initial_filter(mut self, filter: Filter) -> Self {
        self.initial_filter = filter;
        self
    }

    #[must_use]
    pub fn with_events_enabled(mut self, enabled: bool) -> Self {
        self.events_enabled = enabled;
        self
    }

    #[must_use]
    pub fn with_listen(mut self, addr: NetworkAddress) -> Self {
        self.listen = Some(addr);
        self
    }

    #[must_use]
    pub fn with_book(mut self, book: AddressBook) -> Self {
        self.book = Some(book);
        self
    }
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            node: None,
            min_buffer_size: 5,
            max_batch_size: 32,
            max_credit_window: 64,
            initial_filter: Filter::new(),
            events_enabled: true,
            listen: None,
            book: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = CoreConfig::default();
        assert_eq!(cfg.min_buffer_size, 5);
        assert_eq!(cfg.max_batch_size, 32);
        assert_eq!(cfg.max_credit_window, 64);
        assert!(cfg.events_enabled);
        assert!(cfg.initial_filter.is_empty());
    }

    #[test]
    fn batch_size_never_drops_to_zero() {
        let cfg = CoreConfig::new().with_max_batch_size(0);
        assert_eq!(cfg.max_batch_size, 1);
    }
}
