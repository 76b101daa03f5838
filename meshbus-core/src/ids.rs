//! Endpoint, stream and sink identifiers.
//!
//! Stream ids are allocated from a per-endpoint monotonic counter and tag
//! the allocating endpoint in their high half, so ids stay globally unique
//! and readable in logs. Equality is always by full value.

use std::fmt;

/// Identity of one endpoint in the mesh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u64);

impl NodeId {
    #[must_use]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Generates a fresh random identity.
    #[must_use]
    pub fn random() -> Self {
        Self(rand::random())
    }

    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }

    /// Low half of the identity, used to tag stream ids.
    #[must_use]
    pub const fn tag(self) -> u32 {
        self.0 as u32
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Identifies one directed stream between two endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamId(u64);

impl StreamId {
    #[must_use]
    pub const fn new(node: NodeId, seq: u32) -> Self {
        Self(((node.tag() as u64) << 32) | seq as u64)
    }

    #[must_use]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }

    /// Tag of the endpoint that allocated this id.
    #[must_use]
    pub const fn node_tag(self) -> u32 {
        (self.0 >> 32) as u32
    }

    #[must_use]
    pub const fn seq(self) -> u32 {
        self.0 as u32
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08x}:{}", self.node_tag(), self.seq())
    }
}

/// Handle of one locally attached sink (worker or store consumer).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SinkId(pub u64);

impl fmt::Display for SinkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sink-{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_id_carries_node_tag_and_seq() {
        let node = NodeId::from_raw(0xAABB_CCDD_1122_3344);
        let sid = StreamId::new(node, 7);
        assert_eq!(sid.node_tag(), 0x1122_3344);
        assert_eq!(sid.seq(), 7);
    }

    #[test]
    fn stream_ids_from_different_nodes_differ() {
        let a = StreamId::new(NodeId::from_raw(1), 1);
        let b = StreamId::new(NodeId::from_raw(2), 1);
        assert_ne!(a, b);
    }
}
