//! Subscription filters.
//!
//! A filter is a set of topic prefixes, kept canonical: sorted and
//! prefix-free (no element is a component-prefix of another). Filters are
//! exchanged between peers in full on every change; there is no delta
//! protocol.

use crate::topic::Topic;
use std::fmt;

/// Canonical prefix-free set of topics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Filter {
    entries: Vec<Topic>,
}

impl Filter {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Builds a filter from arbitrary topics, canonicalizing as it goes.
    #[must_use]
    pub fn from_topics(topics: impl IntoIterator<Item = Topic>) -> Self {
        let mut filter = Self::new();
        filter.extend(topics);
        filter
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn entries(&self) -> &[Topic] {
        &self.entries
    }

    /// True iff some element of the filter is a component-prefix of `topic`.
    #[must_use]
    pub fn matches(&self, topic: &Topic) -> bool {
        self.entries.iter().any(|e| e.is_prefix_of(topic))
    }

    /// Inserts every topic in `additions`, keeping the filter canonical.
    ///
    /// An existing element that is a prefix of an addition absorbs it; an
    /// addition that is a strict prefix of existing elements replaces them.
    /// Returns whether the canonical form changed.
    pub fn extend(&mut self, additions: impl IntoIterator<Item = Topic>) -> bool {
        let mut changed = false;
        for topic in additions {
            changed |= self.insert(topic);
        }
        changed
    }

    fn insert(&mut self, topic: Topic) -> bool {
        if self.entries.iter().any(|e| e.is_prefix_of(&topic)) {
            return false;
        }
        self.entries.retain(|e| !topic.is_prefix_of(e));
        let at = self
            .entries
            .binary_search(&topic)
            .unwrap_or_else(|insert_at| insert_at);
        self.entries.insert(at, topic);
        true
    }
}

impl FromIterator<Topic> for Filter {
    fn from_iter<I: IntoIterator<Item = Topic>>(iter: I) -> Self {
        Self::from_topics(iter)
    }
}

impl IntoIterator for Filter {
    type Item = Topic;
    type IntoIter = std::vec::IntoIter<Topic>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, e) in self.entries.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{e}")?;
        }
        write!(f, "}}")
    }
}

/// Convenience for tests and examples: builds a filter from string literals.
#[must_use]
pub fn filter_of<const N: usize>(topics: [&str; N]) -> Filter {
    Filter::from_topics(topics.into_iter().map(Topic::from))
}
