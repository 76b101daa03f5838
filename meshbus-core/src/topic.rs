//! Hierarchical topic names.
//!
//! A topic is a `/`-separated sequence of name components. Matching against
//! filters is *component-aligned* prefix matching: `a/b` covers `a/b/c` and
//! `a/b` itself, but not `a/bc`.

use once_cell::sync::Lazy;
use std::fmt;

/// Separator between topic components.
pub const SEPARATOR: char = '/';

/// Reserved topics used by the endpoint itself.
pub mod reserved {
    use super::{Lazy, Topic};

    /// Peer lifecycle status events are shipped here.
    pub static STATUSES: Lazy<Topic> = Lazy::new(|| Topic::from("broker/statuses"));

    /// Error events are shipped here.
    pub static ERRORS: Lazy<Topic> = Lazy::new(|| Topic::from("broker/errors"));
}

/// A hierarchical topic name.
///
/// Topics compare and hash by byte sequence.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Topic(String);

impl Topic {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Iterates over the name components.
    pub fn components(&self) -> impl Iterator<Item = &str> {
        self.0.split(SEPARATOR)
    }

    /// Component-aligned prefix test. Ties on equal length are equality.
    #[must_use]
    pub fn is_prefix_of(&self, other: &Topic) -> bool {
        let prefix = self.0.as_bytes();
        let full = other.0.as_bytes();
        if !full.starts_with(prefix) {
            return false;
        }
        // Either exactly equal, or the next byte is a component boundary.
        full.len() == prefix.len() || full[prefix.len()] == SEPARATOR as u8
    }

    /// Extends the topic by one component.
    #[must_use]
    pub fn join(&self, component: &str) -> Topic {
        let mut name = String::with_capacity(self.0.len() + 1 + component.len());
        name.push_str(&self.0);
        name.push(SEPARATOR);
        name.push_str(component);
        Topic(name)
    }
}

impl From<&str> for Topic {
    fn from(name: &str) -> Self {
        Self(name.to_string())
    }
}

impl From<String> for Topic {
    fn from(name: String) -> Self {
        Self(name)
    }
}

impl AsRef<str> for Topic {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_is_component_aligned() {
        let t = Topic::from("a/b");
        assert!(t.is_prefix_of(&Topic::from("a/b")));
        assert!(t.is_prefix_of(&Topic::from("a/b/c")));
        assert!(!t.is_prefix_of(&Topic::from("a/bc")));
        assert!(!t.is_prefix_of(&Topic::from("a")));
    }

    #[test]
    fn join_appends_component() {
        let t = Topic::from("zeek").join("events");
        assert_eq!(t.as_str(), "zeek/events");
        assert_eq!(t.components().count(), 2);
    }

    #[test]
    fn reserved_topics_are_distinct() {
        assert_ne!(*reserved::STATUSES, *reserved::ERRORS);
    }
}
