//! Identity types for the reactive system.
//!
//! Watcher ids double as the flush order: they are handed out from a
//! monotonic counter, so a watcher created earlier (a parent component's
//! render watcher, or a watch registered first) always sorts first.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Unique, monotonically increasing identifier for a watcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WatcherId(u64);

impl WatcherId {
    /// Generate the next watcher ID.
    pub fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for WatcherId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Unique identifier for a dependency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DepId(u64);

impl DepId {
    /// Generate the next dependency ID.
    pub fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn watcher_ids_increase() {
        let id1 = WatcherId::next();
        let id2 = WatcherId::next();
        let id3 = WatcherId::next();

        assert!(id1 < id2);
        assert!(id2 < id3);
    }

    #[test]
    fn dep_ids_are_unique() {
        assert_ne!(DepId::next(), DepId::next());
    }
}
