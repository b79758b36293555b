//! Active-Computation Tracker
//!
//! Tracks which watcher is currently evaluating, so that reading a reactive
//! property can subscribe that watcher without any explicit wiring.
//!
//! # Implementation
//!
//! A thread-local stack holds one entry per nested evaluation. Entering a
//! [`TrackingScope`] pushes; dropping the guard pops. Because the pop lives
//! in `Drop`, it runs exactly once per push even when the evaluation returns
//! an error or unwinds.
//!
//! An entry may be `None`. That suspends tracking for the scope, which is
//! how data factories and immediate watch callbacks run without collecting
//! dependencies for whatever computation happens to be outside them.

use std::cell::RefCell;

use super::ids::WatcherId;
use super::watcher::Watcher;

thread_local! {
    static TARGET_STACK: RefCell<Vec<Option<Watcher>>> = const { RefCell::new(Vec::new()) };
}

/// Guard that pops the tracking stack when dropped.
pub struct TrackingScope {
    target: Option<WatcherId>,
}

impl TrackingScope {
    /// Make `target` the current computation until the guard drops.
    pub fn enter(target: Option<Watcher>) -> Self {
        let id = target.as_ref().map(Watcher::id);
        TARGET_STACK.with(|stack| stack.borrow_mut().push(target));
        Self { target: id }
    }

    /// Suspend tracking until the guard drops.
    pub fn untracked() -> Self {
        Self::enter(None)
    }
}

impl Drop for TrackingScope {
    fn drop(&mut self) {
        let popped = TARGET_STACK.with(|stack| stack.borrow_mut().pop());

        if let Some(entry) = popped {
            debug_assert_eq!(
                entry.as_ref().map(Watcher::id),
                self.target,
                "TrackingScope mismatch"
            );
        }
    }
}

/// The watcher currently collecting dependencies, if any.
pub fn current() -> Option<Watcher> {
    TARGET_STACK.with(|stack| stack.borrow().last().cloned().flatten())
}

/// Whether a read right now would register a dependency.
pub fn is_tracking() -> bool {
    TARGET_STACK.with(|stack| matches!(stack.borrow().last(), Some(Some(_))))
}

/// Current nesting depth of the stack.
pub fn depth() -> usize {
    TARGET_STACK.with(|stack| stack.borrow().len())
}

/// Run `f` without collecting dependencies.
pub fn untracked<R>(f: impl FnOnce() -> R) -> R {
    let _scope = TrackingScope::untracked();
    f()
}
