//! Dependency Implementation
//!
//! A `Dep` is the subscription list for one observable location: one
//! reactive property, or one observed object/array (for structural changes).
//!
//! # How Deps Work
//!
//! 1. When a reactive location is read while a watcher is evaluating, the
//!    location's dep calls [`Dep::depend`], which subscribes that watcher.
//!
//! 2. When the location is written, [`Dep::notify`] tells every subscriber
//!    that it is stale.
//!
//! Subscribers are held weakly. A dep never keeps a computation alive; a
//! watcher that was dropped simply stops being notified.

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use indexmap::IndexMap;
use smallvec::SmallVec;

use super::context;
use super::ids::{DepId, WatcherId};
use super::watcher::{Watcher, WatcherInner};

/// A subscription list for one observable location.
#[derive(Clone)]
pub struct Dep {
    inner: Rc<DepInner>,
}

struct DepInner {
    id: DepId,
    /// Subscribers in subscription order.
    subs: RefCell<IndexMap<WatcherId, Weak<WatcherInner>>>,
}

impl Dep {
    pub fn new() -> Self {
        Self {
            inner: Rc::new(DepInner {
                id: DepId::next(),
                subs: RefCell::new(IndexMap::new()),
            }),
        }
    }

    pub fn id(&self) -> DepId {
        self.inner.id
    }

    /// Register the currently evaluating watcher, if there is one.
    pub fn depend(&self) {
        if let Some(watcher) = context::current() {
            watcher.add_dep(self);
        }
    }

    /// Tell every live subscriber that this location changed.
    ///
    /// Works on a snapshot sorted by watcher id, so subscribers may come and
    /// go while the notification is in progress. Lazy subscribers are all
    /// marked dirty before any other subscriber runs, so a sync watcher that
    /// reads a computed never sees its stale cached value.
    pub fn notify(&self) {
        let mut subs: SmallVec<[Watcher; 8]> = {
            let mut map = self.inner.subs.borrow_mut();
            map.retain(|_, sub| sub.strong_count() > 0);
            map.values().filter_map(Watcher::upgrade).collect()
        };
        subs.sort_by_key(|watcher| (!watcher.is_lazy(), watcher.id()));

        for watcher in subs {
            watcher.update();
        }
    }

    pub(crate) fn add_sub(&self, watcher: &Watcher) {
        self.inner
            .subs
            .borrow_mut()
            .entry(watcher.id())
            .or_insert_with(|| watcher.downgrade());
    }

    pub(crate) fn remove_sub(&self, id: WatcherId) {
        self.inner.subs.borrow_mut().shift_remove(&id);
    }

    /// Ids of the current subscribers, in subscription order.
    pub fn subscriber_ids(&self) -> Vec<WatcherId> {
        self.inner.subs.borrow().keys().copied().collect()
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subs.borrow().len()
    }
}

impl Default for Dep {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Dep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dep")
            .field("id", &self.inner.id)
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
