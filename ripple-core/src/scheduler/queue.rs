//! Watcher Queue
//!
//! Watchers notified by a change are not run on the spot. They are queued,
//! deduplicated by id, and run together in one flush on the next tick.
//!
//! # Algorithm
//!
//! 1. [`queue_watcher`] adds a watcher unless it is already pending. The
//!    first watcher queued in a batch schedules the flush through
//!    [`next_tick`].
//! 2. [`flush_scheduler_queue`] sorts the queue by watcher id, so watchers
//!    created earlier (parents) run before watchers created later
//!    (children).
//! 3. The queue is walked with a cursor, not a snapshot. A watcher queued
//!    while the flush is running is inserted by id after the cursor, so it
//!    still runs in this flush.
//! 4. A watcher that keeps re-queueing itself is stopped after
//!    [`Config::max_update_count`](crate::config::Config) re-runs: it is
//!    reported and ignored for the rest of the flush.
//! 5. Finally the `updated` hooks of the watchers that ran are called in
//!    reverse order, children before parents.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};

use indexmap::IndexSet;

use super::tick::next_tick;
use crate::config;
use crate::error::{handle_error, invoke_with_error_handling, Error};
use crate::reactive::{TrackingScope, Watcher, WatcherId};

#[derive(Default)]
struct QueueState {
    queue: Vec<Watcher>,
    /// Ids queued and not yet run.
    has: HashSet<WatcherId>,
    /// Re-queue counts within the current flush.
    circular: HashMap<WatcherId, usize>,
    /// Ids stopped by the circular-update guard until the flush ends.
    blocked: HashSet<WatcherId>,
    waiting: bool,
    flushing: bool,
    index: usize,
}

thread_local! {
    static STATE: RefCell<QueueState> = RefCell::new(QueueState::default());
}

fn with_state<R>(f: impl FnOnce(&mut QueueState) -> R) -> R {
    STATE.with(|state| f(&mut state.borrow_mut()))
}

/// Queue `watcher` for the next flush.
///
/// A watcher already pending is ignored. With
/// [`Config::async_flush`](crate::config::Config) off the flush runs
/// immediately.
pub fn queue_watcher(watcher: Watcher) {
    let id = watcher.id();

    let schedule = with_state(|state| {
        if state.has.contains(&id) || state.blocked.contains(&id) {
            return false;
        }
        state.has.insert(id);

        if !state.flushing {
            state.queue.push(watcher);
        } else {
            let mut position = state.queue.len();
            while position > state.index + 1 && state.queue[position - 1].id() > id {
                position -= 1;
            }
            state.queue.insert(position, watcher);
        }

        !std::mem::replace(&mut state.waiting, true)
    });

    tracing::trace!(watcher = %id, "watcher queued");

    if schedule {
        if config::with(|c| c.async_flush) {
            next_tick(|| {
                flush_scheduler_queue();
                Ok(())
            });
        } else {
            flush_scheduler_queue();
        }
    }
}

/// Run every queued watcher once, in id order.
pub fn flush_scheduler_queue() {
    let _untracked = TrackingScope::untracked();
    let limit = config::with(|c| c.max_update_count);

    let queued = with_state(|state| {
        state.flushing = true;
        state.index = 0;
        state.queue.sort_by_key(Watcher::id);
        state.queue.len()
    });
    tracing::debug!(queued, "flushing watcher queue");

    while let Some(watcher) = with_state(|state| state.queue.get(state.index).cloned()) {
        let id = watcher.id();

        if watcher.is_active() {
            if let Some(before) = watcher.before_hook() {
                invoke_with_error_handling(|| before(), "beforeUpdate hook");
            }
        }

        with_state(|state| state.has.remove(&id));
        watcher.run();

        let runaway = with_state(|state| {
            if !state.has.contains(&id) {
                return None;
            }
            let count = state.circular.entry(id).or_default();
            *count += 1;
            if *count <= limit {
                return None;
            }
            let count = *count;
            state.blocked.insert(id);
            state.has.remove(&id);
            let cursor = state.index;
            let mut position = 0;
            state.queue.retain(|queued| {
                let keep = position <= cursor || queued.id() != id;
                position += 1;
                keep
            });
            Some(count)
        });

        if let Some(count) = runaway {
            tracing::warn!(watcher = %id, count, "circular update stopped");
            handle_error(
                &Error::CircularUpdate {
                    id: id.raw(),
                    expression: watcher.expression().to_string(),
                    limit,
                },
                "scheduler flush",
            );
        }

        with_state(|state| state.index += 1);
    }

    let ran = with_state(|state| {
        let queue = std::mem::take(&mut state.queue);
        *state = QueueState::default();
        queue
    });
    tracing::debug!(ran = ran.len(), "watcher queue flushed");

    call_updated_hooks(&ran);
}

fn call_updated_hooks(ran: &[Watcher]) {
    let mut seen = IndexSet::new();
    for watcher in ran.iter().rev() {
        if !seen.insert(watcher.id()) || !watcher.is_active() {
            continue;
        }
        if let Some(updated) = watcher.updated_hook() {
            invoke_with_error_handling(|| updated(), "updated hook");
        }
    }
}

/// Whether a flush is running on this thread.
pub fn is_flushing() -> bool {
    with_state(|state| state.flushing)
}

/// Whether a flush has been requested and not finished yet.
pub fn is_waiting() -> bool {
    with_state(|state| state.waiting)
}

/// Number of watchers currently queued.
pub fn queued_len() -> usize {
    with_state(|state| state.queue.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use crate::reactive::{observe, Callback, Object, Value, WatcherOptions};
    use crate::scheduler::pump;
    use serde_json::json;
    use std::cell::Cell;
    use std::rc::Rc;

    fn state(json: serde_json::Value) -> Object {
        let value = Value::from(json);
        observe(&value);
        value.as_object().cloned().unwrap()
    }

    fn reader(data: &Object, key: &'static str) -> Rc<dyn Fn() -> Result<Value>> {
        let data = data.clone();
        Rc::new(move || Ok(data.get(key).unwrap_or_default()))
    }

    fn logging(log: &Rc<RefCell<Vec<String>>>, label: &'static str) -> Callback {
        let log = log.clone();
        Rc::new(move |new: &Value, _: &Value| {
            log.borrow_mut().push(format!("{label}:{}", new.as_i64().unwrap_or(-1)));
            Ok(())
        })
    }

    #[test]
    fn batched_writes_run_once() {
        let data = state(json!({"a": 0}));
        let log = Rc::new(RefCell::new(Vec::new()));
        let _w = Watcher::user("a", reader(&data, "a"), logging(&log, "w"), WatcherOptions::default());

        data.assign("a", 1);
        data.assign("a", 2);
        assert_eq!(queued_len(), 1);
        assert!(is_waiting());
        assert!(log.borrow().is_empty());

        pump();
        assert_eq!(*log.borrow(), vec!["w:2"]);
        assert!(!is_waiting());
        assert_eq!(queued_len(), 0);
    }

    #[test]
    fn flush_runs_in_creation_order() {
        let data = state(json!({"a": 0, "b": 0}));
        let log = Rc::new(RefCell::new(Vec::new()));
        let _first = Watcher::user("a", reader(&data, "a"), logging(&log, "first"), WatcherOptions::default());
        let _second = Watcher::user("b", reader(&data, "b"), logging(&log, "second"), WatcherOptions::default());

        data.assign("b", 1);
        data.assign("a", 1);
        pump();

        assert_eq!(*log.borrow(), vec!["first:1", "second:1"]);
    }

    #[test]
    fn watcher_queued_mid_flush_runs_in_same_flush() {
        let data = state(json!({"a": 0, "b": 0}));
        let log = Rc::new(RefCell::new(Vec::new()));

        let writer = data.clone();
        let chain_log = log.clone();
        let _first = Watcher::user(
            "a",
            reader(&data, "a"),
            Rc::new(move |new: &Value, _: &Value| {
                chain_log.borrow_mut().push(format!("first:{}", new.as_i64().unwrap_or(-1)));
                writer.assign("b", 10);
                Ok(())
            }),
            WatcherOptions::default(),
        );
        let _second = Watcher::user("b", reader(&data, "b"), logging(&log, "second"), WatcherOptions::default());

        data.assign("a", 1);
        assert_eq!(pump(), 1);
        assert_eq!(*log.borrow(), vec!["first:1", "second:10"]);
    }

    #[test]
    fn circular_update_is_reported_and_flush_ends() {
        let reported = Rc::new(RefCell::new(Vec::new()));
        let sink = reported.clone();
        config::configure(|c| {
            c.max_update_count = 5;
            c.error_handler = Some(Rc::new(move |err: &Error, _: &str| {
                sink.borrow_mut().push(err.clone());
                Ok(())
            }));
        });

        let data = state(json!({"n": 0}));
        let runs = Rc::new(Cell::new(0));
        let counter = runs.clone();
        let writer = data.clone();
        let watcher = Watcher::user(
            "n",
            reader(&data, "n"),
            Rc::new(move |new: &Value, _: &Value| {
                counter.set(counter.get() + 1);
                writer.assign("n", new.as_f64().unwrap_or(0.0) + 1.0);
                Ok(())
            }),
            WatcherOptions::default(),
        );

        data.assign("n", 1);
        pump();

        assert_eq!(runs.get(), 6);
        assert_eq!(
            *reported.borrow(),
            vec![Error::CircularUpdate {
                id: watcher.id().raw(),
                expression: "n".into(),
                limit: 5,
            }]
        );
        assert!(!is_flushing());
        assert_eq!(queued_len(), 0);
    }

    #[test]
    fn sync_mode_flushes_immediately() {
        config::configure(|c| c.async_flush = false);
        let data = state(json!({"a": 0}));
        let log = Rc::new(RefCell::new(Vec::new()));
        let _w = Watcher::user("a", reader(&data, "a"), logging(&log, "w"), WatcherOptions::default());

        data.assign("a", 1);
        assert_eq!(*log.borrow(), vec!["w:1"]);
    }

    #[test]
    fn hooks_run_around_flush() {
        let data = state(json!({"a": 0}));
        let log = Rc::new(RefCell::new(Vec::new()));

        let hook = |label: &'static str| {
            let log = log.clone();
            let hook: crate::reactive::Hook = Rc::new(move || -> Result<()> {
                log.borrow_mut().push(label.to_string());
                Ok(())
            });
            Some(hook)
        };

        let parent = Watcher::render(
            "parent",
            {
                let data = data.clone();
                move || Ok(data.get("a").unwrap_or_default())
            },
            WatcherOptions {
                before: hook("parent:before"),
                updated: hook("parent:updated"),
                ..Default::default()
            },
        )
        .unwrap();
        let child = Watcher::render(
            "child",
            {
                let data = data.clone();
                move || Ok(data.get("a").unwrap_or_default())
            },
            WatcherOptions {
                before: hook("child:before"),
                updated: hook("child:updated"),
                ..Default::default()
            },
        )
        .unwrap();
        assert!(parent.id() < child.id());

        data.assign("a", 1);
        pump();

        assert_eq!(
            *log.borrow(),
            vec!["parent:before", "child:before", "child:updated", "parent:updated"]
        );
    }

    #[test]
    fn torn_down_watcher_is_skipped() {
        let data = state(json!({"a": 0}));
        let log = Rc::new(RefCell::new(Vec::new()));
        let watcher = Watcher::user("a", reader(&data, "a"), logging(&log, "w"), WatcherOptions::default());

        data.assign("a", 1);
        watcher.teardown();
        pump();

        assert!(log.borrow().is_empty());
    }
}
