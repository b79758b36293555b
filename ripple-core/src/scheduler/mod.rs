//! Update Scheduling
//!
//! Changes do not re-run watchers directly. Notified watchers are queued
//! ([`queue_watcher`]) and flushed together on the next tick
//! ([`flush_scheduler_queue`]). The tick itself comes from a per-thread
//! [`Defer`] strategy picked by [`detect`].

pub mod defer;
pub mod event_loop;
pub mod queue;
pub mod tick;

pub use defer::{backlog_len, detect, pump, strategy, Defer, DeferKind, Job};
pub use event_loop::{EventLoop, LoopFeatures, LoopGuard};
pub use queue::{flush_scheduler_queue, is_flushing, is_waiting, queue_watcher, queued_len};
pub use tick::{is_using_micro_task, next_tick, pending_callbacks, tick};
