//! Deferred-callback strategies.
//!
//! A flush must run after the current synchronous work finishes and no
//! sooner. How that is achieved depends on the host, so the first time a
//! thread defers anything, [`detect`] picks the best available strategy and
//! the choice sticks for the thread's lifetime:
//!
//! 1. [`DeferKind::Microtask`]: the installed [`EventLoop`] has a microtask
//!    queue.
//! 2. [`DeferKind::RuntimeTask`]: a current-thread tokio runtime is running;
//!    the job is a spawned task that runs as soon as the current task
//!    yields.
//! 3. [`DeferKind::Immediate`]: the loop's next macrotask.
//! 4. [`DeferKind::Timeout`]: a loop timer with
//!    [`Config::fallback_delay`](crate::config::Config).
//! 5. [`DeferKind::Manual`]: no host; jobs wait until [`pump`] is called.

use std::cell::{OnceCell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;
use std::time::Duration;

use tokio::runtime::{Handle, RuntimeFlavor};

use super::event_loop::EventLoop;
use crate::config;

/// A deferred job. Jobs touch thread-local state only, so a plain function
/// pointer is enough.
pub type Job = fn();

thread_local! {
    static STRATEGY: OnceCell<Rc<dyn Defer>> = const { OnceCell::new() };
    static BACKLOG: RefCell<VecDeque<Job>> = const { RefCell::new(VecDeque::new()) };
}

/// Which mechanism a [`Defer`] uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeferKind {
    Microtask,
    RuntimeTask,
    Immediate,
    Timeout,
    Manual,
}

impl DeferKind {
    /// Whether jobs run before the host gets to handle other events.
    pub fn is_micro_task(self) -> bool {
        matches!(self, DeferKind::Microtask | DeferKind::RuntimeTask)
    }
}

/// Schedules a job to run after the current synchronous work.
pub trait Defer {
    fn kind(&self) -> DeferKind;

    fn schedule(&self, job: Job);

    fn is_micro_task(&self) -> bool {
        self.kind().is_micro_task()
    }
}

struct LoopMicrotask;

impl Defer for LoopMicrotask {
    fn kind(&self) -> DeferKind {
        DeferKind::Microtask
    }

    fn schedule(&self, job: Job) {
        match EventLoop::current() {
            Some(event_loop) => event_loop.queue_microtask(job),
            None => defer_to_backlog(job),
        }
    }
}

struct RuntimeTask;

impl Defer for RuntimeTask {
    fn kind(&self) -> DeferKind {
        DeferKind::RuntimeTask
    }

    fn schedule(&self, job: Job) {
        match Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move { job() });
            }
            Err(_) => defer_to_backlog(job),
        }
    }
}

struct LoopImmediate;

impl Defer for LoopImmediate {
    fn kind(&self) -> DeferKind {
        DeferKind::Immediate
    }

    fn schedule(&self, job: Job) {
        match EventLoop::current() {
            Some(event_loop) => event_loop.queue_task(job),
            None => defer_to_backlog(job),
        }
    }
}

struct LoopTimeout {
    delay: Duration,
}

impl Defer for LoopTimeout {
    fn kind(&self) -> DeferKind {
        DeferKind::Timeout
    }

    fn schedule(&self, job: Job) {
        match EventLoop::current() {
            Some(event_loop) => event_loop.set_timeout(job, self.delay),
            None => defer_to_backlog(job),
        }
    }
}

struct Manual;

impl Defer for Manual {
    fn kind(&self) -> DeferKind {
        DeferKind::Manual
    }

    fn schedule(&self, job: Job) {
        BACKLOG.with(|backlog| backlog.borrow_mut().push_back(job));
    }
}

fn defer_to_backlog(job: Job) {
    tracing::warn!("host for the selected defer strategy is gone; job moved to the manual backlog");
    Manual.schedule(job);
}

fn current_thread_runtime() -> bool {
    Handle::try_current().is_ok_and(|handle| handle.runtime_flavor() == RuntimeFlavor::CurrentThread)
}

/// Pick the best strategy for the current thread's host.
///
/// A multi-threaded tokio runtime is skipped: its tasks may run on another
/// thread, away from this thread's reactive state.
pub fn detect() -> Rc<dyn Defer> {
    let event_loop = EventLoop::current();
    let features = event_loop.as_ref().map(EventLoop::features);

    let strategy: Rc<dyn Defer> = match features {
        Some(features) if features.microtasks => Rc::new(LoopMicrotask),
        _ if current_thread_runtime() => Rc::new(RuntimeTask),
        Some(features) if features.immediate => Rc::new(LoopImmediate),
        Some(_) => Rc::new(LoopTimeout {
            delay: config::with(|c| c.fallback_delay),
        }),
        None => Rc::new(Manual),
    };

    tracing::debug!(kind = ?strategy.kind(), "selected defer strategy");
    strategy
}

/// The strategy for this thread, detected on first use.
pub fn strategy() -> Rc<dyn Defer> {
    STRATEGY.with(|cell| cell.get_or_init(detect).clone())
}

/// Run every job waiting in the manual backlog, including jobs queued while
/// draining. Returns how many ran.
pub fn pump() -> usize {
    let mut ran = 0;
    loop {
        let next = BACKLOG.with(|backlog| backlog.borrow_mut().pop_front());
        let Some(job) = next else {
            return ran;
        };
        job();
        ran += 1;
    }
}

/// Number of jobs waiting for [`pump`].
pub fn backlog_len() -> usize {
    BACKLOG.with(|backlog| backlog.borrow().len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::super::event_loop::LoopFeatures;
    use std::cell::Cell;

    thread_local! {
        static HITS: Cell<usize> = const { Cell::new(0) };
    }

    fn hit() {
        HITS.with(|hits| hits.set(hits.get() + 1));
    }

    fn hits() -> usize {
        HITS.with(Cell::get)
    }

    #[test]
    fn no_host_falls_back_to_manual() {
        let strategy = detect();
        assert_eq!(strategy.kind(), DeferKind::Manual);
        assert!(!strategy.is_micro_task());

        strategy.schedule(hit);
        assert_eq!(hits(), 0);
        assert_eq!(backlog_len(), 1);
        assert_eq!(pump(), 1);
        assert_eq!(hits(), 1);
    }

    #[test]
    fn loop_features_select_tiers() {
        let cases = [
            (LoopFeatures::default(), DeferKind::Microtask),
            (
                LoopFeatures {
                    microtasks: false,
                    immediate: true,
                },
                DeferKind::Immediate,
            ),
            (LoopFeatures::timers_only(), DeferKind::Timeout),
        ];

        for (features, expected) in cases {
            let event_loop = EventLoop::with_features(features);
            let _guard = event_loop.enter();
            let strategy = detect();
            assert_eq!(strategy.kind(), expected);

            let before = hits();
            strategy.schedule(hit);
            assert_eq!(hits(), before);
            event_loop.run_until_idle();
            assert_eq!(hits(), before + 1);
        }
    }

    #[test]
    fn strategy_is_sticky() {
        let first = strategy();
        let event_loop = EventLoop::new();
        let _guard = event_loop.enter();
        assert_eq!(strategy().kind(), first.kind());
        assert_eq!(first.kind(), DeferKind::Manual);
    }

    #[tokio::test]
    async fn current_thread_runtime_is_micro_task_class() {
        let strategy = detect();
        assert_eq!(strategy.kind(), DeferKind::RuntimeTask);
        assert!(strategy.is_micro_task());

        strategy.schedule(hit);
        assert_eq!(hits(), 0);
        tokio::task::yield_now().await;
        assert_eq!(hits(), 1);
    }

    #[test]
    fn multi_thread_runtime_is_skipped() {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .build()
            .unwrap();
        let _enter = runtime.enter();
        assert_eq!(detect().kind(), DeferKind::Manual);
    }
}
