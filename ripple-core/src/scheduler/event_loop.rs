//! A deterministic single-threaded host loop.
//!
//! [`EventLoop`] has three queues: microtasks, macrotasks and timers.
//! [`EventLoop::run_until_idle`] drains them the way a browser or a
//! JavaScript host would: after every macrotask or timer callback, every
//! pending microtask runs. Timers use a virtual clock that jumps straight to
//! the next deadline, so nothing ever sleeps.
//!
//! [`LoopFeatures`] controls which primitives the loop advertises to
//! [`detect`](super::defer::detect), which makes each deferral tier
//! reachable from tests.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fmt;
use std::rc::Rc;
use std::time::Duration;

type Task = Box<dyn FnOnce()>;

thread_local! {
    static CURRENT: RefCell<Option<EventLoop>> = const { RefCell::new(None) };
}

/// Capabilities the loop advertises.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopFeatures {
    /// A native microtask queue.
    pub microtasks: bool,
    /// A "run on the next loop iteration" primitive.
    pub immediate: bool,
}

impl Default for LoopFeatures {
    fn default() -> Self {
        Self {
            microtasks: true,
            immediate: true,
        }
    }
}

impl LoopFeatures {
    /// Only timers.
    pub fn timers_only() -> Self {
        Self {
            microtasks: false,
            immediate: false,
        }
    }
}

struct Timer {
    deadline: Duration,
    seq: u64,
    task: Task,
}

struct LoopInner {
    features: LoopFeatures,
    microtasks: RefCell<VecDeque<Task>>,
    tasks: RefCell<VecDeque<Task>>,
    timers: RefCell<Vec<Timer>>,
    now: Cell<Duration>,
    timer_seq: Cell<u64>,
}

/// Handle to a host loop. Clones share the same queues.
#[derive(Clone)]
pub struct EventLoop {
    inner: Rc<LoopInner>,
}

impl EventLoop {
    pub fn new() -> Self {
        Self::with_features(LoopFeatures::default())
    }

    pub fn with_features(features: LoopFeatures) -> Self {
        Self {
            inner: Rc::new(LoopInner {
                features,
                microtasks: RefCell::new(VecDeque::new()),
                tasks: RefCell::new(VecDeque::new()),
                timers: RefCell::new(Vec::new()),
                now: Cell::new(Duration::ZERO),
                timer_seq: Cell::new(0),
            }),
        }
    }

    /// The loop installed on this thread, if any.
    pub fn current() -> Option<EventLoop> {
        CURRENT.with(|current| current.borrow().clone())
    }

    /// Install this loop as the thread's host until the guard drops.
    pub fn enter(&self) -> LoopGuard {
        let previous = CURRENT.with(|current| current.replace(Some(self.clone())));
        LoopGuard { previous }
    }

    pub fn features(&self) -> LoopFeatures {
        self.inner.features
    }

    /// Virtual time elapsed through timers.
    pub fn now(&self) -> Duration {
        self.inner.now.get()
    }

    pub fn queue_microtask(&self, task: impl FnOnce() + 'static) {
        self.inner.microtasks.borrow_mut().push_back(Box::new(task));
    }

    pub fn queue_task(&self, task: impl FnOnce() + 'static) {
        self.inner.tasks.borrow_mut().push_back(Box::new(task));
    }

    pub fn set_timeout(&self, task: impl FnOnce() + 'static, delay: Duration) {
        let seq = self.inner.timer_seq.get();
        self.inner.timer_seq.set(seq + 1);
        self.inner.timers.borrow_mut().push(Timer {
            deadline: self.now() + delay,
            seq,
            task: Box::new(task),
        });
    }

    /// Run microtasks until the queue is empty, including ones queued while
    /// draining. Returns how many ran.
    pub fn run_microtasks(&self) -> usize {
        let mut ran = 0;
        loop {
            let next = self.inner.microtasks.borrow_mut().pop_front();
            let Some(task) = next else {
                return ran;
            };
            task();
            ran += 1;
        }
    }

    /// Run one macrotask, or if there is none, the earliest timer, followed
    /// by all microtasks. Returns `false` when there was nothing to run.
    pub fn turn(&self) -> bool {
        self.run_microtasks();

        let task = self.inner.tasks.borrow_mut().pop_front();
        let task = match task {
            Some(task) => task,
            None => match self.pop_timer() {
                Some(timer) => {
                    self.inner.now.set(self.now().max(timer.deadline));
                    timer.task
                }
                None => return false,
            },
        };

        task();
        self.run_microtasks();
        true
    }

    /// Turn the loop until every queue is empty. Returns the number of
    /// macrotasks and timers that ran.
    pub fn run_until_idle(&self) -> usize {
        let mut turns = 0;
        while self.turn() {
            turns += 1;
        }
        turns
    }

    pub fn is_idle(&self) -> bool {
        self.inner.microtasks.borrow().is_empty()
            && self.inner.tasks.borrow().is_empty()
            && self.inner.timers.borrow().is_empty()
    }

    fn pop_timer(&self) -> Option<Timer> {
        let mut timers = self.inner.timers.borrow_mut();
        let index = timers
            .iter()
            .enumerate()
            .min_by_key(|(_, timer)| (timer.deadline, timer.seq))
            .map(|(index, _)| index)?;
        Some(timers.remove(index))
    }
}

impl Default for EventLoop {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for EventLoop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventLoop")
            .field("features", &self.inner.features)
            .field("microtasks", &self.inner.microtasks.borrow().len())
            .field("tasks", &self.inner.tasks.borrow().len())
            .field("timers", &self.inner.timers.borrow().len())
            .field("now", &self.now())
            .finish()
    }
}

/// Restores the previously installed loop on drop.
#[must_use = "the loop is uninstalled when the guard drops"]
pub struct LoopGuard {
    previous: Option<EventLoop>,
}

impl Drop for LoopGuard {
    fn drop(&mut self) {
        let previous = self.previous.take();
        CURRENT.with(|current| *current.borrow_mut() = previous);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn log() -> (Rc<RefCell<Vec<&'static str>>>, impl Fn(&'static str) -> Box<dyn FnOnce()>) {
        let entries = Rc::new(RefCell::new(Vec::new()));
        let sink = entries.clone();
        let push = move |label: &'static str| {
            let sink = sink.clone();
            Box::new(move || sink.borrow_mut().push(label)) as Box<dyn FnOnce()>
        };
        (entries, push)
    }

    #[test]
    fn microtasks_run_between_macrotasks() {
        let event_loop = EventLoop::new();
        let (entries, push) = log();

        let inner_loop = event_loop.clone();
        let micro_b = push("micro-b");
        event_loop.queue_task(push("task-1"));
        event_loop.queue_task(move || inner_loop.queue_microtask(micro_b));
        event_loop.queue_task(push("task-3"));
        event_loop.queue_microtask(push("micro-a"));

        event_loop.run_until_idle();
        assert_eq!(
            *entries.borrow(),
            vec!["micro-a", "task-1", "micro-b", "task-3"]
        );
        assert!(event_loop.is_idle());
    }

    #[test]
    fn timers_fire_in_deadline_order() {
        let event_loop = EventLoop::new();
        let (entries, push) = log();

        event_loop.set_timeout(push("late"), Duration::from_millis(10));
        event_loop.set_timeout(push("early"), Duration::from_millis(1));
        event_loop.set_timeout(push("early-2"), Duration::from_millis(1));
        event_loop.queue_task(push("task"));

        event_loop.run_until_idle();
        assert_eq!(*entries.borrow(), vec!["task", "early", "early-2", "late"]);
        assert_eq!(event_loop.now(), Duration::from_millis(10));
    }

    #[test]
    fn enter_installs_and_restores() {
        assert!(EventLoop::current().is_none());
        let outer = EventLoop::new();
        {
            let _outer = outer.enter();
            let inner = EventLoop::with_features(LoopFeatures::timers_only());
            {
                let _inner = inner.enter();
                assert_eq!(EventLoop::current().unwrap().features(), LoopFeatures::timers_only());
            }
            assert_eq!(EventLoop::current().unwrap().features(), LoopFeatures::default());
        }
        assert!(EventLoop::current().is_none());
    }
}
