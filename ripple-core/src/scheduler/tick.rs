//! Next-tick callbacks.
//!
//! [`next_tick`] collects callbacks into one list and asks the thread's
//! [`Defer`](super::defer::Defer) strategy for a single deferred pass over
//! it. The watcher flush is itself queued through here, so a callback
//! registered after a mutation runs after the resulting flush.

use std::cell::{Cell, RefCell};
use std::future::Future;

use tokio::sync::oneshot;

use super::defer;
use crate::error::{invoke_with_error_handling, Result};

type TickCallback = Box<dyn FnOnce() -> Result<()>>;

thread_local! {
    static CALLBACKS: RefCell<Vec<TickCallback>> = const { RefCell::new(Vec::new()) };
    static PENDING: Cell<bool> = const { Cell::new(false) };
}

/// Run `callback` after the current synchronous work, in the same pass as
/// every other callback queued before that pass starts.
pub fn next_tick<F>(callback: F)
where
    F: FnOnce() -> Result<()> + 'static,
{
    CALLBACKS.with(|callbacks| callbacks.borrow_mut().push(Box::new(callback)));

    if !PENDING.with(|pending| pending.replace(true)) {
        defer::strategy().schedule(flush_callbacks);
    }
}

/// Resolves once the next callback pass has run.
///
/// The callback is registered when `tick` is called, not when the future is
/// first polled.
pub fn tick() -> impl Future<Output = ()> {
    let (tx, rx) = oneshot::channel();
    next_tick(move || {
        let _ = tx.send(());
        Ok(())
    });
    async move {
        let _ = rx.await;
    }
}

/// Whether deferred passes run as microtasks on this thread.
pub fn is_using_micro_task() -> bool {
    defer::strategy().is_micro_task()
}

/// Number of callbacks waiting for the next pass.
pub fn pending_callbacks() -> usize {
    CALLBACKS.with(|callbacks| callbacks.borrow().len())
}

/// Run the current batch. Callbacks queued while it runs go to the next
/// pass.
fn flush_callbacks() {
    PENDING.with(|pending| pending.set(false));
    let batch = CALLBACKS.with(|callbacks| std::mem::take(&mut *callbacks.borrow_mut()));
    for callback in batch {
        invoke_with_error_handling(callback, "nextTick");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config;
    use crate::error::Error;
    use crate::scheduler::{pump, EventLoop};
    use std::rc::Rc;

    #[test]
    fn callbacks_run_in_order_after_pump() {
        let order = Rc::new(RefCell::new(Vec::new()));
        for i in 0..3 {
            let order = order.clone();
            next_tick(move || {
                order.borrow_mut().push(i);
                Ok(())
            });
        }

        assert!(order.borrow().is_empty());
        assert_eq!(pending_callbacks(), 3);
        assert_eq!(pump(), 1);
        assert_eq!(*order.borrow(), vec![0, 1, 2]);
    }

    #[test]
    fn callbacks_queued_during_pass_run_in_next_pass() {
        let event_loop = EventLoop::new();
        let _guard = event_loop.enter();

        let order = Rc::new(RefCell::new(Vec::new()));
        let outer = order.clone();
        next_tick(move || {
            outer.borrow_mut().push("first");
            let inner = outer.clone();
            next_tick(move || {
                inner.borrow_mut().push("nested");
                Ok(())
            });
            assert_eq!(pending_callbacks(), 1);
            Ok(())
        });
        let second = order.clone();
        next_tick(move || {
            second.borrow_mut().push("second");
            Ok(())
        });

        assert_eq!(event_loop.run_microtasks(), 2);
        assert_eq!(*order.borrow(), vec!["first", "second", "nested"]);
    }

    #[test]
    fn failing_callback_does_not_stop_the_pass() {
        let reported = Rc::new(RefCell::new(Vec::new()));
        let sink = reported.clone();
        config::configure(|c| {
            c.error_handler = Some(Rc::new(move |err: &Error, info: &str| {
                sink.borrow_mut().push((err.clone(), info.to_string()));
                Ok(())
            }));
        });

        let ran = Rc::new(Cell::new(false));
        let ran_clone = ran.clone();
        next_tick(|| Err(Error::msg("tick failed")));
        next_tick(move || {
            ran_clone.set(true);
            Ok(())
        });
        pump();

        assert!(ran.get());
        assert_eq!(
            *reported.borrow(),
            vec![(Error::msg("tick failed"), "nextTick".to_string())]
        );
    }

    #[test]
    fn micro_task_flag_follows_strategy() {
        let event_loop = EventLoop::new();
        let _guard = event_loop.enter();
        assert!(is_using_micro_task());
    }

    #[tokio::test]
    async fn tick_future_resolves_after_pass() {
        let ran = Rc::new(Cell::new(false));
        let ran_clone = ran.clone();
        next_tick(move || {
            ran_clone.set(true);
            Ok(())
        });

        tick().await;
        assert!(ran.get());
    }
}
