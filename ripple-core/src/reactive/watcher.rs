//! Watcher Implementation
//!
//! A Watcher is one reactive computation: a component render, a computed
//! property getter, or a user watch expression.
//!
//! # How Watchers Work
//!
//! 1. [`Watcher::get`] evaluates the getter inside a [`TrackingScope`], so
//!    every reactive read subscribes this watcher to the read location.
//!
//! 2. After the evaluation the watcher diffs the deps it just read against
//!    the ones it held before: new ones are subscribed, stale ones are
//!    dropped. The dep set always matches the latest evaluation exactly.
//!
//! 3. When a subscribed dep notifies, [`Watcher::update`] decides what to do:
//!    lazy (computed) watchers just mark themselves dirty, sync watchers run
//!    on the spot, everything else is queued on the scheduler.
//!
//! 4. The scheduler calls [`Watcher::run`], which re-evaluates and invokes
//!    the callback with the new and old values.
//!
//! # States
//!
//! clean → dirty → evaluating → clean, until [`Watcher::teardown`], after
//! which the watcher is inert.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use indexmap::IndexMap;
use smallvec::SmallVec;

use super::context::{self, TrackingScope};
use super::dep::Dep;
use super::ids::{DepId, WatcherId};
use super::value::Value;
use super::watch::traverse;
use crate::error::{handle_error, invoke_with_error_handling, Result};
use crate::scheduler::queue_watcher;

/// The computation a watcher evaluates.
pub type Getter = Rc<dyn Fn() -> Result<Value>>;

/// Invoked with `(new_value, old_value)` after a change.
pub type Callback = Rc<dyn Fn(&Value, &Value) -> Result<()>>;

/// A lifecycle hook attached to a render watcher.
pub type Hook = Rc<dyn Fn() -> Result<()>>;

/// What a watcher computes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatcherKind {
    /// A component render function. Evaluation errors propagate.
    Render,
    /// A lazily evaluated computed property.
    Computed,
    /// A user watch expression with a callback.
    User,
}

/// Options for render and user watchers.
#[derive(Clone, Default)]
pub struct WatcherOptions {
    /// Traverse the value so nested changes are tracked too.
    pub deep: bool,
    /// Run immediately on notification instead of queueing.
    pub sync: bool,
    /// Called before the watcher re-runs during a flush.
    pub before: Option<Hook>,
    /// Called after a flush in which the watcher ran.
    pub updated: Option<Hook>,
}

/// A reactive computation.
///
/// Cloning a `Watcher` yields another handle to the same computation.
/// Deps hold watchers weakly: once every handle is dropped the watcher
/// unsubscribes itself.
#[derive(Clone)]
pub struct Watcher {
    inner: Rc<WatcherInner>,
}

pub(crate) struct WatcherInner {
    id: WatcherId,
    kind: WatcherKind,
    expression: String,
    getter: Getter,
    callback: Option<Callback>,
    lazy: bool,
    options: WatcherOptions,

    active: Cell<bool>,
    dirty: Cell<bool>,
    value: RefCell<Value>,
    evaluations: Cell<usize>,

    /// Deps read during the last completed evaluation.
    deps: RefCell<IndexMap<DepId, Dep>>,
    /// Deps read during the evaluation in progress.
    new_deps: RefCell<IndexMap<DepId, Dep>>,
}

impl Watcher {
    fn build(
        kind: WatcherKind,
        expression: String,
        getter: Getter,
        callback: Option<Callback>,
        options: WatcherOptions,
    ) -> Self {
        let lazy = kind == WatcherKind::Computed;
        Self {
            inner: Rc::new(WatcherInner {
                id: WatcherId::next(),
                kind,
                expression,
                getter,
                callback,
                lazy,
                options,
                active: Cell::new(true),
                dirty: Cell::new(lazy),
                value: RefCell::new(Value::Null),
                evaluations: Cell::new(0),
                deps: RefCell::new(IndexMap::new()),
                new_deps: RefCell::new(IndexMap::new()),
            }),
        }
    }

    /// Create a render watcher and run it once.
    ///
    /// Fails if the first render fails; the error has already been reported.
    pub fn render<F>(expression: impl Into<String>, render: F, options: WatcherOptions) -> Result<Self>
    where
        F: Fn() -> Result<Value> + 'static,
    {
        let watcher = Self::build(
            WatcherKind::Render,
            expression.into(),
            Rc::new(render),
            None,
            options,
        );
        let value = watcher.get()?;
        *watcher.inner.value.borrow_mut() = value;
        Ok(watcher)
    }

    /// Create a lazy computed watcher. Nothing is evaluated until
    /// [`evaluate`](Self::evaluate).
    pub fn computed<F>(expression: impl Into<String>, getter: F) -> Self
    where
        F: Fn() -> Result<Value> + 'static,
    {
        Self::build(
            WatcherKind::Computed,
            expression.into(),
            Rc::new(getter),
            None,
            WatcherOptions::default(),
        )
    }

    /// Create a user watcher and collect its initial value.
    pub fn user(
        expression: impl Into<String>,
        getter: Getter,
        callback: Callback,
        options: WatcherOptions,
    ) -> Self {
        let watcher = Self::build(
            WatcherKind::User,
            expression.into(),
            getter,
            Some(callback),
            options,
        );
        if let Ok(value) = watcher.get() {
            *watcher.inner.value.borrow_mut() = value;
        }
        watcher
    }

    pub fn id(&self) -> WatcherId {
        self.inner.id
    }

    pub fn kind(&self) -> WatcherKind {
        self.inner.kind
    }

    pub fn expression(&self) -> &str {
        &self.inner.expression
    }

    pub fn is_active(&self) -> bool {
        self.inner.active.get()
    }

    pub fn is_dirty(&self) -> bool {
        self.inner.dirty.get()
    }

    pub fn is_lazy(&self) -> bool {
        self.inner.lazy
    }

    pub fn is_sync(&self) -> bool {
        self.inner.options.sync
    }

    pub fn is_deep(&self) -> bool {
        self.inner.options.deep
    }

    /// The value from the last successful evaluation.
    pub fn value(&self) -> Value {
        self.inner.value.borrow().clone()
    }

    /// Number of times the getter has been evaluated.
    pub fn evaluations(&self) -> usize {
        self.inner.evaluations.get()
    }

    /// Ids of the deps held after the last evaluation.
    pub fn dep_ids(&self) -> Vec<DepId> {
        self.inner.deps.borrow().keys().copied().collect()
    }

    pub fn dep_count(&self) -> usize {
        self.inner.deps.borrow().len()
    }

    /// Evaluate the getter and re-collect dependencies.
    ///
    /// Errors are reported. A render watcher returns the error; other
    /// watchers return their previous value.
    pub fn get(&self) -> Result<Value> {
        match self.evaluate_tracked() {
            Ok(value) => Ok(value),
            Err(err) if self.inner.kind == WatcherKind::Render => Err(err),
            Err(_) => Ok(self.value()),
        }
    }

    fn evaluate_tracked(&self) -> Result<Value> {
        self.inner.new_deps.borrow_mut().clear();
        self.inner.evaluations.set(self.inner.evaluations.get() + 1);

        let result = {
            let _scope = TrackingScope::enter(Some(self.clone()));
            let result = (self.inner.getter)();
            if self.inner.options.deep {
                if let Ok(value) = &result {
                    traverse(value);
                }
            }
            result
        };
        self.cleanup_deps();

        result.inspect_err(|err| handle_error(err, &self.error_info("getter")))
    }

    fn error_info(&self, what: &str) -> String {
        match self.inner.kind {
            WatcherKind::Render => format!("render for \"{}\"", self.inner.expression),
            WatcherKind::Computed => format!("{what} for computed \"{}\"", self.inner.expression),
            WatcherKind::User => format!("{what} for watcher \"{}\"", self.inner.expression),
        }
    }

    /// Record a dep read during the current evaluation.
    pub(crate) fn add_dep(&self, dep: &Dep) {
        if !self.is_active() {
            return;
        }
        let id = dep.id();
        {
            let mut new_deps = self.inner.new_deps.borrow_mut();
            if new_deps.contains_key(&id) {
                return;
            }
            new_deps.insert(id, dep.clone());
        }
        if !self.inner.deps.borrow().contains_key(&id) {
            dep.add_sub(self);
        }
    }

    /// Swap in the deps of the evaluation that just finished, unsubscribing
    /// from the ones it no longer read.
    fn cleanup_deps(&self) {
        let new_deps = std::mem::take(&mut *self.inner.new_deps.borrow_mut());
        let old_deps = self.inner.deps.replace(new_deps);

        let deps = self.inner.deps.borrow();
        for (id, dep) in &old_deps {
            if !deps.contains_key(id) {
                dep.remove_sub(self.id());
            }
        }
    }

    /// A subscribed dep changed.
    pub fn update(&self) {
        if self.inner.lazy {
            self.inner.dirty.set(true);
        } else if self.inner.options.sync {
            self.run();
        } else {
            queue_watcher(self.clone());
        }
    }

    /// Re-evaluate and invoke the callback if the value changed.
    ///
    /// Objects and arrays always count as changed since they may have been
    /// mutated in place; deep watchers always fire.
    pub fn run(&self) {
        if !self.is_active() {
            return;
        }
        let Ok(value) = self.evaluate_tracked() else {
            return;
        };

        let changed = Value::has_changed(&self.inner.value.borrow(), &value)
            || value.is_object_like()
            || self.inner.options.deep;
        if !changed {
            return;
        }

        let old = self.inner.value.replace(value.clone());
        if let Some(callback) = self.inner.callback.clone() {
            let info = self.error_info("callback");
            context::untracked(|| invoke_with_error_handling(|| callback(&value, &old), &info));
        }
    }

    /// Recompute a dirty lazy watcher.
    pub fn evaluate(&self) {
        if !self.is_dirty() {
            return;
        }
        if let Ok(value) = self.evaluate_tracked() {
            *self.inner.value.borrow_mut() = value;
        }
        self.inner.dirty.set(false);
    }

    /// Make the current computation depend on everything this watcher
    /// depends on. Used when a computed value is read inside another
    /// computation.
    pub fn depend(&self) {
        let deps: SmallVec<[Dep; 8]> = self.inner.deps.borrow().values().cloned().collect();
        for dep in deps {
            dep.depend();
        }
    }

    /// Unsubscribe from every dep. Idempotent.
    pub fn teardown(&self) {
        if !self.inner.active.replace(false) {
            return;
        }
        let deps = std::mem::take(&mut *self.inner.deps.borrow_mut());
        for dep in deps.values() {
            dep.remove_sub(self.id());
        }
        self.inner.new_deps.borrow_mut().clear();
        tracing::trace!(watcher = %self.id(), expression = %self.inner.expression, "watcher torn down");
    }

    pub(crate) fn before_hook(&self) -> Option<Hook> {
        self.inner.options.before.clone()
    }

    pub(crate) fn updated_hook(&self) -> Option<Hook> {
        self.inner.options.updated.clone()
    }

    pub(crate) fn upgrade(weak: &Weak<WatcherInner>) -> Option<Watcher> {
        weak.upgrade().map(|inner| Watcher { inner })
    }

    pub(crate) fn downgrade(&self) -> Weak<WatcherInner> {
        Rc::downgrade(&self.inner)
    }
}

impl Drop for WatcherInner {
    fn drop(&mut self) {
        for dep in self.deps.get_mut().values() {
            dep.remove_sub(self.id);
        }
    }
}

impl fmt::Debug for Watcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Watcher")
            .field("id", &self.inner.id)
            .field("kind", &self.inner.kind)
            .field("expression", &self.inner.expression)
            .field("active", &self.is_active())
            .field("dirty", &self.is_dirty())
            .field("dep_count", &self.dep_count())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config;
    use crate::error::Error;
    use crate::reactive::{observe, Object};
    use serde_json::json;

    fn state(json: serde_json::Value) -> Object {
        let value = Value::from(json);
        observe(&value);
        value.as_object().cloned().unwrap()
    }

    fn sync_options() -> WatcherOptions {
        WatcherOptions {
            sync: true,
            ..Default::default()
        }
    }

    fn recorder() -> (Rc<RefCell<Vec<(Value, Value)>>>, Callback) {
        let calls = Rc::new(RefCell::new(Vec::new()));
        let calls_clone = calls.clone();
        let callback: Callback = Rc::new(move |new: &Value, old: &Value| {
            calls_clone.borrow_mut().push((new.clone(), old.clone()));
            Ok(())
        });
        (calls, callback)
    }

    #[test]
    fn computed_is_lazy_and_cached() {
        let data = state(json!({"a": 1}));
        let source = data.clone();
        let watcher = Watcher::computed("double", move || {
            let a = source.get("a").and_then(|v| v.as_f64()).unwrap_or(0.0);
            Ok(Value::from(a * 2.0))
        });

        assert!(watcher.is_dirty());
        assert_eq!(watcher.evaluations(), 0);

        watcher.evaluate();
        watcher.evaluate();
        assert_eq!(watcher.value(), Value::from(2));
        assert_eq!(watcher.evaluations(), 1);

        data.assign("a", 5);
        assert!(watcher.is_dirty());
        watcher.evaluate();
        assert_eq!(watcher.value(), Value::from(10));
    }

    #[test]
    fn stale_dependencies_are_dropped() {
        let data = state(json!({"flag": true, "a": 1, "b": 2}));
        let source = data.clone();
        let watcher = Watcher::computed("branch", move || {
            let flag = source.get("flag").and_then(|v| v.as_bool()).unwrap_or(false);
            Ok(if flag { source.get("a") } else { source.get("b") }.unwrap_or_default())
        });

        watcher.evaluate();
        assert_eq!(watcher.dep_count(), 2);

        data.assign("flag", false);
        watcher.evaluate();
        assert_eq!(watcher.value(), Value::from(2));

        // "a" is no longer read, so writing it must not dirty the watcher
        data.assign("a", 100);
        assert!(!watcher.is_dirty());

        data.assign("b", 3);
        assert!(watcher.is_dirty());
    }

    #[test]
    fn sync_user_watcher_receives_new_and_old() {
        let data = state(json!({"a": 1}));
        let source = data.clone();
        let (calls, callback) = recorder();

        let _watcher = Watcher::user(
            "a",
            Rc::new(move || Ok(source.get("a").unwrap_or_default())),
            callback,
            sync_options(),
        );

        data.assign("a", 2);
        data.assign("a", 2);
        data.assign("a", 3);

        assert_eq!(
            *calls.borrow(),
            vec![
                (Value::from(2), Value::from(1)),
                (Value::from(3), Value::from(2)),
            ]
        );
    }

    #[test]
    fn teardown_stops_notifications() {
        let data = state(json!({"a": 1}));
        let source = data.clone();
        let (calls, callback) = recorder();

        let watcher = Watcher::user(
            "a",
            Rc::new(move || Ok(source.get("a").unwrap_or_default())),
            callback,
            sync_options(),
        );
        assert_eq!(watcher.dep_count(), 1);

        watcher.teardown();
        watcher.teardown();
        assert!(!watcher.is_active());
        assert_eq!(watcher.dep_count(), 0);

        data.assign("a", 2);
        assert!(calls.borrow().is_empty());
    }

    #[test]
    fn dropping_last_handle_unsubscribes() {
        let data = state(json!({"a": 1}));
        let source = data.clone();
        let watcher = Watcher::computed("a", move || Ok(source.get("a").unwrap_or_default()));
        watcher.evaluate();

        let Some(crate::reactive::object::Slot::Reactive(prop)) = data.slot("a") else {
            panic!("expected reactive slot");
        };
        assert_eq!(prop.dep().subscriber_count(), 1);

        drop(watcher);
        assert_eq!(prop.dep().subscriber_count(), 0);
    }

    #[test]
    fn user_getter_error_is_reported_and_swallowed() {
        let reported = Rc::new(RefCell::new(Vec::new()));
        let reported_clone = reported.clone();
        config::configure(|c| {
            c.error_handler = Some(Rc::new(move |_: &Error, info: &str| {
                reported_clone.borrow_mut().push(info.to_string());
                Ok(())
            }));
        });

        let (calls, callback) = recorder();
        let watcher = Watcher::user(
            "broken",
            Rc::new(|| Err(Error::msg("nope"))),
            callback,
            WatcherOptions::default(),
        );

        assert_eq!(watcher.value(), Value::Null);
        watcher.run();
        assert!(calls.borrow().is_empty());
        assert_eq!(
            *reported.borrow(),
            vec![
                "getter for watcher \"broken\"".to_string(),
                "getter for watcher \"broken\"".to_string(),
            ]
        );
    }

    #[test]
    fn render_error_propagates() {
        config::configure(|c| c.silent = true);
        let result = Watcher::render("view", || Err(Error::msg("bad render")), WatcherOptions::default());
        assert_eq!(result.err(), Some(Error::msg("bad render")));
    }

    #[test]
    fn callback_error_does_not_escape() {
        let data = state(json!({"a": 1}));
        let source = data.clone();
        let callback: Callback = Rc::new(|_: &Value, _: &Value| Err(Error::msg("callback failed")));

        let watcher = Watcher::user(
            "a",
            Rc::new(move || Ok(source.get("a").unwrap_or_default())),
            callback,
            sync_options(),
        );

        data.assign("a", 2);
        assert_eq!(watcher.value(), Value::from(2));
    }

    #[test]
    fn object_values_always_fire() {
        let data = state(json!({"obj": {"x": 1}}));
        let source = data.clone();
        let (calls, callback) = recorder();

        let watcher = Watcher::user(
            "obj",
            Rc::new(move || Ok(source.get("obj").unwrap_or_default())),
            callback,
            WatcherOptions::default(),
        );

        watcher.run();
        assert_eq!(calls.borrow().len(), 1);
    }

    #[test]
    fn deep_watcher_tracks_nested_writes() {
        let data = state(json!({"nested": {"inner": {"x": 1}}}));
        let source = data.clone();
        let (calls, callback) = recorder();

        let _watcher = Watcher::user(
            "nested",
            Rc::new(move || Ok(source.get("nested").unwrap_or_default())),
            callback,
            WatcherOptions {
                deep: true,
                sync: true,
                ..Default::default()
            },
        );

        let inner = data
            .get("nested")
            .and_then(|v| v.as_object().cloned())
            .and_then(|o| o.get("inner"))
            .and_then(|v| v.as_object().cloned())
            .unwrap();
        inner.assign("x", 2);

        assert_eq!(calls.borrow().len(), 1);
    }

    #[test]
    fn computed_depend_forwards_to_outer() {
        let data = state(json!({"a": 1}));
        let source = data.clone();
        let computed = Watcher::computed("a", move || Ok(source.get("a").unwrap_or_default()));
        computed.evaluate();

        let inner = computed.clone();
        let (calls, callback) = recorder();
        let _outer = Watcher::user(
            "outer",
            Rc::new(move || {
                inner.evaluate();
                inner.depend();
                Ok(inner.value())
            }),
            callback,
            sync_options(),
        );

        data.assign("a", 7);
        assert_eq!(*calls.borrow(), vec![(Value::from(7), Value::from(1))]);
    }

    #[test]
    fn sync_watcher_reads_fresh_computed_created_after_it() {
        let data = state(json!({"a": 1, "t": 0}));
        let slot: Rc<RefCell<Option<Watcher>>> = Rc::new(RefCell::new(None));

        let source = data.clone();
        let reader = slot.clone();
        let (calls, callback) = recorder();
        let outer = Watcher::user(
            "outer",
            Rc::new(move || {
                source.get("t");
                let inner = reader.borrow().clone();
                match inner {
                    Some(inner) => {
                        if inner.is_dirty() {
                            inner.evaluate();
                        }
                        inner.depend();
                        Ok(inner.value())
                    }
                    None => Ok(Value::Null),
                }
            }),
            callback,
            sync_options(),
        );

        let source = data.clone();
        let computed = Watcher::computed("a * 10", move || {
            let a = source.get("a").and_then(|v| v.as_f64()).unwrap_or(0.0);
            Ok(Value::from(a * 10.0))
        });
        assert!(outer.id() < computed.id());
        *slot.borrow_mut() = Some(computed.clone());

        data.assign("t", 1);
        assert_eq!(outer.value(), Value::from(10));

        data.assign("a", 2);
        assert_eq!(computed.value(), Value::from(20));
        assert_eq!(
            calls.borrow().last().cloned(),
            Some((Value::from(20), Value::from(10)))
        );
    }
}
