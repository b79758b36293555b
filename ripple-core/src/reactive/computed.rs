//! Computed Properties
//!
//! A [`Computed`] wraps a lazy [`Watcher`]. Reading it re-evaluates only when
//! a dependency changed since the last read, and forwards the computed
//! watcher's dependencies to whatever computation is reading it, so a
//! render that reads a computed value re-runs when the value's inputs
//! change.

use std::fmt;
use std::rc::Rc;

use super::context;
use super::object::{Accessor, AccessorSet};
use super::value::Value;
use super::watcher::{Getter, Watcher};
use crate::error::{handle_error, warn};

/// A derived value with an optional setter.
#[derive(Clone)]
pub struct Computed {
    expression: String,
    source: Source,
    setter: Option<AccessorSet>,
}

#[derive(Clone)]
enum Source {
    Cached(Watcher),
    /// Evaluated on every read, in the reader's tracking scope.
    Uncached(Getter),
}

impl Computed {
    /// A cached computed value backed by a lazy watcher.
    pub fn new(expression: impl Into<String>, getter: Getter) -> Self {
        let expression = expression.into();
        let watcher = Watcher::computed(expression.clone(), move || getter());
        Self {
            expression,
            source: Source::Cached(watcher),
            setter: None,
        }
    }

    /// A computed value that calls its getter on every read.
    pub fn uncached(expression: impl Into<String>, getter: Getter) -> Self {
        Self {
            expression: expression.into(),
            source: Source::Uncached(getter),
            setter: None,
        }
    }

    pub fn with_setter(mut self, setter: AccessorSet) -> Self {
        self.setter = Some(setter);
        self
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// The backing watcher, `None` for uncached values.
    pub fn watcher(&self) -> Option<&Watcher> {
        match &self.source {
            Source::Cached(watcher) => Some(watcher),
            Source::Uncached(_) => None,
        }
    }

    /// Read the value, recomputing if dirty.
    pub fn get(&self) -> Value {
        match &self.source {
            Source::Cached(watcher) => {
                if watcher.is_dirty() {
                    watcher.evaluate();
                }
                if context::is_tracking() {
                    watcher.depend();
                }
                watcher.value()
            }
            Source::Uncached(getter) => getter().unwrap_or_else(|err| {
                handle_error(&err, &format!("getter for computed \"{}\"", self.expression));
                Value::Null
            }),
        }
    }

    /// Invoke the setter. Without one the write is ignored with a warning.
    pub fn set(&self, value: Value) {
        match &self.setter {
            Some(setter) => setter(value),
            None => warn(format_args!(
                "computed property \"{}\" was assigned to but it has no setter",
                self.expression
            )),
        }
    }

    /// Expose the computed value as an object accessor.
    pub fn to_accessor(&self) -> Accessor {
        let read = self.clone();
        let write = self.clone();
        Accessor::new(move || read.get(), Some(Rc::new(move |v: Value| write.set(v))))
    }

    /// Stop tracking. Further reads return the last value.
    pub fn teardown(&self) {
        if let Some(watcher) = self.watcher() {
            watcher.teardown();
        }
    }
}

impl fmt::Debug for Computed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Computed")
            .field("expression", &self.expression)
            .field("cached", &self.watcher().is_some())
            .field("has_setter", &self.setter.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::{observe, Object, WatcherOptions};
    use serde_json::json;
    use std::cell::{Cell, RefCell};

    fn state(json: serde_json::Value) -> Object {
        let value = Value::from(json);
        observe(&value);
        value.as_object().cloned().unwrap()
    }

    fn counting_getter(data: &Object, calls: &Rc<Cell<usize>>) -> Getter {
        let data = data.clone();
        let calls = calls.clone();
        Rc::new(move || {
            calls.set(calls.get() + 1);
            let a = data.get("a").and_then(|v| v.as_f64()).unwrap_or(0.0);
            Ok(Value::from(a + 1.0))
        })
    }

    #[test]
    fn cached_reads_evaluate_once() {
        let data = state(json!({"a": 1}));
        let calls = Rc::new(Cell::new(0));
        let computed = Computed::new("plus_one", counting_getter(&data, &calls));

        assert_eq!(calls.get(), 0);
        assert_eq!(computed.get(), Value::from(2));
        assert_eq!(computed.get(), Value::from(2));
        assert_eq!(calls.get(), 1);

        data.assign("a", 4);
        assert_eq!(calls.get(), 1);
        assert_eq!(computed.get(), Value::from(5));
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn uncached_reads_evaluate_every_time() {
        let data = state(json!({"a": 1}));
        let calls = Rc::new(Cell::new(0));
        let computed = Computed::uncached("plus_one", counting_getter(&data, &calls));

        computed.get();
        computed.get();
        assert_eq!(calls.get(), 2);
        assert!(computed.watcher().is_none());
    }

    #[test]
    fn reader_is_notified_through_computed() {
        let data = state(json!({"a": 1}));
        let calls = Rc::new(Cell::new(0));
        let computed = Computed::new("plus_one", counting_getter(&data, &calls));

        let seen = Rc::new(RefCell::new(Vec::new()));
        let seen_clone = seen.clone();
        let reader = computed.clone();
        let _watcher = Watcher::user(
            "reader",
            Rc::new(move || Ok(reader.get())),
            Rc::new(move |new: &Value, _: &Value| {
                seen_clone.borrow_mut().push(new.clone());
                Ok(())
            }),
            WatcherOptions {
                sync: true,
                ..Default::default()
            },
        );

        data.assign("a", 10);
        assert_eq!(*seen.borrow(), vec![Value::from(11)]);
    }

    #[test]
    fn setter_and_accessor() {
        let data = state(json!({"a": 1}));
        let calls = Rc::new(Cell::new(0));
        let target = data.clone();
        let computed = Computed::new("plus_one", counting_getter(&data, &calls)).with_setter(
            Rc::new(move |v: Value| {
                let n = v.as_f64().unwrap_or(0.0);
                target.assign("a", n - 1.0);
            }),
        );

        let host = Object::new();
        host.define_accessor("plus_one", computed.to_accessor());
        host.assign("plus_one", 10);

        assert_eq!(data.get("a"), Some(Value::from(9)));
        assert_eq!(host.get("plus_one"), Some(Value::from(10)));
    }

    #[test]
    fn set_without_setter_is_ignored() {
        crate::config::configure(|c| c.silent = true);
        let computed = Computed::new("fixed", Rc::new(|| Ok(Value::from(1))));
        computed.set(Value::from(2));
        assert_eq!(computed.get(), Value::from(1));
    }
}
