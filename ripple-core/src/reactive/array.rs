//! Observable sequences.
//!
//! Element writes cannot be intercepted one by one, so an [`Array`] only
//! exposes the mutating operations that also notify: `push`, `pop`,
//! `shift`, `unshift`, `splice`, `sort_by` and `reverse`. Each of them
//! observes newly inserted elements and then notifies the array's own
//! dependency. Writing one index goes through [`set`](crate::reactive::set),
//! which is a one-element `splice`.

use std::cell::{Cell, RefCell};
use std::cmp::Ordering;
use std::fmt;
use std::rc::Rc;

use super::observer::{observe, Observer};
use super::value::Value;
use crate::error::warn;

/// One past the largest index [`set`](super::observer::set) accepts.
pub const MAX_ARRAY_LENGTH: usize = u32::MAX as usize;

/// A shared, observable sequence of values.
#[derive(Clone)]
pub struct Array {
    inner: Rc<ArrayInner>,
}

struct ArrayInner {
    items: RefCell<Vec<Value>>,
    observer: RefCell<Option<Rc<Observer>>>,
    frozen: Cell<bool>,
    raw: Cell<bool>,
}

impl Array {
    pub fn new() -> Self {
        Self::from(Vec::new())
    }

    pub fn len(&self) -> usize {
        self.depend();
        self.inner.items.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, index: usize) -> Option<Value> {
        self.depend();
        self.inner.items.borrow().get(index).cloned()
    }

    /// Copy of the current elements.
    pub fn to_vec(&self) -> Vec<Value> {
        self.depend();
        self.inner.items.borrow().clone()
    }

    /// Append a value; returns the new length.
    pub fn push(&self, value: impl Into<Value>) -> usize {
        let value = value.into();
        if self.reject_frozen("push") {
            return self.inner.items.borrow().len();
        }
        let len = {
            let mut items = self.inner.items.borrow_mut();
            items.push(value.clone());
            items.len()
        };
        self.mutated(&[value]);
        len
    }

    pub fn pop(&self) -> Option<Value> {
        if self.reject_frozen("pop") {
            return None;
        }
        let popped = self.inner.items.borrow_mut().pop();
        self.mutated(&[]);
        popped
    }

    pub fn shift(&self) -> Option<Value> {
        if self.reject_frozen("shift") {
            return None;
        }
        let shifted = {
            let mut items = self.inner.items.borrow_mut();
            (!items.is_empty()).then(|| items.remove(0))
        };
        self.mutated(&[]);
        shifted
    }

    /// Prepend a value; returns the new length.
    pub fn unshift(&self, value: impl Into<Value>) -> usize {
        let value = value.into();
        if self.reject_frozen("unshift") {
            return self.inner.items.borrow().len();
        }
        let len = {
            let mut items = self.inner.items.borrow_mut();
            items.insert(0, value.clone());
            items.len()
        };
        self.mutated(&[value]);
        len
    }

    /// Remove `delete_count` elements at `start` and insert `items` there.
    ///
    /// `start` and `delete_count` are clamped to the current length. Returns
    /// the removed elements.
    pub fn splice<I>(&self, start: usize, delete_count: usize, items: I) -> Vec<Value>
    where
        I: IntoIterator<Item = Value>,
    {
        if self.reject_frozen("splice") {
            return Vec::new();
        }
        let inserted: Vec<Value> = items.into_iter().collect();
        let removed = {
            let mut current = self.inner.items.borrow_mut();
            let start = start.min(current.len());
            let end = start + delete_count.min(current.len() - start);
            current.splice(start..end, inserted.iter().cloned()).collect()
        };
        self.mutated(&inserted);
        removed
    }

    /// Sort in place with a comparator.
    pub fn sort_by<F>(&self, compare: F)
    where
        F: FnMut(&Value, &Value) -> Ordering,
    {
        if self.reject_frozen("sort") {
            return;
        }
        // the comparator may read this array, so sort a detached copy
        let mut items = std::mem::take(&mut *self.inner.items.borrow_mut());
        items.sort_by(compare);
        *self.inner.items.borrow_mut() = items;
        self.mutated(&[]);
    }

    pub fn reverse(&self) {
        if self.reject_frozen("reverse") {
            return;
        }
        self.inner.items.borrow_mut().reverse();
        self.mutated(&[]);
    }

    /// Freeze the array: mutators are ignored, never observed.
    pub fn freeze(&self) {
        self.inner.frozen.set(true);
    }

    pub fn is_frozen(&self) -> bool {
        self.inner.frozen.get()
    }

    /// Exclude the array from observation.
    pub fn mark_raw(&self) {
        self.inner.raw.set(true);
    }

    pub fn is_raw(&self) -> bool {
        self.inner.raw.get()
    }

    pub fn observer(&self) -> Option<Rc<Observer>> {
        self.inner.observer.borrow().clone()
    }

    pub fn ptr_eq(&self, other: &Array) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn addr(&self) -> usize {
        Rc::as_ptr(&self.inner) as *const () as usize
    }

    pub(crate) fn set_observer(&self, observer: Rc<Observer>) {
        *self.inner.observer.borrow_mut() = Some(observer);
    }

    /// Elements without registering a dependency.
    pub(crate) fn items_untracked(&self) -> Vec<Value> {
        self.inner.items.borrow().clone()
    }

    /// Grow to `len`, padding with nulls. Does not notify.
    pub(crate) fn pad_to(&self, len: usize) {
        let mut items = self.inner.items.borrow_mut();
        if items.len() < len {
            items.resize(len, Value::Null);
        }
    }

    fn depend(&self) {
        if let Some(observer) = self.observer() {
            observer.dep().depend();
        }
    }

    fn reject_frozen(&self, op: &str) -> bool {
        if self.is_frozen() {
            warn(format_args!("cannot {op} on a frozen array"));
        }
        self.is_frozen()
    }

    fn mutated(&self, inserted: &[Value]) {
        let Some(observer) = self.observer() else {
            return;
        };
        if !observer.is_shallow() {
            for value in inserted {
                observe(value);
            }
        }
        observer.dep().notify();
    }
}

impl Default for Array {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Vec<Value>> for Array {
    fn from(items: Vec<Value>) -> Self {
        Self {
            inner: Rc::new(ArrayInner {
                items: RefCell::new(items),
                observer: RefCell::new(None),
                frozen: Cell::new(false),
                raw: Cell::new(false),
            }),
        }
    }
}

impl<V: Into<Value>> FromIterator<V> for Array {
    fn from_iter<I: IntoIterator<Item = V>>(iter: I) -> Self {
        Self::from(iter.into_iter().map(Into::into).collect::<Vec<_>>())
    }
}

impl fmt::Debug for Array {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Array")
            .field("len", &self.inner.items.borrow().len())
            .field("observed", &self.observer().is_some())
            .finish()
    }
}
