//! Observable objects.
//!
//! An [`Object`] is an ordered string-keyed map with shared identity. Each
//! key maps to a slot: a plain data value, an accessor pair, or, once the
//! object has been observed, a reactive property that tracks reads and
//! notifies on writes.
//!
//! Plain assignment to a key that does not exist yet creates a plain,
//! non-reactive slot, just like adding a property to an already observed
//! object would. Use [`set`](crate::reactive::set) to add a key reactively.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;

use super::observer::{Observer, ReactiveProperty};
use super::value::Value;
use crate::error::warn;

/// Getter half of an accessor property.
pub type AccessorGet = Rc<dyn Fn() -> Value>;

/// Setter half of an accessor property.
pub type AccessorSet = Rc<dyn Fn(Value)>;

/// A computed property slot: a getter and an optional setter.
#[derive(Clone)]
pub struct Accessor {
    pub(crate) get: AccessorGet,
    pub(crate) set: Option<AccessorSet>,
}

impl Accessor {
    pub fn new(get: impl Fn() -> Value + 'static, set: Option<AccessorSet>) -> Self {
        Self {
            get: Rc::new(get),
            set,
        }
    }

    pub fn has_setter(&self) -> bool {
        self.set.is_some()
    }
}

#[derive(Clone)]
pub(crate) enum Slot {
    Data(Value),
    Accessor(Accessor),
    Reactive(Rc<ReactiveProperty>),
}

/// A shared, observable key/value object.
#[derive(Clone)]
pub struct Object {
    inner: Rc<ObjectInner>,
}

struct ObjectInner {
    slots: RefCell<IndexMap<String, Slot>>,
    observer: RefCell<Option<Rc<Observer>>>,
    frozen: Cell<bool>,
    raw: Cell<bool>,
}

impl Object {
    pub fn new() -> Self {
        Self {
            inner: Rc::new(ObjectInner {
                slots: RefCell::new(IndexMap::new()),
                observer: RefCell::new(None),
                frozen: Cell::new(false),
                raw: Cell::new(false),
            }),
        }
    }

    /// Read `key`. Reading a reactive property subscribes the current
    /// computation.
    pub fn get(&self, key: &str) -> Option<Value> {
        let slot = self.slot(key);
        match slot {
            None => {
                self.depend_structure();
                None
            }
            Some(Slot::Data(value)) => Some(value),
            Some(Slot::Accessor(accessor)) => Some((accessor.get)()),
            Some(Slot::Reactive(prop)) => Some(prop.get()),
        }
    }

    /// Assign `key`, the equivalent of `obj[key] = value`.
    ///
    /// Existing reactive properties notify their subscribers. A new key is
    /// added as a plain slot. Frozen objects ignore the write.
    pub fn assign(&self, key: &str, value: impl Into<Value>) {
        let value = value.into();
        if self.is_frozen() {
            warn(format_args!("cannot assign \"{key}\" on a frozen object"));
            return;
        }

        let slot = self.slot(key);
        match slot {
            Some(Slot::Reactive(prop)) => prop.set(value),
            Some(Slot::Accessor(accessor)) => {
                if let Some(set) = accessor.set {
                    set(value);
                }
            }
            Some(Slot::Data(_)) | None => {
                self.inner
                    .slots
                    .borrow_mut()
                    .insert(key.to_string(), Slot::Data(value));
            }
        }
    }

    /// Install an accessor property. Ignored on frozen objects.
    pub fn define_accessor(&self, key: &str, accessor: Accessor) {
        if self.is_frozen() {
            return;
        }
        self.insert_slot(key, Slot::Accessor(accessor));
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.depend_structure();
        self.inner.slots.borrow().contains_key(key)
    }

    pub fn keys(&self) -> Vec<String> {
        self.depend_structure();
        self.inner.slots.borrow().keys().cloned().collect()
    }

    /// Key/value pairs in insertion order.
    pub fn entries(&self) -> Vec<(String, Value)> {
        self.keys()
            .into_iter()
            .filter_map(|key| self.get(&key).map(|value| (key, value)))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.depend_structure();
        self.inner.slots.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Freeze the object: no writes, no new keys, never observed.
    pub fn freeze(&self) {
        self.inner.frozen.set(true);
    }

    pub fn is_frozen(&self) -> bool {
        self.inner.frozen.get()
    }

    /// Exclude the object from observation.
    pub fn mark_raw(&self) {
        self.inner.raw.set(true);
    }

    pub fn is_raw(&self) -> bool {
        self.inner.raw.get()
    }

    pub fn observer(&self) -> Option<Rc<Observer>> {
        self.inner.observer.borrow().clone()
    }

    pub fn ptr_eq(&self, other: &Object) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn addr(&self) -> usize {
        Rc::as_ptr(&self.inner) as *const () as usize
    }

    pub(crate) fn set_observer(&self, observer: Rc<Observer>) {
        *self.inner.observer.borrow_mut() = Some(observer);
    }

    pub(crate) fn slot(&self, key: &str) -> Option<Slot> {
        self.inner.slots.borrow().get(key).cloned()
    }

    pub(crate) fn insert_slot(&self, key: &str, slot: Slot) {
        self.inner.slots.borrow_mut().insert(key.to_string(), slot);
    }

    pub(crate) fn remove_slot(&self, key: &str) -> bool {
        self.inner.slots.borrow_mut().shift_remove(key).is_some()
    }

    pub(crate) fn raw_keys(&self) -> Vec<String> {
        self.inner.slots.borrow().keys().cloned().collect()
    }

    fn depend_structure(&self) {
        if let Some(observer) = self.observer() {
            observer.dep().depend();
        }
    }
}

impl Default for Object {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> FromIterator<(K, V)> for Object
where
    K: Into<String>,
    V: Into<Value>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let object = Object::new();
        {
            let mut slots = object.inner.slots.borrow_mut();
            for (key, value) in iter {
                slots.insert(key.into(), Slot::Data(value.into()));
            }
        }
        object
    }
}

impl fmt::Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Object")
            .field("keys", &self.raw_keys())
            .field("observed", &self.observer().is_some())
            .finish()
    }
}
