//! Observers and Reactive Properties
//!
//! [`observe`] converts a plain object or array into an observed one:
//!
//! - an [`Observer`] is attached to the value; its dep fires on structural
//!   changes (keys added or removed through [`set`]/[`del`], array
//!   mutations);
//! - for objects, every slot is replaced by a [`ReactiveProperty`] whose dep
//!   fires when that key is written;
//! - nested objects and arrays are observed recursively, unless shallow.
//!
//! Observation is idempotent. Observing a value twice returns the observer
//! attached the first time.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use super::array::{Array, MAX_ARRAY_LENGTH};
use super::context;
use super::dep::Dep;
use super::object::{Accessor, Object, Slot};
use super::value::Value;
use crate::error::{warn, Error, Result};

thread_local! {
    static SHOULD_OBSERVE: Cell<bool> = const { Cell::new(true) };
}

/// Enable or disable creation of new observers on this thread.
///
/// Already observed values keep their observers either way.
pub fn toggle_observing(value: bool) {
    SHOULD_OBSERVE.with(|flag| flag.set(value));
}

pub fn should_observe() -> bool {
    SHOULD_OBSERVE.with(Cell::get)
}

/// The observer attached to one object or array.
pub struct Observer {
    dep: Dep,
    /// Component instances using the value as root data.
    vm_count: Cell<usize>,
    shallow: bool,
}

impl Observer {
    fn new(shallow: bool) -> Self {
        Self {
            dep: Dep::new(),
            vm_count: Cell::new(0),
            shallow,
        }
    }

    /// Dep notified on structural changes.
    pub fn dep(&self) -> &Dep {
        &self.dep
    }

    pub fn vm_count(&self) -> usize {
        self.vm_count.get()
    }

    pub fn is_shallow(&self) -> bool {
        self.shallow
    }

    pub(crate) fn add_vm(&self) {
        self.vm_count.set(self.vm_count.get() + 1);
    }

    pub(crate) fn remove_vm(&self) {
        self.vm_count.set(self.vm_count.get().saturating_sub(1));
    }
}

impl fmt::Debug for Observer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observer")
            .field("dep", &self.dep)
            .field("vm_count", &self.vm_count())
            .field("shallow", &self.shallow)
            .finish()
    }
}

/// Observe `value` deeply. See [`observe_with`].
pub fn observe(value: &Value) -> Option<Rc<Observer>> {
    observe_with(value, false)
}

/// Attach an observer to an object or array.
///
/// Returns the existing observer if the value is already observed, and
/// `None` for primitives, frozen or raw values, or while observation is
/// toggled off.
pub fn observe_with(value: &Value, shallow: bool) -> Option<Rc<Observer>> {
    match value {
        Value::Object(object) => {
            if let Some(observer) = object.observer() {
                return Some(observer);
            }
            if !should_observe() || object.is_frozen() || object.is_raw() {
                return None;
            }
            let observer = Rc::new(Observer::new(shallow));
            object.set_observer(observer.clone());
            for key in object.raw_keys() {
                define_reactive(object, &key, None, None, shallow);
            }
            Some(observer)
        }
        Value::Array(array) => {
            if let Some(observer) = array.observer() {
                return Some(observer);
            }
            if !should_observe() || array.is_frozen() || array.is_raw() {
                return None;
            }
            let observer = Rc::new(Observer::new(shallow));
            array.set_observer(observer.clone());
            if !shallow {
                for item in array.items_untracked() {
                    observe(&item);
                }
            }
            Some(observer)
        }
        _ => None,
    }
}

/// Hook run before a reactive property stores a new value.
pub type CustomSetter = Rc<dyn Fn(&Value)>;

enum Backing {
    Value(RefCell<Value>),
    Accessor(Accessor),
}

impl Backing {
    fn read(&self) -> Value {
        match self {
            Backing::Value(cell) => cell.borrow().clone(),
            Backing::Accessor(accessor) => (accessor.get)(),
        }
    }
}

/// One key of an observed object.
pub struct ReactiveProperty {
    dep: Dep,
    backing: Backing,
    child: RefCell<Option<Rc<Observer>>>,
    shallow: bool,
    custom_setter: Option<CustomSetter>,
}

impl ReactiveProperty {
    /// Read the value, subscribing the current computation.
    pub fn get(&self) -> Value {
        let value = self.backing.read();

        if context::is_tracking() {
            self.dep.depend();
            let child = self.child.borrow().clone();
            if let Some(child) = child {
                child.dep().depend();
                if let Value::Array(array) = &value {
                    depend_array(array);
                }
            }
        }

        value
    }

    /// Write the value and notify subscribers, unless nothing changed.
    pub fn set(&self, new_value: Value) {
        let old = context::untracked(|| self.backing.read());
        if !Value::has_changed(&old, &new_value) {
            return;
        }

        if let Some(custom_setter) = &self.custom_setter {
            custom_setter(&new_value);
        }

        match &self.backing {
            Backing::Value(cell) => *cell.borrow_mut() = new_value.clone(),
            Backing::Accessor(accessor) => match &accessor.set {
                Some(set) => set(new_value.clone()),
                // getter-only accessor
                None => return,
            },
        }

        let child = if self.shallow {
            new_value.observer()
        } else {
            observe(&new_value)
        };
        *self.child.borrow_mut() = child;

        self.dep.notify();
    }

    pub fn dep(&self) -> &Dep {
        &self.dep
    }
}

/// Install a reactive property for `key` on `object`.
///
/// `value` of `None` keeps whatever the slot currently holds. An existing
/// accessor keeps serving reads; if it has no setter, writes become silent
/// no-ops. Frozen objects are left untouched.
pub fn define_reactive(
    object: &Object,
    key: &str,
    value: Option<Value>,
    custom_setter: Option<CustomSetter>,
    shallow: bool,
) -> Option<Rc<ReactiveProperty>> {
    if object.is_frozen() {
        return None;
    }

    let (backing, initial) = match object.slot(key) {
        Some(Slot::Accessor(accessor)) => {
            let initial = match (&value, accessor.has_setter()) {
                (Some(value), _) => value.clone(),
                (None, true) => context::untracked(|| (accessor.get)()),
                (None, false) => Value::Null,
            };
            (Backing::Accessor(accessor), initial)
        }
        Some(Slot::Reactive(previous)) => {
            let read = previous.clone();
            let write = previous.clone();
            let accessor = Accessor::new(move || read.get(), Some(Rc::new(move |v: Value| write.set(v))));
            let initial = value.unwrap_or_else(|| context::untracked(|| previous.get()));
            (Backing::Accessor(accessor), initial)
        }
        Some(Slot::Data(current)) => {
            let initial = value.unwrap_or(current);
            (Backing::Value(RefCell::new(initial.clone())), initial)
        }
        None => {
            let initial = value.unwrap_or_default();
            (Backing::Value(RefCell::new(initial.clone())), initial)
        }
    };

    let child = if shallow {
        initial.observer()
    } else {
        observe(&initial)
    };

    let property = Rc::new(ReactiveProperty {
        dep: Dep::new(),
        backing,
        child: RefCell::new(child),
        shallow,
        custom_setter,
    });
    object.insert_slot(key, Slot::Reactive(property.clone()));
    Some(property)
}

/// Depend on every observed element of an array, recursively, since
/// element access cannot be intercepted.
fn depend_array(array: &Array) {
    for item in array.items_untracked() {
        if let Some(observer) = item.observer() {
            observer.dep().depend();
        }
        if let Value::Array(nested) = &item {
            depend_array(nested);
        }
    }
}

/// Key for the structural mutation helpers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Key {
    Name(String),
    Index(usize),
}

impl From<&str> for Key {
    fn from(s: &str) -> Self {
        Key::Name(s.to_string())
    }
}

impl From<String> for Key {
    fn from(s: String) -> Self {
        Key::Name(s)
    }
}

impl From<usize> for Key {
    fn from(i: usize) -> Self {
        Key::Index(i)
    }
}

impl Key {
    fn as_index(&self) -> Option<usize> {
        match self {
            Key::Index(i) => Some(*i),
            Key::Name(name) => name.parse().ok(),
        }
    }

    fn into_name(self) -> String {
        match self {
            Key::Name(name) => name,
            Key::Index(i) => i.to_string(),
        }
    }
}

/// Add or update a property so that the change is observed.
///
/// Existing keys are plain assignments. A new key on an observed object is
/// defined reactively and the object's structural dep is notified. Arrays
/// take an index and become a one-element `splice`, padding with nulls.
/// Component root data objects refuse new keys.
pub fn set(target: &Value, key: impl Into<Key>, value: impl Into<Value>) -> Result<()> {
    let key = key.into();
    let value = value.into();

    match target {
        Value::Array(array) => {
            let index = key.as_index().ok_or(Error::InvalidTarget)?;
            if index >= MAX_ARRAY_LENGTH {
                let err = Error::InvalidIndex(index);
                warn(&err);
                return Err(err);
            }
            array.pad_to(index);
            array.splice(index, 1, [value]);
            Ok(())
        }
        Value::Object(object) => {
            let key = key.into_name();
            if object.slot(&key).is_some() {
                object.assign(&key, value);
                return Ok(());
            }

            let observer = object.observer();
            if observer.as_ref().is_some_and(|ob| ob.vm_count() > 0) {
                let err = Error::RootDataMutation(key);
                warn(&err);
                return Err(err);
            }

            match observer {
                Some(observer) if !object.is_frozen() => {
                    define_reactive(object, &key, Some(value), None, observer.is_shallow());
                    observer.dep().notify();
                }
                _ => object.assign(&key, value),
            }
            Ok(())
        }
        _ => {
            warn(Error::InvalidTarget);
            Err(Error::InvalidTarget)
        }
    }
}

/// Delete a property and notify the object's structural dep.
///
/// Arrays take an index and become a one-element `splice`. Component root
/// data objects refuse deletion. Missing keys are ignored.
pub fn del(target: &Value, key: impl Into<Key>) -> Result<()> {
    let key = key.into();

    match target {
        Value::Array(array) => {
            let index = key.as_index().ok_or(Error::InvalidTarget)?;
            array.splice(index, 1, []);
            Ok(())
        }
        Value::Object(object) => {
            let key = key.into_name();
            let observer = object.observer();
            if observer.as_ref().is_some_and(|ob| ob.vm_count() > 0) {
                let err = Error::RootDataMutation(key);
                warn(&err);
                return Err(err);
            }
            if object.is_frozen() {
                warn(format_args!("cannot delete \"{key}\" on a frozen object"));
                return Ok(());
            }
            if !object.remove_slot(&key) {
                return Ok(());
            }
            if let Some(observer) = observer {
                observer.dep().notify();
            }
            Ok(())
        }
        _ => {
            warn(Error::InvalidTarget);
            Err(Error::InvalidTarget)
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
