//! State initialization and the property proxy.

use std::cell::Cell;
use std::rc::Rc;

use indexmap::IndexMap;

use super::{upgrade, Component, ComputedDef, ComputedGetter, DataFn};
use crate::error::{handle_error, invoke_with_error_handling, warn, Error, Result};
use crate::reactive::watch::resolve_path;
use crate::reactive::{
    define_reactive, observe, observe_with, parse_path, should_observe, toggle_observing,
    untracked, Callback, Computed, CustomSetter, Getter, Handler, Object, TrackingScope, Value,
    WatchHandle, WatchOptions, WatchSource,
};

thread_local! {
    static UPDATING_CHILD: Cell<bool> = const { Cell::new(false) };
}

/// Whether a parent is currently pushing new props into a child.
pub fn is_updating_child_component() -> bool {
    UPDATING_CHILD.with(Cell::get)
}

struct UpdatingChild {
    previous: bool,
}

impl UpdatingChild {
    fn enter() -> Self {
        Self {
            previous: UPDATING_CHILD.with(|flag| flag.replace(true)),
        }
    }
}

impl Drop for UpdatingChild {
    fn drop(&mut self) {
        UPDATING_CHILD.with(|flag| flag.set(self.previous));
    }
}

/// Keys starting with `$` or `_` are never proxied.
fn is_reserved(key: &str) -> bool {
    key.starts_with('$') || key.starts_with('_')
}

pub(super) fn init_state(
    vm: &Component,
    props: IndexMap<String, Value>,
    data: Option<DataFn>,
    computed: IndexMap<String, ComputedDef>,
    watch: Vec<(String, Handler)>,
) -> Result<()> {
    init_props(vm, props);
    init_methods(vm);
    init_data(vm, data);
    init_computed(vm, computed);
    for (expression, handler) in watch {
        vm.watch_with(&expression, handler)?;
    }
    Ok(())
}

fn init_props(vm: &Component, props: IndexMap<String, Value>) {
    let target = &vm.inner.props;
    observe_with(&Value::from(target.clone()), true);

    let is_root = vm.is_root();
    let previous = should_observe();
    if !is_root {
        toggle_observing(false);
    }

    for (key, value) in props {
        vm.inner.prop_keys.borrow_mut().insert(key.clone());

        let prop = key.clone();
        let custom_setter: CustomSetter = Rc::new(move |_: &Value| {
            if !is_root && !is_updating_child_component() {
                warn(format_args!(
                    "avoid mutating prop \"{prop}\" directly, the value will be overwritten \
                     whenever the parent re-renders"
                ));
            }
        });
        define_reactive(target, &key, Some(value), Some(custom_setter), true);
    }

    toggle_observing(previous);
}

fn init_methods(vm: &Component) {
    let prop_keys = vm.inner.prop_keys.borrow();
    for key in vm.inner.methods.keys() {
        if prop_keys.contains(key) {
            warn(format_args!("method \"{key}\" has already been defined as a prop"));
        }
        if is_reserved(key) {
            warn(format_args!(
                "method \"{key}\" starts with a reserved prefix; avoid names starting with _ or $"
            ));
        }
    }
}

fn init_data(vm: &Component, data: Option<DataFn>) {
    let value = match data {
        Some(factory) => {
            let _scope = TrackingScope::untracked();
            factory(vm).unwrap_or_else(|err| {
                handle_error(&err, "data()");
                Value::from(Object::new())
            })
        }
        None => Value::from(Object::new()),
    };

    let object = match value {
        Value::Object(object) => object,
        other => {
            warn(format_args!(
                "data functions should return an object, got {}",
                other.type_name()
            ));
            Object::new()
        }
    };

    let keys = untracked(|| object.keys());
    {
        let prop_keys = vm.inner.prop_keys.borrow();
        let mut data_keys = vm.inner.data_keys.borrow_mut();
        for key in keys {
            if vm.inner.methods.contains_key(&key) {
                warn(format_args!("method \"{key}\" has already been defined as a data property"));
            }
            if prop_keys.contains(&key) {
                warn(format_args!(
                    "data property \"{key}\" is already declared as a prop, use the prop's value instead"
                ));
            } else if !is_reserved(&key) {
                data_keys.insert(key);
            }
        }
    }

    if let Some(observer) = observe(&Value::from(object.clone())) {
        observer.add_vm();
    }
    *vm.inner.data.borrow_mut() = object;
}

fn init_computed(vm: &Component, computed: IndexMap<String, ComputedDef>) {
    for (key, def) in computed {
        if vm.inner.data_keys.borrow().contains(&key) {
            warn(format_args!("computed property \"{key}\" is already defined in data"));
            continue;
        }
        if vm.inner.prop_keys.borrow().contains(&key) {
            warn(format_args!("computed property \"{key}\" is already defined as a prop"));
            continue;
        }
        if vm.inner.methods.contains_key(&key) {
            warn(format_args!("computed property \"{key}\" is already defined as a method"));
            continue;
        }

        let user_getter: ComputedGetter = match def.get {
            Some(getter) => getter,
            None => {
                warn(format_args!("getter is missing for computed property \"{key}\""));
                Rc::new(|_: &Component| -> Result<Value> { Ok(Value::Null) })
            }
        };
        let weak = vm.downgrade();
        let getter: Getter = Rc::new(move || {
            let vm = upgrade(&weak)?;
            user_getter(&vm)
        });

        let mut property = if def.cache {
            Computed::new(key.clone(), getter)
        } else {
            Computed::uncached(key.clone(), getter)
        };

        if let Some(user_setter) = def.set {
            let weak = vm.downgrade();
            let info = format!("setter for computed \"{key}\"");
            property = property.with_setter(Rc::new(move |value: Value| {
                if let Ok(vm) = upgrade(&weak) {
                    invoke_with_error_handling(|| user_setter(&vm, value), &info);
                }
            }));
        }

        vm.inner.computed.borrow_mut().insert(key, property);
    }
}

pub(super) fn create_watcher(
    vm: &Component,
    expression: &str,
    callback: Callback,
    options: WatchOptions,
) -> Result<WatchHandle> {
    let segments = parse_path(expression).inspect_err(|err| warn(err))?;

    let weak = vm.downgrade();
    let getter = move || -> Result<Value> {
        let Ok(vm) = upgrade(&weak) else {
            return Ok(Value::Null);
        };
        let Some((first, rest)) = segments.split_first() else {
            return Ok(Value::Null);
        };
        let root = vm.get(first).unwrap_or_default();
        Ok(resolve_path(&root, rest))
    };

    own_watch(vm, WatchSource::getter(expression, getter), callback, options)
}

/// Watch a function of the component. The getter sees the component and
/// reads through it, so every property it touches is tracked.
pub(super) fn create_getter_watcher<F>(
    vm: &Component,
    expression: &str,
    getter: F,
    callback: Callback,
    options: WatchOptions,
) -> Result<WatchHandle>
where
    F: Fn(&Component) -> Result<Value> + 'static,
{
    let weak = vm.downgrade();
    let getter = move || -> Result<Value> {
        match upgrade(&weak) {
            Ok(vm) => getter(&vm),
            Err(_) => Ok(Value::Null),
        }
    };
    own_watch(vm, WatchSource::getter(expression, getter), callback, options)
}

fn own_watch(
    vm: &Component,
    source: WatchSource,
    callback: Callback,
    options: WatchOptions,
) -> Result<WatchHandle> {
    let handle = crate::reactive::watch(source, callback, options)?;
    vm.inner.watchers.borrow_mut().push(handle.watcher().clone());
    Ok(handle)
}

pub(super) fn proxy_get(vm: &Component, key: &str) -> Result<Value> {
    if vm.inner.prop_keys.borrow().contains(key) {
        return Ok(vm.inner.props.get(key).unwrap_or_default());
    }
    if vm.inner.data_keys.borrow().contains(key) {
        return Ok(vm.data().get(key).unwrap_or_default());
    }
    let computed = vm.inner.computed.borrow().get(key).cloned();
    match computed {
        Some(computed) => Ok(computed.get()),
        None => Err(Error::UnknownProperty(key.to_string())),
    }
}

pub(super) fn proxy_set(vm: &Component, key: &str, value: Value) -> Result<()> {
    if vm.inner.prop_keys.borrow().contains(key) {
        vm.inner.props.assign(key, value);
        return Ok(());
    }
    if vm.inner.data_keys.borrow().contains(key) {
        vm.data().assign(key, value);
        return Ok(());
    }
    let computed = vm.inner.computed.borrow().get(key).cloned();
    match computed {
        Some(computed) => {
            computed.set(value);
            Ok(())
        }
        None => Err(Error::UnknownProperty(key.to_string())),
    }
}

pub(super) fn update_props<I, K>(vm: &Component, values: I)
where
    I: IntoIterator<Item = (K, Value)>,
    K: Into<String>,
{
    let _updating = UpdatingChild::enter();
    let previous = should_observe();
    toggle_observing(false);

    for (key, value) in values {
        let key = key.into();
        if vm.inner.prop_keys.borrow().contains(&key) {
            vm.inner.props.assign(&key, value);
        } else {
            warn(format_args!("\"{key}\" is not a declared prop of \"{}\"", vm.name()));
        }
    }

    toggle_observing(previous);
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
