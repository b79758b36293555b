//! Component Instances
//!
//! A [`Component`] bundles the reactive state of one UI component: props,
//! root data, computed properties, methods and watchers, plus an optional
//! render function that runs inside a render watcher once mounted.
//!
//! Components are built from [`ComponentOptions`]:
//!
//! ```ignore
//! let counter = Component::new(
//!     ComponentOptions::new("counter")
//!         .data(|_| Ok(json!({"count": 0}).into()))
//!         .computed("double", ComputedDef::new(|vm| {
//!             let count = vm.get("count")?.as_f64().unwrap_or(0.0);
//!             Ok(Value::from(count * 2.0))
//!         }))
//!         .render(|vm| vm.get("double")),
//! )?;
//! counter.mount()?;
//! ```

mod state;

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

use indexmap::{IndexMap, IndexSet};

use crate::error::{invoke_with_error_handling, Error, Result};
use crate::reactive::{
    Callback, Computed, Handler, Object, Value, WatchHandle, WatchOptions, Watcher,
    WatcherOptions,
};

pub use state::is_updating_child_component;

/// Counter for component uids.
static COMPONENT_UID: AtomicU64 = AtomicU64::new(0);

/// Produces the root data object.
pub type DataFn = Rc<dyn Fn(&Component) -> Result<Value>>;
/// A render function. Its output becomes the render watcher's value.
pub type RenderFn = Rc<dyn Fn(&Component) -> Result<Value>>;
/// A component method, called with positional arguments.
pub type Method = Rc<dyn Fn(&Component, &[Value]) -> Result<Value>>;
pub type LifecycleHook = Rc<dyn Fn(&Component) -> Result<()>>;
pub type ComputedGetter = Rc<dyn Fn(&Component) -> Result<Value>>;
pub type ComputedSetter = Rc<dyn Fn(&Component, Value) -> Result<()>>;

/// Definition of one computed property.
#[derive(Clone)]
pub struct ComputedDef {
    pub get: Option<ComputedGetter>,
    pub set: Option<ComputedSetter>,
    /// Cache the value in a lazy watcher. Uncached values are recomputed on
    /// every read.
    pub cache: bool,
}

impl Default for ComputedDef {
    fn default() -> Self {
        Self {
            get: None,
            set: None,
            cache: true,
        }
    }
}

impl ComputedDef {
    pub fn new<F>(get: F) -> Self
    where
        F: Fn(&Component) -> Result<Value> + 'static,
    {
        Self {
            get: Some(Rc::new(get)),
            set: None,
            cache: true,
        }
    }

    pub fn with_setter<F>(mut self, set: F) -> Self
    where
        F: Fn(&Component, Value) -> Result<()> + 'static,
    {
        self.set = Some(Rc::new(set));
        self
    }

    pub fn uncached(mut self) -> Self {
        self.cache = false;
        self
    }
}

/// Everything needed to build a [`Component`].
#[derive(Clone, Default)]
pub struct ComponentOptions {
    pub name: String,
    /// Declared props with the values passed by the parent.
    pub props: IndexMap<String, Value>,
    pub data: Option<DataFn>,
    pub computed: IndexMap<String, ComputedDef>,
    pub methods: IndexMap<String, Method>,
    pub watch: Vec<(String, Handler)>,
    pub render: Option<RenderFn>,
    pub before_update: Option<LifecycleHook>,
    pub updated: Option<LifecycleHook>,
    pub parent: Option<Component>,
}

impl ComponentOptions {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn prop(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.props.insert(key.into(), value.into());
        self
    }

    pub fn data<F>(mut self, data: F) -> Self
    where
        F: Fn(&Component) -> Result<Value> + 'static,
    {
        self.data = Some(Rc::new(data));
        self
    }

    pub fn computed(mut self, key: impl Into<String>, def: ComputedDef) -> Self {
        self.computed.insert(key.into(), def);
        self
    }

    pub fn method<F>(mut self, key: impl Into<String>, method: F) -> Self
    where
        F: Fn(&Component, &[Value]) -> Result<Value> + 'static,
    {
        self.methods.insert(key.into(), Rc::new(method));
        self
    }

    pub fn watch(mut self, expression: impl Into<String>, handler: Handler) -> Self {
        self.watch.push((expression.into(), handler));
        self
    }

    pub fn render<F>(mut self, render: F) -> Self
    where
        F: Fn(&Component) -> Result<Value> + 'static,
    {
        self.render = Some(Rc::new(render));
        self
    }

    pub fn before_update<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Component) -> Result<()> + 'static,
    {
        self.before_update = Some(Rc::new(hook));
        self
    }

    pub fn updated<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Component) -> Result<()> + 'static,
    {
        self.updated = Some(Rc::new(hook));
        self
    }

    pub fn parent(mut self, parent: &Component) -> Self {
        self.parent = Some(parent.clone());
        self
    }
}

/// A component instance.
#[derive(Clone)]
pub struct Component {
    inner: Rc<ComponentInner>,
}

struct ComponentInner {
    uid: u64,
    name: String,
    parent: Option<Weak<ComponentInner>>,

    props: Object,
    prop_keys: RefCell<IndexSet<String>>,
    data: RefCell<Object>,
    /// Data keys readable through [`Component::get`].
    data_keys: RefCell<IndexSet<String>>,
    computed: RefCell<IndexMap<String, Computed>>,
    methods: IndexMap<String, Method>,

    watchers: RefCell<Vec<Watcher>>,
    render_watcher: RefCell<Option<Watcher>>,
    render: Option<RenderFn>,
    before_update: Option<LifecycleHook>,
    updated: Option<LifecycleHook>,

    mounted: Cell<bool>,
    destroyed: Cell<bool>,
}

impl Component {
    /// Create a component and initialize its state: props, methods, data,
    /// computed properties, then watchers.
    pub fn new(options: ComponentOptions) -> Result<Self> {
        let ComponentOptions {
            name,
            props,
            data,
            computed,
            methods,
            watch,
            render,
            before_update,
            updated,
            parent,
        } = options;

        let vm = Component {
            inner: Rc::new(ComponentInner {
                uid: COMPONENT_UID.fetch_add(1, Ordering::Relaxed),
                name,
                parent: parent.map(|p| Rc::downgrade(&p.inner)),
                props: Object::new(),
                prop_keys: RefCell::new(IndexSet::new()),
                data: RefCell::new(Object::new()),
                data_keys: RefCell::new(IndexSet::new()),
                computed: RefCell::new(IndexMap::new()),
                methods,
                watchers: RefCell::new(Vec::new()),
                render_watcher: RefCell::new(None),
                render,
                before_update,
                updated,
                mounted: Cell::new(false),
                destroyed: Cell::new(false),
            }),
        };

        state::init_state(&vm, props, data, computed, watch)?;
        tracing::debug!(uid = vm.uid(), name = %vm.name(), "component initialized");
        Ok(vm)
    }

    pub fn uid(&self) -> u64 {
        self.inner.uid
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn parent(&self) -> Option<Component> {
        self.inner
            .parent
            .as_ref()
            .and_then(Weak::upgrade)
            .map(|inner| Component { inner })
    }

    pub fn is_root(&self) -> bool {
        self.inner.parent.is_none()
    }

    pub fn is_mounted(&self) -> bool {
        self.inner.mounted.get()
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner.destroyed.get()
    }

    /// The root data object.
    pub fn data(&self) -> Object {
        self.inner.data.borrow().clone()
    }

    /// The props object.
    pub fn props(&self) -> Object {
        self.inner.props.clone()
    }

    /// Read a prop, data property or computed property, in that order.
    pub fn get(&self, key: &str) -> Result<Value> {
        state::proxy_get(self, key)
    }

    /// Write a prop, data property or computed property.
    pub fn set(&self, key: &str, value: impl Into<Value>) -> Result<()> {
        state::proxy_set(self, key, value.into())
    }

    /// Call a method by name.
    pub fn call(&self, method: &str, args: &[Value]) -> Result<Value> {
        let method = self
            .inner
            .methods
            .get(method)
            .cloned()
            .ok_or_else(|| Error::UnknownProperty(method.to_string()))?;
        method(self, args)
    }

    /// Watch a dot-delimited path on this component, resolved through
    /// [`get`](Self::get). The watcher lives until the handle unwatches it or
    /// the component is destroyed.
    pub fn watch(
        &self,
        expression: &str,
        callback: Callback,
        options: WatchOptions,
    ) -> Result<WatchHandle> {
        state::create_watcher(self, expression, callback, options)
    }

    /// Watch the result of `getter`, called with this component. Owned by
    /// the component like [`watch`](Self::watch).
    pub fn watch_fn<F>(
        &self,
        expression: &str,
        getter: F,
        callback: Callback,
        options: WatchOptions,
    ) -> Result<WatchHandle>
    where
        F: Fn(&Component) -> Result<Value> + 'static,
    {
        state::create_getter_watcher(self, expression, getter, callback, options)
    }

    /// Watch with a handler in any accepted shape. Method names resolve
    /// against this component's methods.
    pub fn watch_with(&self, expression: &str, handler: Handler) -> Result<Vec<WatchHandle>> {
        let handlers = handler.normalize(&|name: &str| self.method_callback(name))?;
        handlers
            .into_iter()
            .map(|h| self.watch(expression, h.callback, h.options))
            .collect()
    }

    /// Create the render watcher, running the render function once.
    ///
    /// Fails if there is no render function or the first render fails.
    pub fn mount(&self) -> Result<()> {
        if self.is_mounted() {
            return Ok(());
        }
        let render = self
            .inner
            .render
            .clone()
            .ok_or_else(|| Error::msg(format!("component \"{}\" has no render function", self.name())))?;

        let weak = self.downgrade();
        let getter = move || -> Result<Value> {
            let vm = upgrade(&weak)?;
            render(&vm)
        };

        let options = WatcherOptions {
            before: self.lifecycle_hook(self.inner.before_update.clone(), "beforeUpdate hook"),
            updated: self.lifecycle_hook(self.inner.updated.clone(), "updated hook"),
            ..Default::default()
        };

        let watcher = Watcher::render(format!("render {}", self.name()), getter, options)?;
        *self.inner.render_watcher.borrow_mut() = Some(watcher);
        self.inner.mounted.set(true);
        tracing::debug!(uid = self.uid(), "component mounted");
        Ok(())
    }

    /// Last render output, if mounted.
    pub fn rendered(&self) -> Option<Value> {
        self.inner.render_watcher.borrow().as_ref().map(Watcher::value)
    }

    pub fn render_watcher(&self) -> Option<Watcher> {
        self.inner.render_watcher.borrow().clone()
    }

    /// Tear down every watcher and release the root data. Idempotent.
    pub fn destroy(&self) {
        if self.inner.destroyed.replace(true) {
            return;
        }

        if let Some(watcher) = self.inner.render_watcher.borrow_mut().take() {
            watcher.teardown();
        }
        for watcher in self.inner.watchers.borrow_mut().drain(..) {
            watcher.teardown();
        }
        let computed: Vec<Computed> = self.inner.computed.borrow().values().cloned().collect();
        for computed in computed {
            computed.teardown();
        }
        if let Some(observer) = self.data().observer() {
            observer.remove_vm();
        }
        tracing::debug!(uid = self.uid(), "component destroyed");
    }

    /// Apply new prop values from the parent.
    pub fn update_props<I, K>(&self, values: I)
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        state::update_props(self, values);
    }

    fn lifecycle_hook(
        &self,
        hook: Option<LifecycleHook>,
        info: &'static str,
    ) -> Option<crate::reactive::Hook> {
        let hook = hook?;
        let weak = self.downgrade();
        Some(Rc::new(move || -> Result<()> {
            let Ok(vm) = upgrade(&weak) else {
                return Ok(());
            };
            if vm.is_mounted() && !vm.is_destroyed() {
                invoke_with_error_handling(|| hook(&vm), info);
            }
            Ok(())
        }))
    }

    fn method_callback(&self, name: &str) -> Option<Callback> {
        let method = self.inner.methods.get(name)?.clone();
        let weak = self.downgrade();
        Some(Rc::new(move |new: &Value, old: &Value| -> Result<()> {
            let vm = upgrade(&weak)?;
            method(&vm, &[new.clone(), old.clone()]).map(|_| ())
        }))
    }

    fn downgrade(&self) -> Weak<ComponentInner> {
        Rc::downgrade(&self.inner)
    }
}

fn upgrade(weak: &Weak<ComponentInner>) -> Result<Component> {
    weak.upgrade()
        .map(|inner| Component { inner })
        .ok_or_else(|| Error::msg("component has been dropped"))
}

impl fmt::Debug for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Component")
            .field("uid", &self.inner.uid)
            .field("name", &self.inner.name)
            .field("mounted", &self.is_mounted())
            .field("destroyed", &self.is_destroyed())
            .finish()
    }
}
