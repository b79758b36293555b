//! The watch API.
//!
//! [`watch`] creates a user [`Watcher`] for a source (a dot-delimited path
//! into a value, or a getter) and returns a [`WatchHandle`]. Handlers may
//! arrive in several shapes (a callback, a method name, a config object,
//! or a list of those); [`Handler::normalize`] flattens them into
//! [`NormalizedHandler`]s before any watcher is built.

use std::collections::HashSet;
use std::fmt;
use std::rc::Rc;

use super::context;
use super::value::Value;
use super::watcher::{Callback, Getter, Watcher, WatcherOptions};
use crate::error::{invoke_with_error_handling, warn, Error, Result};

/// What a watcher observes.
#[derive(Clone)]
pub enum WatchSource {
    /// A dot-delimited path, resolved against `root` on every evaluation.
    Path { root: Value, path: String },
    /// An arbitrary getter.
    Getter { expression: String, getter: Getter },
}

impl WatchSource {
    pub fn path(root: impl Into<Value>, path: impl Into<String>) -> Self {
        Self::Path {
            root: root.into(),
            path: path.into(),
        }
    }

    pub fn getter<F>(expression: impl Into<String>, getter: F) -> Self
    where
        F: Fn() -> Result<Value> + 'static,
    {
        Self::Getter {
            expression: expression.into(),
            getter: Rc::new(getter),
        }
    }

    fn into_parts(self) -> Result<(String, Getter)> {
        match self {
            WatchSource::Path { root, path } => {
                let segments = parse_path(&path)?;
                let getter: Getter = Rc::new(move || Ok(resolve_path(&root, &segments)));
                Ok((path, getter))
            }
            WatchSource::Getter { expression, getter } => Ok((expression, getter)),
        }
    }
}

/// Split a watch path into segments.
///
/// Only word characters, `$` and `.` are accepted; anything else (brackets,
/// operators, whitespace) is rejected with [`Error::InvalidPath`].
pub fn parse_path(path: &str) -> Result<Vec<String>> {
    let valid = path
        .chars()
        .all(|c| c.is_alphanumeric() || c == '_' || c == '$' || c == '.');
    if !valid {
        return Err(Error::InvalidPath(path.to_string()));
    }
    Ok(path.split('.').map(str::to_string).collect())
}

/// Walk `segments` from `root`. A missing step yields null.
pub fn resolve_path(root: &Value, segments: &[String]) -> Value {
    let mut current = root.clone();
    for segment in segments {
        current = match &current {
            Value::Object(object) => object.get(segment).unwrap_or_default(),
            Value::Array(array) => segment
                .parse::<usize>()
                .ok()
                .and_then(|index| array.get(index))
                .unwrap_or_default(),
            _ => return Value::Null,
        };
    }
    current
}

/// Read every nested property of `value` so the current computation
/// depends on all of it. Frozen values are skipped and cycles are cut.
pub fn traverse(value: &Value) {
    let mut seen = HashSet::new();
    traverse_inner(value, &mut seen);
}

fn traverse_inner(value: &Value, seen: &mut HashSet<usize>) {
    match value {
        Value::Object(object) => {
            if object.is_frozen() || !seen.insert(object.addr()) {
                return;
            }
            for key in object.keys() {
                if let Some(child) = object.get(&key) {
                    traverse_inner(&child, seen);
                }
            }
        }
        Value::Array(array) => {
            if array.is_frozen() || !seen.insert(array.addr()) {
                return;
            }
            for item in array.to_vec() {
                traverse_inner(&item, seen);
            }
        }
        _ => {}
    }
}

/// Options accepted by [`watch`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WatchOptions {
    pub deep: bool,
    pub immediate: bool,
    pub sync: bool,
}

impl WatchOptions {
    fn merge(self, other: WatchOptions) -> Self {
        Self {
            deep: self.deep || other.deep,
            immediate: self.immediate || other.immediate,
            sync: self.sync || other.sync,
        }
    }
}

/// A watch handler in any of its accepted shapes.
#[derive(Clone)]
pub enum Handler {
    Callback(Callback),
    /// Name of a component method.
    Method(String),
    Config {
        handler: Box<Handler>,
        options: WatchOptions,
    },
    List(Vec<Handler>),
}

impl Handler {
    pub fn callback<F>(f: F) -> Self
    where
        F: Fn(&Value, &Value) -> Result<()> + 'static,
    {
        Handler::Callback(Rc::new(f))
    }

    pub fn method(name: impl Into<String>) -> Self {
        Handler::Method(name.into())
    }

    pub fn with_options(self, options: WatchOptions) -> Self {
        Handler::Config {
            handler: Box::new(self),
            options,
        }
    }

    /// Flatten into callbacks with options, resolving method names with
    /// `resolve`.
    pub fn normalize<R>(self, resolve: &R) -> Result<Vec<NormalizedHandler>>
    where
        R: Fn(&str) -> Option<Callback>,
    {
        let mut out = Vec::new();
        self.normalize_into(resolve, WatchOptions::default(), &mut out)?;
        Ok(out)
    }

    fn normalize_into<R>(
        self,
        resolve: &R,
        options: WatchOptions,
        out: &mut Vec<NormalizedHandler>,
    ) -> Result<()>
    where
        R: Fn(&str) -> Option<Callback>,
    {
        match self {
            Handler::Callback(callback) => out.push(NormalizedHandler { callback, options }),
            Handler::Method(name) => {
                let callback = resolve(&name).ok_or(Error::UnknownProperty(name))?;
                out.push(NormalizedHandler { callback, options });
            }
            Handler::Config {
                handler,
                options: inner,
            } => handler.normalize_into(resolve, options.merge(inner), out)?,
            Handler::List(handlers) => {
                for handler in handlers {
                    handler.normalize_into(resolve, options, out)?;
                }
            }
        }
        Ok(())
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Handler::Callback(_) => f.write_str("Callback"),
            Handler::Method(name) => f.debug_tuple("Method").field(name).finish(),
            Handler::Config { handler, options } => f
                .debug_struct("Config")
                .field("handler", handler)
                .field("options", options)
                .finish(),
            Handler::List(handlers) => f.debug_list().entries(handlers).finish(),
        }
    }
}

/// A handler reduced to a callback and its options.
#[derive(Clone)]
pub struct NormalizedHandler {
    pub callback: Callback,
    pub options: WatchOptions,
}

/// Keeps a user watcher alive. The watch stops once every clone of the
/// handle is dropped, or on [`unwatch`](Self::unwatch). Watches created
/// through a component are also owned by it and last until it is destroyed.
#[must_use = "a standalone watch stops when its last handle is dropped"]
#[derive(Debug, Clone)]
pub struct WatchHandle {
    watcher: Watcher,
}

impl WatchHandle {
    pub fn unwatch(&self) {
        self.watcher.teardown();
    }

    pub fn watcher(&self) -> &Watcher {
        &self.watcher
    }

    pub fn value(&self) -> Value {
        self.watcher.value()
    }
}

/// Watch `source`, calling `callback(new, old)` when it changes.
///
/// With `immediate` the callback also runs once right away, untracked,
/// with the initial value and a null old value.
pub fn watch(source: WatchSource, callback: Callback, options: WatchOptions) -> Result<WatchHandle> {
    let (expression, getter) = source.into_parts().inspect_err(|err| warn(err))?;

    let watcher = Watcher::user(
        expression,
        getter,
        callback.clone(),
        WatcherOptions {
            deep: options.deep,
            sync: options.sync,
            ..Default::default()
        },
    );

    if options.immediate {
        let value = watcher.value();
        let info = format!("callback for immediate watcher \"{}\"", watcher.expression());
        context::untracked(|| invoke_with_error_handling(|| callback(&value, &Value::Null), &info));
    }

    Ok(WatchHandle { watcher })
}
