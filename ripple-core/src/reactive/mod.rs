//! Reactive Primitives
//!
//! This module implements dependency tracking: observable values, the deps
//! that record who read them, and the watchers that re-run when they change.
//!
//! # Concepts
//!
//! ## Deps
//!
//! A [`Dep`] is one observable location: a property of an observed object,
//! or the structure of an observed object or array. Reading the location
//! while a computation is active subscribes that computation.
//!
//! ## Observers
//!
//! [`observe`] walks a plain [`Object`] or [`Array`] and makes it reactive:
//! every property gets its own dep, and the value itself gets an
//! [`Observer`] whose dep fires when keys are added or removed or when the
//! array is mutated.
//!
//! ## Watchers
//!
//! A [`Watcher`] is a computation: a render, a [`Computed`] property, or a
//! user [`watch`]. It evaluates its getter inside a [`TrackingScope`] so
//! every reactive read made during the evaluation is recorded.
//!
//! # Implementation Notes
//!
//! Tracking uses a thread-local stack of active watchers. Deps hold their
//! subscribers weakly; watchers hold their deps strongly. Nothing in this
//! module is `Send`.

pub mod array;
pub mod computed;
pub mod context;
pub mod dep;
pub mod ids;
pub mod object;
pub mod observer;
pub mod value;
pub mod watch;
pub mod watcher;

pub use array::Array;
pub use computed::Computed;
pub use context::{untracked, TrackingScope};
pub use dep::Dep;
pub use ids::{DepId, WatcherId};
pub use object::{Accessor, AccessorGet, AccessorSet, Object};
pub use observer::{
    define_reactive, del, observe, observe_with, set, should_observe, toggle_observing,
    CustomSetter, Key, Observer, ReactiveProperty,
};
pub use value::Value;
pub use watch::{
    parse_path, traverse, watch, Handler, NormalizedHandler, WatchHandle, WatchOptions,
    WatchSource,
};
pub use watcher::{Callback, Getter, Hook, Watcher, WatcherKind, WatcherOptions};
