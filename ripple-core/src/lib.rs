//! Ripple Core
//!
//! This crate provides the reactive runtime behind Ripple components.
//! It implements:
//!
//! - Dependency tracking over observable objects and arrays
//! - Watchers for renders, computed properties and user watch expressions
//! - A batching scheduler that flushes queued watchers once per tick
//! - Component state initialization (props, data, computed, watch, methods)
//!
//! Everything is single-threaded: reactive state lives in thread-locals and
//! no handle is `Send`.
//!
//! # Architecture
//!
//! - `reactive`: values, deps, observers and watchers
//! - `scheduler`: the watcher queue, next-tick callbacks and the deferral
//!   strategies that decide when a tick happens
//! - `instance`: component instances built on top of both
//! - `config` and `error`: runtime knobs and the central error handler
//!
//! # Example
//!
//! ```rust,ignore
//! use ripple_core::reactive::{observe, watch, Value, WatchOptions, WatchSource};
//! use std::rc::Rc;
//!
//! // Make some state observable
//! let state = Value::from(serde_json::json!({"count": 0}));
//! observe(&state);
//!
//! // Watch a path
//! let _handle = watch(
//!     WatchSource::path(state.clone(), "count"),
//!     Rc::new(|new, old| {
//!         println!("count: {old:?} -> {new:?}");
//!         Ok(())
//!     }),
//!     WatchOptions::default(),
//! )?;
//!
//! // Two writes, one callback on the next tick
//! state.as_object().unwrap().assign("count", 1);
//! state.as_object().unwrap().assign("count", 2);
//! ripple_core::scheduler::tick().await;
//! ```

pub mod config;
pub mod error;
pub mod instance;
pub mod reactive;
pub mod scheduler;

pub use config::Config;
pub use error::{Error, Result};
pub use instance::{Component, ComponentOptions, ComputedDef};
pub use reactive::{Array, Object, Value};
pub use scheduler::{next_tick, tick};
