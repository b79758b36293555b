//! Errors and the centralized error handler.
//!
//! Failures inside reactive computations never unwind through the runtime.
//! Getter errors, callback errors and circular-update reports are all routed
//! to [`handle_error`], which hands them to the configured
//! [`Config::error_handler`](crate::config::Config) or, if none is set,
//! logs them through `tracing`.

use std::fmt::Display;
use std::rc::Rc;

use thiserror::Error;

use crate::config;

/// Result alias used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Signature of a user-installed error handler.
///
/// Receives the error and an `info` string naming the failing computation,
/// e.g. `getter for watcher "a.b"` or `nextTick`.
pub type ErrorHandler = Rc<dyn Fn(&Error, &str) -> Result<()>>;

/// Errors produced by the reactive runtime or raised by user code running
/// inside it.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    /// An error raised by a getter, callback, hook or render function.
    #[error("{0}")]
    Message(String),

    /// A watch path that is not a simple dot-delimited path.
    #[error("failed watching path \"{0}\": only simple dot-delimited paths are accepted")]
    InvalidPath(String),

    /// `set`/`del` on something that is not an object or array.
    #[error("cannot set or delete a reactive property on a primitive value")]
    InvalidTarget,

    /// An array index at or past the largest array length.
    #[error("invalid array index {0}")]
    InvalidIndex(usize),

    /// Structural mutation of a component's root data object.
    #[error("avoid adding or deleting reactive properties on a component root data object at runtime: \"{0}\"")]
    RootDataMutation(String),

    /// A key that is neither a prop, a data property nor a computed property.
    #[error("property or method \"{0}\" is not defined on the instance")]
    UnknownProperty(String),

    /// A watcher kept re-queueing itself within one flush.
    #[error("you may have an infinite update loop in watcher with expression \"{expression}\" (re-ran more than {limit} times in one flush)")]
    CircularUpdate {
        id: u64,
        expression: String,
        limit: usize,
    },

    /// The configured error handler failed while reporting another error.
    #[error("error in error handler while reporting {info}: {source}")]
    Handler { info: String, source: Box<Error> },
}

impl Error {
    /// Build a [`Error::Message`] from anything printable.
    pub fn msg(message: impl Display) -> Self {
        Self::Message(message.to_string())
    }
}

/// Report an error through the configured handler, falling back to logging.
pub fn handle_error(err: &Error, info: &str) {
    let handler = config::with(|c| c.error_handler.clone());

    if let Some(handler) = handler {
        match handler(err, info) {
            Ok(()) => return,
            Err(handler_err) => {
                if handler_err != *err {
                    log_error(
                        &Error::Handler {
                            info: info.to_string(),
                            source: Box::new(handler_err),
                        },
                        "config.error_handler",
                    );
                }
            }
        }
    }

    log_error(err, info);
}

/// Run a fallible user callback, reporting a failure instead of returning it.
pub fn invoke_with_error_handling<F>(f: F, info: &str)
where
    F: FnOnce() -> Result<()>,
{
    if let Err(err) = f() {
        handle_error(&err, info);
    }
}

fn log_error(err: &Error, info: &str) {
    tracing::error!(info, error = %err, "error in reactive computation");
}

/// Emit a developer warning unless warnings are silenced.
pub(crate) fn warn(message: impl Display) {
    if !config::with(|c| c.silent) {
        tracing::warn!("{message}");
    }
}
