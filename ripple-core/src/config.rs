//! Runtime Configuration
//!
//! Knobs that change how the runtime schedules and reports. Configuration is
//! per thread, like every other piece of reactive state, so tests and
//! independent hosts on different threads do not see each other's settings.

use std::cell::RefCell;
use std::fmt;
use std::time::Duration;

use crate::error::ErrorHandler;

/// Default number of times one watcher may re-run within a single flush
/// before it is reported as a circular update.
pub const MAX_UPDATE_COUNT: usize = 100;

/// Runtime configuration.
#[derive(Clone)]
pub struct Config {
    /// Defer flushes to the next tick. When false, queueing a watcher flushes
    /// the queue synchronously.
    pub async_flush: bool,

    /// Re-run limit for one watcher within one flush.
    pub max_update_count: usize,

    /// Suppress developer warnings.
    pub silent: bool,

    /// Delay used by the timer-only deferral strategy.
    pub fallback_delay: Duration,

    /// Receives every reported error. Errors are logged when unset.
    pub error_handler: Option<ErrorHandler>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            async_flush: true,
            max_update_count: MAX_UPDATE_COUNT,
            silent: false,
            fallback_delay: Duration::ZERO,
            error_handler: None,
        }
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("async_flush", &self.async_flush)
            .field("max_update_count", &self.max_update_count)
            .field("silent", &self.silent)
            .field("fallback_delay", &self.fallback_delay)
            .field("error_handler", &self.error_handler.is_some())
            .finish()
    }
}

thread_local! {
    static CONFIG: RefCell<Config> = RefCell::new(Config::default());
}

/// Read the current configuration.
///
/// Clone what you need out of the closure; do not call back into the
/// runtime from inside it.
pub fn with<R>(f: impl FnOnce(&Config) -> R) -> R {
    CONFIG.with(|config| f(&config.borrow()))
}

/// Modify the current configuration.
pub fn configure(f: impl FnOnce(&mut Config)) {
    CONFIG.with(|config| f(&mut config.borrow_mut()));
}

/// Restore the defaults.
pub fn reset() {
    configure(|config| *config = Config::default());
}
