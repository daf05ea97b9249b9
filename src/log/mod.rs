//! Diagnostic logging for simulation runs. Not to be confused with reporting: case counts go
//! to CSV through `crate::report`, while this module controls the `log` macros the library
//! emits (`trace!` per tensor op bookkeeping, `debug!` per step, `info!` per run).
//!
//! Logging is off by default. The `epigrad` binary enables it with `--log-level <level>`.
//! Programmatic control:
//!
//!  - `enable_logging()`: turns on all log messages
//!  - `disable_logging()`: turns off all log messages
//!  - `set_log_level(level: LevelFilter)`: enables messages with priority at least `level`
//!  - `set_module_filter()` / `remove_module_filter()`: per module overrides
//!
//! ```rust
//! use epigrad::log::{set_log_level, set_module_filter, LevelFilter};
//!
//! set_log_level(LevelFilter::Info);
//! // Per step messages from the sampler are noisy.
//! set_module_filter("epigrad::infection_sampler", LevelFilter::Warn);
//! ```
#[cfg(feature = "logging")]
mod standard_logger;

#[cfg(not(feature = "logging"))]
mod null_logger;

pub use log::{debug, error, info, trace, warn, LevelFilter};
use std::collections::hash_map::Entry;
use std::sync::{LazyLock, Mutex, MutexGuard};

use crate::HashMap;
#[cfg(feature = "logging")]
use log4rs::Handle;

const DEFAULT_LOG_LEVEL: LevelFilter = LevelFilter::Off;

static LOG_CONFIGURATION: LazyLock<Mutex<LogConfiguration>> = LazyLock::new(Mutex::default);

/// Level filter applied to one module path, e.g. `"epigrad::simulation"`.
#[derive(Debug, PartialEq)]
struct ModuleLogConfiguration {
    module: String,
    level: LevelFilter,
}

impl From<(&str, LevelFilter)> for ModuleLogConfiguration {
    fn from((module, level): (&str, LevelFilter)) -> Self {
        Self {
            module: module.to_string(),
            level,
        }
    }
}

/// Singleton holding the filters and the handle to the installed global logger. The public
/// API is the free functions below.
#[derive(Debug)]
pub(in crate::log) struct LogConfiguration {
    /// A global filter level of `LevelFilter::Off` disables logging.
    pub(in crate::log) global_log_level: LevelFilter,
    pub(in crate::log) module_configurations: HashMap<String, ModuleLogConfiguration>,

    #[cfg(feature = "logging")]
    root_handle: Option<Handle>,
}

impl Default for LogConfiguration {
    fn default() -> Self {
        Self {
            global_log_level: DEFAULT_LOG_LEVEL,
            module_configurations: HashMap::default(),

            #[cfg(feature = "logging")]
            root_handle: None,
        }
    }
}

impl LogConfiguration {
    pub(in crate::log) fn set_log_level(&mut self, level: LevelFilter) {
        self.global_log_level = level;
        self.set_config();
    }

    /// Returns true if the configuration changed.
    fn insert_module_filter(&mut self, module: &str, level: LevelFilter) -> bool {
        match self.module_configurations.entry(module.to_string()) {
            Entry::Occupied(mut entry) => {
                let module_config = entry.get_mut();
                if module_config.level == level {
                    return false;
                }
                module_config.level = level;
            }
            Entry::Vacant(entry) => {
                entry.insert((module, level).into());
            }
        }
        true
    }

    pub(in crate::log) fn set_module_filter(&mut self, module: &str, level: LevelFilter) {
        if self.insert_module_filter(module, level) {
            self.set_config();
        }
    }

    pub(in crate::log) fn remove_module_filter(&mut self, module: &str) {
        if self.module_configurations.remove(module).is_some() {
            self.set_config();
        }
    }
}

/// Equivalent to `set_log_level(LevelFilter::Trace)`.
pub fn enable_logging() {
    set_log_level(LevelFilter::Trace);
}

/// Equivalent to `set_log_level(LevelFilter::Off)`.
pub fn disable_logging() {
    set_log_level(LevelFilter::Off);
}

pub fn set_log_level(level: LevelFilter) {
    get_log_configuration().set_log_level(level);
}

pub fn set_module_filter(module_path: &str, level_filter: LevelFilter) {
    get_log_configuration().set_module_filter(module_path, level_filter);
}

/// Removes a module override so the global level applies to it again.
pub fn remove_module_filter(module_path: &str) {
    get_log_configuration().remove_module_filter(module_path);
}

fn get_log_configuration() -> MutexGuard<'static, LogConfiguration> {
    LOG_CONFIGURATION.lock().expect("Mutex poisoned")
}
