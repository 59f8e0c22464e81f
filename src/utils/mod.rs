pub mod config;
pub mod logger;
pub mod manual;
pub mod settings;
pub mod tempfiles;

pub use config::*;
pub use logger::setup_logging;
pub use manual::ManualMode;
pub use settings::{default_config_path, load_config};

use std::sync::{Mutex, MutexGuard};

/// Lock a mutex, recovering the guard if a panicking thread poisoned it.
/// All shared state here stays consistent across panics (single-field updates).
pub fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
