//! Manual mode: operator switch that keeps filesystem-triggered scans cheap.
//! Persisted as the presence of a marker file.

use log::{info, warn};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Debug)]
pub struct ManualMode {
    enabled: AtomicBool,
    marker: PathBuf,
}

impl ManualMode {
    /// Restore from `marker`: enabled iff the file exists.
    pub fn restore(marker: &Path) -> Self {
        let enabled = marker.exists();
        if enabled {
            info!("Manual mode restored from {}", marker.display());
        }
        Self {
            enabled: AtomicBool::new(enabled),
            marker: marker.to_path_buf(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Flip the flag and persist it. Persistence failures are logged only.
    pub fn set(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
        let res = if enabled {
            std::fs::write(&self.marker, b"")
        } else {
            match std::fs::remove_file(&self.marker) {
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                other => other,
            }
        };
        if let Err(e) = res {
            warn!("Could not persist manual mode {}: {}", enabled, e);
        }
        info!(
            "Media scanner is {} in manual mode",
            if enabled { "now" } else { "no longer" }
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn toggle_persists_marker() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join(".manualMode");

        let mode = ManualMode::restore(&marker);
        assert!(!mode.is_enabled());

        mode.set(true);
        assert!(mode.is_enabled());
        assert!(marker.exists());
        assert!(ManualMode::restore(&marker).is_enabled());

        mode.set(false);
        assert!(!mode.is_enabled());
        assert!(!marker.exists());
        // Removing twice is fine.
        mode.set(false);
        assert!(!ManualMode::restore(&marker).is_enabled());
    }
}
