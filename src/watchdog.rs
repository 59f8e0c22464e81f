//! Liveness probe for the whole pipeline: copy a sentinel media file into the watched tree,
//! expect its record to appear in the change feed, delete it, expect the deletion. Any
//! stage that times out is fatal and ends the process.

use anyhow::{Context, anyhow};
use crossbeam_channel::{Receiver, RecvTimeoutError};
use log::{error, info, warn};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::engine::limiter::ProcessLimiter;
use crate::errors::WatchdogError;
use crate::scanner::ProgressSignal;
use crate::store::{Change, DocumentStore};
use crate::utils::config::{WATCHDOG_GRACE, WATCHDOG_IGNORE_TAG, WatchdogConfig};
use crate::utils::lock;
use crate::utils::tempfiles::remove_with_retry;

/// What to do once the pipeline is declared dead.
pub trait Terminator: Send + Sync {
    fn terminate(&self, reason: &str);
}

/// Kill every tool process, drop queued work and exit with status 1 after a short grace.
pub struct ProcessExit {
    limiter: Arc<ProcessLimiter>,
}

impl ProcessExit {
    pub fn new(limiter: Arc<ProcessLimiter>) -> Self {
        Self { limiter }
    }
}

impl Terminator for ProcessExit {
    fn terminate(&self, reason: &str) {
        error!("Watchdog failed, shutting down! {}", reason);
        std::thread::sleep(WATCHDOG_GRACE);
        self.limiter.kill_all_and_clear_queue();
        std::process::exit(1);
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TickOutcome {
    /// Progress moved since the last tick; pipeline busy but alive.
    Skipped,
    Passed,
    /// Non-fatal error, logged.
    Errored,
    /// Timeout; the terminator was invoked.
    Terminated,
}

#[derive(Default)]
struct Observed {
    progress: Option<Instant>,
    /// Scan in flight at the previous tick, if that tick was skipped.
    skipped_scan: Option<u64>,
}

pub struct Watchdog {
    store: Arc<dyn DocumentStore>,
    progress: Arc<ProgressSignal>,
    media_root: PathBuf,
    settings: WatchdogConfig,
    terminator: Arc<dyn Terminator>,
    observed: Mutex<Observed>,
}

impl Watchdog {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        progress: Arc<ProgressSignal>,
        media_root: &Path,
        settings: WatchdogConfig,
        terminator: Arc<dyn Terminator>,
    ) -> Self {
        let observed = Observed {
            progress: Some(progress.last_progress()),
            skipped_scan: None,
        };
        Self {
            store,
            progress,
            media_root: media_root.to_path_buf(),
            settings,
            terminator,
            observed: Mutex::new(observed),
        }
    }

    pub fn sentinel(&self) -> PathBuf {
        self.media_root.join(&self.settings.file)
    }

    /// One scheduled check: skip while progress keeps moving, otherwise run a cycle. A scan
    /// seen on two skips in a row no longer earns a skip.
    pub fn tick(&self) -> TickOutcome {
        let current = self.progress.last_progress();
        let scan = self.progress.current_scan_id();
        {
            let mut observed = lock(&self.observed);
            let moved = observed.progress != Some(current);
            observed.progress = Some(current);
            let same_scan = scan.is_some() && observed.skipped_scan == scan;
            if moved && !same_scan {
                observed.skipped_scan = scan;
                info!("Watchdog: skipping. File processing.");
                return TickOutcome::Skipped;
            }
            if same_scan {
                info!("Same scan blocking WatchDog two times in a row, forcing watchdog run");
            }
            observed.skipped_scan = None;
        }
        self.run_once()
    }

    /// Run a check cycle now and act on its verdict.
    pub fn run_once(&self) -> TickOutcome {
        match self.check_cycle() {
            Ok(()) => {
                info!("Watchdog: ok");
                TickOutcome::Passed
            }
            Err(WatchdogError::Timeout(stage)) => {
                self.terminator.terminate(&format!("Timeout: {stage}"));
                TickOutcome::Terminated
            }
            Err(WatchdogError::Other(e)) => {
                error!("Error in watchdog: {:#}", e);
                TickOutcome::Errored
            }
        }
    }

    /// Copy the sentinel, wait for its record, remove it, wait for the deletion.
    pub fn check_cycle(&self) -> Result<(), WatchdogError> {
        let sentinel = self.sentinel();
        let dir = sentinel.parent().unwrap_or(&self.media_root).to_path_buf();
        clean_stale_copies(&dir);

        let file_name = sentinel
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| anyhow!("watchdog file has no name: {}", sentinel.display()))?;
        let copy_name = sentinel_copy_name(&file_name, chrono::Utc::now().timestamp_millis());
        let copy_path = dir.join(&copy_name);
        let expect = self.settings.expect_time();

        info!("Watchdog: check");
        let changes = self.store.subscribe();

        info!("Watchdog: Copy file {}", copy_name);
        std::fs::copy(&sentinel, &copy_path)
            .with_context(|| format!("copy {} to {}", sentinel.display(), copy_path.display()))?;

        info!("Watchdog: wait for changes");
        let needle = copy_name.to_lowercase();
        let created = wait_for(&changes, expect, |c| {
            !c.deleted
                && c.doc
                    .as_ref()
                    .and_then(|d| d.media_path.as_ref())
                    .is_some_and(|p| p.to_string_lossy().to_lowercase().contains(&needle))
        })
        .map_err(|e| e.at_stage("Created file didnt appear in database"))?;

        info!("Watchdog: remove file");
        remove_with_retry(&copy_path)?;

        info!("Watchdog: wait for changes");
        wait_for(&changes, expect, |c| c.deleted && c.id == created.id)
            .map_err(|e| e.at_stage("Removed file wasnt removed from database"))?;
        Ok(())
    }

    /// Run ticks every check interval until `shutdown` fires or disconnects.
    /// `None` when disabled or the sentinel file is missing.
    pub fn start(self: Arc<Self>, shutdown: Receiver<()>) -> Option<JoinHandle<()>> {
        if !self.settings.enable {
            return None;
        }
        let sentinel = self.sentinel();
        if !sentinel.is_file() {
            warn!(
                "Watchdog is disabled because {} wasn't found",
                sentinel.display()
            );
            return None;
        }
        let interval = self.settings.check_interval();
        let spawned = std::thread::Builder::new()
            .name("watchdog".to_string())
            .spawn(move || {
                while let Err(RecvTimeoutError::Timeout) = shutdown.recv_timeout(interval) {
                    self.tick();
                }
            });
        match spawned {
            Ok(handle) => Some(handle),
            Err(e) => {
                error!("could not start watchdog thread: {}", e);
                None
            }
        }
    }
}

enum WaitError {
    Timeout,
    Closed,
}

impl WaitError {
    fn at_stage(self, stage: &'static str) -> WatchdogError {
        match self {
            WaitError::Timeout => WatchdogError::Timeout(stage),
            WaitError::Closed => WatchdogError::Other(anyhow!("change feed closed: {stage}")),
        }
    }
}

fn wait_for(
    changes: &Receiver<Change>,
    within: Duration,
    matches: impl Fn(&Change) -> bool,
) -> Result<Change, WaitError> {
    let deadline = Instant::now() + within;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match changes.recv_timeout(remaining) {
            Ok(change) if matches(&change) => return Ok(change),
            Ok(_) => {}
            Err(RecvTimeoutError::Timeout) => return Err(WaitError::Timeout),
            Err(RecvTimeoutError::Disconnected) => return Err(WaitError::Closed),
        }
    }
}

/// `clip.mov` → `clip_watchdogIgnore_<ms>.mov`.
pub fn sentinel_copy_name(file_name: &str, stamp_ms: i64) -> String {
    match file_name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => {
            format!("{stem}{WATCHDOG_IGNORE_TAG}{stamp_ms}.{ext}")
        }
        _ => format!("{file_name}{WATCHDOG_IGNORE_TAG}{stamp_ms}"),
    }
}

/// Remove copies left behind by an earlier run that died mid-cycle.
fn clean_stale_copies(dir: &Path) {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            error!("Watchdog: cannot list {}: {}", dir.display(), e);
            return;
        }
    };
    let tag = WATCHDOG_IGNORE_TAG.to_lowercase();
    for entry in entries.flatten() {
        let name = entry.file_name().to_string_lossy().into_owned();
        if !name.to_lowercase().contains(&tag) {
            continue;
        }
        info!("Watchdog: Removing old file {}", name);
        if let Err(e) = remove_with_retry(&entry.path()) {
            error!("Watchdog: {:#}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn copy_names() {
        assert_eq!(
            sentinel_copy_name("watchdog.mov", 42),
            "watchdog_watchdogIgnore_42.mov"
        );
        assert_eq!(
            sentinel_copy_name("a.b.mxf", 1),
            "a.b_watchdogIgnore_1.mxf"
        );
        assert_eq!(sentinel_copy_name("noext", 7), "noext_watchdogIgnore_7");
    }

    #[test]
    fn stale_copies_removed() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("x_WATCHDOGIGNORE_1.mov"), b"x").unwrap();
        std::fs::write(dir.path().join("keep.mov"), b"x").unwrap();
        clean_stale_copies(dir.path());
        assert!(!dir.path().join("x_WATCHDOGIGNORE_1.mov").exists());
        assert!(dir.path().join("keep.mov").exists());
    }
}
