//! Scan coordinator: one probe attempt system-wide, queued tasks drained by retry sweeps,
//! bounded retries per identifier.

use crossbeam_channel::{Receiver, Sender, bounded};
use log::{debug, error, info, warn};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::thread::JoinHandle;

use super::signal::{ProgressSignal, ScanSlot};
use crate::engine::analyzer::Analyzer;
use crate::errors::ScanError;
use crate::store::DocumentStore;
use crate::types::{Attachment, FileStat, FileUpdate, MediaRecord, ProbeUpdate, ScanOrigin, ScanTask};
use crate::utils::{ManualMode, lock};

/// What a call to [`ScanCoordinator::request_scan`] did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScanOutcome {
    /// Record written.
    Scanned,
    /// Stored stat already current; nothing probed or written.
    UpToDate,
    /// Another scan was in flight; the task waits for the retry sweep.
    Queued,
    /// Directory; nothing to do.
    Ignored,
}

pub struct ScanCoordinator {
    store: Arc<dyn DocumentStore>,
    analyzer: Arc<dyn Analyzer>,
    manual: Arc<ManualMode>,
    progress: Arc<ProgressSignal>,
    retry_limit: u32,
    /// Pending tasks in insertion order, at most one per id.
    tasks: Mutex<Vec<ScanTask>>,
    retrying: AtomicBool,
    sweep_tx: Sender<()>,
    sweep_rx: Receiver<()>,
}

/// Clears the `retrying` flag when a sweep ends.
struct SweepGuard<'a>(&'a AtomicBool);

impl Drop for SweepGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl ScanCoordinator {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        analyzer: Arc<dyn Analyzer>,
        manual: Arc<ManualMode>,
        progress: Arc<ProgressSignal>,
        retry_limit: u32,
    ) -> Self {
        let (sweep_tx, sweep_rx) = bounded(1);
        Self {
            store,
            analyzer,
            manual,
            progress,
            retry_limit: retry_limit.max(1),
            tasks: Mutex::new(Vec::new()),
            retrying: AtomicBool::new(false),
            sweep_tx,
            sweep_rx,
        }
    }

    pub fn progress(&self) -> &Arc<ProgressSignal> {
        &self.progress
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    pub fn analyzer(&self) -> &Arc<dyn Analyzer> {
        &self.analyzer
    }

    pub fn is_manual(&self) -> bool {
        self.manual.is_enabled()
    }

    /// Snapshot of the pending tasks in insertion order.
    pub fn pending(&self) -> Vec<ScanTask> {
        lock(&self.tasks).clone()
    }

    pub fn failure_count(&self, id: &str) -> u32 {
        lock(&self.tasks)
            .iter()
            .find(|t| t.id == id)
            .map_or(0, |t| t.failures)
    }

    /// Register a scan of `path` and run it now if no other scan is in flight.
    ///
    /// Returns once this attempt's outcome is known, or immediately with
    /// [`ScanOutcome::Queued`] when another scan holds the slot. Failures of this attempt
    /// are returned here; attempts made later by the sweep only log.
    pub fn request_scan(
        &self,
        path: &Path,
        stat: FileStat,
        id: &str,
        origin: ScanOrigin,
    ) -> Result<ScanOutcome, ScanError> {
        if id.is_empty() {
            return Err(ScanError::InvalidRequest(format!(
                "empty identifier for {}",
                path.display()
            )));
        }
        if stat.is_dir {
            return Ok(ScanOutcome::Ignored);
        }
        self.register(ScanTask {
            path: path.to_path_buf(),
            id: id.to_string(),
            stat,
            origin,
            failures: 0,
        });
        self.attempt(id)
    }

    /// Register a scan without running it here; the retry sweep picks it up.
    pub fn enqueue(&self, path: &Path, stat: FileStat, id: &str, origin: ScanOrigin) {
        if id.is_empty() || stat.is_dir {
            return;
        }
        self.register(ScanTask {
            path: path.to_path_buf(),
            id: id.to_string(),
            stat,
            origin,
            failures: 0,
        });
        self.trigger_sweep();
    }

    /// Drop any pending task for `id` (its file was removed).
    pub fn forget(&self, id: &str) {
        lock(&self.tasks).retain(|t| t.id != id);
    }

    /// Insert or refresh a pending task. A newer observation replaces the queued path, stat
    /// and origin; the failure count and queue position are kept.
    fn register(&self, task: ScanTask) {
        let mut tasks = lock(&self.tasks);
        match tasks.iter_mut().find(|t| t.id == task.id) {
            Some(existing) => {
                existing.path = task.path;
                existing.stat = task.stat;
                existing.origin = task.origin;
            }
            None => tasks.push(task),
        }
    }

    fn task(&self, id: &str) -> Option<ScanTask> {
        lock(&self.tasks).iter().find(|t| t.id == id).cloned()
    }

    /// Drop the task for `id` unless it was replaced by a newer observation meanwhile.
    fn finish(&self, scanned: &ScanTask) {
        lock(&self.tasks).retain(|t| !(t.id == scanned.id && t.stat == scanned.stat));
    }

    /// Count a failure. Returns true when the task hit the retry limit and was dropped.
    fn record_failure(&self, id: &str) -> bool {
        let mut tasks = lock(&self.tasks);
        let Some(pos) = tasks.iter().position(|t| t.id == id) else {
            return false;
        };
        tasks[pos].failures += 1;
        if tasks[pos].failures >= self.retry_limit {
            tasks.remove(pos);
            return true;
        }
        false
    }

    fn attempt(&self, id: &str) -> Result<ScanOutcome, ScanError> {
        let Some((slot, scan_id)) = ScanSlot::try_claim(&self.progress) else {
            debug!("id={} queued behind a running scan", id);
            return Ok(ScanOutcome::Queued);
        };
        let Some(task) = self.task(id) else {
            // Drained by a sweep between registration and now.
            return Ok(ScanOutcome::UpToDate);
        };
        debug!("id={} path={} scan #{} started", id, task.path.display(), scan_id);
        let result = self.scan_task(&task);
        drop(slot);

        let result = match result {
            Ok(outcome) => {
                self.finish(&task);
                if outcome == ScanOutcome::Scanned {
                    info!("id={} path={} Scanned", id, task.path.display());
                }
                Ok(outcome)
            }
            Err(e) if !e.is_transient() => {
                warn!("id={} path={} Skipped: {}", id, task.path.display(), e);
                self.finish(&task);
                Err(e)
            }
            Err(e) => {
                if self.record_failure(id) {
                    error!("Skipping file. Too many retries; {}", id);
                } else {
                    warn!("id={} path={} Scan failed: {}", id, task.path.display(), e);
                }
                Err(e)
            }
        };
        self.trigger_sweep();
        result
    }

    fn scan_task(&self, task: &ScanTask) -> Result<ScanOutcome, ScanError> {
        let mut record = self
            .store
            .get(&task.id)
            .map_err(ScanError::Store)?
            .unwrap_or_else(|| MediaRecord::new(&task.id));

        if let Some(existing) = &record.media_path
            && existing != &task.path
        {
            return Err(ScanError::Collision {
                id: task.id.clone(),
                existing: existing.clone(),
            });
        }

        let manual = self.manual.is_enabled();
        let wants_probe = matches!(task.origin, ScanOrigin::Explicit { basic_probe: true });
        if record.matches_stat(&task.stat) && is_current(&record, manual, wants_probe) {
            return Ok(ScanOutcome::UpToDate);
        }

        if !record.matches_stat(&task.stat) {
            record.not_media = false;
        }
        FileUpdate {
            path: task.path.clone(),
            stat: task.stat,
        }
        .apply(&mut record);

        let mut attachment: Option<Attachment> = None;
        if !manual {
            let (probe, thumb) = std::thread::scope(|s| {
                let thumb = s.spawn(|| self.analyzer.thumbnail(&record));
                let probe = self.analyzer.probe(&record);
                (probe, thumb.join())
            });
            if let Some(update) = media_probe(&mut record, probe, &task.path)? {
                match thumb {
                    Ok(Ok(thumb)) => {
                        thumb.apply(&mut record);
                        attachment = Some(thumb.attachment());
                    }
                    Ok(Err(e)) => warn!("id={} path={} Thumbnail Failed: {}", task.id, task.path.display(), e),
                    Err(_) => warn!("id={} path={} Thumbnail Failed: worker panicked", task.id, task.path.display()),
                }
                update.apply(&mut record);
            }
        } else if wants_probe {
            let probe = self.analyzer.probe(&record);
            if let Some(update) = media_probe(&mut record, probe, &task.path)? {
                update.apply(&mut record);
            }
        }

        self.store
            .put(&record, attachment.as_ref())
            .map_err(ScanError::Store)?;
        Ok(ScanOutcome::Scanned)
    }

    /// Ask for a retry sweep. Triggers arriving while one is queued coalesce into it.
    pub fn trigger_sweep(&self) {
        let _ = self.sweep_tx.try_send(());
    }

    /// Drain pending tasks in insertion order, pass after pass, until a pass makes no
    /// progress. Returns immediately if a sweep is already running.
    pub fn retry_sweep(&self) {
        if self
            .retrying
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }
        let _guard = SweepGuard(&self.retrying);
        while self.sweep_pass() {}
    }

    /// One pass over a snapshot of the pending ids. Returns true when another pass is needed.
    fn sweep_pass(&self) -> bool {
        let ids: Vec<String> = lock(&self.tasks).iter().map(|t| t.id.clone()).collect();
        if ids.is_empty() {
            return false;
        }
        let mut failed = false;
        for id in ids {
            match self.attempt(&id) {
                Ok(ScanOutcome::Queued) => return false,
                Ok(_) => {}
                Err(e) => {
                    debug!("id={} retry failed: {}", id, e);
                    failed = true;
                }
            }
        }
        failed && !lock(&self.tasks).is_empty()
    }

    /// Background thread running a sweep for every trigger. Ends when the coordinator is dropped.
    pub fn spawn_sweeper(self: &Arc<Self>) -> JoinHandle<()> {
        let weak: Weak<Self> = Arc::downgrade(self);
        let rx = self.sweep_rx.clone();
        std::thread::Builder::new()
            .name("scan-sweeper".to_string())
            .spawn(move || {
                while rx.recv().is_ok() {
                    let Some(coordinator) = weak.upgrade() else {
                        break;
                    };
                    coordinator.retry_sweep();
                }
            })
            .unwrap_or_else(|e| {
                error!("could not start sweeper thread: {}", e);
                std::thread::spawn(|| {})
            })
    }
}

/// Up to date for this request once the stat matches. Not-media records stay settled.
fn is_current(record: &MediaRecord, manual: bool, wants_probe: bool) -> bool {
    if record.not_media {
        true
    } else if manual {
        !wants_probe || record.has_basic_metadata()
    } else {
        record.has_basic_metadata() && record.has_thumbnail()
    }
}

/// Unwrap a probe result. Not-media strips the record to its file fields and yields `None`.
fn media_probe(
    record: &mut MediaRecord,
    probe: Result<ProbeUpdate, ScanError>,
    path: &Path,
) -> Result<Option<ProbeUpdate>, ScanError> {
    match probe {
        Ok(update) => Ok(Some(update)),
        Err(ScanError::NotMedia(why)) => {
            info!("id={} path={} Not media: {}", record.id, path.display(), why);
            record.mark_not_media();
            Ok(None)
        }
        Err(e) => Err(e),
    }
}
