//! Live filesystem events from `notify`, held back until a file's size has stopped changing.

use anyhow::{Context, Result};
use crossbeam_channel::{Receiver, Sender, select};
use log::{debug, warn};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use super::FsEvent;
use super::context::PipelineContext;

/// Map one notify event to pipeline events. Creates and modifies of a path that no longer
/// exists (the source side of a rename) count as removals.
pub fn convert_event(event: &Event) -> Vec<FsEvent> {
    let make: fn(PathBuf) -> FsEvent = match event.kind {
        EventKind::Create(_) => FsEvent::Add,
        EventKind::Modify(_) => FsEvent::Change,
        EventKind::Remove(_) => FsEvent::Remove,
        EventKind::Any | EventKind::Access(_) | EventKind::Other => return Vec::new(),
    };
    event
        .paths
        .iter()
        .map(|p| {
            let ev = make(p.clone());
            match ev {
                FsEvent::Add(p) | FsEvent::Change(p) if !p.exists() => FsEvent::Remove(p),
                other => other,
            }
        })
        .collect()
}

/// Start a recursive watcher on the root. Events go to `raw_tx` until the watcher is dropped.
pub fn start_watcher(root: &Path, raw_tx: Sender<FsEvent>) -> Result<RecommendedWatcher> {
    let mut watcher = RecommendedWatcher::new(
        move |res: std::result::Result<Event, notify::Error>| match res {
            Ok(event) => {
                for ev in convert_event(&event) {
                    let _ = raw_tx.send(ev);
                }
            }
            Err(e) => warn!("watch error: {}", e),
        },
        notify::Config::default(),
    )
    .context("create filesystem watcher")?;
    watcher
        .watch(root, RecursiveMode::Recursive)
        .with_context(|| format!("watch {}", root.display()))?;
    Ok(watcher)
}

struct Pending {
    event: FsEvent,
    size: Option<u64>,
    since: Instant,
}

/// Holds adds/changes until the file's size has been stable for `threshold`.
pub struct StabilityTracker {
    threshold: Duration,
    pending: HashMap<PathBuf, Pending>,
}

impl StabilityTracker {
    pub fn new(threshold: Duration) -> Self {
        Self {
            threshold,
            pending: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Record activity on a path. An add stays an add if a change follows before release.
    pub fn observe(&mut self, event: FsEvent, now: Instant) {
        let path = event.path().to_path_buf();
        match self.pending.get_mut(&path) {
            Some(p) => {
                p.since = now;
                if matches!(event, FsEvent::Add(_)) {
                    p.event = event;
                }
            }
            None => {
                self.pending.insert(
                    path,
                    Pending {
                        event,
                        size: None,
                        since: now,
                    },
                );
            }
        }
    }

    pub fn forget(&mut self, path: &Path) {
        self.pending.remove(path);
    }

    /// Stat every pending path; release those whose size is unchanged for the threshold.
    /// Vanished paths are dropped (their removal arrives separately).
    pub fn poll(&mut self, now: Instant) -> Vec<FsEvent> {
        let threshold = self.threshold;
        let mut ready = Vec::new();
        self.pending.retain(|path, p| {
            let size = match std::fs::metadata(path) {
                Ok(m) => m.len(),
                Err(_) => return false,
            };
            if p.size != Some(size) {
                p.size = Some(size);
                p.since = now;
                if !threshold.is_zero() {
                    return true;
                }
            }
            if now.duration_since(p.since) >= threshold {
                ready.push(p.event.clone());
                return false;
            }
            true
        });
        ready
    }
}

/// Debounce thread: raw events in, stable adds/changes and immediate removals out.
/// Ends on `shutdown` or when every raw sender is gone.
pub fn spawn_debouncer(
    raw_rx: Receiver<FsEvent>,
    out_tx: Sender<FsEvent>,
    ctx: PipelineContext,
    shutdown: Receiver<()>,
) -> JoinHandle<()> {
    thread::spawn(move || {
        let mut tracker = StabilityTracker::new(ctx.stability_threshold);
        loop {
            select! {
                recv(raw_rx) -> msg => match msg {
                    Ok(ev) if ctx.includes(ev.path()) => match ev {
                        FsEvent::Remove(path) => {
                            tracker.forget(&path);
                            if out_tx.send(FsEvent::Remove(path)).is_err() {
                                break;
                            }
                        }
                        other => tracker.observe(other, Instant::now()),
                    },
                    Ok(ev) => debug!("ignored {}", ev.path().display()),
                    Err(_) => break,
                },
                recv(shutdown) -> _ => break,
                default(ctx.poll_interval) => {}
            }
            for ev in tracker.poll(Instant::now()) {
                if out_tx.send(ev).is_err() {
                    return;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn released_after_size_is_stable() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("clip.mov");
        std::fs::write(&file, b"12").unwrap();

        let mut t = StabilityTracker::new(Duration::from_millis(100));
        let t0 = Instant::now();
        t.observe(FsEvent::Add(file.clone()), t0);
        // First poll only records the size.
        assert!(t.poll(t0).is_empty());
        assert!(t.poll(t0 + Duration::from_millis(50)).is_empty());

        std::fs::write(&file, b"1234").unwrap();
        assert!(t.poll(t0 + Duration::from_millis(120)).is_empty());
        assert!(t.poll(t0 + Duration::from_millis(180)).is_empty());

        let ready = t.poll(t0 + Duration::from_millis(230));
        assert_eq!(ready, vec![FsEvent::Add(file)]);
        assert!(t.is_empty());
    }

    #[test]
    fn vanished_paths_are_dropped() {
        let mut t = StabilityTracker::new(Duration::ZERO);
        t.observe(FsEvent::Change(PathBuf::from("/nonexistent/x.mov")), Instant::now());
        assert!(t.poll(Instant::now()).is_empty());
        assert_eq!(t.len(), 0);
    }
}
