use anyhow::Result;
use crossbeam_channel::{Receiver, Sender, bounded, unbounded};
use log::{debug, info, warn};
use notify::RecommendedWatcher;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::JoinHandle;

use super::context::PipelineContext;
use super::walk::{WalkSummary, collect_media_files, spawn_walk_thread};
use super::watch::{spawn_debouncer, start_watcher};
use super::{FsEvent, clean_deleted};
use crate::engine::tools::media_id;
use crate::scanner::{ScanCoordinator, ScanOutcome};
use crate::types::{FileStat, ScanOrigin};

/// Running watcher pipeline. Keep it alive for as long as events should flow.
pub struct PipelineHandles {
    pub watcher: RecommendedWatcher,
    pub walk_handle: JoinHandle<WalkSummary>,
    pub debounce_handle: JoinHandle<()>,
    pub dispatch_handle: JoinHandle<()>,
    shutdown_tx: Sender<()>,
}

/// Route one stable filesystem event to the coordinator or the store.
pub fn dispatch(coordinator: &ScanCoordinator, root: &Path, event: FsEvent) {
    let path = event.path().to_path_buf();
    let id = media_id(&path, root);
    match event {
        FsEvent::Add(_) | FsEvent::Change(_) => match FileStat::read(&path) {
            Ok(stat) => coordinator.enqueue(&path, stat, &id, ScanOrigin::WatchEvent),
            Err(e) => debug!("id={} path={} stat failed: {}", id, path.display(), e),
        },
        FsEvent::Remove(_) => {
            coordinator.forget(&id);
            match coordinator.store().remove(&id) {
                Ok(true) => info!("id={} path={} Deleted", id, path.display()),
                Ok(false) => {}
                Err(e) => warn!("id={} path={} delete failed: {:#}", id, path.display(), e),
            }
        }
    }
}

fn spawn_dispatcher(
    rx: Receiver<FsEvent>,
    coordinator: Arc<ScanCoordinator>,
    root: PathBuf,
) -> JoinHandle<()> {
    std::thread::spawn(move || {
        while let Ok(event) = rx.recv() {
            dispatch(&coordinator, &root, event);
        }
    })
}

/// Sweep dead records, then start watcher, initial walk, debouncer and dispatcher.
/// Walk adds go through the same debounce as live events.
pub fn start_pipeline(
    ctx: PipelineContext,
    coordinator: Arc<ScanCoordinator>,
) -> Result<PipelineHandles> {
    clean_deleted(coordinator.store().as_ref(), &ctx.root)?;

    let (raw_tx, raw_rx) = unbounded::<FsEvent>();
    let (out_tx, out_rx) = unbounded::<FsEvent>();
    let (shutdown_tx, shutdown_rx) = bounded::<()>(1);

    let watcher = start_watcher(&ctx.root, raw_tx.clone())?;
    let walk_handle = spawn_walk_thread(raw_tx, ctx.clone());
    let debounce_handle = spawn_debouncer(raw_rx, out_tx, ctx.clone(), shutdown_rx);
    let dispatch_handle = spawn_dispatcher(out_rx, coordinator, ctx.root.clone());

    info!("Watching {}", ctx.root.display());
    Ok(PipelineHandles {
        watcher,
        walk_handle,
        debounce_handle,
        dispatch_handle,
        shutdown_tx,
    })
}

/// Stop the watcher and join the pipeline threads.
pub fn shutdown_pipeline_handles(handles: PipelineHandles) -> Result<()> {
    let PipelineHandles {
        watcher,
        walk_handle,
        debounce_handle,
        dispatch_handle,
        shutdown_tx,
    } = handles;
    drop(watcher);
    let _ = shutdown_tx.send(());
    walk_handle
        .join()
        .map_err(|_| anyhow::anyhow!("walk thread panicked"))?;
    debounce_handle
        .join()
        .map_err(|_| anyhow::anyhow!("debounce thread panicked"))?;
    dispatch_handle
        .join()
        .map_err(|_| anyhow::anyhow!("dispatch thread panicked"))?;
    Ok(())
}

/// Totals of a one-shot tree scan.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct IndexSummary {
    pub files: usize,
    pub scanned: usize,
    pub up_to_date: usize,
    pub failed: usize,
}

/// One synchronous pass over the whole tree: dead-media sweep, scan every file in walk
/// order, then drain retries. `on_file` runs after each file (progress display).
pub fn index_tree<F: FnMut(&Path)>(
    ctx: &PipelineContext,
    coordinator: &ScanCoordinator,
    mut on_file: F,
) -> Result<(IndexSummary, WalkSummary)> {
    clean_deleted(coordinator.store().as_ref(), &ctx.root)?;
    let (files, walk) = collect_media_files(ctx);
    let mut summary = IndexSummary {
        files: files.len(),
        ..IndexSummary::default()
    };
    for path in files {
        let id = media_id(&path, &ctx.root);
        let outcome = FileStat::read(&path)
            .map_err(|e| crate::errors::ScanError::io("stat", e))
            .and_then(|stat| coordinator.request_scan(&path, stat, &id, ScanOrigin::WatchEvent));
        match outcome {
            Ok(ScanOutcome::Scanned) => summary.scanned += 1,
            Ok(ScanOutcome::UpToDate) => summary.up_to_date += 1,
            Ok(_) => {}
            Err(_) => summary.failed += 1,
        }
        on_file(&path);
    }
    coordinator.retry_sweep();
    Ok((summary, walk))
}
