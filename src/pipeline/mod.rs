//! Filesystem side of the scanner: initial walk, live watcher with size-stability debounce,
//! dead-media sweep, and the dispatcher feeding the scan coordinator.

pub mod context;
pub mod orchestrator;
pub mod sweep;
pub mod walk;
pub mod watch;

use std::path::{Path, PathBuf};

pub use context::PipelineContext;
pub use orchestrator::{
    IndexSummary, PipelineHandles, dispatch, index_tree, shutdown_pipeline_handles, start_pipeline,
};
pub use sweep::clean_deleted;
pub use walk::{WalkOutcome, WalkSummary, collect_media_files, run_walk_loop, spawn_walk_thread};

/// One filesystem observation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FsEvent {
    Add(PathBuf),
    Change(PathBuf),
    Remove(PathBuf),
}

impl FsEvent {
    pub fn path(&self) -> &Path {
        match self {
            FsEvent::Add(p) | FsEvent::Change(p) | FsEvent::Remove(p) => p,
        }
    }
}
