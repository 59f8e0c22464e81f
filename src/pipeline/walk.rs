//! Initial walk of the media root: every existing regular file becomes an add event.

use crossbeam_channel::Sender;
use log::warn;
use std::path::PathBuf;
use std::thread::{self, JoinHandle};

use super::FsEvent;
use super::context::PipelineContext;

/// One result from a directory walk: either a path to consider or an error with optional path.
pub enum WalkOutcome {
    Ok { path: PathBuf, is_file: bool },
    Err { msg: String, path: Option<PathBuf> },
}

/// Convert a walkdir result into [`WalkOutcome`].
pub fn to_outcome_walkdir(r: Result<walkdir::DirEntry, walkdir::Error>) -> WalkOutcome {
    match r {
        Ok(entry) => {
            let is_file = entry.file_type().is_file()
                || (entry.path_is_symlink() && entry.path().is_file());
            WalkOutcome::Ok {
                path: entry.into_path(),
                is_file,
            }
        }
        Err(err) => WalkOutcome::Err {
            msg: format!("{}", err),
            path: err.path().map(PathBuf::from),
        },
    }
}

pub fn walk_iter(ctx: &PipelineContext) -> impl Iterator<Item = WalkOutcome> + use<> {
    walkdir::WalkDir::new(&ctx.root)
        .follow_links(ctx.follow_links)
        .into_iter()
        .map(to_outcome_walkdir)
}

/// Files handed on plus the paths the walk could not read.
#[derive(Debug, Default)]
pub struct WalkSummary {
    pub files: usize,
    pub skipped: Vec<(PathBuf, String)>,
}

impl WalkSummary {
    pub fn log_skipped(&self, verbose: bool) {
        if self.skipped.is_empty() {
            return;
        }
        warn!(
            "Skipped {} paths due to permission errors or access issues",
            self.skipped.len()
        );
        if verbose {
            for (p, msg) in &self.skipped {
                warn!("  skipped: {} ({})", p.display(), msg);
            }
        }
    }
}

/// Consume `iter`, keep included regular files and pass each to `emit`. Stops early when
/// `emit` returns false.
pub fn run_walk_loop<I, F>(ctx: &PipelineContext, iter: I, mut emit: F) -> WalkSummary
where
    I: Iterator<Item = WalkOutcome>,
    F: FnMut(PathBuf) -> bool,
{
    let mut summary = WalkSummary::default();
    for outcome in iter {
        match outcome {
            WalkOutcome::Ok { path, is_file } => {
                if !is_file || !ctx.includes(&path) {
                    continue;
                }
                if !emit(path) {
                    break;
                }
                summary.files += 1;
            }
            WalkOutcome::Err { msg, path } => {
                let path = path.unwrap_or_else(|| PathBuf::from("<no-path>"));
                summary.skipped.push((path, msg));
            }
        }
    }
    summary
}

/// Every included file under the root, in walk order.
pub fn collect_media_files(ctx: &PipelineContext) -> (Vec<PathBuf>, WalkSummary) {
    let mut files = Vec::new();
    let summary = run_walk_loop(ctx, walk_iter(ctx), |p| {
        files.push(p);
        true
    });
    (files, summary)
}

/// Walk on a background thread, sending an add for each file.
pub fn spawn_walk_thread(tx: Sender<FsEvent>, ctx: PipelineContext) -> JoinHandle<WalkSummary> {
    thread::spawn(move || {
        let summary = run_walk_loop(&ctx, walk_iter(&ctx), |path| {
            tx.send(FsEvent::Add(path)).is_ok()
        });
        summary.log_skipped(false);
        summary
    })
}
