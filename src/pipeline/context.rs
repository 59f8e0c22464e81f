//! Shared pipeline context: the media root, ignore rules and debounce timing used by the
//! walk, the watcher and the dispatcher.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::engine::tools::should_include;
use crate::utils::config::Config;

#[derive(Clone, Debug)]
pub struct PipelineContext {
    /// Canonical media root.
    pub root: PathBuf,
    /// Store file; it and its `-wal`/`-shm` siblings are never scanned.
    pub db_path: Option<PathBuf>,
    pub exclude: Vec<String>,
    pub follow_links: bool,
    pub stability_threshold: Duration,
    pub poll_interval: Duration,
}

impl PipelineContext {
    pub fn new(root: &Path, db_path: Option<&Path>, config: &Config) -> Self {
        Self {
            root: root.to_path_buf(),
            db_path: db_path.map(|p| p.canonicalize().unwrap_or_else(|_| p.to_path_buf())),
            exclude: config.scanner.exclude.clone(),
            follow_links: config.scanner.follow_links,
            stability_threshold: config.scanner.stability_threshold(),
            poll_interval: config.scanner.poll_interval(),
        }
    }

    /// Ignore rules for every path entering the pipeline.
    pub fn includes(&self, path: &Path) -> bool {
        should_include(path, &self.root, self.db_path.as_deref(), &self.exclude)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn db_and_clutter_are_ignored() {
        let mut cfg = Config::default();
        cfg.scanner.exclude = vec!["*.tmp".to_string()];
        let ctx = PipelineContext {
            root: PathBuf::from("/m"),
            db_path: Some(PathBuf::from("/m/_mediascan.db")),
            ..PipelineContext::new(Path::new("/m"), None, &cfg)
        };
        assert!(ctx.includes(Path::new("/m/a.mov")));
        assert!(!ctx.includes(Path::new("/m")));
        assert!(!ctx.includes(Path::new("/m/_mediascan.db-wal")));
        assert!(!ctx.includes(Path::new("/m/.DS_Store")));
        assert!(!ctx.includes(Path::new("/m/part.tmp")));
    }
}
