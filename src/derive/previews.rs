//! Low-bitrate webm previews under the previews directory, one per record.

use anyhow::{Context, Result};
use log::{error, info};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::{RecordHandler, delete_artifact, write_back};
use crate::engine::analyzer::Tools;
use crate::engine::tools::is_watchdog_copy;
use crate::store::DocumentStore;
use crate::types::{ArtifactUpdate, MediaKind, PreviewUpdate};
use crate::utils::ManualMode;
use crate::utils::config::{Lanes, PreviewConfig};
use crate::utils::tempfiles::{ensure_parent, remove_if_exists, rename_into_place, temp_path_for};

pub struct PreviewGenerator {
    store: Arc<dyn DocumentStore>,
    tools: Tools,
    config: PreviewConfig,
    dir: PathBuf,
    manual: Arc<ManualMode>,
}

pub(crate) fn preview_args(config: &PreviewConfig, input: &Path, output: &Path) -> Vec<OsString> {
    vec![
        "-hide_banner".into(),
        "-y".into(),
        "-threads".into(),
        "1".into(),
        "-i".into(),
        input.into(),
        "-f".into(),
        "webm".into(),
        "-an".into(),
        "-c:v".into(),
        "libvpx".into(),
        "-b:v".into(),
        config.bitrate.clone().into(),
        "-auto-alt-ref".into(),
        "0".into(),
        "-vf".into(),
        format!("scale={}:{}", config.width, config.height).into(),
        "-deadline".into(),
        "realtime".into(),
        output.into(),
    ]
}

impl PreviewGenerator {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        tools: Tools,
        config: PreviewConfig,
        dir: &Path,
        manual: Arc<ManualMode>,
    ) -> Self {
        Self {
            store,
            tools,
            config,
            dir: dir.to_path_buf(),
            manual,
        }
    }

    pub fn dest_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.webm"))
    }

    /// Build the preview unless it is current. `Ok(None)` when nothing was done.
    pub fn generate(&self, id: &str) -> Result<Option<PreviewUpdate>> {
        let Some(record) = self.store.get(id)? else {
            return Ok(None);
        };
        let Some(media) = record.media_path.clone() else {
            return Ok(None);
        };
        if is_watchdog_copy(&media) {
            return Ok(None);
        }
        if record.mediainfo.as_ref().is_some_and(|m| m.kind == MediaKind::Audio) {
            return Ok(None);
        }
        let dest = self.dest_path(id);
        if record.preview_time == record.media_time && dest.exists() {
            return Ok(None);
        }

        let tmp = temp_path_for(&dest, ".new");
        ensure_parent(&tmp)?;
        info!("id={} path={} Starting preview generation", id, media.display());
        let run = self
            .tools
            .run(Lanes::PREVIEW, &self.tools.ffmpeg, &preview_args(&self.config, &media, &tmp));
        if let Err(e) = run {
            let _ = remove_if_exists(&tmp);
            return Err(e).with_context(|| format!("preview for {id}"));
        }
        let size = std::fs::metadata(&tmp)
            .with_context(|| format!("stat {}", tmp.display()))?
            .len();
        rename_into_place(&tmp, &dest)?;

        let update = PreviewUpdate(ArtifactUpdate {
            path: dest,
            size,
            source_time: record.media_time,
        });
        write_back(self.store.as_ref(), id, |r| update.apply(r))?;
        info!("id={} path={} Finished preview generation", id, media.display());
        Ok(Some(update))
    }
}

impl RecordHandler for PreviewGenerator {
    fn name(&self) -> &'static str {
        "preview"
    }

    fn handle(&self, id: &str, deleted: bool) {
        if deleted {
            delete_artifact("preview", id, &self.dest_path(id));
            return;
        }
        if self.manual.is_enabled() {
            return;
        }
        if let Err(e) = self.generate(id) {
            error!("id={} {:#}", id, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn args_are_plain_argv() {
        let cfg = PreviewConfig::default();
        let args = preview_args(&cfg, Path::new("/m/a b.mov"), Path::new("/p/A.webm.new"));
        assert!(args.contains(&OsString::from("/m/a b.mov")));
        assert!(args.contains(&OsString::from("scale=160:-1")));
        assert!(args.contains(&OsString::from("40k")));
        assert_eq!(args.last(), Some(&OsString::from("/p/A.webm.new")));
    }
}
