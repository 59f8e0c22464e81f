//! The analysis seam between the scan coordinator and the external media tools.

use log::warn;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::engine::limiter::{ProcessLimiter, ProcessOutput};
use crate::engine::{metadata, probe, thumbnail};
use crate::errors::{ProcessError, ScanError};
use crate::scanner::ProgressSignal;
use crate::types::{MediaRecord, MetadataUpdate, ProbeUpdate, ThumbnailUpdate};
use crate::utils::config::{Config, MetadataConfig, ThumbnailConfig};

/// Per-record analysis steps. Implementations must be usable from several threads at once
/// (probe and thumbnail of one attempt run concurrently).
pub trait Analyzer: Send + Sync {
    /// Metadata probe: CLS line parts and, when enabled, the full media description.
    fn probe(&self, record: &MediaRecord) -> Result<ProbeUpdate, ScanError>;

    fn thumbnail(&self, record: &MediaRecord) -> Result<ThumbnailUpdate, ScanError>;

    /// Field order, scenes, blacks and freezes for an already probed record.
    fn advanced_metadata(&self, record: &MediaRecord) -> Result<MetadataUpdate, ScanError>;
}

/// Tool binaries plus the limiter and progress signal every invocation goes through.
#[derive(Clone)]
pub struct Tools {
    pub ffmpeg: PathBuf,
    pub ffprobe: PathBuf,
    pub limiter: Arc<ProcessLimiter>,
    pub progress: Arc<ProgressSignal>,
}

impl Tools {
    pub fn new(config: &Config, limiter: Arc<ProcessLimiter>, progress: Arc<ProgressSignal>) -> Self {
        Self {
            ffmpeg: config.paths.ffmpeg.clone(),
            ffprobe: config.paths.ffprobe.clone(),
            limiter,
            progress,
        }
    }

    /// Run under `lane`, collecting output. Every chunk refreshes the progress signal.
    pub fn run<S: AsRef<OsStr>>(
        &self,
        lane: &str,
        program: &Path,
        args: &[S],
    ) -> Result<ProcessOutput, ProcessError> {
        let progress = &self.progress;
        self.limiter
            .run_collect(lane, program, args, &|_: &[u8]| progress.touch())
    }
}

pub struct FfmpegAnalyzer {
    tools: Tools,
    thumbnails: ThumbnailConfig,
    metadata: MetadataConfig,
}

impl FfmpegAnalyzer {
    pub fn new(tools: Tools, config: &Config) -> Self {
        Self {
            tools,
            thumbnails: config.thumbnails.clone(),
            metadata: config.metadata.clone(),
        }
    }

    pub fn tools(&self) -> &Tools {
        &self.tools
    }
}

fn media_path(record: &MediaRecord) -> Result<&Path, ScanError> {
    record
        .media_path
        .as_deref()
        .ok_or_else(|| ScanError::InvalidRequest(format!("{} has no media path", record.id)))
}

impl Analyzer for FfmpegAnalyzer {
    fn probe(&self, record: &MediaRecord) -> Result<ProbeUpdate, ScanError> {
        let path = media_path(record)?;
        let out = probe::run_probe(&self.tools, path)?;
        let cinf = out.cinf_parts();

        let mediainfo = if self.metadata.enable {
            let mut info = out.media_info(record);
            match metadata::analyze(&self.tools, &self.metadata, path, out.duration()) {
                Ok(update) => {
                    info.field_order = update.field_order;
                    info.scenes = update.scenes;
                    info.blacks = update.blacks;
                    info.freezes = update.freezes;
                    Some(info)
                }
                Err(e) => {
                    warn!("id={} path={} Media analysis failed: {}", record.id, path.display(), e);
                    None
                }
            }
        } else {
            None
        };

        Ok(ProbeUpdate {
            display_id: record.id.clone(),
            cinf,
            mediainfo,
        })
    }

    fn thumbnail(&self, record: &MediaRecord) -> Result<ThumbnailUpdate, ScanError> {
        let path = media_path(record)?;
        thumbnail::generate(&self.tools, &self.thumbnails, &record.id, path)
    }

    fn advanced_metadata(&self, record: &MediaRecord) -> Result<MetadataUpdate, ScanError> {
        let path = media_path(record)?;
        let duration = record
            .mediainfo
            .as_ref()
            .and_then(|m| m.format.duration)
            .filter(|d| *d > 0.0);
        metadata::analyze(&self.tools, &self.metadata, path, duration)
    }
}
