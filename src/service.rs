//! `MediaScanner`: wires store, limiter, coordinator, job tracker and derivation consumers,
//! and answers the routing layer with AMCP-style text lines.

use anyhow::{Context, Result, anyhow};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use crossbeam_channel::{Sender, unbounded};
use log::{debug, error, info, warn};
use serde::Serialize;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::thread::JoinHandle;

use crate::derive::{PreviewGenerator, RecordHandler, WaveformGenerator, spawn_consumer};
use crate::engine::analyzer::{Analyzer, FfmpegAnalyzer, Tools};
use crate::engine::limiter::ProcessLimiter;
use crate::engine::tools::{media_id, normalize_id, prepare_media_root};
use crate::errors::RequestError;
use crate::jobs::{JobKind, JobOp, JobTracker};
use crate::pipeline::{PipelineContext, PipelineHandles, shutdown_pipeline_handles, start_pipeline};
use crate::scanner::{ProgressSignal, ScanCoordinator, ScanOutcome};
use crate::store::{DocumentStore, SqliteStore};
use crate::types::{FileStat, ScanOrigin};
use crate::utils::ManualMode;
use crate::utils::config::{Config, THUMBNAIL_ATTACHMENT};
use crate::watchdog::{ProcessExit, Watchdog};

/// A file under the media root resolved from a caller-supplied relative name.
#[derive(Clone, Debug, PartialEq)]
pub struct FoundFile {
    pub path: PathBuf,
    pub stat: FileStat,
    pub id: String,
}

pub struct MediaScanner {
    config: Config,
    media_root: PathBuf,
    store: Arc<dyn DocumentStore>,
    limiter: Arc<ProcessLimiter>,
    progress: Arc<ProgressSignal>,
    manual: Arc<ManualMode>,
    analyzer: Arc<dyn Analyzer>,
    coordinator: Arc<ScanCoordinator>,
    jobs: Arc<JobTracker>,
    previews: Arc<PreviewGenerator>,
    waveforms: Arc<WaveformGenerator>,
}

/// Background threads started by [`MediaScanner::start`].
pub struct Services {
    pipeline: PipelineHandles,
    consumers: Vec<JoinHandle<()>>,
    watchdog: Option<JoinHandle<()>>,
    shutdown_tx: Sender<()>,
}

impl Services {
    /// Stop the watcher, the consumers and the watchdog, and wait for them.
    pub fn stop(self) -> Result<()> {
        let Services {
            pipeline,
            consumers,
            watchdog,
            shutdown_tx,
        } = self;
        drop(shutdown_tx);
        shutdown_pipeline_handles(pipeline)?;
        for handle in consumers.into_iter().chain(watchdog) {
            let _ = handle.join();
        }
        Ok(())
    }
}

#[derive(Serialize)]
struct DiskStat {
    name: String,
    mount: PathBuf,
    fs: String,
    total: u64,
    available: u64,
}

impl MediaScanner {
    /// Open the store and build the ffmpeg-backed analyzer from `config`.
    pub fn open(config: Config) -> Result<Self> {
        let media_root = prepare_media_root(&config.paths.media)?;
        let store: Arc<dyn DocumentStore> = Arc::new(SqliteStore::open(&config.paths.db)?);
        let limiter = Arc::new(ProcessLimiter::new());
        let progress = Arc::new(ProgressSignal::new());
        let tools = Tools::new(&config, Arc::clone(&limiter), Arc::clone(&progress));
        let analyzer: Arc<dyn Analyzer> = Arc::new(FfmpegAnalyzer::new(tools, &config));
        Ok(Self::with_parts(config, &media_root, store, analyzer, limiter, progress))
    }

    /// Assemble from ready parts (tests pass an in-memory store and a fake analyzer).
    pub fn with_parts(
        config: Config,
        media_root: &Path,
        store: Arc<dyn DocumentStore>,
        analyzer: Arc<dyn Analyzer>,
        limiter: Arc<ProcessLimiter>,
        progress: Arc<ProgressSignal>,
    ) -> Self {
        let manual = Arc::new(ManualMode::restore(&config.paths.manual_mode_marker));
        let coordinator = Arc::new(ScanCoordinator::new(
            Arc::clone(&store),
            Arc::clone(&analyzer),
            Arc::clone(&manual),
            Arc::clone(&progress),
            config.scanner.retry_limit,
        ));
        let tools = Tools::new(&config, Arc::clone(&limiter), Arc::clone(&progress));
        let previews = Arc::new(PreviewGenerator::new(
            Arc::clone(&store),
            tools.clone(),
            config.previews.clone(),
            &config.paths.previews,
            Arc::clone(&manual),
        ));
        let waveforms = Arc::new(WaveformGenerator::new(
            Arc::clone(&store),
            tools,
            config.waveforms.clone(),
            &config.paths.waveforms,
            Arc::clone(&manual),
        ));
        Self {
            media_root: media_root.to_path_buf(),
            store,
            limiter,
            progress,
            manual,
            analyzer,
            coordinator,
            jobs: Arc::new(JobTracker::new()),
            previews,
            waveforms,
            config,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn media_root(&self) -> &Path {
        &self.media_root
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    pub fn coordinator(&self) -> &Arc<ScanCoordinator> {
        &self.coordinator
    }

    pub fn limiter(&self) -> &Arc<ProcessLimiter> {
        &self.limiter
    }

    pub fn progress(&self) -> &Arc<ProgressSignal> {
        &self.progress
    }

    pub fn pipeline_context(&self) -> PipelineContext {
        PipelineContext::new(&self.media_root, Some(self.config.paths.db.as_path()), &self.config)
    }

    /// Start the sweeper, the watcher pipeline, enabled derivation consumers and the watchdog.
    pub fn start(&self) -> Result<Services> {
        self.coordinator.spawn_sweeper();
        let pipeline = start_pipeline(self.pipeline_context(), Arc::clone(&self.coordinator))?;
        let (shutdown_tx, shutdown_rx) = unbounded::<()>();

        let mut handlers: Vec<Arc<dyn RecordHandler>> = Vec::new();
        if self.config.previews.enable {
            handlers.push(Arc::clone(&self.previews) as Arc<dyn RecordHandler>);
        }
        if self.config.waveforms.enable {
            handlers.push(Arc::clone(&self.waveforms) as Arc<dyn RecordHandler>);
        }
        let mut consumers = Vec::new();
        for handler in handlers {
            consumers.push(spawn_consumer(
                Arc::clone(&self.store),
                handler,
                shutdown_rx.clone(),
            )?);
        }

        let watchdog = Arc::new(Watchdog::new(
            Arc::clone(&self.store),
            Arc::clone(&self.progress),
            &self.media_root,
            self.config.watchdog.clone(),
            Arc::new(ProcessExit::new(Arc::clone(&self.limiter))),
        ))
        .start(shutdown_rx);

        Ok(Services {
            pipeline,
            consumers,
            watchdog,
            shutdown_tx,
        })
    }

    /// Resolve `name` relative to the media root. `None` for missing files, directories and
    /// names that leave the root.
    pub fn lookup(&self, name: &str) -> Option<FoundFile> {
        let rel = Path::new(name.trim());
        if rel.as_os_str().is_empty()
            || rel
                .components()
                .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
        {
            return None;
        }
        let path = self.media_root.join(rel);
        let stat = FileStat::read(&path).ok().filter(|s| !s.is_dir)?;
        let id = media_id(&path, &self.media_root);
        Some(FoundFile { path, stat, id })
    }

    // ---- Listings ----

    pub fn cls(&self) -> Result<String> {
        let lines: String = self
            .store
            .list_all()?
            .into_iter()
            .filter_map(|r| r.cinf)
            .collect();
        Ok(format!("200 CLS OK\r\n{lines}\r\n"))
    }

    pub fn cinf(&self, id: &str) -> Result<String> {
        let id = normalize_id(id)?;
        Ok(match self.store.get(&id)?.and_then(|r| r.cinf) {
            Some(cinf) => format!("201 CINF OK\r\n{cinf}"),
            None => "404 CINF ERROR\r\n".to_string(),
        })
    }

    pub fn thumbnail_list(&self) -> Result<String> {
        let lines: String = self
            .store
            .list_all()?
            .into_iter()
            .filter_map(|r| r.tinf)
            .collect();
        Ok(format!("200 THUMBNAIL LIST OK\r\n{lines}\r\n"))
    }

    pub fn thumbnail(&self, id: &str) -> Result<String> {
        let id = normalize_id(id)?;
        Ok(match self.store.attachment(&id, THUMBNAIL_ATTACHMENT)? {
            Some(att) => format!(
                "201 THUMBNAIL RETRIEVE OK\r\n{}\r\n",
                STANDARD.encode(&att.data)
            ),
            None => "404 THUMBNAIL RETRIEVE ERROR\r\n".to_string(),
        })
    }

    pub fn media_info(&self, id: &str) -> Result<Option<String>> {
        let id = normalize_id(id)?;
        match self.store.get(&id)?.and_then(|r| r.mediainfo) {
            Some(info) => Ok(Some(serde_json::to_string(&info)?)),
            None => Ok(None),
        }
    }

    // ---- Thumbnails ----

    /// Regenerate and store the thumbnail of an existing record.
    pub fn regenerate_thumbnail(&self, id: &str) -> Result<()> {
        let mut record = self
            .store
            .get(id)?
            .ok_or_else(|| anyhow!("{id} not found"))?;
        let update = self.analyzer.thumbnail(&record)?;
        update.apply(&mut record);
        self.store.put(&record, Some(&update.attachment()))?;
        Ok(())
    }

    pub fn generate_thumbnail(&self, id: &str) -> Result<String> {
        let id = normalize_id(id)?;
        Ok(match self.regenerate_thumbnail(&id) {
            Ok(()) => "202 THUMBNAIL GENERATE OK\r\n".to_string(),
            Err(e) => {
                error!("id={} {:#}", id, e);
                "501 THUMBNAIL GENERATE ERROR\r\n".to_string()
            }
        })
    }

    /// Regenerate every thumbnail one after another on a worker thread; failures are skipped.
    /// The handle yields the number regenerated.
    pub fn spawn_generate_all_thumbnails(self: &Arc<Self>) -> Result<JoinHandle<usize>> {
        let records = self.store.list_all()?;
        let me = Arc::clone(self);
        let handle = std::thread::Builder::new()
            .name("thumbnail-all".to_string())
            .spawn(move || {
                let mut done = 0;
                for record in records {
                    match me.regenerate_thumbnail(&record.id) {
                        Ok(()) => done += 1,
                        Err(e) => debug!("id={} thumbnail skipped: {:#}", record.id, e),
                    }
                }
                info!("Regenerated {} thumbnails", done);
                done
            })
            .context("spawn thumbnail worker")?;
        Ok(handle)
    }

    pub fn generate_all_thumbnails(self: &Arc<Self>) -> String {
        match self.spawn_generate_all_thumbnails() {
            Ok(_) => "202 THUMBNAIL GENERATE_ALL OK\r\n".to_string(),
            Err(e) => {
                error!("{:#}", e);
                "501 THUMBNAIL GENERATE_ALL ERROR\r\n".to_string()
            }
        }
    }

    // ---- Media info ----

    /// Re-run the metadata probe on an existing record.
    pub fn refresh_media_info(&self, id: &str) -> Result<()> {
        let mut record = self
            .store
            .get(id)?
            .ok_or_else(|| anyhow!("{id} not found"))?;
        let update = self.analyzer.probe(&record)?;
        update.apply(&mut record);
        self.store.put(&record, None)?;
        info!("Generated info for \"{}\"", id);
        Ok(())
    }

    /// Field order, scenes, blacks and freezes. Probes first when the record has no
    /// media description yet.
    pub fn refresh_advanced_metadata(&self, id: &str) -> Result<()> {
        let mut record = self
            .store
            .get(id)?
            .ok_or_else(|| anyhow!("{id} not found"))?;
        if record.mediainfo.is_none() {
            let update = self.analyzer.probe(&record)?;
            update.apply(&mut record);
        } else {
            let update = self.analyzer.advanced_metadata(&record)?;
            update.apply(&mut record);
        }
        self.store.put(&record, None)?;
        Ok(())
    }

    /// Full explicit scan through the coordinator.
    pub fn rescan(&self, found: &FoundFile) -> Result<ScanOutcome> {
        Ok(self.coordinator.request_scan(
            &found.path,
            found.stat,
            &found.id,
            ScanOrigin::Explicit { basic_probe: true },
        )?)
    }

    /// Synchronous scan of one file: re-probe a known record, or run a full scan.
    pub fn scan_now(&self, name: &str) -> String {
        let Some(found) = self.lookup(name) else {
            info!("Looking for file \"{}\"... not found", name);
            return "404 FILE NOT FOUND\r\n".to_string();
        };
        let known = matches!(self.store.get(&found.id), Ok(Some(r)) if r.media_path.is_some());
        let result = if known {
            self.refresh_media_info(&found.id)
        } else {
            self.rescan(&found).map(|_| ())
        };
        if let Err(e) = result {
            error!("id={} path={} {:#}", found.id, found.path.display(), e);
        }
        "202 MEDIA INFO GENERATE OK\r\n".to_string()
    }

    // ---- Async jobs ----

    /// Record id a job for `name` is keyed by. File-based kinds drop the extension.
    pub fn job_id(kind: JobKind, name: &str) -> Result<String, RequestError> {
        match kind {
            JobKind::MediaInfo | JobKind::Metadata => normalize_id(strip_extension(name)),
            JobKind::Thumbnail | JobKind::Preview => normalize_id(name),
        }
    }

    pub fn accept_job(self: &Arc<Self>, kind: &str, name: &str) -> Result<String, RequestError> {
        let kind: JobKind = kind.parse()?;
        let id = Self::job_id(kind, name)?;
        let me = Arc::clone(self);
        let (op, fallback): (JobOp, Option<JobOp>) = match kind {
            JobKind::Thumbnail => {
                let job_id = id.clone();
                (Box::new(move || me.regenerate_thumbnail(&job_id)) as JobOp, None)
            }
            JobKind::Preview => {
                let job_id = id.clone();
                (
                    Box::new(move || me.previews.generate(&job_id).map(|_| ())) as JobOp,
                    None,
                )
            }
            JobKind::MediaInfo | JobKind::Metadata => {
                let Some(found) = self.lookup(name) else {
                    return Ok("404 FILE NOT FOUND\r\n".to_string());
                };
                if kind == JobKind::Metadata {
                    (Box::new(move || me.refresh_advanced_metadata(&found.id)) as JobOp, None)
                } else {
                    let again = Arc::clone(&me);
                    let rescan_target = found.clone();
                    (
                        Box::new(move || me.refresh_media_info(&found.id)) as JobOp,
                        Some(Box::new(move || again.rescan(&rescan_target).map(|_| ())) as JobOp),
                    )
                }
            }
        };
        Ok(self.jobs.accept(kind, &id, op, fallback).line(kind))
    }

    pub fn poll_job(&self, kind: &str, name: &str, preserve: bool) -> Result<String, RequestError> {
        let kind: JobKind = kind.parse()?;
        let id = Self::job_id(kind, name)?;
        Ok(self.jobs.poll(kind, &id, preserve).line(kind))
    }

    pub fn jobs(&self) -> &Arc<JobTracker> {
        &self.jobs
    }

    // ---- Manual mode / status ----

    pub fn manual_mode(&self) -> bool {
        self.manual.is_enabled()
    }

    pub fn manual_mode_json(&self) -> String {
        serde_json::json!({ "manualMode": self.manual.is_enabled() }).to_string()
    }

    pub fn set_manual_mode(&self, enabled: bool) -> String {
        self.manual.set(enabled);
        self.manual_mode_json()
    }

    pub fn update_seq(&self) -> Result<String> {
        let seq = self.store.update_seq()?;
        Ok(serde_json::json!({ "update_seq": seq }).to_string())
    }

    /// Mounted disks with their sizes, as JSON.
    pub fn fs_stats(&self) -> Result<String> {
        let disks = sysinfo::Disks::new_with_refreshed_list();
        let stats: Vec<DiskStat> = disks
            .list()
            .iter()
            .map(|d| DiskStat {
                name: d.name().to_string_lossy().into_owned(),
                mount: d.mount_point().to_path_buf(),
                fs: d.file_system().to_string_lossy().into_owned(),
                total: d.total_space(),
                available: d.available_space(),
            })
            .collect();
        if stats.is_empty() {
            warn!("no disks reported");
        }
        Ok(serde_json::to_string(&stats)?)
    }
}

/// `news/intro.mov` → `news/intro`; only the last path segment is considered.
pub fn strip_extension(name: &str) -> &str {
    match name.rfind('.') {
        Some(dot) if !name[dot + 1..].contains(['/', '\\']) && dot + 1 < name.len() => &name[..dot],
        _ => name,
    }
}
