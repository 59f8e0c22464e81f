//! Shared fixtures: an in-memory store and a scripted analyzer that never runs ffmpeg.
#![allow(dead_code)]

use crossbeam_channel::Receiver;
use mediascan::engine::analyzer::Analyzer;
use mediascan::errors::{ProcessError, ScanError};
use mediascan::scanner::{ProgressSignal, ScanCoordinator};
use mediascan::store::{DocumentStore, SqliteStore};
use mediascan::types::{
    CinfParts, FieldOrder, FileStat, MediaKind, MediaRecord, MetadataUpdate, ProbeUpdate,
    ThumbnailUpdate,
};
use mediascan::utils::ManualMode;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub const THUMB_TIME_MS: i64 = 1_700_000_000_000;

#[derive(Default)]
pub struct FakeAnalyzer {
    pub probe_calls: AtomicUsize,
    pub thumb_calls: AtomicUsize,
    pub metadata_calls: AtomicUsize,
    /// Every probe fails with a tool exit.
    pub fail_probe: AtomicBool,
    /// Probe reports not-media and the thumbnail fails.
    pub not_media: AtomicBool,
    /// First probe blocks until this receiver yields.
    pub block_first: Mutex<Option<Receiver<()>>>,
}

impl FakeAnalyzer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn probes(&self) -> usize {
        self.probe_calls.load(Ordering::SeqCst)
    }

    pub fn thumbs(&self) -> usize {
        self.thumb_calls.load(Ordering::SeqCst)
    }
}

fn tool_exit() -> ScanError {
    ScanError::Process(ProcessError::Exit {
        command: "ffprobe".to_string(),
        pid: 1,
        code: 1,
    })
}

impl Analyzer for FakeAnalyzer {
    fn probe(&self, record: &MediaRecord) -> Result<ProbeUpdate, ScanError> {
        self.probe_calls.fetch_add(1, Ordering::SeqCst);
        let gate = self.block_first.lock().unwrap().take();
        if let Some(gate) = gate {
            let _ = gate.recv();
        }
        if self.not_media.load(Ordering::SeqCst) {
            return Err(ScanError::NotMedia("no streams".to_string()));
        }
        if self.fail_probe.load(Ordering::SeqCst) {
            return Err(tool_exit());
        }
        Ok(ProbeUpdate {
            display_id: record.id.clone(),
            cinf: CinfParts {
                kind: MediaKind::Movie,
                frames: 250,
                time_base: (1, 25),
            },
            mediainfo: None,
        })
    }

    fn thumbnail(&self, record: &MediaRecord) -> Result<ThumbnailUpdate, ScanError> {
        self.thumb_calls.fetch_add(1, Ordering::SeqCst);
        if self.not_media.load(Ordering::SeqCst) {
            return Err(tool_exit());
        }
        Ok(ThumbnailUpdate {
            display_id: record.id.clone(),
            png: vec![0x89, b'P', b'N', b'G'],
            time_ms: THUMB_TIME_MS,
        })
    }

    fn advanced_metadata(&self, _record: &MediaRecord) -> Result<MetadataUpdate, ScanError> {
        self.metadata_calls.fetch_add(1, Ordering::SeqCst);
        Ok(MetadataUpdate {
            field_order: FieldOrder::Progressive,
            scenes: vec![1.5],
            blacks: Vec::new(),
            freezes: Vec::new(),
        })
    }
}

pub fn memory_store() -> Arc<dyn DocumentStore> {
    Arc::new(SqliteStore::open_in_memory().unwrap())
}

pub fn stat(size: u64, mtime_ms: i64) -> FileStat {
    FileStat {
        size,
        mtime_ms,
        is_dir: false,
    }
}

pub struct Harness {
    pub store: Arc<dyn DocumentStore>,
    pub analyzer: Arc<FakeAnalyzer>,
    pub manual: Arc<ManualMode>,
    pub progress: Arc<ProgressSignal>,
    pub coordinator: Arc<ScanCoordinator>,
    _dir: tempfile::TempDir,
}

impl Harness {
    pub fn new(retry_limit: u32) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let store = memory_store();
        let analyzer = FakeAnalyzer::new();
        let manual = Arc::new(ManualMode::restore(&dir.path().join(".manualMode")));
        let progress = Arc::new(ProgressSignal::new());
        let coordinator = Arc::new(ScanCoordinator::new(
            Arc::clone(&store),
            analyzer.clone(),
            Arc::clone(&manual),
            Arc::clone(&progress),
            retry_limit,
        ));
        Self {
            store,
            analyzer,
            manual,
            progress,
            coordinator,
            _dir: dir,
        }
    }

    pub fn media(&self, name: &str) -> std::path::PathBuf {
        Path::new("/media").join(name)
    }
}
