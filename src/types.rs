//! Records, stat snapshots and the patch types applied to them.

use serde::{Deserialize, Deserializer, Serialize};
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use crate::utils::config::THUMBNAIL_ATTACHMENT;

/// Filesystem observation for one path: size and mtime (ms since epoch).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FileStat {
    pub size: u64,
    pub mtime_ms: i64,
    pub is_dir: bool,
}

impl FileStat {
    pub fn from_metadata(meta: &std::fs::Metadata) -> Self {
        let mtime_ms = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0);
        Self {
            size: meta.len(),
            mtime_ms,
            is_dir: meta.is_dir(),
        }
    }

    /// Stat `path`, following symlinks.
    pub fn read(path: &Path) -> std::io::Result<Self> {
        std::fs::metadata(path).map(|m| Self::from_metadata(&m))
    }
}

/// Where a scan request came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScanOrigin {
    /// Filesystem watcher (add/change event or initial walk).
    WatchEvent,
    /// On-demand request. `basic_probe` asks for the metadata probe even in manual mode.
    Explicit { basic_probe: bool },
}

/// A pending scan held by the coordinator until it succeeds or is abandoned.
#[derive(Clone, Debug, PartialEq)]
pub struct ScanTask {
    pub path: PathBuf,
    pub id: String,
    pub stat: FileStat,
    pub origin: ScanOrigin,
    pub failures: u32,
}

/// One detected segment (black or freeze), in seconds.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Interval {
    pub start: f64,
    pub end: f64,
    pub duration: f64,
}

impl Interval {
    pub fn new(start: f64, end: f64) -> Self {
        Self {
            start,
            end,
            duration: end - start,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldOrder {
    #[default]
    Unknown,
    Progressive,
    Tff,
    Bff,
}

/// CLS media class.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MediaKind {
    Audio,
    Still,
    Movie,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Audio => "AUDIO",
            MediaKind::Still => "STILL",
            MediaKind::Movie => "MOVIE",
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CodecInfo {
    pub long_name: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub time_base: Option<String>,
    pub tag_string: Option<String>,
    pub is_avc: Option<bool>,
}

/// Per-stream technical description kept on the record.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct StreamInfo {
    pub codec: CodecInfo,

    // Video
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub sample_aspect_ratio: Option<String>,
    pub display_aspect_ratio: Option<String>,
    pub pix_fmt: Option<String>,
    pub bits_per_raw_sample: Option<f64>,

    // Audio
    pub sample_fmt: Option<String>,
    pub sample_rate: Option<f64>,
    pub channels: Option<u32>,
    pub channel_layout: Option<String>,
    pub bits_per_sample: Option<f64>,

    // Common
    pub time_base: Option<String>,
    pub start_time: Option<f64>,
    pub duration_ts: Option<f64>,
    pub duration: Option<f64>,
    pub bit_rate: Option<f64>,
    pub max_bit_rate: Option<f64>,
    pub nb_frames: Option<f64>,
}

impl StreamInfo {
    pub fn is_audio(&self) -> bool {
        self.codec.kind.as_deref() == Some("audio")
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FormatInfo {
    pub name: Option<String>,
    pub long_name: Option<String>,
    pub start_time: Option<f64>,
    pub duration: Option<f64>,
    pub bit_rate: Option<f64>,
    pub max_bit_rate: Option<f64>,
}

/// Probe-derived description plus analysis results.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MediaInfo {
    pub name: String,
    pub path: PathBuf,
    pub size: u64,
    pub time: i64,
    #[serde(rename = "type")]
    pub kind: MediaKind,
    pub field_order: FieldOrder,
    #[serde(default)]
    pub scenes: Vec<f64>,
    #[serde(default)]
    pub freezes: Vec<Interval>,
    #[serde(default)]
    pub blacks: Vec<Interval>,
    pub streams: Vec<StreamInfo>,
    pub format: FormatInfo,
}

impl MediaInfo {
    pub fn audio_streams(&self) -> impl Iterator<Item = &StreamInfo> {
        self.streams.iter().filter(|s| s.is_audio())
    }
}

/// One scanned file. `rev` is assigned by the store on every write.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MediaRecord {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rev: Option<String>,

    pub media_path: Option<PathBuf>,
    pub media_size: Option<u64>,
    pub media_time: Option<i64>,

    /// CLS line for this file.
    pub cinf: Option<String>,
    pub mediainfo: Option<MediaInfo>,
    /// Probed and found to hold no streams. Holds until the file changes.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub not_media: bool,

    pub thumb_size: Option<u64>,
    pub thumb_time: Option<i64>,
    /// THUMBNAIL LIST line for this file.
    pub tinf: Option<String>,

    pub preview_path: Option<PathBuf>,
    pub preview_size: Option<u64>,
    pub preview_time: Option<i64>,

    pub waveform_path: Option<PathBuf>,
    pub waveform_size: Option<u64>,
    pub waveform_time: Option<i64>,
}

impl MediaRecord {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    /// True when the stored size+mtime pair equals `stat`.
    pub fn matches_stat(&self, stat: &FileStat) -> bool {
        self.media_size == Some(stat.size) && self.media_time == Some(stat.mtime_ms)
    }

    pub fn has_basic_metadata(&self) -> bool {
        self.cinf.is_some()
    }

    pub fn has_thumbnail(&self) -> bool {
        self.thumb_size.is_some()
    }

    /// Keep only path, size and mtime, and remember that the file is not media.
    pub fn mark_not_media(&mut self) {
        self.not_media = true;
        self.cinf = None;
        self.mediainfo = None;
        self.thumb_size = None;
        self.thumb_time = None;
        self.tinf = None;
    }
}

/// Binary blob stored next to a record (the thumbnail PNG).
#[derive(Clone, Debug, PartialEq)]
pub struct Attachment {
    pub name: String,
    pub content_type: String,
    pub data: Vec<u8>,
}

impl Attachment {
    pub fn thumbnail(data: Vec<u8>) -> Self {
        Self {
            name: THUMBNAIL_ATTACHMENT.to_string(),
            content_type: "image/png".to_string(),
            data,
        }
    }
}

// ---- Patches ----

/// Path/size/mtime observed on disk.
#[derive(Clone, Debug, PartialEq)]
pub struct FileUpdate {
    pub path: PathBuf,
    pub stat: FileStat,
}

impl FileUpdate {
    pub fn apply(&self, record: &mut MediaRecord) {
        record.media_path = Some(self.path.clone());
        record.media_size = Some(self.stat.size);
        record.media_time = Some(self.stat.mtime_ms);
    }
}

/// Inputs of the CLS line that only the probe knows.
#[derive(Clone, Debug, PartialEq)]
pub struct CinfParts {
    pub kind: MediaKind,
    pub frames: u64,
    /// (numerator, denominator) as written in the CLS line.
    pub time_base: (u64, u64),
}

/// Result of the metadata probe.
#[derive(Clone, Debug, PartialEq)]
pub struct ProbeUpdate {
    /// Quoted identifier used in CLS/TLS lines (the record id).
    pub display_id: String,
    pub cinf: CinfParts,
    pub mediainfo: Option<MediaInfo>,
}

impl ProbeUpdate {
    /// Replace cinf and mediainfo. The CLS timestamp is the thumbnail time, so apply
    /// a [`ThumbnailUpdate`] from the same attempt first.
    pub fn apply(&self, record: &mut MediaRecord) {
        let stamp_ms = record
            .thumb_time
            .unwrap_or_else(|| chrono::Utc::now().timestamp_millis());
        record.cinf = Some(format!(
            "\"{}\"  {}  {} {} {} {}/{}\r\n",
            self.display_id,
            self.cinf.kind.as_str(),
            record.media_size.unwrap_or(0),
            crate::engine::tools::format_local_ms(stamp_ms, "%Y%m%d%H%M%S"),
            self.cinf.frames,
            self.cinf.time_base.0,
            self.cinf.time_base.1,
        ));
        if let Some(info) = &self.mediainfo {
            record.mediainfo = Some(info.clone());
        }
        record.not_media = false;
    }
}

/// Result of thumbnail generation.
#[derive(Clone, Debug, PartialEq)]
pub struct ThumbnailUpdate {
    pub display_id: String,
    pub png: Vec<u8>,
    pub time_ms: i64,
}

impl ThumbnailUpdate {
    pub fn apply(&self, record: &mut MediaRecord) {
        let size = self.png.len() as u64;
        record.thumb_size = Some(size);
        record.thumb_time = Some(self.time_ms);
        record.tinf = Some(format!(
            "\"{}\" {} {}\r\n",
            self.display_id,
            crate::engine::tools::format_local_ms(self.time_ms, "%Y%m%dT%H%M%S"),
            size
        ));
    }

    pub fn attachment(&self) -> Attachment {
        Attachment::thumbnail(self.png.clone())
    }
}

/// Analysis results (field order, scenes, blacks, freezes) for an existing mediainfo.
#[derive(Clone, Debug, PartialEq)]
pub struct MetadataUpdate {
    pub field_order: FieldOrder,
    pub scenes: Vec<f64>,
    pub blacks: Vec<Interval>,
    pub freezes: Vec<Interval>,
}

impl MetadataUpdate {
    /// No-op when the record has not been probed yet.
    pub fn apply(&self, record: &mut MediaRecord) {
        if let Some(info) = record.mediainfo.as_mut() {
            info.field_order = self.field_order;
            info.scenes = self.scenes.clone();
            info.blacks = self.blacks.clone();
            info.freezes = self.freezes.clone();
        }
    }
}

/// Generated artifact file (preview or waveform) tied to the media mtime it was made from.
#[derive(Clone, Debug, PartialEq)]
pub struct ArtifactUpdate {
    pub path: PathBuf,
    pub size: u64,
    pub source_time: Option<i64>,
}

/// Preview file written for a record.
#[derive(Clone, Debug, PartialEq)]
pub struct PreviewUpdate(pub ArtifactUpdate);

impl PreviewUpdate {
    pub fn apply(&self, record: &mut MediaRecord) {
        record.preview_path = Some(self.0.path.clone());
        record.preview_size = Some(self.0.size);
        record.preview_time = self.0.source_time;
    }
}

/// Waveform image written for a record.
#[derive(Clone, Debug, PartialEq)]
pub struct WaveformUpdate(pub ArtifactUpdate);

impl WaveformUpdate {
    pub fn apply(&self, record: &mut MediaRecord) {
        record.waveform_path = Some(self.0.path.clone());
        record.waveform_size = Some(self.0.size);
        record.waveform_time = self.0.source_time;
    }
}

// ---- Loose numeric fields from ffprobe JSON ----

/// ffprobe writes many numbers as strings ("25.000"). Accept either form; drop anything else.
pub(crate) fn de_loose_f64<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::Number(n)) => n.as_f64(),
        Some(serde_json::Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    })
}

/// Same as [`de_loose_f64`] for booleans ("true"/"false" or bool).
pub(crate) fn de_loose_bool<'de, D>(deserializer: D) -> Result<Option<bool>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::Bool(b)) => Some(b),
        Some(serde_json::Value::String(s)) => s.trim().parse::<bool>().ok(),
        Some(serde_json::Value::Number(n)) => n.as_i64().map(|v| v != 0),
        _ => None,
    })
}
