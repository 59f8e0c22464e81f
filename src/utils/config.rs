//! Application configuration: constants, lane names, and the `Config` tree loaded from
//! `.mediascan.toml` (see [`crate::utils::settings`]).

use serde::Deserialize;
use std::path::PathBuf;
use std::sync::OnceLock;
use std::time::Duration;

// ---- Package / paths (from CARGO_PKG_NAME, cached) ----

/// Package-derived file names: built once from `CARGO_PKG_NAME`, then cached.
pub struct PackagePaths {
    config_filename: String,
    db_filename: String,
}

static PACKAGE_PATHS: OnceLock<PackagePaths> = OnceLock::new();

impl PackagePaths {
    pub fn get() -> &'static PackagePaths {
        PACKAGE_PATHS.get_or_init(|| {
            let pkg = env!("CARGO_PKG_NAME");
            PackagePaths {
                config_filename: format!(".{pkg}.toml"),
                db_filename: format!("_{pkg}.db"),
            }
        })
    }

    pub fn config_filename(&self) -> &str {
        &self.config_filename
    }

    pub fn db_filename(&self) -> &str {
        &self.db_filename
    }
}

// ---- Process lanes ----

/// Lane names used with [`crate::engine::limiter::ProcessLimiter`]. One process per lane at a time.
pub struct Lanes;

impl Lanes {
    pub const PROBE: &'static str = "ffprobe";
    pub const THUMBNAIL: &'static str = "thumbnailFfmpeg";
    pub const FIELD_ORDER: &'static str = "fieldOrderFfmpeg";
    pub const METADATA: &'static str = "metadataFfmpeg";
    pub const PREVIEW: &'static str = "previewFfmpeg";
    pub const WAVEFORM: &'static str = "waveformFfmpeg";
    pub const WAVEFORM_CROP: &'static str = "waveformCropFfmpeg";
}

// ---- Fixed names and sizes ----

/// Attachment name of the thumbnail PNG.
pub const THUMBNAIL_ATTACHMENT: &str = "thumb.png";

/// Marker inserted into watchdog sentinel copies; derivation consumers skip such files.
pub const WATCHDOG_IGNORE_TAG: &str = "_watchdogIgnore_";

/// Page size for the dead-media sweep.
pub const DEAD_MEDIA_PAGE_SIZE: usize = 256;

/// Read buffer for forwarding child stdout/stderr chunks.
pub const PROCESS_READ_CHUNK_SIZE: usize = 8 * 1024;

/// Attempts when unlinking a file that reports EBUSY.
pub const REMOVE_RETRIES: u32 = 5;
pub const REMOVE_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Delay between a fatal watchdog verdict and process exit.
pub const WATCHDOG_GRACE: Duration = Duration::from_secs(1);

// ---- Environment overrides ----

pub struct EnvKeys;

impl EnvKeys {
    pub const RETRY_LIMIT: &'static str = "FILE_SCAN_RETRY_LIMIT";
    pub const WATCHDOG_CHECK_INTERVAL: &'static str = "MS_WATCHDOG_CHECK_INTERVAL";
    pub const WATCHDOG_EXPECT_TIME: &'static str = "MS_WATCHDOG_EXPECT_TIME";
}

// ---- Config tree ----

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub paths: PathsConfig,
    pub scanner: ScannerConfig,
    pub thumbnails: ThumbnailConfig,
    pub previews: PreviewConfig,
    pub waveforms: WaveformConfig,
    pub metadata: MetadataConfig,
    pub watchdog: WatchdogConfig,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Watched media root.
    pub media: PathBuf,
    /// Document store file. Default: `_mediascan.db` in the working directory.
    pub db: PathBuf,
    pub ffmpeg: PathBuf,
    pub ffprobe: PathBuf,
    pub previews: PathBuf,
    pub waveforms: PathBuf,
    /// Manual mode is on while this file exists.
    pub manual_mode_marker: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            media: PathBuf::from("media"),
            db: PathBuf::from(PackagePaths::get().db_filename()),
            ffmpeg: PathBuf::from("ffmpeg"),
            ffprobe: PathBuf::from("ffprobe"),
            previews: PathBuf::from("_previews"),
            waveforms: PathBuf::from("_waveforms"),
            manual_mode_marker: PathBuf::from(".manualMode"),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct ScannerConfig {
    /// Attempts per file before it is abandoned.
    pub retry_limit: u32,
    /// A file is handed to the scanner once its size has not changed for this long.
    pub stability_threshold_ms: u64,
    pub poll_interval_ms: u64,
    /// Exclude patterns (glob syntax, matched against file name and full path).
    pub exclude: Vec<String>,
    pub follow_links: bool,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            retry_limit: 3,
            stability_threshold_ms: 2000,
            poll_interval_ms: 1000,
            exclude: Vec::new(),
            follow_links: false,
        }
    }
}

impl ScannerConfig {
    pub fn stability_threshold(&self) -> Duration {
        Duration::from_millis(self.stability_threshold_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(10))
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct ThumbnailConfig {
    pub width: i32,
    /// -1 keeps the aspect ratio.
    pub height: i32,
}

impl Default for ThumbnailConfig {
    fn default() -> Self {
        Self {
            width: 256,
            height: -1,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct PreviewConfig {
    pub enable: bool,
    pub width: i32,
    pub height: i32,
    pub bitrate: String,
}

impl Default for PreviewConfig {
    fn default() -> Self {
        Self {
            enable: false,
            width: 160,
            height: -1,
            bitrate: "40k".to_string(),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct WaveformConfig {
    pub enable: bool,
    pub pixels_per_second: f64,
    pub height: u32,
    pub colors: String,
}

impl Default for WaveformConfig {
    fn default() -> Self {
        Self {
            enable: false,
            pixels_per_second: 10.0,
            height: 200,
            colors: "white|white".to_string(),
        }
    }
}

/// Probe analysis switches. `enable = false` skips mediainfo entirely (cinf only).
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct MetadataConfig {
    pub enable: bool,
    pub field_order: bool,
    pub field_order_scan_frames: u32,
    pub scenes: bool,
    pub scene_threshold: f64,
    pub black_detection: bool,
    pub black_duration: f64,
    pub black_ratio: f64,
    pub black_threshold: f64,
    pub freeze_detection: bool,
    pub freeze_noise: f64,
    pub freeze_duration: f64,
    pub merge_blacks_and_freezes: bool,
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            enable: true,
            field_order: false,
            field_order_scan_frames: 200,
            scenes: true,
            scene_threshold: 0.4,
            black_detection: true,
            black_duration: 2.0,
            black_ratio: 0.98,
            black_threshold: 0.1,
            freeze_detection: true,
            freeze_noise: 0.001,
            freeze_duration: 2.0,
            merge_blacks_and_freezes: true,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct WatchdogConfig {
    pub enable: bool,
    pub check_interval_ms: u64,
    /// Per-stage timeout for the sentinel add and remove to show up in the change feed.
    pub expect_time_ms: u64,
    /// Sentinel media file, relative to the media root.
    pub file: String,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            enable: true,
            check_interval_ms: 5 * 60 * 1000,
            expect_time_ms: 30 * 1000,
            file: "watchdog.mov".to_string(),
        }
    }
}

impl WatchdogConfig {
    pub fn check_interval(&self) -> Duration {
        Duration::from_millis(self.check_interval_ms)
    }

    pub fn expect_time(&self) -> Duration {
        Duration::from_millis(self.expect_time_ms)
    }
}
