//! Mediascan: media library scanner. Watches a media tree, probes files with
//! ffprobe/ffmpeg, and keeps CLS lines, thumbnails, previews and waveforms in a
//! document store.

pub mod derive;
pub mod engine;
pub mod errors;
pub mod jobs;
pub mod pipeline;
pub mod scanner;
pub mod service;
pub mod store;
pub mod types;
pub mod utils;
pub mod watchdog;

/// Re-export types for API
pub use types::*;

pub use errors::{ProcessError, RequestError, ScanError, StoreError, WatchdogError};
pub use jobs::{JobKind, JobTracker};
pub use scanner::{ScanCoordinator, ScanOutcome};
pub use service::{MediaScanner, Services};
pub use store::{DocumentStore, SqliteStore};

/// Result alias used by the public mediascan API
pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, Error>;
