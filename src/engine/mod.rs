//! Engine module: external tool invocation, analysis and the CLI

pub mod analyzer;
pub mod arg_parser;
pub mod diagnostics;
pub mod handlers;
pub mod limiter;
pub mod metadata;
pub mod probe;
pub mod process;
pub mod progress;
pub mod thumbnail;
pub mod timeline;
pub mod tools;

// Re-export commonly used items
pub use analyzer::{Analyzer, FfmpegAnalyzer, Tools};
pub use arg_parser::{Cli, Commands, CommonArgs};
pub use handlers::handle_run;
pub use limiter::ProcessLimiter;
pub use tools::{media_id, normalize_id, path_relative_to};
