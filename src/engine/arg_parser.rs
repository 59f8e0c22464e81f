use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};

use crate::utils::default_config_path;

struct DefaultArgs;

impl DefaultArgs {
    pub const DIR: &'static str = ".";
}

/// Media library scanner: watches a media tree and keeps probe results, thumbnails,
/// previews and waveforms in a document store.
#[derive(Clone, Parser)]
#[command(name = "mediascan")]
#[command(about = "Watch a media tree and index it with ffprobe/ffmpeg.")]
pub struct Cli {
    #[command(flatten)]
    pub common: CommonArgs,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Clone, Subcommand)]
pub enum Commands {
    /// Watch the media root and run every background service until Ctrl-C.
    Serve,
    /// Scan one file (path relative to the media root) and print its CLS line.
    Scan {
        #[arg(value_name = "FILE")]
        file: String,
    },
    /// Scan the whole media tree once and exit.
    Index,
    /// Print the CLS listing of the store.
    Cls,
    /// Show or set manual mode.
    Manual {
        #[arg(value_enum)]
        state: Option<Switch>,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum Switch {
    On,
    Off,
}

#[derive(Clone, Args)]
pub struct CommonArgs {
    /// Media root. Overrides `paths.media` from the config file.
    #[arg(long, global = true)]
    pub media: Option<PathBuf>,

    /// Document store file. Overrides `paths.db`.
    #[arg(long, global = true)]
    pub db: Option<PathBuf>,

    /// Config file. Default: `.mediascan.toml` in the working directory.
    #[arg(long, short = 'c', global = true)]
    pub config: Option<PathBuf>,

    /// Verbose output.
    #[arg(long, short = 'v', global = true, num_args = 0..=1, default_missing_value = "true", value_parser = clap::value_parser!(bool))]
    pub verbose: Option<bool>,
}

impl CommonArgs {
    pub fn verbose(&self) -> bool {
        self.verbose.unwrap_or(false)
    }

    /// Config path, defaulting to the package config file in the working directory.
    pub fn config_path(&self) -> PathBuf {
        self.config
            .clone()
            .unwrap_or_else(|| default_config_path(Path::new(DefaultArgs::DIR)))
    }

    /// Directory `.env` is read from: the config file's directory.
    pub fn config_dir(&self) -> PathBuf {
        match self.config_path().parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from(DefaultArgs::DIR),
        }
    }
}
