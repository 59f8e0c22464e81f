//! Command handlers for serve, scan, index, cls and manual

use anyhow::{Context, Result};
use crossbeam_channel::bounded;
use log::{debug, info, warn};
use std::sync::Arc;
use std::time::Instant;

use crate::engine::arg_parser::{Cli, Commands, CommonArgs, Switch};
use crate::engine::progress::{finish_progress_bar, optional_bar, update_progress_bar};
use crate::pipeline::index_tree;
use crate::service::MediaScanner;
use crate::utils::config::Config;
use crate::utils::{load_config, setup_logging};

/// Setup logging, then config file + environment + CLI flags, in that order.
fn setup_operation(common: &CommonArgs) -> Result<Config> {
    setup_logging(common.verbose());
    let mut config = load_config(&common.config_path(), &common.config_dir())?;
    if let Some(media) = &common.media {
        config.paths.media = media.clone();
    }
    if let Some(db) = &common.db {
        config.paths.db = db.clone();
    }
    debug!(
        "{} CONFIG:{:#?}",
        env!("CARGO_PKG_NAME").to_uppercase(),
        config
    );
    Ok(config)
}

pub fn handle_run(cli: &Cli) -> Result<()> {
    let config = setup_operation(&cli.common)?;
    match &cli.command {
        Commands::Serve => handle_serve(config),
        Commands::Scan { file } => handle_scan(config, file),
        Commands::Index => handle_index(config, cli.common.verbose()),
        Commands::Cls => handle_cls(config),
        Commands::Manual { state } => handle_manual(config, *state),
    }
}

/// Run every service until Ctrl-C, then stop them and kill running tools.
pub fn handle_serve(config: Config) -> Result<()> {
    let scanner = Arc::new(MediaScanner::open(config)?);
    let services = scanner.start()?;

    let (stop_tx, stop_rx) = bounded::<()>(1);
    ctrlc::set_handler(move || {
        let _ = stop_tx.try_send(());
    })
    .context("install Ctrl-C handler")?;

    info!("Serving {}", scanner.media_root().display());
    let _ = stop_rx.recv();
    warn!("Interrupted, shutting down");
    services.stop()?;
    scanner.limiter().kill_all_and_clear_queue();
    Ok(())
}

/// Scan one file and print the resulting CLS line.
pub fn handle_scan(config: Config, file: &str) -> Result<()> {
    let scanner = MediaScanner::open(config)?;
    let line = scanner.scan_now(file);
    print!("{line}");
    if let Some(found) = scanner.lookup(file) {
        print!("{}", scanner.cinf(&found.id)?);
    }
    Ok(())
}

/// One synchronous pass over the whole tree.
pub fn handle_index(config: Config, verbose: bool) -> Result<()> {
    let start = Instant::now();
    let scanner = MediaScanner::open(config)?;
    let ctx = scanner.pipeline_context();
    let total = crate::pipeline::collect_media_files(&ctx).0.len();
    let bar = optional_bar(verbose, total);

    let (summary, walk) = index_tree(&ctx, scanner.coordinator(), |_| {
        if let Some(pb) = &bar {
            update_progress_bar(pb, 1);
        }
    })?;
    if let Some(pb) = &bar {
        finish_progress_bar(pb);
    }
    walk.log_skipped(verbose);
    info!(
        "Indexed {} files in {:.2?}: {} scanned, {} up to date, {} failed",
        summary.files,
        start.elapsed(),
        summary.scanned,
        summary.up_to_date,
        summary.failed
    );
    Ok(())
}

pub fn handle_cls(config: Config) -> Result<()> {
    let scanner = MediaScanner::open(config)?;
    print!("{}", scanner.cls()?);
    Ok(())
}

pub fn handle_manual(config: Config, state: Option<Switch>) -> Result<()> {
    let scanner = MediaScanner::open(config)?;
    let json = match state {
        Some(s) => scanner.set_manual_mode(s == Switch::On),
        None => scanner.manual_mode_json(),
    };
    println!("{json}");
    Ok(())
}
