//! Mediascan CLI: serve, scan one file, index the tree, list, toggle manual mode.

use anyhow::Result;
use clap::Parser;
use mediascan::engine::arg_parser::Cli;
use mediascan::engine::handle_run;
use std::time::Instant;

fn main() -> Result<()> {
    let start_time = Instant::now();
    let cli = Cli::parse();
    handle_run(&cli)?;
    log::debug!("Total time: {:?}", start_time.elapsed());
    Ok(())
}
