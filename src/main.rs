//! Resonance - builds an offline audio library from playlist exports.
//!
//! Each track in a playlist CSV is matched to a video source, fetched once,
//! transcoded into one or two AAC quality tiers and tagged. Progress is kept
//! in SQLite so interrupted batches resume where they stopped.

mod cache;
mod cli;
mod config;
mod db;
mod engine;
mod enrichment;
mod error;
mod guard;
mod input;
mod metadata;
mod model;
mod orchestrator;
mod process;
mod progress;
mod provider;
mod resolver;
mod state;
#[cfg(test)]
mod test_utils;

use clap::Parser;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Log targets used across the crate besides the crate path itself.
const LOG_TARGETS: &[&str] = &[
    "resonance_builder",
    "batch",
    "cli",
    "engine",
    "enrichment",
    "guard",
    "input",
    "orchestrator",
    "process",
    "provider",
    "resolver",
    "state",
];

fn main() -> anyhow::Result<()> {
    let args = cli::Cli::parse();

    let level = if args.debug {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };
    let mut filter = EnvFilter::from_default_env();
    for target in LOG_TARGETS {
        filter = filter.add_directive(format!("{target}={level}").parse()?);
    }

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true))
        .with(filter)
        .init();

    cli::run_command(&args)
}
