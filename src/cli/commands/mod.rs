//! CLI command definitions and dispatch.
//!
//! Each subcommand is implemented in its own submodule:
//! - `download`: batch downloads and retries, with the console progress sink
//! - `maintenance`: status, clearing state, config files
//! - `tools`: external tool checks and the spectral probe

mod download;
mod maintenance;
mod tools;

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use tokio::runtime::Runtime;

use crate::config::{self, Config, QualityMode};

use download::{cmd_download, cmd_retry};
use maintenance::{cmd_clear, cmd_config_init, cmd_config_show, cmd_status};
use tools::{cmd_check_tools, cmd_probe};

/// Resonance: build an offline audio library from playlist exports
#[derive(Parser)]
#[command(name = "resonance", author, version, about, long_about = None)]
pub struct Cli {
    /// Config file (defaults to the user config directory)
    #[arg(long, global = true, env = "RESONANCE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long, global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Overrides shared by batch commands
#[derive(Args, Debug, Clone, Default)]
pub struct BatchArgs {
    /// Parallel workers
    #[arg(short, long)]
    pub workers: Option<usize>,
    /// Quality tiers to produce
    #[arg(short, long, value_enum)]
    pub mode: Option<QualityMode>,
    /// Attempts per track
    #[arg(short, long)]
    pub retries: Option<u32>,
    /// Start without asking for confirmation
    #[arg(short, long)]
    pub yes: bool,
    /// State database path
    #[arg(long)]
    pub db: Option<PathBuf>,
}

impl BatchArgs {
    /// Apply the flags on top of `config`.
    pub fn apply(&self, config: &mut Config) {
        if let Some(workers) = self.workers {
            config.download.max_workers = workers.max(1);
        }
        if let Some(mode) = self.mode {
            config.download.quality_mode = mode;
        }
        if let Some(retries) = self.retries {
            config.download.max_retries = retries.max(1);
        }
        if let Some(ref db) = self.db {
            config.paths.state_db = db.clone();
        }
    }
}

/// Available subcommands
#[derive(Subcommand)]
pub enum Commands {
    /// Download every track listed in one or more playlist CSVs
    Download {
        /// Playlist export files
        #[arg(required = true)]
        files: Vec<PathBuf>,
        #[command(flatten)]
        batch: BatchArgs,
    },
    /// Re-run the tracks that failed last time
    Retry {
        #[command(flatten)]
        batch: BatchArgs,
    },
    /// Show progress totals, recent errors and cache size
    Status {
        /// State database path
        #[arg(long)]
        db: Option<PathBuf>,
    },
    /// Clear saved state
    Clear {
        /// Forget cached search results
        #[arg(long)]
        cache: bool,
        /// Forget per-track progress
        #[arg(long)]
        progress: bool,
        /// Delete leftover raw downloads
        #[arg(long)]
        temp: bool,
        /// State database path
        #[arg(long)]
        db: Option<PathBuf>,
    },
    /// Check that yt-dlp, ffmpeg and ffprobe are installed
    CheckTools,
    /// Check whether an audio file really has high-frequency content
    Probe {
        /// Audio file to analyze
        path: PathBuf,
        /// High-pass cutoff in Hz
        #[arg(long)]
        cutoff: Option<u32>,
    },
    /// Manage the config file
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Write a config file with default values
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
    /// Print the effective configuration
    Show,
}

/// Run the parsed command.
pub fn run_command(cli: &Cli) -> anyhow::Result<()> {
    let mut config = config::load(cli.config.as_deref());

    match &cli.command {
        Commands::Download { files, batch } => {
            batch.apply(&mut config);
            let rt = Runtime::new()?;
            cmd_download(&rt, &config, files, batch.yes)
        }
        Commands::Retry { batch } => {
            batch.apply(&mut config);
            let rt = Runtime::new()?;
            cmd_retry(&rt, &config, batch.yes)
        }
        Commands::Status { db } => {
            if let Some(db) = db {
                config.paths.state_db = db.clone();
            }
            let rt = Runtime::new()?;
            cmd_status(&rt, &config)
        }
        Commands::Clear {
            cache,
            progress,
            temp,
            db,
        } => {
            if let Some(db) = db {
                config.paths.state_db = db.clone();
            }
            let rt = Runtime::new()?;
            cmd_clear(&rt, &config, *cache, *progress, *temp)
        }
        Commands::CheckTools => {
            let rt = Runtime::new()?;
            cmd_check_tools(&rt)
        }
        Commands::Probe { path, cutoff } => {
            let rt = Runtime::new()?;
            let cutoff = cutoff.unwrap_or(config.download.spectral_cutoff_hz);
            cmd_probe(&rt, path, cutoff, config.download.spectral_floor_db)
        }
        Commands::Config { action } => match action {
            ConfigAction::Init { force } => cmd_config_init(cli.config.as_deref(), *force),
            ConfigAction::Show => cmd_config_show(cli.config.as_deref(), &config),
        },
    }
}
