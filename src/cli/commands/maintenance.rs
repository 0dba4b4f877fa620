//! Status, cleanup and config file commands.

use std::path::Path;

use tokio::runtime::Runtime;
use tracing::{debug, warn};

use crate::cache::LookupCache;
use crate::config::{self, Config};
use crate::db;
use crate::engine::RAW_PREFIX;
use crate::progress::format_bytes;
use crate::provider::validate_cookies_file;
use crate::state::StateStore;

const ERRORS_SHOWN: usize = 10;

/// Print state store totals, recent errors, cache size and cookie status.
pub fn cmd_status(rt: &Runtime, config: &Config) -> anyhow::Result<()> {
    let db_path = &config.paths.state_db;
    if !db_path.exists() {
        println!("No state database at {}", db_path.display());
        println!("Run `resonance download` first.");
        return Ok(());
    }

    rt.block_on(async {
        let pool = db::init_db(&db::db_url(Some(db_path))).await?;
        let state = StateStore::new(pool.clone());
        let cache = LookupCache::new(pool);

        let stats = state.get_stats().await?;
        println!("Download State");
        println!("==============");
        println!("Database:        {}", db_path.display());
        println!("Tracked:         {}", stats.total());
        println!("  ✓ Done:        {}", stats.ok);
        println!("  - Skipped:     {}", stats.skip);
        println!("  ✗ Errors:      {}", stats.error);
        println!("Written:         {}", format_bytes(stats.bytes.max(0) as u64));
        println!("Cached lookups:  {}", cache.count().await?);
        println!("Cookies:         {}", cookie_status(&config.paths.cookies_file));

        let errors = state.errors().await?;
        if !errors.is_empty() {
            println!();
            println!("Tracks with errors:");
            for record in errors.iter().take(ERRORS_SHOWN) {
                println!(
                    "  {} (tries: {}) - {}",
                    record.track_id,
                    record.retry_count,
                    record.last_error.as_deref().unwrap_or("unknown error")
                );
            }
            if errors.len() > ERRORS_SHOWN {
                println!("  ... and {} more", errors.len() - ERRORS_SHOWN);
            }
        }
        if config.paths.failed_csv.is_file() {
            println!();
            println!(
                "Retry list: {} (run `resonance retry`)",
                config.paths.failed_csv.display()
            );
        }
        anyhow::Ok(())
    })
}

fn cookie_status(path: &Path) -> String {
    if !path.is_file() {
        "none".to_string()
    } else if validate_cookies_file(path) {
        format!("{} (valid)", path.display())
    } else {
        format!("{} (not a Netscape cookie file, ignored)", path.display())
    }
}

/// Clear the selected kinds of saved state. With no selection, clears all.
pub fn cmd_clear(
    rt: &Runtime,
    config: &Config,
    cache: bool,
    progress: bool,
    temp: bool,
) -> anyhow::Result<()> {
    let all = !(cache || progress || temp);
    let db_path = &config.paths.state_db;

    if (all || cache || progress) && db_path.exists() {
        rt.block_on(async {
            let pool = db::init_db(&db::db_url(Some(db_path))).await?;
            if all || progress {
                let removed = StateStore::new(pool.clone()).clear().await?;
                println!("Cleared {} progress record(s)", removed);
            }
            if all || cache {
                let removed = LookupCache::new(pool).clear().await?;
                println!("Cleared {} cached lookup(s)", removed);
            }
            anyhow::Ok(())
        })?;
    } else if cache || progress {
        println!("No state database at {}", db_path.display());
    }

    if all || temp {
        let removed = clear_temp(&config.paths.temp_dir)?;
        println!("Removed {} leftover download(s)", removed);
    }
    Ok(())
}

/// Delete raw downloads left behind in `dir`. Returns how many went.
fn clear_temp(dir: &Path) -> std::io::Result<usize> {
    if !dir.is_dir() {
        return Ok(0);
    }
    let mut removed = 0;
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        if !name.to_string_lossy().starts_with(RAW_PREFIX) || !entry.path().is_file() {
            continue;
        }
        match std::fs::remove_file(entry.path()) {
            Ok(()) => {
                debug!(target: "cli", path = %entry.path().display(), "removed raw download");
                removed += 1;
            }
            Err(e) => warn!(target: "cli", path = %entry.path().display(), error = %e, "could not remove"),
        }
    }
    Ok(removed)
}

/// Write a config file holding the defaults.
pub fn cmd_config_init(path: Option<&Path>, force: bool) -> anyhow::Result<()> {
    let target = match path {
        Some(p) => p.to_path_buf(),
        None => config::config_path()
            .ok_or_else(|| anyhow::anyhow!("could not determine config directory"))?,
    };
    if target.exists() && !force {
        println!(
            "Config already exists at {} (use --force to overwrite)",
            target.display()
        );
        return Ok(());
    }

    let written = config::save(&Config::default(), Some(&target))?;
    println!("Wrote default config to {}", written.display());
    Ok(())
}

/// Print the effective configuration as TOML.
pub fn cmd_config_show(path: Option<&Path>, config: &Config) -> anyhow::Result<()> {
    if let Some(path) = path.map(Path::to_path_buf).or_else(config::config_path) {
        println!("# {}", path.display());
    }
    print!("{}", toml::to_string_pretty(config)?);
    Ok(())
}
