//! Database bootstrap for the state store and lookup cache.
//!
//! Uses SQLx with SQLite for lightweight, embedded storage. Both the
//! per-track progress ledger and the resolver's lookup cache live in the
//! same file; schema comes from the embedded `migrations/` directory.
//!
//! # Example
//!
//! ```ignore
//! use resonance_builder::db::{db_url, init_db};
//!
//! let pool = init_db(&db_url(Some(Path::new("resonance.db")))).await?;
//! let store = StateStore::new(pool.clone());
//! ```

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};

/// Default database filename.
pub const DEFAULT_DB_NAME: &str = "resonance.db";

/// How long a connection waits on a locked database before failing.
const BUSY_TIMEOUT: Duration = Duration::from_secs(15);

/// Build a SQLite database URL from an optional path.
///
/// If no path is provided, uses [`DEFAULT_DB_NAME`] in the current directory.
pub fn db_url(path: Option<&Path>) -> String {
    match path {
        Some(p) => format!("sqlite:{}", p.display()),
        None => format!("sqlite:{}", DEFAULT_DB_NAME),
    }
}

/// Initialize the database connection pool and run migrations.
///
/// Creates the database file if it doesn't exist, enables WAL so concurrent
/// workers can read while one writes, and applies all pending migrations.
///
/// # Errors
///
/// Returns an error if:
/// - The URL is malformed
/// - Connection cannot be established
/// - Migration fails
pub async fn init_db(db_url: &str) -> crate::error::Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(db_url)?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(BUSY_TIMEOUT);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    sqlx::migrate!("./migrations").run(&pool).await?;

    Ok(pool)
}
