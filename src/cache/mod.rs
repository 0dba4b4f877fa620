//! Persistent lookup cache for resolved source references.
//!
//! Keys are either `isrc_<ISRC>` or a normalized free-text query. Entries
//! carry their write time; expiry is decided at read time against the
//! caller's TTL, so ISRC hits can be trusted far longer than text hits
//! without a background sweep.

use chrono::{DateTime, TimeZone, Utc};
use sqlx::sqlite::SqlitePool;

use crate::model::SearchResult;

/// Longest free-text key, in characters.
const MAX_QUERY_KEY_CHARS: usize = 100;

/// Cache key for an ISRC lookup.
pub fn isrc_key(isrc: &str) -> String {
    format!("isrc_{isrc}")
}

/// Cache key for a free-text query: lower-cased, trimmed, length-capped.
pub fn query_key(query: &str) -> String {
    query
        .trim()
        .to_lowercase()
        .chars()
        .take(MAX_QUERY_KEY_CHARS)
        .collect()
}

/// One cached resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct LookupCacheEntry {
    pub key: String,
    pub source_url: String,
    pub title: String,
    pub duration: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

impl LookupCacheEntry {
    pub fn new(key: impl Into<String>, result: &SearchResult) -> Self {
        Self {
            key: key.into(),
            source_url: result.source_url.clone(),
            title: result.resolved_title.clone(),
            duration: result.resolved_duration,
            timestamp: Utc::now(),
        }
    }

    pub fn to_search_result(&self) -> SearchResult {
        SearchResult {
            source_url: self.source_url.clone(),
            resolved_title: self.title.clone(),
            resolved_duration: self.duration,
            from_cache: true,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct CacheRow {
    key: String,
    source_url: String,
    title: String,
    duration: Option<f64>,
    cached_at: i64,
}

impl From<CacheRow> for LookupCacheEntry {
    fn from(row: CacheRow) -> Self {
        LookupCacheEntry {
            key: row.key,
            source_url: row.source_url,
            title: row.title,
            duration: row.duration,
            timestamp: Utc
                .timestamp_opt(row.cached_at, 0)
                .single()
                .unwrap_or_else(Utc::now),
        }
    }
}

/// TTL-bounded map from query key to source reference.
///
/// Shares the pool with the state store; SQLite handles concurrent
/// get/set from multiple workers.
#[derive(Debug, Clone)]
pub struct LookupCache {
    pool: SqlitePool,
}

impl LookupCache {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Entry for `key` if it was written within the last `ttl_hours`.
    pub async fn get(&self, key: &str, ttl_hours: u64) -> sqlx::Result<Option<LookupCacheEntry>> {
        let ttl_secs = i64::try_from(ttl_hours.saturating_mul(3600)).unwrap_or(i64::MAX);
        let cutoff = Utc::now().timestamp().saturating_sub(ttl_secs);

        let row: Option<CacheRow> =
            sqlx::query_as("SELECT * FROM lookup_cache WHERE key = ? AND cached_at > ?")
                .bind(key)
                .bind(cutoff)
                .fetch_optional(&self.pool)
                .await?;

        Ok(row.map(|r| r.into()))
    }

    /// Insert or replace the entry under its key.
    pub async fn set(&self, entry: &LookupCacheEntry) -> sqlx::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO lookup_cache (key, source_url, title, duration, cached_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET
                source_url = excluded.source_url,
                title = excluded.title,
                duration = excluded.duration,
                cached_at = excluded.cached_at
            "#,
        )
        .bind(&entry.key)
        .bind(&entry.source_url)
        .bind(&entry.title)
        .bind(entry.duration)
        .bind(entry.timestamp.timestamp())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Drop every entry. Returns the number removed.
    pub async fn clear(&self) -> sqlx::Result<u64> {
        let result = sqlx::query("DELETE FROM lookup_cache")
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    pub async fn count(&self) -> sqlx::Result<i64> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM lookup_cache")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.0)
    }
}
