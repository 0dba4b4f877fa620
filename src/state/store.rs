//! SQLite-backed progress ledger.
//!
//! Concurrent workers share one pool; each mark is a single upsert
//! statement, so SQLite serializes writes per row without extra locking.

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqlitePool;

use super::types::{ProgressRecord, StateStats, TrackStatus};

// ============================================================================
// Database Row Types
// ============================================================================

/// Database row for progress table.
#[derive(Debug, sqlx::FromRow)]
struct ProgressRow {
    track_id: String,
    status: String,
    bytes: i64,
    last_error: Option<String>,
    updated_at: String,
    retry_count: i64,
}

impl From<ProgressRow> for ProgressRecord {
    fn from(row: ProgressRow) -> Self {
        ProgressRecord {
            track_id: row.track_id,
            status: row.status.parse().unwrap_or(TrackStatus::Error),
            bytes: row.bytes,
            last_error: row.last_error,
            updated_at: DateTime::parse_from_rfc3339(&row.updated_at)
                .map(|t| t.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now()),
            retry_count: row.retry_count,
        }
    }
}

/// Persistent per-track status ledger.
#[derive(Debug, Clone)]
pub struct StateStore {
    pool: SqlitePool,
}

impl StateStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Record an outcome for `track_id`.
    ///
    /// Creates the row on first mark. Later marks replace the status, add
    /// `bytes` to the running total, bump `retry_count` only for `error`,
    /// and clear `last_error` on `ok`/`skip`.
    pub async fn mark(
        &self,
        track_id: &str,
        status: TrackStatus,
        bytes: u64,
        error: Option<&str>,
    ) -> sqlx::Result<()> {
        let (last_error, retry_increment) = match status {
            TrackStatus::Error => (Some(error.unwrap_or("unknown error")), 1_i64),
            TrackStatus::Ok | TrackStatus::Skip => (None, 0_i64),
        };
        let bytes = i64::try_from(bytes).unwrap_or(i64::MAX);

        sqlx::query(
            r#"
            INSERT INTO progress (track_id, status, bytes, last_error, updated_at, retry_count)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(track_id) DO UPDATE SET
                status = excluded.status,
                bytes = progress.bytes + excluded.bytes,
                last_error = excluded.last_error,
                updated_at = excluded.updated_at,
                retry_count = progress.retry_count + excluded.retry_count
            "#,
        )
        .bind(track_id)
        .bind(status.as_str())
        .bind(bytes)
        .bind(last_error)
        .bind(Utc::now().to_rfc3339())
        .bind(retry_increment)
        .execute(&self.pool)
        .await?;

        tracing::debug!(target: "state", track = %track_id, status = status.as_str(), bytes, "marked");
        Ok(())
    }

    /// True only when the latest mark for `track_id` is `ok`.
    pub async fn is_done(&self, track_id: &str) -> sqlx::Result<bool> {
        let row: Option<(String,)> = sqlx::query_as("SELECT status FROM progress WHERE track_id = ?")
            .bind(track_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(matches!(row, Some((status,)) if status == TrackStatus::Ok.as_str()))
    }

    /// Get the ledger row for a track, if any.
    pub async fn get(&self, track_id: &str) -> sqlx::Result<Option<ProgressRecord>> {
        let row: Option<ProgressRow> = sqlx::query_as("SELECT * FROM progress WHERE track_id = ?")
            .bind(track_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|r| r.into()))
    }

    /// Counts by status plus total bytes.
    pub async fn get_stats(&self) -> sqlx::Result<StateStats> {
        let rows: Vec<(String, i64, i64)> = sqlx::query_as(
            "SELECT status, COUNT(*), COALESCE(SUM(bytes), 0) FROM progress GROUP BY status",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut stats = StateStats::default();
        for (status, count, bytes) in rows {
            stats.bytes += bytes;
            match status.parse() {
                Ok(TrackStatus::Ok) => stats.ok = count,
                Ok(TrackStatus::Skip) => stats.skip = count,
                Ok(TrackStatus::Error) => stats.error = count,
                Err(_) => {}
            }
        }

        Ok(stats)
    }

    /// All `error` rows, most recently updated first.
    pub async fn errors(&self) -> sqlx::Result<Vec<ProgressRecord>> {
        let rows: Vec<ProgressRow> = sqlx::query_as(
            "SELECT * FROM progress WHERE status = 'error' ORDER BY updated_at DESC, track_id",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|r| r.into()).collect())
    }

    /// Forget every track. Returns the number of rows removed.
    pub async fn clear(&self) -> sqlx::Result<u64> {
        let result = sqlx::query("DELETE FROM progress").execute(&self.pool).await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::temp_db;

    #[tokio::test]
    async fn test_mark_and_get() {
        let (pool, _dir) = temp_db().await;
        let store = StateStore::new(pool);

        store.mark("t1", TrackStatus::Ok, 1_000, None).await.unwrap();

        let record = store.get("t1").await.unwrap().unwrap();
        assert_eq!(record.status, TrackStatus::Ok);
        assert_eq!(record.bytes, 1_000);
        assert_eq!(record.retry_count, 0);
        assert_eq!(record.last_error, None);
        assert!(store.get("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_ok_twice_accumulates_bytes() {
        let (pool, _dir) = temp_db().await;
        let store = StateStore::new(pool);

        store.mark("t1", TrackStatus::Ok, 1_000, None).await.unwrap();
        store.mark("t1", TrackStatus::Ok, 500, None).await.unwrap();

        let record = store.get("t1").await.unwrap().unwrap();
        assert_eq!(record.bytes, 1_500);
        assert_eq!(store.get_stats().await.unwrap().ok, 1);
    }

    #[tokio::test]
    async fn test_error_twice_increments_retry_count() {
        let (pool, _dir) = temp_db().await;
        let store = StateStore::new(pool);

        store
            .mark("t1", TrackStatus::Error, 0, Some("first"))
            .await
            .unwrap();
        store
            .mark("t1", TrackStatus::Error, 0, Some("second"))
            .await
            .unwrap();

        let record = store.get("t1").await.unwrap().unwrap();
        assert_eq!(record.retry_count, 2);
        assert_eq!(record.last_error.as_deref(), Some("second"));
    }

    #[tokio::test]
    async fn test_success_clears_last_error() {
        let (pool, _dir) = temp_db().await;
        let store = StateStore::new(pool);

        store
            .mark("t1", TrackStatus::Error, 0, Some("HTTP 429"))
            .await
            .unwrap();
        store.mark("t1", TrackStatus::Ok, 42, None).await.unwrap();

        let record = store.get("t1").await.unwrap().unwrap();
        assert_eq!(record.status, TrackStatus::Ok);
        assert_eq!(record.last_error, None);
        assert_eq!(record.retry_count, 1);
        assert_eq!(record.bytes, 42);
    }

    #[tokio::test]
    async fn test_is_done_only_after_ok() {
        let (pool, _dir) = temp_db().await;
        let store = StateStore::new(pool);

        assert!(!store.is_done("t1").await.unwrap());

        store.mark("t1", TrackStatus::Skip, 0, None).await.unwrap();
        assert!(!store.is_done("t1").await.unwrap());

        store
            .mark("t1", TrackStatus::Error, 0, Some("boom"))
            .await
            .unwrap();
        assert!(!store.is_done("t1").await.unwrap());

        store.mark("t1", TrackStatus::Ok, 10, None).await.unwrap();
        assert!(store.is_done("t1").await.unwrap());
    }

    #[tokio::test]
    async fn test_stats_and_clear() {
        let (pool, _dir) = temp_db().await;
        let store = StateStore::new(pool);

        store.mark("a", TrackStatus::Ok, 100, None).await.unwrap();
        store.mark("b", TrackStatus::Ok, 200, None).await.unwrap();
        store.mark("c", TrackStatus::Skip, 0, None).await.unwrap();
        store
            .mark("d", TrackStatus::Error, 0, Some("nope"))
            .await
            .unwrap();

        let stats = store.get_stats().await.unwrap();
        assert_eq!(
            stats,
            StateStats {
                ok: 2,
                skip: 1,
                error: 1,
                bytes: 300
            }
        );

        let errors = store.errors().await.unwrap();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].track_id, "d");

        assert_eq!(store.clear().await.unwrap(), 4);
        assert_eq!(store.get_stats().await.unwrap(), StateStats::default());
    }

    #[tokio::test]
    async fn test_concurrent_marks_for_different_tracks() {
        let (pool, _dir) = temp_db().await;
        let store = StateStore::new(pool);

        let mut handles = Vec::new();
        for i in 0..20 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .mark(&format!("track-{i}"), TrackStatus::Ok, 10, None)
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let stats = store.get_stats().await.unwrap();
        assert_eq!(stats.ok, 20);
        assert_eq!(stats.bytes, 200);
    }
}
