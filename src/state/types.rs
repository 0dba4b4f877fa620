//! Progress ledger types.

use chrono::{DateTime, Utc};

/// Recorded outcome of a track.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackStatus {
    /// Every requested tier was written
    Ok,
    /// Nothing written this time: files already valid, or the user skipped it
    Skip,
    /// Attempts exhausted or a fatal error
    Error,
}

impl TrackStatus {
    /// Convert to string representation for storage.
    pub fn as_str(&self) -> &'static str {
        match self {
            TrackStatus::Ok => "ok",
            TrackStatus::Skip => "skip",
            TrackStatus::Error => "error",
        }
    }

    /// Get symbol for display.
    pub fn symbol(&self) -> &'static str {
        match self {
            TrackStatus::Ok => "✓",
            TrackStatus::Skip => "→",
            TrackStatus::Error => "✗",
        }
    }
}

impl std::str::FromStr for TrackStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ok" => Ok(TrackStatus::Ok),
            "skip" => Ok(TrackStatus::Skip),
            "error" => Ok(TrackStatus::Error),
            other => Err(format!("unknown track status: {other}")),
        }
    }
}

/// One row of the ledger.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressRecord {
    pub track_id: String,
    pub status: TrackStatus,
    /// Bytes written across every successful mark
    pub bytes: i64,
    /// Cleared by a later `ok`/`skip`
    pub last_error: Option<String>,
    pub updated_at: DateTime<Utc>,
    /// Number of `error` marks
    pub retry_count: i64,
}

/// Ledger totals by status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StateStats {
    pub ok: i64,
    pub skip: i64,
    pub error: i64,
    /// Sum of bytes over all rows
    pub bytes: i64,
}

impl StateStats {
    pub fn total(&self) -> i64 {
        self.ok + self.skip + self.error
    }
}
