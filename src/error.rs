//! Application-wide error types.
//!
//! Library modules use specific error types via `thiserror`, while the
//! CLI uses `anyhow` for convenient error propagation.
//!
//! # Design
//!
//! - [`Error`]: Top-level application error enum
//! - [`DownloadError`]: Per-track failure taxonomy consumed by the orchestrator's
//!   retry loop. Every variant is either *fatal* (retrying is pointless) or
//!   *recoverable* (a later attempt may succeed).
//!
//! # Example
//!
//! ```ignore
//! use resonance_builder::error::{Error, Result};
//!
//! fn load(path: &Path) -> Result<Vec<TrackDescriptor>> {
//!     let tracks = input::read_playlist(path)?; // CSV and IO errors auto-convert
//!     Ok(tracks)
//! }
//! ```

use std::path::PathBuf;

use crate::provider::{FailureReason, ProviderError};

/// Application-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level application error.
///
/// Aggregates errors from all subsystems for unified handling.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// File I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Migration error
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// Tag reading/writing error
    #[error("Metadata error for {path}: {message}")]
    Metadata { path: PathBuf, message: String },

    /// Source provider failure outside a per-track attempt
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    /// Enrichment/identification error
    #[error("Enrichment error: {0}")]
    Enrichment(#[from] crate::enrichment::EnrichmentError),

    /// Playlist CSV read/write error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// JSON (history file, tool output) error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// File not found
    #[error("File not found: {0}")]
    NotFound(PathBuf),

    /// Invalid file format
    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Generic error with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Create a metadata error.
    pub fn metadata(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Metadata {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create a not found error.
    pub fn not_found(path: impl Into<PathBuf>) -> Self {
        Self::NotFound(path.into())
    }

    /// Create a config error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Add context to an error.
    pub fn context(self, ctx: impl Into<String>) -> Self {
        Self::WithContext {
            context: ctx.into(),
            source: Box::new(self),
        }
    }
}

/// Extension trait for adding context to Results.
pub trait ResultExt<T> {
    /// Add context to an error result.
    fn with_context(self, ctx: impl Into<String>) -> Result<T>;
}

impl<T> ResultExt<T> for Result<T> {
    fn with_context(self, ctx: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.context(ctx))
    }
}

impl<T> ResultExt<T> for std::result::Result<T, std::io::Error> {
    fn with_context(self, ctx: impl Into<String>) -> Result<T> {
        self.map_err(|e| Error::Io(e).context(ctx))
    }
}

impl<T> ResultExt<T> for std::result::Result<T, sqlx::Error> {
    fn with_context(self, ctx: impl Into<String>) -> Result<T> {
        self.map_err(|e| Error::Database(e).context(ctx))
    }
}

// ============================================================================
// Per-track failures
// ============================================================================

/// Why a single track attempt failed.
///
/// The orchestrator never inspects message text; it only asks
/// [`DownloadError::is_fatal`], [`DownloadError::is_rate_limit`] and
/// [`DownloadError::trips_circuit`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DownloadError {
    /// No acceptable candidate after every search strategy
    #[error("No matching source found: {0}")]
    NotFound(String),

    /// Content blocked by the rights holder
    #[error("Blocked by copyright claim: {0}")]
    Copyright(String),

    /// Content unavailable in this region
    #[error("Not available in this region: {0}")]
    GeoBlocked(String),

    /// Source requires sign-in or age verification
    #[error("Authentication required: {0}")]
    AuthRequired(String),

    /// Anything that escaped classification inside an attempt (panics included)
    #[error("Unexpected failure: {0}")]
    Unexpected(String),

    /// Search transport failed before producing an answer
    #[error("Search failed: {0}")]
    Search(String),

    /// HTTP 429 from the provider
    #[error("Rate limited (HTTP 429): {0}")]
    RateLimited(String),

    /// HTTP 403 from the provider
    #[error("Forbidden (HTTP 403): {0}")]
    Forbidden(String),

    /// Socket/connection failure
    #[error("Network error: {0}")]
    Network(String),

    /// Provider or tool exceeded its wall clock
    #[error("Timed out: {0}")]
    Timeout(String),

    /// Raw media fetch failed for an unclassified reason
    #[error("Download failed: {0}")]
    Fetch(String),

    /// One or more quality tiers failed to transcode
    #[error("Transcode failed: {0}")]
    Transcode(String),
}

impl DownloadError {
    /// Fatal errors end the track's attempts immediately.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            DownloadError::NotFound(_)
                | DownloadError::Copyright(_)
                | DownloadError::GeoBlocked(_)
                | DownloadError::AuthRequired(_)
                | DownloadError::Unexpected(_)
        )
    }

    /// Rate-limit responses get an extra cooldown before the next attempt.
    pub fn is_rate_limit(&self) -> bool {
        matches!(self, DownloadError::RateLimited(_))
    }

    /// Systemic failures (429/403) are reported to the circuit breaker.
    pub fn trips_circuit(&self) -> bool {
        matches!(
            self,
            DownloadError::RateLimited(_) | DownloadError::Forbidden(_)
        )
    }
}

impl From<ProviderError> for DownloadError {
    fn from(err: ProviderError) -> Self {
        let msg = err.message;
        match err.reason {
            FailureReason::NotFound => DownloadError::NotFound(msg),
            FailureReason::Copyright => DownloadError::Copyright(msg),
            FailureReason::GeoBlocked => DownloadError::GeoBlocked(msg),
            FailureReason::AuthRequired => DownloadError::AuthRequired(msg),
            FailureReason::RateLimited => DownloadError::RateLimited(msg),
            FailureReason::Forbidden => DownloadError::Forbidden(msg),
            FailureReason::Network => DownloadError::Network(msg),
            FailureReason::Timeout => DownloadError::Timeout(msg),
            FailureReason::ToolMissing => DownloadError::Unexpected(msg),
            FailureReason::Other => DownloadError::Search(msg),
        }
    }
}
