//! Test utilities and fixtures shared across module tests.
//!
//! Provides a throwaway database, a stock track, and in-memory stand-ins for
//! every collaborator seam so pipeline tests never touch the network or
//! spawn external tools.
//!
//! # Example
//!
//! ```ignore
//! use crate::test_utils::{temp_db, mock_track, MockResolver};
//!
//! #[tokio::test]
//! async fn test_something() {
//!     let (pool, _dir) = temp_db().await;
//!     let track = mock_track();
//!     // ... test logic
//! }
//! ```

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use sqlx::sqlite::SqlitePool;
use tempfile::TempDir;

use crate::engine::tools::{ToolError, TranscodeJob};
use crate::engine::{CancelCheck, MediaToolkit, TrackDownloader};
use crate::error::DownloadError;
use crate::model::{Candidate, DownloadOutcome, SearchResult, TrackDescriptor};
use crate::progress::{BatchPreview, LogLevel, ProgressSink, TaskId};
use crate::provider::{ProviderError, RequestOptions, SourceProvider};
use crate::resolver::TrackResolver;

/// Creates a temporary database for testing.
///
/// The database lives in a temporary directory that is removed when the
/// returned `TempDir` is dropped. Migrations are run automatically.
///
/// ```ignore
/// let (pool, _dir) = temp_db().await;
/// // Database is deleted when _dir goes out of scope
/// ```
pub async fn temp_db() -> (SqlitePool, TempDir) {
    let dir = tempfile::tempdir().expect("Failed to create temp directory");
    let db_url = crate::db::db_url(Some(&dir.path().join("test.db")));

    let pool = crate::db::init_db(&db_url)
        .await
        .expect("Failed to initialize test database");

    (pool, dir)
}

/// A track with sensible defaults. Customize with struct update syntax:
///
/// ```ignore
/// let custom = TrackDescriptor {
///     isrc: Some("USRC17607839".into()),
///     ..mock_track()
/// };
/// ```
pub fn mock_track() -> TrackDescriptor {
    TrackDescriptor {
        album: "Test Album".to_string(),
        duration_ms: Some(180_000),
        ..TrackDescriptor::new("Test Artist", "Test Track")
    }
}

/// Numbered variant of [`mock_track`] with a distinct id.
pub fn mock_track_n(n: usize) -> TrackDescriptor {
    TrackDescriptor {
        title: format!("Test Track {n}"),
        ..mock_track()
    }
}

fn hit_for_default() -> Candidate {
    Candidate {
        url: "https://www.youtube.com/watch?v=mock".to_string(),
        title: "Test Artist - Test Track".to_string(),
        duration: Some(180.0),
    }
}

// ============================================================================
// Source provider
// ============================================================================

/// In-memory [`SourceProvider`].
///
/// Search returns the configured candidates (one matching hit by default);
/// fetch writes a small fake raw file next to the requested stem.
pub struct MockProvider {
    results: Result<Vec<Candidate>, ProviderError>,
    fetch_error: Option<ProviderError>,
    queries: Mutex<Vec<String>>,
    fetches: AtomicUsize,
}

impl Default for MockProvider {
    fn default() -> Self {
        Self {
            results: Ok(vec![hit_for_default()]),
            fetch_error: None,
            queries: Mutex::new(Vec::new()),
            fetches: AtomicUsize::new(0),
        }
    }
}

impl MockProvider {
    pub const RAW_BYTES: usize = 4096;

    pub fn with_results(results: Vec<Candidate>) -> Self {
        Self {
            results: Ok(results),
            ..Self::default()
        }
    }

    pub fn with_search_error(error: ProviderError) -> Self {
        Self {
            results: Err(error),
            ..Self::default()
        }
    }

    pub fn with_fetch_error(mut self, error: ProviderError) -> Self {
        self.fetch_error = Some(error);
        self
    }

    pub fn search_count(&self) -> usize {
        self.queries.lock().len()
    }

    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().clone()
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SourceProvider for MockProvider {
    async fn search(
        &self,
        query: &str,
        limit: usize,
        _opts: &RequestOptions,
    ) -> Result<Vec<Candidate>, ProviderError> {
        self.queries.lock().push(query.to_string());
        let mut results = self.results.clone()?;
        results.truncate(limit);
        Ok(results)
    }

    async fn fetch_audio(
        &self,
        _url: &str,
        dest_stem: &Path,
        _opts: &RequestOptions,
    ) -> Result<PathBuf, ProviderError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if let Some(ref error) = self.fetch_error {
            return Err(error.clone());
        }
        let mut name = dest_stem.as_os_str().to_owned();
        name.push(".webm");
        let path = PathBuf::from(name);
        std::fs::write(&path, vec![0u8; Self::RAW_BYTES])
            .map_err(|e| ProviderError::new(crate::provider::FailureReason::Other, e.to_string()))?;
        Ok(path)
    }
}

// ============================================================================
// Media toolkit
// ============================================================================

/// In-memory [`MediaToolkit`]: transcodes write a fixed-size file, probes
/// return configured values.
pub struct MockToolkit {
    duration: Option<f64>,
    rms: Result<f64, String>,
    fail_pattern: Option<String>,
    transcodes: AtomicUsize,
}

impl Default for MockToolkit {
    fn default() -> Self {
        Self {
            duration: Some(180.0),
            rms: Ok(-50.0),
            fail_pattern: None,
            transcodes: AtomicUsize::new(0),
        }
    }
}

impl MockToolkit {
    /// Size of every file a successful transcode writes.
    pub const OUTPUT_BYTES: usize = 64_000;

    /// `None` makes every duration probe fail.
    pub fn with_duration(mut self, duration: Option<f64>) -> Self {
        self.duration = duration;
        self
    }

    pub fn with_rms(mut self, rms: Result<f64, String>) -> Self {
        self.rms = rms;
        self
    }

    /// Fail transcodes whose output path contains `pattern`, leaving a
    /// partial file behind.
    pub fn failing_for(mut self, pattern: &str) -> Self {
        self.fail_pattern = Some(pattern.to_string());
        self
    }

    pub fn transcode_count(&self) -> usize {
        self.transcodes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MediaToolkit for MockToolkit {
    async fn probe_duration(&self, _path: &Path) -> Result<f64, ToolError> {
        self.duration.ok_or_else(|| ToolError::Parse {
            tool: "ffprobe".into(),
            message: "no duration".into(),
        })
    }

    async fn transcode(&self, _input: &Path, output: &Path, _job: &TranscodeJob) -> Result<(), ToolError> {
        self.transcodes.fetch_add(1, Ordering::SeqCst);
        if let Some(ref pattern) = self.fail_pattern
            && output.to_string_lossy().contains(pattern.as_str())
        {
            let _ = std::fs::write(output, b"partial");
            return Err(ToolError::Failed {
                tool: "ffmpeg".into(),
                code: Some(1),
                stderr: "Conversion failed!".into(),
            });
        }
        std::fs::write(output, vec![0u8; Self::OUTPUT_BYTES]).map_err(|e| ToolError::Failed {
            tool: "ffmpeg".into(),
            code: None,
            stderr: e.to_string(),
        })
    }

    async fn high_band_rms(&self, _path: &Path, _cutoff_hz: u32) -> Result<f64, ToolError> {
        self.rms.clone().map_err(|stderr| ToolError::Failed {
            tool: "ffmpeg".into(),
            code: Some(1),
            stderr,
        })
    }
}

// ============================================================================
// Orchestrator seams
// ============================================================================

type Script<T> = Mutex<HashMap<String, VecDeque<Result<T, DownloadError>>>>;

fn next_scripted<T>(script: &Script<T>, track_id: &str) -> Option<Result<T, DownloadError>> {
    script.lock().get_mut(track_id).and_then(|queue| queue.pop_front())
}

/// [`TrackResolver`] answering from per-track scripts, then succeeding.
#[derive(Default)]
pub struct MockResolver {
    script: Script<SearchResult>,
    calls: AtomicUsize,
    per_track: Mutex<HashMap<String, usize>>,
}

impl MockResolver {
    /// Queue answers for `track_id`; once used up, resolves normally.
    pub fn script(self, track_id: &str, answers: Vec<Result<SearchResult, DownloadError>>) -> Self {
        self.script
            .lock()
            .insert(track_id.to_string(), answers.into_iter().collect());
        self
    }

    /// Total resolve calls.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn calls_for(&self, track_id: &str) -> usize {
        self.per_track.lock().get(track_id).copied().unwrap_or(0)
    }
}

#[async_trait]
impl TrackResolver for MockResolver {
    async fn resolve(&self, track: &TrackDescriptor, _attempt: u32) -> Result<SearchResult, DownloadError> {
        let id = track.track_id();
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.per_track.lock().entry(id.clone()).or_default() += 1;

        next_scripted(&self.script, &id).unwrap_or_else(|| {
            Ok(SearchResult {
                source_url: format!("https://www.youtube.com/watch?v={id}"),
                resolved_title: track.display_name(),
                resolved_duration: track.duration_secs(),
                from_cache: false,
            })
        })
    }
}

/// [`TrackDownloader`] answering from per-track scripts, then completing
/// with [`MockDownloader::BYTES`].
#[derive(Default)]
pub struct MockDownloader {
    script: Script<DownloadOutcome>,
    delay: Option<Duration>,
    panic_title: Option<String>,
    calls: AtomicUsize,
}

impl MockDownloader {
    pub const BYTES: u64 = 1_000;

    pub fn script(self, track_id: &str, answers: Vec<Result<DownloadOutcome, DownloadError>>) -> Self {
        self.script
            .lock()
            .insert(track_id.to_string(), answers.into_iter().collect());
        self
    }

    /// Sleep this long before answering, polling the cancel check.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Panic when asked for the track with this title.
    pub fn panicking_on(mut self, title: &str) -> Self {
        self.panic_title = Some(title.to_string());
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TrackDownloader for MockDownloader {
    async fn download(
        &self,
        _source: &SearchResult,
        track: &TrackDescriptor,
        cancel: CancelCheck<'_>,
        _subfolder: Option<&str>,
    ) -> Result<DownloadOutcome, DownloadError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.panic_title.as_deref() == Some(track.title.as_str()) {
            panic!("downloader blew up on {}", track.title);
        }
        if let Some(delay) = self.delay {
            let step = Duration::from_millis(5);
            let mut waited = Duration::ZERO;
            while waited < delay {
                if cancel() {
                    return Ok(DownloadOutcome::cancelled());
                }
                tokio::time::sleep(step).await;
                waited += step;
            }
        }
        next_scripted(&self.script, &track.track_id())
            .unwrap_or(Ok(DownloadOutcome::completed(Self::BYTES, false)))
    }
}

/// [`ProgressSink`] that records everything it is told.
pub struct RecordingSink {
    answer: bool,
    next_task: AtomicU64,
    advanced: AtomicU64,
    logs: Mutex<Vec<(LogLevel, String)>>,
    statuses: Mutex<Vec<(TaskId, String)>>,
    previews: Mutex<Vec<BatchPreview>>,
}

impl Default for RecordingSink {
    fn default() -> Self {
        Self::answering(true)
    }
}

impl RecordingSink {
    /// Sink whose confirmation prompt returns `answer`.
    pub fn answering(answer: bool) -> Self {
        Self {
            answer,
            next_task: AtomicU64::new(0),
            advanced: AtomicU64::new(0),
            logs: Mutex::new(Vec::new()),
            statuses: Mutex::new(Vec::new()),
            previews: Mutex::new(Vec::new()),
        }
    }

    pub fn tasks_created(&self) -> u64 {
        self.next_task.load(Ordering::SeqCst)
    }

    pub fn advanced(&self) -> u64 {
        self.advanced.load(Ordering::SeqCst)
    }

    pub fn logs(&self) -> Vec<(LogLevel, String)> {
        self.logs.lock().clone()
    }

    pub fn statuses(&self) -> Vec<(TaskId, String)> {
        self.statuses.lock().clone()
    }

    pub fn previews(&self) -> Vec<BatchPreview> {
        self.previews.lock().clone()
    }
}

impl ProgressSink for RecordingSink {
    fn task_created(&self, _label: &str) -> TaskId {
        self.next_task.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn task_status(&self, task: TaskId, status: &str) {
        self.statuses.lock().push((task, status.to_string()));
    }

    fn advance(&self, n: u64) {
        self.advanced.fetch_add(n, Ordering::SeqCst);
    }

    fn log(&self, level: LogLevel, message: &str) {
        self.logs.lock().push((level, message.to_string()));
    }

    fn confirm(&self, preview: &BatchPreview) -> bool {
        self.previews.lock().push(preview.clone());
        self.answer
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_temp_db_creates_working_database() {
        let (pool, _dir) = temp_db().await;
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM progress")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count.0, 0);
    }

    #[test]
    fn test_mock_track_defaults() {
        let track = mock_track();
        assert_eq!(track.title, "Test Track");
        assert_eq!(track.artist, "Test Artist");
        assert_eq!(track.duration_secs(), Some(180.0));
        assert_ne!(mock_track_n(1).track_id(), mock_track_n(2).track_id());
    }

    #[tokio::test]
    async fn test_mock_resolver_script_then_default() {
        let track = mock_track();
        let resolver = MockResolver::default()
            .script(&track.track_id(), vec![Err(DownloadError::Network("x".into()))]);

        assert!(resolver.resolve(&track, 1).await.is_err());
        assert!(resolver.resolve(&track, 2).await.is_ok());
        assert_eq!(resolver.calls_for(&track.track_id()), 2);
    }

    #[tokio::test]
    async fn test_mock_provider_fetch_writes_raw() {
        let dir = tempfile::tempdir().unwrap();
        let provider = MockProvider::default();
        let path = provider
            .fetch_audio("u", &dir.path().join("ytraw_x"), &RequestOptions::new(Duration::from_secs(1)))
            .await
            .unwrap();

        assert_eq!(path, dir.path().join("ytraw_x.webm"));
        assert_eq!(std::fs::metadata(&path).unwrap().len(), MockProvider::RAW_BYTES as u64);
    }
}
