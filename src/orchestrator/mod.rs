//! Batch orchestration.
//!
//! Takes a deduplicated track list and drives it through resolve and
//! download with a fixed pool of workers sharing one FIFO queue:
//!
//! ```text
//! tracks ─▶ filter done ─▶ confirm ─▶ queue ─▶ N workers ─▶ state store
//!                                                  │
//!                                                  └─▶ progress sink
//! drain or quit ─▶ failed export ─▶ summary ─▶ history ─▶ playlist indexes
//! ```
//!
//! Every worker checks pause, quit and circuit health before dequeuing.
//! A track's own retries run inside [`attempt`]; a panic while handling one
//! track is contained and recorded as an unexpected failure.

pub mod attempt;
pub mod report;
pub mod signals;

use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use futures::FutureExt;
use parking_lot::Mutex;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::engine::{EngineConfig, TrackDownloader};
use crate::error::{DownloadError, Result};
use crate::guard::CircuitBreaker;
use crate::model::TrackDescriptor;
use crate::progress::{BatchPreview, LogLevel, ProgressSink, format_bytes};
use crate::resolver::TrackResolver;
use crate::state::{StateStats, StateStore, TrackStatus};

pub use attempt::{RetryPolicy, TrackOutcome};
pub use report::{FailedTrack, SessionRecord};
pub use signals::ControlSignals;

use attempt::Attempt;

/// Display names shown in the confirmation preview.
const PREVIEW_SAMPLE: usize = 5;

/// Batch settings.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub workers: usize,
    pub retry: RetryPolicy,
    /// Start without asking the sink for confirmation
    pub assume_yes: bool,
    /// Quality mode label for the preview and history
    pub mode: String,
    /// Tier roots that may receive playlist indexes
    pub output_roots: Vec<PathBuf>,
    pub failed_report: Option<PathBuf>,
    pub failed_csv: Option<PathBuf>,
    pub history_file: Option<PathBuf>,
    pub write_playlist_index: bool,
    /// After quit, how long in-flight tracks get before being aborted
    pub quit_grace: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            workers: 3,
            retry: RetryPolicy::default(),
            assume_yes: false,
            mode: String::new(),
            output_roots: Vec::new(),
            failed_report: None,
            failed_csv: None,
            history_file: None,
            write_playlist_index: false,
            quit_grace: Duration::from_secs(30),
        }
    }
}

impl From<&Config> for OrchestratorConfig {
    fn from(config: &Config) -> Self {
        let d = &config.download;
        let engine = EngineConfig::from(config);
        Self {
            workers: d.max_workers.max(1),
            retry: RetryPolicy {
                max_attempts: d.max_retries.max(1),
                backoff_base: d.retry_backoff(),
                rate_limit_cooldown: d.rate_limit_cooldown(),
            },
            assume_yes: false,
            mode: d.quality_mode.as_str().to_string(),
            output_roots: engine
                .tiers()
                .iter()
                .map(|t| engine.tier_root(*t).to_path_buf())
                .collect(),
            failed_report: Some(config.paths.failed_report.clone()),
            failed_csv: Some(config.paths.failed_csv.clone()),
            history_file: d.save_history.then(|| config.paths.history_file.clone()),
            write_playlist_index: d.write_playlist_index,
            ..Self::default()
        }
    }
}

/// What a batch did.
#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    pub preview: BatchPreview,
    /// False when nothing was pending or confirmation was declined
    pub started: bool,
    pub succeeded: u64,
    pub already_present: u64,
    pub user_skipped: u64,
    pub failed: u64,
    pub cancelled: u64,
    /// Succeeded from a source that failed the spectral probe
    pub suspect: u64,
    pub bytes: u64,
    /// Queued tracks never picked up because of quit
    pub remaining: usize,
    pub interrupted: bool,
    pub failed_tracks: Vec<FailedTrack>,
    /// State store totals after the batch
    pub stats: Option<StateStats>,
}

impl BatchReport {
    pub fn skipped(&self) -> u64 {
        self.already_present + self.user_skipped
    }
}

#[derive(Debug, Default)]
struct Tally {
    succeeded: u64,
    already_present: u64,
    user_skipped: u64,
    failed: u64,
    cancelled: u64,
    suspect: u64,
    bytes: u64,
    failed_tracks: Vec<FailedTrack>,
}

/// State shared by every worker of one batch.
struct Shared {
    state: StateStore,
    resolver: Arc<dyn TrackResolver>,
    downloader: Arc<dyn TrackDownloader>,
    breaker: Arc<CircuitBreaker>,
    sink: Arc<dyn ProgressSink>,
    signals: ControlSignals,
    policy: RetryPolicy,
    queue: Mutex<VecDeque<TrackDescriptor>>,
    tally: Mutex<Tally>,
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic while processing track".to_string()
    }
}

impl Shared {
    async fn worker(self: Arc<Self>, worker: usize) {
        debug!(target: "orchestrator", worker, "worker started");
        loop {
            self.signals.wait_while_paused().await;
            if self.signals.is_quit() || self.queue.lock().is_empty() {
                break;
            }

            if let Err(open) = self.breaker.check() {
                self.sink.log(
                    LogLevel::Warning,
                    &format!(
                        "Too many rate-limit responses; holding for {}s",
                        open.remaining.as_secs()
                    ),
                );
                if self.signals.sleep_or_quit(open.remaining).await {
                    break;
                }
                continue;
            }

            let Some(track) = self.queue.lock().pop_front() else {
                break;
            };

            if self.signals.take_skip() {
                self.sink
                    .log(LogLevel::Info, &format!("Skipped {}", track.display_name()));
                self.record(&track, TrackOutcome::UserSkipped).await;
                continue;
            }

            let task = self.sink.task_created(&track.display_name());
            let attempt = Attempt {
                resolver: self.resolver.as_ref(),
                downloader: self.downloader.as_ref(),
                breaker: &self.breaker,
                signals: &self.signals,
                sink: self.sink.as_ref(),
                policy: &self.policy,
                task,
            };
            let outcome = match AssertUnwindSafe(attempt.run(&track)).catch_unwind().await {
                Ok(outcome) => outcome,
                Err(payload) => {
                    let message = panic_message(payload.as_ref());
                    error!(target: "orchestrator", track = %track.track_id(), panic = %message, "track handler panicked");
                    TrackOutcome::Failed {
                        error: DownloadError::Unexpected(message),
                        attempts: 1,
                    }
                }
            };
            self.sink.task_finished(task);
            self.record(&track, outcome).await;
        }
        debug!(target: "orchestrator", worker, "worker stopped");
    }

    /// Persist and count one terminal outcome.
    async fn record(&self, track: &TrackDescriptor, outcome: TrackOutcome) {
        let track_id = track.track_id();
        let name = track.display_name();

        let mark = match &outcome {
            TrackOutcome::Succeeded { bytes, .. } => Some((TrackStatus::Ok, *bytes, None)),
            TrackOutcome::AlreadyPresent | TrackOutcome::UserSkipped => {
                Some((TrackStatus::Skip, 0, None))
            }
            TrackOutcome::Failed { error, .. } => Some((TrackStatus::Error, 0, Some(error.to_string()))),
            TrackOutcome::Cancelled => None,
        };
        if let Some((status, bytes, err)) = &mark
            && let Err(e) = self.state.mark(&track_id, *status, *bytes, err.as_deref()).await
        {
            error!(target: "orchestrator", track = %track_id, error = %e, "failed to record progress");
        }

        {
            let mut tally = self.tally.lock();
            match &outcome {
                TrackOutcome::Succeeded {
                    bytes,
                    suspect_quality,
                } => {
                    tally.succeeded += 1;
                    tally.bytes += bytes;
                    if *suspect_quality {
                        tally.suspect += 1;
                    }
                }
                TrackOutcome::AlreadyPresent => tally.already_present += 1,
                TrackOutcome::UserSkipped => tally.user_skipped += 1,
                TrackOutcome::Cancelled => tally.cancelled += 1,
                TrackOutcome::Failed { error, .. } => {
                    tally.failed += 1;
                    tally.failed_tracks.push(FailedTrack {
                        track: track.clone(),
                        error: error.to_string(),
                    });
                }
            }
        }

        match &outcome {
            TrackOutcome::Succeeded {
                bytes,
                suspect_quality,
            } => {
                self.sink.log(
                    LogLevel::Success,
                    &format!("{name} ({})", format_bytes(*bytes)),
                );
                if *suspect_quality {
                    self.sink.log(
                        LogLevel::Warning,
                        &format!("{name}: source looks upscaled (no content above the cutoff)"),
                    );
                }
            }
            TrackOutcome::AlreadyPresent => {
                self.sink.log(LogLevel::Debug, &format!("{name}: already present"));
            }
            TrackOutcome::Failed { error, attempts } => {
                self.sink.log(
                    LogLevel::Error,
                    &format!("{name}: {error} (after {attempts} attempt(s))"),
                );
            }
            TrackOutcome::UserSkipped | TrackOutcome::Cancelled => {}
        }

        if mark.is_some() {
            self.sink.advance(1);
        }
    }
}

/// Runs batches of tracks against a resolver and downloader.
pub struct Orchestrator {
    state: StateStore,
    resolver: Arc<dyn TrackResolver>,
    downloader: Arc<dyn TrackDownloader>,
    breaker: Arc<CircuitBreaker>,
    sink: Arc<dyn ProgressSink>,
    signals: ControlSignals,
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(
        state: StateStore,
        resolver: Arc<dyn TrackResolver>,
        downloader: Arc<dyn TrackDownloader>,
        breaker: Arc<CircuitBreaker>,
        sink: Arc<dyn ProgressSink>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            state,
            resolver,
            downloader,
            breaker,
            sink,
            signals: ControlSignals::new(),
            config,
        }
    }

    /// Use caller-owned controls instead of a private set.
    pub fn with_signals(mut self, signals: ControlSignals) -> Self {
        self.signals = signals;
        self
    }

    /// Handle for pausing, skipping and quitting this orchestrator's batches.
    pub fn signals(&self) -> ControlSignals {
        self.signals.clone()
    }

    async fn preview(&self, tracks: &[TrackDescriptor]) -> Result<(BatchPreview, Vec<TrackDescriptor>)> {
        let mut pending = Vec::with_capacity(tracks.len());
        for track in tracks {
            if !self.state.is_done(&track.track_id()).await? {
                pending.push(track.clone());
            }
        }
        let preview = BatchPreview {
            total: tracks.len(),
            already_done: tracks.len() - pending.len(),
            pending: pending.len(),
            mode: self.config.mode.clone(),
            sample: pending
                .iter()
                .take(PREVIEW_SAMPLE)
                .map(|t| t.display_name())
                .collect(),
        };
        Ok((preview, pending))
    }

    /// Run one batch to completion or quit.
    ///
    /// Tracks already marked `ok` are not queued. Nothing happens when no
    /// track is pending or the sink declines the preview.
    pub async fn run(&self, tracks: Vec<TrackDescriptor>) -> Result<BatchReport> {
        let (preview, pending) = self.preview(&tracks).await?;
        let mut report = BatchReport {
            preview: preview.clone(),
            ..Default::default()
        };

        if pending.is_empty() {
            self.sink.log(
                LogLevel::Info,
                &format!("All {} tracks are already downloaded", preview.total),
            );
            return Ok(report);
        }

        if !self.config.assume_yes {
            let sink = self.sink.clone();
            let asked = preview.clone();
            let confirmed = tokio::task::spawn_blocking(move || sink.confirm(&asked))
                .await
                .unwrap_or(false);
            if !confirmed {
                self.sink.log(LogLevel::Info, "Cancelled before start");
                return Ok(report);
            }
        }

        report.started = true;
        info!(
            target: "orchestrator",
            pending = preview.pending,
            already_done = preview.already_done,
            workers = self.config.workers,
            "batch started"
        );

        let shared = Arc::new(Shared {
            state: self.state.clone(),
            resolver: self.resolver.clone(),
            downloader: self.downloader.clone(),
            breaker: self.breaker.clone(),
            sink: self.sink.clone(),
            signals: self.signals.clone(),
            policy: self.config.retry.clone(),
            queue: Mutex::new(pending.into_iter().collect()),
            tally: Mutex::new(Tally::default()),
        });

        self.drive(&shared).await;

        let remaining = shared.queue.lock().len();
        let tally = std::mem::take(&mut *shared.tally.lock());
        report.succeeded = tally.succeeded;
        report.already_present = tally.already_present;
        report.user_skipped = tally.user_skipped;
        report.failed = tally.failed;
        report.cancelled = tally.cancelled;
        report.suspect = tally.suspect;
        report.bytes = tally.bytes;
        report.failed_tracks = tally.failed_tracks;
        report.remaining = remaining;
        report.interrupted = self.signals.is_quit();

        self.finish(&tracks, &mut report).await;
        Ok(report)
    }

    /// Run workers until the queue drains, or quit plus grace expires.
    async fn drive(&self, shared: &Arc<Shared>) {
        let mut workers = JoinSet::new();
        for id in 0..self.config.workers.max(1) {
            workers.spawn(shared.clone().worker(id));
        }

        let mut deadline: Option<tokio::time::Instant> = None;
        let mut aborted = false;
        loop {
            tokio::select! {
                joined = workers.join_next() => match joined {
                    None => break,
                    Some(Ok(())) => {}
                    Some(Err(e)) if e.is_cancelled() => {}
                    Some(Err(e)) => {
                        error!(target: "orchestrator", error = %e, "worker died");
                        if !self.signals.is_quit() && !shared.queue.lock().is_empty() {
                            workers.spawn(shared.clone().worker(usize::MAX));
                        }
                    }
                },
                _ = self.signals.quit_requested(), if deadline.is_none() => {
                    self.sink.log(LogLevel::Warning, "Stopping after in-flight tracks...");
                    deadline = Some(tokio::time::Instant::now() + self.config.quit_grace);
                }
                _ = tokio::time::sleep_until(deadline.unwrap_or_else(tokio::time::Instant::now)),
                    if deadline.is_some() && !aborted => {
                    warn!(target: "orchestrator", grace_secs = self.config.quit_grace.as_secs(), "aborting in-flight tracks");
                    workers.abort_all();
                    aborted = true;
                }
            }
        }
    }

    /// Exports, summary, history and playlist indexes.
    async fn finish(&self, tracks: &[TrackDescriptor], report: &mut BatchReport) {
        if !report.failed_tracks.is_empty() {
            if let Some(path) = &self.config.failed_report {
                match report::write_failed_report(path, &report.failed_tracks) {
                    Ok(()) => self.sink.log(
                        LogLevel::Info,
                        &format!("Failure report written to {}", path.display()),
                    ),
                    Err(e) => error!(target: "orchestrator", path = %path.display(), error = %e, "failed to write failure report"),
                }
            }
            if let Some(path) = &self.config.failed_csv {
                match report::write_failed_csv(path, &report.failed_tracks) {
                    Ok(()) => self.sink.log(
                        LogLevel::Info,
                        &format!("Retry list written to {}", path.display()),
                    ),
                    Err(e) => error!(target: "orchestrator", path = %path.display(), error = %e, "failed to write retry csv"),
                }
            }
        }

        match self.state.get_stats().await {
            Ok(stats) => report.stats = Some(stats),
            Err(e) => warn!(target: "orchestrator", error = %e, "could not read state totals"),
        }

        let mut summary = format!(
            "{} downloaded, {} skipped, {} failed, {} written",
            report.succeeded,
            report.skipped(),
            report.failed,
            format_bytes(report.bytes)
        );
        if report.interrupted {
            summary.push_str(&format!(
                " (interrupted: {} not started, {} cancelled)",
                report.remaining, report.cancelled
            ));
        }
        self.sink.log(LogLevel::Info, &summary);
        info!(
            target: "orchestrator",
            succeeded = report.succeeded,
            skipped = report.skipped(),
            failed = report.failed,
            bytes = report.bytes,
            interrupted = report.interrupted,
            "batch finished"
        );

        if let Some(path) = &self.config.history_file {
            let record = SessionRecord {
                date: Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
                success: report.succeeded,
                skipped: report.skipped(),
                failed: report.failed,
                bytes: report.bytes,
                mode: self.config.mode.clone(),
            };
            if let Err(e) = report::append_history(path, record) {
                warn!(target: "orchestrator", path = %path.display(), error = %e, "failed to update history");
            }
        }

        if self.config.write_playlist_index && report.succeeded + report.already_present > 0 {
            for root in self.config.output_roots.iter().filter(|r| r.is_dir()) {
                match report::write_playlist_indexes(root, tracks) {
                    Ok(written) if !written.is_empty() => self.sink.log(
                        LogLevel::Info,
                        &format!("{} playlist index(es) updated in {}", written.len(), root.display()),
                    ),
                    Ok(_) => {}
                    Err(e) => warn!(target: "orchestrator", root = %root.display(), error = %e, "failed to write playlist indexes"),
                }
            }
        }
    }
}
