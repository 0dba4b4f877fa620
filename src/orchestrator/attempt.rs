//! Per-track state machine.
//!
//! ```text
//! Searching(n) ──ok──▶ Downloading(n) ──ok──▶ Succeeded
//!      │                    │
//!      └──────err───────────┴──▶ fatal or n == max ──▶ Failed
//!                               otherwise ──▶ Backoff(n) ──▶ Searching(n+1)
//! ```
//!
//! One attempt counter spans both stages. Quit moves any stage to
//! `Cancelled`.

use std::time::Duration;

use tracing::{debug, warn};

use crate::engine::TrackDownloader;
use crate::error::DownloadError;
use crate::guard::CircuitBreaker;
use crate::model::{DownloadOutcome, SearchResult, TrackDescriptor};
use crate::progress::{ProgressSink, TaskId};
use crate::resolver::TrackResolver;

use super::signals::ControlSignals;

/// Attempt budget and delays.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// Backoff after attempt `n` is `n * backoff_base`
    pub backoff_base: Duration,
    /// Added to the backoff after a rate-limit error
    pub rate_limit_cooldown: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base: Duration::from_secs(2),
            rate_limit_cooldown: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.backoff_base * attempt
    }

    /// Wait before the attempt after `attempt` failed with `error`.
    pub fn delay_after(&self, attempt: u32, error: &DownloadError) -> Duration {
        let base = self.backoff(attempt);
        if error.is_rate_limit() {
            base + self.rate_limit_cooldown
        } else {
            base
        }
    }
}

/// How one track ended.
#[derive(Debug, Clone, PartialEq)]
pub enum TrackOutcome {
    Succeeded { bytes: u64, suspect_quality: bool },
    /// Every tier already on disk and valid
    AlreadyPresent,
    /// Skipped on request before any work
    UserSkipped,
    /// Quit arrived mid-flight
    Cancelled,
    Failed { error: DownloadError, attempts: u32 },
}

#[derive(Debug)]
enum Stage {
    Searching { attempt: u32 },
    Downloading { attempt: u32, source: SearchResult },
    Backoff { attempt: u32, error: DownloadError },
    Succeeded(DownloadOutcome),
    Failed { error: DownloadError, attempts: u32 },
    Cancelled,
}

/// Collaborators one track needs.
pub(crate) struct Attempt<'a> {
    pub resolver: &'a dyn TrackResolver,
    pub downloader: &'a dyn TrackDownloader,
    pub breaker: &'a CircuitBreaker,
    pub signals: &'a ControlSignals,
    pub sink: &'a dyn ProgressSink,
    pub policy: &'a RetryPolicy,
    pub task: TaskId,
}

impl Attempt<'_> {
    /// Drive `track` to a terminal stage.
    pub async fn run(&self, track: &TrackDescriptor) -> TrackOutcome {
        let track_id = track.track_id();
        let subfolder = track.destination_subfolder();
        let signals = self.signals;
        let cancel = move || signals.is_quit();
        let max = self.policy.max_attempts.max(1);

        let mut stage = Stage::Searching { attempt: 1 };
        loop {
            stage = match stage {
                Stage::Searching { .. } | Stage::Downloading { .. } if self.signals.is_quit() => {
                    Stage::Cancelled
                }

                Stage::Searching { attempt } => {
                    self.sink
                        .task_status(self.task, &format!("Searching (attempt {attempt}/{max})"));
                    match self.resolver.resolve(track, attempt).await {
                        Ok(source) => Stage::Downloading { attempt, source },
                        Err(error) => self.after_error(&track_id, attempt, max, error),
                    }
                }

                Stage::Downloading { attempt, source } => {
                    let via = if source.from_cache { " (cached)" } else { "" };
                    self.sink.task_status(self.task, &format!("Downloading{via}"));
                    match self
                        .downloader
                        .download(&source, track, &cancel, subfolder.as_deref())
                        .await
                    {
                        Ok(outcome) if outcome.cancelled => Stage::Cancelled,
                        Ok(outcome) if outcome.success => Stage::Succeeded(outcome),
                        Ok(outcome) => {
                            let message = outcome
                                .error_message
                                .unwrap_or_else(|| "download failed".to_string());
                            self.after_error(&track_id, attempt, max, DownloadError::Transcode(message))
                        }
                        Err(error) => self.after_error(&track_id, attempt, max, error),
                    }
                }

                Stage::Backoff { attempt, error } => {
                    let wait = self.policy.delay_after(attempt, &error);
                    self.sink.task_status(
                        self.task,
                        &format!("Retrying in {}s: {error}", wait.as_secs()),
                    );
                    if self.signals.sleep_or_quit(wait).await {
                        Stage::Cancelled
                    } else {
                        Stage::Searching {
                            attempt: attempt + 1,
                        }
                    }
                }

                Stage::Succeeded(outcome) => {
                    if outcome.skipped {
                        self.sink.task_status(self.task, "Already present");
                        return TrackOutcome::AlreadyPresent;
                    }
                    self.breaker.record_success();
                    self.sink.task_status(self.task, "Done");
                    return TrackOutcome::Succeeded {
                        bytes: outcome.bytes_written,
                        suspect_quality: outcome.suspect_quality,
                    };
                }

                Stage::Failed { error, attempts } => {
                    self.sink.task_status(self.task, &format!("Failed: {error}"));
                    return TrackOutcome::Failed { error, attempts };
                }

                Stage::Cancelled => {
                    self.sink.task_status(self.task, "Cancelled");
                    return TrackOutcome::Cancelled;
                }
            };
        }
    }

    fn after_error(&self, track_id: &str, attempt: u32, max: u32, error: DownloadError) -> Stage {
        if error.trips_circuit() {
            self.breaker.record_failure();
            debug!(target: "orchestrator", track = %track_id, failures = self.breaker.failure_count(), "reported to circuit breaker");
        }

        if error.is_fatal() || attempt >= max {
            warn!(target: "orchestrator", track = %track_id, attempt, fatal = error.is_fatal(), error = %error, "giving up");
            Stage::Failed {
                error,
                attempts: attempt,
            }
        } else {
            debug!(target: "orchestrator", track = %track_id, attempt, error = %error, "will retry");
            Stage::Backoff { attempt, error }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::NoopSink;
    use crate::test_utils::{MockDownloader, MockResolver, mock_track};

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            backoff_base: Duration::from_millis(1),
            rate_limit_cooldown: Duration::from_millis(1),
        }
    }

    async fn run(
        resolver: &MockResolver,
        downloader: &MockDownloader,
        breaker: &CircuitBreaker,
        signals: &ControlSignals,
    ) -> TrackOutcome {
        let policy = fast_policy();
        let attempt = Attempt {
            resolver,
            downloader,
            breaker,
            signals,
            sink: &NoopSink,
            policy: &policy,
            task: 0,
        };
        attempt.run(&mock_track()).await
    }

    fn breaker() -> CircuitBreaker {
        CircuitBreaker::new(3, Duration::from_secs(300))
    }

    #[test]
    fn test_backoff_is_linear() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(1), Duration::from_secs(2));
        assert_eq!(policy.backoff(2), Duration::from_secs(4));
    }

    #[test]
    fn test_rate_limit_adds_cooldown() {
        let policy = RetryPolicy::default();
        assert_eq!(
            policy.delay_after(1, &DownloadError::RateLimited("429".into())),
            Duration::from_secs(62)
        );
        assert_eq!(
            policy.delay_after(1, &DownloadError::Forbidden("403".into())),
            Duration::from_secs(2)
        );
    }

    #[tokio::test]
    async fn test_success_first_try() {
        let resolver = MockResolver::default();
        let downloader = MockDownloader::default();
        let outcome = run(&resolver, &downloader, &breaker(), &ControlSignals::new()).await;

        assert!(matches!(outcome, TrackOutcome::Succeeded { .. }));
        assert_eq!(resolver.calls(), 1);
        assert_eq!(downloader.calls(), 1);
    }

    #[tokio::test]
    async fn test_fatal_error_is_not_retried() {
        let resolver = MockResolver::default()
            .script(&mock_track().track_id(), vec![Err(DownloadError::NotFound("nothing".into()))]);
        let downloader = MockDownloader::default();
        let outcome = run(&resolver, &downloader, &breaker(), &ControlSignals::new()).await;

        assert_eq!(
            outcome,
            TrackOutcome::Failed {
                error: DownloadError::NotFound("nothing".into()),
                attempts: 1
            }
        );
        assert_eq!(resolver.calls(), 1);
        assert_eq!(downloader.calls(), 0);
    }

    #[tokio::test]
    async fn test_recoverable_then_success() {
        let resolver = MockResolver::default().script(
            &mock_track().track_id(),
            vec![Err(DownloadError::Network("reset".into()))],
        );
        let downloader = MockDownloader::default();
        let outcome = run(&resolver, &downloader, &breaker(), &ControlSignals::new()).await;

        assert!(matches!(outcome, TrackOutcome::Succeeded { .. }));
        assert_eq!(resolver.calls(), 2);
    }

    #[tokio::test]
    async fn test_attempts_shared_across_stages() {
        let resolver = MockResolver::default();
        let downloader = MockDownloader::default().script(
            &mock_track().track_id(),
            vec![
                Err(DownloadError::Timeout("slow".into())),
                Ok(DownloadOutcome::failed(0, "mobile: ffmpeg exited", false)),
                Err(DownloadError::Network("reset".into())),
            ],
        );
        let outcome = run(&resolver, &downloader, &breaker(), &ControlSignals::new()).await;

        assert_eq!(
            outcome,
            TrackOutcome::Failed {
                error: DownloadError::Network("reset".into()),
                attempts: 3
            }
        );
        assert_eq!(resolver.calls(), 3);
        assert_eq!(downloader.calls(), 3);
    }

    #[tokio::test]
    async fn test_rate_limit_reports_to_breaker() {
        let resolver = MockResolver::default().script(
            &mock_track().track_id(),
            vec![Err(DownloadError::RateLimited("429".into()))],
        );
        let breaker = breaker();
        let outcome = run(&resolver, &MockDownloader::default(), &breaker, &ControlSignals::new()).await;

        assert!(matches!(outcome, TrackOutcome::Succeeded { .. }));
        // success only resets a half-open breaker
        assert_eq!(breaker.failure_count(), 1);
    }

    #[tokio::test]
    async fn test_already_present_outcome() {
        let downloader = MockDownloader::default()
            .script(&mock_track().track_id(), vec![Ok(DownloadOutcome::already_present())]);
        let outcome = run(&MockResolver::default(), &downloader, &breaker(), &ControlSignals::new()).await;
        assert_eq!(outcome, TrackOutcome::AlreadyPresent);
    }

    #[tokio::test]
    async fn test_quit_before_start_cancels() {
        let signals = ControlSignals::new();
        signals.quit();
        let resolver = MockResolver::default();
        let outcome = run(&resolver, &MockDownloader::default(), &breaker(), &signals).await;

        assert_eq!(outcome, TrackOutcome::Cancelled);
        assert_eq!(resolver.calls(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_download_is_not_failure() {
        let downloader = MockDownloader::default()
            .script(&mock_track().track_id(), vec![Ok(DownloadOutcome::cancelled())]);
        let outcome = run(&MockResolver::default(), &downloader, &breaker(), &ControlSignals::new()).await;
        assert_eq!(outcome, TrackOutcome::Cancelled);
    }
}
