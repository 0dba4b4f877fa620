//! Presentation seam for batch progress.
//!
//! The orchestrator reports through a [`ProgressSink`] and never renders
//! anything itself. [`NoopSink`] discards everything; the CLI supplies a
//! console sink.

use std::fmt;

/// Handle for one in-flight track's status line.
pub type TaskId = u64;

/// Severity of a sink log call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Success,
    Warning,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Success => "success",
            LogLevel::Warning => "warning",
            LogLevel::Error => "error",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a batch is about to do, shown before confirmation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchPreview {
    /// Tracks supplied
    pub total: usize,
    /// Already marked `ok` in the state store
    pub already_done: usize,
    /// Tracks that will be queued
    pub pending: usize,
    /// Quality mode label
    pub mode: String,
    /// A few pending display names
    pub sample: Vec<String>,
}

/// Receives batch events. Must be cheap; calls come from worker tasks.
pub trait ProgressSink: Send + Sync {
    /// A worker picked up a track.
    fn task_created(&self, label: &str) -> TaskId;

    /// Free-text status for an in-flight track.
    fn task_status(&self, task: TaskId, status: &str);

    /// The track's status line can be dropped.
    fn task_finished(&self, _task: TaskId) {}

    /// Overall progress moved by `n` tracks.
    fn advance(&self, n: u64);

    fn log(&self, level: LogLevel, message: &str);

    /// Ask whether to start. Called off the async scheduler, so it may block.
    fn confirm(&self, _preview: &BatchPreview) -> bool {
        true
    }
}

/// `1.5 MB` style size for summaries.
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["KB", "MB", "GB", "TB"];
    if bytes < 1024 {
        return format!("{bytes} B");
    }
    let mut value = bytes as f64 / 1024.0;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.1} {}", UNITS[unit])
}

/// Sink that ignores everything and always confirms.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl ProgressSink for NoopSink {
    fn task_created(&self, _label: &str) -> TaskId {
        0
    }

    fn task_status(&self, _task: TaskId, _status: &str) {}

    fn advance(&self, _n: u64) {}

    fn log(&self, _level: LogLevel, _message: &str) {}
}
