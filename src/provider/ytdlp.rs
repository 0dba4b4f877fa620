//! `yt-dlp` backed source provider.
//!
//! Search and fetch both shell out to the `yt-dlp` executable. This is the
//! only place provider error text is interpreted: [`classify`] turns stderr
//! into a [`FailureReason`] and nothing downstream looks at the text again.
//!
//! Install yt-dlp:
//! - Windows: `winget install yt-dlp`
//! - macOS: `brew install yt-dlp`
//! - Linux: `pipx install yt-dlp` or your distribution's package

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;

use super::{FailureReason, ProviderError, RequestOptions, SourceProvider};
use crate::model::Candidate;
use crate::process::{RunError, run_with_timeout};

/// Map provider error text to a typed reason. Case-insensitive.
pub fn classify(text: &str) -> FailureReason {
    let text = text.to_lowercase();
    let has = |needles: &[&str]| needles.iter().any(|n| text.contains(n));

    if has(&["429", "too many requests"]) {
        FailureReason::RateLimited
    } else if has(&["copyright", "blocked"]) {
        FailureReason::Copyright
    } else if has(&["not available", "geo restrict", "geo-restrict", "your country"]) {
        FailureReason::GeoBlocked
    } else if has(&["sign in", "age-restricted", "age restricted", "confirm your age"]) {
        FailureReason::AuthRequired
    } else if has(&["403", "forbidden"]) {
        FailureReason::Forbidden
    } else if has(&["video unavailable", "does not exist", "no video formats", "404"]) {
        FailureReason::NotFound
    } else if has(&["timed out", "timeout"]) {
        FailureReason::Timeout
    } else if has(&["connection", "network", "resolve host", "ssl", "unable to download"]) {
        FailureReason::Network
    } else {
        FailureReason::Other
    }
}

/// One line of `--dump-json --flat-playlist` output.
#[derive(Debug, Deserialize)]
struct SearchEntry {
    id: Option<String>,
    title: Option<String>,
    duration: Option<f64>,
    url: Option<String>,
    webpage_url: Option<String>,
}

impl SearchEntry {
    fn into_candidate(self) -> Option<Candidate> {
        let url = self
            .webpage_url
            .or(self.url)
            .or_else(|| {
                self.id
                    .as_ref()
                    .map(|id| format!("https://www.youtube.com/watch?v={id}"))
            })?;
        Some(Candidate {
            url,
            title: self.title.unwrap_or_default(),
            duration: self.duration,
        })
    }
}

/// Parse newline-delimited search JSON, skipping lines that don't parse.
fn parse_search_output(stdout: &str) -> Vec<Candidate> {
    stdout
        .lines()
        .filter(|l| !l.trim().is_empty())
        .filter_map(|l| serde_json::from_str::<SearchEntry>(l).ok())
        .filter_map(SearchEntry::into_candidate)
        .collect()
}

/// `yt-dlp` executable wrapper.
#[derive(Debug, Clone)]
pub struct YtDlp {
    binary: String,
    socket_timeout: Duration,
}

impl YtDlp {
    pub fn new(socket_timeout: Duration) -> Self {
        Self {
            binary: "yt-dlp".to_string(),
            socket_timeout,
        }
    }

    /// Use a specific executable path instead of `yt-dlp` on PATH.
    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }

    fn base_command(&self, opts: &RequestOptions) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.arg("--no-warnings")
            .arg("--no-playlist")
            .arg("--socket-timeout")
            .arg(self.socket_timeout.as_secs().max(1).to_string())
            .arg("--user-agent")
            .arg(&opts.user_agent);
        if let Some(proxy) = &opts.proxy {
            cmd.arg("--proxy").arg(proxy);
        }
        if let Some(cookies) = &opts.cookies {
            cmd.arg("--cookies").arg(cookies);
        }
        cmd
    }

    async fn run(&self, cmd: Command, timeout: Duration) -> Result<String, ProviderError> {
        let output = run_with_timeout(cmd, timeout).await.map_err(|e| match e {
            RunError::NotInstalled(_) => ProviderError::new(FailureReason::ToolMissing, e.to_string()),
            RunError::TimedOut { .. } => ProviderError::new(FailureReason::Timeout, e.to_string()),
            RunError::Spawn { .. } => ProviderError::new(FailureReason::Other, e.to_string()),
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let message = stderr
                .lines()
                .rev()
                .find(|l| l.contains("ERROR"))
                .unwrap_or_else(|| stderr.trim())
                .trim()
                .to_string();
            return Err(ProviderError::new(classify(&stderr), message));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl Default for YtDlp {
    fn default() -> Self {
        Self::new(Duration::from_secs(15))
    }
}

#[async_trait]
impl SourceProvider for YtDlp {
    async fn search(
        &self,
        query: &str,
        limit: usize,
        opts: &RequestOptions,
    ) -> Result<Vec<Candidate>, ProviderError> {
        let mut cmd = self.base_command(opts);
        cmd.arg("--dump-json")
            .arg("--flat-playlist")
            .arg("--skip-download")
            .arg(format!("ytsearch{}:{}", limit.max(1), query));

        let stdout = self.run(cmd, opts.timeout).await?;
        let candidates = parse_search_output(&stdout);
        tracing::debug!(target: "provider", query = %query, hits = candidates.len(), "search");
        Ok(candidates)
    }

    async fn fetch_audio(
        &self,
        url: &str,
        dest_stem: &Path,
        opts: &RequestOptions,
    ) -> Result<PathBuf, ProviderError> {
        let template = format!("{}.%(ext)s", dest_stem.display());
        let mut cmd = self.base_command(opts);
        cmd.arg("-f")
            .arg("bestaudio/best")
            .arg("--no-part")
            .arg("--retries")
            .arg("3")
            .arg("--fragment-retries")
            .arg("10")
            .arg("--geo-bypass")
            .arg("-o")
            .arg(&template)
            .arg("--print")
            .arg("after_move:filepath")
            .arg(url);

        let stdout = self.run(cmd, opts.timeout).await?;
        let printed = stdout
            .lines()
            .rev()
            .map(str::trim)
            .find(|l| !l.is_empty())
            .map(PathBuf::from);

        match printed.filter(|p| p.exists()) {
            Some(path) => Ok(path),
            None => find_with_stem(dest_stem).ok_or_else(|| {
                ProviderError::new(FailureReason::Other, "download finished but no file was written")
            }),
        }
    }
}

/// First file in `stem`'s directory whose name starts with its file name.
fn find_with_stem(stem: &Path) -> Option<PathBuf> {
    let dir = stem.parent()?;
    let prefix = stem.file_name()?.to_str()?;
    std::fs::read_dir(dir)
        .ok()?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .find(|p| {
            p.is_file()
                && p.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with(prefix))
        })
}
