//! Source provider boundary.
//!
//! The pipeline talks to exactly one search/fetch provider through the
//! [`SourceProvider`] trait. Failures come back as [`ProviderError`] with a
//! typed [`FailureReason`]; turning provider text into a reason happens in
//! one place only ([`ytdlp::classify`]).
//!
//! Also home to the optional collaborators used when talking to the
//! provider: a [`ProxyProvider`] and a Netscape cookie file.

pub mod cookies;
pub mod proxy;
pub mod ytdlp;

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use rand::seq::IndexedRandom;

use crate::model::Candidate;

pub use cookies::validate_cookies_file;
pub use proxy::{ProxyPool, ProxyProvider};
pub use ytdlp::YtDlp;

/// Browser user agents rotated across requests.
pub const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Safari/605.1.15",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:125.0) Gecko/20100101 Firefox/125.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 14.4; rv:125.0) Gecko/20100101 Firefox/125.0",
];

pub fn random_user_agent() -> &'static str {
    USER_AGENTS
        .choose(&mut rand::rng())
        .copied()
        .unwrap_or(USER_AGENTS[0])
}

/// Typed reason code for a provider failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    NotFound,
    Copyright,
    GeoBlocked,
    AuthRequired,
    /// HTTP 429
    RateLimited,
    /// HTTP 403
    Forbidden,
    Network,
    Timeout,
    /// The provider's executable is not installed
    ToolMissing,
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct ProviderError {
    pub reason: FailureReason,
    pub message: String,
}

impl ProviderError {
    pub fn new(reason: FailureReason, message: impl Into<String>) -> Self {
        Self {
            reason,
            message: message.into(),
        }
    }
}

/// Per-request transport settings.
#[derive(Debug, Clone)]
pub struct RequestOptions {
    pub proxy: Option<String>,
    /// Validated Netscape cookie file
    pub cookies: Option<PathBuf>,
    pub user_agent: String,
    /// Wall clock for the whole call
    pub timeout: Duration,
}

impl RequestOptions {
    pub fn new(timeout: Duration) -> Self {
        Self {
            proxy: None,
            cookies: None,
            user_agent: random_user_agent().to_string(),
            timeout,
        }
    }
}

/// A search-and-fetch source of audio.
#[async_trait]
pub trait SourceProvider: Send + Sync {
    /// Top `limit` candidates for `query`, best first.
    async fn search(
        &self,
        query: &str,
        limit: usize,
        opts: &RequestOptions,
    ) -> Result<Vec<Candidate>, ProviderError>;

    /// Download the raw audio for `url` to a file whose name starts with
    /// `dest_stem`. Returns the path actually written.
    async fn fetch_audio(
        &self,
        url: &str,
        dest_stem: &Path,
        opts: &RequestOptions,
    ) -> Result<PathBuf, ProviderError>;
}
