//! Fetch + transcode engine.
//!
//! One [`TrackDownloader::download`] call takes a resolved source to tagged
//! M4A files in every requested quality tier:
//!
//! 1. Validate existing outputs (size and probed duration); all valid means
//!    [`DownloadOutcome::already_present`] with no network activity
//! 2. Fetch raw audio into the temp directory
//! 3. Optional spectral probe on the raw file (informational only)
//! 4. Cover, lyrics and credits lookups, concurrently
//! 5. Transcode the missing tiers concurrently; bad outputs are deleted
//! 6. Tag each good output
//!
//! The cancel predicate is checked between stages. The raw file is removed
//! on every exit path by [`RawTempGuard`].

pub mod cover;
pub mod spectral;
pub mod tools;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use tracing::{debug, info, warn};

use crate::config::{Config, QualityMode};
use crate::enrichment::{CreditsApi, LyricsApi};
use crate::error::DownloadError;
use crate::metadata::{self, TagPayload};
use crate::model::{DownloadOutcome, SearchResult, TrackDescriptor, sanitize_filename};
use crate::provider::{FailureReason, ProxyProvider, RequestOptions, SourceProvider};

pub use cover::{CoverFetcher, resize_cover};
pub use spectral::is_genuine;
pub use tools::{Ffmpeg, MediaToolkit, ToolError, TranscodeJob};

/// Extension of every output file.
pub const OUTPUT_EXTENSION: &str = "m4a";

/// Prefix of raw download temp files.
pub const RAW_PREFIX: &str = "ytraw_";

/// Raw downloads smaller than this are treated as truncated.
const MIN_RAW_BYTES: u64 = 1024;

/// A cancellation predicate polled between stages.
pub type CancelCheck<'a> = &'a (dyn Fn() -> bool + Send + Sync);

/// Download seam used by the orchestrator.
#[async_trait]
pub trait TrackDownloader: Send + Sync {
    async fn download(
        &self,
        source: &SearchResult,
        track: &TrackDescriptor,
        cancel: CancelCheck<'_>,
        subfolder: Option<&str>,
    ) -> Result<DownloadOutcome, DownloadError>;
}

/// An output quality tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    Hq,
    Mobile,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Hq => "hq",
            Tier::Mobile => "mobile",
        }
    }

    /// Tiers produced in `mode`, HQ first.
    pub fn for_mode(mode: QualityMode) -> &'static [Tier] {
        match mode {
            QualityMode::Hq => &[Tier::Hq],
            QualityMode::Mobile => &[Tier::Mobile],
            QualityMode::Both => &[Tier::Hq, Tier::Mobile],
        }
    }
}

/// `root[/subfolder]/<safe name>.m4a`
pub fn output_path(root: &Path, track: &TrackDescriptor, subfolder: Option<&str>) -> PathBuf {
    let mut path = root.to_path_buf();
    if let Some(sub) = subfolder.map(str::trim).filter(|s| !s.is_empty()) {
        path.push(sanitize_filename(sub));
    }
    path.push(format!("{}.{}", track.safe_filename(), OUTPUT_EXTENSION));
    path
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub quality_mode: QualityMode,
    pub hq_dir: PathBuf,
    pub mobile_dir: PathBuf,
    pub temp_dir: PathBuf,
    pub hq_bitrate: u32,
    pub mobile_bitrate: u32,
    pub normalize: bool,
    pub spectral_analysis: bool,
    pub spectral_cutoff_hz: u32,
    pub spectral_floor_db: f64,
    pub transcode_timeout: Duration,
    pub fetch_timeout: Duration,
    pub min_valid_duration_secs: f64,
    pub min_file_bytes: u64,
}

impl EngineConfig {
    pub fn tiers(&self) -> &'static [Tier] {
        Tier::for_mode(self.quality_mode)
    }

    pub fn tier_root(&self, tier: Tier) -> &Path {
        match tier {
            Tier::Hq => &self.hq_dir,
            Tier::Mobile => &self.mobile_dir,
        }
    }

    fn job(&self, tier: Tier) -> TranscodeJob {
        TranscodeJob {
            bitrate_kbps: match tier {
                Tier::Hq => self.hq_bitrate,
                Tier::Mobile => self.mobile_bitrate,
            },
            normalize: self.normalize,
            timeout: self.transcode_timeout,
        }
    }
}

impl From<&Config> for EngineConfig {
    fn from(config: &Config) -> Self {
        let d = &config.download;
        Self {
            quality_mode: d.quality_mode,
            hq_dir: config.paths.output_hq.clone(),
            mobile_dir: config.paths.output_mobile.clone(),
            temp_dir: config.paths.temp_dir.clone(),
            hq_bitrate: d.hq_bitrate,
            mobile_bitrate: d.mobile_bitrate,
            normalize: d.normalize_audio,
            spectral_analysis: d.spectral_analysis,
            spectral_cutoff_hz: d.spectral_cutoff_hz,
            spectral_floor_db: d.spectral_floor_db,
            transcode_timeout: d.transcode_timeout(),
            fetch_timeout: Duration::from_secs(config.network.fetch_timeout_secs),
            min_valid_duration_secs: d.min_valid_duration_secs,
            min_file_bytes: d.min_file_bytes,
        }
    }
}

/// Removes every file starting with the raw stem when dropped.
struct RawTempGuard {
    stem: PathBuf,
}

impl Drop for RawTempGuard {
    fn drop(&mut self) {
        let (Some(dir), Some(prefix)) = (
            self.stem.parent(),
            self.stem.file_name().and_then(|n| n.to_str()),
        ) else {
            return;
        };
        let Ok(entries) = std::fs::read_dir(dir) else {
            return;
        };
        for path in entries.filter_map(|e| e.ok()).map(|e| e.path()) {
            let matches = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with(prefix));
            if matches && let Err(e) = std::fs::remove_file(&path) {
                warn!(target: "engine", path = %path.display(), error = %e, "failed to remove temp file");
            }
        }
    }
}

/// The production [`TrackDownloader`].
pub struct FetchEngine {
    provider: Arc<dyn SourceProvider>,
    toolkit: Arc<dyn MediaToolkit>,
    covers: Option<Arc<CoverFetcher>>,
    lyrics: Option<Arc<dyn LyricsApi>>,
    credits: Option<Arc<dyn CreditsApi>>,
    proxies: Option<Arc<dyn ProxyProvider>>,
    cookies: Option<PathBuf>,
    config: EngineConfig,
}

impl FetchEngine {
    pub fn new(
        provider: Arc<dyn SourceProvider>,
        toolkit: Arc<dyn MediaToolkit>,
        config: EngineConfig,
    ) -> Self {
        Self {
            provider,
            toolkit,
            covers: None,
            lyrics: None,
            credits: None,
            proxies: None,
            cookies: None,
            config,
        }
    }

    pub fn with_covers(mut self, covers: Arc<CoverFetcher>) -> Self {
        self.covers = Some(covers);
        self
    }

    pub fn with_lyrics(mut self, lyrics: Arc<dyn LyricsApi>) -> Self {
        self.lyrics = Some(lyrics);
        self
    }

    pub fn with_credits(mut self, credits: Arc<dyn CreditsApi>) -> Self {
        self.credits = Some(credits);
        self
    }

    pub fn with_proxies(mut self, proxies: Arc<dyn ProxyProvider>) -> Self {
        self.proxies = Some(proxies);
        self
    }

    pub fn with_cookies(mut self, cookies: PathBuf) -> Self {
        self.cookies = Some(cookies);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Existing output that is big enough and probes as real audio.
    async fn is_valid_output(&self, path: &Path) -> bool {
        let Ok(meta) = tokio::fs::metadata(path).await else {
            return false;
        };
        if !meta.is_file() || meta.len() < self.config.min_file_bytes {
            return false;
        }
        match self.toolkit.probe_duration(path).await {
            Ok(secs) => secs > self.config.min_valid_duration_secs,
            Err(e) => {
                debug!(target: "engine", path = %path.display(), error = %e, "existing output failed probe");
                false
            }
        }
    }

    async fn fetch_raw(&self, url: &str, stem: &Path) -> Result<PathBuf, DownloadError> {
        let mut opts = RequestOptions::new(self.config.fetch_timeout);
        opts.cookies = self.cookies.clone();
        opts.proxy = self.proxies.as_ref().and_then(|p| p.get_proxy());

        let result = self.provider.fetch_audio(url, stem, &opts).await;

        if let (Some(pool), Some(addr)) = (&self.proxies, &opts.proxy) {
            match &result {
                Ok(_) => pool.mark_success(addr),
                Err(_) => pool.mark_failure(addr),
            }
        }

        let raw = result.map_err(|e| match e.reason {
            FailureReason::Other => DownloadError::Fetch(e.message),
            _ => e.into(),
        })?;

        let size = tokio::fs::metadata(&raw).await.map(|m| m.len()).unwrap_or(0);
        if size < MIN_RAW_BYTES {
            return Err(DownloadError::Fetch(format!(
                "raw download is empty or truncated ({size} bytes)"
            )));
        }
        Ok(raw)
    }

    /// Tags for `track` plus whatever enrichment is available.
    async fn gather_tags(&self, track: &TrackDescriptor) -> TagPayload {
        let cover = async {
            match (&self.covers, track.cover_art_url.as_deref()) {
                (Some(covers), Some(url)) if !url.trim().is_empty() => {
                    covers.fetch(url).await.map(|bytes| bytes.as_ref().clone())
                }
                _ => None,
            }
        };

        let lyrics = async {
            let Some(api) = &self.lyrics else {
                return None;
            };
            let secs = track.duration_secs().map(|s| s.round() as u64);
            match api.fetch_lyrics(&track.artist, &track.title, secs).await {
                Ok(text) => Some(text),
                Err(e) => {
                    debug!(target: "engine", track = %track.track_id(), error = %e, "no lyrics");
                    None
                }
            }
        };

        let credits = async {
            let (Some(api), Some(isrc)) = (&self.credits, track.normalized_isrc()) else {
                return None;
            };
            match api.fetch_credits(&isrc).await {
                Ok(credits) => Some(credits),
                Err(e) => {
                    debug!(target: "engine", track = %track.track_id(), error = %e, "no credits");
                    None
                }
            }
        };

        let (cover, lyrics, credits) = futures::join!(cover, lyrics, credits);
        TagPayload::from_track(track)
            .with_cover(cover)
            .with_lyrics(lyrics)
            .with_credits(credits.unwrap_or_default())
    }

    /// Encode one tier; a failed or empty output is deleted.
    async fn transcode_tier(&self, tier: Tier, raw: &Path, output: &Path) -> Result<(), String> {
        if let Some(parent) = output.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| format!("cannot create {}: {e}", parent.display()))?;
        }

        let result = self.toolkit.transcode(raw, output, &self.config.job(tier)).await;
        let written = tokio::fs::metadata(output)
            .await
            .map(|m| m.len() > 0)
            .unwrap_or(false);

        let reason = match result {
            Ok(()) if written => return Ok(()),
            Ok(()) => "transcoder produced no output".to_string(),
            Err(e) => e.to_string(),
        };
        if let Err(e) = tokio::fs::remove_file(output).await
            && e.kind() != std::io::ErrorKind::NotFound
        {
            warn!(target: "engine", path = %output.display(), error = %e, "failed to remove partial output");
        }
        warn!(target: "engine", tier = tier.as_str(), path = %output.display(), reason = %reason, "transcode failed");
        Err(reason)
    }

    async fn write_tags(&self, path: &Path, payload: Arc<TagPayload>) {
        let target = path.to_path_buf();
        let result = tokio::task::spawn_blocking(move || metadata::write_tags(&target, &payload)).await;
        match result {
            Ok(Ok(())) => debug!(target: "engine", path = %path.display(), "tagged"),
            Ok(Err(e)) => warn!(target: "engine", error = %e, "tagging failed"),
            Err(e) => warn!(target: "engine", path = %path.display(), error = %e, "tagging task failed"),
        }
    }
}

#[async_trait]
impl TrackDownloader for FetchEngine {
    async fn download(
        &self,
        source: &SearchResult,
        track: &TrackDescriptor,
        cancel: CancelCheck<'_>,
        subfolder: Option<&str>,
    ) -> Result<DownloadOutcome, DownloadError> {
        let track_id = track.track_id();

        let mut pending = Vec::new();
        for &tier in self.config.tiers() {
            let path = output_path(self.config.tier_root(tier), track, subfolder);
            if !self.is_valid_output(&path).await {
                pending.push((tier, path));
            }
        }
        if pending.is_empty() {
            debug!(target: "engine", track = %track_id, "all tiers present");
            return Ok(DownloadOutcome::already_present());
        }
        if cancel() {
            return Ok(DownloadOutcome::cancelled());
        }

        tokio::fs::create_dir_all(&self.config.temp_dir)
            .await
            .map_err(|e| {
                DownloadError::Unexpected(format!(
                    "cannot create temp dir {}: {e}",
                    self.config.temp_dir.display()
                ))
            })?;
        let stem = self.config.temp_dir.join(format!(
            "{RAW_PREFIX}{track_id}_{:08x}",
            rand::random::<u32>()
        ));
        let _cleanup = RawTempGuard { stem: stem.clone() };

        info!(target: "engine", track = %track_id, url = %source.source_url, tiers = pending.len(), "fetching");
        let raw = self.fetch_raw(&source.source_url, &stem).await?;
        if cancel() {
            return Ok(DownloadOutcome::cancelled());
        }

        let probe_hq = self.config.spectral_analysis && pending.iter().any(|(t, _)| *t == Tier::Hq);
        let suspect = probe_hq
            && !is_genuine(
                self.toolkit.as_ref(),
                &raw,
                self.config.spectral_cutoff_hz,
                self.config.spectral_floor_db,
            )
            .await;
        if suspect {
            warn!(target: "engine", track = %track_id, "high band is empty; source is likely upscaled");
        }

        let payload = Arc::new(self.gather_tags(track).await);
        if cancel() {
            return Ok(DownloadOutcome::cancelled());
        }

        let results = join_all(
            pending
                .iter()
                .map(|(tier, path)| self.transcode_tier(*tier, &raw, path)),
        )
        .await;

        let mut bytes = 0;
        let mut failures = Vec::new();
        for ((tier, path), result) in pending.iter().zip(results) {
            match result {
                Ok(()) => {
                    self.write_tags(path, payload.clone()).await;
                    bytes += tokio::fs::metadata(path).await.map(|m| m.len()).unwrap_or(0);
                }
                Err(reason) => failures.push(format!("{}: {reason}", tier.as_str())),
            }
        }

        if failures.is_empty() {
            info!(target: "engine", track = %track_id, bytes, suspect, "done");
            Ok(DownloadOutcome::completed(bytes, suspect))
        } else {
            Ok(DownloadOutcome::failed(bytes, failures.join("; "), suspect))
        }
    }
}
