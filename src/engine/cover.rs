//! Album cover download and downsizing.
//!
//! Covers are fetched once per URL per run; tracks from the same album
//! share the cached bytes.

use std::collections::HashMap;
use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;

use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use parking_lot::Mutex;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Fit `bytes` within `max_px` on both sides and re-encode as JPEG.
///
/// Images already within bounds are still re-encoded so the embedded
/// picture is always a baseline JPEG. Blocking.
pub fn resize_cover(bytes: &[u8], max_px: u32, quality: u8) -> Result<Vec<u8>, image::ImageError> {
    let img = image::load_from_memory(bytes)?;
    let img = if img.width() > max_px || img.height() > max_px {
        img.resize(max_px, max_px, FilterType::Lanczos3)
    } else {
        img
    };

    let mut out = Cursor::new(Vec::new());
    let encoder = JpegEncoder::new_with_quality(&mut out, quality.clamp(1, 100));
    img.to_rgb8().write_with_encoder(encoder)?;
    Ok(out.into_inner())
}

/// Downloads covers and keeps the resized result for the rest of the run.
pub struct CoverFetcher {
    http_client: reqwest::Client,
    max_px: u32,
    quality: u8,
    cache: Mutex<HashMap<String, Option<Arc<Vec<u8>>>>>,
}

impl CoverFetcher {
    pub fn new(max_px: u32, quality: u8) -> Self {
        let http_client = reqwest::Client::builder()
            .user_agent(crate::provider::random_user_agent())
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            http_client,
            max_px,
            quality,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Resized JPEG for `url`, or `None` if it can't be fetched or decoded.
    ///
    /// Failures are cached too, so a dead URL is tried once per run.
    pub async fn fetch(&self, url: &str) -> Option<Arc<Vec<u8>>> {
        if let Some(cached) = self.cache.lock().get(url) {
            return cached.clone();
        }

        let result = self.download_and_resize(url).await;
        if result.is_none() {
            tracing::debug!(target: "engine", url = %url, "cover unavailable");
        }
        self.cache.lock().insert(url.to_string(), result.clone());
        result
    }

    async fn download_and_resize(&self, url: &str) -> Option<Arc<Vec<u8>>> {
        let response = self.http_client.get(url).send().await.ok()?;
        if !response.status().is_success() {
            return None;
        }
        let bytes = response.bytes().await.ok()?.to_vec();

        let (max_px, quality) = (self.max_px, self.quality);
        let resized = tokio::task::spawn_blocking(move || resize_cover(&bytes, max_px, quality))
            .await
            .ok()?
            .ok()?;
        Some(Arc::new(resized))
    }

    #[cfg(test)]
    pub fn prime(&self, url: &str, bytes: Option<Vec<u8>>) {
        self.cache.lock().insert(url.to_string(), bytes.map(Arc::new));
    }
}
