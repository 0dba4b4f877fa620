//! MusicBrainz HTTP client
//!
//! Handles communication with the MusicBrainz web service.
//! See: https://musicbrainz.org/doc/MusicBrainz_API
//!
//! IMPORTANT: MusicBrainz requires a User-Agent header and rate limits to 1 req/sec.
//! Every request made through one client is spaced by [`REQUEST_SPACING`].

use std::time::{Duration, Instant};

use serde::de::DeserializeOwned;
use tokio::sync::Mutex;

use super::{adapter, dto};
use crate::enrichment::domain::{Credits, EnrichmentError};

/// User agent string - MusicBrainz requires this
const USER_AGENT: &str = concat!(
    "ResonanceBuilder/",
    env!("CARGO_PKG_VERSION"),
    " (https://github.com/resonance-builder)"
);

/// Slightly over the documented one request per second.
pub const REQUEST_SPACING: Duration = Duration::from_millis(1100);

const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

fn build_http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .timeout(REQUEST_TIMEOUT)
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
}

/// MusicBrainz API client
pub struct MusicBrainzClient {
    http_client: reqwest::Client,
    base_url: String,
    spacing: Duration,
    last_request: Mutex<Option<Instant>>,
}

impl MusicBrainzClient {
    /// Create a new client
    pub fn new() -> Self {
        Self {
            http_client: build_http_client(),
            base_url: "https://musicbrainz.org/ws/2".to_string(),
            spacing: REQUEST_SPACING,
            last_request: Mutex::new(None),
        }
    }

    /// Create a client for testing with custom base URL
    #[cfg(test)]
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            spacing: Duration::ZERO,
            ..Self::new()
        }
    }

    /// Composer, producer and engineer credits for an ISRC.
    ///
    /// Looks up the first recording carrying the ISRC, reads its artist
    /// relations, then adds composers from every work it performs. A failed
    /// work lookup only loses that work's names.
    pub async fn fetch_credits(&self, isrc: &str) -> Result<Credits, EnrichmentError> {
        let isrc = isrc.trim();
        if isrc.is_empty() {
            return Err(EnrichmentError::NoMatches);
        }

        let search: dto::RecordingSearchResponse = self
            .get_json(&format!(
                "{}/recording?query=isrc:{}&fmt=json",
                self.base_url,
                urlencoding::encode(isrc)
            ))
            .await?;
        let recording_id = search
            .recordings
            .into_iter()
            .next()
            .map(|r| r.id)
            .ok_or(EnrichmentError::NoMatches)?;

        let detail: dto::RelationsResponse = self
            .get_json(&format!(
                "{}/recording/{}?inc=artist-rels+work-rels&fmt=json",
                self.base_url, recording_id
            ))
            .await?;

        let mut credits = adapter::credits_from_recording(&detail);
        for work_id in adapter::performed_work_ids(&detail) {
            match self
                .get_json::<dto::RelationsResponse>(&format!(
                    "{}/work/{}?inc=artist-rels&fmt=json",
                    self.base_url, work_id
                ))
                .await
            {
                Ok(work) => credits.merge(Credits {
                    composers: adapter::composers_from_work(&work),
                    ..Default::default()
                }),
                Err(e) => {
                    tracing::debug!(target: "enrichment", work = %work_id, error = %e, "work lookup failed")
                }
            }
        }

        tracing::debug!(
            target: "enrichment",
            isrc = %isrc,
            composers = credits.composers.len(),
            producers = credits.producers.len(),
            engineers = credits.engineers.len(),
            "credits"
        );
        Ok(credits)
    }

    /// Hold the pacing lock until this client may send again.
    async fn pace(&self) {
        let mut last = self.last_request.lock().await;
        if let Some(at) = *last {
            let elapsed = at.elapsed();
            if elapsed < self.spacing {
                tokio::time::sleep(self.spacing - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }

    /// Send a paced GET and parse the JSON body
    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, EnrichmentError> {
        self.pace().await;

        let response = self
            .http_client
            .get(url)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| EnrichmentError::Network(e.to_string()))?;

        let status = response.status();

        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(EnrichmentError::NoMatches);
        }

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS
            || status == reqwest::StatusCode::SERVICE_UNAVAILABLE
        {
            return Err(EnrichmentError::RateLimited);
        }

        if !status.is_success() {
            if let Ok(error) = response.json::<dto::ApiError>().await {
                return Err(EnrichmentError::ApiError(error.error));
            }
            return Err(EnrichmentError::Network(format!(
                "HTTP {}: {}",
                status,
                status.canonical_reason().unwrap_or("Unknown")
            )));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| EnrichmentError::Parse(e.to_string()))
    }
}

impl Default for MusicBrainzClient {
    fn default() -> Self {
        Self::new()
    }
}
