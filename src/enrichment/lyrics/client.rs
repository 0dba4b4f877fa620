//! Lyrics lookup over two free services.
//!
//! LRCLIB first (synced lyrics preferred over plain), lyrics.ovh second.
//! Anything shorter than [`MIN_LYRICS_CHARS`] is treated as no result.

use std::time::Duration;

use super::dto;
use crate::enrichment::domain::EnrichmentError;

const USER_AGENT: &str = concat!(
    "ResonanceBuilder/",
    env!("CARGO_PKG_VERSION"),
    " (https://github.com/resonance-builder)"
);

/// Responses at or under this length are placeholders, not lyrics.
pub const MIN_LYRICS_CHARS: usize = 50;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// First credited artist only.
pub fn clean_artist(artist: &str) -> String {
    crate::model::split_artists(artist)
        .into_iter()
        .next()
        .unwrap_or_else(|| artist.trim().to_string())
}

/// Title without version suffixes such as `(Remastered)` or `- Live`.
pub fn clean_title(title: &str) -> String {
    let base = title.split('(').next().unwrap_or(title);
    let base = base.split(" - ").next().unwrap_or(base);
    let cleaned = base.trim();
    if cleaned.is_empty() {
        title.trim().to_string()
    } else {
        cleaned.to_string()
    }
}

fn usable(lyrics: Option<String>) -> Option<String> {
    lyrics
        .map(|l| l.trim().to_string())
        .filter(|l| l.chars().count() > MIN_LYRICS_CHARS)
}

pub struct LyricsClient {
    http_client: reqwest::Client,
    lrclib_url: String,
    ovh_url: String,
}

impl LyricsClient {
    pub fn new() -> Self {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            http_client,
            lrclib_url: "https://lrclib.net/api/get".to_string(),
            ovh_url: "https://api.lyrics.ovh/v1".to_string(),
        }
    }

    #[cfg(test)]
    pub fn with_base_urls(lrclib_url: impl Into<String>, ovh_url: impl Into<String>) -> Self {
        Self {
            lrclib_url: lrclib_url.into(),
            ovh_url: ovh_url.into(),
            ..Self::new()
        }
    }

    /// Lyrics for a track; `duration_secs` narrows the LRCLIB match.
    pub async fn fetch_lyrics(
        &self,
        artist: &str,
        title: &str,
        duration_secs: Option<u64>,
    ) -> Result<String, EnrichmentError> {
        let artist = clean_artist(artist);
        let title = clean_title(title);

        match self.lrclib(&artist, &title, duration_secs).await {
            Ok(Some(lyrics)) => return Ok(lyrics),
            Ok(None) => {}
            Err(e) => tracing::debug!(target: "enrichment", error = %e, "lrclib lookup failed"),
        }

        match self.ovh(&artist, &title).await? {
            Some(lyrics) => Ok(lyrics),
            None => Err(EnrichmentError::NoMatches),
        }
    }

    async fn lrclib(
        &self,
        artist: &str,
        title: &str,
        duration_secs: Option<u64>,
    ) -> Result<Option<String>, EnrichmentError> {
        let mut params = vec![
            ("artist_name", artist.to_string()),
            ("track_name", title.to_string()),
        ];
        if let Some(secs) = duration_secs.filter(|s| *s > 0) {
            params.push(("duration", secs.to_string()));
        }

        let response = self
            .http_client
            .get(&self.lrclib_url)
            .query(&params)
            .send()
            .await
            .map_err(|e| EnrichmentError::Network(e.to_string()))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(EnrichmentError::ApiError(format!("HTTP {}", response.status())));
        }

        let body: dto::LrclibResponse = response
            .json()
            .await
            .map_err(|e| EnrichmentError::Parse(e.to_string()))?;
        Ok(usable(body.synced_lyrics).or_else(|| usable(body.plain_lyrics)))
    }

    async fn ovh(&self, artist: &str, title: &str) -> Result<Option<String>, EnrichmentError> {
        let url = format!(
            "{}/{}/{}",
            self.ovh_url,
            urlencoding::encode(artist),
            urlencoding::encode(title)
        );
        let response = self
            .http_client
            .get(&url)
            .send()
            .await
            .map_err(|e| EnrichmentError::Network(e.to_string()))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(EnrichmentError::ApiError(format!("HTTP {}", response.status())));
        }

        let body: dto::OvhResponse = response
            .json()
            .await
            .map_err(|e| EnrichmentError::Parse(e.to_string()))?;
        Ok(usable(body.lyrics))
    }
}

impl Default for LyricsClient {
    fn default() -> Self {
        Self::new()
    }
}
