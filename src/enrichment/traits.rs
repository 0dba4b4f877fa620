//! Trait definitions for external API clients.
//!
//! These traits enable dependency injection and mocking for tests.
//! Production code uses the real client implementations, while tests
//! can substitute mock implementations.

use async_trait::async_trait;

use super::domain::{Credits, EnrichmentError};

/// Credits lookup by ISRC.
#[async_trait]
pub trait CreditsApi: Send + Sync {
    async fn fetch_credits(&self, isrc: &str) -> Result<Credits, EnrichmentError>;
}

/// Lyrics lookup by artist and title.
#[async_trait]
pub trait LyricsApi: Send + Sync {
    async fn fetch_lyrics(
        &self,
        artist: &str,
        title: &str,
        duration_secs: Option<u64>,
    ) -> Result<String, EnrichmentError>;
}

#[async_trait]
impl CreditsApi for super::musicbrainz::MusicBrainzClient {
    async fn fetch_credits(&self, isrc: &str) -> Result<Credits, EnrichmentError> {
        self.fetch_credits(isrc).await
    }
}

#[async_trait]
impl LyricsApi for super::lyrics::LyricsClient {
    async fn fetch_lyrics(
        &self,
        artist: &str,
        title: &str,
        duration_secs: Option<u64>,
    ) -> Result<String, EnrichmentError> {
        self.fetch_lyrics(artist, title, duration_secs).await
    }
}
