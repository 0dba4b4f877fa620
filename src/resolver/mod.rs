//! Maps a track's identity to a playable source reference.
//!
//! # Strategy
//!
//! 1. ISRC: cache under `isrc_<ISRC>` (long TTL), else search `"<ISRC>"`
//! 2. Free text: `"{artist} - {title} Audio"`, cached under the normalized
//!    query (short TTL)
//! 3. First attempt only: alternate shape `"{artist} {title} Topic"`
//!
//! Every hit is written back to the cache. When all strategies come up
//! empty the track is [`DownloadError::NotFound`], which is fatal; if a
//! search transport failed along the way the error stays recoverable
//! instead, since the answer is unknown rather than negative.

mod select;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::cache::{LookupCache, LookupCacheEntry, isrc_key, query_key};
use crate::error::DownloadError;
use crate::guard::RateLimiter;
use crate::model::{SearchResult, TrackDescriptor};
use crate::provider::{FailureReason, ProxyProvider, RequestOptions, SourceProvider};

pub use select::{EXCLUDED_MARKERS, select_candidate};

/// Resolution seam used by the orchestrator.
#[async_trait]
pub trait TrackResolver: Send + Sync {
    /// Resolve `track` on the given 1-based attempt.
    async fn resolve(
        &self,
        track: &TrackDescriptor,
        attempt: u32,
    ) -> Result<SearchResult, DownloadError>;
}

#[derive(Debug, Clone)]
pub struct ResolverConfig {
    pub duration_tolerance_secs: f64,
    pub max_results: usize,
    pub isrc_ttl_hours: u64,
    pub query_ttl_hours: u64,
    pub search_timeout: Duration,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            duration_tolerance_secs: 15.0,
            max_results: 5,
            isrc_ttl_hours: 24 * 30,
            query_ttl_hours: 24 * 7,
            search_timeout: Duration::from_secs(30),
        }
    }
}

impl From<&crate::config::SearchConfig> for ResolverConfig {
    fn from(config: &crate::config::SearchConfig) -> Self {
        Self {
            duration_tolerance_secs: config.duration_tolerance_secs,
            max_results: config.max_results,
            isrc_ttl_hours: config.isrc_cache_ttl_hours,
            query_ttl_hours: config.query_cache_ttl_hours,
            search_timeout: Duration::from_secs(config.search_timeout_secs),
        }
    }
}

/// Free-text query for a track.
pub fn text_query(track: &TrackDescriptor) -> String {
    format!("{} - {} Audio", track.artist, track.title)
}

/// Alternate query shape tried on a first attempt.
pub fn alternate_query(track: &TrackDescriptor) -> String {
    format!("{} {} Topic", track.artist, track.title)
}

/// Outcome of one provider search.
enum SearchStep {
    Found(SearchResult),
    Empty,
}

/// Cache-backed resolver over a [`SourceProvider`].
pub struct Resolver {
    provider: Arc<dyn SourceProvider>,
    cache: LookupCache,
    limiter: Arc<RateLimiter>,
    proxies: Option<Arc<dyn ProxyProvider>>,
    cookies: Option<PathBuf>,
    config: ResolverConfig,
}

impl Resolver {
    pub fn new(
        provider: Arc<dyn SourceProvider>,
        cache: LookupCache,
        limiter: Arc<RateLimiter>,
        config: ResolverConfig,
    ) -> Self {
        Self {
            provider,
            cache,
            limiter,
            proxies: None,
            cookies: None,
            config,
        }
    }

    pub fn with_proxies(mut self, proxies: Arc<dyn ProxyProvider>) -> Self {
        self.proxies = Some(proxies);
        self
    }

    pub fn with_cookies(mut self, cookies: PathBuf) -> Self {
        self.cookies = Some(cookies);
        self
    }

    async fn cached(&self, key: &str, ttl_hours: u64) -> Option<SearchResult> {
        match self.cache.get(key, ttl_hours).await {
            Ok(hit) => hit.map(|e| e.to_search_result()),
            Err(e) => {
                warn!(target: "resolver", key = %key, error = %e, "cache read failed");
                None
            }
        }
    }

    async fn remember(&self, key: &str, result: &SearchResult) {
        if let Err(e) = self.cache.set(&LookupCacheEntry::new(key, result)).await {
            warn!(target: "resolver", key = %key, error = %e, "cache write failed");
        }
    }

    /// One paced provider search plus candidate selection.
    async fn search(
        &self,
        query: &str,
        track: &TrackDescriptor,
    ) -> Result<SearchStep, DownloadError> {
        self.limiter.wait().await;

        let mut opts = RequestOptions::new(self.config.search_timeout);
        opts.cookies = self.cookies.clone();
        opts.proxy = self.proxies.as_ref().and_then(|p| p.get_proxy());

        let result = self
            .provider
            .search(query, self.config.max_results, &opts)
            .await;

        if let (Some(pool), Some(addr)) = (&self.proxies, &opts.proxy) {
            match &result {
                Ok(_) => pool.mark_success(addr),
                Err(_) => pool.mark_failure(addr),
            }
        }

        let candidates = match result {
            Ok(candidates) => {
                self.limiter.record_success();
                candidates
            }
            Err(e) if e.reason == FailureReason::NotFound => {
                self.limiter.record_success();
                Vec::new()
            }
            Err(e) => {
                self.limiter.record_error();
                return Err(e.into());
            }
        };

        let chosen = select_candidate(
            &candidates,
            query,
            track.duration_secs(),
            self.config.duration_tolerance_secs,
        );
        debug!(
            target: "resolver",
            query = %query,
            hits = candidates.len(),
            chosen = chosen.map(|c| c.title.as_str()).unwrap_or("-"),
            "searched"
        );

        Ok(match chosen {
            Some(c) => SearchStep::Found(SearchResult::from_candidate(c)),
            None => SearchStep::Empty,
        })
    }
}

#[async_trait]
impl TrackResolver for Resolver {
    async fn resolve(
        &self,
        track: &TrackDescriptor,
        attempt: u32,
    ) -> Result<SearchResult, DownloadError> {
        let mut transient: Option<DownloadError> = None;

        // Fatal and circuit-tripping errors end resolution; others are
        // remembered and the next strategy is tried.
        let mut absorb = |err: DownloadError| -> Result<(), DownloadError> {
            if err.is_fatal() || err.trips_circuit() {
                return Err(err);
            }
            warn!(target: "resolver", track = %track.track_id(), error = %err, "search failed");
            transient = Some(err);
            Ok(())
        };

        if let Some(isrc) = track.normalized_isrc() {
            let key = isrc_key(&isrc);
            if let Some(hit) = self.cached(&key, self.config.isrc_ttl_hours).await {
                debug!(target: "resolver", key = %key, "cache hit");
                return Ok(hit);
            }
            match self.search(&format!("\"{isrc}\""), track).await {
                Ok(SearchStep::Found(result)) => {
                    self.remember(&key, &result).await;
                    info!(target: "resolver", track = %track.track_id(), via = "isrc", "resolved");
                    return Ok(result);
                }
                Ok(SearchStep::Empty) => {}
                Err(e) => absorb(e)?,
            }
        }

        let query = text_query(track);
        let key = query_key(&query);
        if let Some(hit) = self.cached(&key, self.config.query_ttl_hours).await {
            debug!(target: "resolver", key = %key, "cache hit");
            return Ok(hit);
        }

        let mut queries = vec![query];
        if attempt <= 1 {
            queries.push(alternate_query(track));
        }

        for query in &queries {
            match self.search(query, track).await {
                Ok(SearchStep::Found(result)) => {
                    self.remember(&key, &result).await;
                    info!(target: "resolver", track = %track.track_id(), query = %query, "resolved");
                    return Ok(result);
                }
                Ok(SearchStep::Empty) => {}
                Err(e) => absorb(e)?,
            }
        }

        match transient {
            Some(err) => Err(err),
            None => Err(DownloadError::NotFound(format!(
                "no acceptable candidate for \"{}\"",
                track.display_name()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Candidate;
    use crate::provider::ProviderError;
    use crate::test_utils::{MockProvider, mock_track, temp_db};

    fn hit(title: &str, duration: f64) -> Candidate {
        Candidate {
            url: format!("https://www.youtube.com/watch?v={}", title.len()),
            title: title.to_string(),
            duration: Some(duration),
        }
    }

    fn quiet_limiter() -> Arc<RateLimiter> {
        Arc::new(RateLimiter::new(Duration::ZERO, Duration::ZERO).with_wait_jitter(Duration::ZERO))
    }

    async fn resolver(provider: Arc<MockProvider>) -> (Resolver, LookupCache, tempfile::TempDir) {
        let (pool, dir) = temp_db().await;
        let cache = LookupCache::new(pool);
        let resolver = Resolver::new(
            provider,
            cache.clone(),
            quiet_limiter(),
            ResolverConfig::default(),
        );
        (resolver, cache, dir)
    }

    #[tokio::test]
    async fn test_text_search_resolves_and_caches() {
        let provider = Arc::new(MockProvider::with_results(vec![hit("Test Artist - Test Track", 180.0)]));
        let (resolver, cache, _dir) = resolver(provider.clone()).await;
        let track = mock_track();

        let first = resolver.resolve(&track, 1).await.unwrap();
        assert!(!first.from_cache);
        assert_eq!(provider.search_count(), 1);

        let second = resolver.resolve(&track, 1).await.unwrap();
        assert!(second.from_cache);
        assert_eq!(second.source_url, first.source_url);
        assert_eq!(provider.search_count(), 1);
        assert_eq!(cache.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_isrc_query_is_tried_first() {
        let provider = Arc::new(MockProvider::with_results(vec![hit("Song", 180.0)]));
        let (resolver, cache, _dir) = resolver(provider.clone()).await;
        let track = TrackDescriptor {
            isrc: Some("usrc17607839".into()),
            ..mock_track()
        };

        resolver.resolve(&track, 1).await.unwrap();
        assert_eq!(provider.queries(), vec!["\"USRC17607839\"".to_string()]);
        assert!(cache.get("isrc_USRC17607839", 1).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_alternate_query_only_on_first_attempt() {
        let provider = Arc::new(MockProvider::with_results(vec![]));
        let (resolver, _cache, _dir) = resolver(provider.clone()).await;
        let track = mock_track();

        let err = resolver.resolve(&track, 1).await.unwrap_err();
        assert!(matches!(err, DownloadError::NotFound(_)));
        assert_eq!(
            provider.queries(),
            vec![
                "Test Artist - Test Track Audio".to_string(),
                "Test Artist Test Track Topic".to_string()
            ]
        );

        let before = provider.search_count();
        resolver.resolve(&track, 2).await.unwrap_err();
        assert_eq!(provider.search_count() - before, 1);
    }

    #[tokio::test]
    async fn test_transport_failure_stays_recoverable() {
        let provider = Arc::new(MockProvider::with_search_error(ProviderError::new(
            FailureReason::Network,
            "connection reset",
        )));
        let (resolver, _cache, _dir) = resolver(provider).await;

        let err = resolver.resolve(&mock_track(), 1).await.unwrap_err();
        assert!(!err.is_fatal());
        assert!(matches!(err, DownloadError::Network(_)));
    }

    #[tokio::test]
    async fn test_rate_limit_propagates_immediately() {
        let provider = Arc::new(MockProvider::with_search_error(ProviderError::new(
            FailureReason::RateLimited,
            "HTTP Error 429",
        )));
        let (resolver, _cache, _dir) = resolver(provider.clone()).await;

        let err = resolver.resolve(&mock_track(), 1).await.unwrap_err();
        assert!(err.trips_circuit());
        assert_eq!(provider.search_count(), 1);
    }

    #[tokio::test]
    async fn test_expired_cache_entry_triggers_search() {
        let provider = Arc::new(MockProvider::with_results(vec![hit("Fresh", 180.0)]));
        let (resolver, cache, _dir) = resolver(provider.clone()).await;
        let track = mock_track();

        let stale = LookupCacheEntry {
            key: query_key(&text_query(&track)),
            source_url: "https://stale.test".into(),
            title: "Stale".into(),
            duration: Some(180.0),
            timestamp: chrono::Utc::now() - chrono::Duration::days(30),
        };
        cache.set(&stale).await.unwrap();

        let result = resolver.resolve(&track, 1).await.unwrap();
        assert_eq!(result.resolved_title, "Fresh");
        assert_eq!(provider.search_count(), 1);
    }
}
