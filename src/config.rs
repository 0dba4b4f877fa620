//! Configuration system using TOML files.
//!
//! Config is stored in the OS-standard config directory:
//! - Windows: %APPDATA%\resonance\config.toml
//! - macOS: ~/Library/Application Support/resonance/config.toml
//! - Linux: ~/.config/resonance/config.toml
//!
//! A different file can be passed with `--config`. Every section has
//! defaults, so a missing or partial file still yields a usable config.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Output, state and collaborator file locations
    pub paths: PathsConfig,

    /// Download, transcode and tagging behaviour
    pub download: DownloadConfig,

    /// Search and lookup-cache behaviour
    pub search: SearchConfig,

    /// Rate limiting, circuit breaker and proxies
    pub network: NetworkConfig,
}

/// Which quality tiers a batch produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum QualityMode {
    /// High bitrate tree only
    Hq,
    /// Low bitrate tree only
    Mobile,
    /// Both trees from one fetch
    Both,
}

impl QualityMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            QualityMode::Hq => "hq",
            QualityMode::Mobile => "mobile",
            QualityMode::Both => "both",
        }
    }
}

/// File locations
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub output_hq: PathBuf,
    pub output_mobile: PathBuf,
    /// SQLite file holding progress and the lookup cache
    pub state_db: PathBuf,
    pub failed_report: PathBuf,
    pub failed_csv: PathBuf,
    pub history_file: PathBuf,
    /// Netscape cookie file; ignored if missing or invalid
    pub cookies_file: PathBuf,
    /// One proxy URL per line; ignored if missing
    pub proxies_file: PathBuf,
    /// Where raw downloads live until transcoded
    pub temp_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            output_hq: PathBuf::from("Audio_HQ"),
            output_mobile: PathBuf::from("Audio_Mobile"),
            state_db: PathBuf::from("resonance.db"),
            failed_report: PathBuf::from("Failed_songs.txt"),
            failed_csv: PathBuf::from("Failed_songs.csv"),
            history_file: PathBuf::from("history.json"),
            cookies_file: PathBuf::from("cookies.txt"),
            proxies_file: PathBuf::from("proxies.txt"),
            temp_dir: std::env::temp_dir().join("resonance"),
        }
    }
}

/// Download and transcode settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadConfig {
    pub quality_mode: QualityMode,
    /// AAC bitrate (kbps) for the HQ tree
    pub hq_bitrate: u32,
    /// AAC bitrate (kbps) for the mobile tree
    pub mobile_bitrate: u32,
    pub max_workers: usize,
    /// Attempts per track, search and download share the counter
    pub max_retries: u32,
    /// Linear backoff base: attempt n sleeps `n * base`
    pub retry_backoff_secs: u64,
    /// Extra sleep after an HTTP 429
    pub rate_limit_cooldown_secs: u64,
    /// EBU R128 loudness normalization during transcode
    pub normalize_audio: bool,
    pub spectral_analysis: bool,
    pub spectral_cutoff_hz: u32,
    /// High-band RMS below this is treated as silent
    pub spectral_floor_db: f64,
    pub transcode_timeout_secs: u64,
    /// Existing outputs shorter than this are re-done
    pub min_valid_duration_secs: f64,
    /// Existing outputs smaller than this are re-done
    pub min_file_bytes: u64,
    pub embed_cover: bool,
    pub cover_max_px: u32,
    pub cover_jpeg_quality: u8,
    pub embed_lyrics: bool,
    pub fetch_credits: bool,
    pub write_playlist_index: bool,
    pub save_history: bool,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            quality_mode: QualityMode::Both,
            hq_bitrate: 256,
            mobile_bitrate: 96,
            max_workers: 3,
            max_retries: 3,
            retry_backoff_secs: 2,
            rate_limit_cooldown_secs: 60,
            normalize_audio: true,
            spectral_analysis: true,
            spectral_cutoff_hz: 16_000,
            spectral_floor_db: -75.0,
            transcode_timeout_secs: 300,
            min_valid_duration_secs: 10.0,
            min_file_bytes: 50_000,
            embed_cover: true,
            cover_max_px: 600,
            cover_jpeg_quality: 85,
            embed_lyrics: true,
            fetch_credits: true,
            write_playlist_index: true,
            save_history: true,
        }
    }
}

impl DownloadConfig {
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_secs(self.retry_backoff_secs)
    }

    pub fn rate_limit_cooldown(&self) -> Duration {
        Duration::from_secs(self.rate_limit_cooldown_secs)
    }

    pub fn transcode_timeout(&self) -> Duration {
        Duration::from_secs(self.transcode_timeout_secs)
    }
}

/// Search settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Max |candidate - track| duration difference in seconds
    pub duration_tolerance_secs: f64,
    /// Candidates requested per provider search
    pub max_results: usize,
    pub search_timeout_secs: u64,
    pub isrc_cache_ttl_hours: u64,
    pub query_cache_ttl_hours: u64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            duration_tolerance_secs: 15.0,
            max_results: 5,
            search_timeout_secs: 30,
            isrc_cache_ttl_hours: 24 * 30,
            query_cache_ttl_hours: 24 * 7,
        }
    }
}

/// Network protection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub use_proxies: bool,
    pub rate_limit_min_ms: u64,
    pub rate_limit_max_ms: u64,
    /// Failures (429/403) before the circuit opens
    pub breaker_threshold: u32,
    pub breaker_cooldown_secs: u64,
    /// Wall clock for a single raw fetch
    pub fetch_timeout_secs: u64,
    /// Socket timeout handed to the provider tool
    pub socket_timeout_secs: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            use_proxies: false,
            rate_limit_min_ms: 500,
            rate_limit_max_ms: 2_000,
            breaker_threshold: 3,
            breaker_cooldown_secs: 300,
            fetch_timeout_secs: 180,
            socket_timeout_secs: 15,
        }
    }
}

// ============================================================================
// Config File Operations
// ============================================================================

/// Get the config directory path
pub fn config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("resonance"))
}

/// Get the full path to the default config file
pub fn config_path() -> Option<PathBuf> {
    config_dir().map(|d| d.join("config.toml"))
}

/// Load configuration from `path`, or the default location when `None`.
///
/// Returns default config if file doesn't exist or can't be parsed.
/// Logs warnings but doesn't fail - we always return a usable config.
pub fn load(path: Option<&Path>) -> Config {
    let Some(path) = path.map(Path::to_path_buf).or_else(config_path) else {
        tracing::warn!("Could not determine config directory, using defaults");
        return Config::default();
    };

    if !path.exists() {
        tracing::info!("No config file found at {:?}, using defaults", path);
        return Config::default();
    }

    match std::fs::read_to_string(&path) {
        Ok(contents) => match toml::from_str(&contents) {
            Ok(config) => {
                tracing::info!("Loaded config from {:?}", path);
                config
            }
            Err(e) => {
                tracing::error!("Failed to parse config file {:?}: {}", path, e);
                tracing::warn!("Using default configuration");
                Config::default()
            }
        },
        Err(e) => {
            tracing::error!("Failed to read config file {:?}: {}", path, e);
            Config::default()
        }
    }
}

/// Save configuration to `path`, or the default location when `None`.
///
/// Creates the parent directory if it doesn't exist.
pub fn save(config: &Config, path: Option<&Path>) -> Result<PathBuf, ConfigError> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => config_path().ok_or(ConfigError::NoConfigDir)?,
    };

    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir).map_err(|e| ConfigError::CreateDir(dir.to_path_buf(), e))?;
    }

    let contents = toml::to_string_pretty(config).map_err(ConfigError::Serialize)?;

    // Write atomically (write to temp, then rename)
    let temp_path = path.with_extension("toml.tmp");
    std::fs::write(&temp_path, &contents).map_err(|e| ConfigError::Write(temp_path.clone(), e))?;
    std::fs::rename(&temp_path, &path)
        .map_err(|e| ConfigError::Rename(temp_path, path.clone(), e))?;

    tracing::info!("Saved config to {:?}", path);
    Ok(path)
}

// ============================================================================
// Error Types
// ============================================================================

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Could not determine config directory")]
    NoConfigDir,

    #[error("Failed to create config directory {0}: {1}")]
    CreateDir(PathBuf, std::io::Error),

    #[error("Failed to serialize config: {0}")]
    Serialize(toml::ser::Error),

    #[error("Failed to write config to {0}: {1}")]
    Write(PathBuf, std::io::Error),

    #[error("Failed to rename temp file {0} to {1}: {2}")]
    Rename(PathBuf, PathBuf, std::io::Error),
}

// ============================================================================
// Tests
// ============================================================================
