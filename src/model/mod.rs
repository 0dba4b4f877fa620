//! Core data models for the download pipeline.
//!
//! - [`TrackDescriptor`]: one song to acquire, parsed from a playlist export row
//! - [`Candidate`]: one raw provider search hit
//! - [`SearchResult`]: the candidate the resolver settled on
//! - [`DownloadOutcome`]: result of one fetch+transcode attempt
//!
//! Descriptors are immutable once parsed. Enrichment gathered while tagging
//! (cover bytes, lyrics, credits) lives in the engine's tag payload instead.

use sha2::{Digest, Sha256};

/// Characters stripped from filenames: invalid on common filesystems or
/// meaningful to shells.
pub const RESERVED_FILENAME_CHARS: &[char] = &[
    '<', '>', ':', '"', '/', '\\', '|', '?', '*', ';', '$', '#', '&', '(', ')', '!', '[', ']',
    '{', '}',
];

/// Longest filename stem produced by [`sanitize_filename`], in characters.
pub const MAX_FILENAME_CHARS: usize = 150;

/// Column names of the playlist export schema, used when a descriptor has no
/// original row to re-export.
pub mod columns {
    pub const TRACK_URI: &str = "Track URI";
    pub const TRACK_NAME: &str = "Track Name";
    pub const ARTIST_NAMES: &str = "Artist Name(s)";
    pub const ALBUM_NAME: &str = "Album Name";
    pub const ALBUM_ARTIST_NAMES: &str = "Album Artist Name(s)";
    pub const RELEASE_DATE: &str = "Album Release Date";
    pub const IMAGE_URL: &str = "Album Image URL";
    pub const DISC_NUMBER: &str = "Disc Number";
    pub const TRACK_NUMBER: &str = "Track Number";
    pub const DURATION_MS: &str = "Track Duration (ms)";
    pub const ISRC: &str = "ISRC";
    /// Written by the failed-track export so retries land in the same folders
    pub const PLAYLISTS: &str = "Playlists";
    /// Joins names inside the `Playlists` column
    pub const PLAYLIST_SEPARATOR: &str = "|";
}

/// Identity and metadata of one song to acquire.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrackDescriptor {
    pub title: String,
    /// May list collaborators, separated by `,` with literal commas escaped as `\,`
    pub artist: String,
    pub album: String,
    pub album_artist: String,
    /// `YYYY`, `YYYY-MM` or `YYYY-MM-DD`
    pub release_date: String,
    pub track_number: Option<u32>,
    pub disc_number: Option<u32>,
    pub isrc: Option<String>,
    pub external_uri: Option<String>,
    pub cover_art_url: Option<String>,
    /// Duration in milliseconds
    pub duration_ms: Option<u64>,
    /// The original input row, header → value, in column order
    pub raw_fields: Vec<(String, String)>,
    /// Source playlists this track was listed in, first-seen order
    pub playlist_membership: Vec<String>,
}

impl TrackDescriptor {
    pub fn new(artist: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            artist: artist.into(),
            title: title.into(),
            ..Default::default()
        }
    }

    /// Stable identity across runs.
    ///
    /// `isrc_<ISRC>` when an ISRC is present (normalized to upper case with
    /// separators removed), otherwise a content hash of artist and title.
    pub fn track_id(&self) -> String {
        if let Some(isrc) = self.normalized_isrc() {
            return format!("isrc_{isrc}");
        }
        let key = format!(
            "{}_{}",
            self.artist.trim().to_lowercase(),
            self.title.trim().to_lowercase()
        );
        let digest = format!("{:x}", Sha256::digest(key.as_bytes()));
        digest[..16].to_string()
    }

    /// Upper-cased ISRC without hyphens or spaces, if one is set.
    pub fn normalized_isrc(&self) -> Option<String> {
        let isrc = self.isrc.as_deref()?;
        let normalized: String = isrc
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .map(|c| c.to_ascii_uppercase())
            .collect();
        (!normalized.is_empty()).then_some(normalized)
    }

    /// `Artist - Title`, as shown to users and in playlist indexes.
    pub fn display_name(&self) -> String {
        format!("{} - {}", self.artists().join(", "), self.title)
    }

    /// Filename stem for every output tier.
    pub fn safe_filename(&self) -> String {
        sanitize_filename(&self.display_name())
    }

    /// Artists split on unescaped commas, escapes removed.
    pub fn artists(&self) -> Vec<String> {
        split_artists(&self.artist)
    }

    pub fn primary_artist(&self) -> String {
        self.artists().into_iter().next().unwrap_or_default()
    }

    pub fn duration_secs(&self) -> Option<f64> {
        self.duration_ms
            .filter(|ms| *ms > 0)
            .map(|ms| ms as f64 / 1000.0)
    }

    /// Release year from the leading four digits of `release_date`.
    pub fn year(&self) -> Option<u32> {
        self.release_date.get(..4)?.parse().ok()
    }

    /// Folder under each tier root, named after the first source playlist.
    pub fn destination_subfolder(&self) -> Option<String> {
        self.playlist_membership
            .first()
            .map(|name| sanitize_filename(name))
    }

    /// Adds playlists from a duplicate row, keeping first-seen order.
    pub fn merge_membership(&mut self, other: &TrackDescriptor) {
        for name in &other.playlist_membership {
            if !self.playlist_membership.contains(name) {
                self.playlist_membership.push(name.clone());
            }
        }
    }

    /// Row to write when re-exporting this track as playlist input.
    ///
    /// The original row when one was parsed; otherwise the core fields under
    /// the export schema's column names.
    pub fn export_row(&self) -> Vec<(String, String)> {
        if !self.raw_fields.is_empty() {
            return self.raw_fields.clone();
        }
        let opt = |v: Option<u32>| v.map(|n| n.to_string()).unwrap_or_default();
        vec![
            (
                columns::TRACK_URI.into(),
                self.external_uri.clone().unwrap_or_default(),
            ),
            (columns::TRACK_NAME.into(), self.title.clone()),
            (columns::ARTIST_NAMES.into(), self.artist.clone()),
            (columns::ALBUM_NAME.into(), self.album.clone()),
            (columns::ALBUM_ARTIST_NAMES.into(), self.album_artist.clone()),
            (columns::RELEASE_DATE.into(), self.release_date.clone()),
            (
                columns::IMAGE_URL.into(),
                self.cover_art_url.clone().unwrap_or_default(),
            ),
            (columns::DISC_NUMBER.into(), opt(self.disc_number)),
            (columns::TRACK_NUMBER.into(), opt(self.track_number)),
            (
                columns::DURATION_MS.into(),
                self.duration_ms.map(|d| d.to_string()).unwrap_or_default(),
            ),
            (columns::ISRC.into(), self.isrc.clone().unwrap_or_default()),
        ]
    }
}

/// Split an artist field on unescaped commas (`A\, B, C` → `["A, B", "C"]`).
pub fn split_artists(field: &str) -> Vec<String> {
    let mut artists = Vec::new();
    let mut current = String::new();
    let mut chars = field.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\\' if chars.peek() == Some(&',') => {
                current.push(',');
                chars.next();
            }
            ',' => {
                let name = current.trim();
                if !name.is_empty() {
                    artists.push(name.to_string());
                }
                current.clear();
            }
            _ => current.push(c),
        }
    }
    let name = current.trim();
    if !name.is_empty() {
        artists.push(name.to_string());
    }
    artists
}

/// Make `name` safe to use as a filename stem.
///
/// Removes [`RESERVED_FILENAME_CHARS`] and control characters, collapses
/// `..` runs, trims surrounding whitespace and trailing dots, and caps the
/// result at [`MAX_FILENAME_CHARS`]. Never returns an empty string.
pub fn sanitize_filename(name: &str) -> String {
    let mut cleaned: String = name
        .chars()
        .filter(|c| !RESERVED_FILENAME_CHARS.contains(c) && !c.is_control())
        .collect();

    while cleaned.contains("..") {
        cleaned = cleaned.replace("..", ".");
    }

    let mut result: String = cleaned
        .trim()
        .trim_end_matches('.')
        .chars()
        .take(MAX_FILENAME_CHARS)
        .collect();
    result = result.trim().trim_end_matches('.').trim_end().to_string();

    if result.is_empty() {
        return "untitled".to_string();
    }
    result
}

/// One raw hit from a provider search.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub url: String,
    pub title: String,
    /// Seconds, when the provider reports it
    pub duration: Option<f64>,
}

/// Resolved source reference for one track.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchResult {
    pub source_url: String,
    pub resolved_title: String,
    pub resolved_duration: Option<f64>,
    pub from_cache: bool,
}

impl SearchResult {
    pub fn from_candidate(candidate: &Candidate) -> Self {
        Self {
            source_url: candidate.url.clone(),
            resolved_title: candidate.title.clone(),
            resolved_duration: candidate.duration,
            from_cache: false,
        }
    }
}

/// Result of one fetch+transcode attempt.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DownloadOutcome {
    /// Every requested tier is on disk and valid
    pub success: bool,
    /// Bytes written by this attempt across tiers
    pub bytes_written: u64,
    pub error_message: Option<String>,
    /// All tiers already present and valid; nothing was fetched
    pub skipped: bool,
    /// Raw source failed the spectral authenticity probe
    pub suspect_quality: bool,
    /// Quit was requested between stages
    pub cancelled: bool,
}

impl DownloadOutcome {
    pub fn already_present() -> Self {
        Self {
            success: true,
            skipped: true,
            ..Default::default()
        }
    }

    pub fn cancelled() -> Self {
        Self {
            cancelled: true,
            ..Default::default()
        }
    }

    pub fn completed(bytes_written: u64, suspect_quality: bool) -> Self {
        Self {
            success: true,
            bytes_written,
            suspect_quality,
            ..Default::default()
        }
    }

    pub fn failed(bytes_written: u64, message: impl Into<String>, suspect_quality: bool) -> Self {
        Self {
            success: false,
            bytes_written,
            error_message: Some(message.into()),
            suspect_quality,
            ..Default::default()
        }
    }
}
