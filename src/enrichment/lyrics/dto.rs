//! Response shapes for LRCLIB and lyrics.ovh.

use serde::Deserialize;

/// `GET https://lrclib.net/api/get`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LrclibResponse {
    pub id: Option<u64>,
    pub track_name: Option<String>,
    pub artist_name: Option<String>,
    pub duration: Option<f64>,
    pub instrumental: Option<bool>,
    /// Plain text, no timestamps
    pub plain_lyrics: Option<String>,
    /// LRC format with `[mm:ss.xx]` timestamps
    pub synced_lyrics: Option<String>,
}

/// `GET https://api.lyrics.ovh/v1/{artist}/{title}`
#[derive(Debug, Clone, Deserialize)]
pub struct OvhResponse {
    pub lyrics: Option<String>,
}
