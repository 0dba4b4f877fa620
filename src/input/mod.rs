//! Playlist CSV input.
//!
//! Reads playlist exports (one row per track) into [`TrackDescriptor`]s.
//! Headers are matched case-insensitively against a small alias table, so
//! exports from different tools and the failed-track CSV all parse.

use std::collections::HashMap;
use std::path::Path;

use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::model::{TrackDescriptor, columns};

const TITLE: &[&str] = &["track name", "track", "title", "name"];
const ARTIST: &[&str] = &["artist name(s)", "artist", "artist name"];
const ALBUM: &[&str] = &["album name", "album"];
const ALBUM_ARTIST: &[&str] = &["album artist name(s)", "album artist"];
const RELEASE_DATE: &[&str] = &["album release date", "release date", "year"];
const TRACK_NUMBER: &[&str] = &["track number", "track no"];
const DISC_NUMBER: &[&str] = &["disc number", "disc no"];
const ISRC: &[&str] = &["isrc", "code"];
const URI: &[&str] = &["track uri", "uri", "spotify uri"];
const IMAGE_URL: &[&str] = &["album image url", "image url", "cover"];
const DURATION_MS: &[&str] = &["track duration (ms)", "duration_ms", "duration"];

/// Decode file bytes: UTF-8 (BOM stripped) or, failing that, Latin-1.
fn decode(bytes: &[u8]) -> String {
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
    match std::str::from_utf8(bytes) {
        Ok(text) => text.to_string(),
        Err(_) => bytes.iter().map(|&b| b as char).collect(),
    }
}

/// Row accessor over lower-cased, trimmed headers.
struct Row<'a> {
    index: &'a HashMap<String, usize>,
    record: &'a csv::StringRecord,
}

impl Row<'_> {
    fn get(&self, aliases: &[&str]) -> String {
        aliases
            .iter()
            .find_map(|alias| self.index.get(*alias))
            .and_then(|&i| self.record.get(i))
            .map(|v| v.trim().to_string())
            .unwrap_or_default()
    }

    fn opt(&self, aliases: &[&str]) -> Option<String> {
        Some(self.get(aliases)).filter(|v| !v.is_empty())
    }

    /// Leading digits, so `3/12` reads as 3.
    fn number(&self, aliases: &[&str]) -> Option<u32> {
        let value = self.get(aliases);
        let digits: String = value.chars().take_while(|c| c.is_ascii_digit()).collect();
        digits.parse().ok()
    }
}

/// Parse CSV text into descriptors. Rows with neither title nor artist are
/// dropped.
pub fn parse_playlist(text: &str, playlist: &str) -> Result<Vec<TrackDescriptor>> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_reader(text.as_bytes());

    let headers: Vec<String> = reader
        .headers()?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();
    let index: HashMap<String, usize> = headers
        .iter()
        .enumerate()
        .rev()
        .map(|(i, h)| (h.to_lowercase(), i))
        .collect();
    let playlists_col = index.get(&columns::PLAYLISTS.to_lowercase()).copied();

    let mut tracks = Vec::new();
    for record in reader.records() {
        let record = record?;
        let row = Row {
            index: &index,
            record: &record,
        };

        let title = row.get(TITLE);
        let artist = row.get(ARTIST);
        if title.is_empty() && artist.is_empty() {
            continue;
        }

        let raw_fields = headers
            .iter()
            .enumerate()
            .filter(|(i, _)| Some(*i) != playlists_col)
            .map(|(i, h)| (h.clone(), record.get(i).unwrap_or_default().to_string()))
            .collect();

        let membership: Vec<String> = playlists_col
            .and_then(|i| record.get(i))
            .map(|v| {
                v.split(columns::PLAYLIST_SEPARATOR)
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(String::from)
                    .collect()
            })
            .filter(|names: &Vec<String>| !names.is_empty())
            .unwrap_or_else(|| vec![playlist.to_string()]);

        let duration_ms = row
            .opt(DURATION_MS)
            .filter(|d| d.chars().all(|c| c.is_ascii_digit()))
            .and_then(|d| d.parse::<u64>().ok())
            .filter(|d| *d > 0);

        tracks.push(TrackDescriptor {
            title,
            artist,
            album: row.get(ALBUM),
            album_artist: row.get(ALBUM_ARTIST),
            release_date: row.get(RELEASE_DATE),
            track_number: row.number(TRACK_NUMBER),
            disc_number: row.number(DISC_NUMBER),
            isrc: row.opt(ISRC),
            external_uri: row.opt(URI),
            cover_art_url: row.opt(IMAGE_URL),
            duration_ms,
            raw_fields,
            playlist_membership: membership,
        });
    }

    Ok(tracks)
}

/// Read one playlist file. Tracks belong to the playlist named by the file
/// stem unless the file carries its own `Playlists` column.
pub fn read_playlist(path: &Path) -> Result<Vec<TrackDescriptor>> {
    if !path.is_file() {
        return Err(Error::not_found(path));
    }
    let bytes = std::fs::read(path)?;
    if bytes.contains(&0) {
        return Err(Error::InvalidFormat(format!(
            "{} looks binary, not CSV",
            path.display()
        )));
    }
    let playlist = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();

    let tracks = parse_playlist(&decode(&bytes), &playlist)?;
    debug!(target: "input", path = %path.display(), tracks = tracks.len(), "playlist parsed");
    Ok(tracks)
}

/// Merge duplicates by track id, keeping the first occurrence and the
/// union of playlist memberships in first-seen order.
pub fn dedup_tracks(tracks: Vec<TrackDescriptor>) -> Vec<TrackDescriptor> {
    let mut positions: HashMap<String, usize> = HashMap::new();
    let mut unique: Vec<TrackDescriptor> = Vec::with_capacity(tracks.len());

    for track in tracks {
        let id = track.track_id();
        match positions.get(&id) {
            Some(&pos) => unique[pos].merge_membership(&track),
            None => {
                positions.insert(id, unique.len());
                unique.push(track);
            }
        }
    }
    unique
}

/// Read every file and deduplicate across them.
///
/// A file that fails to parse is logged and skipped; the batch continues
/// with the rest.
pub fn collect_tracks<P: AsRef<Path>>(paths: &[P]) -> Result<Vec<TrackDescriptor>> {
    let mut all = Vec::new();
    let mut read_any = false;
    for path in paths {
        let path = path.as_ref();
        match read_playlist(path) {
            Ok(tracks) => {
                read_any = true;
                all.extend(tracks);
            }
            Err(e) => warn!(target: "input", path = %path.display(), error = %e, "skipping playlist"),
        }
    }
    if !read_any && !paths.is_empty() {
        return Err(Error::InvalidFormat("no readable playlist files".into()));
    }

    let total = all.len();
    let unique = dedup_tracks(all);
    info!(target: "input", files = paths.len(), rows = total, unique = unique.len(), "tracks collected");
    Ok(unique)
}
