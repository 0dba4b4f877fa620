//! Files written when a batch ends: failed-track exports, session history
//! and per-playlist indexes.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Local;
use serde::{Deserialize, Serialize};

use crate::engine::output_path;
use crate::error::{Result, ResultExt};
use crate::model::{TrackDescriptor, columns, sanitize_filename};

/// Sessions kept in the history file.
pub const HISTORY_LIMIT: usize = 50;

/// One track that ended in `Failed`.
#[derive(Debug, Clone, PartialEq)]
pub struct FailedTrack {
    pub track: TrackDescriptor,
    pub error: String,
}

fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)
            .with_context(format!("creating {}", parent.display()))?;
    }
    Ok(())
}

/// Human-readable failure list.
pub fn write_failed_report(path: &Path, failed: &[FailedTrack]) -> Result<()> {
    ensure_parent(path)?;
    let mut out = String::new();
    out.push_str(&format!(
        "Failed tracks: {} ({})\n\n",
        failed.len(),
        Local::now().format("%Y-%m-%d %H:%M")
    ));
    for entry in failed {
        out.push_str(&format!(
            "• {}\n  Error: {}\n",
            entry.track.display_name(),
            entry.error
        ));
    }
    std::fs::write(path, out).with_context(format!("writing {}", path.display()))?;
    Ok(())
}

/// Failure list as playlist CSV, readable again as batch input.
///
/// Columns are the union of every failed row's original headers in
/// first-seen order, plus `Playlists` carrying each track's memberships.
pub fn write_failed_csv(path: &Path, failed: &[FailedTrack]) -> Result<()> {
    ensure_parent(path)?;

    let rows: Vec<Vec<(String, String)>> = failed.iter().map(|f| f.track.export_row()).collect();
    let mut headers: Vec<String> = Vec::new();
    for row in &rows {
        for (header, _) in row {
            if !headers.contains(header) && header != columns::PLAYLISTS {
                headers.push(header.clone());
            }
        }
    }

    let mut writer = csv::Writer::from_path(path)?;
    let mut header_row = headers.clone();
    header_row.push(columns::PLAYLISTS.to_string());
    writer.write_record(&header_row)?;

    for (entry, row) in failed.iter().zip(&rows) {
        let mut record: Vec<String> = headers
            .iter()
            .map(|h| {
                row.iter()
                    .find(|(k, _)| k == h)
                    .map(|(_, v)| v.clone())
                    .unwrap_or_default()
            })
            .collect();
        record.push(entry.track.playlist_membership.join(columns::PLAYLIST_SEPARATOR));
        writer.write_record(&record)?;
    }
    writer.flush().with_context(format!("writing {}", path.display()))?;
    Ok(())
}

/// One finished batch in the history file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub date: String,
    pub success: u64,
    pub skipped: u64,
    pub failed: u64,
    pub bytes: u64,
    pub mode: String,
}

/// Append `record`, keeping the newest [`HISTORY_LIMIT`] sessions.
///
/// An unreadable history file is replaced.
pub fn append_history(path: &Path, record: SessionRecord) -> Result<()> {
    ensure_parent(path)?;
    let mut sessions: Vec<SessionRecord> = std::fs::read_to_string(path)
        .ok()
        .and_then(|text| serde_json::from_str(&text).ok())
        .unwrap_or_default();

    sessions.push(record);
    if sessions.len() > HISTORY_LIMIT {
        let excess = sessions.len() - HISTORY_LIMIT;
        sessions.drain(..excess);
    }

    let json = serde_json::to_string_pretty(&sessions)?;
    std::fs::write(path, json).with_context(format!("writing {}", path.display()))?;
    Ok(())
}

/// Write `<root>/<playlist>.m3u8` for every playlist with at least one
/// track present under `root`. Returns the files written.
///
/// Entries are relative to `root`, in input order.
pub fn write_playlist_indexes(root: &Path, tracks: &[TrackDescriptor]) -> Result<Vec<PathBuf>> {
    let mut by_playlist: BTreeMap<&str, Vec<(&TrackDescriptor, PathBuf)>> = BTreeMap::new();
    for track in tracks {
        let subfolder = track.destination_subfolder();
        let file = output_path(root, track, subfolder.as_deref());
        if !file.is_file() {
            continue;
        }
        let Ok(relative) = file.strip_prefix(root) else {
            continue;
        };
        for playlist in &track.playlist_membership {
            by_playlist
                .entry(playlist.as_str())
                .or_default()
                .push((track, relative.to_path_buf()));
        }
    }

    let mut written = Vec::new();
    for (playlist, entries) in by_playlist {
        let index = root.join(format!("{}.m3u8", sanitize_filename(playlist)));
        let mut file = std::fs::File::create(&index)
            .with_context(format!("creating {}", index.display()))?;
        let mut body = String::from("#EXTM3U\n");
        for (track, relative) in entries {
            let secs = track.duration_ms.map(|ms| (ms / 1000) as i64).unwrap_or(-1);
            body.push_str(&format!("#EXTINF:{secs},{}\n", track.display_name()));
            // `/` separators on every platform
            let line: Vec<String> = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect();
            body.push_str(&line.join("/"));
            body.push('\n');
        }
        file.write_all(body.as_bytes())
            .with_context(format!("writing {}", index.display()))?;
        written.push(index);
    }

    tracing::debug!(target: "orchestrator", root = %root.display(), count = written.len(), "playlist indexes written");
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::read_playlist;

    fn failed(artist: &str, title: &str, playlists: &[&str], error: &str) -> FailedTrack {
        let mut track = TrackDescriptor::new(artist, title);
        track.playlist_membership = playlists.iter().map(|s| s.to_string()).collect();
        FailedTrack {
            track,
            error: error.into(),
        }
    }

    #[test]
    fn test_failed_report_lists_each_track() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reports/failed.txt");
        write_failed_report(
            &path,
            &[
                failed("Artist A", "Song A", &[], "No matching source found: x"),
                failed("Artist B", "Song B", &[], "Timed out: y"),
            ],
        )
        .unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("Failed tracks: 2"));
        assert!(text.contains("• Artist A - Song A\n  Error: No matching source found: x"));
        assert!(text.contains("• Artist B - Song B"));
    }

    #[test]
    fn test_failed_csv_preserves_raw_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("failed.csv");

        let mut entry = failed("Artist A", "Song A", &["Road Trip", "Gym"], "boom");
        entry.track.raw_fields = vec![
            ("Track Name".into(), "Song A".into()),
            ("Artist Name(s)".into(), "Artist A".into()),
            ("Popularity".into(), "42".into()),
        ];
        write_failed_csv(&path, &[entry]).unwrap();

        let mut reader = csv::Reader::from_path(&path).unwrap();
        let headers = reader.headers().unwrap().clone();
        assert_eq!(
            headers.iter().collect::<Vec<_>>(),
            vec!["Track Name", "Artist Name(s)", "Popularity", "Playlists"]
        );
        let record = reader.records().next().unwrap().unwrap();
        assert_eq!(&record[2], "42");
        assert_eq!(&record[3], "Road Trip|Gym");
    }

    #[test]
    fn test_failed_csv_is_valid_input() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("failed.csv");

        let mut entry = failed("Artist A", "Song A", &["Road Trip"], "boom");
        entry.track.isrc = Some("USRC17607839".into());
        entry.track.duration_ms = Some(200_000);
        write_failed_csv(&path, &[entry.clone()]).unwrap();

        let tracks = read_playlist(&path).unwrap();
        assert_eq!(tracks.len(), 1);
        assert_eq!(tracks[0].track_id(), entry.track.track_id());
        assert_eq!(tracks[0].duration_ms, Some(200_000));
        assert_eq!(tracks[0].playlist_membership, vec!["Road Trip".to_string()]);
    }

    #[test]
    fn test_history_keeps_newest_sessions() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.json");

        for i in 0..(HISTORY_LIMIT as u64 + 5) {
            append_history(
                &path,
                SessionRecord {
                    date: format!("day {i}"),
                    success: i,
                    skipped: 0,
                    failed: 0,
                    bytes: 0,
                    mode: "both".into(),
                },
            )
            .unwrap();
        }

        let sessions: Vec<SessionRecord> =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(sessions.len(), HISTORY_LIMIT);
        assert_eq!(sessions[0].success, 5);
        assert_eq!(sessions.last().unwrap().success, HISTORY_LIMIT as u64 + 4);
    }

    #[test]
    fn test_corrupt_history_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.json");
        std::fs::write(&path, "{ not json").unwrap();

        append_history(
            &path,
            SessionRecord {
                date: "today".into(),
                success: 1,
                skipped: 2,
                failed: 3,
                bytes: 4,
                mode: "hq".into(),
            },
        )
        .unwrap();

        let sessions: Vec<SessionRecord> =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].failed, 3);
    }

    #[test]
    fn test_playlist_index_lists_present_tracks() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();

        let mut present = TrackDescriptor::new("Artist A", "Song A");
        present.duration_ms = Some(215_500);
        present.playlist_membership = vec!["Road Trip".into(), "Gym".into()];
        let mut missing = TrackDescriptor::new("Artist B", "Song B");
        missing.playlist_membership = vec!["Road Trip".into()];

        let file = output_path(root, &present, Some("Road Trip"));
        std::fs::create_dir_all(file.parent().unwrap()).unwrap();
        std::fs::write(&file, b"audio").unwrap();

        let written = write_playlist_indexes(root, &[present, missing]).unwrap();
        assert_eq!(written.len(), 2);

        let index = std::fs::read_to_string(root.join("Road Trip.m3u8")).unwrap();
        assert_eq!(
            index,
            "#EXTM3U\n#EXTINF:215,Artist A - Song A\nRoad Trip/Artist A - Song A.m4a\n"
        );
        assert!(root.join("Gym.m3u8").exists());
    }

    #[test]
    fn test_playlist_index_skips_empty_root() {
        let dir = tempfile::tempdir().unwrap();
        let mut track = TrackDescriptor::new("Artist A", "Song A");
        track.playlist_membership = vec!["Road Trip".into()];

        let written = write_playlist_indexes(dir.path(), &[track]).unwrap();
        assert!(written.is_empty());
    }
}
