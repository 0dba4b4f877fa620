//! Tag writing for transcoded outputs.
//!
//! Uses the lofty crate, so the same code path writes the M4A `ilst` atoms
//! for every tier. A [`TagPayload`] is assembled once per track from the
//! descriptor plus whatever enrichment was found (cover, lyrics, credits)
//! and written to each tier's file.
//!
//! Tag failures never fail a track: the audio is already on disk.

use lofty::config::WriteOptions;
use lofty::file::TaggedFileExt;
use lofty::picture::{MimeType, Picture, PictureType};
use lofty::probe::Probe;
use lofty::tag::{Accessor, ItemKey, Tag, TagExt};
use std::path::Path;

use crate::enrichment::Credits;
use crate::error::{Error, Result};
use crate::model::TrackDescriptor;

/// Written to the encoder field of every output.
pub const ENCODER_TAG: &str = concat!("Resonance Builder ", env!("CARGO_PKG_VERSION"));

/// Everything written into one output's tags.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TagPayload {
    pub title: String,
    pub artist: String,
    pub album: String,
    pub album_artist: Option<String>,
    pub year: Option<u32>,
    pub track_number: Option<u32>,
    pub disc_number: Option<u32>,
    pub isrc: Option<String>,
    /// `Source: <external uri>`
    pub comment: Option<String>,
    /// JPEG or PNG bytes
    pub cover: Option<Vec<u8>>,
    pub lyrics: Option<String>,
    pub composers: Vec<String>,
    pub producers: Vec<String>,
    pub engineers: Vec<String>,
}

impl TagPayload {
    /// Core fields from the descriptor; enrichment is added with the `with_*` methods.
    pub fn from_track(track: &TrackDescriptor) -> Self {
        let album_artist = Some(track.album_artist.trim())
            .filter(|s| !s.is_empty())
            .map(|s| crate::model::split_artists(s).join(", "));
        Self {
            title: track.title.clone(),
            artist: track.artists().join(", "),
            album: track.album.clone(),
            album_artist,
            year: track.year(),
            track_number: track.track_number,
            disc_number: track.disc_number,
            isrc: track.normalized_isrc(),
            comment: track
                .external_uri
                .as_deref()
                .filter(|u| !u.is_empty())
                .map(|u| format!("Source: {u}")),
            ..Default::default()
        }
    }

    pub fn with_cover(mut self, cover: Option<Vec<u8>>) -> Self {
        self.cover = cover.filter(|c| detect_image_mime(c).is_some());
        self
    }

    pub fn with_lyrics(mut self, lyrics: Option<String>) -> Self {
        self.lyrics = lyrics;
        self
    }

    pub fn with_credits(mut self, credits: Credits) -> Self {
        self.composers = credits.composers;
        self.producers = credits.producers;
        self.engineers = credits.engineers;
        self
    }
}

/// JPEG/PNG by magic bytes; anything else is not embedded.
pub fn detect_image_mime(bytes: &[u8]) -> Option<MimeType> {
    if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        Some(MimeType::Jpeg)
    } else if bytes.starts_with(&[0x89, b'P', b'N', b'G']) {
        Some(MimeType::Png)
    } else {
        None
    }
}

/// Apply `payload` to an in-memory tag.
fn apply(tag: &mut Tag, payload: &TagPayload) {
    tag.set_title(payload.title.clone());
    tag.set_artist(payload.artist.clone());
    if !payload.album.is_empty() {
        tag.set_album(payload.album.clone());
    }
    if let Some(ref album_artist) = payload.album_artist {
        tag.insert_text(ItemKey::AlbumArtist, album_artist.clone());
    }
    if let Some(year) = payload.year {
        tag.set_year(year);
    }
    if let Some(track) = payload.track_number {
        tag.set_track(track);
    }
    if let Some(disk) = payload.disc_number {
        tag.set_disk(disk);
    }
    if let Some(ref isrc) = payload.isrc {
        tag.insert_text(ItemKey::Isrc, isrc.clone());
    }
    if let Some(ref comment) = payload.comment {
        tag.set_comment(comment.clone());
    }
    if let Some(ref lyrics) = payload.lyrics {
        tag.insert_text(ItemKey::Lyrics, lyrics.clone());
    }
    if !payload.composers.is_empty() {
        tag.insert_text(ItemKey::Composer, payload.composers.join("; "));
    }
    if !payload.producers.is_empty() {
        tag.insert_text(ItemKey::Producer, payload.producers.join("; "));
    }
    if !payload.engineers.is_empty() {
        tag.insert_text(ItemKey::Engineer, payload.engineers.join("; "));
    }
    tag.insert_text(ItemKey::EncoderSoftware, ENCODER_TAG.to_string());

    if let Some(ref cover) = payload.cover
        && let Some(mime) = detect_image_mime(cover)
    {
        tag.remove_picture_type(PictureType::CoverFront);
        tag.push_picture(Picture::new_unchecked(
            PictureType::CoverFront,
            Some(mime),
            None,
            cover.clone(),
        ));
    }
}

/// Write `payload` into the file at `path`, replacing existing values.
///
/// Blocking; run it off the async scheduler.
pub fn write_tags(path: &Path, payload: &TagPayload) -> Result<()> {
    let mut tagged_file = Probe::open(path)
        .map_err(|e| Error::metadata(path, format!("failed to open: {e}")))?
        .read()
        .map_err(|e| Error::metadata(path, format!("failed to read: {e}")))?;

    let tag_type = tagged_file.primary_tag_type();
    if tagged_file.tag_mut(tag_type).is_none() {
        tagged_file.insert_tag(Tag::new(tag_type));
    }
    let Some(tag) = tagged_file.tag_mut(tag_type) else {
        return Err(Error::metadata(path, "no writable tag"));
    };

    apply(tag, payload);

    tag.save_to_path(path, WriteOptions::default())
        .map_err(|e| Error::metadata(path, format!("failed to save: {e}")))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use lofty::tag::TagType;

    fn track() -> TrackDescriptor {
        TrackDescriptor {
            album: "Discovery".into(),
            album_artist: "Daft Punk".into(),
            release_date: "2001-03-12".into(),
            track_number: Some(1),
            disc_number: Some(1),
            isrc: Some("gbduw0000059".into()),
            external_uri: Some("spotify:track:0DiWol3AO6WpXZgp0goxAV".into()),
            ..TrackDescriptor::new(r"Daft Punk\, Inc, Romanthony", "One More Time")
        }
    }

    #[test]
    fn test_payload_from_track() {
        let payload = TagPayload::from_track(&track());
        assert_eq!(payload.artist, "Daft Punk, Inc, Romanthony");
        assert_eq!(payload.year, Some(2001));
        assert_eq!(payload.isrc.as_deref(), Some("GBDUW0000059"));
        assert_eq!(
            payload.comment.as_deref(),
            Some("Source: spotify:track:0DiWol3AO6WpXZgp0goxAV")
        );
        assert_eq!(payload.album_artist.as_deref(), Some("Daft Punk"));
    }

    #[test]
    fn test_detect_image_mime() {
        assert_eq!(detect_image_mime(&[0xFF, 0xD8, 0xFF, 0xE0]), Some(MimeType::Jpeg));
        assert_eq!(detect_image_mime(b"\x89PNG\r\n\x1a\n"), Some(MimeType::Png));
        assert_eq!(detect_image_mime(b"GIF89a"), None);
    }

    #[test]
    fn test_unknown_cover_format_is_dropped() {
        let payload = TagPayload::from_track(&track()).with_cover(Some(b"GIF89a....".to_vec()));
        assert!(payload.cover.is_none());
    }

    #[test]
    fn test_apply_sets_core_fields() {
        let payload = TagPayload::from_track(&track())
            .with_lyrics(Some("One more time, we're gonna celebrate".into()))
            .with_credits(Credits {
                composers: vec!["Thomas Bangalter".into(), "Guy-Manuel de Homem-Christo".into()],
                producers: vec![],
                engineers: vec![],
            })
            .with_cover(Some(vec![0xFF, 0xD8, 0xFF, 0xE0, 0, 0]));

        let mut tag = Tag::new(TagType::Mp4Ilst);
        apply(&mut tag, &payload);

        assert_eq!(tag.title().as_deref(), Some("One More Time"));
        assert_eq!(tag.album().as_deref(), Some("Discovery"));
        assert_eq!(tag.year(), Some(2001));
        assert_eq!(tag.track(), Some(1));
        assert_eq!(tag.get_string(&ItemKey::Isrc), Some("GBDUW0000059"));
        assert_eq!(
            tag.get_string(&ItemKey::Composer),
            Some("Thomas Bangalter; Guy-Manuel de Homem-Christo")
        );
        assert_eq!(tag.pictures().len(), 1);
    }

    #[test]
    fn test_write_tags_non_audio_returns_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fake.m4a");
        std::fs::write(&path, b"not really audio").unwrap();

        let result = write_tags(&path, &TagPayload::from_track(&track()));
        assert!(matches!(result, Err(Error::Metadata { .. })));
    }
}
