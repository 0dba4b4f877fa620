//! MusicBrainz API Data Transfer Objects
//!
//! These types match what the MusicBrainz API returns for the three calls we
//! make: ISRC search, recording lookup with relations, and work lookup.
//! DO NOT use these types outside the musicbrainz module - convert to domain types.
//!
//! API Reference: https://musicbrainz.org/doc/MusicBrainz_API

use serde::Deserialize;

/// `GET /recording?query=isrc:...`
#[derive(Debug, Clone, Deserialize)]
pub struct RecordingSearchResponse {
    #[serde(default)]
    pub recordings: Vec<RecordingSummary>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RecordingSummary {
    /// MusicBrainz recording ID
    pub id: String,
    pub title: Option<String>,
}

/// `GET /recording/{id}?inc=artist-rels+work-rels` and
/// `GET /work/{id}?inc=artist-rels`; both carry a relation list.
#[derive(Debug, Clone, Deserialize)]
pub struct RelationsResponse {
    pub id: String,
    #[serde(default)]
    pub relations: Vec<Relation>,
}

/// One entry of a `relations` array.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Relation {
    /// Relation type, e.g. "composer", "producer", "performance"
    #[serde(rename = "type")]
    pub relation_type: Option<String>,
    /// "artist", "work", ...
    pub target_type: Option<String>,
    pub artist: Option<RelatedArtist>,
    pub work: Option<RelatedWork>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RelatedArtist {
    pub id: Option<String>,
    pub name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RelatedWork {
    pub id: Option<String>,
    pub title: Option<String>,
}

/// Error body
#[derive(Debug, Clone, Deserialize)]
pub struct ApiError {
    pub error: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_isrc_search() {
        let json = r#"{
            "created": "2024-01-01T00:00:00.000Z",
            "count": 1,
            "offset": 0,
            "recordings": [
                {"id": "9f9b3a4b-2c4e-4a3d-9e7f-1b2c3d4e5f60", "score": 100, "title": "Blinding Lights"}
            ]
        }"#;
        let parsed: RecordingSearchResponse = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.recordings.len(), 1);
        assert_eq!(parsed.recordings[0].title.as_deref(), Some("Blinding Lights"));
    }

    #[test]
    fn test_parse_relations() {
        let json = r#"{
            "id": "rec-1",
            "title": "Blinding Lights",
            "relations": [
                {"type": "producer", "target-type": "artist", "artist": {"id": "a1", "name": "Max Martin"}},
                {"type": "performance", "target-type": "work", "work": {"id": "w1", "title": "Blinding Lights"}}
            ]
        }"#;
        let parsed: RelationsResponse = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.relations.len(), 2);
        assert_eq!(parsed.relations[0].relation_type.as_deref(), Some("producer"));
        assert_eq!(
            parsed.relations[1].work.as_ref().and_then(|w| w.id.as_deref()),
            Some("w1")
        );
    }

    #[test]
    fn test_missing_relations_defaults_empty() {
        let parsed: RelationsResponse = serde_json::from_str(r#"{"id": "w1"}"#).unwrap();
        assert!(parsed.relations.is_empty());
    }
}
