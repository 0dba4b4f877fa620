//! Internal domain models for track enrichment.
//!
//! These types are OUR types - they don't change when external APIs change.
//! All external API responses get converted into these types via adapters.

/// People credited on a recording, deduplicated in first-seen order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credits {
    /// Composers, writers and lyricists
    pub composers: Vec<String>,
    pub producers: Vec<String>,
    /// Recording, mix and mastering engineers
    pub engineers: Vec<String>,
}

impl Credits {
    pub fn is_empty(&self) -> bool {
        self.composers.is_empty() && self.producers.is_empty() && self.engineers.is_empty()
    }

    /// Add names from `other` that aren't already present.
    pub fn merge(&mut self, other: Credits) {
        push_unique(&mut self.composers, other.composers);
        push_unique(&mut self.producers, other.producers);
        push_unique(&mut self.engineers, other.engineers);
    }
}

/// Append `names` to `list`, skipping blanks and duplicates.
pub(crate) fn push_unique(list: &mut Vec<String>, names: impl IntoIterator<Item = String>) {
    for name in names {
        let name = name.trim();
        if !name.is_empty() && !list.iter().any(|n| n == name) {
            list.push(name.to_string());
        }
    }
}

/// Errors that can occur during enrichment
#[derive(Debug, thiserror::Error)]
pub enum EnrichmentError {
    #[error("API request failed: {0}")]
    ApiError(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Failed to parse response: {0}")]
    Parse(String),

    #[error("No matches found")]
    NoMatches,

    #[error("Rate limited - try again later")]
    RateLimited,
}
