//! Optional per-track enrichment from public web services.
//!
//! # Architecture
//!
//! Same split for every provider:
//! - **Domain models** (`domain.rs`) - what the rest of the crate sees
//! - **API DTOs** (`musicbrainz/dto.rs`, `lyrics/dto.rs`) - exact response shapes
//! - **Adapters** - convert DTOs to domain models
//! - **Clients** - HTTP clients for the external APIs
//!
//! The engine only talks to [`CreditsApi`] and [`LyricsApi`], so tests swap
//! in the mocks from [`traits::mocks`]. Enrichment never fails a track; a
//! lookup error just means the tag is left out.

pub mod domain;
pub mod lyrics;
pub mod musicbrainz;
pub mod traits;

pub use domain::{Credits, EnrichmentError};
pub use lyrics::LyricsClient;
pub use musicbrainz::MusicBrainzClient;
pub use traits::{CreditsApi, LyricsApi};
