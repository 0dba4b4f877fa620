//! MusicBrainz API integration
//!
//! Looks up composer, producer and engineer credits for a recording by ISRC.
//!
//! API docs: https://musicbrainz.org/doc/MusicBrainz_API

pub mod dto;
mod adapter;
mod client;

pub use adapter::{composers_from_work, credits_from_recording, performed_work_ids};
pub use client::{MusicBrainzClient, REQUEST_SPACING};
