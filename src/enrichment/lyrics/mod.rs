//! Lyrics from LRCLIB with a lyrics.ovh fallback.

pub mod dto;
mod client;

pub use client::{LyricsClient, MIN_LYRICS_CHARS, clean_artist, clean_title};
