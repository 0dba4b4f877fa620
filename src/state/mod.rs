//! Durable per-track progress ledger.
//!
//! Remembers the outcome of every track a batch touched so an interrupted
//! or repeated batch only works on what is left.
//!
//! # Overview
//!
//! - [`TrackStatus`]: `ok`, `skip` or `error`
//! - [`ProgressRecord`]: one row per track id
//! - [`StateStore`]: upsert, "already done" predicate, stats and reset
//!
//! # Example
//!
//! ```ignore
//! use resonance_builder::state::{StateStore, TrackStatus};
//!
//! let store = StateStore::new(pool);
//! store.mark("isrc_GBDUW0000059", TrackStatus::Ok, 8_400_000, None).await?;
//! assert!(store.is_done("isrc_GBDUW0000059").await?);
//! ```

mod store;
mod types;

pub use store::StateStore;
pub use types::{ProgressRecord, StateStats, TrackStatus};
