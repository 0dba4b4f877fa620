//! Spectral authenticity probe.
//!
//! Lossy encoders low-pass the signal; a file re-encoded from a low bitrate
//! source keeps that shelf. Measuring what survives a high-pass at the
//! cutoff tells the two apart.

use std::path::Path;

use super::tools::MediaToolkit;

/// Default high-pass cutoff.
pub const DEFAULT_CUTOFF_HZ: u32 = 16_000;
/// Below this the band counts as empty.
pub const DEFAULT_FLOOR_DB: f64 = -75.0;

/// False when the band above `cutoff_hz` is silent or under `floor_db`.
///
/// A missing file is not genuine. Any probe failure counts as genuine.
pub async fn is_genuine(
    toolkit: &dyn MediaToolkit,
    file: &Path,
    cutoff_hz: u32,
    floor_db: f64,
) -> bool {
    if !tokio::fs::try_exists(file).await.unwrap_or(false) {
        return false;
    }

    match toolkit.high_band_rms(file, cutoff_hz).await {
        Ok(level) => {
            tracing::debug!(target: "engine", file = %file.display(), cutoff_hz, level_db = level, "high band level");
            level.is_finite() && level >= floor_db
        }
        Err(e) => {
            tracing::debug!(target: "engine", file = %file.display(), error = %e, "spectral probe failed");
            true
        }
    }
}
