//! Best-candidate selection within one provider search.

use crate::model::Candidate;

/// Title words that mark an alternate version of a song.
pub const EXCLUDED_MARKERS: &[&str] = &["cover", "remix", "live", "karaoke", "instrumental"];

/// Pick the best candidate for a track.
///
/// Titles containing an [`EXCLUDED_MARKERS`] word are dropped unless the
/// query itself asks for one. With a known `target` duration, the remaining
/// candidate closest to it wins if within `tolerance` seconds; otherwise
/// the first remaining candidate, and if every candidate was dropped, the
/// first raw one. Returns `None` only for an empty list.
pub fn select_candidate<'a>(
    candidates: &'a [Candidate],
    query: &str,
    target: Option<f64>,
    tolerance: f64,
) -> Option<&'a Candidate> {
    let query = query.to_lowercase();
    let allow_markers = EXCLUDED_MARKERS.iter().any(|m| query.contains(m));

    let eligible: Vec<&Candidate> = candidates
        .iter()
        .filter(|c| {
            allow_markers || {
                let title = c.title.to_lowercase();
                !EXCLUDED_MARKERS.iter().any(|m| title.contains(m))
            }
        })
        .collect();

    if let Some(target) = target {
        let best = eligible
            .iter()
            .filter_map(|c| c.duration.map(|d| (*c, (d - target).abs())))
            .filter(|(_, diff)| *diff <= tolerance)
            .min_by(|a, b| a.1.total_cmp(&b.1));
        if let Some((candidate, _)) = best {
            return Some(candidate);
        }
    }

    eligible.first().copied().or_else(|| candidates.first())
}
