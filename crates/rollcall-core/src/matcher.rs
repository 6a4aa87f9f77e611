//! Roster matching — resolve a probe embedding to a known identity.

use crate::types::{Embedding, RosterEntry};

/// Result of matching one probe embedding against the roster.
#[derive(Debug, Clone, PartialEq)]
pub enum MatchOutcome {
    /// Closest reference embedding was within the distance threshold.
    Known { name: String, distance: f32 },
    /// No reference embedding was close enough. `best_distance` is the
    /// global minimum that was still rejected (infinity on an empty roster).
    Unknown { best_distance: f32 },
}

impl MatchOutcome {
    pub fn is_known(&self) -> bool {
        matches!(self, MatchOutcome::Known { .. })
    }
}

/// Find the globally closest reference embedding across every entry in the
/// roster. Returns `Known` only when that minimum distance is within
/// `threshold`; otherwise `Unknown`, no matter which entry was closest.
///
/// Pure function. Ties are broken by roster order (first entry wins);
/// NaN distances are skipped rather than propagated.
pub fn best_match(probe: &Embedding, roster: &[RosterEntry], threshold: f32) -> MatchOutcome {
    let mut best_distance = f32::INFINITY;
    let mut best_name: Option<&str> = None;

    for entry in roster {
        for reference in &entry.embeddings {
            let d = probe.euclidean_distance(reference);
            if d.is_nan() {
                continue;
            }
            if d < best_distance {
                best_distance = d;
                best_name = Some(&entry.name);
            }
        }
    }

    match best_name {
        Some(name) if best_distance <= threshold => MatchOutcome::Known {
            name: name.to_string(),
            distance: best_distance,
        },
        _ => MatchOutcome::Unknown { best_distance },
    }
}
