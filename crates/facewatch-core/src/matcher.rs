//! Nearest-label matching over the registered samples.

use crate::types::{Descriptor, LabeledSample};
use std::fmt;

/// Sentinel shown when no registered sample is close enough.
pub const UNKNOWN_LABEL: &str = "unknown";

/// Cosine similarity at which two ArcFace descriptors count as the same person.
pub const DEFAULT_MATCH_SIMILARITY: f32 = 0.40;

/// Euclidean distance threshold; a match requires `distance < threshold`.
///
/// Descriptors are L2-normalised, so this is [`distance_for_similarity`] of
/// [`DEFAULT_MATCH_SIMILARITY`]: `sqrt(2 - 2 * 0.40)`.
pub const DEFAULT_MATCH_THRESHOLD: f32 = 1.095;

/// Euclidean distance between two unit vectors with cosine similarity `similarity`.
pub fn distance_for_similarity(similarity: f32) -> f32 {
    (2.0 - 2.0 * similarity.clamp(-1.0, 1.0)).sqrt()
}

/// Outcome label of a match: a registered name or the `unknown` sentinel.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MatchLabel {
    Known(String),
    Unknown,
}

impl MatchLabel {
    pub fn as_str(&self) -> &str {
        match self {
            MatchLabel::Known(label) => label,
            MatchLabel::Unknown => UNKNOWN_LABEL,
        }
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, MatchLabel::Unknown)
    }
}

impl fmt::Display for MatchLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Best match for a query descriptor.
#[derive(Debug, Clone, PartialEq)]
pub struct BestMatch {
    pub label: MatchLabel,
    /// Distance to the nearest registered sample, even when `label` is unknown.
    pub distance: f32,
}

/// Read-only matcher built from a snapshot of the registered samples.
///
/// Never constructed over an empty set: [`FaceMatcher::new`] returns `None`
/// and callers fall back to detection-only mode.
#[derive(Debug, Clone)]
pub struct FaceMatcher {
    references: Vec<(String, Descriptor)>,
    threshold: f32,
}

impl FaceMatcher {
    pub fn new(samples: &[LabeledSample], threshold: f32) -> Option<Self> {
        if samples.is_empty() {
            return None;
        }
        let references = samples
            .iter()
            .map(|s| (s.label.clone(), s.descriptor.clone()))
            .collect();
        Some(Self { references, threshold })
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.references.iter().map(|(label, _)| label.as_str())
    }

    /// Find the nearest registered label, or `unknown` when the nearest
    /// distance is not below the threshold.
    pub fn best_match(&self, query: &Descriptor) -> BestMatch {
        let mut best_distance = f32::INFINITY;
        let mut best_idx = None;

        for (i, (_, reference)) in self.references.iter().enumerate() {
            let distance = query.euclidean_distance(reference);
            if distance < best_distance {
                best_distance = distance;
                best_idx = Some(i);
            }
        }

        match best_idx {
            Some(idx) if best_distance < self.threshold => BestMatch {
                label: MatchLabel::Known(self.references[idx].0.clone()),
                distance: best_distance,
            },
            _ => BestMatch {
                label: MatchLabel::Unknown,
                distance: best_distance,
            },
        }
    }
}
