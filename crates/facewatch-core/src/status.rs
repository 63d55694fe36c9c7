//! Debounce policy for recognition messages.
//!
//! Frames arrive far faster than a person can read, so a label is only
//! announced when it changes, when the same known label has been on screen
//! for the re-announcement interval, or never again for repeated unknowns.
//! A shown label survives short detection dropouts for the grace period.

use crate::matcher::MatchLabel;
use std::time::{Duration, Instant};

pub const DEFAULT_REANNOUNCE_AFTER: Duration = Duration::from_secs(3);
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DebounceTimings {
    /// Minimum time before the same known label is announced again.
    pub reannounce_after: Duration,
    /// How long a shown label survives frames without any detection.
    pub grace: Duration,
}

impl Default for DebounceTimings {
    fn default() -> Self {
        Self {
            reannounce_after: DEFAULT_REANNOUNCE_AFTER,
            grace: DEFAULT_GRACE_PERIOD,
        }
    }
}

/// Last announced label and when it was announced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LabelState {
    pub last_label: Option<MatchLabel>,
    pub last_label_at: Option<Instant>,
    /// Most recent frame with at least one detection.
    pub last_seen_at: Option<Instant>,
}

impl LabelState {
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Record that the frame at `now` contained at least one face.
    pub fn mark_seen(&mut self, now: Instant) {
        self.last_seen_at = Some(now);
    }

    /// Decide whether `label` observed at `now` should be announced.
    /// Updates the state when it returns `true`.
    pub fn observe(&mut self, label: &MatchLabel, now: Instant, timings: &DebounceTimings) -> bool {
        let emit = match label {
            MatchLabel::Unknown => !matches!(self.last_label, Some(MatchLabel::Unknown)),
            MatchLabel::Known(_) => {
                self.last_label.as_ref() != Some(label)
                    || self.last_label_at.map_or(true, |at| {
                        now.saturating_duration_since(at) >= timings.reannounce_after
                    })
            }
        };

        if emit {
            self.last_label = Some(label.clone());
            self.last_label_at = Some(now);
        }
        emit
    }

    /// Handle a frame at `now` with no detections. Returns `true` when the
    /// shown label has outlived the grace period and was cleared.
    pub fn observe_absence(&mut self, now: Instant, timings: &DebounceTimings) -> bool {
        if self.last_label.is_none() {
            return false;
        }

        let expired = self
            .last_seen_at
            .or(self.last_label_at)
            .map_or(true, |at| now.saturating_duration_since(at) > timings.grace);

        if expired {
            self.reset();
        }
        expired
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn known(label: &str) -> MatchLabel {
        MatchLabel::Known(label.to_string())
    }

    fn secs(s: f32) -> Duration {
        Duration::from_secs_f32(s)
    }

    /// Feed `(offset_secs, label)` pairs and count announcements.
    fn count_emissions(sequence: &[(f32, MatchLabel)]) -> usize {
        let timings = DebounceTimings::default();
        let start = Instant::now();
        let mut state = LabelState::default();
        sequence
            .iter()
            .filter(|(offset, label)| {
                let now = start + secs(*offset);
                state.mark_seen(now);
                state.observe(label, now, &timings)
            })
            .count()
    }

    #[test]
    fn test_same_label_within_interval_emits_once() {
        let a = known("A");
        assert_eq!(count_emissions(&[(0.0, a.clone()), (0.5, a.clone()), (2.9, a)]), 1);
    }

    #[test]
    fn test_same_label_after_interval_emits_again() {
        let a = known("A");
        assert_eq!(count_emissions(&[(0.0, a.clone()), (3.1, a)]), 2);
    }

    #[test]
    fn test_known_to_unknown_emits_once() {
        assert_eq!(
            count_emissions(&[(0.0, known("A")), (0.1, MatchLabel::Unknown), (0.2, MatchLabel::Unknown)]),
            2
        );
    }

    #[test]
    fn test_unknown_never_reannounced() {
        let u = MatchLabel::Unknown;
        assert_eq!(count_emissions(&[(0.0, u.clone()), (5.0, u.clone()), (60.0, u)]), 1);
    }

    #[test]
    fn test_label_change_emits_immediately() {
        assert_eq!(
            count_emissions(&[(0.0, known("A")), (0.1, known("B")), (0.2, known("A"))]),
            3
        );
    }

    #[test]
    fn test_unknown_to_known_emits() {
        assert_eq!(count_emissions(&[(0.0, MatchLabel::Unknown), (0.1, known("A"))]), 2);
    }

    #[test]
    fn test_emission_updates_state() {
        let timings = DebounceTimings::default();
        let now = Instant::now();
        let mut state = LabelState::default();
        assert!(state.observe(&known("A"), now, &timings));
        assert_eq!(state.last_label, Some(known("A")));
        assert_eq!(state.last_label_at, Some(now));
    }

    #[test]
    fn test_grace_keeps_label_before_expiry() {
        let timings = DebounceTimings::default();
        let start = Instant::now();
        let mut state = LabelState::default();
        state.mark_seen(start);
        state.observe(&known("L"), start, &timings);

        assert!(!state.observe_absence(start + secs(1.9), &timings));
        assert_eq!(state.last_label, Some(known("L")));

        assert!(state.observe_absence(start + secs(2.1), &timings));
        assert_eq!(state, LabelState::default());
    }

    #[test]
    fn test_grace_measured_from_last_detection() {
        let timings = DebounceTimings::default();
        let start = Instant::now();
        let mut state = LabelState::default();
        state.mark_seen(start);
        state.observe(&known("L"), start, &timings);
        // Still in view for 2.5s without a re-announcement.
        state.mark_seen(start + secs(2.5));
        state.observe(&known("L"), start + secs(2.5), &timings);

        assert!(!state.observe_absence(start + secs(3.0), &timings));
        assert!(state.observe_absence(start + secs(4.6), &timings));
    }

    #[test]
    fn test_absence_without_label_is_noop() {
        let timings = DebounceTimings::default();
        let mut state = LabelState::default();
        assert!(!state.observe_absence(Instant::now(), &timings));
    }

    #[test]
    fn test_custom_timings() {
        let timings = DebounceTimings {
            reannounce_after: Duration::from_millis(500),
            grace: Duration::from_millis(100),
        };
        let start = Instant::now();
        let mut state = LabelState::default();
        assert!(state.observe(&known("A"), start, &timings));
        assert!(state.observe(&known("A"), start + Duration::from_millis(500), &timings));
        assert!(state.observe_absence(start + Duration::from_millis(700), &timings));
    }
}
