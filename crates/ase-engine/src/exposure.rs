//! Step-down integration-time selection.
//!
//! The detector's dynamic range is far smaller than the signal swing over
//! a filter sweep, so every angle auto-ranges: start at a sensitive
//! (long) integration time, and step down the preset ladder whenever the
//! frame saturates. Descent is monotonic within one angle — a longer time
//! is never revisited — which bounds the attempts per angle by the ladder
//! length.
//!
//! The selector also remembers where the previous angle succeeded and
//! starts the next angle there (the signal usually changes slowly between
//! neighboring angles), optionally stepping one preset shorter proactively
//! when the last frame already ran hot.

use thiserror::Error;
use tracing::debug;

/// Every preset saturated at one angle.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("all {tried} integration-time presets saturated (shortest {shortest_s}s)")]
pub struct PresetsExhausted {
    /// Number of presets attempted.
    pub tried: usize,
    /// The shortest preset in the ladder, seconds.
    pub shortest_s: f64,
}

/// Auto-ranging integration-time selector.
///
/// Owned by the sweep engine; mutated only on the control task.
#[derive(Debug)]
pub struct ExposureSelector {
    /// Preset ladder, longest (most sensitive) first.
    presets_s: Vec<f64>,
    /// Start the next angle at the last successful preset instead of the
    /// top of the ladder.
    resume_from_last: bool,
    /// Soft threshold for the proactive step-down.
    warning_threshold: Option<f64>,
    /// Ladder index the next angle will start from.
    start_index: usize,
    /// Index of the preset most recently handed out for the current
    /// angle; `None` before the first attempt.
    cursor: Option<usize>,
}

impl ExposureSelector {
    /// Build a selector over a preset ladder.
    ///
    /// The ladder must be non-empty and strictly decreasing.
    pub fn new(
        presets_s: Vec<f64>,
        resume_from_last: bool,
        warning_threshold: Option<f64>,
    ) -> Result<Self, String> {
        if presets_s.is_empty() {
            return Err("integration-time preset list is empty".into());
        }
        if presets_s.iter().any(|&t| t <= 0.0) {
            return Err("integration-time presets must be positive".into());
        }
        if presets_s.windows(2).any(|pair| pair[1] >= pair[0]) {
            return Err("integration-time presets must be strictly decreasing".into());
        }
        Ok(Self {
            presets_s,
            resume_from_last,
            warning_threshold,
            start_index: 0,
            cursor: None,
        })
    }

    /// The configured preset ladder.
    pub fn presets(&self) -> &[f64] {
        &self.presets_s
    }

    /// Rearm for a new angle. The first `next` call after this returns
    /// the remembered start preset.
    pub fn begin_angle(&mut self) {
        self.cursor = None;
    }

    /// Select the integration time for the next attempt.
    ///
    /// The first call of an angle returns the start preset. When the
    /// previous attempt saturated, the selection advances one step down
    /// the ladder; otherwise the current preset is returned again.
    /// Stepping past the shortest preset fails with [`PresetsExhausted`]
    /// and resets the start preset to the top of the ladder, so the next
    /// angle begins from the most sensitive setting.
    pub fn next(&mut self, previous_attempt_saturated: bool) -> Result<f64, PresetsExhausted> {
        let index = match self.cursor {
            None => self.start_index,
            Some(current) if previous_attempt_saturated => current + 1,
            Some(current) => current,
        };
        if index >= self.presets_s.len() {
            self.start_index = 0;
            self.cursor = None;
            return Err(PresetsExhausted {
                tried: self.presets_s.len(),
                shortest_s: *self.presets_s.last().unwrap_or(&0.0),
            });
        }
        self.cursor = Some(index);
        Ok(self.presets_s[index])
    }

    /// Record a successful acquisition at the current preset.
    ///
    /// Updates the start preset for the next angle: the same preset when
    /// the frame peaked comfortably, one step shorter when `max_counts`
    /// reached the soft warning threshold.
    pub fn commit(&mut self, max_counts: f64) {
        let Some(current) = self.cursor.take() else {
            return;
        };
        if !self.resume_from_last {
            self.start_index = 0;
            return;
        }
        let hot = self.warning_threshold.is_some_and(|w| max_counts >= w);
        self.start_index = if hot {
            debug!(max_counts, "signal running hot, stepping start preset down");
            (current + 1).min(self.presets_s.len() - 1)
        } else {
            current
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn selector(presets: &[f64]) -> ExposureSelector {
        ExposureSelector::new(presets.to_vec(), true, None).unwrap()
    }

    #[test]
    fn rejects_bad_ladders() {
        assert!(ExposureSelector::new(vec![], true, None).is_err());
        assert!(ExposureSelector::new(vec![0.1, 4.0], true, None).is_err());
        assert!(ExposureSelector::new(vec![1.0, 1.0], true, None).is_err());
        assert!(ExposureSelector::new(vec![1.0, -0.5], true, None).is_err());
    }

    #[test]
    fn first_call_returns_longest_preset() {
        let mut sel = selector(&[4.0, 1.0, 0.1]);
        sel.begin_angle();
        assert_eq!(sel.next(false).unwrap(), 4.0);
    }

    #[test]
    fn saturated_calls_descend_strictly_until_exhaustion() {
        let mut sel = selector(&[4.0, 1.0, 0.1]);
        sel.begin_angle();
        assert_eq!(sel.next(false).unwrap(), 4.0);
        assert_eq!(sel.next(true).unwrap(), 1.0);
        assert_eq!(sel.next(true).unwrap(), 0.1);
        let err = sel.next(true).unwrap_err();
        assert_eq!(err.tried, 3);
        assert_eq!(err.shortest_s, 0.1);
    }

    #[test]
    fn unsaturated_retry_repeats_the_same_preset() {
        let mut sel = selector(&[4.0, 1.0]);
        sel.begin_angle();
        assert_eq!(sel.next(false).unwrap(), 4.0);
        assert_eq!(sel.next(false).unwrap(), 4.0);
    }

    #[test]
    fn never_returns_a_time_outside_the_ladder() {
        let presets = [4.0, 2.0, 1.0, 0.5, 0.1];
        let mut sel = selector(&presets);
        sel.begin_angle();
        let mut saturated = false;
        while let Ok(time) = sel.next(saturated) {
            assert!(presets.contains(&time));
            saturated = true;
        }
    }

    #[test]
    fn exhaustion_is_deterministic_across_angles() {
        let mut sel = selector(&[4.0, 1.0, 0.1]);
        for _ in 0..3 {
            sel.begin_angle();
            let mut order = Vec::new();
            let mut saturated = false;
            loop {
                match sel.next(saturated) {
                    Ok(t) => order.push(t),
                    Err(_) => break,
                }
                saturated = true;
            }
            // exhaustion resets the start preset to the top of the ladder
            assert_eq!(order, vec![4.0, 1.0, 0.1]);
        }
    }

    #[test]
    fn resumes_from_last_successful_preset() {
        let mut sel = selector(&[4.0, 1.0, 0.1]);
        sel.begin_angle();
        assert_eq!(sel.next(false).unwrap(), 4.0);
        assert_eq!(sel.next(true).unwrap(), 1.0);
        sel.commit(500.0);

        sel.begin_angle();
        assert_eq!(sel.next(false).unwrap(), 1.0);
    }

    #[test]
    fn warning_threshold_steps_the_next_angle_down() {
        let mut sel = ExposureSelector::new(vec![4.0, 1.0, 0.1], true, Some(50_000.0)).unwrap();
        sel.begin_angle();
        assert_eq!(sel.next(false).unwrap(), 4.0);
        sel.commit(60_000.0); // hot, but not saturated

        sel.begin_angle();
        assert_eq!(sel.next(false).unwrap(), 1.0);

        // comfortable signal retains the preset
        sel.commit(10_000.0);
        sel.begin_angle();
        assert_eq!(sel.next(false).unwrap(), 1.0);
    }

    #[test]
    fn warning_step_down_saturates_at_the_shortest_preset() {
        let mut sel = ExposureSelector::new(vec![4.0, 0.1], true, Some(50_000.0)).unwrap();
        sel.begin_angle();
        assert_eq!(sel.next(false).unwrap(), 4.0);
        assert_eq!(sel.next(true).unwrap(), 0.1);
        sel.commit(60_000.0);

        sel.begin_angle();
        assert_eq!(sel.next(false).unwrap(), 0.1);
    }

    #[test]
    fn without_resume_every_angle_starts_at_the_top() {
        let mut sel = ExposureSelector::new(vec![4.0, 1.0], false, None).unwrap();
        sel.begin_angle();
        assert_eq!(sel.next(false).unwrap(), 4.0);
        assert_eq!(sel.next(true).unwrap(), 1.0);
        sel.commit(100.0);

        sel.begin_angle();
        assert_eq!(sel.next(false).unwrap(), 4.0);
    }
}
