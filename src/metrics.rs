//! Per-participant performance and compensation metrics
//!
//! Everything here is recomputed from the parsed event log on every call;
//! nothing is accumulated in place, so recomputing is always idempotent.

use crate::ingest::{EventRecord, TrialRecord};
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;

/// Bonus paid per correct answer
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BonusPolicy {
    /// Dollars per correct TEST answer
    pub per_correct: f64,
}

impl Default for BonusPolicy {
    fn default() -> Self {
        Self { per_correct: 0.02 }
    }
}

impl BonusPolicy {
    /// Rounded to micro-dollars so stored values are stable across recomputes
    pub fn bonus_for(&self, correct_count: u32) -> f64 {
        let raw = self.per_correct.max(0.0) * correct_count as f64;
        (raw * 1_000_000.0).round() / 1_000_000.0
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    pub correct_count: u32,
    pub total_questions: u32,
    /// `None` when the participant answered no questions
    pub accuracy: Option<f64>,
    /// Mean reaction time in ms over trials that recorded one
    pub mean_rt: Option<f64>,
    pub bonus: f64,
}

/// Derives metrics from TEST-phase trial records. Status-only TEST markers and
/// every other phase are ignored.
pub fn aggregate(records: &[EventRecord], policy: &BonusPolicy) -> PerformanceMetrics {
    let trials: Vec<&TrialRecord> = records.iter().filter_map(EventRecord::trial).collect();

    let total_questions = trials.len() as u32;
    let correct_count = trials.iter().filter(|t| t.correct == Some(true)).count() as u32;

    let accuracy = if total_questions == 0 {
        None
    } else {
        Some(correct_count as f64 / total_questions as f64)
    };

    let rts: Vec<f64> = trials.iter().filter_map(|t| t.rt).collect();
    let mean_rt = if rts.is_empty() {
        None
    } else {
        Some(rts.iter().mean())
    };

    PerformanceMetrics {
        correct_count,
        total_questions,
        accuracy,
        mean_rt,
        bonus: policy.bonus_for(correct_count),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::{EventPayload, EventRecord};

    fn trial(index: u64, correct: Option<bool>, rt: Option<f64>) -> EventRecord {
        EventRecord {
            sequence_index: index,
            timestamp_ms: None,
            payload: EventPayload::Trial(TrialRecord {
                trial_index: index,
                question_id: format!("q{}", index),
                question_text: None,
                correct_answer: None,
                response: None,
                correct,
                difficulty: None,
                rt,
                condition: None,
            }),
        }
    }

    #[test]
    fn test_ten_trials_seven_correct() {
        let records: Vec<EventRecord> = (0..10)
            .map(|i| trial(i, Some(i < 7), Some(1000.0)))
            .collect();

        let metrics = aggregate(&records, &BonusPolicy { per_correct: 0.02 });

        assert_eq!(metrics.correct_count, 7);
        assert_eq!(metrics.total_questions, 10);
        assert!((metrics.accuracy.unwrap() - 0.7).abs() < 1e-12);
        assert!((metrics.bonus - 0.14).abs() < 1e-12);
        assert_eq!(metrics.mean_rt, Some(1000.0));
    }

    #[test]
    fn test_no_trials_means_missing_accuracy_not_zero() {
        let records = vec![EventRecord {
            sequence_index: 0,
            timestamp_ms: None,
            payload: EventPayload::TestMarker {
                status: Some("finished".to_string()),
            },
        }];

        let metrics = aggregate(&records, &BonusPolicy::default());

        assert_eq!(metrics.total_questions, 0);
        assert_eq!(metrics.accuracy, None);
        assert_eq!(metrics.mean_rt, None);
        assert_eq!(metrics.bonus, 0.0);
    }

    #[test]
    fn test_recompute_is_idempotent() {
        let records: Vec<EventRecord> = (0..5)
            .map(|i| trial(i, Some(i % 2 == 0), Some(500.0 + i as f64)))
            .collect();
        let policy = BonusPolicy::default();

        let first = aggregate(&records, &policy);
        let second = aggregate(&records, &policy);

        assert_eq!(first, second);
    }

    #[test]
    fn test_accuracy_bounds_hold_for_all_mixes() {
        for total in 1..12u64 {
            for correct in 0..=total {
                let records: Vec<EventRecord> =
                    (0..total).map(|i| trial(i, Some(i < correct), None)).collect();
                let acc = aggregate(&records, &BonusPolicy::default()).accuracy.unwrap();
                assert!((0.0..=1.0).contains(&acc));
            }
        }
    }

    #[test]
    fn test_mean_rt_ignores_missing_values_and_unknown_correctness() {
        let records = vec![
            trial(0, None, Some(400.0)),
            trial(1, Some(true), None),
            trial(2, Some(false), Some(600.0)),
        ];
        let metrics = aggregate(&records, &BonusPolicy::default());

        assert_eq!(metrics.total_questions, 3);
        assert_eq!(metrics.correct_count, 1);
        assert_eq!(metrics.mean_rt, Some(500.0));
    }

    #[test]
    fn test_negative_increment_never_yields_negative_bonus() {
        let policy = BonusPolicy { per_correct: -1.0 };
        assert_eq!(policy.bonus_for(3), 0.0);
    }
}
