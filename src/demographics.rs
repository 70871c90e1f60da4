//! Questionnaire splitting: demographic fields, paired survey items and the
//! composite scores derived from them.

use crate::ingest::{embedded_survey, EventRecord};
use crate::models::QuestionnaireResponse;
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;
use std::collections::BTreeMap;

pub const AGE: &str = "age";
pub const GENDER: &str = "gender";
pub const PLATFORM_EXPERIENCE: &str = "psiturk_exp";
pub const ROBOT_EXPERIENCE: &str = "robot_exp";
pub const GENERAL_COMMENTS: &str = "general_comments";

pub const ENGAGEMENT_ITEMS: [&str; 2] = ["engagement_q1", "engagement_q2"];
pub const USABILITY_ITEMS: [&str; 2] = ["usability_q1", "usability_q2"];
pub const ADAPTIVENESS_ITEMS: [&str; 2] = ["adaptiveness_q1", "adaptiveness_q2"];
pub const SATISFACTION: &str = "satisfaction_overall";

/// Questionnaire keys in the fixed order used by every export
pub const QUESTIONNAIRE_KEYS: [&str; 12] = [
    AGE,
    GENDER,
    PLATFORM_EXPERIENCE,
    ROBOT_EXPERIENCE,
    ENGAGEMENT_ITEMS[0],
    ENGAGEMENT_ITEMS[1],
    USABILITY_ITEMS[0],
    USABILITY_ITEMS[1],
    ADAPTIVENESS_ITEMS[0],
    ADAPTIVENESS_ITEMS[1],
    SATISFACTION,
    GENERAL_COMMENTS,
];

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Demographics {
    /// Missing when absent or not numeric
    pub age: Option<f64>,
    pub gender: Option<String>,
    pub platform_experience: Option<String>,
    pub robot_experience: Option<String>,
    /// Free text, kept verbatim
    pub general_comments: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SurveyScores {
    pub engagement_q1: Option<f64>,
    pub engagement_q2: Option<f64>,
    pub usability_q1: Option<f64>,
    pub usability_q2: Option<f64>,
    pub adaptiveness_q1: Option<f64>,
    pub adaptiveness_q2: Option<f64>,
    pub satisfaction_overall: Option<f64>,
    pub engagement_score: Option<f64>,
    pub usability_score: Option<f64>,
    pub adaptiveness_score: Option<f64>,
}

/// Flat questionnaire map with survey answers embedded in the event log laid
/// over it. The last embedded survey wins for the keys it carries.
pub fn merged_questionnaire(
    flat: &QuestionnaireResponse,
    records: &[EventRecord],
) -> QuestionnaireResponse {
    let mut merged = flat.clone();
    if let Some(survey) = embedded_survey(records) {
        for (key, value) in survey {
            merged.insert(key.clone(), value.clone());
        }
    }
    merged
}

pub fn extract(answers: &QuestionnaireResponse) -> (Demographics, SurveyScores) {
    let demographics = Demographics {
        age: numeric(answers, AGE),
        gender: text(answers, GENDER),
        platform_experience: text(answers, PLATFORM_EXPERIENCE),
        robot_experience: text(answers, ROBOT_EXPERIENCE),
        general_comments: answers.get(GENERAL_COMMENTS).cloned(),
    };

    let engagement = ENGAGEMENT_ITEMS.map(|k| numeric(answers, k));
    let usability = USABILITY_ITEMS.map(|k| numeric(answers, k));
    let adaptiveness = ADAPTIVENESS_ITEMS.map(|k| numeric(answers, k));

    let scores = SurveyScores {
        engagement_q1: engagement[0],
        engagement_q2: engagement[1],
        usability_q1: usability[0],
        usability_q2: usability[1],
        adaptiveness_q1: adaptiveness[0],
        adaptiveness_q2: adaptiveness[1],
        satisfaction_overall: numeric(answers, SATISFACTION),
        engagement_score: composite(engagement[0], engagement[1]),
        usability_score: composite(usability[0], usability[1]),
        adaptiveness_score: composite(adaptiveness[0], adaptiveness[1]),
    };

    (demographics, scores)
}

/// Mean of a paired item, missing if either side is
pub fn composite(a: Option<f64>, b: Option<f64>) -> Option<f64> {
    Some((a? + b?) / 2.0)
}

fn numeric(answers: &QuestionnaireResponse, key: &str) -> Option<f64> {
    answers
        .get(key)
        .and_then(|v| v.trim().parse::<f64>().ok())
        .filter(|v| v.is_finite())
}

fn text(answers: &QuestionnaireResponse, key: &str) -> Option<String> {
    answers
        .get(key)
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

// =============================================================================
// SUMMARY
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgeSummary {
    pub n: usize,
    pub mean: f64,
    /// Sample standard deviation; `None` with fewer than two ages
    pub sd: Option<f64>,
    pub min: f64,
    pub max: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DemographicSummary {
    pub participants: usize,
    pub age: Option<AgeSummary>,
    pub gender: BTreeMap<String, usize>,
    pub platform_experience: BTreeMap<String, usize>,
    pub robot_experience: BTreeMap<String, usize>,
}

impl DemographicSummary {
    pub fn from_rows<'a>(rows: impl IntoIterator<Item = &'a Demographics>) -> Self {
        let mut summary = DemographicSummary::default();
        let mut ages = Vec::new();

        for d in rows {
            summary.participants += 1;
            if let Some(age) = d.age {
                ages.push(age);
            }
            bump(&mut summary.gender, &d.gender);
            bump(&mut summary.platform_experience, &d.platform_experience);
            bump(&mut summary.robot_experience, &d.robot_experience);
        }

        if !ages.is_empty() {
            let sd = if ages.len() >= 2 {
                Some(ages.iter().std_dev())
            } else {
                None
            };
            summary.age = Some(AgeSummary {
                n: ages.len(),
                mean: ages.iter().mean(),
                sd,
                min: ages.iter().fold(f64::INFINITY, |a, &b| a.min(b)),
                max: ages.iter().fold(f64::NEG_INFINITY, |a, &b| a.max(b)),
            });
        }

        summary
    }
}

fn bump(counts: &mut BTreeMap<String, usize>, value: &Option<String>) {
    let key = value.clone().unwrap_or_else(|| "missing".to_string());
    *counts.entry(key).or_insert(0) += 1;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::EventPayload;

    fn answers(pairs: &[(&str, &str)]) -> QuestionnaireResponse {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_composites_are_pair_means() {
        let (_, scores) = extract(&answers(&[
            ("engagement_q1", "6"),
            ("engagement_q2", "4"),
            ("usability_q1", "5"),
            ("usability_q2", "5"),
            ("adaptiveness_q1", "7"),
            ("adaptiveness_q2", "6"),
            ("satisfaction_overall", "5"),
        ]));

        assert_eq!(scores.engagement_score, Some(5.0));
        assert_eq!(scores.usability_score, Some(5.0));
        assert_eq!(scores.adaptiveness_score, Some(6.5));
        assert_eq!(scores.satisfaction_overall, Some(5.0));
    }

    #[test]
    fn test_composite_missing_when_either_item_missing() {
        let (_, scores) = extract(&answers(&[
            ("engagement_q1", "6"),
            ("engagement_q2", ""),
            ("adaptiveness_q1", "seven"),
            ("adaptiveness_q2", "6"),
        ]));

        assert_eq!(scores.engagement_q1, Some(6.0));
        assert_eq!(scores.engagement_q2, None);
        assert_eq!(scores.engagement_score, None);
        assert_eq!(scores.adaptiveness_score, None);
        assert_eq!(scores.usability_score, None);
    }

    #[test]
    fn test_demographics_split() {
        let (demo, _) = extract(&answers(&[
            ("age", "twenty"),
            ("gender", "female"),
            ("psiturk_exp", "yes"),
            ("robot_exp", "none"),
            ("general_comments", "  Liked it, thanks!  "),
        ]));

        assert_eq!(demo.age, None);
        assert_eq!(demo.gender.as_deref(), Some("female"));
        assert_eq!(demo.platform_experience.as_deref(), Some("yes"));
        assert_eq!(demo.robot_experience.as_deref(), Some("none"));
        assert_eq!(
            demo.general_comments.as_deref(),
            Some("  Liked it, thanks!  ")
        );
    }

    #[test]
    fn test_embedded_survey_overrides_flat_answers() {
        let flat = answers(&[("engagement_q1", "2"), ("age", "30")]);
        let records = vec![EventRecord {
            sequence_index: 5,
            timestamp_ms: None,
            payload: EventPayload::Questionnaire {
                status: Some("submit".to_string()),
                survey: Some(answers(&[("engagement_q1", "6"), ("engagement_q2", "4")])),
            },
        }];

        let merged = merged_questionnaire(&flat, &records);

        assert_eq!(merged["engagement_q1"], "6");
        assert_eq!(merged["engagement_q2"], "4");
        assert_eq!(merged["age"], "30");
    }

    #[test]
    fn test_summary_counts_are_sorted_and_ages_aggregated() {
        let rows = vec![
            Demographics {
                age: Some(20.0),
                gender: Some("male".to_string()),
                ..Default::default()
            },
            Demographics {
                age: Some(30.0),
                gender: Some("female".to_string()),
                ..Default::default()
            },
            Demographics {
                age: None,
                gender: Some("female".to_string()),
                ..Default::default()
            },
        ];

        let summary = DemographicSummary::from_rows(&rows);
        let age = summary.age.unwrap();

        assert_eq!(summary.participants, 3);
        assert_eq!(age.n, 2);
        assert!((age.mean - 25.0).abs() < 1e-12);
        assert!((age.sd.unwrap() - 50f64.sqrt()).abs() < 1e-9);
        assert_eq!(age.min, 20.0);
        assert_eq!(age.max, 30.0);

        let genders: Vec<(&str, usize)> = summary
            .gender
            .iter()
            .map(|(k, v)| (k.as_str(), *v))
            .collect();
        assert_eq!(genders, vec![("female", 2), ("male", 1)]);
        assert_eq!(summary.robot_experience["missing"], 3);
    }
}
