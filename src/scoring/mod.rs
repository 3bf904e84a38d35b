//! Rubric-based score normalization for assessment replies.
//!
//! [`ScoreNormalizer::normalize`] maps the sub-scores found in a parsed reply
//! onto a [`RubricDefinition`], clamps everything into range and derives the
//! percentage. The model's own percentage (if any) is never used.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::rubric::RubricDefinition;

/// Category of a language error the model pointed out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorKind {
    Grammar,
    Vocabulary,
    Pronunciation,
    Structure,
    /// Unknown or missing `type`.
    #[default]
    #[serde(other)]
    Other,
}

/// One error reported in the student's response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorDetail {
    #[serde(rename = "type", default)]
    pub kind: ErrorKind,
    pub issue: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correction: Option<String>,
}

/// Score awarded for one criterion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CriterionScore {
    pub score: u32,
    pub max: u32,
}

/// Decoded assessment reply that passed validation, before normalization.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AssessmentPayload {
    /// Sub-scores keyed by criterion name; absent criteria are not listed.
    pub criterion_scores: BTreeMap<String, u32>,
    /// Total declared by the model, if any.
    pub total_score: Option<u32>,
    pub criteria_met: BTreeMap<String, bool>,
    pub errors: Vec<ErrorDetail>,
    pub feedback: String,
    pub suggestions: Vec<String>,
    /// Section-specific fields kept verbatim (e.g. `mispronounced_words`).
    pub details: serde_json::Map<String, serde_json::Value>,
}

/// Final scored assessment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssessmentResult {
    pub total_score: u32,
    pub max_score: u32,
    pub percentage: u32,
    pub criteria_scores: BTreeMap<String, CriterionScore>,
    pub criteria_met: BTreeMap<String, bool>,
    pub errors: Vec<ErrorDetail>,
    pub feedback: String,
    pub suggestions: Vec<String>,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub details: serde_json::Map<String, serde_json::Value>,
}

impl From<&AssessmentResult> for AssessmentPayload {
    fn from(result: &AssessmentResult) -> Self {
        Self {
            criterion_scores: result
                .criteria_scores
                .iter()
                .map(|(name, score)| (name.clone(), score.score))
                .collect(),
            total_score: Some(result.total_score),
            criteria_met: result.criteria_met.clone(),
            errors: result.errors.clone(),
            feedback: result.feedback.clone(),
            suggestions: result.suggestions.clone(),
            details: result.details.clone(),
        }
    }
}

/// `round(100 * total / max)` with halves rounded up, in integer arithmetic.
pub fn percentage(total: u32, max: u32) -> u32 {
    if max == 0 {
        return 0;
    }
    let total = u64::from(total.min(max));
    let max = u64::from(max);
    ((200 * total + max) / (2 * max)) as u32
}

/// Maps parsed sub-scores onto a rubric.
pub struct ScoreNormalizer;

impl ScoreNormalizer {
    /// Normalize a validated payload against `rubric`.
    ///
    /// Criteria missing from the payload are omitted rather than zero-filled.
    /// The total is the declared one when present, otherwise the sum of the
    /// available sub-scores, clamped to the rubric maximum either way.
    pub fn normalize(parsed: &AssessmentPayload, rubric: &RubricDefinition) -> AssessmentResult {
        let max_score = rubric.max_score();

        let criteria_scores: BTreeMap<String, CriterionScore> = rubric
            .criteria()
            .iter()
            .filter_map(|criterion| {
                parsed.criterion_scores.get(&criterion.name).map(|score| {
                    (
                        criterion.name.clone(),
                        CriterionScore {
                            score: (*score).min(criterion.max),
                            max: criterion.max,
                        },
                    )
                })
            })
            .collect();

        let total_score = parsed
            .total_score
            .unwrap_or_else(|| criteria_scores.values().map(|c| c.score).sum())
            .min(max_score);

        AssessmentResult {
            total_score,
            max_score,
            percentage: percentage(total_score, max_score),
            criteria_scores,
            criteria_met: parsed.criteria_met.clone(),
            errors: parsed.errors.clone(),
            feedback: parsed.feedback.clone(),
            suggestions: parsed.suggestions.clone(),
            details: parsed.details.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rubric::Criterion;

    fn roleplay_rubric() -> RubricDefinition {
        RubricDefinition::new(vec![
            Criterion::new("communication", 5),
            Criterion::new("language_quality", 5),
        ])
        .expect("valid rubric")
    }

    fn payload(scores: &[(&str, u32)], total: Option<u32>) -> AssessmentPayload {
        AssessmentPayload {
            criterion_scores: scores
                .iter()
                .map(|(name, score)| (name.to_string(), *score))
                .collect(),
            total_score: total,
            feedback: "Good effort.".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_percentage_rounding() {
        assert_eq!(percentage(10, 10), 100);
        assert_eq!(percentage(0, 10), 0);
        assert_eq!(percentage(1, 3), 33);
        assert_eq!(percentage(2, 3), 67);
        assert_eq!(percentage(1, 8), 13); // 12.5 rounds up
        assert_eq!(percentage(5, 0), 0);
    }

    #[test]
    fn test_declared_total_is_clamped() {
        let result = ScoreNormalizer::normalize(
            &payload(&[("communication", 5), ("language_quality", 5)], Some(12)),
            &roleplay_rubric(),
        );
        assert_eq!(result.total_score, 10);
        assert_eq!(result.max_score, 10);
        assert_eq!(result.percentage, 100);
    }

    #[test]
    fn test_missing_criterion_is_omitted_not_zeroed() {
        let result = ScoreNormalizer::normalize(
            &payload(&[("communication", 4)], None),
            &roleplay_rubric(),
        );
        assert_eq!(result.criteria_scores.len(), 1);
        assert!(!result.criteria_scores.contains_key("language_quality"));
        assert_eq!(result.total_score, 4);
        assert_eq!(result.percentage, 40);
    }

    #[test]
    fn test_criterion_scores_clamped_and_unknown_ignored() {
        let result = ScoreNormalizer::normalize(
            &payload(&[("communication", 9), ("fluency", 3)], None),
            &roleplay_rubric(),
        );
        assert_eq!(
            result.criteria_scores.get("communication"),
            Some(&CriterionScore { score: 5, max: 5 })
        );
        assert!(!result.criteria_scores.contains_key("fluency"));
        assert_eq!(result.total_score, 5);
    }

    #[test]
    fn test_normalize_is_idempotent() {
        let rubric = roleplay_rubric();
        let first = ScoreNormalizer::normalize(
            &payload(&[("communication", 7), ("language_quality", 2)], Some(11)),
            &rubric,
        );
        let second = ScoreNormalizer::normalize(&AssessmentPayload::from(&first), &rubric);
        assert_eq!(first, second);
    }

    #[test]
    fn test_error_detail_unknown_kind() {
        let detail: ErrorDetail = serde_json::from_str(
            r#"{"type": "grammar|vocabulary", "issue": "yo es", "correction": "yo soy"}"#,
        )
        .expect("valid detail");
        assert_eq!(detail.kind, ErrorKind::Other);
        assert_eq!(detail.correction.as_deref(), Some("yo soy"));
    }
}
