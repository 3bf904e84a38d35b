//! Checks for rubric-scored assessment replies.

use std::collections::{BTreeMap, HashSet};

use serde_json::{Map, Value};

use super::{SoftRepair, SoftRepairKind, ValidationFailure};
use crate::rubric::RubricDefinition;
use crate::scoring::{AssessmentPayload, ErrorDetail};

/// Keys with a fixed meaning; everything else ends up in `details`.
const RESERVED_KEYS: &[&str] = &[
    "feedback",
    "total_score",
    "max_score",
    "percentage",
    "criteria_met",
    "errors",
    "suggestions",
];

/// Round and clamp a numeric score into `[0, max]`, recording what changed.
fn coerce_score(
    raw: f64,
    max: u32,
    location: &str,
    clamp_kind: SoftRepairKind,
    repairs: &mut Vec<SoftRepair>,
) -> u32 {
    let rounded = raw.round();
    if rounded != raw {
        repairs.push(SoftRepair::new(
            SoftRepairKind::ScoreRounded,
            location,
            format!("{} -> {}", raw, rounded),
        ));
    }

    let clamped = rounded.clamp(0.0, f64::from(max));
    if clamped != rounded {
        repairs.push(SoftRepair::new(
            clamp_kind,
            location,
            format!("{} clamped to {}", rounded, clamped),
        ));
    }

    clamped as u32
}

fn parse_errors(value: Option<&Value>) -> Vec<ErrorDetail> {
    let Some(Value::Array(entries)) = value else {
        return Vec::new();
    };

    entries
        .iter()
        .filter_map(|entry| match serde_json::from_value::<ErrorDetail>(entry.clone()) {
            Ok(detail) => Some(detail),
            Err(e) => {
                tracing::debug!(error = %e, "Skipping malformed error entry");
                None
            }
        })
        .collect()
}

fn parse_suggestions(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::Array(entries)) => entries
            .iter()
            .filter_map(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect(),
        Some(Value::String(single)) if !single.trim().is_empty() => {
            vec![single.trim().to_string()]
        }
        _ => Vec::new(),
    }
}

fn parse_criteria_met(value: Option<&Value>) -> BTreeMap<String, bool> {
    let Some(Value::Object(flags)) = value else {
        return BTreeMap::new();
    };
    flags
        .iter()
        .filter_map(|(name, flag)| flag.as_bool().map(|b| (name.clone(), b)))
        .collect()
}

/// Validate a decoded assessment reply against `rubric`.
pub fn validate_assessment(
    value: &Value,
    rubric: &RubricDefinition,
) -> Result<(AssessmentPayload, Vec<SoftRepair>), ValidationFailure> {
    let Value::Object(object) = value else {
        return Err(ValidationFailure::hard(vec![
            "expected a JSON object".to_string(),
        ]));
    };

    let mut reasons = Vec::new();
    let mut repairs = Vec::new();

    let feedback = match object.get("feedback") {
        Some(Value::String(text)) if !text.trim().is_empty() => text.trim().to_string(),
        _ => {
            reasons.push("missing required field: feedback".to_string());
            String::new()
        }
    };

    let mut criterion_scores = BTreeMap::new();
    let mut score_keys = HashSet::new();
    let mut any_score_present = false;
    for criterion in rubric.criteria() {
        let key = criterion.score_key();
        match object.get(&key) {
            None | Some(Value::Null) => {}
            Some(Value::Number(n)) => {
                any_score_present = true;
                let raw = n.as_f64().unwrap_or_default();
                let score = coerce_score(
                    raw,
                    criterion.max,
                    &key,
                    SoftRepairKind::ScoreClamped,
                    &mut repairs,
                );
                criterion_scores.insert(criterion.name.clone(), score);
            }
            Some(other) => {
                any_score_present = true;
                reasons.push(format!("{}: expected a number, got {}", key, other));
            }
        }
        score_keys.insert(key);
    }

    if !any_score_present {
        let expected: Vec<String> = rubric.criteria().iter().map(|c| c.score_key()).collect();
        reasons.push(format!(
            "missing required field: at least one of [{}]",
            expected.join(", ")
        ));
    }

    if !reasons.is_empty() {
        return Err(ValidationFailure::hard(reasons));
    }

    let total_score = match object.get("total_score").and_then(Value::as_f64) {
        Some(raw) => Some(coerce_score(
            raw,
            rubric.max_score(),
            "total_score",
            SoftRepairKind::TotalClamped,
            &mut repairs,
        )),
        None => {
            repairs.push(SoftRepair::new(
                SoftRepairKind::TotalDerived,
                "total_score",
                "no numeric total; summed from criterion scores",
            ));
            None
        }
    };

    let details: Map<String, Value> = object
        .iter()
        .filter(|(key, _)| !RESERVED_KEYS.contains(&key.as_str()) && !score_keys.contains(*key))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();

    let payload = AssessmentPayload {
        criterion_scores,
        total_score,
        criteria_met: parse_criteria_met(object.get("criteria_met")),
        errors: parse_errors(object.get("errors")),
        feedback,
        suggestions: parse_suggestions(object.get("suggestions")),
        details,
    };

    Ok((payload, repairs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rubric::Criterion;
    use crate::scoring::ErrorKind;
    use serde_json::json;

    fn rubric() -> RubricDefinition {
        RubricDefinition::new(vec![
            Criterion::new("communication", 5),
            Criterion::new("language_quality", 5),
        ])
        .expect("valid rubric")
    }

    #[test]
    fn test_full_reply() {
        let value = json!({
            "communication_score": 4,
            "language_quality_score": 3,
            "total_score": 7,
            "percentage": 99,
            "criteria_met": {"all_tasks_completed": true, "questions_answered": "yes"},
            "errors": [
                {"type": "grammar", "issue": "yo es", "correction": "yo soy"},
                {"issue": "missing type"}
            ],
            "feedback": "Buen trabajo",
            "suggestions": ["Use more connectives", 3],
            "mispronounced_words": ["perro"]
        });

        let (payload, repairs) = validate_assessment(&value, &rubric()).expect("valid");
        assert!(repairs.is_empty());
        assert_eq!(payload.criterion_scores["communication"], 4);
        assert_eq!(payload.total_score, Some(7));
        assert_eq!(payload.criteria_met.len(), 1);
        assert_eq!(payload.errors.len(), 1);
        assert_eq!(payload.errors[0].kind, ErrorKind::Grammar);
        assert_eq!(payload.suggestions, vec!["Use more connectives"]);
        assert_eq!(payload.details.len(), 1);
        assert!(payload.details.contains_key("mispronounced_words"));
    }

    #[test]
    fn test_missing_feedback_is_hard() {
        let value = json!({"communication_score": 4});
        let failure = validate_assessment(&value, &rubric()).unwrap_err();
        assert_eq!(failure.reasons, vec!["missing required field: feedback"]);
    }

    #[test]
    fn test_no_criterion_score_is_hard() {
        let value = json!({"feedback": "ok", "total_score": 5});
        let failure = validate_assessment(&value, &rubric()).unwrap_err();
        assert!(failure.reasons[0].contains("communication_score"));
    }

    #[test]
    fn test_non_numeric_score_is_hard() {
        let value = json!({"feedback": "ok", "communication_score": "four"});
        let failure = validate_assessment(&value, &rubric()).unwrap_err();
        assert_eq!(failure.reasons.len(), 1);
        assert!(failure.reasons[0].starts_with("communication_score: expected a number"));
    }

    #[test]
    fn test_overshoot_and_fraction_are_soft() {
        let value = json!({
            "feedback": "ok",
            "communication_score": 7,
            "language_quality_score": 2.5,
            "total_score": 12
        });
        let (payload, repairs) = validate_assessment(&value, &rubric()).expect("valid");
        assert_eq!(payload.criterion_scores["communication"], 5);
        assert_eq!(payload.criterion_scores["language_quality"], 3);
        assert_eq!(payload.total_score, Some(10));

        let kinds: Vec<_> = repairs.iter().map(|r| r.kind).collect();
        assert_eq!(
            kinds,
            vec![
                SoftRepairKind::ScoreClamped,
                SoftRepairKind::ScoreRounded,
                SoftRepairKind::TotalClamped
            ]
        );
    }

    #[test]
    fn test_missing_total_is_soft() {
        let value = json!({"feedback": "ok", "communication_score": 3});
        let (payload, repairs) = validate_assessment(&value, &rubric()).expect("valid");
        assert_eq!(payload.total_score, None);
        assert_eq!(repairs.len(), 1);
        assert_eq!(repairs[0].kind, SoftRepairKind::TotalDerived);
    }

    #[test]
    fn test_untyped_error_entries_are_kept() {
        let value = json!({
            "feedback": "ok",
            "communication_score": 3,
            "errors": [
                {"issue": "soy cansado", "correction": "estoy cansado"},
                {"type": "spelling", "issue": "vien"},
                {"correction": "no issue field"}
            ]
        });
        let (payload, _) = validate_assessment(&value, &rubric()).expect("valid");
        assert_eq!(payload.errors.len(), 2);
        assert_eq!(payload.errors[0].kind, ErrorKind::Other);
        assert_eq!(payload.errors[0].correction.as_deref(), Some("estoy cansado"));
        assert_eq!(payload.errors[1].kind, ErrorKind::Other);
    }

    #[test]
    fn test_non_object_is_hard() {
        let failure = validate_assessment(&json!([1, 2]), &rubric()).unwrap_err();
        assert_eq!(failure.reasons, vec!["expected a JSON object"]);
    }
}
