//! Schema validation with deterministic repairs.
//!
//! [`SchemaValidator::validate`] decodes a repaired candidate and checks it
//! against the [`SchemaSpec`] the prompt asked for. Deviations that can be
//! corrected without guessing are fixed and reported as [`SoftRepair`]s;
//! everything else is a [`ValidationFailure`] the controller retries on.

pub mod assessment;
pub mod question_set;

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::prompts::SchemaSpec;
use crate::scoring::AssessmentPayload;

pub use question_set::QuestionItem;

/// Why an attempt's reply was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    /// The candidate is not parseable structured text.
    Decode,
    /// Decoded, but an invariant cannot be safely repaired.
    HardValidation,
}

impl FailureClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureClass::Decode => "decode",
            FailureClass::HardValidation => "hard_validation",
        }
    }
}

impl fmt::Display for FailureClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-attempt rejection. Never a pipeline failure on its own.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{class} failure: {}", .reasons.join("; "))]
pub struct ValidationFailure {
    pub class: FailureClass,
    pub reasons: Vec<String>,
}

impl ValidationFailure {
    pub fn decode(reason: impl Into<String>) -> Self {
        Self {
            class: FailureClass::Decode,
            reasons: vec![reason.into()],
        }
    }

    pub fn hard(reasons: Vec<String>) -> Self {
        Self {
            class: FailureClass::HardValidation,
            reasons,
        }
    }
}

/// Kind of deterministic correction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SoftRepairKind {
    /// `correct_answer` matched an option only case-insensitively.
    CaseMismatch,
    /// `correct_answer` matched no option; `options[0]` substituted.
    AnswerFallback,
    /// A criterion score was outside `[0, max]`.
    ScoreClamped,
    /// A criterion or total score was not an integer.
    ScoreRounded,
    /// The declared total exceeded the rubric maximum or was negative.
    TotalClamped,
    /// No usable total; it will be summed from criterion scores.
    TotalDerived,
    /// An item id was missing or duplicated.
    IdAssigned,
    /// Self-reported difficulty replaced by the positional one.
    DifficultyOverridden,
}

impl SoftRepairKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SoftRepairKind::CaseMismatch => "case_mismatch",
            SoftRepairKind::AnswerFallback => "answer_fallback",
            SoftRepairKind::ScoreClamped => "score_clamped",
            SoftRepairKind::ScoreRounded => "score_rounded",
            SoftRepairKind::TotalClamped => "total_clamped",
            SoftRepairKind::TotalDerived => "total_derived",
            SoftRepairKind::IdAssigned => "id_assigned",
            SoftRepairKind::DifficultyOverridden => "difficulty_overridden",
        }
    }
}

impl fmt::Display for SoftRepairKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A deviation corrected without failing the attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SoftRepair {
    pub kind: SoftRepairKind,
    /// Where the repair happened, e.g. `item 3` or `communication_score`.
    pub location: String,
    pub detail: String,
}

impl SoftRepair {
    pub fn new(kind: SoftRepairKind, location: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            kind,
            location: location.into(),
            detail: detail.into(),
        }
    }
}

impl fmt::Display for SoftRepair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at {}: {}", self.kind, self.location, self.detail)
    }
}

/// Payload that passed validation.
#[derive(Debug, Clone, PartialEq)]
pub enum ValidatedPayload {
    Assessment(AssessmentPayload),
    QuestionSet(Vec<QuestionItem>),
}

/// Validated payload plus the repairs applied to reach it.
#[derive(Debug, Clone, PartialEq)]
pub struct Validated {
    pub payload: ValidatedPayload,
    pub soft_repairs: Vec<SoftRepair>,
}

/// Decodes and checks repaired candidates.
pub struct SchemaValidator;

impl SchemaValidator {
    /// Validate `candidate` against `shape`.
    pub fn validate(candidate: &str, shape: &SchemaSpec) -> Result<Validated, ValidationFailure> {
        let value: serde_json::Value = serde_json::from_str(candidate)
            .map_err(|e| ValidationFailure::decode(format!("undecodable: {}", e)))?;

        match shape {
            SchemaSpec::Assessment { rubric } => {
                let (payload, soft_repairs) = assessment::validate_assessment(&value, rubric)?;
                Ok(Validated {
                    payload: ValidatedPayload::Assessment(payload),
                    soft_repairs,
                })
            }
            SchemaSpec::QuestionSet {
                count,
                options_per_item,
                id_prefix,
            } => {
                let (items, soft_repairs) = question_set::validate_question_set(
                    &value,
                    *count,
                    *options_per_item,
                    id_prefix,
                )?;
                Ok(Validated {
                    payload: ValidatedPayload::QuestionSet(items),
                    soft_repairs,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rubric::{Criterion, RubricDefinition};

    fn rubric() -> RubricDefinition {
        RubricDefinition::new(vec![
            Criterion::new("communication", 5),
            Criterion::new("language_quality", 5),
        ])
        .expect("valid rubric")
    }

    #[test]
    fn test_undecodable_is_decode_failure() {
        let shape = SchemaSpec::Assessment { rubric: rubric() };
        let failure = SchemaValidator::validate("not json at all", &shape).unwrap_err();
        assert_eq!(failure.class, FailureClass::Decode);
        assert!(failure.reasons[0].starts_with("undecodable"));
    }

    #[test]
    fn test_dispatches_on_shape() {
        let shape = SchemaSpec::Assessment { rubric: rubric() };
        let validated = SchemaValidator::validate(
            r#"{"communication_score": 4, "language_quality_score": 3, "total_score": 7, "feedback": "Bien"}"#,
            &shape,
        )
        .expect("valid");
        assert!(validated.soft_repairs.is_empty());
        match validated.payload {
            ValidatedPayload::Assessment(payload) => assert_eq!(payload.total_score, Some(7)),
            other => panic!("unexpected payload: {:?}", other),
        }
    }

    #[test]
    fn test_failure_display_joins_reasons() {
        let failure = ValidationFailure::hard(vec!["a".into(), "b".into()]);
        assert_eq!(failure.to_string(), "hard_validation failure: a; b");
    }
}
