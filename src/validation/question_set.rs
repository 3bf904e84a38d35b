//! Checks for bulk multiple-choice question sets.
//!
//! A batch is atomic: any hard failure, or a count that differs from the
//! request, rejects the whole set. Within an item the answer is repaired with
//! a fixed ladder: exact match, then case-insensitive match, then `options[0]`.
//! Duplicate options are never repaired.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{SoftRepair, SoftRepairKind, ValidationFailure};
use crate::difficulty::DifficultyLevel;
use crate::task::QuantityConstraints;

const DEFAULT_ITEM_TYPE: &str = "multiple_choice";

/// One validated practice item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionItem {
    pub id: String,
    #[serde(rename = "type")]
    pub item_type: String,
    pub question: String,
    pub options: Vec<String>,
    pub correct_answer: String,
    pub explanation: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub difficulty: Option<DifficultyLevel>,
}

impl QuestionItem {
    /// Whether `correct_answer` is exactly one of the options.
    pub fn answer_is_option(&self) -> bool {
        self.options.iter().any(|o| o == &self.correct_answer)
    }
}

/// Outcome of the answer repair ladder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnswerMatch {
    Exact,
    CaseInsensitive(String),
    Fallback(String),
}

/// Resolve `answer` against `options`. Total for non-empty `options`.
pub fn match_answer(answer: &str, options: &[String]) -> Option<AnswerMatch> {
    if options.iter().any(|o| o == answer) {
        return Some(AnswerMatch::Exact);
    }

    let lowered = answer.to_lowercase();
    if let Some(option) = options.iter().find(|o| o.to_lowercase() == lowered) {
        return Some(AnswerMatch::CaseInsensitive(option.clone()));
    }

    options.first().map(|first| AnswerMatch::Fallback(first.clone()))
}

/// Options that occur more than once, in first-seen order.
fn duplicate_options(options: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut duplicates = Vec::new();
    for option in options {
        if !seen.insert(option.as_str()) && !duplicates.contains(option) {
            duplicates.push(option.clone());
        }
    }
    duplicates
}

fn item_array(value: &Value) -> Option<&Vec<Value>> {
    match value {
        Value::Array(items) => Some(items),
        Value::Object(object) => object.get("questions").and_then(Value::as_array),
        _ => None,
    }
}

fn trimmed_str<'a>(object: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a str> {
    keys.iter()
        .filter_map(|key| object.get(*key).and_then(Value::as_str))
        .map(str::trim)
        .find(|s| !s.is_empty())
}

/// An item that passed its own checks; the id is resolved batch-wide later.
struct CheckedItem {
    claimed_id: Option<String>,
    item: QuestionItem,
}

fn check_item(
    position: usize,
    value: &Value,
    options_per_item: usize,
    reasons: &mut Vec<String>,
    repairs: &mut Vec<SoftRepair>,
) -> Option<CheckedItem> {
    let location = format!("item {}", position);
    let Value::Object(object) = value else {
        reasons.push(format!("{}: not an object", location));
        return None;
    };

    let before = reasons.len();

    let question = trimmed_str(object, &["question", "question_text"]);
    if question.is_none() {
        reasons.push(format!("{}: missing question", location));
    }

    let explanation = trimmed_str(object, &["explanation"]);
    if explanation.is_none() {
        reasons.push(format!("{}: missing explanation", location));
    }

    let answer = trimmed_str(object, &["correct_answer"]);
    if answer.is_none() {
        reasons.push(format!("{}: missing correct_answer", location));
    }

    let options: Option<Vec<String>> = match object.get("options") {
        Some(Value::Array(raw)) => raw
            .iter()
            .map(|o| o.as_str().map(|s| s.trim().to_string()))
            .collect(),
        _ => None,
    };

    match &options {
        None => reasons.push(format!("{}: options must be an array of strings", location)),
        Some(options) if options.len() != options_per_item => reasons.push(format!(
            "{}: expected {} options, got {}",
            location,
            options_per_item,
            options.len()
        )),
        Some(options) => {
            let duplicates = duplicate_options(options);
            if !duplicates.is_empty() {
                reasons.push(format!(
                    "{}: duplicate options [{}]",
                    location,
                    duplicates.join(", ")
                ));
            }
        }
    }

    if reasons.len() > before {
        return None;
    }

    let (Some(question), Some(explanation), Some(answer), Some(options)) =
        (question, explanation, answer, options)
    else {
        return None;
    };

    let Some(matched) = match_answer(answer, &options) else {
        reasons.push(format!(
            "{}: no options to match correct_answer against",
            location
        ));
        return None;
    };

    let correct_answer = match matched {
        AnswerMatch::Exact => answer.to_string(),
        AnswerMatch::CaseInsensitive(option) => {
            repairs.push(SoftRepair::new(
                SoftRepairKind::CaseMismatch,
                location.clone(),
                format!("correct_answer '{}' -> '{}'", answer, option),
            ));
            option
        }
        AnswerMatch::Fallback(option) => {
            repairs.push(SoftRepair::new(
                SoftRepairKind::AnswerFallback,
                location.clone(),
                format!("correct_answer '{}' not among options; using '{}'", answer, option),
            ));
            option
        }
    };

    let item_type = trimmed_str(object, &["type"])
        .unwrap_or(DEFAULT_ITEM_TYPE)
        .to_string();

    Some(CheckedItem {
        claimed_id: trimmed_str(object, &["id"]).map(String::from),
        item: QuestionItem {
            id: String::new(),
            item_type,
            question: question.to_string(),
            options,
            correct_answer,
            explanation: explanation.to_string(),
            difficulty: trimmed_str(object, &["difficulty"]).and_then(DifficultyLevel::parse_label),
        },
    })
}

/// Keep first-seen ids; give missing or repeated ones `{prefix}_p{n}`.
fn resolve_ids(checked: Vec<CheckedItem>, id_prefix: &str, repairs: &mut Vec<SoftRepair>) -> Vec<QuestionItem> {
    let mut kept: Vec<Option<String>> = Vec::with_capacity(checked.len());
    let mut taken = HashSet::new();
    for entry in &checked {
        match &entry.claimed_id {
            Some(id) if taken.insert(id.clone()) => kept.push(Some(id.clone())),
            _ => kept.push(None),
        }
    }

    checked
        .into_iter()
        .zip(kept)
        .enumerate()
        .map(|(index, (entry, kept_id))| {
            let mut item = entry.item;
            item.id = match kept_id {
                Some(id) => id,
                None => {
                    let base = format!("{}_p{}", id_prefix, index + 1);
                    let mut candidate = base.clone();
                    let mut suffix = 2;
                    while taken.contains(&candidate) {
                        candidate = format!("{}_{}", base, suffix);
                        suffix += 1;
                    }
                    taken.insert(candidate.clone());
                    repairs.push(SoftRepair::new(
                        SoftRepairKind::IdAssigned,
                        format!("item {}", index + 1),
                        match &entry.claimed_id {
                            Some(old) => format!("duplicate id '{}' -> '{}'", old, candidate),
                            None => format!("missing id -> '{}'", candidate),
                        },
                    ));
                    candidate
                }
            };
            item
        })
        .collect()
}

/// Validate a decoded question-set reply.
pub fn validate_question_set(
    value: &Value,
    count: usize,
    options_per_item: usize,
    id_prefix: &str,
) -> Result<(Vec<QuestionItem>, Vec<SoftRepair>), ValidationFailure> {
    let Some(raw_items) = item_array(value) else {
        return Err(ValidationFailure::hard(vec![
            "expected an array of items or an object with a 'questions' array".to_string(),
        ]));
    };

    let quantity = QuantityConstraints {
        count,
        options_per_item,
    };
    if let Err(e) = quantity.validate() {
        return Err(ValidationFailure::hard(vec![format!(
            "invalid quantity constraints: {}",
            e
        )]));
    }

    let mut reasons = Vec::new();
    let mut repairs = Vec::new();

    if raw_items.len() != count {
        reasons.push(format!(
            "count mismatch: expected {} items, got {}",
            count,
            raw_items.len()
        ));
    }

    let checked: Vec<CheckedItem> = raw_items
        .iter()
        .enumerate()
        .filter_map(|(index, raw)| {
            check_item(index + 1, raw, options_per_item, &mut reasons, &mut repairs)
        })
        .collect();

    if !reasons.is_empty() {
        return Err(ValidationFailure::hard(reasons));
    }

    let items = resolve_ids(checked, id_prefix, &mut repairs);
    Ok((items, repairs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validation::FailureClass;
    use serde_json::json;

    fn raw_item(n: usize, options: &[&str], answer: &str) -> Value {
        json!({
            "id": format!("colors_p{}", n),
            "type": "multiple_choice",
            "question": format!("Question {}", n),
            "options": options,
            "correct_answer": answer,
            "explanation": "Colour adjectives agree with the noun.",
            "difficulty": "beginner"
        })
    }

    fn batch(count: usize) -> Vec<Value> {
        (1..=count)
            .map(|n| raw_item(n, &["rojo", "azul", "verde", "amarillo"], "azul"))
            .collect()
    }

    #[test]
    fn test_case_mismatch_is_soft_repair() {
        let value = json!([raw_item(1, &["rojo", "azul", "verde", "amarillo"], "Rojo")]);
        let (items, repairs) = validate_question_set(&value, 1, 4, "colors").expect("valid");
        assert_eq!(items[0].correct_answer, "rojo");
        assert_eq!(repairs.len(), 1);
        assert_eq!(repairs[0].kind, SoftRepairKind::CaseMismatch);
    }

    #[test]
    fn test_unmatched_answer_falls_back_to_first_option() {
        let value = json!([raw_item(1, &["rojo", "azul", "verde", "amarillo"], "morado")]);
        let (items, repairs) = validate_question_set(&value, 1, 4, "colors").expect("valid");
        assert_eq!(items[0].correct_answer, "rojo");
        assert_eq!(repairs[0].kind, SoftRepairKind::AnswerFallback);
    }

    #[test]
    fn test_duplicate_options_are_hard() {
        let value = json!([raw_item(1, &["es", "es", "está", "son"], "es")]);
        let failure = validate_question_set(&value, 1, 4, "ser").unwrap_err();
        assert_eq!(failure.reasons, vec!["item 1: duplicate options [es]"]);
    }

    #[test]
    fn test_whitespace_duplicates_are_detected_after_trim() {
        let value = json!([raw_item(1, &["es ", "es", "está", "son"], "es")]);
        assert!(validate_question_set(&value, 1, 4, "ser").is_err());
    }

    #[test]
    fn test_case_variants_are_not_duplicates() {
        let value = json!([raw_item(1, &["Es", "es", "está", "son"], "es")]);
        let (items, repairs) = validate_question_set(&value, 1, 4, "ser").expect("valid");
        assert_eq!(items[0].correct_answer, "es");
        assert!(repairs.is_empty());
    }

    #[test]
    fn test_count_mismatch_rejects_batch() {
        let value = Value::Array(batch(14));
        let failure = validate_question_set(&value, 15, 4, "colors").unwrap_err();
        assert_eq!(failure.reasons, vec!["count mismatch: expected 15 items, got 14"]);
    }

    #[test]
    fn test_wrapped_object_is_accepted() {
        let value = json!({ "questions": batch(3) });
        let (items, _) = validate_question_set(&value, 3, 4, "colors").expect("valid");
        assert_eq!(items.len(), 3);
        assert!(items.iter().all(QuestionItem::answer_is_option));
    }

    #[test]
    fn test_wrong_option_count_is_hard() {
        let value = json!([raw_item(1, &["rojo", "azul", "verde"], "rojo")]);
        let failure = validate_question_set(&value, 1, 4, "colors").unwrap_err();
        assert_eq!(failure.reasons, vec!["item 1: expected 4 options, got 3"]);
    }

    #[test]
    fn test_missing_fields_are_reported_per_item() {
        let value = json!([{ "options": ["a", "b", "c", "d"] }]);
        let failure = validate_question_set(&value, 1, 4, "t").unwrap_err();
        assert_eq!(
            failure.reasons,
            vec![
                "item 1: missing question",
                "item 1: missing explanation",
                "item 1: missing correct_answer"
            ]
        );
    }

    #[test]
    fn test_missing_and_duplicate_ids_are_assigned() {
        let mut items = batch(3);
        items[1]["id"] = json!("colors_p1");
        if let Some(object) = items[2].as_object_mut() {
            object.remove("id");
        }
        let (items, repairs) =
            validate_question_set(&Value::Array(items), 3, 4, "colors").expect("valid");
        assert_eq!(items[0].id, "colors_p1");
        assert_eq!(items[1].id, "colors_p2");
        assert_eq!(items[2].id, "colors_p3");
        assert_eq!(repairs.len(), 2);
        assert!(repairs.iter().all(|r| r.kind == SoftRepairKind::IdAssigned));
    }

    #[test]
    fn test_assigned_id_avoids_collision() {
        let mut items = batch(2);
        items[0]["id"] = json!("colors_p2");
        items[1]["id"] = json!("colors_p2");
        let (items, _) = validate_question_set(&Value::Array(items), 2, 4, "colors").expect("valid");
        assert_eq!(items[0].id, "colors_p2");
        assert_eq!(items[1].id, "colors_p2_2");
    }

    #[test]
    fn test_type_and_difficulty_defaults() {
        let value = json!([{
            "question_text": "Elige",
            "options": ["a", "b", "c", "d"],
            "correct_answer": "b",
            "explanation": "x",
            "difficulty": "hard"
        }]);
        let (items, _) = validate_question_set(&value, 1, 4, "t").expect("valid");
        assert_eq!(items[0].item_type, "multiple_choice");
        assert_eq!(items[0].question, "Elige");
        assert_eq!(items[0].difficulty, None);
    }

    #[test]
    fn test_ladder_is_total() {
        let options: Vec<String> = ["uno", "dos", "tres", "cuatro"].iter().map(|s| s.to_string()).collect();
        for answer in ["uno", "DOS", "cinco", ""] {
            let resolved = match match_answer(answer, &options).expect("non-empty options") {
                AnswerMatch::Exact => answer.to_string(),
                AnswerMatch::CaseInsensitive(o) | AnswerMatch::Fallback(o) => o,
            };
            assert!(options.contains(&resolved));
        }
    }

    #[test]
    fn test_zero_options_batch_is_rejected() {
        let item = json!({
            "question": "Q",
            "options": [],
            "correct_answer": "a",
            "explanation": "E"
        });
        let failure =
            validate_question_set(&json!([item.clone(), item]), 2, 0, "t").unwrap_err();
        assert_eq!(failure.class, FailureClass::HardValidation);
        assert!(failure.reasons[0].starts_with("invalid quantity constraints"));

        assert!(validate_question_set(&json!([]), 0, 4, "t").is_err());
    }

    #[test]
    fn test_unmatchable_answer_records_reason() {
        let item = json!({
            "question": "Q",
            "options": [],
            "correct_answer": "a",
            "explanation": "E"
        });
        let mut reasons = Vec::new();
        let mut repairs = Vec::new();
        let checked = check_item(1, &item, 0, &mut reasons, &mut repairs);
        assert!(checked.is_none());
        assert_eq!(reasons, vec!["item 1: no options to match correct_answer against"]);
    }
}
