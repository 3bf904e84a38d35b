//! What a successful request returns.

use serde::{Deserialize, Serialize};

use crate::difficulty::DifficultyDistribution;
use crate::llm::SamplingParams;
use crate::scoring::AssessmentResult;
use crate::task::TopicMetadata;
use crate::validation::{QuestionItem, SoftRepair};

/// A generated practice set, ready for the caller to persist.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PracticeSet {
    pub title: String,
    pub difficulty_level: String,
    pub estimated_duration_minutes: usize,
    pub questions: Vec<QuestionItem>,
    pub distribution: DifficultyDistribution,
}

impl PracticeSet {
    /// Wrap enforced items for `topic`. One minute per question.
    pub fn new(topic: &TopicMetadata, questions: Vec<QuestionItem>) -> Self {
        Self {
            title: format!("{} - Practice", topic.display_name()),
            difficulty_level: topic.level.clone(),
            estimated_duration_minutes: questions.len(),
            distribution: DifficultyDistribution::of(&questions),
            questions,
        }
    }
}

/// Validated result of one request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "result", rename_all = "snake_case")]
pub enum ValidatedResult {
    Assessment(AssessmentResult),
    QuestionSet(PracticeSet),
}

impl ValidatedResult {
    pub fn as_assessment(&self) -> Option<&AssessmentResult> {
        match self {
            ValidatedResult::Assessment(result) => Some(result),
            ValidatedResult::QuestionSet(_) => None,
        }
    }

    pub fn as_practice_set(&self) -> Option<&PracticeSet> {
        match self {
            ValidatedResult::QuestionSet(set) => Some(set),
            ValidatedResult::Assessment(_) => None,
        }
    }
}

/// A result plus how it was obtained.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineOutcome {
    pub task_id: String,
    pub result: ValidatedResult,
    /// Model calls made, including the successful one.
    pub attempts: u32,
    /// Repairs from the successful attempt, difficulty overrides included.
    pub soft_repairs: Vec<SoftRepair>,
    /// Sampling used for the successful attempt.
    pub final_params: SamplingParams,
    pub processing_time_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::difficulty::DifficultyLevel;

    fn item(n: usize, difficulty: DifficultyLevel) -> QuestionItem {
        QuestionItem {
            id: format!("ser_estar_p{}", n),
            item_type: "multiple_choice".to_string(),
            question: "Q".to_string(),
            options: vec!["a".into(), "b".into(), "c".into(), "d".into()],
            correct_answer: "a".to_string(),
            explanation: "E".to_string(),
            difficulty: Some(difficulty),
        }
    }

    #[test]
    fn test_practice_set_envelope() {
        let topic = TopicMetadata::new("ser_vs_estar", "verbs", "ser_estar");
        let set = PracticeSet::new(
            &topic,
            vec![
                item(1, DifficultyLevel::Beginner),
                item(2, DifficultyLevel::Intermediate),
                item(3, DifficultyLevel::Intermediate),
            ],
        );
        assert_eq!(set.title, "ser vs estar - Practice");
        assert_eq!(set.difficulty_level, "intermediate");
        assert_eq!(set.estimated_duration_minutes, 3);
        assert_eq!(set.distribution.beginner, 1);
        assert_eq!(set.distribution.intermediate, 2);
        assert_eq!(set.distribution.advanced, 0);
    }

    #[test]
    fn test_validated_result_accessors() {
        let topic = TopicMetadata::new("colours", "adjectives", "colours");
        let result = ValidatedResult::QuestionSet(PracticeSet::new(&topic, Vec::new()));
        assert!(result.as_assessment().is_none());
        assert_eq!(result.as_practice_set().map(|s| s.questions.len()), Some(0));

        let json = serde_json::to_value(&result).expect("serializable");
        assert_eq!(json["type"], "question_set");
    }
}
