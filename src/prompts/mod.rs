//! Prompt construction for every task kind.
//!
//! [`PromptBuilder::build`] is a pure function of the [`TaskSpec`] and the
//! rubric table: it picks the template for the spec's kind and section and
//! returns the instruction text together with the [`SchemaSpec`] the reply
//! will be validated against.
//!
//! - [`assessment`] - rubric-scored spoken and written responses
//! - [`questions`] - bulk multiple-choice practice sets

pub mod assessment;
pub mod questions;

use serde::Serialize;

use crate::rubric::{RubricDefinition, RubricTable};
use crate::task::{AssessmentVariant, TaskKind, TaskPayload, TaskSpec};

/// Expected shape of the model's reply.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "shape", rename_all = "snake_case")]
pub enum SchemaSpec {
    /// A JSON object with `{criterion}_score` keys, `total_score`, `feedback`, ...
    Assessment { rubric: RubricDefinition },
    /// A JSON array of items (or an object wrapping one under `questions`).
    QuestionSet {
        count: usize,
        options_per_item: usize,
        /// Prefix for ids assigned to items that lack a usable one.
        id_prefix: String,
    },
}

/// Prompt text plus the shape its reply must have.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BuiltPrompt {
    pub kind: TaskKind,
    /// System message asking for structured output only.
    pub system: String,
    pub instruction: String,
    pub shape: SchemaSpec,
}

/// Builds prompts from task specs.
pub struct PromptBuilder<'a> {
    rubrics: &'a RubricTable,
}

impl<'a> PromptBuilder<'a> {
    pub fn new(rubrics: &'a RubricTable) -> Self {
        Self { rubrics }
    }

    pub fn build(&self, spec: &TaskSpec) -> BuiltPrompt {
        match &spec.payload {
            TaskPayload::SpokenAssessment { section, material } => {
                let rubric = self.rubric_for(spec, AssessmentVariant::Spoken(*section));
                BuiltPrompt {
                    kind: spec.kind(),
                    system: assessment::EXAMINER_SYSTEM_PROMPT.to_string(),
                    instruction: assessment::build_spoken_prompt(
                        *section,
                        spec.language,
                        spec.tier,
                        material,
                        &rubric,
                    ),
                    shape: SchemaSpec::Assessment { rubric },
                }
            }
            TaskPayload::WrittenAssessment { section, material } => {
                let rubric = self.rubric_for(spec, AssessmentVariant::Written(*section));
                BuiltPrompt {
                    kind: spec.kind(),
                    system: assessment::EXAMINER_SYSTEM_PROMPT.to_string(),
                    instruction: assessment::build_written_prompt(
                        *section,
                        spec.language,
                        spec.tier,
                        material,
                        &rubric,
                    ),
                    shape: SchemaSpec::Assessment { rubric },
                }
            }
            TaskPayload::BulkQuestionGeneration {
                topic,
                reference_items,
                quantity,
            } => BuiltPrompt {
                kind: spec.kind(),
                system: questions::build_system_prompt(spec.language, quantity),
                instruction: questions::build_question_set_prompt(
                    spec.language,
                    topic,
                    reference_items,
                    quantity,
                ),
                shape: SchemaSpec::QuestionSet {
                    count: quantity.count,
                    options_per_item: quantity.options_per_item,
                    id_prefix: topic.slug.clone(),
                },
            },
        }
    }

    fn rubric_for(&self, spec: &TaskSpec, variant: AssessmentVariant) -> RubricDefinition {
        match &spec.rubric_override {
            Some(rubric) => rubric.clone(),
            None => self.rubrics.get(variant).into_owned(),
        }
    }
}
