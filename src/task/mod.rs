//! Task specifications.
//!
//! A [`TaskSpec`] describes one request to the pipeline: which kind of content
//! is wanted, for which language and tier, and the reference material the
//! prompt needs. Specs are built once by the caller and never mutated.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::rubric::RubricDefinition;

/// The three request kinds handled by the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    SpokenAssessment,
    WrittenAssessment,
    BulkQuestionGeneration,
}

impl TaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::SpokenAssessment => "spoken_assessment",
            TaskKind::WrittenAssessment => "written_assessment",
            TaskKind::BulkQuestionGeneration => "bulk_question_generation",
        }
    }

    /// Whether results of this kind are rubric-scored.
    pub fn is_assessment(&self) -> bool {
        !matches!(self, TaskKind::BulkQuestionGeneration)
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Target language of the content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Es,
    Fr,
    De,
}

impl Language {
    /// English display name used inside prompts.
    pub fn display_name(&self) -> &'static str {
        match self {
            Language::Es => "Spanish",
            Language::Fr => "French",
            Language::De => "German",
        }
    }
}

/// Exam tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Foundation,
    Higher,
}

impl Tier {
    pub fn display_name(&self) -> &'static str {
        match self {
            Tier::Foundation => "Foundation",
            Tier::Higher => "Higher",
        }
    }
}

/// Sections of a spoken exam.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpeakingSection {
    Roleplay,
    ReadingAloud,
    ShortConversation,
    Photocard,
    GeneralConversation,
}

impl SpeakingSection {
    pub const ALL: [SpeakingSection; 5] = [
        SpeakingSection::Roleplay,
        SpeakingSection::ReadingAloud,
        SpeakingSection::ShortConversation,
        SpeakingSection::Photocard,
        SpeakingSection::GeneralConversation,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SpeakingSection::Roleplay => "roleplay",
            SpeakingSection::ReadingAloud => "reading_aloud",
            SpeakingSection::ShortConversation => "short_conversation",
            SpeakingSection::Photocard => "photocard",
            SpeakingSection::GeneralConversation => "general_conversation",
        }
    }
}

/// Sections of a written exam.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WritingSection {
    PhotoDescription,
    Translation,
    ShortMessage,
    ExtendedWriting,
    AdvancedWriting,
}

impl WritingSection {
    pub const ALL: [WritingSection; 5] = [
        WritingSection::PhotoDescription,
        WritingSection::Translation,
        WritingSection::ShortMessage,
        WritingSection::ExtendedWriting,
        WritingSection::AdvancedWriting,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            WritingSection::PhotoDescription => "photo_description",
            WritingSection::Translation => "translation",
            WritingSection::ShortMessage => "short_message",
            WritingSection::ExtendedWriting => "extended_writing",
            WritingSection::AdvancedWriting => "advanced_writing",
        }
    }

    /// Default word-count target when the spec does not set one.
    pub fn default_word_target(&self) -> Option<u32> {
        match self {
            WritingSection::ShortMessage | WritingSection::ExtendedWriting => Some(90),
            WritingSection::AdvancedWriting => Some(150),
            WritingSection::PhotoDescription | WritingSection::Translation => None,
        }
    }
}

/// Rubric lookup key: an assessment kind together with its section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AssessmentVariant {
    Spoken(SpeakingSection),
    Written(WritingSection),
}

impl AssessmentVariant {
    /// Every built-in variant, spoken sections first.
    pub fn all() -> impl Iterator<Item = AssessmentVariant> {
        SpeakingSection::ALL
            .into_iter()
            .map(AssessmentVariant::Spoken)
            .chain(WritingSection::ALL.into_iter().map(AssessmentVariant::Written))
    }

    pub fn kind(&self) -> TaskKind {
        match self {
            AssessmentVariant::Spoken(_) => TaskKind::SpokenAssessment,
            AssessmentVariant::Written(_) => TaskKind::WrittenAssessment,
        }
    }

    pub fn section_name(&self) -> &'static str {
        match self {
            AssessmentVariant::Spoken(s) => s.as_str(),
            AssessmentVariant::Written(s) => s.as_str(),
        }
    }
}

impl fmt::Display for AssessmentVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind(), self.section_name())
    }
}

/// Reference material for an assessment request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AssessmentMaterial {
    /// The student's answer (transcription for spoken sections).
    pub response_text: String,
    /// Question or task prompt shown to the student.
    #[serde(default)]
    pub question_text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub question_number: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_content: Option<String>,
    /// Source passage for reading aloud or translation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub theme: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub bullet_points: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub word_count_target: Option<u32>,
}

impl AssessmentMaterial {
    pub fn new(response_text: impl Into<String>) -> Self {
        Self {
            response_text: response_text.into(),
            ..Default::default()
        }
    }

    pub fn with_question(mut self, question_text: impl Into<String>) -> Self {
        self.question_text = question_text.into();
        self
    }

    pub fn with_question_number(mut self, number: u32) -> Self {
        self.question_number = Some(number);
        self
    }

    pub fn with_expected_content(mut self, expected: impl Into<String>) -> Self {
        self.expected_content = Some(expected.into());
        self
    }

    pub fn with_original_text(mut self, text: impl Into<String>) -> Self {
        self.original_text = Some(text.into());
        self
    }

    pub fn with_theme(mut self, theme: impl Into<String>) -> Self {
        self.theme = Some(theme.into());
        self
    }

    pub fn with_bullet_points(mut self, points: Vec<String>) -> Self {
        self.bullet_points = points;
        self
    }

    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = Some(topic.into());
        self
    }

    pub fn with_word_count_target(mut self, words: u32) -> Self {
        self.word_count_target = Some(words);
        self
    }

    /// Whitespace-separated word count of the student's response.
    pub fn word_count(&self) -> usize {
        self.response_text.split_whitespace().count()
    }
}

/// Grammar topic the question set is generated for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopicMetadata {
    /// Topic name; underscores are rendered as spaces.
    pub name: String,
    pub category: String,
    /// Prefix for generated item ids (`{slug}_p1`, `{slug}_p2`, ...).
    pub slug: String,
    #[serde(default = "default_topic_level")]
    pub level: String,
}

fn default_topic_level() -> String {
    "intermediate".to_string()
}

impl TopicMetadata {
    pub fn new(
        name: impl Into<String>,
        category: impl Into<String>,
        slug: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            category: category.into(),
            slug: slug.into(),
            level: default_topic_level(),
        }
    }

    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.level = level.into();
        self
    }

    pub fn display_name(&self) -> String {
        self.name.replace('_', " ")
    }
}

/// Rejected [`QuantityConstraints`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QuantityError {
    #[error("count must be at least 1")]
    EmptyBatch,

    #[error("options_per_item must be at least {min}, got {got}")]
    TooFewOptions { min: usize, got: usize },
}

/// Size constraints for a generated question set.
///
/// Deserialization goes through [`QuantityConstraints::new`], so a task file
/// cannot ask for an empty batch or items without real choices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawQuantity")]
pub struct QuantityConstraints {
    /// Exact number of items the batch must contain.
    pub count: usize,
    /// Exact number of options each item must carry.
    pub options_per_item: usize,
}

#[derive(Deserialize)]
struct RawQuantity {
    #[serde(default = "default_count")]
    count: usize,
    #[serde(default = "default_options_per_item")]
    options_per_item: usize,
}

impl TryFrom<RawQuantity> for QuantityConstraints {
    type Error = QuantityError;

    fn try_from(raw: RawQuantity) -> Result<Self, Self::Error> {
        QuantityConstraints::new(raw.count, raw.options_per_item)
    }
}

/// A multiple-choice item needs a correct option and at least one distractor.
pub const MIN_OPTIONS_PER_ITEM: usize = 2;

fn default_count() -> usize {
    15
}

fn default_options_per_item() -> usize {
    4
}

impl QuantityConstraints {
    pub fn new(count: usize, options_per_item: usize) -> Result<Self, QuantityError> {
        let constraints = Self {
            count,
            options_per_item,
        };
        constraints.validate()?;
        Ok(constraints)
    }

    /// Check constraints built field by field.
    pub fn validate(&self) -> Result<(), QuantityError> {
        if self.count == 0 {
            return Err(QuantityError::EmptyBatch);
        }
        if self.options_per_item < MIN_OPTIONS_PER_ITEM {
            return Err(QuantityError::TooFewOptions {
                min: MIN_OPTIONS_PER_ITEM,
                got: self.options_per_item,
            });
        }
        Ok(())
    }
}

impl Default for QuantityConstraints {
    fn default() -> Self {
        Self {
            count: default_count(),
            options_per_item: default_options_per_item(),
        }
    }
}

/// Kind-specific part of a task spec.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskPayload {
    SpokenAssessment {
        section: SpeakingSection,
        material: AssessmentMaterial,
    },
    WrittenAssessment {
        section: WritingSection,
        material: AssessmentMaterial,
    },
    BulkQuestionGeneration {
        topic: TopicMetadata,
        /// Existing quiz items for context; the first five go into the prompt.
        #[serde(default)]
        reference_items: Vec<serde_json::Value>,
        #[serde(default)]
        quantity: QuantityConstraints,
    },
}

/// One generation or assessment request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSpec {
    #[serde(default = "new_task_id")]
    pub id: String,
    pub language: Language,
    pub tier: Tier,
    #[serde(flatten)]
    pub payload: TaskPayload,
    /// Rubric carried by the request itself; wins over the rubric table.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rubric_override: Option<RubricDefinition>,
}

fn new_task_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

impl TaskSpec {
    pub fn spoken(
        language: Language,
        tier: Tier,
        section: SpeakingSection,
        material: AssessmentMaterial,
    ) -> Self {
        Self::with_payload(
            language,
            tier,
            TaskPayload::SpokenAssessment { section, material },
        )
    }

    pub fn written(
        language: Language,
        tier: Tier,
        section: WritingSection,
        material: AssessmentMaterial,
    ) -> Self {
        Self::with_payload(
            language,
            tier,
            TaskPayload::WrittenAssessment { section, material },
        )
    }

    pub fn questions(language: Language, tier: Tier, topic: TopicMetadata) -> Self {
        Self::with_payload(
            language,
            tier,
            TaskPayload::BulkQuestionGeneration {
                topic,
                reference_items: Vec::new(),
                quantity: QuantityConstraints::default(),
            },
        )
    }

    fn with_payload(language: Language, tier: Tier, payload: TaskPayload) -> Self {
        Self {
            id: new_task_id(),
            language,
            tier,
            payload,
            rubric_override: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_rubric_override(mut self, rubric: RubricDefinition) -> Self {
        self.rubric_override = Some(rubric);
        self
    }

    /// Replace the reference items of a question-generation spec.
    pub fn with_reference_items(mut self, items: Vec<serde_json::Value>) -> Self {
        if let TaskPayload::BulkQuestionGeneration {
            reference_items, ..
        } = &mut self.payload
        {
            *reference_items = items;
        }
        self
    }

    /// Replace the quantity constraints of a question-generation spec.
    pub fn with_quantity(mut self, constraints: QuantityConstraints) -> Self {
        if let TaskPayload::BulkQuestionGeneration { quantity, .. } = &mut self.payload {
            *quantity = constraints;
        }
        self
    }

    pub fn kind(&self) -> TaskKind {
        match self.payload {
            TaskPayload::SpokenAssessment { .. } => TaskKind::SpokenAssessment,
            TaskPayload::WrittenAssessment { .. } => TaskKind::WrittenAssessment,
            TaskPayload::BulkQuestionGeneration { .. } => TaskKind::BulkQuestionGeneration,
        }
    }

    /// Rubric key for assessment specs; `None` for question generation.
    pub fn assessment_variant(&self) -> Option<AssessmentVariant> {
        match &self.payload {
            TaskPayload::SpokenAssessment { section, .. } => {
                Some(AssessmentVariant::Spoken(*section))
            }
            TaskPayload::WrittenAssessment { section, .. } => {
                Some(AssessmentVariant::Written(*section))
            }
            TaskPayload::BulkQuestionGeneration { .. } => None,
        }
    }
}
