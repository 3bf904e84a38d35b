//! Rubric definitions and the per-variant rubric table.
//!
//! A rubric is a list of named criteria, each with an integer maximum; the
//! rubric maximum is their sum. The built-in table covers every spoken and
//! written section. Deployments can override entries from YAML, and a single
//! request can carry its own rubric inside its [`TaskSpec`].

use std::borrow::Cow;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::task::{AssessmentVariant, SpeakingSection, TaskSpec, WritingSection};

/// Errors raised while building or loading rubrics.
#[derive(Debug, Error)]
pub enum RubricError {
    #[error("Rubric has no criteria")]
    Empty,

    #[error("Criterion '{0}' must have a maximum greater than zero")]
    ZeroMax(String),

    #[error("Criterion '{0}' appears more than once")]
    DuplicateCriterion(String),

    #[error("Criterion name must not be empty")]
    EmptyName,

    #[error("Rubric maximum exceeds {limit} points")]
    MaxTooLarge { limit: u32 },

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A named rubric criterion with its maximum score.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Criterion {
    pub name: String,
    pub max: u32,
}

impl Criterion {
    pub fn new(name: impl Into<String>, max: u32) -> Self {
        Self {
            name: name.into(),
            max,
        }
    }

    /// Key under which the model reports this criterion (`communication_score`).
    pub fn score_key(&self) -> String {
        format!("{}_score", self.name)
    }

    /// Human title used in prompts (`language_quality` -> `Language Quality`).
    pub fn title(&self) -> String {
        self.name
            .split('_')
            .filter(|part| !part.is_empty())
            .map(|part| {
                let mut chars = part.chars();
                match chars.next() {
                    Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                    None => String::new(),
                }
            })
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[derive(Deserialize)]
struct RawRubric {
    criteria: Vec<Criterion>,
}

impl TryFrom<RawRubric> for RubricDefinition {
    type Error = RubricError;

    fn try_from(raw: RawRubric) -> Result<Self, Self::Error> {
        RubricDefinition::new(raw.criteria)
    }
}

/// Upper bound on a rubric's total maximum.
pub const MAX_RUBRIC_SCORE: u32 = 1_000;

/// Validated list of criteria.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawRubric")]
pub struct RubricDefinition {
    criteria: Vec<Criterion>,
}

impl RubricDefinition {
    /// Build a rubric, rejecting empty lists, zero maxima, duplicate names
    /// and totals above [`MAX_RUBRIC_SCORE`].
    pub fn new(criteria: Vec<Criterion>) -> Result<Self, RubricError> {
        if criteria.is_empty() {
            return Err(RubricError::Empty);
        }
        let mut seen = HashSet::new();
        let mut total: u32 = 0;
        for criterion in &criteria {
            if criterion.name.trim().is_empty() {
                return Err(RubricError::EmptyName);
            }
            if criterion.max == 0 {
                return Err(RubricError::ZeroMax(criterion.name.clone()));
            }
            if !seen.insert(criterion.name.as_str()) {
                return Err(RubricError::DuplicateCriterion(criterion.name.clone()));
            }
            total = total
                .checked_add(criterion.max)
                .filter(|sum| *sum <= MAX_RUBRIC_SCORE)
                .ok_or(RubricError::MaxTooLarge {
                    limit: MAX_RUBRIC_SCORE,
                })?;
        }
        Ok(Self { criteria })
    }

    fn from_static(criteria: &[(&str, u32)]) -> Self {
        Self {
            criteria: criteria
                .iter()
                .map(|(name, max)| Criterion::new(*name, *max))
                .collect(),
        }
    }

    pub fn criteria(&self) -> &[Criterion] {
        &self.criteria
    }

    pub fn criterion(&self, name: &str) -> Option<&Criterion> {
        self.criteria.iter().find(|c| c.name == name)
    }

    /// Total maximum: the sum of the criterion maxima, bounded at construction.
    pub fn max_score(&self) -> u32 {
        self.criteria.iter().map(|c| c.max).sum()
    }
}

/// Built-in rubric for a section.
pub fn builtin_rubric(variant: AssessmentVariant) -> RubricDefinition {
    match variant {
        AssessmentVariant::Spoken(section) => match section {
            SpeakingSection::Roleplay | SpeakingSection::ShortConversation => {
                RubricDefinition::from_static(&[("communication", 5), ("language_quality", 5)])
            }
            SpeakingSection::ReadingAloud => {
                RubricDefinition::from_static(&[("pronunciation", 5), ("fluency", 5)])
            }
            SpeakingSection::Photocard => RubricDefinition::from_static(&[
                ("description", 5),
                ("discussion", 5),
                ("language_quality", 5),
            ]),
            SpeakingSection::GeneralConversation => {
                RubricDefinition::from_static(&[("communication", 15), ("language_quality", 15)])
            }
        },
        AssessmentVariant::Written(section) => match section {
            WritingSection::PhotoDescription => {
                RubricDefinition::from_static(&[("communication", 10)])
            }
            WritingSection::Translation => {
                RubricDefinition::from_static(&[("meaning", 5), ("language_quality", 5)])
            }
            WritingSection::ShortMessage | WritingSection::ExtendedWriting => {
                RubricDefinition::from_static(&[("communication", 10), ("linguistic_quality", 5)])
            }
            WritingSection::AdvancedWriting => RubricDefinition::from_static(&[
                ("communication", 15),
                ("range", 5),
                ("accuracy", 5),
            ]),
        },
    }
}

/// On-disk shape of a rubric override file.
#[derive(Debug, Default, Deserialize)]
struct RubricFile {
    #[serde(default)]
    spoken_assessment: HashMap<SpeakingSection, RubricDefinition>,
    #[serde(default)]
    written_assessment: HashMap<WritingSection, RubricDefinition>,
}

/// Read-only rubric lookup shared by all requests.
///
/// Holds overrides only; anything not overridden resolves to the built-in rubric.
#[derive(Debug, Clone, Default)]
pub struct RubricTable {
    overrides: HashMap<AssessmentVariant, RubricDefinition>,
}

impl RubricTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse overrides from YAML.
    ///
    /// ```yaml
    /// spoken_assessment:
    ///   roleplay:
    ///     criteria:
    ///       - { name: communication, max: 6 }
    ///       - { name: language_quality, max: 4 }
    /// ```
    pub fn from_yaml_str(yaml: &str) -> Result<Self, RubricError> {
        let file: RubricFile = serde_yaml::from_str(yaml)?;
        let mut table = Self::new();
        for (section, rubric) in file.spoken_assessment {
            table.insert(AssessmentVariant::Spoken(section), rubric);
        }
        for (section, rubric) in file.written_assessment {
            table.insert(AssessmentVariant::Written(section), rubric);
        }
        Ok(table)
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, RubricError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&contents)
    }

    pub fn insert(&mut self, variant: AssessmentVariant, rubric: RubricDefinition) {
        self.overrides.insert(variant, rubric);
    }

    pub fn with_override(mut self, variant: AssessmentVariant, rubric: RubricDefinition) -> Self {
        self.insert(variant, rubric);
        self
    }

    pub fn is_overridden(&self, variant: AssessmentVariant) -> bool {
        self.overrides.contains_key(&variant)
    }

    /// Rubric for a variant: table override, else built-in.
    pub fn get(&self, variant: AssessmentVariant) -> Cow<'_, RubricDefinition> {
        match self.overrides.get(&variant) {
            Some(rubric) => Cow::Borrowed(rubric),
            None => Cow::Owned(builtin_rubric(variant)),
        }
    }

    /// Rubric for a request: the spec's own override, then the table.
    ///
    /// Returns `None` for question-generation specs, which are not scored.
    pub fn resolve<'a>(&'a self, spec: &'a TaskSpec) -> Option<Cow<'a, RubricDefinition>> {
        let variant = spec.assessment_variant()?;
        match &spec.rubric_override {
            Some(rubric) => Some(Cow::Borrowed(rubric)),
            None => Some(self.get(variant)),
        }
    }

    /// Every variant with its effective rubric, in a stable order.
    pub fn entries(&self) -> BTreeMap<AssessmentVariant, RubricDefinition> {
        AssessmentVariant::all()
            .map(|variant| (variant, self.get(variant).into_owned()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{AssessmentMaterial, Language, Tier, TopicMetadata};

    #[test]
    fn test_builtin_maxima() {
        let expected = [
            (AssessmentVariant::Spoken(SpeakingSection::Roleplay), 10),
            (AssessmentVariant::Spoken(SpeakingSection::ReadingAloud), 10),
            (AssessmentVariant::Spoken(SpeakingSection::ShortConversation), 10),
            (AssessmentVariant::Spoken(SpeakingSection::Photocard), 15),
            (AssessmentVariant::Spoken(SpeakingSection::GeneralConversation), 30),
            (AssessmentVariant::Written(WritingSection::PhotoDescription), 10),
            (AssessmentVariant::Written(WritingSection::Translation), 10),
            (AssessmentVariant::Written(WritingSection::ExtendedWriting), 15),
            (AssessmentVariant::Written(WritingSection::AdvancedWriting), 25),
        ];
        for (variant, max) in expected {
            assert_eq!(builtin_rubric(variant).max_score(), max, "{}", variant);
        }
    }

    #[test]
    fn test_rubric_validation() {
        assert!(matches!(
            RubricDefinition::new(vec![]),
            Err(RubricError::Empty)
        ));
        assert!(matches!(
            RubricDefinition::new(vec![Criterion::new("fluency", 0)]),
            Err(RubricError::ZeroMax(_))
        ));
        assert!(matches!(
            RubricDefinition::new(vec![Criterion::new("a", 1), Criterion::new("a", 2)]),
            Err(RubricError::DuplicateCriterion(_))
        ));
        let rubric = RubricDefinition::new(vec![Criterion::new("a", 1), Criterion::new("b", 2)])
            .expect("valid rubric");
        assert_eq!(rubric.max_score(), 3);
        assert_eq!(rubric.criterion("b").map(|c| c.max), Some(2));
    }

    #[test]
    fn test_criterion_key_and_title() {
        let criterion = Criterion::new("language_quality", 5);
        assert_eq!(criterion.score_key(), "language_quality_score");
        assert_eq!(criterion.title(), "Language Quality");
    }

    #[test]
    fn test_yaml_overrides() {
        let yaml = r#"
spoken_assessment:
  roleplay:
    criteria:
      - { name: communication, max: 6 }
      - { name: language_quality, max: 4 }
written_assessment:
  translation:
    criteria:
      - { name: meaning, max: 10 }
"#;
        let table = RubricTable::from_yaml_str(yaml).expect("valid yaml");
        let roleplay = AssessmentVariant::Spoken(SpeakingSection::Roleplay);
        assert!(table.is_overridden(roleplay));
        assert_eq!(table.get(roleplay).max_score(), 10);
        assert_eq!(table.get(roleplay).criteria()[0].max, 6);
        assert_eq!(
            table
                .get(AssessmentVariant::Written(WritingSection::Translation))
                .max_score(),
            10
        );
        // Untouched variants fall back to the built-in rubric.
        assert_eq!(
            table
                .get(AssessmentVariant::Spoken(SpeakingSection::Photocard))
                .max_score(),
            15
        );
        assert_eq!(table.entries().len(), 10);
    }

    #[test]
    fn test_yaml_rejects_invalid_rubric() {
        let yaml = r#"
spoken_assessment:
  roleplay:
    criteria: []
"#;
        assert!(RubricTable::from_yaml_str(yaml).is_err());
    }

    #[test]
    fn test_oversized_maxima_are_rejected() {
        let huge = RubricDefinition::new(vec![
            Criterion::new("communication", u32::MAX),
            Criterion::new("language_quality", 5),
        ]);
        assert!(matches!(huge, Err(RubricError::MaxTooLarge { limit: MAX_RUBRIC_SCORE })));

        let at_limit = RubricDefinition::new(vec![
            Criterion::new("communication", MAX_RUBRIC_SCORE - 10),
            Criterion::new("language_quality", 10),
        ])
        .expect("exactly at the limit");
        assert_eq!(at_limit.max_score(), MAX_RUBRIC_SCORE);

        let yaml = r#"
spoken_assessment:
  roleplay:
    criteria:
      - { name: communication, max: 4294967295 }
      - { name: language_quality, max: 1 }
"#;
        assert!(RubricTable::from_yaml_str(yaml).is_err());
    }

    #[test]
    fn test_yaml_file_round_trip() {
        use std::io::Write;

        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        writeln!(
            file,
            "written_assessment:\n  photo_description:\n    criteria:\n      - {{ name: communication, max: 12 }}"
        )
        .expect("write");
        let table = RubricTable::from_yaml_file(file.path()).expect("load");
        assert_eq!(
            table
                .get(AssessmentVariant::Written(WritingSection::PhotoDescription))
                .max_score(),
            12
        );
    }

    #[test]
    fn test_resolve_prefers_spec_override() {
        let table = RubricTable::new();
        let custom = RubricDefinition::new(vec![Criterion::new("communication", 20)])
            .expect("valid rubric");
        let spec = TaskSpec::spoken(
            Language::De,
            Tier::Higher,
            SpeakingSection::Roleplay,
            AssessmentMaterial::new("Ich möchte ein Zimmer."),
        )
        .with_rubric_override(custom);
        let resolved = table.resolve(&spec).expect("assessment spec");
        assert_eq!(resolved.max_score(), 20);

        let questions = TaskSpec::questions(
            Language::Es,
            Tier::Foundation,
            TopicMetadata::new("preterite", "verbs", "pret"),
        );
        assert!(table.resolve(&questions).is_none());
    }
}
