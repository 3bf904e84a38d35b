//! Position-based difficulty enforcement for generated question sets.
//!
//! The model labels each item with a difficulty, but those labels are not
//! trusted. A [`PositionRule`] splits the batch into equal segments and gives
//! each segment a band of acceptable levels; labels outside the band are
//! overwritten with the band's canonical level.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::validation::{QuestionItem, SoftRepair, SoftRepairKind};

/// The difficulty level of a practice item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DifficultyLevel {
    Beginner,
    Intermediate,
    Advanced,
}

impl DifficultyLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            DifficultyLevel::Beginner => "beginner",
            DifficultyLevel::Intermediate => "intermediate",
            DifficultyLevel::Advanced => "advanced",
        }
    }

    /// Lenient parse of a model-supplied label (trimmed, case-insensitive).
    pub fn parse_label(label: &str) -> Option<Self> {
        match label.trim().to_lowercase().as_str() {
            "beginner" => Some(DifficultyLevel::Beginner),
            "intermediate" => Some(DifficultyLevel::Intermediate),
            "advanced" => Some(DifficultyLevel::Advanced),
            _ => None,
        }
    }
}

impl fmt::Display for DifficultyLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors in a position rule definition.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum PositionRuleError {
    #[error("Position rule needs at least one band")]
    NoBands,

    #[error("Band {0} allows no difficulty levels")]
    EmptyBand(usize),

    #[error("Band {index}: canonical level '{canonical}' is not among the allowed levels")]
    CanonicalNotAllowed {
        index: usize,
        canonical: DifficultyLevel,
    },
}

/// Acceptable levels for one segment, plus the level to force when the
/// model's label is outside them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Band {
    pub allowed: Vec<DifficultyLevel>,
    pub canonical: DifficultyLevel,
}

impl Band {
    pub fn new(allowed: Vec<DifficultyLevel>, canonical: DifficultyLevel) -> Self {
        Self { allowed, canonical }
    }

    /// A band that accepts exactly one level.
    pub fn exactly(level: DifficultyLevel) -> Self {
        Self::new(vec![level], level)
    }

    pub fn allows(&self, level: DifficultyLevel) -> bool {
        self.allowed.contains(&level)
    }
}

/// Maps an item's index to its mandated band.
///
/// Bands split the batch into equal segments: item `i` of `n` falls in band
/// `i * bands / n`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Band>", into = "Vec<Band>")]
pub struct PositionRule {
    bands: Vec<Band>,
}

impl TryFrom<Vec<Band>> for PositionRule {
    type Error = PositionRuleError;

    fn try_from(bands: Vec<Band>) -> Result<Self, Self::Error> {
        PositionRule::new(bands)
    }
}

impl From<PositionRule> for Vec<Band> {
    fn from(rule: PositionRule) -> Self {
        rule.bands
    }
}

impl Default for PositionRule {
    /// First third beginner, middle third intermediate, final third
    /// intermediate or advanced (defaulting to intermediate).
    fn default() -> Self {
        Self {
            bands: vec![
                Band::exactly(DifficultyLevel::Beginner),
                Band::exactly(DifficultyLevel::Intermediate),
                Band::new(
                    vec![DifficultyLevel::Intermediate, DifficultyLevel::Advanced],
                    DifficultyLevel::Intermediate,
                ),
            ],
        }
    }
}

impl PositionRule {
    pub fn new(bands: Vec<Band>) -> Result<Self, PositionRuleError> {
        if bands.is_empty() {
            return Err(PositionRuleError::NoBands);
        }
        for (index, band) in bands.iter().enumerate() {
            if band.allowed.is_empty() {
                return Err(PositionRuleError::EmptyBand(index));
            }
            if !band.allows(band.canonical) {
                return Err(PositionRuleError::CanonicalNotAllowed {
                    index,
                    canonical: band.canonical,
                });
            }
        }
        Ok(Self { bands })
    }

    pub fn bands(&self) -> &[Band] {
        &self.bands
    }

    /// Band for item `index` of a batch of `count` items.
    pub fn band_for(&self, index: usize, count: usize) -> &Band {
        let segments = self.bands.len();
        let slot = if count == 0 {
            0
        } else {
            (index.min(count - 1) * segments) / count
        };
        &self.bands[slot.min(segments - 1)]
    }

    /// The level an item ends up with, given what the model claimed.
    pub fn mandated(
        &self,
        index: usize,
        count: usize,
        claimed: Option<DifficultyLevel>,
    ) -> DifficultyLevel {
        let band = self.band_for(index, count);
        match claimed {
            Some(level) if band.allows(level) => level,
            _ => band.canonical,
        }
    }
}

/// Count of items per level.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DifficultyDistribution {
    pub beginner: usize,
    pub intermediate: usize,
    pub advanced: usize,
}

impl DifficultyDistribution {
    pub fn of(items: &[QuestionItem]) -> Self {
        let mut distribution = Self::default();
        for item in items {
            match item.difficulty {
                Some(DifficultyLevel::Beginner) => distribution.beginner += 1,
                Some(DifficultyLevel::Intermediate) => distribution.intermediate += 1,
                Some(DifficultyLevel::Advanced) => distribution.advanced += 1,
                None => {}
            }
        }
        distribution
    }
}

/// Overwrites self-reported difficulty with the position-mandated level.
pub struct DifficultyEnforcer;

impl DifficultyEnforcer {
    /// Apply `rule` to every item. Always succeeds.
    pub fn enforce(items: Vec<QuestionItem>, rule: &PositionRule) -> Vec<QuestionItem> {
        Self::enforce_with_report(items, rule).0
    }

    /// Like [`enforce`](Self::enforce), also returning one record per overwritten label.
    pub fn enforce_with_report(
        mut items: Vec<QuestionItem>,
        rule: &PositionRule,
    ) -> (Vec<QuestionItem>, Vec<SoftRepair>) {
        let count = items.len();
        let mut overrides = Vec::new();

        for (index, item) in items.iter_mut().enumerate() {
            let mandated = rule.mandated(index, count, item.difficulty);
            if item.difficulty != Some(mandated) {
                let claimed = item
                    .difficulty
                    .map(|level| level.to_string())
                    .unwrap_or_else(|| "none".to_string());
                tracing::debug!(
                    item = index + 1,
                    claimed = %claimed,
                    enforced = %mandated,
                    "Difficulty label outside positional band"
                );
                overrides.push(SoftRepair::new(
                    SoftRepairKind::DifficultyOverridden,
                    format!("item {}", index + 1),
                    format!("difficulty '{}' -> '{}'", claimed, mandated),
                ));
                item.difficulty = Some(mandated);
            }
        }

        (items, overrides)
    }
}
