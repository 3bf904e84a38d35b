//! Retry, escalation and sampling configuration for the controller.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::difficulty::PositionRule;
use crate::llm::SamplingParams;
use crate::task::TaskKind;

/// Largest repetition penalty the pipeline will send: 70% of the 2.0 the
/// API accepts. Higher values degrade structured output.
pub const MAX_SAFE_PENALTY: f64 = 1.4;

/// Errors that can occur while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// How repetition penalties grow across retries.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EscalationPolicy {
    /// Penalty on the first attempt.
    pub penalty_base: f64,
    /// Added per retry.
    pub penalty_step: f64,
    /// Never exceeded; at most [`MAX_SAFE_PENALTY`].
    pub penalty_cap: f64,
}

impl Default for EscalationPolicy {
    fn default() -> Self {
        Self {
            penalty_base: 0.3,
            penalty_step: 0.15,
            penalty_cap: 0.7,
        }
    }
}

impl EscalationPolicy {
    /// Penalty for the attempt after `retry_count` retries.
    pub fn penalty_for(&self, retry_count: u32) -> f64 {
        (self.penalty_base + f64::from(retry_count) * self.penalty_step).min(self.penalty_cap)
    }
}

/// Base sampling for one task kind.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SamplingDefaults {
    pub temperature: f64,
    pub max_tokens: u32,
}

/// Configuration for the retry controller.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    /// Total attempts per request, including the first.
    pub max_retries: u32,
    /// Backoff before retry `n` is `n * base_backoff`.
    pub base_backoff: Duration,
    pub escalation: EscalationPolicy,
    /// Deadline for one model call.
    pub attempt_timeout: Duration,
    /// Deadline for the whole request, backoff included.
    pub request_timeout: Option<Duration>,
    pub assessment: SamplingDefaults,
    pub generation: SamplingDefaults,
    /// Model id; empty means the provider default.
    pub model: String,
    pub position_rule: PositionRule,
    /// Parallel requests in `submit_all`.
    pub batch_concurrency: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_backoff: Duration::from_secs(2),
            escalation: EscalationPolicy::default(),
            attempt_timeout: Duration::from_secs(30),
            request_timeout: None,
            assessment: SamplingDefaults {
                temperature: 0.3,
                max_tokens: 1024,
            },
            generation: SamplingDefaults {
                temperature: 0.7,
                max_tokens: 6000,
            },
            model: String::new(),
            position_rule: PositionRule::default(),
            batch_concurrency: 4,
        }
    }
}

/// YAML form; every field optional and layered over the defaults.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    max_retries: Option<u32>,
    base_backoff_ms: Option<u64>,
    penalty_base: Option<f64>,
    penalty_step: Option<f64>,
    penalty_cap: Option<f64>,
    attempt_timeout_secs: Option<u64>,
    request_timeout_secs: Option<u64>,
    assessment: Option<SamplingDefaults>,
    generation: Option<SamplingDefaults>,
    model: Option<String>,
    position_rule: Option<PositionRule>,
    batch_concurrency: Option<usize>,
}

impl PipelineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Configuration from `CONTENT_FORGE_*` environment variables.
    ///
    /// - `CONTENT_FORGE_MAX_RETRIES` (default 3)
    /// - `CONTENT_FORGE_BASE_BACKOFF_MS` (default 2000)
    /// - `CONTENT_FORGE_PENALTY_BASE` / `_PENALTY_STEP` / `_PENALTY_CAP`
    /// - `CONTENT_FORGE_ATTEMPT_TIMEOUT_SECS` (default 30)
    /// - `CONTENT_FORGE_REQUEST_TIMEOUT_SECS` (unset: no overall deadline)
    /// - `CONTENT_FORGE_ASSESSMENT_TEMPERATURE` / `_ASSESSMENT_MAX_TOKENS`
    /// - `CONTENT_FORGE_GENERATION_TEMPERATURE` / `_GENERATION_MAX_TOKENS`
    /// - `CONTENT_FORGE_MODEL`, falling back to `LITELLM_DEFAULT_MODEL`
    /// - `CONTENT_FORGE_BATCH_CONCURRENCY` (default 4)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`from_env`](Self::from_env) with an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(val) = lookup("CONTENT_FORGE_MAX_RETRIES") {
            config.max_retries = parse_env_value(&val, "CONTENT_FORGE_MAX_RETRIES")?;
        }
        if let Some(val) = lookup("CONTENT_FORGE_BASE_BACKOFF_MS") {
            let ms: u64 = parse_env_value(&val, "CONTENT_FORGE_BASE_BACKOFF_MS")?;
            config.base_backoff = Duration::from_millis(ms);
        }

        if let Some(val) = lookup("CONTENT_FORGE_PENALTY_BASE") {
            config.escalation.penalty_base = parse_env_value(&val, "CONTENT_FORGE_PENALTY_BASE")?;
        }
        if let Some(val) = lookup("CONTENT_FORGE_PENALTY_STEP") {
            config.escalation.penalty_step = parse_env_value(&val, "CONTENT_FORGE_PENALTY_STEP")?;
        }
        if let Some(val) = lookup("CONTENT_FORGE_PENALTY_CAP") {
            config.escalation.penalty_cap = parse_env_value(&val, "CONTENT_FORGE_PENALTY_CAP")?;
        }

        if let Some(val) = lookup("CONTENT_FORGE_ATTEMPT_TIMEOUT_SECS") {
            let secs: u64 = parse_env_value(&val, "CONTENT_FORGE_ATTEMPT_TIMEOUT_SECS")?;
            config.attempt_timeout = Duration::from_secs(secs);
        }
        if let Some(val) = lookup("CONTENT_FORGE_REQUEST_TIMEOUT_SECS") {
            let secs: u64 = parse_env_value(&val, "CONTENT_FORGE_REQUEST_TIMEOUT_SECS")?;
            config.request_timeout = Some(Duration::from_secs(secs));
        }

        if let Some(val) = lookup("CONTENT_FORGE_ASSESSMENT_TEMPERATURE") {
            config.assessment.temperature =
                parse_env_value(&val, "CONTENT_FORGE_ASSESSMENT_TEMPERATURE")?;
        }
        if let Some(val) = lookup("CONTENT_FORGE_ASSESSMENT_MAX_TOKENS") {
            config.assessment.max_tokens =
                parse_env_value(&val, "CONTENT_FORGE_ASSESSMENT_MAX_TOKENS")?;
        }
        if let Some(val) = lookup("CONTENT_FORGE_GENERATION_TEMPERATURE") {
            config.generation.temperature =
                parse_env_value(&val, "CONTENT_FORGE_GENERATION_TEMPERATURE")?;
        }
        if let Some(val) = lookup("CONTENT_FORGE_GENERATION_MAX_TOKENS") {
            config.generation.max_tokens =
                parse_env_value(&val, "CONTENT_FORGE_GENERATION_MAX_TOKENS")?;
        }

        if let Some(val) = lookup("CONTENT_FORGE_MODEL").or_else(|| lookup("LITELLM_DEFAULT_MODEL")) {
            config.model = val;
        }
        if let Some(val) = lookup("CONTENT_FORGE_BATCH_CONCURRENCY") {
            config.batch_concurrency = parse_env_value(&val, "CONTENT_FORGE_BATCH_CONCURRENCY")?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Defaults overlaid with the fields present in `yaml`.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        let file: ConfigFile = serde_yaml::from_str(yaml)?;
        let mut config = Self::default();

        if let Some(v) = file.max_retries {
            config.max_retries = v;
        }
        if let Some(ms) = file.base_backoff_ms {
            config.base_backoff = Duration::from_millis(ms);
        }
        if let Some(v) = file.penalty_base {
            config.escalation.penalty_base = v;
        }
        if let Some(v) = file.penalty_step {
            config.escalation.penalty_step = v;
        }
        if let Some(v) = file.penalty_cap {
            config.escalation.penalty_cap = v;
        }
        if let Some(secs) = file.attempt_timeout_secs {
            config.attempt_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = file.request_timeout_secs {
            config.request_timeout = Some(Duration::from_secs(secs));
        }
        if let Some(v) = file.assessment {
            config.assessment = v;
        }
        if let Some(v) = file.generation {
            config.generation = v;
        }
        if let Some(v) = file.model {
            config.model = v;
        }
        if let Some(v) = file.position_rule {
            config.position_rule = v;
        }
        if let Some(v) = file.batch_concurrency {
            config.batch_concurrency = v;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&contents)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_retries == 0 {
            return Err(ConfigError::ValidationFailed(
                "max_retries must be at least 1".to_string(),
            ));
        }

        if self.attempt_timeout.is_zero() {
            return Err(ConfigError::ValidationFailed(
                "attempt_timeout must be greater than 0".to_string(),
            ));
        }

        if self.request_timeout.is_some_and(|t| t.is_zero()) {
            return Err(ConfigError::ValidationFailed(
                "request_timeout must be greater than 0".to_string(),
            ));
        }

        let escalation = &self.escalation;
        if escalation.penalty_base < 0.0 || escalation.penalty_step < 0.0 {
            return Err(ConfigError::ValidationFailed(
                "penalty_base and penalty_step cannot be negative".to_string(),
            ));
        }

        if escalation.penalty_cap > MAX_SAFE_PENALTY {
            return Err(ConfigError::ValidationFailed(format!(
                "penalty_cap must not exceed {}",
                MAX_SAFE_PENALTY
            )));
        }

        if escalation.penalty_base > escalation.penalty_cap {
            return Err(ConfigError::ValidationFailed(
                "penalty_base cannot exceed penalty_cap".to_string(),
            ));
        }

        for (name, sampling) in [("assessment", &self.assessment), ("generation", &self.generation)] {
            if !(0.0..=2.0).contains(&sampling.temperature) {
                return Err(ConfigError::ValidationFailed(format!(
                    "{} temperature must be between 0.0 and 2.0",
                    name
                )));
            }
            if sampling.max_tokens == 0 {
                return Err(ConfigError::ValidationFailed(format!(
                    "{} max_tokens must be greater than 0",
                    name
                )));
            }
        }

        if self.batch_concurrency == 0 {
            return Err(ConfigError::ValidationFailed(
                "batch_concurrency must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Sampling parameters for the first attempt of a `kind` request.
    pub fn base_params(&self, kind: TaskKind) -> SamplingParams {
        let defaults = if kind.is_assessment() {
            self.assessment
        } else {
            self.generation
        };
        SamplingParams::new(defaults.temperature, defaults.max_tokens)
            .with_penalty(self.escalation.penalty_for(0))
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_base_backoff(mut self, backoff: Duration) -> Self {
        self.base_backoff = backoff;
        self
    }

    pub fn with_escalation(mut self, escalation: EscalationPolicy) -> Self {
        self.escalation = escalation;
        self
    }

    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_position_rule(mut self, rule: PositionRule) -> Self {
        self.position_rule = rule;
        self
    }

    pub fn with_batch_concurrency(mut self, concurrency: usize) -> Self {
        self.batch_concurrency = concurrency;
        self
    }
}

/// Parses an environment variable value into the specified type.
fn parse_env_value<T: std::str::FromStr>(value: &str, key: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
        key: key.to_string(),
        message: e.to_string(),
    })
}
