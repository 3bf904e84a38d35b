//! Error types for content-forge operations.
//!
//! Defines the error types shared across subsystems:
//! - Model transport (the LLM HTTP client and gateways)
//! - Pipeline outcomes surfaced to callers
//!
//! Rubric and validation errors live next to the code that produces them;
//! [`ConfigError`] is re-exported here.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use crate::pipeline::config::ConfigError;

/// Errors that can occur while talking to the model.
#[derive(Debug, Clone, Error)]
pub enum LlmError {
    #[error("Missing API key: LITELLM_API_KEY environment variable not set")]
    MissingApiKey,

    #[error("Missing API base URL: LITELLM_API_BASE environment variable not set")]
    MissingApiBase,

    #[error("HTTP request failed: {0}")]
    RequestFailed(String),

    #[error("Failed to parse LLM response: {0}")]
    ParseError(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Invalid model: {0}")]
    InvalidModel(String),

    #[error("Context length exceeded: {limit} tokens")]
    ContextLengthExceeded { limit: u32 },

    #[error("API error ({code}): {message}")]
    ApiError { code: u16, message: String },

    #[error("Model call exceeded its {0:?} deadline")]
    Timeout(Duration),

    #[error("Gateway saturated: no call slot became free within {0:?}")]
    Backpressure(Duration),

    #[error("Model returned an empty reply")]
    EmptyReply,
}

impl LlmError {
    /// Whether another attempt could plausibly succeed.
    ///
    /// Configuration and request-shape problems (credentials, unknown model,
    /// prompt too long, other 4xx answers) are permanent for a given request
    /// and are surfaced without consuming retries.
    pub fn is_retryable(&self) -> bool {
        match self {
            LlmError::RequestFailed(_)
            | LlmError::ParseError(_)
            | LlmError::RateLimited(_)
            | LlmError::Timeout(_)
            | LlmError::Backpressure(_)
            | LlmError::EmptyReply => true,
            LlmError::ApiError { code, .. } => *code >= 500 || *code == 408 || *code == 429,
            LlmError::MissingApiKey
            | LlmError::MissingApiBase
            | LlmError::InvalidModel(_)
            | LlmError::ContextLengthExceeded { .. } => false,
        }
    }
}

/// Why a request stopped before reaching a terminal pipeline state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AbortReason {
    /// The caller cancelled the request.
    Cancelled,
    /// The overall request deadline elapsed.
    DeadlineExceeded,
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbortReason::Cancelled => write!(f, "cancelled by caller"),
            AbortReason::DeadlineExceeded => write!(f, "request deadline exceeded"),
        }
    }
}

/// Typed failure returned by the retry controller.
///
/// Callers either get a fully validated result or one of these; the pipeline
/// never substitutes a guessed result for a failure.
#[derive(Debug, Error)]
pub enum PipelineFailure {
    /// Every allowed attempt failed validation or transport.
    #[error("Exhausted after {attempts} attempt(s): {}", .last_reasons.join("; "))]
    Exhausted {
        /// Reasons recorded for the final attempt.
        last_reasons: Vec<String>,
        /// Most recent raw model reply, kept for manual review.
        last_raw_reply: Option<String>,
        /// Number of model calls made.
        attempts: u32,
    },

    /// The request was cancelled or ran out of overall time.
    #[error("Aborted: {reason}")]
    Aborted { reason: AbortReason },

    /// The model could not be reached (or refused the request permanently).
    #[error("Transport failure: {cause}")]
    Transport { cause: LlmError },
}

impl PipelineFailure {
    /// Short label used for metrics and logs.
    pub fn label(&self) -> &'static str {
        match self {
            PipelineFailure::Exhausted { .. } => "exhausted",
            PipelineFailure::Aborted { .. } => "aborted",
            PipelineFailure::Transport { .. } => "transport",
        }
    }

    /// The last raw reply, when the failure carries one.
    pub fn last_raw_reply(&self) -> Option<&str> {
        match self {
            PipelineFailure::Exhausted { last_raw_reply, .. } => last_raw_reply.as_deref(),
            _ => None,
        }
    }
}
