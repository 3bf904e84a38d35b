//! content-forge: validated structured content from a language model.
//!
//! Builds assessment and question-generation prompts, calls the model,
//! repairs and validates each reply, and retries with escalated sampling
//! penalties until a reply passes or the retry budget runs out.

pub mod cli;
pub mod difficulty;
pub mod error;
pub mod llm;
pub mod metrics;
pub mod pipeline;
pub mod prompts;
pub mod repair;
pub mod rubric;
pub mod scoring;
pub mod task;
pub mod validation;

pub use error::{AbortReason, LlmError, PipelineFailure};
pub use pipeline::{PipelineConfig, PipelineOutcome, RetryController, ValidatedResult};
pub use task::{TaskKind, TaskSpec};
