//! Request pipeline: prompt, model call, repair, validation, retry.
//!
//! # Architecture
//!
//! - **Config**: retry budget, backoff, penalty escalation, sampling defaults
//! - **State**: the per-request state machine and its bookkeeping
//! - **Controller**: drives one request (or a batch) to a terminal state
//! - **Events**: optional stream of state changes and soft repairs
//! - **Outcome**: what a successful request returns
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use content_forge::llm::{LiteLlmClient, ProviderGateway};
//! use content_forge::pipeline::{PipelineConfig, RetryController};
//! use content_forge::task::{Language, TaskSpec, Tier, TopicMetadata};
//!
//! let config = PipelineConfig::from_env()?;
//! let client = Arc::new(LiteLlmClient::from_env()?);
//! let gateway = Arc::new(ProviderGateway::new(client, config.model.clone()));
//! let controller = RetryController::new(gateway, config);
//!
//! let topic = TopicMetadata::new("ser_vs_estar", "verbs", "ser_estar");
//! let spec = TaskSpec::questions(Language::Es, Tier::Higher, topic);
//! let outcome = controller.submit(&spec).await?;
//! println!("{} items after {} attempts", outcome.result.as_practice_set().map_or(0, |s| s.questions.len()), outcome.attempts);
//! ```

pub mod config;
pub mod controller;
pub mod events;
pub mod outcome;
pub mod state;

pub use config::{ConfigError, EscalationPolicy, PipelineConfig, SamplingDefaults};
pub use controller::RetryController;
pub use events::PipelineEvent;
pub use outcome::{PipelineOutcome, PracticeSet, ValidatedResult};
pub use state::{AttemptState, Clock, PipelineState, TokioClock};
