//! Model access.
//!
//! - [`litellm`] - HTTP client for LiteLLM-compatible chat completions
//! - [`gateway`] - the [`ModelGateway`] seam the pipeline calls, plus
//!   deadline enforcement and throttling
//!
//! ```ignore
//! use std::sync::Arc;
//! use content_forge::llm::{LiteLlmClient, ProviderGateway, ThrottledGateway};
//!
//! let client = Arc::new(LiteLlmClient::from_env()?);
//! let gateway = Arc::new(ProviderGateway::new(client, "openai/gpt-4o-mini"));
//! let throttled = ThrottledGateway::new(gateway, 4, Duration::from_secs(10));
//! ```

pub mod gateway;
pub mod litellm;

pub use gateway::{ModelGateway, ProviderGateway, SamplingParams, ThrottledGateway};
pub use litellm::{
    Choice, GenerationRequest, GenerationResponse, LiteLlmClient, LlmProvider, Message,
    ResponseFormat, Usage, DEFAULT_MODEL,
};
