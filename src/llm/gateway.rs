//! The pipeline's view of the model: `generate(prompt, params, deadline)`.
//!
//! [`ProviderGateway`] adapts any [`LlmProvider`] and enforces the
//! per-attempt deadline. [`ThrottledGateway`] sits in front of another
//! gateway when the model service is rate limited: it bounds in-flight
//! calls, optionally spaces them out, and fails fast with
//! [`LlmError::Backpressure`] instead of queueing without limit.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, Semaphore};
use tokio::time::Instant;

use super::litellm::{GenerationRequest, LlmProvider, Message};
use crate::error::LlmError;
use crate::metrics::MetricsCollector;

/// Sampling parameters for one attempt.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SamplingParams {
    pub temperature: f64,
    pub presence_penalty: f64,
    pub frequency_penalty: f64,
    pub max_tokens: u32,
}

impl SamplingParams {
    pub fn new(temperature: f64, max_tokens: u32) -> Self {
        Self {
            temperature,
            presence_penalty: 0.0,
            frequency_penalty: 0.0,
            max_tokens,
        }
    }

    /// Same parameters with both repetition penalties set to `penalty`.
    pub fn with_penalty(mut self, penalty: f64) -> Self {
        self.presence_penalty = penalty;
        self.frequency_penalty = penalty;
        self
    }
}

/// Sends one prompt to the model. Never retries.
#[async_trait]
pub trait ModelGateway: Send + Sync {
    async fn generate(
        &self,
        system: &str,
        prompt: &str,
        params: &SamplingParams,
        deadline: Duration,
    ) -> Result<String, LlmError>;
}

/// Gateway backed by a chat-completions provider.
pub struct ProviderGateway {
    provider: Arc<dyn LlmProvider>,
    model: String,
    json_mode: bool,
    metrics: MetricsCollector,
}

impl ProviderGateway {
    /// `model` may be empty to use the provider's default.
    pub fn new(provider: Arc<dyn LlmProvider>, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
            json_mode: true,
            metrics: MetricsCollector::new(),
        }
    }

    /// Disable the `json_object` response format for endpoints that reject it.
    pub fn without_json_mode(mut self) -> Self {
        self.json_mode = false;
        self
    }

    fn build_request(&self, system: &str, prompt: &str, params: &SamplingParams) -> GenerationRequest {
        let request = GenerationRequest::new(
            self.model.clone(),
            vec![Message::system(system), Message::user(prompt)],
        )
        .with_temperature(params.temperature)
        .with_max_tokens(params.max_tokens)
        .with_penalties(params.presence_penalty, params.frequency_penalty);

        if self.json_mode {
            request.with_json_response()
        } else {
            request
        }
    }
}

#[async_trait]
impl ModelGateway for ProviderGateway {
    async fn generate(
        &self,
        system: &str,
        prompt: &str,
        params: &SamplingParams,
        deadline: Duration,
    ) -> Result<String, LlmError> {
        let request = self.build_request(system, prompt, params);
        let started = Instant::now();

        // Dropping the provider future on timeout cancels the HTTP call.
        let response = tokio::time::timeout(deadline, self.provider.generate(request))
            .await
            .map_err(|_| LlmError::Timeout(deadline))??;

        let model_label = if response.model.is_empty() {
            self.model.as_str()
        } else {
            response.model.as_str()
        };
        self.metrics.record_gateway_call(model_label, started.elapsed());

        tracing::debug!(
            model = %model_label,
            tokens = response.usage.total_tokens,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Model call completed"
        );

        match response.first_content() {
            Some(content) if !content.trim().is_empty() => Ok(content.to_string()),
            _ => Err(LlmError::EmptyReply),
        }
    }
}

/// Limits concurrent calls into an inner gateway.
pub struct ThrottledGateway {
    inner: Arc<dyn ModelGateway>,
    slots: Arc<Semaphore>,
    queue_timeout: Duration,
    min_interval: Option<Duration>,
    last_call: Mutex<Option<Instant>>,
    metrics: MetricsCollector,
}

impl ThrottledGateway {
    /// At most `max_in_flight` calls; waiting longer than `queue_timeout`
    /// for a slot fails with [`LlmError::Backpressure`].
    pub fn new(inner: Arc<dyn ModelGateway>, max_in_flight: usize, queue_timeout: Duration) -> Self {
        Self {
            inner,
            slots: Arc::new(Semaphore::new(max_in_flight.max(1))),
            queue_timeout,
            min_interval: None,
            last_call: Mutex::new(None),
            metrics: MetricsCollector::new(),
        }
    }

    /// Keep at least `interval` between the starts of consecutive calls.
    pub fn with_min_interval(mut self, interval: Duration) -> Self {
        self.min_interval = Some(interval);
        self
    }

    pub fn available_slots(&self) -> usize {
        self.slots.available_permits()
    }

    async fn wait_for_spacing(&self) {
        let Some(interval) = self.min_interval else {
            return;
        };

        let mut last_call = self.last_call.lock().await;
        if let Some(previous) = *last_call {
            let elapsed = previous.elapsed();
            if elapsed < interval {
                tokio::time::sleep(interval - elapsed).await;
            }
        }
        *last_call = Some(Instant::now());
    }
}

#[async_trait]
impl ModelGateway for ThrottledGateway {
    async fn generate(
        &self,
        system: &str,
        prompt: &str,
        params: &SamplingParams,
        deadline: Duration,
    ) -> Result<String, LlmError> {
        let _permit = match tokio::time::timeout(self.queue_timeout, self.slots.acquire()).await {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => {
                return Err(LlmError::RequestFailed("gateway is shut down".to_string()));
            }
            Err(_) => {
                self.metrics.record_backpressure();
                tracing::warn!(
                    queue_timeout_ms = self.queue_timeout.as_millis() as u64,
                    "No gateway slot available"
                );
                return Err(LlmError::Backpressure(self.queue_timeout));
            }
        };

        self.wait_for_spacing().await;
        self.inner.generate(system, prompt, params, deadline).await
    }
}
