//! The retry controller: one explicit state machine per request.
//!
//! ```text
//! Building -> Generating -> Repairing -> Validating -> Succeeded
//!                 ^   |                      |
//!                 |   +--(transport)--+      |
//!                 |                   v      v
//!                 +------------- Retrying   Exhausted
//! ```
//!
//! The prompt is built once. A retry changes only the sampling parameters
//! (escalated repetition penalties) and waits `retry_count * base_backoff`
//! on the injected [`Clock`]. Every suspension point races the caller's
//! [`CancellationToken`]; dropping the losing model-call future cancels the
//! in-flight request.

use std::sync::Arc;
use std::time::Instant;

use futures::stream::{self, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::config::PipelineConfig;
use super::events::{emit, PipelineEvent};
use super::outcome::{PipelineOutcome, PracticeSet, ValidatedResult};
use super::state::{AttemptState, Clock, PipelineState, TokioClock};
use crate::difficulty::DifficultyEnforcer;
use crate::error::{AbortReason, LlmError, PipelineFailure};
use crate::llm::ModelGateway;
use crate::metrics::{AttemptOutcome, MetricsCollector};
use crate::prompts::{PromptBuilder, SchemaSpec};
use crate::repair::{LenientRepairer, ResponseRepairer};
use crate::rubric::RubricTable;
use crate::scoring::ScoreNormalizer;
use crate::task::{TaskPayload, TaskSpec};
use crate::validation::{
    FailureClass, SchemaValidator, SoftRepair, Validated, ValidatedPayload, ValidationFailure,
};

/// Drives gateway, repairer and validator for each request.
pub struct RetryController {
    gateway: Arc<dyn ModelGateway>,
    repairer: Arc<dyn ResponseRepairer>,
    rubrics: Arc<RubricTable>,
    clock: Arc<dyn Clock>,
    config: PipelineConfig,
    events: Option<mpsc::Sender<PipelineEvent>>,
    metrics: MetricsCollector,
}

impl RetryController {
    /// Controller with the lenient repairer, built-in rubrics and real time.
    pub fn new(gateway: Arc<dyn ModelGateway>, config: PipelineConfig) -> Self {
        Self {
            gateway,
            repairer: Arc::new(LenientRepairer),
            rubrics: Arc::new(RubricTable::new()),
            clock: Arc::new(TokioClock),
            config,
            events: None,
            metrics: MetricsCollector::new(),
        }
    }

    pub fn with_repairer(mut self, repairer: Arc<dyn ResponseRepairer>) -> Self {
        self.repairer = repairer;
        self
    }

    pub fn with_rubrics(mut self, rubrics: Arc<RubricTable>) -> Self {
        self.rubrics = rubrics;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_events(mut self, events: mpsc::Sender<PipelineEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run one request to completion.
    pub async fn submit(&self, spec: &TaskSpec) -> Result<PipelineOutcome, PipelineFailure> {
        self.submit_with_cancel(spec, CancellationToken::new()).await
    }

    /// Run one request, aborting when `cancel` fires.
    pub async fn submit_with_cancel(
        &self,
        spec: &TaskSpec,
        cancel: CancellationToken,
    ) -> Result<PipelineOutcome, PipelineFailure> {
        let started = Instant::now();
        let kind = spec.kind();

        let result = match self.config.request_timeout {
            Some(limit) => {
                match tokio::time::timeout(limit, self.run(spec, &cancel, started)).await {
                    Ok(result) => result,
                    Err(_) => {
                        tracing::warn!(
                            task_id = %spec.id,
                            limit_ms = limit.as_millis() as u64,
                            "Request deadline exceeded"
                        );
                        emit(
                            self.events.as_ref(),
                            PipelineEvent::aborted(&spec.id, AbortReason::DeadlineExceeded),
                        );
                        Err(PipelineFailure::Aborted {
                            reason: AbortReason::DeadlineExceeded,
                        })
                    }
                }
            }
            None => self.run(spec, &cancel, started).await,
        };

        let label = match &result {
            Ok(_) => "succeeded",
            Err(failure) => failure.label(),
        };
        self.metrics.record_outcome(kind, label);

        result
    }

    /// Run independent requests with at most `concurrency` in flight.
    /// Results keep the order of `specs`.
    pub async fn submit_all(
        &self,
        specs: &[TaskSpec],
        concurrency: usize,
    ) -> Vec<Result<PipelineOutcome, PipelineFailure>> {
        self.submit_all_with_cancel(specs, concurrency, CancellationToken::new())
            .await
    }

    /// Like [`submit_all`](Self::submit_all); `cancel` aborts every request
    /// still running or queued.
    pub async fn submit_all_with_cancel(
        &self,
        specs: &[TaskSpec],
        concurrency: usize,
        cancel: CancellationToken,
    ) -> Vec<Result<PipelineOutcome, PipelineFailure>> {
        stream::iter(specs)
            .map(|spec| self.submit_with_cancel(spec, cancel.clone()))
            .buffered(concurrency.max(1))
            .collect()
            .await
    }

    async fn run(
        &self,
        spec: &TaskSpec,
        cancel: &CancellationToken,
        started: Instant,
    ) -> Result<PipelineOutcome, PipelineFailure> {
        let task_id = spec.id.as_str();
        let kind = spec.kind();
        let mut attempt = AttemptState::new(self.config.base_params(kind));

        emit(
            self.events.as_ref(),
            PipelineEvent::state_entered(task_id, PipelineState::Building, attempt.attempt()),
        );
        let prompt = PromptBuilder::new(&self.rubrics).build(spec);

        tracing::info!(
            task_id = %task_id,
            kind = %kind,
            max_retries = self.config.max_retries,
            "Submitting request"
        );

        loop {
            if cancel.is_cancelled() {
                return Err(self.abort(&mut attempt, task_id, AbortReason::Cancelled));
            }

            self.enter(&mut attempt, task_id, PipelineState::Generating);
            let deadline = self.config.attempt_timeout;
            let params = attempt.params;
            let call = self
                .gateway
                .generate(&prompt.system, &prompt.instruction, &params, deadline);

            let reply = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return Err(self.abort(&mut attempt, task_id, AbortReason::Cancelled));
                }
                reply = tokio::time::timeout(deadline, call) => {
                    reply.unwrap_or(Err(LlmError::Timeout(deadline)))
                }
            };

            match reply {
                Err(error) => {
                    self.metrics.record_attempt(kind, AttemptOutcome::Transport);
                    let retryable = error.is_retryable();
                    tracing::warn!(
                        task_id = %task_id,
                        attempt = attempt.attempt(),
                        error = %error,
                        retryable,
                        "Model call failed"
                    );
                    attempt.record_transport(error.clone());
                    emit(
                        self.events.as_ref(),
                        PipelineEvent::attempt_failed(
                            task_id,
                            attempt.attempt(),
                            None,
                            attempt.last_reasons.clone(),
                        ),
                    );
                    if !retryable {
                        self.enter(&mut attempt, task_id, PipelineState::Exhausted);
                        return Err(PipelineFailure::Transport { cause: error });
                    }
                }
                Ok(raw) => {
                    self.enter(&mut attempt, task_id, PipelineState::Repairing);
                    let candidate = self.repairer.repair(&raw);
                    attempt.last_raw_reply = Some(raw);

                    self.enter(&mut attempt, task_id, PipelineState::Validating);
                    let checked = SchemaValidator::validate(&candidate, &prompt.shape)
                        .and_then(|validated| self.finalize(spec, &prompt.shape, validated));

                    match checked {
                        Ok((result, soft_repairs)) => {
                            self.metrics.record_attempt(kind, AttemptOutcome::Success);
                            return Ok(self.succeed(spec, attempt, result, soft_repairs, started));
                        }
                        Err(failure) => {
                            let outcome = match failure.class {
                                FailureClass::Decode => AttemptOutcome::Decode,
                                FailureClass::HardValidation => AttemptOutcome::HardValidation,
                            };
                            self.metrics.record_attempt(kind, outcome);
                            tracing::warn!(
                                task_id = %task_id,
                                attempt = attempt.attempt(),
                                class = %failure.class,
                                reason = %failure.reasons.join("; "),
                                "Reply rejected"
                            );
                            emit(
                                self.events.as_ref(),
                                PipelineEvent::attempt_failed(
                                    task_id,
                                    attempt.attempt(),
                                    Some(failure.class),
                                    failure.reasons.clone(),
                                ),
                            );
                            attempt.record_failure(failure.reasons);
                        }
                    }
                }
            }

            if attempt.retry_count + 1 >= self.config.max_retries {
                return Err(self.exhaust(&mut attempt, task_id));
            }

            self.enter(&mut attempt, task_id, PipelineState::Retrying);
            attempt.retry_count += 1;
            let penalty = self.config.escalation.penalty_for(attempt.retry_count);
            attempt.params = attempt.params.with_penalty(penalty);
            let backoff = self.config.base_backoff * attempt.retry_count;

            tracing::info!(
                task_id = %task_id,
                retry_count = attempt.retry_count,
                backoff_ms = backoff.as_millis() as u64,
                penalty = penalty,
                "Retrying with escalated penalties"
            );
            emit(
                self.events.as_ref(),
                PipelineEvent::retry_scheduled(task_id, attempt.retry_count, backoff, penalty),
            );

            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return Err(self.abort(&mut attempt, task_id, AbortReason::Cancelled));
                }
                _ = self.clock.sleep(backoff) => {}
            }
        }
    }

    /// Turn a validated payload into the final result.
    ///
    /// Payload, shape and spec always agree when the prompt came from
    /// [`PromptBuilder`]; a mismatch is rejected like any other bad reply.
    fn finalize(
        &self,
        spec: &TaskSpec,
        shape: &SchemaSpec,
        validated: Validated,
    ) -> Result<(ValidatedResult, Vec<SoftRepair>), ValidationFailure> {
        let Validated {
            payload,
            mut soft_repairs,
        } = validated;

        match (shape, payload, &spec.payload) {
            (SchemaSpec::Assessment { rubric }, ValidatedPayload::Assessment(parsed), _) => {
                let result = ScoreNormalizer::normalize(&parsed, rubric);
                Ok((ValidatedResult::Assessment(result), soft_repairs))
            }
            (
                SchemaSpec::QuestionSet { .. },
                ValidatedPayload::QuestionSet(items),
                TaskPayload::BulkQuestionGeneration { topic, .. },
            ) => {
                let (items, overrides) =
                    DifficultyEnforcer::enforce_with_report(items, &self.config.position_rule);
                soft_repairs.extend(overrides);
                Ok((
                    ValidatedResult::QuestionSet(PracticeSet::new(topic, items)),
                    soft_repairs,
                ))
            }
            _ => Err(ValidationFailure::hard(vec![
                "payload does not match the requested task kind".to_string(),
            ])),
        }
    }

    fn succeed(
        &self,
        spec: &TaskSpec,
        mut attempt: AttemptState,
        result: ValidatedResult,
        soft_repairs: Vec<SoftRepair>,
        started: Instant,
    ) -> PipelineOutcome {
        let task_id = spec.id.as_str();
        let kind = spec.kind();

        for repair in &soft_repairs {
            self.metrics.record_soft_repair(kind, repair.kind);
            tracing::warn!(
                task_id = %task_id,
                attempt = attempt.attempt(),
                repair = %repair.kind,
                location = %repair.location,
                detail = %repair.detail,
                "Soft repair applied"
            );
            emit(
                self.events.as_ref(),
                PipelineEvent::soft_repair(task_id, attempt.attempt(), repair.clone()),
            );
        }
        attempt.soft_repairs = soft_repairs;

        self.enter(&mut attempt, task_id, PipelineState::Succeeded);
        emit(
            self.events.as_ref(),
            PipelineEvent::succeeded(task_id, attempt.attempt()),
        );

        let processing_time_ms = started.elapsed().as_millis() as u64;
        tracing::info!(
            task_id = %task_id,
            attempts = attempt.attempt(),
            soft_repairs = attempt.soft_repairs.len(),
            processing_time_ms,
            "Request succeeded"
        );

        PipelineOutcome {
            task_id: spec.id.clone(),
            result,
            attempts: attempt.attempt(),
            soft_repairs: attempt.soft_repairs,
            final_params: attempt.params,
            processing_time_ms,
        }
    }

    fn exhaust(&self, attempt: &mut AttemptState, task_id: &str) -> PipelineFailure {
        self.enter(attempt, task_id, PipelineState::Exhausted);
        let attempts = attempt.attempt();
        emit(self.events.as_ref(), PipelineEvent::exhausted(task_id, attempts));

        tracing::warn!(
            task_id = %task_id,
            attempts,
            reasons = %attempt.all_reasons.join(" | "),
            "Retries exhausted"
        );

        match (attempt.last_raw_reply.take(), attempt.last_transport.take()) {
            (None, Some(cause)) => PipelineFailure::Transport { cause },
            (last_raw_reply, _) => PipelineFailure::Exhausted {
                last_reasons: std::mem::take(&mut attempt.last_reasons),
                last_raw_reply,
                attempts,
            },
        }
    }

    fn abort(&self, attempt: &mut AttemptState, task_id: &str, reason: AbortReason) -> PipelineFailure {
        self.enter(attempt, task_id, PipelineState::Aborted);
        tracing::info!(task_id = %task_id, attempt = attempt.attempt(), reason = %reason, "Request aborted");
        emit(self.events.as_ref(), PipelineEvent::aborted(task_id, reason));
        PipelineFailure::Aborted { reason }
    }

    fn enter(&self, attempt: &mut AttemptState, task_id: &str, next: PipelineState) {
        let previous = attempt.enter(next);
        tracing::debug!(
            task_id = %task_id,
            attempt = attempt.attempt(),
            from = %previous,
            to = %next,
            "State transition"
        );
        emit(
            self.events.as_ref(),
            PipelineEvent::state_entered(task_id, next, attempt.attempt()),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::SamplingParams;
    use crate::task::{AssessmentMaterial, Language, SpeakingSection, Tier};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;

    struct ScriptedGateway {
        replies: Mutex<VecDeque<Result<String, LlmError>>>,
        seen: Mutex<Vec<SamplingParams>>,
    }

    impl ScriptedGateway {
        fn new(replies: Vec<Result<String, LlmError>>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ModelGateway for ScriptedGateway {
        async fn generate(
            &self,
            _system: &str,
            _prompt: &str,
            params: &SamplingParams,
            _deadline: Duration,
        ) -> Result<String, LlmError> {
            self.seen.lock().expect("lock").push(*params);
            self.replies
                .lock()
                .expect("lock")
                .pop_front()
                .unwrap_or(Err(LlmError::EmptyReply))
        }
    }

    struct InstantClock;

    #[async_trait]
    impl Clock for InstantClock {
        async fn sleep(&self, _duration: Duration) {}
    }

    fn roleplay_spec() -> TaskSpec {
        TaskSpec::spoken(
            Language::Es,
            Tier::Foundation,
            SpeakingSection::Roleplay,
            AssessmentMaterial::new("Quiero un café, por favor."),
        )
        .with_id("roleplay-1")
    }

    fn controller(gateway: Arc<ScriptedGateway>) -> RetryController {
        RetryController::new(gateway, PipelineConfig::default()).with_clock(Arc::new(InstantClock))
    }

    #[tokio::test]
    async fn test_first_attempt_success() {
        let gateway = Arc::new(ScriptedGateway::new(vec![Ok(
            "```json\n{'communication_score': 4, 'language_quality_score': 3, 'feedback': 'Bien hecho'}\n```"
                .to_string(),
        )]));
        let outcome = controller(gateway).submit(&roleplay_spec()).await.expect("success");

        assert_eq!(outcome.attempts, 1);
        let result = outcome.result.as_assessment().expect("assessment");
        assert_eq!(result.total_score, 7);
        assert_eq!(result.max_score, 10);
        assert_eq!(result.percentage, 70);
        assert_eq!(outcome.soft_repairs.len(), 1);
    }

    #[tokio::test]
    async fn test_non_retryable_transport_fails_immediately() {
        let gateway = Arc::new(ScriptedGateway::new(vec![
            Err(LlmError::InvalidModel("nope".into())),
            Ok("{}".into()),
        ]));
        let failure = controller(gateway.clone())
            .submit(&roleplay_spec())
            .await
            .unwrap_err();
        assert!(matches!(
            failure,
            PipelineFailure::Transport {
                cause: LlmError::InvalidModel(_)
            }
        ));
        assert_eq!(gateway.seen.lock().expect("lock").len(), 1);
    }

    #[tokio::test]
    async fn test_pre_cancelled_request_never_calls_model() {
        let gateway = Arc::new(ScriptedGateway::new(vec![Ok("{}".into())]));
        let cancel = CancellationToken::new();
        cancel.cancel();
        let failure = controller(gateway.clone())
            .submit_with_cancel(&roleplay_spec(), cancel)
            .await
            .unwrap_err();
        assert!(matches!(
            failure,
            PipelineFailure::Aborted {
                reason: AbortReason::Cancelled
            }
        ));
        assert!(gateway.seen.lock().expect("lock").is_empty());
    }

    #[tokio::test]
    async fn test_penalties_escalate_per_retry() {
        let gateway = Arc::new(ScriptedGateway::new(vec![
            Ok("garbage".into()),
            Ok("still garbage".into()),
            Ok("{\"communication_score\": 5, \"feedback\": \"ok\", \"total_score\": 5}".into()),
        ]));
        let outcome = controller(gateway.clone())
            .submit(&roleplay_spec())
            .await
            .expect("third attempt succeeds");
        assert_eq!(outcome.attempts, 3);

        let seen = gateway.seen.lock().expect("lock");
        let penalties: Vec<f64> = seen.iter().map(|p| p.presence_penalty).collect();
        assert!((penalties[0] - 0.3).abs() < 1e-9);
        assert!((penalties[1] - 0.45).abs() < 1e-9);
        assert!((penalties[2] - 0.6).abs() < 1e-9);
        assert!(seen.iter().all(|p| p.presence_penalty == p.frequency_penalty));
        assert_eq!(outcome.final_params.presence_penalty, penalties[2]);
    }
}
