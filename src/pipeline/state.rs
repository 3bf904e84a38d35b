//! Per-request state machine.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::LlmError;
use crate::llm::SamplingParams;
use crate::validation::SoftRepair;

/// Where a request is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Building,
    Generating,
    Repairing,
    Validating,
    Retrying,
    Succeeded,
    Exhausted,
    Aborted,
}

impl PipelineState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineState::Building => "building",
            PipelineState::Generating => "generating",
            PipelineState::Repairing => "repairing",
            PipelineState::Validating => "validating",
            PipelineState::Retrying => "retrying",
            PipelineState::Succeeded => "succeeded",
            PipelineState::Exhausted => "exhausted",
            PipelineState::Aborted => "aborted",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PipelineState::Succeeded | PipelineState::Exhausted | PipelineState::Aborted
        )
    }

    /// Whether the controller may move from `self` to `next`.
    ///
    /// A transport error skips repair and validation, so `Generating` may go
    /// straight to `Retrying` or `Exhausted`. Any non-terminal state may abort.
    pub fn can_transition_to(&self, next: PipelineState) -> bool {
        use PipelineState::*;
        match (self, next) {
            (s, Aborted) => !s.is_terminal(),
            (Building, Generating) => true,
            (Generating, Repairing | Retrying | Exhausted) => true,
            (Repairing, Validating) => true,
            (Validating, Succeeded | Retrying | Exhausted) => true,
            (Retrying, Generating) => true,
            _ => false,
        }
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Mutable bookkeeping for one request. Owned by the controller loop.
#[derive(Debug, Clone)]
pub struct AttemptState {
    pub state: PipelineState,
    /// Retries performed so far; the attempt number is `retry_count + 1`.
    pub retry_count: u32,
    pub params: SamplingParams,
    /// Reasons from the most recent failed attempt.
    pub last_reasons: Vec<String>,
    /// Every failure reason, prefixed with its attempt number.
    pub all_reasons: Vec<String>,
    pub last_raw_reply: Option<String>,
    pub last_transport: Option<LlmError>,
    pub soft_repairs: Vec<SoftRepair>,
}

impl AttemptState {
    pub fn new(params: SamplingParams) -> Self {
        Self {
            state: PipelineState::Building,
            retry_count: 0,
            params,
            last_reasons: Vec::new(),
            all_reasons: Vec::new(),
            last_raw_reply: None,
            last_transport: None,
            soft_repairs: Vec::new(),
        }
    }

    pub fn attempt(&self) -> u32 {
        self.retry_count + 1
    }

    /// Move to `next`, returning the previous state.
    ///
    /// Illegal transitions are a controller bug; they are logged and applied
    /// anyway so the request still reaches a terminal state.
    pub fn enter(&mut self, next: PipelineState) -> PipelineState {
        let previous = self.state;
        if !previous.can_transition_to(next) {
            tracing::error!(from = %previous, to = %next, "Illegal pipeline transition");
        }
        self.state = next;
        previous
    }

    pub fn record_failure(&mut self, reasons: Vec<String>) {
        let attempt = self.attempt();
        self.all_reasons
            .extend(reasons.iter().map(|r| format!("attempt {}: {}", attempt, r)));
        self.last_reasons = reasons;
    }

    pub fn record_transport(&mut self, error: LlmError) {
        self.record_failure(vec![format!("transport: {}", error)]);
        self.last_transport = Some(error);
    }
}

/// Time source for backoff waits.
#[async_trait]
pub trait Clock: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Real time via `tokio::time::sleep`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioClock;

#[async_trait]
impl Clock for TokioClock {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path_transitions() {
        use PipelineState::*;
        let path = [Building, Generating, Repairing, Validating, Succeeded];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{} -> {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn test_terminal_states_are_final() {
        use PipelineState::*;
        for terminal in [Succeeded, Exhausted, Aborted] {
            assert!(terminal.is_terminal());
            assert!(!terminal.can_transition_to(Generating));
            assert!(!terminal.can_transition_to(Aborted));
        }
        assert!(!Exhausted.can_transition_to(Succeeded));
    }

    #[test]
    fn test_retry_loops_back_without_rebuilding() {
        use PipelineState::*;
        assert!(Validating.can_transition_to(Retrying));
        assert!(Generating.can_transition_to(Retrying));
        assert!(Retrying.can_transition_to(Generating));
        assert!(!Retrying.can_transition_to(Building));
    }

    #[test]
    fn test_failure_bookkeeping() {
        let mut attempt = AttemptState::new(SamplingParams::new(0.7, 100));
        attempt.record_failure(vec!["count mismatch: expected 15 items, got 14".into()]);
        attempt.retry_count += 1;
        attempt.record_transport(LlmError::EmptyReply);

        assert_eq!(attempt.attempt(), 2);
        assert_eq!(attempt.last_reasons, vec!["transport: Model returned an empty reply"]);
        assert_eq!(attempt.all_reasons.len(), 2);
        assert!(attempt.all_reasons[0].starts_with("attempt 1: count mismatch"));
        assert!(matches!(attempt.last_transport, Some(LlmError::EmptyReply)));
    }
}
