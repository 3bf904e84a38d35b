//! Recording interface over the raw Prometheus statics.
//!
//! Every method is a no-op until [`init_metrics`](super::init_metrics) has
//! run, so library users who never scrape pay nothing but an atomic load.

use std::time::Duration;

use super::prometheus::{
    ATTEMPTS_TOTAL, GATEWAY_BACKPRESSURE_TOTAL, GATEWAY_LATENCY, OUTCOMES_TOTAL,
    SOFT_REPAIRS_TOTAL,
};
use crate::task::TaskKind;
use crate::validation::SoftRepairKind;

/// Outcome label for a single model attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    Success,
    Transport,
    Decode,
    HardValidation,
}

impl AttemptOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttemptOutcome::Success => "success",
            AttemptOutcome::Transport => "transport",
            AttemptOutcome::Decode => "decode",
            AttemptOutcome::HardValidation => "hard_validation",
        }
    }
}

/// Records pipeline metrics with consistent labels.
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsCollector;

impl MetricsCollector {
    pub fn new() -> Self {
        Self
    }

    pub fn record_attempt(&self, kind: TaskKind, outcome: AttemptOutcome) {
        if let Some(attempts) = ATTEMPTS_TOTAL.get() {
            attempts
                .with_label_values(&[kind.as_str(), outcome.as_str()])
                .inc();
        }
        tracing::trace!(kind = %kind, outcome = outcome.as_str(), "Recorded attempt metric");
    }

    pub fn record_soft_repair(&self, kind: TaskKind, repair: SoftRepairKind) {
        if let Some(repairs) = SOFT_REPAIRS_TOTAL.get() {
            repairs
                .with_label_values(&[kind.as_str(), repair.as_str()])
                .inc();
        }
    }

    /// `outcome` is the terminal label: `succeeded`, `exhausted`, `aborted` or `transport`.
    pub fn record_outcome(&self, kind: TaskKind, outcome: &str) {
        if let Some(outcomes) = OUTCOMES_TOTAL.get() {
            outcomes.with_label_values(&[kind.as_str(), outcome]).inc();
        }
        tracing::trace!(kind = %kind, outcome = outcome, "Recorded outcome metric");
    }

    pub fn record_gateway_call(&self, model: &str, latency: Duration) {
        if let Some(latency_histogram) = GATEWAY_LATENCY.get() {
            latency_histogram
                .with_label_values(&[model])
                .observe(latency.as_secs_f64());
        }
    }

    pub fn record_backpressure(&self) {
        if let Some(rejections) = GATEWAY_BACKPRESSURE_TOTAL.get() {
            rejections.inc();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::{export_metrics, init_metrics};

    #[test]
    fn test_recording_shows_up_in_export() {
        let _ = init_metrics();
        let collector = MetricsCollector::new();

        collector.record_attempt(TaskKind::SpokenAssessment, AttemptOutcome::Decode);
        collector.record_soft_repair(
            TaskKind::BulkQuestionGeneration,
            SoftRepairKind::CaseMismatch,
        );
        collector.record_outcome(TaskKind::WrittenAssessment, "succeeded");
        collector.record_gateway_call("test-model", Duration::from_millis(1500));
        collector.record_backpressure();

        let exported = export_metrics();
        assert!(exported.contains("outcome=\"decode\""));
        assert!(exported.contains("repair=\"case_mismatch\""));
        assert!(exported.contains("content_forge_gateway_latency_seconds"));
        assert!(exported.contains("content_forge_gateway_backpressure_total"));
    }

    #[test]
    fn test_attempt_outcome_labels() {
        assert_eq!(AttemptOutcome::HardValidation.as_str(), "hard_validation");
        assert_eq!(AttemptOutcome::Transport.as_str(), "transport");
    }
}
