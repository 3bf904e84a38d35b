//! Optional per-request event stream.
//!
//! Callers that want to observe model drift (soft repairs, retries) pass an
//! `mpsc::Sender<PipelineEvent>` to the controller. Sending never blocks the
//! pipeline: a full or closed channel drops the event.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use super::state::PipelineState;
use crate::error::AbortReason;
use crate::validation::{FailureClass, SoftRepair};

/// Something that happened while processing a request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PipelineEvent {
    StateEntered {
        task_id: String,
        state: PipelineState,
        attempt: u32,
        at: DateTime<Utc>,
    },
    SoftRepairApplied {
        task_id: String,
        attempt: u32,
        repair: SoftRepair,
        at: DateTime<Utc>,
    },
    AttemptFailed {
        task_id: String,
        attempt: u32,
        /// `None` for transport errors.
        class: Option<FailureClass>,
        reasons: Vec<String>,
        at: DateTime<Utc>,
    },
    RetryScheduled {
        task_id: String,
        retry_count: u32,
        backoff_ms: u64,
        penalty: f64,
        at: DateTime<Utc>,
    },
    Succeeded {
        task_id: String,
        attempts: u32,
        at: DateTime<Utc>,
    },
    Exhausted {
        task_id: String,
        attempts: u32,
        at: DateTime<Utc>,
    },
    Aborted {
        task_id: String,
        reason: AbortReason,
        at: DateTime<Utc>,
    },
}

impl PipelineEvent {
    pub fn state_entered(task_id: &str, state: PipelineState, attempt: u32) -> Self {
        Self::StateEntered {
            task_id: task_id.to_string(),
            state,
            attempt,
            at: Utc::now(),
        }
    }

    pub fn soft_repair(task_id: &str, attempt: u32, repair: SoftRepair) -> Self {
        Self::SoftRepairApplied {
            task_id: task_id.to_string(),
            attempt,
            repair,
            at: Utc::now(),
        }
    }

    pub fn attempt_failed(
        task_id: &str,
        attempt: u32,
        class: Option<FailureClass>,
        reasons: Vec<String>,
    ) -> Self {
        Self::AttemptFailed {
            task_id: task_id.to_string(),
            attempt,
            class,
            reasons,
            at: Utc::now(),
        }
    }

    pub fn retry_scheduled(task_id: &str, retry_count: u32, backoff: Duration, penalty: f64) -> Self {
        Self::RetryScheduled {
            task_id: task_id.to_string(),
            retry_count,
            backoff_ms: backoff.as_millis() as u64,
            penalty,
            at: Utc::now(),
        }
    }

    pub fn succeeded(task_id: &str, attempts: u32) -> Self {
        Self::Succeeded {
            task_id: task_id.to_string(),
            attempts,
            at: Utc::now(),
        }
    }

    pub fn exhausted(task_id: &str, attempts: u32) -> Self {
        Self::Exhausted {
            task_id: task_id.to_string(),
            attempts,
            at: Utc::now(),
        }
    }

    pub fn aborted(task_id: &str, reason: AbortReason) -> Self {
        Self::Aborted {
            task_id: task_id.to_string(),
            reason,
            at: Utc::now(),
        }
    }

    pub fn task_id(&self) -> &str {
        match self {
            PipelineEvent::StateEntered { task_id, .. }
            | PipelineEvent::SoftRepairApplied { task_id, .. }
            | PipelineEvent::AttemptFailed { task_id, .. }
            | PipelineEvent::RetryScheduled { task_id, .. }
            | PipelineEvent::Succeeded { task_id, .. }
            | PipelineEvent::Exhausted { task_id, .. }
            | PipelineEvent::Aborted { task_id, .. } => task_id,
        }
    }
}

/// Non-blocking send; the receiver is optional and may be gone.
pub(crate) fn emit(events: Option<&mpsc::Sender<PipelineEvent>>, event: PipelineEvent) {
    if let Some(sender) = events {
        let _ = sender.try_send(event);
    }
}
