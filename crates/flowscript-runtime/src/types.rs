//! Core runtime types.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Step values are arbitrary JSON, supplied and consumed by host handlers.
pub type Value = serde_json::Value;

/// Terminal status of one step invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Success,
    Error,
    Cancelled,
}

/// Outcome of one step invocation.
///
/// Timestamps are offsets from the start of the execution, taken from the
/// tokio clock so paused-clock tests see exact values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    pub status: StepStatus,
    /// Success value, if any.
    pub value: Option<Value>,
    /// Error message, when `status` is `Error`.
    pub error: Option<String>,
    pub started_at: Duration,
    pub ended_at: Duration,
}

impl StepResult {
    pub fn success(value: Value, started_at: Duration, ended_at: Duration) -> Self {
        Self {
            status: StepStatus::Success,
            value: Some(value),
            error: None,
            started_at,
            ended_at,
        }
    }

    pub fn error(message: impl Into<String>, started_at: Duration, ended_at: Duration) -> Self {
        Self {
            status: StepStatus::Error,
            value: None,
            error: Some(message.into()),
            started_at,
            ended_at,
        }
    }

    pub fn cancelled(started_at: Duration, ended_at: Duration) -> Self {
        Self {
            status: StepStatus::Cancelled,
            value: None,
            error: None,
            started_at,
            ended_at,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == StepStatus::Success
    }
}
