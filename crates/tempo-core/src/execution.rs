use std::fmt::Display;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TransportErrorKind {
    Timeout,
    Connect,
    /// The request could not be built or sent.
    Request,
    /// The task sat in `running` past the stale deadline with no recorded result.
    Abandoned,
}

impl TransportErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportErrorKind::Timeout => "timeout",
            TransportErrorKind::Connect => "connect",
            TransportErrorKind::Request => "request",
            TransportErrorKind::Abandoned => "abandoned",
        }
    }

    pub fn is_retryable(&self) -> bool {
        !matches!(self, TransportErrorKind::Request)
    }
}

impl Display for TransportErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ExecutionOutcome {
    /// The endpoint answered, whatever the status code.
    Response { status_code: u16, body: String },

    /// No response was received. Never carries a status code.
    TransportError {
        kind: TransportErrorKind,
        message: String,
    },
}

/// Result of one dispatch, as kept on the task and in its log.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExecutionRecord {
    pub executed_at: DateTime<Utc>,
    pub duration_ms: u64,
    #[serde(flatten)]
    pub outcome: ExecutionOutcome,
}

impl ExecutionRecord {
    pub fn status_code(&self) -> Option<u16> {
        match &self.outcome {
            ExecutionOutcome::Response { status_code, .. } => Some(*status_code),
            ExecutionOutcome::TransportError { .. } => None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status_code()
            .is_some_and(|code| (200..300).contains(&code))
    }
}

/// Execution log row.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExecutionLog {
    pub id: crate::LogId,
    pub task_id: crate::TaskId,
    pub record: ExecutionRecord,
}
