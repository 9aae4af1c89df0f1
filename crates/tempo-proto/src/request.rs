use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tempo_core::Recurrence;

/// Body of `POST /tasks`.
///
/// Kept loosely typed (`type`, `method` and `startTime` are plain strings) so
/// bad values come back as validation errors naming the field instead of a
/// generic parse failure.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CreateTaskRequest {
    #[serde(rename = "type")]
    pub kind: String,
    pub http_endpoint: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    /// Any JSON value; sent verbatim as the outbound request body.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<serde_json::Value>,
    pub user_id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval_seconds: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recurrence: Option<Recurrence>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cron_expression: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_condition: Option<StopCondition>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StopCondition {
    /// Total executions after which a recurring task completes.
    #[serde(default)]
    pub max_cnt: Option<u32>,
}

/// Query of `GET /users/{userId}/tasks`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ListTasksParams {
    pub status: Option<String>,
    /// 1-based.
    pub page: Option<u32>,
    pub size: Option<u32>,
}

/// Query of `GET /tasks/{id}/logs`.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct LogsParams {
    pub limit: Option<usize>,
}
