use axum::http::{HeaderName, HeaderValue};
use chrono::{DateTime, Utc};
use tempo_core::{HttpMethod, Recurrence, Task, TaskKind, TimeError, parse_instant};
use tempo_proto::CreateTaskRequest;
use url::Url;

use crate::error::{ApiError, Result};

/// Turns a create request into a pending task. Nothing here touches the store.
pub fn build_task(req: CreateTaskRequest, now: DateTime<Utc>) -> Result<Task> {
    if req.cron_expression.is_some() {
        return Err(unsupported_cron());
    }

    let kind = parse_kind(&req.kind)?;
    let endpoint = parse_endpoint(&req.http_endpoint)?;
    let method = match req.method.as_deref() {
        Some(method) => method
            .parse::<HttpMethod>()
            .map_err(|e| ApiError::Validation(format!("method: {e}")))?,
        None => HttpMethod::Get,
    };
    check_headers(&req)?;

    let start_time = req
        .start_time
        .as_deref()
        .map(parse_instant)
        .transpose()
        .map_err(start_time_error)?;

    let mut builder = match kind {
        TaskKind::Once => {
            if req.interval_seconds.is_some() || req.recurrence.is_some() {
                return Err(ApiError::Validation(
                    "only recurring tasks take intervalSeconds or recurrence".into(),
                ));
            }
            let start_time = start_time.ok_or_else(|| {
                ApiError::Validation("startTime is required for once tasks".into())
            })?;
            Task::builder(endpoint, start_time)
        }
        TaskKind::Recurring => {
            let rule = recurrence(&req)?;
            let first_run = match (start_time, &rule) {
                (Some(at), _) => at,
                (None, Recurrence::Interval { .. }) => now,
                (None, rule) => rule
                    .next_after(now, now)
                    .map_err(|e| ApiError::Validation(e.to_string()))?,
            };

            let mut builder = Task::builder(endpoint, first_run).recurrence(rule);
            if let Some(max) = req.stop_condition.and_then(|s| s.max_cnt) {
                if max == 0 {
                    return Err(ApiError::Validation(
                        "stopCondition.maxCnt must be at least 1".into(),
                    ));
                }
                builder = builder.max_runs(max);
            }
            builder
        }
    };

    builder = builder
        .user_id(req.user_id)
        .method(method)
        .headers(req.headers);

    match req.body {
        None | Some(serde_json::Value::Null) => {}
        Some(body) => builder = builder.body(body.to_string()),
    }

    Ok(builder.build(now))
}

fn parse_kind(kind: &str) -> Result<TaskKind> {
    match kind {
        "once" => Ok(TaskKind::Once),
        // `interval` is the older name for a fixed-cadence recurring task
        "recurring" | "interval" => Ok(TaskKind::Recurring),
        "cron" => Err(unsupported_cron()),
        other => Err(ApiError::Validation(format!(
            "type must be `once` or `recurring`, got `{other}`"
        ))),
    }
}

fn parse_endpoint(raw: &str) -> Result<String> {
    let url = Url::parse(raw.trim())
        .map_err(|e| ApiError::Validation(format!("httpEndpoint `{raw}` is not a valid URL: {e}")))?;

    match url.scheme() {
        "http" | "https" if url.has_host() => Ok(url.into()),
        _ => Err(ApiError::Validation(format!(
            "httpEndpoint `{raw}` must be an absolute http(s) URL"
        ))),
    }
}

fn check_headers(req: &CreateTaskRequest) -> Result<()> {
    for (name, value) in &req.headers {
        HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| ApiError::Validation(format!("invalid header name `{name}`")))?;
        HeaderValue::from_str(value)
            .map_err(|_| ApiError::Validation(format!("invalid value for header `{name}`")))?;
    }
    Ok(())
}

fn recurrence(req: &CreateTaskRequest) -> Result<Recurrence> {
    let rule = match (req.interval_seconds, &req.recurrence) {
        (Some(_), Some(_)) => {
            return Err(ApiError::Validation(
                "send either intervalSeconds or recurrence, not both".into(),
            ));
        }
        (Some(secs), None) => Recurrence::every_secs(secs),
        (None, Some(rule)) => rule.clone(),
        (None, None) => {
            return Err(ApiError::Validation(
                "recurring tasks need intervalSeconds or recurrence".into(),
            ));
        }
    };

    rule.validate()
        .map_err(|e| ApiError::Validation(e.to_string()))?;
    Ok(rule)
}

fn start_time_error(err: TimeError) -> ApiError {
    ApiError::Validation(format!("startTime: {err}"))
}

fn unsupported_cron() -> ApiError {
    ApiError::Validation("cron expressions are not supported; use intervalSeconds or recurrence".into())
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone};
    use serde_json::json;
    use tempo_core::TaskStatus;

    use super::*;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 4, 22, 9, 59, 0).unwrap()
    }

    fn request(value: serde_json::Value) -> CreateTaskRequest {
        serde_json::from_value(value).unwrap()
    }

    fn rejected(value: serde_json::Value) -> String {
        match build_task(request(value), now()) {
            Err(ApiError::Validation(message)) => message,
            other => panic!("expected a validation error, got {other:?}"),
        }
    }

    #[test]
    fn once_task_normalizes_start_time() {
        let task = build_task(
            request(json!({
                "type": "once",
                "httpEndpoint": "http://echo.test/ok",
                "method": "get",
                "userId": 1001,
                "startTime": "2025-04-22T18:00:00+08:00"
            })),
            now(),
        )
        .unwrap();

        let expected = Utc.with_ymd_and_hms(2025, 4, 22, 10, 0, 0).unwrap();
        assert_eq!(task.kind, TaskKind::Once);
        assert_eq!(task.method, HttpMethod::Get);
        assert_eq!(task.next_run_time, expected);
        assert_eq!(task.status, TaskStatus::Pending);
    }

    #[test]
    fn body_is_serialized_verbatim() {
        let task = build_task(
            request(json!({
                "type": "once",
                "httpEndpoint": "https://api.example.com/execute",
                "method": "POST",
                "userId": 1,
                "body": {"data": "example"},
                "startTime": "2025-04-22T10:00:00Z"
            })),
            now(),
        )
        .unwrap();

        assert_eq!(task.body.as_deref(), Some(r#"{"data":"example"}"#));
    }

    #[test]
    fn local_start_time_is_rejected() {
        for start in ["2025-04-22T10:00:00", "2025-04-22 10:00:00"] {
            let message = rejected(json!({
                "type": "once",
                "httpEndpoint": "http://echo.test/ok",
                "userId": 1,
                "startTime": start
            }));
            assert!(message.contains("timezone"), "{message}");
        }
    }

    #[test]
    fn endpoint_must_be_absolute_http() {
        for endpoint in ["not a url", "/relative/path", "ftp://files.test/x", "mailto:a@b.c"] {
            rejected(json!({
                "type": "once",
                "httpEndpoint": endpoint,
                "userId": 1,
                "startTime": "2025-04-22T10:00:00Z"
            }));
        }
    }

    #[test]
    fn unsupported_method_and_type() {
        let message = rejected(json!({
            "type": "once",
            "httpEndpoint": "http://echo.test/ok",
            "method": "TRACE",
            "userId": 1,
            "startTime": "2025-04-22T10:00:00Z"
        }));
        assert!(message.starts_with("method"));

        let message = rejected(json!({
            "type": "sometimes",
            "httpEndpoint": "http://echo.test/ok",
            "userId": 1
        }));
        assert!(message.contains("sometimes"));
    }

    #[test]
    fn cron_is_rejected() {
        rejected(json!({
            "type": "cron",
            "httpEndpoint": "http://echo.test/ok",
            "userId": 1,
            "cronExpression": "0 0 12 * * ?"
        }));
    }

    #[test]
    fn once_requires_start_time() {
        let message = rejected(json!({
            "type": "once",
            "httpEndpoint": "http://echo.test/ok",
            "userId": 1
        }));
        assert!(message.contains("startTime"));
    }

    #[test]
    fn recurring_interval_defaults_to_now() {
        let task = build_task(
            request(json!({
                "type": "interval",
                "httpEndpoint": "http://echo.test/ok",
                "userId": 1,
                "intervalSeconds": 20,
                "stopCondition": {"maxCnt": 300}
            })),
            now(),
        )
        .unwrap();

        assert_eq!(task.kind, TaskKind::Recurring);
        assert_eq!(task.recurrence, Some(Recurrence::every_secs(20)));
        assert_eq!(task.next_run_time, now());
        assert_eq!(task.max_runs, Some(300));
    }

    #[test]
    fn daily_rule_starts_at_next_occurrence() {
        let task = build_task(
            request(json!({
                "type": "recurring",
                "httpEndpoint": "http://echo.test/ok",
                "userId": 1,
                "recurrence": {"kind": "daily", "hour": 9, "minute": 0}
            })),
            now(),
        )
        .unwrap();

        let tomorrow_nine = Utc.with_ymd_and_hms(2025, 4, 22, 9, 0, 0).unwrap() + Duration::days(1);
        assert_eq!(task.next_run_time, tomorrow_nine);
    }

    #[test]
    fn recurring_needs_exactly_one_rule() {
        rejected(json!({
            "type": "recurring",
            "httpEndpoint": "http://echo.test/ok",
            "userId": 1
        }));
        rejected(json!({
            "type": "recurring",
            "httpEndpoint": "http://echo.test/ok",
            "userId": 1,
            "intervalSeconds": 5,
            "recurrence": {"kind": "interval", "everySecs": 5}
        }));
        rejected(json!({
            "type": "recurring",
            "httpEndpoint": "http://echo.test/ok",
            "userId": 1,
            "intervalSeconds": 0
        }));
    }

    #[test]
    fn bad_header_is_rejected() {
        let message = rejected(json!({
            "type": "once",
            "httpEndpoint": "http://echo.test/ok",
            "userId": 1,
            "headers": {"bad header": "x"},
            "startTime": "2025-04-22T10:00:00Z"
        }));
        assert!(message.contains("bad header"));
    }
}
