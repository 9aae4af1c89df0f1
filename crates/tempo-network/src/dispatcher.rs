use std::error::Error as _;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use tempo_core::{ExecutionOutcome, Task, TransportErrorKind};
use tracing::{debug, info, warn};

use crate::error::DispatchError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchResponse {
    pub status_code: u16,
    /// Response body, truncated to the configured snippet length.
    pub body: String,
}

/// Issues a task's configured HTTP call.
#[async_trait]
pub trait Dispatch: Send + Sync + std::fmt::Debug {
    async fn dispatch(&self, task: &Task) -> Result<DispatchResponse, DispatchError>;
}

/// Maps a dispatch result onto what gets recorded in `lastExecution`.
pub fn execution_outcome(result: &Result<DispatchResponse, DispatchError>) -> ExecutionOutcome {
    match result {
        Ok(resp) => ExecutionOutcome::Response {
            status_code: resp.status_code,
            body: resp.body.clone(),
        },
        Err(DispatchError::Application { status_code, body }) => ExecutionOutcome::Response {
            status_code: *status_code,
            body: body.clone(),
        },
        Err(DispatchError::Transport { kind, message }) => ExecutionOutcome::TransportError {
            kind: *kind,
            message: message.clone(),
        },
    }
}

#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Whole-request deadline, connect included.
    pub timeout: Duration,
    pub connect_timeout: Duration,
    /// Characters of the response body kept for the execution record.
    pub snippet_limit: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(5),
            snippet_limit: 1024,
        }
    }
}

/// [`Dispatch`] over a shared reqwest connection pool.
#[derive(Debug, Clone)]
pub struct HttpDispatcher {
    client: reqwest::Client,
    config: DispatchConfig,
}

impl HttpDispatcher {
    pub fn new(config: DispatchConfig) -> reqwest::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("tempo/", env!("CARGO_PKG_VERSION")))
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .build()?;

        info!(
            timeout_ms = config.timeout.as_millis(),
            connect_timeout_ms = config.connect_timeout.as_millis(),
            "http dispatcher initialized"
        );

        Ok(Self { client, config })
    }

    fn build_request(&self, task: &Task) -> Result<reqwest::RequestBuilder, DispatchError> {
        let method = reqwest::Method::from_bytes(task.method.as_str().as_bytes())
            .map_err(|e| DispatchError::transport(TransportErrorKind::Request, e.to_string()))?;

        let mut headers = HeaderMap::with_capacity(task.headers.len());
        for (name, value) in &task.headers {
            let name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| {
                DispatchError::transport(
                    TransportErrorKind::Request,
                    format!("invalid header name `{name}`: {e}"),
                )
            })?;
            let value = HeaderValue::from_str(value).map_err(|e| {
                DispatchError::transport(
                    TransportErrorKind::Request,
                    format!("invalid value for header `{name}`: {e}"),
                )
            })?;
            headers.insert(name, value);
        }

        let body = task.body.as_ref().filter(|_| task.method.allows_body());
        if body.is_some() && !headers.contains_key(CONTENT_TYPE) {
            headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        }

        let mut request = self
            .client
            .request(method, task.endpoint.as_str())
            .headers(headers);
        if let Some(body) = body {
            request = request.body(body.clone());
        }
        Ok(request)
    }

    /// Pulls only as many body bytes as the snippet can use; the rest of a
    /// large response is never buffered.
    async fn read_snippet(&self, mut response: reqwest::Response) -> Result<String, DispatchError> {
        // a char is at most four bytes
        let budget = self.config.snippet_limit.saturating_mul(4);
        let mut buf = Vec::with_capacity(budget.min(16 * 1024));
        while buf.len() < budget {
            let Some(chunk) = response.chunk().await.map_err(transport_error)? else {
                break;
            };
            let take = chunk.len().min(budget - buf.len());
            buf.extend_from_slice(&chunk[..take]);
        }
        Ok(self.snippet(String::from_utf8_lossy(&buf).into_owned()))
    }

    fn snippet(&self, mut body: String) -> String {
        if let Some((cut, _)) = body.char_indices().nth(self.config.snippet_limit) {
            body.truncate(cut);
        }
        body
    }
}

#[async_trait]
impl Dispatch for HttpDispatcher {
    async fn dispatch(&self, task: &Task) -> Result<DispatchResponse, DispatchError> {
        debug!(
            task_id = %task.id,
            method = %task.method,
            endpoint = %task.endpoint,
            "dispatching task"
        );

        let request = self.build_request(task)?;
        let response = request.send().await.map_err(transport_error)?;
        let status_code = response.status().as_u16();
        let is_success = response.status().is_success();
        let body = self.read_snippet(response).await?;

        if is_success {
            debug!(task_id = %task.id, status_code, "dispatch succeeded");
            Ok(DispatchResponse { status_code, body })
        } else {
            warn!(task_id = %task.id, status_code, "endpoint answered with non-success status");
            Err(DispatchError::Application { status_code, body })
        }
    }
}

fn transport_error(err: reqwest::Error) -> DispatchError {
    let kind = if err.is_timeout() {
        TransportErrorKind::Timeout
    } else if err.is_connect() {
        TransportErrorKind::Connect
    } else {
        TransportErrorKind::Request
    };

    // reqwest's top-level message hides the cause (refused, dns, ...)
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }

    DispatchError::Transport { kind, message }
}
