use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::models::{ExecutionResult, ExecutionStatus, STATUS_ACCEPTED};

/// Body of `POST {runner}/execute`
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RunnerRequest {
    pub source_code: String,
    pub language_id: serde_json::Value,
    pub stdin: String,
    pub timeout_ms: u64,
}

#[derive(Debug, Deserialize)]
struct RunnerResponse {
    status: ExecutionStatus,
    #[serde(default)]
    stdout: Option<String>,
    #[serde(default)]
    stderr: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    execution_time_ms: Option<i64>,
}

impl From<RunnerResponse> for ExecutionResult {
    fn from(resp: RunnerResponse) -> Self {
        let mut stderr = resp.stderr.unwrap_or_default();
        if stderr.is_empty() && resp.status.id != STATUS_ACCEPTED {
            if let Some(message) = resp.message {
                stderr = message;
            }
        }
        ExecutionResult {
            stdout: resp.stdout.unwrap_or_default(),
            stderr,
            status: resp.status,
        }
    }
}

#[derive(Debug)]
pub enum RunnerError {
    Request(reqwest::Error),
    Status(u16, String),
    Decode(reqwest::Error),
}

impl std::fmt::Display for RunnerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunnerError::Request(e) if e.is_timeout() => write!(f, "runner request timed out: {}", e),
            RunnerError::Request(e) => write!(f, "runner request failed: {}", e),
            RunnerError::Status(code, body) => write!(f, "runner returned {}: {}", code, body),
            RunnerError::Decode(e) => write!(f, "decode response: {}", e),
        }
    }
}

impl std::error::Error for RunnerError {}

/// HTTP client of the sandboxed code execution service.
#[derive(Debug, Clone)]
pub struct RunnerClient {
    client: Client,
    base_url: String,
}

impl RunnerClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, RunnerError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(RunnerError::Request)?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub async fn execute(&self, req: &RunnerRequest) -> Result<ExecutionResult, RunnerError> {
        let url = format!("{}/execute", self.base_url);
        let resp = self.client.post(&url)
            .json(req)
            .send().await
            .map_err(RunnerError::Request)?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(RunnerError::Status(status.as_u16(), body));
        }

        let body: RunnerResponse = resp.json().await.map_err(RunnerError::Decode)?;
        debug!(
            "Runner finished language={} status={} duration={}ms",
            req.language_id,
            body.status.id,
            body.execution_time_ms.unwrap_or_default()
        );
        Ok(body.into())
    }
}
