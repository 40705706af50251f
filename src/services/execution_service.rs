use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::clients::runner_client::{RunnerClient, RunnerError, RunnerRequest};
use crate::models::{
    ExecuteRequest, ExecutionResult, STATUS_MEMORY_LIMIT_EXCEEDED, STATUS_TIME_LIMIT_EXCEEDED,
};

/// Where validated runs are sent.
#[async_trait]
pub trait ExecutionBackend: Send + Sync {
    async fn run(&self, req: RunnerRequest) -> Result<ExecutionResult, RunnerError>;
}

#[async_trait]
impl ExecutionBackend for RunnerClient {
    async fn run(&self, req: RunnerRequest) -> Result<ExecutionResult, RunnerError> {
        self.execute(&req).await
    }
}

/// Request rejected before reaching the execution service
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationError {
    MissingSourceCode,
    MissingLanguageId,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationError::MissingSourceCode => write!(f, "source_code is required"),
            ValidationError::MissingLanguageId => write!(f, "language_id is required"),
        }
    }
}

impl std::error::Error for ValidationError {}

/// Proxies code runs to the execution service with a hard deadline.
///
/// Every failure is folded into a Runtime Error result; nothing is retried.
#[derive(Clone)]
pub struct ExecutionService {
    backend: Arc<dyn ExecutionBackend>,
    timeout: Duration,
    inner_timeout_ms: u64,
}

impl ExecutionService {
    pub fn new(backend: Arc<dyn ExecutionBackend>, timeout: Duration, inner_timeout_ms: u64) -> Self {
        Self {
            backend,
            timeout,
            inner_timeout_ms,
        }
    }

    pub fn validate(&self, req: ExecuteRequest) -> Result<RunnerRequest, ValidationError> {
        let source_code = req
            .source_code
            .filter(|code| !code.is_empty())
            .ok_or(ValidationError::MissingSourceCode)?;
        let language_id = req
            .language_id
            .filter(|id| !id.is_blank())
            .ok_or(ValidationError::MissingLanguageId)?;

        let language_id = match language_id.as_number() {
            Some(n) => serde_json::Value::from(n),
            None => serde_json::Value::from(language_id.to_string()),
        };

        Ok(RunnerRequest {
            source_code,
            language_id,
            stdin: req.stdin.unwrap_or_default(),
            timeout_ms: self.inner_timeout_ms,
        })
    }

    /// Validate and run. Never fails: problems come back as a result.
    pub async fn execute(&self, req: ExecuteRequest) -> ExecutionResult {
        match self.validate(req) {
            Ok(runner_req) => self.run(runner_req).await,
            Err(e) => {
                warn!("Rejected execution request: {}", e);
                ExecutionResult::runtime_error(e.to_string())
            }
        }
    }

    /// Run an already validated request within the configured deadline.
    pub async fn run(&self, req: RunnerRequest) -> ExecutionResult {
        let language = req.language_id.clone();
        match tokio::time::timeout(self.timeout, self.backend.run(req)).await {
            Ok(Ok(result)) => {
                match result.status.id {
                    STATUS_TIME_LIMIT_EXCEEDED | STATUS_MEMORY_LIMIT_EXCEEDED => info!(
                        "Execution hit a limit language={} status={} ({})",
                        language, result.status.id, result.status.description
                    ),
                    _ => info!("Execution finished language={} status={}", language, result.status.id),
                }
                result
            }
            Ok(Err(e)) => {
                warn!("Execution failed language={}: {}", language, e);
                ExecutionResult::runtime_error(e.to_string())
            }
            Err(_) => {
                warn!("Execution timed out language={} after {:?}", language, self.timeout);
                ExecutionResult::runtime_error(format!(
                    "execution timed out after {} ms",
                    self.timeout.as_millis()
                ))
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::models::{ExecutionStatus, LanguageId, STATUS_ACCEPTED, STATUS_RUNTIME_ERROR};
    use std::sync::Mutex;

    /// Backend answering like a Python sandbox, optionally after a delay.
    pub(crate) struct FakeBackend {
        pub delay: Duration,
        pub seen: Mutex<Vec<RunnerRequest>>,
    }

    impl FakeBackend {
        pub(crate) fn new(delay: Duration) -> Arc<Self> {
            Arc::new(Self { delay, seen: Mutex::new(Vec::new()) })
        }
    }

    #[async_trait]
    impl ExecutionBackend for FakeBackend {
        async fn run(&self, req: RunnerRequest) -> Result<ExecutionResult, RunnerError> {
            self.seen.lock().unwrap().push(req.clone());
            tokio::time::sleep(self.delay).await;
            let stdout = req
                .source_code
                .strip_prefix("print(")
                .and_then(|rest| rest.strip_suffix(')'))
                .map(|arg| format!("{}\n", arg))
                .unwrap_or_default();
            Ok(ExecutionResult {
                stdout,
                stderr: String::new(),
                status: ExecutionStatus { id: STATUS_ACCEPTED, description: "Accepted".into() },
            })
        }
    }

    fn request(code: Option<&str>, lang: Option<LanguageId>) -> ExecuteRequest {
        ExecuteRequest {
            source_code: code.map(str::to_string),
            language_id: lang,
            stdin: None,
        }
    }

    #[tokio::test]
    async fn runs_valid_requests_with_the_inner_timeout() {
        let backend = FakeBackend::new(Duration::ZERO);
        let service = ExecutionService::new(backend.clone(), Duration::from_secs(1), 5000);

        let result = service
            .execute(request(Some("print(1)"), Some(LanguageId::Text("71".into()))))
            .await;
        assert_eq!(result.stdout, "1\n");
        assert!(result.is_accepted());

        let seen = backend.seen.lock().unwrap();
        assert_eq!(seen[0].language_id, serde_json::json!(71));
        assert_eq!(seen[0].timeout_ms, 5000);
        assert_eq!(seen[0].stdin, "");
    }

    #[tokio::test]
    async fn missing_fields_become_runtime_errors() {
        let backend = FakeBackend::new(Duration::ZERO);
        let service = ExecutionService::new(backend.clone(), Duration::from_secs(1), 5000);

        let result = service.execute(request(None, Some(LanguageId::Number(71)))).await;
        assert_eq!(result.status.id, STATUS_RUNTIME_ERROR);
        assert_eq!(result.stderr, "source_code is required");

        let result = service.execute(request(Some("print(1)"), None)).await;
        assert_eq!(result.stderr, "language_id is required");

        assert!(backend.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn slow_backends_hit_the_deadline() {
        let backend = FakeBackend::new(Duration::from_secs(30));
        let service = ExecutionService::new(backend, Duration::from_millis(50), 5000);

        let result = service
            .execute(request(Some("print(1)"), Some(LanguageId::Number(71))))
            .await;
        assert_eq!(result.status.id, STATUS_RUNTIME_ERROR);
        assert_eq!(result.status.description, "Runtime Error");
        assert_eq!(result.stderr, "execution timed out after 50 ms");
    }

    #[tokio::test]
    async fn unreachable_service_is_reported() {
        let client = RunnerClient::new("http://127.0.0.1:9", Duration::from_secs(2)).unwrap();
        let service = ExecutionService::new(Arc::new(client), Duration::from_secs(3), 5000);

        let result = service
            .execute(request(Some("print(1)"), Some(LanguageId::Number(71))))
            .await;
        assert_eq!(result.status.id, STATUS_RUNTIME_ERROR);
        assert!(result.stderr.contains("runner request"));
    }
}
