use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Status ids shared with the execution service.
pub const STATUS_ACCEPTED: i32 = 3;
pub const STATUS_TIME_LIMIT_EXCEEDED: i32 = 5;
pub const STATUS_MEMORY_LIMIT_EXCEEDED: i32 = 7;
pub const STATUS_RUNTIME_ERROR: i32 = 11;

/// Language id as sent by editors: `"71"` or `71`
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, ToSchema)]
#[serde(untagged)]
pub enum LanguageId {
    Number(i64),
    Text(String),
}

impl LanguageId {
    pub fn is_blank(&self) -> bool {
        match self {
            LanguageId::Number(n) => *n == 0,
            LanguageId::Text(s) => s.trim().is_empty(),
        }
    }

    /// Numeric form expected by the execution service.
    pub fn as_number(&self) -> Option<i64> {
        match self {
            LanguageId::Number(n) => Some(*n),
            LanguageId::Text(s) => s.trim().parse().ok(),
        }
    }
}

impl std::fmt::Display for LanguageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LanguageId::Number(n) => write!(f, "{}", n),
            LanguageId::Text(s) => write!(f, "{}", s),
        }
    }
}

/// Code to run, as received over the socket or `POST /execute`
#[derive(Serialize, Deserialize, Debug, Clone, Default, ToSchema)]
pub struct ExecuteRequest {
    #[serde(default)]
    pub source_code: Option<String>,
    #[serde(default)]
    pub language_id: Option<LanguageId>,
    #[serde(default)]
    pub stdin: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, ToSchema)]
pub struct ExecutionStatus {
    pub id: i32,
    pub description: String,
}

/// Outcome of a run
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, ToSchema)]
pub struct ExecutionResult {
    pub stdout: String,
    pub stderr: String,
    pub status: ExecutionStatus,
}

impl ExecutionResult {
    /// Result reported when the run could not happen or did not finish.
    pub fn runtime_error(stderr: impl Into<String>) -> Self {
        Self {
            stdout: String::new(),
            stderr: stderr.into(),
            status: ExecutionStatus {
                id: STATUS_RUNTIME_ERROR,
                description: "Runtime Error".to_string(),
            },
        }
    }

    /// Result reported when a connection already has the maximum number of runs in flight.
    pub fn queue_full(stderr: impl Into<String>) -> Self {
        Self {
            stdout: String::new(),
            stderr: stderr.into(),
            status: ExecutionStatus {
                id: STATUS_RUNTIME_ERROR,
                description: "Queue Full".to_string(),
            },
        }
    }

    pub fn is_accepted(&self) -> bool {
        self.status.id == STATUS_ACCEPTED
    }
}
