// Agent framework: base contract, result envelope, error classification and
// retry/backoff used by the orchestrator

pub mod code;
pub mod context;
pub mod orchestrator;
pub mod reputation;
pub mod supply_chain;
pub mod synthesis;
pub mod vulnerability;

pub use context::SharedContext;
pub use orchestrator::Orchestrator;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;

use crate::models::finding::Finding;
use crate::services::llm_client::LlmError;

/// Terminal status of one stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AgentStatus {
    Success,
    Failed,
    Timeout,
    /// Only ever produced by the orchestrator (gate skip or failure skip)
    Skipped,
}

/// Classified agent error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentErrorType {
    Timeout,
    RateLimit,
    Connection,
    Auth,
    InvalidResponse,
    ServiceUnavailable,
    Unknown,
}

impl AgentErrorType {
    /// Whether the orchestrator may retry this class
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AgentErrorType::Timeout
                | AgentErrorType::RateLimit
                | AgentErrorType::Connection
                | AgentErrorType::ServiceUnavailable
        )
    }

    /// Best-effort classification of an error message
    pub fn classify(message: &str) -> Self {
        let lowered = message.to_lowercase();
        if lowered.contains("timed out") || lowered.contains("timeout") {
            AgentErrorType::Timeout
        } else if lowered.contains("rate limit") || lowered.contains("429") {
            AgentErrorType::RateLimit
        } else if lowered.contains("connection")
            || lowered.contains("dns")
            || lowered.contains("unreachable")
            || lowered.contains("transport")
        {
            AgentErrorType::Connection
        } else if lowered.contains("auth") || lowered.contains("401") || lowered.contains("403") {
            AgentErrorType::Auth
        } else if lowered.contains("invalid response")
            || lowered.contains("schema")
            || lowered.contains("not json")
        {
            AgentErrorType::InvalidResponse
        } else if lowered.contains("unavailable") || lowered.contains("503") {
            AgentErrorType::ServiceUnavailable
        } else {
            AgentErrorType::Unknown
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AgentErrorType::Timeout => "timeout",
            AgentErrorType::RateLimit => "rate_limit",
            AgentErrorType::Connection => "connection",
            AgentErrorType::Auth => "auth",
            AgentErrorType::InvalidResponse => "invalid_response",
            AgentErrorType::ServiceUnavailable => "service_unavailable",
            AgentErrorType::Unknown => "unknown",
        }
    }
}

/// Error an agent reports instead of raising across the boundary
#[derive(Debug, Clone)]
pub struct AgentError {
    pub message: String,
    pub error_type: AgentErrorType,
}

impl AgentError {
    pub fn new(message: impl Into<String>, error_type: AgentErrorType) -> Self {
        Self {
            message: message.into(),
            error_type,
        }
    }

    /// Classify from the message alone
    pub fn classified(message: impl Into<String>) -> Self {
        let message = message.into();
        let error_type = AgentErrorType::classify(&message);
        Self {
            message,
            error_type,
        }
    }
}

impl From<LlmError> for AgentError {
    fn from(err: LlmError) -> Self {
        let error_type = match &err {
            LlmError::MissingApiKey | LlmError::Auth => AgentErrorType::Auth,
            LlmError::RateLimited => AgentErrorType::RateLimit,
            LlmError::Transport(_) => AgentErrorType::Connection,
            LlmError::InvalidResponse(_) => AgentErrorType::InvalidResponse,
            LlmError::Timeout => AgentErrorType::Timeout,
        };
        Self {
            message: err.to_string(),
            error_type,
        }
    }
}

/// Successful agent output: report data plus any agent-contributed findings
#[derive(Debug, Clone, Default)]
pub struct AgentData {
    /// Data conforming to the agent's documented schema
    pub data: serde_json::Value,
    /// Agent confidence in [0, 1]
    pub confidence: f64,
    /// How many packages the agent looked at
    pub packages_analyzed: usize,
    /// Findings to merge into the report (detection_method = agent)
    pub findings: Vec<Finding>,
}

/// Gate decision for optional stages
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateDecision {
    Run,
    /// Skip with the reason recorded on the result; not a failure
    Skip(String),
}

/// One analysis stage. Inputs are read-only; agents never panic or raise
/// across this boundary; failures come back as `AgentError`.
#[async_trait]
pub trait Agent: Send + Sync {
    /// Stable stage name used in the report
    fn name(&self) -> &'static str;

    /// Whether the stage should run for this context (optional stages only)
    fn gate(&self, _context: &SharedContext) -> GateDecision {
        GateDecision::Run
    }

    async fn analyze(&self, context: &SharedContext) -> Result<AgentData, AgentError>;
}

/// Result envelope recorded in the shared context for every stage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentResult {
    pub agent_name: String,
    pub status: AgentStatus,
    pub data: serde_json::Value,
    pub confidence: f64,
    pub duration_seconds: f64,
    pub packages_analyzed: usize,
    pub findings_count: usize,
    /// Findings the agent contributed, merged into the report by the composer
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub findings: Vec<Finding>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_type: Option<AgentErrorType>,
    /// True when a SKIPPED status came from an unsatisfied gate rather than a
    /// failure; gate skips do not lower the degradation level
    #[serde(default)]
    pub gate_skip: bool,
    /// True when a required stage's data was synthesized by the fallback path
    #[serde(default)]
    pub fallback_used: bool,
}

impl AgentResult {
    /// A successful result from agent output
    pub fn success(name: &str, data: AgentData, duration_seconds: f64) -> Self {
        Self {
            agent_name: name.to_string(),
            status: AgentStatus::Success,
            findings_count: data.findings.len(),
            packages_analyzed: data.packages_analyzed,
            confidence: data.confidence,
            findings: data.findings,
            data: data.data,
            duration_seconds,
            error: None,
            error_type: None,
            gate_skip: false,
            fallback_used: false,
        }
    }
}

/// Retry an async operation with exponential backoff. Only errors the caller
/// classifies as retryable are retried.
pub async fn retry_with_backoff<T, E, Fut, F>(
    mut operation: F,
    max_attempts: u32,
    base_delay: Duration,
    factor: u32,
    retryable: impl Fn(&E) -> bool,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt: u32 = 0;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if attempt + 1 >= max_attempts || !retryable(&err) {
                    return Err(err);
                }
                let delay = base_delay * factor.pow(attempt);
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_error_classification() {
        assert_eq!(AgentErrorType::classify("request timed out"), AgentErrorType::Timeout);
        assert_eq!(AgentErrorType::classify("429 rate limit hit"), AgentErrorType::RateLimit);
        assert_eq!(AgentErrorType::classify("connection refused"), AgentErrorType::Connection);
        assert_eq!(AgentErrorType::classify("401 authorization"), AgentErrorType::Auth);
        assert_eq!(
            AgentErrorType::classify("invalid response: schema mismatch"),
            AgentErrorType::InvalidResponse
        );
        assert_eq!(AgentErrorType::classify("weird failure"), AgentErrorType::Unknown);
    }

    #[test]
    fn test_retryable_classes() {
        assert!(AgentErrorType::Timeout.is_retryable());
        assert!(AgentErrorType::RateLimit.is_retryable());
        assert!(AgentErrorType::Connection.is_retryable());
        assert!(AgentErrorType::ServiceUnavailable.is_retryable());
        assert!(!AgentErrorType::Auth.is_retryable());
        assert!(!AgentErrorType::InvalidResponse.is_retryable());
        assert!(!AgentErrorType::Unknown.is_retryable());
    }

    #[test]
    fn test_llm_error_conversion() {
        let err: AgentError = LlmError::RateLimited.into();
        assert_eq!(err.error_type, AgentErrorType::RateLimit);

        let err: AgentError = LlmError::InvalidResponse("bad".to_string()).into();
        assert_eq!(err.error_type, AgentErrorType::InvalidResponse);
    }

    #[test]
    fn test_status_serialization_uppercase() {
        assert_eq!(serde_json::to_string(&AgentStatus::Success).unwrap(), "\"SUCCESS\"");
        assert_eq!(serde_json::to_string(&AgentStatus::Skipped).unwrap(), "\"SKIPPED\"");
    }

    #[tokio::test]
    async fn test_retry_succeeds_after_transient_failure() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, &str> = retry_with_backoff(
            || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n == 0 {
                        Err("transient")
                    } else {
                        Ok(42)
                    }
                }
            },
            2,
            Duration::from_millis(1),
            2,
            |_| true,
        )
        .await;

        assert_eq!(result, Ok(42));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_retry_gives_up_on_non_retryable() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, &str> = retry_with_backoff(
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err("fatal") }
            },
            3,
            Duration::from_millis(1),
            2,
            |_| false,
        )
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
