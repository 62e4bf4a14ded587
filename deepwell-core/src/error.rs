//! Error types for the Deepwell core.
//!
//! Uses `thiserror` for public API error types. `LlmError` is the closed
//! taxonomy every provider, transport and resilience failure is mapped into;
//! the remaining enums cover the registry, configuration and research domains.

use crate::research::types::ResearchPhase;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Longest detail string carried inside an error after redaction.
pub const MAX_ERROR_DETAIL_CHARS: usize = 512;

/// Top-level error type for the Deepwell core library.
#[derive(Debug, thiserror::Error)]
pub enum DeepwellError {
    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Research error: {0}")]
    Research(#[from] ResearchError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Machine-readable kind of an [`LlmError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    Authentication,
    RateLimited,
    Network,
    Timeout,
    InvalidResponse,
    CircuitOpen,
    ExternalProvider,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::Authentication => "authentication",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::Network => "network",
            ErrorKind::Timeout => "timeout",
            ErrorKind::InvalidResponse => "invalid_response",
            ErrorKind::CircuitOpen => "circuit_open",
            ErrorKind::ExternalProvider => "external_provider",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors from model invocation. Closed: every failure maps to one variant.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LlmError {
    #[error("Invalid request: {message}")]
    Validation { message: String },

    #[error("Authentication failed for provider {provider}: {message}")]
    Authentication { provider: String, message: String },

    #[error("Rate limited by provider {provider}: {message}")]
    RateLimited {
        provider: String,
        message: String,
        retry_after_secs: Option<u64>,
    },

    #[error("Network failure: {message}")]
    Network {
        message: String,
        status: Option<u16>,
        retry_after_secs: Option<u64>,
    },

    #[error("Request timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Invalid provider response: {message}")]
    InvalidResponse { message: String },

    #[error("Circuit open for model {model}, retry in {retry_in_secs}s")]
    CircuitOpen { model: String, retry_in_secs: u64 },

    #[error("Provider error: {message}")]
    ExternalProvider { message: String, status: Option<u16> },
}

impl LlmError {
    pub fn validation(message: impl Into<String>) -> Self {
        LlmError::Validation {
            message: message.into(),
        }
    }

    pub fn invalid_response(message: impl Into<String>) -> Self {
        LlmError::InvalidResponse {
            message: message.into(),
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        LlmError::Network {
            message: message.into(),
            status: None,
            retry_after_secs: None,
        }
    }

    pub fn timeout(after: Duration) -> Self {
        LlmError::Timeout {
            timeout_ms: after.as_millis() as u64,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            LlmError::Validation { .. } => ErrorKind::Validation,
            LlmError::Authentication { .. } => ErrorKind::Authentication,
            LlmError::RateLimited { .. } => ErrorKind::RateLimited,
            LlmError::Network { .. } => ErrorKind::Network,
            LlmError::Timeout { .. } => ErrorKind::Timeout,
            LlmError::InvalidResponse { .. } => ErrorKind::InvalidResponse,
            LlmError::CircuitOpen { .. } => ErrorKind::CircuitOpen,
            LlmError::ExternalProvider { .. } => ErrorKind::ExternalProvider,
        }
    }

    /// Whether the retry loop may attempt this call again.
    ///
    /// `RateLimited` is not retryable here; the retry policy can opt in
    /// separately. `InvalidResponse` is retryable but capped at one retry
    /// by the policy.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Network | ErrorKind::Timeout | ErrorKind::InvalidResponse
        )
    }

    /// Whether this failure says something about the health of the model
    /// endpoint and should count toward its circuit breaker.
    pub fn counts_toward_breaker(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Network
                | ErrorKind::Timeout
                | ErrorKind::InvalidResponse
                | ErrorKind::RateLimited
                | ErrorKind::ExternalProvider
        )
    }

    /// Provider-supplied retry-after hint, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            LlmError::RateLimited {
                retry_after_secs, ..
            }
            | LlmError::Network {
                retry_after_secs, ..
            } => retry_after_secs.map(Duration::from_secs),
            _ => None,
        }
    }
}

/// Errors from the model capability registry.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RegistryError {
    #[error("Model not registered: {model}")]
    NotRegistered { model: String },

    #[error("Model registered twice: {model}")]
    Duplicate { model: String },
}

impl From<RegistryError> for LlmError {
    fn from(err: RegistryError) -> Self {
        LlmError::Validation {
            message: err.to_string(),
        }
    }
}

/// Errors from the configuration system.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Configuration parse error: {0}")]
    Parse(#[from] Box<figment::Error>),

    #[error("Environment variable not set: {var}")]
    EnvVarMissing { var: String },
}

/// Errors surfaced by a research run.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ResearchError {
    #[error("Research failed during {phase}: {source}")]
    PhaseFailed {
        phase: ResearchPhase,
        #[source]
        source: LlmError,
    },

    #[error("Research run exceeded {timeout_secs}s (reached {phase})")]
    RunTimeout {
        phase: ResearchPhase,
        timeout_secs: u64,
    },

    #[error("Invalid research request: {message}")]
    InvalidRequest { message: String },
}

impl ResearchError {
    /// Furthest phase the run reached before failing.
    pub fn phase(&self) -> Option<ResearchPhase> {
        match self {
            ResearchError::PhaseFailed { phase, .. } | ResearchError::RunTimeout { phase, .. } => {
                Some(*phase)
            }
            ResearchError::InvalidRequest { .. } => None,
        }
    }

    /// Taxonomy kind of the underlying cause.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ResearchError::PhaseFailed { source, .. } => source.kind(),
            ResearchError::RunTimeout { .. } => ErrorKind::Timeout,
            ResearchError::InvalidRequest { .. } => ErrorKind::Validation,
        }
    }
}

/// A type alias for results using the top-level `DeepwellError`.
pub type Result<T> = std::result::Result<T, DeepwellError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_llm() {
        let err = DeepwellError::Llm(LlmError::network("connection refused"));
        assert_eq!(
            err.to_string(),
            "LLM error: Network failure: connection refused"
        );
    }

    #[test]
    fn test_retryable_classification() {
        assert!(LlmError::network("reset").is_retryable());
        assert!(LlmError::timeout(Duration::from_secs(30)).is_retryable());
        assert!(LlmError::invalid_response("empty").is_retryable());
        assert!(
            LlmError::Network {
                message: "bad gateway".into(),
                status: Some(502),
                retry_after_secs: None,
            }
            .is_retryable()
        );

        assert!(!LlmError::validation("empty prompt").is_retryable());
        assert!(
            !LlmError::Authentication {
                provider: "openai".into(),
                message: "bad key".into(),
            }
            .is_retryable()
        );
        assert!(
            !LlmError::RateLimited {
                provider: "openai".into(),
                message: "quota".into(),
                retry_after_secs: Some(5),
            }
            .is_retryable()
        );
        assert!(
            !LlmError::CircuitOpen {
                model: "m".into(),
                retry_in_secs: 10,
            }
            .is_retryable()
        );
        assert!(
            !LlmError::ExternalProvider {
                message: "teapot".into(),
                status: Some(418),
            }
            .is_retryable()
        );
    }

    #[test]
    fn test_breaker_accounting_skips_caller_errors() {
        assert!(!LlmError::validation("x").counts_toward_breaker());
        assert!(
            !LlmError::Authentication {
                provider: "anthropic".into(),
                message: "x".into(),
            }
            .counts_toward_breaker()
        );
        assert!(LlmError::network("x").counts_toward_breaker());
    }

    #[test]
    fn test_retry_after_hint() {
        let err = LlmError::RateLimited {
            provider: "google".into(),
            message: "slow down".into(),
            retry_after_secs: Some(12),
        };
        assert_eq!(err.retry_after(), Some(Duration::from_secs(12)));
        assert_eq!(LlmError::network("x").retry_after(), None);
    }

    #[test]
    fn test_not_registered_becomes_validation() {
        let err: LlmError = RegistryError::NotRegistered {
            model: "nope".into(),
        }
        .into();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(err.to_string().contains("nope"));
    }

    #[test]
    fn test_error_kind_serializes_snake_case() {
        let json = serde_json::to_string(&ErrorKind::CircuitOpen).unwrap();
        assert_eq!(json, "\"circuit_open\"");
        assert_eq!(ErrorKind::RateLimited.to_string(), "rate_limited");
    }

    #[test]
    fn test_research_error_carries_phase() {
        let err = ResearchError::PhaseFailed {
            phase: ResearchPhase::Publishing,
            source: LlmError::network("down"),
        };
        assert_eq!(err.phase(), Some(ResearchPhase::Publishing));
        assert_eq!(err.kind(), ErrorKind::Network);
        assert!(err.to_string().contains("publishing"));
    }
}
