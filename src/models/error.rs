//! Error types for quantval.
//!
//! Two layers:
//! - `QuantvalError`: infrastructure and configuration failures (network,
//!   timeouts, malformed completions, I/O). These surface as `Result`s.
//! - `LlmError`: failures reported by the completion endpoint itself.
//!
//! Attempt-level rejections (rule violations, solver disagreement, ...) are
//! not errors; see [`crate::models::RejectionReason`].

use thiserror::Error;

/// Top-level error type for quantval.
#[derive(Debug, Error)]
pub enum QuantvalError {
    // ═══════════════════════════════════════════════════════════════════
    // Expected failures
    // ═══════════════════════════════════════════════════════════════════

    #[error("Configuration error: {0}")]
    Config(#[from] super::ConfigError),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    // ═══════════════════════════════════════════════════════════════════
    // Infrastructure failures
    // ═══════════════════════════════════════════════════════════════════

    #[error("LLM API error: {0}")]
    Llm(#[from] LlmError),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Request timeout after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Rate limited: retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: f64 },

    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    // ═══════════════════════════════════════════════════════════════════
    // Invariant violations (bugs)
    // ═══════════════════════════════════════════════════════════════════

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Errors reported by an OpenAI-compatible completion endpoint.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("Authentication failed: invalid API key")]
    AuthenticationFailed,

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Rate limited by endpoint: {message}")]
    RateLimited {
        message: String,
        retry_after_secs: Option<f64>,
    },

    #[error("API error (status {status}): {message}")]
    ApiError { status: u16, message: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Request failed after {attempts} attempts: {last_error}")]
    MaxRetriesExceeded { attempts: u32, last_error: String },
}

impl QuantvalError {
    /// Create an IO error with context.
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Check if this error is retryable at the HTTP layer.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Timeout(_)
                | Self::RateLimited { .. }
                | Self::Network(_)
                | Self::Llm(LlmError::RateLimited { .. })
        )
    }

    /// Get retry delay hint in seconds, if applicable.
    pub fn retry_after(&self) -> Option<f64> {
        match self {
            Self::RateLimited { retry_after_secs } => Some(*retry_after_secs),
            Self::Llm(LlmError::RateLimited {
                retry_after_secs, ..
            }) => *retry_after_secs,
            _ => None,
        }
    }
}

/// Result type alias for quantval.
pub type Result<T> = std::result::Result<T, QuantvalError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_retryable_classification() {
        assert!(QuantvalError::Timeout(Duration::from_secs(5)).is_retryable());
        assert!(QuantvalError::RateLimited { retry_after_secs: 2.0 }.is_retryable());
        assert!(!QuantvalError::ParseError("bad json".into()).is_retryable());
        assert!(!QuantvalError::Llm(LlmError::AuthenticationFailed).is_retryable());
    }

    #[test]
    fn test_retry_after_hint() {
        let err = QuantvalError::Llm(LlmError::RateLimited {
            message: "slow down".into(),
            retry_after_secs: Some(3.5),
        });
        assert_eq!(err.retry_after(), Some(3.5));
        assert_eq!(QuantvalError::Internal("x".into()).retry_after(), None);
    }
}
