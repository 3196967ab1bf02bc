//! LLM client abstractions for the medical evaluation path.
//!
//! The [`LlmClient`] trait is the only seam through which the pipeline talks
//! to a language model. Retry, backoff, and response parsing all live above
//! this seam in the medical evaluator, which tests exercise against mock
//! clients.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

mod secrets;

#[cfg(feature = "openai")]
mod openai;

pub use secrets::{ApiCredential, CredentialSource};

#[cfg(feature = "openai")]
pub use openai::OpenAiClient;

/// Errors from LLM clients.
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("transport failure: {0}")]
    Transport(String),

    #[error("rate limit exceeded, retry after {retry_after:?}")]
    RateLimited { retry_after: Option<Duration> },

    #[error("timeout after {0:?}")]
    Timeout(Duration),

    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    #[error("response parse error: {0}")]
    Parse(String),

    #[error("provider not configured: {0}")]
    NotConfigured(String),
}

impl ProviderError {
    /// Transient failures worth retrying with backoff. A timed-out call is
    /// treated identically to a transport failure.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ProviderError::Transport(_)
                | ProviderError::RateLimited { .. }
                | ProviderError::Timeout(_)
        )
    }
}

/// Configuration for a completion request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionConfig {
    /// Model to use
    pub model: String,

    /// Maximum tokens to generate
    pub max_tokens: u32,

    /// Temperature (low for consistent verdicts)
    pub temperature: f32,

    /// Request timeout
    #[serde(with = "crate::config::duration_human")]
    pub timeout: Duration,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini".to_string(),
            max_tokens: 500,
            temperature: 0.1,
            timeout: Duration::from_secs(15),
        }
    }
}

/// Client abstraction allows swapping LLM backends.
///
/// The pipeline never depends on a concrete provider; tests substitute mock
/// clients that script failures.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Execute a single completion and return the raw response text.
    async fn complete(
        &self,
        prompt: &str,
        config: &CompletionConfig,
    ) -> Result<String, ProviderError>;

    /// Client name for logs and metrics.
    fn name(&self) -> &str;

    /// Check if the client is usable.
    async fn health_check(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(ProviderError::Transport("reset".into()).is_retryable());
        assert!(ProviderError::RateLimited { retry_after: None }.is_retryable());
        assert!(ProviderError::Timeout(Duration::from_secs(15)).is_retryable());

        assert!(!ProviderError::Api {
            status: 400,
            message: "bad request".into()
        }
        .is_retryable());
        assert!(!ProviderError::Parse("garbage".into()).is_retryable());
        assert!(!ProviderError::NotConfigured("no key".into()).is_retryable());
    }

    #[test]
    fn test_completion_config_default() {
        let config = CompletionConfig::default();
        assert_eq!(config.max_tokens, 500);
        assert!(config.temperature < 0.5);
    }
}
