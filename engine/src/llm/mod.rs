//! Remote model client abstraction
//!
//! The driver only needs one operation from a model endpoint: turn a list of
//! prompt messages into reply text. `LLMProvider` is that contract;
//! `RetryingClient` adds the per-call timeout and bounded backoff on top of
//! any provider.

use async_trait::async_trait;

use tera_sdk::types::ChatMessage;

use crate::config::{ProviderKind, SourceConfig};

pub mod ollama;
pub mod openai;
pub mod retry;

pub use ollama::OllamaProvider;
pub use openai::OpenAIProvider;
pub use retry::{RetryPolicy, RetryingClient};

/// Result type for LLM operations
pub type Result<T> = std::result::Result<T, LLMError>;

/// Errors that can occur during LLM operations
#[derive(Debug, thiserror::Error)]
pub enum LLMError {
    #[error("Provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Rate limit exceeded")]
    RateLimitExceeded,

    #[error("Server error ({0}): {1}")]
    ServerError(u16, String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Timeout")]
    Timeout,

    #[error("Parse error: {0}")]
    ParseError(String),
}

impl LLMError {
    /// Whether another attempt could plausibly succeed
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            LLMError::ProviderUnavailable(_)
                | LLMError::RateLimitExceeded
                | LLMError::ServerError(..)
                | LLMError::NetworkError(_)
                | LLMError::Timeout
        )
    }

    /// Map a reqwest transport error
    pub(crate) fn from_transport(e: reqwest::Error, base_url: &str) -> Self {
        if e.is_timeout() {
            LLMError::Timeout
        } else if e.is_connect() {
            LLMError::ProviderUnavailable(format!("Cannot connect to {}", base_url))
        } else {
            LLMError::NetworkError(e.to_string())
        }
    }

    /// Map a non-success HTTP status
    pub(crate) fn from_status(status: reqwest::StatusCode, body: String) -> Self {
        let body = crate::secrets::scrub(&body);
        match status.as_u16() {
            401 | 403 => LLMError::AuthenticationFailed(body),
            429 => LLMError::RateLimitExceeded,
            code @ 500..=599 => LLMError::ServerError(code, body),
            _ => LLMError::InvalidRequest(body),
        }
    }
}

/// LLM Provider trait that all providers must implement
#[async_trait]
pub trait LLMProvider: Send + Sync {
    /// Returns the name of the provider (e.g., "openai", "ollama")
    fn name(&self) -> &str;

    /// Returns true if this is a local provider (e.g., Ollama)
    fn is_local(&self) -> bool;

    /// Send the prompt and return the assistant text
    ///
    /// # Arguments
    /// * `messages` - System prompt, injected context and the windowed transcript
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String>;

    /// Check if the provider is currently reachable.
    /// Default implementation returns true.
    async fn check_health(&self) -> bool {
        true
    }
}

/// Build the provider for a configured source
pub fn build_provider(source: &SourceConfig) -> Box<dyn LLMProvider> {
    match source.kind {
        ProviderKind::OpenAI => Box::new(OpenAIProvider::new(
            source.base_url.clone(),
            source.model.clone(),
            source.resolved_api_key(),
        )),
        ProviderKind::Ollama => Box::new(OllamaProvider::new(
            source.base_url.clone(),
            source.model.clone(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(LLMError::Timeout.is_transient());
        assert!(LLMError::RateLimitExceeded.is_transient());
        assert!(LLMError::ServerError(502, "bad gateway".into()).is_transient());
        assert!(LLMError::NetworkError("reset".into()).is_transient());
        assert!(!LLMError::AuthenticationFailed("no key".into()).is_transient());
        assert!(!LLMError::InvalidRequest("bad model".into()).is_transient());
        assert!(!LLMError::ParseError("not json".into()).is_transient());
    }

    #[test]
    fn test_status_mapping() {
        use reqwest::StatusCode;
        assert!(matches!(
            LLMError::from_status(StatusCode::UNAUTHORIZED, String::new()),
            LLMError::AuthenticationFailed(_)
        ));
        assert!(matches!(
            LLMError::from_status(StatusCode::TOO_MANY_REQUESTS, String::new()),
            LLMError::RateLimitExceeded
        ));
        assert!(matches!(
            LLMError::from_status(StatusCode::SERVICE_UNAVAILABLE, String::new()),
            LLMError::ServerError(503, _)
        ));
        assert!(matches!(
            LLMError::from_status(StatusCode::NOT_FOUND, String::new()),
            LLMError::InvalidRequest(_)
        ));
    }

    #[test]
    fn test_error_body_is_scrubbed() {
        let err = LLMError::from_status(
            reqwest::StatusCode::UNAUTHORIZED,
            "Incorrect API key provided: sk-abcdefghijklmnopqrstuvwxyz".to_string(),
        );
        assert!(!err.to_string().contains("sk-abcdef"));
        assert!(err.to_string().contains("[REDACTED]"));
    }
}
