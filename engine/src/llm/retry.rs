//! Bounded retries around a provider
//!
//! Every attempt is capped by `call_timeout`. Transient failures back off
//! exponentially (doubling from `initial_backoff`, capped at `max_backoff`)
//! until `max_attempts` is used up; anything else fails immediately. The
//! worst-case wall time of `complete` is therefore bounded.

use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::{LLMError, LLMProvider, Result};
use tera_sdk::types::ChatMessage;

/// Retry and timeout settings for model calls
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub call_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(4),
            call_timeout: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// Delay before attempt `attempt + 1`, where `attempt` starts at 1
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        self.initial_backoff
            .checked_mul(factor)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff)
    }
}

/// A provider plus the policy used to call it
pub struct RetryingClient {
    provider: Box<dyn LLMProvider>,
    policy: RetryPolicy,
}

impl RetryingClient {
    pub fn new(provider: Box<dyn LLMProvider>, policy: RetryPolicy) -> Self {
        Self { provider, policy }
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub async fn check_health(&self) -> bool {
        self.provider.check_health().await
    }

    /// Call the provider until it answers or the budget is spent
    pub async fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
        let attempts = self.policy.max_attempts.max(1);
        let mut last_error = LLMError::ProviderUnavailable("no attempt made".to_string());

        for attempt in 1..=attempts {
            debug!(
                "Calling {} (attempt {}/{}, {} messages)",
                self.provider.name(),
                attempt,
                attempts,
                messages.len()
            );

            let outcome =
                tokio::time::timeout(self.policy.call_timeout, self.provider.complete(messages))
                    .await;

            let err = match outcome {
                Ok(Ok(text)) => {
                    if attempt > 1 {
                        info!("{} succeeded on attempt {}", self.provider.name(), attempt);
                    }
                    return Ok(text);
                }
                Ok(Err(e)) => e,
                Err(_) => LLMError::Timeout,
            };

            if !err.is_transient() {
                error!("{} failed permanently: {}", self.provider.name(), err);
                return Err(err);
            }

            warn!(
                "{} attempt {}/{} failed: {}",
                self.provider.name(),
                attempt,
                attempts,
                err
            );
            last_error = err;

            if attempt < attempts {
                tokio::time::sleep(self.policy.backoff_for(attempt)).await;
            }
        }

        error!(
            "{} exhausted {} attempts",
            self.provider.name(),
            attempts
        );
        Err(last_error)
    }
}
