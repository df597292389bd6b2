//! Error types and handling
//!
//! This module provides the error types surfaced by the Tera conversation
//! engine. All errors implement the `TeraErrorExt` trait which provides
//! user-friendly hints and indicates whether errors are recoverable.
//!
//! # Security
//!
//! Error messages never carry API keys or request bodies. Upstream failures
//! are summarized by status and provider name only.

use thiserror::Error;

/// Trait for Tera error extensions
///
/// This trait provides additional context for errors, including user-friendly
/// hints and recoverability information. All engine errors implement this trait.
pub trait TeraErrorExt {
    /// Returns a user-friendly hint for the error
    ///
    /// The hint is safe to print in the terminal and does not contain
    /// secrets or internal implementation details.
    fn user_hint(&self) -> &str;

    /// Returns whether the error is recoverable
    ///
    /// Recoverable errors leave the session usable: the user can simply
    /// send another message. Non-recoverable errors need a configuration
    /// change or restart.
    fn is_recoverable(&self) -> bool;
}

/// Main engine error type
///
/// This enum represents everything a turn can fail with once it reaches the
/// caller. Sandbox timeouts, unsupported languages and memory degradation are
/// recovered inside the turn and never show up here.
///
/// # Error Categories
///
/// - **Configuration**: Invalid or missing configuration
/// - **Database**: SQLite operation failures
/// - **Upstream**: Remote model failures after the retry budget
/// - **Turn control**: Loop limit, busy session, cancellation
/// - **Memory**: A memory scope that cannot be loaded
///
/// # Examples
///
/// ```
/// use tera_sdk::errors::{EngineError, TeraErrorExt};
///
/// let error = EngineError::SessionBusy;
/// println!("Hint: {}", error.user_hint());
/// assert!(error.is_recoverable());
///
/// let fatal_error = EngineError::Config("missing source".to_string());
/// assert!(!fatal_error.is_recoverable());
/// ```
#[derive(Debug, Error)]
pub enum EngineError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    // Database errors
    #[error("Database error: {0}")]
    Database(String),

    // Remote model errors
    #[error("Upstream model error: {0}")]
    Upstream(String),

    // Turn control errors
    #[error("Loop limit of {0} rounds exceeded")]
    LoopLimitExceeded(u32),

    #[error("Session is busy with another turn")]
    SessionBusy,

    #[error("Turn cancelled")]
    Cancelled,

    #[error("Invalid transcript: {0}")]
    InvalidTranscript(String),

    // Memory errors
    #[error("Memory error: {0}")]
    Memory(String),
}

impl TeraErrorExt for EngineError {
    fn user_hint(&self) -> &str {
        match self {
            Self::Config(_) => "Check your config.toml file for errors",
            Self::Database(_) => "Database operation failed. Check the data directory",
            Self::Upstream(_) => "The model endpoint is unavailable. Check the source settings and network",
            Self::LoopLimitExceeded(_) => "The model kept asking to run code. Try a more specific request",
            Self::SessionBusy => "Wait for the current reply to finish",
            Self::Cancelled => "Interrupted. Nothing was added to the conversation",
            Self::InvalidTranscript(_) => "Saved conversation is damaged. Start a new one with --new",
            Self::Memory(_) => "Long-term memory is unavailable for this session",
        }
    }

    fn is_recoverable(&self) -> bool {
        match self {
            Self::Config(_) | Self::InvalidTranscript(_) => false,
            _ => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hints_are_non_empty() {
        let errors = vec![
            EngineError::Config("x".into()),
            EngineError::Database("x".into()),
            EngineError::Upstream("x".into()),
            EngineError::LoopLimitExceeded(4),
            EngineError::SessionBusy,
            EngineError::Cancelled,
            EngineError::InvalidTranscript("x".into()),
            EngineError::Memory("x".into()),
        ];
        for error in errors {
            assert!(!error.user_hint().is_empty(), "{error}");
        }
    }

    #[test]
    fn test_recoverability() {
        assert!(EngineError::Upstream("timeout".into()).is_recoverable());
        assert!(EngineError::SessionBusy.is_recoverable());
        assert!(!EngineError::Config("bad".into()).is_recoverable());
        assert!(!EngineError::InvalidTranscript("gap".into()).is_recoverable());
    }

    #[test]
    fn test_display_does_not_leak_hint() {
        let err = EngineError::LoopLimitExceeded(2);
        assert_eq!(err.to_string(), "Loop limit of 2 rounds exceeded");
    }
}
