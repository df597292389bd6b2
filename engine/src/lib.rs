//! Tera Engine Library
//!
//! This library provides the core functionality of the Tera terminal
//! assistant. It is used by both the main binary and integration tests.

/// Configuration management module
pub mod config;

/// Secret scrubbing for errors and logs
pub mod secrets;

/// Database persistence module
pub mod db;

/// Remote model providers and retries
pub mod llm;

/// Fenced code block extraction
pub mod response_parser;

/// Code execution sandbox
pub mod sandbox;

/// Long-term vector memory
pub mod memory;

/// Turn cancellation
pub mod cancel;

/// Conversation driver and sessions
pub mod agent;

/// Telemetry and Observability
pub mod telemetry;

/// CLI interface module
pub mod cli;

/// Command handlers module
pub mod handlers;
