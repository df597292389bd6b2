//! Tera SDK
//!
//! Shared data model and error types for the Tera conversation engine.
//! Kept separate from the engine so that front-ends and tests can depend on
//! the types without pulling in the runtime stack.

/// Error types and handling
pub mod errors;

/// Conversation, execution and memory types
pub mod types;

// Re-export commonly used types
pub use errors::{EngineError, TeraErrorExt};
pub use types::{
    BlockRef, ChatMessage, CodeBlock, ExecutionResult, ExitStatus, MemoryRecord, Message, Role,
    ScoredMemory,
};
