//! Conversation, execution and memory data types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Role of a message sender
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Persona and context injected by the engine, never stored in a transcript
    System,

    /// User message
    User,

    /// Model reply
    Assistant,

    /// Result of executing a code block
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "system" => Ok(Role::System),
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            "tool" => Ok(Role::Tool),
            other => Err(format!("unknown role: {}", other)),
        }
    }
}

/// A message as sent to a model provider
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    /// Create a new system message
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    /// Create a new user message
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    /// Create a new assistant message
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }

    /// Create a new tool result message
    pub fn tool(content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: content.into(),
        }
    }
}

/// Points a tool message back at the code block that produced it
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct BlockRef {
    /// Ordinal of the assistant message containing the block
    pub assistant_ordinal: u64,

    /// Position of the block within that message
    pub block_index: usize,
}

/// One entry of a session transcript
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub ordinal: u64,
    pub role: Role,
    pub content: String,
    /// Set for tool messages only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<BlockRef>,
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// Prompt form of this message
    pub fn to_chat(&self) -> ChatMessage {
        ChatMessage {
            role: self.role,
            content: self.content.clone(),
        }
    }
}

/// A fenced code region extracted from an assistant message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeBlock {
    /// Language tag from the opening fence, lower-cased; `None` when untagged
    pub language: Option<String>,

    /// Body between the fences, without the trailing newline before the closer
    pub source: String,

    /// Position among the blocks of the parent message (0-based)
    pub index: usize,

    /// 1-based line of the opening fence in the parent message
    pub line: usize,
}

/// How a sandboxed process ended
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", content = "code", rename_all = "snake_case")]
pub enum ExitStatus {
    Success,
    Failed(i32),
    /// Terminated by the sandbox (timeout, cancellation) or by a signal
    Killed,
}

impl ExitStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, ExitStatus::Success)
    }
}

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitStatus::Success => write!(f, "exit 0"),
            ExitStatus::Failed(code) => write!(f, "exit {}", code),
            ExitStatus::Killed => write!(f, "killed"),
        }
    }
}

/// Captured outcome of running one code block
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExecutionResult {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
    /// Output was cut at the byte cap, or the process was killed mid-run
    pub truncated: bool,
    pub duration: Duration,
}

/// A persisted fact with its embedding
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MemoryRecord {
    pub id: u64,
    pub embedding: Vec<f32>,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

/// A memory record together with its similarity to a query
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredMemory {
    pub record: MemoryRecord,
    pub score: f32,
}
