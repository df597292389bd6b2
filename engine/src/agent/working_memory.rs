//! Working Memory for the Conversation Driver
//!
//! Chooses which part of the transcript is sent to the model. The full
//! transcript is never trimmed; each prompt only takes the most recent
//! suffix that fits the context limit, after the fixed preamble (persona
//! and recalled memories) has been paid for.
//!
//! Selection rules:
//! 1. Everything from the current turn's user message onward is always kept
//! 2. Older messages are added newest-first while they still fit
//! 3. A window never starts with a tool message (its assistant was cut)

use tera_sdk::types::{ChatMessage, Message, Role};

/// Default context limit in tokens (conservative estimate for most models)
pub const DEFAULT_CONTEXT_LIMIT: usize = 8000;

/// Average characters per token (rough estimate: 1 token ≈ 4 characters)
const CHARS_PER_TOKEN: usize = 4;

/// Per-message overhead for role and structure
const MESSAGE_OVERHEAD: usize = 10;

#[derive(Debug, Clone, Copy)]
pub struct WorkingMemory {
    /// Maximum number of tokens allowed in context
    context_limit: usize,
}

impl WorkingMemory {
    pub fn new() -> Self {
        Self::with_limit(DEFAULT_CONTEXT_LIMIT)
    }

    pub fn with_limit(context_limit: usize) -> Self {
        Self { context_limit }
    }

    pub fn context_limit(&self) -> usize {
        self.context_limit
    }

    /// Rough token count of one message's content
    pub fn estimate_tokens(content: &str) -> usize {
        content.len().div_ceil(CHARS_PER_TOKEN) + MESSAGE_OVERHEAD
    }

    /// Pick the transcript suffix to send
    ///
    /// `pinned_from` is the index of the current turn's user message; the
    /// window always starts at or before it, even over budget.
    pub fn window<'a>(
        &self,
        preamble: &[ChatMessage],
        transcript: &'a [Message],
        pinned_from: usize,
    ) -> &'a [Message] {
        let pinned_from = pinned_from.min(transcript.len());
        let mut used: usize = preamble
            .iter()
            .map(|m| Self::estimate_tokens(&m.content))
            .sum();
        used += transcript[pinned_from..]
            .iter()
            .map(|m| Self::estimate_tokens(&m.content))
            .sum::<usize>();

        let mut start = pinned_from;
        while start > 0 {
            let cost = Self::estimate_tokens(&transcript[start - 1].content);
            if used + cost > self.context_limit {
                break;
            }
            used += cost;
            start -= 1;
        }

        while start < pinned_from && transcript[start].role == Role::Tool {
            start += 1;
        }

        &transcript[start..]
    }
}

impl Default for WorkingMemory {
    fn default() -> Self {
        Self::new()
    }
}
