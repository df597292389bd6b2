//! Fact extraction for long-term memory
//!
//! After a turn, the exchange is condensed into short standalone facts
//! (preferences, personal details, ongoing projects). Each fact becomes one
//! memory record.

use async_trait::async_trait;
use std::sync::Arc;

use tera_sdk::types::{ChatMessage, Message, Role};

use super::MemoryError;
use crate::llm::RetryingClient;

/// Answers that mean "nothing worth remembering"
const EMPTY_ANSWERS: &[&str] = &["none", "null", "n/a", "nothing", "空", "无", "没有"];

/// Longest fact kept, in characters
const MAX_FACT_CHARS: usize = 300;

const EXTRACTION_PROMPT: &str = "You maintain long-term memory for an assistant. \
From the conversation below, extract facts worth remembering about the user: \
preferences, personal details, plans, and decisions. Write each fact as one short, \
self-contained sentence of at most 50 words, one fact per line, without numbering. \
Ignore small talk and anything only relevant to this moment. \
If there is nothing worth remembering, reply with exactly: NONE";

/// Turns an exchange into candidate facts
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, exchange: &[Message]) -> Result<Vec<String>, MemoryError>;
}

/// Uses the chat model itself to extract facts
pub struct ModelSummarizer {
    client: Arc<RetryingClient>,
    max_facts: usize,
}

impl ModelSummarizer {
    pub fn new(client: Arc<RetryingClient>) -> Self {
        Self {
            client,
            max_facts: 5,
        }
    }

    pub fn with_max_facts(mut self, max_facts: usize) -> Self {
        self.max_facts = max_facts;
        self
    }

    /// Render user and assistant turns; tool output is left out
    fn render_exchange(exchange: &[Message]) -> String {
        exchange
            .iter()
            .filter_map(|m| match m.role {
                Role::User => Some(format!("User: {}", m.content)),
                Role::Assistant => Some(format!("Assistant: {}", m.content)),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Split a model answer into clean fact lines
pub fn parse_facts(answer: &str, max_facts: usize) -> Vec<String> {
    answer
        .lines()
        .map(strip_bullet)
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter(|line| {
            let lowered = line
                .trim_end_matches(['.', '。', '!'])
                .to_lowercase();
            !EMPTY_ANSWERS.contains(&lowered.as_str())
        })
        .filter(|line| line.chars().count() <= MAX_FACT_CHARS)
        .take(max_facts)
        .map(str::to_string)
        .collect()
}

fn strip_bullet(line: &str) -> &str {
    let line = line.trim_start();
    for prefix in ["- ", "* ", "• ", "・"] {
        if let Some(rest) = line.strip_prefix(prefix) {
            return rest;
        }
    }
    // "1. fact" / "2) fact"
    let digits = line.bytes().take_while(|b| b.is_ascii_digit()).count();
    if digits > 0 {
        let rest = &line[digits..];
        if let Some(rest) = rest.strip_prefix(". ").or_else(|| rest.strip_prefix(") ")) {
            return rest;
        }
    }
    line
}

#[async_trait]
impl Summarizer for ModelSummarizer {
    async fn summarize(&self, exchange: &[Message]) -> Result<Vec<String>, MemoryError> {
        let rendered = Self::render_exchange(exchange);
        if rendered.trim().is_empty() {
            return Ok(Vec::new());
        }

        let prompt = vec![
            ChatMessage::system(EXTRACTION_PROMPT),
            ChatMessage::user(rendered),
        ];
        let answer = self
            .client
            .complete(&prompt)
            .await
            .map_err(|e| MemoryError::Summarizer(e.to_string()))?;

        Ok(parse_facts(&answer, self.max_facts))
    }
}
