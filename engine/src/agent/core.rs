//! Conversation Driver
//!
//! One call to [`ConversationDriver::handle_turn`] processes one user
//! message:
//!
//! 1. Take the session's turn lock (fails with `SessionBusy` if held)
//! 2. Recall related memories and inject them ahead of the window
//! 3. Call the model (bounded retries, per-call timeout)
//! 4. Parse the reply; run every block in order, one tool message each
//! 5. If anything ran, call the model again, up to `max_rounds` calls
//! 6. Commit the turn's messages atomically, then update memory
//!
//! A failed or cancelled turn leaves the session exactly as it was.
//! Memory failures never fail a turn.

use async_trait::async_trait;
use chrono::Local;
use std::borrow::Cow;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use tera_sdk::errors::EngineError;
use tera_sdk::types::{BlockRef, ChatMessage, CodeBlock, Message, Role, ScoredMemory};

use crate::cancel::CancelToken;
use crate::llm::RetryingClient;
use crate::memory::{Embedder, MemoryError, Summarizer, VectorMemory};
use crate::response_parser::{parse_reply, MalformedFence};
use crate::sandbox::{CodeRunner, Language, SandboxError};

use super::session::{Session, SessionHandle};
use super::tool_messages;
use super::WorkingMemory;

/// Appended to every persona so the model knows blocks are executed
const EXECUTION_GUIDE: &str = "You can run code on the user's machine. \
To do so, reply with a fenced code block tagged with its language, for example ```python or ```sh. \
Each block is executed in order and its output comes back to you in a message that \
starts with a bracketed header such as [block 1 · python · exit 0 · 12 ms]. \
Use the output to answer; do not invent results. An untagged block runs as shell unless it \
looks like Python.";

const MEMORY_HEADER: &str = "Things you remember about the user from earlier conversations:";

/// Tunables for the driver loop
#[derive(Debug, Clone)]
pub struct DriverSettings {
    /// Model calls allowed per turn
    pub max_rounds: u32,
    /// Memories injected per turn
    pub top_k: usize,
    pub context_tokens: usize,
    /// Cap on the output quoted in one tool message
    pub tool_output_chars: usize,
}

impl Default for DriverSettings {
    fn default() -> Self {
        Self {
            max_rounds: 4,
            top_k: 5,
            context_tokens: super::working_memory::DEFAULT_CONTEXT_LIMIT,
            tool_output_chars: 8000,
        }
    }
}

/// Decides whether a block may run
#[async_trait]
pub trait ExecutionApprover: Send + Sync {
    async fn approve(&self, block: &CodeBlock) -> bool;
}

/// Approves every block
pub struct AutoApprove;

#[async_trait]
impl ExecutionApprover for AutoApprove {
    async fn approve(&self, _block: &CodeBlock) -> bool {
        true
    }
}

/// Long-term memory collaborators
#[derive(Clone)]
pub struct MemoryServices {
    pub store: Arc<dyn VectorMemory>,
    pub embedder: Arc<dyn Embedder>,
    pub summarizer: Arc<dyn Summarizer>,
}

/// Why the loop stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnStop {
    /// The model answered without anything left to run
    Completed,
    /// The model still wanted to run code when the round budget ran out
    LoopLimitReached,
}

#[derive(Debug, Clone)]
pub struct TurnOutcome {
    /// Text of the last assistant message
    pub reply: String,
    pub rounds: u32,
    /// Blocks that actually ran (including ones killed at the time limit)
    pub executions: usize,
    pub stop: TurnStop,
}

enum Fence<'a> {
    Block(&'a CodeBlock),
    Malformed(&'a MalformedFence),
}

impl Fence<'_> {
    fn index(&self) -> usize {
        match self {
            Fence::Block(b) => b.index,
            Fence::Malformed(m) => m.index,
        }
    }
}

pub struct ConversationDriver {
    client: Arc<RetryingClient>,
    runner: Arc<dyn CodeRunner>,
    approver: Arc<dyn ExecutionApprover>,
    memory: Option<MemoryServices>,
    settings: DriverSettings,
}

impl ConversationDriver {
    pub fn new(
        client: Arc<RetryingClient>,
        runner: Arc<dyn CodeRunner>,
        settings: DriverSettings,
    ) -> Self {
        Self {
            client,
            runner,
            approver: Arc::new(AutoApprove),
            memory: None,
            settings,
        }
    }

    pub fn with_approver(mut self, approver: Arc<dyn ExecutionApprover>) -> Self {
        self.approver = approver;
        self
    }

    pub fn with_memory(mut self, memory: MemoryServices) -> Self {
        self.memory = Some(memory);
        self
    }

    pub fn settings(&self) -> &DriverSettings {
        &self.settings
    }

    /// Process one user message
    pub async fn handle_turn(
        &self,
        handle: &SessionHandle,
        user_text: &str,
        cancel: &CancelToken,
    ) -> Result<TurnOutcome, EngineError> {
        let mut session = handle.try_begin_turn()?;
        let started = Instant::now();
        info!("Turn started in session '{}'", session.scope);

        let recalled = self.recall(&mut session, user_text, cancel).await;

        let mut draft = session.clone();
        let pinned_from = draft.transcript().len();
        draft.append(Role::User, user_text, None)?;

        let outcome = match self
            .run_rounds(&mut draft, pinned_from, recalled.as_deref(), None, cancel)
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!("Turn aborted, transcript unchanged: {}", e);
                return Err(e);
            }
        };

        // Commit: the draft becomes the session in one assignment
        let exchange = draft.transcript()[pinned_from..].to_vec();
        *session = draft;

        info!(
            "Turn finished in {:.1}s: {} rounds, {} executions, {:?}",
            started.elapsed().as_secs_f64(),
            outcome.rounds,
            outcome.executions,
            outcome.stop
        );

        self.remember(&mut session, &exchange, cancel).await;
        Ok(outcome)
    }

    /// Ask the model for an opening line. The instruction itself is not
    /// stored; the greeting becomes an assistant message.
    pub async fn greet(
        &self,
        handle: &SessionHandle,
        cancel: &CancelToken,
    ) -> Result<TurnOutcome, EngineError> {
        let mut session = handle.try_begin_turn()?;
        let mut draft = session.clone();
        let pinned_from = draft.transcript().len();
        let instruction = ChatMessage::system(format!(
            "The current date and time is {}. Greet the user warmly and briefly, then wait for their question.",
            Local::now().format("%Y-%m-%d %H:%M:%S")
        ));

        let outcome = self
            .run_rounds(&mut draft, pinned_from, None, Some(instruction), cancel)
            .await?;
        *session = draft;
        Ok(outcome)
    }

    async fn run_rounds(
        &self,
        draft: &mut Session,
        pinned_from: usize,
        recalled: Option<&str>,
        instruction: Option<ChatMessage>,
        cancel: &CancelToken,
    ) -> Result<TurnOutcome, EngineError> {
        let max_rounds = self.settings.max_rounds.max(1);
        let mut rounds = 0;
        let mut executions = 0;

        loop {
            rounds += 1;
            let prompt = self.build_prompt(draft, pinned_from, recalled, instruction.as_ref());
            debug!("Round {}/{}: {} prompt messages", rounds, max_rounds, prompt.len());

            let reply = cancellable(cancel, self.client.complete(&prompt))
                .await?
                .map_err(|e| EngineError::Upstream(e.to_string()))?;
            let assistant_ordinal = draft.append(Role::Assistant, reply.as_str(), None)?.ordinal;

            let parsed = parse_reply(&reply);
            if parsed.has_blocks() && rounds >= max_rounds {
                warn!(
                    "{}",
                    EngineError::LoopLimitExceeded(max_rounds)
                );
                return Ok(TurnOutcome {
                    reply,
                    rounds,
                    executions,
                    stop: TurnStop::LoopLimitReached,
                });
            }

            let mut fences: Vec<Fence> = parsed
                .blocks
                .iter()
                .map(Fence::Block)
                .chain(parsed.malformed.iter().map(Fence::Malformed))
                .collect();
            fences.sort_by_key(Fence::index);

            let mut ran = 0;
            for fence in fences {
                let origin = BlockRef {
                    assistant_ordinal,
                    block_index: fence.index(),
                };
                let (content, executed) = match fence {
                    Fence::Malformed(m) => {
                        warn!("Skipping malformed fence {} at line {}", m.index, m.line);
                        (tool_messages::malformed_report(m), false)
                    }
                    Fence::Block(block) => self.execute(block, cancel).await?,
                };
                if executed {
                    ran += 1;
                }
                draft.append(Role::Tool, content, Some(origin))?;
            }
            executions += ran;

            if ran == 0 {
                return Ok(TurnOutcome {
                    reply,
                    rounds,
                    executions,
                    stop: TurnStop::Completed,
                });
            }
        }
    }

    /// Run one block; returns the tool message and whether it ran
    async fn execute(
        &self,
        block: &CodeBlock,
        cancel: &CancelToken,
    ) -> Result<(String, bool), EngineError> {
        let max_chars = self.settings.tool_output_chars;
        let block = &with_detected_language(block);
        let tag = block.language.as_deref().unwrap_or_default();

        if !self.runner.supports(tag) {
            let supported = self.runner.supported_languages();
            let names: Vec<&str> = supported.iter().map(String::as_str).collect();
            info!("Not running block {}: unsupported language '{}'", block.index, tag);
            return Ok((tool_messages::unsupported_report(block, &names), false));
        }

        if !cancellable(cancel, self.approver.approve(block)).await? {
            info!("Block {} declined", block.index);
            return Ok((tool_messages::declined_report(block), false));
        }

        match self.runner.run(block, cancel).await {
            Ok(result) => Ok((
                tool_messages::execution_report(block, &result, max_chars),
                true,
            )),
            Err(SandboxError::Timeout { limit, partial }) => Ok((
                tool_messages::timeout_report(block, limit, &partial, max_chars),
                true,
            )),
            Err(SandboxError::Cancelled) => Err(EngineError::Cancelled),
            Err(SandboxError::UnsupportedLanguage(_)) => {
                let supported = self.runner.supported_languages();
                let names: Vec<&str> = supported.iter().map(String::as_str).collect();
                Ok((tool_messages::unsupported_report(block, &names), false))
            }
            Err(e) => Ok((tool_messages::spawn_failure_report(block, &e.to_string()), false)),
        }
    }

    fn build_prompt(
        &self,
        draft: &Session,
        pinned_from: usize,
        recalled: Option<&str>,
        instruction: Option<&ChatMessage>,
    ) -> Vec<ChatMessage> {
        let mut prompt = Vec::new();
        let persona = draft.system_prompt.trim();
        if persona.is_empty() {
            prompt.push(ChatMessage::system(EXECUTION_GUIDE));
        } else {
            prompt.push(ChatMessage::system(format!("{}\n\n{}", persona, EXECUTION_GUIDE)));
        }
        if let Some(recalled) = recalled {
            prompt.push(ChatMessage::system(recalled));
        }
        if let Some(instruction) = instruction {
            prompt.push(instruction.clone());
        }

        let window = WorkingMemory::with_limit(self.settings.context_tokens).window(
            &prompt,
            draft.transcript(),
            pinned_from,
        );
        prompt.extend(window.iter().map(Message::to_chat));
        prompt
    }

    /// Related memories rendered as one system message
    async fn recall(
        &self,
        session: &mut Session,
        user_text: &str,
        cancel: &CancelToken,
    ) -> Option<String> {
        let services = self.memory.as_ref()?;
        if !session.memory_active() || self.settings.top_k == 0 {
            return None;
        }

        let lookup = lookup_memories(services, user_text, self.settings.top_k);
        let hits = match cancellable(cancel, lookup).await {
            Ok(Ok(hits)) => hits,
            Ok(Err(e)) => {
                memory_failure(session, &e);
                return None;
            }
            Err(_) => return None,
        };
        if hits.is_empty() {
            return None;
        }

        debug!("Recalled {} memories", hits.len());
        let mut text = String::from(MEMORY_HEADER);
        for hit in hits {
            text.push_str("\n- ");
            text.push_str(&hit.record.text);
        }
        Some(text)
    }

    /// Store facts from a committed exchange; never fails the turn
    async fn remember(&self, session: &mut Session, exchange: &[Message], cancel: &CancelToken) {
        let Some(services) = self.memory.as_ref() else {
            return;
        };
        if !session.memory_active() {
            return;
        }

        match cancellable(cancel, store_facts(services, exchange)).await {
            Ok(Ok(0)) => debug!("Nothing new to remember"),
            Ok(Ok(n)) => info!("Stored {} new memories", n),
            Ok(Err(e)) => memory_failure(session, &e),
            Err(_) => debug!("Memory update skipped: turn cancelled"),
        }
    }
}

/// Untagged blocks take the language their source suggests
fn with_detected_language(block: &CodeBlock) -> Cow<'_, CodeBlock> {
    if block.language.is_some() {
        return Cow::Borrowed(block);
    }
    let language = Language::detect(&block.source);
    debug!("Untagged block {} treated as {}", block.index, language);
    Cow::Owned(CodeBlock {
        language: Some(language.to_string()),
        ..block.clone()
    })
}

async fn lookup_memories(
    services: &MemoryServices,
    text: &str,
    top_k: usize,
) -> Result<Vec<ScoredMemory>, MemoryError> {
    let vector = services.embedder.embed(text).await?;
    services.store.query(&vector, top_k).await
}

/// Summarize, embed and insert; returns the number of facts stored
async fn store_facts(services: &MemoryServices, exchange: &[Message]) -> Result<usize, MemoryError> {
    let facts = services.summarizer.summarize(exchange).await?;
    if facts.is_empty() {
        return Ok(0);
    }
    for fact in &facts {
        let vector = services.embedder.embed(fact).await?;
        services.store.insert(fact.clone(), vector).await?;
    }
    services.store.persist().await?;
    Ok(facts.len())
}

fn memory_failure(session: &mut Session, error: &MemoryError) {
    if error.disables_memory() {
        warn!(
            "Memory suspended for session '{}': {}",
            session.scope, error
        );
        session.memory_suspended = true;
    } else {
        warn!("Memory unavailable this turn: {}", error);
    }
}

/// Race a future against cancellation
async fn cancellable<F: Future>(cancel: &CancelToken, fut: F) -> Result<F::Output, EngineError> {
    if cancel.is_cancelled() {
        return Err(EngineError::Cancelled);
    }
    tokio::select! {
        out = fut => Ok(out),
        _ = cancel.cancelled() => Err(EngineError::Cancelled),
    }
}
