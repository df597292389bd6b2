//! Conversation session
//!
//! A `Session` is a plain value: the caller owns it and the driver turns
//! `(Session, input)` into `(Session', reply)`. Concurrent access goes
//! through a `SessionHandle`, whose lock is held for the whole turn.
//!
//! Transcript invariants, checked on every append and on load:
//! - ordinals start at 1 and increase by exactly one
//! - only user, assistant and tool messages are stored
//! - every tool message points at one earlier assistant message and at a
//!   fence that exists in it; no other message carries an origin

use chrono::Utc;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info};

use tera_sdk::errors::EngineError;
use tera_sdk::types::{BlockRef, Message, Role};

use crate::db::SessionRepository;
use crate::response_parser::parse_reply;

#[derive(Debug, Clone)]
pub struct Session {
    /// Persistence key, one per character
    pub scope: String,
    pub system_prompt: String,
    pub memory_enabled: bool,
    /// Set when the memory store failed in a way that makes it untrustworthy;
    /// lasts until the process exits
    pub memory_suspended: bool,
    transcript: Vec<Message>,
}

impl Session {
    pub fn new(scope: impl Into<String>, system_prompt: impl Into<String>, memory_enabled: bool) -> Self {
        Self {
            scope: scope.into(),
            system_prompt: system_prompt.into(),
            memory_enabled,
            memory_suspended: false,
            transcript: Vec::new(),
        }
    }

    /// Rebuild a session from stored messages, rejecting broken transcripts
    pub fn restore(
        scope: impl Into<String>,
        system_prompt: impl Into<String>,
        memory_enabled: bool,
        messages: Vec<Message>,
    ) -> Result<Self, EngineError> {
        let mut session = Self::new(scope, system_prompt, memory_enabled);
        session.transcript = messages;
        session.validate()?;
        Ok(session)
    }

    pub fn transcript(&self) -> &[Message] {
        &self.transcript
    }

    pub fn next_ordinal(&self) -> u64 {
        self.transcript.last().map(|m| m.ordinal + 1).unwrap_or(1)
    }

    /// Memory is consulted only when enabled and not suspended
    pub fn memory_active(&self) -> bool {
        self.memory_enabled && !self.memory_suspended
    }

    /// Drop the transcript, keeping settings
    pub fn reset(&mut self) {
        self.transcript.clear();
    }

    /// Append a message, assigning the next ordinal
    pub fn append(
        &mut self,
        role: Role,
        content: impl Into<String>,
        origin: Option<BlockRef>,
    ) -> Result<&Message, EngineError> {
        let message = Message {
            ordinal: self.next_ordinal(),
            role,
            content: content.into(),
            origin,
            created_at: Utc::now(),
        };
        check_message(&self.transcript, &message)?;
        self.transcript.push(message);
        Ok(&self.transcript[self.transcript.len() - 1])
    }

    /// Re-check every transcript invariant
    pub fn validate(&self) -> Result<(), EngineError> {
        for (i, message) in self.transcript.iter().enumerate() {
            check_message(&self.transcript[..i], message)?;
        }
        Ok(())
    }
}

fn check_message(before: &[Message], message: &Message) -> Result<(), EngineError> {
    let expected = before.last().map(|m| m.ordinal + 1).unwrap_or(1);
    if message.ordinal != expected {
        return Err(EngineError::InvalidTranscript(format!(
            "ordinal {} where {} was expected",
            message.ordinal, expected
        )));
    }

    match (message.role, message.origin) {
        (Role::System, _) => Err(EngineError::InvalidTranscript(format!(
            "system message at ordinal {}",
            message.ordinal
        ))),
        (Role::Tool, None) => Err(EngineError::InvalidTranscript(format!(
            "tool message {} has no originating block",
            message.ordinal
        ))),
        (Role::Tool, Some(origin)) => {
            // ordinals are gap-free, so the position is ordinal - 1
            let source = origin
                .assistant_ordinal
                .checked_sub(1)
                .and_then(|idx| before.get(idx as usize))
                .filter(|m| m.role == Role::Assistant);
            let Some(source) = source else {
                return Err(EngineError::InvalidTranscript(format!(
                    "tool message {} refers to {} which is not an earlier assistant message",
                    message.ordinal, origin.assistant_ordinal
                )));
            };
            if origin.block_index >= parse_reply(&source.content).fence_count() {
                return Err(EngineError::InvalidTranscript(format!(
                    "tool message {} refers to missing block {} of message {}",
                    message.ordinal, origin.block_index, origin.assistant_ordinal
                )));
            }
            Ok(())
        }
        (_, Some(_)) => Err(EngineError::InvalidTranscript(format!(
            "{} message {} carries a block origin",
            message.role, message.ordinal
        ))),
        (_, None) => Ok(()),
    }
}

/// Shared, turn-locked access to a session
#[derive(Debug, Clone)]
pub struct SessionHandle {
    inner: Arc<Mutex<Session>>,
}

impl SessionHandle {
    pub fn new(session: Session) -> Self {
        Self {
            inner: Arc::new(Mutex::new(session)),
        }
    }

    /// Take the turn lock without waiting; a turn already in progress makes
    /// this fail with `SessionBusy`
    pub fn try_begin_turn(&self) -> Result<OwnedMutexGuard<Session>, EngineError> {
        Arc::clone(&self.inner)
            .try_lock_owned()
            .map_err(|_| EngineError::SessionBusy)
    }

    /// Wait for the session (used outside turns: saving, inspecting)
    pub async fn lock(&self) -> OwnedMutexGuard<Session> {
        Arc::clone(&self.inner).lock_owned().await
    }
}

/// Resume the stored session for `scope`, or start a fresh one
pub async fn load_session(
    repo: &SessionRepository,
    scope: &str,
    system_prompt: &str,
    default_memory_enabled: bool,
) -> Result<Session, EngineError> {
    let stored = repo
        .load(scope)
        .await
        .map_err(|e| EngineError::Database(format!("{:#}", e)))?;
    match stored {
        Some(stored) => {
            info!(
                "Resumed session '{}' with {} messages",
                scope,
                stored.messages.len()
            );
            Session::restore(scope, system_prompt, stored.memory_enabled, stored.messages)
        }
        None => {
            debug!("No stored session for '{}'", scope);
            Ok(Session::new(scope, system_prompt, default_memory_enabled))
        }
    }
}

/// Flush the session's transcript and memory flag
pub async fn save_session(repo: &SessionRepository, session: &Session) -> Result<(), EngineError> {
    repo.save(&session.scope, session.memory_enabled, session.transcript())
        .await
        .map_err(|e| EngineError::Database(format!("{:#}", e)))?;
    debug!(
        "Saved session '{}' ({} messages)",
        session.scope,
        session.transcript().len()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> Session {
        Session::new("default", "You are Tera.", false)
    }

    #[test]
    fn test_append_assigns_gap_free_ordinals() {
        let mut s = session();
        assert_eq!(s.append(Role::User, "hi", None).unwrap().ordinal, 1);
        assert_eq!(s.append(Role::Assistant, "hello", None).unwrap().ordinal, 2);
        assert_eq!(s.next_ordinal(), 3);
    }

    #[test]
    fn test_tool_message_needs_block_in_assistant() {
        let mut s = session();
        s.append(Role::User, "run it", None).unwrap();
        s.append(Role::Assistant, "```python\nprint(1)\n```", None)
            .unwrap();

        let ok = BlockRef {
            assistant_ordinal: 2,
            block_index: 0,
        };
        assert!(s.append(Role::Tool, "1", Some(ok)).is_ok());

        let missing_block = BlockRef {
            assistant_ordinal: 2,
            block_index: 1,
        };
        assert!(matches!(
            s.append(Role::Tool, "?", Some(missing_block)),
            Err(EngineError::InvalidTranscript(_))
        ));

        let not_assistant = BlockRef {
            assistant_ordinal: 1,
            block_index: 0,
        };
        assert!(s.append(Role::Tool, "?", Some(not_assistant)).is_err());
        assert!(s.append(Role::Tool, "?", None).is_err());
        assert_eq!(s.transcript().len(), 3);
    }

    #[test]
    fn test_origin_only_on_tool_messages() {
        let mut s = session();
        s.append(Role::Assistant, "```sh\nls\n```", None).unwrap();
        let origin = BlockRef {
            assistant_ordinal: 1,
            block_index: 0,
        };
        assert!(s.append(Role::User, "x", Some(origin)).is_err());
        assert!(s.append(Role::System, "x", None).is_err());
    }

    #[test]
    fn test_restore_rejects_gaps() {
        let now = Utc::now();
        let messages = vec![
            Message {
                ordinal: 1,
                role: Role::User,
                content: "a".into(),
                origin: None,
                created_at: now,
            },
            Message {
                ordinal: 3,
                role: Role::Assistant,
                content: "b".into(),
                origin: None,
                created_at: now,
            },
        ];
        assert!(Session::restore("default", "", false, messages).is_err());
    }

    #[test]
    fn test_try_begin_turn_fails_fast_when_busy() {
        let handle = SessionHandle::new(session());
        let guard = handle.try_begin_turn().unwrap();
        assert!(matches!(
            handle.try_begin_turn(),
            Err(EngineError::SessionBusy)
        ));
        drop(guard);
        assert!(handle.try_begin_turn().is_ok());
    }

    #[test]
    fn test_memory_active_respects_suspension() {
        let mut s = Session::new("default", "", true);
        assert!(s.memory_active());
        s.memory_suspended = true;
        assert!(!s.memory_active());
    }
}
