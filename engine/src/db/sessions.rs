//! Session transcript persistence
//!
//! A session is stored per character scope as its memory flag plus the
//! ordered transcript. Saving replaces the whole transcript in one
//! transaction so a crash never leaves a half-written turn on disk.

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};

use tera_sdk::types::{BlockRef, Message, Role};

/// What `load` returns
#[derive(Debug, Clone)]
pub struct StoredSession {
    pub memory_enabled: bool,
    pub messages: Vec<Message>,
}

/// Repository for session transcripts
#[derive(Clone)]
pub struct SessionRepository {
    pool: SqlitePool,
}

impl SessionRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Replace the stored session for `scope`
    pub async fn save(&self, scope: &str, memory_enabled: bool, messages: &[Message]) -> Result<()> {
        let now = Utc::now().timestamp();
        let mut tx = self
            .pool
            .begin()
            .await
            .context("Failed to begin session transaction")?;

        sqlx::query(
            r#"
            INSERT INTO sessions (scope, memory_enabled, updated_at) VALUES (?, ?, ?)
            ON CONFLICT(scope) DO UPDATE SET
                memory_enabled = excluded.memory_enabled,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(scope)
        .bind(memory_enabled)
        .bind(now)
        .execute(&mut *tx)
        .await
        .context("Failed to save session")?;

        sqlx::query("DELETE FROM session_messages WHERE scope = ?")
            .bind(scope)
            .execute(&mut *tx)
            .await
            .context("Failed to clear session messages")?;

        for msg in messages {
            if msg.role == Role::System {
                return Err(anyhow!("system messages are never part of a transcript"));
            }
            sqlx::query(
                r#"
                INSERT INTO session_messages
                    (scope, ordinal, role, content, origin_ordinal, origin_block, created_at)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(scope)
            .bind(msg.ordinal as i64)
            .bind(msg.role.as_str())
            .bind(&msg.content)
            .bind(msg.origin.map(|o| o.assistant_ordinal as i64))
            .bind(msg.origin.map(|o| o.block_index as i64))
            .bind(msg.created_at.timestamp_millis())
            .execute(&mut *tx)
            .await
            .context("Failed to save session message")?;
        }

        tx.commit().await.context("Failed to commit session")?;
        Ok(())
    }

    /// Load the stored session for `scope`, if any
    pub async fn load(&self, scope: &str) -> Result<Option<StoredSession>> {
        let Some(row) = sqlx::query("SELECT memory_enabled FROM sessions WHERE scope = ?")
            .bind(scope)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to load session")?
        else {
            return Ok(None);
        };
        let memory_enabled: bool = row.get("memory_enabled");

        let rows = sqlx::query(
            r#"
            SELECT ordinal, role, content, origin_ordinal, origin_block, created_at
            FROM session_messages
            WHERE scope = ?
            ORDER BY ordinal ASC
            "#,
        )
        .bind(scope)
        .fetch_all(&self.pool)
        .await
        .context("Failed to load session messages")?;

        let mut messages = Vec::with_capacity(rows.len());
        for row in rows {
            let role: String = row.get("role");
            let role: Role = role.parse().map_err(|e: String| anyhow!(e))?;
            let origin_ordinal: Option<i64> = row.get("origin_ordinal");
            let origin_block: Option<i64> = row.get("origin_block");
            let origin = match (origin_ordinal, origin_block) {
                (Some(o), Some(b)) => Some(BlockRef {
                    assistant_ordinal: o as u64,
                    block_index: b as usize,
                }),
                _ => None,
            };
            let created_ms: i64 = row.get("created_at");
            let created_at = DateTime::from_timestamp_millis(created_ms)
                .ok_or_else(|| anyhow!("invalid message timestamp {}", created_ms))?;
            let ordinal: i64 = row.get("ordinal");

            messages.push(Message {
                ordinal: ordinal as u64,
                role,
                content: row.get("content"),
                origin,
                created_at,
            });
        }

        Ok(Some(StoredSession {
            memory_enabled,
            messages,
        }))
    }

    /// Forget the stored session for `scope`
    pub async fn delete(&self, scope: &str) -> Result<()> {
        sqlx::query("DELETE FROM session_messages WHERE scope = ?")
            .bind(scope)
            .execute(&self.pool)
            .await
            .context("Failed to delete session messages")?;
        sqlx::query("DELETE FROM sessions WHERE scope = ?")
            .bind(scope)
            .execute(&self.pool)
            .await
            .context("Failed to delete session")?;
        Ok(())
    }
}
