//! Memory store persistence
//!
//! Raw storage for vector memory scopes. Rows come back undecoded; the
//! vector store validates dimensions and encodings so that damage is
//! reported as a corrupt store rather than a database failure.

use anyhow::{Context, Result};
use sqlx::{Row, SqlitePool};

/// One stored memory row, embedding still encoded
#[derive(Debug, Clone)]
pub struct RawMemoryRow {
    pub id: i64,
    pub text: String,
    /// Little-endian f32 values
    pub embedding: Vec<u8>,
    pub created_at: i64,
}

/// A scope as found on disk
#[derive(Debug, Clone)]
pub struct StoredScope {
    /// `None` when records exist without a usable meta row
    pub dimension: Option<i64>,
    pub metric: Option<String>,
    pub next_id: i64,
    pub rows: Vec<RawMemoryRow>,
}

/// Encode an embedding for storage
pub fn encode_embedding(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|v| v.to_le_bytes()).collect()
}

/// Decode a stored embedding; `None` if the byte length is not a whole
/// number of f32 values
pub fn decode_embedding(bytes: &[u8]) -> Option<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        return None;
    }
    Some(
        bytes
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect(),
    )
}

/// Repository for memory scopes
#[derive(Clone)]
pub struct MemoryRepository {
    pool: SqlitePool,
}

impl MemoryRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Load a scope; `Ok(None)` when nothing was ever stored for it
    pub async fn load_scope(&self, scope: &str) -> Result<Option<StoredScope>> {
        let meta = sqlx::query("SELECT dimension, metric, next_id FROM memory_meta WHERE scope = ?")
            .bind(scope)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to read memory meta")?;

        let rows = sqlx::query(
            "SELECT id, text, embedding, created_at FROM memory_records WHERE scope = ? ORDER BY id ASC",
        )
        .bind(scope)
        .fetch_all(&self.pool)
        .await
        .context("Failed to read memory records")?;

        let rows: Vec<RawMemoryRow> = rows
            .into_iter()
            .map(|row| RawMemoryRow {
                id: row.get("id"),
                text: row.get("text"),
                embedding: row.get("embedding"),
                created_at: row.get("created_at"),
            })
            .collect();

        match meta {
            Some(meta) => Ok(Some(StoredScope {
                dimension: meta.get("dimension"),
                metric: Some(meta.get("metric")),
                next_id: meta.get("next_id"),
                rows,
            })),
            None if rows.is_empty() => Ok(None),
            None => {
                let next_id = rows.iter().map(|r| r.id).max().unwrap_or(0) + 1;
                Ok(Some(StoredScope {
                    dimension: None,
                    metric: None,
                    next_id,
                    rows,
                }))
            }
        }
    }

    /// Replace everything stored for `scope` in one transaction
    pub async fn replace_scope(
        &self,
        scope: &str,
        dimension: usize,
        metric: &str,
        next_id: u64,
        rows: &[RawMemoryRow],
    ) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        let mut tx = self
            .pool
            .begin()
            .await
            .context("Failed to begin memory transaction")?;

        sqlx::query("DELETE FROM memory_records WHERE scope = ?")
            .bind(scope)
            .execute(&mut *tx)
            .await
            .context("Failed to clear memory records")?;

        sqlx::query(
            r#"
            INSERT INTO memory_meta (scope, dimension, metric, next_id, updated_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(scope) DO UPDATE SET
                dimension = excluded.dimension,
                metric = excluded.metric,
                next_id = excluded.next_id,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(scope)
        .bind(dimension as i64)
        .bind(metric)
        .bind(next_id as i64)
        .bind(now)
        .execute(&mut *tx)
        .await
        .context("Failed to write memory meta")?;

        for row in rows {
            sqlx::query(
                "INSERT INTO memory_records (scope, id, text, embedding, created_at) VALUES (?, ?, ?, ?, ?)",
            )
            .bind(scope)
            .bind(row.id)
            .bind(&row.text)
            .bind(&row.embedding)
            .bind(row.created_at)
            .execute(&mut *tx)
            .await
            .context("Failed to write memory record")?;
        }

        tx.commit().await.context("Failed to commit memory")?;
        Ok(())
    }

    /// Drop a scope entirely
    pub async fn delete_scope(&self, scope: &str) -> Result<()> {
        sqlx::query("DELETE FROM memory_records WHERE scope = ?")
            .bind(scope)
            .execute(&self.pool)
            .await
            .context("Failed to delete memory records")?;
        sqlx::query("DELETE FROM memory_meta WHERE scope = ?")
            .bind(scope)
            .execute(&self.pool)
            .await
            .context("Failed to delete memory meta")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedding_codec() {
        let v = vec![0.5f32, -1.25, 3.0];
        let bytes = encode_embedding(&v);
        assert_eq!(bytes.len(), 12);
        assert_eq!(decode_embedding(&bytes).unwrap(), v);
    }

    #[test]
    fn test_decode_rejects_partial_float() {
        assert!(decode_embedding(&[0, 0, 128]).is_none());
        assert_eq!(decode_embedding(&[]).unwrap(), Vec::<f32>::new());
    }
}
