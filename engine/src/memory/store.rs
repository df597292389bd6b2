//! Linear-scan vector store
//!
//! Records live in insertion order in a `VecDeque`, so FIFO eviction is a
//! pop from the front and ids grow monotonically from front to back. Every
//! query scores every record; at personal-assistant scale (thousands of
//! records) that is a few milliseconds.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use tera_sdk::types::{MemoryRecord, ScoredMemory};

use super::{Metric, MemoryError, VectorMemory};
use crate::db::memory::{decode_embedding, encode_embedding, RawMemoryRow};
use crate::db::MemoryRepository;

#[derive(Debug)]
struct Inner {
    records: VecDeque<MemoryRecord>,
    next_id: u64,
}

impl Inner {
    fn empty() -> Self {
        Self {
            records: VecDeque::new(),
            next_id: 1,
        }
    }

    fn evict_to(&mut self, max_records: usize) -> usize {
        let mut evicted = 0;
        while self.records.len() > max_records {
            self.records.pop_front();
            evicted += 1;
        }
        evicted
    }
}

/// Exhaustive nearest-neighbour store for one memory scope
pub struct VectorStore {
    scope: String,
    dimension: usize,
    metric: Metric,
    capacity: usize,
    inner: RwLock<Inner>,
    backend: Option<MemoryRepository>,
    persist_lock: Mutex<()>,
    // Set when the stored scope could not be read; persisting would wipe it
    unreadable: AtomicBool,
}

impl VectorStore {
    /// Create an empty store. With no backend, `persist`/`load` are no-ops.
    pub fn new(
        scope: impl Into<String>,
        dimension: usize,
        metric: Metric,
        capacity: usize,
        backend: Option<MemoryRepository>,
    ) -> Self {
        Self {
            scope: scope.into(),
            dimension,
            metric,
            capacity,
            inner: RwLock::new(Inner::empty()),
            backend,
            persist_lock: Mutex::new(()),
            unreadable: AtomicBool::new(false),
        }
    }

    /// Create a store and load its scope.
    ///
    /// A scope that cannot be read (corrupt, or written with another
    /// dimension) is an error; the stored records are left untouched so the
    /// caller can run without memory and the user can still switch back.
    pub async fn open(
        scope: impl Into<String>,
        dimension: usize,
        metric: Metric,
        capacity: usize,
        backend: MemoryRepository,
    ) -> Result<Self, MemoryError> {
        let store = Self::new(scope, dimension, metric, capacity, Some(backend));
        match store.load().await {
            Ok(count) => {
                info!("Loaded {} memory records for '{}'", count, store.scope);
                Ok(store)
            }
            Err(e) => {
                warn!("Memory for '{}' could not be loaded: {}", store.scope, e);
                Err(e)
            }
        }
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn check_dimension(&self, len: usize) -> Result<(), MemoryError> {
        if len != self.dimension {
            return Err(MemoryError::DimensionMismatch {
                expected: self.dimension,
                actual: len,
            });
        }
        Ok(())
    }

    async fn read_backend(&self, backend: &MemoryRepository) -> Result<Inner, MemoryError> {
        let stored = backend
            .load_scope(&self.scope)
            .await
            .map_err(|e| MemoryError::Storage(format!("{:#}", e)))?;
        let Some(stored) = stored else {
            return Ok(Inner::empty());
        };

        let dimension = stored
            .dimension
            .ok_or_else(|| MemoryError::CorruptStore("stored dimension is missing".into()))?;
        if dimension <= 0 {
            return Err(MemoryError::CorruptStore(format!(
                "stored dimension {} is invalid",
                dimension
            )));
        }
        if dimension as usize != self.dimension {
            return Err(MemoryError::DimensionMismatch {
                expected: self.dimension,
                actual: dimension as usize,
            });
        }
        if let Some(metric) = stored.metric.as_deref() {
            if metric != self.metric.as_str() {
                warn!(
                    "Memory for '{}' was written with metric {}, searching with {}",
                    self.scope, metric, self.metric
                );
            }
        }

        let records = self.decode_rows(stored.rows)?;
        let max_id = records.back().map(|r| r.id).unwrap_or(0);
        let mut inner = Inner {
            records,
            next_id: (stored.next_id.max(0) as u64).max(max_id + 1),
        };
        inner.evict_to(self.capacity);
        Ok(inner)
    }

    fn decode_rows(&self, rows: Vec<RawMemoryRow>) -> Result<VecDeque<MemoryRecord>, MemoryError> {
        let mut records = VecDeque::with_capacity(rows.len());
        let mut last_id = 0i64;
        for row in rows {
            if row.id <= last_id {
                return Err(MemoryError::CorruptStore(format!(
                    "record ids out of order at {}",
                    row.id
                )));
            }
            last_id = row.id;
            let embedding = decode_embedding(&row.embedding).ok_or_else(|| {
                MemoryError::CorruptStore(format!("unreadable embedding in record {}", row.id))
            })?;
            if embedding.len() != self.dimension {
                return Err(MemoryError::CorruptStore(format!(
                    "record {} has {} values, expected {}",
                    row.id,
                    embedding.len(),
                    self.dimension
                )));
            }
            let created_at = DateTime::<Utc>::from_timestamp_millis(row.created_at)
                .ok_or_else(|| {
                    MemoryError::CorruptStore(format!("bad timestamp in record {}", row.id))
                })?;
            records.push_back(MemoryRecord {
                id: row.id as u64,
                embedding,
                text: row.text,
                created_at,
            });
        }
        Ok(records)
    }
}

#[async_trait]
impl VectorMemory for VectorStore {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn metric(&self) -> Metric {
        self.metric
    }

    async fn insert(&self, text: String, embedding: Vec<f32>) -> Result<MemoryRecord, MemoryError> {
        self.check_dimension(embedding.len())?;

        let mut inner = self.inner.write().await;
        let record = MemoryRecord {
            id: inner.next_id,
            embedding,
            text,
            created_at: Utc::now(),
        };
        inner.next_id += 1;
        inner.records.push_back(record.clone());
        let evicted = inner.evict_to(self.capacity);
        if evicted > 0 {
            debug!("Evicted {} oldest memory records", evicted);
        }
        Ok(record)
    }

    async fn query(&self, vector: &[f32], k: usize) -> Result<Vec<ScoredMemory>, MemoryError> {
        let inner = self.inner.read().await;
        if k == 0 || inner.records.is_empty() {
            return Ok(Vec::new());
        }
        self.check_dimension(vector.len())?;

        let mut scored: Vec<(f32, &MemoryRecord)> = inner
            .records
            .iter()
            .map(|r| (self.metric.score(vector, &r.embedding), r))
            .collect();
        scored.sort_by(|(sa, ra), (sb, rb)| sb.total_cmp(sa).then(rb.id.cmp(&ra.id)));

        Ok(scored
            .into_iter()
            .take(k)
            .map(|(score, record)| ScoredMemory {
                record: record.clone(),
                score,
            })
            .collect())
    }

    async fn prune(&self, max_records: usize) -> usize {
        self.inner.write().await.evict_to(max_records)
    }

    async fn clear(&self) {
        let mut inner = self.inner.write().await;
        inner.records.clear();
    }

    async fn len(&self) -> usize {
        self.inner.read().await.records.len()
    }

    async fn records(&self) -> Vec<MemoryRecord> {
        self.inner.read().await.records.iter().cloned().collect()
    }

    async fn persist(&self) -> Result<(), MemoryError> {
        let Some(backend) = &self.backend else {
            return Ok(());
        };
        if self.unreadable.load(Ordering::Acquire) {
            return Err(MemoryError::Storage(format!(
                "memory for '{}' was not loaded, refusing to overwrite it",
                self.scope
            )));
        }
        let _guard = self.persist_lock.lock().await;

        let (rows, next_id) = {
            let inner = self.inner.read().await;
            let rows: Vec<RawMemoryRow> = inner
                .records
                .iter()
                .map(|r| RawMemoryRow {
                    id: r.id as i64,
                    text: r.text.clone(),
                    embedding: encode_embedding(&r.embedding),
                    created_at: r.created_at.timestamp_millis(),
                })
                .collect();
            (rows, inner.next_id)
        };

        backend
            .replace_scope(&self.scope, self.dimension, self.metric.as_str(), next_id, &rows)
            .await
            .map_err(|e| MemoryError::Storage(format!("{:#}", e)))?;
        debug!("Persisted {} memory records for '{}'", rows.len(), self.scope);
        Ok(())
    }

    async fn load(&self) -> Result<usize, MemoryError> {
        let Some(backend) = &self.backend else {
            return Ok(0);
        };

        let loaded = self.read_backend(backend).await;
        let mut inner = self.inner.write().await;
        match loaded {
            Ok(fresh) => {
                *inner = fresh;
                self.unreadable.store(false, Ordering::Release);
                Ok(inner.records.len())
            }
            Err(e) => {
                *inner = Inner::empty();
                self.unreadable.store(true, Ordering::Release);
                Err(e)
            }
        }
    }
}
