//! In-memory backing store
//!
//! Reference implementation of [`RecordStore`] used by tests and
//! embedded callers that do not need durability.

use crate::backend::{Filter, RecordStore, VectorHit};
use crate::embeddings::find_top_k;
use async_trait::async_trait;
use engram_core::{MemoryRecord, RecordId, Result};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// In-memory record store
pub struct InMemoryStore {
    records: RwLock<HashMap<RecordId, MemoryRecord>>,
}

impl InMemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RecordStore for InMemoryStore {
    async fn put(&self, record: &MemoryRecord) -> Result<()> {
        self.records
            .write()
            .await
            .insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn get(&self, id: &RecordId) -> Result<Option<MemoryRecord>> {
        Ok(self.records.read().await.get(id).cloned())
    }

    async fn delete(&self, id: &RecordId) -> Result<bool> {
        Ok(self.records.write().await.remove(id).is_some())
    }

    async fn query(&self, filter: &Filter) -> Result<Vec<MemoryRecord>> {
        let compiled = filter.compile()?;
        let records = self.records.read().await;

        let mut matches: Vec<MemoryRecord> = records
            .values()
            .filter(|r| compiled.matches(r))
            .cloned()
            .collect();

        // Stable order for callers that page through results
        matches.sort_by_key(|r| (r.created_at, r.id.as_str().to_string()));

        if let Some(limit) = filter.limit {
            matches.truncate(limit);
        }
        Ok(matches)
    }

    async fn vector_search(&self, embedding: &[f32], limit: usize) -> Result<Vec<VectorHit>> {
        let records = self.records.read().await;
        let hits = find_top_k(embedding, records.values().cloned(), limit, |r| {
            r.embedding.clone()
        });

        Ok(hits
            .into_iter()
            .map(|s| VectorHit {
                record: s.item,
                score: s.score,
            })
            .collect())
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.records.read().await.len())
    }

    async fn flush(&self) -> Result<()> {
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}
