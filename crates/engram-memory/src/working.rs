//! Working-memory tier
//!
//! Short-term, cache-backed storage. Records die by TTL or by FIFO
//! capacity eviction within their context; they are never structurally
//! mutated in place.

use crate::context::{ContextManager, ContextType};
use engram_core::{meta, Error, MemoryRecord, MemoryType, Metadata, RecordId, Result, Tier};
use engram_store::CacheStore;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Configuration for the working-memory tier
#[derive(Debug, Clone)]
pub struct WorkingMemoryConfig {
    /// TTL applied when the caller does not supply one
    pub default_ttl: Duration,

    /// Maximum records per context before FIFO eviction
    pub max_context_size: usize,
}

impl Default for WorkingMemoryConfig {
    fn default() -> Self {
        Self {
            default_ttl: Duration::from_secs(60 * 60),
            max_context_size: 100,
        }
    }
}

fn record_key(id: &RecordId) -> String {
    format!("wm:rec:{}", id)
}

/// The short-term tier
pub struct WorkingMemory {
    cache: Arc<dyn CacheStore>,
    contexts: Arc<ContextManager>,
    config: WorkingMemoryConfig,
}

impl WorkingMemory {
    /// Create a working-memory tier over a cache
    pub fn new(
        cache: Arc<dyn CacheStore>,
        contexts: Arc<ContextManager>,
        config: WorkingMemoryConfig,
    ) -> Self {
        Self {
            cache,
            contexts,
            config,
        }
    }

    /// The context manager this tier binds records into
    pub fn contexts(&self) -> &Arc<ContextManager> {
        &self.contexts
    }

    /// Store a record, binding it to a context and enforcing capacity
    ///
    /// The record gets a working-tier id if it does not carry one, is
    /// bound to the explicit context (or the active conversation
    /// context, created on demand), and persists with the given TTL.
    /// If the context then exceeds capacity, the oldest records are
    /// evicted; eviction failures never fail this call.
    pub async fn store(
        &self,
        mut record: MemoryRecord,
        ttl: Option<Duration>,
        context_id: Option<&str>,
    ) -> Result<MemoryRecord> {
        record.validate()?;
        if record.id.tier() != Tier::Working {
            record.id = RecordId::mint(Tier::Working);
        }

        let context_id = match context_id {
            Some(id) => {
                if self.contexts.get_context(id).await.is_none() {
                    return Err(Error::NotFound(format!("Context not found: {}", id)));
                }
                id.to_string()
            }
            None => match self.contexts.active_context(ContextType::Conversation).await {
                Some(session) => session.id,
                None => {
                    self.contexts
                        .create_context(ContextType::Conversation, Metadata::new())
                        .await
                        .id
                }
            },
        };

        let ttl = ttl.unwrap_or(self.config.default_ttl);
        record.metadata.set(meta::CONTEXT_ID, context_id.as_str());
        record.expires_at = Some(record.created_at.plus(ttl));

        self.put_record(&record, Some(ttl)).await?;
        self.contexts.bind_record(&context_id, record.id.as_str()).await?;
        debug!("Stored working record {} in context {}", record.id, context_id);

        if let Err(e) = self.enforce_capacity(&context_id).await {
            warn!("Capacity eviction in context {} failed: {}", context_id, e);
        }

        Ok(record)
    }

    /// Get a record by id, None if absent or expired
    pub async fn get(&self, id: &RecordId) -> Result<Option<MemoryRecord>> {
        match self.cache.get(&record_key(id)).await? {
            Some(json) => Ok(Some(decode(&json)?)),
            None => Ok(None),
        }
    }

    /// Records of a context, optionally filtered by type
    ///
    /// Dead ids (expired or evicted) are pruned from the context's
    /// id-list as a side effect.
    pub async fn retrieve_by_context(
        &self,
        context_id: &str,
        memory_type: Option<MemoryType>,
    ) -> Result<Vec<MemoryRecord>> {
        let session = self
            .contexts
            .get_context(context_id)
            .await
            .ok_or_else(|| Error::NotFound(format!("Context not found: {}", context_id)))?;

        let mut live = Vec::new();
        let mut dead = Vec::new();
        for id in &session.record_ids {
            let record_id = RecordId::parse(id)?;
            match self.get(&record_id).await? {
                Some(record) => live.push(record),
                None => dead.push(id.clone()),
            }
        }
        if !dead.is_empty() {
            self.contexts.release_records(context_id, &dead).await;
        }

        if let Some(mt) = memory_type {
            live.retain(|r| r.memory_type == mt);
        }
        Ok(live)
    }

    /// Delete a record, returning whether it existed
    pub async fn delete(&self, id: &RecordId) -> Result<bool> {
        let context_id = self.context_of(id).await;
        let existed = self.cache.delete(&record_key(id)).await?;
        if let Some(context_id) = context_id {
            self.contexts
                .release_records(&context_id, &[id.as_str().to_string()])
                .await;
        }
        Ok(existed)
    }

    async fn context_of(&self, id: &RecordId) -> Option<String> {
        let record = self.get(id).await.ok()??;
        record
            .metadata
            .get_str(meta::CONTEXT_ID)
            .map(str::to_string)
    }

    async fn put_record(&self, record: &MemoryRecord, ttl: Option<Duration>) -> Result<()> {
        let json = serde_json::to_string(record)
            .map_err(|e| Error::Serialization(format!("Failed to serialize record: {}", e)))?;
        self.cache.set(&record_key(&record.id), &json, ttl).await
    }

    /// Evict the oldest records until the context fits its capacity
    async fn enforce_capacity(&self, context_id: &str) -> Result<()> {
        let live = self.retrieve_by_context(context_id, None).await?;
        if live.len() <= self.config.max_context_size {
            return Ok(());
        }

        let mut by_age = live;
        by_age.sort_by_key(|r| (r.created_at, r.id.as_str().to_string()));
        let excess = by_age.len() - self.config.max_context_size;

        let mut evicted = Vec::new();
        for record in by_age.into_iter().take(excess) {
            match self.cache.delete(&record_key(&record.id)).await {
                Ok(_) => evicted.push(record.id.as_str().to_string()),
                Err(e) => warn!("Failed to evict working record {}: {}", record.id, e),
            }
        }
        if !evicted.is_empty() {
            debug!(
                "Evicted {} records from context {}",
                evicted.len(),
                context_id
            );
            self.contexts.release_records(context_id, &evicted).await;
        }
        Ok(())
    }
}

fn decode(json: &str) -> Result<MemoryRecord> {
    serde_json::from_str(json)
        .map_err(|e| Error::Deserialization(format!("Failed to deserialize record: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ContextConfig;
    use engram_store::InMemoryCache;

    fn tier(max_context_size: usize) -> WorkingMemory {
        WorkingMemory::new(
            Arc::new(InMemoryCache::new()),
            Arc::new(ContextManager::new(ContextConfig::default())),
            WorkingMemoryConfig {
                default_ttl: Duration::from_secs(60),
                max_context_size,
            },
        )
    }

    fn observation(content: &str) -> MemoryRecord {
        MemoryRecord::new(Tier::Working, MemoryType::Observation, content)
    }

    #[tokio::test]
    async fn test_store_and_get_roundtrip() {
        let wm = tier(10);

        let stored = wm.store(observation("saw a bird"), None, None).await.unwrap();
        assert_eq!(stored.id.tier(), Tier::Working);
        assert!(stored.expires_at.is_some());

        let fetched = wm.get(&stored.id).await.unwrap().unwrap();
        assert_eq!(fetched.content, "saw a bird");
        assert_eq!(fetched.metadata.get_str(meta::CONTEXT_ID), stored.metadata.get_str(meta::CONTEXT_ID));
    }

    #[tokio::test]
    async fn test_store_creates_conversation_context_on_demand() {
        let wm = tier(10);
        assert!(wm.contexts().active_context(ContextType::Conversation).await.is_none());

        wm.store(observation("first"), None, None).await.unwrap();
        let active = wm
            .contexts()
            .active_context(ContextType::Conversation)
            .await
            .unwrap();
        assert_eq!(active.record_ids.len(), 1);
    }

    #[tokio::test]
    async fn test_store_into_unknown_context_fails() {
        let wm = tier(10);
        let err = wm
            .store(observation("x"), None, Some("ctx_missing"))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_capacity_eviction_drops_only_the_oldest() {
        let capacity = 3;
        let wm = tier(capacity);
        let ctx = wm
            .contexts()
            .create_context(ContextType::Conversation, Metadata::new())
            .await;

        let mut stored = Vec::new();
        for i in 0..=capacity {
            // Distinct created_at values so eviction order is unambiguous
            let mut record = observation(&format!("obs {}", i));
            record.created_at = engram_core::Timestamp::from_millis(1_000 + i as i64);
            stored.push(wm.store(record, None, Some(&ctx.id)).await.unwrap());
        }

        let live = wm.retrieve_by_context(&ctx.id, None).await.unwrap();
        assert_eq!(live.len(), capacity);
        assert!(live.iter().all(|r| r.id != stored[0].id));
        assert!(wm.get(&stored[0].id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_ttl_expiry_prunes_context_list() {
        let wm = tier(10);
        let ctx = wm
            .contexts()
            .create_context(ContextType::Conversation, Metadata::new())
            .await;

        wm.store(
            observation("short lived"),
            Some(Duration::from_millis(10)),
            Some(&ctx.id),
        )
        .await
        .unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;

        let live = wm.retrieve_by_context(&ctx.id, None).await.unwrap();
        assert!(live.is_empty());
        assert!(wm
            .contexts()
            .get_context(&ctx.id)
            .await
            .unwrap()
            .record_ids
            .is_empty());
    }

    #[tokio::test]
    async fn test_type_filter() {
        let wm = tier(10);
        let ctx = wm
            .contexts()
            .create_context(ContextType::Task, Metadata::new())
            .await;

        wm.store(observation("obs"), None, Some(&ctx.id)).await.unwrap();
        wm.store(
            MemoryRecord::new(Tier::Working, MemoryType::Interaction, "hello"),
            None,
            Some(&ctx.id),
        )
        .await
        .unwrap();

        let interactions = wm
            .retrieve_by_context(&ctx.id, Some(MemoryType::Interaction))
            .await
            .unwrap();
        assert_eq!(interactions.len(), 1);
        assert_eq!(interactions[0].content, "hello");
    }

    #[tokio::test]
    async fn test_delete() {
        let wm = tier(10);
        let stored = wm.store(observation("gone"), None, None).await.unwrap();

        assert!(wm.delete(&stored.id).await.unwrap());
        assert!(!wm.delete(&stored.id).await.unwrap());
        assert!(wm.get(&stored.id).await.unwrap().is_none());
    }
}
