//! Episodic-memory tier
//!
//! Mid-term storage over the durable record store, with secondary
//! id-list indexes by user and conversation kept in the cache and
//! lazily rebuilt from the store on miss.

use engram_core::{meta, MemoryRecord, MemoryType, RecordId, Result, Tier, Timestamp};
use engram_store::{CacheStore, Filter, RecordStore};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Configuration for the episodic tier
#[derive(Debug, Clone)]
pub struct EpisodicConfig {
    /// Default record lifetime; None keeps records until deleted
    pub default_ttl: Option<Duration>,

    /// Cache TTL for the secondary-index id-lists
    pub index_ttl: Duration,
}

impl Default for EpisodicConfig {
    fn default() -> Self {
        Self {
            default_ttl: Some(Duration::from_secs(30 * 24 * 60 * 60)),
            index_ttl: Duration::from_secs(5 * 60),
        }
    }
}

fn user_index_key(user_id: &str) -> String {
    format!("em:user:{}", user_id)
}

fn conversation_index_key(conversation_id: &str) -> String {
    format!("em:conv:{}", conversation_id)
}

/// The mid-term tier
pub struct EpisodicMemory {
    store: Arc<dyn RecordStore>,
    cache: Arc<dyn CacheStore>,
    config: EpisodicConfig,
}

impl EpisodicMemory {
    /// Create an episodic tier over a store and an index cache
    pub fn new(
        store: Arc<dyn RecordStore>,
        cache: Arc<dyn CacheStore>,
        config: EpisodicConfig,
    ) -> Self {
        Self {
            store,
            cache,
            config,
        }
    }

    /// Store a record, indexing it by user and conversation
    pub async fn store(
        &self,
        mut record: MemoryRecord,
        user_id: Option<&str>,
        conversation_id: Option<&str>,
    ) -> Result<MemoryRecord> {
        record.validate()?;
        if record.id.tier() != Tier::Episodic {
            record.id = RecordId::mint(Tier::Episodic);
        }
        if let Some(user) = user_id {
            record.metadata.set(meta::USER_ID, user);
        }
        if let Some(conversation) = conversation_id {
            record.metadata.set(meta::CONVERSATION_ID, conversation);
        }
        if record.expires_at.is_none() {
            record.expires_at = self.config.default_ttl.map(|ttl| record.created_at.plus(ttl));
        }

        self.store.put(&record).await?;
        debug!("Stored episodic record {}", record.id);

        if let Some(user) = record.metadata.get_str(meta::USER_ID) {
            self.index_append(&user_index_key(user), record.id.as_str())
                .await;
        }
        if let Some(conversation) = record.metadata.get_str(meta::CONVERSATION_ID) {
            self.index_append(
                &conversation_index_key(conversation),
                record.id.as_str(),
            )
            .await;
        }
        Ok(record)
    }

    /// Get a record, None if absent or past its expiry
    pub async fn get(&self, id: &RecordId) -> Result<Option<MemoryRecord>> {
        match self.store.get(id).await? {
            Some(record) if record.is_expired(Timestamp::now()) => Ok(None),
            other => Ok(other),
        }
    }

    /// Replace a stored record, None if the id is unknown
    pub async fn update(&self, mut record: MemoryRecord) -> Result<Option<MemoryRecord>> {
        record.validate()?;
        if self.store.get(&record.id).await?.is_none() {
            return Ok(None);
        }
        record.touch();
        self.store.put(&record).await?;
        Ok(Some(record))
    }

    /// Delete a record, returning whether it existed
    pub async fn delete(&self, id: &RecordId) -> Result<bool> {
        let record = self.store.get(id).await?;
        let existed = self.store.delete(id).await?;

        // Drop the cached index lists the record appeared in; they
        // rebuild lazily on the next read
        if let Some(record) = record {
            if let Some(user) = record.metadata.get_str(meta::USER_ID) {
                let _ = self.cache.delete(&user_index_key(user)).await;
            }
            if let Some(conversation) = record.metadata.get_str(meta::CONVERSATION_ID) {
                let _ = self
                    .cache
                    .delete(&conversation_index_key(conversation))
                    .await;
            }
        }
        Ok(existed)
    }

    /// All live records for a user
    pub async fn get_by_user(&self, user_id: &str) -> Result<Vec<MemoryRecord>> {
        let filter = Filter::new().meta_eq(meta::USER_ID, user_id);
        self.get_indexed(&user_index_key(user_id), &filter).await
    }

    /// All live records of a conversation
    pub async fn get_by_conversation(&self, conversation_id: &str) -> Result<Vec<MemoryRecord>> {
        let filter = Filter::new().meta_eq(meta::CONVERSATION_ID, conversation_id);
        self.get_indexed(&conversation_index_key(conversation_id), &filter)
            .await
    }

    /// Filtered query over live episodic records
    pub async fn query(&self, filter: &Filter) -> Result<Vec<MemoryRecord>> {
        let now = Timestamp::now();
        let mut records = self.store.query(filter).await?;
        records.retain(|r| r.id.tier() == Tier::Episodic && !r.is_expired(now));
        Ok(records)
    }

    /// Append a conversation message with the next message index
    ///
    /// The index is max(existing) + 1, so gaps left by deletions never
    /// cause a collision.
    pub async fn add_conversation_message(
        &self,
        user_id: &str,
        conversation_id: &str,
        content: &str,
    ) -> Result<MemoryRecord> {
        let existing = self.get_by_conversation(conversation_id).await?;
        let next_index = existing
            .iter()
            .filter_map(|r| r.metadata.get_i64(meta::MESSAGE_INDEX))
            .max()
            .map(|max| max + 1)
            .unwrap_or(0);

        let mut record = MemoryRecord::new(Tier::Episodic, MemoryType::Interaction, content);
        record.metadata.set(meta::MESSAGE_INDEX, next_index);
        self.store(record, Some(user_id), Some(conversation_id)).await
    }

    /// Drop a cached index list (it rebuilds on next read)
    pub async fn invalidate_user_index(&self, user_id: &str) -> Result<bool> {
        self.cache.delete(&user_index_key(user_id)).await
    }

    /// Fetch records through a cached id-list, rebuilding it on miss
    async fn get_indexed(&self, index_key: &str, filter: &Filter) -> Result<Vec<MemoryRecord>> {
        let ids = match self.load_index(index_key).await {
            Some(ids) => ids,
            None => {
                let records = self.store.query(filter).await?;
                let ids: Vec<String> = records
                    .iter()
                    .map(|r| r.id.as_str().to_string())
                    .collect();
                self.save_index(index_key, &ids).await;
                debug!("Rebuilt index {} with {} ids", index_key, ids.len());
                ids
            }
        };

        let now = Timestamp::now();
        let mut live = Vec::new();
        let mut stale = false;
        for id in &ids {
            let record_id = RecordId::parse(id)?;
            match self.store.get(&record_id).await? {
                Some(record) if !record.is_expired(now) => live.push(record),
                _ => stale = true,
            }
        }
        if stale {
            let remaining: Vec<String> =
                live.iter().map(|r| r.id.as_str().to_string()).collect();
            self.save_index(index_key, &remaining).await;
        }
        Ok(live)
    }

    async fn load_index(&self, key: &str) -> Option<Vec<String>> {
        let json = self.cache.get(key).await.ok()??;
        serde_json::from_str(&json).ok()
    }

    /// Index writes are an accelerator; failures degrade to rebuilds
    async fn save_index(&self, key: &str, ids: &[String]) {
        match serde_json::to_string(ids) {
            Ok(json) => {
                if let Err(e) = self
                    .cache
                    .set(key, &json, Some(self.config.index_ttl))
                    .await
                {
                    warn!("Failed to cache index {}: {}", key, e);
                }
            }
            Err(e) => warn!("Failed to encode index {}: {}", key, e),
        }
    }

    async fn index_append(&self, key: &str, id: &str) {
        let mut ids = self.load_index(key).await.unwrap_or_default();
        if !ids.iter().any(|existing| existing == id) {
            ids.push(id.to_string());
        }
        self.save_index(key, &ids).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use engram_core::MemoryRecordBuilder;
    use engram_store::{InMemoryCache, InMemoryStore};

    fn tier() -> EpisodicMemory {
        EpisodicMemory::new(
            Arc::new(InMemoryStore::new()),
            Arc::new(InMemoryCache::new()),
            EpisodicConfig::default(),
        )
    }

    fn interaction(content: &str) -> MemoryRecord {
        MemoryRecord::new(Tier::Episodic, MemoryType::Interaction, content)
    }

    #[tokio::test]
    async fn test_store_get_roundtrip() {
        let em = tier();

        let stored = em
            .store(interaction("hello"), Some("u1"), Some("c1"))
            .await
            .unwrap();
        assert_eq!(stored.id.tier(), Tier::Episodic);
        assert!(stored.expires_at.is_some());

        let fetched = em.get(&stored.id).await.unwrap().unwrap();
        assert_eq!(fetched.metadata.get_str(meta::USER_ID), Some("u1"));
        assert_eq!(fetched.metadata.get_str(meta::CONVERSATION_ID), Some("c1"));
    }

    #[tokio::test]
    async fn test_expired_record_reads_as_none() {
        let em = tier();
        let mut record = interaction("old");
        record.created_at = Timestamp::from_millis(1_000);
        record.expires_at = Some(Timestamp::from_millis(2_000));

        let stored = em.store(record, Some("u1"), None).await.unwrap();
        assert!(em.get(&stored.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_user_index_and_lazy_rebuild() {
        let em = tier();
        em.store(interaction("a"), Some("u1"), None).await.unwrap();
        em.store(interaction("b"), Some("u1"), None).await.unwrap();
        em.store(interaction("c"), Some("u2"), None).await.unwrap();

        assert_eq!(em.get_by_user("u1").await.unwrap().len(), 2);

        // Blow the cached list away; the next read rebuilds from the store
        assert!(em.invalidate_user_index("u1").await.unwrap());
        assert_eq!(em.get_by_user("u1").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_delete_invalidates_indexes() {
        let em = tier();
        let stored = em
            .store(interaction("bye"), Some("u1"), Some("c1"))
            .await
            .unwrap();

        assert!(em.delete(&stored.id).await.unwrap());
        assert!(!em.delete(&stored.id).await.unwrap());
        assert!(em.get_by_user("u1").await.unwrap().is_empty());
        assert!(em.get_by_conversation("c1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_message_index_increments_and_tolerates_gaps() {
        let em = tier();

        let first = em
            .add_conversation_message("u1", "c1", "first")
            .await
            .unwrap();
        let second = em
            .add_conversation_message("u1", "c1", "second")
            .await
            .unwrap();
        assert_eq!(first.metadata.get_i64(meta::MESSAGE_INDEX), Some(0));
        assert_eq!(second.metadata.get_i64(meta::MESSAGE_INDEX), Some(1));

        // Delete the newest; the next index still moves past the gap
        em.delete(&second.id).await.unwrap();
        let third = em
            .add_conversation_message("u1", "c1", "third")
            .await
            .unwrap();
        assert_eq!(third.metadata.get_i64(meta::MESSAGE_INDEX), Some(1));

        em.delete(&first.id).await.unwrap();
        let fourth = em
            .add_conversation_message("u1", "c1", "fourth")
            .await
            .unwrap();
        assert_eq!(fourth.metadata.get_i64(meta::MESSAGE_INDEX), Some(2));
    }

    #[tokio::test]
    async fn test_update() {
        let em = tier();
        let stored = em.store(interaction("draft"), Some("u1"), None).await.unwrap();

        let mut changed = stored.clone();
        changed.content = "final".to_string();
        let updated = em.update(changed).await.unwrap().unwrap();
        assert_eq!(updated.content, "final");
        assert!(updated.updated_at >= stored.updated_at);

        let ghost = MemoryRecordBuilder::new(Tier::Episodic, MemoryType::Interaction, "ghost")
            .build()
            .unwrap();
        assert!(em.update(ghost).await.unwrap().is_none());
    }
}
