//! Knowledge-base tier
//!
//! Long-term, categorized storage. Records get a far-future default
//! expiry, an embedding for similarity search when the provider is
//! healthy, and per-category id-list indexes with the same lazy
//! rebuild pattern as the episodic tier.

use engram_core::{
    meta, Error, MemoryRecord, MemoryType, RecordId, Result, Tier, Timestamp, Value,
};
use engram_store::{CacheStore, EmbeddingProvider, Filter, RecordStore, VectorHit};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Configuration for the knowledge tier
#[derive(Debug, Clone)]
pub struct KnowledgeConfig {
    /// Default record lifetime (near-permanent)
    pub default_expiry: Duration,

    /// Cache TTL for the per-category id-lists
    pub index_ttl: Duration,
}

impl Default for KnowledgeConfig {
    fn default() -> Self {
        Self {
            default_expiry: Duration::from_secs(10 * 365 * 24 * 60 * 60),
            index_ttl: Duration::from_secs(5 * 60),
        }
    }
}

/// Metadata keys on relationship records
mod rel_meta {
    pub const SOURCE: &str = "relation_source";
    pub const TARGET: &str = "relation_target";
    pub const RELATION_TYPE: &str = "relation_type";
}

fn category_index_key(category: &str) -> String {
    format!("kb:cat:{}", category)
}

/// The long-term tier
pub struct KnowledgeBase {
    store: Arc<dyn RecordStore>,
    cache: Arc<dyn CacheStore>,
    embeddings: Arc<dyn EmbeddingProvider>,
    config: KnowledgeConfig,
}

impl KnowledgeBase {
    /// Create a knowledge tier
    pub fn new(
        store: Arc<dyn RecordStore>,
        cache: Arc<dyn CacheStore>,
        embeddings: Arc<dyn EmbeddingProvider>,
        config: KnowledgeConfig,
    ) -> Self {
        Self {
            store,
            cache,
            embeddings,
            config,
        }
    }

    /// Store a record under categories
    ///
    /// An embedding is requested for later similarity search; provider
    /// failure degrades to storing without one (the text fallback in
    /// the integration engine still applies).
    pub async fn store(
        &self,
        mut record: MemoryRecord,
        categories: &[String],
    ) -> Result<MemoryRecord> {
        record.validate()?;
        if record.id.tier() != Tier::Knowledge {
            record.id = RecordId::mint(Tier::Knowledge);
        }
        if record.expires_at.is_none() {
            record.expires_at = Some(record.created_at.plus(self.config.default_expiry));
        }
        if !categories.is_empty() {
            record
                .metadata
                .set(meta::CATEGORIES, categories.to_vec());
        }
        if record.embedding.is_none() {
            match self.embeddings.embed(&record.content).await {
                Ok(embedding) => record.embedding = Some(embedding),
                Err(e) => warn!("Embedding for {} unavailable: {}", record.id, e),
            }
        }

        self.store.put(&record).await?;
        debug!("Stored knowledge record {}", record.id);

        for category in categories {
            self.index_append(&category_index_key(category), record.id.as_str())
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

        if let Some(record) = record {
            for category in record_categories(&record) {
                let _ = self.cache.delete(&category_index_key(&category)).await;
            }
        }
        Ok(existed)
    }

    /// Live records of a category
    pub async fn get_by_category(&self, category: &str) -> Result<Vec<MemoryRecord>> {
        let index_key = category_index_key(category);
        let ids = match self.load_index(&index_key).await {
            Some(ids) => ids,
            None => {
                let filter = Filter::new().meta_has(meta::CATEGORIES, category);
                let records = self.store.query(&filter).await?;
                let ids: Vec<String> = records
                    .iter()
                    .map(|r| r.id.as_str().to_string())
                    .collect();
                self.save_index(&index_key, &ids).await;
                debug!("Rebuilt category index {} with {} ids", category, ids.len());
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
            self.save_index(&index_key, &remaining).await;
        }
        Ok(live)
    }

    /// Filtered query over live knowledge records
    pub async fn query(&self, filter: &Filter) -> Result<Vec<MemoryRecord>> {
        let now = Timestamp::now();
        let mut records = self.store.query(filter).await?;
        records.retain(|r| r.id.tier() == Tier::Knowledge && !r.is_expired(now));
        Ok(records)
    }

    /// Raise a record's priority level, stamping the reinforcement count
    pub async fn reinforce(&self, id: &RecordId) -> Result<Option<MemoryRecord>> {
        let Some(mut record) = self.get(id).await? else {
            return Ok(None);
        };
        record.priority = record.priority.raised();
        let count = record
            .metadata
            .get_i64(meta::REINFORCEMENT_COUNT)
            .unwrap_or(0);
        record.metadata.set(meta::REINFORCEMENT_COUNT, count + 1);
        record.touch();
        self.store.put(&record).await?;
        Ok(Some(record))
    }

    /// Lower a record's priority level, stamping the decay count
    pub async fn decay(&self, id: &RecordId) -> Result<Option<MemoryRecord>> {
        let Some(mut record) = self.get(id).await? else {
            return Ok(None);
        };
        record.priority = record.priority.lowered();
        let count = record.metadata.get_i64(meta::DECAY_COUNT).unwrap_or(0);
        record.metadata.set(meta::DECAY_COUNT, count + 1);
        record.touch();
        self.store.put(&record).await?;
        Ok(Some(record))
    }

    /// Create a directed relationship between two knowledge records
    ///
    /// Fails with NotFound if either endpoint is missing. Writes a
    /// Relationship record and a symmetric back-reference into both
    /// endpoints' metadata.
    pub async fn create_relationship(
        &self,
        source_id: &RecordId,
        target_id: &RecordId,
        relation_type: &str,
        metadata: engram_core::Metadata,
    ) -> Result<MemoryRecord> {
        let mut source = self
            .get(source_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Record not found: {}", source_id)))?;
        let mut target = self
            .get(target_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Record not found: {}", target_id)))?;

        let content = format!("{} -[{}]-> {}", source_id, relation_type, target_id);
        let mut relationship =
            MemoryRecord::new(Tier::Knowledge, MemoryType::Relationship, &content);
        relationship.metadata = metadata;
        relationship
            .metadata
            .set(rel_meta::SOURCE, source_id.as_str());
        relationship
            .metadata
            .set(rel_meta::TARGET, target_id.as_str());
        relationship
            .metadata
            .set(rel_meta::RELATION_TYPE, relation_type);
        relationship.expires_at =
            Some(relationship.created_at.plus(self.config.default_expiry));
        self.store.put(&relationship).await?;

        source.metadata.push(
            meta::RELATIONSHIPS,
            back_reference(&relationship.id, target_id, relation_type, "out"),
        );
        source.touch();
        self.store.put(&source).await?;

        target.metadata.push(
            meta::RELATIONSHIPS,
            back_reference(&relationship.id, source_id, relation_type, "in"),
        );
        target.touch();
        self.store.put(&target).await?;

        debug!(
            "Created {} relationship {} between {} and {}",
            relation_type, relationship.id, source_id, target_id
        );
        Ok(relationship)
    }

    /// Relationship records touching a record, in either direction
    pub async fn get_relationships(&self, id: &RecordId) -> Result<Vec<MemoryRecord>> {
        let outgoing = self
            .store
            .query(
                &Filter::new()
                    .memory_type(MemoryType::Relationship)
                    .meta_eq(rel_meta::SOURCE, id.as_str()),
            )
            .await?;
        let incoming = self
            .store
            .query(
                &Filter::new()
                    .memory_type(MemoryType::Relationship)
                    .meta_eq(rel_meta::TARGET, id.as_str()),
            )
            .await?;

        let mut all = outgoing;
        for record in incoming {
            if !all.iter().any(|r| r.id == record.id) {
                all.push(record);
            }
        }
        Ok(all)
    }

    /// Vector-similarity search seeded from a text query
    ///
    /// Embedding failure degrades to an empty result rather than
    /// failing the caller.
    pub async fn find_similar(&self, text: &str, limit: usize) -> Result<Vec<VectorHit>> {
        let embedding = match self.embeddings.embed(text).await {
            Ok(embedding) => embedding,
            Err(e) => {
                warn!("Similarity query embedding unavailable: {}", e);
                return Ok(Vec::new());
            }
        };
        self.store.vector_search(&embedding, limit).await
    }

    async fn load_index(&self, key: &str) -> Option<Vec<String>> {
        let json = self.cache.get(key).await.ok()??;
        serde_json::from_str(&json).ok()
    }

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

fn record_categories(record: &MemoryRecord) -> Vec<String> {
    record
        .metadata
        .get(meta::CATEGORIES)
        .and_then(Value::as_array)
        .map(|arr| {
            arr.iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

fn back_reference(
    relationship_id: &RecordId,
    peer_id: &RecordId,
    relation_type: &str,
    direction: &str,
) -> Value {
    Value::Map(
        [
            (
                "relationship_id".to_string(),
                Value::from(relationship_id.as_str()),
            ),
            ("peer_id".to_string(), Value::from(peer_id.as_str())),
            ("relation_type".to_string(), Value::from(relation_type)),
            ("direction".to_string(), Value::from(direction)),
        ]
        .into(),
    )
}
