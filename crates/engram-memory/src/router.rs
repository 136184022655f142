//! Memory router
//!
//! Top-level façade over the three tiers. Routes new records to the
//! right tier, probes tiers in order on reads (strengthening on a
//! hit), fans searches out concurrently, and threads the rule engine
//! into relevance queries.

use crate::episodic::EpisodicMemory;
use crate::integration::{IntegrationEngine, IntegrationReport};
use crate::knowledge::KnowledgeBase;
use crate::profile::{AttributeKind, UserProfileManager};
use crate::reinforcement::ReinforcementEngine;
use crate::working::WorkingMemory;
use engram_core::{
    meta, MemoryRecord, MemoryType, Metadata, RecordId, Result, Tier, Timestamp, Value,
};
use engram_rules::RuleEngine;
use engram_store::Filter;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Context key rules write relevant record ids into
pub const RELEVANT_MEMORIES_KEY: &str = "relevant_memories";

/// Request to create a memory
#[derive(Debug, Clone)]
pub struct NewMemory {
    pub content: String,
    pub memory_type: MemoryType,
    pub importance: f64,
    pub confidence: f64,
    pub tags: Vec<String>,
    pub metadata: Metadata,
    pub user_id: Option<String>,
    pub conversation_id: Option<String>,
    pub context_id: Option<String>,
    pub categories: Vec<String>,
    pub preference_name: Option<String>,
    pub ttl: Option<Duration>,
}

impl NewMemory {
    /// Start a request with defaults
    pub fn new(memory_type: MemoryType, content: &str) -> Self {
        Self {
            content: content.to_string(),
            memory_type,
            importance: 0.5,
            confidence: 1.0,
            tags: Vec::new(),
            metadata: Metadata::new(),
            user_id: None,
            conversation_id: None,
            context_id: None,
            categories: Vec::new(),
            preference_name: None,
            ttl: None,
        }
    }

    pub fn importance(mut self, importance: f64) -> Self {
        self.importance = importance;
        self
    }

    pub fn confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence;
        self
    }

    pub fn tag<T: Into<String>>(mut self, tag: T) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn metadata<K: Into<String>, V: Into<Value>>(mut self, key: K, value: V) -> Self {
        self.metadata.set(key, value);
        self
    }

    pub fn user<T: Into<String>>(mut self, user_id: T) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn conversation<T: Into<String>>(mut self, conversation_id: T) -> Self {
        self.conversation_id = Some(conversation_id.into());
        self
    }

    pub fn context<T: Into<String>>(mut self, context_id: T) -> Self {
        self.context_id = Some(context_id.into());
        self
    }

    pub fn category<T: Into<String>>(mut self, category: T) -> Self {
        self.categories.push(category.into());
        self
    }

    pub fn preference_name<T: Into<String>>(mut self, name: T) -> Self {
        self.preference_name = Some(name.into());
        self
    }

    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }
}

/// Partial update applied to a stored memory
#[derive(Debug, Clone, Default)]
pub struct MemoryPatch {
    pub content: Option<String>,
    pub importance: Option<f64>,
    pub confidence: Option<f64>,
    pub add_tags: Vec<String>,
    pub metadata: Metadata,
}

impl MemoryPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn content<T: Into<String>>(mut self, content: T) -> Self {
        self.content = Some(content.into());
        self
    }

    pub fn importance(mut self, importance: f64) -> Self {
        self.importance = Some(importance);
        self
    }

    pub fn confidence(mut self, confidence: f64) -> Self {
        self.confidence = Some(confidence);
        self
    }

    pub fn tag<T: Into<String>>(mut self, tag: T) -> Self {
        self.add_tags.push(tag.into());
        self
    }

    pub fn metadata<K: Into<String>, V: Into<Value>>(mut self, key: K, value: V) -> Self {
        self.metadata.set(key, value);
        self
    }
}

/// Search request
#[derive(Debug, Clone)]
pub struct SearchQuery {
    pub query: String,
    pub memory_type: Option<MemoryType>,
    pub tags: Vec<String>,
    pub limit: usize,
    pub threshold: f64,
}

impl SearchQuery {
    pub fn new(query: &str) -> Self {
        Self {
            query: query.to_string(),
            memory_type: None,
            tags: Vec::new(),
            limit: 10,
            threshold: 0.0,
        }
    }

    pub fn memory_type(mut self, memory_type: MemoryType) -> Self {
        self.memory_type = Some(memory_type);
        self
    }

    pub fn tag<T: Into<String>>(mut self, tag: T) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }
}

/// A search hit with its ranking components
#[derive(Debug, Clone)]
pub struct ScoredMemory {
    pub record: MemoryRecord,
    pub relevance: f64,
    pub score: f64,
}

/// Per-tier statistics
#[derive(Debug, Clone, Default)]
pub struct TierStatistics {
    pub records: usize,
    pub average_strength: f64,
    pub oldest: Option<Timestamp>,
    pub newest: Option<Timestamp>,
}

impl TierStatistics {
    fn from_records(records: &[MemoryRecord]) -> Self {
        if records.is_empty() {
            return Self::default();
        }
        Self {
            records: records.len(),
            average_strength: records.iter().map(|r| r.strength()).sum::<f64>()
                / records.len() as f64,
            oldest: records.iter().map(|r| r.created_at).min(),
            newest: records.iter().map(|r| r.created_at).max(),
        }
    }
}

/// Statistics across all tiers
#[derive(Debug, Clone, Default)]
pub struct MemoryStatistics {
    pub working: TierStatistics,
    pub episodic: TierStatistics,
    pub knowledge: TierStatistics,
}

/// The top-level memory façade
pub struct MemoryRouter {
    working: Arc<WorkingMemory>,
    episodic: Arc<EpisodicMemory>,
    knowledge: Arc<KnowledgeBase>,
    profiles: Arc<UserProfileManager>,
    reinforcement: Arc<ReinforcementEngine>,
    integration: Arc<IntegrationEngine>,
    rules: Arc<RuleEngine>,
}

impl MemoryRouter {
    /// Assemble a router from its parts
    pub fn new(
        working: Arc<WorkingMemory>,
        episodic: Arc<EpisodicMemory>,
        knowledge: Arc<KnowledgeBase>,
        profiles: Arc<UserProfileManager>,
        reinforcement: Arc<ReinforcementEngine>,
        integration: Arc<IntegrationEngine>,
        rules: Arc<RuleEngine>,
    ) -> Self {
        Self {
            working,
            episodic,
            knowledge,
            profiles,
            reinforcement,
            integration,
            rules,
        }
    }

    /// A fully in-memory engine with default configuration
    pub fn in_memory() -> Self {
        use crate::context::{ContextConfig, ContextManager};
        use crate::episodic::EpisodicConfig;
        use crate::integration::IntegrationConfig;
        use crate::knowledge::KnowledgeConfig;
        use crate::reinforcement::ReinforcementConfig;
        use crate::working::WorkingMemoryConfig;
        use engram_store::{
            HashEmbeddingProvider, InMemoryCache, InMemoryStore, TruncatingSummarizer,
        };

        let store = Arc::new(InMemoryStore::new());
        let cache = Arc::new(InMemoryCache::new());
        let contexts = Arc::new(ContextManager::new(ContextConfig::default()));

        let working = Arc::new(WorkingMemory::new(
            cache.clone(),
            contexts,
            WorkingMemoryConfig::default(),
        ));
        let episodic = Arc::new(EpisodicMemory::new(
            store.clone(),
            cache.clone(),
            EpisodicConfig::default(),
        ));
        let knowledge = Arc::new(KnowledgeBase::new(
            store.clone(),
            cache,
            Arc::new(HashEmbeddingProvider::new(128)),
            KnowledgeConfig::default(),
        ));
        let profiles = Arc::new(UserProfileManager::new(episodic.clone()));
        let reinforcement = Arc::new(ReinforcementEngine::new(
            store.clone(),
            ReinforcementConfig::default(),
        ));
        let integration = Arc::new(IntegrationEngine::new(
            store.clone(),
            Arc::new(TruncatingSummarizer),
            IntegrationConfig::default(),
        ));
        let rules = Arc::new(RuleEngine::new(store));

        Self::new(
            working,
            episodic,
            knowledge,
            profiles,
            reinforcement,
            integration,
            rules,
        )
    }

    /// The rule engine (rule CRUD and evaluation)
    pub fn rules(&self) -> &Arc<RuleEngine> {
        &self.rules
    }

    /// The profile manager
    pub fn profiles(&self) -> &Arc<UserProfileManager> {
        &self.profiles
    }

    /// The reinforcement engine (background decay control)
    pub fn reinforcement(&self) -> &Arc<ReinforcementEngine> {
        &self.reinforcement
    }

    /// Which tier a record of this type and importance belongs in
    pub fn select_tier(memory_type: MemoryType, importance: f64) -> Tier {
        match memory_type {
            MemoryType::Observation | MemoryType::Interaction => Tier::Working,
            MemoryType::Summary | MemoryType::Preference => Tier::Episodic,
            _ if (0.3..0.7).contains(&importance) => Tier::Episodic,
            _ => Tier::Knowledge,
        }
    }

    // ========== Exposed operations ==========

    /// Create a memory, routing it to the right tier
    pub async fn create_memory(&self, request: NewMemory) -> Result<MemoryRecord> {
        let mut record = MemoryRecord::new(
            Tier::Working, // re-minted by the owning tier
            request.memory_type,
            &request.content,
        );
        record.confidence = engram_core::clamp_unit(request.confidence);
        record.set_importance(request.importance);
        for tag in &request.tags {
            record.add_tag(tag.clone());
        }
        record.metadata.merge(request.metadata.clone());

        let tier = Self::select_tier(request.memory_type, request.importance);
        debug!("Routing {} memory to {:?}", request.memory_type, tier);

        match tier {
            Tier::Working => {
                let stored = self
                    .working
                    .store(record, request.ttl, request.context_id.as_deref())
                    .await?;

                // High-importance short-term records also land in the
                // episodic tier. Best-effort: the working copy is
                // authoritative and a failed second write only warns.
                if request.importance >= 0.7 {
                    let mut copy = stored.clone();
                    copy.metadata.set(meta::SOURCE, stored.id.as_str());
                    // The copy is the mid-term survivor; the working
                    // TTL must not ride along
                    copy.expires_at = None;
                    if let Err(e) = self
                        .episodic
                        .store(
                            copy,
                            request.user_id.as_deref(),
                            request.conversation_id.as_deref(),
                        )
                        .await
                    {
                        warn!("Dual-write of {} to episodic failed: {}", stored.id, e);
                    }
                }
                Ok(stored)
            }
            Tier::Episodic => {
                let stored = self
                    .episodic
                    .store(
                        record,
                        request.user_id.as_deref(),
                        request.conversation_id.as_deref(),
                    )
                    .await?;

                if request.memory_type == MemoryType::Preference {
                    if let (Some(user), Some(name)) =
                        (&request.user_id, &request.preference_name)
                    {
                        if let Err(e) = self
                            .profiles
                            .set_attribute(
                                user,
                                name,
                                AttributeKind::Preference,
                                Value::from(request.content.as_str()),
                                request.confidence,
                            )
                            .await
                        {
                            warn!("Profile update for {} failed: {}", user, e);
                        }
                    }
                }
                Ok(stored)
            }
            Tier::Knowledge => self.knowledge.store(record, &request.categories).await,
        }
    }

    /// Get a memory, probing the tiers in order
    ///
    /// A hit strengthens the record as a side effect; strengthening
    /// failures never fail the read.
    pub async fn get_memory(&self, id: &RecordId) -> Result<Option<MemoryRecord>> {
        let Some(record) = self.probe(id).await? else {
            return Ok(None);
        };

        match self.reinforcement.strengthen(id, false).await {
            Ok(Some(strengthened)) => Ok(Some(strengthened)),
            Ok(None) => Ok(Some(record)),
            Err(e) => {
                warn!("Strengthen on read of {} failed: {}", id, e);
                Ok(Some(record))
            }
        }
    }

    /// Update a memory, re-deriving its tier from the patched state
    ///
    /// If the patch moves the record across tiers it is re-stored in
    /// the new tier (under a fresh tier-tagged id) and removed from
    /// the old one.
    pub async fn update_memory(
        &self,
        id: &RecordId,
        patch: MemoryPatch,
    ) -> Result<Option<MemoryRecord>> {
        let Some(mut record) = self.probe(id).await? else {
            return Ok(None);
        };
        let current_tier = record.id.tier();

        if let Some(content) = patch.content {
            record.content = content;
        }
        if let Some(importance) = patch.importance {
            record.set_importance(importance);
        }
        if let Some(confidence) = patch.confidence {
            record.set_confidence(confidence);
        }
        for tag in patch.add_tags {
            record.add_tag(tag);
        }
        record.metadata.merge(patch.metadata);
        record.validate()?;

        let target_tier = Self::select_tier(record.memory_type, record.importance());
        if target_tier == current_tier {
            return match current_tier {
                Tier::Working => {
                    let context_id = record
                        .metadata
                        .get_str(meta::CONTEXT_ID)
                        .map(str::to_string);
                    self.working.delete(&record.id).await?;
                    Ok(Some(
                        self.working
                            .store(record, None, context_id.as_deref())
                            .await?,
                    ))
                }
                Tier::Episodic => self.episodic.update(record).await,
                Tier::Knowledge => self.knowledge.update(record).await,
            };
        }

        debug!(
            "Update moves {} from {:?} to {:?}",
            id, current_tier, target_tier
        );
        self.delete_from_tier(id, current_tier).await?;
        let moved = match target_tier {
            Tier::Working => self.working.store(record, None, None).await?,
            Tier::Episodic => self.episodic.store(record, None, None).await?,
            Tier::Knowledge => self.knowledge.store(record, &[]).await?,
        };
        Ok(Some(moved))
    }

    /// Delete a memory from the tier its id names
    pub async fn delete_memory(&self, id: &RecordId) -> Result<bool> {
        self.delete_from_tier(id, id.tier()).await
    }

    /// Search all tiers concurrently, dedup by id, rank
    ///
    /// Ranking is 0.4·importance + 0.3·strength + 0.3·relevance.
    pub async fn search_memories(&self, query: SearchQuery) -> Result<Vec<ScoredMemory>> {
        let filter = build_filter(&query);
        let fetch = query.limit.max(10) * 2;

        let (working, episodic, knowledge, similar) = futures::join!(
            self.search_working(&query),
            self.episodic.query(&filter),
            self.knowledge.query(&filter),
            self.knowledge.find_similar(&query.query, fetch),
        );

        // Tier failures degrade to empty partial results
        let mut candidates: Vec<MemoryRecord> = Vec::new();
        let mut vector_scores: HashMap<String, f64> = HashMap::new();
        match working {
            Ok(records) => candidates.extend(records),
            Err(e) => warn!("Working-tier search failed: {}", e),
        }
        match episodic {
            Ok(records) => candidates.extend(records),
            Err(e) => warn!("Episodic-tier search failed: {}", e),
        }
        match knowledge {
            Ok(records) => candidates.extend(records),
            Err(e) => warn!("Knowledge-tier search failed: {}", e),
        }
        // Stored rules live in the knowledge tier but are not memories
        if query.memory_type != Some(MemoryType::Rule) {
            candidates.retain(|r| r.memory_type != MemoryType::Rule);
        }

        match similar {
            Ok(hits) => {
                let type_filter = query.memory_type;
                for hit in hits {
                    if let Some(mt) = type_filter {
                        if hit.record.memory_type != mt {
                            continue;
                        }
                    }
                    vector_scores
                        .insert(hit.record.id.as_str().to_string(), f64::from(hit.score));
                    candidates.push(hit.record);
                }
            }
            Err(e) => warn!("Vector search failed: {}", e),
        }

        let mut seen: HashMap<String, ScoredMemory> = HashMap::new();
        for record in candidates {
            let relevance = vector_scores
                .get(record.id.as_str())
                .copied()
                .unwrap_or_else(|| text_relevance(&query.query, &record.content));
            if relevance < query.threshold {
                continue;
            }
            let score =
                0.4 * record.importance() + 0.3 * record.strength() + 0.3 * relevance;
            let id = record.id.as_str().to_string();
            let entry = ScoredMemory {
                record,
                relevance,
                score,
            };
            match seen.get(&id) {
                Some(existing) if existing.score >= entry.score => {}
                _ => {
                    seen.insert(id, entry);
                }
            }
        }

        let mut ranked: Vec<ScoredMemory> = seen.into_values().collect();
        ranked.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.record.id.as_str().cmp(b.record.id.as_str()))
        });
        ranked.truncate(query.limit);
        Ok(ranked)
    }

    /// Relevance query for a reasoning step
    ///
    /// Searches with a query derived from the context's string values,
    /// then runs the rule pass; rules can append record ids under
    /// `relevant_memories` in the context, and those records join the
    /// result at full relevance.
    pub async fn get_relevant_memories(
        &self,
        context: &Metadata,
        limit: usize,
        threshold: f64,
    ) -> Result<Vec<ScoredMemory>> {
        let query_text = context_query_text(context);
        let mut results = self
            .search_memories(
                SearchQuery::new(&query_text)
                    .limit(limit)
                    .threshold(threshold),
            )
            .await?;

        let mut rule_context = context.clone();
        match self.rules.evaluate_rules(&mut rule_context).await {
            Ok(matches) => {
                if !matches.is_empty() {
                    debug!("Relevance pass matched {} rules", matches.len());
                }
            }
            Err(e) => warn!("Rule pass during relevance query failed: {}", e),
        }

        if let Some(ids) = rule_context
            .get(RELEVANT_MEMORIES_KEY)
            .and_then(Value::as_array)
        {
            for value in ids {
                let Some(raw) = value.as_str() else { continue };
                let Ok(id) = RecordId::parse(raw) else {
                    warn!("Rule produced malformed record id: {}", raw);
                    continue;
                };
                if let Some(existing) = results.iter_mut().find(|s| s.record.id == id) {
                    existing.relevance = 1.0;
                    existing.score = 0.4 * existing.record.importance()
                        + 0.3 * existing.record.strength()
                        + 0.3;
                    continue;
                }
                if let Some(record) = self.probe(&id).await? {
                    let score = 0.4 * record.importance() + 0.3 * record.strength() + 0.3;
                    results.push(ScoredMemory {
                        record,
                        relevance: 1.0,
                        score,
                    });
                }
            }
        }

        results.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        results.truncate(limit);
        Ok(results)
    }

    /// Strengthen a memory by id
    pub async fn strengthen_memory(&self, id: &RecordId) -> Result<Option<MemoryRecord>> {
        self.reinforcement.strengthen(id, false).await
    }

    /// Decay a memory by id
    pub async fn decay_memory(&self, id: &RecordId) -> Result<Option<MemoryRecord>> {
        Ok(self
            .reinforcement
            .decay(id)
            .await?
            .map(|outcome| outcome.record))
    }

    /// Current strength of a memory
    pub async fn get_memory_strength(&self, id: &RecordId) -> Result<Option<f64>> {
        self.reinforcement.get_strength(id).await
    }

    /// Cluster and integrate a set of records
    pub async fn integrate_memories(
        &self,
        records: Vec<MemoryRecord>,
    ) -> Result<IntegrationReport> {
        self.integration.integrate_memories(records).await
    }

    /// Summarize a group of records
    pub async fn summarize_memories(&self, records: &[MemoryRecord]) -> String {
        self.integration.summarize_memories(records).await
    }

    /// Statistics across all tiers
    pub async fn get_statistics(&self) -> Result<MemoryStatistics> {
        let mut working_records = Vec::new();
        for context_id in self.working.contexts().all_context_ids().await {
            match self.working.retrieve_by_context(&context_id, None).await {
                Ok(records) => working_records.extend(records),
                Err(e) => warn!("Statistics scan of context {} failed: {}", context_id, e),
            }
        }
        let episodic = self.episodic.query(&Filter::new()).await?;
        let knowledge = self.knowledge.query(&Filter::new()).await?;

        Ok(MemoryStatistics {
            working: TierStatistics::from_records(&working_records),
            episodic: TierStatistics::from_records(&episodic),
            knowledge: TierStatistics::from_records(&knowledge),
        })
    }

    // ========== Internals ==========

    /// Probe the tiers in order without side effects
    async fn probe(&self, id: &RecordId) -> Result<Option<MemoryRecord>> {
        if let Some(record) = self.working.get(id).await? {
            return Ok(Some(record));
        }
        if let Some(record) = self.episodic.get(id).await? {
            return Ok(Some(record));
        }
        self.knowledge.get(id).await
    }

    async fn delete_from_tier(&self, id: &RecordId, tier: Tier) -> Result<bool> {
        match tier {
            Tier::Working => self.working.delete(id).await,
            Tier::Episodic => self.episodic.delete(id).await,
            Tier::Knowledge => self.knowledge.delete(id).await,
        }
    }

    async fn search_working(&self, query: &SearchQuery) -> Result<Vec<MemoryRecord>> {
        let mut records = Vec::new();
        for context_id in self.working.contexts().all_context_ids().await {
            records.extend(
                self.working
                    .retrieve_by_context(&context_id, query.memory_type)
                    .await?,
            );
        }
        if !query.tags.is_empty() {
            records.retain(|r| query.tags.iter().all(|t| r.has_tag(t)));
        }
        Ok(records)
    }
}

fn build_filter(query: &SearchQuery) -> Filter {
    let mut filter = Filter::new();
    if let Some(mt) = query.memory_type {
        filter = filter.memory_type(mt);
    }
    for tag in &query.tags {
        filter = filter.tag(tag.clone());
    }
    filter
}

/// Word-overlap relevance between a query and record content
fn text_relevance(query: &str, content: &str) -> f64 {
    let query_words: std::collections::HashSet<String> = query
        .split_whitespace()
        .map(str::to_lowercase)
        .collect();
    let content_words: std::collections::HashSet<String> = content
        .split_whitespace()
        .map(str::to_lowercase)
        .collect();
    if query_words.is_empty() || content_words.is_empty() {
        return 0.0;
    }
    let intersection = query_words.intersection(&content_words).count() as f64;
    let union = query_words.union(&content_words).count() as f64;
    intersection / union
}

/// Concatenate a context's string values into a query, keyed order
fn context_query_text(context: &Metadata) -> String {
    let mut pairs: Vec<(&String, &str)> = context
        .iter()
        .filter_map(|(k, v)| v.as_str().map(|s| (k, s)))
        .collect();
    pairs.sort_by(|a, b| a.0.cmp(b.0));
    pairs
        .into_iter()
        .map(|(_, v)| v)
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use engram_rules::{Action, ActionType, Condition, ConditionOp, Rule};

    fn router() -> MemoryRouter {
        MemoryRouter::in_memory()
    }

    #[test]
    fn test_tier_selection() {
        assert_eq!(
            MemoryRouter::select_tier(MemoryType::Observation, 0.9),
            Tier::Working
        );
        assert_eq!(
            MemoryRouter::select_tier(MemoryType::Interaction, 0.1),
            Tier::Working
        );
        assert_eq!(
            MemoryRouter::select_tier(MemoryType::Summary, 0.9),
            Tier::Episodic
        );
        assert_eq!(
            MemoryRouter::select_tier(MemoryType::Preference, 0.1),
            Tier::Episodic
        );
        assert_eq!(
            MemoryRouter::select_tier(MemoryType::Fact, 0.5),
            Tier::Episodic
        );
        assert_eq!(
            MemoryRouter::select_tier(MemoryType::Fact, 0.9),
            Tier::Knowledge
        );
        assert_eq!(
            MemoryRouter::select_tier(MemoryType::Fact, 0.1),
            Tier::Knowledge
        );
    }

    #[tokio::test]
    async fn test_create_and_get_roundtrip() {
        let router = router();

        let created = router
            .create_memory(
                NewMemory::new(MemoryType::Fact, "water is wet")
                    .importance(0.9)
                    .confidence(0.8)
                    .tag("liquids")
                    .metadata("source", "conversation"),
            )
            .await
            .unwrap();
        assert_eq!(created.id.tier(), Tier::Knowledge);

        let fetched = router.get_memory(&created.id).await.unwrap().unwrap();
        assert_eq!(fetched.content, "water is wet");
        assert_eq!(fetched.confidence, 0.8);
        assert_eq!(fetched.importance(), 0.9);
        assert!(fetched.has_tag("liquids"));
        assert_eq!(fetched.metadata.get_str("source"), Some("conversation"));
    }

    #[tokio::test]
    async fn test_get_strengthens_on_hit() {
        let router = router();
        let created = router
            .create_memory(NewMemory::new(MemoryType::Fact, "strong fact").importance(0.9))
            .await
            .unwrap();

        let fetched = router.get_memory(&created.id).await.unwrap().unwrap();
        assert!(fetched.strength() > 0.0);
        assert_eq!(fetched.metadata.get_i64(meta::STRENGTH_COUNT), Some(1));
    }

    #[tokio::test]
    async fn test_observation_routes_to_working() {
        let router = router();
        let created = router
            .create_memory(NewMemory::new(MemoryType::Observation, "saw a bird").importance(0.2))
            .await
            .unwrap();
        assert_eq!(created.id.tier(), Tier::Working);
        assert!(router.get_memory(&created.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_high_importance_observation_dual_writes() {
        let router = router();
        router
            .create_memory(
                NewMemory::new(MemoryType::Observation, "urgent observation")
                    .importance(0.9)
                    .user("u1"),
            )
            .await
            .unwrap();

        // The episodic copy is indexed under the user
        let copies = router.episodic.get_by_user("u1").await.unwrap();
        assert_eq!(copies.len(), 1);
        assert_eq!(copies[0].content, "urgent observation");
        assert_eq!(copies[0].id.tier(), Tier::Episodic);
        assert!(copies[0].metadata.get_str(meta::SOURCE).is_some());
    }

    #[tokio::test]
    async fn test_dual_write_copy_outlives_working_ttl() {
        let router = router();
        let original = router
            .create_memory(
                NewMemory::new(MemoryType::Observation, "urgent observation")
                    .importance(0.9)
                    .user("u1"),
            )
            .await
            .unwrap();

        // The working record expires on the working-tier TTL (1 hour)
        let working_expiry = original.expires_at.unwrap();
        assert!(working_expiry <= original.created_at.plus(Duration::from_secs(3600)));

        // The episodic copy carries the episodic default (30 days),
        // not the working TTL it was cloned with
        let copy = &router.episodic.get_by_user("u1").await.unwrap()[0];
        let copy_expiry = copy.expires_at.unwrap();
        assert!(copy_expiry > copy.created_at.plus(Duration::from_secs(24 * 3600)));
        assert!(copy_expiry > working_expiry);
    }

    #[tokio::test]
    async fn test_preference_updates_profile() {
        let router = router();
        router
            .create_memory(
                NewMemory::new(MemoryType::Preference, "dark")
                    .user("u1")
                    .preference_name("theme"),
            )
            .await
            .unwrap();

        let attr = router
            .profiles()
            .get_attribute("u1", "theme", AttributeKind::Preference)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(attr.value.as_str(), Some("dark"));
    }

    #[tokio::test]
    async fn test_update_in_place_and_across_tiers() {
        let router = router();
        let created = router
            .create_memory(NewMemory::new(MemoryType::Fact, "movable fact").importance(0.5))
            .await
            .unwrap();
        assert_eq!(created.id.tier(), Tier::Episodic);

        // In-place update
        let updated = router
            .update_memory(&created.id, MemoryPatch::new().content("still episodic"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.id, created.id);
        assert_eq!(updated.content, "still episodic");

        // Importance change re-derives the tier
        let moved = router
            .update_memory(&created.id, MemoryPatch::new().importance(0.9))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(moved.id.tier(), Tier::Knowledge);
        assert!(router.episodic.get(&created.id).await.unwrap().is_none());
        assert!(router.get_memory(&moved.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_missing_ids_return_none_or_false() {
        let router = router();
        let ghost = RecordId::mint(Tier::Knowledge);

        assert!(router.get_memory(&ghost).await.unwrap().is_none());
        assert!(router
            .update_memory(&ghost, MemoryPatch::new().content("x"))
            .await
            .unwrap()
            .is_none());
        assert!(!router.delete_memory(&ghost).await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_any_tier() {
        let router = router();
        let wm = router
            .create_memory(NewMemory::new(MemoryType::Observation, "short"))
            .await
            .unwrap();
        let kb = router
            .create_memory(NewMemory::new(MemoryType::Fact, "long").importance(0.9))
            .await
            .unwrap();

        assert!(router.delete_memory(&wm.id).await.unwrap());
        assert!(router.delete_memory(&kb.id).await.unwrap());
        assert!(router.get_memory(&kb.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_search_ranks_and_dedups() {
        let router = router();
        router
            .create_memory(
                NewMemory::new(MemoryType::Fact, "rust ownership rules").importance(0.9),
            )
            .await
            .unwrap();
        router
            .create_memory(
                NewMemory::new(MemoryType::Fact, "python garbage collection").importance(0.9),
            )
            .await
            .unwrap();
        router
            .create_memory(NewMemory::new(MemoryType::Observation, "rust ownership rules"))
            .await
            .unwrap();

        let results = router
            .search_memories(SearchQuery::new("rust ownership rules").limit(10))
            .await
            .unwrap();
        assert!(!results.is_empty());

        // No duplicate ids
        let mut ids: Vec<&str> = results.iter().map(|s| s.record.id.as_str()).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), results.len());

        // The exact knowledge match outranks the unrelated fact
        let top = &results[0];
        assert_eq!(top.record.content, "rust ownership rules");
    }

    #[tokio::test]
    async fn test_search_type_filter_and_threshold() {
        let router = router();
        router
            .create_memory(NewMemory::new(MemoryType::Fact, "alpha beta gamma").importance(0.9))
            .await
            .unwrap();
        router
            .create_memory(NewMemory::new(MemoryType::Observation, "alpha beta gamma"))
            .await
            .unwrap();

        let facts_only = router
            .search_memories(
                SearchQuery::new("alpha beta gamma")
                    .memory_type(MemoryType::Fact)
                    .threshold(0.5),
            )
            .await
            .unwrap();
        assert!(facts_only
            .iter()
            .all(|s| s.record.memory_type == MemoryType::Fact));
        assert!(!facts_only.is_empty());
    }

    #[tokio::test]
    async fn test_relevant_memories_include_rule_hits() {
        let router = router();
        let pinned = router
            .create_memory(
                NewMemory::new(MemoryType::Fact, "pinned safety notice").importance(0.9),
            )
            .await
            .unwrap();

        router
            .rules()
            .create_rule(
                Rule::new("pin-on-alert")
                    .condition(Condition::new("alert", ConditionOp::Equals, true))
                    .action(
                        Action::new(ActionType::Append, RELEVANT_MEMORIES_KEY)
                            .with_value(pinned.id.as_str()),
                    ),
            )
            .await
            .unwrap();

        let context = Metadata::with("alert", true);
        let results = router.get_relevant_memories(&context, 10, 0.0).await.unwrap();
        assert!(results
            .iter()
            .any(|s| s.record.id == pinned.id && s.relevance == 1.0));

        // Without the alert the rule stays quiet
        let calm = Metadata::with("alert", false);
        let results = router.get_relevant_memories(&calm, 10, 0.9).await.unwrap();
        assert!(results.iter().all(|s| s.record.id != pinned.id));
    }

    #[tokio::test]
    async fn test_statistics() {
        let router = router();
        router
            .create_memory(NewMemory::new(MemoryType::Observation, "wm record"))
            .await
            .unwrap();
        router
            .create_memory(NewMemory::new(MemoryType::Fact, "em record").importance(0.5))
            .await
            .unwrap();
        router
            .create_memory(NewMemory::new(MemoryType::Fact, "kb record").importance(0.9))
            .await
            .unwrap();

        let stats = router.get_statistics().await.unwrap();
        assert_eq!(stats.working.records, 1);
        assert_eq!(stats.episodic.records, 1);
        assert_eq!(stats.knowledge.records, 1);
        assert!(stats.knowledge.oldest.is_some());
    }
}
