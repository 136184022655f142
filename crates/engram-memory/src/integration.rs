//! Memory integration
//!
//! Greedy similarity clustering followed by per-cluster merge or
//! summarization. The cluster pass reads a snapshot, computes
//! offline, then writes the replacement and deletes the originals;
//! records mutated by other actors in that window are not reconciled.

use engram_core::{meta, MemoryRecord, MemoryType, Result, Value};
use engram_store::{cosine_similarity, RecordStore, Summarizer, truncate_with_ellipsis};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Configuration for the integration engine
#[derive(Debug, Clone)]
pub struct IntegrationConfig {
    /// Similarity at or above which records join a cluster
    pub similarity_threshold: f64,

    /// Clusters smaller than this pass through unchanged
    pub min_cluster_size: usize,

    /// Maximum summary length in characters
    pub max_summary_len: usize,
}

impl Default for IntegrationConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.7,
            min_cluster_size: 2,
            max_summary_len: 500,
        }
    }
}

/// External similarity scorer
///
/// Failures degrade to the text fallback in [`content_similarity`].
pub trait SimilarityScorer: Send + Sync {
    fn score(&self, a: &MemoryRecord, b: &MemoryRecord) -> Result<f64>;
}

/// How a cluster collapses into one record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntegrationStrategy {
    /// Condense member contents through the summarizer
    Summarize,
    /// Keep only the newest content (facts and rules)
    Merge,
    /// Keep the newest member wholesale (preferences)
    Latest,
}

/// Text similarity fallback
///
/// Mismatched types score a flat 0.3; identical content scores 1.0;
/// empty content scores 0.1; otherwise a blend of relative length
/// closeness (30%) and word-set Jaccard overlap (70%).
pub fn content_similarity(a: &MemoryRecord, b: &MemoryRecord) -> f64 {
    if a.memory_type != b.memory_type {
        return 0.3;
    }
    if a.content == b.content {
        return 1.0;
    }
    if a.content.is_empty() || b.content.is_empty() {
        return 0.1;
    }

    let (la, lb) = (a.content.len() as f64, b.content.len() as f64);
    let length_score = 1.0 - (la - lb).abs() / la.max(lb);

    let words_a: std::collections::HashSet<&str> = a.content.split_whitespace().collect();
    let words_b: std::collections::HashSet<&str> = b.content.split_whitespace().collect();
    let intersection = words_a.intersection(&words_b).count() as f64;
    let union = words_a.union(&words_b).count() as f64;
    let jaccard = if union == 0.0 { 0.0 } else { intersection / union };

    0.3 * length_score + 0.7 * jaccard
}

/// The result of one integration pass
#[derive(Debug, Clone, Default)]
pub struct IntegrationReport {
    /// Replacement records written by the pass
    pub integrated: Vec<MemoryRecord>,

    /// Records left untouched (their cluster was too small)
    pub passthrough: Vec<MemoryRecord>,
}

/// The integration engine
pub struct IntegrationEngine {
    store: Arc<dyn RecordStore>,
    summarizer: Arc<dyn Summarizer>,
    scorer: Option<Arc<dyn SimilarityScorer>>,
    config: IntegrationConfig,
}

impl IntegrationEngine {
    /// Create an engine over a store and summarizer
    pub fn new(
        store: Arc<dyn RecordStore>,
        summarizer: Arc<dyn Summarizer>,
        config: IntegrationConfig,
    ) -> Self {
        Self {
            store,
            summarizer,
            scorer: None,
            config,
        }
    }

    /// Use an external similarity scorer, with the text fallback on error
    pub fn with_scorer(mut self, scorer: Arc<dyn SimilarityScorer>) -> Self {
        self.scorer = Some(scorer);
        self
    }

    /// Similarity between two records
    ///
    /// Resolution order: external scorer, embedding cosine, text
    /// fallback.
    pub fn similarity(&self, a: &MemoryRecord, b: &MemoryRecord) -> f64 {
        if let Some(scorer) = &self.scorer {
            match scorer.score(a, b) {
                Ok(score) => return score.clamp(0.0, 1.0),
                Err(e) => warn!("Similarity scorer failed, using fallback: {}", e),
            }
        }
        if let (Some(ea), Some(eb)) = (&a.embedding, &b.embedding) {
            return f64::from(cosine_similarity(ea, eb)).clamp(0.0, 1.0);
        }
        content_similarity(a, b)
    }

    /// Greedy single-pass clustering
    ///
    /// Pops an unclustered record as a seed and absorbs every
    /// remaining record scoring at or above the threshold against it.
    pub fn cluster_memories(
        &self,
        records: Vec<MemoryRecord>,
        threshold: Option<f64>,
    ) -> Vec<Vec<MemoryRecord>> {
        let threshold = threshold.unwrap_or(self.config.similarity_threshold);
        let mut remaining = records;
        let mut clusters = Vec::new();

        while let Some(seed) = remaining.first().cloned() {
            remaining.remove(0);
            let mut cluster = vec![seed.clone()];
            let mut rest = Vec::with_capacity(remaining.len());
            for candidate in remaining {
                if self.similarity(&seed, &candidate) >= threshold {
                    cluster.push(candidate);
                } else {
                    rest.push(candidate);
                }
            }
            remaining = rest;
            clusters.push(cluster);
        }
        clusters
    }

    /// Cluster and collapse a set of records
    ///
    /// Small clusters pass through unchanged; larger ones collapse by
    /// the strategy of their dominant type, the replacement is
    /// written, and the originals are deleted.
    pub async fn integrate_memories(
        &self,
        records: Vec<MemoryRecord>,
    ) -> Result<IntegrationReport> {
        let clusters = self.cluster_memories(records, None);
        let mut report = IntegrationReport::default();

        for cluster in clusters {
            if cluster.len() < self.config.min_cluster_size {
                report.passthrough.extend(cluster);
                continue;
            }

            let replacement = self.collapse_cluster(&cluster).await?;
            self.store.put(&replacement).await?;
            for member in &cluster {
                if let Err(e) = self.store.delete(&member.id).await {
                    warn!("Failed to delete integrated record {}: {}", member.id, e);
                }
            }
            debug!(
                "Integrated {} records into {}",
                cluster.len(),
                replacement.id
            );
            report.integrated.push(replacement);
        }
        Ok(report)
    }

    /// Summarize a group of records into one text
    ///
    /// Falls back to joined-and-truncated content when the summarizer
    /// is unavailable.
    pub async fn summarize_memories(&self, records: &[MemoryRecord]) -> String {
        let texts: Vec<String> = records.iter().map(|r| r.content.clone()).collect();
        match self
            .summarizer
            .summarize(&texts, self.config.max_summary_len)
            .await
        {
            Ok(summary) => summary,
            Err(e) => {
                warn!("Summarizer unavailable, truncating: {}", e);
                truncate_with_ellipsis(&texts.join(" "), self.config.max_summary_len)
            }
        }
    }

    async fn collapse_cluster(&self, cluster: &[MemoryRecord]) -> Result<MemoryRecord> {
        let dominant = dominant_type(cluster);
        let strategy = match dominant {
            MemoryType::Fact | MemoryType::Rule => IntegrationStrategy::Merge,
            MemoryType::Preference => IntegrationStrategy::Latest,
            _ => IntegrationStrategy::Summarize,
        };
        let newest = cluster
            .iter()
            .max_by_key(|r| (r.created_at, r.id.as_str().to_string()))
            .cloned()
            .unwrap_or_else(|| cluster[0].clone());

        let (content, memory_type) = match strategy {
            IntegrationStrategy::Merge => (merge_contents(cluster, dominant), dominant),
            IntegrationStrategy::Latest => (newest.content.clone(), dominant),
            IntegrationStrategy::Summarize => {
                (self.summarize_memories(cluster).await, MemoryType::Summary)
            }
        };

        let tier = newest.id.tier();
        let mut replacement = MemoryRecord::new(tier, memory_type, &content);
        replacement.confidence =
            cluster.iter().map(|r| r.confidence).sum::<f64>() / cluster.len() as f64;
        replacement.set_importance(
            cluster.iter().map(|r| r.importance()).sum::<f64>() / cluster.len() as f64,
        );
        for member in cluster {
            for tag in &member.tags {
                replacement.add_tag(tag.clone());
            }
        }

        let source_ids: Vec<Value> = cluster
            .iter()
            .map(|r| Value::from(r.id.as_str()))
            .collect();
        replacement
            .metadata
            .set(meta::MERGED_FROM, Value::Array(source_ids.clone()));
        replacement
            .metadata
            .set(meta::SOURCE_IDS, Value::Array(source_ids));
        replacement.validate()?;
        Ok(replacement)
    }
}

/// The most frequent type in a cluster
fn dominant_type(cluster: &[MemoryRecord]) -> MemoryType {
    let mut counts: HashMap<MemoryType, usize> = HashMap::new();
    for record in cluster {
        *counts.entry(record.memory_type).or_insert(0) += 1;
    }
    counts
        .into_iter()
        .max_by_key(|(t, count)| (*count, std::cmp::Reverse(t.as_str())))
        .map(|(t, _)| t)
        .unwrap_or(MemoryType::Observation)
}

/// Merge member contents
///
/// Facts and rules keep only the newest content; other types
/// concatenate with blank-line separators.
fn merge_contents(cluster: &[MemoryRecord], dominant: MemoryType) -> String {
    let mut by_age: Vec<&MemoryRecord> = cluster.iter().collect();
    by_age.sort_by_key(|r| (r.created_at, r.id.as_str().to_string()));

    match dominant {
        MemoryType::Fact | MemoryType::Rule => by_age
            .last()
            .map(|r| r.content.clone())
            .unwrap_or_default(),
        _ => by_age
            .iter()
            .map(|r| r.content.as_str())
            .collect::<Vec<_>>()
            .join("\n\n"),
    }
}
