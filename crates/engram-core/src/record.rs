//! Memory record model
//!
//! A `MemoryRecord` is the unit of storage across all three tiers.
//! Scored fields (confidence, importance, strength) are clamped to
//! [0, 1] on every write; validation enforces the schema invariants.

use crate::error::{Error, Result};
use crate::id::{RecordId, Tier};
use crate::timestamp::Timestamp;
use crate::value::{Metadata, Value};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Maximum record content length in bytes
pub const MAX_CONTENT_LEN: usize = 64 * 1024;

/// Well-known metadata keys
pub mod meta {
    pub const IMPORTANCE: &str = "importance";
    pub const STRENGTH: &str = "strength";
    pub const SOURCE: &str = "source";
    pub const CONFIDENCE_HISTORY: &str = "confidence_history";
    pub const RELATIONSHIPS: &str = "relationships";
    pub const COMPRESSED: &str = "compressed";
    pub const USER_ID: &str = "user_id";
    pub const CONVERSATION_ID: &str = "conversation_id";
    pub const MESSAGE_INDEX: &str = "message_index";
    pub const CONTEXT_ID: &str = "context_id";
    pub const CATEGORIES: &str = "categories";
    pub const LAST_STRENGTHENED: &str = "last_strengthened";
    pub const STRENGTH_COUNT: &str = "strength_count";
    pub const LAST_DECAYED: &str = "last_decayed";
    pub const DECAY_COUNT: &str = "decay_count";
    pub const REINFORCEMENT_COUNT: &str = "reinforcement_count";
    pub const MERGED_FROM: &str = "merged_from";
    pub const SOURCE_IDS: &str = "source_ids";
}

/// Clamp a score to the unit interval
pub fn clamp_unit(v: f64) -> f64 {
    v.clamp(0.0, 1.0)
}

/// Type of memory record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MemoryType {
    /// Transient perception of the environment
    Observation,
    /// Verified statement about the world
    Fact,
    /// Stored condition/action rule
    Rule,
    /// User preference
    Preference,
    /// User-agent exchange
    Interaction,
    /// Condensed representation of other records
    Summary,
    /// Directed edge between two knowledge records
    Relationship,
}

impl MemoryType {
    /// Name used in tags and serialized filters
    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryType::Observation => "observation",
            MemoryType::Fact => "fact",
            MemoryType::Rule => "rule",
            MemoryType::Preference => "preference",
            MemoryType::Interaction => "interaction",
            MemoryType::Summary => "summary",
            MemoryType::Relationship => "relationship",
        }
    }
}

impl std::fmt::Display for MemoryType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Record priority level
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
}

impl Priority {
    /// Numeric level, Low = 0
    pub fn level(&self) -> u8 {
        match self {
            Priority::Low => 0,
            Priority::Medium => 1,
            Priority::High => 2,
        }
    }

    /// One step up, saturating at High
    pub fn raised(&self) -> Self {
        match self {
            Priority::Low => Priority::Medium,
            _ => Priority::High,
        }
    }

    /// One step down, saturating at Low
    pub fn lowered(&self) -> Self {
        match self {
            Priority::High => Priority::Medium,
            _ => Priority::Low,
        }
    }
}

/// A discrete memory record
///
/// The record's tier is implicit in where it is stored and is also
/// carried by the id prefix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryRecord {
    /// Unique, tier-tagged identifier
    pub id: RecordId,

    /// Bounded text content
    pub content: String,

    /// Record type
    pub memory_type: MemoryType,

    /// Confidence in the content, [0, 1]
    pub confidence: f64,

    /// Priority level
    pub priority: Priority,

    /// Tag set (no duplicates)
    pub tags: BTreeSet<String>,

    /// Open metadata map
    pub metadata: Metadata,

    /// Embedding vector, if one was computed
    pub embedding: Option<Vec<f32>>,

    /// When this record was created
    pub created_at: Timestamp,

    /// When this record was last updated
    pub updated_at: Timestamp,

    /// When this record expires (None = never)
    pub expires_at: Option<Timestamp>,
}

impl MemoryRecord {
    /// Create a new record with a freshly minted id for the tier
    pub fn new(tier: Tier, memory_type: MemoryType, content: &str) -> Self {
        let now = Timestamp::now();
        Self {
            id: RecordId::mint(tier),
            content: content.to_string(),
            memory_type,
            confidence: 1.0,
            priority: Priority::Medium,
            tags: BTreeSet::new(),
            metadata: Metadata::new(),
            embedding: None,
            created_at: now,
            updated_at: now,
            expires_at: None,
        }
    }

    /// Validate schema invariants
    pub fn validate(&self) -> Result<()> {
        if self.content.is_empty() {
            return Err(Error::Validation("Record content is empty".to_string()));
        }
        if self.content.len() > MAX_CONTENT_LEN {
            return Err(Error::Validation(format!(
                "Record content exceeds {} bytes",
                MAX_CONTENT_LEN
            )));
        }
        if let Some(expires) = self.expires_at {
            if expires < self.created_at {
                return Err(Error::Validation(
                    "Record expires before it was created".to_string(),
                ));
            }
        }
        Ok(())
    }

    /// Check whether the record has expired as of `now`
    pub fn is_expired(&self, now: Timestamp) -> bool {
        self.expires_at.map(|e| e < now).unwrap_or(false)
    }

    /// Stamp the update time
    pub fn touch(&mut self) {
        self.updated_at = Timestamp::now();
    }

    /// Set confidence, clamped to [0, 1], recording history
    pub fn set_confidence(&mut self, confidence: f64) {
        self.metadata.push(meta::CONFIDENCE_HISTORY, self.confidence);
        self.confidence = clamp_unit(confidence);
    }

    /// Importance score from metadata, default 0.5
    pub fn importance(&self) -> f64 {
        self.metadata.get_f64(meta::IMPORTANCE).unwrap_or(0.5)
    }

    /// Set importance, clamped to [0, 1]
    pub fn set_importance(&mut self, importance: f64) {
        self.metadata.set(meta::IMPORTANCE, clamp_unit(importance));
    }

    /// Reinforcement strength from metadata, implicit start 0
    pub fn strength(&self) -> f64 {
        self.metadata.get_f64(meta::STRENGTH).unwrap_or(0.0)
    }

    /// Set strength, clamped to [0, 1]
    pub fn set_strength(&mut self, strength: f64) {
        self.metadata.set(meta::STRENGTH, clamp_unit(strength));
    }

    /// Check for a tag
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.contains(tag)
    }

    /// Add a tag (set semantics)
    pub fn add_tag<T: Into<String>>(&mut self, tag: T) {
        self.tags.insert(tag.into());
    }

    /// Record ids this record was merged from, if any
    pub fn merged_from(&self) -> Vec<String> {
        self.metadata
            .get(meta::MERGED_FROM)
            .and_then(Value::as_array)
            .map(|arr| {
                arr.iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Builder for memory records
pub struct MemoryRecordBuilder {
    record: MemoryRecord,
}

impl MemoryRecordBuilder {
    /// Start building a record for the given tier and type
    pub fn new(tier: Tier, memory_type: MemoryType, content: &str) -> Self {
        Self {
            record: MemoryRecord::new(tier, memory_type, content),
        }
    }

    /// Set confidence (clamped)
    pub fn confidence(mut self, confidence: f64) -> Self {
        self.record.confidence = clamp_unit(confidence);
        self
    }

    /// Set priority
    pub fn priority(mut self, priority: Priority) -> Self {
        self.record.priority = priority;
        self
    }

    /// Set importance (clamped)
    pub fn importance(mut self, importance: f64) -> Self {
        self.record.set_importance(importance);
        self
    }

    /// Add a tag
    pub fn tag<T: Into<String>>(mut self, tag: T) -> Self {
        self.record.tags.insert(tag.into());
        self
    }

    /// Set a metadata entry
    pub fn metadata<K: Into<String>, V: Into<Value>>(mut self, key: K, value: V) -> Self {
        self.record.metadata.set(key, value);
        self
    }

    /// Set the embedding vector
    pub fn embedding(mut self, embedding: Vec<f32>) -> Self {
        self.record.embedding = Some(embedding);
        self
    }

    /// Set the expiry time
    pub fn expires_at(mut self, expires_at: Timestamp) -> Self {
        self.record.expires_at = Some(expires_at);
        self
    }

    /// Validate and build the record
    pub fn build(self) -> Result<MemoryRecord> {
        self.record.validate()?;
        Ok(self.record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_record_creation() {
        let record = MemoryRecord::new(Tier::Working, MemoryType::Observation, "saw a bird");

        assert_eq!(record.id.tier(), Tier::Working);
        assert_eq!(record.memory_type, MemoryType::Observation);
        assert_eq!(record.confidence, 1.0);
        assert!(record.validate().is_ok());
    }

    #[test]
    fn test_validation_rejects_empty_content() {
        let record = MemoryRecord::new(Tier::Knowledge, MemoryType::Fact, "");
        assert!(record.validate().unwrap_err().is_validation());
    }

    #[test]
    fn test_validation_rejects_oversized_content() {
        let content = "x".repeat(MAX_CONTENT_LEN + 1);
        let record = MemoryRecord::new(Tier::Knowledge, MemoryType::Fact, &content);
        assert!(record.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_expiry_before_creation() {
        let mut record = MemoryRecord::new(Tier::Episodic, MemoryType::Interaction, "hi");
        record.expires_at = Some(record.created_at.minus(Duration::from_secs(60)));
        assert!(record.validate().is_err());
    }

    #[test]
    fn test_scores_are_clamped() {
        let mut record = MemoryRecord::new(Tier::Knowledge, MemoryType::Fact, "fact");

        record.set_importance(1.5);
        assert_eq!(record.importance(), 1.0);

        record.set_strength(-0.3);
        assert_eq!(record.strength(), 0.0);

        record.set_confidence(2.0);
        assert_eq!(record.confidence, 1.0);
    }

    #[test]
    fn test_confidence_history_recorded() {
        let mut record = MemoryRecord::new(Tier::Knowledge, MemoryType::Fact, "fact");
        record.set_confidence(0.8);
        record.set_confidence(0.6);

        let history = record
            .metadata
            .get(meta::CONFIDENCE_HISTORY)
            .and_then(Value::as_array)
            .unwrap();
        assert_eq!(history.len(), 2);
    }

    #[test]
    fn test_expiry_check() {
        let mut record = MemoryRecord::new(Tier::Working, MemoryType::Observation, "x");
        assert!(!record.is_expired(Timestamp::now()));

        record.expires_at = Some(record.created_at.plus(Duration::from_secs(1)));
        let later = record.created_at.plus(Duration::from_secs(10));
        assert!(record.is_expired(later));
    }

    #[test]
    fn test_tags_are_a_set() {
        let mut record = MemoryRecord::new(Tier::Episodic, MemoryType::Preference, "dark mode");
        record.add_tag("theme");
        record.add_tag("theme");
        assert_eq!(record.tags.len(), 1);
    }

    #[test]
    fn test_builder() {
        let record = MemoryRecordBuilder::new(Tier::Knowledge, MemoryType::Fact, "the sky is blue")
            .confidence(0.9)
            .priority(Priority::High)
            .importance(0.8)
            .tag("color")
            .metadata(meta::SOURCE, "conversation")
            .build()
            .unwrap();

        assert_eq!(record.confidence, 0.9);
        assert_eq!(record.priority, Priority::High);
        assert_eq!(record.importance(), 0.8);
        assert!(record.has_tag("color"));
    }

    #[test]
    fn test_priority_stepping() {
        assert_eq!(Priority::Low.raised(), Priority::Medium);
        assert_eq!(Priority::Medium.raised(), Priority::High);
        assert_eq!(Priority::High.raised(), Priority::High);
        assert_eq!(Priority::Low.lowered(), Priority::Low);
        assert_eq!(Priority::High.lowered(), Priority::Medium);
    }
}
