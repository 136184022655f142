//! Backing store abstraction
//!
//! The durable store exposes keyed CRUD, a filtered list-query, and
//! vector-similarity search over precomputed embeddings. Everything
//! above this trait is storage-agnostic.

use async_trait::async_trait;
use engram_core::{Error, MemoryRecord, MemoryType, RecordId, Result, Timestamp, Value};
use regex::Regex;
use serde::{Deserialize, Serialize};

/// A filtered list-query against the backing store
///
/// Clauses combine with AND. Supported predicates: equality on type
/// and metadata keys, set-membership on tags and metadata arrays,
/// range on the update time, and regex over content.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Filter {
    /// Equality on the record type
    pub memory_type: Option<MemoryType>,

    /// Record must carry every one of these tags
    pub all_tags: Vec<String>,

    /// Record must carry at least one of these tags
    pub any_tags: Vec<String>,

    /// Equality on metadata keys
    pub meta_equals: Vec<(String, Value)>,

    /// Metadata array under the key must contain the value
    pub meta_contains: Vec<(String, Value)>,

    /// Only records updated strictly before this time
    pub updated_before: Option<Timestamp>,

    /// Only records updated at or after this time
    pub updated_after: Option<Timestamp>,

    /// Regex matched against the record content
    pub content_regex: Option<String>,

    /// Maximum number of records to return
    pub limit: Option<usize>,
}

impl Filter {
    /// Create an empty filter (matches everything)
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder: filter by record type
    pub fn memory_type(mut self, memory_type: MemoryType) -> Self {
        self.memory_type = Some(memory_type);
        self
    }

    /// Builder: require a tag
    pub fn tag<T: Into<String>>(mut self, tag: T) -> Self {
        self.all_tags.push(tag.into());
        self
    }

    /// Builder: require at least one of the tags
    pub fn any_tag<I, T>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.any_tags.extend(tags.into_iter().map(Into::into));
        self
    }

    /// Builder: metadata equality
    pub fn meta_eq<K: Into<String>, V: Into<Value>>(mut self, key: K, value: V) -> Self {
        self.meta_equals.push((key.into(), value.into()));
        self
    }

    /// Builder: metadata array membership
    pub fn meta_has<K: Into<String>, V: Into<Value>>(mut self, key: K, value: V) -> Self {
        self.meta_contains.push((key.into(), value.into()));
        self
    }

    /// Builder: updated strictly before
    pub fn updated_before(mut self, ts: Timestamp) -> Self {
        self.updated_before = Some(ts);
        self
    }

    /// Builder: updated at or after
    pub fn updated_after(mut self, ts: Timestamp) -> Self {
        self.updated_after = Some(ts);
        self
    }

    /// Builder: content regex
    pub fn content_regex<T: Into<String>>(mut self, pattern: T) -> Self {
        self.content_regex = Some(pattern.into());
        self
    }

    /// Builder: result limit
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Compile the filter, validating the regex up front
    pub fn compile(&self) -> Result<CompiledFilter<'_>> {
        let regex = match &self.content_regex {
            Some(pattern) => Some(
                Regex::new(pattern)
                    .map_err(|e| Error::Validation(format!("Invalid filter regex: {}", e)))?,
            ),
            None => None,
        };
        Ok(CompiledFilter {
            filter: self,
            regex,
        })
    }
}

/// A filter with its regex precompiled
pub struct CompiledFilter<'a> {
    filter: &'a Filter,
    regex: Option<Regex>,
}

impl CompiledFilter<'_> {
    /// Check whether a record satisfies every clause
    pub fn matches(&self, record: &MemoryRecord) -> bool {
        let f = self.filter;

        if let Some(mt) = f.memory_type {
            if record.memory_type != mt {
                return false;
            }
        }
        if !f.all_tags.iter().all(|t| record.has_tag(t)) {
            return false;
        }
        if !f.any_tags.is_empty() && !f.any_tags.iter().any(|t| record.has_tag(t)) {
            return false;
        }
        for (key, expected) in &f.meta_equals {
            if record.metadata.get(key) != Some(expected) {
                return false;
            }
        }
        for (key, member) in &f.meta_contains {
            let contains = record
                .metadata
                .get(key)
                .and_then(Value::as_array)
                .map(|arr| arr.contains(member))
                .unwrap_or(false);
            if !contains {
                return false;
            }
        }
        if let Some(before) = f.updated_before {
            if record.updated_at >= before {
                return false;
            }
        }
        if let Some(after) = f.updated_after {
            if record.updated_at < after {
                return false;
            }
        }
        if let Some(regex) = &self.regex {
            if !regex.is_match(&record.content) {
                return false;
            }
        }

        true
    }
}

/// A vector-search hit
#[derive(Debug, Clone)]
pub struct VectorHit {
    /// The matched record
    pub record: MemoryRecord,
    /// Similarity score, higher is more similar
    pub score: f32,
}

/// Trait for backing store implementations
///
/// Single-key get/put/delete are atomic; multi-record sequences built
/// on top of this trait are not transactional.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Store or overwrite a record
    async fn put(&self, record: &MemoryRecord) -> Result<()>;

    /// Get a record by id
    async fn get(&self, id: &RecordId) -> Result<Option<MemoryRecord>>;

    /// Delete a record, returning whether it existed
    async fn delete(&self, id: &RecordId) -> Result<bool>;

    /// List records matching a filter
    async fn query(&self, filter: &Filter) -> Result<Vec<MemoryRecord>>;

    /// Vector-similarity search over records carrying embeddings
    async fn vector_search(&self, embedding: &[f32], limit: usize) -> Result<Vec<VectorHit>>;

    /// Total record count
    async fn count(&self) -> Result<usize>;

    /// Flush any pending writes
    async fn flush(&self) -> Result<()>;

    /// Close the store (clean shutdown)
    async fn close(&self) -> Result<()>;
}
