//! Engram - Tiered memory engine for AI agent backends
//!
//! This is the main library crate that re-exports all engram components.

pub use engram_core as core;
pub use engram_memory as memory;
pub use engram_rules as rules;
pub use engram_store as store;

// Re-export commonly used types
pub use engram_core::{
    clamp_unit, Error, MemoryRecord, MemoryRecordBuilder, MemoryType, Metadata, Priority,
    RecordId, Result, Tier, Timestamp, Value,
};

pub use engram_memory::{
    MemoryPatch, MemoryRouter, MemoryStatistics, NewMemory, ScoredMemory, SearchQuery,
};
pub use engram_rules::{Action, ActionType, Condition, ConditionNode, ConditionOp, Rule, RuleEngine};
pub use engram_store::{CacheStore, EmbeddingProvider, InMemoryStore, RecordStore, RocksDbStore};
