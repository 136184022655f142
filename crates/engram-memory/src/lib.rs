//! Engram Memory Engine
//!
//! The tiered memory engine: a working tier of short-lived,
//! context-bound records in cache, an episodic tier of mid-term
//! records indexed by user and conversation, and a knowledge tier of
//! long-lived records with embeddings and relationships. A router on
//! top selects tiers, probes them in order on reads, and fans
//! searches out across all three.
//!
//! # Modules
//!
//! - `context` - Context sessions for the working tier
//! - `working` - Cache-backed working memory
//! - `episodic` - Store-backed episodic memory with secondary indexes
//! - `profile` - User profile attributes over the episodic tier
//! - `knowledge` - Long-term knowledge base with relationships
//! - `reinforcement` - Strengthen/decay lifecycle and background decay
//! - `integration` - Clustering and merge of redundant records
//! - `router` - The top-level memory façade

pub mod context;
pub mod episodic;
pub mod integration;
pub mod knowledge;
pub mod profile;
pub mod reinforcement;
pub mod router;
pub mod working;

pub use context::{ContextConfig, ContextManager, ContextSession, ContextType};
pub use episodic::{EpisodicConfig, EpisodicMemory};
pub use integration::{
    content_similarity, IntegrationConfig, IntegrationEngine, IntegrationReport,
    IntegrationStrategy, SimilarityScorer,
};
pub use knowledge::{KnowledgeBase, KnowledgeConfig};
pub use profile::{AttributeKind, ProfileAttribute, UserProfileManager};
pub use reinforcement::{
    DecayOutcome, DecayReport, ReinforcementConfig, ReinforcementEngine,
};
pub use router::{
    MemoryPatch, MemoryRouter, MemoryStatistics, NewMemory, ScoredMemory, SearchQuery,
    TierStatistics, RELEVANT_MEMORIES_KEY,
};
pub use working::{WorkingMemory, WorkingMemoryConfig};
