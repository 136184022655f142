//! Engram Storage Interfaces
//!
//! Interfaces to the engine's external collaborators, plus reference
//! implementations:
//!
//! - **RecordStore**: keyed CRUD, filtered list-query, vector search
//!   (`InMemoryStore` for tests, `RocksDbStore` for durable use)
//! - **CacheStore**: get/set-with-ttl/delete (`InMemoryCache`)
//! - **EmbeddingProvider**: text to vector (`HashEmbeddingProvider`)
//! - **Summarizer**: texts to bounded text (`TruncatingSummarizer`)

pub mod backend;
pub mod cache;
pub mod embeddings;
pub mod memory;
pub mod rocks;
pub mod summarizer;

pub use backend::{CompiledFilter, Filter, RecordStore, VectorHit};
pub use cache::{CacheStore, InMemoryCache};
pub use embeddings::{
    cosine_similarity, find_top_k, EmbeddingProvider, FailingEmbeddingProvider,
    HashEmbeddingProvider, Scored,
};
pub use memory::InMemoryStore;
pub use rocks::{RocksDbStore, RocksStoreConfig};
pub use summarizer::{truncate_with_ellipsis, FailingSummarizer, Summarizer, TruncatingSummarizer};
