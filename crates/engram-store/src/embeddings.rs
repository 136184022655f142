//! Embedding provider abstraction and vector similarity helpers
//!
//! The numeric-embedding provider is an external collaborator; this
//! module defines its interface, a deterministic in-process provider
//! for tests and embedded use, and the similarity math shared by
//! vector search.

use async_trait::async_trait;
use engram_core::{Error, Result};
use tracing::debug;

/// Trait for embedding providers (text to vector)
///
/// Provider failures degrade to the text-similarity fallback at the
/// call site; they never abort a store operation.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embedding dimension produced by this provider
    fn dimensions(&self) -> usize;

    /// Generate an embedding for a single text
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Generate embeddings for multiple texts
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed(text).await?);
        }
        Ok(out)
    }
}

/// Deterministic embedding provider
///
/// Seeds an xxh3 hash of the text into a splitmix-style generator, so
/// identical texts always produce identical vectors. Useful for tests
/// and for embedded deployments without a network provider.
pub struct HashEmbeddingProvider {
    dimensions: usize,
}

impl HashEmbeddingProvider {
    /// Create a provider with the given output dimension
    pub fn new(dimensions: usize) -> Self {
        Self { dimensions }
    }

    fn text_to_vector(&self, text: &str) -> Vec<f32> {
        let mut state = xxhash_rust::xxh3::xxh3_64(text.as_bytes());
        let mut vector = Vec::with_capacity(self.dimensions);

        for _ in 0..self.dimensions {
            state = state
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            let value = ((state as f64) / (u64::MAX as f64) * 2.0 - 1.0) as f32;
            vector.push(value);
        }

        normalize(&mut vector);
        vector
    }
}

#[async_trait]
impl EmbeddingProvider for HashEmbeddingProvider {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if text.is_empty() {
            return Err(Error::Embedding("Cannot embed empty text".to_string()));
        }
        debug!("Hash embedding for text of length {}", text.len());
        Ok(self.text_to_vector(text))
    }
}

/// An embedding provider that always fails
///
/// Exercises the degradation path in tests.
pub struct FailingEmbeddingProvider;

#[async_trait]
impl EmbeddingProvider for FailingEmbeddingProvider {
    fn dimensions(&self) -> usize {
        0
    }

    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        Err(Error::Embedding("Provider unavailable".to_string()))
    }
}

// ============== Vector Similarity Functions ==============

/// Normalize a vector in-place
pub fn normalize(v: &mut [f32]) {
    let magnitude: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if magnitude > 0.0 {
        for x in v.iter_mut() {
            *x /= magnitude;
        }
    }
}

/// Cosine similarity between two vectors
///
/// Returns a value in [-1, 1]; mismatched dimensions score 0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let mag_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let mag_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if mag_a == 0.0 || mag_b == 0.0 {
        return 0.0;
    }

    dot / (mag_a * mag_b)
}

/// A scored item from a similarity scan
#[derive(Debug, Clone)]
pub struct Scored<T> {
    pub item: T,
    pub score: f32,
}

/// Find the top-k most similar items by cosine similarity
///
/// Items without an embedding are skipped.
pub fn find_top_k<T, F>(query: &[f32], items: impl IntoIterator<Item = T>, k: usize, get_embedding: F) -> Vec<Scored<T>>
where
    F: Fn(&T) -> Option<Vec<f32>>,
{
    let mut results: Vec<Scored<T>> = items
        .into_iter()
        .filter_map(|item| {
            get_embedding(&item).map(|emb| Scored {
                score: cosine_similarity(query, &emb),
                item,
            })
        })
        .collect();

    results.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    results.truncate(k);
    results
}
