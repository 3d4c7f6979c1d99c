//! Pluggable embedding generation, in the shape of `toka-llm-gateway`'s
//! provider trait: one async trait, swappable at construction between a
//! real HTTP-backed provider and an in-process fake for tests.

use async_trait::async_trait;
use soorma_types::{Result, SoormaError};

use crate::entities::SemanticMemory;
use crate::store::ScoredRow;

/// Default embedding dimensionality (spec §6.3: "1536-dim default").
pub const DEFAULT_DIMENSION: usize = 1536;

/// Generates embeddings for stored content. Implementations must be
/// consistent within a tenant: every row in the same tenant uses vectors
/// of the same dimension (spec §4.4: "The core guarantees embedding
/// dimension consistency within a single tenant").
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed `text`, returning a vector of this provider's fixed
    /// dimension.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// The dimension this provider produces.
    fn dimension(&self) -> usize;
}

/// A deterministic, zero-dependency provider used when no real embedding
/// backend is configured. Hashes `text` into a fixed-size vector so that
/// identical content always yields identical embeddings (useful for
/// dedup tests) without calling out to a model.
pub struct HashEmbeddingProvider {
    dimension: usize,
}

impl HashEmbeddingProvider {
    /// Build a provider producing vectors of `dimension` length.
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }
}

impl Default for HashEmbeddingProvider {
    fn default() -> Self {
        Self::new(DEFAULT_DIMENSION)
    }
}

#[async_trait]
impl EmbeddingProvider for HashEmbeddingProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        use sha2::{Digest, Sha256};
        let mut out = Vec::with_capacity(self.dimension);
        let mut counter: u32 = 0;
        while out.len() < self.dimension {
            let mut hasher = Sha256::new();
            hasher.update(text.as_bytes());
            hasher.update(counter.to_le_bytes());
            let digest = hasher.finalize();
            for byte in digest {
                if out.len() >= self.dimension {
                    break;
                }
                out.push((byte as f32 / 255.0) * 2.0 - 1.0);
            }
            counter += 1;
        }
        Ok(out)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Cosine similarity between two equal-length vectors. Returns `-1.0`
/// (minimum similarity) if either vector is zero-length or the lengths
/// differ, rather than panicking — callers treat that as "no match".
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return -1.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return -1.0;
    }
    dot / (norm_a * norm_b)
}

/// `sha256(content)`, hex-encoded (spec §3.3: semantic memory
/// `content_hash`).
pub fn content_hash(content: &str) -> String {
    use sha2::{Digest, Sha256};
    let digest = Sha256::digest(content.as_bytes());
    hex_encode(&digest)
}

fn hex_encode(bytes: &[u8]) -> String {
    use std::fmt::Write;
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        let _ = write!(out, "{byte:02x}");
    }
    out
}

/// Dedup a `search_knowledge` result set by `content_hash` (spec Open
/// Question 4), keeping the caller's own private row over a public row
/// with identical content when both surface. Callers sort by score
/// after deduping, so the order of the returned rows is unspecified.
pub fn dedup_by_content_hash(rows: Vec<ScoredRow<SemanticMemory>>, user_id: &str) -> Vec<ScoredRow<SemanticMemory>> {
    let mut by_hash: std::collections::HashMap<String, ScoredRow<SemanticMemory>> = std::collections::HashMap::new();
    for (row, score) in rows {
        let is_private_to_caller = row.user_id == user_id && !row.is_public;
        match by_hash.entry(row.content_hash.clone()) {
            std::collections::hash_map::Entry::Vacant(slot) => {
                slot.insert((row, score));
            }
            std::collections::hash_map::Entry::Occupied(mut slot) => {
                let existing_is_private = slot.get().0.user_id == user_id && !slot.get().0.is_public;
                if is_private_to_caller && !existing_is_private {
                    slot.insert((row, score));
                }
            }
        }
    }
    by_hash.into_values().collect()
}

/// Validate `vector` against `expected_dimension`, used before every
/// storage write so dimension drift is caught at the edge.
pub fn validate_dimension(vector: &[f32], expected_dimension: usize) -> Result<()> {
    if vector.len() != expected_dimension {
        return Err(SoormaError::InvalidEnvelope(format!(
            "embedding dimension {} does not match tenant dimension {}",
            vector.len(),
            expected_dimension
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn hash_provider_is_deterministic() {
        let provider = HashEmbeddingProvider::new(16);
        let a = provider.embed("hello").await.unwrap();
        let b = provider.embed("hello").await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 16);
    }

    #[tokio::test]
    async fn hash_provider_differs_by_content() {
        let provider = HashEmbeddingProvider::new(16);
        let a = provider.embed("hello").await.unwrap();
        let b = provider.embed("goodbye").await.unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn cosine_similarity_of_identical_vectors_is_one() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn content_hash_is_stable() {
        assert_eq!(content_hash("hello"), content_hash("hello"));
        assert_ne!(content_hash("hello"), content_hash("world"));
    }

    fn row(user_id: &str, is_public: bool, hash: &str) -> SemanticMemory {
        SemanticMemory {
            id: uuid::Uuid::new_v4(),
            tenant_id: "t1".into(),
            user_id: user_id.into(),
            is_public,
            content: "dup".into(),
            content_hash: hash.into(),
            external_id: None,
            embedding: None,
            metadata: serde_json::json!({}),
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
        }
    }

    #[test]
    fn dedup_prefers_callers_private_row_over_public_duplicate() {
        let rows = vec![(row("u1", true, "h1"), 0.9), (row("u2", false, "h1"), 0.5)];
        let deduped = dedup_by_content_hash(rows, "u2");
        assert_eq!(deduped.len(), 1);
        assert_eq!(deduped[0].0.user_id, "u2");
        assert!(!deduped[0].0.is_public);
    }

    #[test]
    fn dedup_leaves_distinct_hashes_untouched() {
        let rows = vec![(row("u1", true, "h1"), 0.9), (row("u1", true, "h2"), 0.5)];
        let deduped = dedup_by_content_hash(rows, "u2");
        assert_eq!(deduped.len(), 2);
    }
}
