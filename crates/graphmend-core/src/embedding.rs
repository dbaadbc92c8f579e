//! Embedding vectors and query embedders.
//!
//! Nodes carry a cached embedding of fixed dimensionality. Queries are
//! embedded at retrieval time through the [`Embedder`] trait so the model
//! behind it stays swappable. [`HashingEmbedder`] is a deterministic
//! fallback that needs no model: signed feature hashing of normalised tokens.

use serde::{Deserialize, Serialize};

use crate::signature::tokenize;

/// A dense embedding vector.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Embedding(Vec<f32>);

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Embedding(values)
    }

    pub fn dim(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    /// Cosine similarity in [-1, 1]. Mismatched dimensions or zero vectors
    /// score 0.
    pub fn cosine(&self, other: &Embedding) -> f32 {
        if self.0.len() != other.0.len() || self.0.is_empty() {
            return 0.0;
        }
        let mut dot = 0.0f32;
        let mut norm_a = 0.0f32;
        let mut norm_b = 0.0f32;
        for (a, b) in self.0.iter().zip(other.0.iter()) {
            dot += a * b;
            norm_a += a * a;
            norm_b += b * b;
        }
        if norm_a == 0.0 || norm_b == 0.0 {
            return 0.0;
        }
        (dot / (norm_a.sqrt() * norm_b.sqrt())).clamp(-1.0, 1.0)
    }

    /// Similarity folded into [0, 1]; anti-correlated vectors count as
    /// unrelated.
    pub fn similarity(&self, other: &Embedding) -> f32 {
        self.cosine(other).max(0.0)
    }

    /// Returns an L2-normalised copy (zero vectors stay zero).
    pub fn normalized(&self) -> Embedding {
        let norm = self.0.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm == 0.0 {
            return self.clone();
        }
        Embedding(self.0.iter().map(|v| v / norm).collect())
    }
}

/// Produces embeddings for free text in the same space as node embeddings.
pub trait Embedder: Send + Sync {
    fn dimension(&self) -> usize;

    fn embed(&self, text: &str) -> Embedding;
}

/// Deterministic signed feature-hashing embedder.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimension: usize,
}

impl HashingEmbedder {
    pub fn new(dimension: usize) -> Self {
        HashingEmbedder {
            dimension: dimension.max(1),
        }
    }
}

impl Embedder for HashingEmbedder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn embed(&self, text: &str) -> Embedding {
        let mut values = vec![0.0f32; self.dimension];
        for token in tokenize(text) {
            let hash = blake3::hash(token.as_bytes());
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(&hash.as_bytes()[..8]);
            let h = u64::from_le_bytes(bytes);
            let slot = (h % self.dimension as u64) as usize;
            let sign = if h >> 63 == 0 { 1.0 } else { -1.0 };
            values[slot] += sign;
        }
        Embedding(values).normalized()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cosine_of_identical_vectors_is_one() {
        let e = Embedding::new(vec![0.3, 0.4, 0.5]);
        assert!((e.cosine(&e) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn mismatched_dimensions_score_zero() {
        let a = Embedding::new(vec![1.0, 0.0]);
        let b = Embedding::new(vec![1.0, 0.0, 0.0]);
        assert_eq!(a.cosine(&b), 0.0);
    }

    #[test]
    fn similarity_folds_negative_cosine() {
        let a = Embedding::new(vec![1.0, 0.0]);
        let b = Embedding::new(vec![-1.0, 0.0]);
        assert_eq!(a.similarity(&b), 0.0);
    }

    #[test]
    fn hashing_embedder_is_deterministic() {
        let embedder = HashingEmbedder::new(64);
        let a = embedder.embed("NullPointerException in parse_config");
        let b = embedder.embed("NullPointerException in parse_config");
        assert_eq!(a, b);
        assert_eq!(a.dim(), 64);
    }

    #[test]
    fn hashing_embedder_relates_overlapping_text() {
        let embedder = HashingEmbedder::new(256);
        let query = embedder.embed("timeout connecting to database pool");
        let related = embedder.embed("database pool timeout");
        let unrelated = embedder.embed("render sidebar widget colour");
        assert!(query.similarity(&related) > query.similarity(&unrelated));
    }
}
