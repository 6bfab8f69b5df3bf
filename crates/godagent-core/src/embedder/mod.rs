//! Embedding provider abstraction.
//!
//! The daemon never bundles a model: embeddings either arrive precomputed
//! from the caller (`store`'s optional `embedding` field) or are produced by
//! whatever [`EmbeddingProvider`] is wired into the engine. The only
//! provider shipped here is [`HashEmbedder`], a deterministic fallback that
//! keeps the vector index usable (and its invariants satisfied) with zero
//! runtime dependencies and no network access.

use crate::config::CANONICAL_DIMENSIONS;
use crate::error::GodagentResult;
use crate::types::Vector;

/// Produces embeddings for text. Implementations must return vectors that
/// already satisfy [`crate::vector::validate`] (finite components, unit
/// L2 norm within tolerance, matching `dimensions()`).
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a single piece of text.
    fn embed(&self, text: &str) -> GodagentResult<Vector>;

    /// Embed a batch of texts. The default implementation calls
    /// [`EmbeddingProvider::embed`] once per item; providers backed by a
    /// batching-capable runtime should override this.
    fn embed_batch(&self, texts: &[String]) -> GodagentResult<Vec<Vector>> {
        texts.iter().map(|t| self.embed(t)).collect()
    }

    /// Dimensionality of vectors this provider produces.
    fn dimensions(&self) -> usize;

    /// Whether the provider is ready to serve requests. A provider that
    /// degrades (e.g. a remote API provider with no connectivity) should
    /// return `false` rather than erroring on every call.
    fn is_available(&self) -> bool {
        true
    }
}

/// Deterministic, dependency-free embedding provider. Hashes n-grams of the
/// input text into a fixed-width vector and L2-normalizes the result. It is
/// not semantically meaningful, but it is stable, always available, and
/// satisfies every vector invariant, which is what the index requires.
pub struct HashEmbedder {
    dimensions: usize,
}

impl HashEmbedder {
    /// Create a hash embedder producing vectors of `dimensions` components.
    pub fn new(dimensions: usize) -> Self {
        Self { dimensions }
    }

    /// Create a hash embedder at the canonical dimensionality.
    pub fn canonical() -> Self {
        Self::new(CANONICAL_DIMENSIONS)
    }
}

impl EmbeddingProvider for HashEmbedder {
    fn embed(&self, text: &str) -> GodagentResult<Vector> {
        let mut components = vec![0f32; self.dimensions];
        if text.is_empty() {
            components[0] = 1.0;
            return Ok(Vector(components));
        }

        let bytes = text.as_bytes();
        const WINDOW: usize = 3;
        let windows: Vec<&[u8]> = if bytes.len() < WINDOW {
            vec![bytes]
        } else {
            bytes.windows(WINDOW).collect()
        };

        for window in windows {
            let mut hasher = sha2::Sha256::default();
            sha2::Digest::update(&mut hasher, window);
            let digest = sha2::Digest::finalize(hasher);
            for chunk in digest.chunks_exact(4) {
                let raw = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
                let idx = (raw as usize) % self.dimensions;
                // Map to [-1, 1] so repeated hits can cancel rather than
                // only ever accumulate toward one sign.
                let sign = if raw & 1 == 0 { 1.0 } else { -1.0 };
                components[idx] += sign;
            }
        }

        let norm = components.iter().map(|c| f64::from(*c) * f64::from(*c)).sum::<f64>().sqrt();
        if norm < f64::EPSILON {
            components[0] = 1.0;
        } else {
            for c in &mut components {
                *c = (f64::from(*c) / norm) as f32;
            }
        }
        Ok(Vector(components))
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_embedder_is_deterministic() {
        let embedder = HashEmbedder::new(64);
        let a = embedder.embed("the quick brown fox").unwrap();
        let b = embedder.embed("the quick brown fox").unwrap();
        assert_eq!(a.0, b.0);
    }

    #[test]
    fn test_hash_embedder_is_normalized() {
        let embedder = HashEmbedder::new(128);
        let v = embedder.embed("some arbitrary input text").unwrap();
        assert!((v.norm() - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_hash_embedder_handles_empty_string() {
        let embedder = HashEmbedder::new(32);
        let v = embedder.embed("").unwrap();
        assert!((v.norm() - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_hash_embedder_dimensions_match() {
        let embedder = HashEmbedder::new(256);
        let v = embedder.embed("dimension check").unwrap();
        assert_eq!(v.dim(), 256);
        assert_eq!(embedder.dimensions(), 256);
    }

    #[test]
    fn test_hash_embedder_distinguishes_inputs() {
        let embedder = HashEmbedder::new(256);
        let a = embedder.embed("alpha").unwrap();
        let b = embedder.embed("beta").unwrap();
        assert_ne!(a.0, b.0);
    }

    #[test]
    fn test_batch_matches_single() {
        let embedder = HashEmbedder::new(64);
        let batch = embedder.embed_batch(&["one".to_string(), "two".to_string()]).unwrap();
        assert_eq!(batch[0].0, embedder.embed("one").unwrap().0);
        assert_eq!(batch[1].0, embedder.embed("two").unwrap().0);
    }
}
