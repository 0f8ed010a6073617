//! Feature-hashing embedder.
//!
//! Maps each lowercase alphanumeric token to a bucket with FNV-1a and adds a
//! signed count there. The result carries no learned semantics but is fully
//! deterministic, needs no model files, and ranks texts sharing vocabulary
//! close together, which makes it a usable offline fallback.

use crate::error::Result;
use crate::provider::{EmbeddingProvider, EmbeddingResult, l2_normalize, model_id};
use async_trait::async_trait;
use fnv::FnvHasher;
use std::hash::Hasher;

#[derive(Debug, Clone)]
pub struct HashingProvider {
    dimension: usize,
    normalize: bool,
}

impl HashingProvider {
    pub fn new(dimension: usize, normalize: bool) -> Self {
        Self {
            dimension,
            normalize,
        }
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];
        if self.dimension == 0 {
            return vector;
        }

        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let mut hasher = FnvHasher::default();
            for c in token.chars().flat_map(char::to_lowercase) {
                let mut buf = [0u8; 4];
                hasher.write(c.encode_utf8(&mut buf).as_bytes());
            }
            let hash = hasher.finish();
            let bucket = (hash % self.dimension as u64) as usize;
            // The top bit picks the sign so colliding tokens tend to cancel
            let sign = if hash >> 63 == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }

        if self.normalize {
            l2_normalize(&mut vector);
        }
        vector
    }
}

#[async_trait]
impl EmbeddingProvider for HashingProvider {
    async fn embed_texts(&self, texts: &[String]) -> Result<EmbeddingResult> {
        let embeddings = texts.iter().map(|t| self.embed_one(t)).collect();
        Ok(EmbeddingResult::new(embeddings))
    }

    fn embedding_dimension(&self) -> usize {
        self.dimension
    }

    fn provider_name(&self) -> &str {
        "hashing"
    }

    fn model_id(&self) -> String {
        model_id(self.provider_name(), "fnv1a", self.dimension, self.normalize)
    }
}
