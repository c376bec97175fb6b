// Paw Engram: Local Hash Embedder
//
// Deterministic feature-hashing embeddings. No network, no model download:
// each content term lands on one signed dimension. Texts that share terms
// end up close; texts that share none are orthogonal (modulo collisions).
// Used for offline operation and for tests.

use crate::atoms::error::{EngineError, EngineResult};
use crate::atoms::traits::EmbeddingProvider;
use crate::engine::engram::tokens;
use async_trait::async_trait;

pub const HASH_EMBEDDER_DIMENSION: usize = 384;

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

fn fnv1a(bytes: &[u8]) -> u64 {
    bytes.iter().fold(FNV_OFFSET, |h, b| (h ^ *b as u64).wrapping_mul(FNV_PRIME))
}

pub struct HashEmbedder {
    dimension: usize,
}

impl HashEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self { dimension: dimension.max(1) }
    }

    /// Synchronous core, shared by the trait impl and benches.
    pub fn embed_sync(&self, text: &str) -> EngineResult<Vec<f32>> {
        let mut features = tokens::terms(text);
        if features.is_empty() {
            // Function-word-only text still gets a vector.
            features = tokens::words(text);
        }
        if features.is_empty() {
            return Err(EngineError::embedding("hash", "nothing to embed"));
        }
        let mut v = vec![0.0f32; self.dimension];
        for term in features {
            let h = fnv1a(tokens::fold(&term).as_bytes());
            let idx = (h % self.dimension as u64) as usize;
            let sign = if (h >> 63) == 0 { 1.0 } else { -1.0 };
            v[idx] += sign;
        }
        Ok(v)
    }
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self::new(HASH_EMBEDDER_DIMENSION)
    }
}

#[async_trait]
impl EmbeddingProvider for HashEmbedder {
    async fn embed(&self, text: &str) -> EngineResult<Vec<f32>> {
        self.embed_sync(text)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> &str {
        "feature-hash"
    }
}
