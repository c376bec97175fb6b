// ── Paw Atoms: Seams ───────────────────────────────────────────────────────
// The two interfaces the engine is wired through:
//   - TierStore: one implementation per tier backend, dispatched by tier
//   - EmbeddingProvider: the external model that turns text into vectors

use crate::atoms::engram_types::{MemoryItem, MemoryTier, ScoredId, SearchFilter, TierQuery};
use crate::atoms::error::EngineResult;
use async_trait::async_trait;

/// Common contract for the working, short-term and long-term stores.
///
/// `search` is read-only and must not block writes to other items.
pub trait TierStore: Send + Sync {
    fn tier(&self) -> MemoryTier;

    /// Insert or replace an item.
    fn put(&self, item: &MemoryItem) -> EngineResult<()>;

    fn get(&self, id: &str) -> EngineResult<Option<MemoryItem>>;

    /// Returns whether a row was removed.
    fn delete(&self, id: &str) -> EngineResult<bool>;

    /// Ranked ids, best first.
    fn search(
        &self,
        query: &TierQuery,
        filter: &SearchFilter,
        limit: usize,
    ) -> EngineResult<Vec<ScoredId>>;
}

/// External embedding model.
///
/// Contract: identical `(text, model)` gives identical output, and non-empty
/// input gives a vector with non-zero norm of length `dimension()`.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, text: &str) -> EngineResult<Vec<f32>>;

    fn dimension(&self) -> usize;

    fn model_name(&self) -> &str;
}
