// ── Engram: Long-Term Store ─────────────────────────────────────────────────
//
// Tier 3: durable, similarity-indexed, no default expiry.
//
// Rows live in long_term.db. An in-memory index of compressed embeddings
// answers vector queries. The index is append-mostly: a replacement appends a
// new entry and tombstones the old one; deletes only tombstone. `compact()`
// rebuilds it without tombstones and is never run implicitly.
//
// Degraded items (no embedding) are still reachable through the keyword path.

use crate::atoms::engram_types::{
    CompressedEmbedding, EmbeddingState, MemoryItem, MemoryTier, ScoredId, SearchFilter, TierQuery,
};
use crate::atoms::error::EngineResult;
use crate::atoms::traits::TierStore;
use crate::engine::engram::codec::Codec;
use crate::engine::engram::short_term::lexical_score;
use crate::engine::engram::tokens;
use crate::engine::store::EngramStore;
use log::info;
use parking_lot::RwLock;
use std::collections::HashMap;

struct IndexEntry {
    id: String,
    embedding: CompressedEmbedding,
    live: bool,
}

/// Append-mostly similarity index with mark-and-skip deletion.
#[derive(Default)]
pub struct SimilarityIndex {
    entries: Vec<IndexEntry>,
    positions: HashMap<String, usize>,
    tombstones: usize,
}

impl SimilarityIndex {
    pub fn insert(&mut self, id: &str, embedding: CompressedEmbedding) {
        self.remove(id);
        self.positions.insert(id.to_string(), self.entries.len());
        self.entries.push(IndexEntry { id: id.to_string(), embedding, live: true });
    }

    /// Tombstone the live entry for `id`. Returns whether one existed.
    pub fn remove(&mut self, id: &str) -> bool {
        match self.positions.remove(id) {
            Some(pos) => {
                self.entries[pos].live = false;
                self.tombstones += 1;
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.positions.contains_key(id)
    }

    pub fn live_len(&self) -> usize {
        self.positions.len()
    }

    pub fn tombstones(&self) -> usize {
        self.tombstones
    }

    /// Rebuild without tombstones. Returns the number of entries dropped.
    pub fn compact(&mut self) -> usize {
        let dropped = self.tombstones;
        let entries = std::mem::take(&mut self.entries);
        self.positions.clear();
        for entry in entries.into_iter().filter(|e| e.live) {
            self.positions.insert(entry.id.clone(), self.entries.len());
            self.entries.push(entry);
        }
        self.tombstones = 0;
        dropped
    }

    /// Live entries with positive similarity, best first.
    pub fn nearest(&self, codec: &Codec, query: &CompressedEmbedding, limit: usize) -> Vec<ScoredId> {
        let mut hits: Vec<ScoredId> = self
            .entries
            .iter()
            .filter(|e| e.live)
            .map(|e| ScoredId { id: e.id.clone(), score: codec.similarity(query, &e.embedding) })
            .filter(|s| s.score > 0.0)
            .collect();
        hits.sort_by(|a, b| {
            b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal).then_with(|| a.id.cmp(&b.id))
        });
        hits.truncate(limit);
        hits
    }
}

pub struct LongTermStore {
    db: EngramStore,
    index: RwLock<SimilarityIndex>,
    codec: Codec,
}

impl LongTermStore {
    /// Wrap a tier database and load the similarity index from it.
    pub fn open(db: EngramStore, codec: Codec) -> EngineResult<Self> {
        let mut index = SimilarityIndex::default();
        for item in db.list_embedded()? {
            if item.tier() != MemoryTier::LongTerm {
                continue;
            }
            if let EmbeddingState::Compressed(c) = item.embedding {
                index.insert(&item.id, c);
            }
        }
        info!("[engram] Long-term index loaded with {} entries", index.live_len());
        Ok(Self { db, index: RwLock::new(index), codec })
    }

    pub fn db(&self) -> &EngramStore {
        &self.db
    }

    /// Attach a fresh embedding to an existing row and index it.
    pub fn update_embedding(&self, id: &str, embedding: &CompressedEmbedding) -> EngineResult<bool> {
        let updated = self.db.update_embedding(id, embedding)?;
        if updated {
            self.index.write().insert(id, embedding.clone());
        }
        Ok(updated)
    }

    pub fn compact(&self) -> usize {
        let dropped = self.index.write().compact();
        if dropped > 0 {
            info!("[engram] Compacted long-term index, dropped {} tombstones", dropped);
        }
        dropped
    }

    /// (live entries, tombstones)
    pub fn index_stats(&self) -> (usize, usize) {
        let index = self.index.read();
        (index.live_len(), index.tombstones())
    }

    pub fn is_indexed(&self, id: &str) -> bool {
        self.index.read().contains(id)
    }
}

impl TierStore for LongTermStore {
    fn tier(&self) -> MemoryTier {
        MemoryTier::LongTerm
    }

    fn put(&self, item: &MemoryItem) -> EngineResult<()> {
        self.db.upsert_item(item)?;
        let mut index = self.index.write();
        match &item.embedding {
            EmbeddingState::Compressed(c) if item.tier() == MemoryTier::LongTerm => index.insert(&item.id, c.clone()),
            EmbeddingState::Dense(d) if item.tier() == MemoryTier::LongTerm => {
                index.insert(&item.id, self.codec.compress(d))
            }
            _ => {
                index.remove(&item.id);
            }
        }
        Ok(())
    }

    fn get(&self, id: &str) -> EngineResult<Option<MemoryItem>> {
        self.db.get_item(id)
    }

    fn delete(&self, id: &str) -> EngineResult<bool> {
        let removed = self.db.delete_item(id)?;
        self.index.write().remove(id);
        Ok(removed)
    }

    fn search(&self, query: &TierQuery, filter: &SearchFilter, limit: usize) -> EngineResult<Vec<ScoredId>> {
        let mut scores: HashMap<String, f32> = HashMap::new();

        if let Some(vector) = &query.vector {
            let nearest = self.index.read().nearest(&self.codec, vector, limit.saturating_mul(2).max(limit));
            for hit in nearest {
                scores.insert(hit.id, hit.score);
            }
        }

        let terms = tokens::terms(&query.text);
        let mut items: HashMap<String, MemoryItem> = self
            .db
            .keyword_candidates(query, limit.saturating_mul(2).max(limit))?
            .into_iter()
            .map(|i| (i.id.clone(), i))
            .collect();
        for item in items.values() {
            let s = lexical_score(item, query, &terms);
            let entry = scores.entry(item.id.clone()).or_insert(0.0);
            *entry = entry.max(s);
        }

        // Vector hits still need the row for filtering.
        let missing: Vec<String> = scores.keys().filter(|id| !items.contains_key(*id)).cloned().collect();
        for item in self.db.load_items(&missing)? {
            items.insert(item.id.clone(), item);
        }

        let mut ranked: Vec<ScoredId> = scores
            .into_iter()
            .filter(|(id, score)| {
                *score > 0.0
                    && items
                        .get(id)
                        .is_some_and(|item| item.tier() == MemoryTier::LongTerm && filter.accepts(item))
            })
            .map(|(id, score)| ScoredId { id, score })
            .collect();
        ranked.sort_by(|a, b| {
            b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal).then_with(|| a.id.cmp(&b.id))
        });
        ranked.truncate(limit);
        Ok(ranked)
    }
}
