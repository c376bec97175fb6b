// ── Engram: Working Memory ──────────────────────────────────────────────────
//
// Tier 1 of the three-tier architecture:
//   *Working Memory* (interaction burst) → Short-Term Store (weeks) → Long-Term Store (no expiry)
//
// Working Memory is a bounded, process-local cache of the most recently
// touched items. It is:
//   - Count-bounded: at most `capacity` items
//   - LRU-evicted: the least recently used item leaves first
//   - Non-persistent: nothing here survives the process
//
// It holds two kinds of entries: items whose home tier is Working (stored with
// a Working hint, not yet durable) and cached copies of durable items. When a
// Working-tier item is evicted it is handed back so the bridge can spill it to
// the short-term store. Cached copies are simply dropped.

use crate::atoms::engram_types::{
    EmbeddingState, MemoryItem, MemoryTier, ScoredId, SearchFilter, TierQuery,
};
use crate::atoms::error::EngineResult;
use crate::atoms::traits::TierStore;
use crate::engine::engram::codec::Codec;
use crate::engine::engram::short_term::lexical_score;
use crate::engine::engram::tokens;
use parking_lot::Mutex;
use std::collections::HashMap;

struct Slot {
    item: MemoryItem,
    last_used: u64,
}

#[derive(Default)]
struct WorkingState {
    slots: HashMap<String, Slot>,
    clock: u64,
    /// Working-tier items evicted through `TierStore::put`, awaiting the bridge.
    spilled: Vec<MemoryItem>,
}

impl WorkingState {
    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    fn evict_lru(&mut self) -> Option<MemoryItem> {
        let victim = self
            .slots
            .iter()
            .min_by(|a, b| a.1.last_used.cmp(&b.1.last_used).then_with(|| a.0.cmp(b.0)))
            .map(|(id, _)| id.clone())?;
        self.slots.remove(&victim).map(|s| s.item)
    }
}

/// Bounded LRU cache of memory items.
///
/// Internally synchronized; share behind an `Arc`.
pub struct WorkingMemory {
    state: Mutex<WorkingState>,
    capacity: usize,
    codec: Codec,
}

impl WorkingMemory {
    pub fn new(capacity: usize, codec: Codec) -> Self {
        Self { state: Mutex::new(WorkingState::default()), capacity: capacity.max(1), codec }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.state.lock().slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Insert or replace an item as most recently used.
    ///
    /// Returns every item evicted to make room.
    pub fn insert(&self, item: MemoryItem) -> Vec<MemoryItem> {
        let mut state = self.state.lock();
        let mut evicted = Vec::new();
        if !state.slots.contains_key(&item.id) {
            while state.slots.len() >= self.capacity {
                match state.evict_lru() {
                    Some(old) => evicted.push(old),
                    None => break,
                }
            }
        }
        let last_used = state.tick();
        state.slots.insert(item.id.clone(), Slot { item, last_used });
        evicted
    }

    /// Fetch and mark as most recently used.
    pub fn touch(&self, id: &str) -> Option<MemoryItem> {
        let mut state = self.state.lock();
        let now = state.tick();
        let slot = state.slots.get_mut(id)?;
        slot.last_used = now;
        Some(slot.item.clone())
    }

    /// Fetch without changing recency.
    pub fn peek(&self, id: &str) -> Option<MemoryItem> {
        self.state.lock().slots.get(id).map(|s| s.item.clone())
    }

    /// Replace a resident entry in place. No-op when `item` is not resident.
    pub fn refresh(&self, item: &MemoryItem) {
        let mut state = self.state.lock();
        if let Some(slot) = state.slots.get_mut(&item.id) {
            slot.item = item.clone();
        }
    }

    pub fn remove(&self, id: &str) -> Option<MemoryItem> {
        self.state.lock().slots.remove(id).map(|s| s.item)
    }

    /// Remove everything, returning the Working-tier items (cached copies of
    /// durable items are discarded). Used for flush-on-shutdown.
    pub fn drain(&self) -> Vec<MemoryItem> {
        let mut state = self.state.lock();
        let spilled = std::mem::take(&mut state.spilled);
        let mut items: Vec<MemoryItem> = state
            .slots
            .drain()
            .map(|(_, s)| s.item)
            .chain(spilled)
            .filter(|i| i.tier() == MemoryTier::Working)
            .collect();
        items.sort_by(|a, b| a.id.cmp(&b.id));
        items
    }

    /// Working-tier items evicted through `TierStore::put` since the last call.
    pub fn take_spilled(&self) -> Vec<MemoryItem> {
        std::mem::take(&mut self.state.lock().spilled)
    }

    /// Hand back spilled items the bridge failed to persist; the next spill retries them.
    pub fn requeue_spilled(&self, items: Vec<MemoryItem>) {
        if !items.is_empty() {
            self.state.lock().spilled.extend(items);
        }
    }

    /// Number of resident items whose home tier is Working.
    pub fn working_count(&self) -> usize {
        self.state.lock().slots.values().filter(|s| s.item.tier() == MemoryTier::Working).count()
    }

    fn score(&self, item: &MemoryItem, query: &TierQuery, terms: &[String]) -> f32 {
        let semantic = match (&query.vector, &item.embedding) {
            (Some(q), EmbeddingState::Compressed(c)) => self.codec.similarity(q, c).max(0.0),
            (Some(q), EmbeddingState::Dense(d)) => self.codec.similarity(q, &self.codec.compress(d)).max(0.0),
            _ => 0.0,
        };
        semantic.max(lexical_score(item, query, terms))
    }
}

impl TierStore for WorkingMemory {
    fn tier(&self) -> MemoryTier {
        MemoryTier::Working
    }

    fn put(&self, item: &MemoryItem) -> EngineResult<()> {
        let evicted = self.insert(item.clone());
        let spill: Vec<MemoryItem> = evicted.into_iter().filter(|i| i.tier() == MemoryTier::Working).collect();
        if !spill.is_empty() {
            self.state.lock().spilled.extend(spill);
        }
        Ok(())
    }

    fn get(&self, id: &str) -> EngineResult<Option<MemoryItem>> {
        Ok(self.touch(id))
    }

    fn delete(&self, id: &str) -> EngineResult<bool> {
        Ok(self.remove(id).is_some())
    }

    fn search(&self, query: &TierQuery, filter: &SearchFilter, limit: usize) -> EngineResult<Vec<ScoredId>> {
        let terms = tokens::terms(&query.text);
        let snapshot: Vec<MemoryItem> = self.state.lock().slots.values().map(|s| s.item.clone()).collect();
        let mut scored: Vec<ScoredId> = snapshot
            .iter()
            .filter(|item| filter.accepts(item))
            .map(|item| ScoredId { id: item.id.clone(), score: self.score(item, query, &terms) })
            .filter(|s| s.score > 0.0)
            .collect();
        scored.sort_by(|a, b| {
            b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal).then_with(|| a.id.cmp(&b.id))
        });
        scored.truncate(limit);
        Ok(scored)
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atoms::engram_types::ContextDescriptor;
    use chrono::Utc;

    fn item(id: &str, tier: MemoryTier, content: &str) -> MemoryItem {
        MemoryItem::new(id.into(), content.into(), tier, ContextDescriptor::default(), String::new(), Utc::now())
    }

    fn wm(capacity: usize) -> WorkingMemory {
        WorkingMemory::new(capacity, Codec::default())
    }

    #[test]
    fn evicts_least_recently_used() {
        let wm = wm(2);
        assert!(wm.insert(item("a", MemoryTier::Working, "alpha")).is_empty());
        assert!(wm.insert(item("b", MemoryTier::Working, "beta")).is_empty());
        // touching "a" makes "b" the LRU entry
        assert!(wm.touch("a").is_some());
        let evicted = wm.insert(item("c", MemoryTier::Working, "gamma"));
        assert_eq!(evicted.len(), 1);
        assert_eq!(evicted[0].id, "b");
        assert_eq!(wm.len(), 2);
        assert!(wm.peek("a").is_some());
    }

    #[test]
    fn replacing_does_not_evict() {
        let wm = wm(1);
        wm.insert(item("a", MemoryTier::Working, "v1"));
        assert!(wm.insert(item("a", MemoryTier::Working, "v2")).is_empty());
        assert_eq!(wm.peek("a").unwrap().content, "v2");
    }

    #[test]
    fn put_spills_only_working_tier_items() {
        let wm = wm(1);
        wm.put(&item("cached", MemoryTier::ShortTerm, "durable copy")).unwrap();
        wm.put(&item("w1", MemoryTier::Working, "fresh")).unwrap();
        assert!(wm.take_spilled().is_empty());
        wm.put(&item("w2", MemoryTier::Working, "fresher")).unwrap();
        let spilled = wm.take_spilled();
        assert_eq!(spilled.len(), 1);
        assert_eq!(spilled[0].id, "w1");
    }

    #[test]
    fn drain_returns_working_items_only() {
        let wm = wm(8);
        wm.insert(item("b", MemoryTier::Working, "x"));
        wm.insert(item("a", MemoryTier::Working, "y"));
        wm.insert(item("c", MemoryTier::LongTerm, "z"));
        assert_eq!(wm.working_count(), 2);
        let drained: Vec<String> = wm.drain().into_iter().map(|i| i.id).collect();
        assert_eq!(drained, vec!["a", "b"]);
        assert!(wm.is_empty());
    }

    #[test]
    fn search_ranks_by_keyword_and_context() {
        let wm = wm(8);
        wm.insert(item("1", MemoryTier::Working, "deploy the staging cluster"));
        wm.insert(item("2", MemoryTier::Working, "grocery list for the weekend"));
        let mut tagged = item("3", MemoryTier::Working, "unrelated text");
        tagged.context = ContextDescriptor::with_domain("devops");
        wm.insert(tagged);

        let q = TierQuery { text: "staging cluster".into(), ..Default::default() };
        let hits = wm.search(&q, &SearchFilter::default(), 10).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "1");

        let q = TierQuery { context: ContextDescriptor::with_domain("DevOps"), ..Default::default() };
        let hits = wm.search(&q, &SearchFilter::default(), 10).unwrap();
        assert_eq!(hits[0].id, "3");

        let filter = SearchFilter { source_agent: Some("nobody".into()), ..Default::default() };
        let q = TierQuery { text: "staging".into(), ..Default::default() };
        assert!(wm.search(&q, &filter, 10).unwrap().is_empty());
    }
}
