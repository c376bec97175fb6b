// ── Engram: Short-Term Store ────────────────────────────────────────────────
//
// Tier 2: durable, time-bounded, keyword/metadata indexed.
//
// Candidates come from FTS5 (content + context labels) and exact context-axis
// matches. A candidate scores the best of keyword coverage, context match and,
// when the query carries a vector, compressed-embedding similarity.
// Retention is enforced by the bridge's decay sweep, not here.

use crate::atoms::engram_types::{MemoryItem, MemoryTier, ScoredId, SearchFilter, TierQuery};
use crate::atoms::error::EngineResult;
use crate::atoms::traits::TierStore;
use crate::engine::engram::codec::Codec;
use crate::engine::engram::tokens;
use crate::engine::store::EngramStore;

pub struct ShortTermStore {
    db: EngramStore,
    codec: Codec,
}

impl ShortTermStore {
    pub fn new(db: EngramStore, codec: Codec) -> Self {
        Self { db, codec }
    }

    pub fn db(&self) -> &EngramStore {
        &self.db
    }
}

/// Keyword coverage over content plus context labels, or context match,
/// whichever is higher.
pub(crate) fn lexical_score(item: &MemoryItem, query: &TierQuery, terms: &[String]) -> f32 {
    let mut labelled = item.content.clone();
    for axis in item.context.present_axes() {
        if let Some(v) = item.context.get(axis) {
            labelled.push(' ');
            labelled.push_str(v);
        }
    }
    let keyword = tokens::keyword_coverage(terms, &labelled);
    let context = item.context.match_fraction(&query.context).unwrap_or(0.0);
    keyword.max(context)
}

impl ShortTermStore {
    fn score(&self, item: &MemoryItem, query: &TierQuery, terms: &[String]) -> f32 {
        let semantic = match (&query.vector, item.embedding.compressed()) {
            (Some(q), Some(c)) => self.codec.similarity(q, c).max(0.0),
            _ => 0.0,
        };
        semantic.max(lexical_score(item, query, terms))
    }
}

impl TierStore for ShortTermStore {
    fn tier(&self) -> MemoryTier {
        MemoryTier::ShortTerm
    }

    fn put(&self, item: &MemoryItem) -> EngineResult<()> {
        self.db.upsert_item(item)
    }

    fn get(&self, id: &str) -> EngineResult<Option<MemoryItem>> {
        self.db.get_item(id)
    }

    fn delete(&self, id: &str) -> EngineResult<bool> {
        self.db.delete_item(id)
    }

    fn search(&self, query: &TierQuery, filter: &SearchFilter, limit: usize) -> EngineResult<Vec<ScoredId>> {
        let terms = tokens::terms(&query.text);
        let mut scored: Vec<ScoredId> = self
            .db
            .keyword_candidates(query, limit.saturating_mul(2).max(limit))?
            .iter()
            .filter(|item| item.tier() == MemoryTier::ShortTerm && filter.accepts(item))
            .map(|item| ScoredId { id: item.id.clone(), score: self.score(item, query, &terms) })
            .collect();
        scored.sort_by(|a, b| {
            b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal).then_with(|| a.id.cmp(&b.id))
        });
        scored.truncate(limit);
        Ok(scored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atoms::engram_types::{ContextDescriptor, EmbeddingState};
    use crate::engine::engram::codec;
    use crate::engine::memory::HashEmbedder;
    use chrono::Utc;

    fn st() -> ShortTermStore {
        ShortTermStore::new(EngramStore::open_in_memory("short_term").unwrap(), Codec::default())
    }

    fn put(store: &ShortTermStore, id: &str, content: &str, domain: &str, agent: &str) {
        let item = MemoryItem::new(
            id.into(),
            content.into(),
            MemoryTier::ShortTerm,
            ContextDescriptor::with_domain(domain),
            agent.into(),
            Utc::now(),
        );
        store.put(&item).unwrap();
    }

    #[test]
    fn keyword_search_ranks_by_coverage() {
        let s = st();
        put(&s, "full", "quarterly revenue forecast spreadsheet", "finance", "a");
        put(&s, "half", "revenue dashboard", "finance", "a");
        put(&s, "none", "hiking trail map", "outdoors", "a");

        let q = TierQuery { text: "revenue forecast".into(), ..Default::default() };
        let hits = s.search(&q, &SearchFilter::default(), 10).unwrap();
        let ids: Vec<&str> = hits.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, vec!["full", "half"]);
        assert!(hits[0].score > hits[1].score);
    }

    #[test]
    fn filter_restricts_by_agent_and_axis() {
        let s = st();
        put(&s, "1", "release checklist", "engineering", "planner");
        put(&s, "2", "release party venue", "social", "planner");
        put(&s, "3", "release notes draft", "engineering", "writer");

        let q = TierQuery { text: "release".into(), ..Default::default() };
        let filter = SearchFilter {
            context: ContextDescriptor::with_domain("Engineering"),
            source_agent: Some("planner".into()),
        };
        let hits = s.search(&q, &filter, 10).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "1");
    }

    #[test]
    fn delete_removes_from_search() {
        let s = st();
        put(&s, "x", "ephemeral scratch note", "misc", "a");
        assert!(s.delete("x").unwrap());
        assert!(!s.delete("x").unwrap());
        let q = TierQuery { text: "scratch".into(), ..Default::default() };
        assert!(s.search(&q, &SearchFilter::default(), 10).unwrap().is_empty());
        assert!(s.get("x").unwrap().is_none());
    }

    #[test]
    fn function_word_content_is_found_by_its_own_text() {
        let s = st();
        let embedder = HashEmbedder::default();
        for (id, content) in [("what", "What is it?"), ("this", "Is this it?"), ("topic", "Is the deploy done?")] {
            let mut item = MemoryItem::new(
                id.into(),
                content.into(),
                MemoryTier::ShortTerm,
                ContextDescriptor::default(),
                "a".into(),
                Utc::now(),
            );
            item.embedding = EmbeddingState::Compressed(codec::compress(&embedder.embed_sync(content).unwrap(), 0.1));
            s.put(&item).unwrap();
        }

        let vector = Some(codec::compress(&embedder.embed_sync("What is it?").unwrap(), 0.1));
        let q = TierQuery { text: "What is it?".into(), vector, ..Default::default() };
        let hits = s.search(&q, &SearchFilter::default(), 10).unwrap();
        assert_eq!(hits[0].id, "what");
        assert!(hits[0].score > 0.99);
        assert!(hits.iter().all(|h| h.id != "topic"));

        // no vector: the all-words FTS match still finds it
        let q = TierQuery { text: "is this it".into(), ..Default::default() };
        let hits = s.search(&q, &SearchFilter::default(), 10).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "this");
    }
}
