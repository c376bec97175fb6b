// ── Engram: Quantum-Inspired Retrieval ──────────────────────────────────────
//
// A query is held as a superposition of weighted interpretations until
// evidence collapses it:
//
//   1. Ambiguity score below threshold → literal reading only
//   2. Otherwise the lateral expander builds the weighted set
//   3. A caller hint, a dominant weight, or an earlier collapse in the same
//      session collapses the set to one reading
//   4. Every remaining reading is retrieved concurrently (tier searches on
//      the blocking pool) under one overall deadline; stragglers are dropped
//   5. Interference scoring:
//        score(item) = Σ_i w_i · sim(item, i)
//                    + bonus    if ≥ 2 readings rank the item in their top-N
//                    − penalty  if the item sits in one of two comparable-weight
//                               readings whose top-N sets are disjoint
//      stale long-term items are scaled down; scores never go negative
//   6. Results sorted by score desc, id asc; a collapsed state sets
//      cutoff = ratio × top score
//
// Readings are always scored in a canonical order, so the order the expander
// (or a caller) lists them in cannot change the ranking.

use crate::atoms::engram_types::{
    normalize_label, CompressedEmbedding, ContextAxis, ContextDescriptor, ContextEvidence,
    Contribution, HypothesisOutcome, Interpretation, MemoryItem, QueryResponse, QueryState,
    RankedResult, RetrievalConfig, SearchFilter, TierQuery,
};
use crate::atoms::error::{EngineError, EngineResult};
use crate::engine::engram::ambiguity;
use crate::engine::engram::bridge::MemoryBridge;
use crate::engine::engram::cancel::CancelToken;
use crate::engine::engram::codec::Codec;
use crate::engine::engram::lateral::LateralExpander;
use crate::engine::engram::reasoner::{HypothesisExecutor, SequentialReasoner};
use crate::engine::engram::tokens;
use async_trait::async_trait;
use chrono::Utc;
use log::{debug, info, warn};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{timeout_at, Instant};

// ═══════════════════════════════════════════════════════════════════════════
// Interference scoring (pure)
// ═══════════════════════════════════════════════════════════════════════════

/// A reading together with its compressed query embedding, when one exists.
#[derive(Debug, Clone)]
pub struct Reading {
    pub interpretation: Interpretation,
    pub vector: Option<CompressedEmbedding>,
}

fn context_key(ctx: &ContextDescriptor) -> String {
    ContextAxis::ALL
        .iter()
        .filter_map(|a| ctx.normalized(*a).map(|v| format!("{}={}", a.as_str(), v)))
        .collect::<Vec<_>>()
        .join(";")
}

fn canonical_order(a: &Reading, b: &Reading) -> std::cmp::Ordering {
    let (x, y) = (&a.interpretation, &b.interpretation);
    x.origin
        .rank()
        .cmp(&y.origin.rank())
        .then_with(|| x.text.cmp(&y.text))
        .then_with(|| context_key(&x.context).cmp(&context_key(&y.context)))
        .then_with(|| x.weight.total_cmp(&y.weight))
}

/// Blend of semantic, keyword and context similarity, renormalized over the
/// signals actually available for this pair.
pub fn blended_similarity(
    item: &MemoryItem,
    reading: &Reading,
    terms: &[String],
    codec: &Codec,
    config: &RetrievalConfig,
) -> f32 {
    let mut num = 0.0f32;
    let mut den = 0.0f32;
    if let (Some(q), Some(c)) = (reading.vector.as_ref(), item.embedding.compressed()) {
        num += config.semantic_weight * codec.similarity(q, c).max(0.0);
        den += config.semantic_weight;
    }
    if !terms.is_empty() {
        num += config.keyword_weight * tokens::keyword_coverage(terms, &item.content);
        den += config.keyword_weight;
    }
    if let Some(m) = item.context.match_fraction(&reading.interpretation.context) {
        num += config.context_weight * m;
        den += config.context_weight;
    }
    if den <= 0.0 {
        0.0
    } else {
        (num / den).clamp(0.0, 1.0)
    }
}

/// Score `items` against every reading and rank them.
pub fn interfere(readings: &[Reading], items: &[MemoryItem], codec: &Codec, config: &RetrievalConfig) -> Vec<RankedResult> {
    let mut readings: Vec<&Reading> = readings.iter().collect();
    readings.sort_by(|a, b| canonical_order(a, b));
    let mut items: Vec<&MemoryItem> = items.iter().collect();
    items.sort_by(|a, b| a.id.cmp(&b.id));

    // sims[p][i]
    let sims: Vec<Vec<f32>> = readings
        .iter()
        .map(|p| {
            let terms = tokens::terms(&p.interpretation.text);
            items.iter().map(|item| blended_similarity(item, p, &terms, codec, config)).collect()
        })
        .collect();

    let top_sets: Vec<HashSet<usize>> = sims
        .iter()
        .map(|row| {
            let mut ranked: Vec<usize> = (0..row.len()).filter(|i| row[*i] > 0.0).collect();
            ranked.sort_by(|a, b| row[*b].total_cmp(&row[*a]).then_with(|| items[*a].id.cmp(&items[*b].id)));
            ranked.into_iter().take(config.top_n).collect()
        })
        .collect();

    let mut penalized: HashSet<usize> = HashSet::new();
    for a in 0..readings.len() {
        for b in (a + 1)..readings.len() {
            let (wa, wb) = (readings[a].interpretation.weight, readings[b].interpretation.weight);
            if (wa - wb).abs() > config.comparable_margin {
                continue;
            }
            let (sa, sb) = (&top_sets[a], &top_sets[b]);
            if !sa.is_empty() && !sb.is_empty() && sa.is_disjoint(sb) {
                penalized.extend(sa.iter().copied());
                penalized.extend(sb.iter().copied());
            }
        }
    }

    let mut results = Vec::new();
    for (idx, item) in items.iter().enumerate() {
        let mut score = 0.0f32;
        let mut contributions = Vec::new();
        let mut shared = 0;
        for (p, reading) in readings.iter().enumerate() {
            let sim = sims[p][idx];
            score += reading.interpretation.weight * sim;
            if top_sets[p].contains(&idx) {
                shared += 1;
                contributions.push(Contribution {
                    text: reading.interpretation.text.clone(),
                    origin: reading.interpretation.origin,
                    similarity: sim,
                });
            }
        }
        if shared >= 2 {
            score += config.constructive_bonus;
        }
        if penalized.contains(&idx) {
            score -= config.destructive_penalty;
        }
        if item.stale {
            score *= config.stale_factor;
        }
        let score = score.max(0.0);
        if score <= 0.0 {
            continue;
        }
        results.push(RankedResult {
            id: item.id.clone(),
            content: item.content.clone(),
            tier: item.tier(),
            context: item.context.clone(),
            score,
            contributions,
        });
    }
    results.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.id.cmp(&b.id)));
    results
}

// ═══════════════════════════════════════════════════════════════════════════
// Collapse
// ═══════════════════════════════════════════════════════════════════════════

fn matches_hint(interp: &Interpretation, hint: &str) -> bool {
    normalize_label(&interp.text) == hint
        || ContextAxis::ALL.iter().any(|a| interp.context.normalized(*a).as_deref() == Some(hint))
}

/// Apply a caller hint, then the dominance rule (weight strictly above
/// `threshold`). A hint matching several readings picks the heaviest; ties
/// go to the earlier one. Single readings pass through.
fn collapse(state: &QueryState, evidence: &ContextEvidence, threshold: f32) -> QueryState {
    let interps = state.interpretations();
    if interps.len() < 2 {
        return state.clone();
    }
    if let Some(hint) = evidence.preferred_interpretation.as_deref().map(normalize_label) {
        let mut best: Option<(usize, f32)> = None;
        for (idx, interp) in interps.iter().enumerate().filter(|(_, i)| matches_hint(i, &hint)) {
            if best.map_or(true, |(_, w)| interp.weight > w) {
                best = Some((idx, interp.weight));
            }
        }
        if let Some((idx, _)) = best {
            return state.collapse_to(idx);
        }
    }
    let (idx, weight) = state.dominant();
    if weight > threshold {
        state.collapse_to(idx)
    } else {
        state.clone()
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Session collapse cache
// ═══════════════════════════════════════════════════════════════════════════

struct SessionCache {
    entries: HashMap<(String, String), Interpretation>,
    order: VecDeque<(String, String)>,
    capacity: usize,
}

impl SessionCache {
    fn new(capacity: usize) -> Self {
        Self { entries: HashMap::new(), order: VecDeque::new(), capacity }
    }

    fn get(&self, key: &(String, String)) -> Option<Interpretation> {
        self.entries.get(key).cloned()
    }

    fn put(&mut self, key: (String, String), interp: Interpretation) {
        if self.capacity == 0 {
            return;
        }
        if self.entries.insert(key.clone(), interp).is_none() {
            self.order.push_back(key);
        }
        while self.order.len() > self.capacity {
            if let Some(old) = self.order.pop_front() {
                self.entries.remove(&old);
            }
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Retriever
// ═══════════════════════════════════════════════════════════════════════════

pub struct QuantumRetriever {
    bridge: Arc<MemoryBridge>,
    expander: LateralExpander,
    reasoner: SequentialReasoner,
    config: RetrievalConfig,
    sessions: Mutex<SessionCache>,
}

/// Candidate ids one reading pulled from the tiers.
struct Retrieved {
    reading: Reading,
    ids: Vec<String>,
    /// The query embedding failed; keyword and context signals only.
    embedding_failed: bool,
}

impl QuantumRetriever {
    pub fn new(
        bridge: Arc<MemoryBridge>,
        expander: LateralExpander,
        reasoner: SequentialReasoner,
        config: RetrievalConfig,
    ) -> Self {
        let sessions = Mutex::new(SessionCache::new(config.session_cache_size));
        Self { bridge, expander, reasoner, config, sessions }
    }

    pub async fn query(
        &self,
        raw: &str,
        evidence: &ContextEvidence,
        limit: usize,
        cancel: &CancelToken,
    ) -> EngineResult<QueryResponse> {
        if raw.trim().is_empty() {
            return Err(EngineError::InvalidInput("query is blank".into()));
        }
        if limit == 0 {
            return Err(EngineError::InvalidInput("limit must be at least 1".into()));
        }
        evidence.validate()?;

        let trace = if self.reasoner.applies_to(raw) {
            let executor = StepExecutor { retriever: self };
            Some(self.reasoner.run(raw, evidence, &executor, cancel).await)
        } else {
            None
        };
        let evidence = trace.as_ref().map(|t| t.refined.clone()).unwrap_or_else(|| evidence.clone());
        let context = evidence.effective_context();

        let vocabulary = self.bridge.vocabulary()?;
        let report = ambiguity::analyze(raw, &vocabulary);

        let session_key = evidence.session_id.as_ref().map(|s| (s.clone(), normalize_label(raw)));
        let resumed = session_key.as_ref().and_then(|k| self.sessions.lock().get(k));

        let state = match resumed {
            Some(interp) => {
                debug!("[engram:query] Reusing collapsed reading '{}' for session", interp.text);
                QueryState::resumed(raw, interp)
            }
            None => {
                let expanded = if report.is_ambiguous(self.config.ambiguity_threshold) {
                    self.expander.expand(raw, &evidence, &report, &vocabulary)
                } else {
                    QueryState::literal(raw, context)
                };
                let collapsed = collapse(&expanded, &evidence, self.config.collapse_threshold);
                if let (Some(key), true) = (session_key, collapsed.collapsed) {
                    if let Some(chosen) = collapsed.interpretations().first() {
                        self.sessions.lock().put(key, chosen.clone());
                    }
                }
                collapsed
            }
        };

        let deadline = Instant::now() + Duration::from_millis(self.config.query_timeout_ms);
        let (mut results, degraded) = self.superpose(&state, deadline).await?;
        results.truncate(limit);
        let cutoff = if state.collapsed {
            results.first().map(|r| r.score * self.config.collapse_cutoff_ratio)
        } else {
            None
        };

        let response = QueryResponse { results, state, ambiguity: report.score, cutoff, trace, degraded };
        self.record_accesses(&response);
        info!(
            "[engram:query] '{}' ambiguity={:.2} readings={} collapsed={} results={}{}",
            raw,
            response.ambiguity,
            response.state.interpretations().len(),
            response.state.collapsed,
            response.results.len(),
            if response.degraded { " (degraded)" } else { "" }
        );
        Ok(response)
    }

    /// Retrieve every reading under one deadline and score the union of what
    /// finished. The flag is set when a reading or its embedding did not.
    async fn superpose(&self, state: &QueryState, deadline: Instant) -> EngineResult<(Vec<RankedResult>, bool)> {
        let readings = state.interpretations().to_vec();
        let expected = readings.len();
        let retrieved: Vec<Option<Retrieved>> =
            futures::future::join_all(readings.into_iter().map(|interp| self.retrieve(interp, deadline))).await;

        let finished: Vec<Retrieved> = retrieved.into_iter().flatten().collect();
        let mut degraded = finished.len() < expected;
        degraded |= finished.iter().any(|r| r.embedding_failed);

        let mut ids: Vec<String> = finished.iter().flat_map(|r| r.ids.iter().cloned()).collect();
        ids.sort();
        ids.dedup();
        let items: Vec<MemoryItem> = self.bridge.load_active(&ids)?.into_values().collect();
        let readings: Vec<Reading> = finished.into_iter().map(|r| r.reading).collect();
        Ok((interfere(&readings, &items, self.bridge.codec(), &self.config), degraded))
    }

    async fn retrieve(&self, interpretation: Interpretation, deadline: Instant) -> Option<Retrieved> {
        // Leave at least half the remaining budget for the tier searches.
        let now = Instant::now();
        let embed_deadline = now + deadline.saturating_duration_since(now) / 2;
        let (vector, embedding_failed) =
            match timeout_at(embed_deadline, self.bridge.embed_compressed(&interpretation.text)).await {
                Ok(Ok(c)) => (Some(c), false),
                Ok(Err(e)) => {
                    debug!("[engram:query] No embedding for '{}': {}", interpretation.text, e);
                    (None, true)
                }
                Err(_) => {
                    debug!("[engram:query] Embedding '{}' timed out", interpretation.text);
                    (None, true)
                }
            };

        let query = TierQuery {
            text: interpretation.text.clone(),
            vector: vector.clone(),
            context: interpretation.context.clone(),
        };
        let bridge = self.bridge.clone();
        let limit = self.config.candidate_limit;
        let search = tokio::task::spawn_blocking(move || {
            let mut ids = Vec::new();
            for store in bridge.tier_stores() {
                match store.search(&query, &SearchFilter::default(), limit) {
                    Ok(hits) => ids.extend(hits.into_iter().map(|h| h.id)),
                    Err(e) => warn!("[engram:query] {} search failed: {}", store.tier(), e),
                }
            }
            ids
        });

        match timeout_at(deadline, search).await {
            Ok(Ok(ids)) => Some(Retrieved { reading: Reading { interpretation, vector }, ids, embedding_failed }),
            Ok(Err(e)) => {
                warn!("[engram:query] Search task for '{}' failed: {}", interpretation.text, e);
                None
            }
            Err(_) => {
                warn!("[engram:query] Reading '{}' missed the query deadline", interpretation.text);
                None
            }
        }
    }

    /// Count a retrieval as an access for every result above the cutoff.
    fn record_accesses(&self, response: &QueryResponse) {
        let now = Utc::now();
        for result in response.resolved() {
            if let Err(e) = self.bridge.touch(&result.id, now) {
                warn!("[engram:query] Could not record access for {}: {}", result.id, e);
            }
        }
    }

    /// Literal retrieval for one reasoning step, cut off at `deadline`.
    async fn literal_hypothesis(
        &self,
        sub_query: &str,
        evidence: &ContextEvidence,
        deadline: Instant,
    ) -> EngineResult<HypothesisOutcome> {
        let state = QueryState::literal(sub_query, evidence.effective_context());
        let (results, partial) = self.superpose(&state, deadline).await?;
        Ok(match results.into_iter().next() {
            Some(top) => HypothesisOutcome {
                top_id: Some(top.id),
                top_content: Some(top.content),
                context: top.context,
                confidence: top.score,
                partial,
            },
            None => HypothesisOutcome { partial, ..Default::default() },
        })
    }
}

struct StepExecutor<'a> {
    retriever: &'a QuantumRetriever,
}

#[async_trait]
impl HypothesisExecutor for StepExecutor<'_> {
    async fn execute(
        &self,
        sub_query: &str,
        evidence: &ContextEvidence,
        deadline: Instant,
    ) -> EngineResult<HypothesisOutcome> {
        self.retriever.literal_hypothesis(sub_query, evidence, deadline).await
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════
