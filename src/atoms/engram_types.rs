// ── Paw Atoms: Engram Memory Types ─────────────────────────────────────────
// Pure data types for the tiered memory engine. No I/O, no side effects.
//
// Sections:
//   1. Tiers and context descriptors
//   2. Embeddings and memory items
//   3. Query state and interpretations
//   4. Synchronicity links
//   5. Results, reports and reasoning traces
//   6. Configuration

use crate::atoms::constants::*;
use crate::atoms::error::{EngineError, EngineResult};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

// ═══════════════════════════════════════════════════════════════════════════
// SECTION 1: Tiers and Context Descriptors
// ═══════════════════════════════════════════════════════════════════════════

/// Storage tier. Only the memory bridge moves an item between tiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryTier {
    Working,
    ShortTerm,
    LongTerm,
    Archived,
}

impl MemoryTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryTier::Working => "working",
            MemoryTier::ShortTerm => "short_term",
            MemoryTier::LongTerm => "long_term",
            MemoryTier::Archived => "archived",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "working" => Some(MemoryTier::Working),
            "short_term" => Some(MemoryTier::ShortTerm),
            "long_term" => Some(MemoryTier::LongTerm),
            "archived" => Some(MemoryTier::Archived),
            _ => None,
        }
    }

    /// Preference when the same id is seen in more than one tier.
    /// The durable long-term copy wins over a transient short-term copy.
    pub fn dedup_rank(&self) -> u8 {
        match self {
            MemoryTier::LongTerm => 3,
            MemoryTier::ShortTerm => 2,
            MemoryTier::Working => 1,
            MemoryTier::Archived => 0,
        }
    }

    /// Tiers a caller may ask `store()` to place new content in.
    pub fn is_entry_tier(&self) -> bool {
        matches!(self, MemoryTier::Working | MemoryTier::ShortTerm)
    }
}

impl std::fmt::Display for MemoryTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One of the seven independent context axes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextAxis {
    Domain,
    TemporalScope,
    Actor,
    Certainty,
    Modality,
    Locality,
    Valence,
}

impl ContextAxis {
    pub const ALL: [ContextAxis; 7] = [
        ContextAxis::Domain,
        ContextAxis::TemporalScope,
        ContextAxis::Actor,
        ContextAxis::Certainty,
        ContextAxis::Modality,
        ContextAxis::Locality,
        ContextAxis::Valence,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ContextAxis::Domain => "domain",
            ContextAxis::TemporalScope => "temporal_scope",
            ContextAxis::Actor => "actor",
            ContextAxis::Certainty => "certainty",
            ContextAxis::Modality => "modality",
            ContextAxis::Locality => "locality",
            ContextAxis::Valence => "valence",
        }
    }

    /// Column holding this axis in `memory_items`.
    pub fn column(&self) -> &'static str {
        match self {
            ContextAxis::Domain => "ctx_domain",
            ContextAxis::TemporalScope => "ctx_temporal_scope",
            ContextAxis::Actor => "ctx_actor",
            ContextAxis::Certainty => "ctx_certainty",
            ContextAxis::Modality => "ctx_modality",
            ContextAxis::Locality => "ctx_locality",
            ContextAxis::Valence => "ctx_valence",
        }
    }
}

/// Normalize a label for comparison: trimmed, lowercased, inner whitespace collapsed.
pub fn normalize_label(label: &str) -> String {
    label.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
}

/// Seven-axis structured metadata tagging an item or a query.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextDescriptor {
    pub domain: Option<String>,
    pub temporal_scope: Option<String>,
    pub actor: Option<String>,
    pub certainty: Option<String>,
    pub modality: Option<String>,
    pub locality: Option<String>,
    pub valence: Option<String>,
}

impl ContextDescriptor {
    pub fn with_domain(domain: impl Into<String>) -> Self {
        Self { domain: Some(domain.into()), ..Default::default() }
    }

    /// Builder-style setter for any axis.
    pub fn with(mut self, axis: ContextAxis, value: impl Into<String>) -> Self {
        self.set(axis, Some(value.into()));
        self
    }

    pub fn get(&self, axis: ContextAxis) -> Option<&str> {
        let slot = match axis {
            ContextAxis::Domain => &self.domain,
            ContextAxis::TemporalScope => &self.temporal_scope,
            ContextAxis::Actor => &self.actor,
            ContextAxis::Certainty => &self.certainty,
            ContextAxis::Modality => &self.modality,
            ContextAxis::Locality => &self.locality,
            ContextAxis::Valence => &self.valence,
        };
        slot.as_deref()
    }

    pub fn set(&mut self, axis: ContextAxis, value: Option<String>) {
        let slot = match axis {
            ContextAxis::Domain => &mut self.domain,
            ContextAxis::TemporalScope => &mut self.temporal_scope,
            ContextAxis::Actor => &mut self.actor,
            ContextAxis::Certainty => &mut self.certainty,
            ContextAxis::Modality => &mut self.modality,
            ContextAxis::Locality => &mut self.locality,
            ContextAxis::Valence => &mut self.valence,
        };
        *slot = value;
    }

    /// Normalized value of an axis, `None` when unset.
    pub fn normalized(&self, axis: ContextAxis) -> Option<String> {
        self.get(axis).map(normalize_label)
    }

    pub fn present_axes(&self) -> Vec<ContextAxis> {
        ContextAxis::ALL.iter().copied().filter(|a| self.get(*a).is_some()).collect()
    }

    pub fn absent_axes(&self) -> Vec<ContextAxis> {
        ContextAxis::ALL.iter().copied().filter(|a| self.get(*a).is_none()).collect()
    }

    pub fn is_empty(&self) -> bool {
        ContextAxis::ALL.iter().all(|a| self.get(*a).is_none())
    }

    /// Reject labels a caller could not have meant: blank, oversized, or
    /// containing control characters.
    pub fn validate(&self) -> EngineResult<()> {
        for axis in ContextAxis::ALL {
            let Some(value) = self.get(axis) else { continue };
            if value.trim().is_empty() {
                return Err(EngineError::MalformedContext(format!(
                    "{} label is blank",
                    axis.as_str()
                )));
            }
            if value.len() > MAX_CONTEXT_LABEL_BYTES {
                return Err(EngineError::MalformedContext(format!(
                    "{} label exceeds {} bytes",
                    axis.as_str(),
                    MAX_CONTEXT_LABEL_BYTES
                )));
            }
            if value.chars().any(|c| c.is_control()) {
                return Err(EngineError::MalformedContext(format!(
                    "{} label contains control characters",
                    axis.as_str()
                )));
            }
        }
        Ok(())
    }

    /// True when both descriptors carry the same (normalized) value on `axis`.
    pub fn agrees_on(&self, other: &ContextDescriptor, axis: ContextAxis) -> bool {
        match (self.normalized(axis), other.normalized(axis)) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        }
    }

    /// Shared axis values over axes present in either descriptor.
    /// Two empty descriptors have similarity 0.
    pub fn similarity(&self, other: &ContextDescriptor) -> f32 {
        let mut union = 0usize;
        let mut shared = 0usize;
        for axis in ContextAxis::ALL {
            if self.get(axis).is_some() || other.get(axis).is_some() {
                union += 1;
                if self.agrees_on(other, axis) {
                    shared += 1;
                }
            }
        }
        if union == 0 {
            0.0
        } else {
            shared as f32 / union as f32
        }
    }

    /// Fraction of `query`'s present axes that this descriptor satisfies.
    /// `None` when the query constrains no axis.
    pub fn match_fraction(&self, query: &ContextDescriptor) -> Option<f32> {
        let present = query.present_axes();
        if present.is_empty() {
            return None;
        }
        let hits = present.iter().filter(|a| self.agrees_on(query, **a)).count();
        Some(hits as f32 / present.len() as f32)
    }

    /// Fill axes unset here from `other`. Existing values win.
    pub fn merge_missing(&mut self, other: &ContextDescriptor) {
        for axis in ContextAxis::ALL {
            if self.get(axis).is_none() {
                if let Some(v) = other.get(axis) {
                    self.set(axis, Some(v.to_string()));
                }
            }
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// SECTION 2: Embeddings and Memory Items
// ═══════════════════════════════════════════════════════════════════════════

/// Sparse top-k form of a dense embedding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompressedEmbedding {
    pub original_dim: u32,
    /// Retained positions, strictly ascending.
    pub indices: Vec<u32>,
    /// Signed value at each retained position.
    pub values: Vec<f32>,
    /// `len(indices) / original_dim`.
    pub sparsity_ratio: f32,
}

/// Exactly one embedding state per item. `Absent` marks a degraded item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum EmbeddingState {
    Dense(Vec<f32>),
    Compressed(CompressedEmbedding),
    Absent,
}

impl EmbeddingState {
    pub fn is_absent(&self) -> bool {
        matches!(self, EmbeddingState::Absent)
    }

    pub fn compressed(&self) -> Option<&CompressedEmbedding> {
        match self {
            EmbeddingState::Compressed(c) => Some(c),
            _ => None,
        }
    }
}

/// A single stored piece of content.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryItem {
    pub id: String,
    pub content: String,
    pub(crate) tier: MemoryTier,
    pub embedding: EmbeddingState,
    pub context: ContextDescriptor,
    pub created_at: DateTime<Utc>,
    pub last_accessed_at: DateTime<Utc>,
    pub access_count: u32,
    /// Recent access timestamps (bounded) for the rolling promotion window.
    pub access_log: Vec<DateTime<Utc>>,
    pub pinned: bool,
    pub source_agent: String,
    /// No usable embedding; reachable by keyword and context only.
    pub degraded: bool,
    /// Long-term item not accessed within the stale window.
    pub stale: bool,
}

impl MemoryItem {
    /// A fresh item in `tier`. Only the bridge calls this with a tier.
    pub(crate) fn new(
        id: String,
        content: String,
        tier: MemoryTier,
        context: ContextDescriptor,
        source_agent: String,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            content,
            tier,
            embedding: EmbeddingState::Absent,
            context,
            created_at: now,
            last_accessed_at: now,
            access_count: 0,
            access_log: Vec::new(),
            pinned: false,
            source_agent,
            degraded: false,
            stale: false,
        }
    }

    pub fn tier(&self) -> MemoryTier {
        self.tier
    }

    pub(crate) fn set_tier(&mut self, tier: MemoryTier) {
        self.tier = tier;
    }

    /// Register one access at `now`. The log keeps only the newest entries.
    pub fn record_access(&mut self, now: DateTime<Utc>) {
        self.access_count = self.access_count.saturating_add(1);
        self.last_accessed_at = now;
        self.stale = false;
        self.access_log.push(now);
        if self.access_log.len() > ACCESS_LOG_CAP {
            let excess = self.access_log.len() - ACCESS_LOG_CAP;
            self.access_log.drain(..excess);
        }
    }

    /// Accesses inside the rolling window ending at `now`.
    pub fn accesses_within(&self, now: DateTime<Utc>, window: Duration) -> usize {
        let start = now - window;
        self.access_log.iter().filter(|t| **t >= start && **t <= now).count()
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// SECTION 3: Query State and Interpretations
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterpretationOrigin {
    Literal,
    LateralFocus,
    LateralShadow,
}

impl InterpretationOrigin {
    pub fn rank(&self) -> u8 {
        match self {
            InterpretationOrigin::Literal => 0,
            InterpretationOrigin::LateralFocus => 1,
            InterpretationOrigin::LateralShadow => 2,
        }
    }
}

/// One candidate reading of a query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Interpretation {
    pub text: String,
    pub weight: f32,
    pub origin: InterpretationOrigin,
    /// Context this reading assumes; scored against each item's descriptor.
    pub context: ContextDescriptor,
}

impl Interpretation {
    pub fn literal(text: impl Into<String>, context: ContextDescriptor) -> Self {
        Self { text: text.into(), weight: 1.0, origin: InterpretationOrigin::Literal, context }
    }
}

/// A query as a weighted set of interpretations.
///
/// The constructor guarantees the set is never empty and the weights sum to 1.
/// Deserialized states go through the same constructor.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(from = "StoredQueryState")]
pub struct QueryState {
    pub raw_query: String,
    interpretations: Vec<Interpretation>,
    pub collapsed: bool,
}

#[derive(Deserialize)]
struct StoredQueryState {
    raw_query: String,
    #[serde(default)]
    interpretations: Vec<Interpretation>,
    #[serde(default)]
    collapsed: bool,
}

impl From<StoredQueryState> for QueryState {
    fn from(stored: StoredQueryState) -> Self {
        let mut state = QueryState::new(stored.raw_query, stored.interpretations, &ContextDescriptor::default());
        // Only a single reading can be collapsed.
        state.collapsed = stored.collapsed && state.interpretations.len() == 1;
        state
    }
}

impl QueryState {
    /// Build a state from candidate interpretations. An empty or all-zero set
    /// falls back to a single literal reading of `raw_query`.
    pub fn new(
        raw_query: impl Into<String>,
        interpretations: Vec<Interpretation>,
        fallback_context: &ContextDescriptor,
    ) -> Self {
        let raw_query = raw_query.into();
        let mut interpretations: Vec<Interpretation> = interpretations
            .into_iter()
            .filter(|i| i.weight.is_finite() && i.weight > 0.0 && !i.text.trim().is_empty())
            .collect();
        let total: f32 = interpretations.iter().map(|i| i.weight).sum();
        if interpretations.is_empty() || total <= f32::EPSILON {
            let err = EngineError::EmptyInterpretationSet(raw_query.clone());
            log::debug!("[engram:query] {}, falling back to literal", err);
            return Self::literal(raw_query, fallback_context.clone());
        }
        for interp in interpretations.iter_mut() {
            interp.weight /= total;
        }
        Self { raw_query, interpretations, collapsed: false }
    }

    pub fn literal(raw_query: impl Into<String>, context: ContextDescriptor) -> Self {
        let raw_query = raw_query.into();
        let interp = Interpretation::literal(raw_query.clone(), context);
        Self { raw_query, interpretations: vec![interp], collapsed: false }
    }

    pub fn interpretations(&self) -> &[Interpretation] {
        &self.interpretations
    }

    /// Index and weight of the heaviest interpretation. Ties go to the earlier one.
    pub fn dominant(&self) -> (usize, f32) {
        let mut best = (0usize, f32::MIN);
        for (idx, interp) in self.interpretations.iter().enumerate() {
            if interp.weight > best.1 {
                best = (idx, interp.weight);
            }
        }
        best
    }

    /// Resolve to the interpretation at `index`. Out-of-range indices keep the
    /// dominant interpretation.
    pub fn collapse_to(&self, index: usize) -> QueryState {
        let idx = if index < self.interpretations.len() { index } else { self.dominant().0 };
        let mut chosen = self.interpretations[idx].clone();
        chosen.weight = 1.0;
        QueryState { raw_query: self.raw_query.clone(), interpretations: vec![chosen], collapsed: true }
    }

    /// Re-enter a previously collapsed interpretation (session reuse).
    pub fn resumed(raw_query: impl Into<String>, interpretation: Interpretation) -> Self {
        let mut interpretation = interpretation;
        interpretation.weight = 1.0;
        Self { raw_query: raw_query.into(), interpretations: vec![interpretation], collapsed: true }
    }

    pub fn total_weight(&self) -> f32 {
        self.interpretations.iter().map(|i| i.weight).sum()
    }
}

/// What the caller knows at query time.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextEvidence {
    /// Most recent conversational topic; fills the domain axis.
    pub recent_topic: Option<String>,
    /// Explicit axis hints.
    pub context: ContextDescriptor,
    /// Caller-preferred reading; collapses the state when it matches one.
    pub preferred_interpretation: Option<String>,
    /// Scopes collapse reuse across calls.
    pub session_id: Option<String>,
}

impl ContextEvidence {
    pub fn with_recent_topic(topic: impl Into<String>) -> Self {
        Self { recent_topic: Some(topic.into()), ..Default::default() }
    }

    pub fn in_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Explicit context with `recent_topic` filling an unset domain.
    pub fn effective_context(&self) -> ContextDescriptor {
        let mut ctx = self.context.clone();
        if ctx.domain.is_none() {
            if let Some(topic) = self.recent_topic.as_ref().filter(|t| !t.trim().is_empty()) {
                ctx.domain = Some(topic.clone());
            }
        }
        ctx
    }

    pub fn validate(&self) -> EngineResult<()> {
        self.context.validate()?;
        if let Some(topic) = &self.recent_topic {
            ContextDescriptor::with_domain(topic.clone())
                .validate()
                .map_err(|e| EngineError::MalformedContext(format!("recent_topic: {}", e)))?;
        }
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// SECTION 4: Synchronicity Links
// ═══════════════════════════════════════════════════════════════════════════

/// Similarity discovered between two items whose descriptors are unrelated.
/// Stored once per unordered pair; `source_id` is the smaller id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SynchronicityLink {
    pub source_id: String,
    pub target_id: String,
    pub strength: f32,
    pub discovered_at: DateTime<Utc>,
    pub rationale: String,
}

impl SynchronicityLink {
    /// `None` for a self-link.
    pub fn new(
        a: &str,
        b: &str,
        strength: f32,
        rationale: String,
        discovered_at: DateTime<Utc>,
    ) -> Option<Self> {
        if a == b {
            return None;
        }
        let (source_id, target_id) = if a < b { (a, b) } else { (b, a) };
        Some(Self {
            source_id: source_id.to_string(),
            target_id: target_id.to_string(),
            strength: strength.clamp(0.0, 1.0),
            discovered_at,
            rationale,
        })
    }

    /// The other end of the link as seen from `id`.
    pub fn other(&self, id: &str) -> Option<&str> {
        if self.source_id == id {
            Some(&self.target_id)
        } else if self.target_id == id {
            Some(&self.source_id)
        } else {
            None
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// SECTION 5: Results, Reports, Reasoning Traces
// ═══════════════════════════════════════════════════════════════════════════

/// Per-tier search input.
#[derive(Debug, Clone, Default)]
pub struct TierQuery {
    pub text: String,
    pub vector: Option<CompressedEmbedding>,
    /// Context hints that add metadata candidates.
    pub context: ContextDescriptor,
}

/// Restrictive filter applied to tier search results.
#[derive(Debug, Clone, Default)]
pub struct SearchFilter {
    /// Every axis set here must match the item.
    pub context: ContextDescriptor,
    pub source_agent: Option<String>,
}

impl SearchFilter {
    pub fn accepts(&self, item: &MemoryItem) -> bool {
        if let Some(agent) = &self.source_agent {
            if &item.source_agent != agent {
                return false;
            }
        }
        self.context
            .present_axes()
            .iter()
            .all(|axis| item.context.agrees_on(&self.context, *axis))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredId {
    pub id: String,
    pub score: f32,
}

/// An interpretation that ranked a result in its top-N.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contribution {
    pub text: String,
    pub origin: InterpretationOrigin,
    pub similarity: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankedResult {
    pub id: String,
    pub content: String,
    pub tier: MemoryTier,
    pub context: ContextDescriptor,
    /// Interference score.
    pub score: f32,
    pub contributions: Vec<Contribution>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResponse {
    pub results: Vec<RankedResult>,
    pub state: QueryState,
    pub ambiguity: f32,
    /// Score cutoff implied by a collapsed state.
    pub cutoff: Option<f32>,
    pub trace: Option<ReasoningTrace>,
    /// Some interpretations or tiers did not finish.
    pub degraded: bool,
}

impl QueryResponse {
    /// Results at or above the collapse cutoff (all results when not collapsed).
    pub fn resolved(&self) -> impl Iterator<Item = &RankedResult> {
        let cutoff = self.cutoff.unwrap_or(f32::MIN);
        self.results.iter().filter(move |r| r.score >= cutoff)
    }
}

/// Outcome of one hypothesis step.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HypothesisOutcome {
    pub top_id: Option<String>,
    pub top_content: Option<String>,
    /// Descriptor of the top result, used to refine the next step.
    pub context: ContextDescriptor,
    pub confidence: f32,
    /// The step hit its deadline; hits come from the readings that finished.
    #[serde(default)]
    pub partial: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReasoningStep {
    pub index: usize,
    pub sub_query: String,
    pub outcome: Option<HypothesisOutcome>,
    /// Partial, timed out or failed; the chain moved on.
    pub degraded: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReasoningTrace {
    pub steps: Vec<ReasoningStep>,
    pub refined: ContextEvidence,
    pub best: Option<HypothesisOutcome>,
    pub cancelled: bool,
    pub budget_exhausted: bool,
    pub confident: bool,
}

/// Result of one bridge sweep.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SweepReport {
    pub promoted: usize,
    pub promotion_failures: usize,
    pub archived: usize,
    pub flagged_stale: usize,
    pub re_embedded: usize,
    pub links_discovered: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompactionReport {
    pub index_entries_dropped: usize,
    pub archived_rows_purged: usize,
    /// Audit entries older than the archive retention window.
    pub audit_rows_purged: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngramStats {
    pub working: usize,
    pub short_term: usize,
    pub long_term: usize,
    pub archived: usize,
    pub degraded: usize,
    pub links: usize,
    pub index_live: usize,
    pub index_tombstones: usize,
}

// ═══════════════════════════════════════════════════════════════════════════
// SECTION 6: Configuration
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CodecConfig {
    pub sparsity_ratio: f32,
    /// Upper bound on retained fraction; validation rejects anything above it.
    pub sparsity_ceiling: f32,
    pub correction_factor: f32,
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            sparsity_ratio: DEFAULT_SPARSITY_RATIO,
            sparsity_ceiling: DEFAULT_SPARSITY_CEILING,
            correction_factor: DEFAULT_CORRECTION_FACTOR,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TierConfig {
    pub working_capacity: usize,
    pub promotion_min_accesses: u32,
    pub promotion_window_days: i64,
    pub decay_window_days: i64,
    pub stale_window_days: i64,
    /// Archived rows older than this are purged by `compact()`.
    pub archive_retention_days: i64,
    pub sweep_interval_secs: u64,
    pub reembed_batch: usize,
}

impl Default for TierConfig {
    fn default() -> Self {
        Self {
            working_capacity: DEFAULT_WORKING_CAPACITY,
            promotion_min_accesses: DEFAULT_PROMOTION_MIN_ACCESSES,
            promotion_window_days: DEFAULT_PROMOTION_WINDOW_DAYS,
            decay_window_days: DEFAULT_DECAY_WINDOW_DAYS,
            stale_window_days: DEFAULT_STALE_WINDOW_DAYS,
            archive_retention_days: DEFAULT_ARCHIVE_RETENTION_DAYS,
            sweep_interval_secs: DEFAULT_SWEEP_INTERVAL_SECS,
            reembed_batch: DEFAULT_REEMBED_BATCH,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SynchronicityConfig {
    pub enabled: bool,
    pub threshold: f32,
    /// Pairs whose descriptor similarity reaches this are already related.
    pub max_descriptor_similarity: f32,
    /// Pairwise comparisons per scan before yielding until the next sweep.
    pub max_comparisons: usize,
}

impl Default for SynchronicityConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold: DEFAULT_SYNCHRONICITY_THRESHOLD,
            max_descriptor_similarity: DEFAULT_SYNCHRONICITY_MAX_DESCRIPTOR_SIMILARITY,
            max_comparisons: DEFAULT_SYNCHRONICITY_MAX_COMPARISONS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LateralConfig {
    pub literal_baseline: f32,
    /// Literal weight never drops below this before normalization.
    pub literal_floor: f32,
    pub focus_unit: f32,
    pub shadow_unit: f32,
    pub max_shadows: usize,
}

impl Default for LateralConfig {
    fn default() -> Self {
        Self {
            literal_baseline: 1.0,
            literal_floor: 0.05,
            focus_unit: 1.0,
            shadow_unit: 0.5,
            max_shadows: 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReasonerConfig {
    pub max_steps: usize,
    pub step_timeout_ms: u64,
    pub chain_timeout_ms: u64,
    pub confidence_threshold: f32,
}

impl Default for ReasonerConfig {
    fn default() -> Self {
        Self {
            max_steps: 4,
            step_timeout_ms: 1_500,
            chain_timeout_ms: 4_000,
            confidence_threshold: 0.75,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    pub ambiguity_threshold: f32,
    pub collapse_threshold: f32,
    /// Cutoff = ratio × top score once the state is collapsed.
    pub collapse_cutoff_ratio: f32,
    pub top_n: usize,
    pub constructive_bonus: f32,
    pub destructive_penalty: f32,
    /// Two interpretations are comparable when their weights differ by at most this.
    pub comparable_margin: f32,
    pub stale_factor: f32,
    pub semantic_weight: f32,
    pub keyword_weight: f32,
    pub context_weight: f32,
    /// Candidates requested from each tier per interpretation.
    pub candidate_limit: usize,
    pub query_timeout_ms: u64,
    pub session_cache_size: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            ambiguity_threshold: DEFAULT_AMBIGUITY_THRESHOLD,
            collapse_threshold: DEFAULT_COLLAPSE_THRESHOLD,
            collapse_cutoff_ratio: DEFAULT_COLLAPSE_CUTOFF_RATIO,
            top_n: DEFAULT_TOP_N,
            constructive_bonus: 0.05,
            destructive_penalty: 0.05,
            comparable_margin: 0.1,
            stale_factor: 0.8,
            semantic_weight: 0.5,
            keyword_weight: 0.2,
            context_weight: 0.3,
            candidate_limit: 50,
            query_timeout_ms: DEFAULT_QUERY_TIMEOUT_MS,
            session_cache_size: DEFAULT_SESSION_CACHE_SIZE,
        }
    }
}

/// Bounded retries with exponential backoff for the embedding provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self { max_retries: 3, initial_delay_ms: 200, max_delay_ms: 5_000, backoff_multiplier: 2.0 }
    }
}

/// HTTP embedding endpoint (Ollama or OpenAI-compatible).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingEndpointConfig {
    pub base_url: String,
    pub model: String,
    pub dimension: usize,
    pub request_timeout_secs: u64,
}

impl Default for EmbeddingEndpointConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".into(),
            model: "nomic-embed-text".into(),
            dimension: 768,
            request_timeout_secs: 60,
        }
    }
}

/// Top-level engine configuration. Every section falls back to defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngramConfig {
    /// Directory for `short_term.db` / `long_term.db`. `None` keeps both in memory.
    pub data_dir: Option<PathBuf>,
    pub codec: CodecConfig,
    pub tiers: TierConfig,
    pub synchronicity: SynchronicityConfig,
    pub lateral: LateralConfig,
    pub reasoner: ReasonerConfig,
    pub retrieval: RetrievalConfig,
    pub retry: RetryConfig,
    pub embedding: EmbeddingEndpointConfig,
}

impl EngramConfig {
    pub fn from_toml_str(s: &str) -> EngineResult<Self> {
        let config: EngramConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> EngineResult<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }

    pub fn validate(&self) -> EngineResult<()> {
        fn unit(name: &str, v: f32) -> EngineResult<()> {
            if !(v.is_finite() && (0.0..=1.0).contains(&v)) {
                return Err(EngineError::Config(format!("{} must be within [0, 1], got {}", name, v)));
            }
            Ok(())
        }
        let c = &self.codec;
        if !(c.sparsity_ratio > 0.0 && c.sparsity_ratio <= 1.0) {
            return Err(EngineError::Config(format!(
                "codec.sparsity_ratio must be within (0, 1], got {}",
                c.sparsity_ratio
            )));
        }
        if c.sparsity_ratio > c.sparsity_ceiling {
            return Err(EngineError::Config(format!(
                "codec.sparsity_ratio {} exceeds sparsity_ceiling {}",
                c.sparsity_ratio, c.sparsity_ceiling
            )));
        }
        unit("codec.sparsity_ceiling", c.sparsity_ceiling)?;
        if !(c.correction_factor.is_finite() && c.correction_factor > 0.0) {
            return Err(EngineError::Config("codec.correction_factor must be positive".into()));
        }

        let t = &self.tiers;
        if t.working_capacity == 0 {
            return Err(EngineError::Config("tiers.working_capacity must be at least 1".into()));
        }
        if t.promotion_min_accesses == 0 {
            return Err(EngineError::Config("tiers.promotion_min_accesses must be at least 1".into()));
        }
        for (name, days) in [
            ("tiers.promotion_window_days", t.promotion_window_days),
            ("tiers.decay_window_days", t.decay_window_days),
            ("tiers.stale_window_days", t.stale_window_days),
            ("tiers.archive_retention_days", t.archive_retention_days),
        ] {
            if days <= 0 {
                return Err(EngineError::Config(format!("{} must be positive", name)));
            }
        }
        if t.sweep_interval_secs == 0 {
            return Err(EngineError::Config("tiers.sweep_interval_secs must be positive".into()));
        }

        unit("synchronicity.threshold", self.synchronicity.threshold)?;
        unit("synchronicity.max_descriptor_similarity", self.synchronicity.max_descriptor_similarity)?;

        let r = &self.retrieval;
        unit("retrieval.ambiguity_threshold", r.ambiguity_threshold)?;
        unit("retrieval.collapse_threshold", r.collapse_threshold)?;
        unit("retrieval.collapse_cutoff_ratio", r.collapse_cutoff_ratio)?;
        unit("retrieval.comparable_margin", r.comparable_margin)?;
        unit("retrieval.stale_factor", r.stale_factor)?;
        if r.top_n == 0 || r.candidate_limit == 0 {
            return Err(EngineError::Config("retrieval.top_n and candidate_limit must be positive".into()));
        }
        if r.semantic_weight + r.keyword_weight + r.context_weight <= 0.0 {
            return Err(EngineError::Config("retrieval signal weights must not all be zero".into()));
        }

        unit("reasoner.confidence_threshold", self.reasoner.confidence_threshold)?;
        if self.reasoner.max_steps == 0 {
            return Err(EngineError::Config("reasoner.max_steps must be at least 1".into()));
        }
        if self.lateral.literal_baseline <= 0.0 || self.lateral.focus_unit < 0.0 || self.lateral.shadow_unit < 0.0 {
            return Err(EngineError::Config("lateral weights must be non-negative with a positive literal baseline".into()));
        }
        if self.retry.backoff_multiplier < 1.0 {
            return Err(EngineError::Config("retry.backoff_multiplier must be >= 1".into()));
        }
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    fn interp(text: &str, weight: f32, origin: InterpretationOrigin) -> Interpretation {
        Interpretation { text: text.into(), weight, origin, context: ContextDescriptor::default() }
    }

    #[test]
    fn descriptor_validation_rejects_malformed_labels() {
        assert!(ContextDescriptor::with_domain("AI agents").validate().is_ok());
        assert!(ContextDescriptor::with_domain("   ").validate().is_err());
        assert!(ContextDescriptor::with_domain("bad\u{0007}label").validate().is_err());
        let long = "x".repeat(MAX_CONTEXT_LABEL_BYTES + 1);
        let err = ContextDescriptor::default()
            .with(ContextAxis::Actor, long)
            .validate()
            .unwrap_err();
        assert!(matches!(err, EngineError::MalformedContext(_)));
    }

    #[test]
    fn descriptor_similarity_is_case_insensitive() {
        let a = ContextDescriptor::with_domain("AI Agents").with(ContextAxis::Actor, "user");
        let b = ContextDescriptor::with_domain("ai  agents");
        // union {domain, actor}, shared {domain}
        assert!((a.similarity(&b) - 0.5).abs() < 1e-6);
        assert_eq!(ContextDescriptor::default().similarity(&ContextDescriptor::default()), 0.0);
        assert_eq!(a.match_fraction(&b), Some(1.0));
        assert_eq!(a.match_fraction(&ContextDescriptor::default()), None);
    }

    #[test]
    fn query_state_normalizes_weights() {
        let state = QueryState::new(
            "q",
            vec![
                interp("a", 2.0, InterpretationOrigin::Literal),
                interp("b", 1.0, InterpretationOrigin::LateralFocus),
                interp("c", 1.0, InterpretationOrigin::LateralShadow),
            ],
            &ContextDescriptor::default(),
        );
        assert_eq!(state.interpretations().len(), 3);
        assert!((state.total_weight() - 1.0).abs() < 1e-6);
        assert!((state.interpretations()[0].weight - 0.5).abs() < 1e-6);
    }

    #[test]
    fn query_state_never_empty() {
        let state = QueryState::new("what now", vec![], &ContextDescriptor::default());
        assert_eq!(state.interpretations().len(), 1);
        assert_eq!(state.interpretations()[0].origin, InterpretationOrigin::Literal);
        assert_eq!(state.interpretations()[0].text, "what now");
        assert!((state.total_weight() - 1.0).abs() < 1e-6);

        let zeroed = QueryState::new(
            "q",
            vec![interp("a", 0.0, InterpretationOrigin::LateralShadow)],
            &ContextDescriptor::default(),
        );
        assert_eq!(zeroed.interpretations()[0].origin, InterpretationOrigin::Literal);
    }

    #[test]
    fn collapse_keeps_single_interpretation() {
        let state = QueryState::new(
            "q",
            vec![
                interp("a", 0.2, InterpretationOrigin::Literal),
                interp("b", 0.8, InterpretationOrigin::LateralFocus),
            ],
            &ContextDescriptor::default(),
        );
        assert_eq!(state.dominant().0, 1);
        let collapsed = state.collapse_to(1);
        assert!(collapsed.collapsed);
        assert_eq!(collapsed.interpretations().len(), 1);
        assert_eq!(collapsed.interpretations()[0].text, "b");
        assert!((collapsed.total_weight() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn deserialized_state_is_renormalized() {
        let state: QueryState =
            serde_json::from_str(r#"{"raw_query":"what is it","interpretations":[],"collapsed":true}"#).unwrap();
        assert_eq!(state.interpretations().len(), 1);
        assert_eq!(state.interpretations()[0].origin, InterpretationOrigin::Literal);
        assert_eq!(state.interpretations()[0].text, "what is it");
        assert!((state.total_weight() - 1.0).abs() < 1e-6);

        let mut two = QueryState::new(
            "q",
            vec![interp("a", 1.0, InterpretationOrigin::Literal), interp("b", 1.0, InterpretationOrigin::LateralShadow)],
            &ContextDescriptor::default(),
        );
        two.collapsed = true;
        let mut json = serde_json::to_value(&two).unwrap();
        json["interpretations"][0]["weight"] = serde_json::json!(3.0);
        json["interpretations"][1]["weight"] = serde_json::json!(-1.0);
        let back: QueryState = serde_json::from_value(json).unwrap();
        assert_eq!(back.interpretations().len(), 1);
        assert_eq!(back.interpretations()[0].text, "a");
        assert!((back.total_weight() - 1.0).abs() < 1e-6);
        assert!(back.collapsed);

        let round: QueryState = serde_json::from_str(&serde_json::to_string(&two).unwrap()).unwrap();
        assert_eq!(round.interpretations().len(), 2);
        assert!(!round.collapsed);
    }

    #[test]
    fn access_log_is_bounded_and_windowed() {
        let now = Utc::now();
        let mut item = MemoryItem::new(
            "id".into(),
            "c".into(),
            MemoryTier::ShortTerm,
            ContextDescriptor::default(),
            String::new(),
            now,
        );
        item.record_access(now - Duration::days(30));
        item.record_access(now - Duration::days(2));
        item.record_access(now);
        assert_eq!(item.access_count, 3);
        assert_eq!(item.accesses_within(now, Duration::days(7)), 2);
        for _ in 0..100 {
            item.record_access(now);
        }
        assert_eq!(item.access_log.len(), ACCESS_LOG_CAP);
    }

    #[test]
    fn link_orders_ids_and_rejects_self() {
        let now = Utc::now();
        let link = SynchronicityLink::new("zeta", "alpha", 0.9, "r".into(), now).unwrap();
        assert_eq!(link.source_id, "alpha");
        assert_eq!(link.target_id, "zeta");
        assert_eq!(link.other("zeta"), Some("alpha"));
        assert!(SynchronicityLink::new("same", "same", 0.9, "r".into(), now).is_none());
    }

    #[test]
    fn evidence_topic_fills_domain() {
        let ev = ContextEvidence::with_recent_topic("AI agents");
        assert_eq!(ev.effective_context().domain.as_deref(), Some("AI agents"));
        let explicit = ContextEvidence {
            recent_topic: Some("travel".into()),
            context: ContextDescriptor::with_domain("finance"),
            ..Default::default()
        };
        assert_eq!(explicit.effective_context().domain.as_deref(), Some("finance"));
    }

    #[test]
    fn config_parses_partial_toml() {
        let cfg = EngramConfig::from_toml_str(
            "[retrieval]\ncollapse_threshold = 0.6\n\n[tiers]\nworking_capacity = 8\n",
        )
        .unwrap();
        assert!((cfg.retrieval.collapse_threshold - 0.6).abs() < 1e-6);
        assert_eq!(cfg.tiers.working_capacity, 8);
        assert_eq!(cfg.tiers.decay_window_days, DEFAULT_DECAY_WINDOW_DAYS);
        assert!((cfg.codec.correction_factor - DEFAULT_CORRECTION_FACTOR).abs() < 1e-6);
    }

    #[test]
    fn config_rejects_out_of_range() {
        let err = EngramConfig::from_toml_str("[retrieval]\ncollapse_threshold = 1.5\n").unwrap_err();
        assert!(matches!(err, EngineError::Config(_)));
        let err = EngramConfig::from_toml_str("[codec]\nsparsity_ratio = 0.5\n").unwrap_err();
        assert!(matches!(err, EngineError::Config(_)));
        assert!(matches!(
            EngramConfig::from_toml_str("tiers = 3").unwrap_err(),
            EngineError::ConfigParse(_)
        ));
    }
}
