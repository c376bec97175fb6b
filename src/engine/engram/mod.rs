// ── Engram: Hybrid Memory Module ────────────────────────────────────────────
//
// Three tiers with ambiguity-aware retrieval on top.
//
// Architecture:
//   Working Memory (bounded cache) → Short-Term (SQLite) → Long-Term (SQLite + similarity index)
//
// Sub-modules:
//   - codec: Sparse top-k embedding compression and similarity
//   - tokens: Word splitting, stopwords, reference words, FTS expressions
//   - schema: Tier database tables and migrations
//   - working_memory / short_term / long_term: the three TierStore backends
//   - locks: Striped per-item locks for tier transitions
//   - cancel: Cancellation token for sweeps and reasoning chains
//   - bridge: Promotion, decay, stale flags, re-embedding, the sweep task
//   - synchronicity: Cross-domain link discovery
//   - ambiguity: Referential pressure + interpretive entropy
//   - lateral: Focus and shadow readings of an ambiguous query
//   - reasoner: Compound query decomposition and hypothesis chaining
//   - quantum: Superposition, interference scoring, collapse
//   - engine: The caller-facing EngramEngine handle

pub mod ambiguity;
pub mod bridge;
pub mod cancel;
pub mod codec;
pub mod engine;
pub mod lateral;
pub mod locks;
pub mod long_term;
pub mod quantum;
pub mod reasoner;
pub mod schema;
pub mod short_term;
pub mod synchronicity;
pub mod tokens;
pub mod working_memory;

// Re-exports for convenience
pub use ambiguity::{analyze, AmbiguityReport};
pub use bridge::{spawn_sweep, MemoryBridge, SweepHandle};
pub use cancel::CancelToken;
pub use codec::Codec;
pub use engine::EngramEngine;
pub use lateral::LateralExpander;
pub use long_term::LongTermStore;
pub use quantum::{interfere, Reading, QuantumRetriever};
pub use reasoner::{decompose, HypothesisExecutor, SequentialReasoner};
pub use short_term::ShortTermStore;
pub use working_memory::WorkingMemory;
