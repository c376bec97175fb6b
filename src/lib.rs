// Paw Engram: tiered hybrid memory with ambiguity-aware retrieval.
//
// Layers:
//   atoms  : pure types, constants, traits, errors (no I/O)
//   engine : tier stores, embedding providers, bridge, retrieval

pub mod atoms;
pub mod engine;

pub use atoms::engram_types::{
    CompactionReport, ContextAxis, ContextDescriptor, ContextEvidence, EngramConfig, EngramStats,
    Interpretation, InterpretationOrigin, MemoryItem, MemoryTier, QueryResponse, QueryState,
    RankedResult, ReasoningTrace, SweepReport, SynchronicityLink,
};
pub use atoms::error::{EngineError, EngineResult};
pub use atoms::traits::{EmbeddingProvider, TierStore};
pub use engine::engram::EngramEngine;
pub use engine::memory::{HashEmbedder, OllamaEmbedder, RetryingEmbedder};
