// ── Paw Atoms: Constants ───────────────────────────────────────────────────
// Named defaults for the memory engine. Every value here is a tunable
// starting point; `EngramConfig` carries the live values.

// ── Compressed embedding codec ─────────────────────────────────────────────
pub const DEFAULT_SPARSITY_RATIO: f32 = 0.10;
pub const DEFAULT_SPARSITY_CEILING: f32 = 0.10;
/// Scales the retained-dimension cosine back toward dense cosine.
/// Empirical, not derived.
pub const DEFAULT_CORRECTION_FACTOR: f32 = 1.2;

// ── Tiers ──────────────────────────────────────────────────────────────────
pub const DEFAULT_WORKING_CAPACITY: usize = 256;
pub const DEFAULT_PROMOTION_MIN_ACCESSES: u32 = 3;
pub const DEFAULT_PROMOTION_WINDOW_DAYS: i64 = 7;
pub const DEFAULT_DECAY_WINDOW_DAYS: i64 = 45;
pub const DEFAULT_STALE_WINDOW_DAYS: i64 = 90;
pub const DEFAULT_ARCHIVE_RETENTION_DAYS: i64 = 365;
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 3600;
pub const DEFAULT_REEMBED_BATCH: usize = 32;
/// Access timestamps kept per item for the rolling promotion window.
pub const ACCESS_LOG_CAP: usize = 32;

// ── Synchronicity ──────────────────────────────────────────────────────────
pub const DEFAULT_SYNCHRONICITY_THRESHOLD: f32 = 0.8;
pub const DEFAULT_SYNCHRONICITY_MAX_DESCRIPTOR_SIMILARITY: f32 = 0.5;
pub const DEFAULT_SYNCHRONICITY_MAX_COMPARISONS: usize = 50_000;

// ── Retrieval ──────────────────────────────────────────────────────────────
pub const DEFAULT_AMBIGUITY_THRESHOLD: f32 = 0.35;
pub const DEFAULT_COLLAPSE_THRESHOLD: f32 = 0.7;
pub const DEFAULT_COLLAPSE_CUTOFF_RATIO: f32 = 0.8;
pub const DEFAULT_TOP_N: usize = 5;
pub const DEFAULT_QUERY_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_SESSION_CACHE_SIZE: usize = 256;

// ── Context descriptor validation ──────────────────────────────────────────
pub const MAX_CONTEXT_LABEL_BYTES: usize = 256;

// ── Database files ─────────────────────────────────────────────────────────
pub const SHORT_TERM_DB_FILE: &str = "short_term.db";
pub const LONG_TERM_DB_FILE: &str = "long_term.db";
/// Read connections per tier database.
pub const READER_POOL_SIZE: usize = 4;
pub const SQLITE_BUSY_TIMEOUT_MS: u64 = 5_000;
