// ── Paw Atoms: Error Types ─────────────────────────────────────────────────
// Single canonical error enum for the memory engine, built with `thiserror`.
//
// Design rules:
//   • Caller-facing variants (InvalidId, MalformedContext, InvalidInput) are the
//     only ones the public API raises synchronously.
//   • Subsystem variants (EmbeddingProvider, CorruptEmbedding,
//     PromotionTransaction, EmptyInterpretationSet) are logged and absorbed by
//     the bridge and the query path.
//   • The `#[from]` attribute wires std/external error conversions automatically.

use thiserror::Error;

// ── Primary error enum ─────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum EngineError {
    /// Filesystem or OS-level I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization / deserialization failure.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// HTTP / network failure (reqwest layer).
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// SQLite / rusqlite database failure.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// TOML config could not be parsed.
    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// Engine configuration is invalid or missing.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Embedding provider failed (transient; retried, then the item degrades).
    #[error("Embedding provider error: {model}: {message}")]
    EmbeddingProvider { model: String, message: String },

    /// Compressed embedding failed validation on load.
    #[error("Corrupt embedding: {0}")]
    CorruptEmbedding(String),

    /// A Short-Term → Long-Term transfer did not commit.
    #[error("Promotion failed for {id}: {reason}")]
    PromotionTransaction { id: String, reason: String },

    /// A stage produced no interpretations. Never surfaced to callers.
    #[error("Empty interpretation set for query: {0}")]
    EmptyInterpretationSet(String),

    /// Unknown, blank or retired memory id.
    #[error("Invalid memory id: {0}")]
    InvalidId(String),

    /// A context descriptor label failed validation.
    #[error("Malformed context descriptor: {0}")]
    MalformedContext(String),

    /// Other caller-caused input problem (blank content, bad tier hint).
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Operation was cancelled between steps.
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// Catch-all for errors that do not yet have a dedicated variant.
    /// Prefer adding a specific variant over using this in new code.
    #[error("{0}")]
    Other(String),
}

// ── Convenience constructors ───────────────────────────────────────────────

impl EngineError {
    /// Create an embedding provider error with model name and message.
    pub fn embedding(model: impl Into<String>, message: impl Into<String>) -> Self {
        Self::EmbeddingProvider { model: model.into(), message: message.into() }
    }

    /// Create a promotion error for an item id.
    pub fn promotion(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::PromotionTransaction { id: id.into(), reason: reason.into() }
    }

    /// True when the caller caused the error (as opposed to a subsystem failure).
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidId(_) | Self::MalformedContext(_) | Self::InvalidInput(_)
        )
    }
}

impl From<String> for EngineError {
    fn from(s: String) -> Self {
        EngineError::Other(s)
    }
}

impl From<&str> for EngineError {
    fn from(s: &str) -> Self {
        EngineError::Other(s.to_string())
    }
}

// ── Convenience alias ──────────────────────────────────────────────────────

/// All engine operations return this type.
pub type EngineResult<T> = Result<T, EngineError>;

impl From<EngineError> for String {
    fn from(e: EngineError) -> Self {
        e.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn caller_errors_are_classified() {
        assert!(EngineError::InvalidId("x".into()).is_caller_error());
        assert!(EngineError::MalformedContext("domain".into()).is_caller_error());
        assert!(!EngineError::embedding("m", "down").is_caller_error());
        assert!(!EngineError::promotion("id", "write failed").is_caller_error());
    }

    #[test]
    fn display_includes_detail() {
        let e = EngineError::promotion("abc", "long-term write not confirmed");
        assert_eq!(e.to_string(), "Promotion failed for abc: long-term write not confirmed");
        let s: String = EngineError::from("boom").into();
        assert_eq!(s, "boom");
    }
}
