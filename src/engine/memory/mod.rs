// Paw Engram: Embedding Providers
//
// Module layout:
//   embedding.rs     : OllamaEmbedder (Ollama + OpenAI-compatible API calls)
//   hash_embedder.rs : HashEmbedder (deterministic, offline)
//   retry.rs         : RetryingEmbedder (backoff + vector validation)

pub mod embedding;
pub mod hash_embedder;
pub mod retry;

pub use embedding::OllamaEmbedder;
pub use hash_embedder::{HashEmbedder, HASH_EMBEDDER_DIMENSION};
pub use retry::RetryingEmbedder;
