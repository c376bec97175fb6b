// Paw Engram: Embedding Client
//
// Calls Ollama or OpenAI-compatible embedding APIs to produce dense vectors
// for memory content and query interpretations.

use crate::atoms::engram_types::EmbeddingEndpointConfig;
use crate::atoms::error::{EngineError, EngineResult};
use crate::atoms::traits::EmbeddingProvider;
use async_trait::async_trait;
use log::info;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;

/// HTTP embedding provider: Ollama first, OpenAI-compatible second.
pub struct OllamaEmbedder {
    client: Client,
    base_url: String,
    model: String,
    dimension: usize,
    timeout: Duration,
}

fn floats(values: &[Value]) -> Vec<f32> {
    values.iter().filter_map(|v| v.as_f64().map(|f| f as f32)).collect()
}

impl OllamaEmbedder {
    pub fn new(config: &EmbeddingEndpointConfig) -> Self {
        OllamaEmbedder {
            client: Client::new(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            dimension: config.dimension,
            timeout: Duration::from_secs(config.request_timeout_secs.max(1)),
        }
    }

    fn fail(&self, message: impl Into<String>) -> EngineError {
        EngineError::embedding(&self.model, message)
    }

    /// Ollama current API: POST /api/embed { model, input } → { embeddings: [[f32...]] }
    /// Falls back to legacy: POST /api/embeddings { model, prompt } → { embedding: [f32...] }
    async fn embed_ollama(&self, text: &str) -> EngineResult<Vec<f32>> {
        let url = format!("{}/api/embed", self.base_url);
        let body = json!({ "model": self.model, "input": text });

        if let Ok(resp) = self.client.post(&url).json(&body).timeout(self.timeout).send().await {
            if resp.status().is_success() {
                if let Ok(v) = resp.json::<Value>().await {
                    if let Some(first) = v["embeddings"].as_array().and_then(|e| e.first()).and_then(|e| e.as_array()) {
                        let vec = floats(first);
                        if !vec.is_empty() {
                            return Ok(vec);
                        }
                    }
                    // Some Ollama versions return singular "embedding" even on /api/embed
                    if let Some(embedding) = v["embedding"].as_array() {
                        let vec = floats(embedding);
                        if !vec.is_empty() {
                            return Ok(vec);
                        }
                    }
                }
            } else {
                let status = resp.status();
                let body = resp.text().await.unwrap_or_default();
                if status.as_u16() == 404 || body.contains("not found") {
                    return Err(self.fail(format!("model not found: {}", body)));
                }
                info!("[engram] /api/embed returned {}, trying legacy endpoint", status);
            }
        }

        let legacy_url = format!("{}/api/embeddings", self.base_url);
        let legacy_body = json!({ "model": self.model, "prompt": text });
        let resp = self
            .client
            .post(&legacy_url)
            .json(&legacy_body)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| self.fail(format!("Ollama not reachable at {}: {}", self.base_url, e)))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(self.fail(format!("Ollama embed {}: {}", status, text)));
        }

        let v: Value = resp.json().await?;
        let embedding = v["embedding"]
            .as_array()
            .ok_or_else(|| self.fail("no 'embedding' array in Ollama response"))?;
        let vec = floats(embedding);
        if vec.is_empty() {
            return Err(self.fail("empty embedding vector from Ollama"));
        }
        Ok(vec)
    }

    /// OpenAI-compatible format: POST /v1/embeddings { model, input }
    async fn embed_openai(&self, text: &str) -> EngineResult<Vec<f32>> {
        let url = format!("{}/v1/embeddings", self.base_url);
        let body = json!({ "model": self.model, "input": text });

        let resp = self.client.post(&url).json(&body).timeout(self.timeout).send().await?;
        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(self.fail(format!("OpenAI embed {}: {}", status, text)));
        }

        let v: Value = resp.json().await?;
        let embedding = v["data"][0]["embedding"]
            .as_array()
            .ok_or_else(|| self.fail("no 'data[0].embedding' array in OpenAI response"))?;
        let vec = floats(embedding);
        if vec.is_empty() {
            return Err(self.fail("empty embedding vector from OpenAI format"));
        }
        Ok(vec)
    }

    /// Check if the embedding service is reachable and the model works.
    pub async fn test_connection(&self) -> EngineResult<usize> {
        let vec = self.embed("test connection").await?;
        Ok(vec.len())
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaEmbedder {
    /// Tries Ollama API format first, falls back to OpenAI format.
    async fn embed(&self, text: &str) -> EngineResult<Vec<f32>> {
        let ollama_err = match self.embed_ollama(text).await {
            Ok(vec) => return Ok(vec),
            Err(e) => e,
        };
        match self.embed_openai(text).await {
            Ok(vec) => Ok(vec),
            Err(openai_err) => Err(self.fail(format!("Ollama: {} | OpenAI: {}", ollama_err, openai_err))),
        }
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trims_trailing_slash() {
        let cfg = EmbeddingEndpointConfig { base_url: "http://localhost:11434/".into(), ..Default::default() };
        let e = OllamaEmbedder::new(&cfg);
        assert_eq!(e.base_url, "http://localhost:11434");
        assert_eq!(e.dimension(), 768);
        assert_eq!(e.model_name(), "nomic-embed-text");
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_provider_error() {
        let cfg = EmbeddingEndpointConfig {
            base_url: "http://127.0.0.1:9".into(),
            request_timeout_secs: 1,
            ..Default::default()
        };
        let err = OllamaEmbedder::new(&cfg).embed("hello").await.unwrap_err();
        assert!(matches!(err, EngineError::EmbeddingProvider { .. }));
    }
}
