//! Embedding providers.
//!
//! The engine is polymorphic over a small capability set: batch embedding,
//! optional single-query embedding, and a reported dimension. Any
//! vector-producing implementation is substitutable.

use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use codekg_core::DEFAULT_MODEL;

/// Default batch size for embedding requests.
pub const DEFAULT_BATCH_SIZE: usize = 256;

/// Trait for embedding backends.
///
/// Implementations must be pure with respect to their input text: identical
/// text yields identical vectors within a run.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed a batch of texts, one vector per input.
    async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Embed a single query string.
    async fn embed_query(&self, query: &str) -> Result<Vec<f32>> {
        let vectors = self.embed_texts(&[query.to_string()]).await?;
        vectors
            .into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("no embedding returned"))
    }

    /// Vector dimension, if the backend can report it.
    fn dimension(&self) -> Option<usize>;

    /// Model identifier.
    fn model_name(&self) -> &str;

    /// Maximum number of texts per `embed_texts` call.
    fn max_batch_size(&self) -> usize {
        DEFAULT_BATCH_SIZE
    }
}

#[derive(Serialize)]
struct EmbeddingRequest {
    model: String,
    input: Vec<String>,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    index: usize,
}

/// Embedding provider for OpenAI-compatible `/v1/embeddings` endpoints.
pub struct HttpEmbedder {
    base_url: String,
    model: String,
    api_key: Option<String>,
    dimension: Option<usize>,
    client: Client,
}

impl HttpEmbedder {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            model: model.into(),
            api_key: None,
            dimension: None,
            client: Client::new(),
        }
    }

    /// Provider for the default local MiniLM-family model.
    pub fn with_defaults(base_url: impl Into<String>) -> Self {
        Self::new(base_url, DEFAULT_MODEL)
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn with_dimension(mut self, dim: usize) -> Self {
        self.dimension = Some(dim);
        self
    }

    /// Send one embedding request, retrying on rate limits with
    /// exponential backoff.
    async fn send_request(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        let request_body = EmbeddingRequest {
            model: self.model.clone(),
            input: texts.clone(),
        };

        let max_retries = 3;
        let mut retry_count = 0;
        let mut backoff_secs = 1u64;

        loop {
            debug!(
                "embedding request: {} texts to {}",
                texts.len(),
                self.base_url
            );

            let mut request = self.client.post(&self.base_url).json(&request_body);
            if let Some(ref key) = self.api_key {
                request = request.header("Authorization", format!("Bearer {key}"));
            }
            let response = request
                .send()
                .await
                .map_err(|e| anyhow::anyhow!("network error: {e}"))?;

            let status = response.status();
            if status.is_success() {
                let parsed: EmbeddingResponse = response
                    .json()
                    .await
                    .map_err(|e| anyhow::anyhow!("failed to parse response: {e}"))?;

                // Sort by index so output order matches input order.
                let mut embeddings: Vec<(usize, Vec<f32>)> = parsed
                    .data
                    .into_iter()
                    .map(|d| (d.index, d.embedding))
                    .collect();
                embeddings.sort_by_key(|(idx, _)| *idx);
                return Ok(embeddings.into_iter().map(|(_, v)| v).collect());
            }

            if status.as_u16() == 429 {
                retry_count += 1;
                if retry_count > max_retries {
                    anyhow::bail!("rate limited after {max_retries} retries");
                }
                let retry_after = response
                    .headers()
                    .get("retry-after")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|s| s.parse::<u64>().ok())
                    .unwrap_or(backoff_secs);
                warn!(
                    "rate limited, retrying after {retry_after}s (attempt {retry_count}/{max_retries})"
                );
                tokio::time::sleep(tokio::time::Duration::from_secs(retry_after)).await;
                backoff_secs *= 2;
                continue;
            }

            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            anyhow::bail!("embedding API error ({}): {body}", status.as_u16());
        }
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        self.send_request(texts.to_vec()).await
    }

    fn dimension(&self) -> Option<usize> {
        self.dimension
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

/// Deterministic feature-hashing embedder.
///
/// Tokenizes text (lowercased words, with camelCase split), hashes each
/// token into a fixed-dimension bucket with a sign, and normalizes the
/// result. Shared tokens produce cosine similarity, which is enough for
/// retrieval tests and offline use; there is no model behind it.
pub struct HashEmbedder {
    dim: usize,
}

impl HashEmbedder {
    pub fn new(dim: usize) -> Self {
        Self { dim }
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dim];
        for token in tokenize(text) {
            let digest = Sha256::digest(token.as_bytes());
            let bucket = u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]])
                as usize
                % self.dim;
            let sign = if digest[4] & 1 == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }
        normalize(&mut vector);
        vector
    }
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self::new(codekg_core::DEFAULT_DIMENSION)
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }

    fn dimension(&self) -> Option<usize> {
        Some(self.dim)
    }

    fn model_name(&self) -> &str {
        "hash-embedder"
    }
}

/// Lowercased word tokens, with camelCase boundaries split.
fn tokenize(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    for raw in text.split(|c: char| !c.is_alphanumeric()) {
        if raw.is_empty() {
            continue;
        }
        let mut current = String::new();
        let chars: Vec<char> = raw.chars().collect();
        for (i, &c) in chars.iter().enumerate() {
            if c.is_uppercase() && i > 0 && chars[i - 1].is_lowercase() {
                tokens.push(std::mem::take(&mut current));
            }
            current.extend(c.to_lowercase());
        }
        if !current.is_empty() {
            tokens.push(current);
        }
    }
    tokens
}

fn normalize(vector: &mut [f32]) {
    let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for v in vector.iter_mut() {
            *v /= norm;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block_on<F: std::future::Future>(future: F) -> F::Output {
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap()
            .block_on(future)
    }

    #[test]
    fn test_tokenize_splits_camel_case() {
        assert_eq!(
            tokenize("DatabaseManager.connect"),
            vec!["database", "manager", "connect"]
        );
        assert_eq!(tokenize("snake_case_name"), vec!["snake", "case", "name"]);
    }

    #[test]
    fn test_hash_embedder_is_deterministic() {
        let embedder = HashEmbedder::new(64);
        let a = block_on(embedder.embed_texts(&["NAME: foo".to_string()])).unwrap();
        let b = block_on(embedder.embed_texts(&["NAME: foo".to_string()])).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_hash_embedder_unit_norm() {
        let embedder = HashEmbedder::new(64);
        let v = block_on(embedder.embed_query("some text here")).unwrap();
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_hash_embedder_shared_tokens_are_similar() {
        let embedder = HashEmbedder::new(128);
        let q = block_on(embedder.embed_query("database manager")).unwrap();
        let near = block_on(embedder.embed_query("KIND: class NAME: DatabaseManager")).unwrap();
        let far = block_on(embedder.embed_query("KIND: module NAME: utils")).unwrap();
        let dot = |a: &[f32], b: &[f32]| -> f32 { a.iter().zip(b).map(|(x, y)| x * y).sum() };
        assert!(dot(&q, &near) > dot(&q, &far));
    }

    #[test]
    fn test_hash_embedder_reports_dimension() {
        let embedder = HashEmbedder::new(64);
        assert_eq!(embedder.dimension(), Some(64));
        assert_eq!(embedder.model_name(), "hash-embedder");
    }

    #[test]
    fn test_http_embedder_builder() {
        let embedder = HttpEmbedder::new("http://localhost:8080/v1/embeddings", "my-model")
            .with_api_key("secret")
            .with_dimension(512);
        assert_eq!(embedder.model_name(), "my-model");
        assert_eq!(embedder.dimension(), Some(512));
    }

    #[test]
    fn test_http_embedder_defaults() {
        let embedder = HttpEmbedder::with_defaults("http://localhost:8080/v1/embeddings");
        assert_eq!(embedder.model_name(), DEFAULT_MODEL);
        assert_eq!(embedder.dimension(), None);
    }

    #[test]
    fn test_empty_batch_is_empty() {
        let embedder = HashEmbedder::new(16);
        let out = block_on(embedder.embed_texts(&[])).unwrap();
        assert!(out.is_empty());
    }
}
