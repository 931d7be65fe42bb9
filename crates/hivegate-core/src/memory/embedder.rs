//! Pluggable embedding backends.
//!
//! The chain tries a remote embedding API first and falls back to a
//! deterministic word-hash embedder, so hybrid search always has *some*
//! ranking even fully offline.

use std::hash::{DefaultHasher, Hash, Hasher};

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;
use tracing::warn;

/// Embedding failure.
#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("embedding request failed: {0}")]
    RequestFailed(String),
    #[error("embedding response invalid: {0}")]
    InvalidResponse(String),
}

/// An embedding backend.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed one text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;

    /// Output dimension.
    fn dimension(&self) -> usize;
}

/// Deterministic word-hash embedder.
///
/// Each word contributes a signed pattern derived from its hash: the word
/// hash is remixed per dimension and the low bit picks +1/-1. The result
/// is L2-normalized. Not semantically meaningful, but stable, offline,
/// and good enough that identical phrasing ranks first.
pub struct HashEmbedder {
    dimension: usize,
}

impl HashEmbedder {
    /// Create with an explicit dimension.
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }

    fn word_hash(word: &str) -> u64 {
        let mut hasher = DefaultHasher::new();
        word.to_lowercase().hash(&mut hasher);
        hasher.finish()
    }

    fn embed_sync(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];
        let words: Vec<&str> = text.split_whitespace().collect();
        if words.is_empty() {
            return vector;
        }

        for word in words {
            let base = Self::word_hash(word);
            for (i, slot) in vector.iter_mut().enumerate() {
                // Remix the hash per dimension; low bit picks the sign.
                let mixed = base
                    .wrapping_mul(0x9E37_79B9_7F4A_7C15)
                    .rotate_left((i % 64) as u32)
                    ^ (i as u64);
                *slot += if mixed & 1 == 1 { 1.0 } else { -1.0 };
            }
        }

        let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for value in &mut vector {
                *value /= norm;
            }
        }
        vector
    }
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self::new(384)
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        Ok(self.embed_sync(text))
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Remote embedder against an OpenAI-compatible `/embeddings` endpoint.
pub struct ApiEmbedder {
    api_base: String,
    api_key: String,
    model: String,
    dimension: usize,
    client: reqwest::Client,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Deserialize)]
struct EmbeddingDatum {
    embedding: Vec<f32>,
}

impl ApiEmbedder {
    /// Create a remote embedder.
    pub fn new(
        api_base: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
        dimension: usize,
    ) -> Self {
        Self {
            api_base: api_base.into(),
            api_key: api_key.into(),
            model: model.into(),
            dimension,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl Embedder for ApiEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let url = format!("{}/embeddings", self.api_base.trim_end_matches('/'));
        let response = self
            .client
            .post(url)
            .bearer_auth(&self.api_key)
            .json(&serde_json::json!({ "model": self.model, "input": text }))
            .send()
            .await
            .map_err(|e| EmbeddingError::RequestFailed(e.to_string()))?;

        if !response.status().is_success() {
            return Err(EmbeddingError::RequestFailed(format!(
                "HTTP {}",
                response.status()
            )));
        }

        let parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| EmbeddingError::InvalidResponse(e.to_string()))?;
        parsed
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| EmbeddingError::InvalidResponse("empty data array".into()))
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Tries each backend in order; the last one should be infallible
/// (in practice, [`HashEmbedder`]).
pub struct ChainEmbedder {
    backends: Vec<Box<dyn Embedder>>,
}

impl ChainEmbedder {
    /// Build a chain; panics on an empty list.
    pub fn new(backends: Vec<Box<dyn Embedder>>) -> Self {
        assert!(!backends.is_empty(), "embedder chain must not be empty");
        Self { backends }
    }

    /// The always-works default: hash embedder only.
    pub fn local_only(dimension: usize) -> Self {
        Self::new(vec![Box::new(HashEmbedder::new(dimension))])
    }
}

#[async_trait]
impl Embedder for ChainEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let mut last_error = None;
        for backend in &self.backends {
            match backend.embed(text).await {
                Ok(vector) => return Ok(vector),
                Err(e) => {
                    warn!(error = %e, "embedder failed, trying next backend");
                    last_error = Some(e);
                }
            }
        }
        Err(last_error.unwrap_or(EmbeddingError::RequestFailed("no backends".into())))
    }

    fn dimension(&self) -> usize {
        self.backends.last().map(|b| b.dimension()).unwrap_or(0)
    }
}
