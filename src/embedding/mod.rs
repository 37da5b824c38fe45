use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

use crate::error::EngineError;
use crate::providers::{with_retry, KeyRotator, RetryPolicy};

/// Shared dimensionality for primary and fallback embedders so vectors
/// from either can live in the same index.
pub const EMBEDDING_DIM: usize = 768;

#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EngineError>;

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EngineError> {
        let mut vectors = Vec::with_capacity(texts.len());
        for text in texts {
            vectors.push(self.embed(text).await?);
        }
        Ok(vectors)
    }

    fn dimension(&self) -> usize {
        EMBEDDING_DIM
    }

    /// Stable identity of the model producing the vectors. Vectors from
    /// embedders with different ids must never share an index.
    fn id(&self) -> String {
        "custom".to_string()
    }
}

/// Primary embedder backed by the Gemini embedContent REST endpoint.
/// Shares the provider key rotator and rotates on throttling, with the
/// same bounded retry the completion providers use.
pub struct GeminiEmbedder {
    keys: Arc<KeyRotator>,
    model: String,
    client: Client,
    retry: RetryPolicy,
}

impl GeminiEmbedder {
    pub fn new(keys: Arc<KeyRotator>, model: String) -> Self {
        Self {
            keys,
            model,
            client: Client::new(),
            retry: RetryPolicy::default(),
        }
    }

    async fn call_once(&self, text: &str) -> Result<Vec<f32>, EngineError> {
        let url = format!(
            "https://generativelanguage.googleapis.com/v1beta/models/{}:embedContent",
            self.model
        );
        let api_key = self.keys.current();
        let response = self
            .client
            .post(&url)
            .query(&[("key", api_key.as_str())])
            .json(&json!({
                "model": format!("models/{}", self.model),
                "content": { "parts": [{ "text": text }] }
            }))
            .send()
            .await
            .map_err(|e| EngineError::EmbeddingUnavailable(e.to_string()))?;

        let status = response.status();
        if status.as_u16() == 429 {
            self.keys.rotate();
            return Err(EngineError::EmbeddingUnavailable(format!(
                "embedContent throttled ({}); rotated API key",
                status
            )));
        }
        if !status.is_success() {
            return Err(EngineError::EmbeddingUnavailable(format!(
                "embedContent returned {}",
                status
            )));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| EngineError::EmbeddingUnavailable(e.to_string()))?;

        let values = body["embedding"]["values"].as_array().ok_or_else(|| {
            EngineError::EmbeddingUnavailable("embedContent response missing values".into())
        })?;

        let vector: Vec<f32> = values
            .iter()
            .filter_map(|v| v.as_f64())
            .map(|v| v as f32)
            .collect();
        if vector.len() != values.len() {
            return Err(EngineError::EmbeddingUnavailable(
                "non-numeric value in embedding".into(),
            ));
        }
        Ok(normalize(vector))
    }
}

#[async_trait]
impl Embedder for GeminiEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EngineError> {
        with_retry(&self.retry, || self.call_once(text)).await
    }

    fn id(&self) -> String {
        format!("gemini-{}", self.model)
    }
}

/// Deterministic hashing embedder used when the primary model is down.
/// Chains md5 digests over the input to fill the vector, centers each
/// byte and L2-normalizes. Retrieval quality is degraded but queries
/// still resolve against the same vector space.
pub struct HashingEmbedder;

#[async_trait]
impl Embedder for HashingEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EngineError> {
        let mut vector = Vec::with_capacity(EMBEDDING_DIM);
        let mut digest = md5::compute(text.as_bytes());
        while vector.len() < EMBEDDING_DIM {
            for byte in digest.iter() {
                if vector.len() == EMBEDDING_DIM {
                    break;
                }
                vector.push(*byte as f32 / 255.0 - 0.5);
            }
            digest = md5::compute(digest.as_ref());
        }
        Ok(normalize(vector))
    }

    fn id(&self) -> String {
        "hash-md5".to_string()
    }
}

/// Primary-with-fallback embedding service. Once the primary fails the
/// whole session stays on the fallback so every vector in the request
/// comes from the same model, and the degradation is flagged downstream.
pub struct EmbeddingService {
    primary: Option<Box<dyn Embedder>>,
    fallback: HashingEmbedder,
    degraded: AtomicBool,
}

impl EmbeddingService {
    pub fn new(primary: Option<Box<dyn Embedder>>) -> Self {
        let degraded = primary.is_none();
        if degraded {
            log::warn!("No primary embedder configured; running in degraded hashing mode");
        }
        Self {
            primary,
            fallback: HashingEmbedder,
            degraded: AtomicBool::new(degraded),
        }
    }

    pub fn degraded(&self) -> bool {
        self.degraded.load(Ordering::Relaxed)
    }

    /// Identity of the embedder currently producing vectors. Index
    /// cache keys and backend collection names carry this, so vectors
    /// written in degraded mode are never searched with primary query
    /// vectors (or the reverse).
    pub fn signature(&self) -> String {
        match (&self.primary, self.degraded()) {
            (Some(primary), false) => primary.id(),
            _ => self.fallback.id(),
        }
    }

    pub async fn embed(&self, text: &str) -> Result<Vec<f32>, EngineError> {
        if !self.degraded() {
            if let Some(primary) = &self.primary {
                match primary.embed(text).await {
                    Ok(vector) => return Ok(vector),
                    Err(e) => {
                        log::warn!(
                            "Primary embedder failed ({}); switching to degraded hashing mode",
                            e
                        );
                        self.degraded.store(true, Ordering::Relaxed);
                    }
                }
            }
        }
        self.fallback.embed(text).await
    }

    pub async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EngineError> {
        let started_degraded = self.degraded();
        let mut vectors = Vec::with_capacity(texts.len());
        for text in texts {
            vectors.push(self.embed(text).await?);
        }
        // If the primary died partway through, the batch straddles two
        // vector spaces; redo it entirely with the fallback.
        if !started_degraded && self.degraded() {
            log::warn!("Embedding degraded mid-batch; re-embedding batch with fallback");
            vectors.clear();
            for text in texts {
                vectors.push(self.fallback.embed(text).await?);
            }
        }
        Ok(vectors)
    }

    pub fn dimension(&self) -> usize {
        EMBEDDING_DIM
    }
}

fn normalize(mut vector: Vec<f32>) -> Vec<f32> {
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for v in vector.iter_mut() {
            *v /= norm;
        }
    }
    vector
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FailingEmbedder;

    #[async_trait]
    impl Embedder for FailingEmbedder {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>, EngineError> {
            Err(EngineError::EmbeddingUnavailable("model down".into()))
        }
    }

    #[tokio::test]
    async fn hashing_embedder_is_deterministic() {
        let embedder = HashingEmbedder;
        let a = embedder.embed("grace period").await.unwrap();
        let b = embedder.embed("grace period").await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), EMBEDDING_DIM);
    }

    #[tokio::test]
    async fn hashing_embedder_output_is_normalized() {
        let vector = HashingEmbedder.embed("some policy text").await.unwrap();
        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn different_texts_produce_different_vectors() {
        let embedder = HashingEmbedder;
        let a = embedder.embed("grace period").await.unwrap();
        let b = embedder.embed("maternity coverage").await.unwrap();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn service_falls_back_and_flags_degradation() {
        let service = EmbeddingService::new(Some(Box::new(FailingEmbedder)));
        assert!(!service.degraded());
        let vector = service.embed("question text").await.unwrap();
        assert_eq!(vector.len(), EMBEDDING_DIM);
        assert!(service.degraded());

        // Degraded mode is sticky for the session.
        let again = service.embed("question text").await.unwrap();
        assert_eq!(vector, again);
    }

    #[tokio::test]
    async fn signature_tracks_degradation() {
        let service = EmbeddingService::new(Some(Box::new(FailingEmbedder)));
        let healthy = service.signature();
        assert_ne!(healthy, "hash-md5");

        service.embed("text").await.unwrap();
        assert!(service.degraded());
        assert_eq!(service.signature(), "hash-md5");

        // Sticky, like the degradation itself.
        assert_eq!(service.signature(), "hash-md5");
    }

    #[tokio::test]
    async fn batch_embeds_every_input() {
        let service = EmbeddingService::new(None);
        let texts = vec!["one".to_string(), "two".to_string(), "three".to_string()];
        let vectors = service.embed_batch(&texts).await.unwrap();
        assert_eq!(vectors.len(), 3);
    }
}
