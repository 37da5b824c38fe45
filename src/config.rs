use serde::{Deserialize, Serialize};
use std::env;

use crate::error::EngineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IndexBackend {
    /// Brute-force cosine index built fresh per request.
    InMemory,
    /// External Qdrant instance, one collection per document fingerprint.
    Qdrant,
}

/// Single configuration object handed to the engine. Everything the
/// pipeline tunes lives here; API keys stay in the environment and are
/// read at provider construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub top_k: usize,
    pub min_similarity: f32,
    /// Context budget in characters.
    pub context_budget: usize,
    pub embedding_model: String,
    pub llm_model: String,
    pub requests_per_minute: usize,
    pub rate_limit_max_wait_secs: u64,
    pub request_timeout_secs: u64,
    pub max_concurrency: usize,
    pub cache_capacity: usize,
    pub cache_ttl_secs: u64,
    pub index_backend: IndexBackend,
    pub qdrant_url: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            chunk_overlap: 200,
            top_k: 5,
            min_similarity: 0.1,
            context_budget: 6000,
            embedding_model: "text-embedding-004".to_string(),
            llm_model: "gemini-2.5-flash".to_string(),
            requests_per_minute: 10,
            rate_limit_max_wait_secs: 30,
            request_timeout_secs: 120,
            max_concurrency: 3,
            cache_capacity: 8,
            cache_ttl_secs: 600,
            index_backend: IndexBackend::InMemory,
            qdrant_url: "http://localhost:6333".to_string(),
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Result<Self, EngineError> {
        let defaults = Self::default();

        let config = Self {
            chunk_size: env_parse("CHUNK_SIZE", defaults.chunk_size),
            chunk_overlap: env_parse("CHUNK_OVERLAP", defaults.chunk_overlap),
            top_k: env_parse("RETRIEVAL_TOP_K", defaults.top_k),
            min_similarity: env_parse("MIN_SIMILARITY", defaults.min_similarity),
            context_budget: env_parse("CONTEXT_BUDGET", defaults.context_budget),
            embedding_model: env::var("EMBEDDING_MODEL").unwrap_or(defaults.embedding_model),
            llm_model: env::var("LLM_MODEL").unwrap_or(defaults.llm_model),
            requests_per_minute: env_parse(
                "LLM_REQUESTS_PER_MINUTE",
                defaults.requests_per_minute,
            ),
            rate_limit_max_wait_secs: env_parse(
                "RATE_LIMIT_MAX_WAIT_SECS",
                defaults.rate_limit_max_wait_secs,
            ),
            request_timeout_secs: env_parse("REQUEST_TIMEOUT_SECS", defaults.request_timeout_secs),
            max_concurrency: env_parse("MAX_CONCURRENCY", defaults.max_concurrency),
            cache_capacity: env_parse("INDEX_CACHE_CAPACITY", defaults.cache_capacity),
            cache_ttl_secs: env_parse("INDEX_CACHE_TTL_SECS", defaults.cache_ttl_secs),
            index_backend: match env::var("INDEX_BACKEND").as_deref() {
                Ok("qdrant") => IndexBackend::Qdrant,
                _ => IndexBackend::InMemory,
            },
            qdrant_url: env::var("QDRANT_URL").unwrap_or(defaults.qdrant_url),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if self.chunk_size == 0 {
            return Err(EngineError::Config("chunk_size must be > 0".into()));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(EngineError::Config(format!(
                "chunk_overlap ({}) must be smaller than chunk_size ({})",
                self.chunk_overlap, self.chunk_size
            )));
        }
        if self.top_k == 0 {
            return Err(EngineError::Config("top_k must be > 0".into()));
        }
        if self.context_budget == 0 {
            return Err(EngineError::Config("context_budget must be > 0".into()));
        }
        if self.max_concurrency == 0 {
            return Err(EngineError::Config("max_concurrency must be > 0".into()));
        }
        if self.cache_capacity == 0 {
            return Err(EngineError::Config("cache_capacity must be > 0".into()));
        }
        if !(0.0..=1.0).contains(&self.min_similarity) {
            return Err(EngineError::Config(
                "min_similarity must be within [0, 1]".into(),
            ));
        }
        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn overlap_must_stay_below_chunk_size() {
        let mut config = EngineConfig::default();
        config.chunk_overlap = config.chunk_size;
        assert!(matches!(config.validate(), Err(EngineError::Config(_))));
    }

    #[test]
    fn zero_budget_rejected() {
        let config = EngineConfig {
            context_budget: 0,
            ..EngineConfig::default()
        };
        assert!(matches!(config.validate(), Err(EngineError::Config(_))));
    }
}
