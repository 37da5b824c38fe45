mod cache;
mod in_memory;
mod qdrant;

pub use cache::IndexCache;
pub use in_memory::InMemoryIndex;
pub use qdrant::QdrantIndex;

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::{EngineConfig, IndexBackend};
use crate::error::EngineError;
use crate::types::{Chunk, RetrievedPassage};

/// Read side of a built vector index. Indices are frozen after build;
/// backends expose their write path (upsert) as inherent methods used
/// only during `build_index`, so no writer can race an in-flight search.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    async fn search(&self, query: &[f32], k: usize) -> Result<Vec<RetrievedPassage>, EngineError>;
}

/// Build (or attach to) the configured backend for one document.
/// `embedder` is the identity of the embedder that produced `vectors`;
/// persistent backends scope their collections by it so stored vectors
/// are only ever searched with queries from the same model.
pub async fn build_index(
    config: &EngineConfig,
    fingerprint: &str,
    embedder: &str,
    chunks: Vec<Chunk>,
    vectors: Vec<Vec<f32>>,
) -> Result<Arc<dyn VectorIndex>, EngineError> {
    match config.index_backend {
        IndexBackend::InMemory => Ok(Arc::new(InMemoryIndex::build(chunks, vectors)?)),
        IndexBackend::Qdrant => {
            let dim = vectors.first().map(|v| v.len()).unwrap_or(0);
            let (index, created) =
                QdrantIndex::connect(&config.qdrant_url, fingerprint, embedder, dim).await?;
            if created {
                index.upsert(&chunks, &vectors).await?;
            } else {
                log::info!(
                    "Reusing existing Qdrant collection for fingerprint {}",
                    fingerprint
                );
            }
            Ok(Arc::new(index))
        }
    }
}

/// Applies top-K and the similarity threshold on top of a built index.
pub struct Retriever {
    index: Arc<dyn VectorIndex>,
    top_k: usize,
    min_similarity: f32,
}

impl Retriever {
    pub fn new(index: Arc<dyn VectorIndex>, top_k: usize, min_similarity: f32) -> Self {
        Self {
            index,
            top_k,
            min_similarity,
        }
    }

    /// Top-K passages above the similarity floor, best first. Zero
    /// survivors is an error so the caller can produce an explicit
    /// "not found in document" answer instead of an empty context.
    pub async fn retrieve(&self, query: &[f32]) -> Result<Vec<RetrievedPassage>, EngineError> {
        let mut passages = self.index.search(query, self.top_k).await?;
        passages.retain(|p| p.score >= self.min_similarity);
        if passages.is_empty() {
            return Err(EngineError::NoRelevantContext);
        }
        Ok(passages)
    }
}
