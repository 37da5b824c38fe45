use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use qdrant_client::{
    config::QdrantConfig,
    qdrant::{
        point_id::PointIdOptions, with_payload_selector::SelectorOptions, CreateCollection,
        Distance, PointId, PointStruct, SearchPoints, UpsertPoints, Value, VectorParams,
        VectorsConfig, WithPayloadSelector,
    },
    Qdrant,
};

use super::VectorIndex;
use crate::error::EngineError;
use crate::types::{Chunk, RetrievedPassage};

/// External managed index: one Qdrant collection per document
/// fingerprint and embedder identity, persisted between requests.
pub struct QdrantIndex {
    client: Arc<Qdrant>,
    collection: String,
}

impl QdrantIndex {
    /// Connect and ensure the per-document collection exists. Returns
    /// `(index, created)` so the caller knows whether to upsert vectors
    /// or reuse what a previous request already stored. The collection
    /// name carries the embedder identity: a collection written from
    /// hash-fallback vectors is never reused by a process querying with
    /// the primary model.
    pub async fn connect(
        url: &str,
        fingerprint: &str,
        embedder: &str,
        dimension: usize,
    ) -> Result<(Self, bool), EngineError> {
        let mut config = QdrantConfig::from_url(&grpc_url(url));
        config.check_compatibility = false;
        config.timeout = Duration::from_secs(30);
        config.connect_timeout = Duration::from_secs(10);

        let client = Qdrant::new(config)
            .map_err(|e| EngineError::IndexUnavailable(format!("Qdrant connect: {}", e)))?;

        let collection = collection_name(fingerprint, embedder);
        let vectors_config = VectorsConfig {
            config: Some(qdrant_client::qdrant::vectors_config::Config::Params(
                VectorParams {
                    size: dimension as u64,
                    distance: Distance::Cosine.into(),
                    ..Default::default()
                },
            )),
        };
        let create = CreateCollection {
            collection_name: collection.clone(),
            vectors_config: Some(vectors_config),
            ..Default::default()
        };

        let created = match client.create_collection(create).await {
            Ok(_) => true,
            Err(e) if e.to_string().contains("AlreadyExists") => {
                log::info!("Collection {} already exists, reusing it", collection);
                false
            }
            Err(e) => {
                return Err(EngineError::IndexUnavailable(format!(
                    "create collection: {}",
                    e
                )))
            }
        };

        Ok((
            Self {
                client: Arc::new(client),
                collection,
            },
            created,
        ))
    }

    /// Write path, called once at build time before the index handle is
    /// shared with searchers.
    pub async fn upsert(&self, chunks: &[Chunk], vectors: &[Vec<f32>]) -> Result<(), EngineError> {
        let points: Vec<PointStruct> = chunks
            .iter()
            .zip(vectors)
            .map(|(chunk, vector)| {
                let mut payload: HashMap<String, serde_json::Value> = HashMap::new();
                payload.insert("text".to_string(), serde_json::json!(chunk.text));
                payload.insert("seq".to_string(), serde_json::json!(chunk.seq));
                payload.insert("start".to_string(), serde_json::json!(chunk.start));
                payload.insert("end".to_string(), serde_json::json!(chunk.end));
                if let Some(page) = chunk.page {
                    payload.insert("page".to_string(), serde_json::json!(page));
                }
                if let Some(section) = &chunk.section {
                    payload.insert("section".to_string(), serde_json::json!(section));
                }
                let payload: HashMap<String, Value> = payload
                    .into_iter()
                    .map(|(k, v)| (k, Value::from(v)))
                    .collect();

                PointStruct {
                    id: Some(PointId {
                        point_id_options: Some(PointIdOptions::Uuid(chunk.id.clone())),
                    }),
                    vectors: Some(vector.clone().into()),
                    payload,
                }
            })
            .collect();

        let upsert = UpsertPoints {
            collection_name: self.collection.clone(),
            points,
            ..Default::default()
        };
        self.client
            .upsert_points(upsert)
            .await
            .map_err(|e| EngineError::IndexUnavailable(format!("upsert: {}", e)))?;

        log::info!(
            "Upserted {} vectors into collection {}",
            chunks.len(),
            self.collection
        );
        Ok(())
    }
}

fn collection_name(fingerprint: &str, embedder: &str) -> String {
    let tag: String = embedder
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect();
    format!("doc_{}_{}", fingerprint, tag)
}

/// Qdrant speaks gRPC on 6334; REST-style URLs pointing at 6333 are
/// rewritten so a copy-pasted dashboard URL still works.
fn grpc_url(url: &str) -> String {
    let bare = url.split("://").last().unwrap_or(url);
    let bare = if bare.ends_with(":6333") {
        bare.replace(":6333", ":6334")
    } else {
        bare.to_string()
    };
    format!("http://{}", bare)
}

#[async_trait]
impl VectorIndex for QdrantIndex {
    async fn search(&self, query: &[f32], k: usize) -> Result<Vec<RetrievedPassage>, EngineError> {
        let request = SearchPoints {
            collection_name: self.collection.clone(),
            vector: query.to_vec(),
            limit: k as u64,
            with_payload: Some(WithPayloadSelector {
                selector_options: Some(SelectorOptions::Enable(true)),
            }),
            ..Default::default()
        };

        let results = self
            .client
            .search_points(request)
            .await
            .map_err(|e| EngineError::IndexUnavailable(format!("search: {}", e)))?;

        let passages = results
            .result
            .into_iter()
            .map(|point| {
                let id = match point.id.and_then(|id| id.point_id_options) {
                    Some(PointIdOptions::Uuid(uuid)) => uuid,
                    _ => String::new(),
                };
                let payload: HashMap<String, serde_json::Value> = point
                    .payload
                    .into_iter()
                    .map(|(k, v)| {
                        (
                            k,
                            serde_json::Value::try_from(v).unwrap_or(serde_json::Value::Null),
                        )
                    })
                    .collect();

                let text = payload
                    .get("text")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string();
                let seq = payload.get("seq").and_then(|v| v.as_u64()).unwrap_or(0) as usize;
                let start = payload.get("start").and_then(|v| v.as_u64()).unwrap_or(0) as usize;
                let end = payload.get("end").and_then(|v| v.as_u64()).unwrap_or(0) as usize;
                let page = payload
                    .get("page")
                    .and_then(|v| v.as_u64())
                    .map(|p| p as usize);
                let section = payload
                    .get("section")
                    .and_then(|v| v.as_str())
                    .map(|s| s.to_string());

                RetrievedPassage {
                    chunk: Chunk {
                        id,
                        text,
                        start,
                        end,
                        seq,
                        page,
                        section,
                    },
                    score: point.score,
                }
            })
            .collect();

        Ok(passages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collections_are_scoped_to_the_embedder() {
        let primary = collection_name("abc123", "gemini-text-embedding-004");
        let fallback = collection_name("abc123", "hash-md5");
        assert_ne!(primary, fallback);
        assert_eq!(primary, "doc_abc123_gemini_text_embedding_004");
        assert_eq!(fallback, "doc_abc123_hash_md5");
    }

    #[test]
    fn rest_port_is_rewritten_for_grpc() {
        assert_eq!(grpc_url("http://localhost:6333"), "http://localhost:6334");
        assert_eq!(grpc_url("localhost:6334"), "http://localhost:6334");
    }
}
