use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::stream::{self, StreamExt};

use crate::config::{EngineConfig, IndexBackend};
use crate::context::ContextAssembler;
use crate::document::{Chunker, DocumentLoader};
use crate::embedding::EmbeddingService;
use crate::error::EngineError;
use crate::providers::{CompletionProvider, RateLimiter};
use crate::retrieval::{self, IndexCache, Retriever, VectorIndex};
use crate::synthesis::AnswerSynthesizer;
use crate::types::{AnswerRecord, Document, DocumentFormat, QueryRequest, QueryResponse};

/// Lifecycle of one question inside a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuestionState {
    Pending,
    Retrieving,
    Assembling,
    Synthesizing,
    Done,
    Failed,
}

/// Coordinates the whole pipeline for one request: load → chunk → embed
/// → index once, then retrieve → assemble → synthesize per question.
/// Questions run concurrently up to a bounded worker count; one failing
/// question becomes a placeholder answer and never sinks the batch.
pub struct QueryOrchestrator {
    config: EngineConfig,
    loader: DocumentLoader,
    chunker: Chunker,
    embedding: Arc<EmbeddingService>,
    synthesizer: AnswerSynthesizer,
    cache: IndexCache,
}

impl QueryOrchestrator {
    pub fn new(
        config: EngineConfig,
        embedding: Arc<EmbeddingService>,
        provider: Arc<dyn CompletionProvider>,
    ) -> Result<Self, EngineError> {
        config.validate()?;
        let limiter = Arc::new(RateLimiter::per_minute(
            config.requests_per_minute,
            Duration::from_secs(config.rate_limit_max_wait_secs),
        ));
        let chunker = Chunker::new(config.chunk_size, config.chunk_overlap);
        let cache = IndexCache::new(
            config.cache_capacity,
            Duration::from_secs(config.cache_ttl_secs),
        );
        Ok(Self {
            loader: DocumentLoader::new(),
            chunker,
            embedding,
            synthesizer: AnswerSynthesizer::new(provider, limiter),
            cache,
            config,
        })
    }

    /// Entry point for URL-referenced documents.
    pub async fn run(&self, request: &QueryRequest) -> Result<QueryResponse, EngineError> {
        let doc = self.loader.load_url(&request.documents).await?;
        self.answer_all(&doc, &request.questions).await
    }

    /// Entry point for inline document bytes.
    pub async fn run_bytes(
        &self,
        bytes: &[u8],
        format: DocumentFormat,
        source: &str,
        questions: &[String],
    ) -> Result<QueryResponse, EngineError> {
        let doc = self.loader.load_bytes(bytes, format, source)?;
        self.answer_all(&doc, questions).await
    }

    /// Answers every question against an already-loaded document. The
    /// response always has exactly one record per question, in input
    /// order, whatever mix of successes and failures occurred.
    pub async fn answer_all(
        &self,
        doc: &Document,
        questions: &[String],
    ) -> Result<QueryResponse, EngineError> {
        let index = self.index_for(doc).await?;

        let slots: Arc<Mutex<Vec<Option<AnswerRecord>>>> =
            Arc::new(Mutex::new(vec![None; questions.len()]));

        let tasks: Vec<_> = questions
            .iter()
            .enumerate()
            .map(|(i, question)| {
                let index = index.clone();
                let slots = slots.clone();
                async move {
                    let record = self.answer_question(i, question, index).await;
                    if let Ok(mut guard) = slots.lock() {
                        guard[i] = Some(record);
                    }
                }
            })
            .collect();
        let work = stream::iter(tasks)
            .buffer_unordered(self.config.max_concurrency)
            .for_each(|_| async {});

        let deadline = Duration::from_secs(self.config.request_timeout_secs);
        if tokio::time::timeout(deadline, work).await.is_err() {
            log::warn!(
                "Request deadline of {:?} reached; unfinished questions reported as timed out",
                deadline
            );
        }

        let mut guard = slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let answers = guard
            .drain(..)
            .zip(questions)
            .map(|(slot, question)| {
                slot.unwrap_or_else(|| placeholder_for_error(question, &EngineError::Timeout))
            })
            .collect();

        Ok(QueryResponse { answers })
    }

    /// Cache hit skips extraction, embedding and the index build. Keys
    /// carry the embedder identity alongside the fingerprint, so an
    /// index built from hash-fallback vectors is never handed to a
    /// query embedded by the primary model (or the reverse).
    async fn index_for(&self, doc: &Document) -> Result<Arc<dyn VectorIndex>, EngineError> {
        let key = format!("{}:{}", doc.fingerprint, self.embedding.signature());
        if let Some(index) = self.cache.get(&key) {
            log::info!("Index cache hit for {}", key);
            return Ok(index);
        }

        let chunks = self.chunker.chunk(doc)?;
        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let vectors = self.embedding.embed_batch(&texts).await?;
        // Read the signature after embedding: a mid-batch fallback must
        // land under the degraded key, not the primary one.
        let signature = self.embedding.signature();
        let index =
            retrieval::build_index(&self.config, &doc.fingerprint, &signature, chunks, vectors)
                .await?;
        self.cache
            .put(&format!("{}:{}", doc.fingerprint, signature), index.clone());
        Ok(index)
    }

    async fn answer_question(
        &self,
        idx: usize,
        question: &str,
        index: Arc<dyn VectorIndex>,
    ) -> AnswerRecord {
        let mut state = QuestionState::Pending;

        transition(idx, &mut state, QuestionState::Retrieving);
        let query_vec = match self.embedding.embed(question).await {
            Ok(vector) => vector,
            Err(e) => return self.fail(idx, &mut state, question, e),
        };
        let retriever = Retriever::new(index, self.config.top_k, self.config.min_similarity);
        let passages = match retriever.retrieve(&query_vec).await {
            Ok(passages) => passages,
            Err(e) => return self.fail(idx, &mut state, question, e),
        };

        transition(idx, &mut state, QuestionState::Assembling);
        let context = ContextAssembler::new(self.config.context_budget).assemble(&passages);

        transition(idx, &mut state, QuestionState::Synthesizing);
        match self
            .synthesizer
            .synthesize(question, &context, self.embedding.degraded())
            .await
        {
            Ok(record) => {
                transition(idx, &mut state, QuestionState::Done);
                record
            }
            Err(e) => self.fail(idx, &mut state, question, e),
        }
    }

    fn fail(
        &self,
        idx: usize,
        state: &mut QuestionState,
        question: &str,
        error: EngineError,
    ) -> AnswerRecord {
        transition(idx, state, QuestionState::Failed);
        log::warn!("Question {} failed: {}", idx, error);
        placeholder_for_error(question, &error)
    }

    pub fn model_info(&self) -> String {
        self.synthesizer.model_info()
    }

    pub fn index_backend(&self) -> IndexBackend {
        self.config.index_backend
    }

    pub fn embedding_degraded(&self) -> bool {
        self.embedding.degraded()
    }
}

fn transition(idx: usize, state: &mut QuestionState, next: QuestionState) {
    log::debug!("question {}: {:?} -> {:?}", idx, state, next);
    *state = next;
}

/// Converts a per-question failure into the placeholder record the
/// response carries in that question's slot.
fn placeholder_for_error(question: &str, error: &EngineError) -> AnswerRecord {
    let answer = match error {
        EngineError::NoRelevantContext => {
            "The information is not available in the provided document."
        }
        EngineError::RateLimitExceeded { .. } => {
            "Rate limit exceeded. Please try again in a few minutes."
        }
        EngineError::Timeout => "The question timed out before an answer could be produced.",
        _ => "Unable to answer this question due to a processing error.",
    };
    AnswerRecord::placeholder(question, answer, format!("{}: {}", error.kind(), error))
}
