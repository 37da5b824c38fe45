use thiserror::Error;

/// Errors produced by the query pipeline, grouped by stage.
///
/// Document-stage errors abort the whole request; retrieval and synthesis
/// errors are caught per question by the orchestrator and turned into
/// placeholder answers.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Empty document: {0}")]
    EmptyDocument(String),
    #[error("Unsupported document format: {0}")]
    UnsupportedFormat(String),
    #[error("Failed to fetch document: {0}")]
    Fetch(String),

    #[error("Embedding provider unavailable: {0}")]
    EmbeddingUnavailable(String),

    #[error("No passage cleared the similarity threshold")]
    NoRelevantContext,
    #[error("Vector index unavailable: {0}")]
    IndexUnavailable(String),

    #[error("Model output failed format validation: {0}")]
    SynthesisFormat(String),
    #[error("Language model unavailable: {0}")]
    ModelUnavailable(String),
    #[error("Rate limit exceeded after waiting {waited_ms} ms")]
    RateLimitExceeded { waited_ms: u64 },

    #[error("Question timed out")]
    Timeout,
    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl EngineError {
    /// True for failures that make the whole request unanswerable.
    pub fn is_document_stage(&self) -> bool {
        matches!(
            self,
            EngineError::EmptyDocument(_)
                | EngineError::UnsupportedFormat(_)
                | EngineError::Fetch(_)
                | EngineError::Config(_)
        )
    }

    /// Short stable name used in placeholder answer explanations.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::EmptyDocument(_) => "empty_document",
            EngineError::UnsupportedFormat(_) => "unsupported_format",
            EngineError::Fetch(_) => "fetch_error",
            EngineError::EmbeddingUnavailable(_) => "embedding_unavailable",
            EngineError::NoRelevantContext => "no_relevant_context",
            EngineError::IndexUnavailable(_) => "index_unavailable",
            EngineError::SynthesisFormat(_) => "synthesis_format_error",
            EngineError::ModelUnavailable(_) => "model_unavailable",
            EngineError::RateLimitExceeded { .. } => "rate_limit_exceeded",
            EngineError::Timeout => "timeout",
            EngineError::Config(_) => "config_error",
        }
    }

    /// Transient errors are worth retrying with backoff.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            EngineError::Fetch(_)
                | EngineError::EmbeddingUnavailable(_)
                | EngineError::IndexUnavailable(_)
                | EngineError::ModelUnavailable(_)
        )
    }
}
