pub mod api;
pub mod config;
pub mod context;
pub mod document;
pub mod embedding;
pub mod error;
pub mod orchestrator;
pub mod providers;
pub mod retrieval;
pub mod synthesis;
pub mod types;

// Re-export commonly used items
pub use config::{EngineConfig, IndexBackend};
pub use error::EngineError;
pub use orchestrator::QueryOrchestrator;
pub use types::{AnswerRecord, QueryRequest, QueryResponse};
