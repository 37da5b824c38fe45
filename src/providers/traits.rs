use async_trait::async_trait;

use crate::error::EngineError;

/// Narrow boundary to a language model: a prompt in, structured text out.
/// Implementations own their transport, retry policy and credentials.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String, EngineError>;

    fn model_info(&self) -> String;
}
