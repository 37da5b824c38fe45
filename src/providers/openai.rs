use async_openai::{
    config::OpenAIConfig,
    types::{
        ChatCompletionRequestMessage, ChatCompletionRequestSystemMessage,
        ChatCompletionRequestUserMessage, ChatCompletionRequestUserMessageContent,
        CreateChatCompletionRequestArgs, Role,
    },
    Client,
};
use async_trait::async_trait;

use super::{with_retry, CompletionProvider, RetryPolicy};
use crate::error::EngineError;

const SYSTEM_MESSAGE: &str =
    "You are an expert document analyst answering questions about policy documents.";

/// OpenAI chat-completions provider, usable as an alternative to Gemini.
pub struct OpenAiProvider {
    client: Client<OpenAIConfig>,
    model: String,
    retry: RetryPolicy,
}

impl OpenAiProvider {
    pub fn new(api_key: String, model: String) -> Self {
        let config = OpenAIConfig::new().with_api_key(api_key);
        Self {
            client: Client::with_config(config),
            model,
            retry: RetryPolicy::default(),
        }
    }

    async fn call_once(&self, prompt: &str) -> Result<String, EngineError> {
        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .temperature(0.1)
            .messages(vec![
                ChatCompletionRequestMessage::System(ChatCompletionRequestSystemMessage {
                    role: Role::System,
                    content: SYSTEM_MESSAGE.to_string(),
                    name: None,
                }),
                ChatCompletionRequestMessage::User(ChatCompletionRequestUserMessage {
                    role: Role::User,
                    content: ChatCompletionRequestUserMessageContent::Text(prompt.to_string()),
                    name: None,
                }),
            ])
            .build()
            .map_err(|e| EngineError::ModelUnavailable(e.to_string()))?;

        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(|e| EngineError::ModelUnavailable(e.to_string()))?;

        response
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .ok_or_else(|| EngineError::ModelUnavailable("no response content".into()))
    }
}

#[async_trait]
impl CompletionProvider for OpenAiProvider {
    async fn complete(&self, prompt: &str) -> Result<String, EngineError> {
        with_retry(&self.retry, || self.call_once(prompt)).await
    }

    fn model_info(&self) -> String {
        format!("openai/{}", self.model)
    }
}
