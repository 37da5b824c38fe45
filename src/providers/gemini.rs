use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

use super::{with_retry, CompletionProvider, KeyRotator, RetryPolicy};
use crate::error::EngineError;

/// Gemini generateContent REST provider. Draws its API key from the
/// shared rotator and advances it on a throttled response, so the
/// retry goes out on the next key in the pool.
pub struct GeminiProvider {
    keys: Arc<KeyRotator>,
    model: String,
    client: Client,
    retry: RetryPolicy,
}

impl GeminiProvider {
    pub fn new(keys: Arc<KeyRotator>, model: String) -> Self {
        Self {
            keys,
            model,
            client: Client::new(),
            retry: RetryPolicy::default(),
        }
    }

    async fn call_once(&self, prompt: &str) -> Result<String, EngineError> {
        let url = format!(
            "https://generativelanguage.googleapis.com/v1beta/models/{}:generateContent",
            self.model
        );
        let api_key = self.keys.current();
        let response = self
            .client
            .post(&url)
            .query(&[("key", api_key.as_str())])
            .json(&json!({
                "contents": [{
                    "role": "user",
                    "parts": [{ "text": prompt }]
                }],
                "generationConfig": {
                    "temperature": 0.1
                }
            }))
            .send()
            .await
            .map_err(|e| EngineError::ModelUnavailable(e.to_string()))?;

        let status = response.status();
        if status.as_u16() == 429 {
            self.keys.rotate();
            return Err(EngineError::ModelUnavailable(format!(
                "generateContent throttled ({}); rotated API key",
                status
            )));
        }
        if !status.is_success() {
            return Err(EngineError::ModelUnavailable(format!(
                "generateContent returned {}",
                status
            )));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| EngineError::ModelUnavailable(e.to_string()))?;

        body["candidates"][0]["content"]["parts"][0]["text"]
            .as_str()
            .map(|s| s.to_string())
            .ok_or_else(|| EngineError::ModelUnavailable("invalid response format".into()))
    }
}

#[async_trait]
impl CompletionProvider for GeminiProvider {
    async fn complete(&self, prompt: &str) -> Result<String, EngineError> {
        with_retry(&self.retry, || self.call_once(prompt)).await
    }

    fn model_info(&self) -> String {
        format!("gemini/{}", self.model)
    }
}
