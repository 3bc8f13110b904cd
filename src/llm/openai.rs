//! OpenAI-compatible chat client.
//!
//! Works against any endpoint speaking the `/chat/completions` dialect
//! (OpenAI, Azure OpenAI, OpenRouter, vLLM, llama.cpp server). The request
//! timeout comes from [`ChatOptions`] so the caller controls how much of
//! the deadline the model call may consume.

use async_trait::async_trait;
use serde::Deserialize;

use crate::llm::client::{ChatClient, ChatMessage, ChatOptions};
use crate::types::{AppError, Result};

/// Chat client for OpenAI-compatible endpoints.
pub struct OpenAiCompatClient {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
}

impl OpenAiCompatClient {
    /// Create a new client.
    ///
    /// # Arguments
    ///
    /// * `endpoint` - API base URL (e.g. `https://api.openai.com/v1`)
    /// * `api_key` - Bearer token
    /// * `model` - Model identifier sent with every request
    pub fn new(endpoint: &str, api_key: &str, model: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| AppError::Configuration(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            http,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
        })
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.endpoint)
    }
}

#[derive(Debug, Deserialize)]
struct WireCompletion {
    choices: Vec<WireChoice>,
}

#[derive(Debug, Deserialize)]
struct WireChoice {
    message: WireMessage,
}

#[derive(Debug, Deserialize)]
struct WireMessage {
    content: Option<String>,
}

#[async_trait]
impl ChatClient for OpenAiCompatClient {
    async fn chat(&self, messages: &[ChatMessage], options: &ChatOptions) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": messages,
            "temperature": options.temperature,
            "max_tokens": options.max_tokens,
        });

        let response = self
            .http
            .post(self.completions_url())
            .bearer_auth(&self.api_key)
            .timeout(options.timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AppError::LLMUnavailable("chat request timed out".to_string())
                } else {
                    AppError::LLMUnavailable("chat request failed".to_string())
                }
            })?;

        if !response.status().is_success() {
            return Err(AppError::LLMUnavailable(format!(
                "chat endpoint returned HTTP {}",
                response.status().as_u16()
            )));
        }

        let completion: WireCompletion = response
            .json()
            .await
            .map_err(|_| AppError::LLMUnavailable("malformed chat response".to_string()))?;

        completion
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| AppError::LLMUnavailable("chat response had no content".to_string()))
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
