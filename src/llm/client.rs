//! Chat client abstraction.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::types::Result;

/// Role of a chat message sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    /// System instructions to the model.
    System,
    /// Message from the user.
    User,
    /// Response from the assistant.
    Assistant,
}

/// A single chat message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    /// The role of the message sender.
    pub role: ChatRole,
    /// The message content.
    pub content: String,
}

impl ChatMessage {
    /// Build a system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    /// Build a user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }
}

/// Per-request inference options.
#[derive(Debug, Clone)]
pub struct ChatOptions {
    /// Sampling temperature.
    pub temperature: f32,
    /// Maximum output tokens.
    pub max_tokens: u32,
    /// Hard wall-clock bound for the request.
    pub timeout: Duration,
}

/// Generic chat client trait for provider abstraction.
///
/// The timeout in [`ChatOptions`] is a hard bound: implementations must not
/// block past it, since the caller derives it from the request deadline.
#[async_trait]
pub trait ChatClient: Send + Sync {
    /// Send a message list and return the model's text response.
    async fn chat(&self, messages: &[ChatMessage], options: &ChatOptions) -> Result<String>;

    /// Get the model name/identifier.
    fn model_name(&self) -> &str;
}
