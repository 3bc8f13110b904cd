//! Chat LLM provider clients and abstractions.
//!
//! The answer generator only needs one operation: send a short message list
//! to a chat model with a temperature, a token cap, and a hard timeout, and
//! get text back. [`ChatClient`] abstracts that; [`OpenAiCompatClient`]
//! implements it against any OpenAI-compatible `/chat/completions` endpoint.

/// Core chat client trait and message types.
pub mod client;
/// OpenAI-compatible HTTP chat client.
pub mod openai;

pub use client::{ChatClient, ChatMessage, ChatOptions, ChatRole};
pub use openai::OpenAiCompatClient;
