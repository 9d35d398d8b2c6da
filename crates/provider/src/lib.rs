//! Language-model service boundary.
//!
//! The pipeline only ever asks a model for text. [`Provider`] is the seam,
//! [`OpenAiProvider`] speaks the OpenAI-compatible chat API and
//! [`RetryProvider`] adds backoff around any other provider.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use thiserror::Error;

pub mod openai;
pub mod retry;

pub use openai::OpenAiProvider;
pub use retry::{RetryPolicy, RetryProvider};

/// Language-model service errors
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("malformed json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("api error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("no api key configured")]
    NoApiKey,

    #[error("response carried no text")]
    InvalidResponse,

    #[error("rate limited")]
    RateLimited,
}

impl ProviderError {
    /// Whether retrying the same request may succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            ProviderError::Request(_) | ProviderError::RateLimited => true,
            ProviderError::Api { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, ProviderError>;

/// Model reply
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    pub content: Option<String>,
    #[serde(default)]
    pub finish_reason: String,
    #[serde(default)]
    pub usage: Usage,
}

impl ChatResponse {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            finish_reason: "stop".to_string(),
            usage: Usage::default(),
        }
    }

    /// Build a response from an arbitrary reply envelope
    pub fn from_envelope(value: &Value) -> Self {
        Self {
            content: extract_text(value),
            finish_reason: value["choices"][0]["finish_reason"]
                .as_str()
                .unwrap_or("stop")
                .to_string(),
            usage: Usage::default(),
        }
    }
}

/// Token accounting
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// Chat message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

/// Request parameters
#[derive(Debug, Clone)]
pub struct ChatParams {
    pub model: String,
    pub messages: Vec<Message>,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl Default for ChatParams {
    fn default() -> Self {
        Self {
            model: String::new(),
            messages: Vec::new(),
            max_tokens: 4096,
            temperature: 0.7,
        }
    }
}

impl ChatParams {
    /// Single-prompt request
    pub fn prompt(model: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            messages: vec![Message::user(prompt)],
            ..Default::default()
        }
    }
}

/// A text-generation service
#[async_trait]
pub trait Provider: Send + Sync {
    async fn chat(&self, params: ChatParams) -> Result<ChatResponse>;
    fn default_model(&self) -> String;
    fn is_configured(&self) -> bool;
}

#[async_trait]
impl<P: Provider + ?Sized> Provider for std::sync::Arc<P> {
    async fn chat(&self, params: ChatParams) -> Result<ChatResponse> {
        (**self).chat(params).await
    }

    fn default_model(&self) -> String {
        (**self).default_model()
    }

    fn is_configured(&self) -> bool {
        (**self).is_configured()
    }
}

/// First textual content of a reply.
///
/// Accepts a bare string, an OpenAI-style `choices[0].message.content`
/// envelope, or objects with a `content` or `text` field.
pub fn extract_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Object(map) => {
            if let Some(content) = value["choices"][0]["message"]["content"].as_str() {
                return Some(content.to_string());
            }
            if let Some(text) = value["choices"][0]["text"].as_str() {
                return Some(text.to_string());
            }
            for key in ["content", "text"] {
                match map.get(key) {
                    Some(Value::String(s)) => return Some(s.clone()),
                    Some(Value::Null) | None => {}
                    Some(other) => return extract_text(other).or_else(|| Some(other.to_string())),
                }
            }
            None
        }
        Value::Array(items) => items.iter().find_map(extract_text),
        _ => None,
    }
}
