//! Language-model access for the pipeline stages

use cappuccino_provider::{ChatParams, Message, Provider};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::{AgentError, Result};

/// Text produced in place of a reply when no model can be reached
pub const LLM_UNAVAILABLE: &str = "error: llm unavailable";

/// Shared handle to an optional provider
#[derive(Clone)]
pub struct LlmClient {
    provider: Option<Arc<dyn Provider>>,
    model: String,
    max_tokens: u32,
    temperature: f32,
    system_prompt: Option<String>,
}

impl LlmClient {
    pub fn new(provider: Arc<dyn Provider>) -> Self {
        let model = provider.default_model();
        Self {
            provider: Some(provider),
            model,
            max_tokens: 4096,
            temperature: 0.7,
            system_prompt: None,
        }
    }

    /// Client that always reports the model as unavailable
    pub fn unavailable() -> Self {
        Self {
            provider: None,
            model: String::new(),
            max_tokens: 4096,
            temperature: 0.7,
            system_prompt: None,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        let model = model.into();
        if !model.is_empty() {
            self.model = model;
        }
        self
    }

    pub fn with_limits(mut self, max_tokens: u32, temperature: f32) -> Self {
        self.max_tokens = max_tokens;
        self.temperature = temperature;
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Whether a configured provider is attached
    pub fn is_available(&self) -> bool {
        self.provider.as_ref().is_some_and(|p| p.is_configured())
    }

    /// Ask the model; any failure becomes [`AgentError::LlmUnavailable`]
    pub async fn complete(&self, prompt: &str) -> Result<String> {
        let provider = match &self.provider {
            Some(p) if p.is_configured() => p,
            _ => return Err(AgentError::LlmUnavailable("no provider configured".into())),
        };

        let mut messages = Vec::with_capacity(2);
        if let Some(system) = &self.system_prompt {
            messages.push(Message::system(system.clone()));
        }
        messages.push(Message::user(prompt));

        let params = ChatParams {
            model: self.model.clone(),
            messages,
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        };

        debug!("◆ LLM REQUEST: {} chars", prompt.len());
        match provider.chat(params).await {
            Ok(response) => match response.content {
                Some(text) if !text.trim().is_empty() => Ok(text),
                _ => Err(AgentError::LlmUnavailable("empty reply".into())),
            },
            Err(e) => {
                warn!("◆ LLM REQUEST FAILED: {}", e);
                Err(AgentError::LlmUnavailable(e.to_string()))
            }
        }
    }

    /// Ask the model, yielding [`LLM_UNAVAILABLE`] on failure
    pub async fn generate(&self, prompt: &str) -> String {
        self.complete(prompt)
            .await
            .unwrap_or_else(|_| LLM_UNAVAILABLE.to_string())
    }
}

impl std::fmt::Debug for LlmClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmClient")
            .field("model", &self.model)
            .field("available", &self.is_available())
            .finish()
    }
}
