//! Shared fixtures: a scripted provider and a few misbehaving tools

#![allow(dead_code)]

use async_trait::async_trait;
use cappuccino_agent::tools::{BlockingTool, ToolResult, ToolTrait};
use cappuccino_agent::{LlmClient, ToolRegistry};
use cappuccino_provider::{ChatParams, ChatResponse, Provider, ProviderError};
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Replies from a fixed script; fails once the script is exhausted
pub struct ScriptedProvider {
    replies: Mutex<VecDeque<Result<String, ProviderError>>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedProvider {
    pub fn new<I, S>(replies: I) -> Arc<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Arc::new(Self {
            replies: Mutex::new(replies.into_iter().map(|r| Ok(r.into())).collect()),
            prompts: Mutex::new(Vec::new()),
        })
    }

    pub fn push_error(&self, error: ProviderError) {
        self.replies.lock().unwrap().push_back(Err(error));
    }

    /// Every user prompt received, in order
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    async fn chat(&self, params: ChatParams) -> cappuccino_provider::Result<ChatResponse> {
        if let Some(last) = params.messages.last() {
            self.prompts.lock().unwrap().push(last.content.clone());
        }
        match self.replies.lock().unwrap().pop_front() {
            Some(Ok(text)) => Ok(ChatResponse::text(text)),
            Some(Err(e)) => Err(e),
            None => Err(ProviderError::Api {
                status: 503,
                message: "script exhausted".into(),
            }),
        }
    }

    fn default_model(&self) -> String {
        "scripted".into()
    }

    fn is_configured(&self) -> bool {
        true
    }
}

pub fn scripted_llm(provider: &Arc<ScriptedProvider>) -> LlmClient {
    LlmClient::new(provider.clone())
}

/// Sleeps, then echoes; counts how many calls overlap
pub struct SlowTool {
    pub delay: Duration,
    pub active: Arc<AtomicUsize>,
    pub max_seen: Arc<AtomicUsize>,
}

impl SlowTool {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            active: Arc::new(AtomicUsize::new(0)),
            max_seen: Arc::new(AtomicUsize::new(0)),
        }
    }
}

#[async_trait]
impl ToolTrait for SlowTool {
    fn name(&self) -> &str {
        "slow"
    }
    fn description(&self) -> &str {
        "Wait, then echo the label"
    }
    fn parameters(&self) -> Value {
        json!({"type": "object", "properties": {"label": {"type": "string"}}})
    }
    async fn execute(&self, args: Value) -> ToolResult {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_seen.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.active.fetch_sub(1, Ordering::SeqCst);
        Ok(args.get("label").cloned().unwrap_or(Value::Null))
    }
}

/// Always fails
pub struct FailingTool;

#[async_trait]
impl ToolTrait for FailingTool {
    fn name(&self) -> &str {
        "always_fails"
    }
    fn description(&self) -> &str {
        "Fails every time"
    }
    fn parameters(&self) -> Value {
        json!({"type": "object", "properties": {}})
    }
    async fn execute(&self, _args: Value) -> ToolResult {
        Err("deliberate failure".into())
    }
}

/// Panics every time
pub struct PanickingTool;

#[async_trait]
impl ToolTrait for PanickingTool {
    fn name(&self) -> &str {
        "panics"
    }
    fn description(&self) -> &str {
        "Panics"
    }
    fn parameters(&self) -> Value {
        json!({"type": "object", "properties": {}})
    }
    async fn execute(&self, _args: Value) -> ToolResult {
        panic!("tool blew up")
    }
}

/// Blocking tool that panics
pub struct PanickingBlockingTool;

impl BlockingTool for PanickingBlockingTool {
    fn name(&self) -> &str {
        "panics_blocking"
    }
    fn description(&self) -> &str {
        "Panics on the worker pool"
    }
    fn parameters(&self) -> Value {
        json!({"type": "object", "properties": {}})
    }
    fn execute(&self, _args: Value) -> ToolResult {
        panic!("blocking tool blew up")
    }
}

/// Writes nothing, but reports a fixed artifact path
pub struct StubImageTool;

impl BlockingTool for StubImageTool {
    fn name(&self) -> &str {
        "generate_image"
    }
    fn description(&self) -> &str {
        "Pretend to draw"
    }
    fn parameters(&self) -> Value {
        json!({"type": "object", "properties": {"prompt": {"type": "string"}}})
    }
    fn produces_artifact(&self) -> bool {
        true
    }
    fn execute(&self, _args: Value) -> ToolResult {
        Ok(json!({"path": "/tmp/cat.png"}))
    }
}

/// Records the arguments it receives
pub struct RecordingTool {
    pub seen: Arc<Mutex<Vec<Value>>>,
}

impl RecordingTool {
    pub fn new() -> Self {
        Self {
            seen: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

#[async_trait]
impl ToolTrait for RecordingTool {
    fn name(&self) -> &str {
        "record"
    }
    fn description(&self) -> &str {
        "Record arguments"
    }
    fn parameters(&self) -> Value {
        json!({"type": "object", "properties": {"keep": {"type": "string"}}})
    }
    async fn execute(&self, args: Value) -> ToolResult {
        self.seen.lock().unwrap().push(args);
        Ok(json!("recorded"))
    }
}

/// Registry with the standard arithmetic and reply tools
pub fn basic_registry() -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(cappuccino_agent::tools::RespondTool);
    registry.register_blocking(cappuccino_agent::tools::SimpleMathTool);
    registry
}
