//! Tool registry and built-in tools
//!
//! Tools come in two kinds. Async tools ([`ToolTrait`]) are awaited by the
//! executor; blocking tools ([`BlockingTool`]) do synchronous I/O or CPU
//! work and are run on the bounded worker pool.

pub mod filesystem;
pub mod graph;
pub mod image;
pub mod math;
pub mod path_utils;
pub mod respond;
pub mod shell;
pub mod time;
pub mod web;

pub use filesystem::{FileAppendTool, FileReadTool, FileReplaceTool};
pub use graph::{register_graph_tools, GraphStore, KnowledgeGraph};
pub use image::GenerateImageTool;
pub use math::SimpleMathTool;
pub use respond::RespondTool;
pub use shell::ShellExecTool;
pub use time::CurrentTimeTool;
pub use web::{SearchApiTool, WebSearchTool};

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

use crate::AgentError;

/// Error returned by a tool
pub type ToolError = Box<dyn std::error::Error + Send + Sync>;

/// Tool outcome
pub type ToolResult = Result<Value, ToolError>;

/// Async tool
#[async_trait]
pub trait ToolTrait: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    /// JSON schema of the accepted arguments
    fn parameters(&self) -> Value;
    /// Whether the output is a path to a produced artifact
    fn produces_artifact(&self) -> bool {
        false
    }
    async fn execute(&self, args: Value) -> ToolResult;
}

/// Synchronous tool, run off the async runtime
pub trait BlockingTool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn parameters(&self) -> Value;
    fn produces_artifact(&self) -> bool {
        false
    }
    fn execute(&self, args: Value) -> ToolResult;
}

/// A registered tool of either kind
#[derive(Clone)]
pub enum ToolHandle {
    Async(Arc<dyn ToolTrait>),
    Blocking(Arc<dyn BlockingTool>),
}

impl ToolHandle {
    pub fn name(&self) -> &str {
        match self {
            ToolHandle::Async(t) => t.name(),
            ToolHandle::Blocking(t) => t.name(),
        }
    }

    pub fn description(&self) -> &str {
        match self {
            ToolHandle::Async(t) => t.description(),
            ToolHandle::Blocking(t) => t.description(),
        }
    }

    pub fn parameters(&self) -> Value {
        match self {
            ToolHandle::Async(t) => t.parameters(),
            ToolHandle::Blocking(t) => t.parameters(),
        }
    }

    pub fn produces_artifact(&self) -> bool {
        match self {
            ToolHandle::Async(t) => t.produces_artifact(),
            ToolHandle::Blocking(t) => t.produces_artifact(),
        }
    }

    pub fn is_blocking(&self) -> bool {
        matches!(self, ToolHandle::Blocking(_))
    }
}

impl std::fmt::Debug for ToolHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolHandle")
            .field("name", &self.name())
            .field("blocking", &self.is_blocking())
            .finish()
    }
}

/// Tool description handed to the planner
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// Name → tool map
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, ToolHandle>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Register an async tool, replacing any tool with the same name
    pub fn register<T: ToolTrait + 'static>(&mut self, tool: T) {
        let name = tool.name().to_string();
        self.tools.insert(name, ToolHandle::Async(Arc::new(tool)));
    }

    /// Register a blocking tool, replacing any tool with the same name
    pub fn register_blocking<T: BlockingTool + 'static>(&mut self, tool: T) {
        let name = tool.name().to_string();
        self.tools.insert(name, ToolHandle::Blocking(Arc::new(tool)));
    }

    pub fn get(&self, name: &str) -> Option<ToolHandle> {
        self.tools.get(name).cloned()
    }

    pub fn has(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Descriptions of every tool, sorted by name
    pub fn schema(&self) -> Vec<ToolSchema> {
        let mut schema: Vec<ToolSchema> = self
            .tools
            .values()
            .map(|t| ToolSchema {
                name: t.name().to_string(),
                description: t.description().to_string(),
                parameters: t.parameters(),
            })
            .collect();
        schema.sort_by(|a, b| a.name.cmp(&b.name));
        schema
    }

    /// Keep only the arguments the tool declares in its schema `properties`
    pub fn filter_arguments(&self, name: &str, params: &Map<String, Value>) -> Map<String, Value> {
        let Some(tool) = self.tools.get(name) else {
            return Map::new();
        };
        filter_against_schema(name, &tool.parameters(), params)
    }

    /// Run a tool directly with filtered arguments
    pub async fn execute(&self, name: &str, params: &Map<String, Value>) -> ToolResult {
        let tool = self
            .get(name)
            .ok_or_else(|| AgentError::ToolNotFound(name.to_string()))?;
        let args = Value::Object(self.filter_arguments(name, params));
        match tool {
            ToolHandle::Async(tool) => tool.execute(args).await,
            ToolHandle::Blocking(tool) => tokio::task::spawn_blocking(move || tool.execute(args))
                .await
                .map_err(|e| AgentError::ToolExecution(format!("{}: {}", name, e)))?,
        }
    }
}

fn filter_against_schema(
    name: &str,
    schema: &Value,
    params: &Map<String, Value>,
) -> Map<String, Value> {
    let Some(properties) = schema.get("properties").and_then(Value::as_object) else {
        if !params.is_empty() {
            debug!("◆ {} TAKES NO ARGUMENTS, DROPPED {}", name, params.len());
        }
        return Map::new();
    };

    let mut kept = Map::new();
    for (key, value) in params {
        if properties.contains_key(key) {
            kept.insert(key.clone(), value.clone());
        } else {
            debug!("◆ {} DROPPED UNKNOWN ARGUMENT: {}", name, key);
        }
    }
    kept
}

/// Settings for the built-in tools
#[derive(Debug, Clone, Default)]
pub struct DefaultToolOptions {
    pub search_api_key: Option<String>,
    pub search_max_results: u32,
    pub shell_timeout_secs: u64,
}

impl DefaultToolOptions {
    pub fn from_config(config: &cappuccino_config::Config) -> Self {
        Self {
            search_api_key: config.search_api_key(),
            search_max_results: config.tools.search_max_results,
            shell_timeout_secs: config.tools.shell_timeout_secs,
        }
    }
}

/// Register the built-in tools rooted at `workspace`
pub fn register_default_tools(
    registry: &mut ToolRegistry,
    workspace: &Path,
    options: &DefaultToolOptions,
) {
    registry.register(RespondTool);
    registry.register(CurrentTimeTool);
    registry.register_blocking(SimpleMathTool);
    registry.register_blocking(GenerateImageTool::new(workspace.to_path_buf()));

    registry.register_blocking(FileReadTool::new(workspace.to_path_buf()));
    registry.register_blocking(FileAppendTool::new(workspace.to_path_buf()));
    registry.register_blocking(FileReplaceTool::new(workspace.to_path_buf()));

    registry.register(ShellExecTool::new(
        options.shell_timeout_secs,
        workspace.to_path_buf(),
    ));

    registry.register(WebSearchTool::new(
        options.search_api_key.clone(),
        options.search_max_results,
    ));
    registry.register(SearchApiTool::default());
}
