//! Task-orchestration agent
//!
//! A query flows through three stages joined by bounded queues: the
//! [`Planner`] turns it into tasks, the [`Executor`] runs each task through
//! a registered tool or the language model, and the [`Analyzer`] turns the
//! results into one answer. The [`Orchestrator`] owns the stages, the
//! persisted state and the run lock.

use thiserror::Error;

pub mod analyzer;
pub mod executor;
pub mod llm;
pub mod orchestrator;
pub mod planner;
pub mod prompt;
pub mod tools;

pub use analyzer::Analyzer;
pub use executor::{ExecutionMode, Executor};
pub use llm::{LlmClient, LLM_UNAVAILABLE};
pub use orchestrator::{apology, EventSink, Orchestrator, OrchestratorBuilder, RunEvent, RunPhase};
pub use planner::Planner;
pub use tools::{BlockingTool, ToolHandle, ToolRegistry, ToolSchema, ToolTrait};

/// Agent errors
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("could not parse plan: {0}")]
    PlanParse(String),

    #[error("tool not found: {0}")]
    ToolNotFound(String),

    #[error("tool execution failed: {0}")]
    ToolExecution(String),

    #[error("llm unavailable: {0}")]
    LlmUnavailable(String),

    #[error("run cancelled")]
    Cancelled,

    #[error("pipeline failed: {0}")]
    Pipeline(String),

    #[error("state error: {0}")]
    State(#[from] cappuccino_state::StateError),
}

pub type Result<T> = std::result::Result<T, AgentError>;
