//! Stage queues for the planning pipeline.
//!
//! Tasks travel from the planner to the executor and results travel from
//! the executor to the analyzer over bounded channels. Every stream is
//! closed by exactly one [`Envelope::Done`] sentinel.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

/// Default capacity of a stage queue
pub const DEFAULT_QUEUE_CAPACITY: usize = 32;

/// One planned unit of work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Position in the plan (1-based, unique within a plan)
    pub step: u32,
    /// Registered tool name or free text for the language model
    #[serde(alias = "tool_name", alias = "tool")]
    pub action: String,
    /// Named arguments
    #[serde(default)]
    pub parameters: Map<String, Value>,
}

impl Task {
    /// Create a task without parameters
    pub fn new(step: u32, action: impl Into<String>) -> Self {
        Self {
            step,
            action: action.into(),
            parameters: Map::new(),
        }
    }

    /// Add a parameter
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }
}

/// Where a result's output came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultSource {
    /// A registered tool
    Tool,
    /// The language-model fallback
    Llm,
}

/// The outcome of executing one task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    /// Step of the originating task
    pub step: u32,
    /// Action of the originating task
    pub action: String,
    /// Tool return value or failure description
    pub output: Value,
    /// Whether execution failed
    pub is_error: bool,
    /// Whether a tool or the model produced the output
    pub source: ResultSource,
    /// Reference to a produced artifact, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact: Option<String>,
}

impl TaskResult {
    /// Successful result
    pub fn success(task: &Task, source: ResultSource, output: impl Into<Value>) -> Self {
        Self {
            step: task.step,
            action: task.action.clone(),
            output: output.into(),
            is_error: false,
            source,
            artifact: None,
        }
    }

    /// Failed result carrying a human-readable message
    pub fn failure(task: &Task, source: ResultSource, message: impl Into<String>) -> Self {
        Self {
            step: task.step,
            action: task.action.clone(),
            output: Value::String(message.into()),
            is_error: true,
            source,
            artifact: None,
        }
    }

    /// Attach an artifact reference
    pub fn with_artifact(mut self, artifact: impl Into<String>) -> Self {
        self.artifact = Some(artifact.into());
        self
    }

    /// Output rendered as plain text
    pub fn output_text(&self) -> String {
        match &self.output {
            Value::String(s) => s.clone(),
            Value::Null => String::new(),
            other => other.to_string(),
        }
    }
}

/// Queue item: a payload or the end-of-stream sentinel
#[derive(Debug, Clone, PartialEq)]
pub enum Envelope<T> {
    Item(T),
    Done,
}

/// Error returned when the receiving stage has gone away
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("stage queue closed")]
pub struct QueueClosed;

/// Producing half of a stage queue
#[derive(Debug)]
pub struct StageSender<T> {
    name: &'static str,
    inner: mpsc::Sender<Envelope<T>>,
}

/// Consuming half of a stage queue
#[derive(Debug)]
pub struct StageReceiver<T> {
    name: &'static str,
    inner: mpsc::Receiver<Envelope<T>>,
    finished: bool,
}

/// Create a bounded stage queue
pub fn stage_queue<T>(name: &'static str, capacity: usize) -> (StageSender<T>, StageReceiver<T>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (
        StageSender { name, inner: tx },
        StageReceiver {
            name,
            inner: rx,
            finished: false,
        },
    )
}

/// Queue carrying planned tasks
pub fn plan_queue(capacity: usize) -> (StageSender<Task>, StageReceiver<Task>) {
    stage_queue("plan", capacity)
}

/// Queue carrying task results
pub fn result_queue(capacity: usize) -> (StageSender<TaskResult>, StageReceiver<TaskResult>) {
    stage_queue("result", capacity)
}

impl<T> StageSender<T> {
    /// Enqueue one item, waiting for capacity
    pub async fn send(&self, item: T) -> Result<(), QueueClosed> {
        trace!("◆ {} QUEUE: ITEM", self.name);
        self.inner
            .send(Envelope::Item(item))
            .await
            .map_err(|_| QueueClosed)
    }

    /// Enqueue the sentinel and close this producer
    pub async fn finish(self) {
        debug!("◆ {} QUEUE: SENTINEL", self.name);
        if self.inner.send(Envelope::Done).await.is_err() {
            debug!("◆ {} QUEUE: RECEIVER GONE BEFORE SENTINEL", self.name);
        }
    }

    /// Whether the consumer has dropped its half
    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }
}

impl<T> StageReceiver<T> {
    /// Dequeue the next item; `None` once the sentinel has been observed.
    ///
    /// A producer dropped without sending the sentinel is treated as if it
    /// had sent one.
    pub async fn recv(&mut self) -> Option<T> {
        if self.finished {
            return None;
        }
        match self.inner.recv().await {
            Some(Envelope::Item(item)) => Some(item),
            Some(Envelope::Done) => {
                self.finished = true;
                None
            }
            None => {
                warn!("◆ {} QUEUE: PRODUCER DROPPED WITHOUT SENTINEL", self.name);
                self.finished = true;
                None
            }
        }
    }

    /// Drain everything up to the sentinel
    pub async fn collect(mut self) -> Vec<T> {
        let mut items = Vec::new();
        while let Some(item) = self.recv().await {
            items.push(item);
        }
        items
    }

    /// Whether the sentinel has been observed
    pub fn is_finished(&self) -> bool {
        self.finished
    }
}
