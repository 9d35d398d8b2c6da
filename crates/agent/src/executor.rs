//! Executor: tasks in, results out
//!
//! Every dequeued task yields exactly one result. Tool failures, panics and
//! timeouts become error results and the loop carries on; the result
//! sentinel is sent only after every dequeued task has finished.

use cappuccino_bus::{ResultSource, StageReceiver, StageSender, Task, TaskResult};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::llm::{LlmClient, LLM_UNAVAILABLE};
use crate::prompt;
use crate::tools::{ToolHandle, ToolRegistry};

/// Default per-task time limit
pub const DEFAULT_TASK_TIMEOUT: Duration = Duration::from_secs(120);

/// Default size of the blocking-tool pool
pub const DEFAULT_WORKER_THREADS: usize = 4;

/// How dequeued tasks are scheduled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutionMode {
    /// One task at a time, in queue order
    #[default]
    Sequential,
    /// Up to `max_in_flight` tasks at once; results are re-sorted by step
    Parallel { max_in_flight: usize },
}

impl ExecutionMode {
    /// `1` (or `0`) selects sequential execution
    pub fn from_limit(max_parallel_tasks: usize) -> Self {
        if max_parallel_tasks <= 1 {
            ExecutionMode::Sequential
        } else {
            ExecutionMode::Parallel {
                max_in_flight: max_parallel_tasks,
            }
        }
    }
}

#[derive(Clone)]
pub struct Executor {
    registry: Arc<ToolRegistry>,
    llm: LlmClient,
    mode: ExecutionMode,
    task_timeout: Duration,
    pool: Arc<Semaphore>,
}

impl Executor {
    pub fn new(registry: Arc<ToolRegistry>, llm: LlmClient) -> Self {
        Self {
            registry,
            llm,
            mode: ExecutionMode::default(),
            task_timeout: DEFAULT_TASK_TIMEOUT,
            pool: Arc::new(Semaphore::new(DEFAULT_WORKER_THREADS)),
        }
    }

    pub fn with_mode(mut self, mode: ExecutionMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_task_timeout(mut self, timeout: Duration) -> Self {
        self.task_timeout = timeout;
        self
    }

    /// Bound the number of blocking tools running at once
    pub fn with_worker_threads(mut self, workers: usize) -> Self {
        self.pool = Arc::new(Semaphore::new(workers.max(1)));
        self
    }

    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }

    /// Consume tasks until the sentinel, producing one result per task
    pub async fn execute(&self, rx: StageReceiver<Task>, tx: StageSender<TaskResult>) -> usize {
        self.execute_until(rx, tx, CancellationToken::new()).await
    }

    /// Like [`execute`](Self::execute), but stops dequeuing once `cancel` fires.
    ///
    /// Tasks already running finish and their results are delivered; the
    /// plan queue is then dropped and the sentinel sent.
    pub async fn execute_until(
        &self,
        rx: StageReceiver<Task>,
        tx: StageSender<TaskResult>,
        cancel: CancellationToken,
    ) -> usize {
        let count = match self.mode {
            ExecutionMode::Sequential => self.run_sequential(rx, &tx, &cancel).await,
            ExecutionMode::Parallel { max_in_flight } => {
                self.run_parallel(rx, &tx, &cancel, max_in_flight.max(1))
                    .await
            }
        };
        info!("◆ EXECUTOR: {} RESULTS", count);
        tx.finish().await;
        count
    }

    async fn run_sequential(
        &self,
        mut rx: StageReceiver<Task>,
        tx: &StageSender<TaskResult>,
        cancel: &CancellationToken,
    ) -> usize {
        let mut count = 0;
        while let Some(task) = next_task(&mut rx, cancel).await {
            let result = self.run_task(&task).await;
            forward(tx, result).await;
            count += 1;
        }
        count
    }

    async fn run_parallel(
        &self,
        mut rx: StageReceiver<Task>,
        tx: &StageSender<TaskResult>,
        cancel: &CancellationToken,
        max_in_flight: usize,
    ) -> usize {
        let mut tasks: Vec<Task> = Vec::new();
        let mut slots: Vec<Option<TaskResult>> = Vec::new();
        let mut running: JoinSet<(usize, TaskResult)> = JoinSet::new();

        while let Some(task) = next_task(&mut rx, cancel).await {
            while running.len() >= max_in_flight {
                collect_one(&mut running, &mut slots).await;
            }
            let index = tasks.len();
            tasks.push(task.clone());
            slots.push(None);

            let executor = self.clone();
            running.spawn(async move { (index, executor.run_task(&task).await) });
        }
        drop(rx);

        while !running.is_empty() {
            collect_one(&mut running, &mut slots).await;
        }

        let mut results: Vec<(usize, TaskResult)> = slots
            .into_iter()
            .zip(&tasks)
            .enumerate()
            .map(|(i, (slot, task))| {
                let result = slot.unwrap_or_else(|| {
                    TaskResult::failure(task, ResultSource::Tool, "task aborted")
                });
                (i, result)
            })
            .collect();
        results.sort_by_key(|(order, r)| (r.step, *order));

        let count = results.len();
        for (_, result) in results {
            forward(tx, result).await;
        }
        count
    }

    /// Execute one task through its tool or the model
    pub async fn run_task(&self, task: &Task) -> TaskResult {
        match self.registry.get(&task.action) {
            Some(tool) => self.run_tool(task, tool).await,
            None => self.run_llm(task).await,
        }
    }

    async fn run_tool(&self, task: &Task, tool: ToolHandle) -> TaskResult {
        let args = Value::Object(self.registry.filter_arguments(&task.action, &task.parameters));
        let produces_artifact = tool.produces_artifact();
        debug!("◆ EXECUTOR: STEP {} TOOL {}", task.step, task.action);

        let outcome = match tool {
            ToolHandle::Async(tool) => {
                let handle = tokio::spawn(async move { tool.execute(args).await });
                let abort = handle.abort_handle();
                match tokio::time::timeout(self.task_timeout, handle).await {
                    Ok(joined) => joined,
                    Err(_) => {
                        abort.abort();
                        return self.timed_out(task, ResultSource::Tool);
                    }
                }
            }
            ToolHandle::Blocking(tool) => {
                let permit = match self.pool.clone().acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => {
                        return TaskResult::failure(task, ResultSource::Tool, "worker pool closed")
                    }
                };
                let handle = tokio::task::spawn_blocking(move || {
                    let _permit = permit;
                    tool.execute(args)
                });
                match tokio::time::timeout(self.task_timeout, handle).await {
                    Ok(joined) => joined,
                    Err(_) => return self.timed_out(task, ResultSource::Tool),
                }
            }
        };

        match outcome {
            Ok(Ok(output)) => {
                let artifact = produces_artifact
                    .then(|| artifact_reference(&output))
                    .flatten();
                let result = TaskResult::success(task, ResultSource::Tool, output);
                match artifact {
                    Some(path) => result.with_artifact(path),
                    None => result,
                }
            }
            Ok(Err(e)) => {
                warn!("◆ EXECUTOR: STEP {} FAILED: {}", task.step, e);
                TaskResult::failure(task, ResultSource::Tool, e.to_string())
            }
            Err(join_error) => {
                let message = describe_join_error(join_error);
                warn!("◆ EXECUTOR: STEP {} {}", task.step, message);
                TaskResult::failure(task, ResultSource::Tool, message)
            }
        }
    }

    async fn run_llm(&self, task: &Task) -> TaskResult {
        debug!("◆ EXECUTOR: STEP {} TO MODEL", task.step);
        let prompt = prompt::execution_prompt(&task.action, &task.parameters);
        match tokio::time::timeout(self.task_timeout, self.llm.complete(&prompt)).await {
            Ok(Ok(text)) => TaskResult::success(task, ResultSource::Llm, text),
            Ok(Err(e)) => {
                debug!("◆ EXECUTOR: STEP {} {}", task.step, e);
                TaskResult::failure(task, ResultSource::Llm, LLM_UNAVAILABLE)
            }
            Err(_) => self.timed_out(task, ResultSource::Llm),
        }
    }

    fn timed_out(&self, task: &Task, source: ResultSource) -> TaskResult {
        warn!("◆ EXECUTOR: STEP {} TIMED OUT", task.step);
        TaskResult::failure(
            task,
            source,
            format!("timed out after {:?}", self.task_timeout),
        )
    }
}

async fn next_task(rx: &mut StageReceiver<Task>, cancel: &CancellationToken) -> Option<Task> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            info!("◆ EXECUTOR: CANCELLED");
            None
        }
        task = rx.recv() => task,
    }
}

async fn forward(tx: &StageSender<TaskResult>, result: TaskResult) {
    if tx.send(result).await.is_err() {
        warn!("◆ EXECUTOR: RESULT CONSUMER GONE");
    }
}

async fn collect_one(
    running: &mut JoinSet<(usize, TaskResult)>,
    slots: &mut [Option<TaskResult>],
) {
    match running.join_next().await {
        Some(Ok((index, result))) => slots[index] = Some(result),
        Some(Err(e)) => warn!("◆ EXECUTOR: {}", describe_join_error(e)),
        None => {}
    }
}

/// Fields of an object output that name a produced artifact
const ARTIFACT_FIELDS: [&str; 3] = ["path", "file", "artifact"];

/// Artifact named by a tool output: a bare string, or a string under one
/// of [`ARTIFACT_FIELDS`] in an object
pub fn artifact_reference(output: &Value) -> Option<String> {
    let reference = match output {
        Value::String(s) => Some(s.as_str()),
        Value::Object(map) => ARTIFACT_FIELDS
            .iter()
            .find_map(|field| map.get(*field).and_then(Value::as_str)),
        _ => None,
    }?;
    let reference = reference.trim();
    (!reference.is_empty()).then(|| reference.to_string())
}

fn describe_join_error(error: JoinError) -> String {
    if error.is_panic() {
        let payload = error.into_panic();
        let detail = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        format!("tool panicked: {}", detail)
    } else {
        "tool cancelled".to_string()
    }
}
