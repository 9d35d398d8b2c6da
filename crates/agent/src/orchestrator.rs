//! Orchestrator: one query, one answer
//!
//! A run holds the run lock from start to finish. History, task plan and
//! the phase counter change only under that lock and are persisted with a
//! single write at the end of the run.

use cappuccino_bus::{plan_queue, result_queue, Task, TaskResult, DEFAULT_QUEUE_CAPACITY};
use cappuccino_config::Config;
use cappuccino_provider::Provider;
use cappuccino_state::{AgentState, ConversationMessage, Role, StateStore, DEFAULT_MAX_MESSAGES};
use serde_json::Value;
use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::analyzer::{Analyzer, NO_RESULTS};
use crate::executor::{ExecutionMode, Executor, DEFAULT_TASK_TIMEOUT, DEFAULT_WORKER_THREADS};
use crate::llm::{LlmClient, LLM_UNAVAILABLE};
use crate::planner::{self, Planner};
use crate::prompt::SYSTEM_PROMPT;
use crate::tools::{
    register_default_tools, register_graph_tools, DefaultToolOptions, GraphStore, ToolRegistry,
};
use crate::{AgentError, Result};

/// Where the current (or last) run is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunPhase {
    #[default]
    Idle,
    Planning,
    Executing,
    Analyzing,
    Done,
    Error,
}

/// Progress report emitted during a run
#[derive(Debug, Clone, PartialEq)]
pub enum RunEvent {
    Phase(RunPhase),
    TaskPlanned(Task),
    TaskFinished(TaskResult),
    Answer(String),
}

/// Receiver side of [`Orchestrator::run_with_events`]
pub type EventSink = mpsc::UnboundedSender<RunEvent>;

/// Text returned when a run fails as a whole
pub fn apology(detail: impl Display) -> String {
    format!(
        "Sorry, something went wrong while handling your request: {}",
        detail
    )
}

/// Cache key under which answers and direct model calls are stored
pub fn llm_cache_key(prompt: &str) -> String {
    format!("llm:{}", prompt)
}

pub struct OrchestratorBuilder {
    llm: LlmClient,
    registry: ToolRegistry,
    store: Option<StateStore>,
    queue_capacity: usize,
    max_history_messages: usize,
    reuse_cached_answers: bool,
    mode: ExecutionMode,
    task_timeout: Duration,
    worker_threads: usize,
}

impl OrchestratorBuilder {
    pub fn new(llm: LlmClient) -> Self {
        Self {
            llm,
            registry: ToolRegistry::new(),
            store: None,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            max_history_messages: DEFAULT_MAX_MESSAGES,
            reuse_cached_answers: false,
            mode: ExecutionMode::Sequential,
            task_timeout: DEFAULT_TASK_TIMEOUT,
            worker_threads: DEFAULT_WORKER_THREADS,
        }
    }

    /// Everything wired from configuration, with the built-in tools
    pub fn from_config(config: &Config, provider: Option<Arc<dyn Provider>>) -> Self {
        let llm = match provider {
            Some(provider) => LlmClient::new(provider)
                .with_model(config.provider.model.clone())
                .with_limits(config.provider.max_tokens, config.provider.temperature),
            None => LlmClient::unavailable(),
        };

        let mut registry = ToolRegistry::new();
        register_default_tools(
            &mut registry,
            &config.workspace_path(),
            &DefaultToolOptions::from_config(config),
        );

        register_graph_tools(
            &mut registry,
            Arc::new(GraphStore::new(StateStore::open(
                config.state_path(),
                config.state.agent_id.clone(),
            ))),
        );

        let store = StateStore::open(config.state_path(), config.state.agent_id.clone())
            .with_cache_ttl(config.state.cache_ttl_secs.map(Duration::from_secs));

        Self::new(llm)
            .registry(registry)
            .store(store)
            .queue_capacity(config.pipeline.queue_capacity)
            .worker_threads(config.pipeline.worker_threads)
            .execution_mode(ExecutionMode::from_limit(config.pipeline.max_parallel_tasks))
            .task_timeout(Duration::from_secs(config.pipeline.task_timeout_secs))
            .max_history_messages(config.state.max_history_messages)
            .reuse_cached_answers(config.state.reuse_cached_answers)
    }

    pub fn registry(mut self, registry: ToolRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn store(mut self, store: StateStore) -> Self {
        self.store = Some(store);
        self
    }

    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }

    pub fn max_history_messages(mut self, max: usize) -> Self {
        self.max_history_messages = max;
        self
    }

    pub fn reuse_cached_answers(mut self, reuse: bool) -> Self {
        self.reuse_cached_answers = reuse;
        self
    }

    pub fn execution_mode(mut self, mode: ExecutionMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn task_timeout(mut self, timeout: Duration) -> Self {
        self.task_timeout = timeout;
        self
    }

    pub fn worker_threads(mut self, workers: usize) -> Self {
        self.worker_threads = workers;
        self
    }

    pub fn build(self) -> Orchestrator {
        let llm = self.llm.with_system_prompt(SYSTEM_PROMPT);
        let registry = Arc::new(self.registry);
        let executor = Executor::new(registry.clone(), llm.clone())
            .with_mode(self.mode)
            .with_task_timeout(self.task_timeout)
            .with_worker_threads(self.worker_threads);
        debug!(
            "◆ ORCHESTRATOR: {} TOOLS, {:?}",
            registry.len(),
            executor.mode()
        );
        let (run_phase, _) = watch::channel(RunPhase::Idle);

        Orchestrator {
            inner: Arc::new(Inner {
                planner: Planner::new(llm.clone()),
                executor,
                analyzer: Analyzer::new(llm.clone()),
                registry,
                llm,
                store: self
                    .store
                    .unwrap_or_else(|| StateStore::in_memory("default")),
                queue_capacity: self.queue_capacity,
                max_history_messages: self.max_history_messages,
                reuse_cached_answers: self.reuse_cached_answers,
                session: Mutex::new(None),
                run_phase,
                cancel: std::sync::Mutex::new(CancellationToken::new()),
            }),
        }
    }
}

/// The agent facade
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

struct Inner {
    planner: Planner,
    executor: Executor,
    analyzer: Analyzer,
    registry: Arc<ToolRegistry>,
    llm: LlmClient,
    store: StateStore,
    queue_capacity: usize,
    max_history_messages: usize,
    reuse_cached_answers: bool,
    /// The run lock; holds the lazily loaded state
    session: Mutex<Option<AgentState>>,
    run_phase: watch::Sender<RunPhase>,
    cancel: std::sync::Mutex<CancellationToken>,
}

impl Orchestrator {
    pub fn builder(llm: LlmClient) -> OrchestratorBuilder {
        OrchestratorBuilder::new(llm)
    }

    /// Answer `query`. Never fails: errors come back as an apology string.
    pub async fn run(&self, query: &str) -> String {
        self.execute_run(query, None).await
    }

    /// Like [`run`](Self::run), reporting progress on `events`
    pub async fn run_with_events(&self, query: &str, events: EventSink) -> String {
        self.execute_run(query, Some(events)).await
    }

    /// Stop the current run from dequeuing further tasks
    pub fn cancel(&self) {
        let token = self
            .inner
            .cancel
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        token.cancel();
    }

    async fn execute_run(&self, query: &str, events: Option<EventSink>) -> String {
        let inner = &self.inner;
        let mut session = inner.session.lock().await;
        info!("◆ RUN: {}", query);

        let state = match inner.ensure_loaded(&mut session).await {
            Ok(state) => state,
            Err(e) => {
                error!("◆ RUN: STATE UNAVAILABLE: {}", e);
                inner.set_phase(RunPhase::Error, &events);
                let answer = apology(e);
                emit(&events, RunEvent::Answer(answer.clone()));
                return answer;
            }
        };
        let cache_key = llm_cache_key(query);
        let max = inner.max_history_messages;

        if inner.reuse_cached_answers {
            if let Ok(Some(Value::String(answer))) = inner.store.get_cached(&cache_key).await {
                info!("◆ RUN: ANSWERED FROM CACHE");
                state.push_message(Role::User, query, max);
                state.push_message(Role::Assistant, answer.clone(), max);
                if let Err(e) = inner.store.save(state).await {
                    warn!("◆ RUN: FAILED TO PERSIST: {}", e);
                }
                inner.set_phase(RunPhase::Done, &events);
                emit(&events, RunEvent::Answer(answer.clone()));
                return answer;
            }
        }

        state.push_message(Role::User, query, max);

        let cancel = inner.fresh_cancel_token();
        let pipeline = tokio::spawn(Inner::pipeline(
            inner.clone(),
            query.to_string(),
            events.clone(),
            cancel,
        ));
        let outcome = match pipeline.await {
            Ok(outcome) => outcome,
            Err(e) => Err(AgentError::Pipeline(e.to_string())),
        };

        let (answer, succeeded) = match outcome {
            Ok((tasks, answer)) => {
                state.task_plan = tasks;
                let answer = if answer.trim().is_empty() {
                    NO_RESULTS.to_string()
                } else {
                    answer
                };
                (answer, true)
            }
            Err(e) => {
                error!("◆ RUN FAILED: {}", e);
                (apology(e), false)
            }
        };

        state.push_message(Role::Assistant, answer.clone(), max);
        if succeeded {
            if let Err(e) = inner
                .store
                .set_cached(&cache_key, Value::String(answer.clone()))
                .await
            {
                warn!("◆ RUN: FAILED TO CACHE ANSWER: {}", e);
            }
        }

        let answer = match inner.store.save(state).await {
            Ok(()) => answer,
            Err(e) => {
                error!("◆ RUN: FAILED TO PERSIST: {}", e);
                inner.set_phase(RunPhase::Error, &events);
                let answer = apology(e);
                emit(&events, RunEvent::Answer(answer.clone()));
                return answer;
            }
        };

        let phase = if succeeded {
            RunPhase::Done
        } else {
            RunPhase::Error
        };
        inner.set_phase(phase, &events);
        emit(&events, RunEvent::Answer(answer.clone()));
        answer
    }

    /// Replace the stored task plan
    pub async fn set_task_plan(&self, tasks: Vec<Task>) -> Result<()> {
        let mut session = self.inner.session.lock().await;
        let state = self.inner.ensure_loaded(&mut session).await?;
        state.task_plan = tasks;
        self.inner.store.save(state).await?;
        Ok(())
    }

    /// Append a message to the history
    pub async fn add_message(&self, role: Role, content: &str) -> Result<()> {
        let mut session = self.inner.session.lock().await;
        let state = self.inner.ensure_loaded(&mut session).await?;
        state.push_message(role, content, self.inner.max_history_messages);
        self.inner.store.save(state).await?;
        Ok(())
    }

    /// Increment the persisted phase counter, returning the new value
    pub async fn advance_phase(&self) -> Result<u64> {
        let mut session = self.inner.session.lock().await;
        let state = self.inner.ensure_loaded(&mut session).await?;
        state.phase += 1;
        let phase = state.phase;
        self.inner.store.save(state).await?;
        Ok(phase)
    }

    pub async fn history(&self) -> Result<Vec<ConversationMessage>> {
        let mut session = self.inner.session.lock().await;
        Ok(self.inner.ensure_loaded(&mut session).await?.history.clone())
    }

    pub async fn task_plan(&self) -> Result<Vec<Task>> {
        let mut session = self.inner.session.lock().await;
        Ok(self.inner.ensure_loaded(&mut session).await?.task_plan.clone())
    }

    /// Persisted phase counter
    pub async fn phase(&self) -> Result<u64> {
        let mut session = self.inner.session.lock().await;
        Ok(self.inner.ensure_loaded(&mut session).await?.phase)
    }

    /// Phase of the current or most recent run
    pub fn run_phase(&self) -> RunPhase {
        *self.inner.run_phase.borrow()
    }

    /// Watch run phase transitions
    pub fn subscribe_phase(&self) -> watch::Receiver<RunPhase> {
        self.inner.run_phase.subscribe()
    }

    pub async fn get_cached(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.inner.store.get_cached(key).await?)
    }

    /// Ask the model directly, caching the reply under `llm:<prompt>`
    pub async fn call_llm(&self, prompt: &str) -> String {
        let key = llm_cache_key(prompt);
        if let Ok(Some(Value::String(cached))) = self.inner.store.get_cached(&key).await {
            debug!("◆ LLM CACHE HIT");
            return cached;
        }
        let reply = self.inner.llm.generate(prompt).await;
        if reply != LLM_UNAVAILABLE {
            if let Err(e) = self
                .inner
                .store
                .set_cached(&key, Value::String(reply.clone()))
                .await
            {
                warn!("◆ FAILED TO CACHE LLM REPLY: {}", e);
            }
        }
        reply
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.inner.registry
    }

    pub fn store(&self) -> &StateStore {
        &self.inner.store
    }

    pub fn llm(&self) -> &LlmClient {
        &self.inner.llm
    }
}

impl Inner {
    async fn ensure_loaded<'a>(
        &self,
        session: &'a mut Option<AgentState>,
    ) -> Result<&'a mut AgentState> {
        if session.is_none() {
            let mut state = self.store.load().await?;
            if state.history.is_empty() {
                state.push_message(Role::System, SYSTEM_PROMPT, self.max_history_messages);
            }
            state.truncate_history(self.max_history_messages);
            *session = Some(state);
        }
        Ok(session.get_or_insert_with(|| AgentState::new(self.store.agent_id())))
    }

    fn fresh_cancel_token(&self) -> CancellationToken {
        let token = CancellationToken::new();
        let mut current = self.cancel.lock().unwrap_or_else(|e| e.into_inner());
        *current = token.clone();
        token
    }

    fn set_phase(&self, phase: RunPhase, events: &Option<EventSink>) {
        debug!("◆ PHASE: {:?}", phase);
        self.run_phase.send_replace(phase);
        emit(events, RunEvent::Phase(phase));
    }

    async fn pipeline(
        self: Arc<Self>,
        query: String,
        events: Option<EventSink>,
        cancel: CancellationToken,
    ) -> Result<(Vec<Task>, String)> {
        self.set_phase(RunPhase::Planning, &events);
        let schema = self.registry.schema();
        let (plan_tx, plan_rx) = plan_queue(self.queue_capacity);
        let (result_tx, mut result_rx) = result_queue(self.queue_capacity);

        let planning = async {
            let tasks = self.planner.build_plan(&query, &schema).await;
            for task in &tasks {
                emit(&events, RunEvent::TaskPlanned(task.clone()));
            }
            self.set_phase(RunPhase::Executing, &events);
            planner::dispatch(&tasks, plan_tx).await;
            tasks
        };
        let executing = self
            .executor
            .execute_until(plan_rx, result_tx, cancel.clone());
        let collecting = async {
            let mut results = Vec::new();
            while let Some(result) = result_rx.recv().await {
                emit(&events, RunEvent::TaskFinished(result.clone()));
                results.push(result);
            }
            results
        };

        let (tasks, executed, results) = tokio::join!(planning, executing, collecting);
        // A cancel that lands after the last task was taken leaves a complete run.
        if cancel.is_cancelled() && executed < tasks.len() {
            warn!("◆ RUN CANCELLED AFTER {} OF {} TASKS", executed, tasks.len());
            return Err(AgentError::Cancelled);
        }

        self.set_phase(RunPhase::Analyzing, &events);
        let answer = self.analyzer.summarize(&query, &results).await;
        Ok((tasks, answer))
    }
}

fn emit(events: &Option<EventSink>, event: RunEvent) {
    if let Some(sink) = events {
        let _ = sink.send(event);
    }
}
