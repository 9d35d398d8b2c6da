//! Orchestrator: run lock, persistence, events, caching and failure handling

mod common;

use async_trait::async_trait;
use cappuccino_agent::orchestrator::llm_cache_key;
use cappuccino_agent::{LlmClient, Orchestrator, RunEvent, RunPhase, ToolRegistry};
use cappuccino_bus::Task;
use cappuccino_provider::{ChatParams, ChatResponse, Provider};
use cappuccino_state::{Role, StateStore};
use common::{basic_registry, scripted_llm, ScriptedProvider, SlowTool};
use serde_json::json;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::mpsc;

const SLOW_PLAN: &str = r#"[{"step": 1, "action": "slow", "parameters": {"label": "x"}}]"#;

fn temp_dir() -> TempDir {
    tempfile::tempdir().expect("Failed to create temp dir")
}

struct PanickingProvider;

/// Waits before every reply so each run phase lasts long enough to observe
struct DelayedProvider<P> {
    inner: P,
    delay: Duration,
}

#[async_trait]
impl<P: Provider> Provider for DelayedProvider<P> {
    async fn chat(&self, params: ChatParams) -> cappuccino_provider::Result<ChatResponse> {
        tokio::time::sleep(self.delay).await;
        self.inner.chat(params).await
    }
    fn default_model(&self) -> String {
        self.inner.default_model()
    }
    fn is_configured(&self) -> bool {
        true
    }
}

fn delayed<P: Provider + 'static>(inner: P, millis: u64) -> LlmClient {
    LlmClient::new(Arc::new(DelayedProvider {
        inner,
        delay: Duration::from_millis(millis),
    }))
}

/// Record every phase published until the run settles
fn record_phases(agent: &Orchestrator) -> tokio::task::JoinHandle<Vec<RunPhase>> {
    let mut rx = agent.subscribe_phase();
    tokio::spawn(async move {
        let mut seen = Vec::new();
        while rx.changed().await.is_ok() {
            let phase = *rx.borrow_and_update();
            seen.push(phase);
            if matches!(phase, RunPhase::Done | RunPhase::Error) {
                break;
            }
        }
        seen
    })
}

#[async_trait]
impl Provider for PanickingProvider {
    async fn chat(&self, _params: ChatParams) -> cappuccino_provider::Result<ChatResponse> {
        panic!("provider exploded")
    }
    fn default_model(&self) -> String {
        "boom".into()
    }
    fn is_configured(&self) -> bool {
        true
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_runs_are_serialized() {
    let provider = ScriptedProvider::new([SLOW_PLAN, "answer one", SLOW_PLAN, "answer two"]);
    let tool = SlowTool::new(Duration::from_millis(100));
    let max_seen = tool.max_seen.clone();
    let mut registry = ToolRegistry::new();
    registry.register(tool);

    let agent = Orchestrator::builder(scripted_llm(&provider))
        .registry(registry)
        .build();

    let (a, b) = tokio::join!(agent.run("first"), agent.run("second"));
    let mut answers = vec![a, b];
    answers.sort();
    assert_eq!(answers, vec!["answer one", "answer two"]);
    assert_eq!(max_seen.load(Ordering::SeqCst), 1);

    let roles: Vec<Role> = agent.history().await.unwrap().iter().map(|m| m.role).collect();
    assert_eq!(
        roles,
        vec![Role::System, Role::User, Role::Assistant, Role::User, Role::Assistant]
    );
}

#[tokio::test]
async fn test_run_persists_history_plan_and_cache() {
    let dir = temp_dir();
    let provider = ScriptedProvider::new([
        r#"[{"step": 1, "action": "simple_math", "parameters": {"expression": "3 + 5"}}]"#,
        "It is 8.",
    ]);
    let agent = Orchestrator::builder(scripted_llm(&provider))
        .registry(basic_registry())
        .store(StateStore::open(dir.path(), "default"))
        .build();

    assert_eq!(agent.run("What is 3 + 5?").await, "It is 8.");
    drop(agent);

    let reopened = Orchestrator::builder(LlmClient::unavailable())
        .store(StateStore::open(dir.path(), "default"))
        .build();
    let history = reopened.history().await.unwrap();
    assert_eq!(history.len(), 3);
    assert_eq!(history[0].role, Role::System);
    assert_eq!(history[1].content, "What is 3 + 5?");
    assert_eq!(history[2].content, "It is 8.");

    let plan = reopened.task_plan().await.unwrap();
    assert_eq!(plan.len(), 1);
    assert_eq!(plan[0].action, "simple_math");

    assert_eq!(
        reopened.get_cached(&llm_cache_key("What is 3 + 5?")).await.unwrap(),
        Some(json!("It is 8."))
    );
}

#[tokio::test]
async fn test_events_follow_phase_order() {
    let provider = ScriptedProvider::new([
        r#"[{"step": 1, "action": "respond_to_user", "parameters": {"text": "hi"}}]"#,
    ]);
    let agent = Orchestrator::builder(scripted_llm(&provider))
        .registry(basic_registry())
        .build();

    let (tx, mut rx) = mpsc::unbounded_channel();
    let answer = agent.run_with_events("greet me", tx).await;
    assert_eq!(answer, "hi");

    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }

    let phases: Vec<RunPhase> = events
        .iter()
        .filter_map(|e| match e {
            RunEvent::Phase(p) => Some(*p),
            _ => None,
        })
        .collect();
    assert_eq!(
        phases,
        vec![
            RunPhase::Planning,
            RunPhase::Executing,
            RunPhase::Analyzing,
            RunPhase::Done
        ]
    );

    let planned_at = events
        .iter()
        .position(|e| matches!(e, RunEvent::TaskPlanned(_)))
        .unwrap();
    let finished_at = events
        .iter()
        .position(|e| matches!(e, RunEvent::TaskFinished(_)))
        .unwrap();
    assert!(planned_at < finished_at);
    assert_eq!(events.last(), Some(&RunEvent::Answer("hi".into())));
    assert_eq!(agent.run_phase(), RunPhase::Done);
}

#[tokio::test]
async fn test_reuse_cached_answers_skips_pipeline() {
    let provider = ScriptedProvider::new([
        r#"[{"step": 1, "action": "respond_to_user", "parameters": {"text": "cached reply"}}]"#,
    ]);
    let agent = Orchestrator::builder(scripted_llm(&provider))
        .registry(basic_registry())
        .reuse_cached_answers(true)
        .build();

    assert_eq!(agent.run("same question").await, "cached reply");
    assert_eq!(agent.run("same question").await, "cached reply");
    assert_eq!(provider.prompts().len(), 1);
    assert_eq!(agent.history().await.unwrap().len(), 5);
}

#[tokio::test]
async fn test_state_helpers() {
    let agent = Orchestrator::builder(LlmClient::unavailable()).build();

    agent
        .set_task_plan(vec![Task::new(1, "respond_to_user")])
        .await
        .unwrap();
    agent.add_message(Role::User, "note").await.unwrap();
    assert_eq!(agent.advance_phase().await.unwrap(), 1);
    assert_eq!(agent.advance_phase().await.unwrap(), 2);

    assert_eq!(agent.phase().await.unwrap(), 2);
    assert_eq!(agent.task_plan().await.unwrap().len(), 1);
    let history = agent.history().await.unwrap();
    assert_eq!(history.last().unwrap().content, "note");
    assert_eq!(agent.run_phase(), RunPhase::Idle);
}

#[tokio::test]
async fn test_history_truncated() {
    let agent = Orchestrator::builder(LlmClient::unavailable())
        .max_history_messages(3)
        .build();
    for i in 0..5 {
        agent.add_message(Role::User, &format!("m{}", i)).await.unwrap();
    }
    let history = agent.history().await.unwrap();
    assert_eq!(history.len(), 3);
    assert_eq!(history[0].role, Role::System);
    assert_eq!(history[2].content, "m4");
}

#[tokio::test]
async fn test_call_llm_uses_cache() {
    let provider = ScriptedProvider::new(["first reply"]);
    let agent = Orchestrator::builder(scripted_llm(&provider)).build();

    assert_eq!(agent.call_llm("ping").await, "first reply");
    assert_eq!(agent.call_llm("ping").await, "first reply");
    assert_eq!(provider.prompts().len(), 1);
    assert_eq!(
        agent.get_cached("llm:ping").await.unwrap(),
        Some(json!("first reply"))
    );
}

#[tokio::test]
async fn test_call_llm_unavailable_not_cached() {
    let agent = Orchestrator::builder(LlmClient::unavailable()).build();
    assert_eq!(agent.call_llm("ping").await, "error: llm unavailable");
    assert_eq!(agent.get_cached("llm:ping").await.unwrap(), None);
}

#[tokio::test]
async fn test_panic_becomes_apology_and_releases_lock() {
    let agent = Orchestrator::builder(LlmClient::new(Arc::new(PanickingProvider)))
        .registry(basic_registry())
        .build();

    let answer = agent.run("anything").await;
    assert!(answer.starts_with("Sorry, something went wrong while handling your request:"));
    assert_eq!(agent.run_phase(), RunPhase::Error);

    let again = tokio::time::timeout(Duration::from_secs(2), agent.run("again"))
        .await
        .expect("run lock must be released after a failed run");
    assert!(again.starts_with("Sorry"));
    assert_eq!(agent.history().await.unwrap().len(), 5);
}

#[tokio::test]
async fn test_cancel_aborts_run() {
    let plan = r#"[{"step": 1, "action": "slow"}, {"step": 2, "action": "slow"}, {"step": 3, "action": "slow"}]"#;
    let provider = ScriptedProvider::new([plan]);
    let mut registry = ToolRegistry::new();
    registry.register(SlowTool::new(Duration::from_millis(150)));
    let agent = Orchestrator::builder(scripted_llm(&provider))
        .registry(registry)
        .build();

    let runner = agent.clone();
    let handle = tokio::spawn(async move { runner.run("slow things").await });
    tokio::time::sleep(Duration::from_millis(50)).await;
    agent.cancel();

    let answer = handle.await.unwrap();
    assert!(answer.contains("run cancelled"));
    assert_eq!(agent.run_phase(), RunPhase::Error);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_phase_watch_for_successful_run() {
    let provider = ScriptedProvider::new([SLOW_PLAN, "summary"]);
    let mut registry = ToolRegistry::new();
    registry.register(SlowTool::new(Duration::from_millis(60)));
    let agent = Orchestrator::builder(delayed(provider, 60))
        .registry(registry)
        .build();
    assert_eq!(*agent.subscribe_phase().borrow(), RunPhase::Idle);

    let recorder = record_phases(&agent);
    assert_eq!(agent.run("watch me").await, "summary");

    assert_eq!(
        recorder.await.unwrap(),
        vec![
            RunPhase::Planning,
            RunPhase::Executing,
            RunPhase::Analyzing,
            RunPhase::Done
        ]
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_phase_watch_for_failed_run() {
    let agent = Orchestrator::builder(delayed(PanickingProvider, 60))
        .registry(basic_registry())
        .build();

    let recorder = record_phases(&agent);
    let answer = agent.run("boom").await;
    assert!(answer.starts_with("Sorry"));

    assert_eq!(
        recorder.await.unwrap(),
        vec![RunPhase::Planning, RunPhase::Error]
    );
}

#[tokio::test]
async fn test_cancel_after_last_task_taken_keeps_answer() {
    let provider = ScriptedProvider::new([SLOW_PLAN, "finished anyway"]);
    let mut registry = ToolRegistry::new();
    registry.register(SlowTool::new(Duration::from_millis(150)));
    let agent = Orchestrator::builder(scripted_llm(&provider))
        .registry(registry)
        .build();

    let runner = agent.clone();
    let handle = tokio::spawn(async move { runner.run("one slow step").await });
    tokio::time::sleep(Duration::from_millis(50)).await;
    agent.cancel();

    assert_eq!(handle.await.unwrap(), "finished anyway");
    assert_eq!(agent.run_phase(), RunPhase::Done);
}
