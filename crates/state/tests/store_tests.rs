//! Integration tests for cappuccino-state
//!
//! Covers persistence across store instances, the cache round-trip,
//! TTL expiry, atomic replacement and recovery from corrupt documents.

use cappuccino_bus::Task;
use cappuccino_state::{AgentState, Role, StateStore};
use serde_json::json;
use std::time::Duration;
use tempfile::TempDir;

fn temp_dir() -> TempDir {
    tempfile::tempdir().expect("Failed to create temp dir")
}

// ============================================================================
// Agent state
// ============================================================================

#[tokio::test]
async fn test_fresh_store_loads_empty_state() {
    let dir = temp_dir();
    let store = StateStore::open(dir.path(), "default");

    let state = store.load().await.unwrap();
    assert_eq!(state.agent_id, "default");
    assert!(state.task_plan.is_empty());
    assert!(state.history.is_empty());
    assert_eq!(state.phase, 0);
}

#[tokio::test]
async fn test_state_survives_new_store_instance() {
    let dir = temp_dir();

    {
        let store = StateStore::open(dir.path(), "agent-1");
        let mut state = store.load().await.unwrap();
        state.task_plan = vec![Task::new(1, "simple_math").with_param("expression", "3 + 5")];
        state.push_message(Role::User, "What is 3 + 5?", 200);
        state.push_message(Role::Assistant, "8", 200);
        state.phase = 2;
        store.save(&state).await.unwrap();
    }

    let store = StateStore::open(dir.path(), "agent-1");
    let state = store.load().await.unwrap();
    assert_eq!(state.phase, 2);
    assert_eq!(state.task_plan.len(), 1);
    assert_eq!(state.task_plan[0].parameters["expression"], json!("3 + 5"));
    assert_eq!(state.history.len(), 2);
    assert_eq!(state.history[0].role, Role::User);
    assert_eq!(state.history[1].content, "8");

    let path = store.state_path().unwrap();
    assert!(path.ends_with("agent_state/agent-1.json"));
    assert!(path.exists());
}

#[tokio::test]
async fn test_agents_are_isolated() {
    let dir = temp_dir();
    let a = StateStore::open(dir.path(), "a");
    let b = StateStore::open(dir.path(), "b");

    let mut state = AgentState::new("a");
    state.phase = 7;
    a.save(&state).await.unwrap();

    assert_eq!(b.load().await.unwrap().phase, 0);
    assert_eq!(a.load().await.unwrap().phase, 7);
}

#[tokio::test]
async fn test_corrupt_state_starts_fresh() {
    let dir = temp_dir();
    let store = StateStore::open(dir.path(), "broken");
    let path = store.state_path().unwrap();
    tokio::fs::create_dir_all(path.parent().unwrap()).await.unwrap();
    tokio::fs::write(&path, "{ not json").await.unwrap();

    let state = store.load().await.unwrap();
    assert!(state.history.is_empty());
}

#[tokio::test]
async fn test_non_utf8_state_starts_fresh() {
    let dir = temp_dir();
    let store = StateStore::open(dir.path(), "binary");
    let path = store.state_path().unwrap();
    tokio::fs::create_dir_all(path.parent().unwrap()).await.unwrap();
    tokio::fs::write(&path, [0xff, 0xfe, 0x00, 0x9f]).await.unwrap();

    let state = store.load().await.unwrap();
    assert_eq!(state.agent_id, "binary");
    assert!(state.task_plan.is_empty());
}

#[tokio::test]
async fn test_unreadable_state_is_an_error() {
    let dir = temp_dir();
    let store = StateStore::open(dir.path(), "blocked");
    // A directory where the file should be cannot be read as a document
    tokio::fs::create_dir_all(store.state_path().unwrap())
        .await
        .unwrap();

    assert!(store.load().await.is_err());
}

#[tokio::test]
async fn test_save_leaves_no_temp_files() {
    let dir = temp_dir();
    let store = StateStore::open(dir.path(), "tidy");

    for phase in 0..5 {
        let mut state = AgentState::new("tidy");
        state.phase = phase;
        store.save(&state).await.unwrap();
    }

    let mut entries = tokio::fs::read_dir(dir.path().join("agent_state"))
        .await
        .unwrap();
    let mut names = Vec::new();
    while let Some(entry) = entries.next_entry().await.unwrap() {
        names.push(entry.file_name().to_string_lossy().to_string());
    }
    assert_eq!(names, vec!["tidy.json".to_string()]);
    assert_eq!(store.load().await.unwrap().phase, 4);
}

// ============================================================================
// Documents
// ============================================================================

#[tokio::test]
async fn test_document_round_trip_on_disk() {
    let dir = temp_dir();
    let doc = json!({"entities": {"Alice": {"age": 30}}, "relations": []});

    StateStore::open(dir.path(), "graph-agent")
        .save_document("knowledge_graph", &doc)
        .await
        .unwrap();

    let reopened = StateStore::open(dir.path(), "graph-agent");
    assert_eq!(
        reopened.load_document("knowledge_graph").await.unwrap(),
        Some(doc)
    );
    assert!(reopened.document_path("knowledge_graph").unwrap().exists());

    let other = StateStore::open(dir.path(), "someone-else");
    assert_eq!(other.load_document("knowledge_graph").await.unwrap(), None);
}

#[tokio::test]
async fn test_document_round_trip_in_memory() {
    let store = StateStore::in_memory("mem");
    assert_eq!(store.load_document("notes").await.unwrap(), None);

    store.save_document("notes", &json!([1, 2])).await.unwrap();
    store.save_document("notes", &json!([3])).await.unwrap();
    assert_eq!(store.load_document("notes").await.unwrap(), Some(json!([3])));
    assert!(store.document_path("notes").is_none());
}

#[tokio::test]
async fn test_corrupt_document_reads_as_missing() {
    let dir = temp_dir();
    let store = StateStore::open(dir.path(), "default");
    let path = store.document_path("notes").unwrap();
    tokio::fs::create_dir_all(path.parent().unwrap()).await.unwrap();
    tokio::fs::write(&path, "[1, 2").await.unwrap();

    assert_eq!(store.load_document("notes").await.unwrap(), None);
}

// ============================================================================
// Cache
// ============================================================================

#[tokio::test]
async fn test_cache_round_trip_across_instances() {
    let dir = temp_dir();

    let store = StateStore::open(dir.path(), "default");
    store.set_cached("k", json!("v")).await.unwrap();
    assert_eq!(store.get_cached("k").await.unwrap(), Some(json!("v")));

    let reopened = StateStore::open(dir.path(), "other-agent");
    assert_eq!(reopened.get_cached("k").await.unwrap(), Some(json!("v")));
    assert!(dir.path().join("cache.json").exists());
}

#[tokio::test]
async fn test_cache_upsert_replaces_value() {
    let store = StateStore::in_memory("m");
    store.set_cached("k", json!(1)).await.unwrap();
    store.set_cached("k", json!({"n": 2})).await.unwrap();

    assert_eq!(store.get_cached("k").await.unwrap(), Some(json!({"n": 2})));
    assert_eq!(store.cache_keys().await.unwrap(), vec!["k".to_string()]);
}

#[tokio::test]
async fn test_cache_miss() {
    let dir = temp_dir();
    let store = StateStore::open(dir.path(), "default");
    assert_eq!(store.get_cached("absent").await.unwrap(), None);
}

#[tokio::test]
async fn test_cache_ttl_expires_entries() {
    let store = StateStore::in_memory("ttl").with_cache_ttl(Some(Duration::from_millis(50)));
    store.set_cached("short", json!("lived")).await.unwrap();
    assert!(store.get_cached("short").await.unwrap().is_some());

    tokio::time::sleep(Duration::from_millis(120)).await;
    assert!(store.get_cached("short").await.unwrap().is_none());
    assert!(store.cache_keys().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_concurrent_cache_writers() {
    let dir = temp_dir();
    let store = std::sync::Arc::new(StateStore::open(dir.path(), "default"));

    let mut handles = Vec::new();
    for i in 0..16 {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            store.set_cached(&format!("key{}", i), json!(i)).await.unwrap();
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let reopened = StateStore::open(dir.path(), "default");
    assert_eq!(reopened.cache_keys().await.unwrap().len(), 16);
    assert_eq!(reopened.get_cached("key7").await.unwrap(), Some(json!(7)));
}
