//! Persistent agent state: task plan, conversation history, phase counter
//! and the key/value result cache.
//!
//! On disk the store keeps one JSON document per agent under
//! `agent_state/<agent_id>.json`, a shared `cache.json` and named
//! documents under `documents/<agent_id>/`. All are replaced atomically
//! (temp file + rename).

use cappuccino_bus::Task;
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Default history limit
pub const DEFAULT_MAX_MESSAGES: usize = 200;

/// State persistence errors
#[derive(Error, Debug)]
pub enum StateError {
    #[error("state io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("state serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, StateError>;

/// Author of a conversation message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        };
        f.write_str(s)
    }
}

/// One turn of conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationMessage {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Local>,
}

impl ConversationMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: Local::now(),
        }
    }
}

/// A cached value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,
    pub value: Value,
    pub timestamp: DateTime<Local>,
}

impl CacheEntry {
    fn is_expired(&self, ttl: Option<Duration>) -> bool {
        let Some(ttl) = ttl else {
            return false;
        };
        let age = Local::now().signed_duration_since(self.timestamp);
        age.to_std().map(|age| age > ttl).unwrap_or(false)
    }
}

/// Everything persisted for one agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentState {
    pub agent_id: String,
    #[serde(default)]
    pub task_plan: Vec<Task>,
    #[serde(default)]
    pub history: Vec<ConversationMessage>,
    #[serde(default)]
    pub phase: u64,
    pub updated_at: DateTime<Local>,
}

impl AgentState {
    pub fn new(agent_id: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            task_plan: Vec::new(),
            history: Vec::new(),
            phase: 0,
            updated_at: Local::now(),
        }
    }

    /// Append a message, dropping the oldest beyond `max_messages`
    pub fn push_message(&mut self, role: Role, content: impl Into<String>, max_messages: usize) {
        self.history.push(ConversationMessage::new(role, content));
        self.updated_at = Local::now();
        self.truncate_history(max_messages);
    }

    /// Keep the newest `max_messages`; a leading system message survives.
    pub fn truncate_history(&mut self, max_messages: usize) {
        if self.history.len() <= max_messages {
            return;
        }
        let keep_system = max_messages > 0
            && self
                .history
                .first()
                .is_some_and(|m| m.role == Role::System);

        let excess = self.history.len() - max_messages;
        if keep_system {
            self.history.drain(1..=excess);
        } else {
            self.history.drain(0..excess);
        }
        debug!(
            "State {} history truncated to {} messages",
            self.agent_id,
            self.history.len()
        );
    }
}

enum Backend {
    Disk {
        root: PathBuf,
    },
    Memory {
        state: Mutex<Option<AgentState>>,
        documents: Mutex<HashMap<String, Value>>,
    },
}

/// Storage for agent state and cache
pub struct StateStore {
    agent_id: String,
    backend: Backend,
    cache: Mutex<Option<HashMap<String, CacheEntry>>>,
    cache_ttl: Option<Duration>,
}

impl StateStore {
    /// Store backed by JSON documents under `root`
    pub fn open(root: impl AsRef<Path>, agent_id: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            backend: Backend::Disk {
                root: root.as_ref().to_path_buf(),
            },
            cache: Mutex::new(None),
            cache_ttl: None,
        }
    }

    /// Store that never touches the filesystem
    pub fn in_memory(agent_id: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            backend: Backend::Memory {
                state: Mutex::new(None),
                documents: Mutex::new(HashMap::new()),
            },
            cache: Mutex::new(Some(HashMap::new())),
            cache_ttl: None,
        }
    }

    /// Ignore cache entries older than `ttl`
    pub fn with_cache_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.cache_ttl = ttl;
        self
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    /// Whether state survives the process
    pub fn is_persistent(&self) -> bool {
        matches!(self.backend, Backend::Disk { .. })
    }

    /// Path of the agent document, if on disk
    pub fn state_path(&self) -> Option<PathBuf> {
        match &self.backend {
            Backend::Disk { root } => Some(
                root.join("agent_state")
                    .join(format!("{}.json", safe_key(&self.agent_id))),
            ),
            Backend::Memory { .. } => None,
        }
    }

    /// Path of a named document, if on disk
    pub fn document_path(&self, name: &str) -> Option<PathBuf> {
        match &self.backend {
            Backend::Disk { root } => Some(
                root.join("documents")
                    .join(safe_key(&self.agent_id))
                    .join(format!("{}.json", safe_key(name))),
            ),
            Backend::Memory { .. } => None,
        }
    }

    fn cache_path(&self) -> Option<PathBuf> {
        match &self.backend {
            Backend::Disk { root } => Some(root.join("cache.json")),
            Backend::Memory { .. } => None,
        }
    }

    /// Load the agent record.
    ///
    /// A missing or corrupt document yields a fresh record; failing to read
    /// an existing file is an error.
    pub async fn load(&self) -> Result<AgentState> {
        match &self.backend {
            Backend::Memory { state, .. } => Ok(state
                .lock()
                .await
                .clone()
                .unwrap_or_else(|| AgentState::new(&self.agent_id))),
            Backend::Disk { .. } => {
                let Some(path) = self.state_path() else {
                    return Ok(AgentState::new(&self.agent_id));
                };
                match read_json::<AgentState>(&path).await? {
                    Some(state) => {
                        debug!("Loaded state: {}", self.agent_id);
                        Ok(state)
                    }
                    None => {
                        debug!("No usable state for {}, starting fresh", self.agent_id);
                        Ok(AgentState::new(&self.agent_id))
                    }
                }
            }
        }
    }

    /// Persist the agent record in one atomic write
    pub async fn save(&self, state: &AgentState) -> Result<()> {
        match &self.backend {
            Backend::Memory { state: slot, .. } => {
                *slot.lock().await = Some(state.clone());
                Ok(())
            }
            Backend::Disk { .. } => {
                if let Some(path) = self.state_path() {
                    let content = serde_json::to_string_pretty(state)?;
                    write_atomic(&path, &content).await?;
                    debug!("Saved state: {}", self.agent_id);
                }
                Ok(())
            }
        }
    }

    /// A named document; `None` when missing or corrupt
    pub async fn load_document(&self, name: &str) -> Result<Option<Value>> {
        match &self.backend {
            Backend::Memory { documents, .. } => Ok(documents.lock().await.get(name).cloned()),
            Backend::Disk { .. } => match self.document_path(name) {
                Some(path) => read_json::<Value>(&path).await,
                None => Ok(None),
            },
        }
    }

    /// Replace a named document
    pub async fn save_document(&self, name: &str, value: &Value) -> Result<()> {
        match &self.backend {
            Backend::Memory { documents, .. } => {
                documents
                    .lock()
                    .await
                    .insert(name.to_string(), value.clone());
            }
            Backend::Disk { .. } => {
                if let Some(path) = self.document_path(name) {
                    write_atomic(&path, &serde_json::to_string_pretty(value)?).await?;
                    debug!("Saved document: {}", name);
                }
            }
        }
        Ok(())
    }

    /// Cached value for `key`, unless missing or expired
    pub async fn get_cached(&self, key: &str) -> Result<Option<Value>> {
        let mut guard = self.cache.lock().await;
        let cache = self.ensure_cache(&mut guard).await?;
        Ok(cache
            .get(key)
            .filter(|entry| !entry.is_expired(self.cache_ttl))
            .map(|entry| entry.value.clone()))
    }

    /// Insert or replace `key`
    pub async fn set_cached(&self, key: &str, value: Value) -> Result<()> {
        let mut guard = self.cache.lock().await;
        let cache = self.ensure_cache(&mut guard).await?;
        cache.insert(
            key.to_string(),
            CacheEntry {
                key: key.to_string(),
                value,
                timestamp: Local::now(),
            },
        );

        if let Some(path) = self.cache_path() {
            let mut entries: Vec<&CacheEntry> = cache.values().collect();
            entries.sort_by(|a, b| a.key.cmp(&b.key));
            let content = serde_json::to_string_pretty(&entries)?;
            write_atomic(&path, &content).await?;
        }
        debug!("Cached: {}", key);
        Ok(())
    }

    /// All live cache keys, sorted
    pub async fn cache_keys(&self) -> Result<Vec<String>> {
        let mut guard = self.cache.lock().await;
        let cache = self.ensure_cache(&mut guard).await?;
        let mut keys: Vec<String> = cache
            .values()
            .filter(|e| !e.is_expired(self.cache_ttl))
            .map(|e| e.key.clone())
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn ensure_cache<'a>(
        &self,
        slot: &'a mut Option<HashMap<String, CacheEntry>>,
    ) -> Result<&'a mut HashMap<String, CacheEntry>> {
        if slot.is_none() {
            *slot = Some(self.read_cache().await?);
        }
        Ok(slot.get_or_insert_with(HashMap::new))
    }

    async fn read_cache(&self) -> Result<HashMap<String, CacheEntry>> {
        let Some(path) = self.cache_path() else {
            return Ok(HashMap::new());
        };
        let entries = read_json::<Vec<CacheEntry>>(&path).await?.unwrap_or_default();
        Ok(entries.into_iter().map(|e| (e.key.clone(), e)).collect())
    }
}

/// Parse a JSON file; `None` when it is missing or does not parse
async fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    match serde_json::from_slice(&bytes) {
        Ok(value) => Ok(Some(value)),
        Err(e) => {
            warn!("Failed to parse {:?}: {}", path, e);
            Ok(None)
        }
    }
}

fn safe_key(key: &str) -> String {
    key.replace([':', '/', '\\'], "_")
}

/// Write `content` to a sibling temp file, then rename over `path`
async fn write_atomic(path: &Path, content: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("state");
    let tmp = path.with_file_name(format!(".{}.{}.tmp", file_name, uuid::Uuid::new_v4()));
    tokio::fs::write(&tmp, content).await?;
    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(e);
    }
    Ok(())
}
