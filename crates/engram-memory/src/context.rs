//! Context sessions for the working-memory tier
//!
//! A context groups working-memory records that share a lifecycle.
//! There is one active context per context type; creating a context
//! records its parent so deletion can fall back to it.

use engram_core::{Error, Metadata, Result, Timestamp};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

/// Kind of context a working-memory record belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextType {
    Conversation,
    Task,
    Session,
    Thinking,
}

impl ContextType {
    /// Name used in context ids and logs
    pub fn as_str(&self) -> &'static str {
        match self {
            ContextType::Conversation => "conversation",
            ContextType::Task => "task",
            ContextType::Session => "session",
            ContextType::Thinking => "thinking",
        }
    }
}

impl std::fmt::Display for ContextType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A group of working-memory records sharing a lifecycle
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ContextSession {
    /// Unique context id
    pub id: String,

    /// Kind of context
    pub context_type: ContextType,

    /// Previously active context of the same type, if any
    pub parent_id: Option<String>,

    /// Ids of the records bound to this context, oldest first
    pub record_ids: Vec<String>,

    /// Caller-supplied metadata
    pub metadata: Metadata,

    /// When the context was created
    pub created_at: Timestamp,
}

/// Configuration for the context manager
#[derive(Debug, Clone)]
pub struct ContextConfig {
    /// Maximum past contexts retained per type
    pub max_history: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self { max_history: 50 }
    }
}

struct ContextState {
    sessions: HashMap<String, ContextSession>,
    /// Active context id per type
    active: HashMap<ContextType, String>,
    /// Past context ids per type, newest first
    history: HashMap<ContextType, Vec<String>>,
}

/// In-process registry of context sessions
pub struct ContextManager {
    config: ContextConfig,
    state: RwLock<ContextState>,
}

impl ContextManager {
    /// Create an empty manager
    pub fn new(config: ContextConfig) -> Self {
        Self {
            config,
            state: RwLock::new(ContextState {
                sessions: HashMap::new(),
                active: HashMap::new(),
                history: HashMap::new(),
            }),
        }
    }

    /// Create a context and make it active for its type
    ///
    /// The previously active context of the same type becomes the
    /// parent and is pushed onto the history.
    pub async fn create_context(
        &self,
        context_type: ContextType,
        metadata: Metadata,
    ) -> ContextSession {
        let id = format!("ctx_{}_{}", context_type, Uuid::new_v4().simple());
        let mut state = self.state.write().await;

        let parent_id = state.active.get(&context_type).cloned();
        if let Some(parent) = &parent_id {
            let history = state.history.entry(context_type).or_default();
            history.insert(0, parent.clone());
            history.truncate(self.config.max_history);
        }

        let session = ContextSession {
            id: id.clone(),
            context_type,
            parent_id,
            record_ids: Vec::new(),
            metadata,
            created_at: Timestamp::now(),
        };
        state.sessions.insert(id.clone(), session.clone());
        state.active.insert(context_type, id.clone());
        debug!("Created {} context {}", context_type, id);

        session
    }

    /// Get a context by id
    pub async fn get_context(&self, id: &str) -> Option<ContextSession> {
        self.state.read().await.sessions.get(id).cloned()
    }

    /// The active context of a type, if any
    pub async fn active_context(&self, context_type: ContextType) -> Option<ContextSession> {
        let state = self.state.read().await;
        let id = state.active.get(&context_type)?;
        state.sessions.get(id).cloned()
    }

    /// Make an existing context the active one for its type
    pub async fn switch_context(&self, id: &str) -> Result<ContextSession> {
        let mut state = self.state.write().await;
        let session = state
            .sessions
            .get(id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("Context not found: {}", id)))?;

        if let Some(previous) = state.active.insert(session.context_type, id.to_string()) {
            if previous != id {
                let history = state.history.entry(session.context_type).or_default();
                history.retain(|h| h != id);
                history.insert(0, previous);
                history.truncate(self.config.max_history);
            }
        }
        debug!("Switched active {} context to {}", session.context_type, id);
        Ok(session)
    }

    /// Delete a context, falling back to its parent as active
    ///
    /// Returns the record ids that were bound to the context so the
    /// caller can release them.
    pub async fn delete_context(&self, id: &str) -> Result<Vec<String>> {
        let mut state = self.state.write().await;
        let session = state
            .sessions
            .remove(id)
            .ok_or_else(|| Error::NotFound(format!("Context not found: {}", id)))?;

        if state.active.get(&session.context_type).map(String::as_str) == Some(id) {
            match &session.parent_id {
                Some(parent) if state.sessions.contains_key(parent) => {
                    state.active.insert(session.context_type, parent.clone());
                }
                _ => {
                    state.active.remove(&session.context_type);
                }
            }
        }
        if let Some(history) = state.history.get_mut(&session.context_type) {
            history.retain(|h| h != id);
        }
        debug!("Deleted {} context {}", session.context_type, id);

        Ok(session.record_ids)
    }

    /// The most recent past contexts of a type, newest first
    pub async fn context_history(
        &self,
        context_type: ContextType,
        limit: usize,
    ) -> Vec<ContextSession> {
        let state = self.state.read().await;
        state
            .history
            .get(&context_type)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| state.sessions.get(id).cloned())
                    .take(limit)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Ids of every live context
    pub async fn all_context_ids(&self) -> Vec<String> {
        self.state.read().await.sessions.keys().cloned().collect()
    }

    /// Bind a record id to a context
    pub async fn bind_record(&self, context_id: &str, record_id: &str) -> Result<()> {
        let mut state = self.state.write().await;
        let session = state
            .sessions
            .get_mut(context_id)
            .ok_or_else(|| Error::NotFound(format!("Context not found: {}", context_id)))?;
        session.record_ids.push(record_id.to_string());
        Ok(())
    }

    /// Release record ids from a context (after eviction or expiry)
    pub async fn release_records(&self, context_id: &str, record_ids: &[String]) {
        let mut state = self.state.write().await;
        if let Some(session) = state.sessions.get_mut(context_id) {
            session.record_ids.retain(|id| !record_ids.contains(id));
        }
    }
}

impl Default for ContextManager {
    fn default() -> Self {
        Self::new(ContextConfig::default())
    }
}
