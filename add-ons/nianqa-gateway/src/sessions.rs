//! Per-session conversations. Each session owns its own history.

use dashmap::DashMap;
use nianqa_core::{Conversation, Orchestrator};
use std::sync::Arc;
use tokio::sync::Mutex;

pub(crate) type SharedConversation = Arc<Mutex<Conversation>>;

pub(crate) struct SessionStore {
    orchestrator: Arc<Orchestrator>,
    max_history_length: usize,
    sessions: DashMap<String, SharedConversation>,
}

impl SessionStore {
    pub(crate) fn new(orchestrator: Arc<Orchestrator>, max_history_length: usize) -> Self {
        Self {
            orchestrator,
            max_history_length,
            sessions: DashMap::new(),
        }
    }

    /// Existing session for `id`, or a new one. Blank or missing ids get a fresh uuid.
    pub(crate) fn get_or_create(&self, id: Option<&str>) -> (String, SharedConversation) {
        let id = id
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let conversation = self
            .sessions
            .entry(id.clone())
            .or_insert_with(|| {
                tracing::debug!(target: "nianqa::gateway", session_id = %id, "session created");
                Arc::new(Mutex::new(Conversation::new(
                    Arc::clone(&self.orchestrator),
                    self.max_history_length,
                )))
            })
            .clone();
        (id, conversation)
    }

    pub(crate) fn get(&self, id: &str) -> Option<SharedConversation> {
        self.sessions.get(id).map(|c| Arc::clone(c.value()))
    }

    pub(crate) fn remove(&self, id: &str) -> bool {
        self.sessions.remove(id).is_some()
    }

    pub(crate) fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.sessions.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }
}
