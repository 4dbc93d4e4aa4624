//! Bounded per-conversation dialogue history.

use serde::{Deserialize, Serialize};

/// Default number of turns kept per conversation.
pub const DEFAULT_MAX_HISTORY_LENGTH: usize = 5;

/// Discourse markers that open a follow-up question.
const FOLLOW_UP_MARKERS: [&str; 15] = [
    "那", "那么", "那如果", "那要是", "那假如", "然后", "接着", "还有", "另外", "再问", "再", "又",
    "还", "也", "更",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    System,
}

/// One utterance in a conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DialogueTurn {
    pub role: Role,
    pub content: String,
    /// Unix timestamp (milliseconds) when the turn was recorded.
    pub timestamp_ms: i64,
}

impl DialogueTurn {
    /// Creates a turn stamped with the current time.
    pub fn now(role: Role, content: impl Into<String>) -> Self {
        let timestamp_ms = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0);
        Self {
            role,
            content: content.into(),
            timestamp_ms,
        }
    }
}

/// Most recent content spoken by `role`, scanning from the newest turn.
pub fn latest_content(turns: &[DialogueTurn], role: Role) -> Option<&str> {
    turns
        .iter()
        .rev()
        .find(|t| t.role == role)
        .map(|t| t.content.as_str())
}

/// Append-only history with oldest-first truncation.
///
/// Each conversation owns its own manager; nothing here is shared.
#[derive(Debug, Clone)]
pub struct DialogueManager {
    max_history_length: usize,
    history: Vec<DialogueTurn>,
}

impl DialogueManager {
    pub fn new(max_history_length: usize) -> Self {
        Self {
            max_history_length,
            history: Vec::new(),
        }
    }

    pub fn max_history_length(&self) -> usize {
        self.max_history_length
    }

    /// Appends a turn and drops the oldest turns beyond the bound.
    pub fn add_turn(&mut self, role: Role, content: impl Into<String>) {
        self.history.push(DialogueTurn::now(role, content));
        self.truncate();
    }

    pub fn get_history(&self) -> &[DialogueTurn] {
        &self.history
    }

    /// Last `n` turns, oldest first.
    pub fn get_recent_context(&self, n: usize) -> &[DialogueTurn] {
        let start = self.history.len().saturating_sub(n);
        &self.history[start..]
    }

    pub fn clear_history(&mut self) {
        self.history.clear();
    }

    /// Changes the bound; existing history is cut down to fit.
    pub fn set_max_history_length(&mut self, max_history_length: usize) {
        self.max_history_length = max_history_length;
        self.truncate();
    }

    /// True when the question opens with a continuation marker such as "那" or "还有".
    pub fn is_follow_up(&self, question: &str) -> bool {
        FOLLOW_UP_MARKERS.iter().any(|m| question.starts_with(m))
    }

    fn truncate(&mut self) {
        if self.history.len() > self.max_history_length {
            let excess = self.history.len() - self.max_history_length;
            self.history.drain(..excess);
        }
    }
}

impl Default for DialogueManager {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_HISTORY_LENGTH)
    }
}
