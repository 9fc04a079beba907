use serde::{Deserialize, Serialize};

/// A single conversation turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: Role,
    pub content: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// Bounded conversation history.
///
/// Capped at `max_turns` recent turns; once the total exceeds twice
/// that, the oldest turns are folded into one synthetic leading user
/// turn (summarized by the relay, or hard-truncated when summarization
/// fails).
#[derive(Debug, Clone)]
pub struct ChatHistory {
    turns: Vec<ChatTurn>,
    max_turns: usize,
}

impl ChatHistory {
    pub fn new(max_turns: usize) -> Self {
        Self {
            turns: Vec::new(),
            max_turns: max_turns.max(1),
        }
    }

    pub fn turns(&self) -> &[ChatTurn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn push_user(&mut self, content: impl Into<String>) {
        self.turns.push(ChatTurn {
            role: Role::User,
            content: content.into(),
        });
    }

    pub fn push_assistant(&mut self, content: impl Into<String>) {
        self.turns.push(ChatTurn {
            role: Role::Assistant,
            content: content.into(),
        });
    }

    /// Remove the most recent turn if it is a user turn. Called when an
    /// utterance produced no response, or when the completion call
    /// failed, so the caller can resubmit the same utterance later.
    pub fn rollback_user(&mut self) -> bool {
        if matches!(self.turns.last(), Some(t) if t.role == Role::User) {
            self.turns.pop();
            return true;
        }
        false
    }

    /// Whether the history has grown past the compression threshold.
    pub fn needs_compression(&self) -> bool {
        self.turns.len() > 2 * self.max_turns
    }

    /// The oldest turns that a compression pass would fold away,
    /// leaving the most recent `max_turns` in place.
    pub fn compressible(&self) -> &[ChatTurn] {
        let keep = self.max_turns.min(self.turns.len());
        &self.turns[..self.turns.len() - keep]
    }

    /// Replace the compressible prefix with one synthetic user turn
    /// holding `summary`.
    pub fn apply_summary(&mut self, summary: impl Into<String>) {
        let keep = self.max_turns.min(self.turns.len());
        let recent = self.turns.split_off(self.turns.len() - keep);
        self.turns = Vec::with_capacity(recent.len() + 1);
        self.turns.push(ChatTurn {
            role: Role::User,
            content: summary.into(),
        });
        self.turns.extend(recent);
    }

    /// Fallback when summarization fails: keep only the most recent
    /// `2 * max_turns` turns.
    pub fn truncate_hard(&mut self) {
        let keep = (2 * self.max_turns).min(self.turns.len());
        self.turns.drain(..self.turns.len() - keep);
    }
}
