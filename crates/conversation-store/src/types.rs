//! Conversation turn and transcript types.

use crate::tokens::TokenCounter;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Speaker of a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::System => write!(f, "system"),
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
        }
    }
}

/// A single message in a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

impl Turn {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

/// Ordered history of one conversation with a cached token count.
///
/// Stored as a JSON array of `{role, content}` objects. The token count is
/// not persisted; it is recomputed when a blob is decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transcript {
    turns: Vec<Turn>,
    token_count: usize,
}

impl Transcript {
    /// An empty transcript.
    pub fn empty() -> Self {
        Self {
            turns: Vec::new(),
            token_count: 0,
        }
    }

    /// Decode a stored blob. A blank blob decodes to an empty transcript.
    pub fn from_blob(blob: &str, counter: &TokenCounter) -> Result<Self, serde_json::Error> {
        if blob.trim().is_empty() {
            return Ok(Self::empty());
        }

        let turns: Vec<Turn> = serde_json::from_str(blob)?;
        let token_count = counter.count(&turns);

        Ok(Self {
            turns,
            token_count,
        })
    }

    /// Encode for storage.
    pub fn to_blob(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&self.turns)
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn into_turns(self) -> Vec<Turn> {
        self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn token_count(&self) -> usize {
        self.token_count
    }

    /// Append a turn at the newest end.
    pub fn push(&mut self, turn: Turn, counter: &TokenCounter) {
        self.token_count += counter.count_text(&turn.content);
        self.turns.push(turn);
    }

    /// Evict oldest turns until the count fits `budget`.
    ///
    /// The newest turn is never evicted, so a single turn larger than the
    /// budget survives on its own. Returns the number of evicted turns.
    pub fn trim(&mut self, budget: usize, counter: &TokenCounter) -> usize {
        let mut evicted = 0;
        while self.token_count > budget && self.turns.len() > 1 {
            let oldest = self.turns.remove(0);
            self.token_count -= counter.count_text(&oldest.content);
            evicted += 1;
        }
        evicted
    }

    /// Whether the count fits `budget`.
    pub fn within(&self, budget: usize) -> bool {
        self.token_count <= budget
    }
}
