//! Rolling per-chat conversation memory.
//!
//! Each chat keeps at most `window` turns, oldest first. A chat is seeded once
//! from bridge history the first time it is read; after that only
//! [`ConversationMemory::append`] changes it.

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::bridge::{ChatBackend, HistoryEntry};
use crate::database::StateDatabase;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnRole {
    User,
    Assistant,
}

impl TurnRole {
    pub fn as_str(self) -> &'static str {
        match self {
            TurnRole::User => "user",
            TurnRole::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: TurnRole,
    pub text: String,
}

impl Turn {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: TurnRole::User,
            text: text.into(),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: TurnRole::Assistant,
            text: text.into(),
        }
    }

    /// Role follows authorship: our own messages are assistant turns.
    pub fn from_authored(text: impl Into<String>, is_from_self: bool) -> Self {
        if is_from_self {
            Self::assistant(text)
        } else {
            Self::user(text)
        }
    }
}

pub struct ConversationMemory {
    window: usize,
    seed_limit: usize,
}

impl ConversationMemory {
    pub fn new(window: usize, seed_limit: usize) -> Self {
        Self {
            window: window.max(1),
            seed_limit,
        }
    }

    pub fn window(&self) -> usize {
        self.window
    }

    /// Current history for `chat_id`, seeding it from the bridge on first contact.
    ///
    /// A failed history fetch is not stored, so seeding is retried on the next call.
    pub async fn get(
        &self,
        db: &StateDatabase,
        backend: &dyn ChatBackend,
        chat_id: &str,
    ) -> Result<Vec<Turn>> {
        if let Some(turns) = db.get_turn_history(chat_id)? {
            return Ok(turns);
        }

        let history = match backend.get_contact_history(chat_id, self.seed_limit).await {
            Ok(history) => history,
            Err(e) => {
                tracing::warn!("Memory seed for {} failed, starting empty: {:#}", chat_id, e);
                return Ok(Vec::new());
            }
        };

        let turns = self.seed_turns(history);
        db.set_turn_history(chat_id, &turns)?;
        tracing::debug!("Seeded memory for {} with {} turn(s)", chat_id, turns.len());
        Ok(turns)
    }

    /// Record one exchange and persist the truncated window.
    pub fn append(
        &self,
        db: &StateDatabase,
        chat_id: &str,
        user_text: &str,
        assistant_text: &str,
    ) -> Result<Vec<Turn>> {
        let mut turns = db.get_turn_history(chat_id)?.unwrap_or_default();
        turns.push(Turn::user(user_text));
        turns.push(Turn::assistant(assistant_text));
        truncate_front(&mut turns, self.window);
        db.set_turn_history(chat_id, &turns)?;
        Ok(turns)
    }

    /// Bridge history arrives newest first; memory is stored oldest first.
    fn seed_turns(&self, history: Vec<HistoryEntry>) -> Vec<Turn> {
        let mut turns: Vec<Turn> = history
            .into_iter()
            .rev()
            .filter(|entry| !entry.text.trim().is_empty())
            .map(|entry| Turn::from_authored(entry.text, entry.is_from_self))
            .collect();
        truncate_front(&mut turns, self.window);
        turns
    }
}

fn truncate_front(turns: &mut Vec<Turn>, window: usize) {
    if turns.len() > window {
        let excess = turns.len() - window;
        turns.drain(..excess);
    }
}
