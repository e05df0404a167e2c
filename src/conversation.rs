//! Conversation history handed to the reply generator: a system prompt plus a
//! sliding window of the most recent turns.

use std::collections::VecDeque;

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
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
}

#[derive(Debug, Clone)]
pub struct ConversationHistory {
    system: String,
    turns: VecDeque<Turn>,
    max_turns: usize,
}

impl ConversationHistory {
    pub fn new(system: impl Into<String>, max_turns: usize) -> Self {
        Self {
            system: system.into(),
            turns: VecDeque::with_capacity(max_turns + 1),
            max_turns: max_turns.max(1),
        }
    }

    /// Append a turn, dropping the oldest once the window is full.
    pub fn push(&mut self, role: Role, content: impl Into<String>) {
        self.turns.push_back(Turn::new(role, content));
        while self.turns.len() > self.max_turns {
            self.turns.pop_front();
        }
    }

    pub fn system(&self) -> &str {
        &self.system
    }

    pub fn turns(&self) -> impl Iterator<Item = &Turn> {
        self.turns.iter()
    }

    /// System prompt followed by the windowed turns, in chat-API order.
    pub fn messages(&self) -> Vec<Turn> {
        std::iter::once(Turn::new(Role::System, self.system.clone()))
            .chain(self.turns.iter().cloned())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn clear(&mut self) {
        self.turns.clear();
    }
}
