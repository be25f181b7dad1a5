//! Character records for cross-episode continuity.

use serde::{Deserialize, Serialize};

/// One appended entry in a character's state history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateChange {
    /// Episode the change is dated to (0 = planning stage).
    pub episode: u32,
    /// What changed, in natural language.
    pub change: String,
}

/// A tracked character. Created lazily on first reference, never deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Character {
    /// Unique key within the store.
    pub name: String,
    /// Episode the character first appeared in (0 = planning stage).
    pub first_appearance: u32,
    /// Append-only history, in insertion order. Callers may append entries
    /// out of episode order; causal filtering uses the `episode` field.
    pub state_history: Vec<StateChange>,
}

impl Character {
    /// Create a new character first seen at the given episode.
    pub fn new(name: impl Into<String>, first_appearance: u32) -> Self {
        Self {
            name: name.into(),
            first_appearance,
            state_history: Vec::new(),
        }
    }

    /// Append a state change. History is never truncated or reordered.
    pub fn record_state(&mut self, episode: u32, change: impl Into<String>) {
        self.state_history.push(StateChange {
            episode,
            change: change.into(),
        });
    }

    /// The last `n` history entries, in insertion order.
    pub fn recent_states(&self, n: usize) -> &[StateChange] {
        let start = self.state_history.len().saturating_sub(n);
        &self.state_history[start..]
    }

    /// History entries dated strictly before the given episode.
    pub fn states_before(&self, episode: u32) -> Vec<&StateChange> {
        self.state_history
            .iter()
            .filter(|change| change.episode < episode)
            .collect()
    }
}
