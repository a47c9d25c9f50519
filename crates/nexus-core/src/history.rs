//! Dialogue history
//!
//! An append-only, chronological transcript of a session. Entries are never
//! edited or removed; the order is what the transcript is rebuilt from.

use crate::agent::Agent;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info};

/// One conversational turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// Name of the agent who spoke.
    pub name: String,
    /// The full text of the turn.
    pub message: String,
}

/// Ordered log of turns.
///
/// Serializes as a plain JSON array of `{name, message}` objects.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct History {
    entries: Vec<HistoryEntry>,
}

impl History {
    /// Create an empty history
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a turn spoken by `speaker`
    pub fn record(&mut self, speaker: &Agent, message: impl Into<String>) {
        let message = message.into();
        debug!("{} turn recorded ({} bytes)", speaker.name(), message.len());
        self.entries.push(HistoryEntry {
            name: speaker.name().to_string(),
            message,
        });
    }

    pub fn entries(&self) -> &[HistoryEntry] {
        &self.entries
    }

    pub fn last(&self) -> Option<&HistoryEntry> {
        self.entries.last()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Render as `name: message` lines in order
    pub fn transcript(&self) -> String {
        self.entries
            .iter()
            .map(|entry| format!("{}: {}", entry.name, entry.message))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Load a history file, or start empty if it does not exist
    pub fn load(path: impl AsRef<Path>) -> Result<Self, HistoryError> {
        let path = path.as_ref();
        if !path.exists() {
            info!("History file {:?} does not exist, starting empty", path);
            return Ok(Self::new());
        }

        let content = std::fs::read_to_string(path)?;
        let history: History = serde_json::from_str(&content)?;
        Ok(history)
    }

    /// Save to a JSON file, creating parent directories
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), HistoryError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        debug!("History saved to {:?}", path);
        Ok(())
    }
}

/// History persistence errors
#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
