//! Dialogue participants

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Mood statistics every new agent starts with, all at zero.
pub const DEFAULT_MOOD_STATS: [&str; 10] = [
    "happy",
    "sad",
    "neutral",
    "angry",
    "paranoid",
    "anxious",
    "excited",
    "bored",
    "confused",
    "interested",
];

/// Mapping from stat name to value. Ordered so summaries are stable.
pub type MoodStats = BTreeMap<String, f64>;

/// A participant in the dialogue: a name and its mood statistics.
///
/// Serializes as `{"name": ..., "mood_stats": {...}}`, the shape the
/// inference service expects for `speaker` and `listener`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Agent {
    name: String,
    mood_stats: MoodStats,
}

impl Agent {
    /// Create an agent with the default mood stats
    pub fn new(name: impl Into<String>) -> Self {
        let mood_stats = DEFAULT_MOOD_STATS
            .iter()
            .map(|stat| (stat.to_string(), 0.0))
            .collect();
        Self::with_stats(name, mood_stats)
    }

    /// Create an agent with the given mood stats
    pub fn with_stats(name: impl Into<String>, mood_stats: MoodStats) -> Self {
        Self {
            name: name.into(),
            mood_stats,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mood_stats(&self) -> &MoodStats {
        &self.mood_stats
    }

    /// Get a single stat
    pub fn stat(&self, name: &str) -> Option<f64> {
        self.mood_stats.get(name).copied()
    }

    // Only the mood-update protocol writes stats.
    pub(crate) fn replace_mood_stats(&mut self, mood_stats: MoodStats) {
        self.mood_stats = mood_stats;
    }
}
