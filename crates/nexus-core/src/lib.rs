//! nexus-core - Conversational client and dialogue state for the nexus inference service

pub mod agent;
pub mod client;
pub mod config;
pub mod envelope;
pub mod history;
pub mod mood;
pub mod prompts;

pub use agent::{Agent, MoodStats};
pub use client::{ChatClient, ClientError, ReplyStream, collect_reply};
pub use config::{ClientConfig, ConfigError, load_config};
pub use envelope::{RequestEnvelope, SamplingParams};
pub use history::{History, HistoryEntry, HistoryError};
pub use mood::{MoodError, MoodOutcome, MoodUpdate, find_code_block, find_json};

// Re-export the transport layer for convenience
pub use nexus_wire;
