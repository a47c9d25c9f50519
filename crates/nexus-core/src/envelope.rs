//! Request envelope sent to the inference service

use crate::agent::Agent;
use crate::history::History;
use serde::{Deserialize, Serialize};

/// Value of the envelope's `query_type` field for text generation.
pub const QUERY_TYPE_LLM: &str = "llm";

/// Generation settings passed through to the inference service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingParams {
    pub max_new_tokens: u32,
    pub temperature: f64,
    pub top_k: u32,
    pub top_p: f64,
    pub min_length: u32,
    pub do_sample: bool,
    pub early_stopping: bool,
    pub num_beams: u32,
    pub repetition_penalty: f64,
    pub num_return_sequences: u32,
    pub decoder_start_token_id: Option<u32>,
    pub use_cache: bool,
    pub length_penalty: f64,
}

impl Default for SamplingParams {
    fn default() -> Self {
        Self {
            max_new_tokens: 1000,
            temperature: 0.9,
            top_k: 50,
            top_p: 0.9,
            min_length: 0,
            do_sample: true,
            early_stopping: true,
            num_beams: 1,
            repetition_penalty: 1.0,
            num_return_sequences: 1,
            decoder_start_token_id: None,
            use_cache: true,
            length_penalty: 1.0,
        }
    }
}

/// One request, built per query and dropped after it is sent.
///
/// Borrows everything it carries; the sampling parameters are flattened
/// into the top-level JSON object.
#[derive(Debug, Clone, Serialize)]
pub struct RequestEnvelope<'a> {
    pub history: &'a History,
    pub listener: &'a Agent,
    pub speaker: &'a Agent,
    pub use_usernames: bool,
    pub prompt_prefix: &'a str,
    pub instructions: &'a str,
    pub prompt: &'a str,
    pub query_type: &'a str,
    #[serde(flatten)]
    pub sampling: &'a SamplingParams,
}

impl<'a> RequestEnvelope<'a> {
    /// Build an LLM request with usernames on and no prompt prefix
    pub fn new(
        history: &'a History,
        speaker: &'a Agent,
        listener: &'a Agent,
        instructions: &'a str,
        prompt: &'a str,
        sampling: &'a SamplingParams,
    ) -> Self {
        Self {
            history,
            listener,
            speaker,
            use_usernames: true,
            prompt_prefix: "",
            instructions,
            prompt,
            query_type: QUERY_TYPE_LLM,
            sampling,
        }
    }

    /// Serialize the envelope to JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
