use crate::core::{ModelInfo, TokenId};
use crate::introspect::{
    Generation, DEFAULT_LAYER_INDEX, DEFAULT_NUM_TOKENS, DEFAULT_TEMPERATURE, DEFAULT_TOP_K,
};
use serde::{Deserialize, Serialize};

pub use crate::introspect::{EmbeddingRecord, InternalSnapshot};

fn default_temperature() -> f32 {
    DEFAULT_TEMPERATURE
}

fn default_top_k() -> i64 {
    DEFAULT_TOP_K
}

fn default_num_tokens() -> i64 {
    DEFAULT_NUM_TOKENS
}

fn default_layer_index() -> i64 {
    DEFAULT_LAYER_INDEX
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateRequest {
    pub context: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_top_k")]
    pub top_k: i64,
    #[serde(default)]
    pub seed: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateResponse {
    pub next_token: String,
    pub next_token_id: TokenId,
    pub candidates: Vec<String>,
    pub candidate_ids: Vec<TokenId>,
    pub probs: Vec<f32>,
    /// Sum of `probs`; below 1 by the mass outside the top-k.
    pub probs_mass: f32,
    pub token_ids: Vec<TokenId>,
}

impl From<Generation> for GenerateResponse {
    fn from(generation: Generation) -> Self {
        let probs_mass = generation.candidate_mass();
        let mut candidates = Vec::with_capacity(generation.candidates.len());
        let mut candidate_ids = Vec::with_capacity(generation.candidates.len());
        let mut probs = Vec::with_capacity(generation.candidates.len());
        for c in generation.candidates {
            candidates.push(c.token);
            candidate_ids.push(c.token_id);
            probs.push(c.probability);
        }
        Self {
            next_token: generation.next_token,
            next_token_id: generation.next_token_id,
            candidates,
            candidate_ids,
            probs,
            probs_mass,
            token_ids: generation.token_ids,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbedRequest {
    pub context: String,
    #[serde(default = "default_num_tokens")]
    pub num_tokens: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct EmbedResponse {
    pub embeddings: Vec<EmbeddingRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InternalForwardRequest {
    pub context: String,
    #[serde(default = "default_num_tokens")]
    pub num_tokens: i64,
    #[serde(default = "default_layer_index")]
    pub layer_index: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusResponse {
    pub status: &'static str,
}

pub const STATUS_RUNNING: &str = "WordWeaver backend running";

#[derive(Debug, Clone, Serialize)]
pub struct ModelResponse {
    #[serde(flatten)]
    pub info: ModelInfo,
    pub version: &'static str,
}
