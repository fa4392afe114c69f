use crate::core::Result;
use serde::Deserialize;
use std::path::Path;

/// The subset of a HuggingFace `config.json` the decoder adapters read.
#[derive(Debug, Clone, Deserialize)]
pub struct ModelConfig {
    #[serde(default)]
    pub model_type: String,
    #[serde(default)]
    pub architectures: Vec<String>,
    pub hidden_size: usize,
    pub intermediate_size: usize,
    pub num_hidden_layers: usize,
    pub num_attention_heads: usize,
    #[serde(default)]
    pub num_key_value_heads: Option<usize>,
    #[serde(default)]
    pub head_dim: Option<usize>,
    pub vocab_size: usize,
    #[serde(default = "default_rope_theta")]
    pub rope_theta: f64,
    #[serde(default)]
    pub rope_scaling: Option<RopeScaling>,
    #[serde(default = "default_rms_norm_eps")]
    pub rms_norm_eps: f64,
    #[serde(default = "default_max_position_embeddings")]
    pub max_position_embeddings: usize,
    #[serde(default)]
    pub tie_word_embeddings: bool,
    #[serde(default)]
    pub attention_bias: Option<bool>,
}

fn default_rope_theta() -> f64 {
    10_000.0
}

fn default_rms_norm_eps() -> f64 {
    1e-5
}

fn default_max_position_embeddings() -> usize {
    2048
}

#[derive(Debug, Clone, Deserialize)]
pub struct RopeScaling {
    #[serde(default, alias = "type")]
    pub rope_type: Option<String>,
    #[serde(default = "default_factor")]
    pub factor: f64,
    #[serde(default = "default_low_freq_factor")]
    pub low_freq_factor: f64,
    #[serde(default = "default_high_freq_factor")]
    pub high_freq_factor: f64,
    #[serde(default)]
    pub original_max_position_embeddings: Option<usize>,
}

fn default_factor() -> f64 {
    1.0
}

fn default_low_freq_factor() -> f64 {
    1.0
}

fn default_high_freq_factor() -> f64 {
    4.0
}

impl ModelConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    pub fn num_kv_heads(&self) -> usize {
        self.num_key_value_heads.unwrap_or(self.num_attention_heads)
    }

    pub fn head_dim(&self) -> usize {
        self.head_dim
            .unwrap_or(self.hidden_size / self.num_attention_heads)
    }

    /// Architecture key used for registry lookup: `model_type` when present,
    /// otherwise the first entry of `architectures`.
    pub fn architecture(&self) -> &str {
        if !self.model_type.is_empty() {
            &self.model_type
        } else {
            self.architectures.first().map(|s| s.as_str()).unwrap_or("")
        }
    }

    pub fn builder() -> ModelConfigBuilder {
        ModelConfigBuilder::new()
    }
}

pub struct ModelConfigBuilder {
    config: ModelConfig,
}

impl ModelConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: ModelConfig {
                model_type: "llama".to_string(),
                architectures: Vec::new(),
                hidden_size: 4096,
                intermediate_size: 11008,
                num_hidden_layers: 32,
                num_attention_heads: 32,
                num_key_value_heads: None,
                head_dim: None,
                vocab_size: 32000,
                rope_theta: default_rope_theta(),
                rope_scaling: None,
                rms_norm_eps: default_rms_norm_eps(),
                max_position_embeddings: default_max_position_embeddings(),
                tie_word_embeddings: false,
                attention_bias: None,
            },
        }
    }

    pub fn model_type(mut self, model_type: impl Into<String>) -> Self {
        self.config.model_type = model_type.into();
        self
    }

    pub fn hidden_size(mut self, size: usize) -> Self {
        self.config.hidden_size = size;
        self
    }

    pub fn intermediate_size(mut self, size: usize) -> Self {
        self.config.intermediate_size = size;
        self
    }

    pub fn num_layers(mut self, n: usize) -> Self {
        self.config.num_hidden_layers = n;
        self
    }

    pub fn num_heads(mut self, n: usize) -> Self {
        self.config.num_attention_heads = n;
        self
    }

    pub fn num_kv_heads(mut self, n: usize) -> Self {
        self.config.num_key_value_heads = Some(n);
        self
    }

    pub fn vocab_size(mut self, size: usize) -> Self {
        self.config.vocab_size = size;
        self
    }

    pub fn max_position_embeddings(mut self, len: usize) -> Self {
        self.config.max_position_embeddings = len;
        self
    }

    pub fn rope_theta(mut self, theta: f64) -> Self {
        self.config.rope_theta = theta;
        self
    }

    pub fn tie_word_embeddings(mut self, tie: bool) -> Self {
        self.config.tie_word_embeddings = tie;
        self
    }

    pub fn attention_bias(mut self, bias: bool) -> Self {
        self.config.attention_bias = Some(bias);
        self
    }

    pub fn build(self) -> ModelConfig {
        self.config
    }
}

impl Default for ModelConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
