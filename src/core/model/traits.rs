use crate::core::{Result, Tensor, TokenId};
use serde::Serialize;

/// Which intermediate signals a forward pass should keep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ForwardOptions {
    pub hidden_states: bool,
    pub attentions: bool,
}

impl ForwardOptions {
    pub fn logits_only() -> Self {
        Self::default()
    }

    pub fn everything() -> Self {
        Self {
            hidden_states: true,
            attentions: true,
        }
    }
}

/// Result of one forward pass over a single sequence.
pub struct ForwardOutput {
    /// Raw scores at the final position, one per vocabulary entry.
    pub logits: Vec<f32>,
    /// `num_layers + 1` tensors of shape `[seq, hidden]`: the embedding
    /// output first, then the output of every decoder layer.
    pub hidden_states: Option<Vec<candle_core::Tensor>>,
    /// One `[heads, seq, seq]` tensor of post-softmax weights per layer.
    pub attentions: Option<Vec<candle_core::Tensor>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ModelInfo {
    pub name: String,
    pub architecture: String,
    pub num_layers: usize,
    pub hidden_size: usize,
    pub num_heads: usize,
    pub num_kv_heads: usize,
    pub vocab_size: usize,
    pub context_length: usize,
    pub parameter_count: Option<u64>,
    pub supports_projections: bool,
}

/// A pretrained causal language model as seen by the introspection service.
///
/// Implementations hold read-only weights; every method takes `&self`.
pub trait ModelProvider: Send + Sync {
    fn info(&self) -> &ModelInfo;

    fn forward(&self, tokens: &[TokenId], options: ForwardOptions) -> Result<ForwardOutput>;

    /// Rows of the input embedding table for `tokens`, shape `[tokens, hidden]`.
    fn embedding_rows(&self, tokens: &[TokenId]) -> Result<Tensor>;

    /// The optional Q/K/V projection capability. Providers whose layout is
    /// not understood return `None`.
    fn attention_projections(&self) -> Option<&dyn HasAttentionProjections> {
        None
    }
}

/// Per-layer self-attention projection weights, `[out, in]` like `nn.Linear`.
#[derive(Debug, Clone)]
pub struct AttentionProjections {
    pub q_weight: candle_core::Tensor,
    pub q_bias: Option<candle_core::Tensor>,
    pub k_weight: candle_core::Tensor,
    pub k_bias: Option<candle_core::Tensor>,
    pub v_weight: candle_core::Tensor,
    pub v_bias: Option<candle_core::Tensor>,
}

pub trait HasAttentionProjections: Send + Sync {
    fn projections(&self, layer: usize) -> Result<AttentionProjections>;
}
