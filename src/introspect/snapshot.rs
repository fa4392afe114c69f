use super::embeddings::EmbeddingRecord;
use crate::core::{ForwardOutput, ModelProvider, Result, Tensor, TokenId};
use candle_core::DType;
use serde::Serialize;
use std::ops::Range;
use tracing::warn;

pub type Matrix = Vec<Vec<f32>>;

/// Outcome of extracting one snapshot view.
#[derive(Debug, Clone, PartialEq)]
pub enum Extraction<T> {
    Available(T),
    Unavailable(String),
}

impl<T> Extraction<T> {
    pub fn from_result(result: Result<T>) -> Self {
        match result {
            Ok(value) => Self::Available(value),
            Err(e) => Self::Unavailable(format!("{:#}", e)),
        }
    }

    /// Flatten to an `Option`, logging why a view is missing.
    pub fn into_option(self, field: &str) -> Option<T> {
        match self {
            Self::Available(value) => Some(value),
            Self::Unavailable(reason) => {
                warn!("{} unavailable: {}", field, reason);
                None
            }
        }
    }
}

/// One layer's internal state restricted to the trailing token window.
/// Every view is independently nullable.
#[derive(Debug, Clone, Serialize)]
pub struct InternalSnapshot {
    pub tokens_selected: Vec<String>,
    pub token_ids_selected: Vec<TokenId>,
    pub positions_selected: Vec<usize>,
    pub sequence_length: usize,
    pub num_layers: usize,
    pub layer_index: Option<usize>,
    pub logits: Option<Vec<f32>>,
    pub hidden_states_selected: Option<Matrix>,
    pub attention_matrix_selected: Option<Matrix>,
    pub embeddings_selected: Option<Vec<EmbeddingRecord>>,
    pub positional_selected: Option<Matrix>,
    pub q_selected: Option<Matrix>,
    pub k_selected: Option<Matrix>,
    pub v_selected: Option<Matrix>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Projection {
    Query,
    Key,
    Value,
}

impl Projection {
    pub fn field(self) -> &'static str {
        match self {
            Self::Query => "q_selected",
            Self::Key => "k_selected",
            Self::Value => "v_selected",
        }
    }
}

fn require_layer(layer: Option<usize>) -> Result<usize> {
    layer.ok_or_else(|| anyhow::anyhow!("layer index out of range"))
}

/// Output activations of `layer` for the window, `[n, hidden]`.
pub fn hidden_view(out: &ForwardOutput, layer: Option<usize>, window: &Range<usize>) -> Result<Matrix> {
    let layer = require_layer(layer)?;
    let states = out
        .hidden_states
        .as_ref()
        .ok_or_else(|| anyhow::anyhow!("model returned no hidden states"))?;
    let state = states
        .get(layer + 1)
        .ok_or_else(|| anyhow::anyhow!("no hidden state for layer {}", layer))?;
    let rows = state.narrow(0, window.start, window.len())?;
    Tensor::from_candle(&rows)?.to_rows()
}

/// Head-averaged attention of `layer`, rows and columns both restricted to
/// the window. Rows are not renormalized.
pub fn attention_view(out: &ForwardOutput, layer: Option<usize>, window: &Range<usize>) -> Result<Matrix> {
    let layer = require_layer(layer)?;
    let attentions = out
        .attentions
        .as_ref()
        .ok_or_else(|| anyhow::anyhow!("model returned no attention weights"))?;
    let weights = attentions
        .get(layer)
        .ok_or_else(|| anyhow::anyhow!("no attention weights for layer {}", layer))?;
    let block = weights
        .to_dtype(DType::F32)?
        .mean(0)?
        .narrow(0, window.start, window.len())?
        .narrow(1, window.start, window.len())?;
    Tensor::from_candle(&block)?.to_rows()
}

/// Residual stream entering `layer` for the window, projected through one of
/// the layer's Q/K/V weights: `x · Wᵀ + b`.
pub fn projection_view(
    model: &dyn ModelProvider,
    out: &ForwardOutput,
    layer: Option<usize>,
    window: &Range<usize>,
    which: Projection,
) -> Result<Matrix> {
    let layer = require_layer(layer)?;
    let caps = model
        .attention_projections()
        .ok_or_else(|| anyhow::anyhow!("model does not expose attention projections"))?;
    let states = out
        .hidden_states
        .as_ref()
        .ok_or_else(|| anyhow::anyhow!("model returned no hidden states"))?;
    let input = states
        .get(layer)
        .ok_or_else(|| anyhow::anyhow!("no input hidden state for layer {}", layer))?
        .narrow(0, window.start, window.len())?
        .to_dtype(DType::F32)?;

    let projections = caps.projections(layer)?;
    let (weight, bias) = match which {
        Projection::Query => (&projections.q_weight, projections.q_bias.as_ref()),
        Projection::Key => (&projections.k_weight, projections.k_bias.as_ref()),
        Projection::Value => (&projections.v_weight, projections.v_bias.as_ref()),
    };

    let weight = weight.to_dtype(DType::F32)?;
    let mut projected = input.matmul(&weight.t()?)?;
    if let Some(bias) = bias {
        projected = projected.broadcast_add(&bias.to_dtype(DType::F32)?)?;
    }
    Tensor::from_candle(&projected)?.to_rows()
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    fn output() -> ForwardOutput {
        let device = Device::Cpu;
        // 3 positions, hidden 2, one layer.
        let h0 = candle_core::Tensor::new(&[[1f32, 0.0], [0.0, 1.0], [1.0, 1.0]], &device).unwrap();
        let h1 = candle_core::Tensor::new(&[[2f32, 0.0], [0.0, 2.0], [2.0, 2.0]], &device).unwrap();
        let attn = candle_core::Tensor::new(
            &[
                [[1f32, 0.0, 0.0], [0.5, 0.5, 0.0], [0.2, 0.2, 0.6]],
                [[1f32, 0.0, 0.0], [0.1, 0.9, 0.0], [0.4, 0.4, 0.2]],
            ],
            &device,
        )
        .unwrap();
        ForwardOutput {
            logits: vec![0.0, 1.0],
            hidden_states: Some(vec![h0, h1]),
            attentions: Some(vec![attn]),
        }
    }

    #[test]
    fn test_hidden_view_uses_layer_output() {
        let rows = hidden_view(&output(), Some(0), &(1..3)).unwrap();
        assert_eq!(rows, vec![vec![0.0, 2.0], vec![2.0, 2.0]]);
    }

    #[test]
    fn test_attention_view_averages_and_crops() {
        let rows = attention_view(&output(), Some(0), &(1..3)).unwrap();
        assert_eq!(rows.len(), 2);
        assert!((rows[0][0] - 0.7).abs() < 1e-6);
        assert_eq!(rows[0][1], 0.0);
        assert!((rows[1][0] - 0.3).abs() < 1e-6);
        assert!((rows[1][1] - 0.4).abs() < 1e-6);
    }

    #[test]
    fn test_attention_view_full_window_keeps_rows_normalized() {
        let rows = attention_view(&output(), Some(0), &(0..3)).unwrap();
        assert_eq!(rows.len(), 3);
        for row in &rows {
            assert!((row.iter().sum::<f32>() - 1.0).abs() < 1e-6);
        }
        assert!((rows[1][0] - 0.3).abs() < 1e-6);
    }

    #[test]
    fn test_out_of_range_layer_is_unavailable() {
        let view = Extraction::from_result(hidden_view(&output(), None, &(0..3)));
        assert!(matches!(view, Extraction::Unavailable(_)));
        let view = Extraction::from_result(attention_view(&output(), Some(4), &(0..3)));
        assert!(matches!(view, Extraction::Unavailable(_)));
    }

    #[test]
    fn test_missing_captures_are_unavailable() {
        let out = ForwardOutput {
            logits: vec![0.0],
            hidden_states: None,
            attentions: None,
        };
        assert!(hidden_view(&out, Some(0), &(0..1)).is_err());
        assert!(attention_view(&out, Some(0), &(0..1)).is_err());
    }

    #[test]
    fn test_extraction_flattening() {
        let ok: Extraction<u8> = Extraction::Available(3);
        assert_eq!(ok.into_option("x"), Some(3));
        let missing: Extraction<u8> = Extraction::from_result(Err(anyhow::anyhow!("boom")));
        assert_eq!(missing, Extraction::Unavailable("boom".to_string()));
        assert_eq!(missing.into_option("x"), None);
    }
}
