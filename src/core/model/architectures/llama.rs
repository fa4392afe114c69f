//! Llama-family decoder with attention and hidden-state capture.
//!
//! Covers Llama 2/3, Mistral and Qwen2 checkpoints in HuggingFace
//! safetensors layout. Qwen2 differs only by the Q/K/V bias, which the
//! registry switches on through `attention_bias`.

use crate::core::model::{
    AttentionProjections, ForwardOptions, ForwardOutput, HasAttentionProjections, ModelConfig,
    ModelInfo, ModelProvider,
};
use crate::core::{Result, Tensor, TokenId};
use anyhow::Context;
use candle_core::{DType, Device, IndexOp, Module};
use candle_nn::{embedding, linear_b, linear_no_bias, Embedding, Linear, RmsNorm, VarBuilder};
use tracing::{debug, info};

type CTensor = candle_core::Tensor;

/// Rotary position embedding frequencies; cos/sin tables are built per call
/// for the actual sequence length.
struct RotaryEmbedding {
    inv_freq: Vec<f32>,
}

impl RotaryEmbedding {
    fn new(config: &ModelConfig) -> Self {
        let dim = config.head_dim();
        let theta = config.rope_theta;
        let mut inv_freq: Vec<f64> = (0..dim)
            .step_by(2)
            .map(|i| 1.0 / theta.powf(i as f64 / dim as f64))
            .collect();

        if let Some(scaling) = &config.rope_scaling {
            if scaling.rope_type.as_deref() == Some("llama3") {
                let original = scaling
                    .original_max_position_embeddings
                    .unwrap_or(config.max_position_embeddings) as f64;
                let low_freq_wavelen = original / scaling.low_freq_factor;
                let high_freq_wavelen = original / scaling.high_freq_factor;
                for freq in inv_freq.iter_mut() {
                    let wavelen = 2.0 * std::f64::consts::PI / *freq;
                    if wavelen > low_freq_wavelen {
                        *freq /= scaling.factor;
                    } else if wavelen >= high_freq_wavelen {
                        let smooth = (original / wavelen - scaling.low_freq_factor)
                            / (scaling.high_freq_factor - scaling.low_freq_factor);
                        *freq = (1.0 - smooth) * *freq / scaling.factor + smooth * *freq;
                    }
                }
            } else if scaling.rope_type.as_deref() == Some("linear") {
                for freq in inv_freq.iter_mut() {
                    *freq /= scaling.factor;
                }
            }
        }

        Self {
            inv_freq: inv_freq.into_iter().map(|f| f as f32).collect(),
        }
    }

    fn tables(&self, seq_len: usize, device: &Device, dtype: DType) -> Result<(CTensor, CTensor)> {
        let half = self.inv_freq.len();
        let inv_freq = CTensor::from_vec(self.inv_freq.clone(), (1, half), device)?;
        let positions: Vec<f32> = (0..seq_len).map(|p| p as f32).collect();
        let positions = CTensor::from_vec(positions, (seq_len, 1), device)?;
        // [seq_len, head_dim / 2]
        let freqs = positions.matmul(&inv_freq)?;
        Ok((freqs.cos()?.to_dtype(dtype)?, freqs.sin()?.to_dtype(dtype)?))
    }
}

fn causal_mask(seq_len: usize, device: &Device) -> Result<CTensor> {
    let mask: Vec<f32> = (0..seq_len)
        .flat_map(|i| (0..seq_len).map(move |j| if j > i { f32::NEG_INFINITY } else { 0.0 }))
        .collect();
    Ok(CTensor::from_vec(mask, (seq_len, seq_len), device)?)
}

struct Attention {
    q_proj: Linear,
    k_proj: Linear,
    v_proj: Linear,
    o_proj: Linear,
    num_heads: usize,
    num_kv_heads: usize,
    head_dim: usize,
}

impl Attention {
    fn load(vb: VarBuilder, config: &ModelConfig) -> Result<Self> {
        let head_dim = config.head_dim();
        let num_heads = config.num_attention_heads;
        let num_kv_heads = config.num_kv_heads();
        let bias = config.attention_bias.unwrap_or(false);

        let q_proj = linear_b(config.hidden_size, num_heads * head_dim, bias, vb.pp("q_proj"))?;
        let k_proj = linear_b(config.hidden_size, num_kv_heads * head_dim, bias, vb.pp("k_proj"))?;
        let v_proj = linear_b(config.hidden_size, num_kv_heads * head_dim, bias, vb.pp("v_proj"))?;
        let o_proj = linear_no_bias(num_heads * head_dim, config.hidden_size, vb.pp("o_proj"))?;

        Ok(Self {
            q_proj,
            k_proj,
            v_proj,
            o_proj,
            num_heads,
            num_kv_heads,
            head_dim,
        })
    }

    /// Returns the attention output and the `[batch, heads, seq, seq]` weights.
    fn forward(
        &self,
        x: &CTensor,
        cos: &CTensor,
        sin: &CTensor,
        mask: Option<&CTensor>,
    ) -> Result<(CTensor, CTensor)> {
        let (b, seq_len, _) = x.dims3()?;

        let q = self
            .q_proj
            .forward(x)?
            .reshape((b, seq_len, self.num_heads, self.head_dim))?
            .transpose(1, 2)?
            .contiguous()?;
        let k = self
            .k_proj
            .forward(x)?
            .reshape((b, seq_len, self.num_kv_heads, self.head_dim))?
            .transpose(1, 2)?
            .contiguous()?;
        let v = self
            .v_proj
            .forward(x)?
            .reshape((b, seq_len, self.num_kv_heads, self.head_dim))?
            .transpose(1, 2)?;

        let q = candle_nn::rotary_emb::rope(&q, cos, sin)?;
        let k = candle_nn::rotary_emb::rope(&k, cos, sin)?;

        let n_rep = self.num_heads / self.num_kv_heads;
        let k = candle_transformers::utils::repeat_kv(k, n_rep)?.contiguous()?;
        let v = candle_transformers::utils::repeat_kv(v, n_rep)?.contiguous()?;

        let scale = 1.0 / (self.head_dim as f64).sqrt();
        let scores = (q.matmul(&k.t()?)? * scale)?.to_dtype(DType::F32)?;
        let scores = match mask {
            Some(mask) => scores.broadcast_add(mask)?,
            None => scores,
        };
        let weights = candle_nn::ops::softmax_last_dim(&scores)?;

        let output = weights
            .to_dtype(v.dtype())?
            .matmul(&v)?
            .transpose(1, 2)?
            .reshape((b, seq_len, self.num_heads * self.head_dim))?;

        Ok((self.o_proj.forward(&output)?, weights))
    }
}

struct Mlp {
    gate_proj: Linear,
    up_proj: Linear,
    down_proj: Linear,
}

impl Mlp {
    fn load(vb: VarBuilder, config: &ModelConfig) -> Result<Self> {
        Ok(Self {
            gate_proj: linear_no_bias(config.hidden_size, config.intermediate_size, vb.pp("gate_proj"))?,
            up_proj: linear_no_bias(config.hidden_size, config.intermediate_size, vb.pp("up_proj"))?,
            down_proj: linear_no_bias(config.intermediate_size, config.hidden_size, vb.pp("down_proj"))?,
        })
    }

    fn forward(&self, x: &CTensor) -> Result<CTensor> {
        let gate = candle_nn::ops::silu(&self.gate_proj.forward(x)?)?;
        let up = self.up_proj.forward(x)?;
        Ok(self.down_proj.forward(&(gate * up)?)?)
    }
}

struct DecoderLayer {
    self_attn: Attention,
    mlp: Mlp,
    input_layernorm: RmsNorm,
    post_attention_layernorm: RmsNorm,
}

impl DecoderLayer {
    fn load(vb: VarBuilder, config: &ModelConfig) -> Result<Self> {
        Ok(Self {
            self_attn: Attention::load(vb.pp("self_attn"), config)?,
            mlp: Mlp::load(vb.pp("mlp"), config)?,
            input_layernorm: candle_nn::rms_norm(
                config.hidden_size,
                config.rms_norm_eps,
                vb.pp("input_layernorm"),
            )?,
            post_attention_layernorm: candle_nn::rms_norm(
                config.hidden_size,
                config.rms_norm_eps,
                vb.pp("post_attention_layernorm"),
            )?,
        })
    }

    fn forward(
        &self,
        x: &CTensor,
        cos: &CTensor,
        sin: &CTensor,
        mask: Option<&CTensor>,
    ) -> Result<(CTensor, CTensor)> {
        let residual = x;
        let h = self.input_layernorm.forward(x)?;
        let (h, weights) = self.self_attn.forward(&h, cos, sin, mask)?;
        let x = (residual + h)?;

        let residual = &x;
        let h = self.mlp.forward(&self.post_attention_layernorm.forward(&x)?)?;
        Ok(((residual + h)?, weights))
    }
}

pub struct LlamaModel {
    embed_tokens: Embedding,
    layers: Vec<DecoderLayer>,
    norm: RmsNorm,
    lm_head: Linear,
    rotary: RotaryEmbedding,
    device: Device,
    dtype: DType,
    info: ModelInfo,
}

impl LlamaModel {
    pub fn load(config: &ModelConfig, vb: VarBuilder) -> Result<Self> {
        info!(
            "Building {} decoder: {} layers, {} hidden, {} vocab",
            config.architecture(),
            config.num_hidden_layers,
            config.hidden_size,
            config.vocab_size
        );

        let device = vb.device().clone();
        let dtype = vb.dtype();
        let vb_model = vb.pp("model");

        let embed_tokens = embedding(config.vocab_size, config.hidden_size, vb_model.pp("embed_tokens"))
            .context("missing embed_tokens")?;

        let mut layers = Vec::with_capacity(config.num_hidden_layers);
        for i in 0..config.num_hidden_layers {
            let layer = DecoderLayer::load(vb_model.pp(format!("layers.{i}")), config)
                .with_context(|| format!("failed to load decoder layer {i}"))?;
            layers.push(layer);
            if (i + 1) % 8 == 0 {
                debug!("Loaded layer {}/{}", i + 1, config.num_hidden_layers);
            }
        }

        let norm = candle_nn::rms_norm(config.hidden_size, config.rms_norm_eps, vb_model.pp("norm"))?;

        let lm_head = if config.tie_word_embeddings || !vb.contains_tensor("lm_head.weight") {
            debug!("Tying lm_head to the input embeddings");
            Linear::new(embed_tokens.embeddings().clone(), None)
        } else {
            linear_no_bias(config.hidden_size, config.vocab_size, vb.pp("lm_head"))?
        };

        let info = ModelInfo {
            name: config.architecture().to_string(),
            architecture: config.architecture().to_string(),
            num_layers: config.num_hidden_layers,
            hidden_size: config.hidden_size,
            num_heads: config.num_attention_heads,
            num_kv_heads: config.num_kv_heads(),
            vocab_size: config.vocab_size,
            context_length: config.max_position_embeddings,
            parameter_count: None,
            supports_projections: true,
        };

        Ok(Self {
            embed_tokens,
            layers,
            norm,
            lm_head,
            rotary: RotaryEmbedding::new(config),
            device,
            dtype,
            info,
        })
    }

    fn input_ids(&self, tokens: &[TokenId]) -> Result<CTensor> {
        let ids: Vec<u32> = tokens.iter().map(|t| t.0).collect();
        Ok(CTensor::new(ids.as_slice(), &self.device)?)
    }
}

impl ModelProvider for LlamaModel {
    fn info(&self) -> &ModelInfo {
        &self.info
    }

    fn forward(&self, tokens: &[TokenId], options: ForwardOptions) -> Result<ForwardOutput> {
        if tokens.is_empty() {
            anyhow::bail!("forward pass needs at least one token");
        }
        let seq_len = tokens.len();
        let input = self.input_ids(tokens)?.unsqueeze(0)?;

        let (cos, sin) = self.rotary.tables(seq_len, &self.device, self.dtype)?;
        let mask = if seq_len > 1 {
            Some(causal_mask(seq_len, &self.device)?)
        } else {
            None
        };

        let mut hidden = self.embed_tokens.forward(&input)?;
        let mut hidden_states = options
            .hidden_states
            .then(|| Vec::with_capacity(self.layers.len() + 1));
        let mut attentions = options
            .attentions
            .then(|| Vec::with_capacity(self.layers.len()));

        if let Some(states) = hidden_states.as_mut() {
            states.push(hidden.squeeze(0)?);
        }
        for layer in &self.layers {
            let (next, weights) = layer.forward(&hidden, &cos, &sin, mask.as_ref())?;
            hidden = next;
            if let Some(states) = hidden_states.as_mut() {
                states.push(hidden.squeeze(0)?);
            }
            if let Some(attn) = attentions.as_mut() {
                attn.push(weights.squeeze(0)?);
            }
        }

        let last = self.norm.forward(&hidden)?.i((.., seq_len - 1, ..))?;
        let logits = self
            .lm_head
            .forward(&last)?
            .squeeze(0)?
            .to_dtype(DType::F32)?
            .to_vec1::<f32>()?;

        Ok(ForwardOutput {
            logits,
            hidden_states,
            attentions,
        })
    }

    fn embedding_rows(&self, tokens: &[TokenId]) -> Result<Tensor> {
        let ids = self.input_ids(tokens)?;
        let rows = self.embed_tokens.embeddings().index_select(&ids, 0)?;
        Tensor::from_candle(&rows)
    }

    fn attention_projections(&self) -> Option<&dyn HasAttentionProjections> {
        Some(self)
    }
}

impl HasAttentionProjections for LlamaModel {
    fn projections(&self, layer: usize) -> Result<AttentionProjections> {
        let attn = &self
            .layers
            .get(layer)
            .ok_or_else(|| anyhow::anyhow!("layer {} out of range", layer))?
            .self_attn;
        Ok(AttentionProjections {
            q_weight: attn.q_proj.weight().clone(),
            q_bias: attn.q_proj.bias().cloned(),
            k_weight: attn.k_proj.weight().clone(),
            k_bias: attn.k_proj.bias().cloned(),
            v_weight: attn.v_proj.weight().clone(),
            v_bias: attn.v_proj.bias().cloned(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn filled(shape: &[usize], salt: usize) -> CTensor {
        let n: usize = shape.iter().product();
        let data: Vec<f32> = (0..n)
            .map(|i| (((i * 31 + salt * 17) % 97) as f32 / 97.0 - 0.5) * 0.2)
            .collect();
        CTensor::from_vec(data, shape, &Device::Cpu).unwrap()
    }

    fn tiny_model(bias: bool, tied: bool) -> LlamaModel {
        let config = ModelConfig::builder()
            .hidden_size(8)
            .intermediate_size(16)
            .num_layers(2)
            .num_heads(2)
            .num_kv_heads(1)
            .vocab_size(12)
            .max_position_embeddings(32)
            .tie_word_embeddings(tied)
            .attention_bias(bias)
            .build();

        let mut weights = HashMap::new();
        let mut salt = 0;
        let mut put = |name: String, shape: &[usize]| {
            salt += 1;
            weights.insert(name, filled(shape, salt));
        };
        put("model.embed_tokens.weight".into(), &[12, 8]);
        put("model.norm.weight".into(), &[8]);
        if !tied {
            put("lm_head.weight".into(), &[12, 8]);
        }
        for l in 0..2 {
            let p = format!("model.layers.{l}");
            put(format!("{p}.self_attn.q_proj.weight"), &[8, 8]);
            put(format!("{p}.self_attn.k_proj.weight"), &[4, 8]);
            put(format!("{p}.self_attn.v_proj.weight"), &[4, 8]);
            put(format!("{p}.self_attn.o_proj.weight"), &[8, 8]);
            if bias {
                put(format!("{p}.self_attn.q_proj.bias"), &[8]);
                put(format!("{p}.self_attn.k_proj.bias"), &[4]);
                put(format!("{p}.self_attn.v_proj.bias"), &[4]);
            }
            put(format!("{p}.mlp.gate_proj.weight"), &[16, 8]);
            put(format!("{p}.mlp.up_proj.weight"), &[16, 8]);
            put(format!("{p}.mlp.down_proj.weight"), &[8, 16]);
            put(format!("{p}.input_layernorm.weight"), &[8]);
            put(format!("{p}.post_attention_layernorm.weight"), &[8]);
        }

        let vb = VarBuilder::from_tensors(weights, DType::F32, &Device::Cpu);
        LlamaModel::load(&config, vb).unwrap()
    }

    fn ids(raw: &[u32]) -> Vec<TokenId> {
        raw.iter().copied().map(TokenId).collect()
    }

    #[test]
    fn test_forward_shapes() {
        let model = tiny_model(false, false);
        let out = model.forward(&ids(&[1, 2, 3]), ForwardOptions::everything()).unwrap();

        assert_eq!(out.logits.len(), 12);
        let hidden = out.hidden_states.unwrap();
        assert_eq!(hidden.len(), 3);
        assert_eq!(hidden[2].dims(), &[3, 8]);
        let attn = out.attentions.unwrap();
        assert_eq!(attn.len(), 2);
        assert_eq!(attn[0].dims(), &[2, 3, 3]);
    }

    #[test]
    fn test_attention_is_causal_and_normalized() {
        let model = tiny_model(true, false);
        let out = model.forward(&ids(&[4, 5, 6, 7]), ForwardOptions::everything()).unwrap();
        let avg = Tensor::from_candle(&out.attentions.unwrap()[1].mean(0).unwrap()).unwrap();
        for r in 0..4 {
            let row = avg.row(r).unwrap();
            let sum: f32 = row.iter().sum();
            assert!((sum - 1.0).abs() < 1e-4);
            assert!(row[r + 1..].iter().all(|&v| v == 0.0));
        }
    }

    #[test]
    fn test_logits_only_skips_captures() {
        let model = tiny_model(false, true);
        let out = model.forward(&ids(&[1]), ForwardOptions::logits_only()).unwrap();
        assert!(out.hidden_states.is_none());
        assert!(out.attentions.is_none());
        assert_eq!(out.logits.len(), 12);
    }

    #[test]
    fn test_embedding_rows_match_table() {
        let model = tiny_model(false, false);
        let rows = model.embedding_rows(&ids(&[3, 3, 0])).unwrap();
        assert_eq!(rows.shape().dims(), &[3, 8]);
        assert_eq!(rows.row(0).unwrap(), rows.row(1).unwrap());
        assert_ne!(rows.row(0).unwrap(), rows.row(2).unwrap());
    }

    #[test]
    fn test_projections_capability() {
        let model = tiny_model(true, false);
        let caps = model.attention_projections().unwrap();
        let p = caps.projections(1).unwrap();
        assert_eq!(p.q_weight.dims(), &[8, 8]);
        assert_eq!(p.k_weight.dims(), &[4, 8]);
        assert!(p.q_bias.is_some());
        assert!(caps.projections(2).is_err());

        let unbiased = tiny_model(false, false);
        assert!(unbiased.projections(0).unwrap().v_bias.is_none());
    }

    #[test]
    fn test_empty_input_is_an_error() {
        let model = tiny_model(false, false);
        assert!(model.forward(&[], ForwardOptions::logits_only()).is_err());
    }

    #[test]
    fn test_llama3_rope_scaling_slows_low_frequencies() {
        let mut config = ModelConfig::builder().hidden_size(64).num_heads(1).build();
        let plain = RotaryEmbedding::new(&config);
        config.rope_scaling = Some(crate::core::model::config::RopeScaling {
            rope_type: Some("llama3".into()),
            factor: 8.0,
            low_freq_factor: 1.0,
            high_freq_factor: 4.0,
            original_max_position_embeddings: Some(64),
        });
        let scaled = RotaryEmbedding::new(&config);
        assert_eq!(plain.inv_freq[0], scaled.inv_freq[0]);
        let last = plain.inv_freq.len() - 1;
        assert!(scaled.inv_freq[last] < plain.inv_freq[last]);
    }
}
