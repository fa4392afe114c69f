pub mod storage;

pub use storage::{ModelFiles, ModelRepository};

use crate::core::model::{registry, ForwardOptions, ForwardOutput, HasAttentionProjections};
use crate::core::tokenizer::{load_tokenizer, BpeTokenizer};
use crate::core::{ModelConfig, ModelInfo, ModelProvider, Result, Tensor, TokenId, Tokenizer};
use crate::envconfig::{DTypePreference, DevicePreference};
use anyhow::Context;
use candle_core::Device;
use candle_nn::VarBuilder;
use tracing::{info, warn};

pub fn select_device(preference: DevicePreference) -> Result<Device> {
    let device = match preference {
        DevicePreference::Cpu => Device::Cpu,
        DevicePreference::Cuda => Device::new_cuda(0)?,
        DevicePreference::Metal => Device::new_metal(0)?,
        DevicePreference::Auto => {
            if candle_core::utils::cuda_is_available() {
                Device::new_cuda(0)?
            } else if candle_core::utils::metal_is_available() {
                Device::new_metal(0)?
            } else {
                Device::Cpu
            }
        }
    };
    Ok(device)
}

/// A provider built by the registry, carrying the identity read from disk.
pub struct LoadedModel {
    inner: Box<dyn ModelProvider>,
    info: ModelInfo,
}

impl LoadedModel {
    pub fn new(inner: Box<dyn ModelProvider>, name: String, parameter_count: Option<u64>) -> Self {
        let mut info = inner.info().clone();
        info.name = name;
        info.parameter_count = parameter_count;
        Self { inner, info }
    }
}

impl ModelProvider for LoadedModel {
    fn info(&self) -> &ModelInfo {
        &self.info
    }

    fn forward(&self, tokens: &[TokenId], options: ForwardOptions) -> Result<ForwardOutput> {
        self.inner.forward(tokens, options)
    }

    fn embedding_rows(&self, tokens: &[TokenId]) -> Result<Tensor> {
        self.inner.embedding_rows(tokens)
    }

    fn attention_projections(&self) -> Option<&dyn HasAttentionProjections> {
        self.inner.attention_projections()
    }
}

/// Load the model and tokenizer found in `files`.
pub fn load(
    files: &ModelFiles,
    device: DevicePreference,
    dtype: DTypePreference,
) -> Result<(LoadedModel, BpeTokenizer)> {
    let device = select_device(device)?;
    let dtype = dtype.to_candle();
    info!("Loading {} on {:?} as {:?}", files.root.display(), device, dtype);

    let config = ModelConfig::from_file(&files.config)
        .with_context(|| format!("failed to read {}", files.config.display()))?;
    let tokenizer = load_tokenizer(&files.tokenizer)?;
    if tokenizer.vocab_size() > config.vocab_size {
        warn!(
            "Tokenizer has {} entries but the model only {} embeddings",
            tokenizer.vocab_size(),
            config.vocab_size
        );
    }

    let vb = unsafe { VarBuilder::from_mmaped_safetensors(&files.weights, dtype, &device)? };
    let provider = registry::create(&config, vb)?;

    let parameter_count = match files.parameter_count() {
        Ok(n) => Some(n),
        Err(e) => {
            warn!("Could not count parameters: {:#}", e);
            None
        }
    };
    let model = LoadedModel::new(provider, files.name(), parameter_count);

    info!(
        "Model ready: {} ({} layers, vocab {})",
        model.info().name,
        model.info().num_layers,
        model.info().vocab_size
    );
    Ok((model, tokenizer))
}
