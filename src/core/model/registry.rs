use super::architectures::llama::LlamaModel;
use super::config::ModelConfig;
use super::traits::ModelProvider;
use crate::core::Result;
use candle_nn::VarBuilder;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

pub type ModelCreator =
    Arc<dyn Fn(&ModelConfig, VarBuilder<'static>) -> Result<Box<dyn ModelProvider>> + Send + Sync>;

/// Maps architecture names from `config.json` to adapter constructors.
pub struct ModelRegistry {
    architectures: RwLock<HashMap<String, ModelCreator>>,
    aliases: RwLock<HashMap<String, String>>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self {
            architectures: RwLock::new(HashMap::new()),
            aliases: RwLock::new(HashMap::new()),
        }
    }

    /// Registry preloaded with every adapter shipped in this crate.
    pub fn with_defaults() -> Self {
        let registry = Self::new();

        registry.register("llama", |config, vb| {
            Ok(Box::new(LlamaModel::load(config, vb)?))
        });
        registry.register("mistral", |config, vb| {
            Ok(Box::new(LlamaModel::load(config, vb)?))
        });
        registry.register("qwen2", |config, vb| {
            // Qwen2 checkpoints carry Q/K/V biases without declaring them.
            let mut config = config.clone();
            config.attention_bias.get_or_insert(true);
            Ok(Box::new(LlamaModel::load(&config, vb)?))
        });

        registry.register_alias("LlamaForCausalLM", "llama");
        registry.register_alias("MistralForCausalLM", "mistral");
        registry.register_alias("Qwen2ForCausalLM", "qwen2");
        registry
    }

    pub fn register<N, F>(&self, name: N, creator: F)
    where
        N: Into<String>,
        F: Fn(&ModelConfig, VarBuilder<'static>) -> Result<Box<dyn ModelProvider>> + Send + Sync + 'static,
    {
        let creator = Arc::new(creator) as ModelCreator;
        self.architectures.write().insert(name.into(), creator);
    }

    pub fn register_alias<A, T>(&self, alias: A, target: T)
    where
        A: Into<String>,
        T: Into<String>,
    {
        self.aliases.write().insert(alias.into(), target.into());
    }

    pub fn get(&self, name: &str) -> Option<ModelCreator> {
        let architectures = self.architectures.read();

        if let Some(creator) = architectures.get(name) {
            return Some(Arc::clone(creator));
        }

        let aliases = self.aliases.read();
        if let Some(target) = aliases.get(name) {
            return architectures.get(target).map(Arc::clone);
        }

        None
    }

    pub fn create(&self, config: &ModelConfig, vb: VarBuilder<'static>) -> Result<Box<dyn ModelProvider>> {
        let arch = config.architecture();

        let creator = self
            .get(arch)
            .or_else(|| config.architectures.iter().find_map(|a| self.get(a)))
            .ok_or_else(|| anyhow::anyhow!("Unsupported architecture: {}", arch))?;

        creator(config, vb)
    }

    pub fn architectures(&self) -> Vec<String> {
        let mut names: Vec<String> = self.architectures.read().keys().cloned().collect();
        names.sort();
        names
    }
}

impl Default for ModelRegistry {
    fn default() -> Self {
        Self::new()
    }
}

pub static REGISTRY: once_cell::sync::Lazy<ModelRegistry> =
    once_cell::sync::Lazy::new(ModelRegistry::with_defaults);

pub fn create(config: &ModelConfig, vb: VarBuilder<'static>) -> Result<Box<dyn ModelProvider>> {
    REGISTRY.create(config, vb)
}

pub fn architectures() -> Vec<String> {
    REGISTRY.architectures()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry() {
        let registry = ModelRegistry::new();

        registry.register("test", |_config, _vb| anyhow::bail!("not loadable"));
        registry.register_alias("test-alias", "test");

        assert!(registry.get("test").is_some());
        assert!(registry.get("test-alias").is_some());
        assert!(registry.get("unknown").is_none());
    }

    #[test]
    fn test_default_registry_knows_llama_family() {
        let names = architectures();
        assert_eq!(names, vec!["llama", "mistral", "qwen2"]);
        assert!(REGISTRY.get("Qwen2ForCausalLM").is_some());
    }

    #[test]
    fn test_unknown_architecture_is_rejected() {
        let config = ModelConfig::builder().model_type("gpt_neox").build();
        let vb = VarBuilder::zeros(candle_core::DType::F32, &candle_core::Device::Cpu);
        let err = REGISTRY.create(&config, vb).err().unwrap();
        assert!(err.to_string().contains("gpt_neox"));
    }
}
