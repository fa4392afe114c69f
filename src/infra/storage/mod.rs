use crate::core::Result;
use anyhow::Context;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::debug;

pub const CONFIG_FILE: &str = "config.json";
pub const TOKENIZER_FILE: &str = "tokenizer.json";
pub const SINGLE_WEIGHTS_FILE: &str = "model.safetensors";
pub const SHARD_INDEX_FILE: &str = "model.safetensors.index.json";

/// The files that make up one HuggingFace-layout checkpoint on disk.
#[derive(Debug, Clone)]
pub struct ModelFiles {
    pub root: PathBuf,
    pub config: PathBuf,
    pub tokenizer: PathBuf,
    pub weights: Vec<PathBuf>,
}

#[derive(Deserialize)]
struct ShardIndex {
    weight_map: HashMap<String, String>,
}

impl ModelFiles {
    pub fn resolve<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let root = dir.as_ref().to_path_buf();
        if !root.is_dir() {
            anyhow::bail!("model directory {} does not exist", root.display());
        }

        let config = root.join(CONFIG_FILE);
        if !config.is_file() {
            anyhow::bail!("{} is missing {}", root.display(), CONFIG_FILE);
        }
        let tokenizer = root.join(TOKENIZER_FILE);
        if !tokenizer.is_file() {
            anyhow::bail!("{} is missing {}", root.display(), TOKENIZER_FILE);
        }

        let weights = Self::weight_files(&root)?;
        debug!("Resolved {} weight file(s) in {}", weights.len(), root.display());

        Ok(Self {
            root,
            config,
            tokenizer,
            weights,
        })
    }

    fn weight_files(root: &Path) -> Result<Vec<PathBuf>> {
        let single = root.join(SINGLE_WEIGHTS_FILE);
        if single.is_file() {
            return Ok(vec![single]);
        }

        let index_path = root.join(SHARD_INDEX_FILE);
        if index_path.is_file() {
            let raw = std::fs::read_to_string(&index_path)
                .with_context(|| format!("failed to read {}", index_path.display()))?;
            let index: ShardIndex = serde_json::from_str(&raw)
                .with_context(|| format!("failed to parse {}", index_path.display()))?;

            let mut shards: Vec<String> = index.weight_map.into_values().collect();
            shards.sort();
            shards.dedup();

            let paths: Vec<PathBuf> = shards.iter().map(|s| root.join(s)).collect();
            if let Some(missing) = paths.iter().find(|p| !p.is_file()) {
                anyhow::bail!("shard {} listed in index is missing", missing.display());
            }
            return Ok(paths);
        }

        let mut found = Vec::new();
        for entry in std::fs::read_dir(root)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) == Some("safetensors") {
                found.push(path);
            }
        }
        if found.is_empty() {
            anyhow::bail!("no .safetensors weights found in {}", root.display());
        }
        found.sort();
        Ok(found)
    }

    /// Directory name, used as the model's display name.
    pub fn name(&self) -> String {
        self.root
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("model")
            .to_string()
    }

    /// Total element count across every tensor in the checkpoint, read from
    /// the safetensors headers.
    pub fn parameter_count(&self) -> Result<u64> {
        let mut total = 0u64;
        for path in &self.weights {
            let file = std::fs::File::open(path)
                .with_context(|| format!("failed to open {}", path.display()))?;
            let mmap = unsafe { memmap2::MmapOptions::new().map(&file)? };
            let tensors = safetensors::SafeTensors::deserialize(&mmap)
                .with_context(|| format!("invalid safetensors file {}", path.display()))?;
            total += tensors
                .tensors()
                .iter()
                .map(|(_, view)| view.shape().iter().product::<usize>() as u64)
                .sum::<u64>();
        }
        Ok(total)
    }
}

/// A directory holding one sub-directory per checkpoint.
pub struct ModelRepository {
    models_dir: PathBuf,
}

impl ModelRepository {
    pub fn new<P: AsRef<Path>>(models_dir: P) -> Self {
        Self {
            models_dir: models_dir.as_ref().to_path_buf(),
        }
    }

    pub fn default_models_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".wordweaver")
            .join("models")
    }

    /// Names of sub-directories that look like checkpoints.
    pub fn list(&self) -> Result<Vec<String>> {
        let mut models = Vec::new();

        if !self.models_dir.exists() {
            return Ok(models);
        }

        for entry in std::fs::read_dir(&self.models_dir)? {
            let path = entry?.path();
            if path.is_dir() && path.join(CONFIG_FILE).is_file() {
                if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                    models.push(name.to_string());
                }
            }
        }

        models.sort();
        Ok(models)
    }

    pub fn resolve(&self, name: &str) -> Result<ModelFiles> {
        ModelFiles::resolve(self.models_dir.join(name))
    }

    pub fn models_dir(&self) -> &Path {
        &self.models_dir
    }
}

impl Default for ModelRepository {
    fn default() -> Self {
        Self::new(Self::default_models_dir())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{Device, Tensor};

    fn write_checkpoint(dir: &Path, file: &str, names: &[(&str, &[usize])]) {
        let tensors: HashMap<String, Tensor> = names
            .iter()
            .map(|(name, shape)| (name.to_string(), Tensor::zeros(*shape, candle_core::DType::F32, &Device::Cpu).unwrap()))
            .collect();
        candle_core::safetensors::save(&tensors, dir.join(file)).unwrap();
    }

    fn write_metadata(dir: &Path) {
        std::fs::write(dir.join(CONFIG_FILE), "{}").unwrap();
        std::fs::write(dir.join(TOKENIZER_FILE), "{}").unwrap();
    }

    #[test]
    fn test_single_file_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        write_metadata(dir.path());
        write_checkpoint(dir.path(), SINGLE_WEIGHTS_FILE, &[("a", &[2, 3]), ("b", &[4])]);

        let files = ModelFiles::resolve(dir.path()).unwrap();
        assert_eq!(files.weights, vec![dir.path().join(SINGLE_WEIGHTS_FILE)]);
        assert_eq!(files.parameter_count().unwrap(), 10);
    }

    #[test]
    fn test_sharded_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        write_metadata(dir.path());
        write_checkpoint(dir.path(), "model-00001-of-00002.safetensors", &[("a", &[2, 2])]);
        write_checkpoint(dir.path(), "model-00002-of-00002.safetensors", &[("b", &[3])]);
        std::fs::write(
            dir.path().join(SHARD_INDEX_FILE),
            r#"{"metadata": {}, "weight_map": {
                "b": "model-00002-of-00002.safetensors",
                "a": "model-00001-of-00002.safetensors"
            }}"#,
        )
        .unwrap();

        let files = ModelFiles::resolve(dir.path()).unwrap();
        assert_eq!(files.weights.len(), 2);
        assert!(files.weights[0].ends_with("model-00001-of-00002.safetensors"));
        assert_eq!(files.parameter_count().unwrap(), 7);
    }

    #[test]
    fn test_missing_pieces_are_reported() {
        let dir = tempfile::tempdir().unwrap();
        assert!(ModelFiles::resolve(dir.path().join("nope")).is_err());

        std::fs::write(dir.path().join(CONFIG_FILE), "{}").unwrap();
        let err = ModelFiles::resolve(dir.path()).unwrap_err();
        assert!(err.to_string().contains(TOKENIZER_FILE));

        std::fs::write(dir.path().join(TOKENIZER_FILE), "{}").unwrap();
        assert!(ModelFiles::resolve(dir.path()).is_err());
    }

    #[test]
    fn test_repository_lists_checkpoints() {
        let dir = tempfile::tempdir().unwrap();
        let model = dir.path().join("tiny");
        std::fs::create_dir(&model).unwrap();
        write_metadata(&model);
        std::fs::create_dir(dir.path().join("not-a-model")).unwrap();

        let repo = ModelRepository::new(dir.path());
        assert_eq!(repo.list().unwrap(), vec!["tiny".to_string()]);
        assert!(repo.resolve("tiny").is_err());
    }
}
