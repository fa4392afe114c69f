pub mod model;
pub mod tensor;
pub mod tokenizer;

pub use model::{
    ForwardOptions, ForwardOutput, ModelConfig, ModelInfo, ModelProvider, ModelRegistry, TokenId,
};
pub use tensor::{Shape, Tensor, TensorOps};
pub use tokenizer::Tokenizer;

pub type Result<T> = anyhow::Result<T>;
