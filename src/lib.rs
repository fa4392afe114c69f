pub mod api;
pub mod app;
pub mod core;
pub mod envconfig;
pub mod error;
pub mod infra;
pub mod introspect;
pub mod middleware;

pub use core::{
    ForwardOptions, ForwardOutput, ModelConfig, ModelInfo, ModelProvider, ModelRegistry, Result,
    Tensor, TensorOps, TokenId, Tokenizer,
};
pub use error::WordWeaverError;
pub use introspect::Introspector;

pub use app::Server;
