pub mod llama;

pub use llama::LlamaModel;
