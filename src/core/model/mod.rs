pub mod architectures;
pub mod config;
pub mod registry;
pub mod traits;

pub use config::{ModelConfig, RopeScaling};
pub use registry::ModelRegistry;
pub use traits::*;

use serde::{Deserialize, Serialize};

/// Vocabulary index of a single token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TokenId(pub u32);

impl TokenId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl From<u32> for TokenId {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for TokenId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
