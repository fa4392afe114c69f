use crate::core::{Result, TokenId};

pub trait Tokenizer: Send + Sync {
    fn encode(&self, text: &str) -> Result<Vec<TokenId>> {
        self.encode_with_options(text, &EncodeOptions::default())
    }
    fn encode_with_options(&self, text: &str, options: &EncodeOptions) -> Result<Vec<TokenId>>;

    fn decode(&self, tokens: &[TokenId]) -> Result<String> {
        self.decode_with_options(tokens, &DecodeOptions::default())
    }
    fn decode_with_options(&self, tokens: &[TokenId], options: &DecodeOptions) -> Result<String>;

    fn vocab_size(&self) -> usize;
    fn bos_token(&self) -> Option<TokenId>;
    fn eos_token(&self) -> Option<TokenId>;

    fn token_to_id(&self, token: &str) -> Option<TokenId>;
    fn id_to_token(&self, id: TokenId) -> Option<&str>;
}

/// Encoding switches. The default adds no special tokens, which is what
/// every introspection route uses.
#[derive(Debug, Clone, Default)]
pub struct EncodeOptions {
    pub add_bos: bool,
    pub add_eos: bool,
    pub truncate: Option<usize>,
}

#[derive(Debug, Clone, Default)]
pub struct DecodeOptions {
    pub skip_special_tokens: bool,
}
