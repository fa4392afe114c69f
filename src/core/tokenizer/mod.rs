pub mod bpe;
pub mod traits;

pub use bpe::{BpeTokenizer, METASPACE};
pub use traits::{DecodeOptions, EncodeOptions, Tokenizer};

use crate::core::{Result, TokenId};
use anyhow::Context;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

const BOS_CANDIDATES: &[&str] = &["<|begin_of_text|>", "<s>", "<|startoftext|>"];
const EOS_CANDIDATES: &[&str] = &["<|end_of_text|>", "<|endoftext|>", "</s>", "<|im_end|>"];

/// A token that bypasses BPE and is matched verbatim in the input.
#[derive(Debug, Clone, Deserialize)]
pub struct AddedToken {
    pub id: u32,
    pub content: String,
    #[serde(default)]
    pub special: bool,
}

/// How raw text is mapped onto the symbols the merges operate on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PieceEncoding {
    /// GPT-2 style: bytes remapped to printable characters, regex pre-split.
    #[default]
    ByteLevel,
    /// SentencePiece style: spaces become `▁`, with a `▁` prepended, and
    /// unknown characters may fall back to `<0xNN>` byte tokens.
    Metaspace,
}

#[derive(Debug, Clone)]
pub struct Vocabulary {
    /// Token strings indexed by id. Ids absent from the file map to `""`.
    pub tokens: Vec<String>,
    pub merges: Vec<(String, String)>,
    pub added_tokens: Vec<AddedToken>,
    pub ignore_merges: bool,
    pub encoding: PieceEncoding,
    pub byte_fallback: bool,
    pub bos_token: Option<TokenId>,
    pub eos_token: Option<TokenId>,
}

#[derive(Deserialize)]
struct TokenizerFile {
    #[serde(default)]
    added_tokens: Vec<AddedToken>,
    #[serde(default)]
    normalizer: Option<serde_json::Value>,
    #[serde(default)]
    pre_tokenizer: Option<serde_json::Value>,
    model: BpeSection,
}

#[derive(Deserialize)]
struct BpeSection {
    #[serde(rename = "type", default)]
    kind: Option<String>,
    vocab: HashMap<String, u32>,
    #[serde(default)]
    merges: Vec<MergeEntry>,
    #[serde(default)]
    ignore_merges: bool,
    #[serde(default)]
    byte_fallback: bool,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum MergeEntry {
    Joined(String),
    Pair(String, String),
}

impl Vocabulary {
    pub fn new(tokens: Vec<String>) -> Self {
        Self {
            tokens,
            merges: Vec::new(),
            added_tokens: Vec::new(),
            ignore_merges: false,
            encoding: PieceEncoding::ByteLevel,
            byte_fallback: false,
            bos_token: None,
            eos_token: None,
        }
    }

    pub fn with_merges(mut self, merges: Vec<(String, String)>) -> Self {
        self.merges = merges;
        self
    }

    pub fn from_tokenizer_json(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Self::from_json_str(&raw).with_context(|| format!("failed to parse {}", path.display()))
    }

    pub fn from_json_str(raw: &str) -> Result<Self> {
        let file: TokenizerFile = serde_json::from_str(raw)?;
        if let Some(kind) = file.model.kind.as_deref() {
            if kind != "BPE" {
                anyhow::bail!("unsupported tokenizer model type: {}", kind);
            }
        }

        let max_id = file
            .model
            .vocab
            .values()
            .chain(file.added_tokens.iter().map(|t| &t.id))
            .copied()
            .max();
        let mut tokens = vec![String::new(); max_id.map(|m| m as usize + 1).unwrap_or(0)];
        for (token, id) in file.model.vocab {
            tokens[id as usize] = token;
        }
        for added in &file.added_tokens {
            tokens[added.id as usize] = added.content.clone();
        }

        let merges = file
            .model
            .merges
            .into_iter()
            .filter_map(|entry| match entry {
                MergeEntry::Pair(a, b) => Some((a, b)),
                MergeEntry::Joined(s) => s
                    .split_once(' ')
                    .map(|(a, b)| (a.to_string(), b.to_string())),
            })
            .collect();

        let find = |names: &[&str]| {
            names.iter().find_map(|name| {
                file.added_tokens
                    .iter()
                    .find(|t| t.content == *name)
                    .map(|t| TokenId(t.id))
            })
        };
        let bos_token = find(BOS_CANDIDATES);
        let eos_token = find(EOS_CANDIDATES);

        let encoding = if file.model.byte_fallback
            || mentions_metaspace(file.normalizer.as_ref())
            || mentions_metaspace(file.pre_tokenizer.as_ref())
        {
            PieceEncoding::Metaspace
        } else {
            PieceEncoding::ByteLevel
        };

        Ok(Self {
            tokens,
            merges,
            added_tokens: file.added_tokens,
            ignore_merges: file.model.ignore_merges,
            encoding,
            byte_fallback: file.model.byte_fallback,
            bos_token,
            eos_token,
        })
    }

    pub fn size(&self) -> usize {
        self.tokens.len()
    }

    pub fn token(&self, id: TokenId) -> Option<&str> {
        self.tokens.get(id.index()).map(|s| s.as_str())
    }
}

/// A `Metaspace` pre-tokenizer, or a `Prepend`/`Replace` normalizer that
/// introduces `▁`, anywhere in the (possibly nested `Sequence`) config.
fn mentions_metaspace(node: Option<&serde_json::Value>) -> bool {
    match node {
        Some(serde_json::Value::Object(map)) => map.iter().any(|(key, value)| match value {
            serde_json::Value::String(s) => {
                (key == "type" && s == "Metaspace") || s.contains(METASPACE)
            }
            other => mentions_metaspace(Some(other)),
        }),
        Some(serde_json::Value::Array(items)) => items.iter().any(|v| mentions_metaspace(Some(v))),
        _ => false,
    }
}

/// Load a BPE tokenizer (byte-level or SentencePiece style) from a
/// HuggingFace `tokenizer.json`.
pub fn load_tokenizer(path: &Path) -> Result<BpeTokenizer> {
    BpeTokenizer::new(Vocabulary::from_tokenizer_json(path)?)
}
