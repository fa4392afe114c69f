use super::traits::{DecodeOptions, EncodeOptions, Tokenizer};
use super::{PieceEncoding, Vocabulary};
use crate::core::{Result, TokenId};
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// Word-boundary marker of SentencePiece vocabularies.
pub const METASPACE: char = '▁';

const PRETOKENIZE_PATTERN: &str = r"(?i:'s|'t|'re|'ve|'m|'ll|'d)|[^\r\n\p{L}\p{N}]?\p{L}+|\p{N}{1,3}| ?[^\s\p{L}\p{N}]+[\r\n]*|\s*[\r\n]+|\s+(?!\S)|\s+";

enum Segment<'t> {
    Text(&'t str),
    Added(TokenId),
}

pub struct BpeTokenizer {
    vocab: Vocabulary,
    encoder: HashMap<String, TokenId>,
    bpe_ranks: HashMap<(String, String), usize>,
    byte_encoder: HashMap<u8, char>,
    byte_decoder: HashMap<char, u8>,
    /// Added token contents, longest first so overlapping matches prefer the
    /// longer token.
    added: Vec<(String, TokenId)>,
    special: HashSet<TokenId>,
    /// `<0xNN>` fallback tokens, indexed by byte value.
    byte_tokens: Vec<Option<TokenId>>,
    byte_values: HashMap<TokenId, u8>,
    pattern: fancy_regex::Regex,
}

impl BpeTokenizer {
    pub fn new(vocab: Vocabulary) -> Result<Self> {
        let byte_encoder = Self::build_byte_encoder();
        let byte_decoder: HashMap<char, u8> = byte_encoder.iter().map(|(&k, &v)| (v, k)).collect();

        let mut encoder = HashMap::new();
        for (i, token) in vocab.tokens.iter().enumerate() {
            if !token.is_empty() {
                encoder.insert(token.clone(), TokenId(i as u32));
            }
        }

        let bpe_ranks = vocab
            .merges
            .iter()
            .enumerate()
            .map(|(rank, pair)| (pair.clone(), rank))
            .collect();

        let mut added: Vec<(String, TokenId)> = vocab
            .added_tokens
            .iter()
            .filter(|t| !t.content.is_empty())
            .map(|t| (t.content.clone(), TokenId(t.id)))
            .collect();
        added.sort_by(|a, b| b.0.len().cmp(&a.0.len()));
        let special = vocab
            .added_tokens
            .iter()
            .filter(|t| t.special)
            .map(|t| TokenId(t.id))
            .collect();

        let byte_tokens: Vec<Option<TokenId>> = (0..=255u8)
            .map(|b| {
                vocab
                    .byte_fallback
                    .then(|| encoder.get(&format!("<0x{:02X}>", b)).copied())
                    .flatten()
            })
            .collect();
        let byte_values = byte_tokens
            .iter()
            .enumerate()
            .filter_map(|(b, id)| id.map(|id| (id, b as u8)))
            .collect();

        let pattern = fancy_regex::Regex::new(PRETOKENIZE_PATTERN)?;

        debug!(
            "BPE tokenizer ({:?}): {} tokens, {} merges, {} added",
            vocab.encoding,
            vocab.size(),
            vocab.merges.len(),
            added.len()
        );

        Ok(Self {
            vocab,
            encoder,
            bpe_ranks,
            byte_encoder,
            byte_decoder,
            added,
            special,
            byte_tokens,
            byte_values,
            pattern,
        })
    }

    /// GPT-2 byte-to-unicode table: printable bytes map to themselves, the
    /// rest are shifted above U+0100.
    fn build_byte_encoder() -> HashMap<u8, char> {
        let mut mapping = HashMap::new();
        let printable = (b'!'..=b'~').chain(0xA1..=0xAC).chain(0xAE..=0xFF);
        for b in printable {
            mapping.insert(b, char::from(b));
        }

        let mut offset: u32 = 256;
        for b in 0..=255u8 {
            if let std::collections::hash_map::Entry::Vacant(e) = mapping.entry(b) {
                e.insert(char::from_u32(offset).unwrap_or(char::REPLACEMENT_CHARACTER));
                offset += 1;
            }
        }

        mapping
    }

    fn get_pairs(word: &[String]) -> Vec<(String, String)> {
        word.windows(2)
            .map(|w| (w[0].clone(), w[1].clone()))
            .collect()
    }

    fn bpe(&self, token: &str) -> Vec<String> {
        let mut word: Vec<String> = token.chars().map(|c| c.to_string()).collect();

        loop {
            let pairs = Self::get_pairs(&word);
            if pairs.is_empty() {
                break;
            }

            let bigram = pairs
                .iter()
                .filter_map(|pair| self.bpe_ranks.get(pair).map(|&rank| (pair, rank)))
                .min_by_key(|(_, rank)| *rank)
                .map(|(pair, _)| pair.clone());

            let bigram = match bigram {
                Some(b) => b,
                None => break,
            };

            let mut new_word = Vec::with_capacity(word.len());
            let mut i = 0;
            while i < word.len() {
                if i + 1 < word.len() && word[i] == bigram.0 && word[i + 1] == bigram.1 {
                    new_word.push(format!("{}{}", word[i], word[i + 1]));
                    i += 2;
                } else {
                    new_word.push(word[i].clone());
                    i += 1;
                }
            }
            word = new_word;
        }
        word
    }

    fn byte_encode(&self, text: &str) -> String {
        text.bytes().filter_map(|b| self.byte_encoder.get(&b)).collect()
    }

    /// Split `text` around verbatim occurrences of added tokens.
    fn split_added<'t>(&self, text: &'t str) -> Vec<Segment<'t>> {
        if self.added.is_empty() {
            return vec![Segment::Text(text)];
        }

        let mut segments = Vec::new();
        let mut start = 0;
        let mut pos = 0;
        while pos < text.len() {
            let rest = &text[pos..];
            match self.added.iter().find(|(content, _)| rest.starts_with(content.as_str())) {
                Some((content, id)) => {
                    if start < pos {
                        segments.push(Segment::Text(&text[start..pos]));
                    }
                    segments.push(Segment::Added(*id));
                    pos += content.len();
                    start = pos;
                }
                None => {
                    pos += rest.chars().next().map(char::len_utf8).unwrap_or(1);
                }
            }
        }
        if start < text.len() {
            segments.push(Segment::Text(&text[start..]));
        }
        segments
    }

    /// Look up every symbol of a merged word, failing on the first one the
    /// vocabulary cannot represent.
    fn push_symbols(&self, symbols: Vec<String>, out: &mut Vec<TokenId>) -> Result<()> {
        for symbol in symbols {
            if let Some(&id) = self.encoder.get(&symbol) {
                out.push(id);
                continue;
            }
            if !self.vocab.byte_fallback {
                anyhow::bail!("piece {:?} is not in the vocabulary", symbol);
            }
            for b in symbol.bytes() {
                match self.byte_tokens[b as usize] {
                    Some(id) => out.push(id),
                    None => anyhow::bail!("no byte fallback token for 0x{:02X} in {:?}", b, symbol),
                }
            }
        }
        Ok(())
    }

    fn encode_word(&self, word: &str, out: &mut Vec<TokenId>) -> Result<()> {
        if self.vocab.ignore_merges {
            if let Some(&id) = self.encoder.get(word) {
                out.push(id);
                return Ok(());
            }
        }
        self.push_symbols(self.bpe(word), out)
    }

    fn encode_chunk(&self, chunk: &str, out: &mut Vec<TokenId>) -> Result<()> {
        match self.vocab.encoding {
            PieceEncoding::ByteLevel => {
                for m in self.pattern.find_iter(chunk) {
                    self.encode_word(&self.byte_encode(m?.as_str()), out)?;
                }
                Ok(())
            }
            PieceEncoding::Metaspace => {
                let mut normalized = String::with_capacity(chunk.len() + 3);
                normalized.push(METASPACE);
                normalized.extend(chunk.chars().map(|c| if c == ' ' { METASPACE } else { c }));
                self.encode_word(&normalized, out)
            }
        }
    }

    fn token_bytes(&self, id: TokenId, out: &mut Vec<u8>) {
        let Some(token) = self.vocab.token(id) else {
            return;
        };
        if self.added.iter().any(|(_, added)| *added == id) {
            out.extend_from_slice(token.as_bytes());
            return;
        }
        if let Some(&b) = self.byte_values.get(&id) {
            out.push(b);
            return;
        }
        match self.vocab.encoding {
            PieceEncoding::ByteLevel => {
                for c in token.chars() {
                    match self.byte_decoder.get(&c) {
                        Some(&b) => out.push(b),
                        None => {
                            let mut buf = [0u8; 4];
                            out.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
                        }
                    }
                }
            }
            PieceEncoding::Metaspace => {
                out.extend_from_slice(token.replace(METASPACE, " ").as_bytes());
            }
        }
    }
}

impl Tokenizer for BpeTokenizer {
    fn encode_with_options(&self, text: &str, options: &EncodeOptions) -> Result<Vec<TokenId>> {
        let mut tokens = Vec::new();

        if options.add_bos {
            if let Some(bos) = self.vocab.bos_token {
                tokens.push(bos);
            }
        }

        for segment in self.split_added(text) {
            match segment {
                Segment::Added(id) => tokens.push(id),
                Segment::Text(chunk) => self.encode_chunk(chunk, &mut tokens)?,
            }
        }

        if options.add_eos {
            if let Some(eos) = self.vocab.eos_token {
                tokens.push(eos);
            }
        }

        if let Some(max_len) = options.truncate {
            tokens.truncate(max_len);
        }

        Ok(tokens)
    }

    fn decode_with_options(&self, tokens: &[TokenId], options: &DecodeOptions) -> Result<String> {
        let mut bytes = Vec::new();
        for &token in tokens {
            if options.skip_special_tokens && self.special.contains(&token) {
                continue;
            }
            self.token_bytes(token, &mut bytes);
        }
        if self.vocab.encoding == PieceEncoding::Metaspace && bytes.first() == Some(&b' ') {
            bytes.remove(0);
        }
        // A lone token may hold part of a multi-byte character.
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    fn vocab_size(&self) -> usize {
        self.vocab.size()
    }

    fn bos_token(&self) -> Option<TokenId> {
        self.vocab.bos_token
    }

    fn eos_token(&self) -> Option<TokenId> {
        self.vocab.eos_token
    }

    fn token_to_id(&self, token: &str) -> Option<TokenId> {
        self.encoder.get(token).copied()
    }

    fn id_to_token(&self, id: TokenId) -> Option<&str> {
        self.vocab.token(id).filter(|t| !t.is_empty())
    }
}
