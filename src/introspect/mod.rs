//! Token-level introspection over one loaded model.
//!
//! [`Introspector`] owns the model and tokenizer for the life of the process
//! and answers the three operations the HTTP and CLI surfaces expose:
//! next-token sampling, embedding lookup and the internal-state snapshot.
//! Every forward pass goes through a single lock, so at most one inference
//! runs at a time.

pub mod embeddings;
pub mod positional;
pub mod sampler;
pub mod snapshot;
pub mod window;

pub use embeddings::EmbeddingRecord;
pub use sampler::{Candidate, Generation};
pub use snapshot::{Extraction, InternalSnapshot, Projection};
pub use window::{resolve_layer, window};

use crate::core::{ForwardOptions, ForwardOutput, ModelInfo, ModelProvider, Tokenizer, TokenId};
use crate::error::{Result, WordWeaverError};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::ops::Range;
use std::sync::Arc;
use tracing::debug;

pub const DEFAULT_TEMPERATURE: f32 = 1.0;
pub const DEFAULT_TOP_K: i64 = 8;
pub const DEFAULT_NUM_TOKENS: i64 = 3;
pub const DEFAULT_LAYER_INDEX: i64 = -1;

pub struct Introspector {
    model: Arc<dyn ModelProvider>,
    tokenizer: Arc<dyn Tokenizer>,
    inference: Mutex<()>,
}

impl Introspector {
    pub fn new(model: Arc<dyn ModelProvider>, tokenizer: Arc<dyn Tokenizer>) -> Self {
        Self {
            model,
            tokenizer,
            inference: Mutex::new(()),
        }
    }

    pub fn info(&self) -> &ModelInfo {
        self.model.info()
    }

    /// Token ids for `context`, without BOS/EOS.
    pub fn tokenize(&self, context: &str) -> Result<Vec<TokenId>> {
        self.tokenizer
            .encode(context)
            .map_err(|e| WordWeaverError::Tokenizer(format!("{:#}", e)))
    }

    pub fn decode_token(&self, id: TokenId) -> Result<String> {
        self.tokenizer
            .decode(&[id])
            .map_err(|e| WordWeaverError::Tokenizer(format!("{:#}", e)))
    }

    fn decode_each(&self, ids: &[TokenId]) -> Result<Vec<String>> {
        ids.iter().map(|&id| self.decode_token(id)).collect()
    }

    fn forward(&self, tokens: &[TokenId], options: ForwardOptions) -> Result<ForwardOutput> {
        let _guard = self.inference.lock();
        debug!("Forward pass over {} tokens ({:?})", tokens.len(), options);
        Ok(self.model.forward(tokens, options)?)
    }

    /// Sample the token following `context` and report the top-k view of
    /// the distribution it was drawn from.
    pub fn sample_next(
        &self,
        context: &str,
        temperature: f32,
        top_k: i64,
        seed: Option<u64>,
    ) -> Result<Generation> {
        let token_ids = self.tokenize(context)?;
        if token_ids.is_empty() {
            return Err(WordWeaverError::NoTokens);
        }

        let out = self.forward(&token_ids, ForwardOptions::logits_only())?;
        let probs = sampler::distribution(&out.logits, temperature)?;
        let top = sampler::top_candidates(&probs, top_k)?;

        let next_token_id = match seed {
            Some(seed) => sampler::draw(&probs, &mut StdRng::seed_from_u64(seed))?,
            None => sampler::draw(&probs, &mut rand::thread_rng())?,
        };

        let candidates = top
            .into_iter()
            .map(|(token_id, probability)| {
                Ok(Candidate {
                    token: self.decode_token(token_id)?,
                    token_id,
                    probability,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Generation {
            next_token: self.decode_token(next_token_id)?,
            next_token_id,
            candidates,
            token_ids,
        })
    }

    /// Embedding-table rows of the last `num_tokens` tokens. An empty context
    /// yields an empty list.
    pub fn get_embeddings(&self, context: &str, num_tokens: i64) -> Result<Vec<EmbeddingRecord>> {
        let token_ids = self.tokenize(context)?;
        let selected = &token_ids[window(num_tokens, token_ids.len())];
        if selected.is_empty() {
            return Ok(Vec::new());
        }
        let texts = self.decode_each(selected)?;

        let _guard = self.inference.lock();
        Ok(embeddings::lookup(self.model.as_ref(), selected, &texts)?)
    }

    /// One forward pass and every view of `layer_index` over the trailing
    /// `num_tokens` positions that can be extracted.
    pub fn internal_forward(
        &self,
        context: &str,
        num_tokens: i64,
        layer_index: i64,
    ) -> Result<InternalSnapshot> {
        let token_ids = self.tokenize(context)?;
        if token_ids.is_empty() {
            return Err(WordWeaverError::NoTokens);
        }

        let seq_len = token_ids.len();
        let span = window(num_tokens, seq_len);
        let selected = token_ids[span.clone()].to_vec();
        let texts = self.decode_each(&selected)?;
        let positions: Vec<usize> = span.clone().collect();

        let num_layers = self.model.info().num_layers;
        let layer = resolve_layer(layer_index, num_layers);
        if layer.is_none() {
            debug!("Layer index {} outside 0..{}", layer_index, num_layers);
        }

        let out = self.forward(&token_ids, ForwardOptions::everything())?;
        let views = self.extract_views(&out, layer, &span, &selected, &texts, &positions);

        Ok(InternalSnapshot {
            tokens_selected: texts,
            token_ids_selected: selected,
            positions_selected: positions,
            sequence_length: seq_len,
            num_layers,
            layer_index: layer,
            logits: Some(out.logits),
            hidden_states_selected: views.hidden.into_option("hidden_states_selected"),
            attention_matrix_selected: views.attention.into_option("attention_matrix_selected"),
            embeddings_selected: views.embeddings.into_option("embeddings_selected"),
            positional_selected: views.positional.into_option("positional_selected"),
            q_selected: views.q.into_option(Projection::Query.field()),
            k_selected: views.k.into_option(Projection::Key.field()),
            v_selected: views.v.into_option(Projection::Value.field()),
        })
    }

    fn extract_views(
        &self,
        out: &ForwardOutput,
        layer: Option<usize>,
        span: &Range<usize>,
        selected: &[TokenId],
        texts: &[String],
        positions: &[usize],
    ) -> Views {
        let model = self.model.as_ref();
        let _guard = self.inference.lock();

        let embeddings = Extraction::from_result(embeddings::lookup(model, selected, texts));
        let width = match &embeddings {
            Extraction::Available(records) => records
                .first()
                .map(|r| r.embedding.len())
                .unwrap_or(positional::DEFAULT_WIDTH),
            Extraction::Unavailable(_) => positional::DEFAULT_WIDTH,
        };
        let positional_rows = positional::sinusoidal_rows(positions, width);
        let embeddings = match embeddings {
            Extraction::Available(mut records) => {
                for (record, row) in records.iter_mut().zip(&positional_rows) {
                    record.position = Some(row.clone());
                }
                Extraction::Available(records)
            }
            unavailable => unavailable,
        };

        let project = |which| {
            Extraction::from_result(snapshot::projection_view(model, out, layer, span, which))
        };

        Views {
            hidden: Extraction::from_result(snapshot::hidden_view(out, layer, span)),
            attention: Extraction::from_result(snapshot::attention_view(out, layer, span)),
            embeddings,
            positional: Extraction::Available(positional_rows),
            q: project(Projection::Query),
            k: project(Projection::Key),
            v: project(Projection::Value),
        }
    }
}

struct Views {
    hidden: Extraction<snapshot::Matrix>,
    attention: Extraction<snapshot::Matrix>,
    embeddings: Extraction<Vec<EmbeddingRecord>>,
    positional: Extraction<snapshot::Matrix>,
    q: Extraction<snapshot::Matrix>,
    k: Extraction<snapshot::Matrix>,
    v: Extraction<snapshot::Matrix>,
}
