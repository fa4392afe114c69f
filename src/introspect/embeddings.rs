use crate::core::{ModelProvider, Result, TokenId};
use serde::Serialize;

/// One token's static input-embedding vector.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EmbeddingRecord {
    pub token: String,
    pub token_id: TokenId,
    pub embedding: Vec<f32>,
    /// Sinusoidal encoding of the token's absolute position, attached by
    /// snapshots only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<Vec<f32>>,
}

/// Embedding-table rows for `ids`, paired with their surface text.
pub fn lookup(model: &dyn ModelProvider, ids: &[TokenId], texts: &[String]) -> Result<Vec<EmbeddingRecord>> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }
    if ids.len() != texts.len() {
        anyhow::bail!("{} token ids but {} token texts", ids.len(), texts.len());
    }

    let rows = model.embedding_rows(ids)?.to_rows()?;
    if rows.len() != ids.len() {
        anyhow::bail!("embedding lookup returned {} rows for {} tokens", rows.len(), ids.len());
    }

    Ok(ids
        .iter()
        .zip(texts)
        .zip(rows)
        .map(|((&token_id, token), embedding)| EmbeddingRecord {
            token: token.clone(),
            token_id,
            embedding,
            position: None,
        })
        .collect())
}
