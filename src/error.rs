use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::error;

#[derive(Debug, Error)]
pub enum WordWeaverError {
    #[error("context produced no tokens")]
    NoTokens,
    #[error("tokenizer error: {0}")]
    Tokenizer(String),
    #[error("inference failed: {0:#}")]
    Inference(#[from] anyhow::Error),
    #[error("inference task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

pub type Result<T> = std::result::Result<T, WordWeaverError>;

impl WordWeaverError {
    /// Stable machine-readable kind, sent as `code` in error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NoTokens => "no_tokens",
            Self::Tokenizer(_) => "tokenizer_error",
            Self::Inference(_) => "inference_error",
            Self::Join(_) => "internal_error",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::NoTokens => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// JSON body of every failed request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub code: String,
}

impl From<&WordWeaverError> for ErrorBody {
    fn from(err: &WordWeaverError) -> Self {
        Self {
            error: err.to_string(),
            code: err.code().to_string(),
        }
    }
}

impl IntoResponse for WordWeaverError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("Request failed: {}", self);
        }
        (status, Json(ErrorBody::from(&self))).into_response()
    }
}
