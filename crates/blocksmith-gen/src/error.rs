use blocksmith_core::StoreError;
use thiserror::Error;

/// Fatal failures of a generation request.
#[derive(Debug, Error)]
pub enum GenerateError {
    #[error("AI provider is not configured")]
    NotConfigured,

    #[error("unknown provider: {0}")]
    UnknownProvider(String),

    #[error("build LLM: {0}")]
    Build(String),

    #[error("chat: {0}")]
    Chat(String),

    #[error("LLM returned empty text")]
    EmptyResponse,

    #[error("no JSON object in model output")]
    NoJson,

    #[error("invalid JSON from model: {0}")]
    InvalidJson(#[from] serde_json::Error),
}

/// Failures while looking up example diagrams. Never fatal to a generation.
#[derive(Debug, Error)]
pub enum RetrieveError {
    #[error("unknown provider: {0}")]
    UnknownProvider(String),

    #[error("embedding: {0}")]
    Embedding(String),

    #[error("embedding service returned no vector")]
    EmptyEmbedding,

    #[error(transparent)]
    Store(#[from] StoreError),
}
