use std::time::Duration;

use thiserror::Error;
use uuid::Uuid;

pub type Result<T> = std::result::Result<T, RagError>;

#[derive(Error, Debug)]
pub enum RagError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Document processing error: {0}")]
    Document(String),

    #[error("No chunks available to build the index")]
    EmptyCorpus,

    #[error("Vector index unavailable: {0}")]
    IndexUnavailable(String),

    #[error("Vector index mapping corrupted: {0}")]
    MappingCorruption(String),

    #[error("Embedding backend unavailable: {0}")]
    EmbeddingUnavailable(String),

    #[error("Embedding timed out after {0:?}")]
    EmbeddingTimeout(Duration),

    #[error("Generation backend unavailable: {0}")]
    GenerationUnavailable(String),

    #[error("Generation timed out after {0:?}")]
    GenerationTimeout(Duration),

    #[error("Conversation not found: {0}")]
    ConversationNotFound(Uuid),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

impl RagError {
    /// True when the failure comes from an unreachable or misconfigured model backend,
    /// as opposed to missing data.
    #[inline]
    pub fn is_backend_unavailable(&self) -> bool {
        matches!(
            self,
            Self::EmbeddingUnavailable(_)
                | Self::EmbeddingTimeout(_)
                | Self::GenerationUnavailable(_)
                | Self::GenerationTimeout(_)
        )
    }
}

pub mod commands;
pub mod config;
pub mod database;
pub mod documents;
pub mod embeddings;
pub mod generation;
pub mod indexer;
pub mod rag;

#[cfg(test)]
pub(crate) mod test_support;
