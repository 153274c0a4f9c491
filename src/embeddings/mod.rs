// Text chunking, embedding backends and the shared embedding service

pub mod chunking;
pub mod embedder;
pub mod ollama;

pub use chunking::{
    ChunkingConfig, ContentChunk, PageText, TextSpan, chunk_pages, estimate_token_count,
    split_text,
};
pub use embedder::{Embedder, EmbeddingBackend};
pub use ollama::OllamaClient;
