// Database module
// SQLite holds documents, chunks and conversations; vector_index holds the embeddings

pub mod sqlite;
pub mod vector_index;

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::Result;
use crate::database::sqlite::models::{MessageRole, NewVectorIndexRecord};

pub use sqlite::*;

/// A chunk joined with the document fields needed for retrieval and citation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct ChunkContext {
    pub chunk_id: Uuid,
    pub document_id: Uuid,
    pub document_name: String,
    pub page_number: i64,
    pub text: String,
}

/// A single prior message of a conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct ConversationTurn {
    pub role: MessageRole,
    pub text: String,
}

/// The record store the retrieval pipeline reads from and writes conversation turns to.
///
/// An empty document filter means "no filter".
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Chunks eligible for indexing, ordered by document upload time then chunk index
    async fn chunks_for_build(&self, document_ids: Option<&[Uuid]>) -> Result<Vec<ChunkContext>>;

    /// Resolve chunk ids; ids without a record are absent from the result
    async fn get_chunks(&self, chunk_ids: &[Uuid]) -> Result<HashMap<Uuid, ChunkContext>>;

    /// The last `limit` turns in chronological order, or `None` for an unknown conversation
    async fn conversation_history(
        &self,
        conversation_id: Uuid,
        limit: usize,
    ) -> Result<Option<Vec<ConversationTurn>>>;

    async fn conversation_exists(&self, conversation_id: Uuid) -> Result<bool>;

    async fn create_conversation(&self, session_id: Option<&str>) -> Result<Uuid>;

    async fn append_message(
        &self,
        conversation_id: Uuid,
        role: MessageRole,
        content: &str,
        source_chunks: &[Uuid],
    ) -> Result<()>;

    /// Insert or overwrite the metadata row for an index name
    async fn upsert_index_record(&self, record: &NewVectorIndexRecord) -> Result<()>;
}

impl std::fmt::Debug for dyn RecordStore {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("RecordStore")
    }
}
