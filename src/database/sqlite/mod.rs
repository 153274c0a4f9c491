use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use tracing::{debug, info};
use uuid::Uuid;

use crate::RagError;
use crate::database::sqlite::models::{
    Chunk, Conversation, Document, DocumentSummary, Message, MessageRole, NewChunk, NewDocument,
    NewVectorIndexRecord, ProcessingStatus, VectorIndexRecord,
};
use crate::database::sqlite::queries::{
    ChunkQueries, ConversationQueries, DocumentQueries, MessageQueries, VectorIndexQueries,
};
use crate::database::{ChunkContext, ConversationTurn, RecordStore};


pub mod models;
pub mod queries;

pub type DbPool = Pool<Sqlite>;

#[derive(Debug, Clone)]
pub struct Database {
    pool: DbPool,
}

impl Database {
    #[inline]
    pub async fn new<P: AsRef<Path>>(database_path: P) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(database_path)
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(10)
            .connect_with(options)
            .await
            .context("Failed to create database connection pool")?;

        let database = Self { pool };
        database.run_migrations().await?;

        Ok(database)
    }

    #[inline]
    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    #[inline]
    pub async fn run_migrations(&self) -> Result<()> {
        info!("Running database migrations");

        sqlx::migrate!("src/database/sqlite/migrations")
            .run(&self.pool)
            .await
            .context("Failed to run schema migration")?;

        debug!("Database migrations completed successfully");
        Ok(())
    }

    #[inline]
    pub async fn initialize_from_config_dir(config_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(config_dir).with_context(|| {
            format!(
                "Failed to create config directory: {}",
                config_dir.display()
            )
        })?;

        Self::new(config_dir.join("metadata.db")).await
    }

    // Document operations
    #[inline]
    pub async fn create_document(&self, document: NewDocument) -> Result<Document> {
        DocumentQueries::create(&self.pool, document).await
    }

    #[inline]
    pub async fn get_document(&self, id: Uuid) -> Result<Option<Document>> {
        DocumentQueries::get_by_id(&self.pool, id).await
    }

    #[inline]
    pub async fn find_documents_by_name(&self, name: &str) -> Result<Vec<Document>> {
        DocumentQueries::get_by_original_filename(&self.pool, name).await
    }

    #[inline]
    pub async fn list_documents(&self) -> Result<Vec<DocumentSummary>> {
        DocumentQueries::list_all(&self.pool).await
    }

    #[inline]
    pub async fn documents_by_status(&self, status: ProcessingStatus) -> Result<Vec<Document>> {
        DocumentQueries::list_by_status(&self.pool, status).await
    }

    #[inline]
    pub async fn set_document_status(
        &self,
        id: Uuid,
        status: ProcessingStatus,
        error: Option<&str>,
        page_count: Option<i64>,
    ) -> Result<bool> {
        DocumentQueries::set_status(&self.pool, id, status, error, page_count).await
    }

    #[inline]
    pub async fn delete_document(&self, id: Uuid) -> Result<bool> {
        DocumentQueries::delete(&self.pool, id).await
    }

    // Chunk operations
    #[inline]
    pub async fn replace_chunks(&self, document_id: Uuid, chunks: &[NewChunk]) -> Result<usize> {
        ChunkQueries::replace_for_document(&self.pool, document_id, chunks).await
    }

    #[inline]
    pub async fn chunks_for_document(&self, document_id: Uuid) -> Result<Vec<Chunk>> {
        ChunkQueries::list_by_document(&self.pool, document_id).await
    }

    #[inline]
    pub async fn count_chunks(&self) -> Result<i64> {
        ChunkQueries::count_all(&self.pool).await
    }

    #[inline]
    pub async fn all_chunk_ids(&self) -> Result<Vec<Uuid>> {
        ChunkQueries::all_ids(&self.pool).await
    }

    // Conversation operations
    #[inline]
    pub async fn get_conversation(&self, id: Uuid) -> Result<Option<Conversation>> {
        ConversationQueries::get_by_id(&self.pool, id).await
    }

    #[inline]
    pub async fn recent_conversations(&self, limit: i64) -> Result<Vec<Conversation>> {
        ConversationQueries::list_recent(&self.pool, limit).await
    }

    #[inline]
    pub async fn conversation_messages(&self, id: Uuid, limit: i64) -> Result<Vec<Message>> {
        MessageQueries::recent(&self.pool, id, limit).await
    }

    // Vector index metadata
    #[inline]
    pub async fn get_index_record(&self, name: &str) -> Result<Option<VectorIndexRecord>> {
        VectorIndexQueries::get_by_name(&self.pool, name).await
    }
}

fn store_error(error: anyhow::Error) -> RagError {
    RagError::Database(format!("{error:#}"))
}

#[async_trait]
impl RecordStore for Database {
    async fn chunks_for_build(
        &self,
        document_ids: Option<&[Uuid]>,
    ) -> crate::Result<Vec<ChunkContext>> {
        ChunkQueries::contexts_for_build(&self.pool, document_ids)
            .await
            .map_err(store_error)
    }

    async fn get_chunks(&self, chunk_ids: &[Uuid]) -> crate::Result<HashMap<Uuid, ChunkContext>> {
        let contexts = ChunkQueries::contexts_by_ids(&self.pool, chunk_ids)
            .await
            .map_err(store_error)?;

        Ok(contexts.into_iter().map(|c| (c.chunk_id, c)).collect())
    }

    async fn conversation_history(
        &self,
        conversation_id: Uuid,
        limit: usize,
    ) -> crate::Result<Option<Vec<ConversationTurn>>> {
        if !self.conversation_exists(conversation_id).await? {
            return Ok(None);
        }

        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let turns = MessageQueries::recent_turns(&self.pool, conversation_id, limit)
            .await
            .map_err(store_error)?;

        Ok(Some(turns))
    }

    async fn conversation_exists(&self, conversation_id: Uuid) -> crate::Result<bool> {
        let conversation = ConversationQueries::get_by_id(&self.pool, conversation_id)
            .await
            .map_err(store_error)?;

        Ok(conversation.is_some())
    }

    async fn create_conversation(&self, session_id: Option<&str>) -> crate::Result<Uuid> {
        let conversation = ConversationQueries::create(&self.pool, session_id)
            .await
            .map_err(store_error)?;

        Ok(conversation.id)
    }

    async fn append_message(
        &self,
        conversation_id: Uuid,
        role: MessageRole,
        content: &str,
        source_chunks: &[Uuid],
    ) -> crate::Result<()> {
        MessageQueries::append(&self.pool, conversation_id, role, content, source_chunks)
            .await
            .map_err(store_error)?;

        Ok(())
    }

    async fn upsert_index_record(&self, record: &NewVectorIndexRecord) -> crate::Result<()> {
        VectorIndexQueries::upsert(&self.pool, record)
            .await
            .map_err(store_error)?;

        Ok(())
    }
}
