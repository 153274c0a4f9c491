
use anyhow::{Context, Result};
use chrono::Utc;
use sqlx::types::Json;
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use tracing::debug;
use uuid::Uuid;

use super::models::*;
use crate::database::{ChunkContext, ConversationTurn};

/// Keeps `IN (...)` lists well under SQLite's bound-parameter limit
const MAX_BIND_IDS: usize = 500;

const DOCUMENT_COLUMNS: &str = "id, filename, original_filename, file_path, file_size, page_count, \
     upload_timestamp, processing_status, processing_error, metadata";

const CHUNK_CONTEXT_SELECT: &str = "SELECT c.id AS chunk_id, c.document_id, \
     d.original_filename AS document_name, c.page_number, c.chunk_text AS text \
     FROM chunks c JOIN documents d ON d.id = c.document_id";

pub struct DocumentQueries;

impl DocumentQueries {
    #[inline]
    pub async fn create(pool: &SqlitePool, new_document: NewDocument) -> Result<Document> {
        let id = Uuid::new_v4();
        let now = Utc::now().naive_utc();

        sqlx::query(
            "INSERT INTO documents (id, filename, original_filename, file_path, file_size, \
             upload_timestamp, processing_status, metadata) VALUES (?, ?, ?, ?, ?, ?, 'pending', ?)",
        )
        .bind(id)
        .bind(&new_document.filename)
        .bind(&new_document.original_filename)
        .bind(&new_document.file_path)
        .bind(new_document.file_size)
        .bind(now)
        .bind(new_document.metadata.map(Json))
        .execute(pool)
        .await
        .context("Failed to create document")?;

        Self::get_by_id(pool, id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Failed to retrieve created document"))
    }

    #[inline]
    pub async fn get_by_id(pool: &SqlitePool, id: Uuid) -> Result<Option<Document>> {
        let document = sqlx::query_as::<_, Document>(&format!(
            "SELECT {DOCUMENT_COLUMNS} FROM documents WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("Failed to get document by id")?;

        Ok(document)
    }

    #[inline]
    pub async fn get_by_original_filename(
        pool: &SqlitePool,
        name: &str,
    ) -> Result<Vec<Document>> {
        let documents = sqlx::query_as::<_, Document>(&format!(
            "SELECT {DOCUMENT_COLUMNS} FROM documents WHERE original_filename = ? \
             ORDER BY upload_timestamp"
        ))
        .bind(name)
        .fetch_all(pool)
        .await
        .context("Failed to get documents by name")?;

        Ok(documents)
    }

    /// All documents with their chunk counts, newest first
    #[inline]
    pub async fn list_all(pool: &SqlitePool) -> Result<Vec<DocumentSummary>> {
        let documents = sqlx::query_as::<_, DocumentSummary>(
            "SELECT d.id, d.filename, d.original_filename, d.file_path, d.file_size, \
             d.page_count, d.upload_timestamp, d.processing_status, d.processing_error, \
             d.metadata, COUNT(c.id) AS chunk_count \
             FROM documents d LEFT JOIN chunks c ON c.document_id = d.id \
             GROUP BY d.id ORDER BY d.upload_timestamp DESC",
        )
        .fetch_all(pool)
        .await
        .context("Failed to list documents")?;

        Ok(documents)
    }

    #[inline]
    pub async fn list_by_status(
        pool: &SqlitePool,
        status: ProcessingStatus,
    ) -> Result<Vec<Document>> {
        let documents = sqlx::query_as::<_, Document>(&format!(
            "SELECT {DOCUMENT_COLUMNS} FROM documents WHERE processing_status = ? \
             ORDER BY upload_timestamp, id"
        ))
        .bind(status)
        .fetch_all(pool)
        .await
        .context("Failed to list documents by status")?;

        Ok(documents)
    }

    #[inline]
    pub async fn set_status(
        pool: &SqlitePool,
        id: Uuid,
        status: ProcessingStatus,
        error: Option<&str>,
        page_count: Option<i64>,
    ) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE documents SET processing_status = ?, processing_error = ?, \
             page_count = COALESCE(?, page_count) WHERE id = ?",
        )
        .bind(status)
        .bind(error)
        .bind(page_count)
        .bind(id)
        .execute(pool)
        .await
        .context("Failed to update document status")?;

        debug!("Document {} marked {}", id, status);
        Ok(result.rows_affected() > 0)
    }

    /// Delete a document; its chunks go with it
    #[inline]
    pub async fn delete(pool: &SqlitePool, id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM documents WHERE id = ?")
            .bind(id)
            .execute(pool)
            .await
            .context("Failed to delete document")?;

        Ok(result.rows_affected() > 0)
    }
}

pub struct ChunkQueries;

impl ChunkQueries {
    /// Replace all chunks of a document in one transaction
    #[inline]
    pub async fn replace_for_document(
        pool: &SqlitePool,
        document_id: Uuid,
        chunks: &[NewChunk],
    ) -> Result<usize> {
        let mut tx = pool.begin().await.context("Failed to begin transaction")?;

        sqlx::query("DELETE FROM chunks WHERE document_id = ?")
            .bind(document_id)
            .execute(&mut *tx)
            .await
            .context("Failed to clear existing chunks")?;

        let now = Utc::now().naive_utc();
        for chunk in chunks {
            sqlx::query(
                "INSERT INTO chunks (id, document_id, chunk_index, page_number, chunk_text, \
                 token_count, start_char, end_char, created_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(Uuid::new_v4())
            .bind(chunk.document_id)
            .bind(chunk.chunk_index)
            .bind(chunk.page_number)
            .bind(&chunk.chunk_text)
            .bind(chunk.token_count)
            .bind(chunk.start_char)
            .bind(chunk.end_char)
            .bind(now)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("Failed to insert chunk {}", chunk.chunk_index))?;
        }

        tx.commit().await.context("Failed to commit chunks")?;

        debug!("Stored {} chunks for document {}", chunks.len(), document_id);
        Ok(chunks.len())
    }

    #[inline]
    pub async fn list_by_document(pool: &SqlitePool, document_id: Uuid) -> Result<Vec<Chunk>> {
        let chunks = sqlx::query_as::<_, Chunk>(
            "SELECT id, document_id, chunk_index, page_number, chunk_text, token_count, \
             start_char, end_char, created_at FROM chunks WHERE document_id = ? \
             ORDER BY chunk_index",
        )
        .bind(document_id)
        .fetch_all(pool)
        .await
        .context("Failed to list chunks for document")?;

        Ok(chunks)
    }

    #[inline]
    pub async fn count_all(pool: &SqlitePool) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks")
            .fetch_one(pool)
            .await
            .context("Failed to count chunks")?;

        Ok(count)
    }

    #[inline]
    pub async fn all_ids(pool: &SqlitePool) -> Result<Vec<Uuid>> {
        let ids: Vec<Uuid> = sqlx::query_scalar("SELECT id FROM chunks")
            .fetch_all(pool)
            .await
            .context("Failed to list chunk ids")?;

        Ok(ids)
    }

    /// Chunk contexts in index-build order, optionally restricted to some documents
    #[inline]
    pub async fn contexts_for_build(
        pool: &SqlitePool,
        document_ids: Option<&[Uuid]>,
    ) -> Result<Vec<ChunkContext>> {
        let mut builder = QueryBuilder::<Sqlite>::new(CHUNK_CONTEXT_SELECT);

        if let Some(ids) = document_ids.filter(|ids| !ids.is_empty()) {
            push_id_filter(&mut builder, "c.document_id", ids);
        }
        builder.push(" ORDER BY d.upload_timestamp, d.id, c.chunk_index");

        let contexts = builder
            .build_query_as::<ChunkContext>()
            .fetch_all(pool)
            .await
            .context("Failed to load chunks for index build")?;

        Ok(contexts)
    }

    #[inline]
    pub async fn contexts_by_ids(pool: &SqlitePool, ids: &[Uuid]) -> Result<Vec<ChunkContext>> {
        let mut contexts = Vec::with_capacity(ids.len());

        for batch in ids.chunks(MAX_BIND_IDS) {
            let mut builder = QueryBuilder::<Sqlite>::new(CHUNK_CONTEXT_SELECT);
            push_id_filter(&mut builder, "c.id", batch);

            let rows = builder
                .build_query_as::<ChunkContext>()
                .fetch_all(pool)
                .await
                .context("Failed to resolve chunk ids")?;
            contexts.extend(rows);
        }

        Ok(contexts)
    }
}

pub struct ConversationQueries;

impl ConversationQueries {
    #[inline]
    pub async fn create(pool: &SqlitePool, session_id: Option<&str>) -> Result<Conversation> {
        let id = Uuid::new_v4();
        let now = Utc::now().naive_utc();

        sqlx::query(
            "INSERT INTO conversations (id, session_id, created_at, last_updated) \
             VALUES (?, ?, ?, ?)",
        )
        .bind(id)
        .bind(session_id)
        .bind(now)
        .bind(now)
        .execute(pool)
        .await
        .context("Failed to create conversation")?;

        Self::get_by_id(pool, id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Failed to retrieve created conversation"))
    }

    #[inline]
    pub async fn get_by_id(pool: &SqlitePool, id: Uuid) -> Result<Option<Conversation>> {
        let conversation = sqlx::query_as::<_, Conversation>(
            "SELECT id, session_id, created_at, last_updated FROM conversations WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("Failed to get conversation by id")?;

        Ok(conversation)
    }

    #[inline]
    pub async fn list_recent(pool: &SqlitePool, limit: i64) -> Result<Vec<Conversation>> {
        let conversations = sqlx::query_as::<_, Conversation>(
            "SELECT id, session_id, created_at, last_updated FROM conversations \
             ORDER BY last_updated DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(pool)
        .await
        .context("Failed to list conversations")?;

        Ok(conversations)
    }
}

pub struct MessageQueries;

impl MessageQueries {
    /// Append a message and bump the conversation's `last_updated`
    #[inline]
    pub async fn append(
        pool: &SqlitePool,
        conversation_id: Uuid,
        role: MessageRole,
        content: &str,
        source_chunks: &[Uuid],
    ) -> Result<Message> {
        let id = Uuid::new_v4();
        let now = Utc::now().naive_utc();
        let sources = (!source_chunks.is_empty()).then(|| Json(source_chunks.to_vec()));

        let mut tx = pool.begin().await.context("Failed to begin transaction")?;

        sqlx::query(
            "INSERT INTO messages (id, conversation_id, role, content, timestamp, source_chunks) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(id)
        .bind(conversation_id)
        .bind(role)
        .bind(content)
        .bind(now)
        .bind(sources)
        .execute(&mut *tx)
        .await
        .context("Failed to insert message")?;

        sqlx::query("UPDATE conversations SET last_updated = ? WHERE id = ?")
            .bind(now)
            .bind(conversation_id)
            .execute(&mut *tx)
            .await
            .context("Failed to touch conversation")?;

        let message = sqlx::query_as::<_, Message>(
            "SELECT id, conversation_id, role, content, timestamp, source_chunks \
             FROM messages WHERE id = ?",
        )
        .bind(id)
        .fetch_one(&mut *tx)
        .await
        .context("Failed to retrieve created message")?;

        tx.commit().await.context("Failed to commit message")?;
        Ok(message)
    }

    /// The most recent `limit` messages, oldest first
    #[inline]
    pub async fn recent(
        pool: &SqlitePool,
        conversation_id: Uuid,
        limit: i64,
    ) -> Result<Vec<Message>> {
        let mut messages = sqlx::query_as::<_, Message>(
            "SELECT id, conversation_id, role, content, timestamp, source_chunks \
             FROM messages WHERE conversation_id = ? \
             ORDER BY timestamp DESC, rowid DESC LIMIT ?",
        )
        .bind(conversation_id)
        .bind(limit)
        .fetch_all(pool)
        .await
        .context("Failed to load conversation messages")?;

        messages.reverse();
        Ok(messages)
    }

    #[inline]
    pub async fn recent_turns(
        pool: &SqlitePool,
        conversation_id: Uuid,
        limit: i64,
    ) -> Result<Vec<ConversationTurn>> {
        let turns = Self::recent(pool, conversation_id, limit)
            .await?
            .into_iter()
            .map(|message| ConversationTurn {
                role: message.role,
                text: message.content,
            })
            .collect();

        Ok(turns)
    }
}

pub struct VectorIndexQueries;

impl VectorIndexQueries {
    #[inline]
    pub async fn upsert(
        pool: &SqlitePool,
        record: &NewVectorIndexRecord,
    ) -> Result<VectorIndexRecord> {
        let now = Utc::now().naive_utc();

        sqlx::query(
            "INSERT INTO vector_indexes (index_name, dimension, total_vectors, index_path, \
             map_path, last_updated, documents_included) VALUES (?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT (index_name) DO UPDATE SET dimension = excluded.dimension, \
             total_vectors = excluded.total_vectors, index_path = excluded.index_path, \
             map_path = excluded.map_path, last_updated = excluded.last_updated, \
             documents_included = excluded.documents_included",
        )
        .bind(&record.index_name)
        .bind(record.dimension)
        .bind(record.total_vectors)
        .bind(&record.index_path)
        .bind(&record.map_path)
        .bind(now)
        .bind(Json(&record.documents_included))
        .execute(pool)
        .await
        .context("Failed to upsert vector index record")?;

        Self::get_by_name(pool, &record.index_name)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Failed to retrieve vector index record"))
    }

    #[inline]
    pub async fn get_by_name(pool: &SqlitePool, name: &str) -> Result<Option<VectorIndexRecord>> {
        let record = sqlx::query_as::<_, VectorIndexRecord>(
            "SELECT id, index_name, dimension, total_vectors, index_path, map_path, \
             last_updated, documents_included FROM vector_indexes WHERE index_name = ?",
        )
        .bind(name)
        .fetch_optional(pool)
        .await
        .context("Failed to get vector index record")?;

        Ok(record)
    }
}

fn push_id_filter(builder: &mut QueryBuilder<'_, Sqlite>, column: &str, ids: &[Uuid]) {
    builder.push(" WHERE ");
    builder.push(column);
    builder.push(" IN (");
    let mut separated = builder.separated(", ");
    for id in ids {
        separated.push_bind(*id);
    }
    separated.push_unseparated(")");
}
