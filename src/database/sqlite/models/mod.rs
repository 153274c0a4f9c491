
use std::collections::BTreeMap;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::{FromRow, Type};
use uuid::Uuid;

use crate::embeddings::chunking::ContentChunk;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Document {
    pub id: Uuid,
    /// Name of the stored file
    pub filename: String,
    /// Name shown to users and cited in answers
    pub original_filename: String,
    pub file_path: String,
    pub file_size: i64,
    pub page_count: Option<i64>,
    pub upload_timestamp: NaiveDateTime,
    pub processing_status: ProcessingStatus,
    pub processing_error: Option<String>,
    pub metadata: Option<Json<DocumentMetadata>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Type)]
#[sqlx(type_name = "TEXT", rename_all = "lowercase")]
pub enum ProcessingStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl std::fmt::Display for ProcessingStatus {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            ProcessingStatus::Pending => write!(f, "Pending"),
            ProcessingStatus::Processing => write!(f, "Processing"),
            ProcessingStatus::Completed => write!(f, "Completed"),
            ProcessingStatus::Failed => write!(f, "Failed"),
        }
    }
}

/// Structured extensions attached to a document.
///
/// Recognized keys are typed fields; anything else goes in `extra`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DocumentMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    /// Path the document was added from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_path: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewDocument {
    pub filename: String,
    pub original_filename: String,
    pub file_path: String,
    pub file_size: i64,
    pub metadata: Option<DocumentMetadata>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct DocumentSummary {
    #[sqlx(flatten)]
    pub document: Document,
    pub chunk_count: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Chunk {
    pub id: Uuid,
    pub document_id: Uuid,
    pub chunk_index: i64,
    pub page_number: i64,
    pub chunk_text: String,
    pub token_count: i64,
    pub start_char: i64,
    pub end_char: i64,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewChunk {
    pub document_id: Uuid,
    pub chunk_index: i64,
    pub page_number: i64,
    pub chunk_text: String,
    pub token_count: i64,
    pub start_char: i64,
    pub end_char: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Conversation {
    pub id: Uuid,
    pub session_id: Option<String>,
    pub created_at: NaiveDateTime,
    pub last_updated: NaiveDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Message {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub role: MessageRole,
    pub content: String,
    pub timestamp: NaiveDateTime,
    pub source_chunks: Option<Json<Vec<Uuid>>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[sqlx(type_name = "TEXT", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    System,
}

impl std::fmt::Display for MessageRole {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            MessageRole::User => write!(f, "User"),
            MessageRole::Assistant => write!(f, "Assistant"),
            MessageRole::System => write!(f, "System"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct VectorIndexRecord {
    pub id: i64,
    pub index_name: String,
    pub dimension: i64,
    pub total_vectors: i64,
    pub index_path: String,
    pub map_path: String,
    pub last_updated: NaiveDateTime,
    pub documents_included: Json<Vec<Uuid>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewVectorIndexRecord {
    pub index_name: String,
    pub dimension: i64,
    pub total_vectors: i64,
    pub index_path: String,
    pub map_path: String,
    pub documents_included: Vec<Uuid>,
}

impl Document {
    #[inline]
    pub fn is_completed(&self) -> bool {
        self.processing_status == ProcessingStatus::Completed
    }

    #[inline]
    pub fn is_failed(&self) -> bool {
        self.processing_status == ProcessingStatus::Failed
    }

    /// Human-readable size of the uploaded file
    #[inline]
    pub fn display_size(&self) -> String {
        const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
        let mut size = self.file_size as f64;
        let mut unit = 0;
        while size >= 1024.0 && unit < UNITS.len() - 1 {
            size /= 1024.0;
            unit += 1;
        }
        if unit == 0 {
            format!("{} {}", self.file_size, UNITS[0])
        } else {
            format!("{size:.1} {}", UNITS[unit])
        }
    }

    #[inline]
    pub fn title(&self) -> &str {
        self.metadata
            .as_ref()
            .and_then(|m| m.title.as_deref())
            .unwrap_or(&self.original_filename)
    }
}

impl NewChunk {
    #[inline]
    pub fn from_content(document_id: Uuid, chunk: &ContentChunk) -> Self {
        Self {
            document_id,
            chunk_index: to_i64(chunk.chunk_index),
            page_number: i64::from(chunk.page_number),
            chunk_text: chunk.content.clone(),
            token_count: to_i64(chunk.token_count),
            start_char: to_i64(chunk.start_char),
            end_char: to_i64(chunk.end_char),
        }
    }
}

impl Message {
    #[inline]
    pub fn source_chunk_ids(&self) -> &[Uuid] {
        self.source_chunks
            .as_ref()
            .map(|ids| ids.0.as_slice())
            .unwrap_or_default()
    }
}

fn to_i64(value: usize) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}
