//! Query orchestration: retrieve, assemble context, generate, attribute sources.

#[cfg(test)]
mod tests;

pub mod prompt;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::RetrievalConfig;
use crate::database::sqlite::models::MessageRole;
use crate::database::vector_index::{SearchHit, VectorIndex};
use crate::database::{ConversationTurn, RecordStore};
use crate::generation::Generator;
use crate::{RagError, Result};

pub const NO_RELEVANT_INFORMATION: &str =
    "I couldn't find any relevant information in the documents to answer your question.";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryRequest {
    pub question: String,
    pub conversation_id: Option<Uuid>,
    /// Restrict retrieval to these documents; empty means every document
    #[serde(default)]
    pub document_ids: Vec<Uuid>,
    pub top_k: Option<usize>,
}

impl QueryRequest {
    #[inline]
    pub fn new(question: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            ..Self::default()
        }
    }

    #[inline]
    #[must_use]
    pub fn with_conversation(mut self, conversation_id: Uuid) -> Self {
        self.conversation_id = Some(conversation_id);
        self
    }

    #[inline]
    #[must_use]
    pub fn with_documents(mut self, document_ids: Vec<Uuid>) -> Self {
        self.document_ids = document_ids;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = Some(top_k);
        self
    }
}

/// A retrieved chunk as shown to the user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Source {
    pub chunk_id: Uuid,
    pub document_id: Uuid,
    pub document_name: String,
    pub page_number: i64,
    /// Display preview only; generation saw the full chunk
    pub text: String,
    pub similarity_score: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResponse {
    pub answer: String,
    pub sources: Vec<Source>,
    pub conversation_id: Option<Uuid>,
    pub chunks_retrieved: usize,
}

impl QueryResponse {
    #[inline]
    pub fn source_chunk_ids(&self) -> Vec<Uuid> {
        self.sources.iter().map(|s| s.chunk_id).collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RebuildSummary {
    pub vectors_indexed: usize,
}

#[derive(Debug)]
pub struct RagService {
    index: Arc<VectorIndex>,
    generator: Arc<Generator>,
    store: Arc<dyn RecordStore>,
    config: RetrievalConfig,
    admission: Semaphore,
}

impl RagService {
    #[inline]
    pub fn new(
        index: Arc<VectorIndex>,
        generator: Arc<Generator>,
        store: Arc<dyn RecordStore>,
        config: RetrievalConfig,
    ) -> Self {
        let admission = Semaphore::new(config.max_concurrent_queries.max(1));
        Self {
            index,
            generator,
            store,
            config,
            admission,
        }
    }

    #[inline]
    pub fn index(&self) -> &Arc<VectorIndex> {
        &self.index
    }

    #[inline]
    pub fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    /// Answer a question from the indexed documents.
    ///
    /// Finding nothing relevant is a normal outcome and yields a canned answer
    /// with no sources. A missing conversation only drops the history.
    #[inline]
    pub async fn process_query(&self, request: &QueryRequest) -> Result<QueryResponse> {
        let question = request.question.trim();
        if question.is_empty() {
            return Err(RagError::InvalidRequest("question must not be empty".to_string()));
        }
        let top_k = self.validate_top_k(request.top_k)?;

        let _permit = self
            .admission
            .acquire()
            .await
            .map_err(|e| RagError::Other(anyhow::anyhow!("query admission closed: {e}")))?;

        info!("Searching for top {} relevant chunks", top_k);
        let query_vector = self.index.embedder().embed(question).await?;
        let filter = (!request.document_ids.is_empty()).then_some(request.document_ids.as_slice());
        let hits = self.index.search(&query_vector, top_k, filter).await?;

        if hits.is_empty() {
            info!("No relevant chunks found for query");
            return Ok(QueryResponse {
                answer: NO_RELEVANT_INFORMATION.to_string(),
                sources: Vec::new(),
                conversation_id: request.conversation_id,
                chunks_retrieved: 0,
            });
        }

        let context = prompt::build_context(&hits);
        let history = match request.conversation_id {
            Some(id) => self.history(id).await,
            None => Vec::new(),
        };
        let full_prompt = prompt::build_prompt(
            question,
            &context,
            &history,
            self.config.prompt_history_turns,
        );

        debug!(
            "Generating answer from {} chunks and {} history turns",
            hits.len(),
            history.len()
        );
        let answer = self.generator.generate(full_prompt).await?;

        let chunks_retrieved = hits.len();
        let sources = hits.into_iter().map(|hit| self.source(hit)).collect();

        Ok(QueryResponse {
            answer,
            sources,
            conversation_id: request.conversation_id,
            chunks_retrieved,
        })
    }

    /// Answer within a conversation, recording both turns.
    ///
    /// Without an id a new conversation is started; an unknown id is an error.
    #[inline]
    pub async fn converse(&self, request: &QueryRequest) -> Result<QueryResponse> {
        let conversation_id = match request.conversation_id {
            Some(id) => {
                if !self.store.conversation_exists(id).await? {
                    return Err(RagError::ConversationNotFound(id));
                }
                id
            }
            None => {
                let id = self.store.create_conversation(None).await?;
                info!("Started conversation {}", id);
                id
            }
        };

        self.store
            .append_message(conversation_id, MessageRole::User, &request.question, &[])
            .await?;

        let request = request.clone().with_conversation(conversation_id);
        let response = self.process_query(&request).await?;

        self.store
            .append_message(
                conversation_id,
                MessageRole::Assistant,
                &response.answer,
                &response.source_chunk_ids(),
            )
            .await?;

        Ok(response)
    }

    /// Rebuild the vector index from the record store
    #[inline]
    pub async fn rebuild_index(&self, document_ids: Option<&[Uuid]>) -> Result<RebuildSummary> {
        let record = self.index.rebuild(document_ids).await?;
        Ok(RebuildSummary {
            vectors_indexed: usize::try_from(record.total_vectors).unwrap_or_default(),
        })
    }

    fn validate_top_k(&self, requested: Option<usize>) -> Result<usize> {
        let top_k = requested.unwrap_or(self.config.default_top_k);
        if top_k == 0 || top_k > self.config.max_top_k {
            return Err(RagError::InvalidRequest(format!(
                "top_k must be between 1 and {}, got {}",
                self.config.max_top_k, top_k
            )));
        }
        Ok(top_k)
    }

    async fn history(&self, conversation_id: Uuid) -> Vec<ConversationTurn> {
        match self
            .store
            .conversation_history(conversation_id, self.config.history_limit)
            .await
        {
            Ok(Some(turns)) => turns,
            Ok(None) => {
                warn!("Conversation {} not found; answering without history", conversation_id);
                Vec::new()
            }
            Err(e) => {
                warn!(
                    "Failed to load history for conversation {}: {}",
                    conversation_id, e
                );
                Vec::new()
            }
        }
    }

    fn source(&self, hit: SearchHit) -> Source {
        Source {
            chunk_id: hit.chunk.chunk_id,
            document_id: hit.chunk.document_id,
            document_name: hit.chunk.document_name,
            page_number: hit.chunk.page_number,
            text: prompt::preview(&hit.chunk.text, self.config.preview_chars),
            similarity_score: hit.similarity,
        }
    }
}
