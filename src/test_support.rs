//! Deterministic in-process model backends for unit tests

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use uuid::Uuid;

use crate::database::Database;
use crate::database::sqlite::models::{NewChunk, NewDocument, ProcessingStatus};
use crate::embeddings::embedder::{Embedder, EmbeddingBackend};
use crate::generation::{GenerationBackend, GenerationOptions, Generator};

pub(crate) const TEST_DIMENSION: usize = 64;

/// Bag-of-words embedder: every distinct word gets its own axis
#[derive(Debug, Default)]
pub(crate) struct VocabularyEmbedder {
    vocabulary: Mutex<HashMap<String, usize>>,
    pub(crate) ready_checks: AtomicUsize,
    pub(crate) fail_ready_until: AtomicUsize,
    /// While set, every embedding request fails as if the server were down
    pub(crate) unreachable: AtomicBool,
}

impl VocabularyEmbedder {
    pub(crate) fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    pub(crate) fn vector(&self, text: &str) -> Vec<f32> {
        let mut vocabulary = self.vocabulary.lock().expect("vocabulary lock");
        let mut vector = vec![0.0_f32; TEST_DIMENSION];
        for word in text.split_whitespace() {
            let word: String = word
                .chars()
                .filter(|c| c.is_alphanumeric())
                .flat_map(char::to_lowercase)
                .collect();
            if word.is_empty() {
                continue;
            }
            let next = vocabulary.len();
            let axis = *vocabulary.entry(word).or_insert(next) % TEST_DIMENSION;
            vector[axis] += 1.0;
        }

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            vector.iter_mut().for_each(|v| *v /= norm);
        }
        vector
    }
}

impl EmbeddingBackend for VocabularyEmbedder {
    fn model_name(&self) -> &str {
        "vocabulary-test"
    }

    fn ensure_ready(&self) -> anyhow::Result<()> {
        let attempt = self.ready_checks.fetch_add(1, Ordering::SeqCst);
        if attempt < self.fail_ready_until.load(Ordering::SeqCst) {
            anyhow::bail!("model still loading");
        }
        Ok(())
    }

    fn embed_batch(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
        if self.unreachable.load(Ordering::SeqCst) {
            anyhow::bail!("connection refused");
        }
        Ok(texts.iter().map(|t| self.vector(t)).collect())
    }
}

/// Generation backend that records prompts and answers with a fixed reply
#[derive(Debug)]
pub(crate) struct RecordingGenerator {
    pub(crate) prompts: Mutex<Vec<String>>,
    reply: Option<String>,
}

impl RecordingGenerator {
    pub(crate) fn replying(reply: &str) -> Self {
        Self {
            prompts: Mutex::new(Vec::new()),
            reply: Some(reply.to_string()),
        }
    }

    pub(crate) fn failing() -> Self {
        Self {
            prompts: Mutex::new(Vec::new()),
            reply: None,
        }
    }

    pub(crate) fn last_prompt(&self) -> Option<String> {
        self.prompts.lock().expect("prompts lock").last().cloned()
    }
}

impl GenerationBackend for RecordingGenerator {
    fn model_name(&self) -> &str {
        "recording-test"
    }

    fn generate(&self, prompt: &str, _options: &GenerationOptions) -> anyhow::Result<String> {
        self.prompts
            .lock()
            .expect("prompts lock")
            .push(prompt.to_string());
        self.reply
            .clone()
            .ok_or_else(|| anyhow::anyhow!("connection refused"))
    }
}

pub(crate) fn test_embedder(backend: Arc<VocabularyEmbedder>) -> Arc<Embedder> {
    Arc::new(Embedder::new(
        backend,
        TEST_DIMENSION,
        8,
        Duration::from_secs(5),
    ))
}

pub(crate) fn test_generator(backend: Arc<RecordingGenerator>) -> Arc<Generator> {
    Arc::new(Generator::new(
        backend,
        GenerationOptions::default(),
        Duration::from_secs(5),
    ))
}

/// A migrated database in a temporary directory
pub(crate) async fn test_database() -> (tempfile::TempDir, Arc<Database>) {
    let temp_dir = tempfile::TempDir::new().expect("temp dir");
    let database = Database::initialize_from_config_dir(temp_dir.path())
        .await
        .expect("database");
    (temp_dir, Arc::new(database))
}

/// Store a completed document whose chunks are `texts`, all on page 1
pub(crate) async fn add_document(database: &Database, name: &str, texts: &[&str]) -> Uuid {
    let document = database
        .create_document(NewDocument {
            filename: format!("{}.pdf", Uuid::new_v4()),
            original_filename: name.to_string(),
            file_path: format!("/docs/{name}"),
            file_size: 2048,
            metadata: None,
        })
        .await
        .expect("create document");

    let chunks: Vec<NewChunk> = texts
        .iter()
        .enumerate()
        .map(|(i, text)| NewChunk {
            document_id: document.id,
            chunk_index: i64::try_from(i).expect("small index"),
            page_number: 1,
            chunk_text: (*text).to_string(),
            token_count: i64::try_from(text.split_whitespace().count()).expect("small count"),
            start_char: 0,
            end_char: i64::try_from(text.len()).expect("small length"),
        })
        .collect();
    database
        .replace_chunks(document.id, &chunks)
        .await
        .expect("store chunks");
    database
        .set_document_status(document.id, ProcessingStatus::Completed, None, Some(1))
        .await
        .expect("mark completed");

    // Distinct upload timestamps keep build order deterministic
    tokio::time::sleep(Duration::from_millis(5)).await;
    document.id
}
