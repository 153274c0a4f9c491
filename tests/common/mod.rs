//! Deterministic model backends and a temporary application directory

#![allow(dead_code, reason = "each test binary uses a different subset")]

use std::collections::HashMap;
use std::sync::Mutex;

use pdf_rag::commands::Services;
use pdf_rag::config::{Config, OllamaConfig};
use pdf_rag::database::sqlite::Database;
use pdf_rag::embeddings::EmbeddingBackend;
use pdf_rag::generation::{GenerationBackend, GenerationOptions};
use std::sync::Arc;
use tempfile::TempDir;

pub const DIMENSION: usize = 64;

/// Bag-of-words embedder: every distinct word gets its own axis
#[derive(Debug, Default)]
pub struct WordEmbedder {
    vocabulary: Mutex<HashMap<String, usize>>,
}

impl WordEmbedder {
    pub fn vector(&self, text: &str) -> Vec<f32> {
        let mut vocabulary = self.vocabulary.lock().expect("vocabulary lock");
        let mut vector = vec![0.0_f32; DIMENSION];
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
            let axis = *vocabulary.entry(word).or_insert(next) % DIMENSION;
            vector[axis] += 1.0;
        }

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            vector.iter_mut().for_each(|v| *v /= norm);
        }
        vector
    }
}

impl EmbeddingBackend for WordEmbedder {
    fn model_name(&self) -> &str {
        "word-test"
    }

    fn ensure_ready(&self) -> anyhow::Result<()> {
        Ok(())
    }

    fn embed_batch(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.vector(t)).collect())
    }
}

/// Generation backend that records every prompt and answers with a fixed reply
#[derive(Debug)]
pub struct EchoGenerator {
    pub prompts: Mutex<Vec<String>>,
    reply: String,
}

impl EchoGenerator {
    pub fn replying(reply: &str) -> Self {
        Self {
            prompts: Mutex::new(Vec::new()),
            reply: reply.to_string(),
        }
    }

    pub fn last_prompt(&self) -> Option<String> {
        self.prompts.lock().expect("prompts lock").last().cloned()
    }

    pub fn calls(&self) -> usize {
        self.prompts.lock().expect("prompts lock").len()
    }
}

impl GenerationBackend for EchoGenerator {
    fn model_name(&self) -> &str {
        "echo-test"
    }

    fn generate(&self, prompt: &str, _options: &GenerationOptions) -> anyhow::Result<String> {
        self.prompts
            .lock()
            .expect("prompts lock")
            .push(prompt.to_string());
        Ok(self.reply.clone())
    }
}

pub fn init_test_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter("debug")
        .with_test_writer()
        .try_init()
        .ok();
}

pub fn test_config(dir: &TempDir) -> Config {
    Config {
        ollama: OllamaConfig {
            embedding_dimension: u32::try_from(DIMENSION).expect("small dimension"),
            ..OllamaConfig::default()
        },
        base_dir: dir.path().to_path_buf(),
        ..Config::default()
    }
}

/// Services over the given directory, sharing the supplied backends
pub async fn open_services(
    dir: &TempDir,
    embedder: &Arc<WordEmbedder>,
    generator: &Arc<EchoGenerator>,
) -> Services {
    let config = test_config(dir);
    let database = Database::new(config.database_path())
        .await
        .expect("database");
    Services::with_backends(
        config,
        database,
        Arc::clone(embedder) as Arc<dyn EmbeddingBackend>,
        Arc::clone(generator) as Arc<dyn GenerationBackend>,
    )
}

/// Write a text document (pages separated by form feeds), register and process it
pub async fn add_text_document(services: &Services, dir: &TempDir, name: &str, pages: &[&str]) -> uuid::Uuid {
    let path = dir.path().join(name);
    std::fs::write(&path, pages.join("\u{c}")).expect("write document");
    let document = services
        .processor
        .register(&path, None)
        .await
        .expect("register");
    services.processor.process(&document).await.expect("process");
    // Distinct upload timestamps keep build order deterministic
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    document.id
}
