//! Document ingestion: page extraction, chunking and persistence of chunk records


use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;

use anyhow::{Context, bail};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::database::Database;
use crate::database::sqlite::models::{
    Document, DocumentMetadata, NewChunk, NewDocument, ProcessingStatus,
};
use crate::embeddings::chunking::{ChunkingConfig, PageText, chunk_pages};
use crate::{RagError, Result};

const PAGE_BREAK: char = '\u{c}';
const SUPPORTED_EXTENSIONS: [&str; 3] = ["pdf", "txt", "text"];

/// Extract the text of every non-blank page, numbered from 1.
///
/// PDFs go through the `pdftotext` binary (poppler); plain text files are
/// split on form feeds.
#[inline]
pub fn extract_pages(path: &Path) -> anyhow::Result<Vec<PageText>> {
    let raw = if is_pdf(path) {
        run_pdftotext(path)?
    } else {
        fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?
    };
    Ok(split_pages(&raw))
}

/// Split on form feeds, dropping pages that are blank after trimming
#[inline]
pub fn split_pages(raw: &str) -> Vec<PageText> {
    raw.split(PAGE_BREAK)
        .zip(1_u32..)
        .filter_map(|(text, page_number)| {
            let text = text.trim();
            (!text.is_empty()).then(|| PageText {
                page_number,
                text: text.to_string(),
            })
        })
        .collect()
}

fn is_pdf(path: &Path) -> bool {
    path.extension()
        .and_then(OsStr::to_str)
        .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"))
}

fn run_pdftotext(path: &Path) -> anyhow::Result<String> {
    debug!("Extracting {} with pdftotext", path.display());
    let output = Command::new("pdftotext")
        .arg("-layout")
        .arg("-enc")
        .arg("UTF-8")
        .arg(path)
        .arg("-")
        .output()
        .context("Failed to run pdftotext (is poppler installed?)")?;

    if !output.status.success() {
        bail!(
            "pdftotext failed: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Outcome of processing one document
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessedDocument {
    pub pages: usize,
    pub chunks: usize,
}

/// Registers documents and turns them into stored chunks
#[derive(Debug, Clone)]
pub struct DocumentProcessor {
    database: Arc<Database>,
    chunking: ChunkingConfig,
    storage_dir: PathBuf,
}

impl DocumentProcessor {
    #[inline]
    pub fn new(database: Arc<Database>, chunking: ChunkingConfig, storage_dir: PathBuf) -> Self {
        Self {
            database,
            chunking,
            storage_dir,
        }
    }

    /// Copy a file into the document store and record it as pending
    #[inline]
    pub async fn register(&self, source: &Path, display_name: Option<&str>) -> Result<Document> {
        let extension = source
            .extension()
            .and_then(OsStr::to_str)
            .map(str::to_ascii_lowercase)
            .filter(|ext| SUPPORTED_EXTENSIONS.contains(&ext.as_str()))
            .ok_or_else(|| {
                RagError::Document(format!(
                    "{} is not a supported document (expected .pdf or .txt)",
                    source.display()
                ))
            })?;

        let metadata = fs::metadata(source).map_err(|e| {
            RagError::Document(format!("Cannot read {}: {}", source.display(), e))
        })?;
        if !metadata.is_file() {
            return Err(RagError::Document(format!(
                "{} is not a file",
                source.display()
            )));
        }

        let original_filename = display_name
            .map(str::to_string)
            .or_else(|| {
                source
                    .file_name()
                    .map(|name| name.to_string_lossy().into_owned())
            })
            .unwrap_or_else(|| "document".to_string());

        fs::create_dir_all(&self.storage_dir)?;
        let filename = format!("{}.{}", Uuid::new_v4(), extension);
        let stored_path = self.storage_dir.join(&filename);
        fs::copy(source, &stored_path)?;

        let new_document = NewDocument {
            filename,
            original_filename,
            file_path: stored_path.display().to_string(),
            file_size: i64::try_from(metadata.len()).unwrap_or(i64::MAX),
            metadata: Some(DocumentMetadata {
                source_path: Some(source.display().to_string()),
                ..DocumentMetadata::default()
            }),
        };

        let document = match self.database.create_document(new_document).await {
            Ok(document) => document,
            Err(e) => {
                if let Err(remove_error) = fs::remove_file(&stored_path) {
                    warn!(
                        "Failed to remove {} after a failed insert: {}",
                        stored_path.display(),
                        remove_error
                    );
                }
                return Err(RagError::Database(format!("{e:#}")));
            }
        };

        info!(
            "Registered document {} ({})",
            document.original_filename, document.id
        );
        Ok(document)
    }

    /// Extract, chunk and store a document, recording the outcome as its status.
    ///
    /// A document that yields no text or no chunks is marked failed.
    #[inline]
    pub async fn process(&self, document: &Document) -> Result<ProcessedDocument> {
        self.set_status(document.id, ProcessingStatus::Processing, None, None)
            .await?;

        match self.extract_and_store(document).await {
            Ok(processed) => {
                let pages = i64::try_from(processed.pages).unwrap_or(i64::MAX);
                self.set_status(document.id, ProcessingStatus::Completed, None, Some(pages))
                    .await?;
                info!(
                    "Document {} processed: {} pages, {} chunks",
                    document.id, processed.pages, processed.chunks
                );
                Ok(processed)
            }
            Err(e) => {
                error!("Failed to process document {}: {}", document.id, e);
                let message = match &e {
                    RagError::Document(reason) => reason.clone(),
                    other => other.to_string(),
                };
                self.set_status(document.id, ProcessingStatus::Failed, Some(&message), None)
                    .await?;
                Err(e)
            }
        }
    }

    /// Delete a document, its chunks and its stored file
    #[inline]
    pub async fn remove(&self, document: &Document) -> Result<bool> {
        let deleted = self
            .database
            .delete_document(document.id)
            .await
            .map_err(|e| RagError::Database(format!("{e:#}")))?;

        if deleted {
            match fs::remove_file(&document.file_path) {
                Ok(()) => debug!("Deleted file {}", document.file_path),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!("Failed to delete file {}: {}", document.file_path, e),
            }
        }
        Ok(deleted)
    }

    async fn extract_and_store(&self, document: &Document) -> Result<ProcessedDocument> {
        let path = PathBuf::from(&document.file_path);
        let pages = tokio::task::spawn_blocking(move || extract_pages(&path))
            .await
            .map_err(|e| RagError::Other(anyhow::anyhow!("extraction task failed: {e}")))?
            .map_err(|e| RagError::Document(format!("{e:#}")))?;

        if pages.is_empty() {
            return Err(RagError::Document(
                "No text extracted from document".to_string(),
            ));
        }

        let chunks = chunk_pages(&pages, &self.chunking)
            .map_err(|e| RagError::Config(e.to_string()))?;
        if chunks.is_empty() {
            return Err(RagError::Document("No chunks created".to_string()));
        }

        let records: Vec<NewChunk> = chunks
            .iter()
            .map(|chunk| NewChunk::from_content(document.id, chunk))
            .collect();
        let stored = self
            .database
            .replace_chunks(document.id, &records)
            .await
            .map_err(|e| RagError::Database(format!("{e:#}")))?;

        Ok(ProcessedDocument {
            pages: pages.len(),
            chunks: stored,
        })
    }

    async fn set_status(
        &self,
        id: Uuid,
        status: ProcessingStatus,
        error: Option<&str>,
        page_count: Option<i64>,
    ) -> Result<()> {
        self.database
            .set_document_status(id, status, error, page_count)
            .await
            .map_err(|e| RagError::Database(format!("{e:#}")))?;
        Ok(())
    }
}
