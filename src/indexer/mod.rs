// Indexer module
// Turns pending documents into chunks and rebuilds the vector index, one process at a time


pub mod consistency;

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::database::Database;
use crate::database::sqlite::models::ProcessingStatus;
use crate::database::vector_index::VectorIndex;
use crate::documents::DocumentProcessor;
use crate::{RagError, Result};

pub use consistency::{ConsistencyReport, ConsistencyValidator, DocumentConsistencyIssue};

/// A lock older than this is assumed to belong to a crashed process
const STALE_LOCK_AFTER: Duration = Duration::from_secs(30 * 60);

/// Statistics about an indexing run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexingStats {
    pub documents_processed: usize,
    pub documents_failed: usize,
    pub chunks_created: usize,
    /// Vectors in the rebuilt index, `None` when no rebuild happened
    pub vectors_indexed: Option<usize>,
}

/// Exclusive claim on index rebuilds, released on drop
#[derive(Debug)]
pub struct IndexerLock {
    path: PathBuf,
}

impl IndexerLock {
    /// Take the lock, clearing it first if its owner stopped updating it long ago
    #[inline]
    pub fn acquire(path: &Path, stale_after: Duration) -> Result<Self> {
        match Self::try_create(path) {
            Ok(lock) => Ok(lock),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                if !Self::is_stale(path, stale_after) {
                    return Err(RagError::IndexUnavailable(format!(
                        "another indexer process is already running (lock file {})",
                        path.display()
                    )));
                }
                warn!("Removing stale indexer lock {}", path.display());
                fs::remove_file(path)?;
                Ok(Self::try_create(path)?)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// True when a live lock file exists at `path`
    #[inline]
    pub fn is_held(path: &Path, stale_after: Duration) -> bool {
        path.exists() && !Self::is_stale(path, stale_after)
    }

    fn try_create(path: &Path) -> std::io::Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new().write(true).create_new(true).open(path)?;
        write!(file, "{} {}", std::process::id(), Utc::now().timestamp())?;
        debug!("Acquired indexer lock {}", path.display());
        Ok(Self {
            path: path.to_path_buf(),
        })
    }

    fn is_stale(path: &Path, stale_after: Duration) -> bool {
        let Ok(content) = fs::read_to_string(path) else {
            return false;
        };
        let Some(created) = content
            .split_whitespace()
            .nth(1)
            .and_then(|t| t.parse::<i64>().ok())
        else {
            // Unreadable content cannot belong to a running indexer
            return true;
        };

        let age = Utc::now().timestamp().saturating_sub(created).unsigned_abs();
        age > stale_after.as_secs()
    }
}

impl Drop for IndexerLock {
    #[inline]
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            warn!("Failed to remove indexer lock {}: {}", self.path.display(), e);
        }
    }
}

/// Processes pending documents and rebuilds the index
pub struct Indexer {
    database: Arc<Database>,
    processor: DocumentProcessor,
    index: Arc<VectorIndex>,
    lock_file_path: PathBuf,
    stale_after: Duration,
}

impl Indexer {
    #[inline]
    pub fn new(
        database: Arc<Database>,
        processor: DocumentProcessor,
        index: Arc<VectorIndex>,
        lock_file_path: PathBuf,
    ) -> Self {
        Self {
            database,
            processor,
            index,
            lock_file_path,
            stale_after: STALE_LOCK_AFTER,
        }
    }

    #[inline]
    #[must_use]
    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = stale_after;
        self
    }

    #[inline]
    pub fn is_indexer_running(&self) -> bool {
        IndexerLock::is_held(&self.lock_file_path, self.stale_after)
    }

    /// Process every pending document, then rebuild the whole index.
    ///
    /// An empty corpus is not an error here: the stats report no rebuild.
    #[inline]
    pub async fn run(&self) -> Result<IndexingStats> {
        let _lock = IndexerLock::acquire(&self.lock_file_path, self.stale_after)?;
        info!("Starting indexing run");

        let mut stats = self.process_pending_documents().await?;
        match self.index.rebuild(None).await {
            Ok(record) => {
                stats.vectors_indexed = Some(usize::try_from(record.total_vectors).unwrap_or_default());
            }
            Err(RagError::EmptyCorpus) => {
                warn!("No chunks available; index left unchanged");
            }
            Err(e) => return Err(e),
        }

        info!(
            "Indexing run finished: {} processed, {} failed, {} chunks",
            stats.documents_processed, stats.documents_failed, stats.chunks_created
        );
        Ok(stats)
    }

    /// Rebuild the index, optionally restricted to some documents
    #[inline]
    pub async fn rebuild(&self, document_ids: Option<&[Uuid]>) -> Result<usize> {
        let _lock = IndexerLock::acquire(&self.lock_file_path, self.stale_after)?;
        let record = self.index.rebuild(document_ids).await?;
        Ok(usize::try_from(record.total_vectors).unwrap_or_default())
    }

    /// Chunk every pending document; failures are recorded per document
    #[inline]
    pub async fn process_pending_documents(&self) -> Result<IndexingStats> {
        let pending = self
            .database
            .documents_by_status(ProcessingStatus::Pending)
            .await
            .map_err(|e| RagError::Database(format!("{e:#}")))?;

        let mut stats = IndexingStats::default();
        if pending.is_empty() {
            debug!("No pending documents");
            return Ok(stats);
        }

        info!("Processing {} pending documents", pending.len());
        for document in &pending {
            match self.processor.process(document).await {
                Ok(processed) => {
                    stats.documents_processed += 1;
                    stats.chunks_created += processed.chunks;
                }
                Err(e) => {
                    error!(
                        "Failed to process {} ({}): {}",
                        document.original_filename, document.id, e
                    );
                    stats.documents_failed += 1;
                }
            }
        }

        Ok(stats)
    }
}
