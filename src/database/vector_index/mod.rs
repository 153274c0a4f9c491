//! Exact similarity search over chunk embeddings.
//!
//! The live index and its slot map are held together behind a read/write lock
//! and replaced as a unit after a successful build, so searches observe either
//! the previous pair or the new one.


pub mod flat;
pub mod persist;

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use itertools::Itertools;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::database::sqlite::models::NewVectorIndexRecord;
use crate::database::{ChunkContext, RecordStore};
use crate::embeddings::embedder::Embedder;
use crate::{RagError, Result};

use self::flat::{FlatIndex, FlatIndexError, similarity};
use self::persist::{ChunkIdMap, IndexFiles, IndexStorage, StoredIndex};

/// A retrieved chunk with its distance to the query
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    pub chunk: ChunkContext,
    pub distance: f32,
    /// `1 / (1 + distance)`
    pub similarity: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexStatus {
    NotInitialized,
    Active,
}

impl std::fmt::Display for IndexStatus {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            IndexStatus::NotInitialized => write!(f, "not initialized"),
            IndexStatus::Active => write!(f, "active"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexStats {
    pub status: IndexStatus,
    pub total_vectors: usize,
    pub dimension: usize,
}

#[derive(Debug)]
struct LiveIndex {
    index: FlatIndex,
    map: ChunkIdMap,
    files: IndexFiles,
}

#[derive(Debug)]
enum IndexState {
    /// Nothing read from disk yet
    Unloaded,
    /// Disk was checked and holds no index
    Absent,
    Ready(Arc<LiveIndex>),
}

#[derive(Debug)]
pub struct VectorIndex {
    name: String,
    storage: IndexStorage,
    embedder: Arc<Embedder>,
    store: Arc<dyn RecordStore>,
    overfetch_factor: usize,
    state: RwLock<IndexState>,
    build_lock: Mutex<()>,
}

impl VectorIndex {
    /// Create the service; nothing is read from disk until first use
    #[inline]
    pub fn new(
        name: &str,
        index_dir: &Path,
        embedder: Arc<Embedder>,
        store: Arc<dyn RecordStore>,
        overfetch_factor: usize,
    ) -> Self {
        Self {
            name: name.to_string(),
            storage: IndexStorage::new(index_dir, name),
            embedder,
            store,
            overfetch_factor: overfetch_factor.max(1),
            state: RwLock::new(IndexState::Unloaded),
            build_lock: Mutex::new(()),
        }
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn embedder(&self) -> &Arc<Embedder> {
        &self.embedder
    }

    /// Rebuild from the record store, optionally restricted to some documents
    #[inline]
    pub async fn rebuild(&self, document_ids: Option<&[Uuid]>) -> Result<NewVectorIndexRecord> {
        let chunks = self.store.chunks_for_build(document_ids).await?;
        self.build(chunks, document_ids).await
    }

    /// Replace the index with one built from `chunks`.
    ///
    /// Slots follow the order of `chunks`. On any failure the previous index,
    /// on disk and in memory, stays live. Once the new files are saved the
    /// build succeeds even if the metadata record cannot be written.
    #[inline]
    pub async fn build(
        &self,
        chunks: Vec<ChunkContext>,
        document_ids: Option<&[Uuid]>,
    ) -> Result<NewVectorIndexRecord> {
        let _build = self.build_lock.lock().await;

        let chunks = filter_chunks(chunks, document_ids);
        if chunks.is_empty() {
            warn!("Index '{}' build aborted: no chunks selected", self.name);
            return Err(RagError::EmptyCorpus);
        }

        info!(
            "Building index '{}' from {} chunks",
            self.name,
            chunks.len()
        );

        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let vectors = self.embedder.embed_batch(texts).await?;

        let mut index = FlatIndex::with_capacity(self.embedder.dimension(), chunks.len())
            .map_err(|e| RagError::Config(e.to_string()))?;
        let mut map = ChunkIdMap::with_capacity(chunks.len());
        for (chunk, vector) in chunks.iter().zip(&vectors) {
            index
                .add(vector)
                .map_err(|e| RagError::EmbeddingUnavailable(e.to_string()))?;
            map.push(chunk.chunk_id);
        }

        let documents_included: Vec<Uuid> = chunks.iter().map(|c| c.document_id).unique().collect();

        let storage = self.storage.clone();
        let (index, map, files) = tokio::task::spawn_blocking(move || {
            let files = storage.save(&index, &map)?;
            anyhow::Ok((index, map, files))
        })
        .await
        .map_err(|e| RagError::Other(anyhow::anyhow!("index save task failed: {e}")))?
        .map_err(|e| {
            error!("Failed to persist index '{}': {:#}", self.name, e);
            RagError::IndexUnavailable(format!("failed to persist index: {e:#}"))
        })?;

        let record = NewVectorIndexRecord {
            index_name: self.name.clone(),
            dimension: to_i64(index.dimension()),
            total_vectors: to_i64(index.len()),
            index_path: files.index_path.display().to_string(),
            map_path: files.map_path.display().to_string(),
            documents_included,
        };

        *self.state.write().await = IndexState::Ready(Arc::new(LiveIndex { index, map, files }));
        info!(
            "Index '{}' now serves {} vectors",
            self.name, record.total_vectors
        );

        // The new index is already live; a stale metadata row is only cosmetic
        if let Err(e) = self.store.upsert_index_record(&record).await {
            warn!(
                "Index '{}' is live but its metadata record was not updated: {}",
                self.name, e
            );
        }
        Ok(record)
    }

    /// Nearest chunks to `query`, at most `k`, ordered by ascending distance.
    ///
    /// Candidates are over-fetched to make room for document filtering. When
    /// filtering leaves fewer than `k` results the window widens by the same
    /// factor until `k` are accepted or every vector was examined.
    #[inline]
    pub async fn search(
        &self,
        query: &[f32],
        k: usize,
        document_ids: Option<&[Uuid]>,
    ) -> Result<Vec<SearchHit>> {
        if k == 0 {
            return Ok(Vec::new());
        }

        let Some(live) = self.live().await? else {
            debug!("Index '{}' unavailable; returning no results", self.name);
            return Ok(Vec::new());
        };

        let total = live.index.len();
        if total == 0 {
            return Ok(Vec::new());
        }

        let allowed: Option<HashSet<Uuid>> = document_ids
            .filter(|ids| !ids.is_empty())
            .map(|ids| ids.iter().copied().collect());

        let mut hits = Vec::with_capacity(k);
        let mut examined = 0;
        let mut window = k.saturating_mul(self.overfetch_factor).min(total);

        loop {
            let neighbors = live.index.search(query, window).map_err(|e| match e {
                FlatIndexError::DimensionMismatch { expected, actual } => {
                    RagError::IndexUnavailable(format!(
                        "index holds {expected}-dimensional vectors but the query has {actual}; rebuild the index"
                    ))
                }
                other => RagError::IndexUnavailable(other.to_string()),
            })?;

            let candidates: Vec<(Uuid, f32)> = neighbors[examined..]
                .iter()
                .filter_map(|neighbor| match live.map.get(neighbor.slot) {
                    Some(chunk_id) => Some((chunk_id, neighbor.distance)),
                    None => {
                        warn!(
                            "Index '{}' slot {} has no chunk mapping; skipping",
                            self.name, neighbor.slot
                        );
                        None
                    }
                })
                .collect();

            let ids: Vec<Uuid> = candidates.iter().map(|(id, _)| *id).collect();
            let mut resolved = self.store.get_chunks(&ids).await?;

            for (chunk_id, distance) in candidates {
                let Some(chunk) = resolved.remove(&chunk_id) else {
                    warn!("Chunk {} is indexed but has no record; skipping", chunk_id);
                    continue;
                };
                if allowed
                    .as_ref()
                    .is_some_and(|ids| !ids.contains(&chunk.document_id))
                {
                    continue;
                }

                hits.push(SearchHit {
                    chunk,
                    distance,
                    similarity: similarity(distance),
                });
                if hits.len() == k {
                    return Ok(hits);
                }
            }

            examined = window;
            if window >= total {
                break;
            }
            window = window
                .saturating_mul(self.overfetch_factor.max(2))
                .min(total);
            debug!(
                "Widening search window of index '{}' to {} after {} accepted",
                self.name,
                window,
                hits.len()
            );
        }

        Ok(hits)
    }

    /// Reload from disk, replacing the in-memory index.
    ///
    /// Returns `false` when nothing is persisted. A corrupt pair is rejected
    /// and the current state kept.
    #[inline]
    pub async fn load(&self) -> Result<bool> {
        let mut state = self.state.write().await;
        let loaded = self.read_from_disk().await?;
        let found = loaded.is_some();
        *state = match loaded {
            Some(live) => IndexState::Ready(live),
            None => IndexState::Absent,
        };
        Ok(found)
    }

    /// Persist the live index again as a fresh generation
    #[inline]
    pub async fn save(&self) -> Result<Option<IndexFiles>> {
        let _build = self.build_lock.lock().await;
        let Some(live) = self.live().await? else {
            return Ok(None);
        };

        let storage = self.storage.clone();
        let saved = Arc::clone(&live);
        let files = tokio::task::spawn_blocking(move || storage.save(&saved.index, &saved.map))
            .await
            .map_err(|e| RagError::Other(anyhow::anyhow!("index save task failed: {e}")))?
            .map_err(|e| RagError::IndexUnavailable(format!("failed to persist index: {e:#}")))?;

        *self.state.write().await = IndexState::Ready(Arc::new(LiveIndex {
            index: live.index.clone(),
            map: live.map.clone(),
            files: files.clone(),
        }));
        Ok(Some(files))
    }

    /// Drop the in-memory index; the next use reads it from disk again
    #[inline]
    pub async fn reset(&self) {
        *self.state.write().await = IndexState::Unloaded;
        debug!("Index '{}' reset", self.name);
    }

    #[inline]
    pub async fn stats(&self) -> Result<IndexStats> {
        let stats = match self.live().await? {
            Some(live) => IndexStats {
                status: IndexStatus::Active,
                total_vectors: live.index.len(),
                dimension: live.index.dimension(),
            },
            None => IndexStats {
                status: IndexStatus::NotInitialized,
                total_vectors: 0,
                dimension: self.embedder.dimension(),
            },
        };
        Ok(stats)
    }

    /// Chunk ids of every indexed slot, in slot order
    #[inline]
    pub async fn chunk_ids(&self) -> Result<Vec<Uuid>> {
        Ok(self
            .live()
            .await?
            .map(|live| live.map.chunk_ids().to_vec())
            .unwrap_or_default())
    }

    /// Files backing the live index, if any
    #[inline]
    pub async fn files(&self) -> Result<Option<IndexFiles>> {
        Ok(self.live().await?.map(|live| live.files.clone()))
    }

    async fn live(&self) -> Result<Option<Arc<LiveIndex>>> {
        {
            let state = self.state.read().await;
            match &*state {
                IndexState::Ready(live) => return Ok(Some(Arc::clone(live))),
                IndexState::Absent => return Ok(None),
                IndexState::Unloaded => {}
            }
        }

        let mut state = self.state.write().await;
        match &*state {
            IndexState::Ready(live) => Ok(Some(Arc::clone(live))),
            IndexState::Absent => Ok(None),
            IndexState::Unloaded => {
                let loaded = self.read_from_disk().await?;
                *state = match &loaded {
                    Some(live) => IndexState::Ready(Arc::clone(live)),
                    None => IndexState::Absent,
                };
                Ok(loaded)
            }
        }
    }

    async fn read_from_disk(&self) -> Result<Option<Arc<LiveIndex>>> {
        let storage = self.storage.clone();
        let stored = tokio::task::spawn_blocking(move || storage.load())
            .await
            .map_err(|e| RagError::Other(anyhow::anyhow!("index load task failed: {e}")))?
            .map_err(|e| {
                error!("Failed to load index '{}': {:#}", self.name, e);
                RagError::IndexUnavailable(format!("{e:#}"))
            })?;

        let Some(StoredIndex { index, map, files }) = stored else {
            debug!("No persisted index '{}' found", self.name);
            return Ok(None);
        };

        if index.len() != map.len() {
            error!(
                "Index '{}' has {} vectors but {} map entries",
                self.name,
                index.len(),
                map.len()
            );
            return Err(RagError::MappingCorruption(format!(
                "{} vectors but {} mapped chunk ids in {}",
                index.len(),
                map.len(),
                files.map_path.display()
            )));
        }

        info!(
            "Loaded index '{}' with {} vectors",
            self.name,
            index.len()
        );
        Ok(Some(Arc::new(LiveIndex { index, map, files })))
    }
}

fn filter_chunks(chunks: Vec<ChunkContext>, document_ids: Option<&[Uuid]>) -> Vec<ChunkContext> {
    match document_ids.filter(|ids| !ids.is_empty()) {
        Some(ids) => {
            let allowed: HashSet<&Uuid> = ids.iter().collect();
            chunks
                .into_iter()
                .filter(|c| allowed.contains(&c.document_id))
                .collect()
        }
        None => chunks,
    }
}

fn to_i64(value: usize) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}
