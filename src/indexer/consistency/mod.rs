// Consistency validation between the record store and the vector index


use std::collections::{BTreeMap, HashSet};

use tracing::{info, warn};
use uuid::Uuid;

use crate::Result;
use crate::database::RecordStore;
use crate::database::vector_index::VectorIndex;

/// Comparison of stored chunks against the chunk ids held by the live index
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsistencyReport {
    pub stored_chunks: usize,
    pub indexed_vectors: usize,
    /// Stored chunks the index does not cover
    pub missing_from_index: Vec<Uuid>,
    /// Indexed chunk ids whose record no longer exists
    pub orphaned_in_index: Vec<Uuid>,
    /// Documents with chunks missing from the index
    pub stale_documents: Vec<DocumentConsistencyIssue>,
    pub is_consistent: bool,
}

impl ConsistencyReport {
    #[inline]
    pub fn summary(&self) -> String {
        if self.is_consistent {
            format!(
                "Index is consistent: {} stored chunks, {} indexed vectors",
                self.stored_chunks, self.indexed_vectors
            )
        } else {
            format!(
                "Index is out of date: {} chunks not indexed, {} orphaned vectors, {} documents affected",
                self.missing_from_index.len(),
                self.orphaned_in_index.len(),
                self.stale_documents.len()
            )
        }
    }

    #[inline]
    pub fn total_issues(&self) -> usize {
        self.missing_from_index.len() + self.orphaned_in_index.len()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentConsistencyIssue {
    pub document_id: Uuid,
    pub document_name: String,
    pub stored_chunks: usize,
    pub missing_from_index: usize,
}

pub struct ConsistencyValidator<'a> {
    store: &'a dyn RecordStore,
    index: &'a VectorIndex,
}

impl<'a> ConsistencyValidator<'a> {
    #[inline]
    pub fn new(store: &'a dyn RecordStore, index: &'a VectorIndex) -> Self {
        Self { store, index }
    }

    #[inline]
    pub async fn validate_consistency(&self) -> Result<ConsistencyReport> {
        let stored = self.store.chunks_for_build(None).await?;
        let indexed = self.index.chunk_ids().await?;

        let stored_ids: HashSet<Uuid> = stored.iter().map(|c| c.chunk_id).collect();
        let indexed_ids: HashSet<Uuid> = indexed.iter().copied().collect();

        // Keep store and slot order so reports are stable
        let missing_from_index: Vec<Uuid> = stored
            .iter()
            .map(|c| c.chunk_id)
            .filter(|id| !indexed_ids.contains(id))
            .collect();
        let orphaned_in_index: Vec<Uuid> = indexed
            .iter()
            .copied()
            .filter(|id| !stored_ids.contains(id))
            .collect();

        let mut per_document: BTreeMap<(String, Uuid), (usize, usize)> = BTreeMap::new();
        for chunk in &stored {
            let counts = per_document
                .entry((chunk.document_name.clone(), chunk.document_id))
                .or_default();
            counts.0 += 1;
            if !indexed_ids.contains(&chunk.chunk_id) {
                counts.1 += 1;
            }
        }
        let stale_documents: Vec<DocumentConsistencyIssue> = per_document
            .into_iter()
            .filter(|(_, (_, missing))| *missing > 0)
            .map(
                |((document_name, document_id), (stored_chunks, missing))| {
                    DocumentConsistencyIssue {
                        document_id,
                        document_name,
                        stored_chunks,
                        missing_from_index: missing,
                    }
                },
            )
            .collect();

        let is_consistent = missing_from_index.is_empty() && orphaned_in_index.is_empty();
        let report = ConsistencyReport {
            stored_chunks: stored.len(),
            indexed_vectors: indexed.len(),
            missing_from_index,
            orphaned_in_index,
            stale_documents,
            is_consistent,
        };

        if report.is_consistent {
            info!("Index consistency validation passed");
        } else {
            warn!(
                "Index is out of date: {} chunks not indexed, {} orphaned vectors",
                report.missing_from_index.len(),
                report.orphaned_in_index.len()
            );
            for issue in &report.stale_documents {
                warn!(
                    "  {} ({}): {} of {} chunks not indexed",
                    issue.document_name,
                    issue.document_id,
                    issue.missing_from_index,
                    issue.stored_chunks
                );
            }
        }

        Ok(report)
    }
}
