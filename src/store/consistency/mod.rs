// Consistency validation
// Compares the metadata store's documents with the vectors held by the similarity index


use serde::Serialize;
use std::collections::BTreeSet;
use tracing::{debug, error, info, warn};

use super::{ReadyState, VectorStore};
use crate::{Result, VaultError};

/// Document ids present on only one side of the store
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConsistencyReport {
    /// Documents in the metadata store
    pub documents: usize,
    /// Live vectors in the similarity index
    pub indexed: usize,
    /// Documents with no vector
    pub missing_in_index: Vec<i64>,
    /// Vectors with no document
    pub orphaned_in_index: Vec<i64>,
    pub is_consistent: bool,
}

impl ConsistencyReport {
    /// Compare two id sets; both sides may be unsorted
    #[inline]
    pub fn compare(document_ids: &[i64], indexed_ids: &[i64]) -> Self {
        let documents: BTreeSet<i64> = document_ids.iter().copied().collect();
        let indexed: BTreeSet<i64> = indexed_ids.iter().copied().collect();

        let missing_in_index: Vec<i64> = documents.difference(&indexed).copied().collect();
        let orphaned_in_index: Vec<i64> = indexed.difference(&documents).copied().collect();
        let is_consistent = missing_in_index.is_empty() && orphaned_in_index.is_empty();

        Self {
            documents: documents.len(),
            indexed: indexed.len(),
            missing_in_index,
            orphaned_in_index,
            is_consistent,
        }
    }

    #[inline]
    pub fn summary(&self) -> String {
        if self.is_consistent {
            format!(
                "Store is consistent: {} documents, {} indexed vectors",
                self.documents, self.indexed
            )
        } else {
            format!(
                "Store inconsistencies found: {} documents missing from the index, {} orphaned vectors",
                self.missing_in_index.len(),
                self.orphaned_in_index.len()
            )
        }
    }

    #[inline]
    pub fn total_issues(&self) -> usize {
        self.missing_in_index.len() + self.orphaned_in_index.len()
    }

    fn log_issues(&self) {
        if !self.missing_in_index.is_empty() {
            warn!(
                "Found {} documents without a vector (first: {:?})",
                self.missing_in_index.len(),
                self.missing_in_index.first()
            );
        }
        if !self.orphaned_in_index.is_empty() {
            warn!(
                "Found {} vectors without a document (first: {:?})",
                self.orphaned_in_index.len(),
                self.orphaned_in_index.first()
            );
        }
    }
}

/// Outcome of [`VectorStore::repair_index`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RepairReport {
    /// State found before repairing
    pub before: ConsistencyReport,
    pub reembedded: usize,
    pub removed_orphans: usize,
    /// Documents whose vector could not be regenerated
    pub failed: Vec<i64>,
}

impl RepairReport {
    #[inline]
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

pub(crate) async fn check(state: &ReadyState) -> anyhow::Result<ConsistencyReport> {
    let document_ids = state.database.document_ids().await?;
    let report = ConsistencyReport::compare(&document_ids, &state.index.ids());
    debug!(
        "Consistency check: {} documents, {} indexed",
        report.documents, report.indexed
    );
    if !report.is_consistent {
        report.log_issues();
    }
    Ok(report)
}

impl VectorStore {
    #[inline]
    pub async fn verify_consistency(&self) -> Result<ConsistencyReport> {
        let state = self.read_ready().await?;
        check(&state).await.map_err(|e| VaultError::database(&e))
    }

    /// Re-embed documents missing from the index, drop orphaned vectors, then persist
    #[inline]
    pub async fn repair_index(&self) -> Result<RepairReport> {
        let mut state = self.write_ready().await?;
        let before = check(&state).await.map_err(|e| VaultError::database(&e))?;
        if before.is_consistent {
            info!("{}", before.summary());
            return Ok(RepairReport {
                before,
                reembedded: 0,
                removed_orphans: 0,
                failed: Vec::new(),
            });
        }

        info!("Repairing similarity index: {}", before.summary());
        let removed_orphans = before
            .orphaned_in_index
            .iter()
            .filter(|&&id| state.index.remove(id))
            .count();

        let documents = state
            .database
            .get_documents(&before.missing_in_index)
            .await
            .map_err(|e| VaultError::database(&e))?;
        let mut reembedded = 0;
        let mut failed = Vec::new();
        for document in documents {
            let added = match self.embedder.embed(&document.content).await {
                Ok(vector) => state.index.add(document.id, vector).map_err(VaultError::from),
                Err(e) => Err(e.into()),
            };
            match added {
                Ok(()) => {
                    reembedded += 1;
                    debug!("Re-embedded document {}", document.id);
                }
                Err(e) => {
                    error!("Failed to re-embed document {}: {}", document.id, e);
                    failed.push(document.id);
                }
            }
        }

        let path = self.config.index_path();
        state
            .index
            .save(&path)
            .map_err(|e| VaultError::IndexPersist {
                path,
                message: e.to_string(),
            })?;
        state
            .database
            .recompute_stats(None)
            .await
            .map_err(|e| VaultError::database(&e))?;
        drop(state);

        info!(
            "Repair finished: {} re-embedded, {} orphans removed, {} failed",
            reembedded,
            removed_orphans,
            failed.len()
        );
        self.statistics.notify().await;

        Ok(RepairReport {
            before,
            reembedded,
            removed_orphans,
            failed,
        })
    }
}
