// Vector store
// Coordinates the embedder, metadata store and similarity index behind one coarse lock

pub mod consistency;
pub mod import;

#[cfg(test)]
mod tests;

use chrono::NaiveDateTime;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{RwLock, RwLockMappedWriteGuard, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, error, info, warn};

use crate::config::{Config, SearchSettings, validate_min_score};
use crate::database::sqlite::models::Document;
use crate::database::{Database, IndexOrigin, SimilarityIndex};
use crate::embeddings::{Embedder, create_embedder};
use crate::processors::ProcessorRegistry;
use crate::stats::{StatisticsAggregator, Subscription, VectorDbStatistics};
use crate::{Result, VaultError};

pub use consistency::{ConsistencyReport, RepairReport};
pub use import::{
    ImportCancellation, ImportFileError, ImportOptions, ImportProgress, ImportProgressReporter,
    ImportStats, NoProgress,
};

/// Externally visible state of a [`VectorStore`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Uninitialized,
    Initializing,
    Ready,
    Closed,
}

impl std::fmt::Display for Lifecycle {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            Lifecycle::Uninitialized => write!(f, "uninitialized"),
            Lifecycle::Initializing => write!(f, "initializing"),
            Lifecycle::Ready => write!(f, "ready"),
            Lifecycle::Closed => write!(f, "closed"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchOptions {
    pub limit: usize,
    /// Lowest similarity score returned, in `[0, 1]`
    pub min_score: f32,
    /// Only documents of these types; empty accepts all
    pub file_types: Vec<String>,
    /// Inclusive bounds on the document creation time
    pub date_from: Option<NaiveDateTime>,
    pub date_to: Option<NaiveDateTime>,
}

impl Default for SearchOptions {
    #[inline]
    fn default() -> Self {
        Self::from_settings(&SearchSettings::default())
    }
}

impl SearchOptions {
    #[inline]
    pub fn from_settings(settings: &SearchSettings) -> Self {
        Self {
            limit: settings.default_limit,
            min_score: settings.min_score,
            file_types: Vec::new(),
            date_from: None,
            date_to: None,
        }
    }

    #[inline]
    pub fn validate(&self) -> Result<()> {
        validate_min_score(self.min_score)?;
        Ok(())
    }

    /// Metadata post-filter
    #[inline]
    pub fn matches(&self, document: &Document) -> bool {
        let type_ok = self.file_types.is_empty()
            || self
                .file_types
                .iter()
                .any(|t| t.eq_ignore_ascii_case(&document.doc_type));
        let from_ok = self.date_from.is_none_or(|from| document.created_at >= from);
        let to_ok = self.date_to.is_none_or(|to| document.created_at <= to);
        type_ok && from_ok && to_ok
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResult {
    pub document: Document,
    /// Cosine similarity, `1 - distance`
    pub score: f32,
    pub distance: f32,
}

/// Handles owned while the store is ready
#[derive(Debug)]
pub(crate) struct ReadyState {
    pub(crate) database: Database,
    pub(crate) index: SimilarityIndex,
    pub(crate) index_origin: IndexOrigin,
}

#[derive(Debug)]
enum StoreState {
    Uninitialized,
    Ready(Box<ReadyState>),
    Closed,
}

pub struct VectorStore {
    config: Config,
    embedder: Arc<dyn Embedder>,
    processors: ProcessorRegistry,
    statistics: Arc<StatisticsAggregator>,
    state: RwLock<StoreState>,
    initializing: AtomicBool,
}

impl std::fmt::Debug for VectorStore {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VectorStore")
            .field("data_dir", &self.config.get_base_dir())
            .field("embedder", &self.embedder.model_name())
            .field("processors", &self.processors)
            .finish_non_exhaustive()
    }
}

impl VectorStore {
    /// Store over explicitly constructed collaborators. Nothing is opened until first use.
    #[inline]
    pub fn new(
        config: Config,
        embedder: Arc<dyn Embedder>,
        processors: ProcessorRegistry,
        statistics: Arc<StatisticsAggregator>,
    ) -> Self {
        Self {
            config,
            embedder,
            processors,
            statistics,
            state: RwLock::new(StoreState::Uninitialized),
            initializing: AtomicBool::new(false),
        }
    }

    /// Store with the configured embedder and the built-in processors
    #[inline]
    pub fn from_config(config: Config) -> Result<Self> {
        config.validate()?;
        let embedder = create_embedder(&config.embedding)?;
        let statistics = Arc::new(StatisticsAggregator::new(config.import.clone()));
        Ok(Self::new(
            config,
            embedder,
            ProcessorRegistry::with_defaults(),
            statistics,
        ))
    }

    #[inline]
    pub fn config(&self) -> &Config {
        &self.config
    }

    #[inline]
    pub fn embedder(&self) -> &Arc<dyn Embedder> {
        &self.embedder
    }

    #[inline]
    pub fn processors(&self) -> &ProcessorRegistry {
        &self.processors
    }

    #[inline]
    pub fn statistics(&self) -> &Arc<StatisticsAggregator> {
        &self.statistics
    }

    #[inline]
    pub async fn lifecycle(&self) -> Lifecycle {
        if self.initializing.load(Ordering::Acquire) {
            return Lifecycle::Initializing;
        }
        match *self.state.read().await {
            StoreState::Uninitialized => Lifecycle::Uninitialized,
            StoreState::Ready(_) => Lifecycle::Ready,
            StoreState::Closed => Lifecycle::Closed,
        }
    }

    /// Open the metadata store and load the similarity index.
    /// Idempotent once ready; fails with `NotInitialized` after `close`.
    #[inline]
    pub async fn initialize(&self) -> Result<()> {
        match *self.state.read().await {
            StoreState::Ready(_) => return Ok(()),
            StoreState::Closed => return Err(VaultError::NotInitialized),
            StoreState::Uninitialized => {}
        }

        let mut state = self.state.write().await;
        match *state {
            StoreState::Ready(_) => return Ok(()),
            StoreState::Closed => return Err(VaultError::NotInitialized),
            StoreState::Uninitialized => {}
        }

        self.initializing.store(true, Ordering::Release);
        let opened = self.open().await;
        self.initializing.store(false, Ordering::Release);

        *state = StoreState::Ready(Box::new(opened?));
        Ok(())
    }

    async fn open(&self) -> Result<ReadyState> {
        let data_dir = self.config.get_base_dir();
        info!("Initializing vector store in {}", data_dir.display());
        std::fs::create_dir_all(data_dir)?;

        let database = Database::new(self.config.database_path())
            .await
            .map_err(|e| VaultError::database(&e))?;
        database
            .fail_interrupted_imports()
            .await
            .map_err(|e| VaultError::database(&e))?;

        let (index, index_origin) = SimilarityIndex::load_or_recover(
            &self.config.index_path(),
            self.embedder.dimension(),
            &self.config.index,
        );
        if let IndexOrigin::Recovered { ref reason, .. } = index_origin {
            warn!("Started with an empty similarity index after recovery: {}", reason);
        }

        self.statistics.attach(database.clone());
        let ready = ReadyState {
            database,
            index,
            index_origin,
        };

        if self.config.index.verify_on_startup {
            match consistency::check(&ready).await {
                Ok(report) if report.is_consistent => debug!("{}", report.summary()),
                Ok(report) => warn!("{} (run verify --repair to fix)", report.summary()),
                Err(e) => warn!("Startup consistency check failed: {:#}", e),
            }
        }

        info!(
            "Vector store ready: {} indexed vectors, embedder {}",
            ready.index.count(),
            self.embedder.model_name()
        );
        Ok(ready)
    }

    /// Shared access to the ready state, initializing on first use
    pub(crate) async fn read_ready(&self) -> Result<RwLockReadGuard<'_, ReadyState>> {
        self.initialize().await?;
        RwLockReadGuard::try_map(self.state.read().await, |state| match *state {
            StoreState::Ready(ref ready) => Some(&**ready),
            StoreState::Uninitialized | StoreState::Closed => None,
        })
        .map_err(|_| VaultError::NotInitialized)
    }

    /// Exclusive access to the ready state, initializing on first use
    pub(crate) async fn write_ready(&self) -> Result<RwLockMappedWriteGuard<'_, ReadyState>> {
        self.initialize().await?;
        RwLockWriteGuard::try_map(self.state.write().await, |state| match *state {
            StoreState::Ready(ref mut ready) => Some(&mut **ready),
            StoreState::Uninitialized | StoreState::Closed => None,
        })
        .map_err(|_| VaultError::NotInitialized)
    }

    /// Semantic search over the indexed chunks, best match first
    #[inline]
    pub async fn search(&self, query: &str, options: &SearchOptions) -> Result<Vec<SearchResult>> {
        options.validate()?;
        let state = self.read_ready().await?;

        if state.index.is_empty() || options.limit == 0 {
            debug!("Search skipped: index is empty or no results requested");
            return Ok(Vec::new());
        }

        let query_vector = self.embedder.embed(query).await?;
        let overfetch = self.config.search.overfetch_factor.max(1);
        let k = options
            .limit
            .saturating_mul(overfetch)
            .min(state.index.count());

        let candidates: Vec<(i64, f32)> = state
            .index
            .search(&query_vector, k)?
            .into_iter()
            .filter(|&(_, distance)| 1.0 - distance >= options.min_score)
            .collect();
        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<i64> = candidates.iter().map(|&(id, _)| id).collect();
        let mut documents: HashMap<i64, Document> = state
            .database
            .get_documents(&ids)
            .await
            .map_err(|e| VaultError::database(&e))?
            .into_iter()
            .map(|document| (document.id, document))
            .collect();

        let mut results = Vec::with_capacity(options.limit.min(candidates.len()));
        for (id, distance) in candidates {
            let Some(document) = documents.remove(&id) else {
                debug!("Indexed vector {} has no document row", id);
                continue;
            };
            if !options.matches(&document) {
                continue;
            }
            results.push(SearchResult {
                document,
                score: 1.0 - distance,
                distance,
            });
            if results.len() == options.limit {
                break;
            }
        }

        debug!(
            "Search returned {} results (requested {}, fetched {})",
            results.len(),
            options.limit,
            k
        );
        Ok(results)
    }

    /// Delete every document and replace the index with an empty one
    #[inline]
    pub async fn clear_database(&self) -> Result<()> {
        let mut state = self.write_ready().await?;

        let deleted = state
            .database
            .clear_documents()
            .await
            .map_err(|e| VaultError::database(&e))?;
        if let Err(e) = state.database.optimize().await {
            warn!("Failed to compact metadata store after clearing: {:#}", e);
        }
        state.index = SimilarityIndex::initialize(
            self.embedder.dimension(),
            self.config.index.initial_capacity,
            &self.config.index,
        );

        let path = self.config.index_path();
        let persisted = state
            .index
            .save(&path)
            .map_err(|e| VaultError::IndexPersist {
                path,
                message: e.to_string(),
            });
        drop(state);

        info!("Cleared vector store ({} documents removed)", deleted);
        self.statistics.notify().await;
        persisted
    }

    /// Write the in-memory index to disk again without re-embedding anything
    #[inline]
    pub async fn persist_index(&self) -> Result<()> {
        let state = self.write_ready().await?;
        let path = self.config.index_path();
        state.index.save(&path).map_err(|e| VaultError::IndexPersist {
            path,
            message: e.to_string(),
        })
    }

    /// Persist the index, close the metadata store and refuse further calls
    #[inline]
    pub async fn close(&self) -> Result<()> {
        let mut state = self.state.write().await;

        match std::mem::replace(&mut *state, StoreState::Closed) {
            StoreState::Closed => Err(VaultError::NotInitialized),
            StoreState::Uninitialized => {
                info!("Vector store closed before initialization");
                Ok(())
            }
            StoreState::Ready(ready) => {
                if ready.index.count() > 0 {
                    let path = self.config.index_path();
                    if let Err(e) = ready.index.save(&path) {
                        error!("Failed to persist similarity index on close: {}", e);
                        *state = StoreState::Ready(ready);
                        return Err(VaultError::IndexPersist {
                            path,
                            message: e.to_string(),
                        });
                    }
                }
                ready.database.close().await;
                info!("Vector store closed");
                Ok(())
            }
        }
    }

    #[inline]
    pub async fn index_count(&self) -> Result<usize> {
        Ok(self.read_ready().await?.index.count())
    }

    /// How the index was obtained at startup
    #[inline]
    pub async fn index_origin(&self) -> Result<IndexOrigin> {
        Ok(self.read_ready().await?.index_origin.clone())
    }

    #[inline]
    pub async fn get_statistics(&self) -> Result<VectorDbStatistics> {
        self.initialize().await?;
        self.statistics.get_statistics().await
    }

    /// Register a statistics listener; see [`StatisticsAggregator::on_update`]
    #[inline]
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&VectorDbStatistics) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.statistics.on_update(listener)
    }
}
