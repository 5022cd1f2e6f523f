// Similarity index module
// Approximate nearest-neighbour search over embedding vectors, persisted to one binary file

pub mod hnsw;
pub mod persistence;


use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::config::IndexSettings;
use crate::embeddings::l2_normalize;
use hnsw::{HnswGraph, HnswParams};

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("Index I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Index file is corrupt: {0}")]
    Corrupt(String),
    #[error("Vector dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("Cannot index a zero vector")]
    ZeroVector,
}

/// How an index came to be in memory
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexOrigin {
    Loaded,
    /// No file existed
    Created,
    /// The file was unusable; it was moved to `backup` and a fresh index built
    Recovered {
        reason: String,
        backup: Option<PathBuf>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct SimilarityIndex {
    graph: HnswGraph,
}

impl SimilarityIndex {
    /// Empty index with room for at least `capacity` points
    #[inline]
    pub fn initialize(dimension: usize, capacity: usize, settings: &IndexSettings) -> Self {
        let params = HnswParams {
            m: settings.m,
            ef_construction: settings.ef_construction,
            ef_search: settings.ef_search,
        };
        debug!(
            "Initializing similarity index (dimension {}, capacity {})",
            dimension, capacity
        );
        Self {
            graph: HnswGraph::new(dimension, capacity, params),
        }
    }

    /// Load a persisted index. `Ok(None)` when no file exists.
    #[inline]
    pub fn load(path: &Path, dimension: usize) -> Result<Option<Self>, IndexError> {
        if !path.exists() {
            return Ok(None);
        }

        let graph = persistence::read_graph(path)?;
        if graph.dimension() != dimension {
            return Err(IndexError::DimensionMismatch {
                expected: dimension,
                actual: graph.dimension(),
            });
        }

        info!(
            "Loaded similarity index from {} ({} points)",
            path.display(),
            graph.len()
        );
        Ok(Some(Self { graph }))
    }

    /// Load the index at `path`, falling back to a fresh one when it is missing or unusable
    #[inline]
    pub fn load_or_recover(
        path: &Path,
        dimension: usize,
        settings: &IndexSettings,
    ) -> (Self, IndexOrigin) {
        match Self::load(path, dimension) {
            Ok(Some(mut index)) => {
                index.graph.set_ef_search(settings.ef_search);
                (index, IndexOrigin::Loaded)
            }
            Ok(None) => {
                info!("No similarity index at {}, starting empty", path.display());
                (
                    Self::initialize(dimension, settings.initial_capacity, settings),
                    IndexOrigin::Created,
                )
            }
            Err(e) => {
                warn!("Similarity index at {} is unusable: {}", path.display(), e);
                let backup = Self::attempt_corruption_recovery(path);
                (
                    Self::initialize(dimension, settings.initial_capacity, settings),
                    IndexOrigin::Recovered {
                        reason: e.to_string(),
                        backup,
                    },
                )
            }
        }
    }

    /// Move an unusable index file aside so a fresh index can take its place
    fn attempt_corruption_recovery(path: &Path) -> Option<PathBuf> {
        warn!("Attempting similarity index recovery at {}", path.display());

        let backup_path = path.with_extension("corrupted_backup");
        match std::fs::rename(path, &backup_path) {
            Ok(()) => {
                info!("Corrupted index backed up to {}", backup_path.display());
                Some(backup_path)
            }
            Err(e) => {
                error!("Failed to back up corrupted index: {}", e);
                if let Err(e) = std::fs::remove_file(path) {
                    error!("Failed to remove corrupted index: {}", e);
                }
                None
            }
        }
    }

    /// Insert or replace the vector for `id`. The vector is normalized to unit length.
    #[inline]
    pub fn add(&mut self, id: i64, mut vector: Vec<f32>) -> Result<(), IndexError> {
        self.check_dimension(vector.len())?;
        if !l2_normalize(&mut vector) {
            return Err(IndexError::ZeroVector);
        }
        self.graph.insert(id, vector);
        Ok(())
    }

    #[inline]
    pub fn remove(&mut self, id: i64) -> bool {
        self.graph.remove(id)
    }

    /// Current vector for `id`, if indexed
    #[inline]
    pub fn vector(&self, id: i64) -> Option<Vec<f32>> {
        self.graph.vector(id).map(<[f32]>::to_vec)
    }

    /// Undo an `add`: put back the vector `id` had before, or drop the point if it had none
    #[inline]
    pub fn restore(&mut self, id: i64, previous: Option<Vec<f32>>) -> Result<(), IndexError> {
        match previous {
            Some(vector) => self.add(id, vector),
            None => {
                self.graph.remove(id);
                Ok(())
            }
        }
    }

    #[inline]
    pub fn contains(&self, id: i64) -> bool {
        self.graph.contains(id)
    }

    /// Up to `k` `(id, cosine distance)` pairs, nearest first
    #[inline]
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<(i64, f32)>, IndexError> {
        self.check_dimension(query.len())?;
        if self.graph.is_empty() {
            return Ok(Vec::new());
        }

        let mut query = query.to_vec();
        if !l2_normalize(&mut query) {
            return Err(IndexError::ZeroVector);
        }
        Ok(self.graph.search(&query, k))
    }

    #[inline]
    pub fn save(&self, path: &Path) -> Result<(), IndexError> {
        persistence::write_graph(&self.graph, path)?;
        info!(
            "Saved similarity index to {} ({} points)",
            path.display(),
            self.count()
        );
        Ok(())
    }

    #[inline]
    pub fn count(&self) -> usize {
        self.graph.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.graph.is_empty()
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.graph.capacity()
    }

    #[inline]
    pub fn dimension(&self) -> usize {
        self.graph.dimension()
    }

    #[inline]
    pub fn tombstones(&self) -> usize {
        self.graph.tombstones()
    }

    /// Live ids in ascending order
    #[inline]
    pub fn ids(&self) -> Vec<i64> {
        self.graph.ids()
    }

    fn check_dimension(&self, actual: usize) -> Result<(), IndexError> {
        if actual == self.dimension() {
            Ok(())
        } else {
            Err(IndexError::DimensionMismatch {
                expected: self.dimension(),
                actual,
            })
        }
    }
}
