// Import pipeline
// Path expansion, chunk deduplication, batched embedding and per-chunk persistence


use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

use super::{ReadyState, VectorStore};
use crate::config::{ConfigError, ImportSettings};
use crate::database::sqlite::models::{
    DocumentVectorStatsUpdate, ImportOperationUpdate, ImportStatus, NewDocument,
};
use crate::database::sqlite::queries::{DocumentQueries, VectorStatsQueries};
use crate::embeddings::{EmbeddingError, ParsingStrategy, content_hash, estimate_token_count};
use crate::processors::{ChunkMetadata, ProcessOptions, ProcessorRegistry, file_extension};
use crate::{Result, VaultError};

/// Receives progress after every attempted file and once more when the run ends
pub trait ImportProgressReporter: Send + Sync {
    fn report(&self, progress: &ImportProgress);
}

impl<F> ImportProgressReporter for F
where
    F: Fn(&ImportProgress) + Send + Sync,
{
    #[inline]
    fn report(&self, progress: &ImportProgress) {
        self(progress);
    }
}

/// Reporter that discards progress
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl ImportProgressReporter for NoProgress {
    #[inline]
    fn report(&self, _progress: &ImportProgress) {}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImportProgress {
    /// Files attempted so far, successful or not
    pub files_processed: usize,
    pub total_files: usize,
    pub current_file: Option<PathBuf>,
    pub chunks_created: usize,
    pub status: ImportStatus,
}

/// Cooperative cancellation flag, checked between files
#[derive(Debug, Clone, Default)]
pub struct ImportCancellation(Arc<AtomicBool>);

impl ImportCancellation {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ImportOptions {
    pub chunk_size: usize,
    pub overlap_size: usize,
    pub parsing_strategy: ParsingStrategy,
    /// Chunks sent to the embedder per request
    pub batch_size: usize,
    /// Expand every path recursively instead of treating it as a file
    pub is_directory: bool,
    /// Skip chunks whose content hash is already stored
    pub skip_duplicates: bool,
    /// Re-embed chunks even when their content hash is already stored
    pub force_update: bool,
    /// Extensions accepted during directory expansion; empty accepts all registered ones
    pub file_types: Vec<String>,
    #[serde(skip)]
    pub cancellation: ImportCancellation,
}

impl Default for ImportOptions {
    #[inline]
    fn default() -> Self {
        Self::from_settings(&ImportSettings::default())
    }
}

impl ImportOptions {
    #[inline]
    pub fn from_settings(settings: &ImportSettings) -> Self {
        Self {
            chunk_size: settings.chunk_size,
            overlap_size: settings.overlap_size,
            parsing_strategy: settings.parsing_strategy,
            batch_size: settings.batch_size,
            is_directory: false,
            skip_duplicates: true,
            force_update: false,
            file_types: settings.file_types.clone(),
            cancellation: ImportCancellation::default(),
        }
    }

    #[inline]
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 || self.chunk_size > 100_000 {
            return Err(ConfigError::InvalidChunkSize(self.chunk_size).into());
        }
        if self.overlap_size >= self.chunk_size {
            return Err(ConfigError::OverlapTooLarge(self.overlap_size, self.chunk_size).into());
        }
        if self.batch_size == 0 || self.batch_size > 1000 {
            return Err(ConfigError::InvalidBatchSize(self.batch_size).into());
        }
        Ok(())
    }

    #[inline]
    pub fn process_options(&self) -> ProcessOptions {
        ProcessOptions {
            chunk_size: self.chunk_size,
            overlap_size: self.overlap_size,
            parsing_strategy: self.parsing_strategy,
        }
    }

    fn should_skip(&self, already_stored: bool) -> bool {
        self.skip_duplicates && !self.force_update && already_stored
    }

    fn accepts_extension(&self, path: &Path) -> bool {
        self.file_types.is_empty()
            || file_extension(path).is_some_and(|ext| {
                self.file_types
                    .iter()
                    .any(|wanted| wanted.trim_start_matches('.').eq_ignore_ascii_case(&ext))
            })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportFileError {
    pub file: PathBuf,
    pub error: String,
    pub retryable: bool,
}

impl ImportFileError {
    fn new(file: &Path, error: impl std::fmt::Display, retryable: bool) -> Self {
        Self {
            file: file.to_path_buf(),
            error: error.to_string(),
            retryable,
        }
    }
}

/// Outcome of one `import_files` call
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImportStats {
    /// False when the run finished but the index could not be persisted
    pub success: bool,
    /// Files whose chunks were processed, including files with only duplicate chunks
    pub files_processed: usize,
    pub files_failed: usize,
    /// Files resolved from the input paths
    pub total_files: usize,
    /// Vectors embedded and stored by this run
    pub vector_count: usize,
    /// Chunks produced by the processors
    pub chunks_created: usize,
    pub skipped_duplicates: usize,
    /// Chunks dropped after an embedding or indexing failure
    pub failed_chunks: usize,
    /// Vectors in the similarity index after the run
    pub total_vectors: usize,
    pub errors: Vec<ImportFileError>,
    pub cancelled: bool,
    pub duration_ms: u64,
    pub operation_id: i64,
    /// Run-level failure, set when `success` is false
    pub error: Option<String>,
}

/// Per-file counters
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct FileOutcome {
    chunks: usize,
    vectors: usize,
    skipped: usize,
    failed_chunks: usize,
}

/// Running totals folded over the per-file results
#[derive(Debug, Default)]
struct ImportRun {
    total_files: usize,
    attempted: usize,
    files_processed: usize,
    chunks_created: usize,
    vector_count: usize,
    skipped_duplicates: usize,
    failed_chunks: usize,
    errors: Vec<ImportFileError>,
    cancelled: bool,
}

impl ImportRun {
    fn new(total_files: usize, errors: Vec<ImportFileError>) -> Self {
        Self {
            total_files,
            errors,
            ..Self::default()
        }
    }

    fn absorb(mut self, result: std::result::Result<FileOutcome, ImportFileError>) -> Self {
        self.attempted += 1;
        match result {
            Ok(outcome) => {
                self.files_processed += 1;
                self.chunks_created += outcome.chunks;
                self.vector_count += outcome.vectors;
                self.skipped_duplicates += outcome.skipped;
                self.failed_chunks += outcome.failed_chunks;
            }
            Err(error) => self.errors.push(error),
        }
        self
    }

    fn progress(&self, current_file: Option<&Path>, status: ImportStatus) -> ImportProgress {
        ImportProgress {
            files_processed: self.attempted,
            total_files: self.total_files,
            current_file: current_file.map(Path::to_path_buf),
            chunks_created: self.chunks_created,
            status,
        }
    }

    fn error_details(&self) -> Option<String> {
        if self.errors.is_empty() {
            return None;
        }
        serde_json::to_string(&self.errors).ok()
    }
}

/// Chunk waiting to be embedded
struct PendingChunk {
    content: String,
    metadata: ChunkMetadata,
    content_hash: String,
}

/// Expand the input paths into the files to import.
/// Directory walk failures become per-file errors instead of aborting the run.
pub(crate) fn resolve_paths(
    paths: &[PathBuf],
    options: &ImportOptions,
    registry: &ProcessorRegistry,
) -> (Vec<PathBuf>, Vec<ImportFileError>) {
    let mut seen = HashSet::new();
    let (files, errors) = paths.iter().fold(
        (Vec::new(), Vec::new()),
        |(mut files, mut errors), path| {
            if options.is_directory && path.is_dir() {
                for entry in WalkDir::new(path).follow_links(true).sort_by_file_name() {
                    match entry {
                        Ok(entry)
                            if entry.file_type().is_file()
                                && registry.supports(entry.path())
                                && options.accepts_extension(entry.path()) =>
                        {
                            files.push(entry.into_path());
                        }
                        Ok(_) => {}
                        Err(e) => {
                            let failed = e.path().unwrap_or(path.as_path()).to_path_buf();
                            warn!("Failed to read {}: {}", failed.display(), e);
                            errors.push(ImportFileError::new(&failed, &e, true));
                        }
                    }
                }
            } else {
                files.push(path.clone());
            }
            (files, errors)
        },
    );

    let files = files
        .into_iter()
        .filter(|file| seen.insert(file.clone()))
        .collect();
    (files, errors)
}

impl VectorStore {
    /// Import files into the store.
    ///
    /// Per-file failures are collected in the returned stats and never abort the run.
    /// A metadata store failure aborts the run, marks the operation failed and is returned.
    #[inline]
    pub async fn import_files(
        &self,
        paths: &[PathBuf],
        options: &ImportOptions,
        progress: &dyn ImportProgressReporter,
    ) -> Result<ImportStats> {
        options.validate()?;
        let started = Instant::now();
        let mut state = self.write_ready().await?;

        let (files, resolve_errors) = resolve_paths(paths, options, &self.processors);
        let configuration = serde_json::to_string(options).ok();
        let operation = state
            .database
            .start_import(configuration.as_deref())
            .await
            .map_err(|e| VaultError::database(&e))?;
        info!(
            "Import {} started: {} files resolved from {} paths",
            operation.id,
            files.len(),
            paths.len()
        );
        self.statistics.notify().await;

        let index_path = self.config.index_path();
        let run = ImportRun::new(files.len(), resolve_errors);
        let run = match self
            .import_resolved(&mut state, &files, options, progress, run)
            .await
        {
            Ok(run) => run,
            Err(e) => {
                abort_import(&state, &index_path, operation.id, started, None, &e).await;
                drop(state);
                self.statistics.notify().await;
                return Err(e);
            }
        };

        if let Err(e) = state
            .database
            .recompute_stats(Some(Utc::now().naive_utc()))
            .await
            .map_err(|e| VaultError::database(&e))
        {
            abort_import(&state, &index_path, operation.id, started, Some(&run), &e).await;
            drop(state);
            self.statistics.notify().await;
            return Err(e);
        }

        let persist_error = state.index.save(&index_path).err().map(|e| {
            warn!("Failed to persist similarity index after import: {}", e);
            VaultError::IndexPersist {
                path: index_path.clone(),
                message: e.to_string(),
            }
            .to_string()
        });
        let success = persist_error.is_none();
        let total_vectors = state.index.count();
        let duration_ms = elapsed_ms(started);

        let update = ImportOperationUpdate {
            status: if success {
                ImportStatus::Completed
            } else {
                ImportStatus::Failed
            },
            files_processed: i64::try_from(run.files_processed).unwrap_or(i64::MAX),
            files_failed: i64::try_from(run.errors.len()).unwrap_or(i64::MAX),
            total_processing_time: duration_ms,
            error_details: run.error_details(),
        };
        if let Err(e) = state
            .database
            .finish_import(operation.id, &update)
            .await
            .map_err(|e| VaultError::database(&e))
        {
            abort_import(&state, &index_path, operation.id, started, Some(&run), &e).await;
            drop(state);
            self.statistics.notify().await;
            return Err(e);
        }
        drop(state);

        progress.report(&run.progress(None, update.status));
        info!(
            "Import {} finished: {} files processed, {} failed, {} vectors added, {} duplicates skipped",
            operation.id,
            run.files_processed,
            run.errors.len(),
            run.vector_count,
            run.skipped_duplicates
        );
        self.statistics.notify().await;

        Ok(ImportStats {
            success,
            files_processed: run.files_processed,
            files_failed: run.errors.len(),
            total_files: run.total_files,
            vector_count: run.vector_count,
            chunks_created: run.chunks_created,
            skipped_duplicates: run.skipped_duplicates,
            failed_chunks: run.failed_chunks,
            total_vectors,
            errors: run.errors,
            cancelled: run.cancelled,
            duration_ms: u64::try_from(duration_ms).unwrap_or(0),
            operation_id: operation.id,
            error: persist_error,
        })
    }

    async fn import_resolved(
        &self,
        state: &mut ReadyState,
        files: &[PathBuf],
        options: &ImportOptions,
        progress: &dyn ImportProgressReporter,
        mut run: ImportRun,
    ) -> Result<ImportRun> {
        for file in files {
            if options.cancellation.is_cancelled() {
                info!(
                    "Import cancelled after {} of {} files",
                    run.attempted, run.total_files
                );
                run.cancelled = true;
                break;
            }
            let result = self.import_file(state, file, options).await?;
            run = run.absorb(result);
            progress.report(&run.progress(Some(file), ImportStatus::Running));
        }
        Ok(run)
    }

    /// Outer error aborts the run; inner error is recorded against the file
    async fn import_file(
        &self,
        state: &mut ReadyState,
        file: &Path,
        options: &ImportOptions,
    ) -> Result<std::result::Result<FileOutcome, ImportFileError>> {
        let Some(processor) = self.processors.get_processor(file) else {
            let error = VaultError::ProcessorNotFound {
                path: file.to_path_buf(),
                extension: file_extension(file).unwrap_or_default(),
            };
            warn!("Skipping {}: {}", file.display(), error);
            return Ok(Err(ImportFileError::new(file, &error, false)));
        };

        debug!("Processing {} with {}", file.display(), processor.name());
        let processed = match processor
            .process_file(file, &options.process_options())
            .await
        {
            Ok(processed) => processed,
            Err(e) => {
                warn!("Failed to process {}: {}", file.display(), e);
                return Ok(Err(ImportFileError::new(file, &e, e.is_retryable())));
            }
        };

        let mut outcome = FileOutcome {
            chunks: processed.len(),
            ..FileOutcome::default()
        };
        let mut pending = Vec::with_capacity(processed.len());
        let mut hashes_in_file = HashSet::new();
        for (content, metadata) in processed.contents.into_iter().zip(processed.metadata) {
            let hash = content_hash(&content);
            let stored = state
                .database
                .document_exists(&hash)
                .await
                .map_err(|e| VaultError::database(&e))?;
            let repeated = !hashes_in_file.insert(hash.clone());
            if options.should_skip(stored || repeated) {
                outcome.skipped += 1;
                continue;
            }
            pending.push(PendingChunk {
                content,
                metadata,
                content_hash: hash,
            });
        }

        let mut last_embedding_error: Option<EmbeddingError> = None;
        for batch in pending.chunks(options.batch_size.max(1)) {
            for (chunk, embedded) in batch.iter().zip(self.embed_chunks(batch).await) {
                match embedded {
                    Ok(vector) => {
                        if Self::store_chunk(state, chunk, vector).await? {
                            outcome.vectors += 1;
                        } else {
                            outcome.failed_chunks += 1;
                        }
                    }
                    Err(e) => {
                        warn!("Failed to embed a chunk of {}: {}", file.display(), e);
                        outcome.failed_chunks += 1;
                        last_embedding_error = Some(e);
                    }
                }
            }
        }

        if outcome.vectors == 0 && !pending.is_empty() {
            if let Some(e) = last_embedding_error {
                return Ok(Err(ImportFileError::new(
                    file,
                    format!("Embedding failed for every chunk: {e}"),
                    e.is_retryable(),
                )));
            }
        }

        debug!(
            "Imported {}: {} chunks, {} vectors, {} skipped",
            file.display(),
            outcome.chunks,
            outcome.vectors,
            outcome.skipped
        );
        Ok(Ok(outcome))
    }

    /// Embed one batch, falling back to single requests so one bad chunk only loses itself
    async fn embed_chunks(
        &self,
        batch: &[PendingChunk],
    ) -> Vec<std::result::Result<Vec<f32>, EmbeddingError>> {
        let texts: Vec<String> = batch.iter().map(|chunk| chunk.content.clone()).collect();
        match self.embedder.embed_batch(&texts).await {
            Ok(vectors) if vectors.len() == texts.len() => vectors.into_iter().map(Ok).collect(),
            Ok(vectors) => {
                warn!(
                    "Embedder returned {} vectors for {} texts, retrying one by one",
                    vectors.len(),
                    texts.len()
                );
                self.embed_each(&texts).await
            }
            Err(e) => {
                debug!("Batch embedding failed ({}), retrying one by one", e);
                self.embed_each(&texts).await
            }
        }
    }

    async fn embed_each(
        &self,
        texts: &[String],
    ) -> Vec<std::result::Result<Vec<f32>, EmbeddingError>> {
        let mut vectors = Vec::with_capacity(texts.len());
        for text in texts {
            vectors.push(self.embedder.embed(text).await);
        }
        vectors
    }

    /// Write the chunk row and its vector together.
    /// Returns false when the vector was rejected by the index; the row is rolled back.
    async fn store_chunk(
        state: &mut ReadyState,
        chunk: &PendingChunk,
        vector: Vec<f32>,
    ) -> Result<bool> {
        let new_document = NewDocument {
            content: chunk.content.clone(),
            source: chunk.metadata.source.clone(),
            doc_type: chunk.metadata.doc_type.clone(),
            title: chunk.metadata.title.clone(),
            category: chunk.metadata.category.clone(),
            content_hash: chunk.content_hash.clone(),
        };
        let dimension = vector.len();
        let total_tokens = i64::try_from(estimate_token_count(&chunk.content)).unwrap_or(i64::MAX);

        let mut tx = state
            .database
            .begin()
            .await
            .map_err(|e| VaultError::database(&e))?;
        let id = DocumentQueries::upsert(&mut *tx, &new_document)
            .await
            .map_err(|e| VaultError::database(&e))?;
        let stats = DocumentVectorStatsUpdate {
            document_id: id,
            vector_count: 1,
            average_vector_length: dimension as f64,
            total_tokens,
            chunks_count: 1,
        };
        VectorStatsQueries::upsert(&mut *tx, &stats)
            .await
            .map_err(|e| VaultError::database(&e))?;

        let previous = state.index.vector(id);
        if let Err(e) = state.index.add(id, vector) {
            warn!("Failed to index chunk {}: {}", id, e);
            tx.rollback()
                .await
                .map_err(|e| VaultError::Database(e.to_string()))?;
            return Ok(false);
        }

        if let Err(e) = tx.commit().await {
            if let Err(restore_error) = state.index.restore(id, previous) {
                error!("Failed to restore index point {}: {}", id, restore_error);
            }
            return Err(VaultError::Database(e.to_string()));
        }
        Ok(true)
    }
}

/// Cleanup after a run-level failure: keep committed vectors on disk and mark the operation failed
async fn abort_import(
    state: &ReadyState,
    index_path: &Path,
    operation_id: i64,
    started: Instant,
    run: Option<&ImportRun>,
    cause: &VaultError,
) {
    warn!("Import {} aborted: {}", operation_id, cause);
    if let Err(e) = state.index.save(index_path) {
        error!(
            "Failed to persist similarity index for aborted import {}: {}",
            operation_id, e
        );
    }

    let update = ImportOperationUpdate {
        status: ImportStatus::Failed,
        files_processed: run.map_or(0, |run| i64::try_from(run.files_processed).unwrap_or(i64::MAX)),
        files_failed: run.map_or(0, |run| i64::try_from(run.errors.len()).unwrap_or(i64::MAX)),
        total_processing_time: elapsed_ms(started),
        error_details: serde_json::to_string(&[cause.to_string()]).ok(),
    };
    if let Err(e) = state.database.finish_import(operation_id, &update).await {
        error!("Failed to record aborted import {}: {:#}", operation_id, e);
    }
}

fn elapsed_ms(started: Instant) -> i64 {
    i64::try_from(started.elapsed().as_millis()).unwrap_or(i64::MAX)
}
