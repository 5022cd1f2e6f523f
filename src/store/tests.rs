use super::*;
use crate::database::sqlite::models::ImportStatus;
use crate::embeddings::{EmbeddingError, HashingEmbedder};
use crate::processors::{
    ChunkMetadata, DocumentProcessor, ProcessOptions, ProcessedFile, ProcessorError, read_text,
};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::AtomicUsize;
use tempfile::TempDir;

const DIMENSION: usize = 64;

/// Splits a `.sec` file on `---` lines, one chunk per section
struct SectionProcessor;

#[async_trait]
impl DocumentProcessor for SectionProcessor {
    fn name(&self) -> &str {
        "sections"
    }

    fn supported_extensions(&self) -> &[&str] {
        &["sec"]
    }

    async fn process_file(
        &self,
        path: &Path,
        _options: &ProcessOptions,
    ) -> std::result::Result<ProcessedFile, ProcessorError> {
        let text = read_text(path).await?;
        let contents = text
            .split("\n---\n")
            .map(str::trim)
            .filter(|section| !section.is_empty())
            .map(str::to_string)
            .collect();
        let metadata = ChunkMetadata {
            source: path.display().to_string(),
            doc_type: "sec".to_string(),
            title: None,
            category: None,
        };
        Ok(ProcessedFile::uniform(contents, &metadata))
    }
}

/// Hashing embedder that refuses any text containing `FAIL`
struct FlakyEmbedder(HashingEmbedder);

#[async_trait]
impl Embedder for FlakyEmbedder {
    fn model_name(&self) -> &str {
        "flaky"
    }

    fn dimension(&self) -> usize {
        self.0.dimension()
    }

    async fn embed(&self, text: &str) -> std::result::Result<Vec<f32>, EmbeddingError> {
        if text.contains("FAIL") {
            return Err(EmbeddingError::Unavailable("model offline".to_string()));
        }
        self.0.embed(text).await
    }
}

fn test_config(dir: &Path) -> Config {
    let mut config = Config::with_base_dir(dir);
    config.embedding = crate::config::EmbeddingConfig::Hashing(
        crate::config::HashingEmbeddingConfig {
            dimension: DIMENSION,
        },
    );
    config.index.initial_capacity = 4;
    config
}

fn store_at(dir: &Path) -> VectorStore {
    let config = test_config(dir);
    let mut processors = ProcessorRegistry::with_defaults();
    processors.register(Arc::new(SectionProcessor));
    let statistics = Arc::new(StatisticsAggregator::new(config.import.clone()));
    VectorStore::new(
        config,
        Arc::new(FlakyEmbedder(HashingEmbedder::new(DIMENSION))),
        processors,
        statistics,
    )
}

fn write_sections(dir: &Path, name: &str, sections: &[&str]) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, sections.join("\n---\n")).expect("should write fixture");
    path
}

fn topics() -> [&'static str; 3] {
    [
        "Rust ownership moves values and borrowing lends references without copying",
        "Sourdough bread needs a lively starter, flour, water and a long slow rise",
        "Tidal pools hold anemones, crabs and starfish between the ocean waves",
    ]
}

async fn import(store: &VectorStore, paths: &[PathBuf], options: &ImportOptions) -> ImportStats {
    store
        .import_files(paths, options, &NoProgress)
        .await
        .expect("import should run")
}

#[tokio::test]
async fn store_opens_lazily() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let store = store_at(temp_dir.path());

    assert_eq!(store.lifecycle().await, Lifecycle::Uninitialized);
    assert!(!temp_dir.path().join("metadata.db").exists());

    assert_eq!(store.index_count().await.expect("should count"), 0);
    assert_eq!(store.lifecycle().await, Lifecycle::Ready);
    assert!(temp_dir.path().join("metadata.db").exists());
    assert_eq!(
        store.index_origin().await.expect("should report origin"),
        IndexOrigin::Created
    );

    store.initialize().await.expect("initialize is idempotent");
}

#[tokio::test]
async fn import_of_three_chunks() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let store = store_at(temp_dir.path());
    let file = write_sections(temp_dir.path(), "topics.sec", &topics());

    let reports = Mutex::new(Vec::new());
    let reporter = |progress: &ImportProgress| {
        reports
            .lock()
            .expect("should lock")
            .push(progress.clone());
    };
    let stats = store
        .import_files(&[file], &ImportOptions::default(), &reporter)
        .await
        .expect("import should run");

    assert!(stats.success);
    assert_eq!(stats.total_files, 1);
    assert_eq!(stats.files_processed, 1);
    assert_eq!(stats.files_failed, 0);
    assert_eq!(stats.chunks_created, 3);
    assert_eq!(stats.vector_count, 3);
    assert_eq!(stats.total_vectors, 3);
    assert!(stats.errors.is_empty());
    assert!(!stats.cancelled);
    assert!(store.config().index_path().exists());

    let reports = reports.lock().expect("should lock");
    assert_eq!(reports.len(), 2);
    assert_eq!(reports[0].files_processed, 1);
    assert_eq!(reports[0].status, ImportStatus::Running);
    assert_eq!(reports[1].status, ImportStatus::Completed);
    assert_eq!(reports[1].chunks_created, 3);

    let statistics = store
        .get_statistics()
        .await
        .expect("should collect statistics");
    assert_eq!(statistics.database_stats.total_documents, 3);
    assert!(statistics.database_stats.last_import_at.is_some());
    assert!(statistics.current_operation.is_none());
    assert_eq!(statistics.recent_operations.len(), 1);
    assert_eq!(
        statistics.recent_operations[0].status,
        ImportStatus::Completed
    );
    assert_eq!(statistics.recent_operations[0].id, stats.operation_id);
}

#[tokio::test]
async fn unknown_extension_is_recorded_not_fatal() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let store = store_at(temp_dir.path());
    let unknown = temp_dir.path().join("notes.xyz");
    std::fs::write(&unknown, "irrelevant").expect("should write fixture");
    let good = write_sections(temp_dir.path(), "good.sec", &topics()[..1]);

    let stats = import(&store, &[unknown.clone(), good], &ImportOptions::default()).await;

    assert!(stats.success);
    assert_eq!(stats.files_processed, 1);
    assert_eq!(stats.files_failed, 1);
    assert_eq!(stats.vector_count, 1);
    assert_eq!(stats.errors.len(), 1);
    assert_eq!(stats.errors[0].file, unknown);
    assert!(stats.errors[0].error.contains("xyz"));
    assert!(!stats.errors[0].retryable);

    let statistics = store
        .get_statistics()
        .await
        .expect("should collect statistics");
    let operation = &statistics.recent_operations[0];
    assert_eq!(operation.files_failed, 1);
    assert!(
        operation
            .error_details
            .as_deref()
            .is_some_and(|details| details.contains("notes.xyz"))
    );
}

#[tokio::test]
async fn reimport_skips_duplicates() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let store = store_at(temp_dir.path());
    let file = write_sections(temp_dir.path(), "topics.sec", &topics());

    let first = import(&store, std::slice::from_ref(&file), &ImportOptions::default()).await;
    assert_eq!(first.vector_count, 3);

    let second = import(&store, &[file], &ImportOptions::default()).await;
    assert!(second.success);
    assert_eq!(second.files_processed, 1);
    assert_eq!(second.vector_count, 0);
    assert_eq!(second.skipped_duplicates, 3);
    assert_eq!(second.total_vectors, 3);

    let report = store
        .verify_consistency()
        .await
        .expect("should verify consistency");
    assert!(report.is_consistent);
    assert_eq!(report.documents, 3);
}

#[tokio::test]
async fn repeated_sections_in_one_file_are_stored_once() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let store = store_at(temp_dir.path());
    let [first, second, _] = topics();
    let file = write_sections(temp_dir.path(), "repeats.sec", &[first, second, first]);

    let stats = import(&store, &[file], &ImportOptions::default()).await;
    assert_eq!(stats.chunks_created, 3);
    assert_eq!(stats.vector_count, 2);
    assert_eq!(stats.skipped_duplicates, 1);
    assert_eq!(stats.total_vectors, 2);
}

#[tokio::test]
async fn force_update_reembeds_without_duplicating() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let store = store_at(temp_dir.path());
    let file = write_sections(temp_dir.path(), "topics.sec", &topics());
    import(&store, std::slice::from_ref(&file), &ImportOptions::default()).await;

    let options = ImportOptions {
        force_update: true,
        ..ImportOptions::default()
    };
    let stats = import(&store, &[file], &options).await;
    assert_eq!(stats.vector_count, 3);
    assert_eq!(stats.skipped_duplicates, 0);
    assert_eq!(stats.total_vectors, 3);

    let statistics = store
        .get_statistics()
        .await
        .expect("should collect statistics");
    assert_eq!(statistics.database_stats.total_documents, 3);
}

#[tokio::test]
async fn repeated_force_updates_keep_the_index_file_bounded() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let store = store_at(temp_dir.path());
    let file = write_sections(temp_dir.path(), "topics.sec", &topics());
    import(&store, std::slice::from_ref(&file), &ImportOptions::default()).await;
    let index_path = test_config(temp_dir.path()).index_path();
    let initial_size = std::fs::metadata(&index_path)
        .expect("index should be saved")
        .len();

    let options = ImportOptions {
        force_update: true,
        ..ImportOptions::default()
    };
    for _ in 0..50 {
        import(&store, std::slice::from_ref(&file), &options).await;
    }

    {
        let state = store.read_ready().await.expect("store should be ready");
        assert_eq!(state.index.count(), 3);
        assert!(state.index.tombstones() <= state.index.count());
    }
    let final_size = std::fs::metadata(&index_path)
        .expect("index should be saved")
        .len();
    assert!(
        final_size <= initial_size * 3,
        "index file grew from {initial_size} to {final_size} bytes"
    );

    let results = store
        .search(topics()[1], &SearchOptions::default())
        .await
        .expect("should search");
    assert_eq!(results[0].document.content, topics()[1]);
}

#[tokio::test]
async fn failed_stats_refresh_still_finishes_the_import() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let store = store_at(temp_dir.path());
    let file = write_sections(temp_dir.path(), "topics.sec", &topics());
    {
        let state = store.read_ready().await.expect("store should be ready");
        sqlx::query("DROP TABLE database_stats")
            .execute(state.database.pool())
            .await
            .expect("should drop stats table");
    }

    store
        .import_files(&[file], &ImportOptions::default(), &NoProgress)
        .await
        .expect_err("stats refresh should fail");

    let state = store.read_ready().await.expect("store should be ready");
    assert!(
        state
            .database
            .current_import()
            .await
            .expect("should read current import")
            .is_none()
    );
    let recent = state
        .database
        .recent_imports(5)
        .await
        .expect("should list imports");
    assert_eq!(recent.len(), 1);
    assert_eq!(recent[0].status, ImportStatus::Failed);
    assert_eq!(state.index.count(), 3);
    assert!(test_config(temp_dir.path()).index_path().exists());
}

#[tokio::test]
async fn embedding_failures_stay_with_their_chunk() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let store = store_at(temp_dir.path());
    let [first, second, _] = topics();
    let mixed = write_sections(
        temp_dir.path(),
        "mixed.sec",
        &[first, "this section will FAIL to embed", second],
    );
    let broken = write_sections(temp_dir.path(), "broken.sec", &["FAIL one", "FAIL two"]);

    let stats = import(&store, &[mixed, broken.clone()], &ImportOptions::default()).await;

    assert!(stats.success);
    assert_eq!(stats.files_processed, 1);
    assert_eq!(stats.files_failed, 1);
    assert_eq!(stats.vector_count, 2);
    assert_eq!(stats.failed_chunks, 1);
    assert_eq!(stats.total_vectors, 2);
    assert_eq!(stats.errors[0].file, broken);
    assert!(stats.errors[0].retryable);

    let report = store
        .verify_consistency()
        .await
        .expect("should verify consistency");
    assert!(report.is_consistent);
}

#[tokio::test]
async fn search_on_empty_store_returns_nothing() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let store = store_at(temp_dir.path());

    let results = store
        .search("anything at all", &SearchOptions::default())
        .await
        .expect("should search");
    assert!(results.is_empty());

    let invalid = SearchOptions {
        min_score: 1.5,
        ..SearchOptions::default()
    };
    assert!(matches!(
        store.search("anything", &invalid).await,
        Err(VaultError::Configuration(_))
    ));
}

#[tokio::test]
async fn search_ranks_and_thresholds_results() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let store = store_at(temp_dir.path());
    let file = write_sections(temp_dir.path(), "topics.sec", &topics());
    import(&store, &[file], &ImportOptions::default()).await;

    let everything = SearchOptions {
        min_score: 0.0,
        ..SearchOptions::default()
    };
    let results = store
        .search(topics()[0], &everything)
        .await
        .expect("should search");
    assert!(!results.is_empty());
    assert_eq!(results[0].document.content, topics()[0]);
    assert!(results[0].score > 0.99);
    for pair in results.windows(2) {
        assert!(pair[0].score >= pair[1].score);
    }
    for result in &results {
        assert!((result.score + result.distance - 1.0).abs() < 1e-5);
    }

    let strict = SearchOptions {
        min_score: 0.99,
        ..SearchOptions::default()
    };
    let results = store
        .search(topics()[1], &strict)
        .await
        .expect("should search");
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].document.content, topics()[1]);

    let one = SearchOptions {
        limit: 1,
        min_score: 0.0,
        ..SearchOptions::default()
    };
    assert_eq!(
        store
            .search("bread", &one)
            .await
            .expect("should search")
            .len(),
        1
    );

    let none = SearchOptions {
        limit: 0,
        ..SearchOptions::default()
    };
    assert!(
        store
            .search("bread", &none)
            .await
            .expect("should search")
            .is_empty()
    );
}

#[tokio::test]
async fn search_filters_on_metadata() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let store = store_at(temp_dir.path());
    let file = write_sections(temp_dir.path(), "topics.sec", &topics());
    import(&store, &[file], &ImportOptions::default()).await;

    let markdown_only = SearchOptions {
        min_score: 0.0,
        file_types: vec!["md".to_string()],
        ..SearchOptions::default()
    };
    assert!(
        store
            .search(topics()[0], &markdown_only)
            .await
            .expect("should search")
            .is_empty()
    );

    let future = chrono::Utc::now().naive_utc() + chrono::Duration::days(1);
    let created_later = SearchOptions {
        min_score: 0.0,
        date_from: Some(future),
        ..SearchOptions::default()
    };
    assert!(
        store
            .search(topics()[0], &created_later)
            .await
            .expect("should search")
            .is_empty()
    );

    let sections = SearchOptions {
        min_score: 0.0,
        file_types: vec!["SEC".to_string()],
        date_to: Some(future),
        ..SearchOptions::default()
    };
    assert!(
        !store
            .search(topics()[0], &sections)
            .await
            .expect("should search")
            .is_empty()
    );
}

#[tokio::test]
async fn clear_empties_store_but_keeps_history() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let store = store_at(temp_dir.path());
    let file = write_sections(temp_dir.path(), "topics.sec", &topics());
    import(&store, &[file], &ImportOptions::default()).await;

    store.clear_database().await.expect("should clear");

    assert_eq!(store.index_count().await.expect("should count"), 0);
    let results = store
        .search(topics()[0], &SearchOptions::default())
        .await
        .expect("should search");
    assert!(results.is_empty());

    let statistics = store
        .get_statistics()
        .await
        .expect("should collect statistics");
    assert_eq!(statistics.database_stats.total_documents, 0);
    assert_eq!(statistics.recent_operations.len(), 1);

    let reopened = store_at(temp_dir.path());
    assert_eq!(reopened.index_count().await.expect("should count"), 0);
}

#[tokio::test]
async fn close_persists_and_rejects_later_calls() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let store = store_at(temp_dir.path());
    let file = write_sections(temp_dir.path(), "topics.sec", &topics());
    import(&store, &[file], &ImportOptions::default()).await;

    store.close().await.expect("should close");
    assert_eq!(store.lifecycle().await, Lifecycle::Closed);
    assert!(matches!(
        store.search("bread", &SearchOptions::default()).await,
        Err(VaultError::NotInitialized)
    ));
    assert!(matches!(
        store.get_statistics().await,
        Err(VaultError::NotInitialized)
    ));
    assert!(matches!(store.close().await, Err(VaultError::NotInitialized)));

    let reopened = store_at(temp_dir.path());
    assert_eq!(reopened.index_count().await.expect("should count"), 3);
    assert_eq!(
        reopened.index_origin().await.expect("should report origin"),
        IndexOrigin::Loaded
    );
    let results = reopened
        .search(topics()[2], &SearchOptions::default())
        .await
        .expect("should search");
    assert_eq!(results[0].document.content, topics()[2]);
}

#[tokio::test]
async fn closing_an_unopened_store_succeeds() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let store = store_at(temp_dir.path());

    store.close().await.expect("should close");
    assert_eq!(store.lifecycle().await, Lifecycle::Closed);
    assert!(matches!(
        store.initialize().await,
        Err(VaultError::NotInitialized)
    ));
}

#[tokio::test]
async fn corrupt_index_is_recovered_and_repaired() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    {
        let store = store_at(temp_dir.path());
        let file = write_sections(temp_dir.path(), "topics.sec", &topics());
        import(&store, &[file], &ImportOptions::default()).await;
        store.close().await.expect("should close");
    }
    let index_path = test_config(temp_dir.path()).index_path();
    std::fs::write(&index_path, b"definitely not an index").expect("should corrupt index");

    let store = store_at(temp_dir.path());
    assert_eq!(store.index_count().await.expect("should count"), 0);
    assert!(matches!(
        store.index_origin().await.expect("should report origin"),
        IndexOrigin::Recovered { backup: Some(_), .. }
    ));

    let report = store
        .verify_consistency()
        .await
        .expect("should verify consistency");
    assert!(!report.is_consistent);
    assert_eq!(report.missing_in_index.len(), 3);

    let repair = store.repair_index().await.expect("should repair");
    assert_eq!(repair.reembedded, 3);
    assert!(repair.is_complete());
    assert_eq!(store.index_count().await.expect("should count"), 3);
    assert!(
        store
            .verify_consistency()
            .await
            .expect("should verify consistency")
            .is_consistent
    );
}

#[tokio::test]
async fn cancelled_import_stops_between_files() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let store = store_at(temp_dir.path());
    let file = write_sections(temp_dir.path(), "topics.sec", &topics());

    let options = ImportOptions::default();
    options.cancellation.cancel();
    let stats = import(&store, &[file], &options).await;

    assert!(stats.cancelled);
    assert!(stats.success);
    assert_eq!(stats.files_processed, 0);
    assert_eq!(stats.total_files, 1);
    assert_eq!(stats.total_vectors, 0);
}

#[tokio::test]
async fn directory_import_expands_supported_files() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let docs = temp_dir.path().join("docs");
    let nested = docs.join("nested");
    std::fs::create_dir_all(&nested).expect("should create dirs");
    write_sections(&docs, "a.sec", &topics()[..1]);
    std::fs::write(nested.join("b.txt"), topics()[1]).expect("should write fixture");
    std::fs::write(nested.join("c.xyz"), "ignored").expect("should write fixture");

    let options = ImportOptions {
        is_directory: true,
        file_types: Vec::new(),
        ..ImportOptions::default()
    };
    let stats = import(&store_at(temp_dir.path()), &[docs.clone()], &options).await;
    assert_eq!(stats.total_files, 2);
    assert_eq!(stats.files_processed, 2);
    assert_eq!(stats.files_failed, 0);

    let text_only = ImportOptions {
        is_directory: true,
        file_types: vec!["txt".to_string()],
        ..ImportOptions::default()
    };
    let other_dir = TempDir::new().expect("should create temp dir");
    let stats = import(&store_at(other_dir.path()), &[docs], &text_only).await;
    assert_eq!(stats.total_files, 1);
}

#[tokio::test]
async fn invalid_import_options_are_rejected() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let store = store_at(temp_dir.path());
    let options = ImportOptions {
        chunk_size: 100,
        overlap_size: 100,
        ..ImportOptions::default()
    };

    assert!(matches!(
        store.import_files(&[], &options, &NoProgress).await,
        Err(VaultError::Configuration(_))
    ));
    assert_eq!(store.lifecycle().await, Lifecycle::Uninitialized);
}

#[tokio::test]
async fn listeners_hear_imports_and_clears() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let store = store_at(temp_dir.path());
    let file = write_sections(temp_dir.path(), "topics.sec", &topics());

    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let subscription = store.subscribe(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });

    import(&store, &[file], &ImportOptions::default()).await;
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    store.clear_database().await.expect("should clear");
    assert_eq!(calls.load(Ordering::SeqCst), 3);

    assert!(subscription.dispose());
    store.clear_database().await.expect("should clear");
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn concurrent_searches_share_the_store() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let store = Arc::new(store_at(temp_dir.path()));
    let file = write_sections(temp_dir.path(), "topics.sec", &topics());
    import(&store, &[file], &ImportOptions::default()).await;

    let handles: Vec<_> = topics()
        .into_iter()
        .map(|topic| {
            let store = Arc::clone(&store);
            tokio::spawn(async move {
                store
                    .search(topic, &SearchOptions::default())
                    .await
                    .map(|results| results.first().map(|r| r.document.content.clone()))
            })
        })
        .collect();

    for (handle, topic) in handles.into_iter().zip(topics()) {
        let top = handle
            .await
            .expect("task should finish")
            .expect("should search");
        assert_eq!(top.as_deref(), Some(topic));
    }
}

#[test]
fn search_options_default_from_settings() {
    let options = SearchOptions::default();
    assert_eq!(options.limit, 10);
    assert!((options.min_score - 0.4).abs() < f32::EPSILON);
    assert!(options.file_types.is_empty());
    assert_eq!(Lifecycle::Initializing.to_string(), "initializing");
}
