use super::*;
use sqlx::sqlite::SqlitePoolOptions;
use tempfile::TempDir;

async fn create_test_pool() -> (TempDir, SqlitePool) {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let db_path = temp_dir.path().join("test.db");

    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(
            sqlx::sqlite::SqliteConnectOptions::new()
                .filename(&db_path)
                .create_if_missing(true)
                .foreign_keys(true),
        )
        .await
        .expect("Failed to create test pool");

    sqlx::query(include_str!("../migrations/0001_initial_schema.sql"))
        .execute(&pool)
        .await
        .expect("Failed to run migrations");

    (temp_dir, pool)
}

fn new_document(content: &str, source: &str) -> NewDocument {
    NewDocument {
        content: content.to_string(),
        source: source.to_string(),
        doc_type: "md".to_string(),
        title: Some("Guide".to_string()),
        category: Some("docs".to_string()),
        content_hash: crate::embeddings::content_hash(content),
    }
}

#[tokio::test]
async fn document_upsert_and_lookup() {
    let (_temp_dir, pool) = create_test_pool().await;

    let document = new_document("Rust ownership rules.", "docs/guide.md");
    let id = DocumentQueries::upsert(&pool, &document)
        .await
        .expect("Failed to insert document");

    let found = DocumentQueries::find_id_by_hash(&pool, &document.content_hash)
        .await
        .expect("Lookup should succeed");
    assert_eq!(found, Some(id));

    let stored = DocumentQueries::get_by_id(&pool, id)
        .await
        .expect("Failed to get document")
        .expect("Document should exist");
    assert_eq!(stored.content, "Rust ownership rules.");
    assert_eq!(stored.doc_type, "md");
    assert_eq!(stored.title.as_deref(), Some("Guide"));
}

#[tokio::test]
async fn upsert_with_same_hash_keeps_one_row() {
    let (_temp_dir, pool) = create_test_pool().await;

    let first = new_document("Shared content.", "a.md");
    let first_id = DocumentQueries::upsert(&pool, &first)
        .await
        .expect("Failed to insert document");

    let mut second = new_document("Shared content.", "b.md");
    second.title = Some("Renamed".to_string());
    let second_id = DocumentQueries::upsert(&pool, &second)
        .await
        .expect("Failed to upsert document");

    assert_eq!(first_id, second_id);
    assert_eq!(
        DocumentQueries::count(&pool).await.expect("Count should succeed"),
        1
    );

    let stored = DocumentQueries::get_by_id(&pool, first_id)
        .await
        .expect("Failed to get document")
        .expect("Document should exist");
    assert_eq!(stored.source, "b.md");
    assert_eq!(stored.title.as_deref(), Some("Renamed"));
}

#[tokio::test]
async fn get_by_ids_skips_missing() {
    let (_temp_dir, pool) = create_test_pool().await;

    let a = DocumentQueries::upsert(&pool, &new_document("alpha", "a.txt"))
        .await
        .expect("Failed to insert document");
    let b = DocumentQueries::upsert(&pool, &new_document("beta", "b.txt"))
        .await
        .expect("Failed to insert document");

    let documents = DocumentQueries::get_by_ids(&pool, &[a, 9_999, b])
        .await
        .expect("Batch lookup should succeed");
    let mut ids: Vec<i64> = documents.iter().map(|d| d.id).collect();
    ids.sort_unstable();
    assert_eq!(ids, vec![a, b]);

    let none = DocumentQueries::get_by_ids(&pool, &[])
        .await
        .expect("Empty lookup should succeed");
    assert!(none.is_empty());
}

#[tokio::test]
async fn deleting_document_cascades_to_vector_stats() {
    let (_temp_dir, pool) = create_test_pool().await;

    let id = DocumentQueries::upsert(&pool, &new_document("cascade", "c.txt"))
        .await
        .expect("Failed to insert document");
    VectorStatsQueries::upsert(
        &pool,
        &DocumentVectorStatsUpdate {
            document_id: id,
            vector_count: 1,
            average_vector_length: 384.0,
            total_tokens: 3,
            chunks_count: 1,
        },
    )
    .await
    .expect("Failed to upsert stats");

    assert!(
        DocumentQueries::delete_by_id(&pool, id)
            .await
            .expect("Delete should succeed")
    );
    let stats = VectorStatsQueries::get(&pool, id)
        .await
        .expect("Query should succeed");
    assert!(stats.is_none());
}

#[tokio::test]
async fn vector_stats_upsert_replaces_values() {
    let (_temp_dir, pool) = create_test_pool().await;

    let id = DocumentQueries::upsert(&pool, &new_document("stats", "s.txt"))
        .await
        .expect("Failed to insert document");

    for tokens in [5, 8] {
        VectorStatsQueries::upsert(
            &pool,
            &DocumentVectorStatsUpdate {
                document_id: id,
                vector_count: 1,
                average_vector_length: 384.0,
                total_tokens: tokens,
                chunks_count: 1,
            },
        )
        .await
        .expect("Failed to upsert stats");
    }

    let stats = VectorStatsQueries::get(&pool, id)
        .await
        .expect("Query should succeed")
        .expect("Stats should exist");
    assert_eq!(stats.total_tokens, 8);
    assert_eq!(stats.vector_count, 1);
}

#[tokio::test]
async fn database_stats_recompute_and_reset() {
    let (_temp_dir, pool) = create_test_pool().await;

    let initial = DatabaseStatsQueries::get(&pool)
        .await
        .expect("Stats row should be seeded");
    assert_eq!(initial.total_documents, 0);
    assert!(initial.last_import_at.is_none());

    for (content, tokens) in [("one two", 2), ("three four five", 3)] {
        let id = DocumentQueries::upsert(&pool, &new_document(content, "x.txt"))
            .await
            .expect("Failed to insert document");
        VectorStatsQueries::upsert(
            &pool,
            &DocumentVectorStatsUpdate {
                document_id: id,
                vector_count: 1,
                average_vector_length: 8.0,
                total_tokens: tokens,
                chunks_count: 1,
            },
        )
        .await
        .expect("Failed to upsert stats");
    }

    let imported_at = Utc::now().naive_utc();
    let stats = DatabaseStatsQueries::recompute(&pool, Some(imported_at))
        .await
        .expect("Recompute should succeed");
    assert_eq!(stats.total_documents, 2);
    assert_eq!(stats.total_vectors, 2);
    assert_eq!(stats.total_tokens, 5);
    assert_eq!(stats.total_chunks, 2);
    assert!((stats.average_vectors_per_doc - 1.0).abs() < f64::EPSILON);
    assert_eq!(stats.total_content_size, 22);
    assert!(stats.last_import_at.is_some());

    // Without a timestamp the previous import time is kept
    let kept = DatabaseStatsQueries::recompute(&pool, None)
        .await
        .expect("Recompute should succeed");
    assert_eq!(kept.last_import_at, stats.last_import_at);

    DatabaseStatsQueries::reset(&pool)
        .await
        .expect("Reset should succeed");
    let reset = DatabaseStatsQueries::get(&pool)
        .await
        .expect("Stats row should exist");
    assert_eq!(reset.total_documents, 0);
    assert!(reset.last_import_at.is_none());
}

#[tokio::test]
async fn import_operation_lifecycle() {
    let (_temp_dir, pool) = create_test_pool().await;

    let operation = ImportOperationQueries::start(&pool, Some("{\"chunk_size\":1000}"))
        .await
        .expect("Failed to start operation");
    assert!(operation.is_running());

    let current = ImportOperationQueries::current(&pool)
        .await
        .expect("Query should succeed")
        .expect("Running operation should be found");
    assert_eq!(current.id, operation.id);

    let finished = ImportOperationQueries::finish(
        &pool,
        operation.id,
        &ImportOperationUpdate {
            status: ImportStatus::Completed,
            files_processed: 3,
            files_failed: 1,
            total_processing_time: 42,
            error_details: Some("[]".to_string()),
        },
    )
    .await
    .expect("Failed to finish operation")
    .expect("Operation should exist");
    assert!(finished.is_finished());
    assert_eq!(finished.files_processed, 3);
    assert!(finished.completed_at.is_some());

    assert!(
        ImportOperationQueries::current(&pool)
            .await
            .expect("Query should succeed")
            .is_none()
    );
}

#[tokio::test]
async fn recent_finished_is_newest_first_and_limited() {
    let (_temp_dir, pool) = create_test_pool().await;

    let mut ids = Vec::new();
    for _ in 0..7 {
        let operation = ImportOperationQueries::start(&pool, None)
            .await
            .expect("Failed to start operation");
        ImportOperationQueries::finish(
            &pool,
            operation.id,
            &ImportOperationUpdate {
                status: ImportStatus::Completed,
                files_processed: 1,
                files_failed: 0,
                total_processing_time: 1,
                error_details: None,
            },
        )
        .await
        .expect("Failed to finish operation");
        ids.push(operation.id);
    }
    ImportOperationQueries::start(&pool, None)
        .await
        .expect("Failed to start operation");

    let recent = ImportOperationQueries::recent_finished(&pool, 5)
        .await
        .expect("Query should succeed");
    assert_eq!(recent.len(), 5);
    assert!(recent.iter().all(ImportOperation::is_finished));
    let expected: Vec<i64> = ids.iter().rev().take(5).copied().collect();
    let actual: Vec<i64> = recent.iter().map(|op| op.id).collect();
    assert_eq!(actual, expected);
}

#[tokio::test]
async fn interrupted_operations_are_failed() {
    let (_temp_dir, pool) = create_test_pool().await;

    let operation = ImportOperationQueries::start(&pool, None)
        .await
        .expect("Failed to start operation");
    let affected = ImportOperationQueries::fail_interrupted(&pool)
        .await
        .expect("Update should succeed");
    assert_eq!(affected, 1);

    let failed = ImportOperationQueries::get_by_id(&pool, operation.id)
        .await
        .expect("Query should succeed")
        .expect("Operation should exist");
    assert_eq!(failed.status, ImportStatus::Failed);
    assert!(failed.error_details.is_some());
}
