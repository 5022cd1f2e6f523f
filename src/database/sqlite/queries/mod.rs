#[cfg(test)]
mod tests;

use super::models::*;
use anyhow::{Context, Result};
use chrono::{NaiveDateTime, Utc};
use sqlx::{QueryBuilder, Sqlite, SqliteExecutor, SqlitePool};
use tracing::{debug, warn};

const DOCUMENT_COLUMNS: &str =
    "id, content, source, type, title, category, content_hash, created_at, updated_at";

const IMPORT_OPERATION_COLUMNS: &str = "id, started_at, completed_at, status, files_processed, files_failed, total_processing_time, error_details, configuration";

/// SQLite caps bound parameters per statement
const MAX_BIND_PARAMS: usize = 500;

pub struct DocumentQueries;

impl DocumentQueries {
    /// Insert a document, or refresh the metadata of the row with the same content hash.
    /// Returns the id of the affected row.
    #[inline]
    pub async fn upsert<'e, E>(executor: E, document: &NewDocument) -> Result<i64>
    where
        E: SqliteExecutor<'e>,
    {
        let now = Utc::now().naive_utc();
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO documents (content, source, type, title, category, content_hash, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(content_hash) DO UPDATE SET
                source = excluded.source,
                type = excluded.type,
                title = excluded.title,
                category = excluded.category,
                updated_at = excluded.updated_at
            RETURNING id
            "#,
        )
        .bind(&document.content)
        .bind(&document.source)
        .bind(&document.doc_type)
        .bind(&document.title)
        .bind(&document.category)
        .bind(&document.content_hash)
        .bind(now)
        .bind(now)
        .fetch_one(executor)
        .await
        .context("Failed to upsert document")?;

        Ok(id)
    }

    #[inline]
    pub async fn find_id_by_hash(pool: &SqlitePool, content_hash: &str) -> Result<Option<i64>> {
        let id = sqlx::query_scalar("SELECT id FROM documents WHERE content_hash = ?")
            .bind(content_hash)
            .fetch_optional(pool)
            .await
            .context("Failed to look up document by content hash")?;

        Ok(id)
    }

    #[inline]
    pub async fn get_by_id(pool: &SqlitePool, id: i64) -> Result<Option<Document>> {
        let document = sqlx::query_as::<_, Document>(&format!(
            "SELECT {DOCUMENT_COLUMNS} FROM documents WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("Failed to get document by id")?;

        Ok(document)
    }

    /// Fetch documents for the given ids. Missing ids are skipped; order is unspecified.
    #[inline]
    pub async fn get_by_ids(pool: &SqlitePool, ids: &[i64]) -> Result<Vec<Document>> {
        let mut documents = Vec::with_capacity(ids.len());

        for batch in ids.chunks(MAX_BIND_PARAMS) {
            let mut builder: QueryBuilder<'_, Sqlite> = QueryBuilder::new(format!(
                "SELECT {DOCUMENT_COLUMNS} FROM documents WHERE id IN ("
            ));
            let mut separated = builder.separated(", ");
            for id in batch {
                separated.push_bind(*id);
            }
            separated.push_unseparated(")");

            let rows = builder
                .build_query_as::<Document>()
                .fetch_all(pool)
                .await
                .context("Failed to get documents by ids")?;
            documents.extend(rows);
        }

        Ok(documents)
    }

    #[inline]
    pub async fn list_ids(pool: &SqlitePool) -> Result<Vec<i64>> {
        let ids = sqlx::query_scalar("SELECT id FROM documents ORDER BY id")
            .fetch_all(pool)
            .await
            .context("Failed to list document ids")?;

        Ok(ids)
    }

    #[inline]
    pub async fn count(pool: &SqlitePool) -> Result<i64> {
        let count = sqlx::query_scalar("SELECT COUNT(*) FROM documents")
            .fetch_one(pool)
            .await
            .context("Failed to count documents")?;

        Ok(count)
    }

    #[inline]
    pub async fn count_distinct_hashes(pool: &SqlitePool) -> Result<i64> {
        let count = sqlx::query_scalar("SELECT COUNT(DISTINCT content_hash) FROM documents")
            .fetch_one(pool)
            .await
            .context("Failed to count distinct content hashes")?;

        Ok(count)
    }

    #[inline]
    pub async fn delete_by_id<'e, E>(executor: E, id: i64) -> Result<bool>
    where
        E: SqliteExecutor<'e>,
    {
        let result = sqlx::query("DELETE FROM documents WHERE id = ?")
            .bind(id)
            .execute(executor)
            .await
            .context("Failed to delete document")?;

        Ok(result.rows_affected() > 0)
    }

    #[inline]
    pub async fn delete_all<'e, E>(executor: E) -> Result<u64>
    where
        E: SqliteExecutor<'e>,
    {
        let result = sqlx::query("DELETE FROM documents")
            .execute(executor)
            .await
            .context("Failed to delete documents")?;

        debug!("Deleted {} documents", result.rows_affected());
        Ok(result.rows_affected())
    }
}

pub struct VectorStatsQueries;

impl VectorStatsQueries {
    #[inline]
    pub async fn upsert<'e, E>(executor: E, update: &DocumentVectorStatsUpdate) -> Result<()>
    where
        E: SqliteExecutor<'e>,
    {
        let now = Utc::now().naive_utc();
        sqlx::query(
            r#"
            INSERT INTO document_vectors (document_id, vector_count, average_vector_length, total_tokens, chunks_count, last_updated)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(document_id) DO UPDATE SET
                vector_count = excluded.vector_count,
                average_vector_length = excluded.average_vector_length,
                total_tokens = excluded.total_tokens,
                chunks_count = excluded.chunks_count,
                last_updated = excluded.last_updated
            "#,
        )
        .bind(update.document_id)
        .bind(update.vector_count)
        .bind(update.average_vector_length)
        .bind(update.total_tokens)
        .bind(update.chunks_count)
        .bind(now)
        .execute(executor)
        .await
        .context("Failed to upsert document vector stats")?;

        Ok(())
    }

    #[inline]
    pub async fn get(pool: &SqlitePool, document_id: i64) -> Result<Option<DocumentVectorStats>> {
        let stats = sqlx::query_as::<_, DocumentVectorStats>(
            r#"
            SELECT document_id, vector_count, average_vector_length, total_tokens, chunks_count, last_updated
            FROM document_vectors WHERE document_id = ?
            "#,
        )
        .bind(document_id)
        .fetch_optional(pool)
        .await
        .context("Failed to get document vector stats")?;

        Ok(stats)
    }

    #[inline]
    pub async fn delete_all<'e, E>(executor: E) -> Result<u64>
    where
        E: SqliteExecutor<'e>,
    {
        let result = sqlx::query("DELETE FROM document_vectors")
            .execute(executor)
            .await
            .context("Failed to delete document vector stats")?;

        Ok(result.rows_affected())
    }
}

pub struct DatabaseStatsQueries;

impl DatabaseStatsQueries {
    #[inline]
    pub async fn get(pool: &SqlitePool) -> Result<DatabaseStats> {
        let stats = sqlx::query_as::<_, DatabaseStats>(
            r#"
            SELECT total_documents, total_vectors, total_tokens, total_chunks,
                   average_vectors_per_doc, total_content_size, last_import_at, last_updated
            FROM database_stats WHERE id = 1
            "#,
        )
        .fetch_one(pool)
        .await
        .context("Failed to get database stats")?;

        Ok(stats)
    }

    /// Rebuild the singleton row from the document tables.
    /// `last_import_at` replaces the stored value only when given.
    #[inline]
    pub async fn recompute(
        pool: &SqlitePool,
        last_import_at: Option<NaiveDateTime>,
    ) -> Result<DatabaseStats> {
        let now = Utc::now().naive_utc();
        sqlx::query(
            r#"
            UPDATE database_stats SET
                total_documents = (SELECT COUNT(*) FROM documents),
                total_vectors = (SELECT COALESCE(SUM(vector_count), 0) FROM document_vectors),
                total_tokens = (SELECT COALESCE(SUM(total_tokens), 0) FROM document_vectors),
                total_chunks = (SELECT COALESCE(SUM(chunks_count), 0) FROM document_vectors),
                average_vectors_per_doc = CASE
                    WHEN (SELECT COUNT(*) FROM documents) = 0 THEN 0.0
                    ELSE CAST((SELECT COALESCE(SUM(vector_count), 0) FROM document_vectors) AS REAL)
                         / (SELECT COUNT(*) FROM documents)
                END,
                total_content_size = (SELECT COALESCE(SUM(LENGTH(content)), 0) FROM documents),
                last_import_at = COALESCE(?, last_import_at),
                last_updated = ?
            WHERE id = 1
            "#,
        )
        .bind(last_import_at)
        .bind(now)
        .execute(pool)
        .await
        .context("Failed to recompute database stats")?;

        Self::get(pool).await
    }

    #[inline]
    pub async fn reset<'e, E>(executor: E) -> Result<()>
    where
        E: SqliteExecutor<'e>,
    {
        let now = Utc::now().naive_utc();
        sqlx::query(
            r#"
            UPDATE database_stats SET
                total_documents = 0,
                total_vectors = 0,
                total_tokens = 0,
                total_chunks = 0,
                average_vectors_per_doc = 0.0,
                total_content_size = 0,
                last_import_at = NULL,
                last_updated = ?
            WHERE id = 1
            "#,
        )
        .bind(now)
        .execute(executor)
        .await
        .context("Failed to reset database stats")?;

        Ok(())
    }
}

pub struct ImportOperationQueries;

impl ImportOperationQueries {
    #[inline]
    pub async fn start(pool: &SqlitePool, configuration: Option<&str>) -> Result<ImportOperation> {
        let now = Utc::now().naive_utc();
        let id = sqlx::query(
            "INSERT INTO import_operations (started_at, status, configuration) VALUES (?, 'running', ?)",
        )
        .bind(now)
        .bind(configuration)
        .execute(pool)
        .await
        .context("Failed to create import operation")?
        .last_insert_rowid();

        Self::get_by_id(pool, id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Failed to retrieve created import operation"))
    }

    #[inline]
    pub async fn finish(
        pool: &SqlitePool,
        id: i64,
        update: &ImportOperationUpdate,
    ) -> Result<Option<ImportOperation>> {
        let now = Utc::now().naive_utc();
        sqlx::query(
            r#"
            UPDATE import_operations SET
                completed_at = ?,
                status = ?,
                files_processed = ?,
                files_failed = ?,
                total_processing_time = ?,
                error_details = ?
            WHERE id = ?
            "#,
        )
        .bind(now)
        .bind(update.status)
        .bind(update.files_processed)
        .bind(update.files_failed)
        .bind(update.total_processing_time)
        .bind(&update.error_details)
        .bind(id)
        .execute(pool)
        .await
        .context("Failed to finish import operation")?;

        Self::get_by_id(pool, id).await
    }

    #[inline]
    pub async fn get_by_id(pool: &SqlitePool, id: i64) -> Result<Option<ImportOperation>> {
        let operation = sqlx::query_as::<_, ImportOperation>(&format!(
            "SELECT {IMPORT_OPERATION_COLUMNS} FROM import_operations WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("Failed to get import operation by id")?;

        Ok(operation)
    }

    /// The most recently started run that has not finished
    #[inline]
    pub async fn current(pool: &SqlitePool) -> Result<Option<ImportOperation>> {
        let operation = sqlx::query_as::<_, ImportOperation>(&format!(
            "SELECT {IMPORT_OPERATION_COLUMNS} FROM import_operations WHERE status = 'running' ORDER BY started_at DESC, id DESC LIMIT 1"
        ))
        .fetch_optional(pool)
        .await
        .context("Failed to get current import operation")?;

        Ok(operation)
    }

    /// Finished runs, most recently started first
    #[inline]
    pub async fn recent_finished(pool: &SqlitePool, limit: i64) -> Result<Vec<ImportOperation>> {
        let operations = sqlx::query_as::<_, ImportOperation>(&format!(
            "SELECT {IMPORT_OPERATION_COLUMNS} FROM import_operations WHERE status != 'running' ORDER BY started_at DESC, id DESC LIMIT ?"
        ))
        .bind(limit)
        .fetch_all(pool)
        .await
        .context("Failed to list recent import operations")?;

        Ok(operations)
    }

    /// Mark runs left `running` by a previous process as failed
    #[inline]
    pub async fn fail_interrupted(pool: &SqlitePool) -> Result<u64> {
        let now = Utc::now().naive_utc();
        let result = sqlx::query(
            r#"
            UPDATE import_operations SET
                status = 'failed',
                completed_at = ?,
                error_details = COALESCE(error_details, '"interrupted before completion"')
            WHERE status = 'running'
            "#,
        )
        .bind(now)
        .execute(pool)
        .await
        .context("Failed to mark interrupted import operations")?;

        if result.rows_affected() > 0 {
            warn!(
                "Marked {} interrupted import operations as failed",
                result.rows_affected()
            );
        }

        Ok(result.rows_affected())
    }
}
