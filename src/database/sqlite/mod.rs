use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite, Transaction};
use std::path::Path;
use tracing::{debug, info};

use crate::database::sqlite::models::{
    DatabaseStats, Document, DocumentVectorStats, ImportOperation, ImportOperationUpdate,
};
use crate::database::sqlite::queries::{
    DatabaseStatsQueries, DocumentQueries, ImportOperationQueries, VectorStatsQueries,
};


pub mod models;
pub mod queries;

pub type DbPool = Pool<Sqlite>;

/// Metadata database file name inside the data directory
pub const DATABASE_FILE_NAME: &str = "metadata.db";

#[derive(Debug, Clone)]
pub struct Database {
    pool: DbPool,
}

impl Database {
    #[inline]
    pub async fn new<P: AsRef<Path>>(database_path: P) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(database_path)
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .context("Failed to create database connection pool")?;

        let database = Self { pool };
        database.run_migrations().await?;

        Ok(database)
    }

    #[inline]
    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    #[inline]
    pub async fn run_migrations(&self) -> Result<()> {
        info!("Running database migrations");

        sqlx::migrate!("src/database/sqlite/migrations")
            .run(&self.pool)
            .await
            .context("Failed to run schema migration")?;

        debug!("Database migrations completed successfully");
        Ok(())
    }

    #[inline]
    pub async fn initialize_from_data_dir(data_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(data_dir).with_context(|| {
            format!("Failed to create data directory: {}", data_dir.display())
        })?;

        Self::new(data_dir.join(DATABASE_FILE_NAME)).await
    }

    #[inline]
    pub async fn begin(&self) -> Result<Transaction<'static, Sqlite>> {
        self.pool
            .begin()
            .await
            .context("Failed to begin transaction")
    }

    // Document operations
    #[inline]
    pub async fn document_exists(&self, content_hash: &str) -> Result<bool> {
        Ok(DocumentQueries::find_id_by_hash(&self.pool, content_hash)
            .await?
            .is_some())
    }

    #[inline]
    pub async fn get_documents(&self, ids: &[i64]) -> Result<Vec<Document>> {
        DocumentQueries::get_by_ids(&self.pool, ids).await
    }

    #[inline]
    pub async fn document_ids(&self) -> Result<Vec<i64>> {
        DocumentQueries::list_ids(&self.pool).await
    }

    #[inline]
    pub async fn document_count(&self) -> Result<i64> {
        DocumentQueries::count(&self.pool).await
    }

    #[inline]
    pub async fn unique_content_count(&self) -> Result<i64> {
        DocumentQueries::count_distinct_hashes(&self.pool).await
    }

    #[inline]
    pub async fn get_vector_stats(&self, document_id: i64) -> Result<Option<DocumentVectorStats>> {
        VectorStatsQueries::get(&self.pool, document_id).await
    }

    // Aggregate statistics
    #[inline]
    pub async fn get_stats(&self) -> Result<DatabaseStats> {
        DatabaseStatsQueries::get(&self.pool).await
    }

    #[inline]
    pub async fn recompute_stats(
        &self,
        last_import_at: Option<NaiveDateTime>,
    ) -> Result<DatabaseStats> {
        DatabaseStatsQueries::recompute(&self.pool, last_import_at).await
    }

    // Import operations
    #[inline]
    pub async fn start_import(&self, configuration: Option<&str>) -> Result<ImportOperation> {
        ImportOperationQueries::start(&self.pool, configuration).await
    }

    #[inline]
    pub async fn finish_import(
        &self,
        id: i64,
        update: &ImportOperationUpdate,
    ) -> Result<Option<ImportOperation>> {
        ImportOperationQueries::finish(&self.pool, id, update).await
    }

    #[inline]
    pub async fn current_import(&self) -> Result<Option<ImportOperation>> {
        ImportOperationQueries::current(&self.pool).await
    }

    #[inline]
    pub async fn recent_imports(&self, limit: i64) -> Result<Vec<ImportOperation>> {
        ImportOperationQueries::recent_finished(&self.pool, limit).await
    }

    #[inline]
    pub async fn fail_interrupted_imports(&self) -> Result<u64> {
        ImportOperationQueries::fail_interrupted(&self.pool).await
    }

    /// Delete every document and its vector stats, and zero the aggregate row.
    /// Import history is kept.
    #[inline]
    pub async fn clear_documents(&self) -> Result<u64> {
        let mut tx = self.begin().await?;
        VectorStatsQueries::delete_all(&mut *tx).await?;
        let deleted = DocumentQueries::delete_all(&mut *tx).await?;
        DatabaseStatsQueries::reset(&mut *tx).await?;
        tx.commit()
            .await
            .context("Failed to commit database clear")?;

        info!("Cleared {} documents from metadata store", deleted);
        Ok(deleted)
    }

    /// Optimize database performance by running VACUUM and ANALYZE
    #[inline]
    pub async fn optimize(&self) -> Result<()> {
        info!("Optimizing database performance");

        sqlx::query("VACUUM")
            .execute(&self.pool)
            .await
            .context("Failed to vacuum database")?;

        sqlx::query("ANALYZE")
            .execute(&self.pool)
            .await
            .context("Failed to analyze database")?;

        debug!("Database optimization completed");
        Ok(())
    }

    #[inline]
    pub async fn close(&self) {
        self.pool.close().await;
        debug!("Database connection pool closed");
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        self.pool.is_closed()
    }
}
