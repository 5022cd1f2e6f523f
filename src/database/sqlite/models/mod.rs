
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, Type};

/// A stored chunk of content. `id` is also the key of its vector in the similarity index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Document {
    pub id: i64,
    pub content: String,
    pub source: String,
    #[sqlx(rename = "type")]
    #[serde(rename = "type")]
    pub doc_type: String,
    pub title: Option<String>,
    pub category: Option<String>,
    pub content_hash: String,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewDocument {
    pub content: String,
    pub source: String,
    pub doc_type: String,
    pub title: Option<String>,
    pub category: Option<String>,
    pub content_hash: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct DocumentVectorStats {
    pub document_id: i64,
    pub vector_count: i64,
    pub average_vector_length: f64,
    pub total_tokens: i64,
    pub chunks_count: i64,
    pub last_updated: NaiveDateTime,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentVectorStatsUpdate {
    pub document_id: i64,
    pub vector_count: i64,
    pub average_vector_length: f64,
    pub total_tokens: i64,
    pub chunks_count: i64,
}

/// Corpus-wide aggregate, recomputed from the document tables
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct DatabaseStats {
    pub total_documents: i64,
    pub total_vectors: i64,
    pub total_tokens: i64,
    pub total_chunks: i64,
    pub average_vectors_per_doc: f64,
    pub total_content_size: i64,
    pub last_import_at: Option<NaiveDateTime>,
    pub last_updated: NaiveDateTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[sqlx(type_name = "TEXT", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ImportStatus {
    Running,
    Completed,
    Failed,
}

impl std::fmt::Display for ImportStatus {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            ImportStatus::Running => write!(f, "Running"),
            ImportStatus::Completed => write!(f, "Completed"),
            ImportStatus::Failed => write!(f, "Failed"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct ImportOperation {
    pub id: i64,
    pub started_at: NaiveDateTime,
    pub completed_at: Option<NaiveDateTime>,
    pub status: ImportStatus,
    pub files_processed: i64,
    pub files_failed: i64,
    /// Milliseconds
    pub total_processing_time: i64,
    /// Serialized per-file errors
    pub error_details: Option<String>,
    /// Serialized import options the run used
    pub configuration: Option<String>,
}

/// Terminal values written when an import run ends
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportOperationUpdate {
    pub status: ImportStatus,
    pub files_processed: i64,
    pub files_failed: i64,
    pub total_processing_time: i64,
    pub error_details: Option<String>,
}

impl ImportOperation {
    #[inline]
    pub fn is_running(&self) -> bool {
        self.status == ImportStatus::Running
    }

    #[inline]
    pub fn is_finished(&self) -> bool {
        matches!(self.status, ImportStatus::Completed | ImportStatus::Failed)
    }
}
