// Document processors
// Map file paths to text chunks plus per-chunk metadata

pub mod markdown;
pub mod text;


use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

use crate::embeddings::chunking::{ChunkingConfig, ParsingStrategy};

pub use markdown::MarkdownProcessor;
pub use text::PlainTextProcessor;

/// Descriptive metadata attached to every chunk a processor yields
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub source: String,
    pub doc_type: String,
    pub title: Option<String>,
    pub category: Option<String>,
}

/// Chunks produced from one file; `contents[i]` is described by `metadata[i]`
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ProcessedFile {
    pub contents: Vec<String>,
    pub metadata: Vec<ChunkMetadata>,
}

impl ProcessedFile {
    /// Pair every chunk with a copy of the same file-level metadata
    #[inline]
    pub fn uniform(contents: Vec<String>, metadata: &ChunkMetadata) -> Self {
        let metadata = vec![metadata.clone(); contents.len()];
        Self { contents, metadata }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.contents.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.contents.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProcessOptions {
    pub chunk_size: usize,
    pub overlap_size: usize,
    pub parsing_strategy: ParsingStrategy,
}

impl ProcessOptions {
    #[inline]
    pub fn chunking_config(&self) -> ChunkingConfig {
        ChunkingConfig {
            chunk_size: self.chunk_size,
            overlap_size: self.overlap_size,
            strategy: self.parsing_strategy,
        }
    }
}

#[derive(Debug, Error)]
pub enum ProcessorError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{0} is not valid UTF-8 text")]
    InvalidEncoding(String),
    #[error("Failed to parse {path}: {message}")]
    Parse { path: String, message: String },
}

impl ProcessorError {
    /// Reading can fail transiently; malformed content will fail again
    #[inline]
    pub fn is_retryable(&self) -> bool {
        matches!(*self, ProcessorError::Io { .. })
    }
}

/// Turns one kind of file into embeddable chunks
#[async_trait]
pub trait DocumentProcessor: Send + Sync {
    fn name(&self) -> &str;

    /// Lowercase extensions without the leading dot
    fn supported_extensions(&self) -> &[&str];

    async fn process_file(
        &self,
        path: &Path,
        options: &ProcessOptions,
    ) -> Result<ProcessedFile, ProcessorError>;
}

/// Registry of processors keyed by file extension
#[derive(Default, Clone)]
pub struct ProcessorRegistry {
    processors: HashMap<String, Arc<dyn DocumentProcessor>>,
}

impl std::fmt::Debug for ProcessorRegistry {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessorRegistry")
            .field("extensions", &self.supported_extensions())
            .finish()
    }
}

impl ProcessorRegistry {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in text and Markdown processors
    #[inline]
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(PlainTextProcessor));
        registry.register(Arc::new(MarkdownProcessor));
        registry
    }

    /// Register a processor for all of its extensions, replacing earlier registrations
    #[inline]
    pub fn register(&mut self, processor: Arc<dyn DocumentProcessor>) {
        for extension in processor.supported_extensions() {
            debug!(
                "Registering processor {} for .{}",
                processor.name(),
                extension
            );
            self.processors
                .insert(extension.to_lowercase(), Arc::clone(&processor));
        }
    }

    #[inline]
    pub fn get_processor(&self, path: &Path) -> Option<Arc<dyn DocumentProcessor>> {
        let extension = file_extension(path)?;
        self.processors.get(&extension).cloned()
    }

    /// Sorted list of registered extensions
    #[inline]
    pub fn supported_extensions(&self) -> Vec<String> {
        let mut extensions: Vec<String> = self.processors.keys().cloned().collect();
        extensions.sort();
        extensions
    }

    #[inline]
    pub fn supports(&self, path: &Path) -> bool {
        file_extension(path).is_some_and(|ext| self.processors.contains_key(&ext))
    }
}

/// Lowercased extension of `path` without the dot
#[inline]
pub fn file_extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_lowercase)
}

/// Read a file as UTF-8 text
pub(crate) async fn read_text(path: &Path) -> Result<String, ProcessorError> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|source| ProcessorError::Io {
            path: path.display().to_string(),
            source,
        })?;
    String::from_utf8(bytes).map_err(|_| ProcessorError::InvalidEncoding(path.display().to_string()))
}

/// Metadata shared by the built-in processors: extension as type, parent directory as category
pub(crate) fn file_metadata(path: &Path, title: Option<String>) -> ChunkMetadata {
    let category = path
        .parent()
        .and_then(Path::file_name)
        .and_then(|name| name.to_str())
        .map(str::to_string);

    ChunkMetadata {
        source: path.display().to_string(),
        doc_type: file_extension(path).unwrap_or_default(),
        title,
        category,
    }
}
