
use async_trait::async_trait;
use std::path::Path;

use super::{
    DocumentProcessor, ProcessOptions, ProcessedFile, ProcessorError, file_metadata, read_text,
};
use crate::embeddings::chunking::chunk_text;

/// Plain text files, chunked as-is
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainTextProcessor;

#[async_trait]
impl DocumentProcessor for PlainTextProcessor {
    #[inline]
    fn name(&self) -> &str {
        "plain-text"
    }

    #[inline]
    fn supported_extensions(&self) -> &[&str] {
        &["txt", "text", "log"]
    }

    #[inline]
    async fn process_file(
        &self,
        path: &Path,
        options: &ProcessOptions,
    ) -> Result<ProcessedFile, ProcessorError> {
        let text = read_text(path).await?;
        let title = path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .map(str::to_string);

        let contents = chunk_text(&text, &options.chunking_config())
            .into_iter()
            .map(|chunk| chunk.content)
            .collect();

        Ok(ProcessedFile::uniform(contents, &file_metadata(path, title)))
    }
}
