
use async_trait::async_trait;
use pulldown_cmark::{Event, HeadingLevel, Options, Parser, Tag, TagEnd};
use std::path::Path;

use super::{
    DocumentProcessor, ProcessOptions, ProcessedFile, ProcessorError, file_metadata, read_text,
};
use crate::embeddings::chunking::chunk_text;

/// Markdown files, flattened to plain text before chunking
#[derive(Debug, Clone, Copy, Default)]
pub struct MarkdownProcessor;

/// Text and title recovered from a Markdown document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkdownText {
    pub title: Option<String>,
    pub text: String,
}

/// Flatten Markdown into paragraphs of plain text.
///
/// Block elements end with a blank line so the paragraph chunker sees their boundaries.
/// The title is the first level-one heading, else the first heading of any level.
#[inline]
pub fn extract_markdown_text(markdown: &str) -> MarkdownText {
    let parser = Parser::new_ext(markdown, Options::ENABLE_TABLES | Options::ENABLE_STRIKETHROUGH);

    let mut text = String::new();
    let mut heading_text = String::new();
    let mut in_heading = false;
    let mut first_h1: Option<String> = None;
    let mut first_heading: Option<String> = None;

    for event in parser {
        match event {
            Event::Start(Tag::Heading { .. }) => {
                in_heading = true;
                heading_text.clear();
            }
            Event::End(TagEnd::Heading(level)) => {
                in_heading = false;
                let heading = heading_text.trim().to_string();
                if !heading.is_empty() {
                    if level == HeadingLevel::H1 && first_h1.is_none() {
                        first_h1 = Some(heading.clone());
                    }
                    if first_heading.is_none() {
                        first_heading = Some(heading.clone());
                    }
                    end_block(&mut text);
                    text.push_str(&heading);
                    end_block(&mut text);
                }
            }
            Event::Start(Tag::Item) => {
                end_line(&mut text);
                text.push_str("- ");
            }
            Event::End(TagEnd::Paragraph | TagEnd::CodeBlock | TagEnd::Table) => {
                end_block(&mut text);
            }
            Event::End(TagEnd::Item | TagEnd::TableRow) => end_line(&mut text),
            Event::End(TagEnd::TableCell) => text.push(' '),
            Event::Text(fragment) | Event::Code(fragment) => {
                if in_heading {
                    heading_text.push_str(&fragment);
                } else {
                    text.push_str(&fragment);
                }
            }
            Event::SoftBreak | Event::HardBreak => {
                if in_heading {
                    heading_text.push(' ');
                } else {
                    text.push('\n');
                }
            }
            _ => {}
        }
    }

    MarkdownText {
        title: first_h1.or(first_heading),
        text: text.trim().to_string(),
    }
}

fn end_block(text: &mut String) {
    let trimmed_len = text.trim_end_matches([' ', '\n']).len();
    text.truncate(trimmed_len);
    if !text.is_empty() {
        text.push_str("\n\n");
    }
}

fn end_line(text: &mut String) {
    if !text.is_empty() && !text.ends_with('\n') {
        text.push('\n');
    }
}

#[async_trait]
impl DocumentProcessor for MarkdownProcessor {
    #[inline]
    fn name(&self) -> &str {
        "markdown"
    }

    #[inline]
    fn supported_extensions(&self) -> &[&str] {
        &["md", "markdown"]
    }

    #[inline]
    async fn process_file(
        &self,
        path: &Path,
        options: &ProcessOptions,
    ) -> Result<ProcessedFile, ProcessorError> {
        let markdown = read_text(path).await?;
        let extracted = extract_markdown_text(&markdown);

        let title = extracted.title.or_else(|| {
            path.file_stem()
                .and_then(|stem| stem.to_str())
                .map(str::to_string)
        });

        let contents = chunk_text(&extracted.text, &options.chunking_config())
            .into_iter()
            .map(|chunk| chunk.content)
            .collect();

        Ok(ProcessedFile::uniform(contents, &file_metadata(path, title)))
    }
}
