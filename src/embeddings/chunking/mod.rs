#[cfg(test)]
mod tests;

use serde::{Deserialize, Serialize};
use tracing::debug;

/// How text is cut into chunks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ParsingStrategy {
    /// Pack whole paragraphs, falling back to sentences and words for long ones
    #[default]
    Paragraph,
    /// Fixed-size windows snapped to word boundaries
    Fixed,
}

impl std::fmt::Display for ParsingStrategy {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            ParsingStrategy::Paragraph => write!(f, "paragraph"),
            ParsingStrategy::Fixed => write!(f, "fixed"),
        }
    }
}

/// Represents a chunk of content ready for embedding
#[derive(Debug, Clone, PartialEq)]
pub struct ContentChunk {
    pub content: String,
    /// Position of this chunk within its source
    pub chunk_index: usize,
    /// Estimated token count
    pub token_count: usize,
}

/// Sizes are measured in characters
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkingConfig {
    pub chunk_size: usize,
    pub overlap_size: usize,
    pub strategy: ParsingStrategy,
}

impl Default for ChunkingConfig {
    #[inline]
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            overlap_size: 200,
            strategy: ParsingStrategy::Paragraph,
        }
    }
}

/// Split text into chunks of at most `chunk_size` characters.
///
/// Every chunk after the first starts with the tail of its predecessor (up to
/// `overlap_size` characters, cut at a word boundary).
#[inline]
pub fn chunk_text(text: &str, config: &ChunkingConfig) -> Vec<ContentChunk> {
    let normalized = text.replace("\r\n", "\n");
    let content = normalized.trim();
    if content.is_empty() {
        return Vec::new();
    }

    let chunk_size = config.chunk_size.max(1);
    let overlap = config.overlap_size.min(chunk_size - 1);

    if char_len(content) <= chunk_size {
        return vec![make_chunk(content.to_string(), 0)];
    }

    // Room left for fresh text once the overlap prefix and its separator are added
    let budget = chunk_size
        .saturating_sub(overlap + usize::from(overlap > 0))
        .max(1);

    let splits = match config.strategy {
        ParsingStrategy::Paragraph => split_by_semantics(content, budget),
        ParsingStrategy::Fixed => split_by_words(content, budget),
    };
    let splits = add_overlap(splits, overlap);

    let chunks: Vec<ContentChunk> = splits
        .into_iter()
        .enumerate()
        .map(|(index, split)| make_chunk(split, index))
        .collect();

    debug!(
        "Chunked {} characters into {} chunks (strategy: {})",
        char_len(content),
        chunks.len(),
        config.strategy
    );

    chunks
}

fn make_chunk(content: String, chunk_index: usize) -> ContentChunk {
    let token_count = estimate_token_count(&content);
    ContentChunk {
        content,
        chunk_index,
        token_count,
    }
}

/// Accumulates pieces into splits no longer than `limit` characters
struct Packer {
    limit: usize,
    current: String,
    current_len: usize,
    splits: Vec<String>,
}

impl Packer {
    fn new(limit: usize) -> Self {
        Self {
            limit,
            current: String::new(),
            current_len: 0,
            splits: Vec::new(),
        }
    }

    fn push(&mut self, piece: &str, separator: &str) {
        let piece_len = char_len(piece);
        let separator_len = if self.current.is_empty() {
            0
        } else {
            char_len(separator)
        };

        if !self.current.is_empty() && self.current_len + separator_len + piece_len > self.limit {
            self.flush();
        }

        if !self.current.is_empty() {
            self.current.push_str(separator);
            self.current_len += separator_len;
        }
        self.current.push_str(piece);
        self.current_len += piece_len;
    }

    fn flush(&mut self) {
        let trimmed = self.current.trim();
        if !trimmed.is_empty() {
            self.splits.push(trimmed.to_string());
        }
        self.current.clear();
        self.current_len = 0;
    }

    fn finish(mut self) -> Vec<String> {
        self.flush();
        self.splits
    }
}

/// Split content on paragraph boundaries, breaking oversized paragraphs by sentence
fn split_by_semantics(content: &str, limit: usize) -> Vec<String> {
    let mut packer = Packer::new(limit);

    for paragraph in content.split("\n\n") {
        let paragraph = paragraph.trim();
        if paragraph.is_empty() {
            continue;
        }

        if char_len(paragraph) <= limit {
            packer.push(paragraph, "\n\n");
            continue;
        }

        // A long paragraph never shares a split with its neighbours
        packer.flush();
        for sentence_split in split_by_sentences(paragraph, limit) {
            packer.push(&sentence_split, "\n\n");
            packer.flush();
        }
    }

    packer.finish()
}

/// Split text by sentences, falling back to words for run-on sentences
fn split_by_sentences(text: &str, limit: usize) -> Vec<String> {
    let mut packer = Packer::new(limit);

    for sentence in sentences(text) {
        if char_len(sentence) <= limit {
            packer.push(sentence, " ");
        } else {
            for word_split in split_by_words(sentence, limit) {
                packer.push(&word_split, " ");
            }
        }
    }

    packer.finish()
}

/// Split text by words as a last resort; words longer than `limit` are cut
fn split_by_words(text: &str, limit: usize) -> Vec<String> {
    let mut packer = Packer::new(limit);

    for word in text.split_whitespace() {
        if char_len(word) <= limit {
            packer.push(word, " ");
        } else {
            let chars: Vec<char> = word.chars().collect();
            for piece in chars.chunks(limit) {
                packer.push(&piece.iter().collect::<String>(), " ");
            }
        }
    }

    packer.finish()
}

/// Sentence spans ending in `.`, `!` or `?` followed by whitespace or end of text
fn sentences(text: &str) -> Vec<&str> {
    let mut result = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();

    while let Some((index, c)) = chars.next() {
        let at_boundary = matches!(c, '.' | '!' | '?')
            && chars.peek().is_none_or(|&(_, next)| next.is_whitespace());
        if at_boundary {
            let end = index + c.len_utf8();
            if let Some(sentence) = text.get(start..end).map(str::trim) {
                if !sentence.is_empty() {
                    result.push(sentence);
                }
            }
            start = end;
        }
    }

    if let Some(rest) = text.get(start..).map(str::trim) {
        if !rest.is_empty() {
            result.push(rest);
        }
    }

    result
}

/// Prefix each split with the tail of the one before it
fn add_overlap(splits: Vec<String>, overlap: usize) -> Vec<String> {
    if overlap == 0 || splits.len() < 2 {
        return splits;
    }

    let mut result = Vec::with_capacity(splits.len());
    let mut previous: Option<&str> = None;

    for split in &splits {
        let content = match previous.map(|prev| extract_overlap_text(prev, overlap)) {
            Some(tail) if !tail.is_empty() => format!("{} {}", tail, split),
            _ => split.clone(),
        };
        result.push(content);
        previous = Some(split);
    }

    result
}

/// The last `overlap` characters of `content`, starting at a word boundary.
/// Empty when the whole chunk would be repeated.
fn extract_overlap_text(content: &str, overlap: usize) -> String {
    let chars: Vec<char> = content.chars().collect();
    if chars.len() <= overlap {
        return String::new();
    }

    let start = chars.len() - overlap;
    let tail = &chars[start..];
    let starts_mid_word = !chars[start - 1].is_whitespace() && !tail[0].is_whitespace();

    let tail: String = tail.iter().collect();
    if starts_mid_word {
        match tail.split_once(char::is_whitespace) {
            Some((_, rest)) => rest.trim().to_string(),
            None => tail.trim().to_string(),
        }
    } else {
        tail.trim().to_string()
    }
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}

/// Estimate token count using a simple heuristic
/// This is a rough approximation - actual tokenization would be more accurate
#[inline]
pub fn estimate_token_count(text: &str) -> usize {
    // Rough heuristic: 1 token ≈ 0.75 words for English text
    // Add extra tokens for punctuation and special characters
    let word_count = text.split_whitespace().count();
    let punct_count = text.chars().filter(|c| c.is_ascii_punctuation()).count();

    (punct_count as f64).mul_add(0.1, word_count as f64 / 0.75) as usize
}
