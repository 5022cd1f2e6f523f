use super::estimate_token_count as estimate_token_count_impl;
use super::*;

fn config(chunk_size: usize, overlap_size: usize, strategy: ParsingStrategy) -> ChunkingConfig {
    ChunkingConfig {
        chunk_size,
        overlap_size,
        strategy,
    }
}

#[test]
fn estimate_token_count() {
    assert_eq!(estimate_token_count_impl("hello world"), 2);
    assert_eq!(estimate_token_count_impl("This is a test."), 5);
    assert_eq!(estimate_token_count_impl(""), 0);
}

#[test]
fn empty_text_yields_no_chunks() {
    assert!(chunk_text("", &ChunkingConfig::default()).is_empty());
    assert!(chunk_text(" \n\n \t", &ChunkingConfig::default()).is_empty());
}

#[test]
fn small_text_is_single_chunk() {
    let chunks = chunk_text("  A short note.  ", &ChunkingConfig::default());
    assert_eq!(chunks.len(), 1);
    assert_eq!(chunks[0].content, "A short note.");
    assert_eq!(chunks[0].chunk_index, 0);
}

#[test]
fn paragraphs_are_packed_without_overlap() {
    let text = "First paragraph here.\n\nSecond paragraph here.\n\nThird paragraph here.";
    let chunks = chunk_text(text, &config(50, 0, ParsingStrategy::Paragraph));

    assert_eq!(chunks.len(), 2);
    assert_eq!(
        chunks[0].content,
        "First paragraph here.\n\nSecond paragraph here."
    );
    assert_eq!(chunks[1].content, "Third paragraph here.");
}

#[test]
fn chunks_respect_size_limit() {
    let text = "Advanced usage involves understanding complex concepts. ".repeat(100);
    for strategy in [ParsingStrategy::Paragraph, ParsingStrategy::Fixed] {
        let chunks = chunk_text(&text, &config(300, 60, strategy));
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(
                chunk.content.chars().count() <= 300,
                "chunk of {} characters exceeds limit",
                chunk.content.chars().count()
            );
        }
    }
}

#[test]
fn overlap_repeats_previous_tail() {
    let words: Vec<String> = (0..200).map(|i| format!("word{i}")).collect();
    let text = words.join(" ");
    let chunks = chunk_text(&text, &config(200, 40, ParsingStrategy::Fixed));

    assert!(chunks.len() > 2);
    for pair in chunks.windows(2) {
        let previous_last_word = pair[0]
            .content
            .split_whitespace()
            .last()
            .expect("chunk should have words");
        let next_words: Vec<&str> = pair[1].content.split_whitespace().collect();
        assert!(
            next_words.contains(&previous_last_word),
            "overlap should carry '{}' into the next chunk",
            previous_last_word
        );
    }
}

#[test]
fn overlap_starts_on_word_boundary() {
    let tail = extract_overlap_text("alpha beta gamma delta", 8);
    assert_eq!(tail, "delta");

    let whole_words = extract_overlap_text("alpha beta gamma delta", 11);
    assert_eq!(whole_words, "gamma delta");

    assert_eq!(extract_overlap_text("tiny", 10), "");
}

#[test]
fn long_words_are_cut() {
    let text = "x".repeat(250);
    let chunks = chunk_text(&text, &config(100, 0, ParsingStrategy::Paragraph));
    assert_eq!(chunks.len(), 3);
    assert!(chunks.iter().all(|c| c.content.chars().count() <= 100));
}

#[test]
fn sentence_boundaries_detected() {
    let found = sentences("One. Two! Three? v1.2 is fine. Tail without stop");
    assert_eq!(
        found,
        vec!["One.", "Two!", "Three?", "v1.2 is fine.", "Tail without stop"]
    );
}

#[test]
fn multibyte_text_is_safe() {
    let text = "日本語のテキスト。".repeat(80);
    let chunks = chunk_text(&text, &config(64, 16, ParsingStrategy::Paragraph));
    assert!(!chunks.is_empty());
    assert!(chunks.iter().all(|c| c.content.chars().count() <= 64));
}

#[test]
fn chunk_indices_are_sequential() {
    let text = (0..30)
        .map(|i| format!("Paragraph number {i} talks about a topic."))
        .collect::<Vec<_>>()
        .join("\n\n");
    let chunks = chunk_text(&text, &config(120, 20, ParsingStrategy::Paragraph));

    for (expected, chunk) in chunks.iter().enumerate() {
        assert_eq!(chunk.chunk_index, expected);
        assert_eq!(chunk.token_count, estimate_token_count_impl(&chunk.content));
    }
}

#[test]
fn strategy_display_and_serde() {
    assert_eq!(ParsingStrategy::Paragraph.to_string(), "paragraph");
    assert_eq!(ParsingStrategy::Fixed.to_string(), "fixed");

    let parsed: ParsingStrategy =
        serde_json::from_str("\"fixed\"").expect("should parse strategy");
    assert_eq!(parsed, ParsingStrategy::Fixed);
}
