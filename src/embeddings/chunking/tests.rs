use super::estimate_token_count as estimate_token_count_impl;
use super::*;

fn small_config() -> ChunkingConfig {
    ChunkingConfig {
        chunk_size: 200,
        chunk_overlap: 40,
    }
}

fn long_prose(sentences: usize) -> String {
    (0..sentences)
        .map(|i| format!("Sentence number {i} talks about retrieval and indexing. "))
        .collect()
}

#[test]
fn estimate_token_count() {
    assert_eq!(estimate_token_count_impl("hello world"), 2);
    assert_eq!(estimate_token_count_impl("  This is\na test.  "), 4);
    assert_eq!(estimate_token_count_impl(""), 0);
}

#[test]
fn short_text_yields_single_trimmed_chunk() {
    let text = "   Paris is the capital of France.\n\n";
    let spans = split_text(text, &ChunkingConfig::default()).expect("split should succeed");

    assert_eq!(spans.len(), 1);
    assert_eq!(spans[0].text, text.trim());
    assert_eq!(spans[0].start_char, 3);
    assert_eq!(spans[0].end_char, 3 + text.trim().chars().count());
}

#[test]
fn empty_and_blank_text_yield_nothing() {
    let config = ChunkingConfig::default();
    assert!(split_text("", &config).expect("split").is_empty());
    assert!(split_text(" \n\t  ", &config).expect("split").is_empty());
}

#[test]
fn chunks_respect_size_and_are_never_empty() {
    let text = long_prose(40);
    let config = small_config();
    let spans = split_text(&text, &config).expect("split should succeed");

    assert!(spans.len() > 1);
    for span in &spans {
        assert!(!span.text.is_empty());
        assert_eq!(span.text, span.text.trim());
        assert!(span.text.chars().count() <= config.chunk_size);
    }
}

#[test]
fn cuts_prefer_sentence_boundaries() {
    let text = long_prose(40);
    let spans = split_text(&text, &small_config()).expect("split should succeed");

    for span in &spans[..spans.len() - 1] {
        assert!(
            span.text.ends_with('.'),
            "chunk should end at a sentence: {:?}",
            span.text
        );
    }
}

#[test]
fn consecutive_chunks_overlap() {
    let text = long_prose(40);
    let spans = split_text(&text, &small_config()).expect("split should succeed");

    for pair in spans.windows(2) {
        assert!(
            pair[1].start_char < pair[0].end_char,
            "chunks {:?} and {:?} should overlap",
            pair[0],
            pair[1]
        );
    }
}

#[test]
fn overlap_survives_large_overlap_settings() {
    let text = long_prose(40);

    for (chunk_size, chunk_overlap) in [(200, 40), (200, 150), (200, 190), (120, 119), (1000, 200)] {
        let config = ChunkingConfig {
            chunk_size,
            chunk_overlap,
        };
        config.validate().expect("valid config");
        let spans = split_text(&text, &config).expect("split should succeed");

        assert!(spans.len() > 1, "{chunk_size}/{chunk_overlap} should yield several chunks");
        assert_eq!(spans.last().map(|s| s.end_char), Some(text.trim_end().chars().count()));
        for pair in spans.windows(2) {
            assert!(
                pair[0].start_char < pair[1].start_char,
                "{chunk_size}/{chunk_overlap}: chunks must advance: {:?} then {:?}",
                pair[0],
                pair[1]
            );
            assert!(
                pair[1].start_char < pair[0].end_char,
                "{chunk_size}/{chunk_overlap}: no overlap between {:?} and {:?}",
                pair[0],
                pair[1]
            );
        }
    }
}

#[test]
fn falls_back_to_word_boundary_without_sentences() {
    let text = "word ".repeat(100);
    let spans = split_text(&text, &small_config()).expect("split should succeed");

    assert!(spans.len() > 1);
    for span in &spans {
        assert!(span.text.split(' ').all(|w| w == "word"));
    }
}

#[test]
fn hard_cut_without_any_boundary() {
    let text = "x".repeat(450);
    let config = small_config();
    let spans = split_text(&text, &config).expect("split should succeed");

    assert_eq!(spans[0].text.chars().count(), 200);
    assert_eq!(spans[1].start_char, 160);
    assert_eq!(spans.last().map(|s| s.end_char), Some(450));
}

#[test]
fn spans_match_source_text() {
    let text = format!("Ünïcödé prefix. {}", long_prose(20));
    let chars: Vec<char> = text.chars().collect();
    let spans = split_text(&text, &small_config()).expect("split should succeed");

    for span in spans {
        let slice: String = chars[span.start_char..span.end_char].iter().collect();
        assert_eq!(slice, span.text);
    }
}

#[test]
fn split_is_pure() {
    let text = long_prose(30);
    let first = split_text(&text, &small_config()).expect("split should succeed");
    let second = split_text(&text, &small_config()).expect("split should succeed");
    assert_eq!(first, second);
}

#[test]
fn overlap_not_smaller_than_size_is_rejected() {
    let config = ChunkingConfig {
        chunk_size: 200,
        chunk_overlap: 200,
    };
    let result = split_text("anything", &config);
    assert!(matches!(result, Err(ConfigError::OverlapTooLarge(200, 200))));
}

#[test]
fn chunk_indexes_run_across_pages() {
    let pages = vec![
        PageText {
            page_number: 1,
            text: long_prose(10),
        },
        PageText {
            page_number: 2,
            text: "A short second page.".to_string(),
        },
        PageText {
            page_number: 3,
            text: long_prose(10),
        },
    ];

    let chunks = chunk_pages(&pages, &small_config()).expect("chunking should succeed");

    let indexes: Vec<usize> = chunks.iter().map(|c| c.chunk_index).collect();
    let expected: Vec<usize> = (0..chunks.len()).collect();
    assert_eq!(indexes, expected);

    let second_page: Vec<&ContentChunk> = chunks.iter().filter(|c| c.page_number == 2).collect();
    assert_eq!(second_page.len(), 1);
    assert_eq!(second_page[0].content, "A short second page.");
    assert_eq!(second_page[0].token_count, 4);

    let pages_seen: Vec<u32> = chunks.iter().map(|c| c.page_number).collect();
    assert!(pages_seen.windows(2).all(|w| w[0] <= w[1]));
}
