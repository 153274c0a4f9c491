#[cfg(test)]
mod tests;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::ConfigError;

/// Trailing characters of a proposed chunk searched for a sentence terminator
const SENTENCE_WINDOW: usize = 100;
/// Trailing characters of a proposed chunk searched for a word boundary
const WORD_WINDOW: usize = 50;
const SENTENCE_TERMINATORS: [char; 3] = ['.', '!', '?'];

/// Configuration for content chunking, in characters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Upper bound on the length of a chunk
    pub chunk_size: usize,
    /// Characters repeated between consecutive chunks
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    #[inline]
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            chunk_overlap: 200,
        }
    }
}

/// Extracted text of a single page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageText {
    /// 1-based page number
    pub page_number: u32,
    pub text: String,
}

/// A trimmed slice of page text with its character span
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextSpan {
    pub text: String,
    /// Character offset of the first retained character
    pub start_char: usize,
    /// Character offset one past the last retained character
    pub end_char: usize,
}

/// Represents a chunk of document text ready for embedding
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentChunk {
    /// The chunk text
    pub content: String,
    /// Position of this chunk within the whole document
    pub chunk_index: usize,
    /// Page the chunk was cut from
    pub page_number: u32,
    /// Whitespace-separated word count
    pub token_count: usize,
    pub start_char: usize,
    pub end_char: usize,
}

/// Split a page of text into overlapping, boundary-aware chunks.
///
/// Each cut prefers the right-most sentence terminator in the last
/// [`SENTENCE_WINDOW`] characters of the proposed chunk, then the right-most
/// space in the last [`WORD_WINDOW`] characters, and otherwise falls back to a
/// hard cut. The next chunk starts `chunk_overlap` characters before the cut,
/// but always at least one character after the previous start.
#[inline]
pub fn split_text(text: &str, config: &ChunkingConfig) -> Result<Vec<TextSpan>, ConfigError> {
    config.validate()?;

    let chars: Vec<char> = text.chars().collect();
    let len = chars.len();
    let mut spans = Vec::new();
    let mut start = 0;

    while start < len {
        let proposed = start + config.chunk_size;
        let end = if proposed >= len {
            len
        } else {
            find_cut(&chars, start, proposed)
        };

        if let Some(span) = trimmed_span(&chars, start, end) {
            spans.push(span);
        }

        if end >= len {
            break;
        }

        // A cut landing inside the overlap still advances by one character,
        // so consecutive chunks keep sharing text
        start = end.saturating_sub(config.chunk_overlap).max(start + 1);
        start += chars[start..].iter().take_while(|c| c.is_whitespace()).count();
    }

    Ok(spans)
}

/// Chunk every page of a document, numbering chunks across pages
#[inline]
pub fn chunk_pages(
    pages: &[PageText],
    config: &ChunkingConfig,
) -> Result<Vec<ContentChunk>, ConfigError> {
    let mut chunks = Vec::new();

    for page in pages {
        for span in split_text(&page.text, config)? {
            chunks.push(ContentChunk {
                chunk_index: chunks.len(),
                page_number: page.page_number,
                token_count: estimate_token_count(&span.text),
                content: span.text,
                start_char: span.start_char,
                end_char: span.end_char,
            });
        }
    }

    debug!(
        "Chunked {} pages into {} chunks (avg {} tokens)",
        pages.len(),
        chunks.len(),
        chunks.iter().map(|c| c.token_count).sum::<usize>() / chunks.len().max(1)
    );

    Ok(chunks)
}

/// Approximate token count: whitespace-separated words
#[inline]
pub fn estimate_token_count(text: &str) -> usize {
    text.split_whitespace().count()
}

fn find_cut(chars: &[char], start: usize, proposed: usize) -> usize {
    let sentence_floor = start.max(proposed.saturating_sub(SENTENCE_WINDOW));
    let sentence_cut = (sentence_floor..proposed - 1)
        .rev()
        .find(|&i| SENTENCE_TERMINATORS.contains(&chars[i]) && chars[i + 1] == ' ')
        .map(|i| i + 2);
    if let Some(cut) = sentence_cut {
        return cut;
    }

    let word_floor = (start + 1).max(proposed.saturating_sub(WORD_WINDOW));
    (word_floor..proposed)
        .rev()
        .find(|&i| chars[i] == ' ')
        .unwrap_or(proposed)
}

fn trimmed_span(chars: &[char], start: usize, end: usize) -> Option<TextSpan> {
    let window = &chars[start..end];
    let leading = window.iter().take_while(|c| c.is_whitespace()).count();
    if leading == window.len() {
        return None;
    }
    let trailing = window.iter().rev().take_while(|c| c.is_whitespace()).count();

    let start_char = start + leading;
    let end_char = end - trailing;
    Some(TextSpan {
        text: chars[start_char..end_char].iter().collect(),
        start_char,
        end_char,
    })
}
