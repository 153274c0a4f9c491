
use std::fmt::Write as _;

use crate::database::ConversationTurn;
use crate::database::vector_index::SearchHit;

pub const SYSTEM_INSTRUCTIONS: &str = "You are a helpful AI assistant that answers questions based on the provided document context.

Rules:
1. Answer questions using ONLY the information from the provided context
2. If the context doesn't contain enough information, say so clearly
3. Cite the document name and page number when referencing information
4. Be concise but comprehensive
5. If asked about something not in the context, politely explain you can only answer based on the provided documents";

pub const CONTEXT_SEPARATOR: &str = "\n\n---\n\n";

/// Concatenate retrieved chunks, best match first, each headed by its citation
#[inline]
pub fn build_context(hits: &[SearchHit]) -> String {
    hits.iter()
        .map(|hit| {
            format!(
                "[Document: {}, Page: {}]\n{}",
                hit.chunk.document_name,
                hit.chunk.page_number,
                hit.chunk.text.trim()
            )
        })
        .collect::<Vec<_>>()
        .join(CONTEXT_SEPARATOR)
}

/// Render the single prompt sent to the generation backend.
///
/// Only the last `max_history_turns` of `history` are included.
#[inline]
pub fn build_prompt(
    question: &str,
    context: &str,
    history: &[ConversationTurn],
    max_history_turns: usize,
) -> String {
    let mut prompt = String::with_capacity(
        SYSTEM_INSTRUCTIONS.len() + context.len() + question.len() + 256,
    );
    prompt.push_str(SYSTEM_INSTRUCTIONS);
    prompt.push_str(CONTEXT_SEPARATOR);

    let recent = &history[history.len().saturating_sub(max_history_turns)..];
    if !recent.is_empty() {
        prompt.push_str("Previous conversation:\n");
        for turn in recent {
            let _ = writeln!(prompt, "{}: {}", turn.role, turn.text);
        }
        prompt.push_str("\n---\n\n");
    }

    let _ = write!(
        prompt,
        "Context from documents:\n\n{context}{CONTEXT_SEPARATOR}Question: {question}\n\n\
         Please answer the question based on the context provided above."
    );
    prompt
}

/// Shorten text for display, appending an ellipsis when anything was cut
#[inline]
pub fn preview(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}
