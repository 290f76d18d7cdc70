//! Prompt assembly for answer synthesis.

use educore_core::graph::KnowledgeContext;
use educore_core::retrieval::RetrievedChunk;

/// Build the user prompt from the normalised query, the retrieved chunks
/// and optional graph context.
///
/// Chunks are enumerated from 1 as `{n}. ({content_type}) {text}`; a
/// `Related Concepts:` line follows when the graph contributed anything.
pub fn build_prompt(
    query: &str,
    chunks: &[RetrievedChunk],
    knowledge: Option<&KnowledgeContext>,
) -> String {
    let sources = chunks
        .iter()
        .enumerate()
        .map(|(i, chunk)| format!("{}. ({}) {}", i + 1, chunk.content_type, chunk.text))
        .collect::<Vec<_>>()
        .join("\n");

    let concepts = match knowledge {
        Some(ctx) if !ctx.is_empty() => {
            format!("\nRelated Concepts: {}", ctx.related_concepts.join(", "))
        }
        _ => String::new(),
    };

    format!(
        "Answer the user query using the provided context.\n\nQuery: {query}\n\nContext:\n{sources}{concepts}"
    )
}
