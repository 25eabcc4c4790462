//! System instructions, the retrieval tool definition, and context rendering.

use crate::indexing::ScoredChunk;
use serde_json::{Value, json};
use std::fmt::Write as _;

/// Sentence the agent must use when the documents do not support an answer.
pub const REFUSAL_SENTENCE: &str = "I don't know based on the provided documents.";

/// Name of the retrieval tool offered in tool-calling mode.
pub const SEARCH_TOOL_NAME: &str = "search_documents";

const GROUNDING_RULES: &str = "\
You are a helpful document intelligence assistant. You answer questions about documents that \
have been uploaded and processed (PDFs, Word documents, HTML pages, scans, and plain text).

RULES:
- Answer strictly from the retrieved document content. Never use outside knowledge.
- If the retrieved content does not contain the answer, reply exactly: \"I don't know based on the provided documents.\"
- Always cite your sources with their filenames, for example (Source: report.pdf).
- Be concise but thorough.";

/// Instruction used when the model drives retrieval through [`SEARCH_TOOL_NAME`].
pub fn tool_system_prompt() -> String {
    format!(
        "{GROUNDING_RULES}

GUIDELINES:
- Use the {SEARCH_TOOL_NAME} tool to find relevant information before answering.
- Be efficient: one well-crafted search is usually sufficient.
- Only search again if the first results are clearly incomplete.

When answering:
1. Search the documents with a focused query.
2. Synthesize a clear answer from the results.
3. Include source citations (filenames)."
    )
}

/// Instruction used when retrieval ran once up front; `context` is the rendered chunks.
pub fn fixed_system_prompt(context: &str) -> String {
    format!("{GROUNDING_RULES}\n\nRETRIEVED CONTEXT:\n{context}")
}

/// OpenAI-style function definition for the retrieval tool.
pub fn search_tool_definition() -> Value {
    json!({
        "type": "function",
        "function": {
            "name": SEARCH_TOOL_NAME,
            "description": "Search the uploaded documents for passages relevant to a query. \
                            Returns numbered passages with their source filenames.",
            "parameters": {
                "type": "object",
                "properties": {
                    "query": {
                        "type": "string",
                        "description": "Focused search query describing the information needed."
                    }
                },
                "required": ["query"]
            }
        }
    })
}

/// Render retrieved chunks as numbered passages labelled with their source filename.
pub fn format_context(hits: &[ScoredChunk]) -> String {
    if hits.is_empty() {
        return "No relevant passages were found in the uploaded documents.".to_string();
    }

    let mut context = String::new();
    for (position, hit) in hits.iter().enumerate() {
        let metadata = &hit.chunk.metadata;
        let _ = write!(
            context,
            "[{}] Source: {} (chunk {})\n{}\n\n",
            position + 1,
            metadata.document.filename,
            metadata.chunk_index,
            hit.chunk.text.trim()
        );
    }
    context.truncate(context.trim_end().len());
    context
}
