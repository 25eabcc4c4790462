//! Sliding-window chunking on top of semantic segmentation.
//!
//! Each document is first segmented by `semchunk-rs` into pieces no longer than
//! `chunk_size - chunk_overlap`. Every piece after the first is then prefixed with up to
//! `chunk_overlap` units from the tail of its predecessor and trimmed from the front to
//! `chunk_size`. Length is measured either in characters or in tokens of the embedding model
//! (via `tiktoken-rs`), per [`ChunkUnit`].

use super::types::{Chunk, ChunkMetadata, ChunkingError};
use crate::config::ChunkUnit;
use crate::ingestion::NormalizedDocument;
use anyhow::Error as TokenizerError;
use semchunk_rs::Chunker;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tiktoken_rs::{
    CoreBPE, cl100k_base, get_bpe_from_model, o200k_base, p50k_base, p50k_edit, r50k_base,
};

/// Measures the length of a text segment in the configured unit.
pub type LengthCounter = Arc<dyn Fn(&str) -> usize + Send + Sync>;

/// Split every document into chunks, preserving document order and chunk order within each.
///
/// Deterministic: the same input and parameters always yield the same chunks.
pub fn chunk_documents(
    documents: &[NormalizedDocument],
    chunk_size: usize,
    overlap: usize,
    counter: &LengthCounter,
) -> Result<Vec<Chunk>, ChunkingError> {
    if chunk_size == 0 {
        return Err(ChunkingError::InvalidChunkSize);
    }

    let mut chunks = Vec::new();
    for document in documents {
        let pieces = chunk_text_with_counter(&document.text, chunk_size, overlap, counter);
        tracing::debug!(
            filename = %document.metadata.filename,
            chunks = pieces.len(),
            "Document chunked"
        );
        chunks.extend(pieces.into_iter().enumerate().map(|(chunk_index, text)| {
            let chunk_hash = hash_chunk(&text);
            Chunk {
                text,
                metadata: ChunkMetadata {
                    document: document.metadata.clone(),
                    chunk_index,
                    chunk_hash,
                },
            }
        }));
    }
    Ok(chunks)
}

/// Build a length counter for the configured unit.
///
/// Token counting resolves the embedding model's encoding and falls back to `cl100k_base` for
/// models `tiktoken-rs` does not know.
pub fn build_counter(unit: ChunkUnit, model: &str) -> Result<LengthCounter, ChunkingError> {
    match unit {
        ChunkUnit::Characters => Ok(character_counter()),
        ChunkUnit::Tokens => build_tiktoken_counter(model),
    }
}

fn character_counter() -> LengthCounter {
    Arc::new(|segment: &str| segment.chars().count())
}

fn build_tiktoken_counter(model: &str) -> Result<LengthCounter, ChunkingError> {
    let normalized = model.trim();
    let target = if normalized.is_empty() {
        "cl100k_base"
    } else {
        // Provider-prefixed ids such as `openai/text-embedding-3-small`.
        normalized.rsplit('/').next().unwrap_or(normalized)
    };
    let encoding = resolve_encoding(target).map_err(|source| ChunkingError::Tokenizer {
        model: target.to_string(),
        source,
    })?;
    let encoding = Arc::new(encoding);

    Ok(Arc::new(move |segment: &str| {
        encoding.encode_ordinary(segment).len()
    }))
}

fn resolve_encoding(model: &str) -> Result<CoreBPE, TokenizerError> {
    match get_bpe_from_model(model) {
        Ok(encoding) => Ok(encoding),
        Err(model_err) => {
            tracing::debug!(
                model,
                error = %model_err,
                "Tokenizer model lookup failed; trying encoding name"
            );
            if let Some(candidate) = encoding_from_name(model) {
                candidate
            } else {
                tracing::warn!(
                    model,
                    "Falling back to 'cl100k_base' encoding for token counting"
                );
                cl100k_base()
            }
        }
    }
}

fn encoding_from_name(name: &str) -> Option<Result<CoreBPE, TokenizerError>> {
    match name {
        "cl100k_base" => Some(cl100k_base()),
        "o200k_base" => Some(o200k_base()),
        "p50k_base" => Some(p50k_base()),
        "p50k_edit" => Some(p50k_edit()),
        "r50k_base" | "gpt2" => Some(r50k_base()),
        _ => None,
    }
}

/// SHA-256 hex digest of a chunk's text.
pub fn hash_chunk(text: &str) -> String {
    hex::encode(Sha256::digest(text.as_bytes()))
}

/// Segment `text` and apply the sliding overlap. Whitespace-only input yields no chunks.
pub fn chunk_text_with_counter(
    text: &str,
    chunk_size: usize,
    overlap: usize,
    counter: &LengthCounter,
) -> Vec<String> {
    if chunk_size == 0 || text.trim().is_empty() {
        return Vec::new();
    }

    let effective_overlap = overlap.min(chunk_size.saturating_sub(1));
    let window = chunk_size - effective_overlap;
    let counter_for_chunker = counter.clone();
    let chunker = Chunker::new(
        window,
        Box::new(move |segment: &str| counter_for_chunker.as_ref()(segment)),
    );
    let base_chunks = chunker.chunk(text);
    apply_overlap(base_chunks, chunk_size, effective_overlap, counter)
}

/// Prefix each chunk after the first with the tail of its predecessor, within `chunk_size`.
fn apply_overlap(
    chunks: Vec<String>,
    chunk_size: usize,
    overlap: usize,
    counter: &LengthCounter,
) -> Vec<String> {
    if overlap == 0 {
        return chunks;
    }

    let mut overlapped = Vec::with_capacity(chunks.len());
    let mut previous: Option<String> = None;
    for current in chunks {
        let next = match &previous {
            Some(previous) => build_overlapped_chunk(previous, &current, overlap, chunk_size, counter),
            None => current.clone(),
        };
        overlapped.push(next);
        previous = Some(current);
    }
    overlapped
}

fn build_overlapped_chunk(
    previous: &str,
    current: &str,
    overlap: usize,
    chunk_size: usize,
    counter: &LengthCounter,
) -> String {
    let tail = tail_within_limit(previous, overlap, counter);
    let mut combined = String::with_capacity(tail.len() + current.len() + 1);

    if !tail.is_empty() {
        combined.push_str(tail);
        if !ends_with_whitespace(tail) && !starts_with_whitespace(current) {
            combined.push(' ');
        }
    }

    combined.push_str(current);
    trim_to_budget(&combined, chunk_size, counter).to_string()
}

/// Longest suffix of `text` (leading whitespace trimmed) measuring at most `limit`.
fn tail_within_limit<'a>(text: &'a str, limit: usize, counter: &LengthCounter) -> &'a str {
    if limit == 0 {
        return "";
    }
    trim_to_budget(text, limit, counter)
}

/// Drop characters from the front of `text` until it fits `budget`.
fn trim_to_budget<'a>(text: &'a str, budget: usize, counter: &LengthCounter) -> &'a str {
    if budget == 0 {
        return "";
    }

    let trimmed_text = text.trim_start();
    if counter.as_ref()(trimmed_text) <= budget {
        return trimmed_text;
    }

    for (offset, _) in text.char_indices().skip(1) {
        let trimmed = text[offset..].trim_start();
        if counter.as_ref()(trimmed) <= budget {
            return trimmed;
        }
    }

    ""
}

fn starts_with_whitespace(text: &str) -> bool {
    text.chars().next().is_some_and(char::is_whitespace)
}

fn ends_with_whitespace(text: &str) -> bool {
    text.chars().next_back().is_some_and(char::is_whitespace)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingestion::DocumentMetadata;

    fn word_counter() -> LengthCounter {
        Arc::new(|segment: &str| segment.split_whitespace().count())
    }

    fn document(filename: &str, text: &str) -> NormalizedDocument {
        NormalizedDocument {
            text: text.to_string(),
            metadata: DocumentMetadata {
                filename: filename.to_string(),
                file_type: "text/plain".to_string(),
                source: filename.to_string(),
                output_dir: format!("outputs/{filename}"),
            },
        }
    }

    #[test]
    fn chunks_respect_window_without_overlap() {
        let chunks = chunk_text_with_counter("one two three four five", 2, 0, &word_counter());
        assert_eq!(chunks, vec!["one two", "three four", "five"]);
    }

    #[test]
    fn whitespace_only_input_yields_nothing() {
        assert!(chunk_text_with_counter("  \n\t ", 4, 1, &word_counter()).is_empty());
    }

    #[test]
    fn overlap_prefixes_previous_tail() {
        let counter = word_counter();
        let chunks = chunk_text_with_counter("one two three four five six", 3, 1, &counter);
        assert_eq!(chunks, vec!["one two", "two three four", "four five six"]);
        for chunk in &chunks {
            assert!(counter.as_ref()(chunk) <= 3);
        }
    }

    #[test]
    fn character_chunks_never_exceed_size() {
        let counter = character_counter();
        let text = "Retrieval augmented generation grounds answers in documents. ".repeat(40);
        let chunks = chunk_text_with_counter(&text, 120, 20, &counter);
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(chunk.chars().count() <= 120);
        }
    }

    #[test]
    fn trim_handles_multibyte_text() {
        let counter = character_counter();
        assert_eq!(trim_to_budget("héllo wörld", 5, &counter), "wörld");
    }

    #[test]
    fn chunk_documents_is_deterministic_and_keeps_metadata() {
        let documents = vec![
            document("a.md", "alpha beta gamma delta"),
            document("b.md", "epsilon zeta"),
        ];
        let counter = word_counter();
        let first = chunk_documents(&documents, 2, 0, &counter).expect("chunks");
        let second = chunk_documents(&documents, 2, 0, &counter).expect("chunks");
        assert_eq!(first, second);

        let labels: Vec<(&str, usize)> = first
            .iter()
            .map(|chunk| (chunk.metadata.document.source.as_str(), chunk.metadata.chunk_index))
            .collect();
        assert_eq!(labels, vec![("a.md", 0), ("a.md", 1), ("b.md", 0)]);
        assert_eq!(first[0].metadata.chunk_hash, hash_chunk("alpha beta"));
    }

    #[test]
    fn chunk_documents_rejects_zero_size() {
        let error = chunk_documents(&[], 0, 0, &word_counter()).expect_err("invalid size");
        assert!(matches!(error, ChunkingError::InvalidChunkSize));
    }

    #[test]
    fn token_counter_respects_budget() {
        let counter = build_counter(ChunkUnit::Tokens, "text-embedding-3-small").expect("counter");
        let text = "The quick brown fox jumps over the lazy dog.";
        let chunks = chunk_text_with_counter(text, 5, 0, &counter);
        for chunk in &chunks {
            assert!(counter.as_ref()(chunk) <= 5);
        }
        let words: Vec<&str> = chunks.iter().flat_map(|chunk| chunk.split_whitespace()).collect();
        assert_eq!(words, text.split_whitespace().collect::<Vec<_>>());
    }

    /// Non-repeating prose so suffix/prefix matches only come from the applied overlap.
    fn long_document(len: usize) -> String {
        let mut text = String::with_capacity(len + 80);
        let mut line = 0;
        while text.len() < len {
            text.push_str(&format!(
                "Section {line} explains how retrieval step {} grounds the answer. ",
                line % 17
            ));
            line += 1;
        }
        text.truncate(len);
        text
    }

    fn shared_overlap(previous: &str, next: &str) -> usize {
        (1..=previous.len().min(next.len()))
            .rev()
            .find(|&len| {
                previous.is_char_boundary(previous.len() - len)
                    && next.starts_with(&previous[previous.len() - len..])
            })
            .unwrap_or(0)
    }

    #[test]
    fn default_settings_split_a_long_document_with_overlap() {
        let counter = build_counter(ChunkUnit::Characters, "text-embedding-3-small").expect("counter");
        let text = long_document(55_200);
        let chunks = chunk_text_with_counter(&text, 3000, 200, &counter);

        let expected = text.len().div_ceil(3000 - 200);
        assert!(
            (expected..=expected + 1).contains(&chunks.len()),
            "got {} chunks, expected about {expected}",
            chunks.len()
        );
        for chunk in &chunks {
            assert!(chunk.chars().count() <= 3000);
        }
        for pair in chunks.windows(2) {
            let shared = shared_overlap(&pair[0], &pair[1]);
            assert!((180..=200).contains(&shared), "neighbours share {shared} chars");
        }
    }
}
