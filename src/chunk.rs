//! Sentence-accumulating text chunker.
//!
//! Splits extracted text into bounded, overlapping chunks. Sentences are the
//! accumulation unit so chunk boundaries land on punctuation instead of
//! mid-word; adjacent chunks share a word-level overlap so retrieval does not
//! lose context at the seam.
//!
//! Output is a pure function of `(text, size, overlap)`: byte-identical
//! across runs and platforms. Chunk ids derive from the document id and the
//! emission index, so re-chunking unchanged text reproduces the same ids.

use crate::models::Chunk;

/// Chunks at or below this length carry no retrievable signal and are dropped.
const MIN_CHUNK_CHARS: usize = 10;

#[derive(Debug, Clone, Copy)]
pub struct ChunkOptions {
    /// Target chunk length in characters.
    pub size: usize,
    /// Word-count overlap carried from the previous chunk.
    pub overlap: usize,
}

/// Split `text` into chunks with dense zero-based indices.
pub fn chunk_text(doc_id: &str, text: &str, opts: ChunkOptions) -> Vec<Chunk> {
    let mut pieces: Vec<String> = Vec::new();
    let mut current = String::new();

    for sentence in split_sentences(text) {
        let sentence = sentence.trim();
        if sentence.is_empty() {
            continue;
        }

        if current.is_empty() {
            current.push_str(sentence);
            continue;
        }

        let would_be = current.len() + 1 + sentence.len();
        if would_be > opts.size && current.len() >= opts.size {
            let prefix = overlap_words(&current, opts.overlap);
            pieces.push(std::mem::take(&mut current));
            if !prefix.is_empty() {
                current.push_str(&prefix);
                current.push(' ');
            }
            current.push_str(sentence);
        } else {
            current.push(' ');
            current.push_str(sentence);
        }
    }

    if !current.is_empty() {
        pieces.push(current);
    }

    pieces
        .into_iter()
        .filter(|piece| piece.len() > MIN_CHUNK_CHARS)
        .enumerate()
        .map(|(index, text)| make_chunk(doc_id, index as i64, text))
        .collect()
}

/// Coarse token estimate: `ceil(len / 4)`.
pub fn estimate_tokens(text: &str) -> i64 {
    ((text.len() + 3) / 4) as i64
}

/// Stable chunk identity, shared between the metadata and vector stores.
pub fn chunk_id(doc_id: &str, index: i64) -> String {
    format!("{doc_id}-chunk-{index}")
}

fn make_chunk(doc_id: &str, index: i64, text: String) -> Chunk {
    Chunk {
        id: chunk_id(doc_id, index),
        doc_id: doc_id.to_string(),
        chunk_index: index,
        tokens: estimate_tokens(&text),
        text,
    }
}

/// Split on runs of sentence terminators (`.`, `!`, `?`), keeping each run
/// attached to its sentence. Interior whitespace is preserved; a trailing
/// fragment without a terminator forms the final unit.
fn split_sentences(text: &str) -> Vec<&str> {
    let mut units = Vec::new();
    let mut start = 0;
    let mut in_terminator = false;

    for (pos, ch) in text.char_indices() {
        let is_terminator = matches!(ch, '.' | '!' | '?');
        if in_terminator && !is_terminator {
            units.push(&text[start..pos]);
            start = pos;
        }
        in_terminator = is_terminator;
    }
    if start < text.len() {
        units.push(&text[start..]);
    }
    units
}

/// The last `min(overlap, words)` words of a chunk, joined by single spaces.
fn overlap_words(text: &str, overlap: usize) -> String {
    if overlap == 0 {
        return String::new();
    }
    let words: Vec<&str> = text.split_whitespace().collect();
    let take = overlap.min(words.len());
    words[words.len() - take..].join(" ")
}
