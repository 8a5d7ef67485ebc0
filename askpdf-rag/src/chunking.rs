//! Fixed-size character chunking.
//!
//! Text is cut into windows of `chunk_size` characters whose starts advance by
//! `chunk_size - overlap`. Splitting counts characters, not tokens, so a chunk
//! may straddle a word or sentence boundary.

use crate::document::{Chunk, ChunkSpan, Document};
use crate::error::{RagError, Result};

/// A strategy for splitting documents into chunks.
///
/// Implementations produce [`Chunk`]s with text and metadata but no embeddings.
/// Embeddings are attached later by the pipeline.
pub trait Chunker: Send + Sync {
    /// Split a document into chunks.
    ///
    /// Returns an empty `Vec` if the document has empty text.
    fn chunk(&self, document: &Document) -> Vec<Chunk>;
}

/// Splits text into fixed-size chunks by character count with configurable overlap.
///
/// Chunk IDs are generated as `{document_id}_{chunk_index}`. Each chunk inherits
/// the parent document's metadata plus a `chunk_index` field.
///
/// # Example
///
/// ```rust
/// use askpdf_rag::FixedSizeChunker;
///
/// let chunker = FixedSizeChunker::new(10, 3).unwrap();
/// let chunks = chunker.split("doc", "ABCDEFGHIJKLMNO");
/// assert_eq!(chunks[0].text, "ABCDEFGHIJ");
/// assert_eq!(chunks[1].text, "HIJKLMNO");
/// ```
#[derive(Debug, Clone)]
pub struct FixedSizeChunker {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl FixedSizeChunker {
    /// Create a new `FixedSizeChunker`.
    ///
    /// # Arguments
    ///
    /// * `chunk_size` - maximum number of characters per chunk
    /// * `chunk_overlap` - number of overlapping characters between consecutive chunks
    ///
    /// # Errors
    ///
    /// Returns [`RagError::Validation`] unless `0 <= chunk_overlap < chunk_size`.
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self> {
        if chunk_size == 0 {
            return Err(RagError::Validation("chunk_size must be greater than zero".into()));
        }
        if chunk_overlap >= chunk_size {
            return Err(RagError::Validation(format!(
                "chunk_overlap ({chunk_overlap}) must be less than chunk_size ({chunk_size})"
            )));
        }
        Ok(Self { chunk_size, chunk_overlap })
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn chunk_overlap(&self) -> usize {
        self.chunk_overlap
    }

    /// Split raw text belonging to `document_id` into chunks.
    pub fn split(&self, document_id: &str, text: &str) -> Vec<Chunk> {
        split_windows(text, self.chunk_size, self.chunk_overlap)
            .into_iter()
            .enumerate()
            .map(|(index, window)| Chunk {
                id: format!("{document_id}_{index}"),
                document_id: document_id.to_string(),
                index,
                text: text[window.bytes.0..window.bytes.1].to_string(),
                span: window.span,
                overlap: window.overlap,
                metadata: Default::default(),
            })
            .collect()
    }
}

impl Chunker for FixedSizeChunker {
    fn chunk(&self, document: &Document) -> Vec<Chunk> {
        let mut chunks = self.split(&document.id, &document.text);
        for chunk in &mut chunks {
            let mut metadata = document.metadata.clone();
            metadata.insert("chunk_index".to_string(), chunk.index.to_string());
            chunk.metadata = metadata;
        }
        chunks
    }
}

struct Window {
    span: ChunkSpan,
    bytes: (usize, usize),
    overlap: usize,
}

/// Compute the character windows; callers guarantee `overlap < chunk_size`.
fn split_windows(text: &str, chunk_size: usize, overlap: usize) -> Vec<Window> {
    if text.is_empty() {
        return Vec::new();
    }

    // Byte offset of every char boundary, including the end of the text.
    let boundaries: Vec<usize> =
        text.char_indices().map(|(i, _)| i).chain(std::iter::once(text.len())).collect();
    let char_count = boundaries.len() - 1;
    let step = chunk_size - overlap;

    let mut windows = Vec::new();
    let mut start = 0;
    let mut previous_end: usize = 0;

    loop {
        let end = (start + chunk_size).min(char_count);
        windows.push(Window {
            span: ChunkSpan { start, end },
            bytes: (boundaries[start], boundaries[end]),
            overlap: previous_end.saturating_sub(start),
        });
        if end == char_count {
            break;
        }
        previous_end = end;
        start += step;
    }

    windows
}

/// Rebuild the original text from one document's chunks, in order.
///
/// The leading `overlap` characters of every chunk are dropped before
/// concatenation.
pub fn reassemble(chunks: &[Chunk]) -> String {
    let mut text = String::new();
    for chunk in chunks {
        text.extend(chunk.text.chars().skip(chunk.overlap));
    }
    text
}
