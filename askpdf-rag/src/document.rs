//! Data types for documents, chunks, index entries, and answers.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Metadata key under which a chunk records its parent document's content hash.
pub const CONTENT_HASH_KEY: &str = "content_hash";

/// A source document containing extracted text and metadata.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Document {
    /// Source identifier (the upload file name).
    pub id: String,
    /// The extracted text content of the document.
    pub text: String,
    /// Key-value metadata associated with the document.
    pub metadata: HashMap<String, String>,
    /// Optional URI pointing to the original source.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_uri: Option<String>,
}

impl Document {
    /// Create a document with no metadata.
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self { id: id.into(), text: text.into(), metadata: HashMap::new(), source_uri: None }
    }

    /// Hex-encoded SHA-256 of the document text.
    pub fn content_hash(&self) -> String {
        format!("{:x}", Sha256::digest(self.text.as_bytes()))
    }
}

/// Half-open character range `[start, end)` of a chunk within its document.
///
/// Offsets count Unicode scalar values, not bytes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChunkSpan {
    pub start: usize,
    pub end: usize,
}

impl ChunkSpan {
    /// Number of characters covered by the span.
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

/// A contiguous segment of a [`Document`]'s text.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Chunk {
    /// Unique identifier for the chunk, `{document_id}_{index}`.
    pub id: String,
    /// The ID of the parent [`Document`].
    pub document_id: String,
    /// Ordinal position of the chunk within its document.
    pub index: usize,
    /// The text content of the chunk.
    pub text: String,
    /// Character range of the chunk in the parent document.
    pub span: ChunkSpan,
    /// Number of leading characters shared with the previous chunk.
    pub overlap: usize,
    /// Metadata inherited from the parent document plus chunk-specific fields.
    pub metadata: HashMap<String, String>,
}

/// A chunk stored in the vector index together with its embedding.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndexEntry {
    /// The vector embedding of `chunk.text`.
    pub embedding: Vec<f32>,
    /// The indexed chunk.
    pub chunk: Chunk,
}

impl IndexEntry {
    /// The source identifier of the document this entry came from.
    pub fn source_id(&self) -> &str {
        &self.chunk.document_id
    }
}

/// A retrieved [`IndexEntry`] paired with its cosine similarity to the query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    /// The retrieved entry.
    pub entry: IndexEntry,
    /// The similarity score (higher is more relevant).
    pub score: f32,
}

/// A question to answer against the index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    pub question: String,
    /// Number of chunks to retrieve as context.
    pub top_k: usize,
}

impl Query {
    /// Default number of retrieved chunks.
    pub const DEFAULT_TOP_K: usize = 4;

    pub fn new(question: impl Into<String>) -> Self {
        Self { question: question.into(), top_k: Self::DEFAULT_TOP_K }
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }
}

/// A synthesized answer with the retrieval it was derived from.
#[derive(Debug, Clone)]
pub struct Answer {
    /// The synthesized answer text.
    pub text: String,
    /// The retrieved context, highest similarity first.
    pub retrieval: Vec<SearchResult>,
    /// How many of the retrieved chunks were left out of the prompt to fit the
    /// completion service's input limit.
    pub dropped_chunks: usize,
    /// Wall-clock time spent in synthesis, retries included.
    pub elapsed: Duration,
}
