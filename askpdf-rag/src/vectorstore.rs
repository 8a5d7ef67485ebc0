//! Vector index trait for storing and searching chunk embeddings.

use async_trait::async_trait;

use crate::document::{IndexEntry, SearchResult};
use crate::error::Result;

/// A storage backend for chunk embeddings with cosine similarity search.
///
/// The index owns its [`IndexEntry`]s: they are appended by [`add`](VectorStore::add),
/// never mutated, and only removed by [`reset`](VectorStore::reset). The first
/// successful `add` fixes the index dimension until the next reset.
///
/// # Example
///
/// ```rust,ignore
/// use askpdf_rag::{InMemoryVectorStore, VectorStore};
///
/// let store = InMemoryVectorStore::new();
/// store.add(entries).await?;
/// let results = store.query(&query_embedding, 4).await?;
/// ```
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Append entries atomically.
    ///
    /// Fails with [`RagError::DimensionMismatch`](crate::RagError::DimensionMismatch)
    /// if any embedding length differs from the established dimension, in which
    /// case no entry is added.
    async fn add(&self, entries: Vec<IndexEntry>) -> Result<()>;

    /// Return the `k` entries most similar to `vector`, highest score first.
    ///
    /// `k` is clamped to the index size. Ties keep insertion order.
    async fn query(&self, vector: &[f32], k: usize) -> Result<Vec<SearchResult>>;

    /// Remove every entry. Calling it on an empty index is a no-op.
    async fn reset(&self) -> Result<()>;

    /// Number of stored entries.
    async fn len(&self) -> usize;

    /// Whether the index holds no entries.
    async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// The established embedding dimension, if any entry has been added.
    async fn dimensions(&self) -> Option<usize>;

    /// Whether any entry came from a document with the given content hash.
    async fn contains_content_hash(&self, hash: &str) -> bool;
}
