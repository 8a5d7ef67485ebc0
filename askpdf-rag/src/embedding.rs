//! The text-to-vector seam.

use async_trait::async_trait;

use crate::error::Result;

/// Maps text to a fixed-length vector.
///
/// The same text must always map to the same vector, and every vector a provider
/// returns has [`dimensions`](EmbeddingProvider::dimensions) components. Calls
/// may be slow and may fail with
/// [`RagError::TransientService`](crate::RagError::TransientService); the
/// pipeline owns timeouts and retries, so providers make a single attempt.
///
/// ```rust,ignore
/// use askpdf_rag::{EmbeddingProvider, HashingEmbedder};
///
/// let embedder = HashingEmbedder::default();
/// let vector = embedder.embed("what is a lifetime?").await?;
/// assert_eq!(vector.len(), embedder.dimensions());
/// ```
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed one text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Embed several texts, one vector per input, in input order.
    ///
    /// Defaults to calling [`embed`](EmbeddingProvider::embed) once per text.
    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        let mut vectors = Vec::with_capacity(texts.len());
        for text in texts {
            vectors.push(self.embed(text).await?);
        }
        Ok(vectors)
    }

    /// Length of every vector this provider returns.
    fn dimensions(&self) -> usize;

    /// Short backend name used in logs and errors.
    fn name(&self) -> &str {
        "embedder"
    }
}
