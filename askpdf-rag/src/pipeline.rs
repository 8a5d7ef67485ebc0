//! RAG pipeline orchestrator.
//!
//! The [`RagPipeline`] coordinates the ingest and query workflows by composing
//! a [`DocumentLoader`], a [`FixedSizeChunker`], an [`EmbeddingProvider`], a
//! [`VectorStore`], and a [`Synthesizer`]. It is the only layer that applies
//! timeouts and the retry policy to external calls.
//!
//! Ingestion buffers every new entry and commits them with a single
//! [`VectorStore::add`], so a failed or cancelled ingest leaves the index
//! exactly as it was.
//!
//! # Example
//!
//! ```rust,ignore
//! use askpdf_rag::{RagPipeline, RagConfig, InMemoryVectorStore, HashingEmbedder, Upload};
//!
//! let pipeline = RagPipeline::builder()
//!     .config(RagConfig::default())
//!     .embedding_provider(Arc::new(HashingEmbedder::default()))
//!     .vector_store(Arc::new(InMemoryVectorStore::new()))
//!     .synthesizer(Arc::new(synthesizer))
//!     .build()?;
//!
//! let cancel = CancellationToken::new();
//! pipeline.ingest(vec![Upload::from_path("paper.pdf").await?], &cancel).await?;
//! let answer = pipeline.ask("What is the main result?", &cancel).await?;
//! ```

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use futures::{StreamExt, TryStreamExt, stream};
use tokio::sync::RwLock;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::chunking::{Chunker, FixedSizeChunker};
use crate::config::{FailureMode, RagConfig};
use crate::document::{Answer, CONTENT_HASH_KEY, Document, IndexEntry, Query};
use crate::embedding::EmbeddingProvider;
use crate::error::{RagError, Result};
use crate::loader::{DocumentLoader, TextExtractor, Upload};
use crate::retry::call_with_retry;
use crate::synthesizer::Synthesizer;
use crate::vectorstore::VectorStore;

/// Lifecycle state of a [`RagPipeline`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    /// Nothing has been ingested (or the index was reset).
    Empty,
    /// An ingest call is in progress.
    Ingesting,
    /// The index holds documents and no query is running.
    Ready,
    /// At least one query is running.
    Querying,
}

/// One successfully ingested document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestedDocument {
    pub source_id: String,
    pub chunk_count: usize,
}

/// One document that failed under [`FailureMode::ContinueOnError`].
#[derive(Debug)]
pub struct IngestFailure {
    pub source_id: String,
    /// Position of the document in the ingest call.
    pub index: usize,
    pub error: RagError,
}

/// Per-document outcome of an ingest call.
#[derive(Debug, Default)]
pub struct IngestReport {
    /// Documents whose chunks were committed to the index.
    pub ingested: Vec<IngestedDocument>,
    /// Source ids skipped because identical text was already indexed.
    pub skipped: Vec<String>,
    /// Documents that failed; always empty under [`FailureMode::FailFast`].
    pub failures: Vec<IngestFailure>,
}

impl IngestReport {
    /// Total number of chunks committed.
    pub fn chunk_count(&self) -> usize {
        self.ingested.iter().map(|d| d.chunk_count).sum()
    }

    /// Whether every document was ingested or skipped as a duplicate.
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

enum Source {
    Upload(Upload),
    Document(Document),
}

impl Source {
    fn id(&self) -> &str {
        match self {
            Source::Upload(upload) => &upload.filename,
            Source::Document(document) => &document.id,
        }
    }
}

enum Prepared {
    Entries { entries: Vec<IndexEntry>, content_hash: String },
    Duplicate,
}

/// Clears a flag when dropped, including on early return and cancellation.
struct FlagGuard<'a>(&'a AtomicBool);

impl<'a> FlagGuard<'a> {
    fn raise(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::SeqCst);
        Self(flag)
    }
}

impl Drop for FlagGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

struct CounterGuard<'a>(&'a AtomicUsize);

impl<'a> CounterGuard<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for CounterGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// The RAG pipeline orchestrator.
///
/// Queries may run concurrently with each other; `ingest` and `reset` are
/// exclusive with everything else. Construct one via [`RagPipeline::builder()`].
pub struct RagPipeline {
    config: RagConfig,
    chunker: FixedSizeChunker,
    loader: DocumentLoader,
    embedding_provider: Arc<dyn EmbeddingProvider>,
    vector_store: Arc<dyn VectorStore>,
    synthesizer: Arc<dyn Synthesizer>,
    gate: RwLock<()>,
    ingesting: AtomicBool,
    active_queries: AtomicUsize,
}

impl RagPipeline {
    /// Create a new [`RagPipelineBuilder`].
    pub fn builder() -> RagPipelineBuilder {
        RagPipelineBuilder::default()
    }

    /// Return a reference to the pipeline configuration.
    pub fn config(&self) -> &RagConfig {
        &self.config
    }

    /// Return a reference to the embedding provider.
    pub fn embedding_provider(&self) -> &Arc<dyn EmbeddingProvider> {
        &self.embedding_provider
    }

    /// Return a reference to the vector store.
    pub fn vector_store(&self) -> &Arc<dyn VectorStore> {
        &self.vector_store
    }

    /// Current lifecycle state.
    ///
    /// A pipeline built over a restored, non-empty index starts out `Ready`.
    pub async fn state(&self) -> PipelineState {
        if self.ingesting.load(Ordering::SeqCst) {
            PipelineState::Ingesting
        } else if self.active_queries.load(Ordering::SeqCst) > 0 {
            PipelineState::Querying
        } else if self.vector_store.is_empty().await {
            PipelineState::Empty
        } else {
            PipelineState::Ready
        }
    }

    /// Extract, chunk, embed, and index uploaded files.
    ///
    /// # Errors
    ///
    /// - [`RagError::Document`] for the first failing upload under
    ///   [`FailureMode::FailFast`], naming its source id and position.
    /// - [`RagError::DimensionMismatch`] if the new embeddings do not fit the index.
    /// - [`RagError::Cancelled`] if `cancel` fires before the commit.
    ///
    /// In every error case the index is left unchanged.
    pub async fn ingest(
        &self,
        uploads: Vec<Upload>,
        cancel: &CancellationToken,
    ) -> Result<IngestReport> {
        self.ingest_sources(uploads.into_iter().map(Source::Upload).collect(), cancel).await
    }

    /// Like [`ingest`](Self::ingest) for documents whose text is already extracted.
    pub async fn ingest_documents(
        &self,
        documents: Vec<Document>,
        cancel: &CancellationToken,
    ) -> Result<IngestReport> {
        self.ingest_sources(documents.into_iter().map(Source::Document).collect(), cancel).await
    }

    async fn ingest_sources(
        &self,
        sources: Vec<Source>,
        cancel: &CancellationToken,
    ) -> Result<IngestReport> {
        let _gate = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(RagError::Cancelled),
            guard = self.gate.write() => guard,
        };
        let _ingesting = FlagGuard::raise(&self.ingesting);

        let mut report = IngestReport::default();
        let mut pending: Vec<IndexEntry> = Vec::new();
        let mut batch_hashes = HashSet::new();

        for (index, source) in sources.into_iter().enumerate() {
            if cancel.is_cancelled() {
                return Err(RagError::Cancelled);
            }
            let source_id = source.id().to_string();

            match self.prepare(source, &batch_hashes, cancel).await {
                Ok(Prepared::Entries { entries, content_hash }) => {
                    // A failed document never marks its text as seen.
                    batch_hashes.insert(content_hash);
                    info!(document.id = %source_id, chunk_count = entries.len(), "prepared document");
                    report
                        .ingested
                        .push(IngestedDocument { source_id, chunk_count: entries.len() });
                    pending.extend(entries);
                }
                Ok(Prepared::Duplicate) => {
                    info!(document.id = %source_id, "skipping duplicate document");
                    report.skipped.push(source_id);
                }
                Err(RagError::Cancelled) => return Err(RagError::Cancelled),
                Err(e) => {
                    error!(document.id = %source_id, index, error = %e, "document ingestion failed");
                    match self.config.failure_mode {
                        FailureMode::FailFast => {
                            return Err(RagError::Document { source_id, index, source: Box::new(e) });
                        }
                        FailureMode::ContinueOnError => {
                            report.failures.push(IngestFailure { source_id, index, error: e });
                        }
                    }
                }
            }
        }

        if cancel.is_cancelled() {
            return Err(RagError::Cancelled);
        }

        let chunk_count = pending.len();
        self.vector_store.add(pending).await.map_err(|e| {
            error!(chunk_count, error = %e, "commit to vector store failed");
            e
        })?;

        info!(
            documents = report.ingested.len(),
            chunk_count,
            skipped = report.skipped.len(),
            failed = report.failures.len(),
            "ingest committed"
        );
        Ok(report)
    }

    /// Turn one source into index entries without touching the index.
    async fn prepare(
        &self,
        source: Source,
        batch_hashes: &HashSet<String>,
        cancel: &CancellationToken,
    ) -> Result<Prepared> {
        let document = match source {
            Source::Document(document) => document,
            Source::Upload(upload) => tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(RagError::Cancelled),
                document = self.loader.load(upload) => document?,
            },
        };

        let content_hash = document.content_hash();
        if self.config.dedupe {
            if batch_hashes.contains(&content_hash)
                || self.vector_store.contains_content_hash(&content_hash).await
            {
                return Ok(Prepared::Duplicate);
            }
        }

        let mut chunks = self.chunker.chunk(&document);
        if chunks.is_empty() {
            warn!(document.id = %document.id, "document has no text");
            return Ok(Prepared::Entries { entries: Vec::new(), content_hash });
        }
        for chunk in &mut chunks {
            chunk.metadata.insert(CONTENT_HASH_KEY.to_string(), content_hash.clone());
        }

        let texts: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
        let embeddings = self.embed_texts(&texts, cancel).await?;

        let entries = chunks
            .into_iter()
            .zip(embeddings)
            .map(|(chunk, embedding)| IndexEntry { embedding, chunk })
            .collect();
        Ok(Prepared::Entries { entries, content_hash })
    }

    /// Embed `texts` in `max_batch` groups, up to `max_concurrency` in flight,
    /// returning vectors in input order.
    async fn embed_texts(&self, texts: &[&str], cancel: &CancellationToken) -> Result<Vec<Vec<f32>>> {
        let provider = self.embedding_provider.name();
        let requests: Vec<_> = texts
            .chunks(self.config.max_batch)
            .map(|batch| async move {
                let vectors = call_with_retry(
                    &self.config.retry,
                    self.config.service_timeout,
                    provider,
                    cancel,
                    || self.embedding_provider.embed_batch(batch),
                )
                .await?;
                if vectors.len() != batch.len() {
                    return Err(RagError::Upstream {
                        service: provider.to_string(),
                        status: None,
                        message: format!(
                            "expected {} embeddings, got {}",
                            batch.len(),
                            vectors.len()
                        ),
                    });
                }
                Ok(vectors)
            })
            .collect();

        let batches: Vec<Vec<Vec<f32>>> = stream::iter(requests)
            .buffered(self.config.max_concurrency)
            .try_collect()
            .await?;

        Ok(batches.into_iter().flatten().collect())
    }

    /// Answer `query` from the indexed documents.
    ///
    /// # Errors
    ///
    /// - [`RagError::Validation`] for `top_k == 0` or a blank question.
    /// - [`RagError::EmptyIndex`] if nothing has been ingested.
    /// - [`RagError::Cancelled`] if `cancel` fires; no answer is returned.
    /// - Embedding or synthesis failures once retries are exhausted.
    pub async fn answer(&self, query: &Query, cancel: &CancellationToken) -> Result<Answer> {
        if query.top_k == 0 {
            return Err(RagError::Validation("top_k must be greater than zero".to_string()));
        }
        if query.question.trim().is_empty() {
            return Err(RagError::Validation("question must not be empty".to_string()));
        }

        let _gate = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(RagError::Cancelled),
            guard = self.gate.read() => guard,
        };
        if self.vector_store.is_empty().await {
            return Err(RagError::EmptyIndex);
        }
        let _querying = CounterGuard::enter(&self.active_queries);

        let query_embedding = call_with_retry(
            &self.config.retry,
            self.config.service_timeout,
            self.embedding_provider.name(),
            cancel,
            || self.embedding_provider.embed(&query.question),
        )
        .await
        .map_err(|e| {
            error!(error = %e, "embedding failed during query");
            e
        })?;

        let retrieval = self.vector_store.query(&query_embedding, query.top_k).await?;
        let context: Vec<&str> = retrieval.iter().map(|r| r.entry.chunk.text.as_str()).collect();

        let started = Instant::now();
        let synthesis = call_with_retry(
            &self.config.retry,
            self.config.service_timeout,
            "synthesizer",
            cancel,
            || self.synthesizer.synthesize(&query.question, &context),
        )
        .await
        .map_err(|e| {
            error!(error = %e, "synthesis failed");
            e
        })?;
        let elapsed = started.elapsed();

        info!(
            retrieved = retrieval.len(),
            dropped_chunks = synthesis.dropped_chunks,
            elapsed_ms = elapsed.as_millis() as u64,
            "query answered"
        );

        Ok(Answer {
            text: synthesis.text,
            retrieval,
            dropped_chunks: synthesis.dropped_chunks,
            elapsed,
        })
    }

    /// Answer `question` with the configured default `top_k`.
    pub async fn ask(&self, question: &str, cancel: &CancellationToken) -> Result<Answer> {
        self.answer(&Query::new(question).with_top_k(self.config.top_k), cancel).await
    }

    /// Clear the index and return to [`PipelineState::Empty`]. Idempotent.
    pub async fn reset(&self) -> Result<()> {
        let _gate = self.gate.write().await;
        self.vector_store.reset().await.map_err(|e| {
            error!(error = %e, "failed to reset vector store");
            e
        })?;
        info!("pipeline reset");
        Ok(())
    }
}

/// Builder for constructing a [`RagPipeline`].
///
/// `extractor` is optional and defaults to
/// [`ExtensionExtractor`](crate::loader::ExtensionExtractor); every other field
/// is required. Call [`build()`](RagPipelineBuilder::build) to validate and
/// produce the pipeline.
///
/// # Example
///
/// ```rust,ignore
/// let pipeline = RagPipeline::builder()
///     .config(RagConfig::default())
///     .embedding_provider(Arc::new(embedder))
///     .vector_store(Arc::new(store))
///     .synthesizer(Arc::new(synthesizer))
///     .extractor(Arc::new(PdfExtractor))  // optional
///     .build()?;
/// ```
#[derive(Default)]
pub struct RagPipelineBuilder {
    config: Option<RagConfig>,
    embedding_provider: Option<Arc<dyn EmbeddingProvider>>,
    vector_store: Option<Arc<dyn VectorStore>>,
    synthesizer: Option<Arc<dyn Synthesizer>>,
    extractor: Option<Arc<dyn TextExtractor>>,
}

impl RagPipelineBuilder {
    /// Set the pipeline configuration.
    pub fn config(mut self, config: RagConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Set the embedding provider.
    pub fn embedding_provider(mut self, provider: Arc<dyn EmbeddingProvider>) -> Self {
        self.embedding_provider = Some(provider);
        self
    }

    /// Set the vector store backend.
    pub fn vector_store(mut self, store: Arc<dyn VectorStore>) -> Self {
        self.vector_store = Some(store);
        self
    }

    /// Set the answer synthesizer.
    pub fn synthesizer(mut self, synthesizer: Arc<dyn Synthesizer>) -> Self {
        self.synthesizer = Some(synthesizer);
        self
    }

    /// Set the text extractor used for uploads.
    pub fn extractor(mut self, extractor: Arc<dyn TextExtractor>) -> Self {
        self.extractor = Some(extractor);
        self
    }

    /// Build the [`RagPipeline`], validating the configuration and that all
    /// required fields are set.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::Config`] if any required field is missing or the
    /// configuration is inconsistent.
    pub fn build(self) -> Result<RagPipeline> {
        let config =
            self.config.ok_or_else(|| RagError::Config("config is required".to_string()))?;
        config.validate()?;
        let embedding_provider = self
            .embedding_provider
            .ok_or_else(|| RagError::Config("embedding_provider is required".to_string()))?;
        let vector_store = self
            .vector_store
            .ok_or_else(|| RagError::Config("vector_store is required".to_string()))?;
        let synthesizer = self
            .synthesizer
            .ok_or_else(|| RagError::Config("synthesizer is required".to_string()))?;
        let loader = self.extractor.map(DocumentLoader::new).unwrap_or_default();
        let chunker = FixedSizeChunker::new(config.chunk_size, config.chunk_overlap)?;

        Ok(RagPipeline {
            config,
            chunker,
            loader,
            embedding_provider,
            vector_store,
            synthesizer,
            gate: RwLock::new(()),
            ingesting: AtomicBool::new(false),
            active_queries: AtomicUsize::new(0),
        })
    }
}
