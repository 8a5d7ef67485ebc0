//! End-to-end ingest and query behaviour of [`RagPipeline`] with fake services.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use askpdf_rag::{
    Chunk, ChunkSpan, Document, EmbeddingProvider, FailureMode, HashingEmbedder, IndexEntry,
    InMemoryVectorStore, PipelineState, Query, RagConfig, RagError, RagPipeline, Result,
    RetryPolicy, Synthesis, Synthesizer, TextExtractor, Upload, VectorStore,
};
use async_trait::async_trait;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

// ── Fakes ──────────────────────────────────────────────────────────

/// Answers with the retrieved context joined by `|`.
#[derive(Default)]
struct EchoSynthesizer {
    calls: AtomicUsize,
}

#[async_trait]
impl Synthesizer for EchoSynthesizer {
    async fn synthesize(&self, _question: &str, context: &[&str]) -> Result<Synthesis> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(Synthesis { text: context.join("|"), dropped_chunks: 0 })
    }
}

/// Plain-text extraction that fails for files named `bad*`.
struct SelectiveExtractor;

impl TextExtractor for SelectiveExtractor {
    fn extract(&self, upload: &Upload) -> Result<String> {
        if upload.filename.starts_with("bad") {
            return Err(RagError::Extraction {
                source_id: upload.filename.clone(),
                message: "encrypted PDF".into(),
            });
        }
        Ok(String::from_utf8_lossy(&upload.bytes).into_owned())
    }
}

/// Fails the first `failures` batch calls with the given error, then delegates.
struct FlakyEmbedder {
    inner: HashingEmbedder,
    failures: usize,
    transient: bool,
    calls: AtomicUsize,
}

impl FlakyEmbedder {
    fn new(failures: usize, transient: bool) -> Self {
        Self { inner: HashingEmbedder::default(), failures, transient, calls: AtomicUsize::new(0) }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EmbeddingProvider for FlakyEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.inner.embed(text).await
    }

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures {
            return Err(if self.transient {
                RagError::TransientService { service: "flaky".into(), message: "503".into() }
            } else {
                RagError::Upstream { service: "flaky".into(), status: Some(400), message: "bad input".into() }
            });
        }
        self.inner.embed_batch(texts).await
    }

    fn dimensions(&self) -> usize {
        self.inner.dimensions()
    }
}

/// Never finishes a batch.
struct StuckEmbedder;

#[async_trait]
impl EmbeddingProvider for StuckEmbedder {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        std::future::pending().await
    }

    async fn embed_batch(&self, _texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        std::future::pending().await
    }

    fn dimensions(&self) -> usize {
        8
    }
}

/// Signals `entered` and waits for `release` before answering.
#[derive(Default)]
struct GatedSynthesizer {
    entered: Notify,
    release: Notify,
}

#[async_trait]
impl Synthesizer for GatedSynthesizer {
    async fn synthesize(&self, _question: &str, _context: &[&str]) -> Result<Synthesis> {
        self.entered.notify_one();
        self.release.notified().await;
        Ok(Synthesis { text: "done".into(), dropped_chunks: 0 })
    }
}

// ── Helpers ────────────────────────────────────────────────────────

fn small_config() -> RagConfig {
    RagConfig::builder()
        .chunk_size(40)
        .chunk_overlap(8)
        .top_k(3)
        .retry(RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(1),
        })
        .build()
        .unwrap()
}

fn pipeline_with(
    config: RagConfig,
    embedder: Arc<dyn EmbeddingProvider>,
    store: Arc<dyn VectorStore>,
    synthesizer: Arc<dyn Synthesizer>,
) -> RagPipeline {
    RagPipeline::builder()
        .config(config)
        .embedding_provider(embedder)
        .vector_store(store)
        .synthesizer(synthesizer)
        .extractor(Arc::new(SelectiveExtractor))
        .build()
        .unwrap()
}

fn echo_pipeline(config: RagConfig) -> (RagPipeline, Arc<InMemoryVectorStore>) {
    let store = Arc::new(InMemoryVectorStore::new());
    let pipeline = pipeline_with(
        config,
        Arc::new(HashingEmbedder::default()),
        store.clone(),
        Arc::new(EchoSynthesizer::default()),
    );
    (pipeline, store)
}

fn uploads() -> Vec<Upload> {
    vec![
        Upload::new("rust.txt", "Rust guarantees memory safety without a garbage collector."),
        Upload::new("bad.pdf", "unreadable"),
        Upload::new("tea.txt", "Green tea is steeped at a lower temperature than black tea."),
    ]
}

async fn indexed_sources(store: &InMemoryVectorStore) -> Vec<String> {
    let dims = store.dimensions().await.unwrap_or(1);
    let mut sources: Vec<String> = store
        .query(&vec![1.0; dims], store.len().await.max(1))
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.entry.source_id().to_string())
        .collect();
    sources.sort();
    sources.dedup();
    sources
}

// ── Tests ──────────────────────────────────────────────────────────

#[tokio::test]
async fn query_before_ingest_is_empty_index() {
    let (pipeline, _) = echo_pipeline(small_config());
    let cancel = CancellationToken::new();

    assert_eq!(pipeline.state().await, PipelineState::Empty);
    assert!(matches!(pipeline.ask("anything?", &cancel).await, Err(RagError::EmptyIndex)));
}

#[tokio::test]
async fn ingest_then_answer_retrieves_the_relevant_document() {
    let (pipeline, store) = echo_pipeline(small_config());
    let cancel = CancellationToken::new();

    let report = pipeline
        .ingest(
            vec![
                Upload::new("rust.txt", "Rust guarantees memory safety without a garbage collector."),
                Upload::new("tea.txt", "Green tea is steeped at a lower temperature than black tea."),
            ],
            &cancel,
        )
        .await
        .unwrap();

    assert!(report.is_complete());
    assert_eq!(report.ingested.len(), 2);
    assert_eq!(report.chunk_count(), store.len().await);
    assert_eq!(pipeline.state().await, PipelineState::Ready);

    let answer =
        pipeline.answer(&Query::new("At what temperature is green tea steeped?").with_top_k(1), &cancel)
            .await
            .unwrap();
    assert_eq!(answer.retrieval.len(), 1);
    assert_eq!(answer.retrieval[0].entry.source_id(), "tea.txt");
    assert_eq!(answer.text, answer.retrieval[0].entry.chunk.text);
    assert_eq!(answer.dropped_chunks, 0);
}

#[tokio::test]
async fn chunks_carry_source_and_content_hash() {
    let (pipeline, store) = echo_pipeline(small_config());
    let cancel = CancellationToken::new();
    let text = "Rust guarantees memory safety without a garbage collector.";
    pipeline.ingest(vec![Upload::new("rust.txt", text)], &cancel).await.unwrap();

    let hash = Document::new("rust.txt", text).content_hash();
    assert!(store.contains_content_hash(&hash).await);

    let results = store.query(&vec![1.0; 384], 10).await.unwrap();
    for result in results {
        let metadata = &result.entry.chunk.metadata;
        assert_eq!(metadata.get("source").map(String::as_str), Some("rust.txt"));
        assert_eq!(metadata.get("content_hash"), Some(&hash));
    }
}

#[tokio::test]
async fn fail_fast_leaves_index_untouched_and_names_the_document() {
    let (pipeline, store) = echo_pipeline(small_config());
    let cancel = CancellationToken::new();

    let err = pipeline.ingest(uploads(), &cancel).await.unwrap_err();

    match &err {
        RagError::Document { source_id, index, .. } => {
            assert_eq!(source_id, "bad.pdf");
            assert_eq!(*index, 1);
        }
        other => panic!("expected document error, got {other:?}"),
    }
    assert!(matches!(err.root(), RagError::Extraction { .. }));
    assert!(store.is_empty().await);
    assert_eq!(pipeline.state().await, PipelineState::Empty);
}

#[tokio::test]
async fn continue_on_error_commits_the_good_documents() {
    let config = RagConfig::builder()
        .chunk_size(40)
        .chunk_overlap(8)
        .failure_mode(FailureMode::ContinueOnError)
        .build()
        .unwrap();
    let (pipeline, store) = echo_pipeline(config);
    let cancel = CancellationToken::new();

    let report = pipeline.ingest(uploads(), &cancel).await.unwrap();

    assert!(!report.is_complete());
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].source_id, "bad.pdf");
    assert_eq!(report.failures[0].index, 1);
    let ingested: Vec<&str> = report.ingested.iter().map(|d| d.source_id.as_str()).collect();
    assert_eq!(ingested, ["rust.txt", "tea.txt"]);
    assert_eq!(indexed_sources(&store).await, ["rust.txt", "tea.txt"]);
}

#[tokio::test]
async fn cancelled_token_stops_ingest_before_any_work() {
    let (pipeline, store) = echo_pipeline(small_config());
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = pipeline.ingest(vec![Upload::new("rust.txt", "memory safety")], &cancel).await;

    assert!(matches!(err, Err(RagError::Cancelled)));
    assert!(store.is_empty().await);
}

#[tokio::test]
async fn cancelling_during_embedding_discards_the_batch() {
    let store = Arc::new(InMemoryVectorStore::new());
    let pipeline = Arc::new(pipeline_with(
        small_config(),
        Arc::new(StuckEmbedder),
        store.clone(),
        Arc::new(EchoSynthesizer::default()),
    ));
    let cancel = CancellationToken::new();

    let task = {
        let pipeline = pipeline.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            pipeline
                .ingest_documents(vec![Document::new("a", "some text to embed")], &cancel)
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(pipeline.state().await, PipelineState::Ingesting);
    cancel.cancel();

    assert!(matches!(task.await.unwrap(), Err(RagError::Cancelled)));
    assert!(store.is_empty().await);
    assert_eq!(pipeline.state().await, PipelineState::Empty);
}

#[tokio::test(start_paused = true)]
async fn transient_embedding_failures_are_retried() {
    let embedder = Arc::new(FlakyEmbedder::new(2, true));
    let store = Arc::new(InMemoryVectorStore::new());
    let pipeline =
        pipeline_with(small_config(), embedder.clone(), store.clone(), Arc::new(EchoSynthesizer::default()));

    let report = pipeline
        .ingest_documents(vec![Document::new("a", "short text")], &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(embedder.calls(), 3);
    assert_eq!(report.chunk_count(), 1);
    assert_eq!(store.len().await, 1);
}

#[tokio::test(start_paused = true)]
async fn retries_give_up_after_max_attempts() {
    let embedder = Arc::new(FlakyEmbedder::new(usize::MAX, true));
    let store = Arc::new(InMemoryVectorStore::new());
    let pipeline =
        pipeline_with(small_config(), embedder.clone(), store.clone(), Arc::new(EchoSynthesizer::default()));

    let err = pipeline
        .ingest_documents(vec![Document::new("a", "short text")], &CancellationToken::new())
        .await
        .unwrap_err();

    assert_eq!(embedder.calls(), 3);
    assert!(matches!(err.root(), RagError::TransientService { .. }));
    assert!(store.is_empty().await);
}

#[tokio::test]
async fn upstream_errors_are_not_retried() {
    let embedder = Arc::new(FlakyEmbedder::new(1, false));
    let store = Arc::new(InMemoryVectorStore::new());
    let pipeline =
        pipeline_with(small_config(), embedder.clone(), store.clone(), Arc::new(EchoSynthesizer::default()));

    let err = pipeline
        .ingest_documents(vec![Document::new("a", "short text")], &CancellationToken::new())
        .await
        .unwrap_err();

    assert_eq!(embedder.calls(), 1);
    assert!(matches!(err.root(), RagError::Upstream { status: Some(400), .. }));
}

#[tokio::test]
async fn embedding_batches_respect_max_batch() {
    let embedder = Arc::new(FlakyEmbedder::new(0, true));
    let store = Arc::new(InMemoryVectorStore::new());
    let config = RagConfig::builder().chunk_size(10).chunk_overlap(0).max_batch(3).build().unwrap();
    let pipeline = pipeline_with(config, embedder.clone(), store.clone(), Arc::new(EchoSynthesizer::default()));

    // 70 characters -> 7 chunks -> 3 batches.
    let text = "abcdefghij".repeat(7);
    let report = pipeline
        .ingest_documents(vec![Document::new("a", text)], &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.chunk_count(), 7);
    assert_eq!(embedder.calls(), 3);
}

#[tokio::test]
async fn dimension_mismatch_on_commit_keeps_index() {
    let store = Arc::new(InMemoryVectorStore::new());
    store
        .add(vec![IndexEntry {
            embedding: vec![1.0; 4],
            chunk: Chunk {
                id: "old_0".into(),
                document_id: "old".into(),
                index: 0,
                text: "old".into(),
                span: ChunkSpan { start: 0, end: 3 },
                overlap: 0,
                metadata: Default::default(),
            },
        }])
        .await
        .unwrap();
    let pipeline = pipeline_with(
        small_config(),
        Arc::new(HashingEmbedder::default()),
        store.clone(),
        Arc::new(EchoSynthesizer::default()),
    );

    let err = pipeline
        .ingest_documents(vec![Document::new("new", "fresh text")], &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, RagError::DimensionMismatch { expected: 4, actual: 384 }));
    assert_eq!(store.len().await, 1);
}

#[tokio::test]
async fn dedupe_skips_repeated_text() {
    let config = RagConfig::builder().chunk_size(40).chunk_overlap(8).dedupe(true).build().unwrap();
    let (pipeline, store) = echo_pipeline(config);
    let cancel = CancellationToken::new();

    let report = pipeline
        .ingest_documents(
            vec![Document::new("a", "identical body"), Document::new("b", "identical body")],
            &cancel,
        )
        .await
        .unwrap();
    assert_eq!(report.ingested.len(), 1);
    assert_eq!(report.skipped, ["b"]);

    let report =
        pipeline.ingest_documents(vec![Document::new("c", "identical body")], &cancel).await.unwrap();
    assert!(report.ingested.is_empty());
    assert_eq!(report.skipped, ["c"]);
    assert_eq!(store.len().await, 1);
}

#[tokio::test]
async fn failed_document_does_not_mark_its_text_as_seen() {
    let store = Arc::new(InMemoryVectorStore::new());
    let config = RagConfig::builder()
        .chunk_size(40)
        .chunk_overlap(8)
        .dedupe(true)
        .failure_mode(FailureMode::ContinueOnError)
        .build()
        .unwrap();
    let pipeline = pipeline_with(
        config,
        Arc::new(FlakyEmbedder::new(1, false)),
        store.clone(),
        Arc::new(EchoSynthesizer::default()),
    );

    let report = pipeline
        .ingest_documents(
            vec![Document::new("a.pdf", "same text"), Document::new("b.pdf", "same text")],
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].source_id, "a.pdf");
    assert!(report.skipped.is_empty());
    let ingested: Vec<&str> = report.ingested.iter().map(|d| d.source_id.as_str()).collect();
    assert_eq!(ingested, ["b.pdf"]);
    assert_eq!(store.len().await, 1);
    assert_eq!(indexed_sources(&store).await, ["b.pdf"]);
}

#[tokio::test]
async fn ingest_runs_on_a_spawned_task() {
    let store = Arc::new(InMemoryVectorStore::new());
    let pipeline = Arc::new(pipeline_with(
        RagConfig::builder().chunk_size(10).chunk_overlap(2).max_batch(2).build().unwrap(),
        Arc::new(HashingEmbedder::default()),
        store.clone(),
        Arc::new(EchoSynthesizer::default()),
    ));
    let cancel = CancellationToken::new();

    let uploads = tokio::spawn({
        let pipeline = pipeline.clone();
        let cancel = cancel.clone();
        async move {
            pipeline
                .ingest(vec![Upload::new("notes.txt", "spawned ingest spans several batches")], &cancel)
                .await
        }
    });
    let documents = tokio::spawn({
        let pipeline = pipeline.clone();
        async move {
            pipeline
                .ingest_documents(vec![Document::new("doc", "another document")], &cancel)
                .await
        }
    });

    let first = uploads.await.unwrap().unwrap();
    let second = documents.await.unwrap().unwrap();
    assert!(first.chunk_count() > 2);
    assert_eq!(store.len().await, first.chunk_count() + second.chunk_count());
}

#[tokio::test]
async fn without_dedupe_repeated_text_is_indexed_twice() {
    let (pipeline, store) = echo_pipeline(small_config());
    let cancel = CancellationToken::new();

    pipeline
        .ingest_documents(
            vec![Document::new("a", "identical body"), Document::new("b", "identical body")],
            &cancel,
        )
        .await
        .unwrap();
    assert_eq!(store.len().await, 2);
}

#[tokio::test]
async fn ask_uses_configured_top_k() {
    let config = RagConfig::builder().chunk_size(40).chunk_overlap(8).top_k(2).build().unwrap();
    let (pipeline, _) = echo_pipeline(config);
    let cancel = CancellationToken::new();
    let documents = (0..5).map(|i| Document::new(format!("d{i}"), format!("document number {i}"))).collect();
    pipeline.ingest_documents(documents, &cancel).await.unwrap();

    let answer = pipeline.ask("document number", &cancel).await.unwrap();
    assert_eq!(answer.retrieval.len(), 2);
    assert!(answer.retrieval[0].score >= answer.retrieval[1].score);
}

#[tokio::test]
async fn invalid_queries_are_rejected() {
    let (pipeline, _) = echo_pipeline(small_config());
    let cancel = CancellationToken::new();
    pipeline.ingest_documents(vec![Document::new("a", "text")], &cancel).await.unwrap();

    assert!(matches!(
        pipeline.answer(&Query::new("question").with_top_k(0), &cancel).await,
        Err(RagError::Validation(_))
    ));
    assert!(matches!(pipeline.ask("   ", &cancel).await, Err(RagError::Validation(_))));
}

#[tokio::test]
async fn state_is_querying_while_an_answer_is_in_flight() {
    let synthesizer = Arc::new(GatedSynthesizer::default());
    let pipeline = Arc::new(pipeline_with(
        small_config(),
        Arc::new(HashingEmbedder::default()),
        Arc::new(InMemoryVectorStore::new()),
        synthesizer.clone(),
    ));
    let cancel = CancellationToken::new();
    pipeline.ingest_documents(vec![Document::new("a", "some text")], &cancel).await.unwrap();

    let task = {
        let pipeline = pipeline.clone();
        tokio::spawn(async move { pipeline.ask("some text?", &CancellationToken::new()).await })
    };
    synthesizer.entered.notified().await;
    assert_eq!(pipeline.state().await, PipelineState::Querying);

    synthesizer.release.notify_one();
    assert_eq!(task.await.unwrap().unwrap().text, "done");
    assert_eq!(pipeline.state().await, PipelineState::Ready);
}

#[tokio::test]
async fn cancelling_a_query_returns_no_answer() {
    let synthesizer = Arc::new(GatedSynthesizer::default());
    let pipeline = Arc::new(pipeline_with(
        small_config(),
        Arc::new(HashingEmbedder::default()),
        Arc::new(InMemoryVectorStore::new()),
        synthesizer.clone(),
    ));
    let cancel = CancellationToken::new();
    pipeline.ingest_documents(vec![Document::new("a", "some text")], &cancel).await.unwrap();

    let task = {
        let pipeline = pipeline.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { pipeline.ask("some text?", &cancel).await })
    };
    synthesizer.entered.notified().await;
    cancel.cancel();

    assert!(matches!(task.await.unwrap(), Err(RagError::Cancelled)));
    assert_eq!(pipeline.state().await, PipelineState::Ready);
}

#[tokio::test]
async fn reset_is_idempotent_and_empties_the_pipeline() {
    let (pipeline, store) = echo_pipeline(small_config());
    let cancel = CancellationToken::new();
    pipeline.ingest_documents(vec![Document::new("a", "text")], &cancel).await.unwrap();

    pipeline.reset().await.unwrap();
    pipeline.reset().await.unwrap();

    assert!(store.is_empty().await);
    assert_eq!(pipeline.state().await, PipelineState::Empty);
    assert!(matches!(pipeline.ask("text?", &cancel).await, Err(RagError::EmptyIndex)));
}

#[tokio::test]
async fn restored_index_starts_ready() {
    let dir = tempfile::tempdir().unwrap();
    let cancel = CancellationToken::new();
    {
        let store = Arc::new(InMemoryVectorStore::open(dir.path()).await.unwrap());
        let pipeline = pipeline_with(
            small_config(),
            Arc::new(HashingEmbedder::default()),
            store,
            Arc::new(EchoSynthesizer::default()),
        );
        pipeline.ingest_documents(vec![Document::new("a", "persisted text")], &cancel).await.unwrap();
    }

    let store = Arc::new(InMemoryVectorStore::open(dir.path()).await.unwrap());
    let pipeline = pipeline_with(
        small_config(),
        Arc::new(HashingEmbedder::default()),
        store,
        Arc::new(EchoSynthesizer::default()),
    );
    assert_eq!(pipeline.state().await, PipelineState::Ready);
    assert_eq!(pipeline.ask("persisted?", &cancel).await.unwrap().text, "persisted text");
}

#[test]
fn builder_requires_every_component() {
    assert!(matches!(RagPipeline::builder().build(), Err(RagError::Config(_))));

    let missing_synthesizer = RagPipeline::builder()
        .config(RagConfig::default())
        .embedding_provider(Arc::new(HashingEmbedder::default()))
        .vector_store(Arc::new(InMemoryVectorStore::new()))
        .build();
    assert!(matches!(missing_synthesizer, Err(RagError::Config(_))));

    let bad_config = RagConfig { chunk_overlap: 1000, ..RagConfig::default() };
    let result = RagPipeline::builder()
        .config(bad_config)
        .embedding_provider(Arc::new(HashingEmbedder::default()))
        .vector_store(Arc::new(InMemoryVectorStore::new()))
        .synthesizer(Arc::new(EchoSynthesizer::default()))
        .build();
    assert!(matches!(result, Err(RagError::Config(_))));
}
