//! Wiring the pipeline from flags and running the question loop.

use std::future::Future;
use std::io::Write;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use askpdf_rag::groq::GroqCompletionService;
use askpdf_rag::openai::OpenAIEmbeddingProvider;
use askpdf_rag::{
    Answer, ApiKey, CompletionService, EmbeddingProvider, HashingEmbedder, InMemoryVectorStore, IngestReport,
    PromptSynthesizer, RagConfig, RagError, RagPipeline, Upload, VectorStore,
};
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::cli::{Cli, EmbedderKind};

/// Environment variable holding the Groq key.
pub const GROQ_API_KEY: &str = "GROQ_API_KEY";
/// Environment variable holding the embeddings key.
pub const OPENAI_API_KEY: &str = "OPENAI_API_KEY";

fn api_key(var: &str) -> Result<ApiKey> {
    let value = std::env::var(var).with_context(|| format!("{var} is not set"))?;
    ApiKey::new(value).with_context(|| format!("{var} is empty"))
}

/// Stands in for the Groq client when ingesting without a key.
struct MissingKeyService;

#[async_trait::async_trait]
impl CompletionService for MissingKeyService {
    async fn complete(&self, _prompt: &str) -> askpdf_rag::Result<String> {
        Err(RagError::Config(format!("{GROQ_API_KEY} is not set")))
    }

    fn name(&self) -> &str {
        "Groq"
    }
}

/// Build the completion service from an optional Groq key.
///
/// The key may only be absent with `--ingest-only`.
pub fn completion_service(cli: &Cli, key: Option<ApiKey>) -> Result<Arc<dyn CompletionService>> {
    match key {
        Some(key) => Ok(Arc::new(GroqCompletionService::new(key).with_model(&cli.model))),
        None if cli.ingest_only => Ok(Arc::new(MissingKeyService)),
        None => bail!("{GROQ_API_KEY} is not set; pass --ingest-only to index without answering"),
    }
}

/// Build the embedding provider selected on the command line.
pub fn embedding_provider(cli: &Cli) -> Result<Arc<dyn EmbeddingProvider>> {
    Ok(match cli.embedder {
        EmbedderKind::Hashing => Arc::new(HashingEmbedder::default()),
        EmbedderKind::Openai => {
            let mut provider = OpenAIEmbeddingProvider::new(api_key(OPENAI_API_KEY)?);
            if let Some(model) = &cli.embed_model {
                provider = provider.with_model(model);
            }
            if let Some(url) = &cli.embed_base_url {
                provider = provider.with_base_url(url);
            }
            if let Some(dims) = cli.embed_dimensions {
                provider = provider.with_dimensions(dims);
            }
            Arc::new(provider)
        }
    })
}

/// Open the configured vector store, restoring a snapshot when persistence is on.
pub async fn vector_store(config: &RagConfig) -> Result<Arc<InMemoryVectorStore>> {
    match &config.persist_dir {
        Some(dir) => {
            let store = InMemoryVectorStore::open(dir)
                .await
                .with_context(|| format!("failed to open index in '{}'", dir.display()))?;
            info!(path = %dir.display(), entries = store.len().await, "opened index");
            Ok(Arc::new(store))
        }
        None => Ok(Arc::new(InMemoryVectorStore::new())),
    }
}

/// Assemble the pipeline from flags and environment.
pub async fn build_pipeline(cli: &Cli) -> Result<RagPipeline> {
    let config = cli.rag_config().context("invalid options")?;
    let key = match std::env::var(GROQ_API_KEY) {
        Ok(_) => Some(api_key(GROQ_API_KEY)?),
        Err(_) => None,
    };
    let service = completion_service(cli, key)?;
    let synthesizer = PromptSynthesizer::new(service, config.max_prompt_chars);
    let store = vector_store(&config).await?;

    let pipeline = RagPipeline::builder()
        .embedding_provider(embedding_provider(cli)?)
        .vector_store(store)
        .synthesizer(Arc::new(synthesizer))
        .config(config)
        .build()?;
    Ok(pipeline)
}

/// Run `future`, cancelling `cancel` if Ctrl-C arrives first.
pub async fn interruptible<F: Future>(cancel: &CancellationToken, future: F) -> F::Output {
    let watcher = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        })
    };
    let output = future.await;
    watcher.abort();
    output
}

/// Read every file, keeping unreadable ones out when `continue_on_error` is set.
async fn read_uploads(cli: &Cli) -> Result<Vec<Upload>> {
    let mut uploads = Vec::with_capacity(cli.files.len());
    for path in &cli.files {
        match Upload::from_path(path).await {
            Ok(upload) => uploads.push(upload),
            Err(e) if cli.continue_on_error => {
                warn!(path = %path.display(), error = %e, "skipping unreadable file");
                eprintln!("skipped {}: {e}", path.display());
            }
            Err(e) => return Err(e).with_context(|| format!("cannot read '{}'", path.display())),
        }
    }
    Ok(uploads)
}

/// Ingest the files named on the command line and print a summary.
pub async fn ingest_files(cli: &Cli, pipeline: &RagPipeline) -> Result<Option<IngestReport>> {
    if cli.reset {
        pipeline.reset().await.context("failed to reset index")?;
        eprintln!("index cleared");
    }
    if cli.files.is_empty() {
        return Ok(None);
    }

    let uploads = read_uploads(cli).await?;
    let cancel = CancellationToken::new();
    let report = interruptible(&cancel, pipeline.ingest(uploads, &cancel))
        .await
        .context("ingest failed")?;

    print_report(&report);
    Ok(Some(report))
}

fn print_report(report: &IngestReport) {
    for document in &report.ingested {
        eprintln!("ingested {} ({} chunks)", document.source_id, document.chunk_count);
    }
    for source_id in &report.skipped {
        eprintln!("skipped {source_id}: already indexed");
    }
    for failure in &report.failures {
        eprintln!("failed {}: {}", failure.source_id, failure.error);
    }
}

/// Render an answer the way the prompt loop prints it.
pub fn format_answer(answer: &Answer, show_sources: bool) -> String {
    let mut out = format!("{}\n\nResponse time: {:.2} seconds", answer.text, answer.elapsed.as_secs_f64());
    if answer.dropped_chunks > 0 {
        out.push_str(&format!("\n({} context chunks left out to fit the prompt)", answer.dropped_chunks));
    }
    if show_sources {
        out.push_str("\n\nSources:");
        for result in &answer.retrieval {
            let chunk = &result.entry.chunk;
            out.push_str(&format!(
                "\n  [{:.3}] {} #{} (chars {}..{})",
                result.score,
                chunk.document_id,
                chunk.index,
                chunk.span.start,
                chunk.span.end
            ));
        }
    }
    out
}

/// Answer one question, printing the result.
///
/// Returns `Ok(false)` if the user interrupted it.
pub async fn ask(pipeline: &RagPipeline, question: &str, show_sources: bool) -> Result<bool> {
    let cancel = CancellationToken::new();
    match interruptible(&cancel, pipeline.ask(question, &cancel)).await {
        Ok(answer) => {
            println!("{}", format_answer(&answer, show_sources));
            Ok(true)
        }
        Err(RagError::Cancelled) => {
            eprintln!("cancelled");
            Ok(false)
        }
        Err(RagError::EmptyIndex) => bail!("no documents indexed yet; pass one or more files"),
        Err(e) => Err(e.into()),
    }
}

/// Interactive prompt. An empty line or Ctrl-D ends the session.
pub async fn prompt_loop(pipeline: &RagPipeline, show_sources: bool) -> Result<()> {
    let mut editor = DefaultEditor::new().context("failed to start line editor")?;
    loop {
        let line = tokio::task::block_in_place(|| editor.readline("question> "));
        let question = match line {
            Ok(line) => line.trim().to_string(),
            Err(ReadlineError::Interrupted) => continue,
            Err(ReadlineError::Eof) => break,
            Err(e) => return Err(e).context("failed to read input"),
        };
        if question.is_empty() {
            break;
        }
        if let Err(e) = editor.add_history_entry(question.as_str()) {
            warn!(error = %e, "failed to record history");
        }

        if let Err(e) = ask(pipeline, &question, show_sources).await {
            eprintln!("error: {e:#}");
        }
        println!();
        std::io::stdout().flush().ok();
    }
    Ok(())
}

/// Run a whole session: ingest, then answer one question or loop.
pub async fn run(cli: Cli) -> Result<()> {
    let pipeline = build_pipeline(&cli).await?;
    ingest_files(&cli, &pipeline).await?;
    if cli.ingest_only {
        return Ok(());
    }

    match &cli.question {
        Some(question) => {
            if !ask(&pipeline, question, cli.show_sources).await? {
                bail!("interrupted");
            }
            Ok(())
        }
        None => prompt_loop(&pipeline, cli.show_sources).await,
    }
}
