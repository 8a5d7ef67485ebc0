//! Command-line arguments.

use std::path::PathBuf;

use askpdf_rag::groq::DEFAULT_MODEL;
use askpdf_rag::{FailureMode, RagConfig};
use clap::{Parser, ValueEnum};

/// Which embedding backend to use.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum EmbedderKind {
    /// Local feature hashing; no network, no key.
    #[default]
    Hashing,
    /// An OpenAI-compatible `/v1/embeddings` endpoint (needs `OPENAI_API_KEY`).
    Openai,
}

#[derive(Debug, Parser)]
#[command(name = "askpdf")]
#[command(about = "Ask questions about PDF documents")]
#[command(version)]
pub struct Cli {
    /// Files to ingest (PDF, .txt, .md)
    pub files: Vec<PathBuf>,

    /// Ask one question and exit instead of starting a prompt
    #[arg(short, long)]
    pub question: Option<String>,

    /// Ingest the files and exit; no Groq key is needed
    #[arg(long, conflicts_with = "question")]
    pub ingest_only: bool,

    /// Directory holding the index snapshot
    #[arg(long, default_value = "db_dir")]
    pub persist_dir: PathBuf,

    /// Keep the index in memory only
    #[arg(long, conflicts_with = "persist_dir")]
    pub no_persist: bool,

    /// Chunk size in characters
    #[arg(long, default_value_t = 1000)]
    pub chunk_size: usize,

    /// Characters shared by consecutive chunks
    #[arg(long, default_value_t = 200)]
    pub chunk_overlap: usize,

    /// Number of chunks used as context
    #[arg(short = 'k', long, default_value_t = 4)]
    pub top_k: usize,

    /// Groq chat model
    #[arg(short, long, default_value = DEFAULT_MODEL)]
    pub model: String,

    /// Embedding backend
    #[arg(long, value_enum, default_value_t)]
    pub embedder: EmbedderKind,

    /// Embedding model name (openai embedder only)
    #[arg(long)]
    pub embed_model: Option<String>,

    /// Embeddings endpoint URL (openai embedder only)
    #[arg(long)]
    pub embed_base_url: Option<String>,

    /// Embedding dimensions override (openai embedder only)
    #[arg(long)]
    pub embed_dimensions: Option<usize>,

    /// Keep going when a file fails to load
    #[arg(long)]
    pub continue_on_error: bool,

    /// Skip files whose text is already indexed
    #[arg(long)]
    pub dedupe: bool,

    /// Clear the persisted index before ingesting
    #[arg(long)]
    pub reset: bool,

    /// Print the source and score of each retrieved chunk
    #[arg(long)]
    pub show_sources: bool,

    /// Enable debug logging
    #[arg(short, long)]
    pub verbose: bool,
}

impl Cli {
    /// Pipeline configuration from the flags, validated.
    pub fn rag_config(&self) -> askpdf_rag::Result<RagConfig> {
        let failure_mode = if self.continue_on_error {
            FailureMode::ContinueOnError
        } else {
            FailureMode::FailFast
        };
        let builder = RagConfig::builder()
            .chunk_size(self.chunk_size)
            .chunk_overlap(self.chunk_overlap)
            .top_k(self.top_k)
            .failure_mode(failure_mode)
            .dedupe(self.dedupe);
        let builder =
            if self.no_persist { builder } else { builder.persist_dir(self.persist_dir.clone()) };
        builder.build()
    }
}
