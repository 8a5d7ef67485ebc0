//! # askpdf-rag
//!
//! Retrieval-augmented question answering over uploaded documents.
//!
//! ## Overview
//!
//! Uploaded files are turned into text by a [`TextExtractor`], split into
//! overlapping fixed-size character windows by [`FixedSizeChunker`], embedded
//! by an [`EmbeddingProvider`], and stored in a [`VectorStore`]. Questions are
//! embedded the same way; the most similar chunks become the context of a single
//! prompt sent to a [`CompletionService`] through a [`Synthesizer`].
//! [`RagPipeline`] sequences all of it and owns timeouts, retries, and
//! cancellation.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use askpdf_rag::{
//!     ApiKey, HashingEmbedder, InMemoryVectorStore, PromptSynthesizer, RagConfig,
//!     RagPipeline, Upload, groq::GroqCompletionService,
//! };
//! use tokio_util::sync::CancellationToken;
//!
//! let config = RagConfig::default();
//! let service = GroqCompletionService::new(ApiKey::new(std::env::var("GROQ_API_KEY")?)?);
//! let pipeline = RagPipeline::builder()
//!     .embedding_provider(Arc::new(HashingEmbedder::default()))
//!     .vector_store(Arc::new(InMemoryVectorStore::open("db_dir").await?))
//!     .synthesizer(Arc::new(PromptSynthesizer::new(Arc::new(service), config.max_prompt_chars)))
//!     .config(config)
//!     .build()?;
//!
//! let cancel = CancellationToken::new();
//! pipeline.ingest(vec![Upload::from_path("paper.pdf").await?], &cancel).await?;
//! let answer = pipeline.ask("What does the paper conclude?", &cancel).await?;
//! println!("{}", answer.text);
//! ```
//!
//! ## Features
//!
//! - `pdf` (default) – [`loader::PdfExtractor`] via `pdf-extract`
//! - `groq` (default) – [`groq::GroqCompletionService`]
//! - `openai` – [`openai::OpenAIEmbeddingProvider`] for any OpenAI-compatible
//!   embeddings endpoint

pub mod chunking;
pub mod config;
pub mod document;
pub mod embedding;
pub mod error;
pub mod hashing;
pub mod inmemory;
pub mod loader;
pub mod pipeline;
pub mod retry;
pub mod synthesizer;
pub mod vectorstore;

#[cfg(feature = "groq")]
pub mod groq;
#[cfg(any(feature = "groq", feature = "openai"))]
mod http;
#[cfg(feature = "openai")]
pub mod openai;

pub use chunking::{Chunker, FixedSizeChunker, reassemble};
pub use config::{FailureMode, RagConfig, RagConfigBuilder};
pub use document::{Answer, Chunk, ChunkSpan, Document, IndexEntry, Query, SearchResult};
pub use embedding::EmbeddingProvider;
pub use error::{RagError, Result};
pub use hashing::HashingEmbedder;
pub use inmemory::InMemoryVectorStore;
pub use loader::{DocumentLoader, ExtensionExtractor, PlainTextExtractor, TextExtractor, Upload};
pub use pipeline::{
    IngestFailure, IngestReport, IngestedDocument, PipelineState, RagPipeline, RagPipelineBuilder,
};
pub use retry::RetryPolicy;
pub use synthesizer::{ApiKey, CompletionService, PromptSynthesizer, Synthesis, Synthesizer};
pub use vectorstore::VectorStore;

#[cfg(feature = "pdf")]
pub use loader::PdfExtractor;
