//! Configuration for the RAG pipeline.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{RagError, Result};
use crate::retry::RetryPolicy;

/// What `ingest` does when one document of a batch fails.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FailureMode {
    /// Abort the whole call; nothing from the batch is indexed.
    #[default]
    FailFast,
    /// Index the documents that succeeded and report the failures.
    ContinueOnError,
}

/// Configuration parameters for the RAG pipeline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RagConfig {
    /// Maximum chunk size in characters.
    pub chunk_size: usize,
    /// Number of overlapping characters between consecutive chunks.
    pub chunk_overlap: usize,
    /// Number of chunks retrieved as context when a query does not say otherwise.
    pub top_k: usize,
    /// Maximum number of texts sent in one embedding request.
    pub max_batch: usize,
    /// Maximum number of embedding requests in flight at once.
    pub max_concurrency: usize,
    /// Timeout applied to every embedding and completion call.
    pub service_timeout: Duration,
    /// Retry policy for transient service failures.
    pub retry: RetryPolicy,
    /// Behaviour when one document of an ingest batch fails.
    pub failure_mode: FailureMode,
    /// Skip documents whose text was already ingested (by SHA-256 of the text).
    pub dedupe: bool,
    /// Input limit of the completion service, in characters of rendered prompt.
    pub max_prompt_chars: usize,
    /// Directory holding the index snapshot, if persistence is enabled.
    pub persist_dir: Option<PathBuf>,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            chunk_overlap: 200,
            top_k: 4,
            max_batch: 32,
            max_concurrency: 4,
            service_timeout: Duration::from_secs(30),
            retry: RetryPolicy::default(),
            failure_mode: FailureMode::FailFast,
            dedupe: false,
            max_prompt_chars: 24_000,
            persist_dir: None,
        }
    }
}

impl RagConfig {
    /// Create a new builder for constructing a [`RagConfig`].
    pub fn builder() -> RagConfigBuilder {
        RagConfigBuilder::default()
    }

    /// Check that parameters are consistent.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::Config`] if:
    /// - `chunk_size == 0` or `chunk_overlap >= chunk_size`
    /// - `top_k`, `max_batch`, `max_concurrency`, or `retry.max_attempts` is zero
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(RagError::Config("chunk_size must be greater than zero".to_string()));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(RagError::Config(format!(
                "chunk_overlap ({}) must be less than chunk_size ({})",
                self.chunk_overlap, self.chunk_size
            )));
        }
        if self.top_k == 0 {
            return Err(RagError::Config("top_k must be greater than zero".to_string()));
        }
        if self.max_batch == 0 {
            return Err(RagError::Config("max_batch must be greater than zero".to_string()));
        }
        if self.max_concurrency == 0 {
            return Err(RagError::Config("max_concurrency must be greater than zero".to_string()));
        }
        if self.retry.max_attempts == 0 {
            return Err(RagError::Config("retry.max_attempts must be at least 1".to_string()));
        }
        Ok(())
    }
}

/// Builder for constructing a validated [`RagConfig`].
#[derive(Debug, Clone, Default)]
pub struct RagConfigBuilder {
    config: RagConfig,
}

impl RagConfigBuilder {
    /// Set the maximum chunk size in characters.
    pub fn chunk_size(mut self, size: usize) -> Self {
        self.config.chunk_size = size;
        self
    }

    /// Set the overlap between consecutive chunks in characters.
    pub fn chunk_overlap(mut self, overlap: usize) -> Self {
        self.config.chunk_overlap = overlap;
        self
    }

    /// Set the default number of retrieved chunks.
    pub fn top_k(mut self, k: usize) -> Self {
        self.config.top_k = k;
        self
    }

    /// Cap the number of texts per embedding request.
    pub fn max_batch(mut self, max_batch: usize) -> Self {
        self.config.max_batch = max_batch;
        self
    }

    /// Cap the number of embedding requests in flight.
    pub fn max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.config.max_concurrency = max_concurrency;
        self
    }

    /// Set the per-call timeout for external services.
    pub fn service_timeout(mut self, timeout: Duration) -> Self {
        self.config.service_timeout = timeout;
        self
    }

    /// Set the retry policy for transient failures.
    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.config.retry = retry;
        self
    }

    /// Set the behaviour for failing documents during a batch ingest.
    pub fn failure_mode(mut self, mode: FailureMode) -> Self {
        self.config.failure_mode = mode;
        self
    }

    /// Enable or disable content-hash deduplication of re-uploaded documents.
    pub fn dedupe(mut self, dedupe: bool) -> Self {
        self.config.dedupe = dedupe;
        self
    }

    /// Set the completion service input limit in characters.
    pub fn max_prompt_chars(mut self, limit: usize) -> Self {
        self.config.max_prompt_chars = limit;
        self
    }

    /// Persist the index snapshot under `dir`.
    pub fn persist_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.persist_dir = Some(dir.into());
        self
    }

    /// Build the [`RagConfig`], validating that parameters are consistent.
    ///
    /// # Errors
    ///
    /// See [`RagConfig::validate`].
    pub fn build(self) -> Result<RagConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
