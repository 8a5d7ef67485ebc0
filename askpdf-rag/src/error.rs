//! Error types for the `askpdf-rag` crate.

use thiserror::Error;

/// Errors that can occur in RAG operations.
#[derive(Debug, Error)]
pub enum RagError {
    /// A caller-supplied parameter was rejected before any I/O happened.
    #[error("Validation error: {0}")]
    Validation(String),

    /// An embedding did not match the dimensionality established by the index.
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// The dimension the index (or batch) already uses.
        expected: usize,
        /// The offending embedding length.
        actual: usize,
    },

    /// A retryable failure talking to an external service (timeout, rate limit, 5xx).
    #[error("Transient service error ({service}): {message}")]
    TransientService {
        /// The service that failed.
        service: String,
        /// A description of the failure.
        message: String,
    },

    /// A non-retryable failure reported by an external service.
    #[error("Upstream error ({service}, status {status:?}): {message}")]
    Upstream {
        /// The service that reported the failure.
        service: String,
        /// HTTP status, when the failure carried one.
        status: Option<u16>,
        /// A description of the failure.
        message: String,
    },

    /// A query was issued before any document was ingested.
    #[error("The index is empty; ingest documents before asking questions")]
    EmptyIndex,

    /// The operation was cancelled by the caller.
    #[error("Operation cancelled")]
    Cancelled,

    /// Text could not be extracted from an upload.
    #[error("Extraction failed for '{source_id}': {message}")]
    Extraction {
        /// The upload's source identifier (file name).
        source_id: String,
        /// A description of the failure.
        message: String,
    },

    /// A failure while ingesting one document of a batch.
    #[error("Ingestion of document #{index} '{source_id}' failed: {source}")]
    Document {
        /// The document's source identifier.
        source_id: String,
        /// Position of the document in the ingest call.
        index: usize,
        /// The underlying failure.
        #[source]
        source: Box<RagError>,
    },

    /// Writing or reading the index snapshot failed.
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// A configuration validation error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// An I/O error.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// A JSON (de)serialization error.
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
}

impl RagError {
    /// Whether the orchestrator's retry policy may retry this error.
    pub fn is_retryable(&self) -> bool {
        matches!(self, RagError::TransientService { .. })
    }

    /// Unwrap [`RagError::Document`] context to reach the underlying failure.
    pub fn root(&self) -> &RagError {
        match self {
            RagError::Document { source, .. } => source.root(),
            other => other,
        }
    }
}

/// A convenience result type for RAG operations.
pub type Result<T> = std::result::Result<T, RagError>;
