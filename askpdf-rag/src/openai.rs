//! Embeddings from an OpenAI-compatible `/v1/embeddings` endpoint.
//!
//! This module is only available when the `openai` feature is enabled. OpenAI
//! itself, a local text-embeddings-inference server, or vLLM all work.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::embedding::EmbeddingProvider;
use crate::error::Result;
use crate::http::{JsonEndpoint, upstream};
use crate::synthesizer::ApiKey;

pub const OPENAI_EMBEDDINGS_URL: &str = "https://api.openai.com/v1/embeddings";

const DEFAULT_MODEL: &str = "text-embedding-3-small";

/// Native size of `text-embedding-3-small`.
const DEFAULT_DIMENSIONS: usize = 1536;

const SERVICE: &str = "OpenAI";

/// An [`EmbeddingProvider`] backed by an OpenAI-compatible embeddings API.
///
/// Whole batches go out in one request; the pipeline decides batch sizes.
///
/// ```rust,ignore
/// use askpdf_rag::{ApiKey, openai::OpenAIEmbeddingProvider};
///
/// let provider = OpenAIEmbeddingProvider::new(ApiKey::new("sk-...")?)
///     .with_base_url("http://localhost:8080/v1/embeddings");
/// let vectors = provider.embed_batch(&["first chunk", "second chunk"]).await?;
/// ```
pub struct OpenAIEmbeddingProvider {
    endpoint: JsonEndpoint,
    model: String,
    dimensions: usize,
    truncate_to: Option<usize>,
}

impl OpenAIEmbeddingProvider {
    pub fn new(api_key: ApiKey) -> Self {
        Self {
            endpoint: JsonEndpoint::new(SERVICE, OPENAI_EMBEDDINGS_URL, api_key),
            model: DEFAULT_MODEL.into(),
            dimensions: DEFAULT_DIMENSIONS,
            truncate_to: None,
        }
    }

    /// Use another model. Pair with [`with_dimensions`](Self::with_dimensions)
    /// when its vectors are not 1536 long.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.endpoint.url = url.into();
        self
    }

    /// Ask the service for vectors of exactly `dims` components.
    pub fn with_dimensions(mut self, dims: usize) -> Self {
        self.dimensions = dims;
        self.truncate_to = Some(dims);
        self
    }
}

#[derive(Serialize)]
struct EmbeddingsRequest<'a> {
    model: &'a str,
    input: &'a [&'a str],
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
}

#[derive(Deserialize)]
struct EmbeddingsResponse {
    data: Vec<Embedding>,
}

#[derive(Deserialize)]
struct Embedding {
    embedding: Vec<f32>,
    #[serde(default)]
    index: Option<usize>,
}

impl EmbeddingsResponse {
    /// Vectors in request order, checked against the request size.
    fn into_vectors(mut self, expected: usize) -> Result<Vec<Vec<f32>>> {
        if self.data.len() != expected {
            return Err(upstream(
                SERVICE,
                format!("expected {expected} embeddings, got {}", self.data.len()),
            ));
        }
        self.data.sort_by_key(|d| d.index.unwrap_or(usize::MAX));
        Ok(self.data.into_iter().map(|d| d.embedding).collect())
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAIEmbeddingProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_batch(&[text])
            .await?
            .pop()
            .ok_or_else(|| upstream(SERVICE, "no embedding returned"))
    }

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        debug!(service = SERVICE, model = %self.model, batch_size = texts.len(), "embedding batch");

        let request =
            EmbeddingsRequest { model: &self.model, input: texts, dimensions: self.truncate_to };
        self.endpoint.post::<_, EmbeddingsResponse>(&request).await?.into_vectors(texts.len())
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn name(&self) -> &str {
        SERVICE
    }
}
