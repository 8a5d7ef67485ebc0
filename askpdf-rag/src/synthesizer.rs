//! Answer synthesis from retrieved context.
//!
//! [`PromptSynthesizer`] renders the retrieved chunks and the question into a
//! single prompt and sends it to a [`CompletionService`] exactly once. It does
//! not retry; the pipeline owns the retry policy.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::error::{RagError, Result};

/// An opaque credential for a hosted service.
///
/// `Debug` and `Display` never reveal the value, and it is not serializable.
#[derive(Clone, PartialEq, Eq)]
pub struct ApiKey(String);

impl ApiKey {
    /// Wrap a credential.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::Config`] if the key is empty or only whitespace.
    pub fn new(key: impl Into<String>) -> Result<Self> {
        let key = key.into();
        if key.trim().is_empty() {
            return Err(RagError::Config("API key must not be empty".to_string()));
        }
        Ok(Self(key))
    }

    /// The raw credential, for building request headers only.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiKey(***)")
    }
}

impl fmt::Display for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("***")
    }
}

/// A hosted text-completion service: one prompt in, plain text out.
#[async_trait]
pub trait CompletionService: Send + Sync {
    /// Complete `prompt`.
    ///
    /// Fails with [`RagError::TransientService`] for retryable conditions and
    /// [`RagError::Upstream`] for service-reported failures.
    async fn complete(&self, prompt: &str) -> Result<String>;

    /// Short service name used in logs and errors.
    fn name(&self) -> &str;
}

/// The result of one synthesis call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Synthesis {
    /// The answer text returned by the completion service.
    pub text: String,
    /// Context chunks left out to respect the service input limit.
    pub dropped_chunks: usize,
}

/// Produces an answer from a question and its retrieved context.
#[async_trait]
pub trait Synthesizer: Send + Sync {
    /// Answer `question` using `context`, ordered most similar first.
    async fn synthesize(&self, question: &str, context: &[&str]) -> Result<Synthesis>;
}

const PROMPT_HEADER: &str = "Answer the questions based on the provided context only.\n\
     Please provide the most accurate response based on the question.\n\
     <context>\n";
const PROMPT_CONTEXT_END: &str = "</context>\nQuestions: ";
const CHUNK_DELIMITER: &str = "\n---\n";

/// Render the prompt for `question` and `context`, all chunks verbatim.
pub fn render_prompt(question: &str, context: &[&str]) -> String {
    let mut prompt = String::with_capacity(
        prompt_len(question, context.iter().map(|c| c.chars().count()).sum(), context.len()),
    );
    prompt.push_str(PROMPT_HEADER);
    for chunk in context {
        prompt.push_str(chunk);
        prompt.push_str(CHUNK_DELIMITER);
    }
    prompt.push_str(PROMPT_CONTEXT_END);
    prompt.push_str(question);
    prompt
}

/// Length in characters of the rendered prompt.
fn prompt_len(question: &str, context_chars: usize, chunk_count: usize) -> usize {
    PROMPT_HEADER.chars().count()
        + context_chars
        + chunk_count * CHUNK_DELIMITER.chars().count()
        + PROMPT_CONTEXT_END.chars().count()
        + question.chars().count()
}

/// A [`Synthesizer`] that prompts a [`CompletionService`] with the retrieved context.
///
/// # Example
///
/// ```rust,ignore
/// use askpdf_rag::{PromptSynthesizer, groq::GroqCompletionService};
///
/// let synthesizer = PromptSynthesizer::new(Arc::new(GroqCompletionService::new(key)), 24_000);
/// let synthesis = synthesizer.synthesize("What is RAG?", &["chunk one", "chunk two"]).await?;
/// ```
pub struct PromptSynthesizer {
    service: Arc<dyn CompletionService>,
    max_prompt_chars: usize,
}

impl PromptSynthesizer {
    /// Create a synthesizer whose rendered prompts never exceed `max_prompt_chars`.
    pub fn new(service: Arc<dyn CompletionService>, max_prompt_chars: usize) -> Self {
        Self { service, max_prompt_chars }
    }

    /// How many leading (most similar) chunks fit in the input limit.
    fn fitting_chunks(&self, question: &str, context: &[&str]) -> Result<usize> {
        if prompt_len(question, 0, 0) > self.max_prompt_chars {
            return Err(RagError::Validation(format!(
                "question does not fit in the {} character prompt limit",
                self.max_prompt_chars
            )));
        }
        let mut context_chars = 0;
        for (kept, chunk) in context.iter().enumerate() {
            context_chars += chunk.chars().count();
            if prompt_len(question, context_chars, kept + 1) > self.max_prompt_chars {
                return Ok(kept);
            }
        }
        Ok(context.len())
    }
}

#[async_trait]
impl Synthesizer for PromptSynthesizer {
    async fn synthesize(&self, question: &str, context: &[&str]) -> Result<Synthesis> {
        let kept = self.fitting_chunks(question, context)?;
        let dropped_chunks = context.len() - kept;
        if dropped_chunks > 0 {
            warn!(
                service = self.service.name(),
                dropped_chunks,
                limit = self.max_prompt_chars,
                "context exceeds prompt limit, dropping least similar chunks"
            );
        }

        let prompt = render_prompt(question, &context[..kept]);
        debug!(service = self.service.name(), prompt_chars = prompt.len(), chunks = kept, "synthesizing");
        let text = self.service.complete(&prompt).await?;
        Ok(Synthesis { text, dropped_chunks })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_key_is_redacted() {
        let key = ApiKey::new("gsk_secret").unwrap();
        assert_eq!(format!("{key:?}"), "ApiKey(***)");
        assert_eq!(key.to_string(), "***");
        assert_eq!(key.expose(), "gsk_secret");
        assert!(ApiKey::new("  ").is_err());
    }

    #[test]
    fn prompt_length_matches_rendering() {
        let context = ["première partie", "second chunk"];
        let rendered = render_prompt("Où?", &context);
        let context_chars = context.iter().map(|c| c.chars().count()).sum();
        assert_eq!(rendered.chars().count(), prompt_len("Où?", context_chars, context.len()));
    }

    #[test]
    fn prompt_wraps_context_and_question() {
        let rendered = render_prompt("What is Rust?", &["alpha", "beta"]);
        assert!(rendered.starts_with("Answer the questions based on the provided context only."));
        assert!(rendered.contains("<context>\nalpha\n---\nbeta\n---\n</context>"));
        assert!(rendered.ends_with("Questions: What is Rust?"));
    }
}
