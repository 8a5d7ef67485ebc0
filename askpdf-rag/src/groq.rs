//! Groq completion service using the OpenAI-compatible chat completions API.
//!
//! This module is only available when the `groq` feature is enabled.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::Result;
use crate::http::{JsonEndpoint, upstream};
use crate::synthesizer::{ApiKey, CompletionService};

/// The Groq chat completions endpoint.
pub const GROQ_CHAT_URL: &str = "https://api.groq.com/openai/v1/chat/completions";

/// The default chat model.
pub const DEFAULT_MODEL: &str = "mixtral-8x7b-32768";

const SERVICE: &str = "Groq";

/// A [`CompletionService`] backed by Groq.
///
/// Sends the prompt as a single user message and returns the first choice's
/// content. Works against any OpenAI-compatible endpoint via
/// [`with_base_url`](GroqCompletionService::with_base_url).
///
/// # Example
///
/// ```rust,ignore
/// use askpdf_rag::{ApiKey, groq::GroqCompletionService};
///
/// let service = GroqCompletionService::new(ApiKey::new(std::env::var("GROQ_API_KEY")?)?)
///     .with_model("llama-3.1-8b-instant");
/// let text = service.complete("Say hello").await?;
/// ```
pub struct GroqCompletionService {
    endpoint: JsonEndpoint,
    model: String,
    temperature: Option<f32>,
}

impl GroqCompletionService {
    /// Create a service with the default model.
    pub fn new(api_key: ApiKey) -> Self {
        Self {
            endpoint: JsonEndpoint::new(SERVICE, GROQ_CHAT_URL, api_key),
            model: DEFAULT_MODEL.into(),
            temperature: None,
        }
    }

    /// Set the model name.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Point at another OpenAI-compatible chat completions URL.
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.endpoint.url = url.into();
        self
    }

    /// Set the sampling temperature.
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 1],
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

impl ChatResponse {
    fn into_text(self) -> Result<String> {
        self.choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| upstream(SERVICE, "response contained no completion"))
    }
}

#[async_trait]
impl CompletionService for GroqCompletionService {
    async fn complete(&self, prompt: &str) -> Result<String> {
        debug!(service = SERVICE, model = %self.model, prompt_chars = prompt.chars().count(), "chat completion");

        let request = ChatRequest {
            model: &self.model,
            messages: [ChatMessage { role: "user", content: prompt }],
            temperature: self.temperature,
        };
        self.endpoint.post::<_, ChatResponse>(&request).await?.into_text()
    }

    fn name(&self) -> &str {
        SERVICE
    }
}
