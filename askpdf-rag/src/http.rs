//! Shared request plumbing and error mapping for the HTTP-backed services.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::error;

use crate::error::{RagError, Result};
use crate::synthesizer::ApiKey;

/// A bearer-authenticated JSON endpoint.
pub(crate) struct JsonEndpoint {
    client: reqwest::Client,
    api_key: ApiKey,
    pub(crate) url: String,
    service: &'static str,
}

impl JsonEndpoint {
    pub(crate) fn new(service: &'static str, url: impl Into<String>, api_key: ApiKey) -> Self {
        Self { client: reqwest::Client::new(), api_key, url: url.into(), service }
    }

    /// POST `body` and decode a successful response as `T`.
    pub(crate) async fn post<B: Serialize + ?Sized, T: DeserializeOwned>(&self, body: &B) -> Result<T> {
        let response = self
            .client
            .post(&self.url)
            .bearer_auth(self.api_key.expose())
            .json(body)
            .send()
            .await
            .map_err(|e| {
                error!(service = self.service, error = %e, "request failed");
                request_error(self.service, e)
            })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            error!(service = self.service, %status, "service returned an error");
            return Err(status_error(self.service, status.as_u16(), text));
        }

        response.json().await.map_err(|e| {
            error!(service = self.service, error = %e, "undecodable response");
            upstream(self.service, format!("undecodable response: {e}"))
        })
    }
}

/// A terminal error without an HTTP status.
pub(crate) fn upstream(service: &str, message: impl Into<String>) -> RagError {
    RagError::Upstream { service: service.into(), status: None, message: message.into() }
}

#[derive(Deserialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Deserialize)]
struct ErrorDetail {
    message: String,
}

/// Map a non-success HTTP status to a retryable or terminal error.
///
/// 408, 429 and every 5xx are transient; anything else is reported upstream.
pub(crate) fn status_error(service: &str, status: u16, body: String) -> RagError {
    let message = serde_json::from_str::<ErrorResponse>(&body).map(|e| e.error.message).unwrap_or(body);
    if status == 408 || status == 429 || (500..600).contains(&status) {
        RagError::TransientService { service: service.into(), message: format!("{status}: {message}") }
    } else {
        RagError::Upstream { service: service.into(), status: Some(status), message }
    }
}

/// Map a transport failure; network-level failures are retryable.
pub(crate) fn request_error(service: &str, error: reqwest::Error) -> RagError {
    if error.is_timeout() || error.is_connect() || error.is_request() {
        RagError::TransientService { service: service.into(), message: format!("request failed: {error}") }
    } else {
        RagError::Upstream {
            service: service.into(),
            status: error.status().map(|s| s.as_u16()),
            message: format!("request failed: {error}"),
        }
    }
}
