//! HTTP helpers shared by the streaming backends

use std::time::Duration;

use reqwest::header::HeaderValue;
use reqwest::{Response, StatusCode};
use serde::Deserialize;

use super::error::ProviderError;

/// Build the HTTP client used by a backend
pub(crate) fn build_client(
    backend: &'static str,
    timeout: Duration,
) -> Result<reqwest::Client, ProviderError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|source| ProviderError::Transport { backend, source })
}

/// `{"error": {...}}` body used by both Gemini and OpenAI-compatible APIs
#[derive(Debug, Deserialize)]
pub(crate) struct ErrorWrapper {
    pub(crate) error: ErrorBody,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct ErrorBody {
    #[serde(default)]
    pub(crate) code: Option<serde_json::Value>,
    #[serde(default)]
    pub(crate) message: Option<String>,
    #[serde(default)]
    pub(crate) status: Option<String>,
}

impl ErrorBody {
    /// Quota exhaustion reported in the body rather than the status line
    pub(crate) fn is_quota(&self) -> bool {
        self.status.as_deref() == Some("RESOURCE_EXHAUSTED")
            || self.code.as_ref().and_then(serde_json::Value::as_u64) == Some(429)
            || self
                .code
                .as_ref()
                .and_then(serde_json::Value::as_str)
                .is_some_and(|c| c == "rate_limit_exceeded")
    }

    pub(crate) fn describe(&self, fallback: &str) -> String {
        let message = self.message.clone().unwrap_or_else(|| fallback.to_string());
        match self.status.as_deref() {
            Some(status) if !status.is_empty() => format!("{status}: {message}"),
            _ => message,
        }
    }

    /// Convert an error delivered inside the event stream
    pub(crate) fn into_error(self, backend: &'static str, model: &str) -> ProviderError {
        if self.is_quota() {
            ProviderError::RateLimited {
                backend,
                model: model.to_string(),
                message: self.describe("quota exceeded"),
                retry_after: None,
            }
        } else {
            ProviderError::Api {
                backend,
                status: 0,
                message: self.describe("stream error"),
            }
        }
    }
}

/// Turn a non-success response into a [`ProviderError`]
pub(crate) async fn error_from_response(
    backend: &'static str,
    model: &str,
    response: Response,
) -> ProviderError {
    let status = response.status();
    let retry_after = parse_retry_after(response.headers().get("retry-after"));
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| format!("Failed to read {backend} error body"));

    map_http_error(backend, model, status, &body, retry_after)
}

pub(crate) fn map_http_error(
    backend: &'static str,
    model: &str,
    status: StatusCode,
    body: &str,
    retry_after: Option<Duration>,
) -> ProviderError {
    let parsed = serde_json::from_str::<ErrorWrapper>(body).ok().map(|w| w.error);
    let message = parsed
        .as_ref()
        .map_or_else(|| body.trim().to_string(), |e| e.describe(body.trim()));
    let quota = parsed.as_ref().is_some_and(ErrorBody::is_quota);

    if status == StatusCode::TOO_MANY_REQUESTS || quota {
        ProviderError::RateLimited {
            backend,
            model: model.to_string(),
            message,
            retry_after,
        }
    } else {
        ProviderError::Api {
            backend,
            status: status.as_u16(),
            message,
        }
    }
}

fn parse_retry_after(header: Option<&HeaderValue>) -> Option<Duration> {
    let value = header?.to_str().ok()?;
    value.trim().parse::<u64>().ok().map(Duration::from_secs)
}
