//! Gemini Backend
//!
//! Streams from the Google Generative Language API using
//! `models/{model}:streamGenerateContent?alt=sse`. The persona prompt goes in
//! `systemInstruction` and the code payload is the single user turn.

use async_trait::async_trait;
use futures::StreamExt;
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};

use super::error::ProviderError;
use super::fallback::{stream_with_fallback, FallbackPolicy, ModelAttempt};
use super::http::{build_client, error_from_response, ErrorBody};
use super::sse::SseDecoder;
use super::{ChunkSink, ProviderConfig, ReviewProvider, ReviewRequest};

/// Default API root
pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
/// Default primary model
pub const DEFAULT_MODEL: &str = "gemini-1.5-flash";
/// Default fallback model
pub const DEFAULT_FALLBACK_MODEL: &str = "gemini-1.5-flash-latest";

const BACKEND: &str = "Gemini";

#[derive(Debug)]
struct GeminiClient {
    http: reqwest::Client,
    api_key: String,
}

/// Gemini backend
///
/// The HTTP client and API key are resolved on first use, so a bridge can
/// start without credentials and report the problem per review.
#[derive(Debug)]
pub struct GeminiProvider {
    config: ProviderConfig,
    policy: FallbackPolicy,
    client: OnceCell<GeminiClient>,
}

impl GeminiProvider {
    /// Create a provider from resolved settings
    #[must_use]
    pub fn new(config: ProviderConfig) -> Self {
        let policy = config.fallback_policy();
        Self {
            config,
            policy,
            client: OnceCell::new(),
        }
    }

    /// Settings in use
    #[must_use]
    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    fn client(&self) -> Result<&GeminiClient, ProviderError> {
        self.client.get_or_try_init(|| {
            let api_key = self.config.api_key()?.to_string();
            let http = build_client(BACKEND, self.config.request_timeout)?;
            tracing::debug!(model = %self.config.model, "Gemini client initialised");
            Ok(GeminiClient { http, api_key })
        })
    }

    fn stream_url(&self, model: &str) -> String {
        format!("{}/models/{model}:streamGenerateContent", self.config.base())
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    system_instruction: Content<'a>,
    contents: [Content<'a>; 1],
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'a str>,
    parts: [Part<'a>; 1],
}

#[derive(Debug, Serialize)]
struct Part<'a> {
    text: &'a str,
}

impl<'a> GenerateRequest<'a> {
    fn new(request: &'a ReviewRequest) -> Self {
        Self {
            system_instruction: Content {
                role: None,
                parts: [Part {
                    text: &request.system_prompt,
                }],
            },
            contents: [Content {
                role: Some("user"),
                parts: [Part {
                    text: &request.payload,
                }],
            }],
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct StreamResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    error: Option<ErrorBody>,
}

#[derive(Debug, Default, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
}

#[derive(Debug, Default, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Default, Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: Option<String>,
}

/// Extract the text carried by one SSE payload
fn parse_event(model: &str, payload: &str) -> Result<String, ProviderError> {
    let event: StreamResponse =
        serde_json::from_str(payload).map_err(|e| ProviderError::Decode {
            backend: BACKEND,
            reason: e.to_string(),
        })?;

    if let Some(error) = event.error {
        return Err(error.into_error(BACKEND, model));
    }

    Ok(event
        .candidates
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .map(|content| {
            content
                .parts
                .into_iter()
                .filter_map(|p| p.text)
                .collect::<String>()
        })
        .unwrap_or_default())
}

#[async_trait]
impl ModelAttempt for GeminiProvider {
    fn backend_name(&self) -> &'static str {
        BACKEND
    }

    async fn attempt(
        &self,
        model: &str,
        request: &ReviewRequest,
        sink: &mut dyn ChunkSink,
    ) -> Result<String, ProviderError> {
        let client = self.client()?;

        tracing::debug!(model, "Sending Gemini streaming request");
        let response = client
            .http
            .post(self.stream_url(model))
            .query(&[("alt", "sse")])
            .header("x-goog-api-key", &client.api_key)
            .json(&GenerateRequest::new(request))
            .send()
            .await
            .map_err(|source| ProviderError::Transport {
                backend: BACKEND,
                source,
            })?;

        if !response.status().is_success() {
            return Err(error_from_response(BACKEND, model, response).await);
        }

        let mut stream = response.bytes_stream();
        let mut decoder = SseDecoder::default();
        let mut full = String::new();

        while let Some(bytes) = stream.next().await {
            let bytes = bytes.map_err(|source| ProviderError::Transport {
                backend: BACKEND,
                source,
            })?;
            for payload in decoder.push(&bytes) {
                forward(&parse_event(model, &payload)?, &mut full, sink);
            }
        }
        if let Some(payload) = decoder.finish() {
            forward(&parse_event(model, &payload)?, &mut full, sink);
        }

        tracing::debug!(model, chars = full.len(), "Gemini stream complete");
        Ok(full)
    }
}

fn forward(text: &str, full: &mut String, sink: &mut dyn ChunkSink) {
    if !text.is_empty() {
        full.push_str(text);
        sink.chunk(text);
    }
}

#[async_trait]
impl ReviewProvider for GeminiProvider {
    fn name(&self) -> &str {
        BACKEND
    }

    async fn stream(
        &self,
        request: &ReviewRequest,
        sink: &mut dyn ChunkSink,
    ) -> Result<String, ProviderError> {
        stream_with_fallback(self, &self.policy, request, sink).await
    }
}
