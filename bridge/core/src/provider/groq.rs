//! Groq Backend
//!
//! OpenAI-compatible `chat/completions` with `stream: true`. Each SSE event
//! carries a delta; the stream ends with `data: [DONE]`.

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
pub const DEFAULT_BASE_URL: &str = "https://api.groq.com/openai/v1";
/// Default model
pub const DEFAULT_MODEL: &str = "llama-3.3-70b-versatile";

const BACKEND: &str = "Groq";
const DONE: &str = "[DONE]";

#[derive(Debug)]
struct GroqClient {
    http: reqwest::Client,
    api_key: String,
}

/// Groq backend
#[derive(Debug)]
pub struct GroqProvider {
    config: ProviderConfig,
    policy: FallbackPolicy,
    client: OnceCell<GroqClient>,
}

impl GroqProvider {
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

    fn client(&self) -> Result<&GroqClient, ProviderError> {
        self.client.get_or_try_init(|| {
            let api_key = self.config.api_key()?.to_string();
            let http = build_client(BACKEND, self.config.request_timeout)?;
            Ok(GroqClient { http, api_key })
        })
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.config.base())
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    stream: bool,
    messages: [Message<'a>; 2],
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

impl<'a> ChatRequest<'a> {
    fn new(model: &'a str, request: &'a ReviewRequest) -> Self {
        Self {
            model,
            stream: true,
            messages: [
                Message {
                    role: "system",
                    content: &request.system_prompt,
                },
                Message {
                    role: "user",
                    content: &request.payload,
                },
            ],
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct ChatChunk {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    error: Option<ErrorBody>,
}

#[derive(Debug, Default, Deserialize)]
struct Choice {
    #[serde(default)]
    delta: Delta,
}

#[derive(Debug, Default, Deserialize)]
struct Delta {
    #[serde(default)]
    content: Option<String>,
}

/// What one SSE payload means for the stream
#[derive(Debug, PartialEq, Eq)]
enum Event {
    Text(String),
    Done,
}

fn parse_event(model: &str, payload: &str) -> Result<Event, ProviderError> {
    if payload.trim() == DONE {
        return Ok(Event::Done);
    }

    let chunk: ChatChunk = serde_json::from_str(payload).map_err(|e| ProviderError::Decode {
        backend: BACKEND,
        reason: e.to_string(),
    })?;

    if let Some(error) = chunk.error {
        return Err(error.into_error(BACKEND, model));
    }

    Ok(Event::Text(
        chunk
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.delta.content)
            .unwrap_or_default(),
    ))
}

#[async_trait]
impl ModelAttempt for GroqProvider {
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

        tracing::debug!(model, "Sending Groq streaming request");
        let response = client
            .http
            .post(self.completions_url())
            .bearer_auth(&client.api_key)
            .json(&ChatRequest::new(model, request))
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

        'read: while let Some(bytes) = stream.next().await {
            let bytes = bytes.map_err(|source| ProviderError::Transport {
                backend: BACKEND,
                source,
            })?;
            for payload in decoder.push(&bytes) {
                match parse_event(model, &payload)? {
                    Event::Done => break 'read,
                    Event::Text(text) if !text.is_empty() => {
                        full.push_str(&text);
                        sink.chunk(&text);
                    }
                    Event::Text(_) => {}
                }
            }
        }

        tracing::debug!(model, chars = full.len(), "Groq stream complete");
        Ok(full)
    }
}

#[async_trait]
impl ReviewProvider for GroqProvider {
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
