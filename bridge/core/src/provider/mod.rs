//! Review Providers
//!
//! Adapters that turn a review request into a stream of text fragments from a
//! hosted model. The orchestrator only sees the [`ReviewProvider`] trait;
//! concrete backends live in submodules.
//!
//! # Available Providers
//!
//! - `gemini` - Google Generative Language API (`streamGenerateContent`, SSE)
//! - `groq` - Groq OpenAI-compatible chat completions (SSE)
//!
//! Both retry once on a fallback model when the primary model is rate limited
//! (see [`fallback`]).

pub mod error;
pub mod fallback;
pub mod gemini;
pub mod groq;
mod http;
mod sse;

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use error::ProviderError;
pub use fallback::{stream_with_fallback, FallbackPolicy, ModelAttempt};
pub use gemini::GeminiProvider;
pub use groq::GroqProvider;

/// Default per-request timeout
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Prompt pair sent to a provider
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReviewRequest {
    /// Persona instructions
    pub system_prompt: String,
    /// User turn
    pub payload: String,
}

impl ReviewRequest {
    /// Create a request from raw parts
    pub fn new(system_prompt: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            payload: payload.into(),
        }
    }

    /// Wrap code in the standard review payload
    pub fn for_code(system_prompt: impl Into<String>, code: &str) -> Self {
        Self::new(system_prompt, format!("Code for review:\n\n```\n{code}\n```"))
    }
}

/// Receiver for the text a provider streams
///
/// Closures taking `&str` implement this with a no-op [`ChunkSink::restart`].
pub trait ChunkSink: Send {
    /// One text fragment, in arrival order
    fn chunk(&mut self, text: &str);

    /// The call is about to be repeated against `model`; fragments received
    /// so far belong to the abandoned attempt
    fn restart(&mut self, _model: &str) {}
}

impl<F> ChunkSink for F
where
    F: FnMut(&str) + Send,
{
    fn chunk(&mut self, text: &str) {
        self(text);
    }
}

/// A streaming text-generation backend
#[async_trait]
pub trait ReviewProvider: Send + Sync {
    /// Backend name for logs
    fn name(&self) -> &str;

    /// Stream a review into `sink`, fragment by fragment
    ///
    /// Returns the full text of the attempt that succeeded.
    async fn stream(
        &self,
        request: &ReviewRequest,
        sink: &mut dyn ChunkSink,
    ) -> Result<String, ProviderError>;
}

/// Which hosted API to use
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Google Gemini
    #[default]
    Gemini,
    /// Groq
    Groq,
}

impl ProviderKind {
    /// Name used in logs and errors
    #[must_use]
    pub fn display_name(self) -> &'static str {
        match self {
            Self::Gemini => "Gemini",
            Self::Groq => "Groq",
        }
    }

    /// Model used when none is configured
    #[must_use]
    pub fn default_model(self) -> &'static str {
        match self {
            Self::Gemini => gemini::DEFAULT_MODEL,
            Self::Groq => groq::DEFAULT_MODEL,
        }
    }

    /// Fallback model used when none is configured
    #[must_use]
    pub fn default_fallback(self) -> Option<&'static str> {
        match self {
            Self::Gemini => Some(gemini::DEFAULT_FALLBACK_MODEL),
            Self::Groq => None,
        }
    }

    /// API root used when none is configured
    #[must_use]
    pub fn default_base_url(self) -> &'static str {
        match self {
            Self::Gemini => gemini::DEFAULT_BASE_URL,
            Self::Groq => groq::DEFAULT_BASE_URL,
        }
    }

    /// Environment variable holding the API key
    #[must_use]
    pub fn api_key_env(self) -> &'static str {
        match self {
            Self::Gemini => "GEMINI_API_KEY",
            Self::Groq => "GROQ_API_KEY",
        }
    }

    /// Environment variable overriding the model
    #[must_use]
    pub fn model_env(self) -> &'static str {
        match self {
            Self::Gemini => "GEMINI_MODEL",
            Self::Groq => "GROQ_MODEL",
        }
    }

    /// Environment variable overriding the fallback model
    #[must_use]
    pub fn fallback_model_env(self) -> &'static str {
        match self {
            Self::Gemini => "GEMINI_FALLBACK_MODEL",
            Self::Groq => "GROQ_FALLBACK_MODEL",
        }
    }
}

impl FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "gemini" => Ok(Self::Gemini),
            "groq" => Ok(Self::Groq),
            other => Err(format!("unknown provider: {other} (expected gemini or groq)")),
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Gemini => f.write_str("gemini"),
            Self::Groq => f.write_str("groq"),
        }
    }
}

/// Resolved settings for one provider
#[derive(Clone, PartialEq, Eq)]
pub struct ProviderConfig {
    /// Backend
    pub kind: ProviderKind,
    /// Primary model
    pub model: String,
    /// Model tried after a rate limit
    pub fallback_model: Option<String>,
    /// API key; checked when the first request is made
    pub api_key: Option<String>,
    /// API root
    pub base_url: String,
    /// Per-request timeout
    pub request_timeout: Duration,
}

impl ProviderConfig {
    /// Defaults for a backend, without an API key
    #[must_use]
    pub fn new(kind: ProviderKind) -> Self {
        Self {
            kind,
            model: kind.default_model().to_string(),
            fallback_model: kind.default_fallback().map(str::to_string),
            api_key: None,
            base_url: kind.default_base_url().to_string(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Set the API key
    #[must_use]
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Model pair used for fallback
    #[must_use]
    pub fn fallback_policy(&self) -> FallbackPolicy {
        FallbackPolicy::new(self.model.clone(), self.fallback_model.clone())
    }

    /// Non-blank API key, if any
    pub(crate) fn api_key(&self) -> Result<&str, ProviderError> {
        self.api_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .ok_or_else(|| ProviderError::Configuration {
                backend: self.kind.display_name(),
                reason: format!("{} is missing", self.kind.api_key_env()),
            })
    }

    /// Base URL without a trailing slash
    pub(crate) fn base(&self) -> &str {
        self.base_url.trim_end_matches('/')
    }
}

impl fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("kind", &self.kind)
            .field("model", &self.model)
            .field("fallback_model", &self.fallback_model)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("base_url", &self.base_url)
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

/// Runtime-selected provider
#[derive(Debug)]
pub enum Provider {
    /// Google Gemini
    Gemini(GeminiProvider),
    /// Groq
    Groq(GroqProvider),
}

impl Provider {
    /// Build the provider a config names
    #[must_use]
    pub fn from_config(config: ProviderConfig) -> Self {
        match config.kind {
            ProviderKind::Gemini => Self::Gemini(GeminiProvider::new(config)),
            ProviderKind::Groq => Self::Groq(GroqProvider::new(config)),
        }
    }

    /// Settings in use
    #[must_use]
    pub fn config(&self) -> &ProviderConfig {
        match self {
            Self::Gemini(p) => p.config(),
            Self::Groq(p) => p.config(),
        }
    }
}

#[async_trait]
impl ReviewProvider for Provider {
    fn name(&self) -> &str {
        match self {
            Self::Gemini(p) => p.name(),
            Self::Groq(p) => p.name(),
        }
    }

    async fn stream(
        &self,
        request: &ReviewRequest,
        sink: &mut dyn ChunkSink,
    ) -> Result<String, ProviderError> {
        match self {
            Self::Gemini(p) => p.stream(request, sink).await,
            Self::Groq(p) => p.stream(request, sink).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_payload_wraps_code_in_fence() {
        let request = ReviewRequest::for_code("be nice", "let x = 1;");
        assert_eq!(request.payload, "Code for review:\n\n```\nlet x = 1;\n```");
        assert_eq!(request.system_prompt, "be nice");
    }

    #[test]
    fn test_kind_parsing() {
        assert_eq!("gemini".parse(), Ok(ProviderKind::Gemini));
        assert_eq!(" GROQ ".parse(), Ok(ProviderKind::Groq));
        assert!("openai".parse::<ProviderKind>().is_err());
        assert_eq!(ProviderKind::Groq.to_string(), "groq");
    }

    #[test]
    fn test_defaults_per_kind() {
        let gemini = ProviderConfig::new(ProviderKind::Gemini);
        assert_eq!(gemini.model, "gemini-1.5-flash");
        assert_eq!(gemini.fallback_model.as_deref(), Some("gemini-1.5-flash-latest"));

        let groq = ProviderConfig::new(ProviderKind::Groq);
        assert_eq!(groq.model, "llama-3.3-70b-versatile");
        assert_eq!(groq.fallback_model, None);
    }

    #[test]
    fn test_missing_key_is_configuration_error() {
        let config = ProviderConfig::new(ProviderKind::Groq).with_api_key("   ");
        match config.api_key() {
            Err(ProviderError::Configuration { reason, .. }) => {
                assert_eq!(reason, "GROQ_API_KEY is missing");
            }
            other => panic!("expected configuration error, got {other:?}"),
        }
    }

    #[test]
    fn test_debug_redacts_key() {
        let config = ProviderConfig::new(ProviderKind::Gemini).with_api_key("secret-key");
        let debug = format!("{config:?}");
        assert!(!debug.contains("secret-key"));
        assert!(debug.contains("<redacted>"));
    }
}
