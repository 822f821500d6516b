//! Provider errors

use std::time::Duration;

use thiserror::Error;

/// Failures from a streaming backend
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Missing or unusable credentials/settings
    #[error("{backend} is not configured: {reason}")]
    Configuration {
        /// Backend name
        backend: &'static str,
        /// What is missing
        reason: String,
    },

    /// Quota or rate limit hit
    #[error("{backend} rate limit exceeded for {model}: {message}")]
    RateLimited {
        /// Backend name
        backend: &'static str,
        /// Model that was limited
        model: String,
        /// Provider message
        message: String,
        /// Suggested wait, from `Retry-After`
        retry_after: Option<Duration>,
    },

    /// Non-success response from the API
    #[error("{backend} returned {status}: {message}")]
    Api {
        /// Backend name
        backend: &'static str,
        /// HTTP status (0 when the error arrived inside the stream)
        status: u16,
        /// Provider message
        message: String,
    },

    /// Network or HTTP client failure
    #[error("{backend} request failed: {source}")]
    Transport {
        /// Backend name
        backend: &'static str,
        /// Underlying error
        #[source]
        source: reqwest::Error,
    },

    /// A stream event could not be parsed
    #[error("{backend} sent an unreadable stream event: {reason}")]
    Decode {
        /// Backend name
        backend: &'static str,
        /// Parse failure
        reason: String,
    },
}

impl ProviderError {
    /// Whether the error is a quota/rate-limit failure
    #[must_use]
    pub fn is_rate_limit(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }

    /// Backend that produced the error
    #[must_use]
    pub fn backend(&self) -> &'static str {
        match self {
            Self::Configuration { backend, .. }
            | Self::RateLimited { backend, .. }
            | Self::Api { backend, .. }
            | Self::Transport { backend, .. }
            | Self::Decode { backend, .. } => backend,
        }
    }
}
