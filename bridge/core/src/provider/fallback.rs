//! One-shot model fallback
//!
//! A backend streams against its primary model. When that attempt is refused
//! for quota reasons the whole request is repeated once against the fallback
//! model, even if the primary already produced text. The sink is told to
//! [`restart`](ChunkSink::restart) first so it can drop the abandoned
//! fragments. Any other failure, or a second failure, is final.

use async_trait::async_trait;

use super::error::ProviderError;
use super::{ChunkSink, ReviewRequest};

/// Primary model plus optional fallback
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FallbackPolicy {
    primary: String,
    fallback: Option<String>,
}

impl FallbackPolicy {
    /// Create a policy. A blank fallback, or one equal to the primary, is ignored.
    pub fn new(primary: impl Into<String>, fallback: Option<String>) -> Self {
        let primary = primary.into();
        let fallback = fallback
            .map(|f| f.trim().to_string())
            .filter(|f| !f.is_empty() && *f != primary);
        Self { primary, fallback }
    }

    /// Model tried first
    #[must_use]
    pub fn primary(&self) -> &str {
        &self.primary
    }

    /// Model tried after a quota failure
    #[must_use]
    pub fn fallback(&self) -> Option<&str> {
        self.fallback.as_deref()
    }

    /// Fallback model to retry with after the primary attempt failed
    #[must_use]
    pub fn fallback_after(&self, error: &ProviderError) -> Option<&str> {
        if error.is_rate_limit() {
            self.fallback()
        } else {
            None
        }
    }
}

/// A single streaming call against one model
#[async_trait]
pub trait ModelAttempt: Send + Sync {
    /// Backend name for logs and errors
    fn backend_name(&self) -> &'static str;

    /// Stream `request` against `model`, forwarding each text fragment
    async fn attempt(
        &self,
        model: &str,
        request: &ReviewRequest,
        sink: &mut dyn ChunkSink,
    ) -> Result<String, ProviderError>;
}

/// Run `request` on the primary model, retrying once on the fallback model
///
/// # Errors
///
/// Returns the primary failure when no retry applies, otherwise the fallback
/// failure.
pub async fn stream_with_fallback<A: ModelAttempt + ?Sized>(
    backend: &A,
    policy: &FallbackPolicy,
    request: &ReviewRequest,
    sink: &mut dyn ChunkSink,
) -> Result<String, ProviderError> {
    let error = match backend.attempt(policy.primary(), request, &mut *sink).await {
        Ok(text) => return Ok(text),
        Err(error) => error,
    };

    let Some(fallback) = policy.fallback_after(&error) else {
        return Err(error);
    };

    tracing::warn!(
        backend = backend.backend_name(),
        primary = policy.primary(),
        fallback,
        error = %error,
        "Primary model rate limited, retrying with fallback model"
    );

    sink.restart(fallback);
    backend.attempt(fallback, request, sink).await
}
