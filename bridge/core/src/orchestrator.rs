//! Review Orchestrator
//!
//! Drives one review at a time through the session:
//!
//! ```text
//! Idle ──submit_review──▶ Validating ──▶ Streaming ──┬──▶ Completing ──▶ Idle
//!                             │                      └──▶ Failing ─────▶ Idle
//!                             └── rejected (no mutation)
//! ```
//!
//! Admission is synchronous: the caller learns immediately whether the review
//! was accepted. The provider call runs on a spawned task and everything it
//! produces reaches observers through the [`EventSink`].
//!
//! # Concurrency
//!
//! A size-1 semaphore gates admission. A request arriving while a review is in
//! flight is rejected with [`AdmissionError::Busy`], never queued. The permit
//! is released as soon as `is_streaming` is cleared, before the terminal
//! events are emitted.
//!
//! A provider that panics is treated like one that failed: the session leaves
//! the streaming state and observers get a `stream-error`.

use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use futures::FutureExt;
use serde::Serialize;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;

use crate::error::AdmissionError;
use crate::events::ReviewEvent;
use crate::fanout::EventSink;
use crate::history::{HistoryEntry, HistoryId, NavigationDirection, NewHistoryEntry};
use crate::persona::{PersonaCatalog, PersonaDescriptor, PersonaSummary};
use crate::provider::{ChunkSink, ReviewProvider, ReviewRequest};
use crate::session::{SessionPatch, SessionState, SessionStore, Strictness};

/// How a spawned review ended
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReviewOutcome {
    /// The review streamed to completion and was recorded
    Completed {
        /// Id of the new history entry
        history_id: HistoryId,
        /// Full review text
        result: String,
    },
    /// The provider failed; nothing was recorded
    Failed {
        /// Error description, as sent in `stream-error`
        message: String,
    },
}

impl ReviewOutcome {
    /// Whether the review completed
    #[must_use]
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed { .. })
    }
}

/// Handle to a running review
#[derive(Debug)]
pub struct ReviewHandle(JoinHandle<ReviewOutcome>);

impl ReviewHandle {
    /// Wait for the review to finish
    pub async fn outcome(self) -> ReviewOutcome {
        match self.0.await {
            Ok(outcome) => outcome,
            Err(e) => ReviewOutcome::Failed {
                message: format!("Review task ended unexpectedly: {e}"),
            },
        }
    }
}

/// Acknowledgement for an admitted review
#[derive(Debug)]
pub struct Accepted {
    /// Persona the review runs as
    pub persona_key: String,
    /// Strictness captured at admission
    pub strictness_level: Strictness,
    /// The running review
    pub handle: ReviewHandle,
}

/// Session overview for surfaces that poll
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    /// Provider backend name
    pub provider: String,
    /// Current strictness label
    pub strictness_label: &'static str,
    /// Available personas
    pub personas: Vec<PersonaSummary>,
    /// Current session
    pub state: Arc<SessionState>,
}

struct Inner<P> {
    provider: P,
    catalog: PersonaCatalog,
    store: SessionStore,
    sink: Arc<dyn EventSink>,
    in_flight: Arc<Semaphore>,
}

/// Admitted review waiting to run
struct ReviewJob {
    persona: PersonaDescriptor,
    code: String,
    strictness: Strictness,
}

/// Orchestrates reviews over one shared session
///
/// Cloning is cheap; clones share the session, catalog and provider.
pub struct ReviewOrchestrator<P: ReviewProvider> {
    inner: Arc<Inner<P>>,
}

impl<P: ReviewProvider> Clone for ReviewOrchestrator<P> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<P: ReviewProvider + 'static> fmt::Debug for ReviewOrchestrator<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReviewOrchestrator")
            .field("provider", &self.inner.provider.name())
            .field("personas", &self.inner.catalog.len())
            .field("busy", &self.is_busy())
            .finish_non_exhaustive()
    }
}

impl<P: ReviewProvider + 'static> ReviewOrchestrator<P> {
    /// Create an orchestrator with a fresh session
    pub fn new(provider: P, catalog: PersonaCatalog, sink: Arc<dyn EventSink>) -> Self {
        Self::with_store(provider, catalog, SessionStore::new(), sink)
    }

    /// Create an orchestrator over an existing store
    ///
    /// The orchestrator takes the store over; afterwards the session is only
    /// observable through snapshots.
    ///
    /// ```compile_fail
    /// # use codepulse_core::{ReviewOrchestrator, ReviewProvider, SessionPatch};
    /// fn force_idle<P: ReviewProvider + 'static>(bridge: &ReviewOrchestrator<P>) {
    ///     bridge.store().patch(SessionPatch::new().streaming(false));
    /// }
    /// ```
    pub fn with_store(
        provider: P,
        catalog: PersonaCatalog,
        store: SessionStore,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                provider,
                catalog,
                store,
                sink,
                in_flight: Arc::new(Semaphore::new(1)),
            }),
        }
    }

    /// Current session snapshot
    #[must_use]
    pub fn snapshot(&self) -> Arc<SessionState> {
        self.inner.store.snapshot()
    }

    /// The persona catalog
    #[must_use]
    pub fn catalog(&self) -> &PersonaCatalog {
        &self.inner.catalog
    }

    /// The provider
    #[must_use]
    pub fn provider(&self) -> &P {
        &self.inner.provider
    }

    /// Look up a persona
    #[must_use]
    pub fn resolve_persona(&self, key: &str) -> Option<&PersonaDescriptor> {
        self.inner.catalog.resolve(key)
    }

    /// Whether a review is in flight
    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.inner.in_flight.available_permits() == 0
    }

    /// Session overview
    #[must_use]
    pub fn status(&self) -> StatusReport {
        let state = self.snapshot();
        StatusReport {
            provider: self.inner.provider.name().to_string(),
            strictness_label: state.strictness_level.label(),
            personas: self.inner.catalog.summaries(),
            state,
        }
    }

    /// Start a review
    ///
    /// `code` falls back to the session's last submitted code when absent or
    /// empty. Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// [`AdmissionError::Busy`] while another review streams,
    /// [`AdmissionError::InvalidPersona`] for an unknown key and
    /// [`AdmissionError::NoCodeProvided`] when there is nothing to review. The
    /// session is untouched in every case.
    pub fn submit_review(
        &self,
        persona_key: &str,
        code: Option<String>,
    ) -> Result<Accepted, AdmissionError> {
        let (permit, job) = self.admit(persona_key, code).map_err(|e| {
            tracing::warn!(persona = %persona_key, reason = e.code(), "Review rejected");
            e
        })?;

        let state = self.inner.store.patch(
            SessionPatch::new()
                .active_persona(Some(job.persona.key.clone()))
                .last_submitted_code(job.code.clone())
                .streaming(true)
                .live_accumulator(String::new()),
        );
        let job = ReviewJob {
            strictness: state.strictness_level,
            ..job
        };

        tracing::info!(
            persona = %job.persona.key,
            strictness = job.strictness.level(),
            code_bytes = job.code.len(),
            "Review admitted"
        );
        self.inner.sink.emit(ReviewEvent::StateChanged { state });

        let persona_key = job.persona.key.clone();
        let strictness_level = job.strictness;
        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(async move { run_review(inner, job, permit).await });

        Ok(Accepted {
            persona_key,
            strictness_level,
            handle: ReviewHandle(handle),
        })
    }

    fn admit(
        &self,
        persona_key: &str,
        code: Option<String>,
    ) -> Result<(OwnedSemaphorePermit, ReviewJob), AdmissionError> {
        let permit = Arc::clone(&self.inner.in_flight)
            .try_acquire_owned()
            .map_err(|_| AdmissionError::Busy)?;

        let persona = self
            .inner
            .catalog
            .resolve(persona_key)
            .cloned()
            .ok_or_else(|| AdmissionError::InvalidPersona(persona_key.to_string()))?;

        let code = match code.filter(|c| !c.is_empty()) {
            Some(code) => code,
            None => {
                let snapshot = self.inner.store.snapshot();
                if snapshot.last_submitted_code.is_empty() {
                    return Err(AdmissionError::NoCodeProvided);
                }
                snapshot.last_submitted_code.clone()
            }
        };

        Ok((
            permit,
            ReviewJob {
                persona,
                code,
                strictness: Strictness::default(),
            },
        ))
    }

    /// Change strictness for subsequent reviews
    ///
    /// # Errors
    ///
    /// [`AdmissionError::InvalidStrictnessLevel`] when `level` is not 1-4; the
    /// session is unchanged.
    pub fn set_strictness(&self, level: i64) -> Result<Strictness, AdmissionError> {
        let strictness = Strictness::new(level)?;
        let state = self
            .inner
            .store
            .patch(SessionPatch::new().strictness(strictness));

        tracing::info!(level = strictness.level(), label = strictness.label(), "Strictness changed");
        self.inner.sink.emit(ReviewEvent::StateChanged { state });
        Ok(strictness)
    }

    /// Move the history cursor
    ///
    /// Returns `None` (and emits nothing) when history is empty.
    pub fn navigate_history(&self, direction: NavigationDirection) -> Option<Arc<HistoryEntry>> {
        if self.inner.store.snapshot().history.is_empty() {
            tracing::debug!(?direction, "History is empty, nothing to select");
            return None;
        }

        let (entry, state) = self.inner.store.select_history(direction)?;

        tracing::debug!(?direction, entry = %entry.id, "History cursor moved");
        self.inner.sink.emit(ReviewEvent::StateChanged { state });
        self.inner.sink.emit(ReviewEvent::HistorySelected {
            entry: Arc::clone(&entry),
        });
        Some(entry)
    }
}

/// Chunk receiver for the in-flight review
///
/// Keeps the local accumulator and the session's `live_accumulator` in step
/// and relays every fragment as a `stream-chunk`.
struct LiveReview<'a> {
    store: &'a SessionStore,
    sink: &'a dyn EventSink,
    accumulated: String,
    chunks: usize,
}

impl ChunkSink for LiveReview<'_> {
    fn chunk(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        self.accumulated.push_str(text);
        self.chunks += 1;
        self.store
            .patch(SessionPatch::new().live_accumulator(self.accumulated.clone()));
        self.sink.emit(ReviewEvent::StreamChunk {
            chunk: text.to_string(),
            accumulated_so_far: self.accumulated.clone(),
        });
    }

    fn restart(&mut self, model: &str) {
        tracing::debug!(model, discarded = self.chunks, "Provider restarting review");
        if self.accumulated.is_empty() {
            return;
        }
        self.accumulated.clear();
        self.chunks = 0;
        let state = self
            .store
            .patch(SessionPatch::new().live_accumulator(String::new()));
        self.sink.emit(ReviewEvent::StateChanged { state });
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

async fn run_review<P: ReviewProvider>(
    inner: Arc<Inner<P>>,
    job: ReviewJob,
    permit: OwnedSemaphorePermit,
) -> ReviewOutcome {
    let started = Instant::now();
    let request = ReviewRequest::for_code(job.persona.prompt_for(job.strictness), &job.code);

    let mut live = LiveReview {
        store: &inner.store,
        sink: &*inner.sink,
        accumulated: String::new(),
        chunks: 0,
    };
    let result = match AssertUnwindSafe(inner.provider.stream(&request, &mut live))
        .catch_unwind()
        .await
    {
        Ok(result) => result.map_err(|e| e.to_string()),
        Err(payload) => Err(format!(
            "{} provider panicked: {}",
            inner.provider.name(),
            panic_message(payload.as_ref())
        )),
    };
    let LiveReview {
        accumulated,
        chunks,
        ..
    } = live;

    match result {
        Ok(_) => {
            let entry = NewHistoryEntry::from_persona(
                &job.persona,
                job.code,
                accumulated.clone(),
                job.strictness,
            );
            let (history_id, state) = inner
                .store
                .push_history(entry, SessionPatch::new().streaming(false));
            drop(permit);

            tracing::info!(
                persona = %job.persona.key,
                provider = inner.provider.name(),
                chunks,
                bytes = accumulated.len(),
                elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
                "Review completed"
            );
            inner.sink.emit(ReviewEvent::StateChanged { state });
            inner.sink.emit(ReviewEvent::StreamEnd {
                final_result: accumulated.clone(),
            });

            ReviewOutcome::Completed {
                history_id,
                result: accumulated,
            }
        }
        Err(message) => {
            let state = inner.store.patch(SessionPatch::new().streaming(false));
            drop(permit);

            tracing::warn!(
                persona = %job.persona.key,
                provider = inner.provider.name(),
                chunks,
                error = %message,
                "Review failed"
            );
            inner.sink.emit(ReviewEvent::StreamError {
                message: message.clone(),
            });
            inner.sink.emit(ReviewEvent::StateChanged { state });

            ReviewOutcome::Failed { message }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;

    use crate::provider::ProviderError;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<ReviewEvent>>);

    impl EventSink for Recorder {
        fn emit(&self, event: ReviewEvent) {
            self.0.lock().push(event);
        }
    }

    impl Recorder {
        fn names(&self) -> Vec<&'static str> {
            self.0.lock().iter().map(ReviewEvent::name).collect()
        }
    }

    struct Echo;

    #[async_trait]
    impl ReviewProvider for Echo {
        fn name(&self) -> &str {
            "Echo"
        }

        async fn stream(
            &self,
            request: &ReviewRequest,
            sink: &mut dyn ChunkSink,
        ) -> Result<String, ProviderError> {
            sink.chunk("reviewed: ");
            sink.chunk("");
            sink.chunk(&request.payload);
            Ok(format!("reviewed: {}", request.payload))
        }
    }

    fn orchestrator() -> (ReviewOrchestrator<Echo>, Arc<Recorder>) {
        let recorder = Arc::new(Recorder::default());
        let sink: Arc<dyn EventSink> = recorder.clone();
        (
            ReviewOrchestrator::new(Echo, PersonaCatalog::builtin(), sink),
            recorder,
        )
    }

    #[tokio::test]
    async fn test_review_lifecycle_events() {
        let (orchestrator, recorder) = orchestrator();

        let accepted = orchestrator.submit_review("explain", Some("x".to_string())).unwrap();
        assert_eq!(accepted.persona_key, "explain");
        assert!(accepted.handle.outcome().await.is_completed());

        assert_eq!(
            recorder.names(),
            vec![
                "state-changed",
                "stream-chunk",
                "stream-chunk",
                "state-changed",
                "stream-end"
            ]
        );
        let state = orchestrator.snapshot();
        assert!(!state.is_streaming);
        assert_eq!(state.history.len(), 1);
        assert_eq!(state.history[0].result, "reviewed: Code for review:\n\n```\nx\n```");
        assert!(!orchestrator.is_busy());
    }

    #[tokio::test]
    async fn test_code_reused_from_session() {
        let (orchestrator, _) = orchestrator();
        orchestrator
            .submit_review("explain", Some("fn a() {}".to_string()))
            .unwrap()
            .handle
            .outcome()
            .await;

        let accepted = orchestrator.submit_review("refactor", None).unwrap();
        accepted.handle.outcome().await;

        let state = orchestrator.snapshot();
        assert_eq!(state.history[0].code, "fn a() {}");
        assert_eq!(state.history[0].persona_key, "refactor");
        assert_eq!(state.active_persona_key.as_deref(), Some("refactor"));
    }

    #[tokio::test]
    async fn test_strictness_captured_at_admission() {
        let (orchestrator, _) = orchestrator();
        orchestrator.set_strictness(4).unwrap();

        let accepted = orchestrator.submit_review("security", Some("x".to_string())).unwrap();
        assert_eq!(accepted.strictness_level, Strictness::PRINCIPAL);
        accepted.handle.outcome().await;

        assert_eq!(
            orchestrator.snapshot().history[0].strictness_level,
            Strictness::PRINCIPAL
        );
    }

    #[test]
    fn test_status_report() {
        let (orchestrator, _) = orchestrator();
        let status = orchestrator.status();
        assert_eq!(status.provider, "Echo");
        assert_eq!(status.strictness_label, "Mid-level Dev");
        assert_eq!(status.personas.len(), 9);

        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["strictnessLabel"], "Mid-level Dev");
        assert_eq!(json["state"]["strictnessLevel"], 2);
    }

    #[test]
    fn test_debug_shows_provider_and_busy_flag() {
        let (orchestrator, _) = orchestrator();
        let debug = format!("{orchestrator:?}");
        assert!(debug.contains("\"Echo\""));
        assert!(debug.contains("busy: false"));
    }

    #[test]
    fn test_navigate_empty_history_emits_nothing() {
        let (orchestrator, recorder) = orchestrator();
        assert!(orchestrator.navigate_history(NavigationDirection::Next).is_none());
        assert!(recorder.names().is_empty());
    }
}
