//! Session State Store
//!
//! Holds the one shared review session that every connected surface observes.
//! The store is the only place session state can change: callers submit a
//! [`SessionPatch`] (a shallow, top-level merge) and read through
//! [`SessionStore::snapshot`].
//!
//! # Snapshots
//!
//! A snapshot is an `Arc<SessionState>`. Patching goes through
//! `Arc::make_mut`, so the store copies the state only when an older snapshot
//! is still alive. Readers never see a value change underneath them and the
//! common case (no outstanding snapshot) does not copy at all.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::AdmissionError;
use crate::history::{HistoryEntry, HistoryId};

/// Review strictness, always within 1..=4
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "u8")]
pub struct Strictness(u8);

impl Strictness {
    /// Gentlest level
    pub const JUNIOR: Self = Self(1);
    /// Default level
    pub const MID: Self = Self(2);
    /// Thorough level
    pub const SENIOR: Self = Self(3);
    /// Most exhaustive level
    pub const PRINCIPAL: Self = Self(4);

    /// Validate a raw level
    ///
    /// # Errors
    ///
    /// Returns [`AdmissionError::InvalidStrictnessLevel`] when `level` is not 1-4.
    pub fn new(level: i64) -> Result<Self, AdmissionError> {
        u8::try_from(level)
            .ok()
            .filter(|l| (1..=4).contains(l))
            .map(Self)
            .ok_or(AdmissionError::InvalidStrictnessLevel(level))
    }

    /// Numeric level
    #[must_use]
    pub fn level(self) -> u8 {
        self.0
    }

    /// Human-readable label shown on surfaces
    #[must_use]
    pub fn label(self) -> &'static str {
        match self.0 {
            1 => "Junior Dev",
            3 => "Senior Dev",
            4 => "Principal Engineer",
            _ => "Mid-level Dev",
        }
    }
}

impl Default for Strictness {
    fn default() -> Self {
        Self::MID
    }
}

impl TryFrom<i64> for Strictness {
    type Error = AdmissionError;

    fn try_from(level: i64) -> Result<Self, Self::Error> {
        Self::new(level)
    }
}

impl From<Strictness> for u8 {
    fn from(strictness: Strictness) -> Self {
        strictness.0
    }
}

impl fmt::Display for Strictness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.0, self.label())
    }
}

/// The shared review session
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionState {
    /// Strictness used for the next review
    pub strictness_level: Strictness,
    /// Persona of the most recent review
    pub active_persona_key: Option<String>,
    /// Code of the most recent review (reused when a request carries none)
    pub last_submitted_code: String,
    /// True from review start until its terminal event
    pub is_streaming: bool,
    /// Text received so far for the in-flight review
    pub live_accumulator: String,
    /// Completed reviews, newest first
    pub history: Vec<Arc<HistoryEntry>>,
    /// Entry the navigation cursor points at
    pub selected_history_id: Option<HistoryId>,
}

impl SessionState {
    /// Create a fresh session at the given strictness
    #[must_use]
    pub fn with_strictness(strictness_level: Strictness) -> Self {
        Self {
            strictness_level,
            ..Self::default()
        }
    }

    /// Look up a history entry by id
    #[must_use]
    pub fn history_entry(&self, id: &HistoryId) -> Option<&Arc<HistoryEntry>> {
        self.history.iter().find(|e| &e.id == id)
    }

    /// Currently selected history entry, if the cursor is set
    #[must_use]
    pub fn selected_entry(&self) -> Option<&Arc<HistoryEntry>> {
        self.selected_history_id
            .as_ref()
            .and_then(|id| self.history_entry(id))
    }

    /// Point a stale selection at the newest entry (or clear it)
    fn reconcile_selection(&mut self) {
        let stale = self
            .selected_history_id
            .as_ref()
            .is_some_and(|id| self.history_entry(id).is_none());

        if stale {
            let replacement = self.history.first().map(|e| e.id.clone());
            tracing::debug!(
                replacement = ?replacement,
                "Selected history entry no longer exists, resetting cursor"
            );
            self.selected_history_id = replacement;
        }
    }
}

/// Shallow merge applied to [`SessionState`]
///
/// Unset fields are left alone. Containers are replaced wholesale.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[must_use]
pub struct SessionPatch {
    /// New strictness
    pub strictness_level: Option<Strictness>,
    /// New active persona (`Some(None)` clears it)
    pub active_persona_key: Option<Option<String>>,
    /// New last submitted code
    pub last_submitted_code: Option<String>,
    /// New streaming flag
    pub is_streaming: Option<bool>,
    /// New accumulator contents
    pub live_accumulator: Option<String>,
    /// Replacement history
    pub history: Option<Vec<Arc<HistoryEntry>>>,
    /// New selection (`Some(None)` clears it)
    pub selected_history_id: Option<Option<HistoryId>>,
}

impl SessionPatch {
    /// Empty patch
    pub fn new() -> Self {
        Self::default()
    }

    /// Set strictness
    pub fn strictness(mut self, strictness: Strictness) -> Self {
        self.strictness_level = Some(strictness);
        self
    }

    /// Set or clear the active persona
    pub fn active_persona(mut self, key: Option<String>) -> Self {
        self.active_persona_key = Some(key);
        self
    }

    /// Set last submitted code
    pub fn last_submitted_code(mut self, code: impl Into<String>) -> Self {
        self.last_submitted_code = Some(code.into());
        self
    }

    /// Set the streaming flag
    pub fn streaming(mut self, is_streaming: bool) -> Self {
        self.is_streaming = Some(is_streaming);
        self
    }

    /// Replace the live accumulator
    pub fn live_accumulator(mut self, text: impl Into<String>) -> Self {
        self.live_accumulator = Some(text.into());
        self
    }

    /// Replace the whole history
    pub fn history(mut self, history: Vec<Arc<HistoryEntry>>) -> Self {
        self.history = Some(history);
        self
    }

    /// Set or clear the selected history entry
    pub fn selected_history(mut self, id: Option<HistoryId>) -> Self {
        self.selected_history_id = Some(id);
        self
    }

    /// Whether the patch would change nothing
    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub(crate) fn apply(self, state: &mut SessionState) {
        if let Some(strictness) = self.strictness_level {
            state.strictness_level = strictness;
        }
        if let Some(key) = self.active_persona_key {
            state.active_persona_key = key;
        }
        if let Some(code) = self.last_submitted_code {
            state.last_submitted_code = code;
        }
        if let Some(streaming) = self.is_streaming {
            state.is_streaming = streaming;
        }
        if let Some(text) = self.live_accumulator {
            state.live_accumulator = text;
        }
        if let Some(history) = self.history {
            state.history = history;
        }
        if let Some(selected) = self.selected_history_id {
            state.selected_history_id = selected;
        }
    }
}

/// Owner of the shared session
///
/// One coarse lock guards the state; every mutation is a single critical
/// section, so observers only ever see fully applied patches.
#[derive(Debug, Default)]
pub struct SessionStore {
    inner: Mutex<Arc<SessionState>>,
}

impl SessionStore {
    /// Create a store with default state
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store from an initial state
    #[must_use]
    pub fn from_state(state: SessionState) -> Self {
        Self {
            inner: Mutex::new(Arc::new(state)),
        }
    }

    /// Immutable view of the current state
    #[must_use]
    pub fn snapshot(&self) -> Arc<SessionState> {
        Arc::clone(&self.inner.lock())
    }

    /// Merge a patch and return the resulting snapshot
    pub fn patch(&self, delta: SessionPatch) -> Arc<SessionState> {
        self.update(|state| delta.apply(state)).1
    }

    /// Run a compound mutation atomically
    ///
    /// Returns the closure's result and the post-mutation snapshot.
    pub(crate) fn update<R>(&self, f: impl FnOnce(&mut SessionState) -> R) -> (R, Arc<SessionState>) {
        let mut guard = self.inner.lock();
        let state = Arc::make_mut(&mut guard);
        let out = f(state);
        state.reconcile_selection();
        (out, Arc::clone(&guard))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    use crate::history::{HistoryRing, NewHistoryEntry};

    fn entry(result: &str) -> NewHistoryEntry {
        NewHistoryEntry {
            persona_key: "security".to_string(),
            persona_display_name: "Security Scan".to_string(),
            persona_icon: "shield-check".to_string(),
            persona_color: "#ef4444".to_string(),
            code: "let x = 1;".to_string(),
            result: result.to_string(),
            strictness_level: Strictness::MID,
        }
    }

    #[test]
    fn test_strictness_bounds() {
        assert_eq!(Strictness::new(1).unwrap(), Strictness::JUNIOR);
        assert_eq!(Strictness::new(4).unwrap().label(), "Principal Engineer");
        assert_eq!(
            Strictness::new(0),
            Err(AdmissionError::InvalidStrictnessLevel(0))
        );
        assert_eq!(
            Strictness::new(5),
            Err(AdmissionError::InvalidStrictnessLevel(5))
        );
        assert_eq!(
            Strictness::new(-300),
            Err(AdmissionError::InvalidStrictnessLevel(-300))
        );
        assert_eq!(Strictness::default().level(), 2);
    }

    #[test]
    fn test_strictness_serde() {
        let json = serde_json::to_string(&Strictness::SENIOR).unwrap();
        assert_eq!(json, "3");
        let parsed: Strictness = serde_json::from_str("4").unwrap();
        assert_eq!(parsed, Strictness::PRINCIPAL);
        assert!(serde_json::from_str::<Strictness>("9").is_err());
    }

    #[test]
    fn test_patch_is_shallow_merge() {
        let store = SessionStore::new();
        store.patch(
            SessionPatch::new()
                .active_persona(Some("security".to_string()))
                .last_submitted_code("fn main() {}"),
        );

        let state = store.patch(SessionPatch::new().streaming(true));
        assert!(state.is_streaming);
        assert_eq!(state.active_persona_key.as_deref(), Some("security"));
        assert_eq!(state.last_submitted_code, "fn main() {}");
        assert_eq!(state.strictness_level, Strictness::MID);
    }

    #[test]
    fn test_patch_can_clear_optional_fields() {
        let store = SessionStore::new();
        store.patch(SessionPatch::new().active_persona(Some("explain".to_string())));
        let state = store.patch(SessionPatch::new().active_persona(None));
        assert_eq!(state.active_persona_key, None);
    }

    #[test]
    fn test_snapshot_is_isolated_from_later_patches() {
        let store = SessionStore::new();
        let before = store.snapshot();

        store.patch(SessionPatch::new().live_accumulator("partial"));

        assert_eq!(before.live_accumulator, "");
        assert_eq!(store.snapshot().live_accumulator, "partial");
    }

    #[test]
    fn test_history_replaced_wholesale() {
        let store = SessionStore::new();
        store.update(|state| {
            let mut ring = HistoryRing::new(state);
            ring.push(entry("one"));
            ring.push(entry("two"));
        });
        assert_eq!(store.snapshot().history.len(), 2);

        let state = store.patch(SessionPatch::new().history(Vec::new()));
        assert!(state.history.is_empty());
        assert_eq!(state.selected_history_id, None);
    }

    #[test]
    fn test_stale_selection_resets_to_newest() {
        let store = SessionStore::new();
        let (_, state) = store.update(|state| {
            let mut ring = HistoryRing::new(state);
            ring.push(entry("one"));
            ring.push(entry("two"));
        });
        let newest = state.history[0].clone();
        let oldest = state.history[1].clone();

        // Keep only the oldest entry but leave the selection on the newest.
        let state = store.patch(SessionPatch::new().history(vec![oldest.clone()]));
        assert_eq!(state.selected_history_id.as_ref(), Some(&oldest.id));
        assert_ne!(state.selected_history_id.as_ref(), Some(&newest.id));
    }

    #[test]
    fn test_empty_patch() {
        assert!(SessionPatch::new().is_empty());
        assert!(!SessionPatch::new().streaming(false).is_empty());
    }
}
