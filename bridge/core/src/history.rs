//! Review History
//!
//! A bounded, newest-first log of completed reviews plus a selection cursor
//! that surfaces move with a rotary control. The ring operates on a borrowed
//! [`SessionState`] so that it always runs inside the store's lock.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::persona::PersonaDescriptor;
use crate::session::{SessionPatch, SessionState, SessionStore, Strictness};

/// Maximum number of reviews kept in the session
pub const HISTORY_CAPACITY: usize = 10;

/// History entry identifier
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HistoryId(Uuid);

impl HistoryId {
    /// Generate a new unique id
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for HistoryId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for HistoryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A completed review. Never modified after creation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    /// Unique id
    pub id: HistoryId,
    /// When the review completed
    pub created_at: DateTime<Utc>,
    /// Persona key
    pub persona_key: String,
    /// Persona display name
    pub persona_display_name: String,
    /// Persona icon name
    pub persona_icon: String,
    /// Persona colour (CSS hex)
    pub persona_color: String,
    /// Reviewed code
    pub code: String,
    /// Full review text
    pub result: String,
    /// Strictness the review ran at
    pub strictness_level: Strictness,
}

/// Input for [`HistoryRing::push`]; id and timestamp are assigned on push
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewHistoryEntry {
    /// Persona key
    pub persona_key: String,
    /// Persona display name
    pub persona_display_name: String,
    /// Persona icon name
    pub persona_icon: String,
    /// Persona colour
    pub persona_color: String,
    /// Reviewed code
    pub code: String,
    /// Full review text
    pub result: String,
    /// Strictness the review ran at
    pub strictness_level: Strictness,
}

impl NewHistoryEntry {
    /// Build an entry carrying the persona's display metadata
    #[must_use]
    pub fn from_persona(
        persona: &PersonaDescriptor,
        code: String,
        result: String,
        strictness_level: Strictness,
    ) -> Self {
        Self {
            persona_key: persona.key.clone(),
            persona_display_name: persona.display_name.clone(),
            persona_icon: persona.icon.clone(),
            persona_color: persona.color.clone(),
            code,
            result,
            strictness_level,
        }
    }

    fn into_entry(self, id: HistoryId, created_at: DateTime<Utc>) -> HistoryEntry {
        HistoryEntry {
            id,
            created_at,
            persona_key: self.persona_key,
            persona_display_name: self.persona_display_name,
            persona_icon: self.persona_icon,
            persona_color: self.persona_color,
            code: self.code,
            result: self.result,
            strictness_level: self.strictness_level,
        }
    }
}

/// Cursor movement through history
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NavigationDirection {
    /// Towards older entries (wraps to newest)
    Next,
    /// Towards newer entries (wraps to oldest)
    Previous,
}

impl FromStr for NavigationDirection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "next" => Ok(Self::Next),
            "previous" | "prev" => Ok(Self::Previous),
            other => Err(format!("unknown direction: {other}")),
        }
    }
}

/// History operations over a borrowed session
pub struct HistoryRing<'a> {
    state: &'a mut SessionState,
}

impl<'a> HistoryRing<'a> {
    /// Borrow the session's history
    pub fn new(state: &'a mut SessionState) -> Self {
        Self { state }
    }

    /// Prepend a completed review and select it
    ///
    /// Entries beyond [`HISTORY_CAPACITY`] are dropped from the tail.
    pub fn push(&mut self, input: NewHistoryEntry) -> HistoryId {
        let id = HistoryId::new();
        let entry = input.into_entry(id.clone(), Utc::now());

        self.state.history.insert(0, Arc::new(entry));
        if self.state.history.len() > HISTORY_CAPACITY {
            let evicted = self.state.history.len() - HISTORY_CAPACITY;
            self.state.history.truncate(HISTORY_CAPACITY);
            tracing::debug!(evicted, "Evicted oldest history entries");
        }

        self.state.selected_history_id = Some(id.clone());
        id
    }

    /// Move the cursor one step, wrapping at either end
    ///
    /// A missing or stale cursor counts as index 0. Returns `None` without
    /// touching the session when history is empty.
    pub fn select(&mut self, direction: NavigationDirection) -> Option<Arc<HistoryEntry>> {
        let len = self.state.history.len();
        if len == 0 {
            return None;
        }

        let current = self
            .state
            .selected_history_id
            .as_ref()
            .and_then(|id| self.state.history.iter().position(|e| &e.id == id))
            .unwrap_or(0);

        let next = match direction {
            NavigationDirection::Next => (current + 1) % len,
            NavigationDirection::Previous => (current + len - 1) % len,
        };

        let entry = Arc::clone(&self.state.history[next]);
        self.state.selected_history_id = Some(entry.id.clone());
        Some(entry)
    }

    /// Number of stored entries
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.history.len()
    }

    /// Whether history is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state.history.is_empty()
    }
}

impl SessionStore {
    /// Record a completed review and merge `delta` in the same critical section
    pub(crate) fn push_history(
        &self,
        input: NewHistoryEntry,
        delta: SessionPatch,
    ) -> (HistoryId, Arc<SessionState>) {
        self.update(|state| {
            let id = HistoryRing::new(state).push(input);
            delta.apply(state);
            id
        })
    }

    /// Move the history cursor, returning the selected entry and the new state
    pub(crate) fn select_history(
        &self,
        direction: NavigationDirection,
    ) -> Option<(Arc<HistoryEntry>, Arc<SessionState>)> {
        if self.snapshot().history.is_empty() {
            return None;
        }
        let (entry, state) = self.update(|state| HistoryRing::new(state).select(direction));
        entry.map(|entry| (entry, state))
    }
}
