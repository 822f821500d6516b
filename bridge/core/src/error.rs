//! Admission Errors
//!
//! Errors returned synchronously to the caller of a bridge operation. Every
//! variant is raised before the session is touched, so a rejected request
//! never leaves a partial patch behind.

use thiserror::Error;

/// Reasons a request is rejected at the door
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AdmissionError {
    /// The persona key is not in the catalog
    #[error("Invalid persona: {0}")]
    InvalidPersona(String),

    /// Neither the request nor the session carries code to review
    #[error("No code to review")]
    NoCodeProvided,

    /// Strictness outside 1..=4
    #[error("Invalid strictness level: {0} (expected 1-4)")]
    InvalidStrictnessLevel(i64),

    /// A review is already streaming
    #[error("A review is already in progress")]
    Busy,
}

impl AdmissionError {
    /// Stable machine-readable code for surfaces
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidPersona(_) => "invalid-persona",
            Self::NoCodeProvided => "no-code-provided",
            Self::InvalidStrictnessLevel(_) => "invalid-strictness-level",
            Self::Busy => "busy",
        }
    }
}
