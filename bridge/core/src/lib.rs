//! CodePulse Core - Shared Review Session for Editor and Console Surfaces
//!
//! This crate owns the one review session that every connected surface
//! observes: which persona ran last, how strict the reviewer is, the live
//! streaming text and a short history of completed reviews. It is transport
//! agnostic; the daemon wires it to stdio, other hosts can wire it to sockets.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                          Surfaces                                 │
//! │   ┌──────────┐   ┌──────────┐   ┌──────────┐   ┌──────────────┐  │
//! │   │ Console  │   │   IDE    │   │  Web UI  │   │   Headless   │  │
//! │   │  plugin  │   │  panel   │   │          │   │    tests     │  │
//! │   └────┬─────┘   └────┬─────┘   └────┬─────┘   └──────┬───────┘  │
//! │        └──────────────┴──────┬───────┴────────────────┘          │
//! │              commands (up)   │   ReviewEvent (down)               │
//! └──────────────────────────────┼───────────────────────────────────┘
//!                                │
//! ┌──────────────────────────────┼───────────────────────────────────┐
//! │                     CODEPULSE CORE                                │
//! │  ┌───────────────────────────┴──────────────────────────────┐    │
//! │  │                  ReviewOrchestrator                       │    │
//! │  │  ┌────────────┐ ┌───────────┐ ┌──────────┐ ┌───────────┐ │    │
//! │  │  │SessionStore│ │HistoryRing│ │ Personas │ │ Provider  │ │    │
//! │  │  │            │ │  (10 max) │ │          │ │ + fallback│ │    │
//! │  │  └────────────┘ └───────────┘ └──────────┘ └─────┬─────┘ │    │
//! │  └──────────────────────────────────────────────────┼───────┘    │
//! └─────────────────────────────────────────────────────┼────────────┘
//!                                                       │ HTTPS (SSE)
//!                                              Gemini / Groq
//! ```
//!
//! # Key Types
//!
//! - [`ReviewOrchestrator`]: admits reviews, streams them and records history
//! - [`SessionStore`]: the shared [`SessionState`], patched atomically
//! - [`PersonaCatalog`]: named reviewing stances and their prompts
//! - [`ReviewProvider`]: streaming backend abstraction
//! - [`SubscriberRegistry`]: fan-out of [`ReviewEvent`]s to observers
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use codepulse_core::{
//!     PersonaCatalog, Provider, ProviderConfig, ProviderKind, ReviewOrchestrator,
//!     SubscriberRegistry,
//! };
//!
//! #[tokio::main]
//! async fn main() {
//!     let registry = SubscriberRegistry::new();
//!     let provider = Provider::from_config(
//!         ProviderConfig::new(ProviderKind::Gemini).with_api_key("..."),
//!     );
//!     let bridge = ReviewOrchestrator::new(
//!         provider,
//!         PersonaCatalog::builtin(),
//!         Arc::new(registry.clone()),
//!     );
//!
//!     let (_id, mut events) = registry.subscribe("console", bridge.snapshot());
//!     let accepted = bridge.submit_review("security", Some("eval(input)".into())).unwrap();
//!
//!     while let Some(event) = events.recv().await {
//!         println!("{}", serde_json::to_string(&event).unwrap());
//!         if event.is_terminal() {
//!             break;
//!         }
//!     }
//!     accepted.handle.outcome().await;
//! }
//! ```
//!
//! # Module Overview
//!
//! - [`config`]: TOML/environment configuration loading
//! - [`error`]: admission errors
//! - [`events`]: events sent to surfaces
//! - [`fanout`]: subscriber registry
//! - [`history`]: bounded review history and navigation
//! - [`orchestrator`]: the review state machine
//! - [`persona`]: persona catalog
//! - [`provider`]: Gemini and Groq streaming backends
//! - [`session`]: session state and store

#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod error;
pub mod events;
pub mod fanout;
pub mod history;
pub mod orchestrator;
pub mod persona;
pub mod provider;
pub mod session;

pub use config::{
    default_config_path, load_config, load_config_from_path, load_config_with_env, BridgeConfig,
    BridgeToml, ConfigError, ConfigOverrides, ConfigSource,
};
pub use error::AdmissionError;
pub use events::ReviewEvent;
pub use fanout::{EventSink, SubscriberId, SubscriberRegistry};
pub use history::{
    HistoryEntry, HistoryId, HistoryRing, NavigationDirection, NewHistoryEntry, HISTORY_CAPACITY,
};
pub use orchestrator::{Accepted, ReviewHandle, ReviewOrchestrator, ReviewOutcome, StatusReport};
pub use persona::{PersonaCatalog, PersonaDescriptor, PersonaSummary};
pub use provider::{
    ChunkSink, FallbackPolicy, ModelAttempt, Provider, ProviderConfig, ProviderError,
    ProviderKind, ReviewProvider, ReviewRequest,
};
pub use session::{SessionPatch, SessionState, SessionStore, Strictness};
