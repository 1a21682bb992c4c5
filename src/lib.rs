//! Study Companion
//!
//! A retrieval-augmented chat assistant. `/learn <text>` saves a note as a
//! vector embedding; any other message recalls the closest notes and grounds
//! a streamed model answer in them.
//!
//! # Architecture
//!
//! - **Server**: Axum-based HTTP ingress with SSE streaming
//! - **Dispatch**: Learn/recall mode selection and prompt assembly
//! - **Notes**: Note store over a vector index (Vectorize or in-memory)
//! - **Embedding**: Workers AI or OpenAI-compatible embedding services
//! - **LLM**: Streaming Chat Completions generation
//!
//! # Modules
//!
//! - [`config`]: Layered configuration (file, env, CLI)
//! - [`dispatch`]: Turn dispatcher and persona prompts
//! - [`embedding`]: Embedder trait and providers
//! - [`llm`]: Chat turn model, driver trait and generator
//! - [`normalized`]: Unified streaming event model
//! - [`notes`]: Note store and vector index backends
//! - [`server`]: HTTP routes and middleware
//! - [`session`]: Per-session turn history

// Allow pedantic clippy warnings that don't add value for this codebase
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::missing_fields_in_debug)]
#![allow(clippy::match_same_arms)]
#![allow(clippy::cargo_common_metadata)]
#![allow(clippy::multiple_crate_versions)]
#![allow(clippy::unused_async)]
#![allow(clippy::missing_errors_doc)]

pub mod cloudflare;
pub mod config;
pub mod dispatch;
pub mod embedding;
pub mod llm;
pub mod normalized;
pub mod notes;
pub mod server;
pub mod session;
pub mod telemetry;

use crate::config::AppConfig;
use crate::server::rate_limit::SimpleRateLimiter;

use dispatch::TurnDispatcher;
use session::SessionStore;
use std::sync::Arc;

/// Application state shared across all handlers.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Turn dispatcher.
    pub dispatcher: Arc<TurnDispatcher>,
    /// Session store for turn histories.
    pub sessions: SessionStore,
    /// Global Rate Limiter
    pub rate_limiter: Arc<SimpleRateLimiter>,
    /// Global Configuration
    pub config: Arc<AppConfig>,
}

impl AppState {
    #[must_use]
    pub fn new(config: Arc<AppConfig>, dispatcher: Arc<TurnDispatcher>) -> Self {
        let rate_limiter = Arc::new(SimpleRateLimiter::new(
            config.resilience.requests_per_second,
            config.resilience.burst_size,
        ));
        Self {
            dispatcher,
            sessions: SessionStore::new(),
            rate_limiter,
            config,
        }
    }
}
