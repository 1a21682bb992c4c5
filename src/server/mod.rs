//! HTTP ingress.
//!
//! Routes:
//!
//! - `/check-open-ai-key`: liveness check, always `{"success": true}`
//! - `POST /agents/chat/{session}`: answer one turn as SSE
//! - `GET /agents/chat/{session}/get-messages`: turn history
//! - `POST /agents/chat/{session}/connect`: greeting for a new connection
//! - `DELETE /agents/chat/{session}`: drop a session
//!
//! Everything else is `404 Not found`. The key check sits outside the rate limit
//! and timeout layers.

pub mod rate_limit;

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Json, Router,
    extract::{Path, Request, State},
    http::StatusCode,
    middleware::Next,
    response::{
        IntoResponse, Response,
        sse::{KeepAlive, Sse},
    },
    routing::{any, get, post},
};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;
use uuid::Uuid;

use crate::AppState;
use crate::config::AppConfig;
use crate::dispatch::{TurnDispatcher, TurnOptions};
use crate::llm::{ChatTurn, ContentPart};
use crate::normalized::{NormalizedEvent, sse_event};

/// Build the application router.
pub fn build_router(state: AppState) -> Router {
    let timeout_duration = if state.config.resilience.timeout_disabled {
        Duration::from_secs(365 * 24 * 60 * 60) // 1 year
    } else {
        Duration::from_secs(state.config.resilience.request_timeout_secs)
    };

    // Only the time to first byte is bounded; SSE bodies stream past it.
    // The agent segment is literal so other agent names reach the fallback
    // before any body extractor runs.
    let agents = Router::new()
        .route(
            "/agents/chat/{session}",
            post(chat_turn).delete(drop_session).fallback(not_found),
        )
        .route(
            "/agents/chat/{session}/get-messages",
            get(get_messages).fallback(not_found),
        )
        .route(
            "/agents/chat/{session}/connect",
            post(connect).fallback(not_found),
        )
        .layer(axum::middleware::from_fn(
            move |req: Request, next: Next| async move {
                match tokio::time::timeout(timeout_duration, next.run(req)).await {
                    Ok(res) => res,
                    Err(_) => (StatusCode::REQUEST_TIMEOUT, "Request timed out").into_response(),
                }
            },
        ))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            rate_limit::rate_limit_middleware,
        ));

    Router::new()
        .route("/check-open-ai-key", any(check_key))
        .merge(agents)
        .fallback(not_found)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

/// Start the server with the provided configuration.
pub async fn start_server(config: Arc<AppConfig>) -> anyhow::Result<()> {
    info!(
        name: "llm.config.loaded",
        base_url = config.llm.base_url().as_deref().unwrap_or_default(),
        model = %config.llm.model,
        "LLM configuration loaded"
    );

    let dispatcher = Arc::new(TurnDispatcher::from_config(&config)?);
    let state = AppState::new(Arc::clone(&config), dispatcher);
    let reaper = state.sessions.spawn_reaper(Duration::from_secs(
        config.server.session_idle_timeout_secs,
    ));

    let app = build_router(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    info!(
        name: "server.started",
        address = %addr,
        "Server started"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    reaper.abort();
    info!(name: "server.stopped", "Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

// ─────────────────────────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────────────────────────

/// Request body for one chat turn.
///
/// Either `parts` or the `message` shorthand; `parts` wins when both are set.
#[derive(Debug, Default, Deserialize)]
struct TurnRequest {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    parts: Vec<ContentPart>,
}

impl TurnRequest {
    fn into_turn(self) -> ChatTurn {
        if !self.parts.is_empty() {
            return ChatTurn::user(self.parts);
        }
        match self.message {
            Some(text) => ChatTurn::user_text(text),
            None => ChatTurn::user(Vec::new()),
        }
    }
}

/// Greeting sent on connect.
#[derive(Debug, Serialize)]
struct Greeting {
    role: &'static str,
    content: String,
}

async fn check_key() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "success": true }))
}

async fn not_found() -> Response {
    (StatusCode::NOT_FOUND, "Not found").into_response()
}

/// POST /agents/chat/{session} - answer one turn.
async fn chat_turn(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(req): Json<TurnRequest>,
) -> Response {
    let session = state.sessions.get_or_create(&session_id);
    let turn_guard = session.begin_turn().await;
    let turn = req.into_turn();
    let mut history = session.turns();
    history.push(turn.clone());

    let request_id = Uuid::new_v4().to_string();
    tracing::info!(
        request_id = %request_id,
        session_id = %session_id,
        turns = history.len(),
        "Received chat turn"
    );

    // Dropping the response body (client gone) cancels generation.
    let cancel = CancellationToken::new();
    let cancel_on_drop = cancel.clone().drop_guard();
    let sink = session.clone();
    let options = TurnOptions {
        on_finish: Some(Box::new(move |answer| sink.push_turn(answer))),
        cancel: Some(cancel),
    };
    let result = state.dispatcher.dispatch(&history, options).await;
    // A turn that failed before streaming leaves no trace in the history.
    if result.is_ok() {
        session.push_turn(turn);
    }

    let stream = async_stream::stream! {
        let _turn_guard = turn_guard;
        let _cancel_on_drop = cancel_on_drop;

        yield Ok::<_, Infallible>(sse_event(&NormalizedEvent::StreamStart { request_id: request_id.clone() }));

        match result {
            Ok(mut events) => {
                while let Some(event) = events.next().await {
                    yield Ok(sse_event(&event));
                }
            }
            Err(e) => {
                tracing::error!(
                    request_id = %request_id,
                    session_id = %session_id,
                    error = %e,
                    "Turn failed"
                );
                yield Ok(sse_event(&NormalizedEvent::error(e.to_string(), e.code())));
                yield Ok(sse_event(&NormalizedEvent::Done));
            }
        }
    };

    Sse::new(stream)
        .keep_alive(KeepAlive::default())
        .into_response()
}

/// GET /agents/chat/{session}/get-messages - turn history.
async fn get_messages(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Response {
    match state.sessions.get(&session_id) {
        Some(session) => Json(session.turns()).into_response(),
        None => not_found().await,
    }
}

/// POST /agents/chat/{session}/connect - greeting for a new connection.
async fn connect(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Response {
    let session = state.sessions.get_or_create(&session_id);
    tracing::debug!(session_id = %session.id(), "Client connected");
    Json(Greeting {
        role: "assistant",
        content: state.dispatcher.persona().greeting.clone(),
    })
    .into_response()
}

/// DELETE /agents/chat/{session} - drop a session.
async fn drop_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Response {
    match state.sessions.remove(&session_id) {
        Some(_) => {
            info!(name: "session.removed", session_id = %session_id, "Session removed");
            StatusCode::NO_CONTENT.into_response()
        }
        None => not_found().await,
    }
}
