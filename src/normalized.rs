//! Normalized event types for streamed turn responses.
//!
//! Every turn answer, whether a learn confirmation or a recall answer, is
//! delivered to the client as a sequence of [`NormalizedEvent`]s framed as
//! Server-Sent Events.
//!
//! # Event Types
//!
//! - Stream lifecycle (start, done, error)
//! - Note store activity (note saved, notes recalled)
//! - Message deltas for incremental text output
//!
//! # Example
//!
//! ```rust
//! use study_companion::normalized::{NormalizedEvent, event_name};
//!
//! let event = NormalizedEvent::MessageDelta {
//!     text: "Hello".to_string(),
//! };
//! assert_eq!(event_name(&event), "message.delta");
//! ```

use axum::response::sse::Event;
use serde::{Deserialize, Serialize};

/// Normalized streaming events emitted while answering a turn.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "data")]
pub enum NormalizedEvent {
    // ─────────────────────────────────────────────────────────────────────
    // Stream Lifecycle
    // ─────────────────────────────────────────────────────────────────────
    /// Indicates the start of a new streaming response.
    #[serde(rename = "stream.start")]
    StreamStart {
        /// Unique identifier for this request/response pair.
        request_id: String,
    },

    // ─────────────────────────────────────────────────────────────────────
    // Note Store
    // ─────────────────────────────────────────────────────────────────────
    /// A learn command persisted a new note.
    #[serde(rename = "note.saved")]
    NoteSaved {
        /// Identifier of the stored note.
        id: String,
    },

    /// Notes were retrieved to ground a recall answer.
    #[serde(rename = "notes.recalled")]
    NotesRecalled {
        /// Number of notes placed in the context block.
        count: usize,
    },

    // ─────────────────────────────────────────────────────────────────────
    // Message Content
    // ─────────────────────────────────────────────────────────────────────
    /// Incremental text delta from the assistant's response.
    #[serde(rename = "message.delta")]
    MessageDelta {
        /// The text fragment to append.
        text: String,
    },

    // ─────────────────────────────────────────────────────────────────────
    // Errors and Completion
    // ─────────────────────────────────────────────────────────────────────
    /// An error occurred while answering the turn.
    #[serde(rename = "error")]
    Error {
        /// Error message.
        message: String,
        /// Optional error code for programmatic handling.
        #[serde(skip_serializing_if = "Option::is_none")]
        code: Option<String>,
    },

    /// Stream has completed.
    #[serde(rename = "done")]
    Done,
}

impl NormalizedEvent {
    /// Build an error event with a code.
    #[must_use]
    pub fn error(message: impl Into<String>, code: &str) -> Self {
        Self::Error {
            message: message.into(),
            code: Some(code.to_string()),
        }
    }
}

/// Get the SSE event name for a [`NormalizedEvent`].
pub fn event_name(evt: &NormalizedEvent) -> &'static str {
    match evt {
        NormalizedEvent::StreamStart { .. } => "stream.start",
        NormalizedEvent::NoteSaved { .. } => "note.saved",
        NormalizedEvent::NotesRecalled { .. } => "notes.recalled",
        NormalizedEvent::MessageDelta { .. } => "message.delta",
        NormalizedEvent::Error { .. } => "error",
        NormalizedEvent::Done => "done",
    }
}

/// Convert a [`NormalizedEvent`] to an SSE [`Event`].
///
/// The event carries both an `event:` name (for `EventSource` listeners) and
/// a `data:` line containing the JSON payload.
pub fn sse_event(evt: &NormalizedEvent) -> Event {
    let json = serde_json::to_string(evt).unwrap_or_else(|e| {
        serde_json::json!({ "type": "error", "data": { "message": e.to_string() } }).to_string()
    });

    Event::default().event(event_name(evt)).data(json)
}
