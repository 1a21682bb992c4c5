//! Text generation adapter.
//!
//! This module provides the chat-turn data model and a streaming interface to
//! an external, OpenAI-compatible text generation service.
//!
//! # Overview
//!
//! The [`LlmDriver`] trait defines the raw streaming interface a backend must
//! support. The [`Generator`] builds on top of a driver: it assembles the wire
//! messages for either a single ad-hoc prompt or a full turn history, relays
//! deltas as they arrive and fires the completion callback once the answer is
//! finished.
//!
//! # Drivers
//!
//! - [`ChatCompletionsDriver`]: Chat Completions API (`/v1/chat/completions`),
//!   which also covers the Workers AI OpenAI-compatible endpoint.
//!
//! # Example
//!
//! ```rust,ignore
//! use study_companion::llm::{GenerationParams, Generator, LlmSettings};
//!
//! let generator = Generator::new(LlmSettings {
//!     base_url: "https://api.openai.com".to_string(),
//!     api_key: Some("sk-...".to_string()),
//!     model: "gpt-4o-mini".to_string(),
//! });
//! let events = generator.generate(GenerationParams::prompt("Say hi"));
//! ```

pub mod chat_completions;
pub mod generator;

pub use chat_completions::ChatCompletionsDriver;
pub use generator::{CompletionCallback, GenerationInput, GenerationParams, Generator};

use std::pin::Pin;

use futures::Stream;
use serde::{Deserialize, Serialize};

use crate::normalized::NormalizedEvent;

/// Boxed stream of normalized events handed back to the ingress.
pub type EventStream = Pin<Box<dyn Stream<Item = NormalizedEvent> + Send>>;

/// Connection and model settings for the generation service.
#[derive(Clone)]
pub struct LlmSettings {
    /// Base URL for the API (e.g., `https://api.openai.com`).
    pub base_url: String,
    /// Optional API key sent as a bearer token.
    pub api_key: Option<String>,
    /// Model identifier (e.g., `@cf/meta/llama-3.3-70b-instruct-fp8-fast`).
    pub model: String,
}

impl std::fmt::Debug for LlmSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmSettings")
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("model", &self.model)
            .finish()
    }
}

/// Author of a chat turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    /// The person chatting with the assistant.
    User,
    /// The assistant.
    Assistant,
}

/// A content part of a chat turn.
///
/// Only text parts are ever consulted; other parts are carried through the
/// history untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    /// Text content.
    Text {
        /// The text content.
        text: String,
    },
    /// Image reference (URL or base64 data URL).
    ImageUrl {
        /// Image URL.
        url: String,
    },
}

impl ContentPart {
    /// Create a text content part.
    #[must_use]
    pub fn text(s: impl Into<String>) -> Self {
        Self::Text { text: s.into() }
    }

    /// Create an image content part.
    #[must_use]
    pub fn image_url(url: impl Into<String>) -> Self {
        Self::ImageUrl { url: url.into() }
    }

    fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text { text } => Some(text),
            Self::ImageUrl { .. } => None,
        }
    }
}

/// One message exchanged in a chat session.
///
/// Turns are created by the transport layer and never modified after they are
/// appended to a session's history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatTurn {
    /// Role of the author.
    pub role: TurnRole,
    /// Ordered content parts.
    #[serde(default)]
    pub parts: Vec<ContentPart>,
}

impl ChatTurn {
    /// Create a user turn from content parts.
    #[must_use]
    pub fn user(parts: Vec<ContentPart>) -> Self {
        Self {
            role: TurnRole::User,
            parts,
        }
    }

    /// Create a user turn holding a single text part.
    #[must_use]
    pub fn user_text(text: impl Into<String>) -> Self {
        Self::user(vec![ContentPart::text(text)])
    }

    /// Create an assistant turn holding a single text part.
    #[must_use]
    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: TurnRole::Assistant,
            parts: vec![ContentPart::text(text)],
        }
    }

    /// The first text part, if any.
    #[must_use]
    pub fn first_text(&self) -> Option<&str> {
        self.parts.iter().find_map(ContentPart::as_text)
    }

    /// All text parts joined with newlines.
    #[must_use]
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(ContentPart::as_text)
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Convert into a wire message. Turns without any text are dropped.
    #[must_use]
    pub fn to_message(&self) -> Option<Message> {
        let content = self.text();
        if content.is_empty() {
            return None;
        }
        let role = match self.role {
            TurnRole::User => MessageRole::User,
            TurnRole::Assistant => MessageRole::Assistant,
        };
        Some(Message { role, content })
    }
}

/// Role of a wire message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// System prompt.
    System,
    /// User message.
    User,
    /// Assistant response.
    Assistant,
}

/// A message as sent to the generation service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Role of the message author.
    pub role: MessageRole,
    /// Plain text content.
    pub content: String,
}

impl Message {
    /// Create a system message.
    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: content.into(),
        }
    }

    /// Create a user message.
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }
}

/// Request to an LLM driver.
#[derive(Debug, Clone)]
pub struct LlmRequest {
    /// Conversation messages, system message first when present.
    pub messages: Vec<Message>,
}

/// Trait for LLM streaming drivers.
///
/// Implementations provide streaming access to model output, emitting
/// [`NormalizedEvent::MessageDelta`] for each fragment and
/// [`NormalizedEvent::Done`] at the end.
#[async_trait::async_trait]
pub trait LlmDriver: Send + Sync {
    /// Stream a response from the LLM.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the connection is interrupted.
    async fn stream(
        &self,
        req: LlmRequest,
    ) -> anyhow::Result<Pin<Box<dyn Stream<Item = anyhow::Result<NormalizedEvent>> + Send>>>;
}
