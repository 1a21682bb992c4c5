//! Turn dispatcher.
//!
//! Looks at the latest user turn and picks one of two modes:
//!
//! - **Learn**: the text starts with the learn command followed by a space.
//!   The remainder is saved as a note, then the model is asked for a short
//!   confirmation. The history is not replayed.
//! - **Recall**: anything else. The closest notes are retrieved and embedded
//!   in the persona's system prompt, and the model answers with the full
//!   turn history.
//!
//! Note store failures fail the turn before any event is produced. Once a
//! stream is returned, generation failures travel inside it as error events.

pub mod prompt;

pub use prompt::{CONTEXT_DELIMITER, NO_MEMORIES, Persona, PersonaPreset, context_block};

use futures::StreamExt;
use tokio_util::sync::CancellationToken;

use crate::config::AppConfig;
use crate::embedding;
use crate::llm::{ChatTurn, CompletionCallback, EventStream, GenerationParams, Generator, TurnRole};
use crate::normalized::NormalizedEvent;
use crate::notes::{self, NoteStore, NoteStoreError};

/// Errors that fail a turn before its stream starts.
#[derive(Debug, thiserror::Error)]
pub enum TurnError {
    #[error("Failed to save note: {0}")]
    Save(#[source] NoteStoreError),

    #[error("Failed to recall notes: {0}")]
    Recall(#[source] NoteStoreError),
}

impl TurnError {
    /// Stable error code for clients.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Save(_) => "save_failed",
            Self::Recall(_) => "recall_failed",
        }
    }
}

/// Mode picked for a user turn, with its payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnMode {
    /// Save the payload as a note.
    Learn(String),
    /// Answer the payload using retrieved notes.
    Recall(String),
}

impl TurnMode {
    /// Exact, case-sensitive match on `command` followed by one space.
    ///
    /// The learn payload is the remainder verbatim, whitespace included.
    #[must_use]
    pub fn select(user_text: &str, command: &str) -> Self {
        match user_text
            .strip_prefix(command)
            .and_then(|rest| rest.strip_prefix(' '))
        {
            Some(payload) => Self::Learn(payload.to_string()),
            None => Self::Recall(user_text.to_string()),
        }
    }
}

/// Per-turn hooks supplied by the caller.
#[derive(Default)]
pub struct TurnOptions {
    /// Fired once with the finished assistant turn.
    pub on_finish: Option<CompletionCallback>,
    /// Ends generation early; the callback is skipped when it fires.
    pub cancel: Option<CancellationToken>,
}

impl std::fmt::Debug for TurnOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TurnOptions")
            .field("on_finish", &self.on_finish.is_some())
            .field("cancel", &self.cancel)
            .finish()
    }
}

/// First text part of the last turn, or `""` when the history is empty or
/// does not end with a user turn.
#[must_use]
pub fn latest_user_text(history: &[ChatTurn]) -> &str {
    match history.last() {
        Some(turn) if turn.role == TurnRole::User => turn.first_text().unwrap_or_default(),
        Some(_) => {
            tracing::warn!("Last turn is not a user turn; treating query as empty");
            ""
        }
        None => {
            tracing::warn!("Empty turn history; treating query as empty");
            ""
        }
    }
}

#[derive(Debug, Clone)]
pub struct TurnDispatcher {
    notes: NoteStore,
    generator: Generator,
    persona: Persona,
}

impl TurnDispatcher {
    pub fn new(notes: NoteStore, generator: Generator, persona: Persona) -> Self {
        Self {
            notes,
            generator,
            persona,
        }
    }

    /// Wire up embedder, index and generator from configuration.
    pub fn from_config(config: &AppConfig) -> anyhow::Result<Self> {
        let embedder = embedding::from_config(&config.embedding)?;
        let index = notes::index_from_config(&config.index)?;
        let generator = Generator::new(config.llm.settings()?);
        Ok(Self::new(
            NoteStore::new(embedder, index),
            generator,
            config.assistant.persona(),
        ))
    }

    #[must_use]
    pub fn persona(&self) -> &Persona {
        &self.persona
    }

    /// Answer the last turn of `history`.
    pub async fn dispatch(
        &self,
        history: &[ChatTurn],
        options: TurnOptions,
    ) -> Result<EventStream, TurnError> {
        let user_text = latest_user_text(history);

        match TurnMode::select(user_text, &self.persona.learn_command) {
            TurnMode::Learn(payload) => self.learn(&payload, options).await,
            TurnMode::Recall(query) => self.recall(&query, history, options).await,
        }
    }

    async fn learn(&self, payload: &str, options: TurnOptions) -> Result<EventStream, TurnError> {
        let id = self.notes.save(payload).await.map_err(TurnError::Save)?;
        tracing::info!(name: "turn.learn", note_id = %id, "Learn turn");

        let params = GenerationParams::prompt(self.persona.confirmation_prompt(payload))
            .on_finish(options.on_finish)
            .cancel(options.cancel);
        let mut confirmation = self.generator.generate(params);

        let stream = async_stream::stream! {
            yield NormalizedEvent::NoteSaved { id: id.clone() };
            while let Some(event) = confirmation.next().await {
                if let NormalizedEvent::Error { message, .. } = &event {
                    tracing::warn!(
                        note_id = %id,
                        error = %message,
                        "Confirmation failed after note was saved"
                    );
                }
                yield event;
            }
        };
        Ok(Box::pin(stream))
    }

    async fn recall(
        &self,
        query: &str,
        history: &[ChatTurn],
        options: TurnOptions,
    ) -> Result<EventStream, TurnError> {
        let found = self
            .notes
            .search(query, self.persona.top_k)
            .await
            .map_err(TurnError::Recall)?;
        let count = found.len();
        tracing::info!(name: "turn.recall", notes = count, "Recall turn");

        let context = context_block(&found);
        let system = self.persona.system_prompt(&context, query);
        let params = GenerationParams::history(system, history.to_vec())
            .on_finish(options.on_finish)
            .cancel(options.cancel);
        let answer = self.generator.generate(params);

        let head = futures::stream::once(async move { NormalizedEvent::NotesRecalled { count } });
        Ok(Box::pin(head.chain(answer)))
    }
}
