//! Generation adapter on top of an [`LlmDriver`].
//!
//! The generator turns [`GenerationParams`] into wire messages, relays the
//! driver's deltas as they arrive and reports the finished answer through an
//! optional completion callback. Failures never escape as `Err`; they become
//! an [`NormalizedEvent::Error`] followed by [`NormalizedEvent::Done`] so the
//! caller always sees a well-formed stream.

use std::sync::Arc;

use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::normalized::NormalizedEvent;

use super::{
    ChatCompletionsDriver, ChatTurn, EventStream, LlmDriver, LlmRequest, LlmSettings, Message,
};

/// Callback invoked with the finished assistant turn.
///
/// Being `FnOnce`, it can fire at most once per generation.
pub type CompletionCallback = Box<dyn FnOnce(ChatTurn) + Send>;

/// What the model is asked to continue.
#[derive(Debug, Clone)]
pub enum GenerationInput {
    /// A single ad-hoc prompt, sent as one user message.
    Prompt(String),
    /// An ordered turn history.
    History(Vec<ChatTurn>),
}

/// Parameters for one generation.
pub struct GenerationParams {
    /// Optional system text, sent first.
    pub system: Option<String>,
    /// Prompt or history.
    pub input: GenerationInput,
    /// Fired once with the finished message when generation completes.
    pub on_finish: Option<CompletionCallback>,
    /// Ends the stream early when cancelled.
    pub cancel: Option<CancellationToken>,
}

impl std::fmt::Debug for GenerationParams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GenerationParams")
            .field("system", &self.system)
            .field("input", &self.input)
            .field("on_finish", &self.on_finish.is_some())
            .field("cancel", &self.cancel)
            .finish()
    }
}

impl GenerationParams {
    /// Single-shot prompt with no system text and no history.
    #[must_use]
    pub fn prompt(prompt: impl Into<String>) -> Self {
        Self {
            system: None,
            input: GenerationInput::Prompt(prompt.into()),
            on_finish: None,
            cancel: None,
        }
    }

    /// System text plus an ordered turn history.
    #[must_use]
    pub fn history(system: impl Into<String>, turns: Vec<ChatTurn>) -> Self {
        Self {
            system: Some(system.into()),
            input: GenerationInput::History(turns),
            on_finish: None,
            cancel: None,
        }
    }

    /// Attach a completion callback.
    #[must_use]
    pub fn on_finish(mut self, callback: Option<CompletionCallback>) -> Self {
        self.on_finish = callback;
        self
    }

    /// Attach a cancellation token.
    #[must_use]
    pub fn cancel(mut self, token: Option<CancellationToken>) -> Self {
        self.cancel = token;
        self
    }

    fn messages(system: Option<String>, input: GenerationInput) -> Vec<Message> {
        let mut messages = Vec::new();
        if let Some(system) = system {
            messages.push(Message::system(system));
        }
        match input {
            GenerationInput::Prompt(prompt) => messages.push(Message::user(prompt)),
            GenerationInput::History(turns) => {
                messages.extend(turns.iter().filter_map(ChatTurn::to_message));
            }
        }
        messages
    }
}

/// Streaming text generator.
#[derive(Clone)]
pub struct Generator {
    settings: LlmSettings,
    driver: Arc<dyn LlmDriver>,
}

impl std::fmt::Debug for Generator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Generator")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl Generator {
    /// Create a generator backed by the Chat Completions driver.
    #[must_use]
    pub fn new(settings: LlmSettings) -> Self {
        let driver: Arc<dyn LlmDriver> = Arc::new(ChatCompletionsDriver::new(settings.clone()));
        Self { settings, driver }
    }

    /// Create a generator with an explicit driver.
    #[must_use]
    pub fn with_driver(settings: LlmSettings, driver: Arc<dyn LlmDriver>) -> Self {
        Self { settings, driver }
    }

    /// Get the LLM settings.
    #[must_use]
    pub fn settings(&self) -> &LlmSettings {
        &self.settings
    }

    /// Start a generation.
    ///
    /// Returns a stream of [`NormalizedEvent`]s:
    /// - `MessageDelta` for each fragment of assistant text
    /// - `Error` if the service fails (no completion callback in that case)
    /// - `Done` at the end, also after an error or a cancellation
    pub fn generate(&self, params: GenerationParams) -> EventStream {
        let GenerationParams {
            system,
            input,
            on_finish,
            cancel,
        } = params;
        let generation_id = Uuid::new_v4().to_string();
        let messages = GenerationParams::messages(system, input);
        let cancel = cancel.unwrap_or_default();
        let driver = Arc::clone(&self.driver);
        let model = self.settings.model.clone();

        tracing::info!(
            generation_id = %generation_id,
            model = %model,
            message_count = messages.len(),
            "Starting generation"
        );
        for (idx, msg) in messages.iter().enumerate() {
            tracing::debug!(
                generation_id = %generation_id,
                message_index = idx,
                role = ?msg.role,
                content_length = msg.content.len(),
                "Generation message"
            );
        }

        let stream = async_stream::stream! {
            let started = tokio::select! {
                biased;
                () = cancel.cancelled() => None,
                res = driver.stream(LlmRequest { messages }) => Some(res),
            };

            let mut driver_stream = match started {
                None => {
                    tracing::info!(generation_id = %generation_id, "Generation cancelled before start");
                    yield NormalizedEvent::Done;
                    return;
                }
                Some(Err(e)) => {
                    tracing::error!(
                        generation_id = %generation_id,
                        error = %e,
                        "Failed to start generation"
                    );
                    yield NormalizedEvent::error(e.to_string(), "generation_failed");
                    yield NormalizedEvent::Done;
                    return;
                }
                Some(Ok(s)) => s,
            };

            let mut answer = String::new();
            let mut completed = false;

            loop {
                let next = tokio::select! {
                    biased;
                    () = cancel.cancelled() => None,
                    item = driver_stream.next() => Some(item),
                };

                match next {
                    None => {
                        tracing::info!(
                            generation_id = %generation_id,
                            answer_length = answer.len(),
                            "Generation cancelled"
                        );
                        break;
                    }
                    Some(None) | Some(Some(Ok(NormalizedEvent::Done))) => {
                        completed = true;
                        break;
                    }
                    Some(Some(Ok(NormalizedEvent::MessageDelta { text }))) => {
                        tracing::trace!(generation_id = %generation_id, delta_length = text.len(), "Message delta");
                        answer.push_str(&text);
                        yield NormalizedEvent::MessageDelta { text };
                    }
                    Some(Some(Ok(other))) => yield other,
                    Some(Some(Err(e))) => {
                        tracing::error!(
                            generation_id = %generation_id,
                            error = %e,
                            "Generation stream failed"
                        );
                        yield NormalizedEvent::error(e.to_string(), "generation_failed");
                        break;
                    }
                }
            }

            if completed {
                tracing::info!(
                    generation_id = %generation_id,
                    answer_length = answer.len(),
                    "Generation complete"
                );
                if let Some(callback) = on_finish {
                    callback(ChatTurn::assistant(answer));
                }
            }

            yield NormalizedEvent::Done;
        };

        Box::pin(stream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{MessageRole, TurnRole};
    use futures::Stream;
    use std::pin::Pin;
    use std::sync::Mutex;

    /// Driver that replays a fixed script and records what it was sent.
    struct ScriptDriver {
        deltas: Vec<&'static str>,
        fail_after: Option<usize>,
        requests: Mutex<Vec<LlmRequest>>,
    }

    impl ScriptDriver {
        fn new(deltas: Vec<&'static str>) -> Self {
            Self {
                deltas,
                fail_after: None,
                requests: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait::async_trait]
    impl LlmDriver for ScriptDriver {
        async fn stream(
            &self,
            req: LlmRequest,
        ) -> anyhow::Result<Pin<Box<dyn Stream<Item = anyhow::Result<NormalizedEvent>> + Send>>>
        {
            self.requests.lock().unwrap().push(req);
            let mut items: Vec<anyhow::Result<NormalizedEvent>> = self
                .deltas
                .iter()
                .map(|d| {
                    Ok(NormalizedEvent::MessageDelta {
                        text: (*d).to_string(),
                    })
                })
                .collect();
            if let Some(n) = self.fail_after {
                items.truncate(n);
                items.push(Err(anyhow::anyhow!("upstream reset")));
            } else {
                items.push(Ok(NormalizedEvent::Done));
            }
            Ok(Box::pin(futures::stream::iter(items)))
        }
    }

    fn settings() -> LlmSettings {
        LlmSettings {
            base_url: "http://localhost".to_string(),
            api_key: None,
            model: "test-model".to_string(),
        }
    }

    #[tokio::test]
    async fn test_prompt_mode_sends_single_user_message() {
        let driver = Arc::new(ScriptDriver::new(vec!["ok"]));
        let generator = Generator::with_driver(settings(), driver.clone());

        let _: Vec<_> = generator
            .generate(GenerationParams::prompt("confirm"))
            .collect()
            .await;

        let requests = driver.requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].messages, vec![Message::user("confirm")]);
    }

    #[tokio::test]
    async fn test_history_mode_puts_system_first() {
        let driver = Arc::new(ScriptDriver::new(vec!["ok"]));
        let generator = Generator::with_driver(settings(), driver.clone());
        let turns = vec![
            ChatTurn::user_text("q1"),
            ChatTurn::assistant("a1"),
            ChatTurn::user_text("q2"),
        ];

        let _: Vec<_> = generator
            .generate(GenerationParams::history("sys", turns))
            .collect()
            .await;

        let requests = driver.requests.lock().unwrap();
        let roles: Vec<_> = requests[0].messages.iter().map(|m| m.role).collect();
        assert_eq!(
            roles,
            vec![
                MessageRole::System,
                MessageRole::User,
                MessageRole::Assistant,
                MessageRole::User
            ]
        );
        assert_eq!(requests[0].messages[0].content, "sys");
    }

    #[tokio::test]
    async fn test_callback_receives_full_answer_once() {
        let driver = Arc::new(ScriptDriver::new(vec!["Hel", "lo"]));
        let generator = Generator::with_driver(settings(), driver);
        let finished = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&finished);

        let events: Vec<_> = generator
            .generate(
                GenerationParams::prompt("p")
                    .on_finish(Some(Box::new(move |turn| sink.lock().unwrap().push(turn)))),
            )
            .collect()
            .await;

        assert_eq!(events.last(), Some(&NormalizedEvent::Done));
        let finished = finished.lock().unwrap();
        assert_eq!(finished.len(), 1);
        assert_eq!(finished[0].role, TurnRole::Assistant);
        assert_eq!(finished[0].text(), "Hello");
    }

    #[tokio::test]
    async fn test_failure_emits_error_and_skips_callback() {
        let mut driver = ScriptDriver::new(vec!["a", "b"]);
        driver.fail_after = Some(1);
        let generator = Generator::with_driver(settings(), Arc::new(driver));
        let called = Arc::new(Mutex::new(false));
        let flag = Arc::clone(&called);

        let events: Vec<_> = generator
            .generate(
                GenerationParams::prompt("p")
                    .on_finish(Some(Box::new(move |_| *flag.lock().unwrap() = true))),
            )
            .collect()
            .await;

        assert!(events.iter().any(|e| matches!(
            e,
            NormalizedEvent::Error { code: Some(code), .. } if code == "generation_failed"
        )));
        assert_eq!(events.last(), Some(&NormalizedEvent::Done));
        assert!(!*called.lock().unwrap());
    }

    #[tokio::test]
    async fn test_cancelled_generation_skips_callback() {
        let driver = Arc::new(ScriptDriver::new(vec!["never"]));
        let generator = Generator::with_driver(settings(), driver);
        let token = CancellationToken::new();
        token.cancel();
        let called = Arc::new(Mutex::new(false));
        let flag = Arc::clone(&called);

        let events: Vec<_> = generator
            .generate(
                GenerationParams::prompt("p")
                    .cancel(Some(token))
                    .on_finish(Some(Box::new(move |_| *flag.lock().unwrap() = true))),
            )
            .collect()
            .await;

        assert_eq!(events, vec![NormalizedEvent::Done]);
        assert!(!*called.lock().unwrap());
    }
}
