//! Chat Completions API driver.
//!
//! This module implements the [`LlmDriver`] trait for OpenAI-compatible Chat
//! Completions endpoints (`/v1/chat/completions`) with `stream: true`.
//! Workers AI exposes the same surface under
//! `https://api.cloudflare.com/client/v4/accounts/{account}/ai`.

use std::pin::Pin;

use futures::{Stream, StreamExt};

use crate::normalized::NormalizedEvent;

use super::{LlmDriver, LlmRequest, LlmSettings};

/// Driver for the Chat Completions API.
///
/// Connects to `/v1/chat/completions` and streams responses as
/// [`NormalizedEvent`]s.
#[derive(Clone)]
pub struct ChatCompletionsDriver {
    http: reqwest::Client,
    settings: LlmSettings,
}

impl std::fmt::Debug for ChatCompletionsDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatCompletionsDriver")
            .field("settings", &self.settings)
            .finish()
    }
}

impl ChatCompletionsDriver {
    /// Create a new Chat Completions driver with the given settings.
    #[must_use]
    pub fn new(settings: LlmSettings) -> Self {
        Self {
            http: reqwest::Client::new(),
            settings,
        }
    }

    fn url(&self) -> String {
        format!(
            "{}/v1/chat/completions",
            self.settings.base_url.trim_end_matches('/')
        )
    }
}

#[async_trait::async_trait]
impl LlmDriver for ChatCompletionsDriver {
    async fn stream(
        &self,
        req: LlmRequest,
    ) -> anyhow::Result<Pin<Box<dyn Stream<Item = anyhow::Result<NormalizedEvent>> + Send>>> {
        let body = serde_json::json!({
            "model": self.settings.model,
            "stream": true,
            "messages": req.messages,
        });

        let mut rb = self.http.post(self.url()).json(&body);
        if let Some(k) = &self.settings.api_key {
            rb = rb.bearer_auth(k);
        }

        let resp = rb.send().await?;
        let status = resp.status();
        if !status.is_success() {
            let detail = resp.text().await.unwrap_or_default();
            anyhow::bail!("generation service returned {status}: {detail}");
        }
        let byte_stream = resp.bytes_stream();

        let out = async_stream::try_stream! {
            let mut buf = Vec::<u8>::new();
            let mut finished = false;

            futures::pin_mut!(byte_stream);
            while let Some(chunk) = byte_stream.next().await {
                let chunk = chunk?;
                buf.extend(chunk.iter().filter(|b| **b != b'\r'));

                while let Some(pos) = find_double_newline(&buf) {
                    let frame = buf.drain(..pos + 2).collect::<Vec<_>>();
                    let text = String::from_utf8_lossy(&frame);

                    for line in text.lines() {
                        let line = line.trim();
                        let Some(data) = line.strip_prefix("data:") else {
                            continue;
                        };
                        let data = data.trim();

                        if data == "[DONE]" {
                            finished = true;
                            yield NormalizedEvent::Done;
                            continue;
                        }

                        let v: serde_json::Value = serde_json::from_str(data)?;
                        if let Some(message) = v.get("error").and_then(|e| e.get("message")).and_then(|m| m.as_str()) {
                            Err::<(), _>(anyhow::anyhow!("generation service error: {message}"))?;
                        }

                        let delta = &v["choices"][0]["delta"];
                        if let Some(s) = delta.get("content").and_then(|x| x.as_str()) {
                            if !s.is_empty() {
                                yield NormalizedEvent::MessageDelta { text: s.to_string() };
                            }
                        }
                    }
                }
            }

            if !finished {
                tracing::debug!("Chat completions stream closed without [DONE]");
                yield NormalizedEvent::Done;
            }
        };

        Ok(Box::pin(out))
    }
}

/// Find the position of a double newline in the buffer.
fn find_double_newline(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::Message;
    use axum::{Router, routing::post};

    async fn serve(body: &'static str) -> String {
        let app = Router::new().route(
            "/v1/chat/completions",
            post(move || async move { ([("content-type", "text/event-stream")], body) }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn driver(base_url: String) -> ChatCompletionsDriver {
        ChatCompletionsDriver::new(LlmSettings {
            base_url,
            api_key: None,
            model: "test-model".to_string(),
        })
    }

    #[test]
    fn test_find_double_newline() {
        assert_eq!(find_double_newline(b"data: x\n\nrest"), Some(7));
        assert_eq!(find_double_newline(b"data: x\n"), None);
    }

    #[tokio::test]
    async fn test_streams_deltas_until_done() {
        let base = serve(
            "data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\r\n\r\n\
             data: {\"choices\":[{\"delta\":{\"content\":\"lo\"}}]}\n\n\
             data: {\"choices\":[{\"delta\":{}}]}\n\n\
             data: [DONE]\n\n",
        )
        .await;

        let stream = driver(base)
            .stream(LlmRequest {
                messages: vec![Message::user("hi")],
            })
            .await
            .unwrap();
        let events: Vec<_> = stream.map(|e| e.unwrap()).collect().await;

        assert_eq!(
            events,
            vec![
                NormalizedEvent::MessageDelta {
                    text: "Hel".to_string()
                },
                NormalizedEvent::MessageDelta {
                    text: "lo".to_string()
                },
                NormalizedEvent::Done,
            ]
        );
    }

    #[tokio::test]
    async fn test_missing_done_still_terminates() {
        let base = serve("data: {\"choices\":[{\"delta\":{\"content\":\"ok\"}}]}\n\n").await;

        let stream = driver(base)
            .stream(LlmRequest { messages: vec![] })
            .await
            .unwrap();
        let events: Vec<_> = stream.map(|e| e.unwrap()).collect().await;

        assert_eq!(events.last(), Some(&NormalizedEvent::Done));
    }

    #[tokio::test]
    async fn test_unreachable_service_fails() {
        let result = driver("http://127.0.0.1:9".to_string())
            .stream(LlmRequest { messages: vec![] })
            .await;
        assert!(result.is_err());
    }
}
