//! OpenAI-compatible streaming token source.
//!
//! Posts the assembled context to `/v1/chat/completions` with
//! `stream: true` and yields `choices[0].delta.content` as fragments. Works
//! with OpenAI, Ollama, LM Studio, vLLM and other compatible servers.

use std::collections::VecDeque;
use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use tracing::{debug, info};

use super::sse::SseLineParser;
use super::{FragmentStream, TokenSource};
use crate::config::SourceConfig;
use crate::context::ChatMessage;
use crate::error::SourceError;

/// Token source backed by an OpenAI-compatible HTTP API.
pub struct ApiTokenSource {
    client: reqwest::Client,
    config: SourceConfig,
}

impl ApiTokenSource {
    pub fn new(config: SourceConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }

    /// Use an existing HTTP client (shared connection pool).
    pub fn with_client(client: reqwest::Client, config: SourceConfig) -> Self {
        Self { client, config }
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/v1/chat/completions",
            self.config.api_url.trim_end_matches('/')
        )
    }

    fn request_body(&self, messages: &[ChatMessage]) -> serde_json::Value {
        let messages: Vec<serde_json::Value> = messages
            .iter()
            .map(|m| {
                serde_json::json!({
                    "role": m.role.wire_role(),
                    "content": m.content,
                })
            })
            .collect();
        serde_json::json!({
            "model": self.config.api_model,
            "messages": messages,
            "temperature": self.config.temperature,
            "max_tokens": self.config.max_tokens,
            "stream": true,
        })
    }
}

/// Extract an error message from an error response body.
fn extract_error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| {
            v.get("error")
                .and_then(|e| e.get("message"))
                .and_then(|m| m.as_str())
                .map(String::from)
        })
        .unwrap_or_else(|| body.to_owned())
}

/// Text delta carried by one completion chunk, if any.
pub fn parse_chunk(data: &str) -> Result<Option<String>, SourceError> {
    let parsed: serde_json::Value =
        serde_json::from_str(data).map_err(|e| SourceError::Malformed(e.to_string()))?;
    if let Some(message) = parsed
        .get("error")
        .and_then(|e| e.get("message"))
        .and_then(|m| m.as_str())
    {
        return Err(SourceError::Malformed(message.to_owned()));
    }
    Ok(parsed
        .pointer("/choices/0/delta/content")
        .and_then(|c| c.as_str())
        .filter(|c| !c.is_empty())
        .map(String::from))
}

#[async_trait]
impl TokenSource for ApiTokenSource {
    fn name(&self) -> &str {
        "openai-compatible"
    }

    async fn open(&self, messages: &[ChatMessage]) -> Result<FragmentStream, SourceError> {
        let url = self.endpoint();
        info!(url = %url, model = %self.config.api_model, messages = messages.len(), "opening completion stream");

        let mut request = self
            .client
            .post(&url)
            .header("Content-Type", "application/json");
        if !self.config.api_key.is_empty() {
            request = request.header("Authorization", format!("Bearer {}", self.config.api_key));
        }

        let response = request
            .json(&self.request_body(messages))
            .send()
            .await
            .map_err(|e| SourceError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SourceError::Http {
                status: status.as_u16(),
                message: extract_error_message(&body),
            });
        }

        Ok(Box::pin(fragment_stream(response.bytes_stream())))
    }
}

struct StreamState {
    bytes: Pin<Box<dyn Stream<Item = Result<Bytes, reqwest::Error>> + Send>>,
    parser: SseLineParser,
    pending: VecDeque<Result<String, SourceError>>,
    finished: bool,
}

impl StreamState {
    fn queue(&mut self, data: &str) {
        match parse_chunk(data) {
            Ok(Some(text)) => self.pending.push_back(Ok(text)),
            Ok(None) => {}
            Err(e) => {
                self.pending.push_back(Err(e));
                self.finished = true;
            }
        }
    }
}

/// Turn a raw SSE byte stream into text fragments.
fn fragment_stream(
    bytes: impl Stream<Item = Result<Bytes, reqwest::Error>> + Send + 'static,
) -> impl Stream<Item = Result<String, SourceError>> + Send {
    futures_util::stream::unfold(
        StreamState {
            bytes: Box::pin(bytes),
            parser: SseLineParser::new(),
            pending: VecDeque::new(),
            finished: false,
        },
        |mut state| async move {
            loop {
                if let Some(item) = state.pending.pop_front() {
                    return Some((item, state));
                }
                if state.finished {
                    return None;
                }
                match state.bytes.next().await {
                    Some(Ok(chunk)) => {
                        for event in state.parser.push(&chunk) {
                            if event.is_done() {
                                debug!("completion stream done");
                                state.finished = true;
                                break;
                            }
                            state.queue(&event.data);
                            if state.finished {
                                break;
                            }
                        }
                    }
                    Some(Err(e)) => {
                        state.finished = true;
                        return Some((Err(SourceError::Transport(e.to_string())), state));
                    }
                    None => {
                        state.finished = true;
                        if let Some(event) = state.parser.flush()
                            && !event.is_done()
                        {
                            state.queue(&event.data);
                        }
                    }
                }
            }
        },
    )
}
