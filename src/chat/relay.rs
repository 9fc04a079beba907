// Streaming chat-completion relay
//
// Turns each finalized utterance into a streaming completion call and
// relays the token deltas as they arrive. The history mutation protocol
// is strict: append the user turn up front, and roll it back whenever
// the call fails or produces nothing, so a caller may resubmit the same
// utterance.

use anyhow::{Context, Result};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::history::{ChatHistory, ChatTurn, Role};
use crate::error::PipelineError;

/// Completion endpoint parameters.
#[derive(Debug, Clone)]
pub struct CompletionConfig {
    /// Base URL, e.g. "https://api.example.com/v1"
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub system_prompt: String,
    pub temperature: f32,
    pub max_tokens: u32,
    /// History cap N; compression kicks in past 2*N turns
    pub max_turns: usize,
    pub request_timeout: Duration,
}

/// Incremental output from one completion call.
#[derive(Debug, Clone)]
pub enum RelayEvent {
    /// One incremental token (or token group) of the answer.
    Delta(String),
    /// The full accumulated answer.
    Complete(String),
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    stream: bool,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Deserialize)]
struct StreamChunk {
    choices: Vec<StreamChoice>,
}

#[derive(Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
}

#[derive(Deserialize, Default)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: String,
}

/// Splits a raw SSE byte stream into complete lines.
///
/// Network chunks can end mid-line and mid-character, so bytes are
/// buffered and split on `\n` first; UTF-8 decoding happens per complete
/// line. A multi-byte character split across two chunks is reassembled
/// before decoding instead of turning into replacement characters.
#[derive(Debug, Default)]
pub struct SseLineBuffer {
    buf: Vec<u8>,
}

impl SseLineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk; returns the complete, trimmed lines it closed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(chunk);
        let mut lines = Vec::new();
        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let rest = self.buf.split_off(pos + 1);
            let line = std::mem::replace(&mut self.buf, rest);
            lines.push(String::from_utf8_lossy(&line).trim().to_string());
        }
        lines
    }
}

pub struct CompletionRelay {
    client: reqwest::Client,
    config: CompletionConfig,
    history: ChatHistory,
}

impl CompletionRelay {
    pub fn new(config: CompletionConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .context("failed to build HTTP client")?;
        let history = ChatHistory::new(config.max_turns);
        Ok(Self {
            client,
            config,
            history,
        })
    }

    pub fn history(&self) -> &ChatHistory {
        &self.history
    }

    /// Handle one finalized utterance: append it as a user turn, stream
    /// the completion, relay deltas, and record the assistant turn.
    /// Errors roll the user turn back and are classified; no auto-retry.
    pub async fn respond(
        &mut self,
        utterance: &str,
        deltas: &mpsc::UnboundedSender<RelayEvent>,
    ) -> Result<String, PipelineError> {
        self.compress_if_needed().await;

        self.history.push_user(utterance);

        match self.stream_completion(deltas).await {
            Ok(answer) if answer.is_empty() => {
                debug!("completion produced no content, rolling back user turn");
                self.history.rollback_user();
                Ok(String::new())
            }
            Ok(answer) => {
                self.history.push_assistant(answer.clone());
                let _ = deltas.send(RelayEvent::Complete(answer.clone()));
                Ok(answer)
            }
            Err(err) => {
                self.history.rollback_user();
                Err(err)
            }
        }
    }

    async fn stream_completion(
        &self,
        deltas: &mpsc::UnboundedSender<RelayEvent>,
    ) -> Result<String, PipelineError> {
        let request = ChatRequest {
            model: &self.config.model,
            messages: self.build_messages(self.history.turns()),
            stream: true,
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
        };

        let endpoint = format!(
            "{}/chat/completions",
            self.config.base_url.trim_end_matches('/')
        );
        let response = self
            .client
            .post(&endpoint)
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .json(&request)
            .send()
            .await
            .map_err(classify_transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_http_status(status, &body));
        }

        let mut accumulated = String::new();
        let mut lines = SseLineBuffer::new();
        let mut stream = response.bytes_stream();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(classify_transport_error)?;

            for line in lines.push(&chunk) {
                let Some(data) = line.strip_prefix("data: ") else {
                    continue;
                };
                if data == "[DONE]" {
                    return Ok(accumulated);
                }
                match serde_json::from_str::<StreamChunk>(data) {
                    Ok(parsed) => {
                        if let Some(token) = parsed
                            .choices
                            .first()
                            .and_then(|c| c.delta.content.as_deref())
                        {
                            accumulated.push_str(token);
                            let _ = deltas.send(RelayEvent::Delta(token.to_string()));
                        }
                    }
                    Err(e) => {
                        warn!("unparseable stream event: {} ({})", data, e);
                    }
                }
            }
        }

        // Stream ended without an explicit [DONE]; treat what we have as
        // the full answer.
        Ok(accumulated)
    }

    fn build_messages<'a>(&'a self, turns: &'a [ChatTurn]) -> Vec<ChatMessage<'a>> {
        let mut messages = Vec::with_capacity(turns.len() + 1);
        if !self.config.system_prompt.is_empty() {
            messages.push(ChatMessage {
                role: "system",
                content: &self.config.system_prompt,
            });
        }
        for turn in turns {
            messages.push(ChatMessage {
                role: match turn.role {
                    Role::User => "user",
                    Role::Assistant => "assistant",
                },
                content: &turn.content,
            });
        }
        messages
    }

    /// Fold the oldest history turns into one synthetic summary turn
    /// via a lightweight secondary completion; hard-truncate when the
    /// summarization call fails.
    async fn compress_if_needed(&mut self) {
        if !self.history.needs_compression() {
            return;
        }

        let transcript: String = self
            .history
            .compressible()
            .iter()
            .map(|t| {
                format!(
                    "{}: {}\n",
                    match t.role {
                        Role::User => "User",
                        Role::Assistant => "Assistant",
                    },
                    t.content
                )
            })
            .collect();

        match self.summarize(&transcript).await {
            Ok(summary) => {
                info!(
                    "compressed {} history turns into a summary",
                    self.history.compressible().len()
                );
                self.history
                    .apply_summary(format!("(Earlier conversation summary) {}", summary));
            }
            Err(e) => {
                warn!("history summarization failed, truncating: {:#}", e);
                self.history.truncate_hard();
            }
        }
    }

    async fn summarize(&self, transcript: &str) -> Result<String> {
        let prompt = format!(
            "Summarize the following conversation in a few sentences, \
             keeping facts the assistant may need later:\n\n{}",
            transcript
        );
        let request = ChatRequest {
            model: &self.config.model,
            messages: vec![ChatMessage {
                role: "user",
                content: &prompt,
            }],
            stream: false,
            temperature: 0.2,
            max_tokens: 256,
        };

        let endpoint = format!(
            "{}/chat/completions",
            self.config.base_url.trim_end_matches('/')
        );
        let response = self
            .client
            .post(&endpoint)
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .json(&request)
            .send()
            .await
            .context("summarization request failed")?;

        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("summarization returned {}", status);
        }

        let body: ChatResponse = response
            .json()
            .await
            .context("malformed summarization response")?;
        body.choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .context("summarization response has no choices")
    }
}

fn classify_transport_error(e: reqwest::Error) -> PipelineError {
    if e.is_timeout() || e.is_connect() || e.is_request() {
        PipelineError::TransientNetwork(e.to_string())
    } else {
        PipelineError::unclassified(e.to_string())
    }
}

fn classify_http_status(status: reqwest::StatusCode, body: &str) -> PipelineError {
    match status.as_u16() {
        401 | 403 => PipelineError::ConfigMissing("completion credentials rejected".into()),
        429 => PipelineError::ProviderQuotaExceeded,
        500..=599 => PipelineError::TransientNetwork(format!("completion endpoint {}", status)),
        _ => PipelineError::unclassified(format!("completion error {}: {}", status, body)),
    }
}
