//! Wire client for OpenAI-compatible `/chat/completions` endpoints.

use super::config::LlmConfig;
use crate::error::LlmError;
use async_trait::async_trait;
use futures_util::{Stream, StreamExt};
use serde::Serialize;
use serde_json::Value;
use std::pin::Pin;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: "system".into(), content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: "user".into(), content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: "assistant".into(), content: content.into() }
    }
}

/// Request body minus the `stream` flag, which the client sets per call.
#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f64,
    pub max_tokens: u32,
    pub top_p: f64,
    pub frequency_penalty: f64,
    pub presence_penalty: f64,
}

impl ChatRequest {
    pub fn new(config: &LlmConfig, messages: Vec<ChatMessage>) -> Self {
        Self {
            model: config.model.clone(),
            messages,
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            top_p: config.top_p,
            frequency_penalty: config.frequency_penalty,
            presence_penalty: config.presence_penalty,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Completion {
    pub text: String,
    pub total_tokens: u64,
}

/// One streamed event: a content delta, a usage report, or both.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Delta {
    pub text: Option<String>,
    pub total_tokens: Option<u64>,
}

pub type DeltaStream = Pin<Box<dyn Stream<Item = Result<Delta, LlmError>> + Send>>;

/// A chat-completion model.
#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn complete(&self, request: &ChatRequest) -> Result<Completion, LlmError>;

    /// Starts a streamed completion. Dropping the stream releases the connection.
    async fn stream(&self, request: &ChatRequest) -> Result<DeltaStream, LlmError>;
}

pub struct OpenAiClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl OpenAiClient {
    pub fn new(config: &LlmConfig) -> Result<Self, LlmError> {
        let api_key = config
            .api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .ok_or(LlmError::MissingCredentials)?;
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base_url: config.base_url().to_string(),
            api_key,
        })
    }

    async fn send(&self, request: &ChatRequest, stream: bool) -> Result<reqwest::Response, LlmError> {
        let mut body = serde_json::to_value(request)
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;
        body["stream"] = Value::Bool(stream);
        if stream {
            body["stream_options"] = serde_json::json!({ "include_usage": true });
        }

        let url = format!("{}/chat/completions", self.base_url);
        tracing::debug!(target: "nianqa::llm", url = %url, model = %request.model, stream, "request");
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let text = response.text().await.unwrap_or_default();
            let message: String = text.chars().take(200).collect();
            return Err(LlmError::Api { status, message });
        }
        Ok(response)
    }
}

#[async_trait]
impl ChatModel for OpenAiClient {
    async fn complete(&self, request: &ChatRequest) -> Result<Completion, LlmError> {
        let v: Value = self.send(request, false).await?.json().await?;
        let text = v["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| LlmError::InvalidResponse("no choices[0].message.content".into()))?
            .trim()
            .to_string();
        let total_tokens = v["usage"]["total_tokens"].as_u64().unwrap_or(0);
        Ok(Completion { text, total_tokens })
    }

    async fn stream(&self, request: &ChatRequest) -> Result<DeltaStream, LlmError> {
        let response = self.send(request, true).await?;
        Ok(Box::pin(sse_deltas(Box::pin(response.bytes_stream()))))
    }
}

enum SseEvent {
    Delta(Delta),
    Done,
}

/// Parses one SSE line. Comments, blank lines and unparseable payloads are skipped.
fn parse_sse_line(line: &str) -> Option<SseEvent> {
    let data = line.strip_prefix("data:")?.trim();
    if data == "[DONE]" {
        return Some(SseEvent::Done);
    }
    let v: Value = serde_json::from_str(data).ok()?;
    let text = v["choices"][0]["delta"]["content"]
        .as_str()
        .filter(|s| !s.is_empty())
        .map(str::to_string);
    let total_tokens = v["usage"]["total_tokens"].as_u64();
    if text.is_none() && total_tokens.is_none() {
        return None;
    }
    Some(SseEvent::Delta(Delta { text, total_tokens }))
}

/// Turns a raw SSE byte stream into deltas. Lines are split on bytes so a
/// multi-byte character cut by the transport is reassembled before decoding.
pub(crate) fn sse_deltas<S, B>(mut bytes: S) -> impl Stream<Item = Result<Delta, LlmError>>
where
    S: Stream<Item = Result<B, reqwest::Error>> + Unpin,
    B: AsRef<[u8]>,
{
    async_stream::try_stream! {
        let mut buf: Vec<u8> = Vec::new();
        'read: while let Some(chunk) = bytes.next().await {
            buf.extend_from_slice(chunk?.as_ref());
            while let Some(pos) = buf.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = buf.drain(..=pos).collect();
                match parse_sse_line(String::from_utf8_lossy(&line).trim()) {
                    Some(SseEvent::Delta(delta)) => yield delta,
                    Some(SseEvent::Done) => break 'read,
                    None => {}
                }
            }
        }
    }
}
