use crate::providers::{
    ChatMessage, ChatRole, LlmProvider, LlmRequest, LlmResponse, LlmStream, LlmStreamResponse,
    Usage,
};
use async_trait::async_trait;
use bytes::Bytes;
use counsel_common::{Error, Result};
use futures::Stream;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::pin::Pin;
use std::task::{Context, Poll};
use tracing::debug;

pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// OpenAI chat-completions client (also works against compatible endpoints).
#[derive(Clone)]
pub struct OpenAiProvider {
    client: Client,
    api_key: String,
    base_url: String,
}

impl OpenAiProvider {
    pub fn new(api_key: String, base_url: Option<String>) -> Self {
        Self {
            client: Client::new(),
            api_key,
            base_url: base_url
                .map(|url| url.trim_end_matches('/').to_string())
                .unwrap_or_else(|| DEFAULT_OPENAI_BASE_URL.to_string()),
        }
    }

    async fn post_completion(&self, request: &LlmRequest, stream: bool) -> Result<reqwest::Response> {
        let url = format!("{}/chat/completions", self.base_url);
        let openai_request = convert_request(request, stream);

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&openai_request)
            .send()
            .await
            .map_err(|e| Error::Agent(format!("OpenAI request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(Error::Agent(format!(
                "OpenAI API error (status {}): {}",
                status.as_u16(),
                error_text
            )));
        }

        Ok(response)
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    fn provider_id(&self) -> &str {
        "openai"
    }

    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse> {
        let response = self.post_completion(request, false).await?;

        let openai_response: OpenAiResponse = response
            .json()
            .await
            .map_err(|e| Error::Agent(format!("Failed to parse OpenAI response: {e}")))?;

        convert_response(openai_response)
    }

    async fn complete_stream(&self, request: &LlmRequest) -> Result<LlmStream> {
        let response = self.post_completion(request, true).await?;
        debug!(model = %request.model, "OpenAI stream opened");
        Ok(Box::pin(SseParser::new(response.bytes_stream())))
    }

    async fn health_check(&self) -> Result<bool> {
        let url = format!("{}/models", self.base_url);
        let response = self.client.get(&url).bearer_auth(&self.api_key).send().await;

        match response {
            Ok(resp) => Ok(resp.status().is_success()),
            Err(_) => Ok(false),
        }
    }
}

fn convert_request(request: &LlmRequest, stream: bool) -> OpenAiRequest {
    let mut messages = Vec::with_capacity(request.messages.len() + 1);

    if let Some(system_prompt) = &request.system {
        messages.push(OpenAiMessage::System {
            content: system_prompt.clone(),
        });
    }
    messages.extend(request.messages.iter().map(convert_message));

    OpenAiRequest {
        model: request.model.clone(),
        messages,
        max_tokens: request.max_tokens,
        temperature: request.temperature,
        stream,
        stream_options: stream.then_some(OpenAiStreamOptions {
            include_usage: true,
        }),
    }
}

fn convert_message(msg: &ChatMessage) -> OpenAiMessage {
    let content = msg.content.clone();
    match msg.role {
        ChatRole::System => OpenAiMessage::System { content },
        ChatRole::User => OpenAiMessage::User { content },
        ChatRole::Assistant => OpenAiMessage::Assistant { content },
    }
}

fn convert_response(response: OpenAiResponse) -> Result<LlmResponse> {
    let choice = response
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| Error::Agent("No choices in response".to_string()))?;

    Ok(LlmResponse {
        text: choice.message.content.unwrap_or_default(),
        model: response.model,
        usage: response.usage.map(Usage::from),
        stop_reason: choice.finish_reason,
    })
}

// Request Types
#[derive(Serialize)]
struct OpenAiRequest {
    model: String,
    messages: Vec<OpenAiMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream_options: Option<OpenAiStreamOptions>,
}

#[derive(Serialize)]
struct OpenAiStreamOptions {
    include_usage: bool,
}

#[derive(Serialize)]
#[serde(tag = "role", rename_all = "lowercase")]
enum OpenAiMessage {
    System { content: String },
    User { content: String },
    Assistant { content: String },
}

// Response Types
#[derive(Deserialize)]
struct OpenAiResponse {
    model: String,
    choices: Vec<OpenAiChoice>,
    usage: Option<OpenAiUsage>,
}

#[derive(Deserialize)]
struct OpenAiChoice {
    message: OpenAiResponseMessage,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct OpenAiResponseMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct OpenAiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

impl From<OpenAiUsage> for Usage {
    fn from(usage: OpenAiUsage) -> Self {
        Usage {
            input_tokens: usage.prompt_tokens,
            output_tokens: usage.completion_tokens,
        }
    }
}

// Stream Parser
struct SseParser {
    stream: Pin<Box<dyn Stream<Item = reqwest::Result<Bytes>> + Send>>,
    buffer: Vec<u8>,
    queue: VecDeque<Result<LlmStreamResponse>>,
    finished: bool,
}

impl SseParser {
    fn new(stream: impl Stream<Item = reqwest::Result<Bytes>> + Send + 'static) -> Self {
        Self {
            stream: Box::pin(stream),
            buffer: Vec::new(),
            queue: VecDeque::new(),
            finished: false,
        }
    }

    /// Move every complete event in the buffer onto the queue.
    fn drain_events(&mut self) {
        while let Some((pos, delimiter_len)) = find_event_boundary(&self.buffer) {
            let event_bytes: Vec<u8> = self.buffer.drain(..pos).collect();
            self.buffer.drain(..delimiter_len);

            // Invalid UTF-8 is dropped.
            if let Ok(event) = String::from_utf8(event_bytes) {
                self.parse_event(&event);
            }
        }
    }

    fn parse_event(&mut self, event: &str) {
        for line in event.lines() {
            let Some(data) = line.strip_prefix("data:") else {
                continue;
            };
            let data = data.trim();
            if data.is_empty() || data == "[DONE]" {
                continue;
            }

            match serde_json::from_str::<OpenAiStreamChunk>(data) {
                Ok(chunk) => {
                    if let Some(error) = chunk.error {
                        self.queue.push_back(Err(Error::Agent(format!(
                            "OpenAI stream error: {}",
                            error.describe()
                        ))));
                        // Nothing after an error frame is trusted.
                        self.finished = true;
                        self.buffer.clear();
                        return;
                    }

                    for choice in chunk.choices {
                        let delta = choice.delta.content.unwrap_or_default();
                        if delta.is_empty() && choice.finish_reason.is_none() {
                            continue;
                        }
                        self.queue.push_back(Ok(LlmStreamResponse {
                            delta,
                            usage: None,
                            stop_reason: choice.finish_reason,
                        }));
                    }

                    if let Some(usage) = chunk.usage {
                        self.queue.push_back(Ok(LlmStreamResponse {
                            delta: String::new(),
                            usage: Some(usage.into()),
                            stop_reason: None,
                        }));
                    }
                }
                Err(e) => {
                    self.queue
                        .push_back(Err(Error::Agent(format!("JSON parse error: {e}"))));
                }
            }
        }
    }
}

fn find_event_boundary(buffer: &[u8]) -> Option<(usize, usize)> {
    if let Some(p) = buffer.windows(2).position(|w| w == b"\n\n") {
        return Some((p, 2));
    }
    buffer
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .map(|p| (p, 4))
}

impl Stream for SseParser {
    type Item = Result<LlmStreamResponse>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            if let Some(item) = self.queue.pop_front() {
                return Poll::Ready(Some(item));
            }
            if self.finished {
                return Poll::Ready(None);
            }

            match self.stream.as_mut().poll_next(cx) {
                Poll::Ready(Some(Ok(chunk))) => {
                    self.buffer.extend_from_slice(&chunk);
                    self.drain_events();
                }
                Poll::Ready(Some(Err(e))) => {
                    return Poll::Ready(Some(Err(Error::Agent(format!("Stream error: {e}")))));
                }
                Poll::Ready(None) => {
                    self.finished = true;
                    // A final event without a trailing blank line still counts.
                    let rest = std::mem::take(&mut self.buffer);
                    if let Ok(event) = String::from_utf8(rest) {
                        self.parse_event(&event);
                    }
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

// Stream Response Types
#[derive(Deserialize)]
struct OpenAiStreamChunk {
    #[serde(default)]
    choices: Vec<OpenAiStreamChoice>,
    usage: Option<OpenAiUsage>,
    error: Option<OpenAiStreamError>,
}

/// `{"error": {...}}` frame sent when the upstream fails mid-stream.
#[derive(Deserialize)]
struct OpenAiStreamError {
    message: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
}

impl OpenAiStreamError {
    fn describe(&self) -> String {
        match (&self.kind, &self.message) {
            (Some(kind), Some(message)) => format!("{kind}: {message}"),
            (None, Some(message)) => message.clone(),
            (Some(kind), None) => kind.clone(),
            (None, None) => "unknown error".to_string(),
        }
    }
}

#[derive(Deserialize)]
struct OpenAiStreamChoice {
    delta: OpenAiStreamDelta,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct OpenAiStreamDelta {
    content: Option<String>,
}
