//! OpenAI-compatible chat completions provider
//!
//! Talks to any endpoint speaking the `/chat/completions` API (OpenRouter
//! by default). Streaming uses server-sent events: each `data:` line holds a
//! JSON chunk whose `choices[0].delta.content` is the next fragment, and
//! `data: [DONE]` ends the stream.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{self, BoxStream, StreamExt};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::traits::{CompletionProvider, CompletionRequest, FragmentStream};
use crate::config::ProviderSettings;
use crate::error::{Error, Result};
use crate::version;

// ─────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────

/// Connection settings for an OpenAI-compatible endpoint
#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    /// API base URL, without the trailing `/chat/completions`
    pub base_url: String,

    /// Bearer token (empty = not configured)
    pub api_key: String,

    /// Connect timeout in seconds; also bounds whole non-streaming requests.
    /// Streams are bounded per chunk by the caller instead.
    pub timeout_secs: u64,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        let settings = ProviderSettings::default();
        Self {
            base_url: settings.base_url,
            api_key: String::new(),
            timeout_secs: settings.timeout_secs,
        }
    }
}

impl From<&ProviderSettings> for OpenAiConfig {
    fn from(settings: &ProviderSettings) -> Self {
        Self {
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            api_key: settings.api_key.clone(),
            timeout_secs: settings.timeout_secs,
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// OpenAI API types (request/response)
// ─────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ApiMessage<'a>>,
    temperature: f32,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
}

#[derive(Debug, Serialize)]
struct ApiMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    error: Option<StreamError>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
}

#[derive(Debug, Default, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamError {
    #[serde(default)]
    message: String,
}

// ─────────────────────────────────────────────────────────────────
// Provider
// ─────────────────────────────────────────────────────────────────

/// Completion provider backed by an OpenAI-compatible HTTP API
pub struct OpenAiProvider {
    config: OpenAiConfig,
    client: Client,
}

impl OpenAiProvider {
    pub fn new(config: OpenAiConfig) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(version::build_info().user_agent())
            .build()
            .map_err(|e| Error::Internal(format!("Failed to create HTTP client: {}", e)))?;

        debug!(base_url = %config.base_url, "OpenAI-compatible provider created");

        Ok(Self { config, client })
    }

    /// Build the authorization header value (if API key is set)
    fn auth_header(&self) -> Option<String> {
        if self.config.api_key.is_empty() {
            None
        } else {
            Some(format!("Bearer {}", self.config.api_key))
        }
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.config.base_url)
    }

    fn build_request(&self, request: &CompletionRequest, stream: bool) -> Result<RequestBuilder> {
        let auth = self.auth_header().ok_or_else(|| Error::MissingCredential {
            provider: self.name().to_string(),
        })?;

        let body = ChatCompletionRequest {
            model: &request.model,
            messages: vec![ApiMessage {
                role: "user",
                content: &request.prompt,
            }],
            temperature: request.temperature,
            stream,
        };

        let builder = self
            .client
            .post(self.completions_url())
            .header("Authorization", auth)
            .json(&body);
        if stream {
            Ok(builder)
        } else {
            Ok(builder.timeout(Duration::from_secs(self.config.timeout_secs)))
        }
    }

    /// Send and map transport failures and non-success statuses
    async fn send(&self, builder: RequestBuilder, model: &str) -> Result<Response> {
        let response = builder.send().await.map_err(map_reqwest_error)?;
        let status = response.status();
        if status.is_success() {
            debug!(model, status = %status, "Completion request accepted");
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        warn!(model, status = %status, "Completion request failed: {}", body);
        Err(map_status_error(status, body))
    }
}

#[async_trait]
impl CompletionProvider for OpenAiProvider {
    fn name(&self) -> &str {
        "openrouter"
    }

    async fn stream_completion(&self, request: &CompletionRequest) -> Result<FragmentStream> {
        let builder = self.build_request(request, true)?;
        let response = self.send(builder, &request.model).await?;
        Ok(sse_fragments(response.bytes_stream()))
    }

    async fn generate_completion(&self, request: &CompletionRequest) -> Result<String> {
        let builder = self.build_request(request, false)?;
        let response = self.send(builder, &request.model).await?;

        let parsed: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| Error::stream_decode(format!("Failed to parse completion: {}", e)))?;

        let text = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();
        Ok(text)
    }
}

// ─────────────────────────────────────────────────────────────────
// Error Mapping
// ─────────────────────────────────────────────────────────────────

fn map_reqwest_error(e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::transport(format!("Request timed out: {}", e))
    } else if e.is_decode() {
        Error::stream_decode(e.to_string())
    } else {
        Error::transport(e.to_string())
    }
}

fn map_status_error(status: StatusCode, body: String) -> Error {
    match status.as_u16() {
        401 | 403 => Error::AuthenticationFailed { message: body },
        429 | 500..=599 => Error::transport(format!("API error {}: {}", status, body)),
        code => Error::ProviderRejected {
            status: code,
            message: body,
        },
    }
}

// ─────────────────────────────────────────────────────────────────
// SSE Parsing
// ─────────────────────────────────────────────────────────────────

/// Outcome of parsing one SSE line
#[derive(Debug, PartialEq)]
enum SseLine {
    Fragment(String),
    Done,
    Skip,
}

/// Parse a single SSE line from a chat completions stream
fn parse_sse_line(line: &str) -> Result<SseLine> {
    let trimmed = line.trim();

    // Blank separators, keep-alive comments, and non-data fields
    let Some(data) = trimmed.strip_prefix("data:") else {
        return Ok(SseLine::Skip);
    };
    let data = data.trim_start();

    if data == "[DONE]" {
        return Ok(SseLine::Done);
    }

    let chunk: StreamChunk = serde_json::from_str(data).map_err(|e| {
        Error::stream_decode(format!("Type validation failed: {} (data: {})", e, data))
    })?;

    if let Some(err) = chunk.error {
        return Err(Error::transport(format!("Provider stream error: {}", err.message)));
    }

    Ok(chunk
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.delta.content)
        .filter(|s| !s.is_empty())
        .map(SseLine::Fragment)
        .unwrap_or(SseLine::Skip))
}

struct SseState<B> {
    inner: BoxStream<'static, reqwest::Result<B>>,
    buffer: Vec<u8>,
    pending: VecDeque<Result<String>>,
    finished: bool,
}

impl<B> SseState<B> {
    /// Move every complete line out of the buffer into `pending`
    fn drain_lines(&mut self) {
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            self.process_line(&line);
            if self.finished {
                return;
            }
        }
    }

    fn process_line(&mut self, line: &[u8]) {
        let line = String::from_utf8_lossy(line);
        match parse_sse_line(&line) {
            Ok(SseLine::Fragment(text)) => self.pending.push_back(Ok(text)),
            Ok(SseLine::Done) => self.finished = true,
            Ok(SseLine::Skip) => {}
            Err(e) => {
                self.pending.push_back(Err(e));
                self.finished = true;
            }
        }
    }
}

/// Turn a raw byte stream into text fragments
///
/// Bytes are buffered until a full line is available so multi-byte
/// characters split across network chunks decode correctly.
fn sse_fragments<S, B>(byte_stream: S) -> FragmentStream
where
    S: futures_util::Stream<Item = reqwest::Result<B>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
{
    let state = SseState {
        inner: byte_stream.boxed(),
        buffer: Vec::new(),
        pending: VecDeque::new(),
        finished: false,
    };

    let stream: BoxStream<'static, Result<String>> = stream::unfold(state, |mut state| async move {
        loop {
            if let Some(item) = state.pending.pop_front() {
                return Some((item, state));
            }
            if state.finished {
                return None;
            }

            match state.inner.next().await {
                Some(Ok(chunk)) => {
                    state.buffer.extend_from_slice(chunk.as_ref());
                    state.drain_lines();
                }
                Some(Err(e)) => {
                    state.finished = true;
                    return Some((Err(map_reqwest_error(e)), state));
                }
                None => {
                    if !state.buffer.is_empty() {
                        let rest = std::mem::take(&mut state.buffer);
                        state.process_line(&rest);
                    }
                    state.finished = true;
                }
            }
        }
    })
    .boxed();

    stream
}

// ─────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────
