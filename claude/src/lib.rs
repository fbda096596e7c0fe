//! Minimal Anthropic Claude API client.
//!
//! This crate provides a focused client for Claude's Messages API with:
//! - Non-streaming and streaming completions
//! - Proper SSE parsing for streaming responses, tolerant of events split
//!   across network chunks
//!
//! Dropping the stream returned by [`Claude::stream`] closes the underlying
//! HTTP connection.

use futures::StreamExt;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use std::time::Duration;
use thiserror::Error;
use tokio_stream::Stream;

const API_BASE: &str = "https://api.anthropic.com/v1";
const API_VERSION: &str = "2023-06-01";
const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Errors that can occur when using the Claude client.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Network error: {0}")]
    Network(String),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Failed to parse response: {0}")]
    Parse(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

/// A boxed stream of server-sent events.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<StreamEvent, Error>> + Send>>;

/// Claude API client.
#[derive(Clone)]
pub struct Claude {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl Claude {
    /// Create a new Claude client with the given API key.
    pub fn new(api_key: impl Into<String>) -> Result<Self, Error> {
        Ok(Self {
            client: build_http_client(DEFAULT_TIMEOUT)?,
            api_key: api_key.into(),
            model: DEFAULT_MODEL.to_string(),
            base_url: API_BASE.to_string(),
        })
    }

    /// Set the model every request is sent to.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Point the client at a different API root (proxies, test servers).
    ///
    /// The URL is the prefix before `/messages`, e.g. `https://api.anthropic.com/v1`.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Replace the whole-request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Result<Self, Error> {
        self.client = build_http_client(timeout)?;
        Ok(self)
    }

    /// The model requests are sent to.
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Send a completion request and return the full response.
    pub async fn complete(&self, request: Request) -> Result<Response, Error> {
        let response = self.send(&request, false).await?;

        let api_response: ApiResponse = response
            .json()
            .await
            .map_err(|e| Error::Parse(e.to_string()))?;

        Ok(parse_response(api_response))
    }

    /// Send a completion request and stream the response.
    pub async fn stream(&self, request: Request) -> Result<EventStream, Error> {
        let response = self.send(&request, true).await?;

        // Use scan to maintain a buffer for incomplete SSE events across chunks
        let stream = response
            .bytes_stream()
            .scan(String::new(), |buffer, result| {
                let events = match result {
                    Ok(bytes) => {
                        buffer.push_str(&String::from_utf8_lossy(&bytes));
                        parse_sse_events_buffered(buffer)
                    }
                    Err(e) => vec![Err(Error::Network(e.to_string()))],
                };
                futures::future::ready(Some(events))
            })
            .flat_map(futures::stream::iter);

        Ok(Box::pin(stream))
    }

    async fn send(&self, request: &Request, stream: bool) -> Result<reqwest::Response, Error> {
        let api_request = self.build_api_request(request, stream);
        let headers = self.build_headers()?;

        let response = self
            .client
            .post(format!("{}/messages", self.base_url))
            .headers(headers)
            .json(&api_request)
            .send()
            .await
            .map_err(|e| Error::Network(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Api {
                status,
                message: body,
            });
        }

        Ok(response)
    }

    fn build_headers(&self) -> Result<HeaderMap, Error> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            "x-api-key",
            HeaderValue::from_str(&self.api_key)
                .map_err(|e| Error::Config(format!("Invalid API key: {e}")))?,
        );
        headers.insert("anthropic-version", HeaderValue::from_static(API_VERSION));
        Ok(headers)
    }

    fn build_api_request(&self, request: &Request, stream: bool) -> ApiRequest {
        let messages = request
            .messages
            .iter()
            .map(|m| ApiMessage {
                role: "user",
                content: m.content.clone(),
            })
            .collect();

        ApiRequest {
            model: self.model.clone(),
            max_tokens: request.max_tokens,
            system: request.system.clone(),
            messages,
            temperature: request.temperature,
            stream,
        }
    }
}

fn build_http_client(timeout: Duration) -> Result<reqwest::Client, Error> {
    reqwest::Client::builder()
        .timeout(timeout)
        .connect_timeout(CONNECT_TIMEOUT)
        .build()
        .map_err(|e| Error::Config(format!("Failed to build HTTP client: {e}")))
}

fn parse_response(api_response: ApiResponse) -> Response {
    let text = api_response
        .content
        .into_iter()
        .filter_map(|c| match c {
            ApiContent::Text { text } => Some(text),
            ApiContent::Other => None,
        })
        .collect::<Vec<_>>()
        .join("");

    Response {
        id: api_response.id,
        model: api_response.model,
        text,
        stop_reason: api_response
            .stop_reason
            .as_deref()
            .map(parse_stop_reason)
            .unwrap_or(StopReason::EndTurn),
        usage: Usage {
            input_tokens: api_response.usage.input_tokens,
            output_tokens: api_response.usage.output_tokens,
        },
    }
}

fn parse_stop_reason(reason: &str) -> StopReason {
    match reason {
        "max_tokens" => StopReason::MaxTokens,
        "stop_sequence" => StopReason::StopSequence,
        _ => StopReason::EndTurn,
    }
}

// ============================================================================
// Public types
// ============================================================================

/// A completion request to send to Claude.
#[derive(Debug, Clone)]
pub struct Request {
    pub max_tokens: usize,
    pub system: Option<String>,
    pub messages: Vec<Message>,
    pub temperature: Option<f32>,
}

impl Request {
    /// Create a new request with the given messages.
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            max_tokens: 4096,
            system: None,
            messages,
            temperature: None,
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature.clamp(0.0, 1.0));
        self
    }
}

/// A user turn in the conversation.
#[derive(Debug, Clone)]
pub struct Message {
    pub content: String,
}

impl Message {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            content: text.into(),
        }
    }
}

/// A completion response from Claude.
#[derive(Debug, Clone)]
pub struct Response {
    pub id: String,
    pub model: String,
    /// All text blocks concatenated.
    pub text: String,
    pub stop_reason: StopReason,
    pub usage: Usage,
}

/// Why the model stopped generating.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    EndTurn,
    MaxTokens,
    StopSequence,
}

/// Token usage information.
#[derive(Debug, Clone)]
pub struct Usage {
    pub input_tokens: usize,
    pub output_tokens: usize,
}

// ============================================================================
// Streaming types
// ============================================================================

/// Events from a streaming response.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    MessageStart { id: String, model: String },
    TextDelta { index: usize, text: String },
    MessageDelta { stop_reason: Option<StopReason> },
    MessageStop,
    Ping,
    Error { message: String },
}

// ============================================================================
// Internal API types
// ============================================================================

#[derive(Debug, Serialize)]
struct ApiRequest {
    model: String,
    max_tokens: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<ApiMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct ApiMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    id: String,
    model: String,
    content: Vec<ApiContent>,
    #[serde(default)]
    stop_reason: Option<String>,
    usage: ApiUsage,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ApiContent {
    Text {
        text: String,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    input_tokens: usize,
    output_tokens: usize,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ApiStreamEvent {
    MessageStart {
        message: ApiMessageStart,
    },
    ContentBlockDelta {
        index: usize,
        delta: ApiDelta,
    },
    MessageDelta {
        delta: ApiMessageDelta,
    },
    MessageStop,
    Ping,
    Error {
        error: ApiError,
    },
    /// content_block_start / content_block_stop carry nothing we forward.
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct ApiMessageStart {
    id: String,
    model: String,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ApiDelta {
    TextDelta {
        text: String,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct ApiMessageDelta {
    stop_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    message: String,
}

/// Parse SSE events from a buffer, consuming complete lines and leaving incomplete data.
///
/// Only `data:` lines carry payloads; `event:` lines, comments and blank separators
/// are skipped. A trailing line without a newline stays in the buffer until the next
/// chunk arrives.
fn parse_sse_events_buffered(buffer: &mut String) -> Vec<Result<StreamEvent, Error>> {
    let mut events = Vec::new();

    while let Some(newline_pos) = buffer.find('\n') {
        let line = buffer[..newline_pos].trim_end_matches('\r');

        if let Some(json_str) = line.strip_prefix("data:").map(str::trim_start) {
            if json_str == "[DONE]" {
                events.push(Ok(StreamEvent::MessageStop));
            } else if !json_str.is_empty() {
                match serde_json::from_str::<ApiStreamEvent>(json_str) {
                    Ok(event) => {
                        if let Some(event) = convert_stream_event(event) {
                            events.push(Ok(event));
                        }
                    }
                    Err(e) => events.push(Err(Error::Parse(format!("SSE parse error: {e}")))),
                }
            }
        }

        buffer.drain(..=newline_pos);
    }

    events
}

fn convert_stream_event(event: ApiStreamEvent) -> Option<StreamEvent> {
    let event = match event {
        ApiStreamEvent::MessageStart { message } => StreamEvent::MessageStart {
            id: message.id,
            model: message.model,
        },
        ApiStreamEvent::ContentBlockDelta { index, delta } => match delta {
            ApiDelta::TextDelta { text } => StreamEvent::TextDelta { index, text },
            ApiDelta::Other => return None,
        },
        ApiStreamEvent::MessageDelta { delta } => StreamEvent::MessageDelta {
            stop_reason: delta.stop_reason.as_deref().map(parse_stop_reason),
        },
        ApiStreamEvent::MessageStop => StreamEvent::MessageStop,
        ApiStreamEvent::Ping => StreamEvent::Ping,
        ApiStreamEvent::Error { error } => StreamEvent::Error {
            message: error.message,
        },
        ApiStreamEvent::Other => return None,
    };
    Some(event)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_creation() {
        let client = Claude::new("test-key").unwrap();
        assert_eq!(client.model(), DEFAULT_MODEL);
        assert_eq!(client.base_url, API_BASE);
    }

    #[test]
    fn test_client_with_model_and_base_url() {
        let client = Claude::new("test-key")
            .unwrap()
            .with_model("claude-3-opus")
            .with_base_url("http://localhost:9000/v1/");
        assert_eq!(client.model(), "claude-3-opus");
        assert_eq!(client.base_url, "http://localhost:9000/v1");
    }

    #[test]
    fn test_request_builder() {
        let request = Request::new(vec![Message::user("Hello")])
            .with_system("You are a careful editor")
            .with_max_tokens(1000)
            .with_temperature(1.7);

        assert_eq!(request.max_tokens, 1000);
        assert!(request.system.is_some());
        assert_eq!(request.temperature, Some(1.0));
    }

    #[test]
    fn test_sse_event_split_across_chunks() {
        let mut buffer = String::from(
            "event: content_block_delta\ndata: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"te",
        );
        assert!(parse_sse_events_buffered(&mut buffer).is_empty());

        buffer.push_str("xt\":\"凶手\"}}\n\n");
        let events = parse_sse_events_buffered(&mut buffer);
        assert_eq!(events.len(), 1);
        assert_eq!(
            events[0].as_ref().unwrap(),
            &StreamEvent::TextDelta {
                index: 0,
                text: "凶手".to_string()
            }
        );
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_sse_skips_block_markers_and_maps_errors() {
        let mut buffer = String::from(
            "data: {\"type\":\"content_block_start\",\"index\":0,\"content_block\":{\"type\":\"text\",\"text\":\"\"}}\n\
             data: {\"type\":\"error\",\"error\":{\"type\":\"overloaded_error\",\"message\":\"Overloaded\"}}\n\
             data: {\"type\":\"message_stop\"}\n",
        );
        let events: Vec<_> = parse_sse_events_buffered(&mut buffer)
            .into_iter()
            .map(Result::unwrap)
            .collect();
        assert_eq!(
            events,
            vec![
                StreamEvent::Error {
                    message: "Overloaded".to_string()
                },
                StreamEvent::MessageStop
            ]
        );
    }

    #[test]
    fn test_parse_response_joins_text_blocks() {
        let api: ApiResponse = serde_json::from_str(
            r#"{"id":"msg_1","model":"m","content":[{"type":"text","text":"a"},{"type":"thinking","thinking":"x"},{"type":"text","text":"b"}],"stop_reason":"max_tokens","usage":{"input_tokens":3,"output_tokens":4}}"#,
        )
        .unwrap();
        let response = parse_response(api);
        assert_eq!(response.text, "ab");
        assert_eq!(response.stop_reason, StopReason::MaxTokens);
        assert_eq!(response.usage.output_tokens, 4);
    }
}
