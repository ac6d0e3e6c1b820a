//! Streaming chat client for the main model
//!
//! The endpoint speaks a chat-completions dialect over SSE: each `data:`
//! line carries a delta with optional text content and tool-call fragments.
//! Tool calls arrive split across events; the id/name land first and the
//! argument JSON accumulates in pieces.

use std::pin::Pin;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::{Error, Result};

/// A chat message in the request body
#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    #[must_use]
    pub fn system(content: &str) -> Self {
        Self {
            role: "system".to_string(),
            content: serde_json::Value::String(content.to_string()),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    #[must_use]
    pub fn user(content: &str) -> Self {
        Self {
            role: "user".to_string(),
            content: serde_json::Value::String(content.to_string()),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    /// Assistant message carrying the tool calls the model requested
    #[must_use]
    pub fn assistant_tool_calls(content: Option<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.map_or(serde_json::Value::Null, serde_json::Value::String),
            tool_calls: Some(tool_calls),
            tool_call_id: None,
        }
    }

    /// Tool result fed back into the stream
    #[must_use]
    pub fn tool(tool_call_id: &str, output: &str) -> Self {
        Self {
            role: "tool".to_string(),
            content: serde_json::Value::String(output.to_string()),
            tool_calls: None,
            tool_call_id: Some(tool_call_id.to_string()),
        }
    }
}

/// A completed tool call echoed back to the model
#[derive(Debug, Clone, Serialize)]
pub struct ToolCall {
    pub id: String,
    pub function: FunctionCall,
}

#[derive(Debug, Clone, Serialize)]
pub struct FunctionCall {
    pub name: String,
    /// Raw JSON argument string as the model produced it
    pub arguments: String,
}

/// Streaming chat request
#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<serde_json::Value>,
    /// Resume id for server-side conversation state
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation: Option<String>,
    pub max_tokens: u32,
}

/// Events produced while draining a chat stream
#[derive(Debug, Clone)]
pub enum ChatEvent {
    /// Incremental answer text
    ContentDelta(String),
    /// A tool call opened at `index` with its id and function name
    ToolCallStart { index: u32, id: String, name: String },
    /// More argument JSON for the tool call at `index`
    ToolCallDelta { index: u32, arguments: String },
    /// Server-assigned conversation resume id
    ConversationId(String),
    /// Stream finished; `finish_reason` is `tool_calls` when the model wants
    /// tool results before continuing
    Done { finish_reason: Option<String> },
}

/// Boxed stream of chat events
pub type ChatStream = Pin<Box<dyn Stream<Item = Result<ChatEvent>> + Send>>;

/// The authoritative streaming generator
#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn stream_chat(&self, request: &ChatRequest) -> Result<ChatStream>;
}

// Wire shape of one SSE data payload

#[derive(Deserialize)]
struct StreamPayload {
    #[serde(default)]
    conversation: Option<String>,
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize, Default)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<StreamToolCall>,
}

#[derive(Deserialize)]
struct StreamToolCall {
    index: u32,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<StreamFunction>,
}

#[derive(Deserialize)]
struct StreamFunction {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

/// HTTP chat client against the configured main-model endpoint
pub struct HttpChatModel {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpChatModel {
    #[must_use]
    pub fn new(endpoint: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint,
        }
    }
}

#[async_trait]
impl ChatModel for HttpChatModel {
    async fn stream_chat(&self, request: &ChatRequest) -> Result<ChatStream> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(request)
            .send()
            .await
            .map_err(|e| Error::Model(format!("request failed: {e}")))?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED
            || status == reqwest::StatusCode::FORBIDDEN
            || status == reqwest::StatusCode::PAYMENT_REQUIRED
        {
            return Err(Error::UpstreamFatal(format!("model auth failure: {status}")));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Model(format!("model error {status}: {body}")));
        }

        let (tx, rx) = mpsc::channel::<Result<ChatEvent>>(32);
        tokio::spawn(parse_sse(response, tx));

        Ok(Box::pin(futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        })))
    }
}

/// Read the SSE body and emit parsed events. Byte chunks do not align with
/// line boundaries, so a carry buffer splits on newlines explicitly.
async fn parse_sse(response: reqwest::Response, tx: mpsc::Sender<Result<ChatEvent>>) {
    let mut body = response.bytes_stream();
    let mut carry = String::new();
    let mut sent_conversation = false;

    while let Some(chunk) = body.next().await {
        let chunk = match chunk {
            Ok(c) => c,
            Err(e) => {
                let _ = tx.send(Err(Error::Model(format!("stream error: {e}")))).await;
                return;
            }
        };
        carry.push_str(&String::from_utf8_lossy(&chunk));

        while let Some(pos) = carry.find('\n') {
            let line: String = carry.drain(..=pos).collect();
            let line = line.trim();

            let Some(data) = line.strip_prefix("data: ") else {
                continue;
            };
            if data == "[DONE]" {
                let _ = tx.send(Ok(ChatEvent::Done { finish_reason: None })).await;
                return;
            }

            let payload: StreamPayload = match serde_json::from_str(data) {
                Ok(p) => p,
                Err(e) => {
                    tracing::warn!(error = %e, "skipping malformed stream payload");
                    continue;
                }
            };

            if !sent_conversation {
                if let Some(id) = payload.conversation {
                    sent_conversation = true;
                    if tx.send(Ok(ChatEvent::ConversationId(id))).await.is_err() {
                        return;
                    }
                }
            }

            for choice in payload.choices {
                if let Some(content) = choice.delta.content {
                    if !content.is_empty()
                        && tx.send(Ok(ChatEvent::ContentDelta(content))).await.is_err()
                    {
                        return;
                    }
                }

                for tc in choice.delta.tool_calls {
                    if let (Some(id), Some(name)) = (
                        tc.id.clone(),
                        tc.function.as_ref().and_then(|f| f.name.clone()),
                    ) {
                        if tx
                            .send(Ok(ChatEvent::ToolCallStart { index: tc.index, id, name }))
                            .await
                            .is_err()
                        {
                            return;
                        }
                    }
                    if let Some(arguments) = tc.function.and_then(|f| f.arguments) {
                        if !arguments.is_empty()
                            && tx
                                .send(Ok(ChatEvent::ToolCallDelta { index: tc.index, arguments }))
                                .await
                                .is_err()
                        {
                            return;
                        }
                    }
                }

                if let Some(reason) = choice.finish_reason {
                    let _ = tx
                        .send(Ok(ChatEvent::Done { finish_reason: Some(reason) }))
                        .await;
                    return;
                }
            }
        }
    }

    // Upstream closed without a terminator; treat as a clean end
    let _ = tx.send(Ok(ChatEvent::Done { finish_reason: None })).await;
}

/// In-progress tool call assembled from streaming events
#[derive(Debug, Default, Clone)]
pub struct PendingToolCall {
    pub id: String,
    pub name: String,
    pub arguments: String,
}

impl PendingToolCall {
    /// Fold a stream event into the pending set; returns true if consumed
    pub fn absorb(pending: &mut Vec<Self>, event: &ChatEvent) -> bool {
        match event {
            ChatEvent::ToolCallStart { index, id, name } => {
                let idx = *index as usize;
                if idx >= pending.len() {
                    pending.resize_with(idx + 1, Self::default);
                }
                pending[idx].id.clone_from(id);
                pending[idx].name.clone_from(name);
                true
            }
            ChatEvent::ToolCallDelta { index, arguments } => {
                let idx = *index as usize;
                if idx < pending.len() {
                    pending[idx].arguments.push_str(arguments);
                }
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_tool_calls_assemble_in_order() {
        let mut pending = Vec::new();

        assert!(PendingToolCall::absorb(
            &mut pending,
            &ChatEvent::ToolCallStart {
                index: 0,
                id: "call_1".into(),
                name: "search_memory".into(),
            },
        ));
        assert!(PendingToolCall::absorb(
            &mut pending,
            &ChatEvent::ToolCallDelta { index: 0, arguments: r#"{"query":"#.into() },
        ));
        assert!(PendingToolCall::absorb(
            &mut pending,
            &ChatEvent::ToolCallDelta { index: 0, arguments: r#""fleet"}"#.into() },
        ));

        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].name, "search_memory");
        assert_eq!(pending[0].arguments, r#"{"query":"fleet"}"#);
    }

    #[test]
    fn content_events_are_not_absorbed() {
        let mut pending = Vec::new();
        assert!(!PendingToolCall::absorb(
            &mut pending,
            &ChatEvent::ContentDelta("hello".into()),
        ));
        assert!(pending.is_empty());
    }

    #[test]
    fn stream_payload_parses_delta_content() {
        let data = r#"{"conversation":"conv_9","choices":[{"delta":{"content":"Hi"},"finish_reason":null}]}"#;
        let payload: StreamPayload = serde_json::from_str(data).unwrap();
        assert_eq!(payload.conversation.as_deref(), Some("conv_9"));
        assert_eq!(payload.choices[0].delta.content.as_deref(), Some("Hi"));
    }

    #[test]
    fn stream_payload_parses_tool_call_fragments() {
        let data = r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"id":"c1","function":{"name":"remember","arguments":""}}]},"finish_reason":null}]}"#;
        let payload: StreamPayload = serde_json::from_str(data).unwrap();
        let tc = &payload.choices[0].delta.tool_calls[0];
        assert_eq!(tc.id.as_deref(), Some("c1"));
        assert_eq!(tc.function.as_ref().unwrap().name.as_deref(), Some("remember"));
    }

    #[test]
    fn request_serializes_without_empty_options() {
        let request = ChatRequest {
            model: "main-large".into(),
            messages: vec![ChatMessage::system("be brief"), ChatMessage::user("hi")],
            stream: true,
            tools: None,
            conversation: None,
            max_tokens: 1024,
        };
        let json = serde_json::to_string(&request).unwrap();
        assert!(!json.contains("tools"));
        assert!(!json.contains("conversation"));
        assert!(json.contains(r#""stream":true"#));
    }
}
