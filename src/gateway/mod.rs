//! LLM Gateway (§4.1): `call`/`stream` against either an OpenAI-shaped or an
//! OpenRouter-compatible chat-completions endpoint, with 401-triggered
//! key refresh and a single retry.
//!
//! Grounded on `clients/openai.rs` (`OpenAIClient` wrapping `openai_rust2`,
//! the streaming delta-folding shape) and
//! `virtues-os-virtues/apps/tollbooth/src/routes/streaming.rs` (folding an
//! SSE `bytes_stream()` into typed deltas). Unlike the teacher, this gateway
//! talks to exactly one of two wire shapes selected once at construction
//! time from whichever credential [`AppConfig::llm_credential`] resolves,
//! rather than supporting a family of named providers (Claude/Gemini/Grok).

use std::fmt;
use std::sync::Arc;

use futures_util::{Stream, StreamExt};
use serde_json::{json, Value};

use crate::config::{AppConfig, LlmProviderKind};
use crate::message::{ContentBlock, Message, Role};

#[derive(Debug, Clone)]
pub enum GatewayError {
    Unavailable(String),
    ProviderError(String),
    Protocol(String),
}

impl fmt::Display for GatewayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GatewayError::Unavailable(msg) => write!(f, "llm_unavailable: {msg}"),
            GatewayError::ProviderError(msg) => write!(f, "llm_error: {msg}"),
            GatewayError::Protocol(msg) => write!(f, "llm_protocol: {msg}"),
        }
    }
}

impl std::error::Error for GatewayError {}

/// Source of truth for the provider credential. The default implementation
/// is environment-backed and static; `refresh` re-reads the same
/// environment variable, which is enough to satisfy the Gateway's
/// "force-refresh and retry once on 401" contract even though this
/// particular source never actually rotates.
pub trait KeySource: Send + Sync {
    fn current(&self) -> String;
    fn refresh(&self) -> Result<String, GatewayError>;
}

pub struct EnvKeySource {
    env_var: &'static str,
}

impl EnvKeySource {
    pub fn new(env_var: &'static str) -> Self {
        Self { env_var }
    }
}

impl KeySource for EnvKeySource {
    fn current(&self) -> String {
        std::env::var(self.env_var).unwrap_or_default()
    }

    fn refresh(&self) -> Result<String, GatewayError> {
        let key = self.current();
        if key.is_empty() {
            Err(GatewayError::Unavailable(format!(
                "{} is not set",
                self.env_var
            )))
        } else {
            Ok(key)
        }
    }
}

/// A single folded item from [`Gateway::stream`]: either a text fragment or
/// a partial tool-call keyed by its index in the assistant turn (§4.1).
#[derive(Debug, Clone)]
pub enum StreamDelta {
    Text(String),
    ToolCall {
        index: usize,
        call_id: Option<String>,
        name: Option<String>,
        arguments_fragment: String,
    },
    Done,
}

fn role_str(role: Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    }
}

/// Render a transcript into the `{role, content, tool_call_id?}` shape every
/// OpenAI-compatible endpoint expects. Tool-use blocks on assistant turns
/// are folded into the same JSON shape the provider sent them in, so a
/// round-tripped transcript (assistant tool-use → tool result → next call)
/// stays well-formed.
fn render_transcript(transcript: &[Message]) -> Vec<Value> {
    let mut out = Vec::with_capacity(transcript.len());
    for msg in transcript {
        match msg.role {
            Role::Tool => {
                out.push(json!({
                    "role": "tool",
                    "tool_call_id": msg.tool_use_id,
                    "content": msg.content,
                }));
            }
            Role::Assistant if msg.has_tool_calls() => {
                // Re-serialize the raw arguments text the model emitted, not
                // a parsed-then-redumped value: a malformed call must still
                // round-trip byte-for-byte so the provider sees exactly what
                // it sent, with the tool-result explaining the parse error
                // appended by the caller.
                let tool_calls: Vec<Value> = msg
                    .content_blocks
                    .iter()
                    .filter_map(|block| match block {
                        ContentBlock::ToolUse { call_id, name, arguments_text } => Some(json!({
                            "id": call_id,
                            "type": "function",
                            "function": {
                                "name": name,
                                "arguments": arguments_text,
                            }
                        })),
                        ContentBlock::Text { .. } => None,
                    })
                    .collect();
                out.push(json!({
                    "role": "assistant",
                    "content": msg.text_only(),
                    "tool_calls": tool_calls,
                }));
            }
            other => {
                out.push(json!({
                    "role": role_str(other),
                    "content": msg.text_only(),
                }));
            }
        }
    }
    out
}

fn parse_assistant_message(choice: &Value) -> Result<Message, GatewayError> {
    let message = choice
        .get("message")
        .ok_or_else(|| GatewayError::Protocol("response carries no 'message'".to_string()))?;

    let mut content_blocks = Vec::new();
    if let Some(text) = message.get("content").and_then(Value::as_str) {
        if !text.is_empty() {
            content_blocks.push(ContentBlock::text(text));
        }
    }
    if let Some(tool_calls) = message.get("tool_calls").and_then(Value::as_array) {
        for call in tool_calls {
            let call_id = call
                .get("id")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            let function = call.get("function").cloned().unwrap_or(Value::Null);
            let name = function
                .get("name")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            let arguments_text = function
                .get("arguments")
                .and_then(Value::as_str)
                .unwrap_or("{}")
                .to_string();
            content_blocks.push(ContentBlock::ToolUse {
                call_id,
                name,
                arguments_text,
            });
        }
    }

    let text = content_blocks
        .iter()
        .filter_map(|b| match b {
            ContentBlock::Text { text } => Some(text.clone()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("");

    Ok(Message {
        role: Role::Assistant,
        content: text,
        content_blocks,
        tool_use_id: None,
        is_error: false,
    })
}

/// Talks to one chat-completions endpoint, selected once at construction.
pub struct Gateway {
    http: reqwest::Client,
    key_source: Arc<dyn KeySource>,
    base_url: String,
    kind: LlmProviderKind,
}

impl Gateway {
    pub fn new(config: &AppConfig) -> Result<Self, GatewayError> {
        let (_, kind) = config
            .llm_credential()
            .ok_or_else(|| GatewayError::Unavailable("no LLM credential configured".to_string()))?;

        let (env_var, base_url) = match kind {
            LlmProviderKind::Anthropic => ("ANTHROPIC_API_KEY", "https://api.anthropic.com/v1"),
            LlmProviderKind::OpenRouter => ("OPENROUTER_API_KEY", "https://openrouter.ai/api/v1"),
        };

        Ok(Self {
            http: reqwest::Client::new(),
            key_source: Arc::new(EnvKeySource::new(env_var)),
            base_url: base_url.to_string(),
            kind,
        })
    }

    pub fn provider_kind(&self) -> LlmProviderKind {
        self.kind
    }

    fn build_body(
        &self,
        transcript: &[Message],
        model_id: &str,
        max_output: u32,
        tool_schema: Option<&[Value]>,
        stream: bool,
    ) -> Value {
        let mut body = json!({
            "model": model_id,
            "messages": render_transcript(transcript),
            "max_tokens": max_output,
            "temperature": 0.7,
            "stream": stream,
        });
        if let Some(tools) = tool_schema {
            if !tools.is_empty() {
                body["tools"] = Value::Array(tools.to_vec());
            }
        }
        body
    }

    async fn post_once(&self, body: &Value, key: &str) -> Result<reqwest::Response, GatewayError> {
        self.http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(key)
            .json(body)
            .send()
            .await
            .map_err(|e| GatewayError::Unavailable(e.to_string()))
    }

    /// Full non-streaming turn (§4.1 `Call`). On a 401, force-refreshes the
    /// key and retries exactly once.
    pub async fn call(
        &self,
        transcript: &[Message],
        model_id: &str,
        max_output: u32,
        tool_schema: Option<&[Value]>,
    ) -> Result<Message, GatewayError> {
        let body = self.build_body(transcript, model_id, max_output, tool_schema, false);

        let mut response = self.post_once(&body, &self.key_source.current()).await?;
        if response.status() == reqwest::StatusCode::UNAUTHORIZED {
            let refreshed = self.key_source.refresh()?;
            response = self.post_once(&body, &refreshed).await?;
        }

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(GatewayError::ProviderError(format!("{status}: {text}")));
        }

        let parsed: Value = response
            .json()
            .await
            .map_err(|e| GatewayError::Protocol(e.to_string()))?;
        let choice = parsed
            .get("choices")
            .and_then(Value::as_array)
            .and_then(|a| a.first())
            .ok_or_else(|| GatewayError::Protocol("empty 'choices' array".to_string()))?;

        parse_assistant_message(choice)
    }

    /// Streaming turn (§4.1 `Stream`). Folds `data: ` lines of the SSE body
    /// into [`StreamDelta`]s, the same shape `clients/openai.rs` builds for
    /// its own `MessageChunk` stream.
    pub async fn stream(
        &self,
        transcript: &[Message],
        model_id: &str,
        max_output: u32,
        tool_schema: Option<&[Value]>,
    ) -> Result<impl Stream<Item = Result<StreamDelta, GatewayError>>, GatewayError> {
        let body = self.build_body(transcript, model_id, max_output, tool_schema, true);

        let mut response = self.post_once(&body, &self.key_source.current()).await?;
        if response.status() == reqwest::StatusCode::UNAUTHORIZED {
            let refreshed = self.key_source.refresh()?;
            response = self.post_once(&body, &refreshed).await?;
        }
        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(GatewayError::ProviderError(format!("{status}: {text}")));
        }

        let byte_stream = response.bytes_stream();
        Ok(byte_stream.flat_map(|chunk| {
            let deltas = match chunk {
                Ok(bytes) => fold_sse_chunk(&bytes),
                Err(e) => vec![Err(GatewayError::Unavailable(e.to_string()))],
            };
            futures_util::stream::iter(deltas)
        }))
    }
}

/// Folds one raw SSE chunk (possibly several `data: ` lines) into deltas.
fn fold_sse_chunk(bytes: &[u8]) -> Vec<Result<StreamDelta, GatewayError>> {
    let text = String::from_utf8_lossy(bytes);
    let mut out = Vec::new();
    for line in text.lines() {
        let Some(payload) = line.strip_prefix("data: ") else {
            continue;
        };
        if payload == "[DONE]" {
            out.push(Ok(StreamDelta::Done));
            continue;
        }
        let parsed: Value = match serde_json::from_str(payload) {
            Ok(v) => v,
            Err(_) => continue,
        };
        let Some(delta) = parsed
            .get("choices")
            .and_then(Value::as_array)
            .and_then(|a| a.first())
            .and_then(|c| c.get("delta"))
        else {
            continue;
        };
        if let Some(text) = delta.get("content").and_then(Value::as_str) {
            if !text.is_empty() {
                out.push(Ok(StreamDelta::Text(text.to_string())));
            }
        }
        if let Some(tool_calls) = delta.get("tool_calls").and_then(Value::as_array) {
            for call in tool_calls {
                let index = call.get("index").and_then(Value::as_u64).unwrap_or(0) as usize;
                let call_id = call.get("id").and_then(Value::as_str).map(str::to_string);
                let function = call.get("function").cloned().unwrap_or(Value::Null);
                let name = function.get("name").and_then(Value::as_str).map(str::to_string);
                let arguments_fragment = function
                    .get("arguments")
                    .and_then(Value::as_str)
                    .unwrap_or("")
                    .to_string();
                out.push(Ok(StreamDelta::ToolCall {
                    index,
                    call_id,
                    name,
                    arguments_fragment,
                }));
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_transcript_folds_tool_use_blocks_into_tool_calls_json() {
        let msg = Message {
            role: Role::Assistant,
            content: String::new(),
            content_blocks: vec![ContentBlock::ToolUse {
                call_id: "call_1".into(),
                name: "web_search".into(),
                arguments_text: "{\"query\":\"rust\"}".into(),
            }],
            tool_use_id: None,
            is_error: false,
        };
        let rendered = render_transcript(&[msg]);
        assert_eq!(rendered[0]["tool_calls"][0]["function"]["name"], "web_search");
    }

    #[test]
    fn fold_sse_chunk_extracts_text_and_done_sentinel() {
        let chunk = b"data: {\"choices\":[{\"delta\":{\"content\":\"hi\"}}]}\n\ndata: [DONE]\n\n";
        let deltas = fold_sse_chunk(chunk);
        assert_eq!(deltas.len(), 2);
        assert!(matches!(deltas[0], Ok(StreamDelta::Text(ref t)) if t == "hi"));
        assert!(matches!(deltas[1], Ok(StreamDelta::Done)));
    }

    #[test]
    fn parse_assistant_message_reads_tool_calls_from_a_choice() {
        let choice = json!({
            "message": {
                "content": null,
                "tool_calls": [{
                    "id": "call_9",
                    "function": {"name": "web_fetch", "arguments": "{\"url\":\"https://x\"}"}
                }]
            }
        });
        let msg = parse_assistant_message(&choice).unwrap();
        assert!(msg.has_tool_calls());
        assert_eq!(msg.tool_calls()[0].tool_name, "web_fetch");
    }

    #[test]
    fn parse_assistant_message_preserves_malformed_arguments_as_a_parse_error() {
        let choice = json!({
            "message": {
                "content": null,
                "tool_calls": [{
                    "id": "call_10",
                    "function": {"name": "generate_excel", "arguments": "{not valid json"}
                }]
            }
        });
        let msg = parse_assistant_message(&choice).unwrap();
        let calls = msg.tool_calls();
        assert_eq!(calls.len(), 1);
        assert!(calls[0].arguments.is_err(), "malformed arguments must surface as an error, not {{}}");
    }

    #[test]
    fn render_transcript_round_trips_raw_arguments_text_even_when_malformed() {
        let msg = Message {
            role: Role::Assistant,
            content: String::new(),
            content_blocks: vec![ContentBlock::ToolUse {
                call_id: "call_11".into(),
                name: "generate_excel".into(),
                arguments_text: "{not valid json".into(),
            }],
            tool_use_id: None,
            is_error: false,
        };
        let rendered = render_transcript(&[msg]);
        assert_eq!(rendered[0]["tool_calls"][0]["function"]["arguments"], "{not valid json");
    }
}
