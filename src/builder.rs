//! Builder Flow (§4.10): the page-authoring UI's parallel top-level entry.
//! Runs one bounded tool-use loop restricted to `web_search`/`web_fetch`,
//! then terminates either by streaming a clarification text or by emitting a
//! single `actions` event carrying the parsed structured artifact.
//!
//! Grounded on `orchestration.rs`'s loop shape (reused here at a smaller
//! scale than the Supervisor Orchestrator) and
//! `original_source/backend/api/builder.py`'s three-form response
//! decoding (raw JSON, fenced JSON, JSON embedded in prose).

use std::sync::Arc;

use axum::extract::State;
use axum::response::sse::{Event as SseEvent, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;

use crate::edge::AppState;
use crate::events::{EventBody, EventEmitter};
use crate::gateway::Gateway;
use crate::message::{Message, ToolResult};
use crate::specialist::chunk_by_words;

const BUILDER_MAX_ITERATIONS: usize = 5;
const EVENT_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AgentMode {
    Creation,
    Edit,
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RenderMode {
    Ast,
    Iframe,
}

#[derive(Debug, Deserialize)]
pub struct BuilderRequest {
    pub messages: Vec<Message>,
    #[serde(default)]
    pub files: Option<Vec<Value>>,
    #[serde(rename = "agentMode")]
    pub agent_mode: AgentMode,
    #[serde(rename = "renderMode")]
    pub render_mode: RenderMode,
    #[serde(rename = "pageState", default)]
    pub page_state: Option<Value>,
    #[serde(default)]
    pub model: Option<String>,
}

/// The top-level JSON key this render mode's terminal artifact carries
/// (§4.10: `actions[]` for files, `ast_actions[]` for the tree).
fn artifact_key(render_mode: RenderMode) -> &'static str {
    match render_mode {
        RenderMode::Iframe => "actions",
        RenderMode::Ast => "ast_actions",
    }
}

/// Which registry agent handles this combination — a UX planner for the
/// iframe/file-oriented surface, a dev/implementer for the AST surface.
fn builder_agent_id(render_mode: RenderMode) -> &'static str {
    match render_mode {
        RenderMode::Iframe => "pages_ux",
        RenderMode::Ast => "pages_dev",
    }
}

/// Tries, in order: (1) the whole trimmed text as a JSON object carrying
/// `expected_key`; (2) the first fenced code block's contents, recursively;
/// (3) a balanced-brace walk starting from the nearest `{` at or before the
/// first occurrence of `"expected_key"` in the text.
pub fn extract_structured_json(text: &str, expected_key: &str) -> Option<Value> {
    let trimmed = text.trim();
    if let Some(value) = parse_object_with_key(trimmed, expected_key) {
        return Some(value);
    }
    if let Some(fenced) = extract_fenced_block(trimmed) {
        if let Some(value) = parse_object_with_key(fenced.trim(), expected_key) {
            return Some(value);
        }
    }
    scan_for_balanced_object(text, expected_key)
}

fn parse_object_with_key(candidate: &str, expected_key: &str) -> Option<Value> {
    let value: Value = serde_json::from_str(candidate).ok()?;
    if value.get(expected_key).is_some() {
        Some(value)
    } else {
        None
    }
}

fn extract_fenced_block(text: &str) -> Option<&str> {
    let start = text.find("```")?;
    let after_opening = &text[start + 3..];
    let after_opening = after_opening.strip_prefix("json").unwrap_or(after_opening);
    let after_opening = after_opening.strip_prefix('\n').unwrap_or(after_opening);
    let end = after_opening.find("```")?;
    Some(&after_opening[..end])
}

/// Finds `"expected_key"` in `text`, walks backward to the nearest
/// unconsumed `{`, then forward counting brace depth (ignoring braces inside
/// string literals) until it closes, and parses that span.
fn scan_for_balanced_object(text: &str, expected_key: &str) -> Option<Value> {
    let needle = format!("\"{expected_key}\"");
    let key_pos = text.find(&needle)?;

    let open_pos = text[..key_pos].rfind('{')?;

    let bytes = text.as_bytes();
    let mut depth: i32 = 0;
    let mut in_string = false;
    let mut escaped = false;
    let mut end_pos = None;
    for (offset, &byte) in bytes[open_pos..].iter().enumerate() {
        let c = byte as char;
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    end_pos = Some(open_pos + offset + 1);
                    break;
                }
            }
            _ => {}
        }
    }

    let end_pos = end_pos?;
    serde_json::from_str(&text[open_pos..end_pos]).ok()
}

/// Runs the bounded tool-use loop, then resolves to either a clarification
/// text or the parsed structured artifact.
enum BuilderOutcome {
    Clarification(String),
    Artifact(Value),
}

async fn run_builder_loop(
    gateway: &Gateway,
    state: &AppState,
    system_prompt: &str,
    model: &str,
    render_mode: RenderMode,
    mut transcript: Vec<Message>,
) -> BuilderOutcome {
    let key = artifact_key(render_mode);
    let tool_schema = vec![
        json!({"type": "function", "function": {"name": "web_search", "parameters": {"type": "object"}}}),
        json!({"type": "function", "function": {"name": "web_fetch", "parameters": {"type": "object"}}}),
    ];
    transcript.insert(0, Message::system(system_prompt));

    for _ in 0..BUILDER_MAX_ITERATIONS {
        let assistant_turn = match gateway
            .call(&transcript, model, state.config.max_tokens, Some(&tool_schema))
            .await
        {
            Ok(msg) => msg,
            Err(e) => return BuilderOutcome::Clarification(format!("Erro ao consultar o modelo: {e}")),
        };

        if !assistant_turn.has_tool_calls() {
            let text = assistant_turn.text_only();
            return match extract_structured_json(&text, key) {
                Some(artifact) => BuilderOutcome::Artifact(artifact),
                None => BuilderOutcome::Clarification(text),
            };
        }

        let tool_calls = assistant_turn.tool_calls();
        transcript.push(assistant_turn);

        for call in tool_calls {
            let text = if matches!(call.tool_name.as_str(), "web_search" | "web_fetch") {
                match call.arguments {
                    Ok(args) => state.tools.dispatch(&call.tool_name, &args).await,
                    Err(parse_error) => format!("ERRO: argumentos JSON inválidos: {parse_error}"),
                }
            } else {
                format!("ERRO: ferramenta '{}' não disponível no builder", call.tool_name)
            };
            transcript.push(Message::tool_result(&ToolResult::ok(call.call_id.clone(), text)));
        }
    }

    BuilderOutcome::Clarification("[limite de iterações do builder atingido]".to_string())
}

pub async fn builder_handler(State(state): State<AppState>, Json(request): Json<BuilderRequest>) -> Response {
    let gateway = match Gateway::new(&state.config) {
        Ok(g) => Arc::new(g),
        Err(e) => return (axum::http::StatusCode::SERVICE_UNAVAILABLE, format!("{e}")).into_response(),
    };

    let agent_id = builder_agent_id(request.render_mode);
    let Ok(entry) = state.registry.get_entry(agent_id) else {
        return (axum::http::StatusCode::INTERNAL_SERVER_ERROR, format!("unknown builder agent '{agent_id}'"))
            .into_response();
    };
    let model = request.model.clone().unwrap_or_else(|| entry.model.clone());

    let (emitter, receiver) = EventEmitter::channel(EVENT_CHANNEL_CAPACITY);
    let render_mode = request.render_mode;
    let reply_chunk_words = state.config.reply_chunk_words;
    let mut transcript = request.messages;
    if let Some(page_state) = &request.page_state {
        transcript.push(Message::user(format!("Estado atual da página: {page_state}")));
    }
    if let Some(files) = &request.files {
        transcript.push(Message::user(format!("Arquivos do projeto: {}", Value::Array(files.clone()))));
    }

    tokio::spawn(async move {
        emitter.status("Planejando alterações...").await;
        let outcome = run_builder_loop(&gateway, &state, &entry.system_prompt, &model, render_mode, transcript).await;
        match outcome {
            BuilderOutcome::Clarification(text) => {
                for chunk in chunk_by_words(&text, reply_chunk_words) {
                    emitter.emit(EventBody::Chunk { text: chunk }).await;
                }
            }
            BuilderOutcome::Artifact(artifact) => {
                emitter.emit(EventBody::Actions { content: artifact.to_string() }).await;
            }
        }
        emitter.done().await;
    });

    let stream = ReceiverStream::new(receiver).map(|event| {
        let payload = serde_json::to_string(&event).unwrap_or_else(|_| "{}".to_string());
        Ok::<_, std::convert::Infallible>(SseEvent::default().data(payload))
    });

    // `KeepAlive` intentionally omitted, matching the Request Edge (§4.9).
    Sse::new(stream).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_structured_json_parses_raw_json() {
        let text = r#"{"actions": [{"op": "create", "path": "index.html"}]}"#;
        let value = extract_structured_json(text, "actions").unwrap();
        assert_eq!(value["actions"][0]["op"], "create");
    }

    #[test]
    fn extract_structured_json_parses_a_fenced_block() {
        let text = "Aqui está:\n```json\n{\"ast_actions\": [1, 2]}\n```\nPronto.";
        let value = extract_structured_json(text, "ast_actions").unwrap();
        assert_eq!(value["ast_actions"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn extract_structured_json_walks_balanced_braces_in_prose() {
        let text = "Claro! Segue o resultado: { \"actions\": [{\"op\": \"update\"}] } — qualquer dúvida me avise.";
        let value = extract_structured_json(text, "actions").unwrap();
        assert_eq!(value["actions"][0]["op"], "update");
    }

    #[test]
    fn extract_structured_json_returns_none_without_the_expected_key() {
        assert!(extract_structured_json("apenas uma resposta em texto.", "actions").is_none());
    }

    #[test]
    fn artifact_key_matches_render_mode() {
        assert_eq!(artifact_key(RenderMode::Iframe), "actions");
        assert_eq!(artifact_key(RenderMode::Ast), "ast_actions");
    }
}
