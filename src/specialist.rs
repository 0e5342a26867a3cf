//! Specialist Runner (§4.4): the bounded tool-use loop shared by every
//! route, terminal or not, with or without tools.
//!
//! Grounded on `planner.rs::BasicPlanner`'s bounded reasoning loop and
//! `agent.rs::Agent::send()`'s tool-use iteration shape (`max_tool_iterations`
//! constant).

use serde_json::Value;

use crate::config::AppConfig;
use crate::gateway::{Gateway, GatewayError};
use crate::message::{Message, ToolResult};
use crate::tools::ToolExecutor;

/// Iteration cap for a single specialist invocation (§4.4: "capped at a
/// small constant (e.g. five iterations)").
pub const MAX_SPECIALIST_ITERATIONS: usize = 5;

#[derive(Debug, Clone)]
pub enum SpecialistError {
    Gateway(GatewayError),
}

impl std::fmt::Display for SpecialistError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SpecialistError::Gateway(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for SpecialistError {}

/// Builds the trailing context slice a non-terminal specialist receives:
/// the last five user/assistant turns of the supervisor transcript plus a
/// synthetic user turn carrying the route's structured intent (§4.7 step 4,
/// Open Question decision #2 in `DESIGN.md`).
pub fn recent_context_slice(supervisor_transcript: &[Message], structured_intent: &str) -> Vec<Message> {
    let tail: Vec<Message> = supervisor_transcript
        .iter()
        .rev()
        .filter(|m| matches!(m.role, crate::message::Role::User | crate::message::Role::Assistant))
        .take(5)
        .rev()
        .cloned()
        .collect();
    let mut slice = tail;
    slice.push(Message::user(structured_intent));
    slice
}

/// Runs one specialist to completion: repeatedly calls the Gateway with
/// `system_prompt`/`model`/`tool_schema`, dispatching any tool-use blocks
/// through `tools` and feeding results back, until a tool-free turn is
/// returned or the iteration cap is hit.
pub async fn run(
    gateway: &Gateway,
    tools: &ToolExecutor,
    config: &AppConfig,
    system_prompt: &str,
    model: &str,
    tool_schema: Option<&[Value]>,
    mut context: Vec<Message>,
) -> Result<String, SpecialistError> {
    let mut transcript = vec![Message::system(system_prompt)];
    transcript.append(&mut context);

    let mut last_text = String::new();
    for _ in 0..MAX_SPECIALIST_ITERATIONS {
        let assistant_turn = gateway
            .call(&transcript, model, config.max_tokens, tool_schema)
            .await
            .map_err(SpecialistError::Gateway)?;

        if !assistant_turn.has_tool_calls() {
            last_text = assistant_turn.text_only();
            transcript.push(assistant_turn);
            break;
        }

        let tool_calls = assistant_turn.tool_calls();
        transcript.push(assistant_turn);

        for call in tool_calls {
            let result = match call.arguments {
                Ok(args) => {
                    let text = tools.dispatch(&call.tool_name, &args).await;
                    ToolResult::ok(call.call_id.clone(), text)
                }
                Err(parse_error) => ToolResult::error(
                    call.call_id.clone(),
                    format!(
                        "Erro: argumentos JSON inválidos para '{}': {parse_error}",
                        call.tool_name
                    ),
                ),
            };
            transcript.push(Message::tool_result(&result));
        }
    }

    if last_text.is_empty() {
        last_text = transcript
            .iter()
            .rev()
            .find_map(|m| match m.role {
                crate::message::Role::Assistant => Some(m.text_only()),
                _ => None,
            })
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| "[limite de iterações do especialista atingido]".to_string());
    }

    Ok(last_text)
}

/// Terminal-route variant (§4.7 step 4): a single tool-free Gateway call
/// (terminal specialists carry no tool schema), returning the full text for
/// the caller to chunk and emit in order. Kept as a plain return rather than
/// a per-chunk callback so event ordering stays the orchestrator's
/// responsibility, not something split across two async call sites.
pub async fn run_streaming(
    gateway: &Gateway,
    config: &AppConfig,
    system_prompt: &str,
    model: &str,
    context: Vec<Message>,
) -> Result<String, SpecialistError> {
    let mut transcript = vec![Message::system(system_prompt)];
    let mut context = context;
    transcript.append(&mut context);

    let assistant_turn = gateway
        .call(&transcript, model, config.max_tokens, None)
        .await
        .map_err(SpecialistError::Gateway)?;

    Ok(assistant_turn.text_only())
}

/// Splits `text` into chunks of `words_per_chunk` words, joined back with
/// single spaces and a trailing space so naive client-side concatenation
/// reconstructs the original (§4.7 step 3, default 6 words/chunk).
pub fn chunk_by_words(text: &str, words_per_chunk: usize) -> Vec<String> {
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.is_empty() {
        return Vec::new();
    }
    let n = words_per_chunk.max(1);
    words
        .chunks(n)
        .map(|group| format!("{} ", group.join(" ")))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Role;

    #[test]
    fn recent_context_slice_keeps_only_the_last_five_user_and_assistant_turns() {
        let mut transcript = Vec::new();
        for i in 0..10 {
            transcript.push(Message::user(format!("turn {i}")));
        }
        let slice = recent_context_slice(&transcript, "structured intent");
        assert_eq!(slice.len(), 6);
        assert_eq!(slice[0].content, "turn 5");
        assert_eq!(slice.last().unwrap().content, "structured intent");
        assert_eq!(slice.last().unwrap().role, Role::User);
    }

    #[test]
    fn chunk_by_words_splits_on_the_configured_granularity() {
        let chunks = chunk_by_words("one two three four five six seven eight", 3);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0], "one two three ");
        assert_eq!(chunks[2], "seven eight ");
    }

    #[test]
    fn chunk_by_words_on_empty_text_returns_no_chunks() {
        assert!(chunk_by_words("   ", 6).is_empty());
    }
}
