//! Supervisor Orchestrator (§4.7): the top-level ReAct loop. The supervisor
//! model calls route-shaped tools; this module dispatches each to a
//! terminal stream, the browser direct-executor, or a non-terminal
//! specialist (Specialist Runner → QA Reviewer → Anti-Hallucination
//! Validator), and otherwise streams the supervisor's own text.
//!
//! Grounded on `orchestration.rs`'s loop/event shape and
//! `original_source/backend/agents/orchestrator.py::orchestrate_and_stream`.

use std::sync::Arc;

use serde_json::{json, Value};

use crate::config::AppConfig;
use crate::events::{BrowserActionStatus, EventBody, EventEmitter};
use crate::gateway::Gateway;
use crate::message::{Message, ToolResult};
use crate::qa;
use crate::registry::AgentRegistry;
use crate::specialist::{self, recent_context_slice};
use crate::tools::ToolExecutor;
use crate::validator;

/// Route table (supervisor-facing), a constant mapping from a supervisor
/// tool name to `{specialist_id, is_terminal}` (§2b, §4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Terminal { agent_id: &'static str },
    Browser,
    Specialist { agent_id: &'static str },
}

pub fn lookup_route(name: &str) -> Option<Route> {
    match name {
        "chat" => Some(Route::Terminal { agent_id: "chat" }),
        "ask_browser" => Some(Route::Browser),
        "web_search" => Some(Route::Specialist { agent_id: "web_search" }),
        "file_generator" => Some(Route::Specialist { agent_id: "file_generator" }),
        "file_modifier" => Some(Route::Specialist { agent_id: "file_modifier" }),
        "design" => Some(Route::Specialist { agent_id: "design" }),
        "pages_ux" => Some(Route::Specialist { agent_id: "pages_ux" }),
        "pages_dev" => Some(Route::Specialist { agent_id: "pages_dev" }),
        "pages_copy" => Some(Route::Specialist { agent_id: "pages_copy" }),
        "dev" => Some(Route::Specialist { agent_id: "dev" }),
        _ => None,
    }
}

/// The JSON Schema tool definitions exposed to the supervisor model itself
/// — one entry per routable name, shaped as the OpenAI-compatible
/// function-tool wire format (§4.1, §6).
pub fn supervisor_tool_schema() -> Vec<Value> {
    let route_names = [
        "chat",
        "ask_browser",
        "web_search",
        "file_generator",
        "file_modifier",
        "design",
        "pages_ux",
        "pages_dev",
        "pages_copy",
        "dev",
    ];
    route_names
        .iter()
        .map(|name| {
            json!({
                "type": "function",
                "function": {
                    "name": name,
                    "description": format!("Delegate to the '{name}' route."),
                    "parameters": {
                        "type": "object",
                        "properties": {
                            "query": {"type": "string"},
                            "url": {"type": "string"},
                            "instructions": {"type": "string"},
                        },
                    },
                }
            })
        })
        .collect()
}

/// Per-request shared dependencies the orchestrator and its specialists
/// draw on (§4.3 RequestState, minus the transcript/iteration counter,
/// which live in the loop itself).
pub struct RequestState {
    pub registry: Arc<AgentRegistry>,
    pub gateway: Arc<Gateway>,
    pub tools: Arc<ToolExecutor>,
    pub config: Arc<AppConfig>,
    pub emitter: EventEmitter,
}

/// Runs the supervisor loop to completion (or cancellation). `cancel`
/// resolves when the client disconnects (§4.9); every suspension point in
/// the loop races against it.
pub async fn run(state: &RequestState, mut transcript: Vec<Message>, mut cancel: tokio::sync::oneshot::Receiver<()>) {
    let supervisor_model = state.config.openrouter_model.clone();
    let tool_schema = supervisor_tool_schema();
    let mut tool_result_transcript: Vec<String> = Vec::new();

    for iteration in 0..state.config.max_iterations {
        if iteration == 0 {
            state.emitter.status("Analisando sua solicitação...").await;
        }

        let call_future = state
            .gateway
            .call(&transcript, &supervisor_model, state.config.max_tokens, Some(&tool_schema));

        let assistant_turn = tokio::select! {
            biased;
            _ = &mut cancel => {
                log::info!("[ORCHESTRATOR] request cancelled before LLM call completed");
                return;
            }
            result = call_future => result,
        };

        let assistant_turn = match assistant_turn {
            Ok(msg) => msg,
            Err(e) => {
                state.emitter.error(format!("llm_error: {e}")).await;
                state.emitter.done().await;
                return;
            }
        };

        if !assistant_turn.has_tool_calls() {
            let text = assistant_turn.text_only();
            transcript.push(assistant_turn);
            for chunk in specialist::chunk_by_words(&text, state.config.reply_chunk_words) {
                state.emitter.emit(EventBody::Chunk { text: chunk }).await;
            }
            state.emitter.done().await;
            return;
        }

        let tool_calls = assistant_turn.tool_calls();
        transcript.push(assistant_turn);

        for call in tool_calls {
            let args = match call.arguments {
                Ok(a) => a,
                Err(parse_error) => {
                    let result = ToolResult::error(
                        call.call_id.clone(),
                        format!("Erro: argumentos JSON inválidos para '{}': {parse_error}", call.tool_name),
                    );
                    transcript.push(Message::tool_result(&result));
                    continue;
                }
            };

            let Some(route) = lookup_route(&call.tool_name) else {
                let result = ToolResult::error(call.call_id.clone(), format!("Rota desconhecida: '{}'", call.tool_name));
                transcript.push(Message::tool_result(&result));
                continue;
            };

            match route {
                Route::Terminal { agent_id } => {
                    state.emitter.status("Preparando resposta final...").await;
                    run_terminal(state, agent_id, &transcript, &args).await;
                    return;
                }
                Route::Browser => {
                    let url = args.get("url").and_then(Value::as_str).unwrap_or("").to_string();
                    let action_kinds: Vec<String> = crate::tools::browser::parse_actions(&args)
                        .iter()
                        .map(|a| a.kind().to_string())
                        .collect();
                    state
                        .emitter
                        .emit(EventBody::BrowserAction {
                            status: BrowserActionStatus::Navigating,
                            url: url.clone(),
                            actions: if action_kinds.is_empty() { None } else { Some(action_kinds) },
                        })
                        .await;

                    let text = state.tools.dispatch("ask_browser", &args).await;
                    let ok = !text.starts_with("ERRO:");
                    state
                        .emitter
                        .emit(EventBody::BrowserAction {
                            status: if ok { BrowserActionStatus::Done } else { BrowserActionStatus::Error },
                            url,
                            actions: None,
                        })
                        .await;

                    tool_result_transcript.push(text.clone());
                    transcript.push(Message::tool_result(&ToolResult::ok(call.call_id.clone(), text)));
                    state.emitter.status("Continuando...").await;
                }
                Route::Specialist { agent_id } => {
                    state.emitter.status(format!("Delegando para '{agent_id}'...")).await;
                    let final_content =
                        run_non_terminal_specialist(state, agent_id, &transcript, &args, &mut tool_result_transcript).await;
                    transcript.push(Message::tool_result(&ToolResult::ok(call.call_id.clone(), final_content)));
                }
            }
        }
    }

    state.emitter.error("Limite de iterações atingido.").await;
    state.emitter.done().await;
}

async fn run_terminal(state: &RequestState, agent_id: &str, transcript: &[Message], args: &Value) {
    let Ok(entry) = state.registry.get_entry(agent_id) else {
        state.emitter.error(format!("agente terminal desconhecido: '{agent_id}'")).await;
        state.emitter.done().await;
        return;
    };

    let structured_intent = args
        .get("instructions")
        .or_else(|| args.get("query"))
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string();
    let context = recent_context_slice(transcript, &structured_intent);

    match specialist::run_streaming(&state.gateway, &state.config, &entry.system_prompt, &entry.model, context).await {
        Ok(text) => {
            for chunk in specialist::chunk_by_words(&text, state.config.reply_chunk_words) {
                state.emitter.emit(EventBody::Chunk { text: chunk }).await;
            }
        }
        Err(e) => state.emitter.error(format!("{e}")).await,
    }
    state.emitter.done().await;
}

/// Runs one non-terminal specialist call through Specialist Runner → QA
/// Reviewer (up to `MAX_QA_RETRIES` correction passes) → Anti-Hallucination
/// Validator, returning the content to append to the supervisor transcript
/// (§4.7 step 4's non-terminal branch).
async fn run_non_terminal_specialist(
    state: &RequestState,
    agent_id: &str,
    supervisor_transcript: &[Message],
    args: &Value,
    tool_result_transcript: &mut Vec<String>,
) -> String {
    let Ok(entry) = state.registry.get_entry(agent_id) else {
        return format!("ERRO: agente desconhecido '{agent_id}'");
    };

    let structured_intent = args
        .get("instructions")
        .or_else(|| args.get("query"))
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string();
    let user_intent = structured_intent.clone();
    let tool_schema_values: Vec<Value> = entry
        .tools
        .iter()
        .map(|name| json!({"type": "function", "function": {"name": name, "parameters": {"type": "object"}}}))
        .collect();
    let tool_schema = if tool_schema_values.is_empty() { None } else { Some(tool_schema_values.as_slice()) };

    let mut context = recent_context_slice(supervisor_transcript, &structured_intent);
    let mut output = match specialist::run(
        &state.gateway,
        &state.tools,
        &state.config,
        &entry.system_prompt,
        &entry.model,
        tool_schema,
        context.clone(),
    )
    .await
    {
        Ok(text) => text,
        Err(e) => return format!("ERRO: {e}"),
    };
    tool_result_transcript.push(output.clone());

    for _ in 0..state.config.max_qa_retries {
        let verdict = qa::review(&state.gateway, &state.config, &entry.model, &user_intent, &output, agent_id).await;
        if verdict.approved {
            break;
        }
        let correction = verdict
            .correction_instruction
            .unwrap_or_else(|| "Corrija os problemas apontados e tente novamente.".to_string());
        context.push(Message::user(correction));
        output = match specialist::run(
            &state.gateway,
            &state.tools,
            &state.config,
            &entry.system_prompt,
            &entry.model,
            tool_schema,
            context.clone(),
        )
        .await
        {
            Ok(text) => text,
            Err(e) => return format!("ERRO: {e}"),
        };
        tool_result_transcript.push(output.clone());
    }

    if validator::is_file_producing_route(agent_id) {
        let blob_store_host = state.config.supabase_url.as_deref().and_then(validator::blob_store_host);
        let with_link = validator::ensure_link_present(&output, tool_result_transcript, blob_store_host);
        validator::suppress_content(&with_link)
    } else {
        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_route_maps_chat_to_a_terminal_route() {
        assert!(matches!(lookup_route("chat"), Some(Route::Terminal { agent_id: "chat" })));
    }

    #[test]
    fn lookup_route_maps_ask_browser_to_the_direct_executor() {
        assert!(matches!(lookup_route("ask_browser"), Some(Route::Browser)));
    }

    #[test]
    fn lookup_route_returns_none_for_an_unknown_name() {
        assert!(lookup_route("does_not_exist").is_none());
    }

    #[test]
    fn supervisor_tool_schema_exposes_every_routable_name() {
        let schema = supervisor_tool_schema();
        let names: Vec<&str> = schema
            .iter()
            .map(|t| t["function"]["name"].as_str().unwrap())
            .collect();
        assert!(names.contains(&"chat"));
        assert!(names.contains(&"file_generator"));
        assert!(names.contains(&"ask_browser"));
    }
}
