//! Request Edge (§4.9): the `POST /api/agent/chat` axum handler. Builds
//! request-scoped state, spawns the Supervisor Orchestrator on its own
//! task, and adapts the event channel into an SSE response.
//!
//! Grounded on `mcp_http_adapter.rs::AxumHttpAdapter` for the
//! router/handler construction style (state capture, `IntoResponse`), and
//! `virtues-os-virtues/apps/tollbooth/src/routes/streaming.rs` for the
//! `mpsc` → `ReceiverStream` → `Sse` wiring this teacher module doesn't
//! itself need (its own HTTP surface is non-streaming JSON-RPC).

pub mod admin;

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::response::sse::{Event as SseEvent, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;

use crate::config::AppConfig;
use crate::edge::admin::ModelCatalogCache;
use crate::events::EventEmitter;
use crate::gateway::Gateway;
use crate::message::Message;
use crate::orchestrator::{self, RequestState};
use crate::registry::AgentRegistry;
use crate::tools::ToolExecutor;

/// Shared, process-lifetime application state injected into every handler
/// via axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub registry: Arc<AgentRegistry>,
    pub tools: Arc<ToolExecutor>,
    pub model_catalog: Arc<ModelCatalogCache>,
}

impl AppState {
    pub fn new(config: Arc<AppConfig>) -> Self {
        let registry = Arc::new(AgentRegistry::load(
            std::env::var("AGENT_REGISTRY_OVERRIDE_PATH").ok().map(std::path::PathBuf::from),
        ));
        let tools = Arc::new(ToolExecutor::new(config.clone()));
        let model_catalog = Arc::new(ModelCatalogCache::default());
        Self { config, registry, tools, model_catalog }
    }
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub messages: Vec<Message>,
    #[serde(default)]
    pub model: Option<String>,
}

/// Bounds how far the orchestrator can run ahead of a slow SSE consumer
/// before `EventEmitter::emit` starts applying backpressure.
const EVENT_CHANNEL_CAPACITY: usize = 64;

pub async fn chat_handler(State(state): State<AppState>, Json(request): Json<ChatRequest>) -> Response {
    let gateway = match Gateway::new(&state.config) {
        Ok(g) => Arc::new(g),
        Err(e) => {
            return (axum::http::StatusCode::SERVICE_UNAVAILABLE, format!("{e}")).into_response();
        }
    };

    let mut config = (*state.config).clone();
    if let Some(model) = request.model {
        config.openrouter_model = model;
    }

    let (emitter, receiver) = EventEmitter::channel(EVENT_CHANNEL_CAPACITY);
    let request_state = RequestState {
        registry: state.registry.clone(),
        gateway,
        tools: state.tools.clone(),
        config: Arc::new(config),
        emitter,
    };

    let heartbeat_emitter = request_state.emitter.clone();
    let heartbeat = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(30));
        ticker.tick().await; // first tick fires immediately; skip it
        loop {
            ticker.tick().await;
            if !heartbeat_emitter.send_heartbeat().await {
                break;
            }
        }
    });

    let (cancel_tx, cancel_rx) = tokio::sync::oneshot::channel::<()>();
    tokio::spawn(async move {
        orchestrator::run(&request_state, request.messages, cancel_rx).await;
        heartbeat.abort();
    });

    // Dropping `cancel_tx` when the response body future is dropped (client
    // disconnect) is exactly the axum/hyper disconnect-via-drop signal
    // `cancel_rx` above races against (§4.9 Implementation note). `KeepAlive`
    // is intentionally not used — the heartbeat task above emits an
    // application-level `status` event instead, so idle-but-alive
    // connections show up distinctly from stalled ones in the event log.
    let guarded_stream = ReceiverStream::new(receiver).map(move |event| {
        let _keep_alive = &cancel_tx;
        let payload = serde_json::to_string(&event).unwrap_or_else(|_| "{}".to_string());
        Ok::<_, Infallible>(SseEvent::default().data(payload))
    });

    Sse::new(guarded_stream).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_request_deserializes_a_minimal_body() {
        let body = serde_json::json!({"messages": [{"role": "user", "content": "oi"}]});
        let parsed: ChatRequest = serde_json::from_value(body).unwrap();
        assert_eq!(parsed.messages.len(), 1);
        assert!(parsed.model.is_none());
    }
}
