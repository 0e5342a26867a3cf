//! Process entrypoint: loads configuration, builds the axum router, and
//! serves `/api/agent/chat`, `/api/builder/chat`, and `/api/admin/*`.
//!
//! Grounded on `virtues-os-virtues/apps/tollbooth/src/main.rs`'s
//! config-then-router-then-serve shape, adapted to this crate's
//! `log`/`env_logger` stack (the teacher's own ambient choice) rather than
//! `tracing`.

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use arcco_agent::config::AppConfig;
use arcco_agent::edge::{admin, chat_handler, AppState};
use arcco_agent::builder::builder_handler;

#[tokio::main]
async fn main() {
    env_logger::init();

    let config = AppConfig::from_env();
    if let Err(e) = config.validate() {
        log::error!("[STARTUP] invalid configuration: {e}");
        std::process::exit(1);
    }
    let bind_addr = config.http_bind_addr.clone();
    let state = AppState::new(Arc::new(config));

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/api/agent/chat", post(chat_handler))
        .route("/api/builder/chat", post(builder_handler))
        .route("/api/admin/agents", get(admin::list_agents))
        .route("/api/admin/agents/{id}", get(admin::get_agent).put(admin::update_agent))
        .route("/api/admin/agents/reset/{id}", post(admin::reset_agent))
        .route("/api/admin/models", get(admin::list_models))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state);

    let listener = match tokio::net::TcpListener::bind(&bind_addr).await {
        Ok(l) => l,
        Err(e) => {
            log::error!("[STARTUP] failed to bind {bind_addr}: {e}");
            std::process::exit(1);
        }
    };
    log::info!("[STARTUP] arcco-agentd listening on {bind_addr}");

    if let Err(e) = axum::serve(listener, app).await {
        log::error!("[SERVER] fatal: {e}");
        std::process::exit(1);
    }
}

