//! Admin routes (§6): read/write the Agent Registry, and a cached model
//! catalog. Gated by a bearer token compared in constant time.
//!
//! Grounded on `mcp_http_adapter.rs`'s bearer-check scaffold (there a
//! `// TODO: validate token` stub) and `registry.py`'s admin surface for the
//! route shapes. The constant-time comparison itself is `subtle`, already a
//! pack dependency via `http_client_pool.rs`'s TLS stack.

use std::time::{Duration, Instant};

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{json, Value};
use subtle::ConstantTimeEq;
use tokio::sync::Mutex;

use crate::config::AppConfig;
use crate::edge::AppState;
use crate::registry::AgentPatch;

/// Checks the `Authorization: Bearer <token>` header against
/// `config.admin_token` in constant time. `None` (no token configured) locks
/// every admin route out rather than defaulting to open.
fn authorize(headers: &HeaderMap, config: &AppConfig) -> Result<(), Response> {
    let Some(expected) = &config.admin_token else {
        return Err((StatusCode::SERVICE_UNAVAILABLE, "admin routes are not configured").into_response());
    };
    let presented = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    let Some(presented) = presented else {
        return Err((StatusCode::UNAUTHORIZED, "missing bearer token").into_response());
    };

    // `subtle::ConstantTimeEq` is defined byte-for-byte, so unequal lengths
    // must be rejected without ever calling it on mismatched slices.
    let matches = presented.len() == expected.len() && presented.as_bytes().ct_eq(expected.as_bytes()).into();
    if matches {
        Ok(())
    } else {
        Err((StatusCode::UNAUTHORIZED, "invalid bearer token").into_response())
    }
}

pub async fn list_agents(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Err(resp) = authorize(&headers, &state.config) {
        return resp;
    }
    Json(state.registry.list()).into_response()
}

pub async fn get_agent(State(state): State<AppState>, headers: HeaderMap, Path(id): Path<String>) -> Response {
    if let Err(resp) = authorize(&headers, &state.config) {
        return resp;
    }
    match state.registry.get_entry(&id) {
        Ok(entry) => Json(entry).into_response(),
        Err(e) => (StatusCode::NOT_FOUND, e.to_string()).into_response(),
    }
}

pub async fn update_agent(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(patch): Json<AgentPatch>,
) -> Response {
    if let Err(resp) = authorize(&headers, &state.config) {
        return resp;
    }
    match state.registry.update(&id, patch) {
        Ok(entry) => Json(entry).into_response(),
        Err(e) => (StatusCode::NOT_FOUND, e.to_string()).into_response(),
    }
}

pub async fn reset_agent(State(state): State<AppState>, headers: HeaderMap, Path(id): Path<String>) -> Response {
    if let Err(resp) = authorize(&headers, &state.config) {
        return resp;
    }
    match state.registry.reset(&id) {
        Ok(entry) => Json(entry).into_response(),
        Err(e) => (StatusCode::NOT_FOUND, e.to_string()).into_response(),
    }
}

/// A single-entry cache for the model catalog, keyed only by provider kind
/// since there is exactly one configured provider per process (§6 "cached
/// briefly", TTL from `config.cache_ttl`, default one hour).
pub struct ModelCatalogCache {
    inner: Mutex<Option<(Instant, Value)>>,
}

impl Default for ModelCatalogCache {
    fn default() -> Self {
        Self { inner: Mutex::new(None) }
    }
}

impl ModelCatalogCache {
    async fn get_or_fetch(&self, http: &reqwest::Client, ttl: Duration) -> Result<Value, String> {
        let mut guard = self.inner.lock().await;
        if let Some((fetched_at, value)) = guard.as_ref() {
            if fetched_at.elapsed() < ttl {
                return Ok(value.clone());
            }
        }
        let response = http
            .get("https://openrouter.ai/api/v1/models")
            .send()
            .await
            .map_err(|e| e.to_string())?;
        let body: Value = response.json().await.map_err(|e| e.to_string())?;
        *guard = Some((Instant::now(), body.clone()));
        Ok(body)
    }
}

pub async fn list_models(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Err(resp) = authorize(&headers, &state.config) {
        return resp;
    }
    let http = reqwest::Client::new();
    match state.model_catalog.get_or_fetch(&http, state.config.cache_ttl).await {
        Ok(body) => Json(body).into_response(),
        Err(e) => (StatusCode::BAD_GATEWAY, json!({"error": e}).to_string()).into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn config_with_token(token: &str) -> AppConfig {
        let mut config = AppConfig::from_env();
        config.admin_token = Some(token.to_string());
        config
    }

    #[test]
    fn authorize_accepts_a_matching_bearer_token() {
        let config = config_with_token("s3cr3t");
        let mut headers = HeaderMap::new();
        headers.insert(axum::http::header::AUTHORIZATION, HeaderValue::from_static("Bearer s3cr3t"));
        assert!(authorize(&headers, &config).is_ok());
    }

    #[test]
    fn authorize_rejects_a_mismatched_token() {
        let config = config_with_token("s3cr3t");
        let mut headers = HeaderMap::new();
        headers.insert(axum::http::header::AUTHORIZATION, HeaderValue::from_static("Bearer wrong"));
        assert!(authorize(&headers, &config).is_err());
    }

    #[test]
    fn authorize_rejects_a_missing_header() {
        let config = config_with_token("s3cr3t");
        let headers = HeaderMap::new();
        assert!(authorize(&headers, &config).is_err());
    }

    #[test]
    fn authorize_locks_out_everyone_when_no_token_is_configured() {
        let mut config = AppConfig::from_env();
        config.admin_token = None;
        let mut headers = HeaderMap::new();
        headers.insert(axum::http::header::AUTHORIZATION, HeaderValue::from_static("Bearer anything"));
        assert!(authorize(&headers, &config).is_err());
    }
}
