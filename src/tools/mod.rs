//! Tool Executor (§4.2): a dispatch table keyed by tool name, wrapped by a
//! per-request content-addressed cache (§4.4 "Tool-result cache").
//!
//! Grounded on `tool_protocol.rs`'s `ToolProtocol`/`ToolError` shape: tools
//! are implemented as async functions rather than a trait-object registry,
//! since this server has a small, fixed tool set rather than a pluggable
//! protocol surface.

pub mod browser;
pub mod documents;
pub mod python;
pub mod web;
pub mod workspace;

use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;

use sha2::{Digest, Sha256};

use crate::config::AppConfig;
use crate::tools::workspace::Workspace;

/// Errors a single tool invocation can surface internally. The public
/// contract (§4.2 Error policy) is that dispatch *never* propagates these to
/// the model — [`ToolExecutor::dispatch`] always returns a textual marker
/// string instead. This enum exists so individual tool implementations have
/// a typed `Result` to build with.
#[derive(Debug, Clone)]
pub enum ToolError {
    NotFound(String),
    InvalidParameters(String),
    ExecutionFailed(String),
    Timeout(String),
    PathConfinement(String),
    Disabled(String),
}

impl fmt::Display for ToolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ToolError::NotFound(name) => write!(f, "Tool not found: {name}"),
            ToolError::InvalidParameters(msg) => write!(f, "Invalid parameters: {msg}"),
            ToolError::ExecutionFailed(msg) => write!(f, "Tool execution failed: {msg}"),
            ToolError::Timeout(msg) => write!(f, "Tool timed out: {msg}"),
            ToolError::PathConfinement(msg) => write!(f, "Access denied: {msg}"),
            ToolError::Disabled(msg) => write!(f, "Tool disabled: {msg}"),
        }
    }
}

impl std::error::Error for ToolError {}

/// Dispatches named tools against the shared server configuration and
/// workspace, caching results within one request (§4.4).
pub struct ToolExecutor {
    config: std::sync::Arc<AppConfig>,
    workspace: Workspace,
    http: reqwest::Client,
    cache: Mutex<HashMap<String, String>>,
}

impl ToolExecutor {
    pub fn new(config: std::sync::Arc<AppConfig>) -> Self {
        let workspace = Workspace::new(config.workspace.clone());
        let http = reqwest::Client::builder()
            .timeout(config.web_timeout)
            .build()
            .unwrap_or_default();
        Self {
            config,
            workspace,
            http,
            cache: Mutex::new(HashMap::new()),
        }
    }

    fn cache_key(tool_name: &str, arguments: &serde_json::Value) -> String {
        let canonical = arguments.to_string();
        let mut hasher = Sha256::new();
        hasher.update(tool_name.as_bytes());
        hasher.update(b"\0");
        hasher.update(canonical.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    /// Execute `tool_name` with `arguments`, returning the textual result the
    /// model will see. Never returns an `Err`: every failure mode is encoded
    /// as an error-marker string per §4.2's error policy.
    pub async fn dispatch(&self, tool_name: &str, arguments: &serde_json::Value) -> String {
        let key = Self::cache_key(tool_name, arguments);
        if let Some(hit) = self.cache.lock().unwrap().get(&key).cloned() {
            log::debug!("[TOOLS] cache hit for {tool_name}");
            return hit;
        }

        let result = self.dispatch_uncached(tool_name, arguments).await;
        self.cache.lock().unwrap().insert(key, result.clone());
        result
    }

    async fn dispatch_uncached(&self, tool_name: &str, arguments: &serde_json::Value) -> String {
        let outcome = match tool_name {
            "web_search" => web::web_search(&self.http, &self.config, arguments).await,
            "web_fetch" => web::web_fetch(&self.http, &self.config, arguments).await,
            "ask_browser" => browser::ask_browser(&self.http, &self.config, arguments).await,
            "generate_pdf" => documents::generate_pdf(&self.http, &self.config, arguments).await,
            "generate_excel" => documents::generate_excel(&self.http, &self.config, arguments).await,
            "fetch_file_content" => {
                documents::fetch_file_content(&self.http, &self.config, arguments).await
            }
            "modify_excel" => documents::modify_excel(&self.http, &self.config, arguments).await,
            "modify_pptx" => documents::modify_pptx(&self.http, &self.config, arguments).await,
            "modify_pdf" => documents::modify_pdf(&self.http, &self.config, arguments).await,
            "execute_python" => {
                python::execute_python(&self.config, &self.workspace, arguments).await
            }
            other => Err(ToolError::NotFound(other.to_string())),
        };

        match outcome {
            Ok(text) => text,
            Err(err) => format!("ERRO: {err}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unknown_tool_returns_an_error_marker_not_a_panic() {
        let config = std::sync::Arc::new(AppConfig::from_env());
        let executor = ToolExecutor::new(config);
        let out = executor.dispatch("does_not_exist", &serde_json::json!({})).await;
        assert!(out.starts_with("ERRO:"));
    }

    #[tokio::test]
    async fn identical_arguments_hit_the_cache() {
        let mut config = AppConfig::from_env();
        config.allow_code_execution = false;
        let executor = ToolExecutor::new(std::sync::Arc::new(config));
        let args = serde_json::json!({"code": "print(1)"});
        let first = executor.dispatch("execute_python", &args).await;
        let second = executor.dispatch("execute_python", &args).await;
        assert_eq!(first, second);
    }
}
