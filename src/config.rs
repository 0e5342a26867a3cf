//! Process configuration for the agent server.
//!
//! Like [`CloudLLMConfig`](crate) upstream, this struct is intentionally
//! minimal: no TOML/YAML config-file parsing dependency is introduced. Every
//! field is sourced from an environment variable with a documented default
//! (§6, §2a), read once at process start via [`AppConfig::from_env`].

use std::path::PathBuf;
use std::time::Duration;

/// Global configuration for the agent server, read once at startup.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Anthropic key, if the Gateway should address the Anthropic-shaped endpoint.
    pub anthropic_api_key: Option<String>,
    /// OpenRouter key; used when `anthropic_api_key` is absent.
    pub openrouter_api_key: Option<String>,
    /// Default model id when a request does not override `model`.
    pub openrouter_model: String,

    pub supabase_url: Option<String>,
    pub supabase_key: Option<String>,
    pub supabase_storage_bucket: String,

    pub tavily_api_key: Option<String>,
    pub brave_api_key: Option<String>,
    pub firecrawl_api_key: Option<String>,

    /// Supervisor iteration cap `N` (§4.7).
    pub max_iterations: usize,
    /// Per-call output token cap passed to the LLM Gateway.
    pub max_tokens: u32,

    pub web_timeout: Duration,
    pub web_max_response_size: usize,
    pub web_max_chars: usize,

    pub allow_code_execution: bool,
    pub code_timeout: Duration,

    /// Confinement root for file-reading/writing tools (§3 Workspace path).
    pub workspace: PathBuf,

    pub cors_origins: String,
    pub log_level: String,

    /// Bearer secret gating `/api/admin/*`. `None` disables those routes.
    pub admin_token: Option<String>,
    pub http_bind_addr: String,
    /// TTL for the model-catalog cache and the LLM key cache (§4.1, §6).
    pub cache_ttl: Duration,
    /// QA correction retries before the supervisor accepts the specialist's
    /// last answer as-is (§4.7, default 2).
    pub max_qa_retries: usize,
    /// Word-count granularity for supervisor reply chunking (§4.7 step 3).
    pub reply_chunk_words: usize,
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

fn env_bool(key: &str, default: bool) -> bool {
    env_string(key)
        .map(|v| v.eq_ignore_ascii_case("true") || v == "1")
        .unwrap_or(default)
}

fn env_parsed<T: std::str::FromStr>(key: &str, default: T) -> T {
    env_string(key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl AppConfig {
    /// Build configuration from the environment, filling in the documented
    /// defaults for anything unset (§6). Never panics: a missing LLM
    /// credential is caught later by [`AppConfig::validate`], not here.
    pub fn from_env() -> Self {
        Self {
            anthropic_api_key: env_string("ANTHROPIC_API_KEY"),
            openrouter_api_key: env_string("OPENROUTER_API_KEY"),
            openrouter_model: env_string("OPENROUTER_MODEL")
                .unwrap_or_else(|| "anthropic/claude-3.5-sonnet".to_string()),

            supabase_url: env_string("SUPABASE_URL"),
            supabase_key: env_string("SUPABASE_KEY"),
            supabase_storage_bucket: env_string("SUPABASE_STORAGE_BUCKET")
                .unwrap_or_else(|| "chat-uploads".to_string()),

            tavily_api_key: env_string("TAVILY_API_KEY"),
            brave_api_key: env_string("BRAVE_SEARCH_API_KEY"),
            firecrawl_api_key: env_string("FIRECRAWL_API_KEY"),

            max_iterations: env_parsed("AGENT_MAX_ITERATIONS", 20),
            max_tokens: env_parsed("AGENT_MAX_TOKENS", 8096),

            web_timeout: Duration::from_secs_f64(env_parsed("WEB_TIMEOUT", 20.0)),
            web_max_response_size: env_parsed("WEB_MAX_SIZE", 2_000_000),
            web_max_chars: env_parsed("WEB_MAX_CHARS", 50_000),

            allow_code_execution: env_bool("ALLOW_CODE_EXEC", false),
            code_timeout: Duration::from_secs_f64(env_parsed("CODE_TIMEOUT", 10.0)),

            workspace: env_string("AGENT_WORKSPACE")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("/tmp/agent_workspace")),

            cors_origins: env_string("CORS_ORIGINS").unwrap_or_else(|| "*".to_string()),
            log_level: env_string("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),

            admin_token: env_string("ADMIN_TOKEN"),
            http_bind_addr: env_string("HTTP_BIND_ADDR")
                .unwrap_or_else(|| "0.0.0.0:8080".to_string()),
            cache_ttl: Duration::from_secs(env_parsed("AGENT_CACHE_TTL", 3600)),
            max_qa_retries: env_parsed("MAX_QA_RETRIES", 2),
            reply_chunk_words: env_parsed("BUILDER_REPLY_CHUNK_WORDS", 6),
        }
    }

    /// The credential the Gateway should present, and whether it targets the
    /// Anthropic-shaped or OpenRouter-shaped endpoint.
    pub fn llm_credential(&self) -> Option<(&str, LlmProviderKind)> {
        if let Some(key) = &self.anthropic_api_key {
            Some((key, LlmProviderKind::Anthropic))
        } else {
            self.openrouter_api_key
                .as_deref()
                .map(|key| (key, LlmProviderKind::OpenRouter))
        }
    }

    /// Minimal sanity check run at startup; does not consult any network.
    pub fn validate(&self) -> Result<(), String> {
        if self.llm_credential().is_none() {
            return Err("ANTHROPIC_API_KEY or OPENROUTER_API_KEY is required".to_string());
        }
        Ok(())
    }
}

/// Which wire shape the configured credential addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmProviderKind {
    Anthropic,
    OpenRouter,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_when_env_is_unset() {
        // SAFETY-by-convention: tests run single-threaded enough for this crate's
        // narrow env surface; we only ever read keys this module owns.
        std::env::remove_var("AGENT_MAX_ITERATIONS");
        let cfg = AppConfig::from_env();
        assert_eq!(cfg.max_iterations, 20);
        assert_eq!(cfg.supabase_storage_bucket, "chat-uploads");
        assert!(!cfg.allow_code_execution);
    }

    #[test]
    fn validate_requires_an_llm_credential() {
        std::env::remove_var("ANTHROPIC_API_KEY");
        std::env::remove_var("OPENROUTER_API_KEY");
        let cfg = AppConfig::from_env();
        assert!(cfg.validate().is_err());
    }
}
