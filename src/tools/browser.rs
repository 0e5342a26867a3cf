//! `ask_browser` (§4.2): delegates to a headless-browser provider.
//!
//! The provider interface (§6) accepts `{url, formats, actions?, wait_for?,
//! only_main_content?, include_tags?, exclude_tags?, mobile?}` and returns
//! extracted markdown. An unset or empty `actions` list reduces to a plain
//! fetch-equivalent.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::AppConfig;
use crate::tools::ToolError;

/// One step in the ordered action list a caller may attach to a browse
/// request (click, scroll, wait, write, press, screenshot,
/// execute_javascript, scrape).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BrowserAction {
    Click { selector: String },
    Scroll { direction: Option<String> },
    Wait { milliseconds: Option<u64> },
    Write { selector: String, text: String },
    Press { key: String },
    Screenshot,
    ExecuteJavascript { script: String },
    Scrape,
}

impl BrowserAction {
    /// Short label used in `browser_action` status events (§4.7, §4.8).
    pub fn kind(&self) -> &'static str {
        match self {
            BrowserAction::Click { .. } => "click",
            BrowserAction::Scroll { .. } => "scroll",
            BrowserAction::Wait { .. } => "wait",
            BrowserAction::Write { .. } => "write",
            BrowserAction::Press { .. } => "press",
            BrowserAction::Screenshot => "screenshot",
            BrowserAction::ExecuteJavascript { .. } => "execute_javascript",
            BrowserAction::Scrape => "scrape",
        }
    }
}

#[derive(Debug, Serialize)]
struct FirecrawlRequest<'a> {
    url: &'a str,
    formats: Vec<&'static str>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    actions: Vec<BrowserAction>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(rename = "onlyMainContent")]
    only_main_content: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct FirecrawlData {
    #[serde(default)]
    markdown: String,
}

#[derive(Debug, Deserialize)]
struct FirecrawlResponse {
    #[serde(default)]
    success: bool,
    data: Option<FirecrawlData>,
}

/// Parse the `actions` argument. Missing or empty reduces to a plain fetch.
pub fn parse_actions(args: &Value) -> Vec<BrowserAction> {
    args.get("actions")
        .and_then(|v| serde_json::from_value::<Vec<BrowserAction>>(v.clone()).ok())
        .unwrap_or_default()
}

pub async fn ask_browser(
    http: &reqwest::Client,
    config: &AppConfig,
    args: &Value,
) -> Result<String, ToolError> {
    let url = args
        .get("url")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ToolError::InvalidParameters("missing required field 'url'".to_string()))?;

    let key = config
        .firecrawl_api_key
        .as_ref()
        .ok_or_else(|| ToolError::Disabled("FIRECRAWL_API_KEY não configurada".to_string()))?;

    let actions = parse_actions(args);
    let request = FirecrawlRequest {
        url,
        formats: vec!["markdown"],
        actions,
        only_main_content: Some(true),
    };

    let response = http
        .post("https://api.firecrawl.dev/v1/scrape")
        .bearer_auth(key)
        .json(&request)
        .send()
        .await
        .map_err(|e| ToolError::ExecutionFailed(format!("falha no navegador: {e}")))?;

    if !response.status().is_success() {
        return Err(ToolError::ExecutionFailed(format!(
            "navegador retornou status {}",
            response.status()
        )));
    }

    let parsed: FirecrawlResponse = response
        .json()
        .await
        .map_err(|e| ToolError::ExecutionFailed(format!("resposta inválida do navegador: {e}")))?;

    if !parsed.success {
        return Err(ToolError::ExecutionFailed(
            "navegador reportou falha ao processar a página".to_string(),
        ));
    }

    Ok(parsed
        .data
        .map(|d| d.markdown)
        .unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_actions_field_parses_to_an_empty_list() {
        let args = serde_json::json!({"url": "https://example.com"});
        assert!(parse_actions(&args).is_empty());
    }

    #[test]
    fn action_list_round_trips_order_and_fields() {
        let args = serde_json::json!({
            "url": "https://example.com",
            "actions": [
                {"type": "scroll", "direction": "down"},
                {"type": "click", "selector": "#accept"},
            ]
        });
        let actions = parse_actions(&args);
        assert_eq!(actions.len(), 2);
        assert_eq!(actions[0].kind(), "scroll");
        assert_eq!(actions[1].kind(), "click");
    }
}
