//! `web_search` and `web_fetch` (§4.2).
//!
//! Provider shape grounded on `tools/http_client.rs` (timeout + size-cap
//! discipline); provider identity (Tavily primary, Brave fallback) grounded
//! on `original_source/backend/core/config.py`.

use serde::Deserialize;
use serde_json::Value;

use crate::config::AppConfig;
use crate::tools::ToolError;

fn require_str<'a>(args: &'a Value, key: &str) -> Result<&'a str, ToolError> {
    args.get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ToolError::InvalidParameters(format!("missing required field '{key}'")))
}

#[derive(Debug, Deserialize)]
struct TavilyResult {
    title: String,
    url: String,
    #[serde(default)]
    content: String,
}

#[derive(Debug, Deserialize)]
struct TavilyResponse {
    #[serde(default)]
    results: Vec<TavilyResult>,
}

#[derive(Debug, Deserialize)]
struct BraveWebResult {
    title: String,
    url: String,
    #[serde(default)]
    description: String,
}

#[derive(Debug, Deserialize)]
struct BraveWeb {
    #[serde(default)]
    results: Vec<BraveWebResult>,
}

#[derive(Debug, Deserialize)]
struct BraveResponse {
    web: Option<BraveWeb>,
}

fn format_results(rows: &[(String, String, String)]) -> String {
    let mut out = String::from("Resultados da busca:\n\n");
    for (title, url, snippet) in rows {
        out.push_str(&format!("- [{title}]({url}) — {snippet}\n"));
    }
    out
}

/// Tries Tavily first, then Brave. On total failure returns an error marker
/// string rather than propagating (§4.2 Error policy).
pub async fn web_search(
    http: &reqwest::Client,
    config: &AppConfig,
    args: &Value,
) -> Result<String, ToolError> {
    let query = require_str(args, "query")?;

    if let Some(key) = &config.tavily_api_key {
        let resp = http
            .post("https://api.tavily.com/search")
            .json(&serde_json::json!({"api_key": key, "query": query, "max_results": 5}))
            .send()
            .await;
        if let Ok(resp) = resp {
            if resp.status().is_success() {
                if let Ok(parsed) = resp.json::<TavilyResponse>().await {
                    let rows: Vec<_> = parsed
                        .results
                        .into_iter()
                        .map(|r| (r.title, r.url, r.content.chars().take(200).collect()))
                        .collect();
                    if !rows.is_empty() {
                        return Ok(format_results(&rows));
                    }
                }
            }
        }
    }

    if let Some(key) = &config.brave_api_key {
        let resp = http
            .get("https://api.search.brave.com/res/v1/web/search")
            .query(&[("q", query)])
            .header("X-Subscription-Token", key)
            .send()
            .await;
        if let Ok(resp) = resp {
            if resp.status().is_success() {
                if let Ok(parsed) = resp.json::<BraveResponse>().await {
                    if let Some(web) = parsed.web {
                        let rows: Vec<_> = web
                            .results
                            .into_iter()
                            .map(|r| (r.title, r.url, r.description.chars().take(200).collect()))
                            .collect();
                        if !rows.is_empty() {
                            return Ok(format_results(&rows));
                        }
                    }
                }
            }
        }
    }

    Err(ToolError::ExecutionFailed(
        "todos os provedores de busca falharam ou não estão configurados".to_string(),
    ))
}

/// Strip tags that never carry reader-relevant content. Deliberately
/// conservative: this is not a full HTML parser, just enough to drop
/// `<script>`/`<style>`/`<nav>` bodies and collapse remaining tags to
/// whitespace, matching `_web_fetch`'s BeautifulSoup-based stripping.
fn strip_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut in_tag = false;
    let mut skip_depth: u32 = 0;
    let lower = input.to_lowercase();
    let bytes = input.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i] as char;
        if c == '<' {
            let rest = &lower[i..];
            if rest.starts_with("<script") || rest.starts_with("<style") || rest.starts_with("<nav") {
                skip_depth += 1;
            } else if (rest.starts_with("</script") || rest.starts_with("</style") || rest.starts_with("</nav"))
                && skip_depth > 0
            {
                skip_depth -= 1;
            }
            in_tag = true;
        }
        if !in_tag && skip_depth == 0 {
            out.push(c);
        }
        if c == '>' {
            in_tag = false;
            out.push(' ');
        }
        i += c.len_utf8();
    }
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub async fn web_fetch(
    http: &reqwest::Client,
    config: &AppConfig,
    args: &Value,
) -> Result<String, ToolError> {
    let url = require_str(args, "url")?;

    let response = http
        .get(url)
        .timeout(config.web_timeout)
        .send()
        .await
        .map_err(|e| ToolError::ExecutionFailed(format!("falha ao acessar '{url}': {e}")))?;

    if !response.status().is_success() {
        return Err(ToolError::ExecutionFailed(format!(
            "'{url}' retornou status {}",
            response.status()
        )));
    }

    let body = response
        .text()
        .await
        .map_err(|e| ToolError::ExecutionFailed(format!("falha ao ler corpo de '{url}': {e}")))?;

    let truncated_source: String = body.chars().take(config.web_max_response_size).collect();
    let text = strip_html(&truncated_source);

    let title = text.split('.').next().unwrap_or("").trim();
    let mut result = format!("# {title}\n\n");
    if text.chars().count() > config.web_max_chars {
        let body: String = text.chars().take(config.web_max_chars).collect();
        result.push_str(&body);
        result.push_str("... [Truncado]");
    } else {
        result.push_str(&text);
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strip_html_drops_script_bodies() {
        let html = "<html><head><script>evil()</script></head><body><p>Hello world</p></body></html>";
        let text = strip_html(html);
        assert!(text.contains("Hello world"));
        assert!(!text.contains("evil"));
    }

    #[tokio::test]
    async fn web_search_without_any_provider_key_returns_an_error() {
        let config = AppConfig {
            tavily_api_key: None,
            brave_api_key: None,
            ..AppConfig::from_env()
        };
        let http = reqwest::Client::new();
        let err = web_search(&http, &config, &serde_json::json!({"query": "rust"})).await;
        assert!(err.is_err());
    }
}
