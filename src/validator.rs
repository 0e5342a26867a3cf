//! Anti-Hallucination Validator (§4.6): guarantees file-producing routes'
//! responses carry the artifact link, and keeps the supervisor from ever
//! seeing a file tool-result's internal structure.
//!
//! Grounded on the link-injection wording in
//! `original_source/backend/agents/executor.py` and `SPEC_FULL.md` §4.6.

/// Routes whose specialist output is expected to carry a downloadable
/// artifact link (§4.6, §4.3 concrete agent set).
pub fn is_file_producing_route(route: &str) -> bool {
    matches!(route, "file_generator" | "file_modifier")
}

/// A markdown link `[label](url)` found in text, with its byte range.
struct MarkdownLink {
    url: String,
}

fn find_markdown_links(text: &str) -> Vec<MarkdownLink> {
    let mut links = Vec::new();
    let bytes = text.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'[' {
            if let Some(close_bracket) = text[i..].find(']') {
                let after_bracket = i + close_bracket + 1;
                if text[after_bracket..].starts_with('(') {
                    if let Some(close_paren) = text[after_bracket..].find(')') {
                        let url = &text[after_bracket + 1..after_bracket + close_paren];
                        links.push(MarkdownLink { url: url.to_string() });
                        i = after_bracket + close_paren;
                        continue;
                    }
                }
            }
        }
        i += 1;
    }
    links
}

/// The host component of a bare `http(s)://` URL, with no markdown around
/// it — e.g. `raw_url_host("https://x.example/a.pdf")` is `Some("x.example")`.
fn raw_url_host(url: &str) -> Option<&str> {
    let rest = url.strip_prefix("https://").or_else(|| url.strip_prefix("http://"))?;
    let end = rest.find(['/', '?', '#']).unwrap_or(rest.len());
    Some(&rest[..end])
}

/// The host component of the configured blob store's base URL, used to
/// recognize a raw (non-markdown) artifact URL in a tool trace (§4.6's
/// second heuristic: "a raw URL whose host matches the configured blob
/// store").
pub fn blob_store_host(supabase_url: &str) -> Option<&str> {
    raw_url_host(supabase_url)
}

/// Every bare `http(s)://...` token in `text`, stripped of surrounding
/// punctuation a human sentence would wrap it in.
fn find_raw_urls(text: &str) -> Vec<String> {
    text.split_whitespace()
        .map(|token| token.trim_matches(|c: char| matches!(c, '(' | ')' | '[' | ']' | '<' | '>' | ',' | '.' | '"' | '\'')))
        .filter(|token| token.starts_with("http://") || token.starts_with("https://"))
        .map(str::to_string)
        .collect()
}

/// Scans `tool_result_transcript` (the textual tool results accumulated
/// this request, most recent last) for the artifact URL the specialist's
/// own response dropped: first a markdown-linked URL, then — if
/// `blob_store_host` is known — a bare URL whose host matches it (§4.6).
fn most_recent_artifact_url(tool_result_transcript: &[String], blob_store_host: Option<&str>) -> Option<String> {
    if let Some(url) = tool_result_transcript
        .iter()
        .rev()
        .find_map(|text| find_markdown_links(text).into_iter().next_back().map(|l| l.url))
    {
        return Some(url);
    }

    let host = blob_store_host?;
    tool_result_transcript.iter().rev().find_map(|text| {
        find_raw_urls(text)
            .into_iter()
            .rev()
            .find(|url| raw_url_host(url) == Some(host))
    })
}

/// Ensures `response` contains a markdown link; if not, appends the most
/// recent artifact URL found in the tool-result transcript (by markdown
/// link, or by raw-URL host match against `blob_store_host`). Returns the
/// (possibly unchanged) response.
pub fn ensure_link_present(response: &str, tool_result_transcript: &[String], blob_store_host: Option<&str>) -> String {
    if !find_markdown_links(response).is_empty() {
        return response.to_string();
    }
    match most_recent_artifact_url(tool_result_transcript, blob_store_host) {
        Some(url) => format!("{response}\n\n[Baixar arquivo]({url})"),
        None => {
            log::warn!("[VALIDATOR] no artifact URL found in tool-result transcript to append");
            response.to_string()
        }
    }
}

/// Replaces a file tool-result's body with a minimal confirmation plus the
/// markdown link(s) it carries (§4.6 "Content suppression"), so the
/// supervisor's transcript never contains the artifact's internal preview
/// text.
pub fn suppress_content(tool_result_text: &str) -> String {
    let links = find_markdown_links(tool_result_text);
    if links.is_empty() {
        return tool_result_text.to_string();
    }
    let links_text: Vec<String> = links
        .into_iter()
        .map(|l| format!("[Baixar arquivo]({})", l.url))
        .collect();
    format!("Arquivo processado com sucesso. {}", links_text.join(" "))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn find_markdown_links_extracts_url_from_label_and_parens() {
        let links = find_markdown_links("veja [aqui](https://x.example/a.pdf) para mais.");
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].url, "https://x.example/a.pdf");
    }

    #[test]
    fn ensure_link_present_is_a_no_op_when_a_link_already_exists() {
        let response = "Pronto! [Baixar](https://x.example/a.pdf)";
        let out = ensure_link_present(response, &[], None);
        assert_eq!(out, response);
    }

    #[test]
    fn ensure_link_present_appends_the_most_recent_tool_result_url() {
        let transcript = vec![
            "Arquivo gerado: [Baixar PDF](https://x.example/old.pdf)".to_string(),
            "Arquivo gerado: [Baixar PDF](https://x.example/new.pdf)".to_string(),
        ];
        let out = ensure_link_present("Pronto, aqui está seu documento.", &transcript, None);
        assert!(out.contains("https://x.example/new.pdf"));
    }

    #[test]
    fn ensure_link_present_falls_back_to_a_bare_url_matching_the_blob_store_host() {
        let transcript = vec![
            "Planilha salva em https://blob.example/u/relatorio-20260730.xlsx com sucesso.".to_string(),
        ];
        let out = ensure_link_present(
            "Pronto, gerei sua planilha.",
            &transcript,
            Some("blob.example"),
        );
        assert!(out.contains("https://blob.example/u/relatorio-20260730.xlsx"));
    }

    #[test]
    fn ensure_link_present_ignores_a_bare_url_from_an_unrelated_host() {
        let transcript = vec!["Veja também https://docs.example/guia.html para mais detalhes.".to_string()];
        let out = ensure_link_present("Pronto, gerei sua planilha.", &transcript, Some("blob.example"));
        assert!(!out.contains("docs.example"));
    }

    #[test]
    fn blob_store_host_extracts_the_host_from_a_supabase_url() {
        assert_eq!(blob_store_host("https://abcd.supabase.co"), Some("abcd.supabase.co"));
    }

    #[test]
    fn suppress_content_drops_preview_text_but_keeps_the_link() {
        let raw = "Aba 'Sheet1': 10 linhas x 3 colunas\n[Baixar Planilha](https://x.example/a.xlsx)";
        let suppressed = suppress_content(raw);
        assert!(!suppressed.contains("linhas"));
        assert!(suppressed.contains("https://x.example/a.xlsx"));
    }

    #[test]
    fn is_file_producing_route_covers_generator_and_modifier_only() {
        assert!(is_file_producing_route("file_generator"));
        assert!(is_file_producing_route("file_modifier"));
        assert!(!is_file_producing_route("chat"));
    }
}
