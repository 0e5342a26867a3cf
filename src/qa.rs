//! QA Reviewer (§4.5): a single fail-open LLM call that judges a
//! specialist's output against the user's intent before the supervisor
//! accepts it.
//!
//! Grounded on `original_source/backend/agents/orchestrator.py::_qa_review`
//! (fencing-strip before JSON decode, fail-open on any error).

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::AppConfig;
use crate::gateway::Gateway;
use crate::message::Message;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QaVerdict {
    pub approved: bool,
    #[serde(default)]
    pub issues: Vec<String>,
    #[serde(default)]
    pub correction_instruction: Option<String>,
}

impl QaVerdict {
    fn approved_default() -> Self {
        Self {
            approved: true,
            issues: Vec::new(),
            correction_instruction: None,
        }
    }
}

const QA_SYSTEM_PROMPT: &str = "Você é um revisor de qualidade. Responda SOMENTE com um objeto JSON \
estrito no formato {\"approved\": bool, \"issues\": [string], \"correction_instruction\": string|null}. \
Nunca use blocos de código (```), apenas o JSON puro.";

/// Strips a leading/trailing ``` fence (with or without a language tag)
/// before attempting to parse JSON, matching the original's lenient
/// response handling.
pub fn strip_fencing(text: &str) -> &str {
    let trimmed = text.trim();
    let without_leading = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .unwrap_or(trimmed);
    without_leading.strip_suffix("```").unwrap_or(without_leading).trim()
}

/// Runs the QA review. Any Gateway error or JSON-parse failure is treated
/// as approval (§4.5 fail-open) rather than propagated.
pub async fn review(
    gateway: &Gateway,
    config: &AppConfig,
    model: &str,
    user_intent: &str,
    specialist_output: &str,
    route: &str,
) -> QaVerdict {
    let prompt = format!(
        "Intenção do usuário: {user_intent}\nRota: {route}\nSaída do especialista:\n{specialist_output}\n\n\
         Avalie se a saída atende à intenção. Para rotas de arquivo, basta haver um link de download. \
         Para rotas de código/design, basta haver um indício estrutural esperado."
    );
    let transcript = vec![Message::system(QA_SYSTEM_PROMPT), Message::user(prompt)];

    let response = match gateway.call(&transcript, model, 512, None).await {
        Ok(msg) => msg,
        Err(e) => {
            log::warn!("[QA] gateway call failed, failing open: {e}");
            return QaVerdict::approved_default();
        }
    };

    let text = response.text_only();
    let cleaned = strip_fencing(&text);
    match serde_json::from_str::<QaVerdict>(cleaned) {
        Ok(verdict) => verdict,
        Err(e) => {
            log::warn!("[QA] response did not parse as JSON, failing open: {e}");
            QaVerdict::approved_default()
        }
    }
}

/// True when `value` already parses as a well-formed QA verdict object —
/// used by tests and by the orchestrator when re-validating a correction.
pub fn looks_like_verdict(value: &Value) -> bool {
    value.get("approved").and_then(Value::as_bool).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strip_fencing_removes_a_json_code_fence() {
        let fenced = "```json\n{\"approved\": true}\n```";
        assert_eq!(strip_fencing(fenced), "{\"approved\": true}");
    }

    #[test]
    fn strip_fencing_is_a_no_op_on_plain_json() {
        assert_eq!(strip_fencing("{\"approved\": false}"), "{\"approved\": false}");
    }

    #[test]
    fn approved_default_is_the_fail_open_verdict() {
        let v = QaVerdict::approved_default();
        assert!(v.approved);
        assert!(v.issues.is_empty());
    }

    #[test]
    fn looks_like_verdict_requires_an_approved_boolean() {
        assert!(looks_like_verdict(&serde_json::json!({"approved": true})));
        assert!(!looks_like_verdict(&serde_json::json!({"other": 1})));
    }
}
