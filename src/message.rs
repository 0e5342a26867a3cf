//! Chat transcript data model shared by the gateway, the specialist runner,
//! and the supervisor orchestrator.
//!
//! A [`Message`] is one turn in a transcript. Transcripts are append-only
//! within a request: nothing here mutates a previously appended message.

use serde::{Deserialize, Serialize};

/// Who authored a [`Message`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// One piece of assistant content: either free text or a tool-use intent.
///
/// Assistant turns may carry any mix of text and tool-use blocks in the
/// order the model produced them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text { text: String },
    ToolUse {
        /// Provider-assigned call id, echoed back in the matching [`ToolResult`].
        call_id: String,
        name: String,
        /// Raw JSON arguments text exactly as emitted by the model; may be
        /// malformed. Kept as text (not parsed eagerly) so a parse failure
        /// can be surfaced as a recoverable tool error instead of silently
        /// becoming an empty object (§3, §4.4).
        arguments_text: String,
    },
}

impl ContentBlock {
    pub fn text(text: impl Into<String>) -> Self {
        ContentBlock::Text { text: text.into() }
    }
}

/// A transient tool invocation parsed out of an assistant turn.
///
/// `arguments` is `Err` when the model emitted invalid JSON; the executor
/// must still produce a [`ToolResult`] in that case rather than panicking
/// (§4.4 JSON input robustness).
#[derive(Debug, Clone)]
pub struct ToolCall {
    pub call_id: String,
    pub tool_name: String,
    pub arguments: Result<serde_json::Value, String>,
}

/// The outcome of dispatching one [`ToolCall`] through the Tool Executor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub call_id: String,
    pub content: String,
    pub is_error: bool,
}

impl ToolResult {
    pub fn ok(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            content: content.into(),
            is_error: false,
        }
    }

    pub fn error(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            content: content.into(),
            is_error: true,
        }
    }
}

/// One turn in a chat transcript.
///
/// `content_blocks` is only meaningful for `role == Assistant`; user/system
/// turns carry a single implicit text block, and tool turns carry the
/// `tool_use_id` back-reference plus the textual result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub content_blocks: Vec<ContentBlock>,
    /// Only set when `role == Tool`: the call this message answers.
    #[serde(default)]
    pub tool_use_id: Option<String>,
    #[serde(default)]
    pub is_error: bool,
}

impl Message {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: text.into(),
            content_blocks: Vec::new(),
            tool_use_id: None,
            is_error: false,
        }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: text.into(),
            content_blocks: Vec::new(),
            tool_use_id: None,
            is_error: false,
        }
    }

    pub fn assistant_text(text: impl Into<String>) -> Self {
        let text = text.into();
        Self {
            role: Role::Assistant,
            content: text.clone(),
            content_blocks: vec![ContentBlock::text(text)],
            tool_use_id: None,
            is_error: false,
        }
    }

    pub fn tool_result(result: &ToolResult) -> Self {
        Self {
            role: Role::Tool,
            content: result.content.clone(),
            content_blocks: Vec::new(),
            tool_use_id: Some(result.call_id.clone()),
            is_error: result.is_error,
        }
    }

    /// Every `ToolUse` block carried by this message, in emission order.
    pub fn tool_calls(&self) -> Vec<ToolCall> {
        self.content_blocks
            .iter()
            .filter_map(|block| match block {
                ContentBlock::ToolUse {
                    call_id,
                    name,
                    arguments_text,
                } => Some(ToolCall {
                    call_id: call_id.clone(),
                    tool_name: name.clone(),
                    arguments: serde_json::from_str(arguments_text).map_err(|e| e.to_string()),
                }),
                ContentBlock::Text { .. } => None,
            })
            .collect()
    }

    /// True when this assistant turn carries at least one tool-use block.
    pub fn has_tool_calls(&self) -> bool {
        self.content_blocks
            .iter()
            .any(|b| matches!(b, ContentBlock::ToolUse { .. }))
    }

    /// Concatenation of every text block, in order. Used for the
    /// user-visible reply once a turn is confirmed tool-free (§4.7 step 3).
    pub fn text_only(&self) -> String {
        let mut out = String::new();
        for block in &self.content_blocks {
            if let ContentBlock::Text { text } = block {
                out.push_str(text);
            }
        }
        if out.is_empty() {
            out = self.content.clone();
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_only_concatenates_text_blocks_and_skips_tool_uses() {
        let msg = Message {
            role: Role::Assistant,
            content: String::new(),
            content_blocks: vec![
                ContentBlock::text("part one. "),
                ContentBlock::ToolUse {
                    call_id: "call_1".into(),
                    name: "web_search".into(),
                    arguments_text: "{\"query\":\"rust\"}".into(),
                },
                ContentBlock::text("part two."),
            ],
            tool_use_id: None,
            is_error: false,
        };
        assert_eq!(msg.text_only(), "part one. part two.");
        assert!(msg.has_tool_calls());
        assert_eq!(msg.tool_calls().len(), 1);
    }

    #[test]
    fn tool_calls_surfaces_malformed_arguments_as_an_error_instead_of_an_empty_object() {
        let msg = Message {
            role: Role::Assistant,
            content: String::new(),
            content_blocks: vec![ContentBlock::ToolUse {
                call_id: "call_2".into(),
                name: "generate_pdf".into(),
                arguments_text: "{not json".into(),
            }],
            tool_use_id: None,
            is_error: false,
        };
        let calls = msg.tool_calls();
        assert_eq!(calls.len(), 1);
        assert!(calls[0].arguments.is_err(), "malformed arguments must not be coerced into an empty object");
    }

    #[test]
    fn tool_result_round_trips_into_a_tool_message() {
        let result = ToolResult::error("call_7", "ERRO: falha");
        let msg = Message::tool_result(&result);
        assert_eq!(msg.role, Role::Tool);
        assert_eq!(msg.tool_use_id, Some("call_7".to_string()));
        assert!(msg.is_error);
    }
}
