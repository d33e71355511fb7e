//! OpenAI Codex CLI transcript normalizer
//!
//! Normalizes records from `~/.codex/sessions/YYYY/MM/DD/rollout-*.jsonl`.
//!
//! Every record is an envelope with an outer `type` (`event_msg`,
//! `response_item`, `session_meta`, ...) and a `payload` carrying an inner
//! `type`. Calls and results are separate, already ordered records, so the
//! normalizer keeps no state and each record maps to at most one entry.
//!
//! | Envelope | Payload | Entry |
//! |----------|---------|-------|
//! | `event_msg` | `agent_reasoning` | assistant, `Reasoning` |
//! | `event_msg` | `agent_message` | assistant, `Text` |
//! | `response_item` | `message` (assistant) | none, `agent_message` covers it |
//! | `response_item` | `message` (user) | user, `Text` per input/output block |
//! | `response_item` | `function_call` | assistant, `ToolCall` |
//! | `response_item` | `function_call_output` | assistant, `ToolResult` |

use super::{parse_error, Normalizer};
use crate::error::Result;
use crate::types::{Entry, Part, Provider, Role, ToolCall, ToolResult};
use chrono::{DateTime, Utc};
use serde::Deserialize;

/// Marker of the CLI-injected environment block in user messages
pub(crate) const ENVIRONMENT_CONTEXT_MARKER: &str = "<environment_context>";

// ============================================
// Raw JSONL record types (serde deserialization)
// ============================================

/// Top-level envelope for Codex JSONL records.
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct RawEvent {
    timestamp: Option<String>,
    #[serde(rename = "type")]
    event_type: Option<String>,
    payload: serde_json::Value,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct EventMsgPayload {
    #[serde(rename = "type")]
    msg_type: Option<String>,
    message: Option<String>,
    text: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct ResponseItemPayload {
    #[serde(rename = "type")]
    item_type: Option<String>,
    role: Option<String>,
    content: Vec<serde_json::Value>,
    name: Option<String>,
    arguments: Option<String>,
    call_id: Option<String>,
    output: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum ContentBlock {
    #[serde(rename = "input_text")]
    InputText { text: String },
    #[serde(rename = "output_text")]
    OutputText { text: String },
    #[serde(other)]
    Unknown,
}

/// Nested JSON carried in `function_call_output.output`
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct ShellOutput {
    output: String,
    metadata: ShellMetadata,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct ShellMetadata {
    exit_code: i64,
}

/// Extract the displayed command from a shell invocation.
///
/// `["bash", "-lc", "cmd"]` yields `cmd`; shorter arrays yield their last
/// element; a plain string is used as is.
pub(crate) fn display_command(command: &serde_json::Value) -> Option<String> {
    match command {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Array(items) => {
            let picked = if items.len() >= 3 {
                items.get(2)
            } else {
                items.last()
            };
            picked.and_then(|v| v.as_str()).map(str::to_string)
        }
        _ => None,
    }
}

fn tool_call(payload: ResponseItemPayload) -> Part {
    let mut input = payload
        .arguments
        .as_deref()
        .and_then(|args| serde_json::from_str::<serde_json::Value>(args).ok())
        .and_then(|v| match v {
            serde_json::Value::Object(map) => Some(map),
            _ => None,
        })
        .unwrap_or_default();

    if let Some(command) = input.get("command").and_then(display_command) {
        input.insert("command".to_string(), serde_json::Value::String(command));
    }

    Part::ToolCall(ToolCall {
        id: payload.call_id.unwrap_or_default(),
        name: payload.name.unwrap_or_default(),
        input,
        ..Default::default()
    })
}

fn tool_result(payload: ResponseItemPayload) -> Part {
    let (output, is_error) = match payload.output {
        Some(serde_json::Value::String(raw)) => match serde_json::from_str::<ShellOutput>(&raw) {
            Ok(nested) => (nested.output, nested.metadata.exit_code != 0),
            Err(_) => (raw, false),
        },
        Some(serde_json::Value::Object(map)) => {
            let nested: ShellOutput =
                serde_json::from_value(serde_json::Value::Object(map)).unwrap_or_default();
            (nested.output, nested.metadata.exit_code != 0)
        }
        _ => (String::new(), false),
    };

    Part::ToolResult(ToolResult {
        tool_call_id: payload.call_id.unwrap_or_default(),
        output,
        is_error,
    })
}

/// Text parts of a user message.
///
/// Codex injects its environment block as a user message of its own; any
/// message carrying it is dropped whole and yields `None`.
fn message_parts(content: &[serde_json::Value]) -> Option<Vec<Part>> {
    let mut parts = Vec::new();
    for raw in content {
        let text = match serde_json::from_value::<ContentBlock>(raw.clone()) {
            Ok(ContentBlock::InputText { text } | ContentBlock::OutputText { text }) => text,
            _ => continue,
        };
        if text.is_empty() {
            continue;
        }
        if text.contains(ENVIRONMENT_CONTEXT_MARKER) {
            return None;
        }
        parts.push(Part::Text { text });
    }
    Some(parts)
}

/// Stateless normalizer for Codex rollout transcripts.
#[derive(Debug, Default)]
pub struct CodexNormalizer;

impl CodexNormalizer {
    pub fn new() -> Self {
        Self
    }

    fn event_msg(&self, payload: serde_json::Value) -> Option<(Role, Vec<Part>)> {
        let payload: EventMsgPayload = serde_json::from_value(payload).ok()?;
        let part = match payload.msg_type.as_deref() {
            Some("agent_reasoning") => Part::Reasoning {
                text: payload.text?,
            },
            Some("agent_message") => Part::Text {
                text: payload.message?,
            },
            _ => return None,
        };
        Some((Role::Assistant, vec![part]))
    }

    fn response_item(&self, payload: serde_json::Value) -> Option<(Role, Vec<Part>)> {
        let payload: ResponseItemPayload = serde_json::from_value(payload).ok()?;
        match payload.item_type.as_deref() {
            Some("message") => {
                let role = payload.role.as_deref().unwrap_or("");
                if role == "assistant" {
                    return None;
                }
                Some((Role::User, message_parts(&payload.content)?))
            }
            Some("function_call") => Some((Role::Assistant, vec![tool_call(payload)])),
            Some("function_call_output") => Some((Role::Assistant, vec![tool_result(payload)])),
            _ => None,
        }
    }
}

impl Normalizer for CodexNormalizer {
    fn provider(&self) -> Provider {
        Provider::Codex
    }

    fn normalize(&mut self, record: &str) -> Result<Vec<Entry>> {
        let raw: RawEvent =
            serde_json::from_str(record).map_err(|e| parse_error(Provider::Codex, e))?;

        if !raw.payload.is_object() {
            return Ok(Vec::new());
        }

        let converted = match raw.event_type.as_deref() {
            Some("event_msg") => self.event_msg(raw.payload),
            Some("response_item") => self.response_item(raw.payload),
            _ => None,
        };

        let Some((role, parts)) = converted else {
            return Ok(Vec::new());
        };
        if parts.is_empty() {
            return Ok(Vec::new());
        }

        let mut entry = Entry::new(Provider::Codex, role);
        entry.timestamp = raw
            .timestamp
            .as_deref()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc));
        entry.parts = parts;
        Ok(vec![entry])
    }
}
