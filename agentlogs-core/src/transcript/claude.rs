//! Claude Code transcript normalizer
//!
//! Normalizes records from `~/.claude/projects/[encoded-path]/*.jsonl`.
//!
//! Claude splits one tool invocation across two records: an `assistant`
//! record carrying `tool_use` blocks, and a later `user` record carrying the
//! matching `tool_result` blocks. The two are not guaranteed to be adjacent,
//! and one assistant turn may issue several calls whose results arrive in
//! different user records.
//!
//! # Merge Strategy
//!
//! Assistant entries with tool calls are parked in an arena. A side table maps
//! each call id to its `(slot, part index)`. When a result arrives, its output
//! is written into the parked call in place. An entry is released once every
//! one of its calls has a result, so the emitted entry carries all outputs.
//! Entries released by the same user record come out in arena (source)
//! order.
//!
//! The user record that delivered results is not emitted itself; the
//! assistant entry now carries the output. [`Normalizer::flush`] releases
//! whatever is still parked, with `output` left unset.

use super::{parse_error, Normalizer};
use crate::error::Result;
use crate::types::{Entry, Part, Provider, Role, TokenUsage, ToolCall, ToolResult};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::HashMap;

// ============================================
// Raw JSONL record types (serde deserialization)
// ============================================

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
struct RawRecord {
    uuid: Option<String>,
    #[serde(rename = "type")]
    record_type: Option<String>,
    timestamp: Option<String>,
    message: Option<RawMessage>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct RawMessage {
    id: Option<String>,
    content: Option<serde_json::Value>,
    usage: Option<RawUsage>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum ContentBlock {
    #[serde(rename = "text")]
    Text {
        #[serde(default)]
        text: String,
    },
    #[serde(rename = "thinking")]
    Thinking {
        #[serde(default)]
        thinking: String,
    },
    #[serde(rename = "tool_use")]
    ToolUse {
        #[serde(default)]
        id: String,
        #[serde(default)]
        name: String,
        #[serde(default)]
        input: serde_json::Value,
    },
    #[serde(rename = "tool_result")]
    ToolResult {
        #[serde(default)]
        tool_use_id: String,
        #[serde(default)]
        content: serde_json::Value,
        #[serde(default)]
        is_error: bool,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct RawUsage {
    input_tokens: Option<u64>,
    output_tokens: Option<u64>,
    cache_creation_input_tokens: Option<u64>,
    cache_read_input_tokens: Option<u64>,
}

impl RawUsage {
    fn to_usage(&self) -> Option<TokenUsage> {
        let usage = TokenUsage {
            input: self.input_tokens.unwrap_or(0),
            output: self.output_tokens.unwrap_or(0),
            reasoning: 0,
            cache_read: self.cache_read_input_tokens.unwrap_or(0),
            cache_write: self.cache_creation_input_tokens.unwrap_or(0),
        };
        (!usage.is_empty()).then_some(usage)
    }
}

fn parse_timestamp(value: Option<&str>) -> Option<DateTime<Utc>> {
    value
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

/// Flatten a `tool_result` content value: a plain string, or a list of
/// blocks whose text is joined with newlines.
fn tool_result_output(content: &serde_json::Value) -> String {
    match content {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Array(blocks) => blocks
            .iter()
            .filter_map(|b| b.get("text").and_then(|t| t.as_str()))
            .collect::<Vec<_>>()
            .join("\n"),
        _ => String::new(),
    }
}

/// Parse message content into parts, preserving block order.
///
/// Individual blocks that fail to deserialize are skipped.
fn parse_content(content: Option<&serde_json::Value>) -> Vec<Part> {
    let mut parts = Vec::new();

    let blocks = match content {
        Some(serde_json::Value::String(text)) => {
            if !text.is_empty() {
                parts.push(Part::Text { text: text.clone() });
            }
            return parts;
        }
        Some(serde_json::Value::Array(blocks)) => blocks,
        _ => return parts,
    };

    for raw in blocks {
        let Ok(block) = serde_json::from_value::<ContentBlock>(raw.clone()) else {
            continue;
        };
        match block {
            ContentBlock::Text { text } if !text.is_empty() => parts.push(Part::Text { text }),
            ContentBlock::Thinking { thinking } if !thinking.is_empty() => {
                parts.push(Part::Reasoning { text: thinking })
            }
            ContentBlock::ToolUse { id, name, input } => {
                let input = match input {
                    serde_json::Value::Object(map) => map,
                    _ => serde_json::Map::new(),
                };
                parts.push(Part::ToolCall(ToolCall {
                    id,
                    name,
                    input,
                    ..Default::default()
                }));
            }
            ContentBlock::ToolResult {
                tool_use_id,
                content,
                is_error,
            } => parts.push(Part::ToolResult(ToolResult {
                tool_call_id: tool_use_id,
                output: tool_result_output(&content),
                is_error,
            })),
            _ => {}
        }
    }

    parts
}

// ============================================
// Normalizer
// ============================================

/// An assistant entry waiting for tool results
#[derive(Debug)]
struct Parked {
    entry: Entry,
    /// Calls still waiting for a result
    outstanding: usize,
    /// Byte offset of the assistant record, when known
    offset: Option<u64>,
}

/// Stateful normalizer for Claude Code transcripts.
#[derive(Debug, Default)]
pub struct ClaudeNormalizer {
    /// Arena of parked entries in source order; released slots become `None`
    slots: Vec<Option<Parked>>,
    /// call id -> (slot, part index)
    calls: HashMap<String, (usize, usize)>,
}

impl ClaudeNormalizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries still waiting for tool results
    pub fn pending_entries(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    /// Number of tool calls still waiting for a result
    pub fn pending_calls(&self) -> usize {
        self.calls.len()
    }

    fn take_slot(&mut self, slot: usize) -> Option<Entry> {
        let parked = self.slots.get_mut(slot)?.take()?;
        if self.slots.iter().all(Option::is_none) {
            self.slots.clear();
        }
        Some(parked.entry)
    }

    fn on_assistant(&mut self, entry: Entry, offset: Option<u64>) -> Vec<Entry> {
        let slot = self.slots.len();
        let mut outstanding = 0;

        for (index, part) in entry.parts.iter().enumerate() {
            let Part::ToolCall(call) = part else { continue };
            if call.id.is_empty() || self.calls.contains_key(&call.id) {
                continue;
            }
            self.calls.insert(call.id.clone(), (slot, index));
            outstanding += 1;
        }

        if outstanding == 0 {
            if entry.parts.is_empty() {
                return Vec::new();
            }
            return vec![entry];
        }

        tracing::trace!(
            message_id = %entry.message_id,
            outstanding,
            "Parking assistant entry until tool results arrive"
        );
        self.slots.push(Some(Parked {
            entry,
            outstanding,
            offset,
        }));
        Vec::new()
    }

    fn on_user(&mut self, mut entry: Entry) -> Vec<Entry> {
        let mut matched_any = false;
        let mut completed = Vec::new();
        let mut kept = Vec::with_capacity(entry.parts.len());

        for part in std::mem::take(&mut entry.parts) {
            let Part::ToolResult(result) = part else {
                kept.push(part);
                continue;
            };
            let Some((slot, index)) = self.calls.remove(&result.tool_call_id) else {
                // Unmatched results are dropped.
                continue;
            };
            matched_any = true;

            let Some(Some(parked)) = self.slots.get_mut(slot) else {
                continue;
            };
            if let Some(Part::ToolCall(call)) = parked.entry.parts.get_mut(index) {
                call.output = Some(result.output);
            }
            parked.outstanding = parked.outstanding.saturating_sub(1);
            if parked.outstanding == 0 {
                completed.push(slot);
            }
        }

        if matched_any {
            completed.sort_unstable();
            return completed
                .into_iter()
                .filter_map(|slot| self.take_slot(slot))
                .collect();
        }

        let has_text = kept
            .iter()
            .any(|p| matches!(p, Part::Text { text } if !text.is_empty()));
        if !has_text {
            return Vec::new();
        }

        entry.parts = kept;
        vec![entry]
    }

    fn normalize_record(&mut self, record: &str, offset: Option<u64>) -> Result<Vec<Entry>> {
        let raw: RawRecord =
            serde_json::from_str(record).map_err(|e| parse_error(Provider::Claude, e))?;

        let role = match raw.record_type.as_deref() {
            Some("assistant") => Role::Assistant,
            Some("user") => Role::User,
            _ => return Ok(Vec::new()),
        };

        let mut entry = Entry::new(Provider::Claude, role);
        entry.timestamp = parse_timestamp(raw.timestamp.as_deref());

        let message = raw.message.unwrap_or_default();
        entry.message_id = message
            .id
            .filter(|id| !id.is_empty())
            .or(raw.uuid)
            .unwrap_or_default();
        entry.parts = parse_content(message.content.as_ref());
        entry.tokens = message.usage.as_ref().and_then(RawUsage::to_usage);

        Ok(match role {
            Role::Assistant => self.on_assistant(entry, offset),
            Role::User => self.on_user(entry),
        })
    }
}

impl Normalizer for ClaudeNormalizer {
    fn provider(&self) -> Provider {
        Provider::Claude
    }

    fn normalize(&mut self, record: &str) -> Result<Vec<Entry>> {
        self.normalize_record(record, None)
    }

    fn normalize_at(&mut self, record: &str, offset: u64) -> Result<Vec<Entry>> {
        self.normalize_record(record, Some(offset))
    }

    fn earliest_pending_offset(&self) -> Option<u64> {
        self.slots.iter().flatten().filter_map(|p| p.offset).min()
    }

    fn flush(&mut self) -> Vec<Entry> {
        self.calls.clear();
        let released: Vec<Entry> = self
            .slots
            .drain(..)
            .flatten()
            .map(|parked| parked.entry)
            .collect();
        if !released.is_empty() {
            tracing::debug!(
                count = released.len(),
                "Flushing assistant entries with unanswered tool calls"
            );
        }
        released
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn assistant(id: &str, calls: &[&str]) -> String {
        let content: Vec<serde_json::Value> = calls
            .iter()
            .map(|c| json!({"type": "tool_use", "id": c, "name": "Bash", "input": {"command": "ls"}}))
            .collect();
        json!({
            "type": "assistant",
            "uuid": format!("uuid-{}", id),
            "timestamp": "2025-01-01T10:00:00Z",
            "message": {"id": id, "role": "assistant", "content": content}
        })
        .to_string()
    }

    fn results(pairs: &[(&str, &str)]) -> String {
        let content: Vec<serde_json::Value> = pairs
            .iter()
            .map(|(id, out)| json!({"type": "tool_result", "tool_use_id": id, "content": out}))
            .collect();
        json!({"type": "user", "uuid": "u", "message": {"role": "user", "content": content}})
            .to_string()
    }

    fn user_text(text: &str) -> String {
        json!({"type": "user", "uuid": "ut", "message": {"role": "user", "content": text}})
            .to_string()
    }

    fn outputs(entry: &Entry) -> Vec<Option<String>> {
        entry.tool_calls().map(|c| c.output.clone()).collect()
    }

    #[test]
    fn test_single_call_merges_result() {
        let mut n = ClaudeNormalizer::new();
        assert!(n.normalize(&assistant("m1", &["t1"])).unwrap().is_empty());

        let out = n.normalize(&results(&[("t1", "ok")])).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].message_id, "m1");
        assert_eq!(out[0].role, Role::Assistant);
        assert_eq!(outputs(&out[0]), vec![Some("ok".to_string())]);
        assert!(n.flush().is_empty());
    }

    #[test]
    fn test_multi_call_entry_waits_for_all_results() {
        let mut n = ClaudeNormalizer::new();
        n.normalize(&assistant("m1", &["a", "b"])).unwrap();

        assert!(n.normalize(&results(&[("a", "first")])).unwrap().is_empty());
        assert_eq!(n.pending_calls(), 1);

        let out = n.normalize(&results(&[("b", "second")])).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(
            outputs(&out[0]),
            vec![Some("first".to_string()), Some("second".to_string())]
        );
        assert_eq!(n.pending_entries(), 0);
    }

    #[test]
    fn test_results_in_one_record_release_in_source_order() {
        let mut n = ClaudeNormalizer::new();
        n.normalize(&assistant("m1", &["a"])).unwrap();
        n.normalize(&assistant("m2", &["b"])).unwrap();

        let out = n.normalize(&results(&[("b", "2"), ("a", "1")])).unwrap();
        let ids: Vec<&str> = out.iter().map(|e| e.message_id.as_str()).collect();
        assert_eq!(ids, vec!["m1", "m2"]);
    }

    #[test]
    fn test_flush_releases_unanswered_calls() {
        let mut n = ClaudeNormalizer::new();
        n.normalize(&assistant("m1", &["a", "b"])).unwrap();
        n.normalize(&results(&[("a", "done")])).unwrap();

        let flushed = n.flush();
        assert_eq!(flushed.len(), 1);
        assert_eq!(outputs(&flushed[0]), vec![Some("done".to_string()), None]);
        assert_eq!(n.pending_calls(), 0);
        assert!(n.flush().is_empty());
    }

    #[test]
    fn test_no_tool_call_is_lost() {
        let mut n = ClaudeNormalizer::new();
        let records = [
            assistant("m1", &["a", "b"]),
            user_text("interrupting"),
            results(&[("a", "A")]),
            assistant("m2", &["c"]),
            results(&[("c", "C"), ("zzz", "stray")]),
            assistant("m3", &["d"]),
        ];

        let mut emitted = Vec::new();
        for record in &records {
            emitted.extend(n.normalize(record).unwrap());
        }
        emitted.extend(n.flush());

        let mut seen: Vec<(String, Option<String>)> = emitted
            .iter()
            .flat_map(|e| e.tool_calls().map(|c| (c.id.clone(), c.output.clone())))
            .collect();
        seen.sort();
        assert_eq!(
            seen,
            vec![
                ("a".to_string(), Some("A".to_string())),
                ("b".to_string(), None),
                ("c".to_string(), Some("C".to_string())),
                ("d".to_string(), None),
            ]
        );
    }

    #[test]
    fn test_user_text_emitted_while_calls_pending() {
        let mut n = ClaudeNormalizer::new();
        n.normalize(&assistant("m1", &["a"])).unwrap();

        let out = n.normalize(&user_text("wait")).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].role, Role::User);
        assert_eq!(out[0].text(), "wait");
        assert_eq!(n.pending_entries(), 1);
    }

    #[test]
    fn test_unmatched_results_only_emit_nothing() {
        let mut n = ClaudeNormalizer::new();
        assert!(n.normalize(&results(&[("nope", "x")])).unwrap().is_empty());
    }

    #[test]
    fn test_text_with_unmatched_result_drops_the_result() {
        let mut n = ClaudeNormalizer::new();
        let record = json!({
            "type": "user",
            "uuid": "u9",
            "message": {"role": "user", "content": [
                {"type": "tool_result", "tool_use_id": "gone", "content": "x"},
                {"type": "text", "text": "still here"}
            ]}
        })
        .to_string();

        let out = n.normalize(&record).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].parts.len(), 1);
        assert_eq!(out[0].text(), "still here");
        assert_eq!(out[0].message_id, "u9");
    }

    #[test]
    fn test_assistant_parts_thinking_and_usage() {
        let mut n = ClaudeNormalizer::new();
        let record = json!({
            "type": "assistant",
            "uuid": "a1",
            "timestamp": "2025-03-04T05:06:07.890Z",
            "message": {
                "id": "msg_x",
                "content": [
                    {"type": "thinking", "thinking": "let me see"},
                    {"type": "text", "text": "done"},
                    {"type": "image", "source": {}}
                ],
                "usage": {"input_tokens": 10, "output_tokens": 4, "cache_read_input_tokens": 100, "cache_creation_input_tokens": 7}
            }
        })
        .to_string();

        let out = n.normalize(&record).unwrap();
        assert_eq!(out.len(), 1);
        let entry = &out[0];
        assert_eq!(entry.parts.len(), 2);
        assert!(matches!(&entry.parts[0], Part::Reasoning { text } if text == "let me see"));
        assert_eq!(
            entry.tokens,
            Some(TokenUsage {
                input: 10,
                output: 4,
                reasoning: 0,
                cache_read: 100,
                cache_write: 7,
            })
        );
        assert_eq!(
            entry.timestamp.map(|t| t.to_rfc3339()),
            Some("2025-03-04T05:06:07.890+00:00".to_string())
        );
    }

    #[test]
    fn test_tool_result_block_list_and_error_flag() {
        let mut n = ClaudeNormalizer::new();
        n.normalize(&assistant("m1", &["t"])).unwrap();
        let record = json!({
            "type": "user",
            "message": {"content": [{
                "type": "tool_result",
                "tool_use_id": "t",
                "is_error": true,
                "content": [{"type": "text", "text": "line 1"}, {"type": "text", "text": "line 2"}]
            }]}
        })
        .to_string();

        let out = n.normalize(&record).unwrap();
        assert_eq!(outputs(&out[0]), vec![Some("line 1\nline 2".to_string())]);
    }

    #[test]
    fn test_other_record_types_are_ignored() {
        let mut n = ClaudeNormalizer::new();
        let out = n
            .normalize(r#"{"type":"summary","summary":"x","leafUuid":"y"}"#)
            .unwrap();
        assert!(out.is_empty());
        assert!(n.normalize("{not json").is_err());
    }

    #[test]
    fn test_earliest_pending_offset_tracks_parked_records() {
        let mut n = ClaudeNormalizer::new();
        assert_eq!(n.earliest_pending_offset(), None);

        n.normalize_at(&assistant("m1", &["a"]), 100).unwrap();
        n.normalize_at(&assistant("m2", &["b"]), 250).unwrap();
        n.normalize_at(&user_text("hi"), 400).unwrap();
        assert_eq!(n.earliest_pending_offset(), Some(100));

        n.normalize_at(&results(&[("a", "done")]), 500).unwrap();
        assert_eq!(n.earliest_pending_offset(), Some(250));

        n.normalize_at(&results(&[("b", "done")]), 600).unwrap();
        assert_eq!(n.earliest_pending_offset(), None);
    }
}
