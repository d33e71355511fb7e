//! OpenCode session assembly
//!
//! OpenCode never writes a single transcript file. Its storage tree under
//! `~/.local/share/opencode/storage` looks like:
//!
//! ```text
//! storage/
//!   project/<project-hash>.json            worktree path per project
//!   session/<project-hash>/ses_<id>.json   session metadata
//!   message/ses_<id>/msg_<id>.json         one file per message
//!   part/msg_<id>/prt_<id>.json            one file per message part
//! ```
//!
//! [`Assembler`] stitches messages and parts back together. Part ids embed a
//! monotonically increasing component, so sorting them lexicographically
//! gives chronological order. File listing order is arbitrary, so messages
//! are sorted by creation time.
//!
//! Unreadable or malformed message and part files are skipped one at a time.

use crate::config::Config;
use crate::error::{Error, Result};
use crate::types::{Entry, Part, Provider, Role, TokenUsage, ToolCall};
use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;
use std::path::{Path, PathBuf};

// ============================================
// Raw storage record types (serde deserialization)
// ============================================

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
struct RawMessage {
    id: String,
    #[serde(rename = "sessionID")]
    session_id: String,
    role: String,
    time: RawTime,
    tokens: RawTokens,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct RawTime {
    created: i64,
    completed: Option<i64>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct RawTokens {
    input: u64,
    output: u64,
    reasoning: u64,
    cache: RawCache,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct RawCache {
    read: u64,
    write: u64,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct RawPart {
    id: String,
    #[serde(rename = "type")]
    part_type: String,
    text: String,
    #[serde(rename = "callID")]
    call_id: String,
    tool: String,
    state: RawToolState,
    snapshot: Option<String>,
    reason: Option<String>,
    tokens: RawTokens,
    hash: Option<String>,
    files: Vec<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct RawToolState {
    status: String,
    input: serde_json::Map<String, serde_json::Value>,
    output: Option<String>,
    title: Option<String>,
    metadata: RawToolMetadata,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct RawToolMetadata {
    diff: Option<String>,
}

impl RawTokens {
    fn to_usage(&self) -> TokenUsage {
        TokenUsage {
            input: self.input,
            output: self.output,
            reasoning: self.reasoning,
            cache_read: self.cache.read,
            cache_write: self.cache.write,
        }
    }
}

/// Convert an OpenCode millisecond timestamp; zero means unset.
pub(crate) fn millis_to_utc(millis: i64) -> Option<DateTime<Utc>> {
    if millis == 0 {
        return None;
    }
    Utc.timestamp_millis_opt(millis).single()
}

// ============================================
// Assembled types
// ============================================

/// Tool invocation state as stored by OpenCode
#[derive(Debug, Clone, PartialEq)]
pub struct ToolState {
    pub call_id: String,
    pub tool: String,
    pub status: String,
    pub input: serde_json::Map<String, serde_json::Value>,
    pub output: Option<String>,
    pub title: Option<String>,
    pub diff: Option<String>,
}

/// One part file, decoded by its `type` discriminator
#[derive(Debug, Clone, PartialEq)]
pub enum OpenCodePart {
    Text(String),
    Reasoning(String),
    Tool(ToolState),
    StepStart {
        snapshot: Option<String>,
    },
    StepFinish {
        reason: Option<String>,
        snapshot: Option<String>,
        tokens: TokenUsage,
    },
    Patch {
        hash: Option<String>,
        files: Vec<String>,
    },
    Other(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct AssembledPart {
    pub id: String,
    pub kind: OpenCodePart,
}

/// A message with all of its parts, in order
#[derive(Debug, Clone, PartialEq)]
pub struct AssembledMessage {
    pub id: String,
    pub session_id: String,
    pub role: Role,
    pub created: Option<DateTime<Utc>>,
    /// Set once the assistant finished producing this message
    pub completed: Option<DateTime<Utc>>,
    pub tokens: Option<TokenUsage>,
    pub parts: Vec<AssembledPart>,
}

impl AssembledMessage {
    /// True once the message will no longer change on disk
    pub fn is_settled(&self) -> bool {
        self.role == Role::User || self.completed.is_some()
    }
}

fn decode_part(raw: RawPart) -> AssembledPart {
    let kind = match raw.part_type.as_str() {
        "text" => OpenCodePart::Text(raw.text),
        "reasoning" => OpenCodePart::Reasoning(raw.text),
        "tool" => OpenCodePart::Tool(ToolState {
            call_id: raw.call_id,
            tool: raw.tool,
            status: raw.state.status,
            input: raw.state.input,
            output: raw.state.output,
            title: raw.state.title,
            diff: raw.state.metadata.diff,
        }),
        "step-start" => OpenCodePart::StepStart {
            snapshot: raw.snapshot,
        },
        "step-finish" => OpenCodePart::StepFinish {
            reason: raw.reason,
            snapshot: raw.snapshot,
            tokens: raw.tokens.to_usage(),
        },
        "patch" => OpenCodePart::Patch {
            hash: raw.hash,
            files: raw.files,
        },
        other => OpenCodePart::Other(other.to_string()),
    };
    AssembledPart { id: raw.id, kind }
}

/// Sorted list of `<prefix>*.json` files in `dir`.
fn list_json(dir: &Path, prefix: &str) -> Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.starts_with(prefix) && n.ends_with(".json"))
                .unwrap_or(false)
        })
        .collect();
    files.sort();
    Ok(files)
}

/// Read and parse one OpenCode storage file. Unreadable or malformed
/// files are logged at debug level and yield `None`.
pub(crate) fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Option<T> {
    let data = match std::fs::read_to_string(path) {
        Ok(data) => data,
        Err(e) => {
            tracing::debug!(file = %path.display(), error = %e, "Failed to read OpenCode file");
            return None;
        }
    };
    match serde_json::from_str(&data) {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::debug!(file = %path.display(), error = %e, "Failed to parse OpenCode file");
            None
        }
    }
}

// ============================================
// Assembler
// ============================================

/// Rebuilds OpenCode sessions from the fragmented storage tree.
#[derive(Debug, Clone)]
pub struct Assembler {
    storage_dir: PathBuf,
}

impl Assembler {
    pub fn new(storage_dir: PathBuf) -> Self {
        Self { storage_dir }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.paths.opencode_storage())
    }

    /// Assembler for the storage tree containing a session metadata file
    /// (`storage/session/<project>/ses_<id>.json`).
    pub fn for_session_file(path: &Path) -> Result<Self> {
        let storage = path
            .parent()
            .and_then(Path::parent)
            .and_then(Path::parent)
            .ok_or_else(|| Error::SessionNotFound(path.display().to_string()))?;
        Ok(Self::new(storage.to_path_buf()))
    }

    pub fn storage_dir(&self) -> &Path {
        &self.storage_dir
    }

    /// Load every message of a session with its parts, in creation order.
    pub fn assemble(&self, session_id: &str) -> Result<Vec<AssembledMessage>> {
        let messages_dir = self.storage_dir.join("message").join(session_id);
        if !messages_dir.is_dir() {
            return Err(Error::SessionNotFound(format!(
                "no OpenCode messages for {} in {}",
                session_id,
                messages_dir.display()
            )));
        }

        let mut messages = Vec::new();
        for path in list_json(&messages_dir, "msg_")? {
            let Some(raw) = read_json::<RawMessage>(&path) else {
                continue;
            };
            let Ok(role) = raw.role.parse::<Role>() else {
                tracing::debug!(file = %path.display(), role = %raw.role, "Skipping message with unknown role");
                continue;
            };

            let id = if raw.id.is_empty() {
                path.file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_default()
            } else {
                raw.id
            };
            let tokens = (raw.tokens.input > 0 || raw.tokens.output > 0)
                .then(|| raw.tokens.to_usage());

            messages.push(AssembledMessage {
                parts: self.load_parts(&id),
                id,
                session_id: if raw.session_id.is_empty() {
                    session_id.to_string()
                } else {
                    raw.session_id
                },
                role,
                created: millis_to_utc(raw.time.created),
                completed: raw.time.completed.and_then(millis_to_utc),
                tokens,
            });
        }

        messages.sort_by(|a, b| a.created.cmp(&b.created).then_with(|| a.id.cmp(&b.id)));

        tracing::debug!(
            session_id,
            messages = messages.len(),
            "Assembled OpenCode session"
        );
        Ok(messages)
    }

    fn load_parts(&self, message_id: &str) -> Vec<AssembledPart> {
        let parts_dir = self.storage_dir.join("part").join(message_id);
        if !parts_dir.is_dir() {
            return Vec::new();
        }
        let files = match list_json(&parts_dir, "prt_") {
            Ok(files) => files,
            Err(e) => {
                tracing::debug!(dir = %parts_dir.display(), error = %e, "Failed to list parts");
                return Vec::new();
            }
        };

        let mut parts: Vec<AssembledPart> = files
            .iter()
            .filter_map(|path| read_json::<RawPart>(path))
            .map(decode_part)
            .collect();
        parts.sort_by(|a, b| a.id.cmp(&b.id));
        parts
    }

    /// Assemble and normalize a session into canonical entries.
    pub fn normalize_session(&self, session_id: &str) -> Result<Vec<Entry>> {
        Ok(normalize_all(&self.assemble(session_id)?))
    }

    /// Normalize the session whose metadata file is `path`.
    pub fn normalize_session_file(&self, path: &Path) -> Result<Vec<Entry>> {
        let session_id = path
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| Error::SessionNotFound(path.display().to_string()))?;
        self.normalize_session(session_id)
    }

    /// Text-only view of a session, one `User: ...` / `Assistant: ...` line
    /// per text part.
    pub fn session_text(&self, session_id: &str) -> Result<Vec<String>> {
        let mut lines = Vec::new();
        for message in self.assemble(session_id)? {
            let prefix = match message.role {
                Role::User => "User: ",
                Role::Assistant => "Assistant: ",
            };
            for part in &message.parts {
                if let OpenCodePart::Text(text) = &part.kind {
                    lines.push(format!("{}{}", prefix, text));
                }
            }
        }
        Ok(lines)
    }
}

/// Canonical entry for one assembled message.
///
/// Step markers, patches and unknown parts are dropped. Returns `None` when
/// nothing displayable remains.
pub fn normalize_message(message: &AssembledMessage) -> Option<Entry> {
    let mut entry = Entry::new(Provider::OpenCode, message.role);
    entry.timestamp = message.created;
    entry.message_id = message.id.clone();
    entry.tokens = message.tokens;

    for part in &message.parts {
        match &part.kind {
            OpenCodePart::Text(text) if !text.is_empty() => {
                entry.parts.push(Part::Text { text: text.clone() })
            }
            OpenCodePart::Reasoning(text) if !text.is_empty() => {
                entry.parts.push(Part::Reasoning { text: text.clone() })
            }
            OpenCodePart::Tool(state) => entry.parts.push(Part::ToolCall(ToolCall {
                id: state.call_id.clone(),
                name: state.tool.clone(),
                input: state.input.clone(),
                output: state.output.clone().filter(|o| !o.is_empty()),
                status: Some(state.status.clone()).filter(|s| !s.is_empty()),
                title: state.title.clone().filter(|t| !t.is_empty()),
                diff: state.diff.clone().filter(|d| !d.is_empty()),
            })),
            _ => {}
        }
    }

    (!entry.parts.is_empty()).then_some(entry)
}

pub fn normalize_all(messages: &[AssembledMessage]) -> Vec<Entry> {
    messages.iter().filter_map(normalize_message).collect()
}
