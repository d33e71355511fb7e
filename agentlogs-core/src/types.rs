//! Core domain types for agentlogs
//!
//! These types are the canonical model every provider normalizer produces,
//! plus the descriptor produced by session discovery.
//!
//! ## Terminology
//!
//! | Term | Definition |
//! |------|------------|
//! | **Provider** | An agent runtime with its own on-disk transcript convention (Claude, Codex, OpenCode) |
//! | **Entry** | One conversational turn, provider-agnostic |
//! | **Part** | One fragment of an entry: text, reasoning, tool call, tool result |
//! | **Session** | One agent run, located by discovery and described by [`SessionDescriptor`] |
//! | **Job** | An externally-defined unit of work (`plan/job.md`) linked to a session |
//!
//! The JSON field names of [`Entry`] and [`Part`] (`messageID`, `toolCallID`,
//! `isError`, ...) are the wire names downstream display and storage
//! consumers read.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

// ============================================
// Providers
// ============================================

/// Supported agent runtimes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Claude,
    Codex,
    OpenCode,
}

impl Provider {
    /// Returns the identifier used in wire formats and storage keys
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Claude => "claude",
            Provider::Codex => "codex",
            Provider::OpenCode => "opencode",
        }
    }

    /// Returns the display name for this provider
    pub fn display_name(&self) -> &'static str {
        match self {
            Provider::Claude => "Claude Code",
            Provider::Codex => "Codex",
            Provider::OpenCode => "OpenCode",
        }
    }

    /// Guess the provider of a transcript from its location.
    ///
    /// Codex keeps its sessions under a `.codex` directory; anything else
    /// that reaches a JSONL reader is a Claude transcript.
    pub fn infer_from_path(path: &Path) -> Provider {
        let is_codex = path
            .components()
            .any(|c| c.as_os_str() == ".codex");
        if is_codex {
            Provider::Codex
        } else {
            Provider::Claude
        }
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Provider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "claude" | "claude_code" | "claude-code" => Ok(Provider::Claude),
            "codex" => Ok(Provider::Codex),
            "opencode" => Ok(Provider::OpenCode),
            _ => Err(format!("unknown provider: {}", s)),
        }
    }
}

// ============================================
// Canonical entries
// ============================================

/// Who authored an entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            _ => Err(format!("unknown role: {}", s)),
        }
    }
}

/// One turn in a conversation, normalized across providers.
///
/// `parts` keeps the order in which fragments appeared in the source;
/// it is the rendering order and is never re-sorted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    pub role: Role,
    /// Authoring time as reported by the provider, if any
    pub timestamp: Option<DateTime<Utc>>,
    /// Provider-scoped identifier used for dedup and tie-breaking
    #[serde(rename = "messageID")]
    pub message_id: String,
    pub parts: Vec<Part>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tokens: Option<TokenUsage>,
    pub provider: Provider,
}

impl Entry {
    pub fn new(provider: Provider, role: Role) -> Self {
        Self {
            role,
            timestamp: None,
            message_id: String::new(),
            parts: Vec::new(),
            tokens: None,
            provider,
        }
    }

    /// Concatenated text parts, newline separated
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|p| match p {
                Part::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Tool calls in part order
    pub fn tool_calls(&self) -> impl Iterator<Item = &ToolCall> {
        self.parts.iter().filter_map(|p| match p {
            Part::ToolCall(call) => Some(call),
            _ => None,
        })
    }

    /// True if at least one part carries user-visible text
    pub fn has_text(&self) -> bool {
        self.parts
            .iter()
            .any(|p| matches!(p, Part::Text { text } if !text.is_empty()))
    }
}

/// One semantic fragment of an entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Part {
    Text { text: String },
    /// Chain-of-thought content, displayed distinctly from replies
    Reasoning { text: String },
    ToolCall(ToolCall),
    ToolResult(ToolResult),
}

/// A tool invocation.
///
/// `output` is filled once a matching result has been merged in (Claude)
/// or when the provider stores it natively (OpenCode). Codex keeps calls
/// and results as separate parts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub input: serde_json::Map<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diff: Option<String>,
}

/// Output of a tool, correlated to [`ToolCall::id`] by value
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    #[serde(rename = "toolCallID")]
    pub tool_call_id: String,
    pub output: String,
    #[serde(rename = "isError", default)]
    pub is_error: bool,
}

/// Aggregate token counts reported for an entry
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenUsage {
    pub input: u64,
    pub output: u64,
    pub reasoning: u64,
    pub cache_read: u64,
    pub cache_write: u64,
}

impl TokenUsage {
    pub fn is_empty(&self) -> bool {
        *self == TokenUsage::default()
    }
}

// ============================================
// Sessions
// ============================================

/// A `(plan, job)` association found in, or registered for, a session
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRef {
    pub plan: String,
    pub job: String,
    /// Zero-based record index where the job instruction appeared
    pub line_index: usize,
}

impl JobRef {
    pub fn matches(&self, plan: &str, job: &str) -> bool {
        self.plan == plan && self.job == job
    }
}

/// A located session.
///
/// Descriptors are recomputed on every discovery pass; they carry no
/// identity beyond their values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionDescriptor {
    /// Native, provider-scoped session id
    pub session_id: String,
    pub provider: Provider,
    pub project_name: String,
    pub project_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worktree: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ecosystem: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub jobs: Vec<JobRef>,
    /// Transcript to re-read; for OpenCode the session metadata file
    #[serde(rename = "logFilePath")]
    pub log_path: PathBuf,
    pub started_at: Option<DateTime<Utc>>,
}

impl SessionDescriptor {
    pub fn has_job(&self, plan: &str, job: &str) -> bool {
        self.jobs.iter().any(|j| j.matches(plan, job))
    }
}
