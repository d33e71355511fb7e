//! Live transcript discovery
//!
//! Each provider that writes JSONL transcripts implements [`LiveSource`]:
//! where its files live, how to find them, and how to recover session
//! metadata from the first records of a file.
//!
//! | Provider | Pattern (relative to root) |
//! |----------|----------------------------|
//! | Claude | `projects/*/*.jsonl` |
//! | Codex | `sessions/*/*/*/*.jsonl` |
//!
//! Claude writes sub-agent side channels as `agent-*.jsonl` next to the main
//! transcript; these are never sessions of their own and are excluded.

use super::jobs::JobCollector;
use crate::error::{Error, Result};
use crate::transcript::codex::ENVIRONMENT_CONTEXT_MARKER;
use crate::types::{JobRef, Provider};
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::Deserialize;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

/// File name prefix of Claude sub-agent transcripts
const SIDECHAIN_PREFIX: &str = "agent-";

/// Pattern for discovering transcript files for a provider.
#[derive(Debug, Clone)]
pub struct SourcePattern {
    /// Glob pattern relative to the provider root
    pub pattern: String,
    /// Human-readable description for logging
    pub description: String,
}

/// Metadata recovered from the head of a transcript.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LiveProbe {
    pub session_id: String,
    pub cwd: String,
    pub started_at: Option<DateTime<Utc>>,
    pub jobs: Vec<JobRef>,
    /// True when the id and working directory were both recovered
    pub found: bool,
}

/// A provider whose sessions are discovered by globbing its storage.
pub trait LiveSource: Send + Sync {
    fn provider(&self) -> Provider;

    /// Root directory for this provider's data (e.g. `~/.claude`)
    fn root_path(&self) -> &Path;

    fn is_installed(&self) -> bool {
        self.root_path().exists()
    }

    /// Patterns for discovering transcript files, relative to
    /// [`Self::root_path`].
    fn source_patterns(&self) -> Vec<SourcePattern>;

    /// Read at most `limit` lines of `path` and recover session metadata.
    fn probe(&self, path: &Path, limit: usize) -> Result<LiveProbe>;

    /// All transcript files matching this source's patterns, sorted, with
    /// sub-agent side channels removed.
    fn discover_files(&self) -> Result<Vec<PathBuf>> {
        if !self.is_installed() {
            return Ok(Vec::new());
        }

        let mut files = Vec::new();
        for pattern in self.source_patterns() {
            let full_pattern = self.root_path().join(&pattern.pattern);
            let pattern_str = full_pattern.to_string_lossy();

            let entries = glob::glob(&pattern_str).map_err(|e| {
                Error::Discovery(format!("invalid glob pattern {}: {}", pattern_str, e))
            })?;

            let before = files.len();
            files.extend(entries.flatten().filter(|path| !is_sidechain(path)));
            tracing::debug!(
                provider = %self.provider(),
                source = %pattern.description,
                count = files.len() - before,
                "Discovered transcript files"
            );
        }

        files.sort();
        files.dedup();
        Ok(files)
    }
}

fn is_sidechain(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.starts_with(SIDECHAIN_PREFIX))
        .unwrap_or(false)
}

fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Visit up to `limit` lines of `path`, passing `(line_index, line)`.
/// Blank lines count towards the index but are not visited.
fn visit_lines(path: &Path, limit: usize, mut visit: impl FnMut(usize, &str)) -> Result<()> {
    let reader = BufReader::new(File::open(path)?);
    for (index, line) in reader.split(b'\n').take(limit).enumerate() {
        let line = line?;
        let line = String::from_utf8_lossy(&line);
        let line = line.trim();
        if !line.is_empty() {
            visit(index, line);
        }
    }
    Ok(())
}

/// Text of a user message: a plain string, or its text blocks.
fn user_texts(content: &serde_json::Value) -> Vec<&str> {
    match content {
        serde_json::Value::String(s) => vec![s.as_str()],
        serde_json::Value::Array(blocks) => blocks
            .iter()
            .filter(|b| b.get("type").and_then(|t| t.as_str()) == Some("text"))
            .filter_map(|b| b.get("text").and_then(|t| t.as_str()))
            .collect(),
        _ => Vec::new(),
    }
}

// ============================================
// Claude
// ============================================

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
struct ClaudeProbeRecord {
    cwd: String,
    session_id: String,
    timestamp: String,
    #[serde(rename = "type")]
    record_type: String,
    message: ClaudeProbeMessage,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct ClaudeProbeMessage {
    role: String,
    content: serde_json::Value,
}

/// Claude Code transcripts under `~/.claude/projects`.
#[derive(Debug, Clone)]
pub struct ClaudeSource {
    root: PathBuf,
}

impl ClaudeSource {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }
}

impl LiveSource for ClaudeSource {
    fn provider(&self) -> Provider {
        Provider::Claude
    }

    fn root_path(&self) -> &Path {
        &self.root
    }

    fn source_patterns(&self) -> Vec<SourcePattern> {
        vec![SourcePattern {
            pattern: "projects/*/*.jsonl".to_string(),
            description: "Claude Code session logs".to_string(),
        }]
    }

    fn probe(&self, path: &Path, limit: usize) -> Result<LiveProbe> {
        let mut probe = LiveProbe::default();
        let mut jobs = JobCollector::new();

        visit_lines(path, limit, |index, line| {
            let Ok(record) = serde_json::from_str::<ClaudeProbeRecord>(line) else {
                return;
            };

            if !probe.found && !record.cwd.is_empty() && !record.session_id.is_empty() {
                if let Some(started_at) = parse_timestamp(&record.timestamp) {
                    probe.session_id = record.session_id.clone();
                    probe.cwd = record.cwd.clone();
                    probe.started_at = Some(started_at);
                    probe.found = true;
                }
            }

            if record.record_type == "user" && record.message.role == "user" {
                for text in user_texts(&record.message.content) {
                    jobs.observe(text, index);
                }
            }
        })?;

        probe.jobs = jobs.into_jobs();
        Ok(probe)
    }
}

// ============================================
// Codex
// ============================================

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct CodexProbeRecord {
    #[serde(rename = "type")]
    record_type: String,
    payload: serde_json::Value,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct CodexSessionMeta {
    id: String,
    timestamp: String,
    cwd: String,
}

fn cwd_pattern() -> &'static Regex {
    static CWD_RE: OnceLock<Regex> = OnceLock::new();
    CWD_RE.get_or_init(|| Regex::new(r"<cwd>(.*)</cwd>").expect("valid cwd regex"))
}

/// Working directory announced in an environment context block
pub(crate) fn environment_cwd(text: &str) -> Option<String> {
    cwd_pattern()
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|cwd| !cwd.is_empty())
}

/// Codex rollouts under `~/.codex/sessions/YYYY/MM/DD`.
#[derive(Debug, Clone)]
pub struct CodexSource {
    root: PathBuf,
}

impl CodexSource {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }
}

impl LiveSource for CodexSource {
    fn provider(&self) -> Provider {
        Provider::Codex
    }

    fn root_path(&self) -> &Path {
        &self.root
    }

    fn source_patterns(&self) -> Vec<SourcePattern> {
        vec![SourcePattern {
            pattern: "sessions/*/*/*/*.jsonl".to_string(),
            description: "Codex rollout logs".to_string(),
        }]
    }

    fn probe(&self, path: &Path, limit: usize) -> Result<LiveProbe> {
        let mut probe = LiveProbe::default();
        let mut jobs = JobCollector::new();

        visit_lines(path, limit, |index, line| {
            let Ok(record) = serde_json::from_str::<CodexProbeRecord>(line) else {
                return;
            };

            match record.record_type.as_str() {
                "session_meta" => {
                    let meta: CodexSessionMeta =
                        serde_json::from_value(record.payload).unwrap_or_default();
                    if !meta.id.is_empty() {
                        probe.session_id = meta.id;
                    }
                    if let Some(started_at) = parse_timestamp(&meta.timestamp) {
                        probe.started_at = Some(started_at);
                    }
                    if probe.cwd.is_empty() && !meta.cwd.is_empty() {
                        probe.cwd = meta.cwd;
                    }
                }
                "response_item" => {
                    let payload = &record.payload;
                    let is_user_message = payload.get("type").and_then(|t| t.as_str())
                        == Some("message")
                        && payload.get("role").and_then(|r| r.as_str()) == Some("user");
                    if !is_user_message {
                        return;
                    }
                    let Some(blocks) = payload.get("content").and_then(|c| c.as_array()) else {
                        return;
                    };
                    for block in blocks {
                        if block.get("type").and_then(|t| t.as_str()) != Some("input_text") {
                            continue;
                        }
                        let Some(text) = block.get("text").and_then(|t| t.as_str()) else {
                            continue;
                        };
                        if text.contains(ENVIRONMENT_CONTEXT_MARKER) {
                            if let Some(cwd) = environment_cwd(text) {
                                probe.cwd = cwd;
                            }
                        } else {
                            jobs.observe(text, index);
                        }
                    }
                }
                _ => {}
            }
        })?;

        probe.found = !probe.session_id.is_empty() && !probe.cwd.is_empty();
        probe.jobs = jobs.into_jobs();
        Ok(probe)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn write_lines(path: &Path, lines: &[serde_json::Value]) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        let body: Vec<String> = lines.iter().map(|l| l.to_string()).collect();
        std::fs::write(path, format!("{}\n", body.join("\n"))).unwrap();
    }

    #[test]
    fn test_claude_discovery_excludes_sidechains() {
        let dir = TempDir::new().unwrap();
        let project = dir.path().join("projects/-work-api");
        write_lines(&project.join("b.jsonl"), &[json!({})]);
        write_lines(&project.join("a.jsonl"), &[json!({})]);
        write_lines(&project.join("agent-123.jsonl"), &[json!({})]);

        let source = ClaudeSource::new(dir.path().to_path_buf());
        let files = source.discover_files().unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|f| f.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.jsonl", "b.jsonl"]);
    }

    #[test]
    fn test_uninstalled_source_finds_nothing() {
        let dir = TempDir::new().unwrap();
        let source = CodexSource::new(dir.path().join("missing"));
        assert!(!source.is_installed());
        assert!(source.discover_files().unwrap().is_empty());
    }

    #[test]
    fn test_claude_probe_recovers_metadata_and_jobs() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("s.jsonl");
        write_lines(
            &path,
            &[
                json!({"type": "summary", "summary": "x"}),
                json!({"type": "user", "cwd": "/work/api", "sessionId": "abc", "timestamp": "2025-01-01T00:00:00Z",
                       "message": {"role": "user", "content": "Read the file /w/plans/demo/01-setup.md and execute the agent job"}}),
                json!({"type": "user", "cwd": "/elsewhere", "sessionId": "other", "timestamp": "2025-01-01T00:00:01Z",
                       "message": {"role": "user", "content": [{"type": "text", "text": "Read the file /w/plans/demo/02-build.md and execute the agent job"}]}}),
            ],
        );

        let probe = ClaudeSource::new(dir.path().to_path_buf())
            .probe(&path, 100)
            .unwrap();
        assert!(probe.found);
        assert_eq!(probe.session_id, "abc");
        assert_eq!(probe.cwd, "/work/api");
        assert_eq!(probe.jobs.len(), 2);
        assert_eq!(probe.jobs[0].line_index, 1);
        assert_eq!(probe.jobs[1].job, "02-build.md");
        assert_eq!(probe.jobs[1].line_index, 2);
    }

    #[test]
    fn test_probe_respects_line_limit() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("s.jsonl");
        let mut lines = vec![json!({"type": "summary"}); 5];
        lines.push(json!({"type": "user", "cwd": "/w", "sessionId": "late", "timestamp": "2025-01-01T00:00:00Z"}));
        write_lines(&path, &lines);

        let source = ClaudeSource::new(dir.path().to_path_buf());
        assert!(!source.probe(&path, 5).unwrap().found);
        assert!(source.probe(&path, 6).unwrap().found);
    }

    #[test]
    fn test_codex_probe_reads_meta_and_environment() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sessions/2025/01/02/rollout-x.jsonl");
        write_lines(
            &path,
            &[
                json!({"type": "session_meta", "payload": {"id": "cx-1", "timestamp": "2025-01-02T09:00:00Z"}}),
                json!({"type": "response_item", "payload": {"type": "message", "role": "user", "content": [
                    {"type": "input_text", "text": "<environment_context>\n<cwd>/work/web</cwd>\n</environment_context>"}
                ]}}),
                json!({"type": "response_item", "payload": {"type": "message", "role": "user", "content": [
                    {"type": "input_text", "text": "Read the file /n/plans/web/03-ui.md and execute the agent job"}
                ]}}),
            ],
        );

        let source = CodexSource::new(dir.path().to_path_buf());
        assert_eq!(source.discover_files().unwrap(), vec![path.clone()]);

        let probe = source.probe(&path, 100).unwrap();
        assert!(probe.found);
        assert_eq!(probe.session_id, "cx-1");
        assert_eq!(probe.cwd, "/work/web");
        assert!(probe.started_at.is_some());
        assert_eq!(probe.jobs[0].plan, "web");
        assert_eq!(probe.jobs[0].line_index, 2);
    }

    #[test]
    fn test_environment_cwd() {
        assert_eq!(
            environment_cwd("<environment_context><cwd>/a/b</cwd></environment_context>"),
            Some("/a/b".to_string())
        );
        assert_eq!(environment_cwd("<environment_context/>"), None);
    }
}
