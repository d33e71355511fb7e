//! OpenCode session discovery
//!
//! Session metadata lives at `storage/session/<project-hash>/ses_*.json`.
//! A session records its own directory in newer versions; older ones only
//! carry a project id, resolved through `storage/project/*.json`.

use crate::error::Result;
use crate::opencode::{millis_to_utc, read_json};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct RawProject {
    id: String,
    worktree: String,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct RawSession {
    id: String,
    #[serde(rename = "projectID")]
    project_id: String,
    directory: String,
    title: String,
    time: RawSessionTime,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct RawSessionTime {
    created: i64,
}

/// One OpenCode session metadata file
#[derive(Debug, Clone, PartialEq)]
pub struct OpenCodeSession {
    pub session_id: String,
    /// Working directory, empty if it could not be resolved
    pub directory: String,
    pub title: String,
    pub started_at: Option<DateTime<Utc>>,
    /// The session metadata file, used as the session's artifact
    pub metadata_path: PathBuf,
}

fn sorted_entries(dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut paths: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .collect();
    paths.sort();
    paths
}

fn has_name(path: &Path, prefix: &str, suffix: &str) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.starts_with(prefix) && n.ends_with(suffix))
        .unwrap_or(false)
}

/// Project id to worktree path
fn load_projects(storage: &Path) -> HashMap<String, String> {
    let projects: HashMap<String, String> = sorted_entries(&storage.join("project"))
        .into_iter()
        .filter(|path| path.is_file() && has_name(path, "", ".json"))
        .filter_map(|path| read_json::<RawProject>(&path))
        .filter(|project| !project.id.is_empty())
        .map(|project| (project.id, project.worktree))
        .collect();
    tracing::debug!(count = projects.len(), "Loaded OpenCode projects");
    projects
}

/// List every OpenCode session in `storage`.
///
/// Missing storage yields no sessions.
pub fn scan(storage: &Path) -> Result<Vec<OpenCodeSession>> {
    if !storage.is_dir() {
        tracing::debug!(storage = %storage.display(), "OpenCode storage does not exist");
        return Ok(Vec::new());
    }

    let projects = load_projects(storage);
    let mut sessions = Vec::new();

    for project_dir in sorted_entries(&storage.join("session")) {
        if !project_dir.is_dir() {
            continue;
        }
        for path in sorted_entries(&project_dir) {
            if !has_name(&path, "ses_", ".json") {
                continue;
            }
            let Some(raw) = read_json::<RawSession>(&path) else {
                continue;
            };

            let directory = if raw.directory.is_empty() {
                projects.get(&raw.project_id).cloned().unwrap_or_default()
            } else {
                raw.directory
            };
            let session_id = if raw.id.is_empty() {
                path.file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_default()
            } else {
                raw.id
            };

            sessions.push(OpenCodeSession {
                session_id,
                directory,
                title: raw.title,
                started_at: millis_to_utc(raw.time.created),
                metadata_path: path,
            });
        }
    }

    tracing::debug!(count = sessions.len(), "Found OpenCode sessions");
    Ok(sessions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::opencode::tests::write_json;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_missing_storage_is_empty() {
        let dir = TempDir::new().unwrap();
        assert!(scan(&dir.path().join("nope")).unwrap().is_empty());
    }

    #[test]
    fn test_sessions_joined_with_projects() {
        let dir = TempDir::new().unwrap();
        let storage = dir.path();
        write_json(
            &storage.join("project/p1.json"),
            json!({"id": "p1", "worktree": "/work/site"}),
        );
        write_json(
            &storage.join("session/p1/ses_a.json"),
            json!({"id": "ses_a", "projectID": "p1", "title": "Fix nav", "time": {"created": 1_700_000_000_000i64}}),
        );
        write_json(
            &storage.join("session/p1/ses_b.json"),
            json!({"id": "ses_b", "projectID": "p1", "directory": "/work/site/docs", "time": {"created": 0}}),
        );
        std::fs::write(storage.join("session/p1/ses_c.json"), "garbage").unwrap();
        std::fs::write(storage.join("session/p1/readme.md"), "skip").unwrap();

        let sessions = scan(storage).unwrap();
        assert_eq!(sessions.len(), 2);
        assert_eq!(sessions[0].session_id, "ses_a");
        assert_eq!(sessions[0].directory, "/work/site");
        assert_eq!(sessions[0].title, "Fix nav");
        assert!(sessions[0].started_at.is_some());
        assert_eq!(sessions[1].directory, "/work/site/docs");
        assert_eq!(sessions[1].started_at, None);
        assert!(sessions[1].metadata_path.ends_with("session/p1/ses_b.json"));
    }
}
