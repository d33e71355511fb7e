//! Archived sessions inside plan directories
//!
//! When a job completes, its session metadata and a copy of its transcript
//! are archived next to the plan:
//!
//! ```text
//! <plan-dir>/.artifacts/<job>/metadata.json
//! <plan-dir>/.artifacts/<job>/transcript.jsonl
//! ```
//!
//! Plan directories come from a [`PlanLocator`].

use super::registry::RegistryRecord;
use crate::error::{Error, Result};
use crate::types::Provider;
use std::path::{Path, PathBuf};

/// Finds plan directories that may hold archived sessions.
pub trait PlanLocator: Send + Sync {
    fn plan_dirs(&self) -> Result<Vec<PathBuf>>;
}

/// Treats every immediate sub-directory of the configured roots as a plan
/// directory.
#[derive(Debug, Clone, Default)]
pub struct ConfiguredPlanLocator {
    roots: Vec<PathBuf>,
}

impl ConfiguredPlanLocator {
    pub fn new(roots: Vec<PathBuf>) -> Self {
        Self { roots }
    }
}

impl PlanLocator for ConfiguredPlanLocator {
    fn plan_dirs(&self) -> Result<Vec<PathBuf>> {
        let mut dirs = Vec::new();
        for root in &self.roots {
            let entries = match std::fs::read_dir(root) {
                Ok(entries) => entries,
                Err(e) => {
                    tracing::debug!(root = %root.display(), error = %e, "Plan root unavailable");
                    continue;
                }
            };
            dirs.extend(
                entries
                    .filter_map(|entry| entry.ok())
                    .map(|entry| entry.path())
                    .filter(|path| path.is_dir()),
            );
        }
        dirs.sort();
        Ok(dirs)
    }
}

/// An archived session: its metadata and the archived transcript copy
#[derive(Debug, Clone, PartialEq)]
pub struct ArchivedSession {
    pub record: RegistryRecord,
    pub transcript: PathBuf,
}

impl ArchivedSession {
    /// Native session id
    pub fn native_id(&self) -> &str {
        &self.record.claude_session_id
    }

    /// Archives predate multi-provider support and default to Claude.
    pub fn provider(&self) -> Provider {
        self.record.provider().unwrap_or(Provider::Claude)
    }
}

fn scan_plan_dir(plan_dir: &Path, out: &mut Vec<ArchivedSession>) {
    let artifacts = plan_dir.join(".artifacts");
    let Ok(entries) = std::fs::read_dir(&artifacts) else {
        return;
    };

    let mut job_dirs: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_dir())
        .collect();
    job_dirs.sort();

    for job_dir in job_dirs {
        let metadata_path = job_dir.join("metadata.json");
        let Ok(data) = std::fs::read_to_string(&metadata_path) else {
            continue;
        };
        match serde_json::from_str::<RegistryRecord>(&data) {
            Ok(record) => out.push(ArchivedSession {
                record,
                transcript: job_dir.join("transcript.jsonl"),
            }),
            Err(e) => tracing::debug!(
                file = %metadata_path.display(),
                error = %e,
                "Skipping invalid archived metadata"
            ),
        }
    }
}

/// Collect archived sessions from every plan directory.
pub fn scan(locator: &dyn PlanLocator) -> Result<Vec<ArchivedSession>> {
    let plan_dirs = locator
        .plan_dirs()
        .map_err(|e| Error::Discovery(format!("plan discovery failed: {}", e)))?;

    let mut archived = Vec::new();
    for plan_dir in &plan_dirs {
        scan_plan_dir(plan_dir, &mut archived);
    }

    tracing::debug!(
        plans = plan_dirs.len(),
        sessions = archived.len(),
        "Scanned archived sessions"
    );
    Ok(archived)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn archive(plan_dir: &Path, job: &str, value: serde_json::Value) {
        let dir = plan_dir.join(".artifacts").join(job);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("metadata.json"), value.to_string()).unwrap();
        std::fs::write(dir.join("transcript.jsonl"), "").unwrap();
    }

    #[test]
    fn test_scans_artifacts_of_each_plan() {
        let dir = TempDir::new().unwrap();
        let plan = dir.path().join("demo");
        archive(
            &plan,
            "01-setup",
            json!({"claude_session_id": "n1", "plan_name": "demo", "job_file_path": "/p/demo/01-setup.md"}),
        );
        archive(
            &plan,
            "02-build",
            json!({"claude_session_id": "n2", "provider": "codex"}),
        );
        std::fs::create_dir_all(dir.path().join("empty-plan")).unwrap();

        let locator = ConfiguredPlanLocator::new(vec![dir.path().to_path_buf(), dir.path().join("missing")]);
        let sessions = scan(&locator).unwrap();

        assert_eq!(sessions.len(), 2);
        assert_eq!(sessions[0].native_id(), "n1");
        assert_eq!(sessions[0].provider(), Provider::Claude);
        assert!(sessions[0].transcript.ends_with(".artifacts/01-setup/transcript.jsonl"));
        assert_eq!(sessions[1].provider(), Provider::Codex);
    }
}
