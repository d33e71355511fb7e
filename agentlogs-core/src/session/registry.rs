//! Session registry
//!
//! An external hook tool records one directory per agent run under
//! `~/.grove/hooks/sessions/<run-id>/metadata.json`. These records are
//! authoritative: they carry the verified working directory, the plan/job
//! the run was launched for, and the exact transcript file to read.

use crate::error::{Error, Result};
use crate::types::{JobRef, Provider};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// One registry `metadata.json`
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct RegistryRecord {
    /// Run identifier assigned by the registry (not the agent's id)
    #[serde(alias = "sessionId")]
    pub session_id: String,
    /// Native agent session id
    #[serde(alias = "claudeSessionId")]
    pub claude_session_id: String,
    pub provider: Option<String>,
    #[serde(alias = "workingDirectory")]
    pub working_directory: String,
    #[serde(alias = "planName")]
    pub plan_name: String,
    #[serde(alias = "jobFilePath")]
    pub job_file_path: String,
    #[serde(alias = "transcriptPath")]
    pub transcript_path: Option<PathBuf>,
    #[serde(alias = "startedAt")]
    pub started_at: Option<DateTime<Utc>>,
}

impl RegistryRecord {
    /// The job this run was launched for, if recorded
    pub fn job_ref(&self, line_index: usize) -> Option<JobRef> {
        if self.plan_name.is_empty() || self.job_file_path.is_empty() {
            return None;
        }
        let job = Path::new(&self.job_file_path).file_name()?;
        Some(JobRef {
            plan: self.plan_name.clone(),
            job: job.to_string_lossy().into_owned(),
            line_index,
        })
    }

    /// Provider named by the record, if it names a known one
    pub fn provider(&self) -> Option<Provider> {
        self.provider.as_deref().and_then(|p| p.parse().ok())
    }
}

/// Load the registry, keyed by native session id.
///
/// Records without a native id (older format) are keyed by their directory
/// name. A missing registry directory is an empty registry.
pub fn load(dir: &Path) -> Result<HashMap<String, RegistryRecord>> {
    let mut records = HashMap::new();
    if !dir.is_dir() {
        tracing::debug!(dir = %dir.display(), "Session registry directory does not exist");
        return Ok(records);
    }

    let mut run_dirs: Vec<PathBuf> = std::fs::read_dir(dir)
        .map_err(|e| Error::Discovery(format!("reading {}: {}", dir.display(), e)))?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_dir())
        .collect();
    run_dirs.sort();

    for run_dir in run_dirs {
        let metadata_path = run_dir.join("metadata.json");
        let Ok(data) = std::fs::read_to_string(&metadata_path) else {
            tracing::debug!(dir = %run_dir.display(), "Skipping registry entry without metadata");
            continue;
        };
        let record: RegistryRecord = match serde_json::from_str(&data) {
            Ok(record) => record,
            Err(e) => {
                tracing::warn!(
                    file = %metadata_path.display(),
                    error = %e,
                    "Skipping invalid registry metadata"
                );
                continue;
            }
        };

        let key = if record.claude_session_id.is_empty() {
            run_dir
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default()
        } else {
            record.claude_session_id.clone()
        };
        tracing::trace!(
            native_id = %key,
            plan = %record.plan_name,
            job_file = %record.job_file_path,
            "Registered session from registry"
        );
        records.insert(key, record);
    }

    tracing::debug!(count = records.len(), "Loaded session registry");
    Ok(records)
}
