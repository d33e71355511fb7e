//! Session specifier resolution
//!
//! A specifier is whatever a user typed to name a session. It is tried,
//! in order, as:
//!
//! 1. a transcript path (matched against descriptor artifact paths)
//! 2. a native session id
//! 3. a `plan/job.md` pair
//! 4. a path to a job file on disk, whose parent directory names the plan
//!
//! Path and id matches take the first descriptor. Job matches are
//! ambiguous when they span more than one session.

use crate::error::{Error, Result};
use crate::types::SessionDescriptor;
use std::path::{Path, PathBuf};

fn absolute(spec: &str) -> Option<PathBuf> {
    let path = Path::new(spec);
    if path.is_absolute() {
        return Some(path.to_path_buf());
    }
    std::env::current_dir().ok().map(|cwd| cwd.join(path))
}

/// `plan/job.md` split into its parts
fn split_plan_job(spec: &str) -> Option<(&str, &str)> {
    let (plan, job) = spec.split_once('/')?;
    if plan.is_empty() || job.contains('/') || !job.ends_with(".md") {
        return None;
    }
    Some((plan, job))
}

/// `(plan, job)` from a job file path that exists on disk
fn job_file_parts(spec: &str) -> Option<(String, String)> {
    let path = Path::new(spec);
    if !path.is_file() {
        return None;
    }
    let job = path.file_name()?.to_string_lossy().into_owned();
    let plan = path.parent()?.file_name()?.to_string_lossy().into_owned();
    Some((plan, job))
}

/// Pick the session linked to `plan/job`, or report the ambiguity.
fn match_job(
    sessions: &[SessionDescriptor],
    spec: &str,
    plan: &str,
    job: &str,
) -> Option<Result<SessionDescriptor>> {
    let matches: Vec<&SessionDescriptor> =
        sessions.iter().filter(|s| s.has_job(plan, job)).collect();
    let first = *matches.first()?;

    let mut candidates: Vec<String> = Vec::new();
    for session in &matches {
        if !candidates.contains(&session.session_id) {
            candidates.push(session.session_id.clone());
        }
    }
    if candidates.len() > 1 {
        return Some(Err(Error::AmbiguousSession {
            spec: spec.to_string(),
            candidates,
        }));
    }
    Some(Ok(first.clone()))
}

/// Resolve `spec` against an already-discovered session list.
pub fn resolve_in(sessions: &[SessionDescriptor], spec: &str) -> Result<SessionDescriptor> {
    let spec = spec.trim();
    if spec.is_empty() {
        return Err(Error::SessionNotFound("empty session specifier".to_string()));
    }

    if let Some(path) = absolute(spec) {
        if let Some(found) = sessions.iter().find(|s| s.log_path == path) {
            return Ok(found.clone());
        }
    }

    if let Some(found) = sessions.iter().find(|s| s.session_id == spec) {
        return Ok(found.clone());
    }

    if let Some((plan, job)) = split_plan_job(spec) {
        if let Some(resolved) = match_job(sessions, spec, plan, job) {
            return resolved;
        }
    }

    if let Some((plan, job)) = job_file_parts(spec) {
        if let Some(resolved) = match_job(sessions, spec, &plan, &job) {
            return resolved;
        }
    }

    Err(Error::SessionNotFound(spec.to_string()))
}

/// Sessions whose project, worktree, plan or job contains `needle`,
/// case-insensitively.
pub fn filter_sessions(sessions: Vec<SessionDescriptor>, needle: &str) -> Vec<SessionDescriptor> {
    let needle = needle.to_lowercase();
    if needle.is_empty() {
        return sessions;
    }
    let contains = |value: &str| value.to_lowercase().contains(&needle);

    sessions
        .into_iter()
        .filter(|s| {
            contains(&s.project_name)
                || s.worktree.as_deref().is_some_and(contains)
                || s.jobs.iter().any(|j| contains(&j.plan) || contains(&j.job))
        })
        .collect()
}

/// Most recently started first; sessions without a start time last.
pub fn sort_recent_first(sessions: &mut [SessionDescriptor]) {
    sessions.sort_by(|a, b| b.started_at.cmp(&a.started_at));
}
