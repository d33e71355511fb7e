//! Job association heuristic
//!
//! Agent jobs are launched with an instruction of the form
//!
//! ```text
//! Read the file /home/me/notebooks/plans/demo/01-setup.md and execute the agent job
//! ```
//!
//! The plan is the job file's parent directory name and the job is the file
//! name. This is a textual convention, not a structured field: instructions
//! phrased differently are simply not linked.

use crate::error::Result;
use crate::transcript;
use crate::types::{Entry, JobRef, SessionDescriptor};
use std::collections::HashSet;

const READ_PHRASE: &str = "Read the file";
const EXECUTE_PHRASE: &str = "and execute the agent job";

/// Extract `(plan, job)` from a job instruction.
///
/// The first `/`-rooted token between the two phrases must contain a
/// `/plans/` segment and end in `.md`.
pub fn parse_job_reference(text: &str) -> Option<(String, String)> {
    let start = text.find(READ_PHRASE)? + READ_PHRASE.len();
    let rest = &text[start..];
    let between = &rest[..rest.find(EXECUTE_PHRASE)?];

    let path = between
        .split_whitespace()
        .map(|token| token.trim_matches(|c| matches!(c, '`' | '"' | '\'')))
        .find(|token| token.starts_with('/'))?;

    if !path.contains("/plans/") || !path.ends_with(".md") {
        return None;
    }

    let mut components = path.rsplit('/');
    let job = components.next()?;
    let plan = components.next()?;
    if job.is_empty() || plan.is_empty() {
        return None;
    }
    Some((plan.to_string(), job.to_string()))
}

/// Collects job references across a transcript, keeping the first
/// occurrence of each `(plan, job)` pair.
#[derive(Debug, Default)]
pub struct JobCollector {
    seen: HashSet<(String, String)>,
    jobs: Vec<JobRef>,
}

impl JobCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inspect one user text found at `line_index`. Returns true if it
    /// introduced a new job.
    pub fn observe(&mut self, text: &str, line_index: usize) -> bool {
        let Some((plan, job)) = parse_job_reference(text) else {
            return false;
        };
        if !self.seen.insert((plan.clone(), job.clone())) {
            return false;
        }
        self.jobs.push(JobRef {
            plan,
            job,
            line_index,
        });
        true
    }

    pub fn jobs(&self) -> &[JobRef] {
        &self.jobs
    }

    pub fn into_jobs(self) -> Vec<JobRef> {
        self.jobs
    }
}

/// Transcript lines belonging to one job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobSegment {
    /// Line where the job instruction appeared
    pub start_line: usize,
    /// Line where the next job starts; `None` runs to the end of the file
    pub end_line: Option<usize>,
}

impl JobSegment {
    /// Normalize the segment's records from the session transcript.
    pub fn read(&self, session: &SessionDescriptor) -> Result<Vec<Entry>> {
        transcript::read_line_range(
            &session.log_path,
            session.provider,
            self.start_line,
            self.end_line,
        )
    }
}

/// Locate the lines of `plan/job` within a session.
pub fn job_segment(session: &SessionDescriptor, plan: &str, job: &str) -> Option<JobSegment> {
    let index = session.jobs.iter().position(|j| j.matches(plan, job))?;
    Some(JobSegment {
        start_line: session.jobs[index].line_index,
        end_line: session.jobs.get(index + 1).map(|next| next.line_index),
    })
}
