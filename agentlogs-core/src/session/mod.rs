//! Session discovery and resolution
//!
//! Sessions are found through four independent sources:
//!
//! | Source | Module | Authority |
//! |--------|--------|-----------|
//! | Registry | [`registry`] | Overrides everything for its session ids |
//! | Archive | [`archive`] | Used when no registry entry exists |
//! | Live scan | [`live`] | Claude and Codex transcripts on disk |
//! | OpenCode | [`opencode_scan`] | OpenCode session metadata |
//!
//! [`Scanner::collect_sources`] builds each source into its own table and
//! [`merge`] applies precedence in a single pass, so precedence can be
//! tested without touching the filesystem.

pub mod archive;
pub mod jobs;
pub mod live;
pub mod opencode_scan;
pub mod project;
pub mod registry;
pub mod resolver;

pub use archive::{ArchivedSession, ConfiguredPlanLocator, PlanLocator};
pub use jobs::{job_segment, parse_job_reference, JobCollector, JobSegment};
pub use live::{ClaudeSource, CodexSource, LiveProbe, LiveSource, SourcePattern};
pub use opencode_scan::OpenCodeSession;
pub use project::{describe, GitProjectLookup, ProjectFields, ProjectInfo, ProjectLookup};
pub use registry::RegistryRecord;
pub use resolver::{filter_sessions, resolve_in, sort_recent_first};

use crate::config::Config;
use crate::error::Result;
use crate::types::{JobRef, Provider, SessionDescriptor};
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

/// Storage locations scanned for sessions
#[derive(Debug, Clone)]
pub struct ScanRoots {
    pub claude: PathBuf,
    pub codex: PathBuf,
    pub opencode_storage: PathBuf,
    pub registry: PathBuf,
    pub plan_roots: Vec<PathBuf>,
    pub probe_line_limit: usize,
}

impl ScanRoots {
    pub fn from_config(config: &Config) -> Self {
        Self {
            claude: config.paths.claude_root(),
            codex: config.paths.codex_root(),
            opencode_storage: config.paths.opencode_storage(),
            registry: config.paths.registry_dir(),
            plan_roots: config.archive.plan_roots.clone(),
            probe_line_limit: config.scan.probe_line_limit,
        }
    }
}

/// A transcript found by the live scan
#[derive(Debug, Clone)]
pub struct LiveFile {
    pub provider: Provider,
    pub path: PathBuf,
    /// `None` when the file could not be read
    pub probe: Option<LiveProbe>,
    pub modified: Option<DateTime<Utc>>,
}

impl LiveFile {
    fn session_id(&self) -> &str {
        self.probe
            .as_ref()
            .map(|p| p.session_id.as_str())
            .unwrap_or("")
    }

    fn file_stem(&self) -> String {
        self.path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// Raw results of each discovery source, before precedence is applied
#[derive(Debug, Clone, Default)]
pub struct DiscoverySources {
    /// Keyed by native session id
    pub registry: HashMap<String, RegistryRecord>,
    pub archived: Vec<ArchivedSession>,
    pub live: Vec<LiveFile>,
    pub opencode: Vec<OpenCodeSession>,
}

fn descriptor(
    session_id: String,
    provider: Provider,
    project: ProjectFields,
    jobs: Vec<JobRef>,
    log_path: PathBuf,
    started_at: Option<DateTime<Utc>>,
) -> SessionDescriptor {
    SessionDescriptor {
        session_id,
        provider,
        project_name: project.project_name,
        project_path: project.project_path,
        worktree: project.worktree,
        ecosystem: project.ecosystem,
        jobs,
        log_path,
        started_at,
    }
}

/// Build the registry's view of a live transcript.
fn from_registry(
    record: &RegistryRecord,
    file: &LiveFile,
    lookup: &dyn ProjectLookup,
) -> SessionDescriptor {
    let probe = file.probe.as_ref();
    let line_index = probe
        .and_then(|p| p.jobs.first())
        .map(|j| j.line_index)
        .unwrap_or(0);
    let log_path = record
        .transcript_path
        .clone()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| file.path.clone());
    let provider = record
        .provider()
        .unwrap_or_else(|| Provider::infer_from_path(&log_path));

    descriptor(
        file.session_id().to_string(),
        provider,
        describe(lookup, &record.working_directory),
        record.job_ref(line_index).into_iter().collect(),
        log_path,
        record.started_at.or_else(|| probe.and_then(|p| p.started_at)),
    )
}

/// Apply discovery precedence to the collected sources.
///
/// For each live transcript, in order:
///
/// 1. A registry record for its session id wins, once per id.
/// 2. Otherwise an archived copy of the session suppresses the live file.
/// 3. Otherwise the live probe is used, or a placeholder when the probe
///    recovered no metadata.
///
/// Archived sessions not claimed by the registry follow, then OpenCode
/// sessions.
pub fn merge(sources: &DiscoverySources, lookup: &dyn ProjectLookup) -> Vec<SessionDescriptor> {
    let archived_ids: HashSet<&str> = sources
        .archived
        .iter()
        .map(ArchivedSession::native_id)
        .filter(|id| !id.is_empty())
        .collect();

    let mut sessions = Vec::new();
    let mut from_registry_ids: HashSet<String> = HashSet::new();

    for file in &sources.live {
        let session_id = file.session_id();

        let registered = if session_id.is_empty() {
            None
        } else {
            sources.registry.get(session_id)
        };

        if let Some(record) = registered {
            if !from_registry_ids.insert(session_id.to_string()) {
                tracing::debug!(
                    session_id,
                    file = %file.path.display(),
                    "Skipping duplicate registry session"
                );
                continue;
            }
            tracing::debug!(
                session_id,
                plan = %record.plan_name,
                job_file = %record.job_file_path,
                "Using registry metadata"
            );
            sessions.push(from_registry(record, file, lookup));
            continue;
        }

        if archived_ids.contains(session_id) {
            tracing::debug!(session_id, "Skipping live transcript; session is archived");
            continue;
        }

        match file.probe.as_ref().filter(|p| p.found) {
            Some(probe) => sessions.push(descriptor(
                probe.session_id.clone(),
                file.provider,
                describe(lookup, &probe.cwd),
                probe.jobs.clone(),
                file.path.clone(),
                probe.started_at,
            )),
            None => {
                if file.probe.is_none() && file.modified.is_none() {
                    continue;
                }
                sessions.push(descriptor(
                    file.file_stem(),
                    file.provider,
                    ProjectFields::unknown(),
                    Vec::new(),
                    file.path.clone(),
                    file.modified,
                ));
            }
        }
    }

    for archived in &sources.archived {
        let id = archived.native_id();
        if id.is_empty() || from_registry_ids.contains(id) {
            continue;
        }
        let record = &archived.record;
        sessions.push(descriptor(
            id.to_string(),
            archived.provider(),
            describe(lookup, &record.working_directory),
            record.job_ref(0).into_iter().collect(),
            archived.transcript.clone(),
            record.started_at,
        ));
    }

    for session in &sources.opencode {
        sessions.push(descriptor(
            session.session_id.clone(),
            Provider::OpenCode,
            describe(lookup, &session.directory),
            Vec::new(),
            session.metadata_path.clone(),
            session.started_at,
        ));
    }

    sessions
}

fn modified_at(path: &Path) -> Option<DateTime<Utc>> {
    std::fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .map(DateTime::<Utc>::from)
}

/// Discovers sessions across all sources and resolves specifiers.
pub struct Scanner {
    roots: ScanRoots,
    sources: Vec<Box<dyn LiveSource>>,
    projects: Box<dyn ProjectLookup>,
    plans: Box<dyn PlanLocator>,
}

impl Scanner {
    pub fn new(roots: ScanRoots) -> Self {
        let sources: Vec<Box<dyn LiveSource>> = vec![
            Box::new(ClaudeSource::new(roots.claude.clone())),
            Box::new(CodexSource::new(roots.codex.clone())),
        ];
        let plans = ConfiguredPlanLocator::new(roots.plan_roots.clone());
        Self {
            roots,
            sources,
            projects: Box::new(GitProjectLookup::new()),
            plans: Box::new(plans),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(ScanRoots::from_config(config))
    }

    /// Replace the project lookup used to enrich descriptors.
    pub fn with_project_lookup(mut self, lookup: impl ProjectLookup + 'static) -> Self {
        self.projects = Box::new(lookup);
        self
    }

    /// Replace the locator used to find archived sessions.
    pub fn with_plan_locator(mut self, locator: impl PlanLocator + 'static) -> Self {
        self.plans = Box::new(locator);
        self
    }

    pub fn roots(&self) -> &ScanRoots {
        &self.roots
    }

    fn live_files(&self) -> Vec<LiveFile> {
        let limit = self.roots.probe_line_limit;
        let mut files = Vec::new();

        for source in &self.sources {
            let paths = match source.discover_files() {
                Ok(paths) => paths,
                Err(e) => {
                    tracing::warn!(provider = %source.provider(), error = %e, "Live scan failed");
                    continue;
                }
            };
            for path in paths {
                let probe = match source.probe(&path, limit) {
                    Ok(probe) => Some(probe),
                    Err(e) => {
                        tracing::debug!(file = %path.display(), error = %e, "Failed to probe transcript");
                        None
                    }
                };
                tracing::trace!(
                    file = %path.display(),
                    found = probe.as_ref().map(|p| p.found).unwrap_or(false),
                    "Probed transcript"
                );
                files.push(LiveFile {
                    provider: source.provider(),
                    modified: modified_at(&path),
                    probe,
                    path,
                });
            }
        }
        files
    }

    /// Run every discovery source. A source that fails contributes nothing.
    pub fn collect_sources(&self) -> DiscoverySources {
        let registry = registry::load(&self.roots.registry).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Could not load session registry");
            HashMap::new()
        });
        let archived = archive::scan(self.plans.as_ref()).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Could not scan archived sessions");
            Vec::new()
        });
        let live = self.live_files();
        let opencode = opencode_scan::scan(&self.roots.opencode_storage).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Could not scan OpenCode sessions");
            Vec::new()
        });

        tracing::debug!(
            registry = registry.len(),
            archived = archived.len(),
            live = live.len(),
            opencode = opencode.len(),
            "Collected discovery sources"
        );

        DiscoverySources {
            registry,
            archived,
            live,
            opencode,
        }
    }

    /// All sessions, in discovery order.
    pub fn scan(&self) -> Result<Vec<SessionDescriptor>> {
        let sources = self.collect_sources();
        let sessions = merge(&sources, self.projects.as_ref());
        tracing::info!(count = sessions.len(), "Session scan complete");
        Ok(sessions)
    }

    /// Resolve a session id, transcript path, `plan/job.md` pair or job file
    /// path to a single session.
    pub fn resolve(&self, spec: &str) -> Result<SessionDescriptor> {
        let sessions = self.scan()?;
        resolve_in(&sessions, spec)
    }
}
