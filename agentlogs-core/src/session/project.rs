//! Project lookup for session working directories
//!
//! Discovery only knows the directory an agent ran in. A [`ProjectLookup`]
//! turns that into a project identity: which repository it belongs to,
//! whether it is a linked git worktree of another checkout, and which
//! ecosystem (multi-repository workspace) contains it.

use std::path::{Path, PathBuf};

/// Project identity for a working directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectInfo {
    pub name: String,
    pub path: PathBuf,
    pub is_worktree: bool,
    /// Main checkout of a linked worktree
    pub parent_project_path: Option<PathBuf>,
    /// Outermost workspace containing the project
    pub root_ecosystem_path: Option<PathBuf>,
    /// Nearest workspace containing the project
    pub parent_ecosystem_path: Option<PathBuf>,
}

/// Resolves working directories to projects.
pub trait ProjectLookup: Send + Sync {
    fn project_by_path(&self, cwd: &Path) -> Option<ProjectInfo>;
}

/// Project fields as they appear on a session descriptor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectFields {
    pub project_path: String,
    pub project_name: String,
    pub worktree: Option<String>,
    pub ecosystem: Option<String>,
}

impl ProjectFields {
    /// Placeholder for sessions whose working directory is unknown
    pub fn unknown() -> Self {
        Self {
            project_path: "unknown".to_string(),
            project_name: "unknown".to_string(),
            worktree: None,
            ecosystem: None,
        }
    }
}

fn base_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}

/// Derive descriptor project fields for `cwd`.
///
/// A worktree is reported under its parent project with the worktree name
/// kept separately. Without a lookup match, the directory itself is the
/// project.
pub fn describe(lookup: &dyn ProjectLookup, cwd: &str) -> ProjectFields {
    if cwd.is_empty() {
        return ProjectFields::unknown();
    }
    let cwd_path = Path::new(cwd);

    let Some(info) = lookup.project_by_path(cwd_path) else {
        return ProjectFields {
            project_path: cwd.to_string(),
            project_name: base_name(cwd_path),
            worktree: None,
            ecosystem: None,
        };
    };

    let (project_path, project_name, worktree) = if info.is_worktree {
        match &info.parent_project_path {
            Some(parent) => (
                parent.to_string_lossy().into_owned(),
                base_name(parent),
                Some(info.name.clone()),
            ),
            None => (
                info.path.to_string_lossy().into_owned(),
                info.name.clone(),
                Some(info.name.clone()),
            ),
        }
    } else {
        (info.path.to_string_lossy().into_owned(), info.name.clone(), None)
    };

    let ecosystem = info
        .root_ecosystem_path
        .as_deref()
        .or(info.parent_ecosystem_path.as_deref())
        .map(base_name);

    ProjectFields {
        project_path,
        project_name,
        worktree,
        ecosystem,
    }
}

/// Default lookup based on git repository layout.
///
/// Walks up from the working directory to the nearest `.git`. A `.git`
/// directory marks a regular checkout; a `.git` file marks a linked worktree
/// whose `gitdir:` line points into the parent's `.git/worktrees/`.
#[derive(Debug, Default, Clone)]
pub struct GitProjectLookup;

impl GitProjectLookup {
    pub fn new() -> Self {
        Self
    }

    /// Main checkout path from a worktree's `.git` file contents.
    fn parent_from_gitfile(contents: &str) -> Option<PathBuf> {
        let gitdir = contents
            .lines()
            .find_map(|line| line.strip_prefix("gitdir:"))?
            .trim();
        let gitdir = Path::new(gitdir);
        gitdir
            .ancestors()
            .find(|p| p.file_name().map(|n| n == ".git").unwrap_or(false))
            .and_then(Path::parent)
            .map(Path::to_path_buf)
    }
}

impl ProjectLookup for GitProjectLookup {
    fn project_by_path(&self, cwd: &Path) -> Option<ProjectInfo> {
        for dir in cwd.ancestors() {
            let marker = dir.join(".git");
            let Ok(meta) = std::fs::metadata(&marker) else {
                continue;
            };

            let name = base_name(dir);
            if meta.is_dir() {
                return Some(ProjectInfo {
                    name,
                    path: dir.to_path_buf(),
                    is_worktree: false,
                    parent_project_path: None,
                    root_ecosystem_path: None,
                    parent_ecosystem_path: None,
                });
            }

            let parent = std::fs::read_to_string(&marker)
                .ok()
                .and_then(|c| Self::parent_from_gitfile(&c));
            return Some(ProjectInfo {
                name,
                path: dir.to_path_buf(),
                is_worktree: parent.is_some(),
                parent_project_path: parent,
                root_ecosystem_path: None,
                parent_ecosystem_path: None,
            });
        }
        None
    }
}
