//! Changed-file scope for incremental review.
//!
//! When a run is restricted to changed code, the full file still goes to the
//! provider (it needs surrounding context to reason correctly) but reported
//! issues are filtered to the changed line ranges, expanded by a configurable
//! context margin.

use git2::{Delta, DiffFindOptions, DiffOptions, Repository};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

/// Errors establishing the diff scope. Always fatal: a changed-only run
/// without a usable repository must fail loudly, never silently widen to the
/// full tree.
#[derive(Debug, Error)]
pub enum ScopeError {
    #[error("not a git repository (or any parent): {0}")]
    NoRepository(String),
    #[error("cannot resolve base reference {base:?}: {source}")]
    BadBaseRef {
        base: String,
        #[source]
        source: git2::Error,
    },
    #[error("git error: {0}")]
    Git(#[from] git2::Error),
}

/// Inclusive 1-based line range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineRange {
    pub start: u32,
    pub end: u32,
}

impl LineRange {
    /// Whether `line` falls inside the range expanded by `margin` on both
    /// sides.
    pub fn contains(&self, line: u32, margin: u32) -> bool {
        line.saturating_add(margin) >= self.start && line <= self.end.saturating_add(margin)
    }
}

/// Changed region of one file.
#[derive(Debug, Clone)]
pub enum FileScope {
    /// New or untracked files: every line is in scope, no filtering.
    FullyChanged,
    Ranges(Vec<LineRange>),
}

/// The set of files and line ranges eligible for reporting.
#[derive(Debug)]
pub struct ChangeScope {
    files: HashMap<PathBuf, FileScope>,
    workdir: PathBuf,
    margin: u32,
}

impl ChangeScope {
    /// Compute the scope of changes between `base` and the working tree.
    ///
    /// New and untracked files are fully changed, deleted files are excluded,
    /// and renames are tracked by destination path with the diff computed
    /// against the prior content.
    pub fn from_repo(root: &Path, base: &str, margin: u32) -> Result<Self, ScopeError> {
        let repo = Repository::discover(root)
            .map_err(|_| ScopeError::NoRepository(root.display().to_string()))?;
        let workdir = repo
            .workdir()
            .map(|p| p.to_path_buf())
            .ok_or_else(|| ScopeError::NoRepository(root.display().to_string()))?;
        // Discovery hands out absolute paths; keep the prefix comparable.
        let workdir = workdir.canonicalize().unwrap_or(workdir);

        let object = repo
            .revparse_single(base)
            .map_err(|source| ScopeError::BadBaseRef {
                base: base.to_string(),
                source,
            })?;
        let tree = object
            .peel_to_tree()
            .map_err(|source| ScopeError::BadBaseRef {
                base: base.to_string(),
                source,
            })?;

        let mut opts = DiffOptions::new();
        opts.include_untracked(true)
            .recurse_untracked_dirs(true)
            .context_lines(0);
        let mut diff = repo.diff_tree_to_workdir_with_index(Some(&tree), Some(&mut opts))?;

        let mut find = DiffFindOptions::new();
        find.renames(true);
        diff.find_similar(Some(&mut find))?;

        let mut files: HashMap<PathBuf, FileScope> = HashMap::new();
        for delta in diff.deltas() {
            match delta.status() {
                // Deleted files have nothing left to report on.
                Delta::Deleted => {}
                Delta::Added | Delta::Untracked | Delta::Copied => {
                    if let Some(path) = delta.new_file().path() {
                        files.insert(path.to_path_buf(), FileScope::FullyChanged);
                    }
                }
                _ => {
                    if let Some(path) = delta.new_file().path() {
                        files
                            .entry(path.to_path_buf())
                            .or_insert_with(|| FileScope::Ranges(Vec::new()));
                    }
                }
            }
        }

        diff.foreach(
            &mut |_delta, _progress| true,
            None,
            Some(&mut |delta, hunk| {
                // A pure deletion leaves no new lines to report on.
                if hunk.new_lines() == 0 {
                    return true;
                }
                if let Some(path) = delta.new_file().path() {
                    if let Some(FileScope::Ranges(ranges)) = files.get_mut(path) {
                        let start = hunk.new_start().max(1);
                        ranges.push(LineRange {
                            start,
                            end: start + hunk.new_lines() - 1,
                        });
                    }
                }
                true
            }),
            None,
        )?;

        // Mode-only or deletion-only deltas gather no ranges; drop them.
        files.retain(|_, scope| match scope {
            FileScope::FullyChanged => true,
            FileScope::Ranges(ranges) => !ranges.is_empty(),
        });

        debug!("diff scope against {}: {} file(s)", base, files.len());
        Ok(Self {
            files,
            workdir,
            margin,
        })
    }

    /// Build a scope from already-computed per-file ranges.
    pub fn from_parts(files: HashMap<PathBuf, FileScope>, margin: u32) -> Self {
        Self {
            files,
            workdir: PathBuf::new(),
            margin,
        }
    }

    pub fn margin(&self) -> u32 {
        self.margin
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Whether a file has any change in scope.
    pub fn contains(&self, path: &Path) -> bool {
        self.files.contains_key(&self.normalize(path))
    }

    /// Whether an issue at `line` in `path` is reportable.
    pub fn allows(&self, path: &Path, line: usize) -> bool {
        let line = u32::try_from(line).unwrap_or(u32::MAX);
        match self.files.get(&self.normalize(path)) {
            None => false,
            Some(FileScope::FullyChanged) => true,
            Some(FileScope::Ranges(ranges)) => {
                ranges.iter().any(|r| r.contains(line, self.margin))
            }
        }
    }

    pub fn paths(&self) -> impl Iterator<Item = &PathBuf> {
        self.files.keys()
    }

    /// Git records repository-relative paths; queries may come in absolute.
    fn normalize(&self, path: &Path) -> PathBuf {
        if path.is_absolute() && !self.workdir.as_os_str().is_empty() {
            path.strip_prefix(&self.workdir)
                .map(|p| p.to_path_buf())
                .unwrap_or_else(|_| path.to_path_buf())
        } else {
            path.to_path_buf()
        }
    }
}
