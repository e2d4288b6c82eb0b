//! Project tree walker: enumerates tracked source files under a project root.
//!
//! The walk is sequential and depth-first. It never follows symlinks, prunes
//! ignored directories before descending into them, and only stats files whose
//! extension is tracked. Problems at the root are systemic and abort the walk.
//! A directory below the root that cannot be listed, or an entry whose type
//! cannot be read, is logged and recorded in `WalkOutcome::unreadable`; the
//! caller decides whether a partial listing is usable. A tracked file whose
//! metadata cannot be read is reported with an unknown mtime so it is treated
//! as changed.

use std::collections::HashSet;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::core::errors::{FreshError, Result};
use crate::core::paths::modified_millis;
use crate::scanner::rules::TrackingRules;

/// Sentinel mtime for files whose metadata could not be read.
pub const UNKNOWN_MTIME: u64 = u64::MAX;

/// Depth guard against pathological trees.
const MAX_DEPTH: usize = 64;

/// One tracked file discovered by the walker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedFile {
    /// Absolute path of the file.
    pub path: PathBuf,
    /// Epoch millis, or `UNKNOWN_MTIME` when the stat failed.
    pub modified_ms: u64,
}

impl TrackedFile {
    /// Whether the stat failed and the mtime is the sentinel.
    pub fn has_unknown_mtime(&self) -> bool {
        self.modified_ms == UNKNOWN_MTIME
    }
}

/// Result of one walk.
#[derive(Debug, Default)]
pub struct WalkOutcome {
    /// Tracked files, sorted by path.
    pub files: Vec<TrackedFile>,
    /// Directories below the root whose listing failed or was incomplete.
    pub unreadable: Vec<PathBuf>,
}

impl WalkOutcome {
    /// True when every directory under the root was listed in full.
    pub fn is_complete(&self) -> bool {
        self.unreadable.is_empty()
    }
}

/// Sequential walker over one project root.
#[derive(Debug)]
pub struct ProjectWalker<'a> {
    rules: &'a TrackingRules,
    excluded: HashSet<PathBuf>,
}

impl<'a> ProjectWalker<'a> {
    /// Walker applying `rules`, with no extra exclusions.
    pub fn new(rules: &'a TrackingRules) -> Self {
        Self {
            rules,
            excluded: HashSet::new(),
        }
    }

    /// Skip an additional directory (e.g. a custom cache directory).
    #[must_use]
    pub fn with_excluded(mut self, dir: PathBuf) -> Self {
        self.excluded.insert(dir);
        self
    }

    /// Enumerate every tracked, non-ignored regular file under `root`.
    pub fn walk(&self, root: &Path) -> Result<WalkOutcome> {
        let root_meta = match fs::metadata(root) {
            Ok(meta) => meta,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(FreshError::scan_failed(root, "project root does not exist"));
            }
            Err(err) if err.kind() == ErrorKind::PermissionDenied => {
                return Err(FreshError::scan_failed(root, "permission denied at project root"));
            }
            Err(err) => return Err(FreshError::io(root, err)),
        };
        if !root_meta.is_dir() {
            return Err(FreshError::scan_failed(root, "project root is not a directory"));
        }
        // The root listing must succeed; anything below degrades per entry.
        let root_entries =
            fs::read_dir(root).map_err(|err| FreshError::scan_failed(root, err.to_string()))?;

        let mut outcome = WalkOutcome::default();
        let mut stack: Vec<(PathBuf, usize)> = Vec::new();
        self.visit_entries(root, root_entries, 0, &mut stack, &mut outcome);

        while let Some((dir, depth)) = stack.pop() {
            match fs::read_dir(&dir) {
                Ok(entries) => self.visit_entries(&dir, entries, depth, &mut stack, &mut outcome),
                // Removed between listing its parent and descending: nothing to miss.
                Err(err) if err.kind() == ErrorKind::NotFound => {}
                Err(err) => {
                    eprintln!("[FC-WALKER] cannot list {}: {err}", dir.display());
                    outcome.unreadable.push(dir);
                }
            }
        }

        outcome.files.sort_by(|a, b| a.path.cmp(&b.path));
        outcome.unreadable.sort();
        outcome.unreadable.dedup();
        Ok(outcome)
    }

    fn visit_entries(
        &self,
        dir: &Path,
        entries: fs::ReadDir,
        depth: usize,
        stack: &mut Vec<(PathBuf, usize)>,
        outcome: &mut WalkOutcome,
    ) {
        for entry_result in entries {
            let entry = match entry_result {
                Ok(entry) => entry,
                Err(err) => {
                    eprintln!("[FC-WALKER] cannot read entry in {}: {err}", dir.display());
                    outcome.unreadable.push(dir.to_path_buf());
                    continue;
                }
            };
            let file_type = match entry.file_type() {
                Ok(file_type) => file_type,
                Err(err) => {
                    eprintln!(
                        "[FC-WALKER] cannot determine type of {}: {err}",
                        entry.path().display()
                    );
                    outcome.unreadable.push(dir.to_path_buf());
                    continue;
                }
            };
            if file_type.is_symlink() {
                continue;
            }

            let path = entry.path();
            let name = entry.file_name();
            let name = name.to_string_lossy();

            if file_type.is_dir() {
                if depth + 1 < MAX_DEPTH
                    && !self.rules.is_ignored_name(&name)
                    && !self.excluded.contains(&path)
                {
                    stack.push((path, depth + 1));
                }
                continue;
            }

            if !file_type.is_file() || !self.rules.is_tracked(&path) {
                continue;
            }

            match entry.metadata() {
                Ok(meta) => outcome.files.push(TrackedFile {
                    path,
                    modified_ms: modified_millis(&meta),
                }),
                Err(err) => {
                    eprintln!("[FC-WALKER] cannot stat {}: {err}", path.display());
                    outcome.files.push(TrackedFile {
                        path,
                        modified_ms: UNKNOWN_MTIME,
                    });
                }
            }
        }
    }
}
