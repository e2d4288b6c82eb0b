//! Two-phase change detection against the fingerprint store.
//!
//! Phase 1 compares filesystem mtimes with stored timestamps and never reads
//! file content. Only the resulting candidates reach Phase 2, where content is
//! hashed on the bounded pool and compared with the stored digest. A touched
//! but byte-identical file therefore costs one hash and is dropped.
//!
//! A listing that misses part of the tree is not trusted: any directory the
//! walker could not read turns the scan into a systemic failure, and
//! `check_changes` degrades to reporting every tracked file as modified.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::cache::store::{FileFingerprint, FingerprintStore};
use crate::core::config::HashingConfig;
use crate::core::errors::{FreshError, Result};
use crate::logger::jsonl::{EventType, LogEntry, Severity};
use crate::scanner::hasher::{HashPool, hash_file};
use crate::scanner::rules::TrackingRules;
use crate::scanner::walker::ProjectWalker;

/// State of a tracked file relative to its last recorded fingerprint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangeType {
    /// No fingerprint has been recorded for the path.
    New,
    /// Content differs from the recorded fingerprint.
    Modified,
    /// Reserved: the scanner never reports deletions.
    Deleted,
    /// Never present in a returned `ChangeMap`.
    Unchanged,
}

impl ChangeType {
    /// Wire name, as stored in logs.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::New => "NEW",
            Self::Modified => "MODIFIED",
            Self::Deleted => "DELETED",
            Self::Unchanged => "UNCHANGED",
        }
    }
}

impl std::fmt::Display for ChangeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Changed files keyed by absolute path, in deterministic order.
pub type ChangeMap = BTreeMap<PathBuf, ChangeType>;

/// Counters for one scan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanStats {
    /// Tracked files enumerated in Phase 1.
    pub files_seen: usize,
    /// Files whose timestamp made them Phase 2 candidates.
    pub candidates: usize,
    /// Candidates hashed successfully.
    pub hashed: usize,
    /// Entries in the final change map.
    pub confirmed: usize,
    /// Candidates that could not be hashed and were kept as changed.
    pub hash_errors: usize,
    /// Wall time of the whole scan.
    pub duration: Duration,
}

/// Outcome of `ChangeScanner::check_changes`.
#[derive(Debug, Clone, Default)]
pub struct ChangeScan {
    /// Confirmed changes.
    pub changes: ChangeMap,
    /// Counters for the scan that produced `changes`.
    pub stats: ScanStats,
    /// The two-phase scan was abandoned and every tracked file reported as modified.
    pub fallback: bool,
}

impl ChangeScan {
    /// Activity record for this scan: `scan_fallback` or `scan_complete`.
    pub fn log_entry(&self, root: &Path) -> LogEntry {
        let (event, severity) = if self.fallback {
            (EventType::ScanFallback, Severity::Warning)
        } else {
            (EventType::ScanComplete, Severity::Info)
        };
        let mut entry = LogEntry::new(event, severity).root(root);
        entry.files = Some(self.stats.files_seen as u64);
        entry.candidates = Some(self.stats.candidates as u64);
        entry.changed = Some(self.changes.len() as u64);
        entry.duration_ms = Some(u64::try_from(self.stats.duration.as_millis()).unwrap_or(u64::MAX));
        if self.stats.hash_errors > 0 {
            entry.details = Some(format!("{} files could not be hashed", self.stats.hash_errors));
        }
        entry
    }
}

/// Change detector for one project, borrowing the store and rules it runs against.
pub struct ChangeScanner<'a> {
    store: &'a FingerprintStore,
    rules: &'a TrackingRules,
    pool: HashPool,
    excluded: Vec<PathBuf>,
}

impl<'a> ChangeScanner<'a> {
    /// Scanner hashing on a pool sized from `hashing`.
    pub fn new(store: &'a FingerprintStore, rules: &'a TrackingRules, hashing: &HashingConfig) -> Self {
        Self {
            store,
            rules,
            pool: HashPool::from_config(hashing),
            excluded: Vec::new(),
        }
    }

    /// Never descend into `dir` (the project's own cache directory, typically).
    #[must_use]
    pub fn excluding(mut self, dir: PathBuf) -> Self {
        self.excluded.push(dir);
        self
    }

    fn walker(&self) -> ProjectWalker<'a> {
        self.excluded
            .iter()
            .cloned()
            .fold(ProjectWalker::new(self.rules), ProjectWalker::with_excluded)
    }

    /// Run the two-phase scan and report only genuine changes.
    ///
    /// Per-file read failures are absorbed: the file stays in the map with its
    /// tentative change type. Systemic scan failures and store errors are returned.
    /// An incomplete tree listing is a systemic failure.
    pub fn detect(&self, root: &Path) -> Result<(ChangeMap, ScanStats)> {
        self.detect_with(root, hash_file)
    }

    fn detect_with<F>(&self, root: &Path, hash: F) -> Result<(ChangeMap, ScanStats)>
    where
        F: Fn(&Path) -> Result<FileFingerprint> + Sync,
    {
        let started = Instant::now();
        let mut stats = ScanStats::default();

        // Phase 1: timestamps only.
        let outcome = self.walker().walk(root)?;
        if !outcome.is_complete() {
            return Err(FreshError::scan_failed(
                root,
                format!("{} directories could not be listed", outcome.unreadable.len()),
            ));
        }
        stats.files_seen = outcome.files.len();

        let mut tentative: BTreeMap<PathBuf, ChangeType> = BTreeMap::new();
        for file in outcome.files {
            match self.store.get_timestamp(&file.path)? {
                None => {
                    tentative.insert(file.path, ChangeType::New);
                }
                Some(_) if file.has_unknown_mtime() => {
                    tentative.insert(file.path, ChangeType::Modified);
                }
                Some(stored) if file.modified_ms > stored => {
                    tentative.insert(file.path, ChangeType::Modified);
                }
                Some(_) => {}
            }
        }
        stats.candidates = tentative.len();

        if tentative.is_empty() {
            stats.duration = started.elapsed();
            return Ok((ChangeMap::new(), stats));
        }

        // Phase 2: confirm candidates by content.
        let candidates: Vec<PathBuf> = tentative.keys().cloned().collect();
        let hashed = self.pool.run(&candidates, hash)?;

        let mut changes = ChangeMap::new();
        for (path, result) in hashed {
            let Some(&guess) = tentative.get(&path) else {
                continue;
            };
            match result {
                Ok(fingerprint) => {
                    stats.hashed += 1;
                    match self.store.get_hash(&path)? {
                        None => {
                            changes.insert(path, ChangeType::New);
                        }
                        Some(stored) if stored != fingerprint.hash => {
                            changes.insert(path, ChangeType::Modified);
                        }
                        Some(_) => {}
                    }
                }
                Err(error) => {
                    eprintln!(
                        "[FC-SCANNER] cannot hash {}, treating as changed: {error}",
                        path.display()
                    );
                    stats.hash_errors += 1;
                    changes.insert(path, guess);
                }
            }
        }

        stats.confirmed = changes.len();
        stats.duration = started.elapsed();
        Ok((changes, stats))
    }

    /// `detect`, degrading to "everything modified" on a systemic scan failure.
    pub fn check_changes(&self, root: &Path) -> Result<ChangeScan> {
        let started = Instant::now();
        match self.detect(root) {
            Ok((changes, stats)) => Ok(ChangeScan {
                changes,
                stats,
                fallback: false,
            }),
            Err(error) if error.is_scan_failure() => {
                eprintln!(
                    "[FC-SCANNER] scan of {} failed, assuming every tracked file changed: {error}",
                    root.display()
                );
                let changes = self.fallback_all_modified(root);
                let stats = ScanStats {
                    files_seen: changes.len(),
                    duration: started.elapsed(),
                    ..ScanStats::default()
                };
                Ok(ChangeScan {
                    changes,
                    stats,
                    fallback: true,
                })
            }
            Err(error) => Err(error),
        }
    }

    /// Every tracked file that can still be enumerated, marked `MODIFIED`.
    pub(crate) fn fallback_all_modified(&self, root: &Path) -> ChangeMap {
        match self.walker().walk(root) {
            Ok(outcome) => outcome
                .files
                .into_iter()
                .map(|file| (file.path, ChangeType::Modified))
                .collect(),
            Err(error) => {
                eprintln!("[FC-SCANNER] fallback enumeration failed: {error}");
                ChangeMap::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::TrackingConfig;
    use filetime::FileTime;
    use std::fs;
    use tempfile::TempDir;

    struct Fixture {
        dir: TempDir,
        store: FingerprintStore,
        rules: TrackingRules,
        hashing: HashingConfig,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                dir: TempDir::new().unwrap(),
                store: FingerprintStore::open_in_memory().unwrap(),
                rules: TrackingRules::from_config(&TrackingConfig::default()).unwrap(),
                hashing: HashingConfig {
                    workers: 2,
                    chunk_size: 3,
                },
            }
        }

        fn root(&self) -> &Path {
            self.dir.path()
        }

        fn write(&self, rel: &str, body: &str) -> PathBuf {
            let path = self.root().join(rel);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(&path, body).unwrap();
            path
        }

        fn scanner(&self) -> ChangeScanner<'_> {
            ChangeScanner::new(&self.store, &self.rules, &self.hashing)
        }

        fn commit_all(&self) {
            let outcome = ProjectWalker::new(&self.rules).walk(self.root()).unwrap();
            let batch: BTreeMap<PathBuf, FileFingerprint> = outcome
                .files
                .into_iter()
                .map(|f| {
                    let fp = hash_file(&f.path).unwrap();
                    (f.path, fp)
                })
                .collect();
            self.store.batch_update(&batch).unwrap();
        }
    }

    fn bump_mtime(path: &Path, by_secs: i64) {
        let meta = fs::metadata(path).unwrap();
        let mtime = FileTime::from_last_modification_time(&meta);
        let later = FileTime::from_unix_time(mtime.unix_seconds() + by_secs, mtime.nanoseconds());
        filetime::set_file_mtime(path, later).unwrap();
    }

    #[test]
    fn empty_cache_reports_everything_new() {
        let fx = Fixture::new();
        let a = fx.write("A/mod.bsl", "a");
        let b = fx.write("B/config.xml", "<b/>");
        fx.write("B/notes.txt", "untracked");

        let scan = fx.scanner().check_changes(fx.root()).unwrap();
        assert!(!scan.fallback);
        assert_eq!(scan.changes.len(), 2);
        assert_eq!(scan.changes[&a], ChangeType::New);
        assert_eq!(scan.changes[&b], ChangeType::New);
        assert_eq!(scan.stats.candidates, 2);
        assert_eq!(scan.stats.hashed, 2);
    }

    #[test]
    fn unchanged_tree_short_circuits_without_hashing() {
        let fx = Fixture::new();
        fx.write("A/mod.bsl", "a");
        fx.commit_all();

        let scan = fx.scanner().check_changes(fx.root()).unwrap();
        assert!(scan.changes.is_empty());
        assert_eq!(scan.stats.files_seen, 1);
        assert_eq!(scan.stats.candidates, 0);
        assert_eq!(scan.stats.hashed, 0);
    }

    #[test]
    fn touch_without_content_change_is_dropped_in_phase_two() {
        let fx = Fixture::new();
        let a = fx.write("A/mod.bsl", "same");
        fx.commit_all();
        bump_mtime(&a, 10);

        let scan = fx.scanner().check_changes(fx.root()).unwrap();
        assert_eq!(scan.stats.candidates, 1);
        assert_eq!(scan.stats.hashed, 1);
        assert!(scan.changes.is_empty());
    }

    #[test]
    fn content_change_with_newer_mtime_is_modified() {
        let fx = Fixture::new();
        let a = fx.write("A/mod.bsl", "before");
        fx.commit_all();
        fs::write(&a, "after").unwrap();
        bump_mtime(&a, 10);

        let changes = fx.scanner().check_changes(fx.root()).unwrap().changes;
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[&a], ChangeType::Modified);
    }

    #[test]
    fn older_mtime_is_not_a_candidate() {
        let fx = Fixture::new();
        let a = fx.write("A/mod.bsl", "before");
        fx.commit_all();
        fs::write(&a, "after").unwrap();
        bump_mtime(&a, -3_600);

        // Only a strictly newer mtime triggers a content check.
        let scan = fx.scanner().check_changes(fx.root()).unwrap();
        assert!(scan.changes.is_empty());
        assert_eq!(scan.stats.candidates, 0);
    }

    #[test]
    fn untracked_extension_never_reported() {
        let fx = Fixture::new();
        let txt = fx.write("A/readme.txt", "one");
        fx.commit_all();
        fs::write(&txt, "two").unwrap();
        bump_mtime(&txt, 10);

        assert!(fx.scanner().check_changes(fx.root()).unwrap().changes.is_empty());
    }

    #[test]
    fn excluded_cache_dir_is_not_scanned() {
        let fx = Fixture::new();
        fx.write("state/settings.json", "{}");
        let scanner = fx.scanner().excluding(fx.root().join("state"));
        assert!(scanner.check_changes(fx.root()).unwrap().changes.is_empty());
    }

    #[test]
    fn missing_root_falls_back_instead_of_failing() {
        let fx = Fixture::new();
        let gone = fx.root().join("vanished");
        let scan = fx.scanner().check_changes(&gone).unwrap();
        assert!(scan.fallback);
        assert!(scan.changes.is_empty());
    }

    #[test]
    fn fallback_marks_every_tracked_file_modified() {
        let fx = Fixture::new();
        let a = fx.write("A/mod.bsl", "a");
        let b = fx.write("B/Form.xml", "b");
        fx.commit_all();

        let all = fx.scanner().fallback_all_modified(fx.root());
        assert_eq!(all.len(), 2);
        assert_eq!(all[&a], ChangeType::Modified);
        assert_eq!(all[&b], ChangeType::Modified);
    }

    #[test]
    fn unhashable_candidate_keeps_its_tentative_type() {
        let fx = Fixture::new();
        let kept = fx.write("A/mod.bsl", "before");
        let fresh = fx.write("B/Form.xml", "form");
        fx.store
            .batch_update(&BTreeMap::from([(kept.clone(), hash_file(&kept).unwrap())]))
            .unwrap();
        fs::write(&kept, "after").unwrap();
        bump_mtime(&kept, 10);
        let other = fx.write("C/Layout.mxl", "layout");

        let failing = |path: &Path| {
            if path == fresh || path == kept {
                Err(FreshError::io(path, std::io::Error::other("device went away")))
            } else {
                hash_file(path)
            }
        };
        let (changes, stats) = fx.scanner().detect_with(fx.root(), failing).unwrap();

        assert_eq!(changes.len(), 3);
        assert_eq!(changes[&kept], ChangeType::Modified);
        assert_eq!(changes[&fresh], ChangeType::New);
        assert_eq!(changes[&other], ChangeType::New);
        assert_eq!(stats.candidates, 3);
        assert_eq!(stats.hashed, 1);
        assert_eq!(stats.hash_errors, 2);
        assert_eq!(stats.confirmed, 3);
    }

    #[cfg(unix)]
    #[test]
    fn unlistable_subdirectory_forces_fallback() {
        use std::os::unix::fs::PermissionsExt;

        let fx = Fixture::new();
        let visible = fx.write("A/mod.bsl", "a");
        let hidden = fx.write("A/Sub/mod.bsl", "before");
        fx.commit_all();
        fs::write(&hidden, "after").unwrap();
        bump_mtime(&hidden, 10);

        let sub = fx.root().join("A/Sub");
        fs::set_permissions(&sub, fs::Permissions::from_mode(0o000)).unwrap();
        if fs::read_dir(&sub).is_ok() {
            // Permission bits are not enforced for this user.
            fs::set_permissions(&sub, fs::Permissions::from_mode(0o755)).unwrap();
            return;
        }

        let scanner = fx.scanner();
        let detected = scanner.detect(fx.root());
        let scan = scanner.check_changes(fx.root());
        fs::set_permissions(&sub, fs::Permissions::from_mode(0o755)).unwrap();

        let err = detected.unwrap_err();
        assert_eq!(err.code(), "FC-3001");
        let scan = scan.unwrap();
        assert!(scan.fallback);
        assert_eq!(scan.changes.get(&visible), Some(&ChangeType::Modified));
    }

    #[test]
    fn store_errors_propagate() {
        let fx = Fixture::new();
        fx.write("A/mod.bsl", "a");
        fx.store.close().unwrap();

        let err = fx.scanner().check_changes(fx.root()).unwrap_err();
        assert_eq!(err.code(), "FC-2002");
    }

    #[test]
    fn scan_log_entry_reflects_fallback() {
        let scan = ChangeScan {
            fallback: true,
            ..ChangeScan::default()
        };
        let entry = scan.log_entry(Path::new("/proj"));
        assert_eq!(entry.event, EventType::ScanFallback);
        assert_eq!(entry.changed, Some(0));
    }

    #[test]
    fn change_type_wire_names() {
        assert_eq!(serde_json::to_string(&ChangeType::New).unwrap(), "\"NEW\"");
        assert_eq!(
            serde_json::to_string(&ChangeType::Modified).unwrap(),
            "\"MODIFIED\""
        );
        assert_eq!(ChangeType::Deleted.to_string(), "DELETED");
    }
}
