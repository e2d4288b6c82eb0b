//! Cache updater: recompute fingerprints after a successful build and commit them.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::cache::marker::BuildMarker;
use crate::cache::store::{FileFingerprint, FingerprintStore};
use crate::core::errors::Result;
use crate::core::paths::{module_of, now_millis};
use crate::logger::jsonl::{ActivityLog, EventType, LogEntry, Severity};
use crate::scanner::hasher::HashPool;
use crate::scanner::rules::TrackingRules;
use crate::scanner::walker::ProjectWalker;

/// What one commit wrote.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommitSummary {
    /// Fingerprints written in the batch.
    pub files_committed: usize,
    /// Files that could not be hashed and were left with their old fingerprint.
    pub skipped: usize,
}

/// Writes fresh fingerprints and the build marker after a successful build.
pub struct CacheUpdater<'a> {
    store: &'a FingerprintStore,
    rules: &'a TrackingRules,
    pool: HashPool,
    marker: &'a BuildMarker,
    log: &'a ActivityLog,
    excluded: Vec<PathBuf>,
}

impl<'a> CacheUpdater<'a> {
    /// Updater hashing on `pool` and committing into `store`.
    pub fn new(
        store: &'a FingerprintStore,
        rules: &'a TrackingRules,
        pool: HashPool,
        marker: &'a BuildMarker,
        log: &'a ActivityLog,
    ) -> Self {
        Self {
            store,
            rules,
            pool,
            marker,
            log,
            excluded: Vec::new(),
        }
    }

    /// Never fingerprint anything under `dir`.
    #[must_use]
    pub fn excluding(mut self, dir: PathBuf) -> Self {
        self.excluded.push(dir);
        self
    }

    /// Fingerprint every tracked file under `root` and record the build time.
    pub fn commit_full(&self, root: &Path) -> Result<CommitSummary> {
        self.commit(root, None)
    }

    /// Fingerprint only files whose module is in `modules`, then record the build time.
    pub fn commit_modules(&self, root: &Path, modules: &BTreeSet<String>) -> Result<CommitSummary> {
        self.commit(root, Some(modules))
    }

    fn commit(&self, root: &Path, modules: Option<&BTreeSet<String>>) -> Result<CommitSummary> {
        let started = Instant::now();
        let walker = self
            .excluded
            .iter()
            .cloned()
            .fold(ProjectWalker::new(self.rules), ProjectWalker::with_excluded);

        let paths: Vec<PathBuf> = walker
            .walk(root)?
            .files
            .into_iter()
            .map(|file| file.path)
            .filter(|path| {
                modules.is_none_or(|set| module_of(root, path).is_some_and(|m| set.contains(&m)))
            })
            .collect();

        let mut batch: BTreeMap<PathBuf, FileFingerprint> = BTreeMap::new();
        let mut skipped = 0;
        for (path, outcome) in self.pool.hash_all(&paths)? {
            match outcome {
                Ok(fingerprint) => {
                    batch.insert(path, fingerprint);
                }
                Err(error) => {
                    eprintln!("[FC-UPDATER] not committing {}: {error}", path.display());
                    skipped += 1;
                }
            }
        }

        let files_committed = match self.store.batch_update(&batch) {
            Ok(count) => count,
            Err(error) => {
                self.log.record(
                    &LogEntry::new(EventType::Error, Severity::Critical)
                        .root(root)
                        .error(&error)
                        .details("cache_commit"),
                );
                return Err(error);
            }
        };
        self.marker.write(now_millis())?;

        let mut entry = LogEntry::new(EventType::CacheCommit, Severity::Info).root(root);
        entry.files = Some(files_committed as u64);
        entry.duration_ms = Some(u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX));
        entry.ok = Some(true);
        entry.details = Some(match modules {
            None => format!("full, {skipped} skipped"),
            Some(set) => format!("{} modules, {skipped} skipped", set.len()),
        });
        self.log.record(&entry);

        Ok(CommitSummary {
            files_committed,
            skipped,
        })
    }
}
