//! Build orchestrator: the one explicitly constructed owner of a project's cache.
//!
//! Opening an orchestrator opens the fingerprint store (fatal on failure), the
//! last-build marker and the activity log for a single project root. Scanner,
//! decision engine and executor borrow from it per call; nothing is global.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::cache::marker::BuildMarker;
use crate::cache::store::FingerprintStore;
use crate::core::config::Config;
use crate::core::errors::{FreshError, Result};
use crate::core::paths::{relative_to, resolve_absolute_path};
use crate::decision::engine::{DecisionEngine, Evaluation};
use crate::decision::strategy::BuildDecision;
use crate::executor::runner::BuildExecutor;
use crate::executor::updater::CacheUpdater;
use crate::executor::{BuildResult, BuildTool};
use crate::logger::jsonl::{ActivityLog, EventType, LogEntry, Severity};
use crate::scanner::changes::{ChangeScan, ChangeScanner};
use crate::scanner::hasher::HashPool;
use crate::scanner::rules::TrackingRules;

/// Owner of the store, marker and activity log for one project root.
pub struct BuildOrchestrator {
    root: PathBuf,
    resolved_root: PathBuf,
    config: Config,
    rules: TrackingRules,
    store: FingerprintStore,
    marker: BuildMarker,
    log: ActivityLog,
}

impl BuildOrchestrator {
    /// Open the cache for `root` with an explicit configuration.
    pub fn open(root: &Path, config: Config) -> Result<Self> {
        config.validate()?;
        let rules = TrackingRules::from_config(&config.tracking)?;
        let paths = &config.paths;

        let log = ActivityLog::from_logging(paths.activity_log_path(root), &config.logging);
        let store = match FingerprintStore::open(&paths.database_path(root)) {
            Ok(store) => store,
            Err(error) => {
                log.record(
                    &LogEntry::new(EventType::Error, Severity::Critical)
                        .root(root)
                        .error(&error)
                        .details("store_open"),
                );
                return Err(error);
            }
        };
        let marker = BuildMarker::new(paths.last_build_path(root));

        let mut entry = LogEntry::new(EventType::StoreOpen, Severity::Info).root(root);
        entry.files = store.len().ok().map(|n| n as u64);
        entry.details = config
            .stable_hash()
            .ok()
            .map(|hash| format!("config_hash={hash}"));
        log.record(&entry);

        Ok(Self {
            root: root.to_path_buf(),
            resolved_root: resolve_absolute_path(root),
            config,
            rules,
            store,
            marker,
            log,
        })
    }

    /// Open using `<root>/.freshcheck/config.toml` (if any) plus environment overrides.
    pub fn open_project(root: &Path) -> Result<Self> {
        let config = Config::load_for_project(root)?;
        Self::open(root, config)
    }

    /// Project root as passed to `open`.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Validated configuration in effect.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Underlying fingerprint store, for diagnostics.
    pub fn store(&self) -> &FingerprintStore {
        &self.store
    }

    /// Two-phase change detection for the project.
    ///
    /// File-level problems degrade to a fallback scan; store errors are returned.
    pub fn check_changes(&self, root: &Path) -> Result<ChangeScan> {
        self.ensure_root(root)?;
        let scan = self.scanner().check_changes(root)?;
        self.log.record(&scan.log_entry(root));
        Ok(scan)
    }

    /// Decide how to build. Scan and store failures become `FullBuild`; only a
    /// root this orchestrator was not opened for is an error.
    pub fn determine_build_strategy(&self, root: &Path) -> Result<BuildDecision> {
        Ok(self.evaluate(root)?.decision)
    }

    /// `determine_build_strategy` with the scan and classification attached.
    pub fn evaluate(&self, root: &Path) -> Result<Evaluation> {
        self.ensure_root(root)?;
        Ok(self.engine().evaluate(root))
    }

    /// Commit caller-computed hashes, stamping each with its file's current mtime.
    pub fn update_hashes(&self, root: &Path, hashes: &BTreeMap<PathBuf, String>) -> Result<usize> {
        self.ensure_root(root)?;
        if let Some(outside) = hashes.keys().find(|path| relative_to(root, path).is_none()) {
            return Err(FreshError::InvalidConfig {
                details: format!("{} is outside project root {}", outside.display(), root.display()),
            });
        }

        let result = self.store.batch_update_hashes(hashes);
        let mut entry = match &result {
            Ok(count) => {
                let mut entry = LogEntry::new(EventType::CacheCommit, Severity::Info).root(root);
                entry.files = Some(*count as u64);
                entry.ok = Some(true);
                entry
            }
            Err(error) => LogEntry::new(EventType::Error, Severity::Critical)
                .root(root)
                .error(error),
        };
        entry.details = Some("update_hashes".to_string());
        self.log.record(&entry);
        result
    }

    /// Epoch millis of the last successful build, if one was recorded.
    pub fn get_last_build_time(&self, root: &Path) -> Result<Option<u64>> {
        self.ensure_root(root)?;
        self.marker.read()
    }

    /// Record a successful build at `millis`.
    pub fn set_last_build_time(&self, root: &Path, millis: u64) -> Result<()> {
        self.ensure_root(root)?;
        self.marker.write(millis)
    }

    /// Decide, run `tool` accordingly and commit fingerprints on success.
    pub fn run_build(&self, tool: &dyn BuildTool) -> Result<BuildResult> {
        let decision = self.engine().determine_build_strategy(&self.root);
        self.execute(tool, &decision)
    }

    /// Run `tool` for an already-made decision.
    pub fn execute(&self, tool: &dyn BuildTool, decision: &BuildDecision) -> Result<BuildResult> {
        BuildExecutor::new(tool, self.updater(), &self.log).execute(&self.root, decision)
    }

    /// Flush and release the store. Idempotent.
    pub fn close(&self) -> Result<()> {
        if self.store.is_closed() {
            return Ok(());
        }
        let result = self.store.close();
        let mut entry = LogEntry::new(EventType::StoreClose, Severity::Info).root(&self.root);
        entry.ok = Some(result.is_ok());
        if let Err(error) = &result {
            entry = entry.error(error);
        }
        self.log.record(&entry);
        result
    }

    fn ensure_root(&self, root: &Path) -> Result<()> {
        if root == self.root || resolve_absolute_path(root) == self.resolved_root {
            return Ok(());
        }
        Err(FreshError::InvalidConfig {
            details: format!(
                "orchestrator for {} cannot serve {}",
                self.root.display(),
                root.display()
            ),
        })
    }

    fn cache_dir(&self) -> PathBuf {
        self.config.paths.cache_dir(&self.root)
    }

    fn scanner(&self) -> ChangeScanner<'_> {
        ChangeScanner::new(&self.store, &self.rules, &self.config.hashing).excluding(self.cache_dir())
    }

    fn engine(&self) -> DecisionEngine<'_> {
        DecisionEngine::new(
            self.scanner(),
            &self.rules,
            &self.config.decision,
            &self.marker,
            &self.log,
        )
    }

    fn updater(&self) -> CacheUpdater<'_> {
        CacheUpdater::new(
            &self.store,
            &self.rules,
            HashPool::from_config(&self.config.hashing),
            &self.marker,
            &self.log,
        )
        .excluding(self.cache_dir())
    }
}

impl Drop for BuildOrchestrator {
    fn drop(&mut self) {
        if let Err(error) = self.close() {
            eprintln!("[FC-ORCHESTRATOR] close on drop failed: {error}");
        }
    }
}

impl std::fmt::Debug for BuildOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuildOrchestrator")
            .field("root", &self.root)
            .field("store", &self.store)
            .field("log", &self.log)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scanner::hasher::digest_bytes;
    use std::fs;
    use tempfile::TempDir;

    fn test_config() -> Config {
        let mut config = Config::default();
        config.hashing.workers = 2;
        config
    }

    #[test]
    fn open_creates_cache_directory_and_logs() {
        let dir = TempDir::new().unwrap();
        let orch = BuildOrchestrator::open(dir.path(), test_config()).unwrap();
        assert!(dir.path().join(".freshcheck/fingerprints.sqlite3").exists());
        orch.close().unwrap();

        let log = fs::read_to_string(dir.path().join(".freshcheck/activity.jsonl")).unwrap();
        assert!(log.contains("\"store_open\""));
        assert!(log.contains("\"store_close\""));
    }

    #[test]
    fn invalid_config_is_rejected_before_opening() {
        let dir = TempDir::new().unwrap();
        let mut config = test_config();
        config.tracking.test_name_pattern = "(".to_string();
        let err = BuildOrchestrator::open(dir.path(), config).unwrap_err();
        assert_eq!(err.code(), "FC-1001");
        assert!(!dir.path().join(".freshcheck/fingerprints.sqlite3").exists());
    }

    #[test]
    fn foreign_root_is_rejected() {
        let dir = TempDir::new().unwrap();
        let other = TempDir::new().unwrap();
        let orch = BuildOrchestrator::open(dir.path(), test_config()).unwrap();
        assert_eq!(orch.check_changes(other.path()).unwrap_err().code(), "FC-1001");
        assert_eq!(
            orch.get_last_build_time(other.path()).unwrap_err().code(),
            "FC-1001"
        );
    }

    #[test]
    fn last_build_time_round_trips() {
        let dir = TempDir::new().unwrap();
        let orch = BuildOrchestrator::open(dir.path(), test_config()).unwrap();
        assert_eq!(orch.get_last_build_time(dir.path()).unwrap(), None);
        orch.set_last_build_time(dir.path(), 1_234).unwrap();
        assert_eq!(orch.get_last_build_time(dir.path()).unwrap(), Some(1_234));
    }

    #[test]
    fn update_hashes_rejects_paths_outside_the_root() {
        let dir = TempDir::new().unwrap();
        let orch = BuildOrchestrator::open(dir.path(), test_config()).unwrap();
        let mut hashes = BTreeMap::new();
        hashes.insert(PathBuf::from("/elsewhere/mod.bsl"), digest_bytes(b"x"));
        assert_eq!(
            orch.update_hashes(dir.path(), &hashes).unwrap_err().code(),
            "FC-1001"
        );
    }

    #[test]
    fn update_hashes_makes_files_unchanged() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("A").join("Form.xml");
        fs::create_dir_all(file.parent().unwrap()).unwrap();
        fs::write(&file, "form").unwrap();

        let orch = BuildOrchestrator::open(dir.path(), test_config()).unwrap();
        assert_eq!(orch.check_changes(dir.path()).unwrap().changes.len(), 1);

        let mut hashes = BTreeMap::new();
        hashes.insert(file, digest_bytes(b"form"));
        assert_eq!(orch.update_hashes(dir.path(), &hashes).unwrap(), 1);
        assert!(orch.check_changes(dir.path()).unwrap().changes.is_empty());
    }

    #[test]
    fn close_is_idempotent_and_operations_fail_afterwards() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("A")).unwrap();
        fs::write(dir.path().join("A").join("Form.xml"), "form").unwrap();
        let orch = BuildOrchestrator::open(dir.path(), test_config()).unwrap();
        orch.close().unwrap();
        orch.close().unwrap();
        assert_eq!(orch.check_changes(dir.path()).unwrap_err().code(), "FC-2002");
        // Decisions still come back, conservatively.
        assert_eq!(
            orch.determine_build_strategy(dir.path()).unwrap(),
            BuildDecision::FullBuild
        );
    }
}
