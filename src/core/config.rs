//! Configuration system: TOML file + env var overrides + smart defaults.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::core::errors::{FreshError, Result};

/// Name of the optional per-project config file inside the cache directory.
pub const PROJECT_CONFIG_FILE: &str = "config.toml";

/// Full freshcheck configuration model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct Config {
    /// `[tracking]` section.
    pub tracking: TrackingConfig,
    /// `[decision]` section.
    pub decision: DecisionConfig,
    /// `[hashing]` section.
    pub hashing: HashingConfig,
    /// `[paths]` section.
    pub paths: PathsConfig,
    /// `[logging]` section.
    pub logging: LoggingConfig,
}

/// Which files are tracked and how changed files are classified.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TrackingConfig {
    /// Extensions (without the dot) whose files are fingerprinted.
    pub tracked_extensions: Vec<String>,
    /// Extensions of compiled/packaged platform sources; a change forces a full build.
    pub core_extensions: Vec<String>,
    /// File names identifying configuration manifests (substring match, case-insensitive).
    pub config_manifest_names: Vec<String>,
    /// Regex matched against file names to recognize tests.
    pub test_name_pattern: String,
    /// Path components that exclude a file or directory from tracking.
    pub ignored_paths: Vec<String>,
}

/// Thresholds used by the build decision engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DecisionConfig {
    /// More changed modules than this forces a full build.
    pub module_threshold: usize,
    /// Window for the informational "recent successful build" check.
    pub recent_build_window_secs: u64,
}

/// Bounded hashing pool sizing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct HashingConfig {
    /// Hashing threads per chunk.
    pub workers: usize,
    /// Files handed to the pool per batch.
    pub chunk_size: usize,
}

/// File names under the project-local cache directory.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PathsConfig {
    /// Hidden directory under the project root.
    pub cache_dir_name: String,
    /// SQLite fingerprint database.
    pub database_file: String,
    /// Last-successful-build marker.
    pub last_build_file: String,
    /// JSONL activity log.
    pub activity_log: String,
}

/// Activity log settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Write the activity log at all.
    pub enabled: bool,
    /// Rotate once the active file would exceed this size.
    pub max_size_bytes: u64,
    /// Rotated files kept (`activity.jsonl.1` ..).
    pub max_rotated_files: u32,
}

fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| (*v).to_string()).collect()
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            tracked_extensions: strings(&[
                "bsl",
                "os",
                "xml",
                "cf",
                "cfe",
                "epf",
                "erf",
                "mxl",
                "json",
                "yaml",
                "yml",
                "feature",
                "packagedef",
            ]),
            core_extensions: strings(&["bsl", "os", "cf", "cfe", "epf", "erf"]),
            config_manifest_names: strings(&[
                "Configuration.xml",
                "ConfigDumpInfo.xml",
                "config.xml",
                "packagedef",
                "env.json",
            ]),
            test_name_pattern: "(?i)(test|тест)".to_string(),
            ignored_paths: strings(&[
                ".git",
                ".svn",
                ".hg",
                "build",
                "out",
                "target",
                "bin",
                "obj",
                "temp",
                "tmp",
                ".tmp",
                ".freshcheck",
                "oscript_modules",
                "node_modules",
            ]),
        }
    }
}

impl Default for DecisionConfig {
    fn default() -> Self {
        Self {
            module_threshold: 10,
            recent_build_window_secs: 5 * 60,
        }
    }
}

impl Default for HashingConfig {
    fn default() -> Self {
        Self {
            workers: std::thread::available_parallelism().map_or(2, |n| n.get().clamp(1, 4)),
            chunk_size: 64,
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            cache_dir_name: ".freshcheck".to_string(),
            database_file: "fingerprints.sqlite3".to_string(),
            last_build_file: "last_build_time".to_string(),
            activity_log: "activity.jsonl".to_string(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_size_bytes: 10 * 1024 * 1024,
            max_rotated_files: 3,
        }
    }
}

impl PathsConfig {
    /// Project-local hidden directory holding all persisted state.
    #[must_use]
    pub fn cache_dir(&self, project_root: &Path) -> PathBuf {
        project_root.join(&self.cache_dir_name)
    }

    /// Fingerprint database path.
    #[must_use]
    pub fn database_path(&self, project_root: &Path) -> PathBuf {
        self.cache_dir(project_root).join(&self.database_file)
    }

    /// Last-build marker path.
    #[must_use]
    pub fn last_build_path(&self, project_root: &Path) -> PathBuf {
        self.cache_dir(project_root).join(&self.last_build_file)
    }

    /// Activity log path.
    #[must_use]
    pub fn activity_log_path(&self, project_root: &Path) -> PathBuf {
        self.cache_dir(project_root).join(&self.activity_log)
    }
}

impl Config {
    /// Load config from an explicit path (or defaults), then apply env overrides.
    ///
    /// A missing explicit path is an error; `None` means defaults plus env.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut cfg = match path {
            Some(path) if path.exists() => Self::parse_file(path)?,
            Some(path) => {
                return Err(FreshError::MissingConfig {
                    path: path.to_path_buf(),
                });
            }
            None => Self::default(),
        };
        cfg.apply_env_overrides_from(env_var)?;
        cfg.normalize();
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load `<root>/<cache_dir>/config.toml` when present, defaults otherwise.
    pub fn load_for_project(project_root: &Path) -> Result<Self> {
        let candidate = PathsConfig::default()
            .cache_dir(project_root)
            .join(PROJECT_CONFIG_FILE);
        if candidate.exists() {
            Self::load(Some(&candidate))
        } else {
            Self::load(None)
        }
    }

    fn parse_file(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path).map_err(|source| FreshError::io(path, source))?;
        let parsed: Self = toml::from_str(&raw)?;
        Ok(parsed)
    }

    /// Deterministic hash of the effective config for logging.
    ///
    /// FNV-1a so the value is stable across processes and toolchains.
    pub fn stable_hash(&self) -> Result<String> {
        let canonical = serde_json::to_string(self)?;
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for byte in canonical.as_bytes() {
            hash ^= u64::from(*byte);
            hash = hash.wrapping_mul(0x0100_0000_01b3);
        }
        Ok(format!("{hash:016x}"))
    }

    fn apply_env_overrides_from<F>(&mut self, mut lookup: F) -> Result<()>
    where
        F: FnMut(&str) -> Option<String>,
    {
        if let Some(raw) = lookup("FRESHCHECK_TRACKED_EXTENSIONS") {
            self.tracking.tracked_extensions = parse_env_list(&raw);
        }
        if let Some(raw) = lookup("FRESHCHECK_CORE_EXTENSIONS") {
            self.tracking.core_extensions = parse_env_list(&raw);
        }
        if let Some(raw) = lookup("FRESHCHECK_IGNORED_PATHS") {
            self.tracking.ignored_paths = parse_env_list(&raw);
        }
        if let Some(raw) = lookup("FRESHCHECK_TEST_NAME_PATTERN") {
            self.tracking.test_name_pattern = raw;
        }
        if let Some(raw) = lookup("FRESHCHECK_MODULE_THRESHOLD") {
            self.decision.module_threshold = parse_env("FRESHCHECK_MODULE_THRESHOLD", &raw)?;
        }
        if let Some(raw) = lookup("FRESHCHECK_RECENT_BUILD_WINDOW_SECS") {
            self.decision.recent_build_window_secs =
                parse_env("FRESHCHECK_RECENT_BUILD_WINDOW_SECS", &raw)?;
        }
        if let Some(raw) = lookup("FRESHCHECK_HASH_WORKERS") {
            self.hashing.workers = parse_env("FRESHCHECK_HASH_WORKERS", &raw)?;
        }
        if let Some(raw) = lookup("FRESHCHECK_HASH_CHUNK_SIZE") {
            self.hashing.chunk_size = parse_env("FRESHCHECK_HASH_CHUNK_SIZE", &raw)?;
        }
        if let Some(raw) = lookup("FRESHCHECK_LOGGING_ENABLED") {
            self.logging.enabled = parse_env("FRESHCHECK_LOGGING_ENABLED", &raw)?;
        }
        Ok(())
    }

    /// Extensions are compared without a leading dot and in lowercase.
    fn normalize(&mut self) {
        for list in [
            &mut self.tracking.tracked_extensions,
            &mut self.tracking.core_extensions,
        ] {
            for ext in list.iter_mut() {
                *ext = ext.trim().trim_start_matches('.').to_lowercase();
            }
            list.retain(|ext| !ext.is_empty());
            list.sort();
            list.dedup();
        }
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.tracking.tracked_extensions.is_empty() {
            return Err(FreshError::InvalidConfig {
                details: "tracking.tracked_extensions must not be empty".to_string(),
            });
        }

        for ext in &self.tracking.core_extensions {
            let normalized = ext.trim_start_matches('.').to_lowercase();
            let tracked = self
                .tracking
                .tracked_extensions
                .iter()
                .any(|t| t.trim_start_matches('.').eq_ignore_ascii_case(&normalized));
            if !tracked {
                return Err(FreshError::InvalidConfig {
                    details: format!(
                        "tracking.core_extensions entry {ext:?} is not a tracked extension"
                    ),
                });
            }
        }

        if let Err(error) = regex::Regex::new(&self.tracking.test_name_pattern) {
            return Err(FreshError::InvalidConfig {
                details: format!("tracking.test_name_pattern does not compile: {error}"),
            });
        }

        if self.decision.module_threshold == 0 {
            return Err(FreshError::InvalidConfig {
                details: "decision.module_threshold must be >= 1".to_string(),
            });
        }

        if self.hashing.workers == 0 {
            return Err(FreshError::InvalidConfig {
                details: "hashing.workers must be >= 1".to_string(),
            });
        }
        if self.hashing.chunk_size == 0 {
            return Err(FreshError::InvalidConfig {
                details: "hashing.chunk_size must be >= 1".to_string(),
            });
        }

        for (name, value) in [
            ("cache_dir_name", &self.paths.cache_dir_name),
            ("database_file", &self.paths.database_file),
            ("last_build_file", &self.paths.last_build_file),
            ("activity_log", &self.paths.activity_log),
        ] {
            if value.trim().is_empty() || Path::new(value).is_absolute() {
                return Err(FreshError::InvalidConfig {
                    details: format!("paths.{name} must be a non-empty relative name"),
                });
            }
        }

        if self.logging.enabled && self.logging.max_size_bytes == 0 {
            return Err(FreshError::InvalidConfig {
                details: "logging.max_size_bytes must be > 0 when logging is enabled".to_string(),
            });
        }

        Ok(())
    }
}

fn env_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|raw| !raw.trim().is_empty())
}

fn parse_env<T>(name: &str, raw: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim().parse::<T>().map_err(|error| FreshError::ConfigParse {
        context: "env",
        details: format!("{name}={raw:?}: {error}"),
    })
}

fn parse_env_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
        .collect()
}
