//! Change-set classification and the pure build decision.

use std::collections::BTreeSet;
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::core::paths::module_of;
use crate::scanner::changes::ChangeMap;
use crate::scanner::rules::{FileRole, TrackingRules};

/// Strategy handed back to the caller; exactly one per invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum BuildDecision {
    /// Artifacts are current.
    NoBuildNeeded,
    /// Rebuild and reload everything.
    FullBuild,
    /// Rebuild only the named top-level modules.
    IncrementalBuild {
        /// Modules holding at least one changed file.
        changed_modules: BTreeSet<String>,
    },
    /// Only tests changed; run them against the existing artifacts.
    IncrementalTestsOnly,
}

/// Coarse build kind reported in `BuildResult`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BuildType {
    /// Everything rebuilt.
    Full,
    /// Part of the project rebuilt, or tests run.
    Incremental,
    /// Nothing ran.
    Skip,
}

impl BuildType {
    /// Wire name.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Full => "FULL",
            Self::Incremental => "INCREMENTAL",
            Self::Skip => "SKIP",
        }
    }
}

impl fmt::Display for BuildType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl BuildDecision {
    /// Build type an executor reports for this decision.
    pub const fn build_type(&self) -> BuildType {
        match self {
            Self::NoBuildNeeded => BuildType::Skip,
            Self::FullBuild => BuildType::Full,
            Self::IncrementalBuild { .. } | Self::IncrementalTestsOnly => BuildType::Incremental,
        }
    }

    /// Anything other than `NoBuildNeeded`.
    pub const fn needs_build(&self) -> bool {
        !matches!(self, Self::NoBuildNeeded)
    }
}

impl fmt::Display for BuildDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoBuildNeeded => f.write_str("no_build_needed"),
            Self::FullBuild => f.write_str("full_build"),
            Self::IncrementalBuild { changed_modules } => {
                write!(f, "incremental_build[")?;
                for (i, module) in changed_modules.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    f.write_str(module)?;
                }
                f.write_str("]")
            }
            Self::IncrementalTestsOnly => f.write_str("incremental_tests_only"),
        }
    }
}

/// Facts about a change set that the decision is derived from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeClassification {
    /// Size of the change map.
    pub changed_files: usize,
    /// A core-extension file changed.
    pub core_files_changed: bool,
    /// A configuration manifest changed.
    pub configuration_changed: bool,
    /// Non-empty, and every changed file is test-named.
    pub test_only_changes: bool,
    /// First path segment of every changed non-configuration file.
    pub changed_modules: BTreeSet<String>,
}

impl ChangeClassification {
    /// Classify every path of `changes` relative to `root`.
    pub fn from_changes(root: &Path, changes: &ChangeMap, rules: &TrackingRules) -> Self {
        let mut out = Self {
            changed_files: changes.len(),
            ..Self::default()
        };
        let mut all_tests = true;

        for path in changes.keys() {
            let role = rules.classify(path);
            match role {
                FileRole::Config => out.configuration_changed = true,
                FileRole::Core => out.core_files_changed = true,
                FileRole::Test | FileRole::Other => {}
            }
            if role != FileRole::Test {
                all_tests = false;
            }
            if role != FileRole::Config
                && let Some(module) = module_of(root, path)
            {
                out.changed_modules.insert(module);
            }
        }

        out.test_only_changes = out.changed_files > 0 && all_tests;
        out
    }
}

/// First match wins: empty, core, configuration, tests only, module ceiling.
pub fn decide(classification: &ChangeClassification, module_threshold: usize) -> BuildDecision {
    if classification.changed_files == 0 {
        BuildDecision::NoBuildNeeded
    } else if classification.core_files_changed || classification.configuration_changed {
        BuildDecision::FullBuild
    } else if classification.test_only_changes {
        BuildDecision::IncrementalTestsOnly
    } else if classification.changed_modules.len() > module_threshold {
        BuildDecision::FullBuild
    } else {
        BuildDecision::IncrementalBuild {
            changed_modules: classification.changed_modules.clone(),
        }
    }
}
