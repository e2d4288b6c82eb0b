//! Build executor: drives the external build tool and commits fingerprints on success.

pub mod runner;
pub mod updater;

use std::collections::BTreeSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::errors::{FreshError, Result};
use crate::decision::strategy::{BuildDecision, BuildType};

/// What the external tool is asked to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildPlan {
    /// Rebuild and reload everything.
    Full,
    /// Rebuild only these top-level modules.
    Incremental(BTreeSet<String>),
    /// Run the test suite against the existing artifacts.
    TestsOnly,
}

impl BuildPlan {
    /// Plan for a decision; `None` when nothing has to run.
    pub fn for_decision(decision: &BuildDecision) -> Option<Self> {
        match decision {
            BuildDecision::NoBuildNeeded => None,
            BuildDecision::FullBuild => Some(Self::Full),
            BuildDecision::IncrementalBuild { changed_modules } => {
                Some(Self::Incremental(changed_modules.clone()))
            }
            BuildDecision::IncrementalTestsOnly => Some(Self::TestsOnly),
        }
    }

    /// Build type reported for this plan; tests-only runs count as incremental.
    pub const fn build_type(&self) -> BuildType {
        match self {
            Self::Full => BuildType::Full,
            Self::Incremental(_) | Self::TestsOnly => BuildType::Incremental,
        }
    }
}

/// External collaborator that performs the actual compilation.
///
/// The error string is surfaced verbatim in `BuildResult::error`.
pub trait BuildTool {
    /// Carry out `plan`; `Err` carries the tool's failure message.
    fn run(&self, plan: &BuildPlan) -> std::result::Result<(), String>;
}

impl<F> BuildTool for F
where
    F: Fn(&BuildPlan) -> std::result::Result<(), String>,
{
    fn run(&self, plan: &BuildPlan) -> std::result::Result<(), String> {
        self(plan)
    }
}

/// Outcome of one build attempt. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildResult {
    /// Whether the final attempt succeeded.
    pub success: bool,
    /// Wall time including any retry and the cache commit.
    pub duration: Duration,
    /// Type of the final attempt.
    pub build_type: BuildType,
    /// Tool message when `success` is false.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BuildResult {
    /// Successful attempt.
    pub fn succeeded(build_type: BuildType, duration: Duration) -> Self {
        Self {
            success: true,
            duration,
            build_type,
            error: None,
        }
    }

    /// Failed attempt with the tool's message.
    pub fn failed(build_type: BuildType, duration: Duration, error: impl Into<String>) -> Self {
        Self {
            success: false,
            duration,
            build_type,
            error: Some(error.into()),
        }
    }

    /// Convert a failed result into `FreshError::BuildFailed`.
    pub fn into_result(self) -> Result<Self> {
        if self.success {
            return Ok(self);
        }
        Err(FreshError::BuildFailed {
            build_type: self.build_type.as_str(),
            details: self.error.unwrap_or_default(),
        })
    }
}
