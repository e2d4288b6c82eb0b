//! Build executor: runs the tool for a decision and commits fingerprints on success.
//!
//! The cache is only written after the tool reports success. A failed
//! incremental build is retried once as a full build; a failed full build is
//! terminal and leaves the cache exactly as it was, so the next scan reports
//! the same changes again.

use std::collections::BTreeSet;
use std::path::Path;
use std::time::Instant;

use crate::core::errors::Result;
use crate::decision::strategy::{BuildDecision, BuildType};
use crate::executor::updater::CacheUpdater;
use crate::executor::{BuildPlan, BuildResult, BuildTool};
use crate::logger::jsonl::{ActivityLog, EventType, LogEntry, Severity};

/// Runs one build decision through the tool and the cache updater.
pub struct BuildExecutor<'a> {
    tool: &'a dyn BuildTool,
    updater: CacheUpdater<'a>,
    log: &'a ActivityLog,
}

impl<'a> BuildExecutor<'a> {
    /// Executor driving `tool`, committing through `updater`.
    pub fn new(tool: &'a dyn BuildTool, updater: CacheUpdater<'a>, log: &'a ActivityLog) -> Self {
        Self { tool, updater, log }
    }

    /// Carry out `decision` against `root`.
    ///
    /// Tool failures come back as an unsuccessful `BuildResult`; only cache
    /// commit failures are returned as errors.
    pub fn execute(&self, root: &Path, decision: &BuildDecision) -> Result<BuildResult> {
        let started = Instant::now();
        let result = match BuildPlan::for_decision(decision) {
            None => BuildResult::succeeded(BuildType::Skip, started.elapsed()),
            Some(plan @ BuildPlan::TestsOnly) => match self.tool.run(&plan) {
                Ok(()) => BuildResult::succeeded(plan.build_type(), started.elapsed()),
                Err(error) => BuildResult::failed(plan.build_type(), started.elapsed(), error),
            },
            Some(BuildPlan::Incremental(modules)) => self.incremental(root, &modules, started)?,
            Some(BuildPlan::Full) => self.full(root, started)?,
        };

        let mut entry = LogEntry::new(
            EventType::BuildComplete,
            if result.success {
                Severity::Info
            } else {
                Severity::Warning
            },
        )
        .root(root);
        entry.decision = Some(decision.to_string());
        entry.build_type = Some(result.build_type.to_string());
        entry.ok = Some(result.success);
        entry.duration_ms = Some(u64::try_from(result.duration.as_millis()).unwrap_or(u64::MAX));
        entry.error_message.clone_from(&result.error);
        self.log.record(&entry);

        Ok(result)
    }

    fn incremental(
        &self,
        root: &Path,
        modules: &BTreeSet<String>,
        started: Instant,
    ) -> Result<BuildResult> {
        match self.tool.run(&BuildPlan::Incremental(modules.clone())) {
            Ok(()) => {
                self.updater.commit_modules(root, modules)?;
                Ok(BuildResult::succeeded(BuildType::Incremental, started.elapsed()))
            }
            Err(error) => {
                eprintln!("[FC-EXECUTOR] incremental build failed, retrying as full build: {error}");
                self.full(root, started)
            }
        }
    }

    fn full(&self, root: &Path, started: Instant) -> Result<BuildResult> {
        match self.tool.run(&BuildPlan::Full) {
            Ok(()) => {
                self.updater.commit_full(root)?;
                Ok(BuildResult::succeeded(BuildType::Full, started.elapsed()))
            }
            Err(error) => {
                eprintln!("[FC-EXECUTOR] full build failed: {error}");
                Ok(BuildResult::failed(BuildType::Full, started.elapsed(), error))
            }
        }
    }
}
