//! Decision engine: scan, classify, decide. Always yields a decision.

use std::path::Path;
use std::time::Duration;

use crate::cache::marker::BuildMarker;
use crate::core::config::DecisionConfig;
use crate::core::errors::FreshError;
use crate::core::paths::now_millis;
use crate::decision::strategy::{BuildDecision, ChangeClassification, decide};
use crate::logger::jsonl::{ActivityLog, EventType, LogEntry, Severity};
use crate::scanner::changes::{ChangeScan, ChangeScanner};
use crate::scanner::rules::TrackingRules;

/// Everything one strategy evaluation produced, for callers that want more than
/// the decision itself.
#[derive(Debug, Clone)]
pub struct Evaluation {
    /// The strategy handed back to the caller.
    pub decision: BuildDecision,
    /// `None` when the scan itself failed.
    pub scan: Option<ChangeScan>,
    /// Facts the decision was derived from; empty when the scan failed.
    pub classification: ChangeClassification,
    /// A build succeeded within the recent-build window (informational only).
    pub recent_build: bool,
}

/// Scan-classify-decide pipeline for one project.
pub struct DecisionEngine<'a> {
    scanner: ChangeScanner<'a>,
    rules: &'a TrackingRules,
    config: &'a DecisionConfig,
    marker: &'a BuildMarker,
    log: &'a ActivityLog,
}

impl<'a> DecisionEngine<'a> {
    /// Engine over `scanner`, applying `config` thresholds.
    pub fn new(
        scanner: ChangeScanner<'a>,
        rules: &'a TrackingRules,
        config: &'a DecisionConfig,
        marker: &'a BuildMarker,
        log: &'a ActivityLog,
    ) -> Self {
        Self {
            scanner,
            rules,
            config,
            marker,
            log,
        }
    }

    /// The decision alone; never fails.
    pub fn determine_build_strategy(&self, root: &Path) -> BuildDecision {
        self.evaluate(root).decision
    }

    /// Run the scan and derive a decision; any scan or store error maps to
    /// `FullBuild` instead of being returned.
    pub fn evaluate(&self, root: &Path) -> Evaluation {
        let scan = match self.scanner.check_changes(root) {
            Ok(scan) => scan,
            Err(error) => return self.conservative(root, &error),
        };
        self.log.record(&scan.log_entry(root));

        let classification = ChangeClassification::from_changes(root, &scan.changes, self.rules);
        let decision = if scan.fallback {
            BuildDecision::FullBuild
        } else {
            decide(&classification, self.config.module_threshold)
        };
        let recent_build = self.recent_build_hint(&decision);

        let mut entry = LogEntry::new(EventType::BuildDecided, Severity::Info).root(root);
        entry.decision = Some(decision.to_string());
        entry.build_type = Some(decision.build_type().to_string());
        entry.changed = Some(scan.changes.len() as u64);
        if recent_build {
            entry.details = Some("build succeeded within recent window".to_string());
        }
        self.log.record(&entry);

        Evaluation {
            decision,
            scan: Some(scan),
            classification,
            recent_build,
        }
    }

    /// Whether the last successful build falls inside the recent window.
    ///
    /// Only reported; it never changes the decision.
    fn recent_build_hint(&self, decision: &BuildDecision) -> bool {
        if !decision.needs_build() {
            return false;
        }
        let window = Duration::from_secs(self.config.recent_build_window_secs);
        self.marker.is_within(window, now_millis())
    }

    fn conservative(&self, root: &Path, error: &FreshError) -> Evaluation {
        eprintln!(
            "[FC-DECISION] change detection failed for {}, falling back to full build: {error}",
            root.display()
        );
        self.log.record(
            &LogEntry::new(EventType::Error, Severity::Warning)
                .root(root)
                .error(error)
                .details("determine_build_strategy"),
        );
        let mut entry = LogEntry::new(EventType::BuildDecided, Severity::Warning).root(root);
        entry.decision = Some(BuildDecision::FullBuild.to_string());
        entry.build_type = Some(BuildDecision::FullBuild.build_type().to_string());
        self.log.record(&entry);

        Evaluation {
            decision: BuildDecision::FullBuild,
            scan: None,
            classification: ChangeClassification::default(),
            recent_build: false,
        }
    }
}
