//! Convenience re-exports for library consumers.
//!
//! ```rust,no_run
//! use freshcheck::prelude::*;
//! ```

// Core
pub use crate::core::config::Config;
pub use crate::core::errors::{FreshError, Result};

// Cache
pub use crate::cache::marker::BuildMarker;
pub use crate::cache::store::{FileFingerprint, FingerprintStore};

// Scanner
pub use crate::scanner::changes::{ChangeMap, ChangeScan, ChangeScanner, ChangeType, ScanStats};
pub use crate::scanner::hasher::HashPool;
pub use crate::scanner::rules::{FileRole, TrackingRules};

// Decision
pub use crate::decision::engine::{DecisionEngine, Evaluation};
pub use crate::decision::strategy::{BuildDecision, BuildType, ChangeClassification, decide};

// Executor
pub use crate::executor::runner::BuildExecutor;
pub use crate::executor::updater::{CacheUpdater, CommitSummary};
pub use crate::executor::{BuildPlan, BuildResult, BuildTool};

// Orchestration
pub use crate::orchestrator::BuildOrchestrator;
