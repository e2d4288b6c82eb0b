#![forbid(unsafe_code)]

//! freshcheck: change-detection cache and build-decision engine for compiled
//! application platforms.
//!
//! Before a test run, freshcheck answers "are the platform artifacts stale?":
//! 1. **Fingerprint store** keeps a durable `(content hash, mtime)` per tracked file
//! 2. **Change scanner** finds changed files with a cheap mtime pass, then confirms by hash
//! 3. **Decision engine** turns the change set into a full, incremental, tests-only or no build
//! 4. **Executor** runs the external build tool and commits fingerprints only on success
//!
//! # Library usage
//!
//! ```rust,no_run
//! use freshcheck::prelude::*;
//!
//! # fn main() -> freshcheck::core::errors::Result<()> {
//! let root = std::path::Path::new("/work/project");
//! let orchestrator = BuildOrchestrator::open_project(root)?;
//! match orchestrator.determine_build_strategy(root)? {
//!     BuildDecision::NoBuildNeeded => {}
//!     decision => println!("build needed: {decision}"),
//! }
//! orchestrator.close()?;
//! # Ok(())
//! # }
//! ```

pub mod prelude;

pub mod cache;
pub mod core;
pub mod decision;
pub mod executor;
pub mod logger;
pub mod orchestrator;
pub mod scanner;
