#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use filetime::FileTime;
use parking_lot::Mutex;
use tempfile::TempDir;

use freshcheck::core::config::Config;
use freshcheck::executor::{BuildPlan, BuildTool};
use freshcheck::orchestrator::BuildOrchestrator;

/// Throwaway project tree with helpers for mutating files.
pub struct Project {
    dir: TempDir,
}

impl Project {
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().expect("create project tempdir"),
        }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn path(&self, rel: &str) -> PathBuf {
        self.root().join(rel)
    }

    pub fn write(&self, rel: &str, body: &str) -> PathBuf {
        let path = self.path(rel);
        fs::create_dir_all(path.parent().expect("parent")).expect("create parent dirs");
        fs::write(&path, body).expect("write project file");
        path
    }

    /// Rewrite a file and push its mtime forward so the change is visible
    /// regardless of filesystem timestamp granularity.
    pub fn modify(&self, rel: &str, body: &str) -> PathBuf {
        let path = self.write(rel, body);
        bump_mtime(&path, 5);
        path
    }

    /// Move a file's mtime forward without touching its bytes.
    pub fn touch(&self, rel: &str) -> PathBuf {
        let path = self.path(rel);
        bump_mtime(&path, 5);
        path
    }

    pub fn open(&self) -> BuildOrchestrator {
        BuildOrchestrator::open(self.root(), test_config()).expect("open orchestrator")
    }
}

pub fn test_config() -> Config {
    let mut config = Config::default();
    config.hashing.workers = 2;
    config.hashing.chunk_size = 4;
    config
}

pub fn bump_mtime(path: &Path, secs: i64) {
    let meta = fs::metadata(path).expect("stat file");
    let mtime = FileTime::from_last_modification_time(&meta);
    let later = FileTime::from_unix_time(mtime.unix_seconds() + secs, mtime.nanoseconds());
    filetime::set_file_mtime(path, later).expect("set mtime");
}

/// Build tool double that records every plan it is asked to run.
#[derive(Default)]
pub struct RecordingTool {
    calls: Mutex<Vec<BuildPlan>>,
    pub fail_incremental: bool,
    pub fail_full: bool,
}

impl RecordingTool {
    pub fn ok() -> Self {
        Self::default()
    }

    pub fn failing_full() -> Self {
        Self {
            fail_full: true,
            ..Self::default()
        }
    }

    pub fn failing_incremental() -> Self {
        Self {
            fail_incremental: true,
            ..Self::default()
        }
    }

    pub fn calls(&self) -> Vec<BuildPlan> {
        self.calls.lock().clone()
    }
}

impl BuildTool for RecordingTool {
    fn run(&self, plan: &BuildPlan) -> Result<(), String> {
        self.calls.lock().push(plan.clone());
        match plan {
            BuildPlan::Full if self.fail_full => Err("compiler exited with status 1".to_string()),
            BuildPlan::Incremental(_) if self.fail_incremental => {
                Err("incremental load rejected".to_string())
            }
            _ => Ok(()),
        }
    }
}
