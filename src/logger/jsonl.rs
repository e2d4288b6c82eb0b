//! JSONL activity log: append-only line-delimited JSON under the project cache dir.
//!
//! Each line is a self-contained JSON object assembled in memory and written with
//! a single `write_all`, so a tailing reader never sees a partial line.
//!
//! Degradation chain:
//! 1. Activity log file (rotated by size)
//! 2. stderr with `[FC-JSONL]` prefix
//! 3. Silent discard (logging never fails a scan or a build)

use std::fs::{self, File, OpenOptions, rename};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::core::config::LoggingConfig;
use crate::core::errors::{FreshError, Result};

/// Severity level for log events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Routine progress.
    Info,
    /// Degraded but continuing (fallback scan, failed build).
    Warning,
    /// State could not be persisted.
    Critical,
}

/// Activity event types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// Orchestrator opened the fingerprint store.
    StoreOpen,
    /// Orchestrator closed the fingerprint store.
    StoreClose,
    /// Two-phase scan finished.
    ScanComplete,
    /// Scan degraded to "everything modified".
    ScanFallback,
    /// A build strategy was chosen.
    BuildDecided,
    /// The build tool finished, successfully or not.
    BuildComplete,
    /// Fingerprints and the build marker were written.
    CacheCommit,
    /// A failure not covered by the events above.
    Error,
}

/// A single JSONL log entry; only `ts`, `event` and `severity` are always present.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    /// RFC 3339 UTC timestamp.
    pub ts: String,
    /// What happened.
    pub event: EventType,
    /// How bad it is.
    pub severity: Severity,
    /// Project root the event concerns.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root: Option<String>,
    /// Files enumerated or committed, depending on the event.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub files: Option<u64>,
    /// Phase 2 candidates.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub candidates: Option<u64>,
    /// Confirmed changes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub changed: Option<u64>,
    /// Decision in its display form, e.g. `incremental_build[A,B]`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decision: Option<String>,
    /// `FULL`, `INCREMENTAL` or `SKIP`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub build_type: Option<String>,
    /// Elapsed wall time of the operation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    /// Outcome of a build or commit.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ok: Option<bool>,
    /// `FC-xxxx` code of the error, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    /// Display form of the error.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Free-form context.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl LogEntry {
    /// Create a new entry stamped with the current UTC time.
    pub fn new(event: EventType, severity: Severity) -> Self {
        Self {
            ts: format_utc_now(),
            event,
            severity,
            root: None,
            files: None,
            candidates: None,
            changed: None,
            decision: None,
            build_type: None,
            duration_ms: None,
            ok: None,
            error_code: None,
            error_message: None,
            details: None,
        }
    }

    /// Attach the project root.
    #[must_use]
    pub fn root(mut self, root: &Path) -> Self {
        self.root = Some(root.display().to_string());
        self
    }

    /// Attach free-form context.
    #[must_use]
    pub fn details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    /// Attach the stable code and message of `error`.
    #[must_use]
    pub fn error(mut self, error: &FreshError) -> Self {
        self.error_code = Some(error.code().to_string());
        self.error_message = Some(error.to_string());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriterState {
    Normal,
    Stderr,
    Discard,
}

/// Configuration for the JSONL writer.
#[derive(Debug, Clone)]
pub struct JsonlConfig {
    /// Active log file; rotations get `.1`, `.2`, .. suffixes.
    pub path: PathBuf,
    /// Maximum file size before rotation (bytes).
    pub max_size_bytes: u64,
    /// Number of rotated files to keep.
    pub max_rotated_files: u32,
}

impl JsonlConfig {
    /// Writer settings from the `[logging]` section.
    pub fn from_logging(path: PathBuf, logging: &LoggingConfig) -> Self {
        Self {
            path,
            max_size_bytes: logging.max_size_bytes,
            max_rotated_files: logging.max_rotated_files,
        }
    }
}

/// Append-only JSONL writer with rotation and a stderr fallback.
pub struct JsonlWriter {
    config: JsonlConfig,
    writer: Option<BufWriter<File>>,
    state: WriterState,
    bytes_written: u64,
}

impl JsonlWriter {
    /// Open the log file, falling through the degradation chain on failure.
    pub fn open(config: JsonlConfig) -> Self {
        let mut w = Self {
            config,
            writer: None,
            state: WriterState::Discard,
            bytes_written: 0,
        };
        w.try_open_primary();
        w
    }

    /// Write a single log entry as one JSONL line.
    pub fn write_entry(&mut self, entry: &LogEntry) {
        let line = match serde_json::to_string(entry) {
            Ok(json) => format!("{json}\n"),
            Err(e) => {
                let _ = writeln!(io::stderr(), "[FC-JSONL] serialize error: {e}");
                return;
            }
        };
        self.write_line(&line);
    }

    /// Flush buffered lines to the file.
    pub fn flush(&mut self) {
        if let Some(w) = self.writer.as_mut() {
            let _ = w.flush();
        }
    }

    /// Current degradation state.
    pub fn state(&self) -> &str {
        match self.state {
            WriterState::Normal => "normal",
            WriterState::Stderr => "stderr",
            WriterState::Discard => "discard",
        }
    }

    fn write_line(&mut self, line: &str) {
        if self.state == WriterState::Normal
            && self.bytes_written + line.len() as u64 > self.config.max_size_bytes
        {
            self.rotate();
        }

        match self.state {
            WriterState::Normal => {
                if let Some(w) = self.writer.as_mut() {
                    if w.write_all(line.as_bytes()).is_err() {
                        self.degrade();
                        self.write_line(line);
                        return;
                    }
                    self.bytes_written += line.len() as u64;
                } else {
                    self.degrade();
                    self.write_line(line);
                }
            }
            WriterState::Stderr => {
                let _ = write!(io::stderr(), "[FC-JSONL] {line}");
            }
            WriterState::Discard => {}
        }
    }

    fn try_open_primary(&mut self) {
        match open_append(&self.config.path) {
            Ok((file, size)) => {
                self.writer = Some(BufWriter::with_capacity(16 * 1024, file));
                self.state = WriterState::Normal;
                self.bytes_written = size;
            }
            Err(error) => {
                self.state = WriterState::Stderr;
                let _ = writeln!(
                    io::stderr(),
                    "[FC-JSONL] cannot open activity log, using stderr: {error}"
                );
            }
        }
    }

    fn degrade(&mut self) {
        self.writer = None;
        self.state = match self.state {
            WriterState::Normal => {
                let _ = writeln!(io::stderr(), "[FC-JSONL] write failed, using stderr");
                WriterState::Stderr
            }
            WriterState::Stderr | WriterState::Discard => WriterState::Discard,
        };
    }

    fn rotate(&mut self) {
        if let Some(w) = self.writer.as_mut() {
            let _ = w.flush();
        }
        self.writer = None;
        let base = self.config.path.clone();

        // Shift rotations: .N-1 → .N, …, .1 → .2, current → .1
        for i in (1..self.config.max_rotated_files).rev() {
            let _ = rename(rotated_name(&base, i), rotated_name(&base, i + 1));
        }
        if self.config.max_rotated_files == 0 {
            let _ = fs::remove_file(&base);
        } else {
            let _ = rename(&base, rotated_name(&base, 1));
        }

        match open_append(&base) {
            Ok((file, _)) => {
                self.writer = Some(BufWriter::with_capacity(16 * 1024, file));
                self.bytes_written = 0;
            }
            Err(_) => self.degrade(),
        }
    }
}

impl Drop for JsonlWriter {
    fn drop(&mut self) {
        self.flush();
    }
}

/// Shared handle over a `JsonlWriter`; a disabled log drops every entry.
pub struct ActivityLog {
    inner: Option<Mutex<JsonlWriter>>,
}

impl ActivityLog {
    /// Log backed by a writer at `config.path`.
    pub fn open(config: JsonlConfig) -> Self {
        Self {
            inner: Some(Mutex::new(JsonlWriter::open(config))),
        }
    }

    /// Log that drops every entry.
    pub fn disabled() -> Self {
        Self { inner: None }
    }

    /// Open at `path` when `logging.enabled`, otherwise a disabled log.
    pub fn from_logging(path: PathBuf, logging: &LoggingConfig) -> Self {
        if logging.enabled {
            Self::open(JsonlConfig::from_logging(path, logging))
        } else {
            Self::disabled()
        }
    }

    /// Whether entries are written anywhere.
    pub fn is_enabled(&self) -> bool {
        self.inner.is_some()
    }

    /// Append and flush one entry.
    pub fn record(&self, entry: &LogEntry) {
        if let Some(writer) = &self.inner {
            let mut writer = writer.lock();
            writer.write_entry(entry);
            writer.flush();
        }
    }
}

impl std::fmt::Debug for ActivityLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self
            .inner
            .as_ref()
            .map_or_else(|| "disabled".to_string(), |w| w.lock().state().to_string());
        f.debug_struct("ActivityLog").field("state", &state).finish()
    }
}

/// Open or create a file for appending. Returns `(File, current_size)`.
fn open_append(path: &Path) -> Result<(File, u64)> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|source| FreshError::io(parent, source))?;
    }
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|source| FreshError::io(path, source))?;
    let size = file.metadata().map(|m| m.len()).unwrap_or(0);
    Ok((file, size))
}

/// `activity.jsonl` → `activity.jsonl.3`.
fn rotated_name(base: &Path, index: u32) -> PathBuf {
    let mut name = base.as_os_str().to_owned();
    name.push(format!(".{index}"));
    PathBuf::from(name)
}

fn format_utc_now() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}
