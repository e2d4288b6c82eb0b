//! Last-successful-build marker: one small file holding epoch milliseconds.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::core::errors::{FreshError, Result};

/// File-backed record of when the last build succeeded.
#[derive(Debug, Clone)]
pub struct BuildMarker {
    path: PathBuf,
}

impl BuildMarker {
    /// Marker stored at `path`; nothing is touched until the first write.
    #[must_use]
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Location of the marker file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the recorded timestamp; `None` if no build has been recorded yet.
    pub fn read(&self) -> Result<Option<u64>> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(error) if error.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(error) => return Err(FreshError::io(&self.path, error)),
        };
        let millis = raw
            .trim()
            .parse::<u64>()
            .map_err(|error| FreshError::Serialization {
                context: "last_build_marker",
                details: format!("{}: {error}", self.path.display()),
            })?;
        Ok(Some(millis))
    }

    /// Record a timestamp using temp-file + rename for crash safety.
    pub fn write(&self, millis: u64) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|error| FreshError::io(parent, error))?;
        }
        let tmp_path = self.path.with_extension("tmp");
        fs::write(&tmp_path, millis.to_string()).map_err(|e| FreshError::io(&tmp_path, e))?;
        fs::rename(&tmp_path, &self.path).map_err(|e| FreshError::io(&self.path, e))?;
        Ok(())
    }

    /// Whether the recorded build falls inside `window` before `now_millis`.
    ///
    /// A missing or unreadable marker counts as "not recent".
    pub fn is_within(&self, window: Duration, now_millis: u64) -> bool {
        match self.read() {
            Ok(Some(last)) => is_recent(last, now_millis, window),
            _ => false,
        }
    }
}

fn is_recent(last_millis: u64, now_millis: u64, window: Duration) -> bool {
    let window_millis = u64::try_from(window.as_millis()).unwrap_or(u64::MAX);
    now_millis.saturating_sub(last_millis) <= window_millis
}
