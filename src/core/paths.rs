//! Shared path manipulation utilities.

use std::env;
use std::fs::Metadata;
use std::path::{Component, Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

/// Resolve a path to an absolute, normalized path.
///
/// If `fs::canonicalize` succeeds (path exists), it is used to resolve symlinks
/// and normalize components.
///
/// If it fails (e.g. path does not exist), the path is made absolute relative
/// to CWD and `..`/`.` components are resolved syntactically.
pub fn resolve_absolute_path(path: &Path) -> PathBuf {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        env::current_dir().map_or_else(|_| path.to_path_buf(), |cwd| cwd.join(path))
    };

    if let Ok(canonical) = std::fs::canonicalize(&absolute) {
        return canonical;
    }

    normalize_syntactic(&absolute)
}

fn normalize_syntactic(path: &Path) -> PathBuf {
    let mut components = Vec::new();
    for component in path.components() {
        match component {
            Component::Prefix(..) | Component::RootDir | Component::Normal(_) => {
                components.push(component);
            }
            Component::CurDir => {}
            Component::ParentDir => {
                if let Some(Component::Normal(_)) = components.last() {
                    components.pop();
                }
            }
        }
    }
    components.into_iter().collect()
}

/// Storage key for a tracked file.
///
/// Absolute, `/`-separated, and lowercased on platforms whose filesystems are
/// case-insensitive by default so the same file never maps to two keys.
pub fn normalize_key(path: &Path) -> String {
    let resolved = resolve_absolute_path(path);
    let key = resolved.to_string_lossy().replace('\\', "/");
    if cfg!(any(windows, target_os = "macos")) {
        key.to_lowercase()
    } else {
        key
    }
}

/// Path of `path` relative to `root`, if it lives under it.
///
/// Falls back to comparing resolved paths so a relative or symlinked root still
/// matches the absolute paths produced by the walker.
pub fn relative_to(root: &Path, path: &Path) -> Option<PathBuf> {
    if let Ok(rel) = path.strip_prefix(root) {
        return Some(rel.to_path_buf());
    }
    let root = resolve_absolute_path(root);
    let path = resolve_absolute_path(path);
    path.strip_prefix(&root).ok().map(Path::to_path_buf)
}

/// Module identifier: the first path segment under the project root.
pub fn module_of(root: &Path, path: &Path) -> Option<String> {
    let rel = relative_to(root, path)?;
    rel.components().find_map(|c| match c {
        Component::Normal(name) => Some(name.to_string_lossy().into_owned()),
        _ => None,
    })
}

/// Modification time in epoch milliseconds (0 when unavailable).
pub fn modified_millis(meta: &Metadata) -> u64 {
    meta.modified().map_or(0, system_time_millis)
}

/// Convert a `SystemTime` to epoch milliseconds, saturating.
pub fn system_time_millis(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
}

/// Current wall-clock time in epoch milliseconds.
pub fn now_millis() -> u64 {
    system_time_millis(SystemTime::now())
}
