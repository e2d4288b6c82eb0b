//! FC-prefixed error types with structured error codes.

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Shared `Result` alias for the project.
pub type Result<T> = std::result::Result<T, FreshError>;

/// Top-level error type for freshcheck.
///
/// Codes are grouped by subsystem: `1xxx` configuration, `2xxx` persistence,
/// `3xxx` scanning and building.
#[derive(Debug, Error)]
pub enum FreshError {
    /// A config value failed validation.
    #[error("[FC-1001] invalid configuration: {details}")]
    InvalidConfig {
        /// What was wrong.
        details: String,
    },

    /// An explicitly requested config file does not exist.
    #[error("[FC-1002] missing configuration file: {path}")]
    MissingConfig {
        /// The requested file.
        path: PathBuf,
    },

    /// TOML or an env override could not be parsed.
    #[error("[FC-1003] configuration parse failure in {context}: {details}")]
    ConfigParse {
        /// File or variable being parsed.
        context: &'static str,
        /// Parser message.
        details: String,
    },

    /// The fingerprint database could not be opened or initialized.
    #[error("[FC-2001] fingerprint store cannot be opened at {path}: {details}")]
    StoreInit {
        /// Database file.
        path: PathBuf,
        /// Underlying failure.
        details: String,
    },

    /// The store was used after `close()`.
    #[error("[FC-2002] fingerprint store already closed")]
    StoreClosed,

    /// A persisted value had an unexpected shape.
    #[error("[FC-2101] serialization failure in {context}: {details}")]
    Serialization {
        /// Value being encoded or decoded.
        context: &'static str,
        /// Underlying failure.
        details: String,
    },

    /// A SQLite statement or transaction failed.
    #[error("[FC-2102] SQL failure in {context}: {details}")]
    Sql {
        /// Operation in progress.
        context: &'static str,
        /// SQLite message.
        details: String,
    },

    /// The project tree could not be enumerated reliably.
    #[error("[FC-3001] scan of {root} failed: {details}")]
    ScanFailed {
        /// Project root being scanned.
        root: PathBuf,
        /// Why the listing is unusable.
        details: String,
    },

    /// Filesystem IO on a single path failed.
    #[error("[FC-3002] IO failure at {path}: {source}")]
    Io {
        /// Path being accessed.
        path: PathBuf,
        /// OS error.
        #[source]
        source: std::io::Error,
    },

    /// A worker channel disconnected before all results arrived.
    #[error("[FC-3003] channel closed in component {component}")]
    ChannelClosed {
        /// Component owning the channel.
        component: &'static str,
    },

    /// The external build tool reported failure.
    #[error("[FC-3101] {build_type} build failed: {details}")]
    BuildFailed {
        /// `FULL`, `INCREMENTAL` or `SKIP`.
        build_type: &'static str,
        /// Message from the tool.
        details: String,
    },
}

impl FreshError {
    /// Stable machine-parseable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidConfig { .. } => "FC-1001",
            Self::MissingConfig { .. } => "FC-1002",
            Self::ConfigParse { .. } => "FC-1003",
            Self::StoreInit { .. } => "FC-2001",
            Self::StoreClosed => "FC-2002",
            Self::Serialization { .. } => "FC-2101",
            Self::Sql { .. } => "FC-2102",
            Self::ScanFailed { .. } => "FC-3001",
            Self::Io { .. } => "FC-3002",
            Self::ChannelClosed { .. } => "FC-3003",
            Self::BuildFailed { .. } => "FC-3101",
        }
    }

    /// Whether the error came from walking or hashing the project tree.
    ///
    /// Scan-class errors trigger the conservative "everything modified" fallback;
    /// storage errors are surfaced to the caller instead.
    #[must_use]
    pub const fn is_scan_failure(&self) -> bool {
        matches!(
            self,
            Self::ScanFailed { .. } | Self::Io { .. } | Self::ChannelClosed { .. }
        )
    }

    /// Convenience constructor for IO errors with a known path.
    #[must_use]
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// Convenience constructor for systemic scan failures.
    #[must_use]
    pub fn scan_failed(root: impl AsRef<Path>, details: impl Into<String>) -> Self {
        Self::ScanFailed {
            root: root.as_ref().to_path_buf(),
            details: details.into(),
        }
    }
}

impl From<rusqlite::Error> for FreshError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sql {
            context: "rusqlite",
            details: value.to_string(),
        }
    }
}

impl From<serde_json::Error> for FreshError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization {
            context: "serde_json",
            details: value.to_string(),
        }
    }
}

impl From<toml::de::Error> for FreshError {
    fn from(value: toml::de::Error) -> Self {
        Self::ConfigParse {
            context: "toml",
            details: value.to_string(),
        }
    }
}
