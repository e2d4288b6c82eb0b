//! Tracking rules: which files are fingerprinted and what role a changed file plays.

use std::collections::HashSet;
use std::path::Path;

use regex::Regex;

use crate::core::config::TrackingConfig;
use crate::core::errors::{FreshError, Result};

/// Role of a changed file for the build decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileRole {
    /// Configuration manifest; any change forces a full build.
    Config,
    /// Test source; test-only change sets skip the platform build.
    Test,
    /// Compiled/packaged platform source; any change forces a full build.
    Core,
    /// Tracked but neither of the above (forms, layouts, data files).
    Other,
}

/// Compiled form of `TrackingConfig`.
#[derive(Debug, Clone)]
pub struct TrackingRules {
    tracked: HashSet<String>,
    core: HashSet<String>,
    manifests: Vec<String>,
    ignored: HashSet<String>,
    test_pattern: Regex,
}

impl TrackingRules {
    /// Compile the config; an invalid test pattern is `FC-1001`.
    pub fn from_config(config: &TrackingConfig) -> Result<Self> {
        let test_pattern =
            Regex::new(&config.test_name_pattern).map_err(|error| FreshError::InvalidConfig {
                details: format!("tracking.test_name_pattern: {error}"),
            })?;
        Ok(Self {
            tracked: normalize_extensions(&config.tracked_extensions),
            core: normalize_extensions(&config.core_extensions),
            manifests: config
                .config_manifest_names
                .iter()
                .map(|name| name.to_lowercase())
                .filter(|name| !name.is_empty())
                .collect(),
            ignored: config
                .ignored_paths
                .iter()
                .map(|name| name.to_lowercase())
                .collect(),
            test_pattern,
        })
    }

    /// Whether the file's extension is in the tracked set.
    pub fn is_tracked(&self, path: &Path) -> bool {
        extension_of(path).is_some_and(|ext| self.tracked.contains(&ext))
    }

    /// Whether a single directory name is on the ignore list.
    pub fn is_ignored_name(&self, name: &str) -> bool {
        self.ignored.contains(&name.to_lowercase())
    }

    /// Compiled or packaged platform source.
    pub fn is_core(&self, path: &Path) -> bool {
        extension_of(path).is_some_and(|ext| self.core.contains(&ext))
    }

    /// File name contains one of the manifest names.
    pub fn is_config_manifest(&self, path: &Path) -> bool {
        let Some(name) = path.file_name() else {
            return false;
        };
        let name = name.to_string_lossy().to_lowercase();
        self.manifests.iter().any(|m| name.contains(m.as_str()))
    }

    /// File name matches the test pattern.
    pub fn is_test(&self, path: &Path) -> bool {
        path.file_name()
            .is_some_and(|name| self.test_pattern.is_match(&name.to_string_lossy()))
    }

    /// Manifest first, then test name, then core extension.
    pub fn classify(&self, path: &Path) -> FileRole {
        if self.is_config_manifest(path) {
            FileRole::Config
        } else if self.is_test(path) {
            FileRole::Test
        } else if self.is_core(path) {
            FileRole::Core
        } else {
            FileRole::Other
        }
    }
}

/// Lowercase extension, or the whole name for dot-less files such as `packagedef`.
fn extension_of(path: &Path) -> Option<String> {
    match path.extension() {
        Some(ext) => Some(ext.to_string_lossy().to_lowercase()),
        None => path
            .file_name()
            .map(|name| name.to_string_lossy().to_lowercase()),
    }
}

fn normalize_extensions(values: &[String]) -> HashSet<String> {
    values
        .iter()
        .map(|ext| ext.trim().trim_start_matches('.').to_lowercase())
        .filter(|ext| !ext.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rules() -> TrackingRules {
        TrackingRules::from_config(&TrackingConfig::default()).unwrap()
    }

    #[test]
    fn tracked_extensions_are_case_insensitive() {
        let r = rules();
        assert!(r.is_tracked(Path::new("/p/A/Module.BSL")));
        assert!(r.is_tracked(Path::new("/p/B/config.xml")));
        assert!(!r.is_tracked(Path::new("/p/README.md")));
        assert!(!r.is_tracked(Path::new("/p/noext")));
    }

    #[test]
    fn dotless_packagedef_is_tracked_by_name() {
        let r = rules();
        assert!(r.is_tracked(Path::new("/p/packagedef")));
        assert_eq!(r.classify(Path::new("/p/packagedef")), FileRole::Config);
    }

    #[test]
    fn ignored_names_match_whole_components_case_insensitively() {
        let r = rules();
        assert!(r.is_ignored_name(".git"));
        assert!(r.is_ignored_name("build"));
        assert!(r.is_ignored_name("Temp"));
        assert!(!r.is_ignored_name("Builders"));
    }

    #[test]
    fn classification_precedence() {
        let r = rules();
        assert_eq!(r.classify(Path::new("/p/A/mod.bsl")), FileRole::Core);
        assert_eq!(r.classify(Path::new("/p/A/modTest.bsl")), FileRole::Test);
        assert_eq!(r.classify(Path::new("/p/B/config.xml")), FileRole::Config);
        assert_eq!(
            r.classify(Path::new("/p/src/Configuration.xml")),
            FileRole::Config
        );
        assert_eq!(r.classify(Path::new("/p/A/Form.xml")), FileRole::Other);
        // A manifest that happens to contain "test" is still a manifest.
        assert_eq!(
            r.classify(Path::new("/p/test_config.xml")),
            FileRole::Config
        );
    }

    #[test]
    fn test_pattern_matches_cyrillic_keyword() {
        let r = rules();
        assert!(r.is_test(Path::new("/p/A/ТестыОбщегоМодуля.bsl")));
        assert!(r.is_test(Path::new("/p/A/модультеста.os")));
        assert!(r.is_test(Path::new("/p/A/SmokeTEST.bsl")));
        assert!(!r.is_test(Path::new("/p/A/Обработка.bsl")));
    }

    #[test]
    fn invalid_pattern_is_config_error() {
        let config = TrackingConfig {
            test_name_pattern: "[".to_string(),
            ..TrackingConfig::default()
        };
        let err = TrackingRules::from_config(&config).unwrap_err();
        assert_eq!(err.code(), "FC-1001");
    }
}
