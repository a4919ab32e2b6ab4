use std::path::{Path, PathBuf};
use std::time::Duration;
use serde::{Deserialize, Serialize};
use crate::error::{GovmError, IoResultExt, Result};

/// Default location of the Go release catalog and archives.
pub const DEFAULT_BASE_URL: &str = "https://go.dev/dl/";

/// Represents the contents of `<root>/config.toml`.
///
/// Every field is optional in the file; missing values fall back to defaults.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Default)]
#[serde(default)]
pub struct GovmConfig {
    pub install: InstallConfig,
    pub prune: PruneConfig,
}

/// Settings for `govm install` and `govm uninstall`.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct InstallConfig {
    /// How long to wait for another process holding a version lock.
    pub lock_timeout_secs: u64,
    /// Extra attempts after a transient network failure.
    pub download_retries: u32,
    /// Where the catalog (`?mode=json`) and archives are fetched from.
    pub base_url: String,
    pub request_timeout_secs: u64,
}

/// Settings for `govm prune`.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct PruneConfig {
    /// Number of most recent versions always kept.
    pub keep: usize,
    /// Directories scanned for `.go-version` files; referenced versions are never pruned.
    pub search_roots: Vec<PathBuf>,
}

impl Default for InstallConfig {
    fn default() -> Self {
        Self {
            lock_timeout_secs: 60,
            download_retries: 3,
            base_url: DEFAULT_BASE_URL.to_string(),
            request_timeout_secs: 300,
        }
    }
}

impl Default for PruneConfig {
    fn default() -> Self {
        Self {
            keep: 3,
            search_roots: Vec::new(),
        }
    }
}

impl InstallConfig {
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_secs(self.lock_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl GovmConfig {
    /// Loads the configuration from a file path.
    ///
    /// A missing file yields the defaults; a file that does not parse is a
    /// configuration error naming the file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<GovmConfig> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(GovmConfig::default());
        }
        let content = std::fs::read_to_string(path).at(path)?;
        toml::from_str(&content)
            .map_err(|e| GovmError::config(path.display().to_string(), e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempdir().unwrap();
        let config = GovmConfig::load(dir.path().join("config.toml")).unwrap();
        assert_eq!(config, GovmConfig::default());
        assert_eq!(config.install.base_url, DEFAULT_BASE_URL);
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[install]\nlock_timeout_secs = 5\n\n[prune]\nsearch_roots = [\"/src\"]\n").unwrap();

        let config = GovmConfig::load(&path).unwrap();
        assert_eq!(config.install.lock_timeout(), Duration::from_secs(5));
        assert_eq!(config.install.download_retries, 3);
        assert_eq!(config.prune.keep, 3);
        assert_eq!(config.prune.search_roots, vec![PathBuf::from("/src")]);
    }

    #[test]
    fn test_malformed_file_is_configuration_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[install\nlock_timeout_secs = ").unwrap();

        let err = GovmConfig::load(&path).unwrap_err();
        assert!(matches!(err, GovmError::Configuration { .. }));
    }
}
