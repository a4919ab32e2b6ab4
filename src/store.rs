use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use anyhow::anyhow;
use directories::BaseDirs;
use tracing::debug;
use crate::error::{GovmError, IoResultExt, Result};
use crate::version::{sort_versions, Version};

/// Environment variable overriding the store root.
pub const ROOT_ENV: &str = "GOVM_ROOT";
/// Name of the global default file under the store root.
pub const GLOBAL_VERSION_FILE: &str = "version";
/// Name of the per-directory marker file.
pub const LOCAL_VERSION_FILE: &str = ".go-version";
/// Commands shipped with every Go release that get a shim.
pub const GO_BINARIES: &[&str] = &["go", "gofmt"];

pub(crate) const INSTALL_SCRATCH_PREFIX: &str = ".install-";
pub(crate) const REMOVE_SCRATCH_PREFIX: &str = ".remove-";

/// The on-disk root holding installed versions and their markers.
///
/// ```text
/// <root>/
///   version                  global default
///   config.toml
///   versions/<version>/      one extracted toolchain per version
///   versions/.install-<v>/   scratch of an in-flight install
///   versions/.remove-<v>/    a version being deleted
///   locks/<version>.lock
///   shims/go, shims/gofmt
/// ```
///
/// Nothing here is cached: every query reads the filesystem again, since
/// other processes install and remove versions concurrently.
#[derive(Debug, Clone)]
pub struct VersionStore {
    root: PathBuf,
}

impl VersionStore {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    /// Builds the store from `GOVM_ROOT`, falling back to `~/.govm`.
    pub fn from_env() -> anyhow::Result<Self> {
        if let Some(root) = std::env::var_os(ROOT_ENV).filter(|r| !r.is_empty()) {
            return Ok(Self::new(root));
        }
        let dirs = BaseDirs::new().ok_or_else(|| anyhow!("Could not find home directory"))?;
        Ok(Self::new(dirs.home_dir().join(".govm")))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn versions_dir(&self) -> PathBuf {
        self.root.join("versions")
    }

    pub fn shims_dir(&self) -> PathBuf {
        self.root.join("shims")
    }

    pub fn locks_dir(&self) -> PathBuf {
        self.root.join("locks")
    }

    pub fn global_version_file(&self) -> PathBuf {
        self.root.join(GLOBAL_VERSION_FILE)
    }

    pub fn config_file(&self) -> PathBuf {
        self.root.join("config.toml")
    }

    /// Creates `versions/`, `shims/` and `locks/` if they don't already exist.
    pub fn ensure_dirs(&self) -> Result<()> {
        for dir in [self.versions_dir(), self.shims_dir(), self.locks_dir()] {
            fs::create_dir_all(&dir).at(&dir)?;
        }
        Ok(())
    }

    /// Lazily enumerates installed versions.
    ///
    /// A missing store yields nothing. Scratch entries and directories whose
    /// name is not a version are skipped.
    pub fn iter(&self) -> impl Iterator<Item = Version> + use<> {
        fs::read_dir(self.versions_dir())
            .ok()
            .into_iter()
            .flatten()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().map(|t| t.is_dir()).unwrap_or(false))
            .filter_map(|entry| {
                let name = entry.file_name().to_str()?.to_string();
                if name.starts_with('.') {
                    return None;
                }
                match Version::parse(&name) {
                    Ok(version) => Some(version),
                    Err(_) => {
                        debug!(entry = %name, "skipping non-version directory in store");
                        None
                    }
                }
            })
    }

    /// Returns installed versions, newest first.
    pub fn list(&self) -> Vec<Version> {
        let mut versions: Vec<Version> = self.iter().collect();
        sort_versions(&mut versions);
        versions
    }

    /// Root directory of a version, whether or not it is installed.
    pub fn path_of(&self, version: &Version) -> PathBuf {
        self.versions_dir().join(version.as_str())
    }

    pub fn is_installed(&self, version: &Version) -> bool {
        self.path_of(version).is_dir()
    }

    /// Path of a toolchain command inside a version, e.g. `versions/1.22.0/bin/go`.
    pub fn binary_path(&self, version: &Version, command: &str) -> PathBuf {
        self.path_of(version).join("bin").join(command)
    }

    /// When the version was published into the store.
    pub fn installed_at(&self, version: &Version) -> Option<SystemTime> {
        fs::metadata(self.path_of(version)).and_then(|m| m.modified()).ok()
    }

    pub(crate) fn install_scratch_dir(&self, version: &Version) -> PathBuf {
        self.versions_dir()
            .join(format!("{}{}", INSTALL_SCRATCH_PREFIX, version))
    }

    pub(crate) fn remove_scratch_dir(&self, version: &Version) -> PathBuf {
        self.versions_dir()
            .join(format!("{}{}", REMOVE_SCRATCH_PREFIX, version))
    }

    pub fn lock_path(&self, version: &Version) -> PathBuf {
        self.locks_dir().join(format!("{}.lock", version))
    }

    /// Scratch directories left by installer operations, with their version.
    pub(crate) fn scratch_entries(&self) -> Vec<(PathBuf, Version)> {
        let Ok(entries) = fs::read_dir(self.versions_dir()) else {
            return Vec::new();
        };
        entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| {
                let name = entry.file_name().to_str()?.to_string();
                let version = name
                    .strip_prefix(INSTALL_SCRATCH_PREFIX)
                    .or_else(|| name.strip_prefix(REMOVE_SCRATCH_PREFIX))?;
                let version = Version::parse(version).ok()?;
                Some((entry.path(), version))
            })
            .collect()
    }

    /// Reads the global default.
    ///
    /// An absent or blank file means no default; content that is not a
    /// version is a configuration error naming the file.
    pub fn global_version(&self) -> Result<Option<Version>> {
        read_version_file(&self.global_version_file())
    }

    pub fn set_global_version(&self, version: &Version) -> Result<()> {
        fs::create_dir_all(&self.root).at(&self.root)?;
        write_version_file(&self.global_version_file(), version)
    }

    pub fn clear_global_version(&self) -> Result<()> {
        let path = self.global_version_file();
        match fs::remove_file(&path) {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e).at(path),
            _ => Ok(()),
        }
    }
}

/// Reads a marker file holding one version string.
///
/// Returns `Ok(None)` when the file is absent or contains only whitespace.
pub fn read_version_file(path: &Path) -> Result<Option<Version>> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e).at(path),
    };
    let content = content.trim();
    if content.is_empty() {
        return Ok(None);
    }
    Version::parse(content)
        .map(Some)
        .map_err(|_| GovmError::config(path.display().to_string(), format!("malformed version '{}'", content)))
}

/// Writes a marker file through a sibling temp file and a rename, so readers
/// never see a truncated marker.
pub fn write_version_file(path: &Path, version: &Version) -> Result<()> {
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(GLOBAL_VERSION_FILE);
    let tmp = path.with_file_name(format!(".{}.tmp-{}", file_name, std::process::id()));
    fs::write(&tmp, format!("{}\n", version)).at(&tmp)?;
    fs::rename(&tmp, path).at(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn v(s: &str) -> Version {
        Version::parse(s).unwrap()
    }

    #[test]
    fn test_missing_root_lists_nothing() {
        let dir = tempdir().unwrap();
        let store = VersionStore::new(dir.path().join("does-not-exist"));
        assert!(store.list().is_empty());
        assert!(!store.is_installed(&v("1.22.0")));
    }

    #[test]
    fn test_list_skips_scratch_and_junk() {
        let dir = tempdir().unwrap();
        let store = VersionStore::new(dir.path());
        store.ensure_dirs().unwrap();
        for name in ["1.21.0", "1.22.0", ".install-1.23.0", ".remove-1.20.0", "notes"] {
            fs::create_dir_all(store.versions_dir().join(name)).unwrap();
        }
        fs::write(store.versions_dir().join("1.19.0"), "a file, not a dir").unwrap();

        let names: Vec<String> = store.list().iter().map(|v| v.to_string()).collect();
        assert_eq!(names, vec!["1.22.0", "1.21.0"]);
        assert!(store.is_installed(&v("1.21.0")));
        assert!(!store.is_installed(&v("1.23.0")));
    }

    #[test]
    fn test_list_is_not_cached() {
        let dir = tempdir().unwrap();
        let store = VersionStore::new(dir.path());
        store.ensure_dirs().unwrap();
        assert!(store.list().is_empty());
        fs::create_dir_all(store.path_of(&v("1.22.0"))).unwrap();
        assert_eq!(store.list(), vec![v("1.22.0")]);
    }

    #[test]
    fn test_paths() {
        let store = VersionStore::new("/opt/govm");
        assert_eq!(store.path_of(&v("go1.22.0")), PathBuf::from("/opt/govm/versions/1.22.0"));
        assert_eq!(
            store.binary_path(&v("1.22.0"), "gofmt"),
            PathBuf::from("/opt/govm/versions/1.22.0/bin/gofmt")
        );
        assert_eq!(store.lock_path(&v("1.22.0")), PathBuf::from("/opt/govm/locks/1.22.0.lock"));
    }

    #[test]
    fn test_global_version_roundtrip_and_clear() {
        let dir = tempdir().unwrap();
        let store = VersionStore::new(dir.path());
        assert_eq!(store.global_version().unwrap(), None);

        store.set_global_version(&v("1.22.0")).unwrap();
        assert_eq!(fs::read_to_string(store.global_version_file()).unwrap(), "1.22.0\n");
        assert_eq!(store.global_version().unwrap(), Some(v("1.22.0")));

        store.clear_global_version().unwrap();
        store.clear_global_version().unwrap();
        assert_eq!(store.global_version().unwrap(), None);
    }

    #[test]
    fn test_global_version_whitespace_and_malformed() {
        let dir = tempdir().unwrap();
        let store = VersionStore::new(dir.path());
        fs::write(store.global_version_file(), "  \n").unwrap();
        assert_eq!(store.global_version().unwrap(), None);

        fs::write(store.global_version_file(), "go1.21.3\n").unwrap();
        assert_eq!(store.global_version().unwrap(), Some(v("1.21.3")));

        fs::write(store.global_version_file(), "banana").unwrap();
        assert!(matches!(store.global_version(), Err(GovmError::Configuration { .. })));
    }

    #[test]
    fn test_scratch_entries() {
        let dir = tempdir().unwrap();
        let store = VersionStore::new(dir.path());
        store.ensure_dirs().unwrap();
        fs::create_dir_all(store.install_scratch_dir(&v("1.22.0"))).unwrap();
        fs::create_dir_all(store.remove_scratch_dir(&v("1.20.0"))).unwrap();
        fs::create_dir_all(store.path_of(&v("1.21.0"))).unwrap();

        let mut found: Vec<String> = store.scratch_entries().into_iter().map(|(_, v)| v.to_string()).collect();
        found.sort();
        assert_eq!(found, vec!["1.20.0", "1.22.0"]);
    }
}
