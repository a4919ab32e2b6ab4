use std::env::VarError;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::debug;
use crate::error::GovmError;
use crate::store::{read_version_file, VersionStore, LOCAL_VERSION_FILE};
use crate::version::Version;

/// Environment variable naming the version to use, ahead of any marker file.
pub const VERSION_ENV: &str = "GOVM_VERSION";

/// Where a resolved version came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionSource {
    Environment,
    LocalFile(PathBuf),
    GlobalFile(PathBuf),
}

impl fmt::Display for VersionSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VersionSource::Environment => write!(f, "set by {}", VERSION_ENV),
            VersionSource::LocalFile(path) => write!(f, "set by {}", path.display()),
            VersionSource::GlobalFile(path) => write!(f, "global default, set by {}", path.display()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Resolved { version: Version, source: VersionSource },
    Unresolved(String),
}

impl Resolution {
    pub fn version(&self) -> Option<&Version> {
        match self {
            Resolution::Resolved { version, .. } => Some(version),
            Resolution::Unresolved(_) => None,
        }
    }
}

/// Decides which version applies for a directory.
///
/// Precedence, first match wins: the `GOVM_VERSION` override, the nearest
/// `.go-version` walking up from the start directory, the global default.
/// Reads only; never installs and never touches the network.
#[derive(Debug, Clone)]
pub struct Resolver<'a> {
    store: &'a VersionStore,
    env_override: Option<String>,
}

impl<'a> Resolver<'a> {
    pub fn new(store: &'a VersionStore, env_override: Option<String>) -> Self {
        Self { store, env_override }
    }

    /// Takes the override from the process environment.
    pub fn from_env(store: &'a VersionStore) -> Self {
        Self::new(store, env_override(std::env::var(VERSION_ENV)))
    }

    pub fn resolve(&self, start_dir: &Path) -> Resolution {
        if let Some(raw) = self.env_override.as_deref().map(str::trim).filter(|v| !v.is_empty()) {
            return match Version::parse(raw) {
                Ok(version) => {
                    debug!(%version, "resolved from environment");
                    Resolution::Resolved { version, source: VersionSource::Environment }
                }
                Err(_) => malformed(VERSION_ENV),
            };
        }

        let mut dir = Some(start_dir);
        while let Some(current) = dir {
            let marker = current.join(LOCAL_VERSION_FILE);
            match read_version_file(&marker) {
                Ok(Some(version)) => {
                    debug!(%version, marker = %marker.display(), "resolved from local marker");
                    return Resolution::Resolved { version, source: VersionSource::LocalFile(marker) };
                }
                Ok(None) => {}
                Err(err) => return unreadable(&marker, err),
            }
            dir = current.parent();
        }

        let global = self.store.global_version_file();
        match read_version_file(&global) {
            Ok(Some(version)) => {
                debug!(%version, "resolved from global default");
                Resolution::Resolved { version, source: VersionSource::GlobalFile(global) }
            }
            Ok(None) => Resolution::Unresolved("no version configured".to_string()),
            Err(err) => unreadable(&global, err),
        }
    }
}

fn malformed(origin: &str) -> Resolution {
    Resolution::Unresolved(format!("malformed version in {}", origin))
}

fn unreadable(path: &Path, err: GovmError) -> Resolution {
    match err {
        GovmError::Configuration { .. } => malformed(&path.display().to_string()),
        other => Resolution::Unresolved(format!("malformed version in {}: {}", path.display(), other)),
    }
}

/// A value that is not valid UTF-8 is kept lossily, so it still counts as
/// set and fails to parse instead of being skipped.
fn env_override(value: std::result::Result<String, VarError>) -> Option<String> {
    match value {
        Ok(value) => Some(value),
        Err(VarError::NotPresent) => None,
        Err(VarError::NotUnicode(raw)) => Some(raw.to_string_lossy().into_owned()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::{tempdir, TempDir};

    fn v(s: &str) -> Version {
        Version::parse(s).unwrap()
    }

    struct Fixture {
        _dir: TempDir,
        store: VersionStore,
        work: PathBuf,
    }

    fn fixture() -> Fixture {
        let dir = tempdir().unwrap();
        let store = VersionStore::new(dir.path().join("govm"));
        store.ensure_dirs().unwrap();
        let work = dir.path().join("a").join("b").join("c").join("d");
        fs::create_dir_all(&work).unwrap();
        Fixture { _dir: dir, store, work }
    }

    #[test]
    fn test_nothing_configured() {
        let fx = fixture();
        let res = Resolver::new(&fx.store, None).resolve(&fx.work);
        assert_eq!(res, Resolution::Unresolved("no version configured".to_string()));
    }

    #[test]
    fn test_global_default_used_without_marker() {
        let fx = fixture();
        fx.store.set_global_version(&v("1.19.0")).unwrap();
        let res = Resolver::new(&fx.store, None).resolve(&fx.work);
        assert_eq!(
            res,
            Resolution::Resolved {
                version: v("1.19.0"),
                source: VersionSource::GlobalFile(fx.store.global_version_file()),
            }
        );
    }

    #[test]
    fn test_marker_found_walking_up() {
        let fx = fixture();
        let b = fx.work.parent().unwrap().parent().unwrap().to_path_buf();
        fs::write(b.join(LOCAL_VERSION_FILE), "1.21.0\n").unwrap();
        fx.store.set_global_version(&v("1.19.0")).unwrap();

        let resolver = Resolver::new(&fx.store, None);
        let res = resolver.resolve(&fx.work);
        assert_eq!(
            res,
            Resolution::Resolved {
                version: v("1.21.0"),
                source: VersionSource::LocalFile(b.join(LOCAL_VERSION_FILE)),
            }
        );

        fs::remove_file(b.join(LOCAL_VERSION_FILE)).unwrap();
        assert_eq!(resolver.resolve(&fx.work).version(), Some(&v("1.19.0")));
    }

    #[test]
    fn test_nearest_marker_wins() {
        let fx = fixture();
        let c = fx.work.parent().unwrap().to_path_buf();
        fs::write(c.join(LOCAL_VERSION_FILE), "1.22.1").unwrap();
        fs::write(c.parent().unwrap().join(LOCAL_VERSION_FILE), "1.21.0").unwrap();
        let res = Resolver::new(&fx.store, None).resolve(&fx.work);
        assert_eq!(res.version(), Some(&v("1.22.1")));
    }

    #[test]
    fn test_blank_marker_is_skipped() {
        let fx = fixture();
        let c = fx.work.parent().unwrap().to_path_buf();
        fs::write(fx.work.join(LOCAL_VERSION_FILE), " \n\t\n").unwrap();
        fs::write(c.join(LOCAL_VERSION_FILE), "go1.20.4\n").unwrap();
        let res = Resolver::new(&fx.store, None).resolve(&fx.work);
        assert_eq!(res.version(), Some(&v("1.20.4")));
    }

    #[test]
    fn test_malformed_marker_does_not_fall_through() {
        let fx = fixture();
        fs::write(fx.work.join(LOCAL_VERSION_FILE), "not-a-version").unwrap();
        fx.store.set_global_version(&v("1.19.0")).unwrap();
        let res = Resolver::new(&fx.store, None).resolve(&fx.work);
        let expected = format!("malformed version in {}", fx.work.join(LOCAL_VERSION_FILE).display());
        assert_eq!(res, Resolution::Unresolved(expected));
    }

    #[test]
    fn test_environment_takes_precedence() {
        let fx = fixture();
        fs::write(fx.work.join(LOCAL_VERSION_FILE), "1.21.0").unwrap();
        fx.store.set_global_version(&v("1.19.0")).unwrap();
        let res = Resolver::new(&fx.store, Some("1.20.0".to_string())).resolve(&fx.work);
        assert_eq!(
            res,
            Resolution::Resolved { version: v("1.20.0"), source: VersionSource::Environment }
        );
    }

    #[test]
    fn test_empty_environment_is_ignored() {
        let fx = fixture();
        fx.store.set_global_version(&v("1.19.0")).unwrap();
        let res = Resolver::new(&fx.store, Some("  ".to_string())).resolve(&fx.work);
        assert_eq!(res.version(), Some(&v("1.19.0")));
    }

    #[test]
    fn test_malformed_environment() {
        let fx = fixture();
        let res = Resolver::new(&fx.store, Some("latest".to_string())).resolve(&fx.work);
        assert_eq!(res, Resolution::Unresolved("malformed version in GOVM_VERSION".to_string()));
    }

    #[test]
    fn test_non_utf8_environment_does_not_fall_through() {
        use std::os::unix::ffi::OsStringExt;
        let fx = fixture();
        fx.store.set_global_version(&v("1.19.0")).unwrap();
        let raw = std::ffi::OsString::from_vec(b"1.22\xff".to_vec());
        let override_value = env_override(Err(VarError::NotUnicode(raw)));
        assert!(override_value.is_some());

        let res = Resolver::new(&fx.store, override_value).resolve(&fx.work);
        assert_eq!(res, Resolution::Unresolved("malformed version in GOVM_VERSION".to_string()));
        assert_eq!(env_override(Err(VarError::NotPresent)), None);
    }

    #[test]
    fn test_uninstalled_versions_still_resolve() {
        let fx = fixture();
        fx.store.set_global_version(&v("1.18.0")).unwrap();
        let res = Resolver::new(&fx.store, None).resolve(&fx.work);
        assert_eq!(res.version(), Some(&v("1.18.0")));
        assert!(!fx.store.is_installed(&v("1.18.0")));
    }
}
