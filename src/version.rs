use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;
use regex::Regex;
use semver::Prerelease;
use crate::error::{GovmError, Result};

static GO_VERSION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d+)\.(\d+)(?:\.(\d+))?(?:(alpha|beta|rc)(\d+))?$")
        .expect("version pattern is valid")
});

/// A Go release identifier such as `1.22.0`, `1.21` or `1.23rc1`.
///
/// The normalised string (no `go`/`v` prefix) is the identity of an install
/// and the name of its directory in the store. Ordering is numeric, with a
/// pre-release ranking below the final release of the same line.
#[derive(Debug, Clone)]
pub struct Version {
    raw: String,
    key: semver::Version,
}

/// Strips a leading `v` or `go` and surrounding whitespace.
pub fn normalize(version: &str) -> String {
    let version = version.trim();
    let version = version.strip_prefix('v').unwrap_or(version);
    let version = version.strip_prefix("go").unwrap_or(version);
    version.to_string()
}

impl Version {
    /// Parses a version string, accepting the `go1.22.0` and `v1.22.0` spellings.
    pub fn parse(input: &str) -> Result<Version> {
        let raw = normalize(input);
        let caps = GO_VERSION_RE
            .captures(&raw)
            .ok_or_else(|| GovmError::config("version", format!("'{}' is not a valid Go version", input.trim())))?;

        let number = |i: usize| -> Result<u64> {
            caps.get(i)
                .map_or(Ok(0), |m| m.as_str().parse::<u64>())
                .map_err(|e| GovmError::config("version", format!("'{}': {}", raw, e)))
        };
        let mut key = semver::Version::new(number(1)?, number(2)?, number(3)?);
        if let (Some(kind), Some(n)) = (caps.get(4), caps.get(5)) {
            key.pre = Prerelease::new(&format!("{}.{}", kind.as_str(), n.as_str()))
                .map_err(|e| GovmError::config("version", format!("'{}': {}", raw, e)))?;
        }
        Ok(Version { raw, key })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Returns `true` for release candidates, betas and alphas.
    pub fn is_prerelease(&self) -> bool {
        !self.key.pre.is_empty()
    }
}

/// Checks whether a version string is a well-formed Go version.
pub fn is_valid_version(version: &str) -> bool {
    Version::parse(version).is_ok()
}

impl FromStr for Version {
    type Err = GovmError;

    fn from_str(s: &str) -> Result<Self> {
        Version::parse(s)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

impl Eq for Version {}

impl std::hash::Hash for Version {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.raw.hash(state);
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Version {
    // `1.21` and `1.21.0` share a key, so the raw string breaks the tie.
    fn cmp(&self, other: &Self) -> Ordering {
        self.key.cmp(&other.key).then_with(|| self.raw.cmp(&other.raw))
    }
}

/// Sorts versions newest first.
pub fn sort_versions(versions: &mut [Version]) {
    versions.sort_by(|a, b| b.cmp(a));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_prefixes() {
        assert_eq!(normalize("1.21.0"), "1.21.0");
        assert_eq!(normalize("v1.21.0"), "1.21.0");
        assert_eq!(normalize("go1.22.5"), "1.22.5");
        assert_eq!(normalize("  go1.22.5 \n"), "1.22.5");
        assert_eq!(normalize(""), "");
    }

    #[test]
    fn test_parse_accepts_go_spellings() {
        assert_eq!(Version::parse("go1.22.0").unwrap().as_str(), "1.22.0");
        assert_eq!(Version::parse("1.21").unwrap().as_str(), "1.21");
        assert!(Version::parse("1.23rc1").unwrap().is_prerelease());
        assert!(!Version::parse("1.23.0").unwrap().is_prerelease());
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(!is_valid_version("latest"));
        assert!(!is_valid_version("1"));
        assert!(!is_valid_version("1.22.0.1"));
        assert!(!is_valid_version("1.22.0; rm -rf /"));
        assert!(!is_valid_version("../1.22.0"));
        assert!(!is_valid_version(""));
    }

    #[test]
    fn test_ordering() {
        let v = |s: &str| Version::parse(s).unwrap();
        assert!(v("1.22.0") > v("1.21.9"));
        assert!(v("1.21.5") > v("1.21.0"));
        assert!(v("2.0.0") > v("1.99.99"));
        assert!(v("1.23rc1") < v("1.23.0"));
        assert!(v("1.23beta1") < v("1.23rc1"));
    }

    #[test]
    fn test_sort_versions_newest_first() {
        let mut versions: Vec<Version> = ["1.20.3", "1.22.0", "1.21.7"]
            .iter()
            .map(|s| Version::parse(s).unwrap())
            .collect();
        sort_versions(&mut versions);
        let names: Vec<_> = versions.iter().map(|v| v.as_str()).collect();
        assert_eq!(names, vec!["1.22.0", "1.21.7", "1.20.3"]);
    }
}
