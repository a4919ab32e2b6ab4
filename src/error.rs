use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, GovmError>;

/// Errors produced while resolving, installing or dispatching Go versions.
///
/// Each variant carries the context a user needs to act on it: the marker
/// file, the version, or the lock involved.
#[derive(Debug, thiserror::Error)]
pub enum GovmError {
    /// Malformed or missing version setting, or an unusable configuration value.
    #[error("configuration error in {origin}: {message}")]
    Configuration { origin: String, message: String },

    #[error("Go {version} is not installed. Run 'govm install {version}'")]
    NotInstalled { version: String },

    #[error("Go {version} is in use as the global default (use --force to remove it anyway)")]
    InUse { version: String },

    #[error("another govm process holds {path} (waited {waited_secs}s for Go {version})")]
    LockContention {
        version: String,
        path: PathBuf,
        waited_secs: u64,
    },

    #[error("checksum mismatch for {file}: expected {expected}, found {found}")]
    Integrity {
        file: String,
        expected: String,
        found: String,
    },

    #[error("download of {url} failed after {attempts} attempt(s): {message}")]
    Download {
        url: String,
        attempts: u32,
        message: String,
    },

    #[error("filesystem error at {path}: {source}")]
    Filesystem {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl GovmError {
    pub fn config(origin: impl Into<String>, message: impl Into<String>) -> Self {
        GovmError::Configuration {
            origin: origin.into(),
            message: message.into(),
        }
    }
}

/// Attaches the path involved to an `std::io::Error`.
pub trait IoResultExt<T> {
    fn at(self, path: impl Into<PathBuf>) -> Result<T>;
}

impl<T> IoResultExt<T> for std::io::Result<T> {
    fn at(self, path: impl Into<PathBuf>) -> Result<T> {
        self.map_err(|source| GovmError::Filesystem {
            path: path.into(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_installed_message_suggests_install() {
        let err = GovmError::NotInstalled { version: "1.22.0".to_string() };
        assert!(err.to_string().contains("govm install 1.22.0"));
    }

    #[test]
    fn test_io_error_carries_path() {
        let res: std::io::Result<()> = Err(std::io::Error::from(std::io::ErrorKind::PermissionDenied));
        let err = res.at("/tmp/govm/versions").unwrap_err();
        assert!(err.to_string().contains("/tmp/govm/versions"));
    }
}
