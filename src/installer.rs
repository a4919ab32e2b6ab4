use std::collections::HashSet;
use std::fs::{self, File};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use flate2::read::GzDecoder;
use sha2::{Digest, Sha256};
use tar::Archive;
use tracing::{debug, info, warn};
use walkdir::WalkDir;
use crate::config::InstallConfig;
use crate::error::{GovmError, IoResultExt, Result};
use crate::lock::VersionLock;
use crate::registry::{current_platform, ReleaseFile, ReleaseSource};
use crate::store::{read_version_file, VersionStore, GO_BINARIES, LOCAL_VERSION_FILE};
use crate::version::Version;

const ARCHIVE_NAME: &str = "archive.tar.gz";
const SECS_PER_DAY: u64 = 24 * 60 * 60;

/// Knobs for lock waiting and download retries.
#[derive(Debug, Clone)]
pub struct InstallOptions {
    pub lock_timeout: Duration,
    /// Extra attempts after the first failed download.
    pub download_retries: u32,
    /// Delay before the first retry; doubled after each attempt.
    pub initial_backoff: Duration,
}

impl Default for InstallOptions {
    fn default() -> Self {
        InstallOptions::from(&InstallConfig::default())
    }
}

impl From<&InstallConfig> for InstallOptions {
    fn from(config: &InstallConfig) -> Self {
        Self {
            lock_timeout: config.lock_timeout(),
            download_retries: config.download_retries,
            initial_backoff: Duration::from_millis(500),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallOutcome {
    Installed,
    AlreadyInstalled,
}

/// An installed version offered to a prune policy.
#[derive(Debug, Clone)]
pub struct PruneCandidate {
    pub version: Version,
    /// Position among installed versions, 0 being the newest.
    pub rank: usize,
    pub installed_at: Option<SystemTime>,
}

/// Keeps the `keep` newest versions; of the rest, removes those installed
/// longer than `older_than` ago (or all of them when no age is given).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrunePolicy {
    pub keep: usize,
    pub older_than: Option<Duration>,
}

impl PrunePolicy {
    /// Builds a policy whose age limit is given in whole days.
    pub fn with_age_in_days(keep: usize, older_than_days: Option<u64>) -> Result<Self> {
        let older_than = older_than_days
            .map(|days| {
                days.checked_mul(SECS_PER_DAY)
                    .map(Duration::from_secs)
                    .ok_or_else(|| GovmError::config("--older-than-days", format!("{} days is too large", days)))
            })
            .transpose()?;
        Ok(Self { keep, older_than })
    }

    pub fn should_remove(&self, candidate: &PruneCandidate) -> bool {
        if candidate.rank < self.keep {
            return false;
        }
        match self.older_than {
            None => true,
            Some(min_age) => candidate
                .installed_at
                .and_then(|t| t.elapsed().ok())
                .is_some_and(|age| age >= min_age),
        }
    }
}

/// Adds and removes versions in a [`VersionStore`].
///
/// Every mutation of a version happens under that version's lock and
/// becomes visible through a single rename: a version directory exists
/// complete under its final name, or not at all.
pub struct Installer<'a, S: ReleaseSource> {
    store: &'a VersionStore,
    source: S,
    options: InstallOptions,
}

impl<'a, S: ReleaseSource> Installer<'a, S> {
    pub fn new(store: &'a VersionStore, source: S, options: InstallOptions) -> Self {
        Self { store, source, options }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Installs `version` unless it is already present.
    ///
    /// Downloads the archive for the current platform into a scratch
    /// directory next to the versions, checks its SHA-256 against the
    /// catalog, extracts it and publishes it with one rename.
    pub fn install(&self, version: &Version) -> Result<InstallOutcome> {
        self.sweep();
        if self.store.is_installed(version) {
            debug!(%version, "already installed");
            return Ok(InstallOutcome::AlreadyInstalled);
        }

        self.store.ensure_dirs()?;
        let _lock = VersionLock::acquire(self.store, version, self.options.lock_timeout)?;
        // Another process may have finished the same install while we waited.
        if self.store.is_installed(version) {
            debug!(%version, "installed by another process while waiting for the lock");
            return Ok(InstallOutcome::AlreadyInstalled);
        }

        self.install_locked(version)?;
        info!(%version, path = %self.store.path_of(version).display(), "installed");
        Ok(InstallOutcome::Installed)
    }

    fn install_locked(&self, version: &Version) -> Result<()> {
        let releases = self.with_retries(|| self.source.catalog())?;
        let release = releases
            .iter()
            .find(|r| r.parsed_version().as_ref() == Some(version))
            .ok_or_else(|| GovmError::config(version.to_string(), "not found in the Go release catalog"))?;
        let (os, arch) = current_platform();
        let file = release.archive_for(os, arch).ok_or_else(|| {
            GovmError::config(version.to_string(), format!("no binary archive available for {} {}", os, arch))
        })?;

        // We hold the lock, so anything here is left over from a dead process.
        let scratch = self.store.install_scratch_dir(version);
        remove_dir_if_exists(&scratch)?;
        fs::create_dir_all(&scratch).at(&scratch)?;

        let result = self.populate(version, file, &scratch);
        if let Err(e) = fs::remove_dir_all(&scratch) {
            warn!(path = %scratch.display(), error = %e, "could not clean up scratch directory");
        }
        result
    }

    /// Downloads, verifies and unpacks into `scratch`, then publishes.
    fn populate(&self, version: &Version, file: &ReleaseFile, scratch: &Path) -> Result<()> {
        let archive = scratch.join(ARCHIVE_NAME);
        info!(%version, file = %file.filename, size = file.size, "downloading");
        self.with_retries(|| self.source.fetch(file, &archive))?;
        verify_sha256(&archive, &file.sha256, &file.filename)?;

        let extract_dir = scratch.join("extract");
        extract_archive(&archive, &extract_dir)?;
        let toolchain = extract_dir.join("go");
        check_required_binaries(&toolchain, &file.filename)?;

        let dest = self.store.path_of(version);
        fs::rename(&toolchain, &dest).at(&dest)
    }

    /// Runs `op`, retrying download failures with exponential backoff.
    fn with_retries<T>(&self, mut op: impl FnMut() -> Result<T>) -> Result<T> {
        let mut attempt: u32 = 1;
        let mut backoff = self.options.initial_backoff;
        loop {
            match op() {
                Err(GovmError::Download { url, message, .. }) => {
                    if attempt > self.options.download_retries {
                        return Err(GovmError::Download { url, attempts: attempt, message });
                    }
                    warn!(%url, attempt, error = %message, "download failed, retrying in {:?}", backoff);
                    std::thread::sleep(backoff);
                    backoff = backoff.saturating_mul(2);
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    /// Removes an installed version.
    ///
    /// Refuses to remove the global default unless `force` is set, in which
    /// case the global default is cleared as well.
    pub fn remove(&self, version: &Version, force: bool) -> Result<()> {
        self.sweep();
        self.store.ensure_dirs()?;
        let _lock = VersionLock::acquire(self.store, version, self.options.lock_timeout)?;

        if !self.store.is_installed(version) {
            return Err(GovmError::NotInstalled { version: version.to_string() });
        }
        let is_global = self.store.global_version()?.as_ref() == Some(version);
        if is_global && !force {
            return Err(GovmError::InUse { version: version.to_string() });
        }

        // Unpublish with a rename first, so readers never see a directory
        // that is halfway through being deleted.
        let trash = self.store.remove_scratch_dir(version);
        remove_dir_if_exists(&trash)?;
        let path = self.store.path_of(version);
        fs::rename(&path, &trash).at(&path)?;

        if is_global {
            self.store.clear_global_version()?;
            info!(%version, "cleared global default");
        }
        if let Err(e) = fs::remove_dir_all(&trash) {
            warn!(path = %trash.display(), error = %e, "left removed version for the next sweep");
        }
        info!(%version, "removed");
        Ok(())
    }

    /// Removes versions that no marker references and `should_remove` accepts.
    ///
    /// Referenced versions are the global default and every `.go-version`
    /// found under `search_roots`. Returns the removed versions.
    pub fn prune<F>(&self, search_roots: &[PathBuf], should_remove: F) -> Result<Vec<Version>>
    where
        F: Fn(&PruneCandidate) -> bool,
    {
        let mut referenced: HashSet<Version> = find_local_markers(search_roots).into_iter().collect();
        if let Some(global) = self.store.global_version()? {
            referenced.insert(global);
        }

        let mut removed = Vec::new();
        for (rank, version) in self.store.list().into_iter().enumerate() {
            if referenced.contains(&version) {
                debug!(%version, "kept, referenced by a marker");
                continue;
            }
            let candidate = PruneCandidate {
                installed_at: self.store.installed_at(&version),
                version,
                rank,
            };
            if !should_remove(&candidate) {
                continue;
            }
            match self.remove(&candidate.version, false) {
                Ok(()) => removed.push(candidate.version),
                // Gone already, or became the global default meanwhile.
                Err(GovmError::NotInstalled { .. }) | Err(GovmError::InUse { .. }) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(removed)
    }

    /// Deletes scratch directories left behind by interrupted operations.
    ///
    /// An entry is only touched if its version lock is free, so scratch of
    /// an operation still running elsewhere survives. Returns how many
    /// entries were deleted.
    pub fn sweep(&self) -> usize {
        let mut swept = 0;
        for (path, version) in self.store.scratch_entries() {
            match VersionLock::try_acquire(self.store, &version) {
                Ok(Some(_lock)) => match fs::remove_dir_all(&path) {
                    Ok(()) => {
                        debug!(path = %path.display(), "swept stale scratch directory");
                        swept += 1;
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => warn!(path = %path.display(), error = %e, "could not sweep scratch directory"),
                },
                Ok(None) => debug!(path = %path.display(), "scratch directory in use"),
                Err(e) => warn!(path = %path.display(), error = %e, "could not lock scratch directory"),
            }
        }
        swept
    }
}

fn remove_dir_if_exists(path: &Path) -> Result<()> {
    match fs::remove_dir_all(path) {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e).at(path),
        _ => Ok(()),
    }
}

/// Strips the `sha256:` prefix from a digest if present.
pub fn format_hash(hash: &str) -> &str {
    let hash = hash.trim();
    hash.strip_prefix("sha256:").unwrap_or(hash)
}

/// Hex-encoded SHA-256 of a file.
pub fn sha256_file(path: &Path) -> Result<String> {
    let mut file = File::open(path).at(path)?;
    let mut hasher = Sha256::new();
    std::io::copy(&mut file, &mut hasher).at(path)?;
    Ok(hex::encode(hasher.finalize()))
}

/// Fails with [`GovmError::Integrity`] unless the file hashes to `expected`.
///
/// An empty expected digest never verifies.
pub fn verify_sha256(path: &Path, expected: &str, file_name: &str) -> Result<()> {
    let expected = format_hash(expected);
    let found = sha256_file(path)?;
    if expected.is_empty() || !found.eq_ignore_ascii_case(expected) {
        return Err(GovmError::Integrity {
            file: file_name.to_string(),
            expected: expected.to_string(),
            found,
        });
    }
    Ok(())
}

/// Unpacks a `.tar.gz` archive into `dest`.
///
/// Entries escaping `dest` (absolute paths, `..`) are skipped by `tar`.
pub fn extract_archive(archive: &Path, dest: &Path) -> Result<()> {
    let file = File::open(archive).at(archive)?;
    let mut tar = Archive::new(GzDecoder::new(file));
    tar.set_preserve_permissions(true);
    fs::create_dir_all(dest).at(dest)?;
    tar.unpack(dest).at(archive)
}

/// Checks that an extracted toolchain ships every shimmed command as an
/// executable file.
fn check_required_binaries(toolchain: &Path, file_name: &str) -> Result<()> {
    for binary in GO_BINARIES {
        let path = toolchain.join("bin").join(binary);
        if !is_executable(&path) {
            return Err(GovmError::Integrity {
                file: file_name.to_string(),
                expected: format!("executable go/bin/{}", binary),
                found: "missing or not executable".to_string(),
            });
        }
    }
    Ok(())
}

/// Checks if a given path is an executable file.
pub fn is_executable(path: &Path) -> bool {
    fs::metadata(path)
        .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

/// Collects the versions named by `.go-version` files under the given roots.
///
/// Hidden directories are not descended into. Unreadable or malformed
/// markers are skipped with a warning; they cannot protect any version.
pub fn find_local_markers(roots: &[PathBuf]) -> Vec<Version> {
    let mut found = Vec::new();
    for root in roots {
        let walker = WalkDir::new(root)
            .follow_links(false)
            .into_iter()
            .filter_entry(|e| {
                e.depth() == 0
                    || !(e.file_type().is_dir() && e.file_name().to_string_lossy().starts_with('.'))
            });
        for entry in walker.filter_map(|e| e.ok()) {
            if !entry.file_type().is_file() || entry.file_name() != LOCAL_VERSION_FILE {
                continue;
            }
            match read_version_file(entry.path()) {
                Ok(Some(version)) => found.push(version),
                Ok(None) => {}
                Err(e) => warn!(marker = %entry.path().display(), error = %e, "ignoring unreadable marker"),
            }
        }
    }
    found
}
