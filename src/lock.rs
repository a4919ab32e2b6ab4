use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, OnceLock, TryLockError};
use std::time::{Duration, Instant};
use fs2::FileExt;
use tracing::debug;
use crate::error::{GovmError, IoResultExt, Result};
use crate::store::VersionStore;
use crate::version::Version;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// An exclusive advisory lock on one version of the store.
///
/// Held for the whole of an install or remove of that version; released
/// when dropped. Different versions use different lock files and never
/// contend.
#[derive(Debug)]
pub struct VersionLock {
    file: File,
    path: PathBuf,
    // The file lock coordinates processes; the mutex covers threads of this
    // process, which the OS lock is not guaranteed to separate.
    _guard: MutexGuard<'static, ()>,
}

impl VersionLock {
    /// Acquires the lock for `version`, waiting at most `timeout`.
    pub fn acquire(store: &VersionStore, version: &Version, timeout: Duration) -> Result<Self> {
        let path = store.lock_path(version);
        let deadline = Instant::now()
            .checked_add(timeout)
            .ok_or_else(|| GovmError::config("lock_timeout_secs", format!("{}s is too large", timeout.as_secs())))?;
        loop {
            if let Some(lock) = Self::try_acquire_at(&path)? {
                debug!(lock = %path.display(), "acquired version lock");
                return Ok(lock);
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(GovmError::LockContention {
                    version: version.to_string(),
                    path,
                    waited_secs: timeout.as_secs(),
                });
            }
            std::thread::sleep(POLL_INTERVAL.min(deadline - now));
        }
    }

    /// Acquires the lock only if nobody holds it right now.
    pub fn try_acquire(store: &VersionStore, version: &Version) -> Result<Option<Self>> {
        Self::try_acquire_at(&store.lock_path(version))
    }

    fn try_acquire_at(path: &Path) -> Result<Option<Self>> {
        let guard = match process_lock_for_path(path).try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => return Ok(None),
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).at(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(path)
            .at(path)?;

        match file.try_lock_exclusive() {
            Ok(()) => Ok(Some(Self {
                file,
                path: path.to_path_buf(),
                _guard: guard,
            })),
            Err(e) if e.kind() == fs2::lock_contended_error().kind() => Ok(None),
            Err(e) => Err(e).at(path),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for VersionLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

fn process_lock_for_path(path: &Path) -> &'static Mutex<()> {
    static PROCESS_LOCKS: OnceLock<Mutex<HashMap<PathBuf, &'static Mutex<()>>>> = OnceLock::new();
    let locks = PROCESS_LOCKS.get_or_init(|| Mutex::new(HashMap::new()));

    let mut map = locks
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    if let Some(existing) = map.get(path) {
        return existing;
    }

    let mutex: &'static Mutex<()> = Box::leak(Box::new(Mutex::new(())));
    map.insert(path.to_path_buf(), mutex);
    mutex
}
