//! Alert state repository: the single persisted "last alert" timestamp

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use fs2::FileExt;
use parking_lot::Mutex;
use tempfile::NamedTempFile;
use tracing::debug;

use crate::error::StoreError;
use crate::models::AlertState;

/// Owner of the persisted alert state.
///
/// `load` reports a never-written store as `Ok(None)`. `save` must replace the
/// value atomically and never move it backwards.
pub trait AlertStateStore: Send + Sync {
    /// Held for the duration of a dedupe check; released on drop
    type Guard: Send;

    /// Take the cross-process lock without blocking; `Ok(None)` if it is held
    fn try_lock(&self) -> Result<Option<Self::Guard>, StoreError>;

    /// Read the current state
    fn load(&self) -> Result<Option<AlertState>, StoreError>;

    /// Replace the current state
    fn save(&self, state: AlertState) -> Result<(), StoreError>;
}

/// State kept as decimal epoch seconds in a single file
#[derive(Debug, Clone)]
pub struct FileStateStore {
    path: PathBuf,
    lock_path: PathBuf,
}

/// Advisory lock on the state file's sibling `.lock` file
#[derive(Debug)]
pub struct FileLockGuard {
    file: File,
}

impl Drop for FileLockGuard {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

impl FileStateStore {
    /// Create a store backed by `path`; nothing is touched until first use
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mut lock_path = path.clone().into_os_string();
        lock_path.push(".lock");

        Self {
            path,
            lock_path: PathBuf::from(lock_path),
        }
    }

    /// State file location
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn parent(&self) -> &Path {
        match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        }
    }

    fn io_error(&self, source: io::Error) -> StoreError {
        StoreError::Io {
            path: self.path.clone(),
            source,
        }
    }

    fn write_atomic(&self, state: AlertState) -> io::Result<()> {
        let mut tmp = NamedTempFile::new_in(self.parent())?;
        writeln!(tmp, "{}", state.last_alert_epoch_seconds)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| e.error)?;
        Ok(())
    }
}

impl AlertStateStore for FileStateStore {
    type Guard = FileLockGuard;

    fn try_lock(&self) -> Result<Option<FileLockGuard>, StoreError> {
        let lock_error = |source| StoreError::Lock {
            path: self.lock_path.clone(),
            source,
        };

        fs::create_dir_all(self.parent()).map_err(lock_error)?;
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.lock_path)
            .map_err(lock_error)?;

        match file.try_lock_exclusive() {
            Ok(()) => Ok(Some(FileLockGuard { file })),
            Err(e) if is_contended(&e) => Ok(None),
            Err(e) => Err(lock_error(e)),
        }
    }

    fn load(&self) -> Result<Option<AlertState>, StoreError> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(self.io_error(e)),
        };

        let corrupt = || StoreError::Corrupt {
            path: self.path.clone(),
            contents: contents.clone(),
        };

        let state = AlertState {
            last_alert_epoch_seconds: contents.trim().parse::<i64>().map_err(|_| corrupt())?,
        };

        // Outside chrono's range means the file was not written by us
        if state.last_alert().is_none() {
            return Err(corrupt());
        }

        Ok(Some(state))
    }

    fn save(&self, state: AlertState) -> Result<(), StoreError> {
        // A corrupt file is overwritten; only a readable, later value blocks the write.
        if let Ok(Some(stored)) = self.load() {
            check_monotonic(stored, state)?;
        }

        fs::create_dir_all(self.parent()).map_err(|e| self.io_error(e))?;
        self.write_atomic(state).map_err(|e| self.io_error(e))?;

        debug!(
            path = %self.path.display(),
            last_alert = state.last_alert_epoch_seconds,
            "Saved alert state"
        );
        Ok(())
    }
}

fn is_contended(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::WouldBlock
        || err.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}

fn check_monotonic(stored: AlertState, attempted: AlertState) -> Result<(), StoreError> {
    if attempted.last_alert_epoch_seconds < stored.last_alert_epoch_seconds {
        return Err(StoreError::Regression {
            stored: stored.last_alert_epoch_seconds,
            attempted: attempted.last_alert_epoch_seconds,
        });
    }
    Ok(())
}

/// In-process store, for dry runs and tests.
///
/// Failures can be injected to exercise degraded cycles.
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    state: Mutex<Option<AlertState>>,
    locked: Arc<AtomicBool>,
    fail_lock: AtomicBool,
    fail_load: AtomicBool,
    fail_save: AtomicBool,
    saves: AtomicUsize,
}

/// Lock on a [`MemoryStateStore`]
#[derive(Debug)]
pub struct MemoryLockGuard {
    locked: Arc<AtomicBool>,
}

impl Drop for MemoryLockGuard {
    fn drop(&mut self) {
        self.locked.store(false, Ordering::SeqCst);
    }
}

impl MemoryStateStore {
    /// Empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Store already holding `state`
    pub fn with_state(state: AlertState) -> Self {
        let store = Self::default();
        *store.state.lock() = Some(state);
        store
    }

    /// Current value, bypassing failure injection
    pub fn current(&self) -> Option<AlertState> {
        *self.state.lock()
    }

    /// Number of successful saves
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    /// Make subsequent lock attempts fail
    pub fn fail_locks(&self, fail: bool) {
        self.fail_lock.store(fail, Ordering::SeqCst);
    }

    /// Make subsequent loads fail
    pub fn fail_loads(&self, fail: bool) {
        self.fail_load.store(fail, Ordering::SeqCst);
    }

    /// Make subsequent saves fail
    pub fn fail_saves(&self, fail: bool) {
        self.fail_save.store(fail, Ordering::SeqCst);
    }

    /// Take the lock as another cycle would
    pub fn hold_lock(&self) -> Option<MemoryLockGuard> {
        self.locked
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| MemoryLockGuard {
                locked: Arc::clone(&self.locked),
            })
    }

    fn injected(&self, operation: &str) -> StoreError {
        StoreError::Io {
            path: PathBuf::from("<memory>"),
            source: io::Error::new(io::ErrorKind::Other, format!("injected {operation} failure")),
        }
    }
}

impl AlertStateStore for MemoryStateStore {
    type Guard = MemoryLockGuard;

    fn try_lock(&self) -> Result<Option<MemoryLockGuard>, StoreError> {
        if self.fail_lock.load(Ordering::SeqCst) {
            return Err(self.injected("lock"));
        }
        Ok(self.hold_lock())
    }

    fn load(&self) -> Result<Option<AlertState>, StoreError> {
        if self.fail_load.load(Ordering::SeqCst) {
            return Err(self.injected("load"));
        }
        Ok(*self.state.lock())
    }

    fn save(&self, state: AlertState) -> Result<(), StoreError> {
        if self.fail_save.load(Ordering::SeqCst) {
            return Err(self.injected("save"));
        }

        let mut current = self.state.lock();
        if let Some(stored) = *current {
            check_monotonic(stored, state)?;
        }
        *current = Some(state);
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(secs: i64) -> AlertState {
        AlertState {
            last_alert_epoch_seconds: secs,
        }
    }

    #[test]
    fn test_never_written_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStateStore::new(dir.path().join("last_alert"));

        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStateStore::new(dir.path().join("nested/last_alert"));

        store.save(state(1_700_000_000)).unwrap();

        assert_eq!(store.load().unwrap(), Some(state(1_700_000_000)));
        let raw = fs::read_to_string(store.path()).unwrap();
        assert_eq!(raw, "1700000000\n");
    }

    #[test]
    fn test_corrupt_file_is_storage_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("last_alert");
        fs::write(&path, "not-a-number").unwrap();
        let store = FileStateStore::new(&path);

        assert!(matches!(store.load(), Err(StoreError::Corrupt { .. })));

        // A save repairs it
        store.save(state(42)).unwrap();
        assert_eq!(store.load().unwrap(), Some(state(42)));
    }

    #[test]
    fn test_out_of_range_timestamp_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("last_alert");
        let store = FileStateStore::new(&path);

        for contents in ["-9223372036854775808\n", "9223372036854775807\n"] {
            fs::write(&path, contents).unwrap();
            assert!(matches!(store.load(), Err(StoreError::Corrupt { .. })));
        }

        store.save(state(1_760_000_000)).unwrap();
        assert_eq!(store.load().unwrap(), Some(state(1_760_000_000)));
    }

    #[test]
    fn test_save_refuses_regression() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStateStore::new(dir.path().join("last_alert"));

        store.save(state(2_000)).unwrap();
        store.save(state(2_000)).unwrap();

        let err = store.save(state(1_999)).unwrap_err();
        assert!(matches!(err, StoreError::Regression { stored: 2_000, attempted: 1_999 }));
        assert_eq!(store.load().unwrap(), Some(state(2_000)));
    }

    #[test]
    fn test_lock_is_exclusive_until_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStateStore::new(dir.path().join("last_alert"));
        let other = FileStateStore::new(dir.path().join("last_alert"));

        let guard = store.try_lock().unwrap();
        assert!(guard.is_some());
        assert!(other.try_lock().unwrap().is_none());

        drop(guard);
        assert!(other.try_lock().unwrap().is_some());
    }

    #[test]
    fn test_memory_store_failure_injection() {
        let store = MemoryStateStore::with_state(state(10));

        store.fail_loads(true);
        assert!(store.load().is_err());
        store.fail_loads(false);
        assert_eq!(store.load().unwrap(), Some(state(10)));

        store.fail_saves(true);
        assert!(store.save(state(20)).is_err());
        assert_eq!(store.save_count(), 0);
        assert_eq!(store.current(), Some(state(10)));
    }

    #[test]
    fn test_memory_lock() {
        let store = MemoryStateStore::new();
        let held = store.hold_lock().unwrap();
        assert!(store.try_lock().unwrap().is_none());
        drop(held);
        assert!(store.try_lock().unwrap().is_some());
    }
}
