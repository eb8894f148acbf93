use anyhow::{Context, Result};
use fs2::FileExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::File;
use std::path::{Path, PathBuf};

/// An exclusive or shared advisory lock on a directory's `.lock` file.
///
/// Dropping the guard releases the OS-level lock. Used to make multi-process
/// read/mutate/write cycles against a JSON store file safe: every store
/// (session, cron, pairing, run-log) shares this one locking primitive so
/// lock semantics don't drift module to module.
pub struct DirLock {
    _file: File,
}

impl DirLock {
    fn lock_path(dir: &Path) -> PathBuf {
        dir.join(".lock")
    }

    pub fn acquire_exclusive(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create lock dir: {}", dir.display()))?;
        let path = Self::lock_path(dir);
        let file = std::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .with_context(|| format!("failed to open lock file: {}", path.display()))?;
        file.lock_exclusive()
            .with_context(|| format!("failed to acquire exclusive lock: {}", path.display()))?;
        Ok(Self { _file: file })
    }

    pub fn acquire_shared(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create lock dir: {}", dir.display()))?;
        let path = Self::lock_path(dir);
        let file = std::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .with_context(|| format!("failed to open lock file: {}", path.display()))?;
        file.lock_shared()
            .with_context(|| format!("failed to acquire shared lock: {}", path.display()))?;
        Ok(Self { _file: file })
    }
}

/// Read a JSON store file under a shared lock, falling back to `T::default()`
/// when the file is missing or malformed (store-corruption is logged and
/// skipped rather than crashing the service).
pub fn read_under_lock<T>(path: &Path) -> Result<T>
where
    T: DeserializeOwned + Default,
{
    let dir = path.parent().context("store path has no parent directory")?;
    let _lock = DirLock::acquire_shared(dir)?;
    read_locked(path)
}

fn read_locked<T>(path: &Path) -> Result<T>
where
    T: DeserializeOwned + Default,
{
    if !path.exists() {
        return Ok(T::default());
    }
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read store file: {}", path.display()))?;
    match serde_json::from_str(&content) {
        Ok(value) => Ok(value),
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "store file malformed, reloading with defaults"
            );
            Ok(T::default())
        }
    }
}

/// Canonical `read, mutate, atomically rename temp` update cycle for every
/// store file in the system. Acquires an exclusive lock on the store's
/// directory, loads the current value (or `T::default()` if missing/corrupt),
/// applies `mutator`, and atomically persists the result before releasing
/// the lock. `mutator` may return a value to pass back to the caller.
pub fn update_under_lock<T, F, R>(path: &Path, mutator: F) -> Result<R>
where
    T: DeserializeOwned + Serialize + Default,
    F: FnOnce(&mut T) -> R,
{
    let dir = path.parent().context("store path has no parent directory")?;
    let _lock = DirLock::acquire_exclusive(dir)?;
    let mut value: T = read_locked(path)?;
    let result = mutator(&mut value);
    let serialized =
        serde_json::to_string_pretty(&value).context("failed to serialize store file")?;
    crate::utils::atomic_write(path, &serialized)?;
    Ok(result)
}
