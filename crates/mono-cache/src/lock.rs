//! Advisory locks serializing cache-entry mutation
//!
//! Every cache entry has a `<entry>.lock` sidecar file. Mutating operations
//! take a non-blocking exclusive flock on it; a contended lock is not an
//! error but a signal that another process is already doing the work.

use fs4::FileExt;
use mono_core::{Error, Result};
use std::fs::{File, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// An acquired advisory lock on a cache entry. Released (and the file
/// handle closed) on drop; the sidecar file itself is left in place.
#[derive(Debug)]
pub struct CacheLock {
    file: File,
    path: PathBuf,
}

impl CacheLock {
    /// Try to take the exclusive advisory lock guarding `cache_path`.
    ///
    /// Returns `Ok(None)` when another process holds the lock; callers
    /// treat that as "someone else is handling this entry" and skip.
    ///
    /// # Errors
    ///
    /// Returns an error when the sidecar file cannot be created or the lock
    /// syscall fails for a reason other than contention.
    pub fn acquire(cache_path: &Path) -> Result<Option<Self>> {
        let path = sidecar_path(cache_path);

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| Error::io(e, parent, "create_dir_all"))?;
        }

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| Error::io(e, &path, "open lock file"))?;

        match file.try_lock_exclusive() {
            Ok(()) => Ok(Some(Self { file, path })),
            Err(e) if e.kind() == ErrorKind::WouldBlock => {
                tracing::debug!(lock = %path.display(), "cache lock held elsewhere");
                Ok(None)
            }
            Err(e) => Err(Error::io(e, &path, "flock")),
        }
    }

    /// Path of the sidecar lock file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for CacheLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            tracing::debug!(lock = %self.path.display(), "failed to unlock: {e}");
        }
    }
}

fn sidecar_path(cache_path: &Path) -> PathBuf {
    let mut os = cache_path.as_os_str().to_os_string();
    os.push(".lock");
    PathBuf::from(os)
}
