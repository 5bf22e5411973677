//! The cross-process lock: the advisory file lock serializing writers across
//! threads *and* processes sharing one store context.
//!
//! The surrounding module shape (explicit sync modes, bounded retry) follows
//! `raft-storage`'s `FileStorage` temp-file-then-rename pattern; the actual
//! advisory-lock primitive is `fs4`, the maintained fork of `fs2`.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use dcb_core::StoreError;
use fs4::fs_std::FileExt;

/// A single file, `.store.lock`, used as the mutual-exclusion primitive for
/// one store context.
///
/// Acquiring returns a [`LockGuard`] held for the duration of one write
/// transaction; releasing happens unconditionally on drop.
#[derive(Debug, Clone)]
pub struct CrossProcessLock {
    path: PathBuf,
}

/// The default interval between lock-acquisition retries before backing off.
const INITIAL_RETRY_DELAY: Duration = Duration::from_millis(5);
/// The longest a single retry wait is allowed to grow to.
const MAX_RETRY_DELAY: Duration = Duration::from_millis(200);

impl CrossProcessLock {
    /// Builds a lock bound to the given lock file path. The file is created
    /// lazily on first `acquire`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The path to the lock file, surfaced in `Timeout` errors.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Acquires the lock, retrying with bounded exponential back-off until
    /// `timeout` elapses.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Timeout`] if the lock is not acquired within
    /// `timeout`, or [`StoreError::Io`] if the lock file cannot be opened.
    pub async fn acquire(&self, timeout: Duration) -> Result<LockGuard, StoreError> {
        let path = self.path.clone();
        tracing::debug!(path = %path.display(), ?timeout, "acquiring cross-process lock");

        let result = tokio::task::spawn_blocking(move || acquire_blocking(&path, timeout)).await;

        match result {
            Ok(inner) => inner,
            Err(join_error) => Err(StoreError::io(
                self.path.clone(),
                std::io::Error::other(join_error.to_string()),
            )),
        }
    }
}

fn acquire_blocking(path: &Path, timeout: Duration) -> Result<LockGuard, StoreError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| StoreError::io(path, e))?;
    }
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)
        .map_err(|e| StoreError::io(path, e))?;

    let started = Instant::now();
    let mut delay = INITIAL_RETRY_DELAY;
    loop {
        match FileExt::try_lock_exclusive(&file) {
            Ok(()) => {
                return Ok(LockGuard { file, path: path.to_path_buf() });
            }
            Err(err) if is_lock_contended(&err) => {
                if started.elapsed() >= timeout {
                    return Err(StoreError::Timeout { path: path.to_path_buf() });
                }
                std::thread::sleep(delay.min(timeout.saturating_sub(started.elapsed())));
                delay = (delay * 2).min(MAX_RETRY_DELAY);
            }
            Err(err) => return Err(StoreError::io(path, err)),
        }
    }
}

/// Windows reports a held lock as `ERROR_LOCK_VIOLATION`, which `std` does
/// not map to [`std::io::ErrorKind::WouldBlock`]; every other platform's
/// contention error does map to it. Checking the raw code keeps a real
/// failure (permission denied, no such file, …) from being retried as if
/// it were contention until the timeout silently swallows it.
#[cfg(windows)]
const ERROR_LOCK_VIOLATION: i32 = 33;

fn is_lock_contended(err: &std::io::Error) -> bool {
    if err.kind() == std::io::ErrorKind::WouldBlock {
        return true;
    }
    #[cfg(windows)]
    {
        return err.raw_os_error() == Some(ERROR_LOCK_VIOLATION);
    }
    #[cfg(not(windows))]
    {
        false
    }
}

/// A held cross-process lock. Releases unconditionally when dropped.
#[derive(Debug)]
pub struct LockGuard {
    file: File,
    path: PathBuf,
}

impl LockGuard {
    /// The path to the lock file this guard holds.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Err(error) = FileExt::unlock(&self.file) {
            tracing::warn!(path = %self.path.display(), %error, "failed to release cross-process lock");
        }
    }
}
