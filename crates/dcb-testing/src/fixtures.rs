//! A temp-directory-backed [`FsEventStore`], fast, deterministic, and
//! isolated per test — but backed by real files rather than an in-memory
//! mode, since the file system is the storage engine for this store.

use std::path::Path;
use std::sync::Arc;

use dcb_core::StoreError;
use dcb_store::{FsEventStore, StoreOptions};

/// An [`FsEventStore`] rooted in a freshly created temporary directory that
/// is removed when the returned value is dropped.
///
/// Keep the whole [`TestStore`] alive for as long as you need the store —
/// dropping it deletes the backing directory.
pub struct TestStore {
    /// The opened store, ready for `append`/`read`.
    pub store: Arc<FsEventStore>,
    _dir: tempfile::TempDir,
}

impl TestStore {
    /// Opens a store context named `"test"` under a fresh temp directory,
    /// using default options.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] if the temp directory cannot be created,
    /// or any error [`FsEventStore::open`] itself can return.
    pub async fn open() -> Result<Self, StoreError> {
        Self::open_with(StoreOptions::default()).await
    }

    /// Opens a store context named `"test"` under a fresh temp directory,
    /// starting from `options` but overriding `root_path` to the temp
    /// directory regardless of what was passed in.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] if the temp directory cannot be created,
    /// or any error [`FsEventStore::open`] itself can return.
    pub async fn open_with(mut options: StoreOptions) -> Result<Self, StoreError> {
        let dir = tempfile::tempdir().map_err(|error| StoreError::io(std::env::temp_dir(), error))?;
        options.root_path = dir.path().to_path_buf();
        let store = Arc::new(FsEventStore::open(options, "test").await?);
        Ok(Self { store, _dir: dir })
    }

    /// The temp directory's path, for tests that need to inspect the
    /// on-disk layout directly or reopen the store to test recovery.
    #[must_use]
    pub fn root(&self) -> &Path {
        self._dir.path()
    }
}
