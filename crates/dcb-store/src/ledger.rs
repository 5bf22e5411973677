//! The ledger: reserves sequence positions and durably tracks the
//! high-water mark of the log.
//!
//! The write-temp-fsync-rename pattern mirrors `raft-storage`'s
//! `FileStorage::store_persistent_state`, generalized from Raft's
//! persistent-state record to a single `u64` position.

use std::path::{Path, PathBuf};

use dcb_core::{Position, StoreError};
use serde::{Deserialize, Serialize};

use crate::options::FlushPolicy;

#[derive(Debug, Serialize, Deserialize)]
struct LedgerRecord {
    last_sequence_position: u64,
}

/// The durable record of the log's high-water mark, plus in-memory
/// reservation of not-yet-committed positions.
///
/// `reserve` and `commit` are split because a write transaction must create
/// event files *before* the ledger advances: a crash between the two leaves
/// orphaned event files above the last committed ledger position, which
/// [`crate::eventfile::recover`] truncates on the next open.
#[derive(Debug)]
pub struct Ledger {
    path: PathBuf,
    last_committed: Position,
    reserved_up_to: Position,
}

impl Ledger {
    /// Opens the ledger file at `path`, creating it at position 0 if it
    /// does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] if the file exists but cannot be read, or
    /// [`StoreError::Serialization`] if its contents are not valid JSON.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let last_committed = match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let record: LedgerRecord = serde_json::from_slice(&bytes).map_err(StoreError::Serialization)?;
                Position::new(record.last_sequence_position)
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Position::ZERO,
            Err(err) => return Err(StoreError::io(&path, err)),
        };

        Ok(Self { path, last_committed, reserved_up_to: last_committed })
    }

    /// The last durably committed position.
    #[must_use]
    pub const fn last_committed(&self) -> Position {
        self.last_committed
    }

    /// Atomically assigns the next `n` positions without persisting them.
    /// Returns the assigned range `[first..=last]`.
    #[must_use]
    pub fn reserve(&mut self, n: u64) -> (Position, Position) {
        let first = Position::new(self.reserved_up_to.value() + 1);
        let last = Position::new(self.reserved_up_to.value() + n);
        self.reserved_up_to = last;
        (first, last)
    }

    /// Persists `last_sequence_position = up_to` via write-temp, optional
    /// fsync, rename.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] if the temp file cannot be written,
    /// synced, or renamed into place.
    pub async fn commit(&mut self, up_to: Position, policy: FlushPolicy) -> Result<(), StoreError> {
        write_ledger_file(&self.path, up_to, policy).await?;
        self.last_committed = up_to;
        Ok(())
    }
}

async fn write_ledger_file(path: &Path, up_to: Position, policy: FlushPolicy) -> Result<(), StoreError> {
    let record = LedgerRecord { last_sequence_position: up_to.value() };
    let bytes = serde_json::to_vec(&record).map_err(StoreError::Serialization)?;

    let temp_path = path.with_extension("tmp");
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(|e| StoreError::io(parent, e))?;
    }

    let file = tokio::fs::File::create(&temp_path).await.map_err(|e| StoreError::io(&temp_path, e))?;
    {
        use tokio::io::AsyncWriteExt;
        let mut file = file;
        file.write_all(&bytes).await.map_err(|e| StoreError::io(&temp_path, e))?;
        if matches!(policy, FlushPolicy::FlushImmediately) {
            file.sync_data().await.map_err(|e| StoreError::io(&temp_path, e))?;
        }
    }

    tokio::fs::rename(&temp_path, path).await.map_err(|e| StoreError::io(path, e))?;
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)] // Panics: test-only, failure is the assertion.
mod tests {
    use super::*;

    #[tokio::test]
    async fn fresh_ledger_starts_at_zero() {
        let dir = tempfile::tempdir().unwrap_or_else(|e| panic!("tempdir: {e}"));
        let ledger = Ledger::open(dir.path().join("ledger.dat")).await.unwrap_or_else(|e| panic!("open: {e}"));
        assert_eq!(ledger.last_committed(), Position::ZERO);
    }

    #[tokio::test]
    async fn reserve_then_commit_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap_or_else(|e| panic!("tempdir: {e}"));
        let path = dir.path().join("ledger.dat");

        let mut ledger = Ledger::open(&path).await.unwrap_or_else(|e| panic!("open: {e}"));
        let (first, last) = ledger.reserve(3);
        assert_eq!(first, Position::new(1));
        assert_eq!(last, Position::new(3));
        ledger.commit(last, FlushPolicy::FlushImmediately).await.unwrap_or_else(|e| panic!("commit: {e}"));

        let reopened = Ledger::open(&path).await.unwrap_or_else(|e| panic!("reopen: {e}"));
        assert_eq!(reopened.last_committed(), Position::new(3));
    }

    #[tokio::test]
    async fn reserve_without_commit_does_not_persist() {
        let dir = tempfile::tempdir().unwrap_or_else(|e| panic!("tempdir: {e}"));
        let path = dir.path().join("ledger.dat");

        let mut ledger = Ledger::open(&path).await.unwrap_or_else(|e| panic!("open: {e}"));
        ledger.reserve(5);

        let reopened = Ledger::open(&path).await.unwrap_or_else(|e| panic!("reopen: {e}"));
        assert_eq!(reopened.last_committed(), Position::ZERO);
    }
}
