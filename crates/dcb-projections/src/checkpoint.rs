//! Checkpoint store: per-projection `LastProcessedPosition`,
//! persisted atomically under `_checkpoints/<name>.checkpoint`.

use std::path::{Path, PathBuf};

use dcb_core::{Position, StoreError};
use dcb_store::{write_file_durably, FlushPolicy};

/// Persists one 64-bit position per registered projection.
#[derive(Debug)]
pub struct FsCheckpointStore {
    root: PathBuf,
    flush_policy: FlushPolicy,
}

impl FsCheckpointStore {
    /// Builds a checkpoint store rooted at `checkpoints_root`
    /// (`<context>/projections/_checkpoints`).
    #[must_use]
    pub fn new(checkpoints_root: impl Into<PathBuf>, flush_policy: FlushPolicy) -> Self {
        Self { root: checkpoints_root.into(), flush_policy }
    }

    /// Returns the last processed position for `projection`, or
    /// [`Position::ZERO`] if it has never checkpointed.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] or [`StoreError::Serialization`] if the
    /// checkpoint file exists but cannot be read.
    pub async fn get(&self, projection: &str) -> Result<Position, StoreError> {
        let path = self.path_for(projection);
        match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let value: u64 = serde_json::from_slice(&bytes).map_err(StoreError::Serialization)?;
                Ok(Position::new(value))
            }
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(Position::ZERO),
            Err(error) => Err(StoreError::io(&path, error)),
        }
    }

    /// Persists `position` as the checkpoint for `projection` via
    /// write-temp, optional fsync, rename.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] on any underlying storage failure.
    pub async fn save(&self, projection: &str, position: Position) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec(&position.value()).map_err(StoreError::Serialization)?;
        write_file_durably(&self.path_for(projection), &bytes, self.flush_policy).await
    }

    /// Resets `projection`'s checkpoint to zero — the first step of a
    /// rebuild.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] on any underlying storage failure.
    pub async fn reset(&self, projection: &str) -> Result<(), StoreError> {
        self.save(projection, Position::ZERO).await
    }

    fn path_for(&self, projection: &str) -> PathBuf {
        self.root.join(format!("{projection}.checkpoint"))
    }
}
