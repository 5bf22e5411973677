//! Tag and event-type indices.
//!
//! Both indices share the same file shape — a sorted, deduplicated list of
//! positions — and the same durable-write discipline as the ledger and
//! event files: read-modify-write through a temp file, then atomic rename.
//! Readers never see torn bytes because they only ever see a file that was
//! fully written before being renamed into place.

use std::path::{Path, PathBuf};

use dcb_core::{Position, StoreError, Tag};

use crate::options::FlushPolicy;

/// Computes the on-disk path for one tag's index file:
/// `indices/tags/<key>/<value>`.
#[must_use]
pub fn tag_index_path(indices_root: &Path, tag: &Tag) -> PathBuf {
    let (key_segment, value_segment) = tag.index_path_segments();
    indices_root.join("tags").join(key_segment).join(value_segment)
}

/// Computes the on-disk path for one event type's index file:
/// `indices/eventtypes/<event_type>`.
#[must_use]
pub fn event_type_index_path(indices_root: &Path, event_type: &str) -> PathBuf {
    let segment: String = event_type
        .chars()
        .map(|c| if matches!(c, '/' | '\\' | '\0') { '_' } else { c })
        .collect();
    indices_root.join("eventtypes").join(segment)
}

/// Reads the sorted position list at `path`, or an empty list if the file
/// does not exist.
///
/// # Errors
///
/// Returns [`StoreError::Io`] if the file exists but cannot be read, or
/// [`StoreError::Serialization`] if its contents are not a valid position
/// list.
pub async fn read_positions(path: &Path) -> Result<Vec<Position>, StoreError> {
    match tokio::fs::read(path).await {
        Ok(bytes) => {
            let raw: Vec<u64> = serde_json::from_slice(&bytes).map_err(StoreError::Serialization)?;
            Ok(raw.into_iter().map(Position::new).collect())
        }
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(err) => Err(StoreError::io(path, err)),
    }
}

/// Appends `position` to the index file at `path`, keeping the list sorted
/// and deduplicated.
///
/// Callers must hold the cross-process lock: this is a read-modify-write
/// operation and is not safe against concurrent writers.
///
/// # Errors
///
/// Returns [`StoreError::Io`] on any filesystem failure.
pub async fn append_position(path: &Path, position: Position, policy: FlushPolicy) -> Result<(), StoreError> {
    let mut positions = read_positions(path).await?;
    if positions.last().copied() != Some(position) {
        positions.push(position);
        positions.sort_unstable();
        positions.dedup();
    }
    write_positions(path, &positions, policy).await
}

async fn write_positions(path: &Path, positions: &[Position], policy: FlushPolicy) -> Result<(), StoreError> {
    let raw: Vec<u64> = positions.iter().map(|p| p.value()).collect();
    let bytes = serde_json::to_vec(&raw).map_err(StoreError::Serialization)?;
    write_file_durably(path, &bytes, policy).await
}

/// Removes an index file entirely (used by `DeleteAllIndices` during
/// rebuild).
///
/// # Errors
///
/// Returns [`StoreError::Io`] if the file exists and cannot be removed.
pub async fn remove_index_file(path: &Path) -> Result<(), StoreError> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(StoreError::io(path, err)),
    }
}

/// Writes `bytes` to `path` via write-temp, optional fsync, atomic rename —
/// the same discipline used for the ledger and event files.
pub async fn write_file_durably(path: &Path, bytes: &[u8], policy: FlushPolicy) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(|e| StoreError::io(parent, e))?;
    }
    let temp_path = path.with_extension("tmp");
    {
        use tokio::io::AsyncWriteExt;
        let mut file = tokio::fs::File::create(&temp_path).await.map_err(|e| StoreError::io(&temp_path, e))?;
        file.write_all(bytes).await.map_err(|e| StoreError::io(&temp_path, e))?;
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
    async fn missing_index_reads_as_empty() {
        let dir = tempfile::tempdir().unwrap_or_else(|e| panic!("tempdir: {e}"));
        let path = dir.path().join("indices/tags/email/a_x");
        let positions = read_positions(&path).await.unwrap_or_else(|e| panic!("read: {e}"));
        assert!(positions.is_empty());
    }

    #[tokio::test]
    async fn append_keeps_sorted_and_deduplicated() {
        let dir = tempfile::tempdir().unwrap_or_else(|e| panic!("tempdir: {e}"));
        let path = dir.path().join("indices/eventtypes/UserRegistered");

        for position in [3u64, 1, 2, 2] {
            append_position(&path, Position::new(position), FlushPolicy::FlushImmediately)
                .await
                .unwrap_or_else(|e| panic!("append: {e}"));
        }

        let positions = read_positions(&path).await.unwrap_or_else(|e| panic!("read: {e}"));
        assert_eq!(positions, vec![Position::new(1), Position::new(2), Position::new(3)]);
    }

    #[tokio::test]
    async fn tag_index_path_sanitizes_components() {
        let tag = Tag::new("path", "a/b");
        let path = tag_index_path(Path::new("/root/indices"), &tag);
        assert_eq!(path, Path::new("/root/indices/tags/path/a_b"));
    }
}
