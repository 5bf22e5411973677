//! The persisted projection entity wrapper: `{ data, metadata }`,
//! where `metadata` tracks version, timestamps, size, and the tags the
//! entity currently carries (the latter is what lets the tag-index cache
//! survive a process restart — see [`crate::store::FsProjectionStore`]).

use chrono::{DateTime, Utc};
use dcb_core::Tag;
use serde::{Deserialize, Serialize};

/// Bookkeeping carried alongside every projection entity's data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityMetadata {
    /// When this key was first saved. Immutable after creation.
    pub created_at: DateTime<Utc>,
    /// When this key was last saved. Strictly monotonic across saves.
    pub last_updated_at: DateTime<Utc>,
    /// Increments by one on every save; `1` on first save.
    pub version: u64,
    /// The serialized size of `data`, in bytes.
    pub size_in_bytes: u64,
    /// The tags this entity carries as of its last save — the source of
    /// truth the tag-index cache rehydrates from at open.
    #[serde(default)]
    pub tags: Vec<Tag>,
}

impl EntityMetadata {
    /// Builds the metadata for a brand-new key (`version == 1`).
    #[must_use]
    pub fn new(size_in_bytes: u64, tags: Vec<Tag>) -> Self {
        let now = Utc::now();
        Self { created_at: now, last_updated_at: now, version: 1, size_in_bytes, tags }
    }

    /// Builds the metadata for a re-save of an existing key, preserving
    /// `created_at` and incrementing `version`.
    #[must_use]
    pub fn next(&self, size_in_bytes: u64, tags: Vec<Tag>) -> Self {
        Self { created_at: self.created_at, last_updated_at: Utc::now(), version: self.version + 1, size_in_bytes, tags }
    }
}

/// The on-disk shape of one projection entity: `{ "data": …, "metadata": … }`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredEntity {
    /// The projection's state for this key, as opaque JSON.
    pub data: serde_json::Value,
    /// Bookkeeping metadata.
    pub metadata: EntityMetadata,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_preserves_created_at_and_increments_version() {
        let first = EntityMetadata::new(10, vec![Tag::new("k", "v")]);
        let second = first.next(20, vec![]);
        assert_eq!(second.created_at, first.created_at);
        assert_eq!(second.version, 2);
        assert!(second.last_updated_at >= first.last_updated_at);
    }
}
