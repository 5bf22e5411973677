//! The event store: the public append/read facade tying the ledger, the
//! cross-process lock, event-file storage, the indices, and the query
//! planner together.
//!
//! # Design
//!
//! Every append acquires the cross-process lock for the full duration of
//! the write transaction, so appends are linearizable with respect to one
//! another. Reads never take the lock and are always resolved against a
//! `last_sequence_position` snapshot taken at the start of the read, so a
//! concurrent append is either fully visible or not visible at all — never
//! partially.
//!
//! # Examples
//!
//! ```no_run
//! use dcb_core::{EventEnvelope, EventMetadata};
//! use dcb_store::{FsEventStore, StoreOptions};
//!
//! # async fn example() -> Result<(), dcb_core::StoreError> {
//! let mut options = StoreOptions::default();
//! options.root_path = std::env::temp_dir().join("dcb-example");
//! let store = FsEventStore::open(options, "default").await?;
//!
//! let envelope = EventEnvelope {
//!     event_type: "UserRegistered.v1".into(),
//!     payload: serde_json::json!({ "email": "a@x" }),
//!     tags: vec![dcb_core::Tag::new("email", "a@x")],
//!     metadata: EventMetadata::now(),
//! };
//! let appended = store.append(vec![envelope], None).await?;
//! assert_eq!(appended.len(), 1);
//! # Ok(())
//! # }
//! ```

use std::path::{Path, PathBuf};

use dcb_core::{AppendCondition, EventEnvelope, Position, Query, ReadOptions, SequencedEvent, StoreError};
use tokio::sync::Mutex;

use crate::eventfile;
use crate::index;
use crate::ledger::Ledger;
use crate::lock::CrossProcessLock;
use crate::options::{FlushPolicy, StoreOptions};
use crate::planner;

/// A file-system-backed event store for one store context (one subdirectory
/// of the configured root path).
///
/// Multiple `FsEventStore` handles — in this process or another — may point
/// at the same context directory at once; they serialize through the
/// cross-process lock file rather than through any in-memory singleton.
#[derive(Debug)]
pub struct FsEventStore {
    events_root: PathBuf,
    indices_root: PathBuf,
    lock: CrossProcessLock,
    ledger: Mutex<Ledger>,
    flush_policy: FlushPolicy,
    lock_timeout: std::time::Duration,
}

impl FsEventStore {
    /// Opens (creating if necessary) the store context `context` under
    /// `options.root_path`.
    ///
    /// Runs crash recovery on open: any event file whose position exceeds
    /// the ledger's last committed position is truncated, since a crash
    /// between writing event files and committing the ledger leaves no
    /// index entries for the orphaned tail.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] or [`StoreError::Serialization`] if the
    /// ledger cannot be opened, or if recovery fails to scan or truncate
    /// orphaned event files.
    pub async fn open(options: StoreOptions, context: &str) -> Result<Self, StoreError> {
        options.validate()?;

        let context_root = options.context_root(context);
        let events_root = context_root.join("events");
        let indices_root = context_root.join("indices");
        let lock = CrossProcessLock::new(context_root.join(".store.lock"));
        let ledger = Ledger::open(context_root.join("ledger.dat")).await?;

        let truncated = eventfile::recover(&events_root, ledger.last_committed()).await?;
        if truncated > 0 {
            tracing::warn!(context, truncated, "recovered from unclean shutdown: truncated orphaned event files");
        }

        let flush_policy =
            if options.flush_events_immediately { FlushPolicy::FlushImmediately } else { FlushPolicy::Buffered };

        Ok(Self {
            events_root,
            indices_root,
            lock,
            ledger: Mutex::new(ledger),
            flush_policy,
            lock_timeout: options.cross_process_lock_timeout,
        })
    }

    /// The current high-water mark of the log.
    pub async fn last_sequence_position(&self) -> Position {
        self.ledger.lock().await.last_committed()
    }

    /// Appends one or more events, optionally under a [`AppendCondition`].
    ///
    /// # Parameters
    ///
    /// - `envelopes`: the events to append, in the order they should be
    ///   assigned positions.
    /// - `condition`: if present, the append fails with
    ///   [`StoreError::ConditionViolation`] when any event matching
    ///   `condition.fail_if_events_match` exists at a position strictly
    ///   greater than `condition.after_sequence_position`.
    ///
    /// # Returns
    ///
    /// The appended events annotated with their assigned positions, in the
    /// same order as `envelopes`.
    ///
    /// # Errors
    ///
    /// - [`StoreError::Validation`] if `envelopes` is empty.
    /// - [`StoreError::ConditionViolation`] if the append condition fails.
    /// - [`StoreError::Timeout`] if the cross-process lock is not acquired
    ///   within the configured timeout.
    /// - [`StoreError::Io`] or [`StoreError::Serialization`] on any
    ///   underlying storage failure.
    pub async fn append(
        &self,
        envelopes: Vec<EventEnvelope>,
        condition: Option<AppendCondition>,
    ) -> Result<Vec<SequencedEvent>, StoreError> {
        if envelopes.is_empty() {
            return Err(StoreError::validation("append requires at least one event"));
        }

        let _guard = self.lock.acquire(self.lock_timeout).await?;
        let mut ledger = self.ledger.lock().await;
        let last = ledger.last_committed();

        if let Some(condition) = &condition {
            let matches = planner::plan(&self.indices_root, &condition.fail_if_events_match, last).await?;
            if matches.iter().any(|position| *position > condition.after_sequence_position) {
                return Err(StoreError::ConditionViolation { after: condition.after_sequence_position });
            }
        }

        let count = envelopes.len() as u64;
        let (first, last_reserved) = ledger.reserve(count);

        let mut sequenced = Vec::with_capacity(envelopes.len());
        for (offset, envelope) in envelopes.into_iter().enumerate() {
            let position = Position::new(first.value() + offset as u64);
            eventfile::write_event(&self.events_root, position, &envelope, self.flush_policy).await?;

            index::append_position(
                &index::event_type_index_path(&self.indices_root, &envelope.event_type),
                position,
                self.flush_policy,
            )
            .await?;
            for tag in &envelope.tags {
                index::append_position(&index::tag_index_path(&self.indices_root, tag), position, self.flush_policy)
                    .await?;
            }

            sequenced.push(SequencedEvent { position, envelope });
        }

        ledger.commit(last_reserved, self.flush_policy).await?;
        tracing::debug!(first = %first, last = %last_reserved, "appended events");

        Ok(sequenced)
    }

    /// Resolves `query` and reads the matching events.
    ///
    /// No locks are taken; the read is resolved against the log's current
    /// `last_sequence_position`, so a concurrent append is either entirely
    /// visible or entirely invisible to this read.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] or [`StoreError::Serialization`] if an
    /// index or event file cannot be read.
    pub async fn read(&self, query: &Query, options: ReadOptions) -> Result<Vec<SequencedEvent>, StoreError> {
        let last = self.last_sequence_position().await;
        let mut positions = planner::plan(&self.indices_root, query, last).await?;

        if options.descending {
            positions.reverse();
        }
        if let Some(after) = options.after_position {
            positions.retain(|position| *position > after);
        }
        if let Some(limit) = options.limit {
            positions.truncate(limit);
        }

        let envelopes = eventfile::read_many(&self.events_root, &positions).await?;
        Ok(positions.into_iter().zip(envelopes).map(|(position, envelope)| SequencedEvent { position, envelope }).collect())
    }

    /// Resolves `query` and returns only the highest-position match —
    /// typically used for DCB "what's the current state" probes.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] or [`StoreError::Serialization`] if the
    /// matching event file cannot be read.
    pub async fn read_last(&self, query: &Query) -> Result<Option<SequencedEvent>, StoreError> {
        let last = self.last_sequence_position().await;
        let positions = planner::plan(&self.indices_root, query, last).await?;
        let Some(&position) = positions.last() else {
            return Ok(None);
        };
        let envelope = eventfile::read_event(&self.events_root, position).await?;
        Ok(Some(SequencedEvent { position, envelope }))
    }

    /// The directory event files are stored under, for components (such as
    /// the projection manager's related-events resolution) that need direct
    /// access.
    #[must_use]
    pub fn events_root(&self) -> &Path {
        &self.events_root
    }

    /// The directory the tag and event-type indices are stored under.
    #[must_use]
    pub fn indices_root(&self) -> &Path {
        &self.indices_root
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)] // Panics: test-only, failure is the assertion.
mod tests {
    use super::*;
    use dcb_core::{EventMetadata, Tag};

    fn envelope(event_type: &str, tags: Vec<Tag>) -> EventEnvelope {
        EventEnvelope { event_type: event_type.to_string(), payload: serde_json::json!({}), tags, metadata: EventMetadata::now() }
    }

    async fn open_store(dir: &Path) -> FsEventStore {
        let mut options = StoreOptions::default();
        options.root_path = dir.to_path_buf();
        FsEventStore::open(options, "ctx").await.unwrap_or_else(|e| panic!("open: {e}"))
    }

    #[tokio::test]
    async fn contiguity_after_successive_appends() {
        let dir = tempfile::tempdir().unwrap_or_else(|e| panic!("tempdir: {e}"));
        let store = open_store(dir.path()).await;

        store.append(vec![envelope("A", vec![]), envelope("A", vec![])], None).await.unwrap_or_else(|e| panic!("append: {e}"));
        store.append(vec![envelope("A", vec![])], None).await.unwrap_or_else(|e| panic!("append: {e}"));

        let all = store.read(&Query::All, ReadOptions::ascending()).await.unwrap_or_else(|e| panic!("read: {e}"));
        let positions: Vec<u64> = all.iter().map(|e| e.position.value()).collect();
        assert_eq!(positions, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn append_is_all_or_nothing_in_input_order() {
        let dir = tempfile::tempdir().unwrap_or_else(|e| panic!("tempdir: {e}"));
        let store = open_store(dir.path()).await;

        let appended = store
            .append(vec![envelope("First", vec![]), envelope("Second", vec![]), envelope("Third", vec![])], None)
            .await
            .unwrap_or_else(|e| panic!("append: {e}"));

        assert_eq!(appended.iter().map(|e| e.envelope.event_type.clone()).collect::<Vec<_>>(), vec!["First", "Second", "Third"]);
        assert_eq!(appended.iter().map(|e| e.position.value()).collect::<Vec<_>>(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn empty_append_is_rejected() {
        let dir = tempfile::tempdir().unwrap_or_else(|e| panic!("tempdir: {e}"));
        let store = open_store(dir.path()).await;
        let result = store.append(Vec::new(), None).await;
        assert!(matches!(result, Err(StoreError::Validation(_))));
    }

    #[tokio::test]
    async fn dcb_condition_rejects_second_matching_append() {
        let dir = tempfile::tempdir().unwrap_or_else(|e| panic!("tempdir: {e}"));
        let store = open_store(dir.path()).await;

        let tag = Tag::new("email", "a@x");
        let condition = AppendCondition::new(Position::ZERO, Query::from_tag(tag.clone()));

        store
            .append(vec![envelope("UserRegistered", vec![tag.clone()])], Some(condition.clone()))
            .await
            .unwrap_or_else(|e| panic!("first append: {e}"));

        let second = store.append(vec![envelope("UserRegistered", vec![tag])], Some(condition)).await;
        assert!(matches!(second, Err(StoreError::ConditionViolation { .. })));
    }

    #[tokio::test]
    async fn read_by_tag_intersection_ignores_operand_order() {
        let dir = tempfile::tempdir().unwrap_or_else(|e| panic!("tempdir: {e}"));
        let store = open_store(dir.path()).await;

        let tier = Tag::new("tier", "professional");
        let status = Tag::new("status", "active");

        for _ in 0..4 {
            store.append(vec![envelope("Entity", vec![tier.clone()])], None).await.unwrap_or_else(|e| panic!("append: {e}"));
        }
        store.append(vec![envelope("Entity", vec![status.clone()])], None).await.unwrap_or_else(|e| panic!("append: {e}"));
        store
            .append(vec![envelope("Entity", vec![tier.clone(), status.clone()])], None)
            .await
            .unwrap_or_else(|e| panic!("append: {e}"));

        let forward = store.read(&Query::FromTags(vec![tier.clone(), status.clone()]), ReadOptions::ascending()).await.unwrap_or_else(|e| panic!("read: {e}"));
        let reversed = store.read(&Query::FromTags(vec![status, tier]), ReadOptions::ascending()).await.unwrap_or_else(|e| panic!("read: {e}"));

        assert_eq!(forward.len(), 1);
        assert_eq!(reversed.len(), 1);
        assert_eq!(forward[0].position, reversed[0].position);
    }

    #[tokio::test]
    async fn descending_read_reverses_ascending() {
        let dir = tempfile::tempdir().unwrap_or_else(|e| panic!("tempdir: {e}"));
        let store = open_store(dir.path()).await;
        for i in 0..5 {
            store.append(vec![envelope(&format!("E{i}"), vec![])], None).await.unwrap_or_else(|e| panic!("append: {e}"));
        }

        let ascending = store.read(&Query::All, ReadOptions::ascending()).await.unwrap_or_else(|e| panic!("read: {e}"));
        let mut descending = store.read(&Query::All, ReadOptions::descending()).await.unwrap_or_else(|e| panic!("read: {e}"));
        descending.reverse();

        let ascending_positions: Vec<_> = ascending.iter().map(|e| e.position).collect();
        let descending_positions: Vec<_> = descending.iter().map(|e| e.position).collect();
        assert_eq!(ascending_positions, descending_positions);
    }

    #[tokio::test]
    async fn recovery_truncates_orphaned_event_files_on_reopen() {
        let dir = tempfile::tempdir().unwrap_or_else(|e| panic!("tempdir: {e}"));
        {
            let store = open_store(dir.path()).await;
            store.append(vec![envelope("A", vec![])], None).await.unwrap_or_else(|e| panic!("append: {e}"));
        }

        let orphan = envelope("Orphan", vec![]);
        let events_root = dir.path().join("ctx").join("events");
        eventfile::write_event(&events_root, Position::new(2), &orphan, FlushPolicy::FlushImmediately)
            .await
            .unwrap_or_else(|e| panic!("write orphan: {e}"));

        let reopened = open_store(dir.path()).await;
        let all = reopened.read(&Query::All, ReadOptions::ascending()).await.unwrap_or_else(|e| panic!("read: {e}"));
        assert_eq!(all.len(), 1);
    }
}
