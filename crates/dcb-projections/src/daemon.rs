//! The projection daemon: a cooperative background loop that keeps every
//! registered projection caught up with newly appended events.
//!
//! Rather than polling one projection's own last-processed marker, it polls
//! the minimum checkpoint across the whole registry, since one daemon here
//! drives many projections through a single [`ProjectionManager`].

use std::sync::Arc;
use std::time::Duration;

use dcb_core::{DomainEvent, Position, Query, ReadOptions, StoreError};
use dcb_store::FsEventStore;
use tokio::sync::watch;

use crate::manager::ProjectionManager;

/// Drives [`ProjectionManager::update`] forward as new events are appended,
/// polling at a fixed interval rather than subscribing to a push channel —
/// the event store has no wire protocol to push over.
pub struct ProjectionDaemon<E: DomainEvent> {
    event_store: Arc<FsEventStore>,
    manager: Arc<ProjectionManager<E>>,
    polling_interval: Duration,
    batch_size: usize,
}

impl<E: DomainEvent> ProjectionDaemon<E> {
    /// Builds a daemon polling `event_store` every `polling_interval`,
    /// reading up to `batch_size` events per iteration.
    #[must_use]
    pub fn new(
        event_store: Arc<FsEventStore>,
        manager: Arc<ProjectionManager<E>>,
        polling_interval: Duration,
        batch_size: usize,
    ) -> Self {
        Self { event_store, manager, polling_interval, batch_size }
    }

    /// Runs until `shutdown` fires, draining whatever batch is in flight
    /// before returning rather than cancelling mid-update.
    ///
    /// # Errors
    ///
    /// Returns the first unrecoverable error encountered reading events or
    /// updating a projection; a projection being busy is not an error (the
    /// manager skips it silently and the daemon retries next poll).
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<(), StoreError> {
        loop {
            tokio::select! {
                () = Self::sleep(self.polling_interval) => {
                    self.poll_until_caught_up().await?;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        tracing::info!("projection daemon shutting down");
                        return Ok(());
                    }
                }
            }
        }
    }

    async fn sleep(duration: Duration) {
        tokio::time::sleep(duration).await;
    }

    /// Reads and applies events past the lowest checkpoint among all
    /// registered projections until the log is caught up, then returns —
    /// called once per poll tick by [`ProjectionDaemon::run`], and directly
    /// by callers driving the daemon manually (tests, one-shot catch-up).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`]/[`StoreError::Serialization`] on a
    /// read/write failure, propagated from [`ProjectionManager::update`].
    pub async fn poll_until_caught_up(&self) -> Result<(), StoreError> {
        loop {
            let min_checkpoint = self.manager.minimum_checkpoint().await?;
            let last = self.event_store.last_sequence_position().await;
            if last <= min_checkpoint {
                return Ok(());
            }

            let options = ReadOptions::ascending().with_after_position(min_checkpoint).with_limit(self.batch_size);
            let batch = self.event_store.read(&Query::All, options).await?;
            if batch.is_empty() {
                return Ok(());
            }

            let caught_up = batch.len() < self.batch_size;
            self.manager.update(&batch).await?;
            if caught_up {
                return Ok(());
            }
        }
    }
}

/// A no-op shutdown signal for callers that never need to stop the daemon
/// gracefully (short-lived processes, tests driving `poll_until_caught_up`
/// directly instead of `run`).
#[must_use]
pub fn never_shutdown() -> watch::Receiver<bool> {
    let (_tx, rx) = watch::channel(false);
    rx
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)] // Panics: test-only, failure is the assertion.
mod tests {
    use super::*;
    use dcb_core::{EventEnvelope, EventMetadata};
    use dcb_store::{FlushPolicy, StoreOptions};
    use serde::{Deserialize, Serialize};

    use crate::definition::Projection;

    #[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
    enum TestEvent {
        Tapped { key: String },
    }

    impl DomainEvent for TestEvent {
        fn event_type(&self) -> &'static str {
            "Tapped.v1"
        }
    }

    #[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
    struct Taps {
        count: u64,
    }

    struct TapCounter;

    impl Projection<TestEvent> for TapCounter {
        type State = Taps;

        fn name(&self) -> &str {
            "tap-counter"
        }

        fn event_types(&self) -> &'static [&'static str] {
            &["Tapped.v1"]
        }

        fn key_selector(&self, event: &TestEvent) -> String {
            let TestEvent::Tapped { key } = event;
            key.clone()
        }

        fn apply(&self, current: Option<Taps>, _event: &TestEvent, _related: &[TestEvent]) -> Result<Option<Taps>, StoreError> {
            let mut taps = current.unwrap_or_default();
            taps.count += 1;
            Ok(Some(taps))
        }
    }

    #[tokio::test]
    async fn poll_catches_up_without_an_explicit_rebuild() {
        let dir = tempfile::tempdir().unwrap_or_else(|e| panic!("tempdir: {e}"));
        let mut options = StoreOptions::default();
        options.root_path = dir.path().to_path_buf();
        let event_store = Arc::new(FsEventStore::open(options, "ctx").await.unwrap_or_else(|e| panic!("open: {e}")));

        for _ in 0..3 {
            let envelope = EventEnvelope {
                event_type: "Tapped.v1".into(),
                payload: serde_json::json!({ "key": "a" }),
                tags: Vec::new(),
                metadata: EventMetadata::now(),
            };
            event_store.append(vec![envelope], None).await.unwrap_or_else(|e| panic!("append: {e}"));
        }

        let manager = Arc::new(ProjectionManager::new(
            Arc::clone(&event_store),
            dir.path().join("ctx").join("projections"),
            dir.path().join("ctx").join("projections").join("_checkpoints"),
            FlushPolicy::FlushImmediately,
            1000,
            4,
        ));
        manager.register(TapCounter).await.unwrap_or_else(|e| panic!("register: {e}"));

        let daemon = ProjectionDaemon::new(Arc::clone(&event_store), Arc::clone(&manager), Duration::from_millis(10), 1000);
        daemon.poll_until_caught_up().await.unwrap_or_else(|e| panic!("poll: {e}"));

        assert_eq!(manager.checkpoint("tap-counter").await.unwrap_or_else(|e| panic!("checkpoint: {e}")), Position::new(3));
    }
}
