//! The projection manager: the registry of projection definitions, their
//! per-projection locks, rebuild, and incremental update.
//!
//! One manager struct owns the event source, the per-projection storage,
//! and a checkpoint per projection, holding a registry of many projection
//! definitions rather than being specialized to a single one.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use dcb_core::{DomainEvent, Position, Query, ReadOptions, SequencedEvent, StoreError};
use dcb_store::{FlushPolicy, FsEventStore};
use tokio::sync::{Mutex, RwLock};

use crate::checkpoint::FsCheckpointStore;
use crate::definition::{ErasedProjection, Projection};
use crate::store::FsProjectionStore;

/// Per-run statistics for one projection's rebuild, part of
/// [`RebuildReport::details`].
#[derive(Debug, Clone)]
pub struct RebuildDetail {
    /// The projection's name.
    pub name: String,
    /// Whether the rebuild completed without error.
    pub success: bool,
    /// How long the rebuild took.
    pub duration: Duration,
    /// How many events were replayed.
    pub events_processed: u64,
    /// The error message, if `success` is `false`.
    pub error_message: Option<String>,
}

/// The aggregate result of [`ProjectionManager::rebuild_all`] or
/// [`ProjectionManager::rebuild_many`].
///
/// One projection's failure never cancels the others: `details` always has
/// one entry per attempted projection.
#[derive(Debug, Clone, Default)]
pub struct RebuildReport {
    /// How many projections rebuilt successfully.
    pub total_rebuilt: u64,
    /// Wall-clock time for the whole batch.
    pub duration: Duration,
    /// Per-projection results, in completion order.
    pub details: Vec<RebuildDetail>,
    /// Names of projections whose rebuild failed.
    pub failed_projections: Vec<String>,
}

/// A snapshot of which projections are currently rebuilding or queued to.
#[derive(Debug, Clone, Default)]
pub struct RebuildStatus {
    /// `true` if any projection is currently rebuilding.
    pub is_rebuilding: bool,
    /// Projections whose rebuild is in progress right now.
    pub in_progress: Vec<String>,
    /// Projections waiting for a rebuild slot.
    pub queued: Vec<String>,
    /// When the current rebuild batch started, if one is running.
    pub started_at: Option<DateTime<Utc>>,
}

struct Registered<E: DomainEvent> {
    definition: Arc<dyn ErasedProjection<E>>,
    store: Arc<FsProjectionStore>,
    lock: Arc<Mutex<()>>,
}

/// The registry of projection definitions for one event store context,
/// providing registration, rebuild, and incremental update.
///
/// # Dyn Compatibility
///
/// Each registered projection keeps its own `State` type private; the
/// manager only ever talks to the object-safe [`ErasedProjection`] view, so
/// projections with unrelated state types can share one registry — see
/// `definition.rs` for the erasure boundary.
pub struct ProjectionManager<E: DomainEvent> {
    event_store: Arc<FsEventStore>,
    projections_root: std::path::PathBuf,
    checkpoints: Arc<FsCheckpointStore>,
    flush_policy: FlushPolicy,
    batch_size: usize,
    max_concurrent_rebuilds: usize,
    registry: RwLock<HashMap<String, Registered<E>>>,
    status: Arc<RwLock<RebuildStatus>>,
}

impl<E: DomainEvent> ProjectionManager<E> {
    /// Builds a manager over `event_store`, storing projection state under
    /// `projections_root` and checkpoints under `checkpoints_root`.
    #[must_use]
    pub fn new(
        event_store: Arc<FsEventStore>,
        projections_root: impl Into<std::path::PathBuf>,
        checkpoints_root: impl Into<std::path::PathBuf>,
        flush_policy: FlushPolicy,
        batch_size: usize,
        max_concurrent_rebuilds: usize,
    ) -> Self {
        Self {
            event_store,
            projections_root: projections_root.into(),
            checkpoints: Arc::new(FsCheckpointStore::new(checkpoints_root, flush_policy)),
            flush_policy,
            batch_size,
            max_concurrent_rebuilds,
            registry: RwLock::new(HashMap::new()),
            status: Arc::new(RwLock::new(RebuildStatus::default())),
        }
    }

    /// Registers a projection definition. Fails if a projection with the
    /// same name is already registered.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Validation`] on a duplicate name, or
    /// [`StoreError::Io`]/[`StoreError::Serialization`] if the projection's
    /// storage cannot be opened.
    pub async fn register<P>(&self, definition: P) -> Result<(), StoreError>
    where
        P: Projection<E>,
    {
        let name = definition.name().to_string();
        let mut registry = self.registry.write().await;
        if registry.contains_key(&name) {
            return Err(StoreError::validation(format!("projection {name:?} is already registered")));
        }

        let store = FsProjectionStore::open(&self.projections_root, &name, self.flush_policy).await?;
        registry.insert(
            name,
            Registered { definition: Arc::new(definition), store: Arc::new(store), lock: Arc::new(Mutex::new(())) },
        );
        Ok(())
    }

    /// Returns `name`'s last processed position, or [`Position::ZERO`] if
    /// it has never checkpointed.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`]/[`StoreError::Serialization`] on a
    /// storage failure.
    pub async fn checkpoint(&self, name: &str) -> Result<Position, StoreError> {
        self.checkpoints.get(name).await
    }

    /// Persists `position` as `name`'s checkpoint.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`]/[`StoreError::Serialization`] on a
    /// storage failure.
    pub async fn save_checkpoint(&self, name: &str, position: Position) -> Result<(), StoreError> {
        self.checkpoints.save(name, position).await
    }

    /// A snapshot of the rebuild status.
    pub async fn rebuild_status(&self) -> RebuildStatus {
        self.status.read().await.clone()
    }

    /// The lowest checkpoint across every registered projection, or
    /// [`Position::ZERO`] if none are registered — the position the daemon
    /// must read strictly after to guarantee every projection sees every
    /// event it is subscribed to.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`]/[`StoreError::Serialization`] if a
    /// checkpoint cannot be read.
    pub async fn minimum_checkpoint(&self) -> Result<Position, StoreError> {
        let names: Vec<String> = {
            let registry = self.registry.read().await;
            registry.keys().cloned().collect()
        };

        let mut minimum = None;
        for name in names {
            let checkpoint = self.checkpoints.get(&name).await?;
            minimum = Some(minimum.map_or(checkpoint, |current: Position| current.min(checkpoint)));
        }
        Ok(minimum.unwrap_or(Position::ZERO))
    }

    /// Rebuilds a single projection from scratch: deletes its indices,
    /// resets its checkpoint, then replays every matching event in batches,
    /// checkpointing after each batch.
    ///
    /// Fails fast with [`StoreError::ProjectionBusy`] if the projection is
    /// already rebuilding or updating.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::UnknownProjection`] if `name` is not
    /// registered, [`StoreError::ProjectionBusy`] if it is locked, or any
    /// storage/processing error encountered while replaying events.
    pub async fn rebuild(&self, name: &str) -> Result<RebuildDetail, StoreError> {
        let registered = self.lookup(name).await?;

        let lock = Arc::clone(&registered.lock);
        let Ok(_guard) = lock.try_lock() else {
            return Err(StoreError::ProjectionBusy { name: name.to_string() });
        };

        self.mark_in_progress(name).await;
        let started = Instant::now();
        let result = self.rebuild_locked(name, &registered).await;
        self.mark_done(name).await;

        let duration = started.elapsed();
        Ok(match result {
            Ok(events_processed) => {
                RebuildDetail { name: name.to_string(), success: true, duration, events_processed, error_message: None }
            }
            Err(error) => {
                tracing::error!(projection = name, %error, "rebuild failed");
                RebuildDetail {
                    name: name.to_string(),
                    success: false,
                    duration,
                    events_processed: 0,
                    error_message: Some(error.to_string()),
                }
            }
        })
    }

    async fn rebuild_locked(&self, name: &str, registered: &Registered<E>) -> Result<u64, StoreError> {
        registered.store.delete_all_indices().await?;
        self.checkpoints.reset(name).await?;

        let query = Query::FromEventTypes(registered.definition.event_types().iter().map(|s| (*s).to_string()).collect());
        let mut processed = 0u64;
        let mut after = Position::ZERO;

        loop {
            let options = ReadOptions::ascending().with_after_position(after).with_limit(self.batch_size);
            let batch = self.event_store.read(&query, options).await?;
            if batch.is_empty() {
                break;
            }

            for sequenced in &batch {
                self.apply_one(registered, sequenced).await?;
                processed += 1;
            }

            after = batch.last().map_or(after, |e| e.position);
            self.checkpoints.save(name, after).await?;

            if batch.len() < self.batch_size {
                break;
            }
        }

        tracing::info!(projection = name, events_processed = processed, "rebuild complete");
        Ok(processed)
    }

    /// Rebuilds an explicit set of projections with bounded concurrency.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Validation`] if `names` is empty.
    pub async fn rebuild_many(&self, names: &[String]) -> Result<RebuildReport, StoreError> {
        if names.is_empty() {
            return Err(StoreError::validation("rebuild requires at least one projection name"));
        }

        let started = Instant::now();

        use futures::StreamExt;
        let details: Vec<Result<RebuildDetail, StoreError>> = futures::stream::iter(names.iter().cloned())
            .map(|name| async move { self.rebuild(&name).await })
            .buffer_unordered(self.max_concurrent_rebuilds.max(1))
            .collect()
            .await;

        let mut report = RebuildReport::default();
        for detail in details {
            let detail = detail?;
            if detail.success {
                report.total_rebuilt += 1;
            } else {
                report.failed_projections.push(detail.name.clone());
            }
            report.details.push(detail);
        }
        report.duration = started.elapsed();
        Ok(report)
    }

    /// Rebuilds every projection whose checkpoint is zero (never
    /// rebuilt/updated), or every registered projection if `force_rebuild`
    /// is `true`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`]/[`StoreError::Serialization`] if a
    /// checkpoint cannot be read, or propagates the first error from
    /// [`ProjectionManager::rebuild_many`]'s setup (individual projection
    /// failures are captured in the returned report, not propagated).
    pub async fn rebuild_all(&self, force_rebuild: bool) -> Result<RebuildReport, StoreError> {
        let names: Vec<String> = {
            let registry = self.registry.read().await;
            registry.keys().cloned().collect()
        };

        let mut selected = Vec::new();
        for name in names {
            if force_rebuild || self.checkpoints.get(&name).await? == Position::ZERO {
                selected.push(name);
            }
        }

        if selected.is_empty() {
            return Ok(RebuildReport::default());
        }
        self.rebuild_many(&selected).await
    }

    /// Applies a batch of newly appended events to every registered
    /// projection, skipping (not queueing, not failing) any projection
    /// whose lock is currently held by a rebuild.
    ///
    /// A single projection failing to apply an event never aborts the
    /// batch for the others: see [`ProjectionManager::update_one`].
    ///
    /// # Errors
    ///
    /// Returns an error only if a projection's registry lookup or
    /// checkpoint storage itself fails; a projection's own `apply` erroring
    /// on one event is logged and skipped rather than propagated.
    pub async fn update(&self, events: &[SequencedEvent]) -> Result<(), StoreError> {
        let names: Vec<String> = {
            let registry = self.registry.read().await;
            registry.keys().cloned().collect()
        };

        for name in names {
            self.update_one(&name, events).await?;
        }
        Ok(())
    }

    /// Applies `events` to one projection, advancing its checkpoint to the
    /// batch's last position whether or not any event was relevant to it —
    /// a projection whose `event_types` never overlap this batch must still
    /// move forward, or its checkpoint would pin
    /// [`ProjectionManager::minimum_checkpoint`] forever and the daemon
    /// would re-read the same batch on every poll.
    ///
    /// Events at or before this projection's own checkpoint are dropped
    /// before applying, so a batch the daemon re-delivers (because some
    /// other projection is lagging) is not re-applied here.
    ///
    /// If applying an event fails, the error is logged and this
    /// projection's checkpoint is left unadvanced for this batch — the
    /// failure never propagates to the caller or to other projections,
    /// per the daemon's log-and-continue contract.
    async fn update_one(&self, name: &str, events: &[SequencedEvent]) -> Result<(), StoreError> {
        let registered = self.lookup(name).await?;
        let lock = Arc::clone(&registered.lock);
        let Ok(_guard) = lock.try_lock() else {
            tracing::debug!(projection = name, "skipping update: projection is busy rebuilding");
            return Ok(());
        };

        let Some(batch_last) = events.last().map(|e| e.position) else {
            return Ok(());
        };

        let checkpoint = self.checkpoints.get(name).await?;
        let relevant: Vec<&SequencedEvent> = events
            .iter()
            .filter(|e| e.position > checkpoint && registered.definition.event_types().contains(&e.envelope.event_type.as_str()))
            .collect();

        for sequenced in relevant {
            if let Err(error) = self.apply_one(&registered, sequenced).await {
                tracing::error!(
                    projection = name,
                    position = %sequenced.position,
                    %error,
                    "failed to apply event during incremental update; checkpoint not advanced"
                );
                return Ok(());
            }
        }

        self.checkpoints.save(name, batch_last).await
    }

    async fn apply_one(&self, registered: &Registered<E>, sequenced: &SequencedEvent) -> Result<(), StoreError> {
        let event: E = sequenced.deserialize()?;
        let key = registered.definition.key_selector(&event);

        let related = match registered.definition.related_events_query(&event) {
            Some(query) => {
                let events = self.event_store.read(&query, ReadOptions::ascending()).await?;
                let mut typed = Vec::with_capacity(events.len());
                for related_event in &events {
                    typed.push(related_event.deserialize::<E>()?);
                }
                typed
            }
            None => Vec::new(),
        };

        let current = registered.store.get(&key).await?.map(|entity| entity.data);
        let next = registered.definition.apply_erased(current, &event, &related)?;

        match next {
            Some(state) => {
                let tags = registered.definition.tags_for_erased(&state)?;
                registered.store.save(&key, state, tags).await?;
            }
            None => {
                registered.store.delete(&key).await?;
            }
        }
        Ok(())
    }

    async fn lookup(&self, name: &str) -> Result<Arc<LookupHandle<E>>, StoreError> {
        let registry = self.registry.read().await;
        let registered = registry.get(name).ok_or_else(|| StoreError::UnknownProjection(name.to_string()))?;
        Ok(Arc::new(LookupHandle {
            definition: Arc::clone(&registered.definition),
            store: Arc::clone(&registered.store),
            lock: Arc::clone(&registered.lock),
        }))
    }

    async fn mark_in_progress(&self, name: &str) {
        let mut status = self.status.write().await;
        status.in_progress.push(name.to_string());
        status.queued.retain(|n| n != name);
        status.is_rebuilding = true;
        if status.started_at.is_none() {
            status.started_at = Some(Utc::now());
        }
    }

    async fn mark_done(&self, name: &str) {
        let mut status = self.status.write().await;
        status.in_progress.retain(|n| n != name);
        status.is_rebuilding = !status.in_progress.is_empty();
        if !status.is_rebuilding {
            status.started_at = None;
        }
    }
}

/// A clone of a registry entry's shared handles, avoiding holding the
/// registry's read lock across the whole rebuild/update path.
type LookupHandle<E> = Registered<E>;
