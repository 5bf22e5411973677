//! Projection definitions: the pure `KeySelector`/`Apply` contract an
//! application implements, plus the type-erasure adapter that lets the
//! manager hold a heterogeneous registry of projections — each with its own
//! `State` type — behind one object-safe trait.
//!
//! The erasure boundary is JSON: [`Projection::State`] only ever needs to
//! be [`serde::Serialize`]/[`serde::de::DeserializeOwned`], and the blanket
//! `impl<P: Projection<E>> ErasedProjection<E> for P` round-trips state
//! through `serde_json::Value` at the crossing — the same narrow-the-object-
//! safe-surface-and-adapt-via-a-blanket-impl shape a `dyn`-compatible async
//! trait uses to erase a future's concrete type, applied here to a type
//! parameter instead.

use dcb_core::{DomainEvent, Query, StoreError, Tag};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// A projection: a pure function replaying events of a known set of types
/// into a keyed state store.
///
/// # Multi-stream projections
///
/// Override [`Projection::related_events_query`] to resolve additional
/// events the driving event depends on (for example, a line-item event that
/// needs its parent order). When present, the manager resolves the query
/// against the event store, sorts the results by position, and passes them
/// to `apply` as `related`. A driving event whose related-events query
/// yields nothing must be handled explicitly by `apply` — typically by
/// returning an error that fails the rebuild, since an empty related set
/// usually signals a data inconsistency rather than a legitimate "no
/// relation" case.
pub trait Projection<E: DomainEvent>: Send + Sync + 'static {
    /// The projection's persisted state type for one key.
    type State: Serialize + DeserializeOwned + Send + Sync + 'static;

    /// The projection's unique, process-wide name.
    fn name(&self) -> &str;

    /// The event types this projection consumes.
    fn event_types(&self) -> &'static [&'static str];

    /// Computes the state key a given event should be applied to.
    fn key_selector(&self, event: &E) -> String;

    /// Applies one event to the current state for its key.
    ///
    /// `current` is `None` on first encounter with a key. Returning `None`
    /// deletes the entity.
    ///
    /// # Errors
    ///
    /// Implementations return an error to abort the enclosing rebuild or
    /// update batch — for example when a multi-stream projection's related
    /// events are unexpectedly missing.
    fn apply(&self, current: Option<Self::State>, event: &E, related: &[E]) -> Result<Option<Self::State>, StoreError>;

    /// The tags this projection's state should be indexed under. Default:
    /// no tags (most projections do not need tag-indexed lookup).
    fn tags_for(&self, _state: &Self::State) -> Vec<Tag> {
        Vec::new()
    }

    /// An optional query resolving additional events a driving event
    /// depends on, for multi-stream projections. Default: none (single
    /// event per apply).
    fn related_events_query(&self, _event: &E) -> Option<Query> {
        None
    }
}

/// The object-safe view of a [`Projection`] the manager stores in its
/// registry, with `State` erased to JSON at the boundary.
pub(crate) trait ErasedProjection<E: DomainEvent>: Send + Sync {
    fn name(&self) -> &str;
    fn event_types(&self) -> &'static [&'static str];
    fn key_selector(&self, event: &E) -> String;
    fn related_events_query(&self, event: &E) -> Option<Query>;
    fn apply_erased(
        &self,
        current: Option<serde_json::Value>,
        event: &E,
        related: &[E],
    ) -> Result<Option<serde_json::Value>, StoreError>;
    fn tags_for_erased(&self, state: &serde_json::Value) -> Result<Vec<Tag>, StoreError>;
}

impl<P, E> ErasedProjection<E> for P
where
    P: Projection<E>,
    E: DomainEvent,
{
    fn name(&self) -> &str {
        Projection::name(self)
    }

    fn event_types(&self) -> &'static [&'static str] {
        Projection::event_types(self)
    }

    fn key_selector(&self, event: &E) -> String {
        Projection::key_selector(self, event)
    }

    fn related_events_query(&self, event: &E) -> Option<Query> {
        Projection::related_events_query(self, event)
    }

    fn apply_erased(
        &self,
        current: Option<serde_json::Value>,
        event: &E,
        related: &[E],
    ) -> Result<Option<serde_json::Value>, StoreError> {
        let current_state: Option<P::State> = match current {
            Some(value) => Some(serde_json::from_value(value).map_err(StoreError::Serialization)?),
            None => None,
        };
        let next = self.apply(current_state, event, related)?;
        match next {
            Some(state) => Ok(Some(serde_json::to_value(state).map_err(StoreError::Serialization)?)),
            None => Ok(None),
        }
    }

    fn tags_for_erased(&self, state: &serde_json::Value) -> Result<Vec<Tag>, StoreError> {
        let state: P::State = serde_json::from_value(state.clone()).map_err(StoreError::Serialization)?;
        Ok(self.tags_for(&state))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)] // Panics: test-only, failure is the assertion.
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
    enum TestEvent {
        Incremented { key: String },
    }

    impl DomainEvent for TestEvent {
        fn event_type(&self) -> &'static str {
            "Incremented.v1"
        }
    }

    #[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
    struct Counter {
        count: u64,
    }

    struct CounterProjection;

    impl Projection<TestEvent> for CounterProjection {
        type State = Counter;

        fn name(&self) -> &str {
            "counters"
        }

        fn event_types(&self) -> &'static [&'static str] {
            &["Incremented.v1"]
        }

        fn key_selector(&self, event: &TestEvent) -> String {
            let TestEvent::Incremented { key } = event;
            key.clone()
        }

        fn apply(&self, current: Option<Counter>, _event: &TestEvent, _related: &[TestEvent]) -> Result<Option<Counter>, StoreError> {
            let mut counter = current.unwrap_or_default();
            counter.count += 1;
            Ok(Some(counter))
        }
    }

    #[test]
    fn erased_projection_round_trips_state_through_json() {
        let projection = CounterProjection;
        let event = TestEvent::Incremented { key: "a".into() };

        let first = projection.apply_erased(None, &event, &[]).unwrap_or_else(|e| panic!("apply: {e}"));
        let first_value = first.unwrap_or_else(|| panic!("expected some state"));
        assert_eq!(first_value, serde_json::json!({ "count": 1 }));

        let second = projection.apply_erased(Some(first_value), &event, &[]).unwrap_or_else(|e| panic!("apply: {e}"));
        assert_eq!(second, Some(serde_json::json!({ "count": 2 })));
    }
}
