//! A fluent given/then harness for unit-testing a single [`Projection`] in
//! isolation, driving the projection's pure `apply` function directly
//! rather than a backing store — since `apply` here is a synchronous,
//! storeless function, there is nothing to wire up but the projection
//! itself.

use std::marker::PhantomData;

use dcb_core::{DomainEvent, StoreError};
use dcb_projections::Projection;

/// Drives a [`Projection`]'s `apply` across a sequence of events, holding
/// the accumulated state for one key so tests can assert on it afterward.
pub struct ProjectionTestHarness<E: DomainEvent, P: Projection<E>> {
    projection: P,
    state: Option<P::State>,
    _marker: PhantomData<E>,
}

impl<E: DomainEvent, P: Projection<E>> ProjectionTestHarness<E, P> {
    /// Builds a harness around `projection`, starting from no state (as if
    /// the key had never been seen before).
    #[must_use]
    pub const fn new(projection: P) -> Self {
        Self { projection, state: None, _marker: PhantomData }
    }

    /// Applies one event (with no related events) to the current state.
    ///
    /// # Errors
    ///
    /// Returns whatever error the projection's `apply` returns.
    pub fn given_event(&mut self, event: &E) -> Result<&mut Self, StoreError> {
        self.given_event_with_related(event, &[])
    }

    /// Applies one event together with its related events (for multi-stream
    /// projections exercising [`Projection::related_events_query`]-style
    /// behavior without going through an actual event store).
    ///
    /// # Errors
    ///
    /// Returns whatever error the projection's `apply` returns.
    pub fn given_event_with_related(&mut self, event: &E, related: &[E]) -> Result<&mut Self, StoreError> {
        let current = self.state.take();
        self.state = self.projection.apply(current, event, related)?;
        Ok(self)
    }

    /// Applies a sequence of events in order, each with no related events.
    ///
    /// # Errors
    ///
    /// Returns the first error encountered, leaving the state as of the
    /// last successfully applied event.
    pub fn given_events(&mut self, events: &[E]) -> Result<&mut Self, StoreError> {
        for event in events {
            self.given_event(event)?;
        }
        Ok(self)
    }

    /// The projection's current state, or `None` if it has never been set
    /// or was last deleted by an `apply` returning `None`.
    #[must_use]
    pub const fn then_state(&self) -> Option<&P::State> {
        self.state.as_ref()
    }

    /// Asserts the projection currently has no state for this key.
    ///
    /// # Panics
    ///
    /// Panics if state is present — this is the test assertion itself.
    pub fn then_absent(&self) {
        assert!(self.state.is_none(), "expected projection state to be absent, found some");
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)] // Panics: test-only, failure is the assertion.
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
    enum TestEvent {
        Incremented,
        Reset,
    }

    impl DomainEvent for TestEvent {
        fn event_type(&self) -> &'static str {
            match self {
                Self::Incremented => "Incremented.v1",
                Self::Reset => "Reset.v1",
            }
        }
    }

    #[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
    struct Counter {
        count: u64,
    }

    struct CounterProjection;

    impl Projection<TestEvent> for CounterProjection {
        type State = Counter;

        fn name(&self) -> &str {
            "counter"
        }

        fn event_types(&self) -> &'static [&'static str] {
            &["Incremented.v1", "Reset.v1"]
        }

        fn key_selector(&self, _event: &TestEvent) -> String {
            "singleton".to_string()
        }

        fn apply(&self, current: Option<Counter>, event: &TestEvent, _related: &[TestEvent]) -> Result<Option<Counter>, StoreError> {
            match event {
                TestEvent::Incremented => {
                    let mut counter = current.unwrap_or_default();
                    counter.count += 1;
                    Ok(Some(counter))
                }
                TestEvent::Reset => Ok(None),
            }
        }
    }

    #[test]
    fn given_events_accumulates_state() {
        crate::init_test_tracing();
        let mut harness = ProjectionTestHarness::new(CounterProjection);
        harness
            .given_events(&[TestEvent::Incremented, TestEvent::Incremented, TestEvent::Incremented])
            .unwrap_or_else(|e| panic!("apply: {e}"));
        assert_eq!(harness.then_state(), Some(&Counter { count: 3 }));
    }

    #[test]
    fn reset_event_clears_state() {
        crate::init_test_tracing();
        let mut harness = ProjectionTestHarness::new(CounterProjection);
        harness.given_event(&TestEvent::Incremented).unwrap_or_else(|e| panic!("apply: {e}"));
        harness.given_event(&TestEvent::Reset).unwrap_or_else(|e| panic!("apply: {e}"));
        harness.then_absent();
    }
}
