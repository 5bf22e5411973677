//! `AppendCondition`: the DCB consistency check evaluated at append time.

use crate::position::Position;
use crate::query::Query;

/// A Dynamic Consistency Boundary check: "fail the append if any event
/// matching `fail_if_events_match` exists beyond `after_sequence_position`."
///
/// Evaluated under the cross-process lock immediately before events are
/// written, against the store's current `LastSequencePosition` — never
/// against a stale snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppendCondition {
    /// The position the caller last observed; the condition is evaluated
    /// against everything strictly after this position.
    pub after_sequence_position: Position,
    /// The query that must match nothing for the append to succeed.
    pub fail_if_events_match: Query,
}

impl AppendCondition {
    /// Builds a condition.
    #[must_use]
    pub fn new(after_sequence_position: Position, fail_if_events_match: Query) -> Self {
        Self { after_sequence_position, fail_if_events_match }
    }
}
