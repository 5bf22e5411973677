//! The monotonically increasing sequence position assigned to every event.
//!
//! A `Position` is a 64-bit, 1-based index into the global log. Position `0`
//! is reserved to mean "before the first event" and is used as the sentinel
//! value for a fresh checkpoint or an `AppendCondition` with no lower bound.

use std::fmt;
use std::num::ParseIntError;
use std::str::FromStr;

/// A 1-based sequence position in the event log.
///
/// `Position(0)` denotes "no position yet" (an empty log, or a checkpoint
/// that has never advanced). Real events start at `Position(1)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
pub struct Position(u64);

impl Position {
    /// The sentinel position preceding the first event.
    pub const ZERO: Self = Self(0);

    /// The position of the first event ever appended.
    pub const FIRST: Self = Self(1);

    /// Constructs a position from a raw `u64`.
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Returns the raw `u64` value.
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }

    /// Returns `true` if this is the sentinel "before the first event" position.
    #[must_use]
    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    /// Returns the next position after this one.
    ///
    /// # Panics
    ///
    /// Never panics: wraps at `u64::MAX`, which is not reachable in practice
    /// (it would take appending roughly 18 quintillion events).
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0.wrapping_add(1))
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for Position {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<Position> for u64 {
    fn from(position: Position) -> Self {
        position.0
    }
}

impl FromStr for Position {
    type Err = ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<u64>().map(Self)
    }
}
