//! A deterministic clock for tests that need stable, comparable
//! [`EventMetadata`] timestamps, stamping [`EventMetadata`] directly rather
//! than implementing a `Clock` trait, since `EventMetadata::now()` calls
//! `Utc::now()` directly and there is no trait to substitute.

use chrono::{DateTime, Utc};
use dcb_core::EventMetadata;

/// Always returns the same instant, so tests asserting on timestamps don't
/// race real wall-clock time.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock {
    time: DateTime<Utc>,
}

impl FixedClock {
    /// Builds a clock fixed at `time`.
    #[must_use]
    pub const fn new(time: DateTime<Utc>) -> Self {
        Self { time }
    }

    /// The fixed instant.
    #[must_use]
    pub const fn now(&self) -> DateTime<Utc> {
        self.time
    }

    /// Builds [`EventMetadata`] stamped with this clock's fixed time and no
    /// correlation id.
    #[must_use]
    pub fn metadata(&self) -> EventMetadata {
        EventMetadata { timestamp: self.time, correlation_id: None, extra: serde_json::Value::Null }
    }
}

/// A fixed clock reading `2025-01-01T00:00:00Z`, for tests that don't care
/// about a specific instant, only that it's stable.
#[must_use]
#[allow(clippy::expect_used)] // hardcoded timestamp always parses
pub fn test_clock() -> FixedClock {
    FixedClock::new(
        DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
            .expect("hardcoded timestamp should always parse")
            .with_timezone(&Utc),
    )
}
