//! Testing utilities for consumers of `dcb-core`, `dcb-store`, and
//! `dcb-projections`: a deterministic clock, a temp-directory-backed event
//! store, and a fluent harness for unit-testing a single projection.

#![warn(missing_docs)]

pub mod clock;
pub mod fixtures;
pub mod harness;
pub mod init;

pub use clock::{test_clock, FixedClock};
pub use fixtures::TestStore;
pub use harness::ProjectionTestHarness;
pub use init::init_test_tracing;
