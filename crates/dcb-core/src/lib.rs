//! Data model and shared error type for the embedded DCB event store.
//!
//! This crate defines the vocabulary every other crate in the workspace
//! builds on: positions, tags, the event envelope, the query algebra, the
//! append condition, and the `StoreError` enum. It has no I/O of its own.

#![warn(missing_docs)]

pub mod condition;
pub mod error;
pub mod event;
pub mod position;
pub mod query;
pub mod tag;

pub use condition::AppendCondition;
pub use error::{Result, StoreError};
pub use event::{DomainEvent, EventEnvelope, EventMetadata, SequencedEvent};
pub use position::Position;
pub use query::{Query, QueryItem, ReadOptions};
pub use tag::Tag;
